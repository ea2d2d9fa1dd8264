//! No-leap calendar and circular day-of-year arithmetic.
//!
//! Every date maps onto a 365-day year: in leap years Feb 29 shares day 59
//! with Feb 28 and the rest of the year shifts down by one, so Dec 31 is
//! always day 365. Day-of-year values live on a circle; day 365 and day 1 are
//! neighbours.

use std::f64::consts::TAU;

use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};

pub const DAYS_PER_YEAR: u16 = 365;

/// Ordinal of Feb 28; the leap day folds onto it.
const FEB_28: u16 = 59;

pub fn is_leap_year(year: i32) -> bool {
    (year % 4 == 0 && year % 100 != 0) || year % 400 == 0
}

/// Day of year in `1..=365` on the no-leap calendar.
pub fn day_of_year(date: NaiveDate) -> u16 {
    let ordinal = date.ordinal() as u16;
    if is_leap_year(date.year()) && ordinal > FEB_28 {
        ordinal - 1
    } else {
        ordinal
    }
}

/// Shortest distance between two days around the year circle.
pub fn circular_day_distance(a: u16, b: u16) -> u16 {
    let d = a.abs_diff(b) % DAYS_PER_YEAR;
    d.min(DAYS_PER_YEAR - d)
}

/// Angle of a (possibly fractional) day of year, in radians.
#[inline]
fn day_angle(day: f64) -> f64 {
    TAU * day / DAYS_PER_YEAR as f64
}

/// `(sin, cos)` encoding of a day of year, angle `2π·day/365`.
pub fn doy_encoding(day: f64) -> (f64, f64) {
    let a = day_angle(day);
    (a.sin(), a.cos())
}

/// Circular mean of day-of-year values, in `(0, 365]`.
///
/// Returns `None` for an empty input or when the days cancel out (e.g. two
/// days exactly half a year apart).
pub fn circular_mean_day<I>(days: I) -> Option<f64>
where
    I: IntoIterator<Item = f64>,
{
    let mut s = 0.0f64;
    let mut c = 0.0f64;
    let mut n = 0usize;
    for d in days {
        let (ds, dc) = doy_encoding(d);
        s += ds;
        c += dc;
        n += 1;
    }
    if n == 0 || (s * s + c * c).sqrt() / (n as f64) < 1e-9 {
        return None;
    }
    let mut day = s.atan2(c) / TAU * DAYS_PER_YEAR as f64;
    if day <= 0.0 {
        day += DAYS_PER_YEAR as f64;
    }
    Some(day)
}

/// Inclusive arc of days on the year circle. `start > end` means the arc
/// crosses the new year.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CircularInterval {
    pub start: u16,
    pub end: u16,
}

impl CircularInterval {
    /// The shortest arc covering every day in `days` (the complement of the
    /// largest circular gap). `None` if `days` is empty.
    pub fn covering<I>(days: I) -> Option<Self>
    where
        I: IntoIterator<Item = u16>,
    {
        let mut present = [false; DAYS_PER_YEAR as usize + 1];
        for d in days {
            if (1..=DAYS_PER_YEAR).contains(&d) {
                present[d as usize] = true;
            }
        }
        let sorted: Vec<u16> = (1..=DAYS_PER_YEAR).filter(|&d| present[d as usize]).collect();
        let (&first, &last) = (sorted.first()?, sorted.last()?);

        // Gap that wraps over the year end. On ties this one wins, which keeps
        // non-wrapping arcs whenever possible.
        let mut best_gap = first + DAYS_PER_YEAR - last - 1;
        let mut interval = Self { start: first, end: last };
        for w in sorted.windows(2) {
            let gap = w[1] - w[0] - 1;
            if gap > best_gap {
                best_gap = gap;
                interval = Self { start: w[1], end: w[0] };
            }
        }
        Some(interval)
    }

    pub fn wraps(&self) -> bool {
        self.start > self.end
    }

    /// Number of days on the arc.
    pub fn len(&self) -> u16 {
        if self.wraps() {
            DAYS_PER_YEAR - self.start + self.end + 1
        } else {
            self.end - self.start + 1
        }
    }

    pub fn is_empty(&self) -> bool {
        false
    }

    pub fn contains(&self, day: u16) -> bool {
        if self.wraps() {
            day >= self.start || day <= self.end
        } else {
            (self.start..=self.end).contains(&day)
        }
    }
}

/// Coarse season label for a family or event, by quarter of the no-leap year.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Season {
    Winter,
    Spring,
    Summer,
    Autumn,
}

impl Season {
    pub const ALL: [Season; 4] = [Season::Winter, Season::Spring, Season::Summer, Season::Autumn];

    pub fn from_mean_day(day: f64) -> Self {
        if day <= 90.0 {
            Season::Winter
        } else if day <= 180.0 {
            Season::Spring
        } else if day <= 270.0 {
            Season::Summer
        } else {
            Season::Autumn
        }
    }
}
