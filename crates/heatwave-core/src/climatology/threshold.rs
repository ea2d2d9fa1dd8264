//! Calendar-day exceedance thresholds.
//!
//! For every cell and every day of the no-leap year, the threshold is the
//! empirical percentile of all non-missing values whose day of year falls in
//! a centred window, pooled over every year except (optionally) one. The
//! window wraps across the year boundary.

use std::borrow::Cow;
use std::collections::{BTreeMap, BTreeSet};

use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::percentile::percentile;
use crate::calendar::{day_of_year, DAYS_PER_YEAR};
use crate::error::{HeatwaveError, Result};
use crate::grid::{DailyField, GridPoint, GridShape, TemperatureSource};

/// How thresholds are pooled over years.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ThresholdMode {
    /// One field from all years (minus `exclude_year`, if set).
    Pooled,
    /// One field per year, each excluding its own year.
    LeaveOneOut,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ThresholdConfig {
    /// Percentile in [0, 100].
    pub percentile: f64,
    /// Odd window width in days, centred on the target day.
    pub window_days: u16,
    pub mode: ThresholdMode,
    /// Only used by `ThresholdMode::Pooled`.
    pub exclude_year: Option<i32>,
}

impl Default for ThresholdConfig {
    fn default() -> Self {
        Self {
            percentile: 90.0,
            window_days: 31,
            mode: ThresholdMode::Pooled,
            exclude_year: None,
        }
    }
}

/// Per-date threshold access, whatever the pooling scheme.
///
/// Consumers walk the record one year at a time through `year_field`, so an
/// implementation may build each year's calendar on demand.
pub trait ThresholdLookup: Sync {
    fn shape(&self) -> GridShape;

    /// Reject malformed thresholds. Called before any exceedance work.
    fn validate(&self) -> Result<()> {
        Ok(())
    }

    /// Calendar of thresholds for dates in `year`. `None` when nothing covers
    /// the year, which makes all of its days non-exceeding.
    fn year_field(&self, year: i32) -> Option<Cow<'_, ThresholdField>>;

    fn threshold(&self, p: GridPoint, date: NaiveDate) -> Option<f32> {
        let field = self.year_field(date.year())?;
        field.for_day(day_of_year(date))?.get(p)
    }
}

/// One threshold field per day of year; `days[doy - 1]`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThresholdField {
    pub days: Vec<DailyField>,
    pub percentile: f64,
    pub window_days: u16,
    pub excluded_year: Option<i32>,
}

impl ThresholdField {
    pub fn for_day(&self, doy: u16) -> Option<&DailyField> {
        self.days.get(usize::from(doy).checked_sub(1)?)
    }

    /// A full calendar of same-shaped fields.
    pub fn check(&self) -> Result<()> {
        if self.days.len() != DAYS_PER_YEAR as usize {
            return Err(HeatwaveError::InvalidSeries(format!(
                "threshold field covers {} calendar days, expected {DAYS_PER_YEAR}",
                self.days.len()
            )));
        }
        let shape = self.shape();
        for (i, day) in self.days.iter().enumerate() {
            if day.shape != shape {
                return Err(HeatwaveError::ShapeMismatch { expected: shape, found: day.shape });
            }
            if day.data.len() != shape.n_cells() {
                return Err(HeatwaveError::InvalidSeries(format!(
                    "threshold day {} holds {} values for a {shape} grid",
                    i + 1,
                    day.data.len()
                )));
            }
        }
        Ok(())
    }
}

impl ThresholdLookup for ThresholdField {
    fn shape(&self) -> GridShape {
        self.days.first().map_or(GridShape::new(0, 0), |d| d.shape)
    }

    fn validate(&self) -> Result<()> {
        self.check()
    }

    fn year_field(&self, _year: i32) -> Option<Cow<'_, ThresholdField>> {
        Some(Cow::Borrowed(self))
    }
}

/// Precomputed leave-one-out thresholds keyed by the excluded (= target) year.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct YearlyThresholds {
    pub shape: GridShape,
    pub by_year: BTreeMap<i32, ThresholdField>,
}

impl ThresholdLookup for YearlyThresholds {
    fn shape(&self) -> GridShape {
        self.shape
    }

    fn validate(&self) -> Result<()> {
        for field in self.by_year.values() {
            field.check()?;
            if field.shape() != self.shape {
                return Err(HeatwaveError::ShapeMismatch { expected: self.shape, found: field.shape() });
            }
        }
        Ok(())
    }

    fn year_field(&self, year: i32) -> Option<Cow<'_, ThresholdField>> {
        self.by_year.get(&year).map(Cow::Borrowed)
    }
}

/// Leave-one-out thresholds estimated one year at a time, so only a single
/// year's calendar is alive at once.
pub struct LeaveOneOutThresholds<'a, S: ?Sized> {
    estimator: ThresholdEstimator,
    source: &'a S,
    years: BTreeSet<i32>,
}

impl<S> LeaveOneOutThresholds<'_, S>
where
    S: TemperatureSource + ?Sized,
{
    pub fn years(&self) -> impl Iterator<Item = i32> + '_ {
        self.years.iter().copied()
    }
}

impl<S> ThresholdLookup for LeaveOneOutThresholds<'_, S>
where
    S: TemperatureSource + ?Sized,
{
    fn shape(&self) -> GridShape {
        self.source.shape()
    }

    fn year_field(&self, year: i32) -> Option<Cow<'_, ThresholdField>> {
        if !self.years.contains(&year) {
            return None;
        }
        debug!(year, "estimating leave-one-out thresholds");
        Some(Cow::Owned(self.estimator.estimate(self.source, Some(year))))
    }
}

/// Thresholds of either pooling scheme, as built by the pipeline.
pub enum Thresholds<'a, S: ?Sized> {
    Pooled(ThresholdField),
    LeaveOneOut(LeaveOneOutThresholds<'a, S>),
}

impl<S> ThresholdLookup for Thresholds<'_, S>
where
    S: TemperatureSource + ?Sized,
{
    fn shape(&self) -> GridShape {
        match self {
            Thresholds::Pooled(t) => t.shape(),
            Thresholds::LeaveOneOut(t) => t.shape(),
        }
    }

    fn validate(&self) -> Result<()> {
        match self {
            Thresholds::Pooled(t) => t.validate(),
            Thresholds::LeaveOneOut(t) => t.validate(),
        }
    }

    fn year_field(&self, year: i32) -> Option<Cow<'_, ThresholdField>> {
        match self {
            Thresholds::Pooled(t) => t.year_field(year),
            Thresholds::LeaveOneOut(t) => t.year_field(year),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ThresholdEstimator {
    percentile: f64,
    half_window: u16,
}

impl ThresholdEstimator {
    /// Fails with `InvalidConfig` for a percentile outside [0, 100] or a
    /// window that is even, zero, or longer than a year.
    pub fn new(percentile: f64, window_days: u16) -> Result<Self> {
        if !(0.0..=100.0).contains(&percentile) {
            return Err(HeatwaveError::InvalidConfig(format!(
                "threshold percentile {percentile} outside [0, 100]"
            )));
        }
        if window_days % 2 == 0 || window_days > DAYS_PER_YEAR {
            return Err(HeatwaveError::InvalidConfig(format!(
                "threshold window must be odd and at most {DAYS_PER_YEAR} days, got {window_days}"
            )));
        }
        Ok(Self { percentile, half_window: window_days / 2 })
    }

    pub fn from_config(config: &ThresholdConfig) -> Result<Self> {
        Self::new(config.percentile, config.window_days)
    }

    pub fn window_days(&self) -> u16 {
        self.half_window * 2 + 1
    }

    /// Build thresholds according to `config.mode`.
    pub fn estimate_with<'a, S>(&self, source: &'a S, config: &ThresholdConfig) -> Thresholds<'a, S>
    where
        S: TemperatureSource + ?Sized,
    {
        match config.mode {
            ThresholdMode::Pooled => Thresholds::Pooled(self.estimate(source, config.exclude_year)),
            ThresholdMode::LeaveOneOut => Thresholds::LeaveOneOut(self.leave_one_out(source)),
        }
    }

    /// Pool every year except `excluded_year`.
    pub fn estimate<S>(&self, source: &S, excluded_year: Option<i32>) -> ThresholdField
    where
        S: TemperatureSource + ?Sized,
    {
        let buckets = doy_buckets(source, excluded_year);
        let doys: Vec<u16> = (1..=DAYS_PER_YEAR).collect();

        #[cfg(feature = "threading")]
        let days: Vec<DailyField> = {
            use rayon::prelude::*;
            doys.par_iter().map(|&d| self.day_thresholds(source, &buckets, d)).collect()
        };
        #[cfg(not(feature = "threading"))]
        let days: Vec<DailyField> =
            doys.iter().map(|&d| self.day_thresholds(source, &buckets, d)).collect();

        ThresholdField {
            days,
            percentile: self.percentile,
            window_days: self.window_days(),
            excluded_year,
        }
    }

    /// Lazy leave-one-out thresholds over the years present in `source`.
    pub fn leave_one_out<'a, S>(&self, source: &'a S) -> LeaveOneOutThresholds<'a, S>
    where
        S: TemperatureSource + ?Sized,
    {
        let years: BTreeSet<i32> = source.dates().iter().map(|d| d.year()).collect();
        LeaveOneOutThresholds { estimator: *self, source, years }
    }

    /// Every leave-one-out field at once (years × 365 fields), for export.
    pub fn estimate_leave_one_out<S>(&self, source: &S) -> YearlyThresholds
    where
        S: TemperatureSource + ?Sized,
    {
        let lazy = self.leave_one_out(source);
        debug!(n_years = lazy.years.len(), "estimating leave-one-out thresholds");
        let by_year = lazy.years().map(|y| (y, self.estimate(source, Some(y)))).collect();
        YearlyThresholds { shape: source.shape(), by_year }
    }

    /// Thresholds for every cell on calendar day `doy`.
    fn day_thresholds<S>(&self, source: &S, buckets: &[Vec<usize>], doy: u16) -> DailyField
    where
        S: TemperatureSource + ?Sized,
    {
        let shape = source.shape();
        let n = DAYS_PER_YEAR as i32;
        let h = self.half_window as i32;
        let window: Vec<usize> = (-h..=h)
            .flat_map(|off| {
                let idx = (doy as i32 - 1 + off).rem_euclid(n) as usize;
                buckets[idx].iter().copied()
            })
            .collect();

        let mut samples: Vec<f32> = Vec::with_capacity(window.len());
        let data = (0..shape.n_cells())
            .map(|i| {
                let p = shape.point(i);
                samples.clear();
                samples.extend(window.iter().filter_map(|&day| source.value(day, p)));
                percentile(&mut samples, self.percentile).unwrap_or(f32::NAN)
            })
            .collect();
        DailyField { data, shape }
    }
}

/// Source day indices grouped by day of year (`buckets[doy - 1]`).
fn doy_buckets<S>(source: &S, excluded_year: Option<i32>) -> Vec<Vec<usize>>
where
    S: TemperatureSource + ?Sized,
{
    let mut buckets = vec![Vec::new(); DAYS_PER_YEAR as usize];
    for (i, date) in source.dates().iter().enumerate() {
        if Some(date.year()) == excluded_year {
            continue;
        }
        buckets[day_of_year(*date) as usize - 1].push(i);
    }
    buckets
}
