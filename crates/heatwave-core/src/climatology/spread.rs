//! Climatological spread used to normalise heatwave magnitude.
//!
//! For each cell, take the maximum of every calendar year, then the 25th and
//! 75th percentiles of those annual maxima. The interquartile range is the
//! local spread reference of the Heat Wave Magnitude Index.

use std::collections::BTreeMap;

use chrono::Datelike;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::percentile::percentile;
use crate::error::{HeatwaveError, Result};
use crate::grid::{GridPoint, GridShape, TemperatureSource};

/// Which years the spread reference is computed from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SpreadPeriod {
    /// Fixed historical baseline, inclusive.
    Baseline { first_year: i32, last_year: i32 },
    /// Every year in the record.
    Full,
    /// Per target year, every other year in the record.
    LeaveOneOut,
}

/// Per-cell annual maximum for every year in a record. Year-major.
#[derive(Debug, Clone)]
pub struct AnnualMaxima {
    pub years: Vec<i32>,
    pub shape: GridShape,
    data: Vec<f32>,
}

impl AnnualMaxima {
    pub fn from_source<S>(source: &S) -> Self
    where
        S: TemperatureSource + ?Sized,
    {
        let shape = source.shape();
        let n = shape.n_cells();
        let mut years: Vec<i32> = Vec::new();
        let mut data: Vec<f32> = Vec::new();
        for (day, date) in source.dates().iter().enumerate() {
            if years.last() != Some(&date.year()) {
                years.push(date.year());
                data.resize(data.len() + n, f32::NAN);
            }
            let row = &mut data[(years.len() - 1) * n..];
            for (i, slot) in row.iter_mut().enumerate() {
                if let Some(v) = source.value(day, shape.point(i)) {
                    // NaN.max(v) == v, so the first valid value seeds the max.
                    *slot = slot.max(v);
                }
            }
        }
        Self { years, shape, data }
    }

    /// Maximum of `year` at cell `p`; `None` if the cell had no data that year.
    pub fn get(&self, year_idx: usize, p: GridPoint) -> Option<f32> {
        let v = self.data[year_idx * self.shape.n_cells() + self.shape.index(p)];
        (!v.is_nan()).then_some(v)
    }

    /// Quartiles of the annual maxima of the selected years.
    pub fn quartiles(&self, include: impl Fn(i32) -> bool) -> SpreadField {
        let n = self.shape.n_cells();
        let selected: Vec<usize> = (0..self.years.len()).filter(|&i| include(self.years[i])).collect();
        let mut p25 = Vec::with_capacity(n);
        let mut p75 = Vec::with_capacity(n);
        let mut samples = Vec::with_capacity(selected.len());
        for cell in 0..n {
            samples.clear();
            samples.extend(
                selected
                    .iter()
                    .map(|&y| self.data[y * n + cell])
                    .filter(|v| !v.is_nan()),
            );
            p25.push(percentile(&mut samples, 25.0).unwrap_or(f32::NAN));
            p75.push(percentile(&mut samples, 75.0).unwrap_or(f32::NAN));
        }
        SpreadField { shape: self.shape, p25, p75 }
    }
}

/// 25th/75th percentiles of annual maxima per cell.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpreadField {
    pub shape: GridShape,
    pub p25: Vec<f32>,
    pub p75: Vec<f32>,
}

impl SpreadField {
    /// `(p25, p75)` at `p`; `None` where either is missing.
    pub fn get(&self, p: GridPoint) -> Option<(f32, f32)> {
        let i = self.shape.index(p);
        let (lo, hi) = (self.p25[i], self.p75[i]);
        (!lo.is_nan() && !hi.is_nan()).then_some((lo, hi))
    }
}

/// Spread reference for one run: fixed, or one field per target year.
#[derive(Debug, Clone)]
pub enum SpreadReference {
    Fixed(SpreadField),
    PerYear(BTreeMap<i32, SpreadField>),
}

impl SpreadReference {
    pub fn build<S>(source: &S, period: &SpreadPeriod) -> Result<Self>
    where
        S: TemperatureSource + ?Sized,
    {
        let maxima = AnnualMaxima::from_source(source);
        Self::from_maxima(&maxima, period)
    }

    pub fn from_maxima(maxima: &AnnualMaxima, period: &SpreadPeriod) -> Result<Self> {
        let reference = match *period {
            SpreadPeriod::Full => SpreadReference::Fixed(maxima.quartiles(|_| true)),
            SpreadPeriod::Baseline { first_year, last_year } => {
                if first_year > last_year {
                    return Err(HeatwaveError::InvalidConfig(format!(
                        "spread baseline {first_year}..={last_year} is empty"
                    )));
                }
                let range = first_year..=last_year;
                if !maxima.years.iter().any(|y| range.contains(y)) {
                    return Err(HeatwaveError::InvalidConfig(format!(
                        "spread baseline {first_year}..={last_year} has no data in the record"
                    )));
                }
                SpreadReference::Fixed(maxima.quartiles(|y| range.contains(&y)))
            }
            SpreadPeriod::LeaveOneOut => {
                if maxima.years.len() < 2 {
                    warn!("leave-one-out spread with a single year leaves no reference data");
                }
                SpreadReference::PerYear(
                    maxima.years.iter().map(|&y| (y, maxima.quartiles(|o| o != y))).collect(),
                )
            }
        };
        debug!(n_years = maxima.years.len(), ?period, "built spread reference");
        Ok(reference)
    }

    /// `(p25, p75)` for cell `p` as seen from target `year`.
    pub fn quartiles(&self, p: GridPoint, year: i32) -> Option<(f32, f32)> {
        match self {
            SpreadReference::Fixed(f) => f.get(p),
            SpreadReference::PerYear(m) => m.get(&year)?.get(p),
        }
    }
}
