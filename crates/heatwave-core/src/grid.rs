use std::fmt;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::coords::GridAxes;
use crate::error::{HeatwaveError, Result};

/// Dimensions of a lat/lon grid. Cells are stored row-major, one row per
/// latitude index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GridShape {
    pub n_lat: usize,
    pub n_lon: usize,
}

impl GridShape {
    pub fn new(n_lat: usize, n_lon: usize) -> Self {
        Self { n_lat, n_lon }
    }

    #[inline]
    pub fn n_cells(&self) -> usize {
        self.n_lat * self.n_lon
    }

    #[inline]
    pub fn index(&self, p: GridPoint) -> usize {
        p.lat as usize * self.n_lon + p.lon as usize
    }

    #[inline]
    pub fn point(&self, index: usize) -> GridPoint {
        GridPoint::new((index / self.n_lon) as u32, (index % self.n_lon) as u32)
    }

    pub fn contains(&self, p: GridPoint) -> bool {
        (p.lat as usize) < self.n_lat && (p.lon as usize) < self.n_lon
    }
}

impl fmt::Display for GridShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.n_lat, self.n_lon)
    }
}

/// Cell identity: (latitude index, longitude index).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct GridPoint {
    pub lat: u32,
    pub lon: u32,
}

impl GridPoint {
    pub fn new(lat: u32, lon: u32) -> Self {
        Self { lat, lon }
    }
}

/// One day of gridded values, row-major f32. Missing cells are NaN.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailyField {
    #[serde(deserialize_with = "null_as_nan_vec")]
    pub data: Vec<f32>,
    pub shape: GridShape,
}

impl DailyField {
    /// Create a field filled with the given value.
    pub fn new(shape: GridShape, fill: f32) -> Self {
        Self { data: vec![fill; shape.n_cells()], shape }
    }

    pub fn from_vec(shape: GridShape, data: Vec<f32>) -> Result<Self> {
        if data.len() != shape.n_cells() {
            return Err(HeatwaveError::InvalidSeries(format!(
                "field of shape {shape} needs {} values, got {}",
                shape.n_cells(),
                data.len()
            )));
        }
        Ok(Self { data, shape })
    }

    /// `None` for a missing (NaN) cell.
    #[inline]
    pub fn get(&self, p: GridPoint) -> Option<f32> {
        let v = self.data[self.shape.index(p)];
        (!v.is_nan()).then_some(v)
    }

    #[inline]
    pub fn set(&mut self, p: GridPoint, val: f32) {
        let i = self.shape.index(p);
        self.data[i] = val;
    }
}

/// Read access to a gridded daily-maximum temperature record.
///
/// Days are addressed by index into `dates()`, which must be strictly
/// increasing. `value` returns `None` for missing data; callers must never
/// treat a missing cell as a number.
pub trait TemperatureSource: Sync {
    fn shape(&self) -> GridShape;
    fn axes(&self) -> &GridAxes;
    fn dates(&self) -> &[NaiveDate];
    fn value(&self, day: usize, p: GridPoint) -> Option<f32>;

    fn n_days(&self) -> usize {
        self.dates().len()
    }

    /// Materialise one day as a field (missing → NaN).
    fn day_field(&self, day: usize) -> DailyField {
        let shape = self.shape();
        let data = (0..shape.n_cells())
            .map(|i| self.value(day, shape.point(i)).unwrap_or(f32::NAN))
            .collect();
        DailyField { data, shape }
    }
}

/// In-memory temperature record: `dates.len()` days of row-major fields.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TemperatureCube {
    pub dates: Vec<NaiveDate>,
    pub axes: GridAxes,
    /// Day-major, then row-major: index = day × n_cells + cell.
    /// JSON `null` entries load as NaN (missing).
    #[serde(deserialize_with = "null_as_nan_vec")]
    pub data: Vec<f32>,
    /// Sentinel marking missing values in `data` (NaN is always missing).
    #[serde(default)]
    pub missing_value: Option<f32>,
}

impl TemperatureCube {
    pub fn new(
        dates: Vec<NaiveDate>,
        axes: GridAxes,
        data: Vec<f32>,
        missing_value: Option<f32>,
    ) -> Result<Self> {
        let cube = Self { dates, axes, data, missing_value };
        cube.validate()?;
        Ok(cube)
    }

    /// Parse and validate a JSON-serialised cube.
    pub fn from_json(json: &str) -> Result<Self> {
        let cube: Self = serde_json::from_str(json)?;
        cube.validate()?;
        Ok(cube)
    }

    /// Checks data length and strictly increasing dates.
    pub fn validate(&self) -> Result<()> {
        let n_cells = self.axes.shape().n_cells();
        if self.data.len() != self.dates.len() * n_cells {
            return Err(HeatwaveError::InvalidSeries(format!(
                "{} days of {} cells need {} values, got {}",
                self.dates.len(),
                n_cells,
                self.dates.len() * n_cells,
                self.data.len()
            )));
        }
        check_dates(&self.dates)
    }
}

pub(crate) fn null_as_nan_vec<'de, D: serde::Deserializer<'de>>(
    d: D,
) -> std::result::Result<Vec<f32>, D::Error> {
    let v: Vec<Option<f32>> = Vec::deserialize(d)?;
    Ok(v.into_iter().map(|x| x.unwrap_or(f32::NAN)).collect())
}

/// Dates must be strictly increasing (no duplicates, no reordering).
pub fn check_dates(dates: &[NaiveDate]) -> Result<()> {
    if let Some(w) = dates.windows(2).find(|w| w[1] <= w[0]) {
        return Err(HeatwaveError::InvalidSeries(format!(
            "dates must be strictly increasing: {} followed by {}",
            w[0], w[1]
        )));
    }
    Ok(())
}

impl TemperatureSource for TemperatureCube {
    fn shape(&self) -> GridShape {
        self.axes.shape()
    }

    fn axes(&self) -> &GridAxes {
        &self.axes
    }

    fn dates(&self) -> &[NaiveDate] {
        &self.dates
    }

    #[inline]
    fn value(&self, day: usize, p: GridPoint) -> Option<f32> {
        let shape = self.shape();
        let v = self.data[day * shape.n_cells() + shape.index(p)];
        if v.is_nan() || self.missing_value == Some(v) {
            None
        } else {
            Some(v)
        }
    }
}
