//! Geographic coordinates of grid rows and columns, and event centroids
//! weighted over cell-days.

use serde::{Deserialize, Serialize};

use crate::error::{HeatwaveError, Result};
use crate::grid::{GridPoint, GridShape};

/// A point on the sphere in geographic coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LatLon {
    /// Latitude in degrees, -90 to +90.
    pub lat: f64,
    /// Longitude in degrees, -180 to +180.
    pub lon: f64,
}

impl LatLon {
    pub fn new(lat: f64, lon: f64) -> Self {
        Self { lat, lon }
    }
}

/// Wrap a longitude into [-180, 180).
pub fn normalize_lon(lon: f64) -> f64 {
    (lon + 180.0).rem_euclid(360.0) - 180.0
}

/// Coordinate vectors of a regular or irregular lat/lon grid.
/// `latitudes[i]` is the centre of row `i`, `longitudes[j]` of column `j`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GridAxes {
    pub latitudes: Vec<f64>,
    pub longitudes: Vec<f64>,
}

impl GridAxes {
    pub fn new(latitudes: Vec<f64>, longitudes: Vec<f64>) -> Self {
        Self { latitudes, longitudes }
    }

    /// Evenly spaced cell centres covering the given bounds.
    pub fn regular(shape: GridShape, min_lat: f64, max_lat: f64, min_lon: f64, max_lon: f64) -> Self {
        let centres = |n: usize, lo: f64, hi: f64| -> Vec<f64> {
            let step = (hi - lo) / n.max(1) as f64;
            (0..n).map(|i| lo + (i as f64 + 0.5) * step).collect()
        };
        Self {
            latitudes: centres(shape.n_lat, min_lat, max_lat),
            longitudes: centres(shape.n_lon, min_lon, max_lon),
        }
    }

    pub fn shape(&self) -> GridShape {
        GridShape::new(self.latitudes.len(), self.longitudes.len())
    }

    /// Fails with `ShapeMismatch` if the axes do not describe `shape`.
    pub fn check_shape(&self, shape: GridShape) -> Result<()> {
        if self.shape() != shape {
            return Err(HeatwaveError::ShapeMismatch { expected: shape, found: self.shape() });
        }
        Ok(())
    }

    #[inline]
    pub fn latlon(&self, p: GridPoint) -> LatLon {
        LatLon::new(self.latitudes[p.lat as usize], self.longitudes[p.lon as usize])
    }
}

/// Running centroid: arithmetic mean latitude, circular mean longitude.
///
/// The circular mean keeps events that straddle the antimeridian centred on
/// it instead of on the opposite side of the globe.
#[derive(Debug, Clone, Copy, Default)]
pub struct CentroidAccumulator {
    lat_sum: f64,
    lon_sin: f64,
    lon_cos: f64,
    n: usize,
}

impl CentroidAccumulator {
    pub fn add(&mut self, ll: LatLon) {
        let lon = ll.lon.to_radians();
        self.lat_sum += ll.lat;
        self.lon_sin += lon.sin();
        self.lon_cos += lon.cos();
        self.n += 1;
    }

    /// `None` when nothing was added. A vanishing longitude resultant falls
    /// back to 0°.
    pub fn finish(&self) -> Option<LatLon> {
        if self.n == 0 {
            return None;
        }
        let lat = self.lat_sum / self.n as f64;
        let lon = if self.lon_sin.hypot(self.lon_cos) < 1e-12 {
            0.0
        } else {
            normalize_lon(self.lon_sin.atan2(self.lon_cos).to_degrees())
        };
        Some(LatLon::new(lat, lon))
    }
}
