//! Per-event feature vectors for family clustering.

use serde::{Deserialize, Serialize};

use crate::calendar::doy_encoding;
use crate::magnitude::EventSummary;

/// Feature groups fed to K-Means. The seasonal pair (sin, cos of the circular
/// mean day of year) is always present.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FeatureSelection {
    /// Centroid latitude and longitude.
    pub spatial: bool,
    /// Event severity.
    pub intensity: bool,
}

impl Default for FeatureSelection {
    fn default() -> Self {
        Self { spatial: true, intensity: true }
    }
}

impl FeatureSelection {
    /// Seasonal timing only.
    pub fn seasonal() -> Self {
        Self { spatial: false, intensity: false }
    }

    pub fn names(&self) -> Vec<&'static str> {
        let mut names = vec!["doy_sin", "doy_cos"];
        if self.spatial {
            names.extend(["centroid_lat", "centroid_lon"]);
        }
        if self.intensity {
            names.push("severity");
        }
        names
    }
}

/// Row-major `n_rows × n_cols` matrix of f64 features.
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureMatrix {
    pub n_rows: usize,
    pub n_cols: usize,
    pub data: Vec<f64>,
}

impl FeatureMatrix {
    pub fn from_rows(rows: &[Vec<f64>]) -> Self {
        let n_cols = rows.first().map_or(0, Vec::len);
        let data: Vec<f64> = rows.iter().flat_map(|r| r.iter().copied()).collect();
        debug_assert_eq!(data.len(), rows.len() * n_cols);
        Self { n_rows: rows.len(), n_cols, data }
    }

    pub fn from_events(events: &[EventSummary], selection: FeatureSelection) -> Self {
        let rows: Vec<Vec<f64>> = events
            .iter()
            .map(|e| {
                let (s, c) = doy_encoding(e.mean_doy);
                let mut row = vec![s, c];
                if selection.spatial {
                    row.extend([e.centroid.lat, e.centroid.lon]);
                }
                if selection.intensity {
                    row.push(e.severity);
                }
                row
            })
            .collect();
        let mut m = Self::from_rows(&rows);
        if rows.is_empty() {
            m.n_cols = selection.names().len();
        }
        m
    }

    #[inline]
    pub fn row(&self, i: usize) -> &[f64] {
        &self.data[i * self.n_cols..(i + 1) * self.n_cols]
    }

    /// Copy of the selected rows, in the given order.
    pub fn select_rows(&self, rows: &[usize]) -> Self {
        let data = rows.iter().flat_map(|&i| self.row(i).iter().copied()).collect();
        Self { n_rows: rows.len(), n_cols: self.n_cols, data }
    }

    /// Z-score every column in place. Zero-variance columns are only centred.
    pub fn standardize(&mut self) {
        if self.n_rows == 0 {
            return;
        }
        let n = self.n_rows as f64;
        for c in 0..self.n_cols {
            let mean = (0..self.n_rows).map(|r| self.data[r * self.n_cols + c]).sum::<f64>() / n;
            let var = (0..self.n_rows)
                .map(|r| (self.data[r * self.n_cols + c] - mean).powi(2))
                .sum::<f64>()
                / n;
            let sd = var.sqrt();
            for r in 0..self.n_rows {
                let v = &mut self.data[r * self.n_cols + c];
                *v -= mean;
                if sd > 1e-12 {
                    *v /= sd;
                }
            }
        }
    }
}

#[inline]
pub fn squared_distance(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b).map(|(x, y)| (x - y) * (x - y)).sum()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn standardized_columns_have_unit_variance() {
        let mut m = FeatureMatrix::from_rows(&[vec![1.0, 5.0], vec![2.0, 5.0], vec![3.0, 5.0], vec![6.0, 5.0]]);
        m.standardize();
        let col = |c: usize| -> Vec<f64> { (0..m.n_rows).map(|r| m.row(r)[c]).collect() };
        let x = col(0);
        let mean: f64 = x.iter().sum::<f64>() / 4.0;
        let var: f64 = x.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / 4.0;
        assert_abs_diff_eq!(mean, 0.0, epsilon = 1e-12);
        assert_abs_diff_eq!(var, 1.0, epsilon = 1e-12);
        assert!(col(1).iter().all(|&v| v == 0.0), "constant column must be centred, not scaled");
    }

    #[test]
    fn selection_controls_columns() {
        assert_eq!(FeatureSelection::default().names().len(), 5);
        assert_eq!(FeatureSelection::seasonal().names(), vec!["doy_sin", "doy_cos"]);
        let m = FeatureMatrix::from_events(&[], FeatureSelection::seasonal());
        assert_eq!((m.n_rows, m.n_cols), (0, 2));
    }

    #[test]
    fn select_rows_copies_in_order() {
        let m = FeatureMatrix::from_rows(&[vec![0.0], vec![1.0], vec![2.0]]);
        let s = m.select_rows(&[2, 0]);
        assert_eq!(s.data, vec![2.0, 0.0]);
        assert_abs_diff_eq!(squared_distance(&[0.0, 0.0], &[3.0, 4.0]), 25.0);
    }
}
