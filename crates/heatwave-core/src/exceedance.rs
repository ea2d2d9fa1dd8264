//! Daily exceedance: which cells are above their threshold, and by how much.

use crate::error::{HeatwaveError, Result};
use crate::grid::{DailyField, GridPoint, GridShape};

/// Boolean exceedance mask plus `max(0, value − threshold)` per cell.
#[derive(Debug, Clone, PartialEq)]
pub struct ExceedanceField {
    pub shape: GridShape,
    pub exceeds: Vec<bool>,
    pub magnitude: Vec<f32>,
}

impl ExceedanceField {
    /// Compare one day against its thresholds. A cell exceeds only when both
    /// values are present and `value > threshold`.
    pub fn compute(values: &DailyField, thresholds: &DailyField) -> Result<Self> {
        if values.shape != thresholds.shape {
            return Err(HeatwaveError::ShapeMismatch {
                expected: thresholds.shape,
                found: values.shape,
            });
        }
        let n = values.shape.n_cells();
        let mut exceeds = vec![false; n];
        let mut magnitude = vec![0.0f32; n];
        for i in 0..n {
            let (v, t) = (values.data[i], thresholds.data[i]);
            // NaN compares false, so missing data never exceeds.
            if v > t {
                exceeds[i] = true;
                magnitude[i] = v - t;
            }
        }
        Ok(Self { shape: values.shape, exceeds, magnitude })
    }

    #[inline]
    pub fn exceeds(&self, p: GridPoint) -> bool {
        self.exceeds[self.shape.index(p)]
    }

    #[inline]
    pub fn magnitude(&self, p: GridPoint) -> f32 {
        self.magnitude[self.shape.index(p)]
    }

    pub fn count(&self) -> usize {
        self.exceeds.iter().filter(|&&e| e).count()
    }

    /// Exceeding cells in row-major order.
    pub fn exceeding_cells(&self) -> impl Iterator<Item = GridPoint> + '_ {
        self.exceeds
            .iter()
            .enumerate()
            .filter(|(_, &e)| e)
            .map(|(i, _)| self.shape.point(i))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn strict_exceedance_with_magnitude() {
        let shape = GridShape::new(1, 4);
        let values = DailyField::from_vec(shape, vec![30.0, 25.0, 24.0, f32::NAN]).unwrap();
        let thresh = DailyField::new(shape, 25.0);
        let f = ExceedanceField::compute(&values, &thresh).unwrap();
        assert_eq!(f.exceeds, vec![true, false, false, false], "equal to threshold is not an exceedance");
        assert_abs_diff_eq!(f.magnitude(GridPoint::new(0, 0)), 5.0);
        assert_abs_diff_eq!(f.magnitude(GridPoint::new(0, 2)), 0.0);
        assert_eq!(f.count(), 1);
        assert_eq!(f.exceeding_cells().collect::<Vec<_>>(), vec![GridPoint::new(0, 0)]);
    }

    #[test]
    fn missing_threshold_never_exceeds() {
        let shape = GridShape::new(1, 2);
        let values = DailyField::new(shape, 50.0);
        let thresh = DailyField::from_vec(shape, vec![f32::NAN, 10.0]).unwrap();
        let f = ExceedanceField::compute(&values, &thresh).unwrap();
        assert!(!f.exceeds(GridPoint::new(0, 0)));
        assert!(f.exceeds(GridPoint::new(0, 1)));
        assert_eq!(f.magnitude(GridPoint::new(0, 0)), 0.0);
    }

    #[test]
    fn shape_mismatch_is_reported() {
        let values = DailyField::new(GridShape::new(2, 3), 1.0);
        let thresh = DailyField::new(GridShape::new(3, 2), 0.0);
        match ExceedanceField::compute(&values, &thresh) {
            Err(HeatwaveError::ShapeMismatch { expected, found }) => {
                assert_eq!(expected, GridShape::new(3, 2));
                assert_eq!(found, GridShape::new(2, 3));
            }
            other => panic!("expected ShapeMismatch, got {other:?}"),
        }
    }
}
