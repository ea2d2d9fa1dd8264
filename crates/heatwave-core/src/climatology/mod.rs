//! Climatological reference fields: exceedance thresholds and the
//! annual-maxima spread used to normalise magnitudes.

pub mod percentile;
pub mod spread;
pub mod threshold;

pub use spread::{AnnualMaxima, SpreadField, SpreadPeriod, SpreadReference};
pub use threshold::{
    LeaveOneOutThresholds, ThresholdConfig, ThresholdEstimator, ThresholdField, ThresholdLookup, ThresholdMode,
    Thresholds, YearlyThresholds,
};
