//! Pipeline configuration. Every section has working defaults, so an empty
//! config file runs the full pipeline.

use serde::{Deserialize, Serialize};

use crate::climatology::{SpreadPeriod, ThresholdConfig, ThresholdEstimator};
use crate::cluster::{FamilyConfig, KMeans, SubfamilyConfig, SubfamilyCut};
use crate::error::{HeatwaveError, Result};
use crate::graph::{EventFilter, GraphConfig};
use crate::magnitude::MagnitudeConfig;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub threshold: ThresholdConfig,
    pub graph: GraphConfig,
    pub filter: EventFilter,
    pub magnitude: MagnitudeConfig,
    pub family: FamilyConfig,
    /// `None` stops after families.
    pub subfamily: Option<SubfamilyConfig>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            threshold: ThresholdConfig::default(),
            graph: GraphConfig::default(),
            filter: EventFilter::default(),
            magnitude: MagnitudeConfig::default(),
            family: FamilyConfig::default(),
            subfamily: Some(SubfamilyConfig::default()),
        }
    }
}

impl PipelineConfig {
    /// Reject out-of-range values before any work starts.
    pub fn validate(&self) -> Result<()> {
        ThresholdEstimator::from_config(&self.threshold)?;
        if self.graph.tiles == 0 {
            return Err(HeatwaveError::InvalidConfig("graph.tiles must be at least 1".into()));
        }
        if let SpreadPeriod::Baseline { first_year, last_year } = self.magnitude.spread_period {
            if first_year > last_year {
                return Err(HeatwaveError::InvalidConfig(format!(
                    "spread baseline {first_year}..={last_year} is empty"
                )));
            }
        }
        KMeans::from_config(&self.family)?;
        if let Some(sub) = &self.subfamily {
            match sub.cut {
                SubfamilyCut::Count(0) => {
                    return Err(HeatwaveError::InvalidConfig("subfamily count must be at least 1".into()));
                }
                SubfamilyCut::Height(h) if h.is_nan() || h < 0.0 => {
                    return Err(HeatwaveError::InvalidConfig(format!(
                        "subfamily cut height must be non-negative, got {h}"
                    )));
                }
                _ => {}
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::climatology::ThresholdMode;

    #[test]
    fn defaults_are_valid() {
        assert!(PipelineConfig::default().validate().is_ok());
    }

    #[test]
    fn partial_json_fills_defaults() {
        let json = r#"{
            "threshold": { "percentile": 95.0, "mode": "leave_one_out" },
            "family": { "k": 6 },
            "subfamily": { "cut": { "count": 2 }, "metric": "features" }
        }"#;
        let config: PipelineConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.threshold.percentile, 95.0);
        assert_eq!(config.threshold.window_days, 31);
        assert_eq!(config.threshold.mode, ThresholdMode::LeaveOneOut);
        assert_eq!(config.family.k, 6);
        assert_eq!(config.family.seed, 100);
        assert_eq!(config.subfamily.as_ref().map(|s| s.cut), Some(SubfamilyCut::Count(2)));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn rejects_out_of_range_values() {
        let mut c = PipelineConfig::default();
        c.threshold.window_days = 30;
        assert!(matches!(c.validate(), Err(HeatwaveError::InvalidConfig(_))));

        let mut c = PipelineConfig::default();
        c.family.k = 0;
        assert!(c.validate().is_err());

        let mut c = PipelineConfig::default();
        c.magnitude.spread_period = SpreadPeriod::Baseline { first_year: 2000, last_year: 1990 };
        assert!(c.validate().is_err());

        let mut c = PipelineConfig::default();
        c.subfamily = Some(SubfamilyConfig { cut: SubfamilyCut::Height(-1.0), ..SubfamilyConfig::default() });
        assert!(c.validate().is_err());

        let mut c = PipelineConfig::default();
        c.graph.tiles = 0;
        assert!(c.validate().is_err());
    }
}
