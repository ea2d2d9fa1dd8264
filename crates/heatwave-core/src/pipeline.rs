//! Pipeline orchestrator: runs detection and classification stages in order.

use std::time::Instant;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::calendar::Season;
use crate::climatology::{SpreadReference, ThresholdEstimator, ThresholdLookup};
use crate::cluster::{cell_activity, classify, CellActivity, ClusterAssignment, Taxonomy};
use crate::config::PipelineConfig;
use crate::error::Result;
use crate::graph::{extract_components, extract_components_tiled, SpatioTemporalGraph};
use crate::grid::TemperatureSource;
use crate::magnitude::{EventSummary, MagnitudeAggregator};

// ── Output records ────────────────────────────────────────────────────────────

/// One row of the event table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventRecord {
    pub event_id: u32,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub duration_days: u32,
    pub node_count: usize,
    pub cell_count: usize,
    pub centroid_lat: f64,
    pub centroid_lon: f64,
    pub magnitude_sum: f64,
    pub magnitude_max: f64,
    pub magnitude_mean: f64,
    pub severity: f64,
    pub mean_doy: f64,
    pub season: Season,
    pub family: Option<usize>,
    pub subfamily: Option<usize>,
}

impl EventRecord {
    pub fn new(summary: &EventSummary, assignment: Option<&ClusterAssignment>) -> Self {
        Self {
            event_id: summary.id.0,
            start_date: summary.start,
            end_date: summary.end,
            duration_days: summary.duration_days,
            node_count: summary.node_count,
            cell_count: summary.cell_count,
            centroid_lat: summary.centroid.lat,
            centroid_lon: summary.centroid.lon,
            magnitude_sum: summary.magnitude.sum,
            magnitude_max: summary.magnitude.max,
            magnitude_mean: summary.magnitude.mean,
            severity: summary.severity,
            mean_doy: summary.mean_doy,
            season: summary.season(),
            family: assignment.map(|a| a.family),
            subfamily: assignment.and_then(|a| a.subfamily),
        }
    }
}

/// Result of the detection stages: event summaries ordered by id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    pub summaries: Vec<EventSummary>,
    /// Exceeding (cell, day) records before filtering.
    pub n_nodes: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineOutput {
    pub events: Vec<EventRecord>,
    pub summaries: Vec<EventSummary>,
    pub taxonomy: Taxonomy,
    /// Heatwave days, heatwaves and magnitude per cell over all events.
    pub cell_activity: Vec<CellActivity>,
}

// ── Orchestrator ──────────────────────────────────────────────────────────────

pub struct HeatwavePipeline {
    config: PipelineConfig,
}

impl HeatwavePipeline {
    /// Fails with `InvalidConfig` before any work if `config` is out of range.
    pub fn new(config: PipelineConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Detection followed by classification.
    pub fn run<S>(&self, source: &S) -> Result<PipelineOutput>
    where
        S: TemperatureSource + ?Sized,
    {
        let detection = self.detect(source)?;
        self.classify(detection.summaries)
    }

    /// Detection with thresholds estimated from `source` itself.
    ///
    /// Stage order:
    ///   1. Spread reference
    ///   2. Thresholds
    ///   3. Graph build
    ///   4. Component extraction
    ///   5. Event summaries
    pub fn detect<S>(&self, source: &S) -> Result<Detection>
    where
        S: TemperatureSource + ?Sized,
    {
        let started = Instant::now();
        let spread = SpreadReference::build(source, &self.config.magnitude.spread_period)?;

        // ── Thresholds ──────────────────────────────────────────────────────
        let estimator = ThresholdEstimator::from_config(&self.config.threshold)?;
        let thresholds = estimator.estimate_with(source, &self.config.threshold);
        info!(
            mode = ?self.config.threshold.mode,
            percentile = self.config.threshold.percentile,
            window_days = estimator.window_days(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "prepared thresholds"
        );
        self.detect_events(source, &thresholds, &spread)
    }

    /// Detection against precomputed thresholds.
    pub fn detect_with<S, T>(&self, source: &S, thresholds: &T) -> Result<Detection>
    where
        S: TemperatureSource + ?Sized,
        T: ThresholdLookup + ?Sized,
    {
        let spread = SpreadReference::build(source, &self.config.magnitude.spread_period)?;
        self.detect_events(source, thresholds, &spread)
    }

    fn detect_events<S, T>(&self, source: &S, thresholds: &T, spread: &SpreadReference) -> Result<Detection>
    where
        S: TemperatureSource + ?Sized,
        T: ThresholdLookup + ?Sized,
    {
        let started = Instant::now();

        // ── Graph build ─────────────────────────────────────────────────────
        let mut graph = SpatioTemporalGraph::build(source, thresholds, &self.config.graph)?;
        let n_nodes = graph.len();
        info!(n_nodes, n_days = graph.n_days(), "built exceedance graph");

        // ── Component extraction ────────────────────────────────────────────
        let events = match self.config.graph.tiles {
            0 | 1 => extract_components(&mut graph, &self.config.filter),
            tiles => extract_components_tiled(&mut graph, &self.config.filter, tiles),
        };
        info!(n_events = events.len(), tiles = self.config.graph.tiles, "extracted events");

        // ── Event summaries ─────────────────────────────────────────────────
        let aggregator = MagnitudeAggregator::new(spread, source.axes(), &self.config.magnitude);
        let summaries = aggregator.summarize_all(&graph, &events)?;
        info!(
            n_events = summaries.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "summarised events"
        );
        Ok(Detection { summaries, n_nodes })
    }

    /// Families and subfamilies for precomputed summaries.
    pub fn classify(&self, summaries: Vec<EventSummary>) -> Result<PipelineOutput> {
        let taxonomy = classify(&summaries, &self.config.family, self.config.subfamily.as_ref())?;
        let events = summaries
            .iter()
            .enumerate()
            .map(|(i, s)| EventRecord::new(s, taxonomy.assignments.get(i)))
            .collect();
        let cell_activity = cell_activity(&summaries);
        Ok(PipelineOutput { events, summaries, taxonomy, cell_activity })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::climatology::{SpreadPeriod, ThresholdConfig, ThresholdField, ThresholdMode};
    use crate::cluster::{ConvergenceStatus, FamilyConfig, SubfamilyConfig, SubfamilyCut};
    use crate::coords::GridAxes;
    use crate::error::HeatwaveError;
    use crate::grid::{DailyField, GridPoint, GridShape, TemperatureCube};
    use approx::assert_relative_eq;

    /// Four years of July 1–5 on a 10×10 grid. Background is 20 + year index;
    /// in the last year a 3×3 block reaches 35 on July 2–4.
    fn synthetic_cube() -> TemperatureCube {
        let shape = GridShape::new(10, 10);
        let mut dates = Vec::new();
        let mut data = Vec::new();
        for y in 0..4 {
            for d in 1..=5 {
                dates.push(NaiveDate::from_ymd_opt(2000 + y, 7, d).unwrap());
                for i in 0..shape.n_cells() {
                    let p = shape.point(i);
                    let in_block = (4..7).contains(&p.lat) && (4..7).contains(&p.lon);
                    let hot = y == 3 && (2..=4).contains(&d) && in_block;
                    data.push(if hot { 35.0 } else { 20.0 + y as f32 });
                }
            }
        }
        let axes = GridAxes::regular(shape, 40.0, 50.0, 0.0, 10.0);
        TemperatureCube::new(dates, axes, data, None).unwrap()
    }

    fn config() -> PipelineConfig {
        PipelineConfig {
            threshold: ThresholdConfig { percentile: 80.0, ..ThresholdConfig::default() },
            family: FamilyConfig { k: 1, ..FamilyConfig::default() },
            subfamily: Some(SubfamilyConfig { cut: SubfamilyCut::Count(1), ..SubfamilyConfig::default() }),
            ..PipelineConfig::default()
        }
    }

    #[test]
    fn end_to_end_single_block() {
        let cube = synthetic_cube();
        let out = HeatwavePipeline::new(config()).unwrap().run(&cube).unwrap();
        assert_eq!(out.events.len(), 1, "exactly one heatwave expected");
        let e = &out.events[0];
        assert_eq!(e.start_date, NaiveDate::from_ymd_opt(2003, 7, 2).unwrap());
        assert_eq!(e.end_date, NaiveDate::from_ymd_opt(2003, 7, 4).unwrap());
        assert_eq!(e.duration_days, 3);
        assert_eq!(e.cell_count, 9);
        assert_eq!(e.node_count, 27);
        assert!(e.severity > 0.0, "severity {} should be positive", e.severity);
        assert_eq!(e.season, Season::Summer);
        assert_eq!((e.family, e.subfamily), (Some(0), Some(0)));
        assert_eq!(
            out.taxonomy.families.first().map(|f| f.clustering.status),
            Some(ConvergenceStatus::Converged)
        );
        assert_eq!(out.cell_activity.len(), 9);
        assert!(out.cell_activity.iter().all(|c| c.heatwave_days == 3 && c.heatwaves == 1));
        assert!((e.centroid_lat - 45.5).abs() < 1e-9, "centroid lat {}", e.centroid_lat);
    }

    #[test]
    fn tiled_detection_matches_sequential() {
        let cube = synthetic_cube();
        let seq = HeatwavePipeline::new(config()).unwrap().detect(&cube).unwrap();
        let mut tiled_config = config();
        tiled_config.graph.tiles = 4;
        let tiled = HeatwavePipeline::new(tiled_config).unwrap().detect(&cube).unwrap();
        assert_eq!(seq, tiled);
    }

    #[test]
    fn quiet_record_has_no_events() {
        let shape = GridShape::new(3, 3);
        let dates: Vec<NaiveDate> = (1..=5).map(|d| NaiveDate::from_ymd_opt(2001, 7, d).unwrap()).collect();
        let data = vec![25.0; 5 * shape.n_cells()];
        let cube =
            TemperatureCube::new(dates, GridAxes::regular(shape, 0.0, 3.0, 0.0, 3.0), data, None).unwrap();
        let out = HeatwavePipeline::new(PipelineConfig::default()).unwrap().run(&cube).unwrap();
        assert!(out.events.is_empty());
        assert!(out.taxonomy.families.is_empty());
        assert!(out.cell_activity.is_empty());
    }

    #[test]
    fn precomputed_thresholds_of_wrong_shape_abort() {
        let cube = synthetic_cube();
        let field = ThresholdField {
            days: vec![DailyField::new(GridShape::new(5, 5), 30.0); 365],
            percentile: 90.0,
            window_days: 31,
            excluded_year: None,
        };
        let err = HeatwavePipeline::new(config()).unwrap().detect_with(&cube, &field).unwrap_err();
        assert!(matches!(err, HeatwaveError::ShapeMismatch { .. }), "got {err}");
    }

    #[test]
    fn precomputed_thresholds_are_used() {
        let cube = synthetic_cube();
        let field = ThresholdField {
            days: vec![DailyField::new(GridShape::new(10, 10), 30.0); 365],
            percentile: 90.0,
            window_days: 31,
            excluded_year: None,
        };
        let det = HeatwavePipeline::new(config()).unwrap().detect_with(&cube, &field).unwrap();
        assert_eq!(det.n_nodes, 27);
        assert!(det.summaries[0].cells.contains(&GridPoint::new(5, 5)));
    }

    /// Four years of July 1–5 on a 3×3 grid at 20°, except cell (1,1): 30 on
    /// July 1 of 2000 and 2001, and 35 on every day of 2003.
    fn persistent_heat_cube() -> TemperatureCube {
        let shape = GridShape::new(3, 3);
        let centre = shape.index(GridPoint::new(1, 1));
        let mut dates = Vec::new();
        let mut data = Vec::new();
        for y in 2000..2004 {
            for d in 1..=5 {
                dates.push(NaiveDate::from_ymd_opt(y, 7, d).unwrap());
                for i in 0..shape.n_cells() {
                    let v = match (i == centre, y, d) {
                        (true, 2003, _) => 35.0,
                        (true, 2000 | 2001, 1) => 30.0,
                        _ => 20.0,
                    };
                    data.push(v);
                }
            }
        }
        TemperatureCube::new(dates, GridAxes::regular(shape, 0.0, 3.0, 0.0, 3.0), data, None).unwrap()
    }

    #[test]
    fn leave_one_out_thresholds_exclude_the_target_year() {
        let cube = persistent_heat_cube();
        let pooled = HeatwavePipeline::new(PipelineConfig::default()).unwrap().detect(&cube).unwrap();
        assert!(pooled.summaries.is_empty(), "pooled 90th percentile is lifted to 35 by 2003 itself");

        let mut config = PipelineConfig::default();
        config.threshold.mode = ThresholdMode::LeaveOneOut;
        let det = HeatwavePipeline::new(config.clone()).unwrap().detect(&cube).unwrap();
        assert_eq!(det.summaries.len(), 1, "2003 measured against 2000–2002 only");
        let s = &det.summaries[0];
        assert_eq!((s.node_count, s.cell_count, s.duration_days), (5, 1, 5));
        assert_eq!(s.start, NaiveDate::from_ymd_opt(2003, 7, 1).unwrap());
        assert_eq!(s.cells, vec![GridPoint::new(1, 1)]);
        // Threshold 26 from the other years; annual maxima 30, 30, 20, 35 give
        // a spread of 31.25 − 27.5.
        assert_relative_eq!(s.magnitude.sum, 5.0 * 9.0 / 3.75, epsilon = 1e-4);

        config.magnitude.spread_period = SpreadPeriod::LeaveOneOut;
        let det = HeatwavePipeline::new(config).unwrap().detect(&cube).unwrap();
        // Maxima of 2000–2002 alone: 30, 30, 20, spread 30 − 25.
        assert_relative_eq!(det.summaries[0].magnitude.sum, 9.0, epsilon = 1e-4);
    }

    #[test]
    fn truncated_threshold_field_is_an_error() {
        let cube = synthetic_cube();
        for n_days in [0, 10] {
            let field = ThresholdField {
                days: vec![DailyField::new(GridShape::new(10, 10), 30.0); n_days],
                percentile: 90.0,
                window_days: 31,
                excluded_year: None,
            };
            let err = HeatwavePipeline::new(config()).unwrap().detect_with(&cube, &field).unwrap_err();
            assert!(matches!(err, HeatwaveError::InvalidSeries(_)), "{n_days} days gave {err}");
        }
    }

    #[test]
    fn spread_baseline_is_checked_before_the_graph() {
        let cube = synthetic_cube();
        let mut c = config();
        c.magnitude.spread_period = SpreadPeriod::Baseline { first_year: 1961, last_year: 1990 };
        let pipeline = HeatwavePipeline::new(c).unwrap();
        assert!(matches!(pipeline.detect(&cube), Err(HeatwaveError::InvalidConfig(_))));

        // A wrong-shape field would fail at graph build; the baseline fails first.
        let field = ThresholdField {
            days: vec![DailyField::new(GridShape::new(5, 5), 30.0); 365],
            percentile: 90.0,
            window_days: 31,
            excluded_year: None,
        };
        let err = pipeline.detect_with(&cube, &field).unwrap_err();
        assert!(matches!(err, HeatwaveError::InvalidConfig(_)), "got {err}");
    }

    #[test]
    fn invalid_config_is_rejected_up_front() {
        let mut c = config();
        c.threshold.window_days = 4;
        assert!(matches!(HeatwavePipeline::new(c), Err(HeatwaveError::InvalidConfig(_))));
    }
}
