//! Event summaries and the HWMId-style magnitude index.
//!
//! Each node's excess is normalised by the local climatological spread (the
//! interquartile range of annual maxima at that cell) and reduced over the
//! event. With `NormalizationBase::AnnualMaxP25` and `Aggregation::Sum` this
//! is the Heat Wave Magnitude Index daily (HWMId) summed over space and time.

use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::calendar::{circular_mean_day, day_of_year, CircularInterval, Season, DAYS_PER_YEAR};
use crate::climatology::{SpreadPeriod, SpreadReference};
use crate::coords::{CentroidAccumulator, GridAxes, LatLon};
use crate::error::{HeatwaveError, Result};
use crate::graph::{DayRecord, Event, EventId, SpatioTemporalGraph};
use crate::grid::GridPoint;

/// Value subtracted from the observed temperature before normalising.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NormalizationBase {
    /// The node's exceedance threshold.
    Threshold,
    /// The cell's 25th percentile of annual maxima.
    AnnualMaxP25,
}

/// How per-node magnitudes reduce to an event severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Aggregation {
    Sum,
    Mean,
    Max,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MagnitudeConfig {
    pub base: NormalizationBase,
    pub aggregation: Aggregation,
    pub spread_period: SpreadPeriod,
}

impl Default for MagnitudeConfig {
    fn default() -> Self {
        Self {
            base: NormalizationBase::Threshold,
            aggregation: Aggregation::Sum,
            spread_period: SpreadPeriod::Full,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct MagnitudeStats {
    pub sum: f64,
    pub max: f64,
    pub mean: f64,
}

impl MagnitudeStats {
    pub fn aggregate(&self, aggregation: Aggregation) -> f64 {
        match aggregation {
            Aggregation::Sum => self.sum,
            Aggregation::Mean => self.mean,
            Aggregation::Max => self.max,
        }
    }
}

/// Activity of one cell within an event.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct CellHits {
    /// Exceeding days at the cell.
    pub days: u32,
    /// Summed normalised magnitude at the cell.
    pub magnitude: f64,
}

/// Everything downstream stages need to know about one event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventSummary {
    pub id: EventId,
    pub start: NaiveDate,
    pub end: NaiveDate,
    /// `end − start + 1`.
    pub duration_days: u32,
    pub node_count: usize,
    pub cell_count: usize,
    pub magnitude: MagnitudeStats,
    /// `magnitude` reduced by the configured aggregation.
    pub severity: f64,
    pub centroid: LatLon,
    pub doy_interval: CircularInterval,
    pub mean_doy: f64,
    pub mean_temperature: f64,
    pub max_temperature: f32,
    /// Distinct cells touched by the event, ascending.
    pub cells: Vec<GridPoint>,
    /// Per-cell activity, parallel to `cells`.
    #[serde(default)]
    pub cell_hits: Vec<CellHits>,
}

impl EventSummary {
    pub fn season(&self) -> Season {
        Season::from_mean_day(self.mean_doy)
    }
}

pub struct MagnitudeAggregator<'a> {
    spread: &'a SpreadReference,
    axes: &'a GridAxes,
    config: &'a MagnitudeConfig,
}

impl<'a> MagnitudeAggregator<'a> {
    pub fn new(spread: &'a SpreadReference, axes: &'a GridAxes, config: &'a MagnitudeConfig) -> Self {
        Self { spread, axes, config }
    }

    /// Normalised magnitude of one node; `None` when the spread at its cell
    /// is missing or not positive.
    pub fn node_magnitude(&self, record: &DayRecord) -> Option<f64> {
        let (p25, p75) = self.spread.quartiles(record.point, record.date.year())?;
        let spread = (p75 - p25) as f64;
        if !(spread > 0.0) {
            return None;
        }
        let excess = match self.config.base {
            NormalizationBase::Threshold => record.excess as f64,
            NormalizationBase::AnnualMaxP25 => (record.value - p25) as f64,
        };
        Some((excess / spread).max(0.0))
    }

    pub fn summarize(&self, graph: &SpatioTemporalGraph, event: &Event) -> Result<EventSummary> {
        self.summarize_counting(graph, event).map(|(s, _)| s)
    }

    /// Summaries of all events in id order.
    pub fn summarize_all(&self, graph: &SpatioTemporalGraph, events: &[Event]) -> Result<Vec<EventSummary>> {
        let mut summaries = Vec::with_capacity(events.len());
        let mut degenerate = 0usize;
        for e in events {
            let (s, d) = self.summarize_counting(graph, e)?;
            degenerate += d;
            summaries.push(s);
        }
        if degenerate > 0 {
            warn!(nodes = degenerate, "nodes with missing or zero spread got magnitude 0");
        }
        debug!(n_events = summaries.len(), "summarised events");
        Ok(summaries)
    }

    fn summarize_counting(&self, graph: &SpatioTemporalGraph, event: &Event) -> Result<(EventSummary, usize)> {
        let first = event.nodes.first().ok_or(HeatwaveError::EmptyEvent { event: event.id.0 })?;
        let first = &graph.node(*first).record;

        let mut start = first.date;
        let mut end = first.date;
        let mut stats = MagnitudeStats::default();
        let mut degenerate = 0usize;
        let mut temp_sum = 0.0f64;
        let mut temp_max = f32::NEG_INFINITY;
        let mut doys = Vec::with_capacity(event.nodes.len());
        let mut hits: Vec<(GridPoint, f64)> = Vec::with_capacity(event.nodes.len());
        let mut centroid = CentroidAccumulator::default();

        for &id in &event.nodes {
            let r = &graph.node(id).record;
            start = start.min(r.date);
            end = end.max(r.date);
            let m = self.node_magnitude(r).unwrap_or_else(|| {
                degenerate += 1;
                0.0
            });
            stats.sum += m;
            stats.max = stats.max.max(m);
            temp_sum += r.value as f64;
            temp_max = temp_max.max(r.value);
            doys.push(day_of_year(r.date));
            hits.push((r.point, m));
            centroid.add(self.axes.latlon(r.point));
        }
        let n = event.nodes.len();
        stats.mean = stats.sum / n as f64;

        hits.sort_by_key(|&(p, _)| p);
        let mut cells: Vec<GridPoint> = Vec::new();
        let mut cell_hits: Vec<CellHits> = Vec::new();
        for (p, m) in hits {
            if cells.last() != Some(&p) {
                cells.push(p);
                cell_hits.push(CellHits::default());
            }
            if let Some(h) = cell_hits.last_mut() {
                h.days += 1;
                h.magnitude += m;
            }
        }

        let doy_interval = CircularInterval::covering(doys.iter().copied())
            .ok_or(HeatwaveError::EmptyEvent { event: event.id.0 })?;
        let mean_doy = circular_mean_day(doys.iter().map(|&d| d as f64))
            .unwrap_or_else(|| interval_midpoint(&doy_interval));

        let summary = EventSummary {
            id: event.id,
            start,
            end,
            duration_days: (end - start).num_days() as u32 + 1,
            node_count: n,
            cell_count: cells.len(),
            severity: stats.aggregate(self.config.aggregation),
            magnitude: stats,
            centroid: centroid.finish().unwrap_or(LatLon::new(0.0, 0.0)),
            doy_interval,
            mean_doy,
            mean_temperature: temp_sum / n as f64,
            max_temperature: temp_max,
            cells,
            cell_hits,
        };
        Ok((summary, degenerate))
    }
}

/// Middle day of an arc, used when the circular mean is undefined.
fn interval_midpoint(iv: &CircularInterval) -> f64 {
    let mid = iv.start as f64 + (iv.len() as f64 - 1.0) / 2.0;
    if mid > DAYS_PER_YEAR as f64 {
        mid - DAYS_PER_YEAR as f64
    } else {
        mid
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::climatology::SpreadField;
    use crate::graph::tests::{day, graph_from_masks};
    use crate::graph::{extract_components, EventFilter, GraphConfig, NodeId};
    use crate::grid::GridShape;
    use approx::assert_relative_eq;

    fn flat_spread(shape: GridShape, p25: f32, p75: f32) -> SpreadReference {
        SpreadReference::Fixed(SpreadField {
            shape,
            p25: vec![p25; shape.n_cells()],
            p75: vec![p75; shape.n_cells()],
        })
    }

    /// 3×3 grid; cells (1,1),(1,2) on day 0, (1,1) on day 1. Every node has
    /// value 31 over a threshold of 30.
    fn two_day_event() -> (SpatioTemporalGraph, Vec<Event>) {
        let shape = GridShape::new(3, 3);
        let mut d0 = vec![false; 9];
        d0[4] = true;
        d0[5] = true;
        let mut d1 = vec![false; 9];
        d1[4] = true;
        let mut g = graph_from_masks(shape, &[d0, d1], GraphConfig::default());
        let events = extract_components(&mut g, &EventFilter::default());
        (g, events)
    }

    #[test]
    fn summary_of_two_day_event() {
        let (g, events) = two_day_event();
        let axes = GridAxes::regular(g.shape(), 30.0, 60.0, -10.0, 20.0);
        let spread = flat_spread(g.shape(), 28.0, 32.0);
        let config = MagnitudeConfig::default();
        let agg = MagnitudeAggregator::new(&spread, &axes, &config);
        let s = agg.summarize(&g, &events[0]).unwrap();

        assert_eq!(s.start, day(0));
        assert_eq!(s.end, day(1));
        assert_eq!(s.duration_days, 2);
        assert_eq!((s.node_count, s.cell_count), (3, 2));
        assert_eq!(s.cells, vec![GridPoint::new(1, 1), GridPoint::new(1, 2)]);
        assert_eq!(
            s.cell_hits,
            vec![CellHits { days: 2, magnitude: 0.5 }, CellHits { days: 1, magnitude: 0.25 }]
        );
        // Excess 1 over a spread of 4 at every node.
        assert_relative_eq!(s.magnitude.sum, 0.75, epsilon = 1e-9);
        assert_relative_eq!(s.magnitude.max, 0.25, epsilon = 1e-9);
        assert_relative_eq!(s.magnitude.mean, 0.25, epsilon = 1e-9);
        assert_relative_eq!(s.severity, s.magnitude.sum);
        assert_relative_eq!(s.centroid.lat, 45.0, epsilon = 1e-9);
        // Circular mean of 5°, 5° and 15°: cell (1,1) is hot on both days.
        assert_relative_eq!(s.centroid.lon, 8.329563, epsilon = 1e-5);
        assert_relative_eq!(s.max_temperature, 31.0);
        assert_eq!(s.season(), Season::Summer);
    }

    #[test]
    fn centroid_weights_cells_by_days_hot() {
        let shape = GridShape::new(2, 1);
        let days = [vec![true, true], vec![true, false], vec![true, false]];
        let mut g = graph_from_masks(shape, &days, GraphConfig::default());
        let events = extract_components(&mut g, &EventFilter::default());
        assert_eq!(events.len(), 1);
        let axes = GridAxes::new(vec![0.0, 10.0], vec![20.0]);
        let spread = flat_spread(shape, 28.0, 32.0);
        let config = MagnitudeConfig::default();
        let s = MagnitudeAggregator::new(&spread, &axes, &config).summarize(&g, &events[0]).unwrap();
        assert_eq!((s.node_count, s.cell_count), (4, 2));
        assert_relative_eq!(s.centroid.lat, 2.5, epsilon = 1e-9);
        assert_relative_eq!(s.centroid.lon, 20.0, epsilon = 1e-9);
    }

    #[test]
    fn annual_max_base_and_aggregations() {
        let (g, events) = two_day_event();
        let axes = GridAxes::regular(g.shape(), 0.0, 3.0, 0.0, 3.0);
        let spread = flat_spread(g.shape(), 28.0, 32.0);
        let config = MagnitudeConfig {
            base: NormalizationBase::AnnualMaxP25,
            aggregation: Aggregation::Max,
            ..MagnitudeConfig::default()
        };
        let agg = MagnitudeAggregator::new(&spread, &axes, &config);
        let s = agg.summarize(&g, &events[0]).unwrap();
        // (31 − 28) / 4 per node.
        assert_relative_eq!(s.magnitude.sum, 2.25, epsilon = 1e-9);
        assert_relative_eq!(s.severity, 0.75, epsilon = 1e-9);
    }

    #[test]
    fn zero_spread_contributes_nothing() {
        let (g, events) = two_day_event();
        let axes = GridAxes::regular(g.shape(), 0.0, 3.0, 0.0, 3.0);
        let spread = flat_spread(g.shape(), 30.0, 30.0);
        let config = MagnitudeConfig::default();
        let agg = MagnitudeAggregator::new(&spread, &axes, &config);
        let all = agg.summarize_all(&g, &events).unwrap();
        assert_eq!(all[0].magnitude, MagnitudeStats::default());
        assert_eq!(all[0].node_count, 3, "degenerate nodes still count");
    }

    #[test]
    fn empty_event_is_an_error() {
        let (g, _) = two_day_event();
        let axes = GridAxes::regular(g.shape(), 0.0, 3.0, 0.0, 3.0);
        let spread = flat_spread(g.shape(), 28.0, 32.0);
        let config = MagnitudeConfig::default();
        let agg = MagnitudeAggregator::new(&spread, &axes, &config);
        let empty = Event { id: EventId(4), nodes: Vec::new() };
        assert!(matches!(agg.summarize(&g, &empty), Err(HeatwaveError::EmptyEvent { event: 4 })));
        let one = Event { id: EventId(0), nodes: vec![NodeId(2)] };
        assert_eq!(agg.summarize(&g, &one).unwrap().duration_days, 1);
    }

    #[test]
    fn midpoint_wraps_past_year_end() {
        let iv = CircularInterval { start: 364, end: 3 };
        assert_relative_eq!(interval_midpoint(&iv), 1.0);
    }
}
