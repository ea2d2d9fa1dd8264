//! Spatio-temporal exceedance graph.
//!
//! Nodes are exceeding (cell, day) records stored day by day in cell order
//! (CSR layout: `day_offsets[d]..day_offsets[d + 1]` are the nodes of day
//! `d`). Edges are never stored. They are streamed by scanning each day with
//! two dense `DayLayer`s (current and previous day), so the whole edge set is
//! visited in time linear in the node count with O(cells) extra memory.

pub mod components;
pub mod layer;
pub mod union_find;

use std::fmt;
use std::ops::Range;

use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::calendar::day_of_year;
use crate::climatology::ThresholdLookup;
use crate::error::{HeatwaveError, Result};
use crate::exceedance::ExceedanceField;
use crate::grid::{check_dates, GridPoint, GridShape, TemperatureSource};

pub use components::{extract_components, extract_components_tiled, Event, EventFilter};
pub use layer::DayLayer;
pub use union_find::UnionFind;

/// Dense node index, ordered by (day, cell).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct NodeId(pub u32);

/// Label of a kept connected component.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EventId(pub u32);

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One exceeding cell on one day.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DayRecord {
    pub point: GridPoint,
    pub date: NaiveDate,
    pub value: f32,
    pub threshold: f32,
    /// `max(0, value − threshold)`.
    pub excess: f32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct GraphNode {
    pub id: NodeId,
    pub record: DayRecord,
    /// Set by component extraction; `None` before it or when the node's
    /// component was filtered out.
    pub component: Option<EventId>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Connectivity {
    /// Edge-sharing neighbours only.
    Four,
    /// Edge- and corner-sharing neighbours.
    Eight,
}

/// Which cells on consecutive days are linked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TemporalLink {
    SameCell,
    /// Same cell or any spatial neighbour of it.
    Neighborhood,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EdgeKind {
    Spatial,
    Temporal,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GraphConfig {
    pub connectivity: Connectivity,
    pub temporal_link: TemporalLink,
    /// Treat the first and last longitude columns as neighbours.
    pub wrap_longitude: bool,
    /// Day slabs for tiled extraction; 1 means sequential.
    pub tiles: usize,
}

impl Default for GraphConfig {
    fn default() -> Self {
        Self {
            connectivity: Connectivity::Eight,
            temporal_link: TemporalLink::SameCell,
            wrap_longitude: false,
            tiles: 1,
        }
    }
}

// ── Neighbourhood offsets ────────────────────────────────────────────────────

/// Half of each neighbourhood: every unordered pair {p, q} of same-day
/// neighbours has q = p + offset for exactly one listed offset.
const BACKWARD_FOUR: [(i32, i32); 2] = [(0, -1), (-1, 0)];
const BACKWARD_EIGHT: [(i32, i32); 4] = [(0, -1), (-1, -1), (-1, 0), (-1, 1)];

const FULL_FOUR: [(i32, i32); 5] = [(0, 0), (-1, 0), (1, 0), (0, -1), (0, 1)];
const FULL_EIGHT: [(i32, i32); 9] = [
    (0, 0),
    (-1, -1),
    (-1, 0),
    (-1, 1),
    (0, -1),
    (0, 1),
    (1, -1),
    (1, 0),
    (1, 1),
];

#[derive(Debug, Clone)]
pub struct SpatioTemporalGraph {
    shape: GridShape,
    dates: Vec<NaiveDate>,
    nodes: Vec<GraphNode>,
    day_offsets: Vec<usize>,
    config: GraphConfig,
}

impl SpatioTemporalGraph {
    /// Compute exceedances of `source` against `thresholds` for every day and
    /// collect the exceeding cells as nodes.
    pub fn build<S, T>(source: &S, thresholds: &T, config: &GraphConfig) -> Result<Self>
    where
        S: TemperatureSource + ?Sized,
        T: ThresholdLookup + ?Sized,
    {
        thresholds.validate()?;
        let shape = source.shape();
        if thresholds.shape() != shape {
            return Err(HeatwaveError::ShapeMismatch { expected: thresholds.shape(), found: shape });
        }
        source.axes().check_shape(shape)?;
        let dates = source.dates();
        check_dates(dates)?;

        // Dates are increasing, so each year is one contiguous run of days.
        let mut days: Vec<Vec<DayRecord>> = Vec::with_capacity(dates.len());
        let mut start = 0;
        while start < dates.len() {
            let year = dates[start].year();
            let end = start + dates[start..].iter().take_while(|d| d.year() == year).count();
            let calendar = thresholds.year_field(year);
            let calendar = calendar.as_deref();

            let day_records = |day: usize| -> Result<Vec<DayRecord>> {
                let date = dates[day];
                let Some(limits) = calendar.and_then(|c| c.for_day(day_of_year(date))) else {
                    return Ok(Vec::new());
                };
                let values = source.day_field(day);
                let field = ExceedanceField::compute(&values, limits)?;
                Ok(field
                    .exceeding_cells()
                    .map(|point| {
                        let i = shape.index(point);
                        DayRecord {
                            point,
                            date,
                            value: values.data[i],
                            threshold: limits.data[i],
                            excess: field.magnitude[i],
                        }
                    })
                    .collect())
            };

            #[cfg(feature = "threading")]
            {
                use rayon::prelude::*;
                let year_days: Vec<Vec<DayRecord>> =
                    (start..end).into_par_iter().map(day_records).collect::<Result<_>>()?;
                days.extend(year_days);
            }
            #[cfg(not(feature = "threading"))]
            for day in start..end {
                days.push(day_records(day)?);
            }
            start = end;
        }

        Self::from_day_records(shape, dates.to_vec(), days, config.clone())
    }

    /// Assemble a graph from precomputed exceeding records, one list per date.
    pub fn from_day_records(
        shape: GridShape,
        dates: Vec<NaiveDate>,
        days: Vec<Vec<DayRecord>>,
        config: GraphConfig,
    ) -> Result<Self> {
        check_dates(&dates)?;
        if days.len() != dates.len() {
            return Err(HeatwaveError::InvalidSeries(format!(
                "{} dates but {} days of records",
                dates.len(),
                days.len()
            )));
        }
        let total: usize = days.iter().map(Vec::len).sum();
        if total >= u32::MAX as usize {
            return Err(HeatwaveError::InvalidSeries(format!("{total} exceeding records overflow node ids")));
        }

        let mut nodes = Vec::with_capacity(total);
        let mut day_offsets = Vec::with_capacity(dates.len() + 1);
        day_offsets.push(0);
        for (date, mut records) in dates.iter().zip(days) {
            records.sort_by_key(|r| shape.index(r.point));
            for (i, r) in records.iter().enumerate() {
                if r.date != *date || !shape.contains(r.point) {
                    return Err(HeatwaveError::InvalidSeries(format!(
                        "record at {:?} on {} does not belong to {date} on a {shape} grid",
                        r.point, r.date
                    )));
                }
                if i > 0 && records[i - 1].point == r.point {
                    return Err(HeatwaveError::InvalidSeries(format!(
                        "duplicate record at {:?} on {date}",
                        r.point
                    )));
                }
            }
            for record in records {
                let id = NodeId(nodes.len() as u32);
                nodes.push(GraphNode { id, record, component: None });
            }
            day_offsets.push(nodes.len());
        }
        debug!(n_nodes = nodes.len(), n_days = dates.len(), "built spatio-temporal graph");
        Ok(Self { shape, dates, nodes, day_offsets, config })
    }

    pub fn shape(&self) -> GridShape {
        self.shape
    }

    pub fn config(&self) -> &GraphConfig {
        &self.config
    }

    pub fn dates(&self) -> &[NaiveDate] {
        &self.dates
    }

    pub fn n_days(&self) -> usize {
        self.dates.len()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn nodes(&self) -> &[GraphNode] {
        &self.nodes
    }

    pub(crate) fn nodes_mut(&mut self) -> &mut [GraphNode] {
        &mut self.nodes
    }

    #[inline]
    pub fn node(&self, id: NodeId) -> &GraphNode {
        &self.nodes[id.0 as usize]
    }

    pub fn day_nodes(&self, day: usize) -> &[GraphNode] {
        &self.nodes[self.day_offsets[day]..self.day_offsets[day + 1]]
    }

    /// Node-id range covering `days`.
    pub(crate) fn node_range(&self, days: Range<usize>) -> Range<usize> {
        self.day_offsets[days.start]..self.day_offsets[days.end]
    }

    /// Whether day `day` directly follows day `day - 1` on the calendar.
    pub fn follows_previous(&self, day: usize) -> bool {
        day > 0 && (self.dates[day] - self.dates[day - 1]).num_days() == 1
    }

    // ── Adjacency predicates ─────────────────────────────────────────────────

    /// Whether two distinct cells are spatial neighbours under the configured
    /// connectivity and longitude wrap.
    pub fn cells_adjacent(&self, p: GridPoint, q: GridPoint) -> bool {
        if p == q {
            return false;
        }
        let dlat = p.lat.abs_diff(q.lat);
        let mut dlon = p.lon.abs_diff(q.lon);
        if self.config.wrap_longitude {
            dlon = dlon.min(self.shape.n_lon as u32 - dlon);
        }
        if dlat > 1 || dlon > 1 {
            return false;
        }
        match self.config.connectivity {
            Connectivity::Four => dlat + dlon == 1,
            Connectivity::Eight => true,
        }
    }

    /// The edge between two records, if any. Symmetric.
    pub fn edge_kind(&self, a: &DayRecord, b: &DayRecord) -> Option<EdgeKind> {
        match (b.date - a.date).num_days().abs() {
            0 => self.cells_adjacent(a.point, b.point).then_some(EdgeKind::Spatial),
            1 => {
                let linked = a.point == b.point
                    || (self.config.temporal_link == TemporalLink::Neighborhood
                        && self.cells_adjacent(a.point, b.point));
                linked.then_some(EdgeKind::Temporal)
            }
            _ => None,
        }
    }

    // ── Edge streaming ───────────────────────────────────────────────────────

    /// Visit every edge at least once as `(earlier/lower node, node, kind)`.
    pub fn for_each_edge<F>(&self, mut f: F)
    where
        F: FnMut(NodeId, NodeId, EdgeKind),
    {
        self.scan_days(0..self.n_days(), &mut f);
    }

    /// Edges among the nodes of `days`. Temporal edges from the first day of
    /// the range back to the day before it are not visited.
    pub(crate) fn scan_days<F>(&self, days: Range<usize>, f: &mut F)
    where
        F: FnMut(NodeId, NodeId, EdgeKind),
    {
        let mut prev = DayLayer::new(self.shape);
        let mut cur = DayLayer::new(self.shape);
        let first = days.start;
        for day in days {
            let nodes = self.day_nodes(day);
            cur.fill(nodes, self.shape);
            for n in nodes {
                self.spatial_edges(n, &cur, f);
            }
            if day > first {
                if self.follows_previous(day) {
                    for n in nodes {
                        self.temporal_edges(n, &prev, f);
                    }
                }
                prev.clear(self.day_nodes(day - 1), self.shape);
            }
            std::mem::swap(&mut prev, &mut cur);
        }
    }

    /// Temporal edges between day `day - 1` and day `day` only.
    pub(crate) fn scan_boundary<F>(&self, day: usize, f: &mut F)
    where
        F: FnMut(NodeId, NodeId, EdgeKind),
    {
        if !self.follows_previous(day) {
            return;
        }
        let mut prev = DayLayer::new(self.shape);
        prev.fill(self.day_nodes(day - 1), self.shape);
        for n in self.day_nodes(day) {
            self.temporal_edges(n, &prev, f);
        }
    }

    fn spatial_edges<F>(&self, n: &GraphNode, layer: &DayLayer, f: &mut F)
    where
        F: FnMut(NodeId, NodeId, EdgeKind),
    {
        let offsets: &[(i32, i32)] = match self.config.connectivity {
            Connectivity::Four => &BACKWARD_FOUR,
            Connectivity::Eight => &BACKWARD_EIGHT,
        };
        let own = self.shape.index(n.record.point);
        for &(dlat, dlon) in offsets {
            if let Some(cell) = self.offset_cell(n.record.point, dlat, dlon) {
                if cell == own {
                    continue;
                }
                if let Some(other) = layer.get(cell) {
                    f(other.min(n.id), other.max(n.id), EdgeKind::Spatial);
                }
            }
        }
    }

    fn temporal_edges<F>(&self, n: &GraphNode, prev: &DayLayer, f: &mut F)
    where
        F: FnMut(NodeId, NodeId, EdgeKind),
    {
        let offsets: &[(i32, i32)] = match (self.config.temporal_link, self.config.connectivity) {
            (TemporalLink::SameCell, _) => &[(0, 0)],
            (TemporalLink::Neighborhood, Connectivity::Four) => &FULL_FOUR,
            (TemporalLink::Neighborhood, Connectivity::Eight) => &FULL_EIGHT,
        };
        for &(dlat, dlon) in offsets {
            if let Some(other) = self.offset_cell(n.record.point, dlat, dlon).and_then(|c| prev.get(c)) {
                f(other, n.id, EdgeKind::Temporal);
            }
        }
    }

    /// Cell index of `p + (dlat, dlon)`, wrapping longitude if configured.
    #[inline]
    fn offset_cell(&self, p: GridPoint, dlat: i32, dlon: i32) -> Option<usize> {
        let lat = p.lat as i64 + dlat as i64;
        if lat < 0 || lat >= self.shape.n_lat as i64 {
            return None;
        }
        let n_lon = self.shape.n_lon as i64;
        let mut lon = p.lon as i64 + dlon as i64;
        if self.config.wrap_longitude {
            lon = lon.rem_euclid(n_lon);
        } else if lon < 0 || lon >= n_lon {
            return None;
        }
        Some(self.shape.index(GridPoint::new(lat as u32, lon as u32)))
    }
}
