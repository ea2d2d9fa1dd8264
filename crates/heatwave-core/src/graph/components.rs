//! Connected components of the exceedance graph.
//!
//! Both extractors produce the same labelling: components are ordered by
//! their lowest node id and kept components are numbered from 0 in that
//! order. The tiled extractor reduces contiguous day slabs independently and
//! then stitches the slabs together along their shared day boundaries.

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::union_find::UnionFind;
use super::{EventId, NodeId, SpatioTemporalGraph};

/// Minimum size of a kept event. Components failing any bound are dropped.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EventFilter {
    pub min_nodes: usize,
    pub min_cells: usize,
    pub min_duration_days: u32,
}

impl Default for EventFilter {
    fn default() -> Self {
        Self { min_nodes: 1, min_cells: 1, min_duration_days: 1 }
    }
}

impl EventFilter {
    pub fn keeps(&self, nodes: usize, cells: usize, duration_days: u32) -> bool {
        nodes >= self.min_nodes && cells >= self.min_cells && duration_days >= self.min_duration_days
    }
}

/// A kept connected component and its nodes in ascending id order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Event {
    pub id: EventId,
    pub nodes: Vec<NodeId>,
}

/// Single union-find pass over every streamed edge.
pub fn extract_components(graph: &mut SpatioTemporalGraph, filter: &EventFilter) -> Vec<Event> {
    let mut uf = UnionFind::new(graph.len());
    graph.for_each_edge(|a, b, _| {
        uf.union(a.0 as usize, b.0 as usize);
    });
    let roots = uf.roots();
    label(graph, &roots, filter)
}

/// Slab-parallel extraction. `tiles` is clamped to `1..=n_days`.
pub fn extract_components_tiled(
    graph: &mut SpatioTemporalGraph,
    filter: &EventFilter,
    tiles: usize,
) -> Vec<Event> {
    let n_days = graph.n_days();
    if n_days == 0 {
        return Vec::new();
    }
    let tiles = tiles.clamp(1, n_days);
    let slabs: Vec<std::ops::Range<usize>> = (0..tiles)
        .map(|t| (t * n_days / tiles)..((t + 1) * n_days / tiles))
        .collect();

    let g: &SpatioTemporalGraph = graph;
    #[cfg(feature = "threading")]
    let slab_roots: Vec<Vec<u32>> = {
        use rayon::prelude::*;
        slabs.par_iter().map(|days| reduce_slab(g, days.clone())).collect()
    };
    #[cfg(not(feature = "threading"))]
    let slab_roots: Vec<Vec<u32>> = slabs.iter().map(|days| reduce_slab(g, days.clone())).collect();

    let mut uf = UnionFind::new(g.len());
    for (days, roots) in slabs.iter().zip(&slab_roots) {
        let base = g.node_range(days.clone()).start;
        for (i, &r) in roots.iter().enumerate() {
            uf.union(base + i, r as usize);
        }
    }
    let mut stitched = 0usize;
    for days in slabs.iter().skip(1) {
        g.scan_boundary(days.start, &mut |a: NodeId, b: NodeId, _| {
            if uf.union(a.0 as usize, b.0 as usize) {
                stitched += 1;
            }
        });
    }
    debug!(tiles, stitched, "reconciled slab boundaries");

    let roots = uf.roots();
    label(graph, &roots, filter)
}

/// Union-find over one slab. Returns the global id of each node's local root.
fn reduce_slab(graph: &SpatioTemporalGraph, days: std::ops::Range<usize>) -> Vec<u32> {
    let range = graph.node_range(days.clone());
    let base = range.start;
    let mut uf = UnionFind::new(range.len());
    graph.scan_days(days, &mut |a: NodeId, b: NodeId, _| {
        uf.union(a.0 as usize - base, b.0 as usize - base);
    });
    uf.roots().into_iter().map(|r| r + base as u32).collect()
}

/// Canonical labelling from fully compressed roots.
fn label(graph: &mut SpatioTemporalGraph, roots: &[u32], filter: &EventFilter) -> Vec<Event> {
    const UNSEEN: u32 = u32::MAX;
    let mut group_of_root = vec![UNSEEN; roots.len()];
    let mut groups: Vec<Vec<NodeId>> = Vec::new();
    for (i, &r) in roots.iter().enumerate() {
        let slot = &mut group_of_root[r as usize];
        if *slot == UNSEEN {
            *slot = groups.len() as u32;
            groups.push(Vec::new());
        }
        groups[*slot as usize].push(NodeId(i as u32));
    }

    let shape = graph.shape();
    let mut events = Vec::new();
    let mut dropped = 0usize;
    for nodes in groups {
        // Nodes are in (day, cell) order, so the ends hold the extreme dates.
        let (first, last) = match (nodes.first(), nodes.last()) {
            (Some(&f), Some(&l)) => (graph.node(f).record.date, graph.node(l).record.date),
            _ => continue,
        };
        let duration = (last - first).num_days() as u32 + 1;
        let mut cells: Vec<usize> = nodes.iter().map(|&n| shape.index(graph.node(n).record.point)).collect();
        cells.sort_unstable();
        cells.dedup();
        if filter.keeps(nodes.len(), cells.len(), duration) {
            events.push(Event { id: EventId(events.len() as u32), nodes });
        } else {
            dropped += 1;
        }
    }

    let assigned = graph.nodes_mut();
    for n in assigned.iter_mut() {
        n.component = None;
    }
    for e in &events {
        for &n in &e.nodes {
            assigned[n.0 as usize].component = Some(e.id);
        }
    }
    debug!(kept = events.len(), dropped, "labelled connected components");
    events
}
