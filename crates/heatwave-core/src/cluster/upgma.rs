//! Average-linkage (UPGMA) hierarchical clustering for subfamilies.
//!
//! Merges are found with the nearest-neighbour-chain algorithm on a condensed
//! distance matrix, updating distances with the size-weighted Lance–Williams
//! rule. Average linkage is reducible, so the merges sorted by height form a
//! valid dendrogram with non-decreasing heights.

use serde::{Deserialize, Serialize};

use crate::error::{HeatwaveError, Result};
use crate::graph::UnionFind;
use crate::grid::GridPoint;

/// Where to cut the dendrogram.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubfamilyCut {
    /// Exactly this many subfamilies.
    Count(usize),
    /// Apply every merge at or below this height.
    Height(f64),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubfamilyMetric {
    /// `1 − |A ∩ B| / min(|A|, |B|)` over the events' cell footprints.
    SpatialOverlap,
    /// Euclidean distance between standardised family features.
    Features,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SubfamilyConfig {
    pub cut: SubfamilyCut,
    pub metric: SubfamilyMetric,
    /// Families to split; `None` splits all of them.
    pub families: Option<Vec<usize>>,
}

impl Default for SubfamilyConfig {
    fn default() -> Self {
        Self {
            cut: SubfamilyCut::Height(0.5),
            metric: SubfamilyMetric::SpatialOverlap,
            families: None,
        }
    }
}

/// Upper triangle of a symmetric distance matrix, row by row.
#[derive(Debug, Clone, PartialEq)]
pub struct CondensedMatrix {
    n: usize,
    data: Vec<f64>,
}

impl CondensedMatrix {
    /// Evaluate `dist(i, j)` for every `i < j`.
    pub fn from_fn<F>(n: usize, dist: F) -> Self
    where
        F: Fn(usize, usize) -> f64 + Sync,
    {
        #[cfg(feature = "threading")]
        let data: Vec<f64> = {
            use rayon::prelude::*;
            (0..n)
                .into_par_iter()
                .flat_map_iter(|i| ((i + 1)..n).map(move |j| (i, j)))
                .map(|(i, j)| dist(i, j))
                .collect()
        };
        #[cfg(not(feature = "threading"))]
        let data: Vec<f64> = (0..n)
            .flat_map(|i| ((i + 1)..n).map(move |j| (i, j)))
            .map(|(i, j)| dist(i, j))
            .collect();
        Self { n, data }
    }

    pub fn len(&self) -> usize {
        self.n
    }

    pub fn is_empty(&self) -> bool {
        self.n == 0
    }

    #[inline]
    fn index(&self, i: usize, j: usize) -> usize {
        let (i, j) = if i < j { (i, j) } else { (j, i) };
        self.n * i - i * (i + 1) / 2 + (j - i - 1)
    }

    #[inline]
    pub fn get(&self, i: usize, j: usize) -> f64 {
        if i == j {
            0.0
        } else {
            self.data[self.index(i, j)]
        }
    }

    #[inline]
    fn set(&mut self, i: usize, j: usize, d: f64) {
        let k = self.index(i, j);
        self.data[k] = d;
    }
}

/// Overlap distance between two ascending cell footprints.
pub fn overlap_distance(a: &[GridPoint], b: &[GridPoint]) -> f64 {
    let smaller = a.len().min(b.len());
    if smaller == 0 {
        return 1.0;
    }
    let (mut i, mut j, mut shared) = (0, 0, 0usize);
    while i < a.len() && j < b.len() {
        match a[i].cmp(&b[j]) {
            std::cmp::Ordering::Less => i += 1,
            std::cmp::Ordering::Greater => j += 1,
            std::cmp::Ordering::Equal => {
                shared += 1;
                i += 1;
                j += 1;
            }
        }
    }
    1.0 - shared as f64 / smaller as f64
}

/// One merge. Leaves are `0..n`; the cluster formed by merge `k` is `n + k`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Merge {
    pub left: usize,
    pub right: usize,
    pub height: f64,
    pub size: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Dendrogram {
    pub n_leaves: usize,
    pub merges: Vec<Merge>,
}

impl Dendrogram {
    pub fn average_linkage(mut dist: CondensedMatrix) -> Self {
        let n = dist.len();
        let mut size = vec![1usize; n];
        let mut active = vec![true; n];
        let mut raw: Vec<(usize, usize, f64)> = Vec::with_capacity(n.saturating_sub(1));
        let mut chain: Vec<usize> = Vec::with_capacity(n);

        for _ in 1..n {
            if chain.is_empty() {
                if let Some(first) = active.iter().position(|&a| a) {
                    chain.push(first);
                }
            }
            let (x, y, height) = loop {
                let x = chain[chain.len() - 1];
                let prev = (chain.len() >= 2).then(|| chain[chain.len() - 2]);
                let (mut y, mut best) = match prev {
                    Some(p) => (p, dist.get(x, p)),
                    None => (x, f64::INFINITY),
                };
                for i in (0..n).filter(|&i| active[i] && i != x) {
                    let d = dist.get(x, i);
                    if d < best {
                        best = d;
                        y = i;
                    }
                }
                if prev == Some(y) {
                    chain.truncate(chain.len() - 2);
                    break (x, y, best);
                }
                chain.push(y);
            };

            // The merged cluster lives on in the higher slot.
            let (x, y) = if x < y { (x, y) } else { (y, x) };
            let (nx, ny) = (size[x] as f64, size[y] as f64);
            active[x] = false;
            size[y] += size[x];
            for i in (0..n).filter(|&i| active[i] && i != y) {
                let d = (nx * dist.get(i, x) + ny * dist.get(i, y)) / (nx + ny);
                dist.set(i, y, d);
            }
            raw.push((x, y, height));
        }

        raw.sort_by(|a, b| a.2.total_cmp(&b.2));
        Self { n_leaves: n, merges: relabel(n, &raw) }
    }

    /// Subfamily label per leaf, renumbered by descending subfamily size
    /// (ties by lowest member index).
    pub fn cut(&self, cut: SubfamilyCut) -> Result<Vec<usize>> {
        let n = self.n_leaves;
        let applied = match cut {
            SubfamilyCut::Count(0) => {
                return Err(HeatwaveError::InvalidConfig("subfamily count must be at least 1".into()))
            }
            SubfamilyCut::Count(c) if c > n => {
                return Err(HeatwaveError::InsufficientEvents { requested: c, available: n })
            }
            SubfamilyCut::Count(c) => n - c,
            SubfamilyCut::Height(h) if h.is_nan() || h < 0.0 => {
                return Err(HeatwaveError::InvalidConfig(format!("cut height must be non-negative, got {h}")))
            }
            SubfamilyCut::Height(h) => self.merges.iter().take_while(|m| m.height <= h).count(),
        };

        let mut uf = UnionFind::new(n + self.merges.len());
        for (k, m) in self.merges.iter().take(applied).enumerate() {
            uf.union(m.left, n + k);
            uf.union(m.right, n + k);
        }
        let mut groups: Vec<(usize, Vec<usize>)> = Vec::new();
        let mut group_of_root = std::collections::HashMap::new();
        for leaf in 0..n {
            let root = uf.find(leaf);
            let g = *group_of_root.entry(root).or_insert_with(|| {
                groups.push((root, Vec::new()));
                groups.len() - 1
            });
            groups[g].1.push(leaf);
        }
        // Groups are already in order of lowest member; the stable sort keeps
        // that as the tie-break.
        groups.sort_by(|a, b| b.1.len().cmp(&a.1.len()));
        let mut labels = vec![0usize; n];
        for (label, (_, members)) in groups.iter().enumerate() {
            for &leaf in members {
                labels[leaf] = label;
            }
        }
        Ok(labels)
    }
}

/// Turn slot-indexed merges into leaf/cluster ids.
fn relabel(n: usize, raw: &[(usize, usize, f64)]) -> Vec<Merge> {
    let mut parent: Vec<usize> = (0..2 * n).collect();
    let mut size: Vec<usize> = vec![1; 2 * n];
    let find = |parent: &mut Vec<usize>, mut x: usize| {
        while parent[x] != x {
            let up = parent[parent[x]];
            parent[x] = up;
            x = up;
        }
        x
    };
    raw.iter()
        .enumerate()
        .map(|(k, &(x, y, height))| {
            let (rx, ry) = (find(&mut parent, x), find(&mut parent, y));
            let id = n + k;
            parent[rx] = id;
            parent[ry] = id;
            size[id] = size[rx] + size[ry];
            Merge { left: rx.min(ry), right: rx.max(ry), height, size: size[id] }
        })
        .collect()
}
