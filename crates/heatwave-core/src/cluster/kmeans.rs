//! K-Means family clustering.
//!
//! Lloyd's algorithm with k-means++ seeding. Several restarts (`n_init`) are
//! run from seeds derived from the configured seed and the lowest-inertia run
//! wins, so a fixed seed always yields the same partition.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::features::{squared_distance, FeatureMatrix, FeatureSelection};
use crate::error::{HeatwaveError, Result};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FamilyConfig {
    pub k: usize,
    pub seed: u64,
    pub max_iterations: usize,
    /// Stop once no centroid moves further than this.
    pub tolerance: f64,
    pub n_init: usize,
    pub features: FeatureSelection,
    pub partition: FamilyPartition,
}

/// Which events share a K-Means run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FamilyPartition {
    /// One run over every event.
    #[default]
    All,
    /// One run per season, each with up to `k` families.
    Season,
}

impl Default for FamilyConfig {
    fn default() -> Self {
        Self {
            k: 4,
            seed: 100,
            max_iterations: 300,
            tolerance: 1e-4,
            n_init: 10,
            features: FeatureSelection::default(),
            partition: FamilyPartition::All,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConvergenceStatus {
    Converged,
    /// `max_iterations` ran out first; labels are the last assignment.
    IterationCapReached,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FamilyClustering {
    /// Family of each input row.
    pub labels: Vec<usize>,
    pub centroids: Vec<Vec<f64>>,
    /// Sum of squared distances to the assigned centroid.
    pub inertia: f64,
    pub iterations: usize,
    pub status: ConvergenceStatus,
}

impl FamilyClustering {
    /// Row indices of each family.
    pub fn members(&self) -> Vec<Vec<usize>> {
        let mut out = vec![Vec::new(); self.centroids.len()];
        for (i, &l) in self.labels.iter().enumerate() {
            out[l].push(i);
        }
        out
    }
}

#[derive(Debug, Clone)]
pub struct KMeans {
    k: usize,
    seed: u64,
    max_iterations: usize,
    tolerance: f64,
    n_init: usize,
}

impl KMeans {
    pub fn new(k: usize, seed: u64) -> Result<Self> {
        let defaults = FamilyConfig::default();
        Self::from_config(&FamilyConfig { k, seed, ..defaults })
    }

    pub fn from_config(config: &FamilyConfig) -> Result<Self> {
        if config.k == 0 {
            return Err(HeatwaveError::InvalidConfig("family count k must be at least 1".into()));
        }
        if config.max_iterations == 0 || config.n_init == 0 {
            return Err(HeatwaveError::InvalidConfig(
                "max_iterations and n_init must be at least 1".into(),
            ));
        }
        if !(config.tolerance >= 0.0) {
            return Err(HeatwaveError::InvalidConfig(format!(
                "tolerance must be non-negative, got {}",
                config.tolerance
            )));
        }
        Ok(Self {
            k: config.k,
            seed: config.seed,
            max_iterations: config.max_iterations,
            tolerance: config.tolerance,
            n_init: config.n_init,
        })
    }

    pub fn k(&self) -> usize {
        self.k
    }

    pub fn with_k(mut self, k: usize) -> Self {
        self.k = k.max(1);
        self
    }

    pub fn with_max_iterations(mut self, max_iterations: usize) -> Self {
        self.max_iterations = max_iterations.max(1);
        self
    }

    pub fn with_n_init(mut self, n_init: usize) -> Self {
        self.n_init = n_init.max(1);
        self
    }

    pub fn with_tolerance(mut self, tolerance: f64) -> Self {
        self.tolerance = tolerance.max(0.0);
        self
    }

    /// Partition the rows of `data` into `k` families.
    pub fn fit(&self, data: &FeatureMatrix) -> Result<FamilyClustering> {
        if self.k > data.n_rows {
            return Err(HeatwaveError::InsufficientEvents { requested: self.k, available: data.n_rows });
        }
        let mut best: Option<FamilyClustering> = None;
        for run in 0..self.n_init {
            let mut rng = StdRng::seed_from_u64(self.seed.wrapping_add(run as u64));
            let candidate = self.lloyd(data, &mut rng);
            debug!(run, inertia = candidate.inertia, iterations = candidate.iterations, "k-means run");
            if best.as_ref().map_or(true, |b| candidate.inertia < b.inertia) {
                best = Some(candidate);
            }
        }
        let best = best.ok_or_else(|| HeatwaveError::InvalidConfig("n_init must be at least 1".into()))?;
        if best.status == ConvergenceStatus::IterationCapReached {
            warn!(max_iterations = self.max_iterations, "k-means did not converge");
        }
        Ok(best)
    }

    fn lloyd(&self, data: &FeatureMatrix, rng: &mut StdRng) -> FamilyClustering {
        let mut centroids = init_plus_plus(data, self.k, rng);
        let mut labels = vec![0usize; data.n_rows];
        let mut status = ConvergenceStatus::IterationCapReached;
        let mut iterations = 0;

        for iter in 1..=self.max_iterations {
            iterations = iter;
            assign(data, &centroids, &mut labels);
            let updated = update_centroids(data, &centroids, &mut labels, self.k);
            let shift = centroids
                .iter()
                .zip(&updated)
                .map(|(a, b)| squared_distance(a, b).sqrt())
                .fold(0.0f64, f64::max);
            centroids = updated;
            if shift <= self.tolerance {
                status = ConvergenceStatus::Converged;
                break;
            }
        }

        // Labels stay those of the last assignment step, including any rows
        // moved into empty clusters.
        let inertia = labels
            .iter()
            .enumerate()
            .map(|(i, &l)| squared_distance(data.row(i), &centroids[l]))
            .sum();
        FamilyClustering { labels, centroids, inertia, iterations, status }
    }
}

/// k-means++ seeding: the first centre uniformly, the rest with probability
/// proportional to squared distance from the nearest chosen centre.
fn init_plus_plus(data: &FeatureMatrix, k: usize, rng: &mut StdRng) -> Vec<Vec<f64>> {
    let n = data.n_rows;
    let mut centroids = vec![data.row(rng.gen_range(0..n)).to_vec()];
    let mut d2: Vec<f64> = (0..n).map(|i| squared_distance(data.row(i), &centroids[0])).collect();
    while centroids.len() < k {
        let total: f64 = d2.iter().sum();
        let pick = if total > 0.0 {
            let mut target = rng.gen::<f64>() * total;
            let mut chosen = n - 1;
            for (i, &w) in d2.iter().enumerate() {
                if target < w {
                    chosen = i;
                    break;
                }
                target -= w;
            }
            chosen
        } else {
            rng.gen_range(0..n)
        };
        let c = data.row(pick).to_vec();
        for (i, d) in d2.iter_mut().enumerate() {
            *d = d.min(squared_distance(data.row(i), &c));
        }
        centroids.push(c);
    }
    centroids
}

/// Nearest-centroid labels; ties go to the lowest index.
fn assign(data: &FeatureMatrix, centroids: &[Vec<f64>], labels: &mut [usize]) {
    for (i, label) in labels.iter_mut().enumerate() {
        let row = data.row(i);
        let mut best = 0;
        let mut best_d = f64::INFINITY;
        for (c, centroid) in centroids.iter().enumerate() {
            let d = squared_distance(row, centroid);
            if d < best_d {
                best_d = d;
                best = c;
            }
        }
        *label = best;
    }
}

/// Means of the assigned rows. An empty cluster takes over the row farthest
/// from its current centroid.
fn update_centroids(
    data: &FeatureMatrix,
    centroids: &[Vec<f64>],
    labels: &mut [usize],
    k: usize,
) -> Vec<Vec<f64>> {
    let mut counts = vec![0usize; k];
    for &l in labels.iter() {
        counts[l] += 1;
    }
    for c in 0..k {
        if counts[c] > 0 {
            continue;
        }
        let far = (0..data.n_rows)
            .filter(|&i| counts[labels[i]] > 1)
            .map(|i| (i, squared_distance(data.row(i), &centroids[labels[i]])))
            .fold(None, |acc: Option<(usize, f64)>, (i, d)| match acc {
                Some((_, bd)) if bd >= d => acc,
                _ => Some((i, d)),
            });
        if let Some((i, _)) = far {
            counts[labels[i]] -= 1;
            labels[i] = c;
            counts[c] = 1;
        }
    }

    let mut sums = vec![vec![0.0; data.n_cols]; k];
    for (i, &l) in labels.iter().enumerate() {
        for (s, v) in sums[l].iter_mut().zip(data.row(i)) {
            *s += v;
        }
    }
    sums.into_iter()
        .zip(&counts)
        .zip(centroids)
        .map(|((s, &n), old)| {
            if n == 0 {
                old.clone()
            } else {
                s.into_iter().map(|v| v / n as f64).collect()
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn blobs() -> FeatureMatrix {
        FeatureMatrix::from_rows(&[
            vec![0.0, 0.0],
            vec![0.2, 0.1],
            vec![0.1, 0.3],
            vec![5.0, 5.0],
            vec![5.2, 4.9],
            vec![4.8, 5.1],
            vec![10.0, 0.0],
            vec![10.1, 0.2],
        ])
    }

    /// Two labelings describe the same partition regardless of label ids.
    fn same_partition(a: &[usize], b: &[usize]) -> bool {
        (0..a.len()).all(|i| (0..a.len()).all(|j| (a[i] == a[j]) == (b[i] == b[j])))
    }

    #[test]
    fn separates_well_separated_blobs() {
        let fit = KMeans::new(3, 100).unwrap().fit(&blobs()).unwrap();
        assert_eq!(fit.status, ConvergenceStatus::Converged);
        assert!(same_partition(&fit.labels, &[0, 0, 0, 1, 1, 1, 2, 2]), "labels {:?}", fit.labels);
        assert!(fit.inertia < 1.0, "inertia {}", fit.inertia);
        assert_eq!(fit.members().iter().map(Vec::len).sum::<usize>(), 8);
    }

    #[test]
    fn same_seed_same_partition() {
        let data = blobs();
        let a = KMeans::new(2, 7).unwrap().fit(&data).unwrap();
        let b = KMeans::new(2, 7).unwrap().fit(&data).unwrap();
        assert_eq!(a, b, "identical input and seed must give identical results");
    }

    #[test]
    fn too_many_clusters_reports_counts() {
        let err = KMeans::new(9, 1).unwrap().fit(&blobs()).unwrap_err();
        match err {
            HeatwaveError::InsufficientEvents { requested, available } => {
                assert_eq!((requested, available), (9, 8));
            }
            other => panic!("unexpected error {other}"),
        }
        assert!(matches!(KMeans::new(0, 1), Err(HeatwaveError::InvalidConfig(_))));
    }

    #[test]
    fn iteration_cap_still_yields_labels() {
        // With k = 1 the seed is a data point but the mean is not, so one
        // iteration can never meet a zero tolerance.
        let data = FeatureMatrix::from_rows(&[vec![0.0, 0.0], vec![1.0, 0.0], vec![0.0, 1.0]]);
        let fit = KMeans::new(1, 3)
            .unwrap()
            .with_max_iterations(1)
            .with_tolerance(0.0)
            .fit(&data)
            .unwrap();
        assert_eq!(fit.status, ConvergenceStatus::IterationCapReached);
        assert_eq!(fit.labels, vec![0, 0, 0]);
        assert_eq!(fit.iterations, 1);
    }

    #[test]
    fn duplicate_points_fill_every_cluster() {
        let data = FeatureMatrix::from_rows(&[vec![1.0], vec![1.0], vec![1.0], vec![2.0]]);
        let fit = KMeans::new(3, 5).unwrap().with_n_init(1).fit(&data).unwrap();
        let mut sizes: Vec<usize> = fit.members().iter().map(Vec::len).collect();
        sizes.sort_unstable();
        assert!(sizes.iter().all(|&s| s > 0), "empty family in {sizes:?}");
    }
}
