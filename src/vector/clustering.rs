//! K-means clustering over flat row-major embedding matrices.
//!
//! Pure functions used by [`super::ClusterIndex`]; they never touch the
//! index lock and take the random source as an argument so clustering can
//! be made reproducible.
//!
//! # Algorithm Details
//! - Distance metric: squared Euclidean (no sqrt in the hot loop)
//! - Initialization: k-means++ or uniform random
//! - Stops when no assignment changes or total centroid movement drops
//!   below the tolerance
//!
//! # Performance Characteristics
//! - O(n * k * d * iterations) time complexity
//! - O(k * d) space for centroids
//! - Assignment step runs across rows with rayon

use std::time::Duration;

use rand::Rng;
use rand::rngs::StdRng;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::types::{VectorError, VectorResult};

/// Lower bound for automatically chosen cluster counts.
pub const MIN_AUTO_CLUSTERS: usize = 10;

/// Upper bound for automatically chosen cluster counts.
pub const MAX_AUTO_CLUSTERS: usize = 1000;

/// Centroid seeding strategy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum InitMethod {
    /// K distinct points chosen uniformly.
    #[serde(rename = "random")]
    Random,
    /// First point uniform, the rest weighted by squared distance to the
    /// nearest chosen centroid.
    #[default]
    #[serde(rename = "kmeans++")]
    KMeansPlusPlus,
}

/// Clustering parameters.
///
/// Every field has a serde default so partial configuration files work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KMeansConfig {
    /// Cluster count. `0` picks one from the population size.
    #[serde(default)]
    pub num_clusters: usize,

    #[serde(default = "default_max_iterations")]
    pub max_iterations: usize,

    /// Stop once the summed centroid movement of an iteration is below this.
    #[serde(default = "default_tolerance")]
    pub tolerance: f32,

    #[serde(default)]
    pub init_method: InitMethod,

    /// Pick the cluster count from the population when `num_clusters` is 0.
    /// With this off, `num_clusters` must be set or clustering fails.
    #[serde(default = "default_true")]
    pub auto_k: bool,

    /// Fraction of the population that may be updated before a rebuild is
    /// recommended.
    #[serde(default = "default_drift_threshold")]
    pub drift_threshold: f64,

    /// Clusters with fewer members are counted as undersized in statistics.
    #[serde(default = "default_min_cluster_size")]
    pub min_cluster_size: usize,

    /// Clusters probed by approximate search.
    #[serde(default = "default_probe_clusters")]
    pub probe_clusters: usize,

    /// A clustering older than this is considered stale. `0` disables the
    /// age check.
    #[serde(default = "default_max_cluster_age_secs")]
    pub max_cluster_age_secs: u64,

    /// Below this population bulk loads stay on brute-force search.
    #[serde(default = "default_min_embeddings_for_clustering")]
    pub min_embeddings_for_clustering: usize,
}

fn default_max_iterations() -> usize {
    100
}
fn default_tolerance() -> f32 {
    1e-4
}
fn default_true() -> bool {
    true
}
fn default_drift_threshold() -> f64 {
    0.1
}
fn default_min_cluster_size() -> usize {
    10
}
fn default_probe_clusters() -> usize {
    3
}
fn default_max_cluster_age_secs() -> u64 {
    3600
}
fn default_min_embeddings_for_clustering() -> usize {
    1000
}

impl Default for KMeansConfig {
    fn default() -> Self {
        Self {
            num_clusters: 0,
            max_iterations: default_max_iterations(),
            tolerance: default_tolerance(),
            init_method: InitMethod::default(),
            auto_k: true,
            drift_threshold: default_drift_threshold(),
            min_cluster_size: default_min_cluster_size(),
            probe_clusters: default_probe_clusters(),
            max_cluster_age_secs: default_max_cluster_age_secs(),
            min_embeddings_for_clustering: default_min_embeddings_for_clustering(),
        }
    }
}

impl KMeansConfig {
    /// Config with an explicit cluster count.
    pub fn with_clusters(num_clusters: usize) -> Self {
        Self {
            num_clusters,
            ..Self::default()
        }
    }

    pub fn max_cluster_age(&self) -> Duration {
        Duration::from_secs(self.max_cluster_age_secs)
    }

    /// Cluster count for a population of `n` points.
    ///
    /// An explicit `num_clusters` wins; otherwise [`optimal_k`] applies when
    /// `auto_k` is set. The result never exceeds `n`.
    pub fn resolve_k(&self, n: usize) -> VectorResult<usize> {
        let k = match (self.num_clusters, self.auto_k) {
            (0, true) => optimal_k(n),
            (0, false) => return Err(VectorError::ClusterCountUnset),
            (k, _) => k,
        };
        Ok(k.min(n))
    }
}

/// `clamp(round(sqrt(n / 2)), 10, 1000)`.
pub fn optimal_k(n: usize) -> usize {
    let k = (n as f64 / 2.0).sqrt().round() as usize;
    k.clamp(MIN_AUTO_CLUSTERS, MAX_AUTO_CLUSTERS)
}

/// Result of a k-means run.
#[derive(Debug, Clone, PartialEq)]
pub struct KMeansResult {
    /// One centroid per cluster, each `dims` long.
    pub centroids: Vec<Vec<f32>>,

    /// Cluster index for each input row.
    pub assignments: Vec<usize>,

    /// Iterations executed.
    pub iterations: usize,

    /// False when `max_iterations` was hit first.
    pub converged: bool,
}

#[inline]
pub fn squared_euclidean(a: &[f32], b: &[f32]) -> f32 {
    debug_assert_eq!(a.len(), b.len(), "Vectors must have same dimension");
    a.iter()
        .zip(b)
        .map(|(x, y)| {
            let d = x - y;
            d * d
        })
        .sum()
}

/// Index of the centroid closest to `point`, `None` without centroids.
///
/// Equal distances resolve to the lower index.
pub fn nearest_centroid(point: &[f32], centroids: &[Vec<f32>]) -> Option<usize> {
    let mut best: Option<(usize, f32)> = None;
    for (i, centroid) in centroids.iter().enumerate() {
        let distance = squared_euclidean(point, centroid);
        if best.is_none_or(|(_, d)| distance < d) {
            best = Some((i, distance));
        }
    }
    best.map(|(i, _)| i)
}

/// Up to `m` distinct centroid indices ordered by ascending distance.
pub fn nearest_centroids(point: &[f32], centroids: &[Vec<f32>], m: usize) -> Vec<usize> {
    let mut ranked: Vec<(usize, f32)> = centroids
        .iter()
        .enumerate()
        .map(|(i, c)| (i, squared_euclidean(point, c)))
        .collect();
    ranked.sort_by(|a, b| a.1.total_cmp(&b.1));
    ranked.into_iter().take(m).map(|(i, _)| i).collect()
}

/// Clusters `rows` (row-major, `dims` wide) into `k` groups.
///
/// # Arguments
/// * `rows` - Flat matrix of `n * dims` floats
/// * `dims` - Row width
/// * `k` - Cluster count, `1..=n`
/// * `config` - Iteration limit, tolerance and seeding method
/// * `rng` - Random source for seeding
///
/// # Algorithm
/// 1. Seed `k` centroids with the configured method
/// 2. Repeat up to `max_iterations` times:
///    - Assign every row to its nearest centroid
///    - Move each centroid to the mean of its rows (empty clusters keep
///      their previous centroid)
///    - Stop when nothing was reassigned or movement is below tolerance
#[must_use = "clustering results should be used or the computation is wasted"]
pub fn kmeans(
    rows: &[f32],
    dims: usize,
    k: usize,
    config: &KMeansConfig,
    rng: &mut StdRng,
) -> VectorResult<KMeansResult> {
    if dims == 0 || rows.len() % dims != 0 {
        return Err(VectorError::ClusteringFailed(format!(
            "{} floats do not form rows of width {dims}",
            rows.len()
        )));
    }
    let n = rows.len() / dims;
    if k == 0 || k > n {
        return Err(VectorError::ClusteringFailed(format!(
            "invalid cluster count {k} for {n} vectors"
        )));
    }

    let mut centroids = match config.init_method {
        InitMethod::Random => seed_random(rows, dims, k, rng),
        InitMethod::KMeansPlusPlus => seed_kmeans_plus_plus(rows, dims, k, rng),
    };

    let mut assignments = vec![usize::MAX; n];
    let mut iterations = 0;
    let mut converged = false;

    for _ in 0..config.max_iterations.max(1) {
        iterations += 1;

        let next = assign(rows, dims, &centroids);
        let changed = next
            .iter()
            .zip(&assignments)
            .filter(|(a, b)| a != b)
            .count();
        assignments = next;

        let movement = recompute_centroids(rows, dims, &assignments, &mut centroids);

        if changed == 0 || movement < config.tolerance {
            converged = true;
            break;
        }
    }

    debug!("k-means: k={k}, n={n}, iterations={iterations}, converged={converged}");

    Ok(KMeansResult {
        centroids,
        assignments,
        iterations,
        converged,
    })
}

/// Nearest-centroid assignment for every row.
pub(crate) fn assign(rows: &[f32], dims: usize, centroids: &[Vec<f32>]) -> Vec<usize> {
    rows.par_chunks(dims)
        .map(|row| nearest_centroid(row, centroids).unwrap_or(0))
        .collect()
}

/// Moves each centroid to the mean of its assigned rows and returns the
/// summed Euclidean movement.
fn recompute_centroids(
    rows: &[f32],
    dims: usize,
    assignments: &[usize],
    centroids: &mut [Vec<f32>],
) -> f32 {
    let k = centroids.len();
    let mut sums = vec![vec![0.0f64; dims]; k];
    let mut counts = vec![0usize; k];

    for (row, &cluster) in rows.chunks(dims).zip(assignments) {
        for (sum, &x) in sums[cluster].iter_mut().zip(row) {
            *sum += f64::from(x);
        }
        counts[cluster] += 1;
    }

    let mut movement = 0.0f32;
    for ((centroid, sum), count) in centroids.iter_mut().zip(sums).zip(counts) {
        if count == 0 {
            continue;
        }
        let mean: Vec<f32> = sum.iter().map(|s| (s / count as f64) as f32).collect();
        movement += squared_euclidean(centroid, &mean).sqrt();
        *centroid = mean;
    }
    movement
}

/// Mean of the given rows, `None` when `members` is empty.
pub(crate) fn mean_of(
    rows: &[f32],
    dims: usize,
    members: impl IntoIterator<Item = usize>,
) -> Option<Vec<f32>> {
    let mut sum = vec![0.0f64; dims];
    let mut count = 0usize;
    for p in members {
        for (s, &x) in sum.iter_mut().zip(&rows[p * dims..(p + 1) * dims]) {
            *s += f64::from(x);
        }
        count += 1;
    }
    (count > 0).then(|| sum.iter().map(|s| (s / count as f64) as f32).collect())
}

fn row(rows: &[f32], dims: usize, i: usize) -> Vec<f32> {
    rows[i * dims..(i + 1) * dims].to_vec()
}

fn seed_random(rows: &[f32], dims: usize, k: usize, rng: &mut StdRng) -> Vec<Vec<f32>> {
    let n = rows.len() / dims;
    rand::seq::index::sample(rng, n, k)
        .into_vec()
        .into_iter()
        .map(|i| row(rows, dims, i))
        .collect()
}

fn seed_kmeans_plus_plus(rows: &[f32], dims: usize, k: usize, rng: &mut StdRng) -> Vec<Vec<f32>> {
    let n = rows.len() / dims;
    let mut chosen = vec![false; n];
    let mut centroids = Vec::with_capacity(k);

    let first = rng.random_range(0..n);
    chosen[first] = true;
    centroids.push(row(rows, dims, first));

    // distance of every row to its nearest chosen centroid
    let mut nearest: Vec<f64> = rows
        .par_chunks(dims)
        .map(|r| f64::from(squared_euclidean(r, &centroids[0])))
        .collect();

    while centroids.len() < k {
        let total: f64 = nearest.iter().sum();

        let next = if total > f64::EPSILON {
            let target = rng.random::<f64>() * total;
            let mut cumulative = 0.0;
            let mut pick = None;
            for (i, &d) in nearest.iter().enumerate() {
                cumulative += d;
                if cumulative >= target && !chosen[i] {
                    pick = Some(i);
                    break;
                }
            }
            pick.or_else(|| (0..n).rev().find(|&i| !chosen[i] && nearest[i] > 0.0))
        } else {
            None
        };

        // every remaining row coincides with a centroid
        let next = match next {
            Some(i) => i,
            None => {
                let remaining: Vec<usize> = (0..n).filter(|&i| !chosen[i]).collect();
                remaining[rng.random_range(0..remaining.len())]
            }
        };

        chosen[next] = true;
        let centroid = row(rows, dims, next);
        nearest
            .par_iter_mut()
            .zip(rows.par_chunks(dims))
            .for_each(|(d, r)| *d = d.min(f64::from(squared_euclidean(r, &centroid))));
        centroids.push(centroid);
    }

    centroids
}
