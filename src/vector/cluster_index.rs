//! IVF-style approximate search over a k-means partition of the flat store.
//!
//! # Lifecycle
//! `unclustered -> clustered -> stale -> clustered`. Searches before the
//! first [`ClusterIndex::cluster`] fall back to brute force over every row.
//! Updates after clustering are placed in their nearest existing cluster and
//! counted as drift until the next full rebuild or
//! [`ClusterIndex::update_centroids_batch`].

use std::collections::BTreeSet;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use rand::SeedableRng;
use rand::rngs::StdRng;
use serde::Serialize;
use tracing::{debug, info};

use super::clustering::{
    KMeansConfig, kmeans, mean_of, nearest_centroid, nearest_centroids, squared_euclidean,
};
use super::index::EmbeddingStore;
use super::types::{SearchResult, VectorError, VectorResult};
use crate::gpu::{Accelerator, normalize_in_place};

/// Read-only snapshot of the clustering state.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ClusterStats {
    pub embedding_count: usize,
    pub num_clusters: usize,
    pub iterations: usize,
    /// Wall-clock time of the last full clustering run.
    pub last_cluster_duration: Duration,
    pub last_clustered_at: Option<DateTime<Utc>>,
    pub min_cluster_size: usize,
    pub avg_cluster_size: f64,
    pub max_cluster_size: usize,
    /// Clusters below the configured minimum size.
    pub undersized_clusters: usize,
    /// Mean centroid movement of the last batch centroid update.
    pub centroid_drift: f32,
    /// Updates applied since the last rebuild or batch update.
    pub pending_updates: usize,
    pub clustered: bool,
}

#[derive(Debug, Clone, Copy)]
struct Reassignment {
    from: Option<usize>,
    to: usize,
}

#[derive(Debug)]
struct ClusterState {
    store: EmbeddingStore,
    centroids: Vec<Vec<f32>>,
    /// Cluster of each row position.
    assignments: Vec<usize>,
    /// Row positions of each cluster.
    members: Vec<Vec<usize>>,
    pending: Vec<Reassignment>,
    updates_since_cluster: usize,
    clustered: bool,
    iterations: usize,
    last_duration: Duration,
    last_clustered_at: Option<DateTime<Utc>>,
    maintained_at: Option<Instant>,
    centroid_drift: f32,
    rng: StdRng,
}

impl ClusterState {
    fn new(rng: StdRng) -> Self {
        Self {
            store: EmbeddingStore::default(),
            centroids: Vec::new(),
            assignments: Vec::new(),
            members: Vec::new(),
            pending: Vec::new(),
            updates_since_cluster: 0,
            clustered: false,
            iterations: 0,
            last_duration: Duration::ZERO,
            last_clustered_at: None,
            maintained_at: None,
            centroid_drift: 0.0,
            rng,
        }
    }

    fn unit_query(&self, query: &[f32]) -> VectorResult<Vec<f32>> {
        self.store.validate(query)?;
        let mut unit = query.to_vec();
        normalize_in_place(&mut unit);
        Ok(unit)
    }

    fn detach(&mut self, position: usize, cluster: usize) {
        let members = &mut self.members[cluster];
        if let Some(i) = members.iter().position(|&p| p == position) {
            members.swap_remove(i);
        }
    }
}

/// Flat embedding store partitioned by k-means for approximate search.
///
/// One read-write lock guards the store and the clustering state together,
/// so every operation sees a consistent partition.
#[derive(Debug)]
pub struct ClusterIndex {
    state: RwLock<ClusterState>,
    config: KMeansConfig,
    accelerator: Accelerator,
}

impl ClusterIndex {
    /// Creates an empty CPU-backed index seeded from the OS.
    pub fn new(config: KMeansConfig) -> Self {
        Self::with_accelerator(config, Accelerator::cpu())
    }

    pub fn with_accelerator(config: KMeansConfig, accelerator: Accelerator) -> Self {
        Self {
            state: RwLock::new(ClusterState::new(StdRng::from_os_rng())),
            config,
            accelerator,
        }
    }

    /// Replaces the random source used to seed centroids.
    pub fn with_rng(mut self, rng: StdRng) -> Self {
        self.state.get_mut().rng = rng;
        self
    }

    /// Shorthand for [`Self::with_rng`] with a fixed seed.
    pub fn with_seed(self, seed: u64) -> Self {
        self.with_rng(StdRng::seed_from_u64(seed))
    }

    pub fn config(&self) -> &KMeansConfig {
        &self.config
    }

    pub fn accelerator(&self) -> &Accelerator {
        &self.accelerator
    }

    /// Adds or replaces an embedding.
    ///
    /// Equivalent to [`Self::on_node_update`]: once clustered, the vector is
    /// placed in its nearest cluster and counted towards drift.
    pub fn add(&self, id: &str, vector: &[f32]) -> VectorResult<()> {
        self.on_node_update(id, vector)
    }

    /// Partitions every stored embedding into `K` clusters.
    ///
    /// `K` comes from [`KMeansConfig::resolve_k`] and is capped at the
    /// population size. An empty index is left unclustered without error.
    pub fn cluster(&self) -> VectorResult<()> {
        let mut guard = self.state.write();
        let state = &mut *guard;

        let n = state.store.len();
        if n == 0 {
            debug!("Cluster requested on an empty index, nothing to do");
            return Ok(());
        }
        let k = self.config.resolve_k(n)?;
        let dims = state.store.dims();

        info!("Clustering {n} embeddings into {k} clusters");
        let start = Instant::now();
        let result = kmeans(
            state.store.normalized_rows(),
            dims,
            k,
            &self.config,
            &mut state.rng,
        )?;

        let mut members = vec![Vec::new(); k];
        for (position, &cluster) in result.assignments.iter().enumerate() {
            members[cluster].push(position);
        }

        state.centroids = result.centroids;
        state.assignments = result.assignments;
        state.members = members;
        state.pending.clear();
        state.updates_since_cluster = 0;
        state.iterations = result.iterations;
        state.last_duration = start.elapsed();
        state.last_clustered_at = Some(Utc::now());
        state.maintained_at = Some(Instant::now());
        state.centroid_drift = 0.0;
        state.clustered = true;

        info!(
            "Clustering finished: k={k}, iterations={}, converged={}, took {:?}",
            state.iterations, result.converged, state.last_duration
        );
        Ok(())
    }

    /// Clusters after a bulk load once the population reaches
    /// `min_embeddings_for_clustering`. Returns whether clustering ran.
    pub fn cluster_if_ready(&self) -> VectorResult<bool> {
        let n = self.len();
        if n < self.config.min_embeddings_for_clustering.max(1) {
            debug!(
                "{n} embeddings, below {} needed for clustering",
                self.config.min_embeddings_for_clustering
            );
            return Ok(false);
        }
        self.cluster()?;
        Ok(true)
    }

    pub fn is_clustered(&self) -> bool {
        self.state.read().clustered
    }

    /// Cluster count, 0 before clustering.
    pub fn num_clusters(&self) -> usize {
        self.state.read().centroids.len()
    }

    pub fn stats(&self) -> ClusterStats {
        let state = self.state.read();
        let mut stats = ClusterStats {
            embedding_count: state.store.len(),
            num_clusters: state.centroids.len(),
            iterations: state.iterations,
            last_cluster_duration: state.last_duration,
            last_clustered_at: state.last_clustered_at,
            centroid_drift: state.centroid_drift,
            pending_updates: state.updates_since_cluster,
            clustered: state.clustered,
            ..ClusterStats::default()
        };

        if !state.members.is_empty() {
            let sizes = state.members.iter().map(Vec::len);
            stats.min_cluster_size = sizes.clone().min().unwrap_or(0);
            stats.max_cluster_size = sizes.clone().max().unwrap_or(0);
            stats.avg_cluster_size = sizes.clone().sum::<usize>() as f64 / state.members.len() as f64;
            stats.undersized_clusters = sizes
                .filter(|&s| s < self.config.min_cluster_size)
                .count();
        }
        stats
    }

    /// Cluster whose centroid is closest to `query`.
    ///
    /// `None` before clustering or when the query width does not match.
    pub fn find_nearest_centroid(&self, query: &[f32]) -> Option<usize> {
        let state = self.state.read();
        if !state.clustered {
            return None;
        }
        let unit = state.unit_query(query).ok()?;
        nearest_centroid(&unit, &state.centroids)
    }

    /// Up to `m` distinct clusters ordered by ascending centroid distance.
    ///
    /// Empty before clustering or when the query width does not match.
    pub fn find_nearest_clusters(&self, query: &[f32], m: usize) -> Vec<usize> {
        let state = self.state.read();
        if !state.clustered {
            return Vec::new();
        }
        match state.unit_query(query) {
            Ok(unit) => nearest_centroids(&unit, &state.centroids, m),
            Err(_) => Vec::new(),
        }
    }

    /// Ids of every member of the given clusters, `None` before clustering.
    ///
    /// Unknown and repeated cluster indices are skipped.
    pub fn get_cluster_members(&self, cluster_ids: &[usize]) -> Option<Vec<String>> {
        let state = self.state.read();
        if !state.clustered {
            return None;
        }
        let unique: BTreeSet<usize> = cluster_ids.iter().copied().collect();
        let ids = unique
            .into_iter()
            .filter_map(|c| state.members.get(c))
            .flatten()
            .map(|&p| state.store.id_at(p).to_string())
            .collect();
        Some(ids)
    }

    /// Brute-force search over every embedding.
    #[must_use = "Search results should be used or explicitly ignored"]
    pub fn search(&self, query: &[f32], top_k: usize) -> VectorResult<Vec<SearchResult>> {
        self.state
            .read()
            .store
            .search_all(&self.accelerator, query, top_k)
    }

    /// Approximate search over the `probe_clusters` nearest clusters.
    ///
    /// # Arguments
    /// * `query` - Query vector, same width as the stored embeddings
    /// * `top_k` - Maximum results
    /// * `probe_clusters` - Clusters to scan, raised to at least 1
    ///
    /// # Returns
    /// Hits sorted by descending cosine similarity. Before clustering this
    /// is exactly [`Self::search`]; probing every cluster matches it too.
    #[must_use = "Search results should be used or explicitly ignored"]
    pub fn search_with_clusters(
        &self,
        query: &[f32],
        top_k: usize,
        probe_clusters: usize,
    ) -> VectorResult<Vec<SearchResult>> {
        let state = self.state.read();
        if !state.clustered {
            debug!("Index not clustered, falling back to brute-force search");
            return state.store.search_all(&self.accelerator, query, top_k);
        }

        let unit = state.unit_query(query)?;
        let clusters = nearest_centroids(&unit, &state.centroids, probe_clusters.max(1));
        let mut positions: Vec<usize> = clusters
            .iter()
            .flat_map(|&c| state.members[c].iter().copied())
            .collect();
        positions.sort_unstable();

        debug!(
            "Probing {} clusters, {} candidates",
            clusters.len(),
            positions.len()
        );
        state
            .store
            .search_positions(&self.accelerator, query, &positions, top_k)
    }

    /// Exact search restricted to `candidate_ids`.
    ///
    /// Unknown ids are ignored; an empty candidate set yields no results.
    ///
    /// # Errors
    /// `DimensionMismatch` when the query width differs from the index. No
    /// state is touched on error.
    #[must_use = "Search results should be used or explicitly ignored"]
    pub fn search_candidates<S: AsRef<str>>(
        &self,
        query: &[f32],
        candidate_ids: &[S],
        top_k: usize,
    ) -> VectorResult<Vec<SearchResult>> {
        let state = self.state.read();
        if state.store.dims() > 0 && query.len() != state.store.dims() {
            return Err(VectorError::DimensionMismatch {
                expected: state.store.dims(),
                actual: query.len(),
            });
        }
        let mut positions: Vec<usize> = candidate_ids
            .iter()
            .filter_map(|id| state.store.position(id.as_ref()))
            .collect();
        positions.sort_unstable();
        positions.dedup();

        let top_k = top_k.min(positions.len());
        state
            .store
            .search_positions(&self.accelerator, query, &positions, top_k)
    }

    /// Upserts an embedding and keeps the partition consistent.
    ///
    /// Once clustered, the row moves to its nearest current centroid
    /// without recomputing any centroid, and the drift counter grows.
    pub fn on_node_update(&self, id: &str, vector: &[f32]) -> VectorResult<()> {
        let mut guard = self.state.write();
        let state = &mut *guard;

        let (position, is_new) = state.store.upsert(id, vector)?;
        if !state.clustered {
            return Ok(());
        }

        let target = nearest_centroid(state.store.normalized_row(position), &state.centroids)
            .unwrap_or(0);

        let from = if is_new {
            state.assignments.push(target);
            state.members[target].push(position);
            None
        } else {
            let previous = state.assignments[position];
            if previous != target {
                state.detach(position, previous);
                state.members[target].push(position);
                state.assignments[position] = target;
            }
            Some(previous)
        };

        state.pending.push(Reassignment { from, to: target });
        state.updates_since_cluster += 1;
        Ok(())
    }

    /// Whether a full [`Self::cluster`] is due.
    ///
    /// True once more than `drift_threshold` of the population has been
    /// updated, or the partition is older than a non-zero `max_cluster_age`.
    pub fn should_recluster(&self) -> bool {
        let state = self.state.read();
        if !state.clustered || state.store.len() == 0 {
            return false;
        }
        let ratio = state.updates_since_cluster as f64 / state.store.len() as f64;
        if ratio > self.config.drift_threshold {
            debug!("Recluster due: {:.1}% of embeddings updated", ratio * 100.0);
            return true;
        }
        state
            .maintained_at
            .is_some_and(|at| {
                self.config.max_cluster_age_secs > 0 && at.elapsed() > self.config.max_cluster_age()
            })
    }

    /// Moves centroids to the mean of their current members.
    ///
    /// Only clusters touched by pending updates are recomputed; with no
    /// pending updates every cluster is. Membership and `K` are unchanged.
    /// Resets the drift counter.
    pub fn update_centroids_batch(&self) {
        let mut guard = self.state.write();
        let state = &mut *guard;
        if !state.clustered {
            return;
        }

        let affected: BTreeSet<usize> = if state.pending.is_empty() {
            (0..state.centroids.len()).collect()
        } else {
            state
                .pending
                .iter()
                .flat_map(|r| r.from.into_iter().chain(std::iter::once(r.to)))
                .collect()
        };

        let dims = state.store.dims();
        let rows = state.store.normalized_rows();
        let mut movement = 0.0f32;
        let mut moved = 0usize;
        for &c in &affected {
            if let Some(mean) = mean_of(rows, dims, state.members[c].iter().copied()) {
                movement += squared_euclidean(&state.centroids[c], &mean).sqrt();
                state.centroids[c] = mean;
                moved += 1;
            }
        }

        state.centroid_drift = if moved > 0 {
            movement / moved as f32
        } else {
            0.0
        };
        state.pending.clear();
        state.updates_since_cluster = 0;
        state.maintained_at = Some(Instant::now());
        debug!(
            "Recomputed {moved} centroids, mean drift {:.6}",
            state.centroid_drift
        );
    }

    pub fn dimensions(&self) -> usize {
        self.state.read().store.dims()
    }

    pub fn len(&self) -> usize {
        self.state.read().store.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, id: &str) -> bool {
        self.state.read().store.contains(id)
    }

    pub fn get(&self, id: &str) -> Option<Vec<f32>> {
        self.state.read().store.get(id)
    }

    /// Every stored id in insertion order.
    pub fn ids(&self) -> Vec<String> {
        self.state.read().store.ids().to_vec()
    }

    #[cfg(test)]
    fn centroids(&self) -> Vec<Vec<f32>> {
        self.state.read().centroids.clone()
    }
}
