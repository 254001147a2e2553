//! Flat embedding storage and brute-force cosine search.

use std::collections::HashMap;

use parking_lot::RwLock;
use tracing::debug;

use super::types::{SearchResult, VectorDimension, VectorError, VectorResult, sort_by_score};
use crate::gpu::{Accelerator, TopK, normalize_in_place};

/// Contiguous row storage shared by the flat and clustered indexes.
///
/// Rows are kept twice: the raw vector as inserted and a unit-normalized copy
/// that similarity search runs against. Row `i` belongs to `ids[i]`, so
/// positions double as insertion order for tie-breaking.
#[derive(Debug, Default)]
pub(crate) struct EmbeddingStore {
    ids: Vec<String>,
    positions: HashMap<String, usize>,
    raw: Vec<f32>,
    normalized: Vec<f32>,
    dims: Option<VectorDimension>,
}

impl EmbeddingStore {
    pub(crate) fn len(&self) -> usize {
        self.ids.len()
    }

    pub(crate) fn dims(&self) -> usize {
        self.dims.map_or(0, |d| d.get())
    }

    pub(crate) fn contains(&self, id: &str) -> bool {
        self.positions.contains_key(id)
    }

    pub(crate) fn position(&self, id: &str) -> Option<usize> {
        self.positions.get(id).copied()
    }

    pub(crate) fn id_at(&self, position: usize) -> &str {
        &self.ids[position]
    }

    pub(crate) fn ids(&self) -> &[String] {
        &self.ids
    }

    /// Raw row as inserted.
    pub(crate) fn raw_row(&self, position: usize) -> &[f32] {
        let dims = self.dims();
        &self.raw[position * dims..(position + 1) * dims]
    }

    /// Unit-normalized row used for similarity and clustering.
    pub(crate) fn normalized_row(&self, position: usize) -> &[f32] {
        let dims = self.dims();
        &self.normalized[position * dims..(position + 1) * dims]
    }

    pub(crate) fn normalized_rows(&self) -> &[f32] {
        &self.normalized
    }

    pub(crate) fn get(&self, id: &str) -> Option<Vec<f32>> {
        self.position(id).map(|p| self.raw_row(p).to_vec())
    }

    /// Checks a vector against the index dimension without touching state.
    ///
    /// An index that has never seen a vector accepts any non-empty length.
    pub(crate) fn validate(&self, vector: &[f32]) -> VectorResult<()> {
        if vector.is_empty() {
            return Err(VectorError::EmptyVector);
        }
        match self.dims {
            Some(dims) => dims.validate_vector(vector),
            None => Ok(()),
        }
    }

    /// Inserts or replaces a vector. Returns its row position and whether
    /// the id was new.
    pub(crate) fn upsert(&mut self, id: &str, vector: &[f32]) -> VectorResult<(usize, bool)> {
        self.validate(vector)?;
        if vector.iter().any(|x| !x.is_finite()) {
            return Err(VectorError::NonFinite { id: id.to_string() });
        }
        let dims = match self.dims {
            Some(dims) => dims,
            None => {
                let dims = VectorDimension::new(vector.len())?;
                debug!("Embedding dimension fixed at {}", dims.get());
                self.dims = Some(dims);
                dims
            }
        }
        .get();

        let mut unit = vector.to_vec();
        normalize_in_place(&mut unit);

        if let Some(position) = self.position(id) {
            let range = position * dims..(position + 1) * dims;
            self.raw[range.clone()].copy_from_slice(vector);
            self.normalized[range].copy_from_slice(&unit);
            return Ok((position, false));
        }

        let position = self.ids.len();
        self.ids.push(id.to_string());
        self.positions.insert(id.to_string(), position);
        self.raw.extend_from_slice(vector);
        self.normalized.extend_from_slice(&unit);
        Ok((position, true))
    }

    /// Brute-force search across every row.
    pub(crate) fn search_all(
        &self,
        accelerator: &Accelerator,
        query: &[f32],
        top_k: usize,
    ) -> VectorResult<Vec<SearchResult>> {
        if self.ids.is_empty() || top_k == 0 {
            return Ok(Vec::new());
        }
        self.validate(query)?;
        let unit_query = unit(query);
        let top = accelerator.search(
            &self.normalized,
            &unit_query,
            self.len(),
            self.dims(),
            top_k,
            true,
        )?;
        Ok(self.collect(&top, |i| i))
    }

    /// Search restricted to the given row positions.
    ///
    /// `positions` must be sorted ascending so ties fall back to insertion
    /// order, exactly as in [`Self::search_all`].
    pub(crate) fn search_positions(
        &self,
        accelerator: &Accelerator,
        query: &[f32],
        positions: &[usize],
        top_k: usize,
    ) -> VectorResult<Vec<SearchResult>> {
        if positions.is_empty() || top_k == 0 {
            return Ok(Vec::new());
        }
        let dims = self.dims();
        let mut rows = Vec::with_capacity(positions.len() * dims);
        for &p in positions {
            rows.extend_from_slice(&self.normalized[p * dims..(p + 1) * dims]);
        }
        let unit_query = unit(query);
        let top = accelerator.search(
            &rows,
            &unit_query,
            positions.len(),
            dims,
            top_k.min(positions.len()),
            true,
        )?;
        Ok(self.collect(&top, |i| positions[i]))
    }

    fn collect(&self, top: &TopK, to_position: impl Fn(usize) -> usize) -> Vec<SearchResult> {
        let mut results: Vec<SearchResult> = top
            .iter()
            .map(|(i, score)| SearchResult::new(self.ids[to_position(i)].clone(), score))
            .collect();
        sort_by_score(&mut results);
        results
    }
}

fn unit(vector: &[f32]) -> Vec<f32> {
    let mut v = vector.to_vec();
    normalize_in_place(&mut v);
    v
}

/// Flat index: every query is compared against every stored vector.
///
/// The dimension is fixed by the first insert. Reads run concurrently;
/// writes take the lock exclusively.
#[derive(Debug)]
pub struct EmbeddingIndex {
    store: RwLock<EmbeddingStore>,
    accelerator: Accelerator,
}

impl Default for EmbeddingIndex {
    fn default() -> Self {
        Self::new()
    }
}

impl EmbeddingIndex {
    /// Creates an empty index backed by the CPU.
    pub fn new() -> Self {
        Self::with_accelerator(Accelerator::cpu())
    }

    pub fn with_accelerator(accelerator: Accelerator) -> Self {
        Self {
            store: RwLock::new(EmbeddingStore::default()),
            accelerator,
        }
    }

    /// Adds or replaces the vector stored under `id`.
    ///
    /// # Errors
    /// - `DimensionMismatch` once the dimension is fixed and `vector` differs
    /// - `EmptyVector` for a zero-length vector
    /// - `NonFinite` if any component is NaN or infinite
    pub fn add(&self, id: &str, vector: &[f32]) -> VectorResult<()> {
        self.store.write().upsert(id, vector).map(|_| ())
    }

    /// Returns the `min(top_k, len)` most similar vectors by cosine
    /// similarity, highest first. Equal scores keep insertion order.
    #[must_use = "Search results should be used or explicitly ignored"]
    pub fn search(&self, query: &[f32], top_k: usize) -> VectorResult<Vec<SearchResult>> {
        self.store
            .read()
            .search_all(&self.accelerator, query, top_k)
    }

    /// Fixed dimension, or 0 before the first insert.
    pub fn dimensions(&self) -> usize {
        self.store.read().dims()
    }

    pub fn len(&self) -> usize {
        self.store.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, id: &str) -> bool {
        self.store.read().contains(id)
    }

    /// Copy of the vector stored under `id`, as inserted.
    pub fn get(&self, id: &str) -> Option<Vec<f32>> {
        self.store.read().get(id)
    }

    pub fn accelerator(&self) -> &Accelerator {
        &self.accelerator
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn index_with(vectors: &[(&str, Vec<f32>)]) -> EmbeddingIndex {
        let index = EmbeddingIndex::new();
        for (id, v) in vectors {
            index.add(id, v).unwrap();
        }
        index
    }

    #[test]
    fn test_dimension_fixed_by_first_insert() {
        let index = EmbeddingIndex::new();
        assert_eq!(index.dimensions(), 0);

        index.add("a", &[1.0, 0.0, 0.0]).unwrap();
        assert_eq!(index.dimensions(), 3);

        let err = index.add("b", &[1.0, 0.0]).unwrap_err();
        assert!(matches!(
            err,
            VectorError::DimensionMismatch {
                expected: 3,
                actual: 2
            }
        ));
        assert_eq!(index.len(), 1);
    }

    #[test]
    fn test_add_upserts() {
        let index = index_with(&[("a", vec![1.0, 0.0]), ("b", vec![0.0, 1.0])]);
        index.add("a", &[0.0, 2.0]).unwrap();

        assert_eq!(index.len(), 2);
        assert_eq!(index.get("a"), Some(vec![0.0, 2.0]));
        let results = index.search(&[0.0, 1.0], 2).unwrap();
        assert!((results[0].score - 1.0).abs() < 1e-6);
        assert!((results[1].score - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_rejects_empty_and_non_finite() {
        let index = EmbeddingIndex::new();
        assert!(matches!(index.add("a", &[]), Err(VectorError::EmptyVector)));
        assert!(matches!(
            index.add("a", &[f32::NAN, 1.0]),
            Err(VectorError::NonFinite { .. })
        ));
        assert!(index.is_empty());
    }

    #[test]
    fn test_search_returns_min_k_n_sorted() {
        let index = index_with(&[
            ("x", vec![1.0, 0.0]),
            ("y", vec![0.0, 1.0]),
            ("xy", vec![1.0, 1.0]),
        ]);

        let results = index.search(&[1.0, 0.1], 10).unwrap();
        assert_eq!(results.len(), 3);
        assert_eq!(results[0].id, "x");
        assert_eq!(results[1].id, "xy");
        assert!(results.windows(2).all(|w| w[0].score >= w[1].score));

        let results = index.search(&[1.0, 0.1], 1).unwrap();
        assert_eq!(results.len(), 1);
    }

    #[test]
    fn test_ties_keep_insertion_order() {
        let index = index_with(&[
            ("first", vec![1.0, 0.0]),
            ("second", vec![2.0, 0.0]),
            ("third", vec![3.0, 0.0]),
        ]);
        let ids: Vec<_> = index
            .search(&[1.0, 0.0], 3)
            .unwrap()
            .into_iter()
            .map(|r| r.id)
            .collect();
        assert_eq!(ids, vec!["first", "second", "third"]);
    }

    #[test]
    fn test_search_empty_index() {
        let index = EmbeddingIndex::new();
        assert!(index.search(&[1.0, 0.0], 5).unwrap().is_empty());
    }

    #[test]
    fn test_search_wrong_dimension() {
        let index = index_with(&[("a", vec![1.0, 0.0])]);
        assert!(matches!(
            index.search(&[1.0, 0.0, 0.0], 1),
            Err(VectorError::DimensionMismatch { .. })
        ));
    }

    #[test]
    fn test_store_search_positions_subset() {
        let mut store = EmbeddingStore::default();
        store.upsert("a", &[1.0, 0.0]).unwrap();
        store.upsert("b", &[0.0, 1.0]).unwrap();
        store.upsert("c", &[0.7, 0.7]).unwrap();

        let accelerator = Accelerator::cpu();
        let results = store
            .search_positions(&accelerator, &[1.0, 0.0], &[1, 2], 5)
            .unwrap();
        let ids: Vec<_> = results.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["c", "b"]);
    }
}
