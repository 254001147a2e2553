//! Named vector-index query procedure for the query layer.
//!
//! Takes an index name, `k`, and a query that is a literal vector, free text
//! embedded on the server, or a bound parameter holding either. Yields
//! `(node, score)` rows, best first.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use serde_json::Value;
use tracing::debug;

use super::store::{Node, NodeStore};
use super::types::{SearchError, SearchOutcome};
use crate::vector::ClusterIndex;

/// Turns query text into an embedding.
pub trait Embedder: Send + Sync {
    fn embed(&self, text: &str) -> SearchOutcome<Vec<f32>>;
}

/// The third argument of a vector query.
#[derive(Debug, Clone, PartialEq)]
pub enum VectorQuery {
    Vector(Vec<f32>),
    Text(String),
    /// Name of a bound parameter, without the `$`.
    Parameter(String),
}

/// Registry of named cluster indexes answering vector queries.
pub struct VectorProcedure {
    indexes: RwLock<HashMap<String, Arc<ClusterIndex>>>,
    store: Arc<dyn NodeStore>,
    embedder: Option<Arc<dyn Embedder>>,
}

impl VectorProcedure {
    pub fn new(store: Arc<dyn NodeStore>) -> Self {
        Self {
            indexes: RwLock::new(HashMap::new()),
            store,
            embedder: None,
        }
    }

    pub fn with_embedder(mut self, embedder: Arc<dyn Embedder>) -> Self {
        self.embedder = Some(embedder);
        self
    }

    /// Registers `index` under `name`, replacing any previous one.
    pub fn register(&self, name: impl Into<String>, index: Arc<ClusterIndex>) {
        let name = name.into();
        debug!("Registered vector index '{name}'");
        self.indexes.write().insert(name, index);
    }

    pub fn drop_index(&self, name: &str) -> bool {
        self.indexes.write().remove(name).is_some()
    }

    pub fn index(&self, name: &str) -> Option<Arc<ClusterIndex>> {
        self.indexes.read().get(name).cloned()
    }

    pub fn index_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.indexes.read().keys().cloned().collect();
        names.sort();
        names
    }

    /// Queries the index `name` for the `k` nearest nodes.
    ///
    /// `k == 0` returns every indexed node. Ids without a stored node are
    /// skipped.
    ///
    /// # Errors
    /// * `IndexNotFound` - no index registered under `name`
    /// * `UnboundParameter` / `InvalidParameter` - bad `$param` reference
    /// * `NoEmbedder` - text query without an embedder
    /// * `Vector` - dimension mismatch or backend failure
    pub fn query_nodes(
        &self,
        name: &str,
        k: usize,
        query: &VectorQuery,
        params: &HashMap<String, Value>,
    ) -> SearchOutcome<Vec<(Node, f32)>> {
        let index = self.index(name).ok_or_else(|| SearchError::IndexNotFound {
            name: name.to_string(),
        })?;
        let vector = self.resolve(query, params)?;

        let k = if k == 0 { index.len() } else { k };
        let probe = index.config().probe_clusters;
        let hits = index.search_with_clusters(&vector, k, probe)?;

        Ok(hits
            .into_iter()
            .filter_map(|hit| {
                let node = self.store.get_node(&hit.id)?;
                Some((node, hit.score))
            })
            .collect())
    }

    fn resolve(&self, query: &VectorQuery, params: &HashMap<String, Value>) -> SearchOutcome<Vec<f32>> {
        match query {
            VectorQuery::Vector(vector) => Ok(vector.clone()),
            VectorQuery::Text(text) => self.embed(text),
            VectorQuery::Parameter(name) => {
                let value = params.get(name).ok_or_else(|| SearchError::UnboundParameter {
                    name: name.clone(),
                })?;
                match value {
                    Value::String(text) => self.embed(text),
                    Value::Array(items) => items
                        .iter()
                        .map(|v| v.as_f64().map(|x| x as f32))
                        .collect::<Option<Vec<f32>>>()
                        .ok_or_else(|| SearchError::InvalidParameter { name: name.clone() }),
                    _ => Err(SearchError::InvalidParameter { name: name.clone() }),
                }
            }
        }
    }

    fn embed(&self, text: &str) -> SearchOutcome<Vec<f32>> {
        let embedder = self.embedder.as_ref().ok_or(SearchError::NoEmbedder)?;
        embedder.embed(text)
    }
}
