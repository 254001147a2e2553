//! Node lookups consumed by the search pipeline.

use std::collections::HashMap;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// String properties concatenated into a node's searchable text.
pub const SEARCHABLE_PROPERTIES: &[&str] = &[
    "content",
    "text",
    "title",
    "name",
    "description",
    "path",
    "workerRole",
    "requirements",
];

const PREVIEW_CHARS: usize = 200;

/// A graph node as seen by search.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub id: String,
    #[serde(default)]
    pub labels: Vec<String>,
    #[serde(default)]
    pub properties: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,
}

impl Node {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ..Self::default()
        }
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.labels.push(label.into());
        self
    }

    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }

    pub fn with_embedding(mut self, embedding: Vec<f32>) -> Self {
        self.embedding = Some(embedding);
        self
    }

    /// Non-empty string property.
    pub fn text_property(&self, key: &str) -> Option<&str> {
        self.properties
            .get(key)
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
    }

    /// Searchable string properties joined by spaces.
    pub fn searchable_text(&self) -> String {
        SEARCHABLE_PROPERTIES
            .iter()
            .filter_map(|key| self.text_property(key))
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// First 200 characters of `content`, or of `text`.
    pub fn content_preview(&self) -> Option<String> {
        self.text_property("content")
            .or_else(|| self.text_property("text"))
            .map(|s| truncate(s, PREVIEW_CHARS))
    }

    /// Matches a label or the `type` property, ignoring case.
    pub fn has_type(&self, types: &[String]) -> bool {
        types.iter().any(|t| {
            self.labels.iter().any(|l| l.eq_ignore_ascii_case(t))
                || self
                    .text_property("type")
                    .is_some_and(|nt| nt.eq_ignore_ascii_case(t))
        })
    }
}

fn truncate(s: &str, max_chars: usize) -> String {
    match s.char_indices().nth(max_chars) {
        Some((end, _)) => format!("{}...", &s[..end]),
        None => s.to_string(),
    }
}

/// Read access to stored nodes.
pub trait NodeStore: Send + Sync {
    fn get_node(&self, id: &str) -> Option<Node>;

    fn get_embedding(&self, id: &str) -> Option<Vec<f32>> {
        self.get_node(id).and_then(|n| n.embedding)
    }

    /// Stores or replaces the embedding of an existing node. Returns false
    /// when the node does not exist.
    fn set_embedding(&self, id: &str, embedding: Vec<f32>) -> bool;
}

/// Hash map backed [`NodeStore`].
#[derive(Debug, Default)]
pub struct InMemoryNodeStore {
    nodes: RwLock<HashMap<String, Node>>,
}

impl InMemoryNodeStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, node: Node) {
        self.nodes.write().insert(node.id.clone(), node);
    }

    pub fn len(&self) -> usize {
        self.nodes.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.read().is_empty()
    }

    /// Every node, in no particular order.
    pub fn nodes(&self) -> Vec<Node> {
        self.nodes.read().values().cloned().collect()
    }
}

impl FromIterator<Node> for InMemoryNodeStore {
    fn from_iter<I: IntoIterator<Item = Node>>(iter: I) -> Self {
        let nodes = iter.into_iter().map(|n| (n.id.clone(), n)).collect();
        Self {
            nodes: RwLock::new(nodes),
        }
    }
}

impl NodeStore for InMemoryNodeStore {
    fn get_node(&self, id: &str) -> Option<Node> {
        self.nodes.read().get(id).cloned()
    }

    fn get_embedding(&self, id: &str) -> Option<Vec<f32>> {
        self.nodes.read().get(id).and_then(|n| n.embedding.clone())
    }

    fn set_embedding(&self, id: &str, embedding: Vec<f32>) -> bool {
        match self.nodes.write().get_mut(id) {
            Some(node) => {
                node.embedding = Some(embedding);
                true
            }
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_searchable_text_order() {
        let node = Node::new("n1")
            .with_property("title", "Graph basics")
            .with_property("content", "Nodes and edges")
            .with_property("priority", 3);
        assert_eq!(node.searchable_text(), "Nodes and edges Graph basics");
    }

    #[test]
    fn test_content_preview_truncates_on_char_boundary() {
        let long = "é".repeat(250);
        let node = Node::new("n").with_property("text", long);
        let preview = node.content_preview().unwrap();
        assert_eq!(preview.chars().count(), 203);
        assert!(preview.ends_with("..."));
    }

    #[test]
    fn test_has_type() {
        let node = Node::new("n")
            .with_label("Memory")
            .with_property("type", "todo");
        assert!(node.has_type(&["memory".to_string()]));
        assert!(node.has_type(&["TODO".to_string()]));
        assert!(!node.has_type(&["file".to_string()]));
    }

    #[test]
    fn test_in_memory_store_embeddings() {
        let store: InMemoryNodeStore = [Node::new("a")].into_iter().collect();
        assert!(store.get_embedding("a").is_none());
        assert!(store.set_embedding("a", vec![1.0, 0.0]));
        assert_eq!(store.get_embedding("a"), Some(vec![1.0, 0.0]));
        assert!(!store.set_embedding("missing", vec![1.0]));
        assert_eq!(store.len(), 1);
    }
}
