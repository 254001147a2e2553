//! Full-text candidate sources.

use parking_lot::Mutex;
use tantivy::collector::TopDocs;
use tantivy::query::QueryParser;
use tantivy::schema::{Field, STORED, STRING, Schema, TEXT, Value};
use tantivy::{Index, IndexReader, IndexWriter, ReloadPolicy, TantivyDocument, Term, doc};
use tracing::debug;

use super::types::{SearchError, SearchOutcome};

const WRITER_HEAP_BYTES: usize = 50_000_000;

/// An id with the score its source assigned, in rank order.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredId {
    pub id: String,
    pub score: f64,
}

impl ScoredId {
    pub fn new(id: impl Into<String>, score: f64) -> Self {
        Self {
            id: id.into(),
            score,
        }
    }
}

/// Ranked keyword candidates for a free-text query.
pub trait Bm25Source: Send + Sync {
    /// Up to `limit` ids, best first.
    fn search(&self, query: &str, limit: usize) -> SearchOutcome<Vec<ScoredId>>;
}

/// In-memory tantivy index over node text.
pub struct TantivyBm25Index {
    index: Index,
    reader: IndexReader,
    writer: Mutex<IndexWriter>,
    id_field: Field,
    body_field: Field,
}

impl std::fmt::Debug for TantivyBm25Index {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TantivyBm25Index")
            .field("documents", &self.num_docs())
            .finish()
    }
}

fn fulltext(operation: &str, e: impl std::fmt::Display) -> SearchError {
    SearchError::FullText(format!("{operation}: {e}"))
}

impl TantivyBm25Index {
    pub fn new() -> SearchOutcome<Self> {
        let mut builder = Schema::builder();
        let id_field = builder.add_text_field("id", STRING | STORED);
        let body_field = builder.add_text_field("body", TEXT);
        let index = Index::create_in_ram(builder.build());

        let writer: IndexWriter = index
            .writer_with_num_threads(1, WRITER_HEAP_BYTES)
            .map_err(|e| fulltext("create writer", e))?;
        let reader: IndexReader = index
            .reader_builder()
            .reload_policy(ReloadPolicy::Manual)
            .try_into()
            .map_err(|e| fulltext("create reader", e))?;

        Ok(Self {
            index,
            reader,
            writer: Mutex::new(writer),
            id_field,
            body_field,
        })
    }

    /// Stages `text` under `id`, replacing any previous document. Visible
    /// to searches after [`Self::commit`].
    pub fn index_document(&self, id: &str, text: &str) -> SearchOutcome<()> {
        let writer = self.writer.lock();
        writer.delete_term(Term::from_field_text(self.id_field, id));
        writer
            .add_document(doc!(self.id_field => id, self.body_field => text))
            .map_err(|e| fulltext("add document", e))?;
        Ok(())
    }

    pub fn remove_document(&self, id: &str) {
        self.writer
            .lock()
            .delete_term(Term::from_field_text(self.id_field, id));
    }

    /// Persists staged changes and refreshes the searcher.
    pub fn commit(&self) -> SearchOutcome<()> {
        self.writer
            .lock()
            .commit()
            .map_err(|e| fulltext("commit", e))?;
        self.reader.reload().map_err(|e| fulltext("reload", e))?;
        Ok(())
    }

    pub fn num_docs(&self) -> u64 {
        self.reader.searcher().num_docs()
    }
}

impl Bm25Source for TantivyBm25Index {
    fn search(&self, query: &str, limit: usize) -> SearchOutcome<Vec<ScoredId>> {
        if limit == 0 || query.trim().is_empty() {
            return Ok(Vec::new());
        }
        let parser = QueryParser::for_index(&self.index, vec![self.body_field]);
        let (parsed, errors) = parser.parse_query_lenient(query);
        if !errors.is_empty() {
            debug!("Lenient query parse dropped {} fragments", errors.len());
        }

        let searcher = self.reader.searcher();
        let top = searcher
            .search(&parsed, &TopDocs::with_limit(limit))
            .map_err(|e| fulltext("search", e))?;

        let mut hits = Vec::with_capacity(top.len());
        for (score, address) in top {
            let document: TantivyDocument = searcher
                .doc(address)
                .map_err(|e| fulltext("load document", e))?;
            if let Some(id) = document.get_first(self.id_field).and_then(|v| v.as_str()) {
                hits.push(ScoredId::new(id, f64::from(score)));
            }
        }
        Ok(hits)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn index() -> TantivyBm25Index {
        let index = TantivyBm25Index::new().unwrap();
        index
            .index_document("rust", "rust ownership and borrowing")
            .unwrap();
        index
            .index_document("go", "go routines and channels")
            .unwrap();
        index
            .index_document("mixed", "rust channels with tokio")
            .unwrap();
        index.commit().unwrap();
        index
    }

    #[test]
    fn test_search_ranks_matches() {
        let index = index();
        let hits = index.search("borrowing", 10).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, "rust");

        let hits = index.search("channels", 10).unwrap();
        let ids: Vec<_> = hits.iter().map(|h| h.id.as_str()).collect();
        assert_eq!(ids.len(), 2);
        assert!(ids.contains(&"go") && ids.contains(&"mixed"));
        assert!(hits.windows(2).all(|w| w[0].score >= w[1].score));
    }

    #[test]
    fn test_reindex_replaces_document() {
        let index = index();
        index.index_document("rust", "completely different").unwrap();
        index.commit().unwrap();

        assert!(index.search("borrowing", 10).unwrap().is_empty());
        assert_eq!(index.num_docs(), 3);
    }

    #[test]
    fn test_remove_document() {
        let index = index();
        index.remove_document("go");
        index.commit().unwrap();
        assert_eq!(index.search("routines", 10).unwrap().len(), 0);
    }

    #[test]
    fn test_empty_query_and_zero_limit() {
        let index = index();
        assert!(index.search("   ", 10).unwrap().is_empty());
        assert!(index.search("rust", 0).unwrap().is_empty());
    }

    #[test]
    fn test_lenient_parsing() {
        let index = index();
        assert!(index.search("rust AND (", 10).is_ok());
    }
}
