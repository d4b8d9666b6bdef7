//! Storage contracts consumed by the ingestion pipeline and the retriever.
//!
//! The [`VectorStore`] and [`KeywordStore`] traits are the narrow seams to
//! the heterogeneous index backends. The pipeline mutates them only while
//! holding a job claim; the retriever only reads. Implementations must be
//! `Send + Sync` to work with the async runtime.
//!
//! Two implementations ship in-tree: [`memory`] (test doubles with failure
//! and latency injection) and [`sqlite`] (embedding blobs + FTS5, backing
//! the CLI).

pub mod memory;
pub mod sqlite;

use anyhow::Result;
use async_trait::async_trait;

use crate::models::{DocumentChunk, ParentChunk};

/// A raw hit from a single store, before provenance tagging.
#[derive(Debug, Clone)]
pub struct StoreHit {
    pub content: String,
    /// Carries at least `kb_id` and `document_id`.
    pub metadata: serde_json::Value,
    pub score: Option<f64>,
}

/// Outcome of a vector-store upsert.
#[derive(Debug, Clone)]
pub struct VectorUpsert {
    /// Number of chunks written to the index.
    pub chunk_count: i64,
    /// Parent-chunk windows to persist in the relational store.
    pub parent_chunks: Vec<ParentChunk>,
}

/// Dense-vector index backend.
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Embed and upsert a document's chunks. Re-running for the same
    /// document replaces prior entries (idempotent by chunk identity).
    async fn upsert(
        &self,
        owner_id: &str,
        chunks: &[DocumentChunk],
        chunk_size: i64,
    ) -> Result<VectorUpsert>;

    /// Delete every entry belonging to a document. Used both for logical
    /// document removal and as the compensating delete after a timed-out
    /// vector stage.
    async fn delete_by_document(&self, document_id: &str) -> Result<()>;

    /// Similarity search restricted to the given knowledge bases.
    async fn search(
        &self,
        query: &str,
        expr: Option<&str>,
        top_k: i64,
        partition_keys: &[String],
    ) -> Result<Vec<StoreHit>>;
}

/// Keyword (full-text) index backend.
#[async_trait]
pub trait KeywordStore: Send + Sync {
    /// Upsert chunks under caller-supplied ids. Ids are deterministic per
    /// (document, ordinal) so replays overwrite instead of duplicating.
    async fn upsert(&self, chunks: &[DocumentChunk], ids: &[String]) -> Result<Vec<String>>;

    /// Full-text search restricted to the given knowledge bases.
    async fn search(
        &self,
        query: &str,
        top_k: i64,
        partition_keys: &[String],
    ) -> Result<Vec<StoreHit>>;
}

/// Merge consecutive chunks into parent windows of roughly
/// `parent_chunk_size` characters. Parent ids are deterministic
/// (`"<document_id>_p<index>"`) so re-processing overwrites.
pub fn build_parent_chunks(chunks: &[DocumentChunk], parent_chunk_size: usize) -> Vec<ParentChunk> {
    let mut parents = Vec::new();
    let mut buf = String::new();
    let mut index = 0usize;

    let (kb_id, document_id) = match chunks.first() {
        Some(c) => (c.metadata.kb_id.clone(), c.metadata.document_id.clone()),
        None => return parents,
    };

    let mut flush = |buf: &mut String, index: &mut usize, parents: &mut Vec<ParentChunk>| {
        if buf.is_empty() {
            return;
        }
        parents.push(ParentChunk {
            id: format!("{}_p{}", document_id, index),
            document_id: document_id.clone(),
            kb_id: kb_id.clone(),
            text: std::mem::take(buf),
        });
        *index += 1;
    };

    for chunk in chunks {
        if !buf.is_empty() && buf.chars().count() + chunk.text.chars().count() > parent_chunk_size {
            flush(&mut buf, &mut index, &mut parents);
        }
        if !buf.is_empty() {
            buf.push_str("\n\n");
        }
        buf.push_str(&chunk.text);
    }
    flush(&mut buf, &mut index, &mut parents);

    parents
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunk::split_text;

    #[test]
    fn test_parent_chunks_empty_input() {
        assert!(build_parent_chunks(&[], 100).is_empty());
    }

    #[test]
    fn test_parent_ids_deterministic() {
        let chunks = split_text("kb1", "doc1", "Alpha\n\nBeta\n\nGamma\n\nDelta", 6);
        let a = build_parent_chunks(&chunks, 14);
        let b = build_parent_chunks(&chunks, 14);
        assert!(!a.is_empty());
        for (x, y) in a.iter().zip(b.iter()) {
            assert_eq!(x.id, y.id);
        }
        assert_eq!(a[0].id, "doc1_p0");
    }

    #[test]
    fn test_parents_cover_all_chunk_text() {
        let text = (0..20)
            .map(|i| format!("Paragraph {}.", i))
            .collect::<Vec<_>>()
            .join("\n\n");
        let chunks = split_text("kb1", "doc1", &text, 30);
        let parents = build_parent_chunks(&chunks, 90);
        let joined: String = parents.iter().map(|p| p.text.as_str()).collect();
        for i in 0..20 {
            assert!(joined.contains(&format!("Paragraph {}.", i)));
        }
    }
}
