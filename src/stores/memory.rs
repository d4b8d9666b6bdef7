//! In-memory store implementations for tests.
//!
//! Thin `RwLock`-guarded maps with two injection knobs the pipeline and
//! retriever tests need: an artificial latency (to trip stage deadlines)
//! and a failure flag (to exercise degraded paths). Keyword scoring is
//! naive term matching; vector "search" scores by shared-token count.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, RwLock};
use std::time::Duration;

use anyhow::{bail, Result};
use async_trait::async_trait;

use crate::models::DocumentChunk;

use super::{build_parent_chunks, KeywordStore, StoreHit, VectorStore, VectorUpsert};

#[derive(Debug, Clone)]
struct VectorEntry {
    document_id: String,
    kb_id: String,
    chunk_index: i64,
    text: String,
}

/// In-memory [`VectorStore`] with latency and failure injection.
#[derive(Default)]
pub struct InMemoryVectorStore {
    entries: RwLock<Vec<VectorEntry>>,
    upsert_delay: Mutex<Option<Duration>>,
    fail_upserts: AtomicBool,
}

impl InMemoryVectorStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every upsert sleep for `delay` before writing, so a pipeline
    /// with a shorter deadline observes a stage timeout mid-write.
    pub fn set_upsert_delay(&self, delay: Option<Duration>) {
        *self.upsert_delay.lock().unwrap() = delay;
    }

    pub fn set_fail_upserts(&self, fail: bool) {
        self.fail_upserts.store(fail, Ordering::SeqCst);
    }

    /// Number of entries currently indexed for a document.
    pub fn count_for_document(&self, document_id: &str) -> usize {
        self.entries
            .read()
            .unwrap()
            .iter()
            .filter(|e| e.document_id == document_id)
            .count()
    }
}

#[async_trait]
impl VectorStore for InMemoryVectorStore {
    async fn upsert(
        &self,
        _owner_id: &str,
        chunks: &[DocumentChunk],
        chunk_size: i64,
    ) -> Result<VectorUpsert> {
        if self.fail_upserts.load(Ordering::SeqCst) {
            bail!("injected vector upsert failure");
        }

        let delay = *self.upsert_delay.lock().unwrap();
        if let Some(d) = delay {
            // Write half the chunks, then stall: a timeout that fires here
            // leaves partial state behind for the compensating delete to
            // clean up.
            let half = chunks.len() / 2;
            self.write_entries(&chunks[..half]);
            tokio::time::sleep(d).await;
            self.write_entries(&chunks[half..]);
        } else {
            self.write_entries(chunks);
        }

        let parent_size = (chunk_size.max(1) as usize).saturating_mul(2);
        Ok(VectorUpsert {
            chunk_count: chunks.len() as i64,
            parent_chunks: build_parent_chunks(chunks, parent_size),
        })
    }

    async fn delete_by_document(&self, document_id: &str) -> Result<()> {
        self.entries
            .write()
            .unwrap()
            .retain(|e| e.document_id != document_id);
        Ok(())
    }

    async fn search(
        &self,
        query: &str,
        _expr: Option<&str>,
        top_k: i64,
        partition_keys: &[String],
    ) -> Result<Vec<StoreHit>> {
        let query_lower = query.to_lowercase();
        let terms: Vec<&str> = query_lower.split_whitespace().collect();
        let entries = self.entries.read().unwrap();
        let mut hits: Vec<StoreHit> = entries
            .iter()
            .filter(|e| partition_keys.is_empty() || partition_keys.contains(&e.kb_id))
            .filter_map(|e| {
                let text_lower = e.text.to_lowercase();
                let matches = terms.iter().filter(|t| text_lower.contains(*t)).count();
                if matches == 0 {
                    return None;
                }
                Some(StoreHit {
                    content: e.text.clone(),
                    metadata: serde_json::json!({
                        "kb_id": e.kb_id,
                        "document_id": e.document_id,
                        "chunk_index": e.chunk_index,
                    }),
                    score: Some(matches as f64 / terms.len().max(1) as f64),
                })
            })
            .collect();
        hits.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        hits.truncate(top_k as usize);
        Ok(hits)
    }
}

impl InMemoryVectorStore {
    fn write_entries(&self, chunks: &[DocumentChunk]) {
        let mut entries = self.entries.write().unwrap();
        for chunk in chunks {
            entries.retain(|e| {
                !(e.document_id == chunk.metadata.document_id
                    && e.chunk_index == chunk.metadata.chunk_index)
            });
            entries.push(VectorEntry {
                document_id: chunk.metadata.document_id.clone(),
                kb_id: chunk.metadata.kb_id.clone(),
                chunk_index: chunk.metadata.chunk_index,
                text: chunk.text.clone(),
            });
        }
    }
}

#[derive(Debug, Clone)]
struct KeywordEntry {
    kb_id: String,
    document_id: String,
    text: String,
}

/// In-memory [`KeywordStore`] with failure injection on both paths.
#[derive(Default)]
pub struct InMemoryKeywordStore {
    entries: RwLock<HashMap<String, KeywordEntry>>,
    fail_searches: AtomicBool,
    fail_upserts: AtomicBool,
}

impl InMemoryKeywordStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_fail_searches(&self, fail: bool) {
        self.fail_searches.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_upserts(&self, fail: bool) {
        self.fail_upserts.store(fail, Ordering::SeqCst);
    }

    /// Total number of stored entries (keyed by deterministic id).
    pub fn len(&self) -> usize {
        self.entries.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl KeywordStore for InMemoryKeywordStore {
    async fn upsert(&self, chunks: &[DocumentChunk], ids: &[String]) -> Result<Vec<String>> {
        if self.fail_upserts.load(Ordering::SeqCst) {
            bail!("injected keyword upsert failure");
        }
        anyhow::ensure!(chunks.len() == ids.len(), "chunks/ids length mismatch");

        let mut entries = self.entries.write().unwrap();
        for (chunk, id) in chunks.iter().zip(ids.iter()) {
            entries.insert(
                id.clone(),
                KeywordEntry {
                    kb_id: chunk.metadata.kb_id.clone(),
                    document_id: chunk.metadata.document_id.clone(),
                    text: chunk.text.clone(),
                },
            );
        }
        Ok(ids.to_vec())
    }

    async fn search(
        &self,
        query: &str,
        top_k: i64,
        partition_keys: &[String],
    ) -> Result<Vec<StoreHit>> {
        if self.fail_searches.load(Ordering::SeqCst) {
            bail!("injected keyword search failure");
        }

        let query_lower = query.to_lowercase();
        let terms: Vec<&str> = query_lower.split_whitespace().collect();
        let entries = self.entries.read().unwrap();
        let mut hits: Vec<StoreHit> = entries
            .values()
            .filter(|e| partition_keys.is_empty() || partition_keys.contains(&e.kb_id))
            .filter_map(|e| {
                let text_lower = e.text.to_lowercase();
                let matches = terms.iter().filter(|t| text_lower.contains(*t)).count();
                if matches == 0 {
                    return None;
                }
                Some(StoreHit {
                    content: e.text.clone(),
                    metadata: serde_json::json!({
                        "kb_id": e.kb_id,
                        "document_id": e.document_id,
                    }),
                    score: Some(matches as f64),
                })
            })
            .collect();
        hits.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        hits.truncate(top_k as usize);
        Ok(hits)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunk::split_text;

    fn chunks() -> Vec<DocumentChunk> {
        split_text("kb1", "doc1", "alpha beta\n\ngamma delta", 10)
    }

    #[tokio::test]
    async fn test_vector_upsert_and_search() {
        let store = InMemoryVectorStore::new();
        store.upsert("owner", &chunks(), 10).await.unwrap();
        assert_eq!(store.count_for_document("doc1"), 2);

        let hits = store
            .search("alpha", None, 10, &["kb1".to_string()])
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].metadata["kb_id"], "kb1");
    }

    #[tokio::test]
    async fn test_vector_partition_filtering() {
        let store = InMemoryVectorStore::new();
        store.upsert("owner", &chunks(), 10).await.unwrap();
        let hits = store
            .search("alpha", None, 10, &["other-kb".to_string()])
            .await
            .unwrap();
        assert!(hits.is_empty());
    }

    #[tokio::test]
    async fn test_vector_delete_by_document() {
        let store = InMemoryVectorStore::new();
        store.upsert("owner", &chunks(), 10).await.unwrap();
        store.delete_by_document("doc1").await.unwrap();
        assert_eq!(store.count_for_document("doc1"), 0);
    }

    #[tokio::test]
    async fn test_keyword_upsert_idempotent() {
        let store = InMemoryKeywordStore::new();
        let cs = chunks();
        let ids: Vec<String> = cs
            .iter()
            .map(|c| format!("{}_{}", c.metadata.document_id, c.metadata.chunk_index))
            .collect();
        store.upsert(&cs, &ids).await.unwrap();
        store.upsert(&cs, &ids).await.unwrap();
        assert_eq!(store.len(), 2);
    }

    #[tokio::test]
    async fn test_keyword_failure_injection() {
        let store = InMemoryKeywordStore::new();
        store.set_fail_searches(true);
        assert!(store.search("x", 5, &[]).await.is_err());
    }
}
