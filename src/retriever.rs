//! Hybrid retrieval fan-out and merge.
//!
//! Vector search always runs; keyword search runs only in hybrid mode and
//! degrades gracefully, a failing keyword backend costs recall, never
//! availability. Merged results keep vector hits first, each tagged with
//! the store that produced it. No cross-store re-ranking happens here;
//! scores from the two backends are not comparable.

use std::sync::Arc;
use std::time::Instant;

use anyhow::Result;
use tracing::{debug, warn};

use crate::models::{RetrievalResult, RetrievalSource};
use crate::stores::{KeywordStore, StoreHit, VectorStore};
use crate::timing::TimeRecord;

pub struct Retriever {
    vector_store: Arc<dyn VectorStore>,
    keyword_store: Option<Arc<dyn KeywordStore>>,
}

impl Retriever {
    pub fn new(
        vector_store: Arc<dyn VectorStore>,
        keyword_store: Option<Arc<dyn KeywordStore>>,
    ) -> Self {
        Self {
            vector_store,
            keyword_store,
        }
    }

    /// Query the configured stores and merge the hits.
    ///
    /// Vector errors propagate; keyword errors are logged and swallowed so
    /// the caller still gets the vector results. The returned timing has
    /// one phase per store actually queried.
    pub async fn retrieve(
        &self,
        query: &str,
        partition_keys: &[String],
        top_k: i64,
        hybrid: bool,
    ) -> Result<(Vec<RetrievalResult>, TimeRecord)> {
        let mut timing = TimeRecord::new();

        let started = Instant::now();
        let vector_hits = self
            .vector_store
            .search(query, None, top_k, partition_keys)
            .await?;
        timing.record("retriever_search_by_vector", started.elapsed());

        let keyword_hits = match (&self.keyword_store, hybrid) {
            (Some(store), true) => {
                let started = Instant::now();
                match store.search(query, top_k, partition_keys).await {
                    Ok(hits) => {
                        timing.record("retriever_search_by_keyword", started.elapsed());
                        hits
                    }
                    Err(e) => {
                        warn!(error = ?e, "keyword search failed, degrading to vector-only");
                        timing.record("retriever_search_by_keyword", started.elapsed());
                        Vec::new()
                    }
                }
            }
            _ => Vec::new(),
        };

        debug!(
            vector = vector_hits.len(),
            keyword = keyword_hits.len(),
            "retrieval fan-out complete"
        );

        let mut results: Vec<RetrievalResult> = Vec::with_capacity(
            vector_hits.len() + keyword_hits.len(),
        );
        results.extend(tagged(vector_hits, RetrievalSource::Vector));
        results.extend(tagged(keyword_hits, RetrievalSource::Keyword));
        Ok((results, timing))
    }
}

fn tagged(
    hits: Vec<StoreHit>,
    source: RetrievalSource,
) -> impl Iterator<Item = RetrievalResult> {
    hits.into_iter().map(move |hit| RetrievalResult {
        source,
        content: hit.content,
        metadata: hit.metadata,
        score: hit.score,
    })
}
