//! The per-job stage pipeline: parse, validate, vector index, keyword
//! index.
//!
//! [`StagePipeline::run`] always produces an outcome for the worker to
//! write back; a failed stage becomes a `Failed` outcome, never a worker
//! error. Each stage runs under its own deadline. A vector-stage timeout
//! is the one case that triggers a compensating delete, because a partial
//! vector write is invisible to replays; a keyword-stage failure leaves
//! the vector data in place.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use crate::config::PipelineConfig;
use crate::error::{StageError, StageKind};
use crate::models::{DocumentChunk, IngestionJob, JobStatus};
use crate::parser::DocumentParser;
use crate::queue::JobQueue;
use crate::stores::{KeywordStore, VectorStore};
use crate::timing::TimeRecord;

/// Progress markers written to the job row before each stage starts, so
/// an operator inspecting a stuck claimed job can see where it is.
pub const PROGRESS_PARSING: &str = "parsing";
pub const PROGRESS_VECTOR: &str = "indexing:vector";
pub const PROGRESS_KEYWORD: &str = "indexing:keyword";

/// How long a timed-out parser is given to observe cancellation before
/// its future is dropped.
const CANCEL_GRACE: Duration = Duration::from_secs(1);

/// What the worker writes back onto the job row after processing.
#[derive(Debug, Clone)]
pub struct PipelineOutcome {
    pub status: JobStatus,
    pub content_length: i64,
    pub chunk_count: i64,
    pub message: String,
}

pub struct StagePipeline {
    parser: Arc<dyn DocumentParser>,
    vector_store: Arc<dyn VectorStore>,
    keyword_store: Option<Arc<dyn KeywordStore>>,
    queue: JobQueue,
    parse_timeout: Duration,
    index_timeout: Duration,
    max_chars: i64,
}

impl StagePipeline {
    pub fn new(
        parser: Arc<dyn DocumentParser>,
        vector_store: Arc<dyn VectorStore>,
        keyword_store: Option<Arc<dyn KeywordStore>>,
        queue: JobQueue,
        config: &PipelineConfig,
    ) -> Self {
        Self {
            parser,
            vector_store,
            keyword_store,
            queue,
            parse_timeout: Duration::from_secs(config.parse_timeout_secs),
            index_timeout: Duration::from_secs(config.index_timeout_secs),
            max_chars: config.max_chars,
        }
    }

    /// Run a claimed job through all stages and report the outcome.
    ///
    /// Stage failures are folded into the outcome; only the short generic
    /// error form is returned for the job row, the full chain goes to the
    /// log. Infrastructure hiccups while writing progress markers are
    /// logged and ignored, they must not fail the job.
    pub async fn run(&self, job: &IngestionJob) -> PipelineOutcome {
        let mut timing = TimeRecord::new();
        let started = Instant::now();

        match self.process(job, &mut timing).await {
            Ok((content_length, chunk_count)) => {
                timing.record("upload_total_time", started.elapsed());
                PipelineOutcome {
                    status: JobStatus::Succeeded,
                    content_length,
                    chunk_count,
                    message: timing.to_json(),
                }
            }
            Err(failure) => {
                match &failure.error {
                    StageError::Validation(msg) => {
                        warn!(job_id = job.id, document_id = %job.document_id, %msg, "job rejected by validation");
                    }
                    StageError::Timeout { stage, secs } => {
                        warn!(job_id = job.id, document_id = %job.document_id, stage = %stage, secs, timing = %timing.to_json(), "stage deadline expired");
                    }
                    StageError::Store { stage, source } => {
                        error!(job_id = job.id, document_id = %job.document_id, stage = %stage, error = ?source, "stage failed");
                    }
                }
                PipelineOutcome {
                    status: JobStatus::Failed,
                    content_length: failure.content_length,
                    chunk_count: failure.chunk_count,
                    message: failure.error.to_string(),
                }
            }
        }
    }

    async fn process(
        &self,
        job: &IngestionJob,
        timing: &mut TimeRecord,
    ) -> Result<(i64, i64), StageFailure> {
        self.progress(job.id, PROGRESS_PARSING).await;

        let parse_started = Instant::now();
        let chunks = self.parse_stage(job).await.map_err(StageFailure::early)?;
        timing.record("parse_time", parse_started.elapsed());

        let content_length: i64 = chunks
            .iter()
            .map(|c| c.text.chars().count() as i64)
            .sum();
        debug!(job_id = job.id, content_length, chunks = chunks.len(), "parsed");

        if content_length > self.max_chars {
            return Err(StageFailure::at(
                StageError::Validation(format!(
                    "{} content_length {} exceeds limit {}",
                    job.name, content_length, self.max_chars
                )),
                content_length,
                0,
            ));
        }
        if content_length == 0 {
            return Err(StageFailure::at(
                StageError::Validation(format!("{} content is empty", job.name)),
                0,
                0,
            ));
        }

        self.progress(job.id, PROGRESS_VECTOR).await;
        let chunk_count = self
            .vector_stage(job, &chunks, timing)
            .await
            .map_err(|e| StageFailure::at(e, content_length, 0))?;

        if let Some(keyword_store) = &self.keyword_store {
            self.progress(job.id, PROGRESS_KEYWORD).await;
            self.keyword_stage(keyword_store.as_ref(), &chunks)
                .await
                .map_err(|e| StageFailure::at(e, content_length, chunk_count))?;
        }

        Ok((content_length, chunk_count))
    }

    /// Parse under the parse deadline. On expiry the cancellation token is
    /// fired and the parser gets a short grace period to observe it before
    /// the future is dropped.
    async fn parse_stage(&self, job: &IngestionJob) -> Result<Vec<DocumentChunk>, StageError> {
        let cancel = CancellationToken::new();
        let parse = self.parser.split_to_chunks(job, cancel.clone());
        tokio::pin!(parse);

        tokio::select! {
            result = &mut parse => {
                result.map_err(|e| StageError::store(StageKind::Parse, e))
            }
            _ = tokio::time::sleep(self.parse_timeout) => {
                cancel.cancel();
                let _ = tokio::time::timeout(CANCEL_GRACE, &mut parse).await;
                Err(StageError::timeout(StageKind::Parse, self.parse_timeout.as_secs()))
            }
        }
    }

    /// Upsert into the vector store under the index deadline, then persist
    /// the parent windows. A timeout triggers the compensating delete so
    /// no partial vector write survives; a plain store error does not, the
    /// idempotent upsert keys make a replay safe.
    async fn vector_stage(
        &self,
        job: &IngestionJob,
        chunks: &[DocumentChunk],
        timing: &mut TimeRecord,
    ) -> Result<i64, StageError> {
        let upsert = self
            .vector_store
            .upsert(&job.owner_id, chunks, job.chunk_size);

        let outcome = match tokio::time::timeout(self.index_timeout, upsert).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(e)) => return Err(StageError::store(StageKind::VectorIndex, e)),
            Err(_) => {
                timing.mark("insert_timeout", 1.0);
                if let Err(e) = self.vector_store.delete_by_document(&job.document_id).await {
                    error!(document_id = %job.document_id, error = ?e, "compensating delete failed");
                }
                return Err(StageError::timeout(
                    StageKind::VectorIndex,
                    self.index_timeout.as_secs(),
                ));
            }
        };

        self.queue
            .store_parent_chunks(&outcome.parent_chunks)
            .await
            .map_err(|e| StageError::store(StageKind::VectorIndex, e))?;

        Ok(outcome.chunk_count)
    }

    /// Upsert into the keyword store under the index deadline, keyed by
    /// deterministic entry ids. No rollback on failure: the job fails but
    /// indexed vector data stays queryable.
    async fn keyword_stage(
        &self,
        store: &dyn KeywordStore,
        chunks: &[DocumentChunk],
    ) -> Result<(), StageError> {
        let ids: Vec<String> = chunks
            .iter()
            .map(|c| format!("{}_{}", c.metadata.document_id, c.metadata.chunk_index))
            .collect();

        match tokio::time::timeout(self.index_timeout, store.upsert(chunks, &ids)).await {
            Ok(Ok(_)) => Ok(()),
            Ok(Err(e)) => Err(StageError::store(StageKind::KeywordIndex, e)),
            Err(_) => Err(StageError::timeout(
                StageKind::KeywordIndex,
                self.index_timeout.as_secs(),
            )),
        }
    }

    async fn progress(&self, job_id: i64, marker: &str) {
        if let Err(e) = self.queue.update_message(job_id, marker).await {
            warn!(job_id, marker, error = ?e, "failed to write progress marker");
        }
    }
}

/// A stage error plus the counters known at the point of failure.
struct StageFailure {
    error: StageError,
    content_length: i64,
    chunk_count: i64,
}

impl StageFailure {
    /// Failure before any content was measured.
    fn early(error: StageError) -> Self {
        Self {
            error,
            content_length: -1,
            chunk_count: 0,
        }
    }

    fn at(error: StageError, content_length: i64, chunk_count: i64) -> Self {
        Self {
            error,
            content_length,
            chunk_count,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::migrate::run_migrations;
    use crate::models::NewJob;
    use crate::parser::FixtureParser;
    use crate::stores::memory::{InMemoryKeywordStore, InMemoryVectorStore};

    struct Harness {
        _tmp: tempfile::TempDir,
        queue: JobQueue,
        parser: Arc<FixtureParser>,
        vector: Arc<InMemoryVectorStore>,
        keyword: Arc<InMemoryKeywordStore>,
    }

    async fn harness(text: &str) -> Harness {
        let tmp = tempfile::TempDir::new().unwrap();
        let pool = crate::db::connect_path(&tmp.path().join("jobs.sqlite"))
            .await
            .unwrap();
        run_migrations(&pool).await.unwrap();
        Harness {
            _tmp: tmp,
            queue: JobQueue::new(pool),
            parser: Arc::new(FixtureParser::with_text(text)),
            vector: Arc::new(InMemoryVectorStore::new()),
            keyword: Arc::new(InMemoryKeywordStore::new()),
        }
    }

    fn short_config() -> PipelineConfig {
        PipelineConfig {
            parse_timeout_secs: 1,
            index_timeout_secs: 1,
            max_chars: 1_000_000,
            default_chunk_size: 800,
        }
    }

    impl Harness {
        fn pipeline(&self, config: &PipelineConfig) -> StagePipeline {
            StagePipeline::new(
                self.parser.clone(),
                self.vector.clone(),
                Some(self.keyword.clone()),
                self.queue.clone(),
                config,
            )
        }

        async fn claimed_job(&self) -> IngestionJob {
            self.queue
                .enqueue(&NewJob {
                    document_id: "doc1".to_string(),
                    owner_id: "owner".to_string(),
                    name: "a.txt".to_string(),
                    kb_id: "kb1".to_string(),
                    location: "fixture".to_string(),
                    size_bytes: 10,
                    source_url: None,
                    chunk_size: 100,
                })
                .await
                .unwrap();
            self.queue.claim_one(0, 1).await.unwrap().unwrap()
        }
    }

    #[tokio::test]
    async fn test_success_reports_counts_and_timing() {
        let h = harness("hello world").await;
        let job = h.claimed_job().await;
        let outcome = h.pipeline(&short_config()).run(&job).await;

        assert_eq!(outcome.status, JobStatus::Succeeded);
        assert_eq!(outcome.content_length, 11);
        assert_eq!(outcome.chunk_count, 1);
        assert!(outcome.message.contains("parse_time"));
        assert!(outcome.message.contains("upload_total_time"));

        assert_eq!(h.vector.count_for_document("doc1"), 1);
        assert_eq!(h.keyword.len(), 1);
    }

    #[tokio::test]
    async fn test_progress_markers_written() {
        let h = harness("hello world").await;
        let job = h.claimed_job().await;
        h.pipeline(&short_config()).run(&job).await;

        // The worker writes the final message; until then the row holds
        // the last progress marker.
        let row = h.queue.get(job.id).await.unwrap().unwrap();
        assert_eq!(row.message, PROGRESS_KEYWORD);
    }

    #[tokio::test]
    async fn test_empty_content_fails_before_indexing() {
        let h = harness("").await;
        let job = h.claimed_job().await;
        let outcome = h.pipeline(&short_config()).run(&job).await;

        assert_eq!(outcome.status, JobStatus::Failed);
        assert_eq!(outcome.content_length, 0);
        assert_eq!(outcome.chunk_count, 0);
        assert!(outcome.message.contains("content is empty"));
        assert_eq!(h.vector.count_for_document("doc1"), 0);
        assert!(h.keyword.is_empty());
    }

    #[tokio::test]
    async fn test_oversized_content_rejected() {
        let h = harness("0123456789").await;
        let job = h.claimed_job().await;
        let mut config = short_config();
        config.max_chars = 5;
        let outcome = h.pipeline(&config).run(&job).await;

        assert_eq!(outcome.status, JobStatus::Failed);
        assert_eq!(outcome.content_length, 10);
        assert!(outcome.message.contains("exceeds limit 5"));
        assert_eq!(h.vector.count_for_document("doc1"), 0);
    }

    #[tokio::test]
    async fn test_parse_timeout_cancels_parser() {
        // Real (unpaused) time: sqlx pool acquires misfire under tokio's
        // auto-advancing paused clock. The 1s stage timeout keeps this fast.
        let h = harness("hello").await;
        h.parser.set_delay(Some(Duration::from_secs(600)));
        let job = h.claimed_job().await;
        let outcome = h.pipeline(&short_config()).run(&job).await;

        assert_eq!(outcome.status, JobStatus::Failed);
        assert_eq!(outcome.content_length, -1);
        assert_eq!(outcome.chunk_count, 0);
        assert!(outcome.message.contains("parse timeout"));
        assert!(h.parser.saw_cancel());
    }

    #[tokio::test]
    async fn test_parse_failure_message_is_generic() {
        let h = harness("hello").await;
        h.parser.set_fail(true);
        let job = h.claimed_job().await;
        let outcome = h.pipeline(&short_config()).run(&job).await;

        assert_eq!(outcome.status, JobStatus::Failed);
        assert_eq!(outcome.content_length, -1);
        assert_eq!(outcome.message, "parse error");
    }

    #[tokio::test]
    async fn test_vector_timeout_triggers_compensating_delete() {
        // Real (unpaused) time: sqlx pool acquires misfire under tokio's
        // auto-advancing paused clock. The 1s stage timeout keeps this fast.
        let h = harness("alpha beta\n\ngamma delta").await;
        h.vector.set_upsert_delay(Some(Duration::from_secs(600)));
        let job = h.claimed_job().await;
        let outcome = h.pipeline(&short_config()).run(&job).await;

        assert_eq!(outcome.status, JobStatus::Failed);
        assert!(outcome.message.contains("vector index timeout"));
        // The stalled upsert wrote partial state; the compensating delete
        // must have removed it.
        assert_eq!(h.vector.count_for_document("doc1"), 0);
        assert!(h.keyword.is_empty());
    }

    #[tokio::test]
    async fn test_vector_failure_no_compensating_delete_needed() {
        let h = harness("hello world").await;
        h.vector.set_fail_upserts(true);
        let job = h.claimed_job().await;
        let outcome = h.pipeline(&short_config()).run(&job).await;

        assert_eq!(outcome.status, JobStatus::Failed);
        assert_eq!(outcome.message, "vector index error");
        assert_eq!(outcome.content_length, 11);
        assert_eq!(outcome.chunk_count, 0);
    }

    #[tokio::test]
    async fn test_keyword_failure_keeps_vector_data() {
        let h = harness("hello world").await;
        h.keyword.set_fail_upserts(true);
        let job = h.claimed_job().await;
        let outcome = h.pipeline(&short_config()).run(&job).await;

        assert_eq!(outcome.status, JobStatus::Failed);
        assert_eq!(outcome.message, "keyword index error");
        assert_eq!(outcome.chunk_count, 1);
        // No rollback: the vector index keeps serving this document.
        assert_eq!(h.vector.count_for_document("doc1"), 1);
    }

    #[tokio::test]
    async fn test_vector_only_pipeline() {
        let h = harness("hello world").await;
        let job = h.claimed_job().await;
        let pipeline = StagePipeline::new(
            h.parser.clone(),
            h.vector.clone(),
            None,
            h.queue.clone(),
            &short_config(),
        );
        let outcome = pipeline.run(&job).await;

        assert_eq!(outcome.status, JobStatus::Succeeded);
        assert!(h.keyword.is_empty());
    }

    #[tokio::test]
    async fn test_parent_chunks_persisted() {
        let h = harness("alpha beta\n\ngamma delta").await;
        let job = h.claimed_job().await;
        h.pipeline(&short_config()).run(&job).await;

        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM parent_chunks WHERE document_id = 'doc1'")
                .fetch_one(h.queue.pool())
                .await
                .unwrap();
        assert!(count > 0);
    }
}
