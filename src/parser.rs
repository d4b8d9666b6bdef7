//! Document parsing contract and the built-in plain-text parser.
//!
//! Format-specific extraction (PDF, HTML, office formats) lives behind the
//! [`DocumentParser`] trait; the core only needs "give me chunks for this
//! job, and stop when the cancellation token fires". The pipeline cancels
//! the token when the parse deadline expires, so implementations must stop
//! touching shared state once they observe it.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{bail, Result};
use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::chunk::split_text;
use crate::models::{DocumentChunk, IngestionJob};

/// Extracts text from a job's stored document and splits it into chunks.
#[async_trait]
pub trait DocumentParser: Send + Sync {
    /// Parse the document at `job.location` into chunks of roughly
    /// `job.chunk_size` characters. Checked against `cancel` at safe
    /// points; once the token fires the call must return promptly and
    /// leave no further side effects.
    async fn split_to_chunks(
        &self,
        job: &IngestionJob,
        cancel: CancellationToken,
    ) -> Result<Vec<DocumentChunk>>;
}

/// Parser for UTF-8 text files: read the whole file, split on paragraph
/// boundaries.
pub struct PlainTextParser;

#[async_trait]
impl DocumentParser for PlainTextParser {
    async fn split_to_chunks(
        &self,
        job: &IngestionJob,
        cancel: CancellationToken,
    ) -> Result<Vec<DocumentChunk>> {
        let text = tokio::select! {
            read = tokio::fs::read_to_string(&job.location) => read?,
            _ = cancel.cancelled() => bail!("parse cancelled"),
        };
        if cancel.is_cancelled() {
            bail!("parse cancelled");
        }
        Ok(split_text(
            &job.kb_id,
            &job.document_id,
            &text,
            job.chunk_size.max(1) as usize,
        ))
    }
}

/// Scripted parser for tests: returns canned text, optionally after a
/// delay (to trip the parse deadline) or as an injected failure. Records
/// whether it observed cancellation.
#[derive(Default)]
pub struct FixtureParser {
    text: Mutex<String>,
    delay: Mutex<Option<Duration>>,
    fail: AtomicBool,
    saw_cancel: Arc<AtomicBool>,
}

impl FixtureParser {
    pub fn with_text(text: &str) -> Self {
        Self {
            text: Mutex::new(text.to_string()),
            ..Default::default()
        }
    }

    pub fn set_delay(&self, delay: Option<Duration>) {
        *self.delay.lock().unwrap() = delay;
    }

    pub fn set_fail(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    /// Whether a previous parse call was interrupted by cancellation.
    pub fn saw_cancel(&self) -> bool {
        self.saw_cancel.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DocumentParser for FixtureParser {
    async fn split_to_chunks(
        &self,
        job: &IngestionJob,
        cancel: CancellationToken,
    ) -> Result<Vec<DocumentChunk>> {
        if self.fail.load(Ordering::SeqCst) {
            bail!("injected parse failure");
        }

        let delay = *self.delay.lock().unwrap();
        if let Some(d) = delay {
            tokio::select! {
                _ = tokio::time::sleep(d) => {}
                _ = cancel.cancelled() => {
                    self.saw_cancel.store(true, Ordering::SeqCst);
                    bail!("parse cancelled");
                }
            }
        }

        let text = self.text.lock().unwrap().clone();
        Ok(split_text(
            &job.kb_id,
            &job.document_id,
            &text,
            job.chunk_size.max(1) as usize,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{JobStatus, NewJob};

    pub(crate) fn job_with_location(location: &str, chunk_size: i64) -> IngestionJob {
        let new = NewJob {
            document_id: "doc1".to_string(),
            owner_id: "owner".to_string(),
            name: "a.txt".to_string(),
            kb_id: "kb1".to_string(),
            location: location.to_string(),
            size_bytes: 0,
            source_url: None,
            chunk_size,
        };
        IngestionJob {
            id: 1,
            document_id: new.document_id,
            owner_id: new.owner_id,
            name: new.name,
            kb_id: new.kb_id,
            location: new.location,
            size_bytes: new.size_bytes,
            source_url: new.source_url,
            chunk_size: new.chunk_size,
            status: JobStatus::Claimed,
            content_length: -1,
            chunk_count: 0,
            queued_at: 0,
            message: String::new(),
            deleted: false,
        }
    }

    #[tokio::test]
    async fn test_plain_text_parser_reads_file() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("a.txt");
        std::fs::write(&path, "hello world").unwrap();

        let parser = PlainTextParser;
        let job = job_with_location(path.to_str().unwrap(), 100);
        let chunks = parser
            .split_to_chunks(&job, CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].text, "hello world");
        assert_eq!(chunks[0].metadata.kb_id, "kb1");
    }

    #[tokio::test]
    async fn test_plain_text_parser_missing_file() {
        let parser = PlainTextParser;
        let job = job_with_location("/nonexistent/file.txt", 100);
        assert!(parser
            .split_to_chunks(&job, CancellationToken::new())
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_fixture_parser_observes_cancellation() {
        let parser = FixtureParser::with_text("hello");
        parser.set_delay(Some(Duration::from_secs(60)));
        let job = job_with_location("ignored", 100);

        let cancel = CancellationToken::new();
        cancel.cancel();
        let result = parser.split_to_chunks(&job, cancel).await;
        assert!(result.is_err());
        assert!(parser.saw_cancel());
    }
}
