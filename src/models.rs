//! Core data models used throughout corpusd.
//!
//! These types represent the ingestion jobs flowing through the durable
//! queue, the chunks produced by parsing, and the results returned by the
//! retrieval fan-out.

use serde::{Deserialize, Serialize};

/// Lifecycle status of an ingestion job.
///
/// Legal transitions: `Pending → Claimed → Succeeded | Failed`. A job never
/// moves backward; re-processing a failed document means enqueuing a fresh
/// pending row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobStatus {
    /// Queued, waiting for a worker to claim it.
    Pending,
    /// Claimed by a worker; at most one worker holds this at a time.
    Claimed,
    /// All configured stages completed.
    Succeeded,
    /// A stage failed, timed out, or was rejected by validation.
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Claimed => "claimed",
            JobStatus::Succeeded => "succeeded",
            JobStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(JobStatus::Pending),
            "claimed" => Some(JobStatus::Claimed),
            "succeeded" => Some(JobStatus::Succeeded),
            "failed" => Some(JobStatus::Failed),
            _ => None,
        }
    }

    /// Whether this status is terminal (the row will not change again).
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Succeeded | JobStatus::Failed)
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One row of the durable queue: a single document's ingestion request.
#[derive(Debug, Clone)]
pub struct IngestionJob {
    /// Stable row id; also the shard key (`id mod worker_count`).
    pub id: i64,
    /// Document id minted at enqueue time (UUID string).
    pub document_id: String,
    pub owner_id: String,
    /// Display name of the uploaded document.
    pub name: String,
    /// Knowledge base this document belongs to.
    pub kb_id: String,
    /// Where the raw bytes live (filesystem path or object key).
    pub location: String,
    pub size_bytes: i64,
    pub source_url: Option<String>,
    /// Desired chunk size in characters for the parse stage.
    pub chunk_size: i64,
    pub status: JobStatus,
    /// Total parsed character count; -1 until the parse stage reports it.
    pub content_length: i64,
    /// Number of chunks written to the vector store.
    pub chunk_count: i64,
    /// Unix timestamp of when the job was enqueued.
    pub queued_at: i64,
    /// Last status detail (progress marker, error summary, or timing JSON).
    pub message: String,
    /// Logically deleted jobs are invisible to claiming and listing.
    pub deleted: bool,
}

/// Parameters for appending a new pending job to the queue.
#[derive(Debug, Clone)]
pub struct NewJob {
    pub document_id: String,
    pub owner_id: String,
    pub name: String,
    pub kb_id: String,
    pub location: String,
    pub size_bytes: i64,
    pub source_url: Option<String>,
    pub chunk_size: i64,
}

/// Structured metadata attached to every chunk a parser emits.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkMetadata {
    pub kb_id: String,
    pub document_id: String,
    pub chunk_index: i64,
    /// SHA-256 of the chunk text, for staleness detection.
    pub hash: String,
}

/// A chunk of parsed document text, ready for indexing.
#[derive(Debug, Clone)]
pub struct DocumentChunk {
    pub text: String,
    pub metadata: ChunkMetadata,
}

/// Parent-chunk text persisted to the relational store during vector
/// indexing, so downstream consumers can expand a hit to its surrounding
/// context without re-parsing the source document.
#[derive(Debug, Clone)]
pub struct ParentChunk {
    /// Deterministic id: `"<document_id>_p<index>"`.
    pub id: String,
    pub document_id: String,
    pub kb_id: String,
    pub text: String,
}

/// Which store produced a retrieval result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RetrievalSource {
    Vector,
    Keyword,
}

impl RetrievalSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            RetrievalSource::Vector => "vector",
            RetrievalSource::Keyword => "keyword",
        }
    }
}

/// A single merged retrieval result, tagged with its originating store.
#[derive(Debug, Clone, Serialize)]
pub struct RetrievalResult {
    pub source: RetrievalSource,
    pub content: String,
    /// Must carry at least `kb_id` and `document_id`.
    pub metadata: serde_json::Value,
    /// Similarity score where the backend reports one.
    pub score: Option<f64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_round_trip() {
        for s in [
            JobStatus::Pending,
            JobStatus::Claimed,
            JobStatus::Succeeded,
            JobStatus::Failed,
        ] {
            assert_eq!(JobStatus::parse(s.as_str()), Some(s));
        }
        assert_eq!(JobStatus::parse("gray"), None);
    }

    #[test]
    fn test_terminal_statuses() {
        assert!(!JobStatus::Pending.is_terminal());
        assert!(!JobStatus::Claimed.is_terminal());
        assert!(JobStatus::Succeeded.is_terminal());
        assert!(JobStatus::Failed.is_terminal());
    }

    #[test]
    fn test_retrieval_source_tags() {
        assert_eq!(RetrievalSource::Vector.as_str(), "vector");
        assert_eq!(RetrievalSource::Keyword.as_str(), "keyword");
    }
}
