//! Error types for the ingestion stage pipeline.
//!
//! Per-job errors are a closed taxonomy: validation rejects, stage
//! deadline expiries, and everything else a backend can throw. All three
//! are terminal for the attempt; the distinction matters because only a
//! vector-stage timeout triggers the compensating delete, and validation
//! messages are surfaced verbatim while store errors are summarized.
//!
//! Infrastructure failures (lost queue connectivity) are not part of this
//! taxonomy; they surface as `sqlx`/`anyhow` errors at the worker-loop
//! boundary and only ever affect one poll cycle.

use thiserror::Error;

/// Which stage of the pipeline an error originated from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageKind {
    Parse,
    VectorIndex,
    KeywordIndex,
}

impl StageKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            StageKind::Parse => "parse",
            StageKind::VectorIndex => "vector index",
            StageKind::KeywordIndex => "keyword index",
        }
    }
}

impl std::fmt::Display for StageKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors that can occur while running a job through the stage pipeline.
#[derive(Error, Debug)]
pub enum StageError {
    /// Content rejected before indexing (too large or empty). The message
    /// is user-facing and written to the job row as-is.
    #[error("{0}")]
    Validation(String),

    /// A stage exceeded its deadline.
    #[error("{stage} timeout: {secs}s")]
    Timeout { stage: StageKind, secs: u64 },

    /// Any other failure from a parse/vector/keyword call. The full chain
    /// is logged; only the short generic form reaches the job row.
    #[error("{stage} error")]
    Store {
        stage: StageKind,
        #[source]
        source: anyhow::Error,
    },
}

impl StageError {
    pub fn timeout(stage: StageKind, secs: u64) -> Self {
        StageError::Timeout { stage, secs }
    }

    pub fn store(stage: StageKind, source: anyhow::Error) -> Self {
        StageError::Store { stage, source }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, StageError::Timeout { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeout_display() {
        let err = StageError::timeout(StageKind::Parse, 300);
        assert_eq!(err.to_string(), "parse timeout: 300s");
        assert!(err.is_timeout());
    }

    #[test]
    fn test_store_display_is_generic() {
        let err = StageError::store(
            StageKind::VectorIndex,
            anyhow::anyhow!("connection refused: 10.0.0.3:19530"),
        );
        // Backend detail must not leak into the job-row message.
        assert_eq!(err.to_string(), "vector index error");
        assert!(!err.is_timeout());
    }

    #[test]
    fn test_validation_display_verbatim() {
        let err = StageError::Validation("a.txt content_length is 0".to_string());
        assert_eq!(err.to_string(), "a.txt content_length is 0");
    }
}
