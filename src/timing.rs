//! Per-job and per-query phase timing.
//!
//! A [`TimeRecord`] accumulates named phases and their elapsed seconds.
//! For ingestion it is serialized onto the job row as the success message;
//! for retrieval it is returned to the caller alongside the results.

use std::collections::BTreeMap;
use std::time::Duration;

/// Ordered map of phase name to elapsed seconds, rounded to 2 decimals.
#[derive(Debug, Clone, Default)]
pub struct TimeRecord {
    phases: BTreeMap<String, f64>,
}

impl TimeRecord {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a phase's elapsed time, rounded to 2 decimal places.
    pub fn record(&mut self, phase: &str, elapsed: Duration) {
        let secs = (elapsed.as_secs_f64() * 100.0).round() / 100.0;
        self.phases.insert(phase.to_string(), secs);
    }

    /// Mark a phase with a raw value (used for flags like `insert_timeout`).
    pub fn mark(&mut self, phase: &str, value: f64) {
        self.phases.insert(phase.to_string(), value);
    }

    pub fn get(&self, phase: &str) -> Option<f64> {
        self.phases.get(phase).copied()
    }

    pub fn is_empty(&self) -> bool {
        self.phases.is_empty()
    }

    /// Serialize to a compact JSON object. Key order is deterministic.
    pub fn to_json(&self) -> String {
        serde_json::to_string(&self.phases).unwrap_or_else(|_| "{}".to_string())
    }
}
