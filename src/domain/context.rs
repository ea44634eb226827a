//! Processing context for deterministic execution.
//!
//! A context is created once per pipeline invocation and is the sole source
//! of timestamps used in explanation steps, validation results, and emitted
//! signals. Same processing time + same ruleset version = same trace id.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::common::deterministic_hash;

/// Immutable context for a single pipeline run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessingContext {
    pub processing_time: DateTime<Utc>,
    pub ruleset_version: String,
    pub trace_id: String,
}

impl ProcessingContext {
    /// Create a context stamped with the current time.
    pub fn create(ruleset_version: impl Into<String>) -> Self {
        Self::create_for_replay(Utc::now(), ruleset_version)
    }

    /// Create a context pinned to an explicit time, for deterministic replay.
    pub fn create_for_replay(
        processing_time: DateTime<Utc>,
        ruleset_version: impl Into<String>,
    ) -> Self {
        let ruleset_version = ruleset_version.into();
        let trace_id =
            deterministic_hash(&[&processing_time.to_rfc3339(), &ruleset_version]);
        Self {
            processing_time,
            ruleset_version,
            trace_id,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn replay_context_is_deterministic() {
        let t = Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap();
        let a = ProcessingContext::create_for_replay(t, "v1.0.0");
        let b = ProcessingContext::create_for_replay(t, "v1.0.0");
        assert_eq!(a.trace_id, b.trace_id);

        let c = ProcessingContext::create_for_replay(t, "v1.1.0");
        assert_ne!(a.trace_id, c.trace_id, "ruleset version must perturb trace id");
    }
}
