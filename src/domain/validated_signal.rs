//! Validated signal: an event that has passed the full rule chain.
//!
//! Carries the original event plus validation metadata, refined
//! classification, and the explanation chain built during validation.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::common::{
    deterministic_hash, GeoLocation, SignalCategory, ValidationStatus,
};
use crate::domain::explanation::ExplanationChain;
use crate::domain::raw_signal::RawSignalEvent;

/// Result of a single validation rule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationResult {
    pub rule_name: String,
    pub rule_version: String,
    pub status: ValidationStatus,
    pub score: f64,
    pub reason: String,
}

impl ValidationResult {
    pub fn new(
        rule_name: impl Into<String>,
        rule_version: impl Into<String>,
        status: ValidationStatus,
        score: f64,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            rule_name: rule_name.into(),
            rule_version: rule_version.into(),
            status,
            score: score.clamp(0.0, 1.0),
            reason: reason.into(),
        }
    }
}

/// A signal that has passed validation. Immutable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidatedSignal {
    pub event_id: String,
    pub original_event: RawSignalEvent,

    pub category: SignalCategory,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub relevant_locations: Vec<GeoLocation>,
    /// Named logistics chokepoints, e.g. "Suez Canal".
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub affected_chokepoints: Vec<String>,

    pub validation_results: Vec<ValidationResult>,
    /// Mean of the passed rule scores.
    pub overall_validation_score: f64,
    pub signal_strength: f64,
    pub liquidity_score: f64,

    pub explanation: ExplanationChain,

    pub ruleset_version: String,
    pub validated_at: DateTime<Utc>,

    /// Deterministic: same input hash + same ruleset = same trace id.
    pub trace_id: String,
}

impl ValidatedSignal {
    /// Derive the deterministic trace id for a validation run.
    pub fn derive_trace_id(input_event_hash: &str, ruleset_version: &str) -> String {
        deterministic_hash(&[input_event_hash, ruleset_version, "validated"])
    }

    pub fn validation_passed(&self) -> bool {
        self.validation_results.iter().all(|r| r.status.is_passed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trace_id_is_deterministic_per_hash_and_ruleset() {
        let a = ValidatedSignal::derive_trace_id("abc123", "v1.0.0");
        let b = ValidatedSignal::derive_trace_id("abc123", "v1.0.0");
        assert_eq!(a, b);
        assert_ne!(a, ValidatedSignal::derive_trace_id("abc123", "v2.0.0"));
        assert_ne!(a, ValidatedSignal::derive_trace_id("abc124", "v1.0.0"));
    }

    #[test]
    fn score_is_clamped() {
        let r = ValidationResult::new("x", "1.0.0", ValidationStatus::Passed, 1.7, "ok");
        assert_eq!(r.score, 1.0);
    }
}
