//! Validation rules.
//!
//! Rules are pure: no I/O, no logging, no wall clock. Errors are returned,
//! never panicked, and the validator decides whether an erroring rule is
//! fatal (`fail_on_rule_error`). Rejection is a normal outcome, not an
//! error.

pub mod anomaly;
pub mod geographic;
pub mod keywords;
pub mod liquidity;
pub mod semantic;

use chrono::{DateTime, Utc};

use crate::domain::explanation::ExplanationStep;
use crate::domain::raw_signal::RawSignalEvent;
use crate::domain::validated_signal::ValidationResult;
use crate::error::OmenError;

pub use anomaly::{AnomalyConfig, AnomalyDetectionRule, StatisticalAnomalyDetector};
pub use geographic::{GeographicRelevanceConfig, GeographicRelevanceRule, CHOKEPOINTS};
pub use liquidity::LiquidityValidationRule;
pub use semantic::SemanticRelevanceRule;

/// A validation rule applied to raw events.
pub trait ValidationRule: Send + Sync {
    fn name(&self) -> &'static str;
    fn version(&self) -> &'static str;

    /// Evaluate the rule. A rejection is a `ValidationResult` with a
    /// non-passed status; `Err` means the rule itself failed to execute.
    fn apply(&self, event: &RawSignalEvent) -> Result<ValidationResult, OmenError>;

    /// Explanation step for this rule's outcome. `at` must come from the
    /// processing context.
    fn explain(
        &self,
        event: &RawSignalEvent,
        result: &ValidationResult,
        at: DateTime<Utc>,
    ) -> ExplanationStep;
}

/// Default rule chain for prediction-market events, in contract order:
/// cheapest filter first.
pub fn default_rules() -> Vec<Box<dyn ValidationRule>> {
    vec![
        Box::new(LiquidityValidationRule::new(1000.0)),
        Box::new(AnomalyDetectionRule::default()),
        Box::new(SemanticRelevanceRule::default()),
        Box::new(GeographicRelevanceRule::default()),
    ]
}
