//! Liquidity validation.
//!
//! If there is no liquidity, there is no information: thin markets are
//! susceptible to manipulation and do not represent genuine collective
//! belief.

use chrono::{DateTime, Utc};
use serde_json::json;

use crate::domain::common::ValidationStatus;
use crate::domain::explanation::{ExplanationStep, ParameterReference};
use crate::domain::raw_signal::RawSignalEvent;
use crate::domain::validated_signal::ValidationResult;
use crate::error::OmenError;
use crate::rules::ValidationRule;

pub struct LiquidityValidationRule {
    min_liquidity_usd: f64,
}

impl LiquidityValidationRule {
    pub fn new(min_liquidity_usd: f64) -> Self {
        Self { min_liquidity_usd }
    }
}

impl ValidationRule for LiquidityValidationRule {
    fn name(&self) -> &'static str {
        "liquidity_validation"
    }

    fn version(&self) -> &'static str {
        "1.0.0"
    }

    fn apply(&self, event: &RawSignalEvent) -> Result<ValidationResult, OmenError> {
        let liquidity = event.market.current_liquidity_usd;

        if liquidity >= self.min_liquidity_usd {
            // Diminishing returns: full score at 10x the threshold.
            let score = (liquidity / (self.min_liquidity_usd * 10.0)).min(1.0);
            Ok(ValidationResult::new(
                self.name(),
                self.version(),
                ValidationStatus::Passed,
                score,
                format!(
                    "Sufficient liquidity: ${liquidity:.0} >= ${:.0} threshold",
                    self.min_liquidity_usd
                ),
            ))
        } else {
            let score = liquidity / self.min_liquidity_usd;
            Ok(ValidationResult::new(
                self.name(),
                self.version(),
                ValidationStatus::RejectedLowLiquidity,
                score,
                format!(
                    "Insufficient liquidity: ${liquidity:.0} below ${:.0} threshold",
                    self.min_liquidity_usd
                ),
            ))
        }
    }

    fn explain(
        &self,
        event: &RawSignalEvent,
        result: &ValidationResult,
        at: DateTime<Utc>,
    ) -> ExplanationStep {
        ExplanationStep::new(
            1,
            self.name(),
            self.version(),
            result.reason.clone(),
            result.score * 0.3,
            at,
        )
        .with_input(
            "current_liquidity_usd",
            json!(event.market.current_liquidity_usd),
        )
        .with_input("total_volume_usd", json!(event.market.total_volume_usd))
        .with_output("status", json!(result.status.as_str()))
        .with_output("score", json!(result.score))
        .with_parameter(
            ParameterReference::new("min_liquidity_usd", json!(self.min_liquidity_usd), "USD")
                .with_source("ruleset configuration"),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::raw_signal::{MarketMetadata, RawEventDraft};

    fn event_with_liquidity(liquidity: f64) -> RawSignalEvent {
        RawSignalEvent::new(RawEventDraft {
            event_id: "e1".into(),
            title: "test market".into(),
            probability: 0.5,
            market: Some(MarketMetadata {
                current_liquidity_usd: liquidity,
                total_volume_usd: liquidity * 10.0,
                ..MarketMetadata::minimal("polymarket", "m1")
            }),
            ..Default::default()
        })
    }

    #[test]
    fn exactly_at_threshold_passes_with_score_point_one() {
        let rule = LiquidityValidationRule::new(1000.0);
        let result = rule.apply(&event_with_liquidity(1000.0)).unwrap();
        assert_eq!(result.status, ValidationStatus::Passed);
        assert!((result.score - 0.1).abs() < 1e-9);
    }

    #[test]
    fn below_threshold_rejects() {
        let rule = LiquidityValidationRule::new(1000.0);
        let result = rule.apply(&event_with_liquidity(100.0)).unwrap();
        assert_eq!(result.status, ValidationStatus::RejectedLowLiquidity);
        assert!(result.score < 0.2);
    }

    #[test]
    fn score_caps_at_one() {
        let rule = LiquidityValidationRule::new(1000.0);
        let result = rule.apply(&event_with_liquidity(1_000_000.0)).unwrap();
        assert_eq!(result.score, 1.0);
    }
}
