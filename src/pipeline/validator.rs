//! Signal validation service.
//!
//! Applies the rule chain in its fixed contract order and assembles the
//! `ValidatedSignal` with its explanation chain. No logging here, errors
//! surface through `ValidationResult`s and the returned outcome.

use crate::domain::common::{SignalCategory, ValidationStatus};
use crate::domain::context::ProcessingContext;
use crate::domain::explanation::ExplanationChain;
use crate::domain::raw_signal::RawSignalEvent;
use crate::domain::validated_signal::{ValidatedSignal, ValidationResult};
use crate::rules::{default_rules, ValidationRule};

/// Chokepoint alias map used to extract canonical chokepoint names.
const CHOKEPOINT_ALIASES: &[(&str, &str)] = &[
    ("suez canal", "Suez Canal"),
    ("suez", "Suez Canal"),
    ("red sea", "Red Sea"),
    ("bab el-mandeb", "Bab el-Mandeb Strait"),
    ("strait of malacca", "Strait of Malacca"),
    ("panama canal", "Panama Canal"),
];

/// Result of validation: either a valid signal or a rejection with reasons.
#[derive(Debug, Clone)]
pub struct ValidationOutcome {
    pub passed: bool,
    pub signal: Option<ValidatedSignal>,
    pub rejection_reason: Option<String>,
    pub results: Vec<ValidationResult>,
}

/// Multi-rule signal validation.
///
/// Default rule order: liquidity (cheap filter first), anomaly (catch
/// manipulation before semantic analysis), semantic, geographic.
pub struct SignalValidator {
    rules: Vec<Box<dyn ValidationRule>>,
    fail_on_rule_error: bool,
}

impl SignalValidator {
    pub fn new(rules: Vec<Box<dyn ValidationRule>>, fail_on_rule_error: bool) -> Self {
        Self {
            rules,
            fail_on_rule_error,
        }
    }

    /// Validator with the standard rule chain; rule errors are recorded but
    /// do not abort the chain.
    pub fn create_default() -> Self {
        Self::new(default_rules(), false)
    }

    pub fn validate(&self, event: &RawSignalEvent, context: &ProcessingContext) -> ValidationOutcome {
        let mut results: Vec<ValidationResult> = Vec::with_capacity(self.rules.len());
        let mut chain = ExplanationChain::create(context);

        for rule in &self.rules {
            match rule.apply(event) {
                Ok(result) => {
                    let step = rule.explain(event, &result, context.processing_time);
                    chain.push_step(step);
                    let rejected = !result.status.is_passed();
                    let reason = result.reason.clone();
                    results.push(result);
                    if rejected {
                        return ValidationOutcome {
                            passed: false,
                            signal: None,
                            rejection_reason: Some(reason),
                            results,
                        };
                    }
                }
                Err(e) => {
                    let error_result = ValidationResult::new(
                        rule.name(),
                        rule.version(),
                        ValidationStatus::RejectedRuleError,
                        0.0,
                        format!("Rule error: {e}"),
                    );
                    results.push(error_result);
                    if self.fail_on_rule_error {
                        return ValidationOutcome {
                            passed: false,
                            signal: None,
                            rejection_reason: Some(format!("Rule {} errored: {e}", rule.name())),
                            results,
                        };
                    }
                }
            }
        }

        // Only passed results contribute to the score; recorded rule errors
        // (when non-fatal) are excluded.
        let passed_scores: Vec<f64> = results
            .iter()
            .filter(|r| r.status.is_passed())
            .map(|r| r.score)
            .collect();
        let overall_score = if passed_scores.is_empty() {
            0.0
        } else {
            passed_scores.iter().sum::<f64>() / passed_scores.len() as f64
        };
        let liquidity_score = results
            .iter()
            .find(|r| r.rule_name == "liquidity_validation")
            .map(|r| r.score)
            .unwrap_or(0.0);

        let category = infer_category(event);
        let chokepoints = extract_chokepoints(event);
        chain.finalize(context);

        let signal = ValidatedSignal {
            event_id: event.event_id.clone(),
            original_event: event.clone(),
            category,
            relevant_locations: event.inferred_locations.clone(),
            affected_chokepoints: chokepoints,
            validation_results: results.clone(),
            overall_validation_score: overall_score,
            signal_strength: overall_score,
            liquidity_score,
            explanation: chain,
            ruleset_version: context.ruleset_version.clone(),
            validated_at: context.processing_time,
            trace_id: ValidatedSignal::derive_trace_id(
                &event.input_event_hash,
                &context.ruleset_version,
            ),
        };

        ValidationOutcome {
            passed: true,
            signal: Some(signal),
            rejection_reason: None,
            results,
        }
    }
}

/// Infer the signal category from content heuristics.
fn infer_category(event: &RawSignalEvent) -> SignalCategory {
    let content = format!(
        "{} {}",
        event.title,
        event.description.as_deref().unwrap_or("")
    )
    .to_lowercase();
    let in_content_or_keywords =
        |kws: &[&str]| kws.iter().any(|kw| content.contains(kw) || event.keywords.iter().any(|k| k == kw));

    if in_content_or_keywords(&["war", "conflict", "attack", "geopolitical", "houthi"]) {
        SignalCategory::Geopolitical
    } else if in_content_or_keywords(&["strike", "labor", "union"]) {
        SignalCategory::Labor
    } else if in_content_or_keywords(&["port", "canal", "infrastructure", "shipping"]) {
        SignalCategory::Infrastructure
    } else if in_content_or_keywords(&["climate", "weather", "storm"]) {
        SignalCategory::Climate
    } else if in_content_or_keywords(&["regulation", "policy", "law"]) {
        SignalCategory::Regulatory
    } else if in_content_or_keywords(&["economic", "market", "trade"]) {
        SignalCategory::Economic
    } else {
        SignalCategory::Unknown
    }
}

/// Extract canonical chokepoint names via the alias map.
fn extract_chokepoints(event: &RawSignalEvent) -> Vec<String> {
    let content = format!(
        "{} {}",
        event.title,
        event.description.as_deref().unwrap_or("")
    )
    .to_lowercase();

    let mut chokepoints: Vec<String> = Vec::new();
    for (alias, canonical) in CHOKEPOINT_ALIASES {
        if (content.contains(alias) || event.keywords.iter().any(|k| k == alias))
            && !chokepoints.iter().any(|c| c == canonical)
        {
            chokepoints.push((*canonical).to_string());
        }
    }
    chokepoints
}
