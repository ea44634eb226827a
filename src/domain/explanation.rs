//! Explainability primitives.
//!
//! Every emitted signal carries a complete reasoning chain. A signal that
//! cannot produce one must not be emitted.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::domain::context::ProcessingContext;

/// Reference to a parameter consumed by a rule, with its source citation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterReference {
    pub name: String,
    pub value: Value,
    pub unit: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
}

impl ParameterReference {
    pub fn new(name: impl Into<String>, value: Value, unit: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value,
            unit: unit.into(),
            source: None,
        }
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }
}

/// A single step in the reasoning chain.
///
/// The timestamp is explicit and must come from the `ProcessingContext`, it
/// is never defaulted to the wall clock.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExplanationStep {
    pub step_id: u32,
    pub rule_name: String,
    pub rule_version: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub input_summary: BTreeMap<String, Value>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub output_summary: BTreeMap<String, Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub parameters_used: Vec<ParameterReference>,
    pub reasoning: String,
    pub confidence_contribution: f64,
    pub timestamp: DateTime<Utc>,
}

impl ExplanationStep {
    pub fn new(
        step_id: u32,
        rule_name: impl Into<String>,
        rule_version: impl Into<String>,
        reasoning: impl Into<String>,
        confidence_contribution: f64,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            step_id,
            rule_name: rule_name.into(),
            rule_version: rule_version.into(),
            input_summary: BTreeMap::new(),
            output_summary: BTreeMap::new(),
            parameters_used: Vec::new(),
            reasoning: reasoning.into(),
            confidence_contribution: confidence_contribution.clamp(0.0, 1.0),
            timestamp,
        }
    }

    pub fn with_input(mut self, key: impl Into<String>, value: Value) -> Self {
        self.input_summary.insert(key.into(), value);
        self
    }

    pub fn with_output(mut self, key: impl Into<String>, value: Value) -> Self {
        self.output_summary.insert(key.into(), value);
        self
    }

    pub fn with_parameter(mut self, param: ParameterReference) -> Self {
        self.parameters_used.push(param);
        self
    }
}

/// Complete reasoning trace from input to output.
///
/// `started_at` / `completed_at` and every step timestamp derive from the
/// same `ProcessingContext`, so a replayed run reproduces the chain exactly.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExplanationChain {
    pub trace_id: String,
    pub steps: Vec<ExplanationStep>,
    pub total_steps: u32,
    pub started_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl ExplanationChain {
    pub fn create(context: &ProcessingContext) -> Self {
        Self {
            trace_id: context.trace_id.clone(),
            steps: Vec::new(),
            total_steps: 0,
            started_at: context.processing_time,
            completed_at: None,
        }
    }

    /// Append a step, renumbering it to keep step ids contiguous from 1.
    pub fn push_step(&mut self, mut step: ExplanationStep) {
        step.step_id = self.steps.len() as u32 + 1;
        self.steps.push(step);
        self.total_steps = self.steps.len() as u32;
    }

    pub fn finalize(&mut self, context: &ProcessingContext) {
        self.completed_at = Some(context.processing_time);
    }

    /// One-line human summary of the chain.
    pub fn summary(&self) -> String {
        if self.steps.is_empty() {
            return "No reasoning steps recorded.".to_string();
        }
        self.steps
            .iter()
            .map(|s| s.rule_name.as_str())
            .collect::<Vec<_>>()
            .join(" -> ")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn ctx() -> ProcessingContext {
        let t = Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap();
        ProcessingContext::create_for_replay(t, "v1.0.0")
    }

    #[test]
    fn steps_are_renumbered_contiguously() {
        let context = ctx();
        let mut chain = ExplanationChain::create(&context);
        chain.push_step(ExplanationStep::new(
            99,
            "liquidity_validation",
            "1.0.0",
            "ok",
            0.3,
            context.processing_time,
        ));
        chain.push_step(ExplanationStep::new(
            99,
            "semantic_relevance",
            "2.0.0",
            "ok",
            0.2,
            context.processing_time,
        ));
        assert_eq!(chain.steps[0].step_id, 1);
        assert_eq!(chain.steps[1].step_id, 2);
        assert_eq!(chain.total_steps, 2);
        assert_eq!(chain.summary(), "liquidity_validation -> semantic_relevance");
    }

    #[test]
    fn finalize_uses_context_time() {
        let context = ctx();
        let mut chain = ExplanationChain::create(&context);
        chain.finalize(&context);
        assert_eq!(chain.completed_at, Some(context.processing_time));
    }
}
