//! Semantic relevance validation.
//!
//! Rejects obvious sports/entertainment content via a blocklist, then
//! requires whole-word risk-keyword matches across the six risk categories.

use chrono::{DateTime, Utc};
use lazy_static::lazy_static;
use regex::Regex;
use serde_json::json;

use crate::domain::common::ValidationStatus;
use crate::domain::explanation::ExplanationStep;
use crate::domain::raw_signal::RawSignalEvent;
use crate::domain::validated_signal::ValidationResult;
use crate::error::OmenError;
use crate::rules::ValidationRule;

/// Phrases that mark content as sports/entertainment. Matched on phrase
/// boundaries ("euro" must not hit "europe").
const OFF_TOPIC_BLOCKLIST: &[&str] = &[
    "ligue 1",
    "serie a",
    "premier league",
    "la liga",
    "bundesliga",
    "top scorer",
    "relegation",
    "championship",
    "world cup",
    "euro",
    "uefa",
    "fifa",
];

/// Risk categories and their keywords (whole-word match).
const RISK_CATEGORIES: &[(&str, &[&str])] = &[
    (
        "conflict",
        &[
            "war", "attack", "military", "missile", "bomb", "strike", "combat", "invasion",
            "conflict", "hostility", "warfare", "armed",
        ],
    ),
    (
        "sanctions",
        &[
            "sanction", "embargo", "ban", "restriction", "tariff", "trade war", "blacklist",
            "prohibition", "blockade",
        ],
    ),
    (
        "labor",
        &[
            "strike", "labor", "union", "workers", "protest", "walkout", "shutdown", "stoppage",
            "industrial action",
        ],
    ),
    (
        "infrastructure",
        &[
            "port", "canal", "bridge", "tunnel", "terminal", "dock", "berth", "closure",
            "damage", "collapse", "blockage",
        ],
    ),
    (
        "climate",
        &[
            "storm", "hurricane", "typhoon", "flood", "drought", "weather", "cyclone",
            "tsunami", "earthquake",
        ],
    ),
    (
        "regulatory",
        &[
            "regulation", "law", "policy", "compliance", "inspection", "customs", "border",
            "visa", "permit",
        ],
    ),
];

const MIN_RELEVANCE_SCORE: f64 = 0.3;

lazy_static! {
    static ref BLOCKLIST_PATTERNS: Vec<(&'static str, Regex)> = OFF_TOPIC_BLOCKLIST
        .iter()
        .map(|phrase| {
            let re = Regex::new(&format!(r"\b{}\b", regex::escape(phrase)))
                .expect("static blocklist pattern");
            (*phrase, re)
        })
        .collect();
    static ref CATEGORY_PATTERNS: Vec<(&'static str, Vec<(&'static str, Regex)>)> =
        RISK_CATEGORIES
            .iter()
            .map(|(category, keywords)| {
                let patterns = keywords
                    .iter()
                    .map(|kw| {
                        let re = Regex::new(&format!(r"\b{}\b", regex::escape(kw)))
                            .expect("static risk keyword pattern");
                        (*kw, re)
                    })
                    .collect();
                (*category, patterns)
            })
            .collect();
}

#[derive(Default)]
pub struct SemanticRelevanceRule;

impl ValidationRule for SemanticRelevanceRule {
    fn name(&self) -> &'static str {
        "semantic_relevance"
    }

    fn version(&self) -> &'static str {
        "2.0.0"
    }

    fn apply(&self, event: &RawSignalEvent) -> Result<ValidationResult, OmenError> {
        let text = format!(
            "{} {} {}",
            event.title,
            event.description.as_deref().unwrap_or(""),
            event.keywords.join(" ")
        )
        .to_lowercase();

        for (phrase, re) in BLOCKLIST_PATTERNS.iter() {
            if re.is_match(&text) {
                return Ok(ValidationResult::new(
                    self.name(),
                    self.version(),
                    ValidationStatus::RejectedIrrelevantSemantic,
                    0.0,
                    format!("Off-topic (sports/entertainment): '{phrase}'"),
                ));
            }
        }

        let mut matched_categories: Vec<&str> = Vec::new();
        let mut total_matches = 0usize;
        for (category, patterns) in CATEGORY_PATTERNS.iter() {
            let matched = patterns.iter().filter(|(_, re)| re.is_match(&text)).count();
            if matched > 0 {
                matched_categories.push(category);
                total_matches += matched;
            }
        }

        if matched_categories.is_empty() {
            return Ok(ValidationResult::new(
                self.name(),
                self.version(),
                ValidationStatus::RejectedIrrelevantSemantic,
                0.1,
                "No logistics risk keywords detected",
            ));
        }

        let score =
            ((matched_categories.len() as f64) * 0.2 + (total_matches as f64) * 0.1).min(1.0);

        if score < MIN_RELEVANCE_SCORE {
            return Ok(ValidationResult::new(
                self.name(),
                self.version(),
                ValidationStatus::RejectedIrrelevantSemantic,
                score,
                format!("Low semantic relevance score: {score:.2}"),
            ));
        }

        Ok(ValidationResult::new(
            self.name(),
            self.version(),
            ValidationStatus::Passed,
            score,
            format!(
                "Relevant to risk categories: {}",
                matched_categories.join(", ")
            ),
        ))
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
            result.score * 0.25,
            at,
        )
        .with_input("title_length", json!(event.title.len()))
        .with_input("keyword_count", json!(event.keywords.len()))
        .with_output("status", json!(result.status.as_str()))
        .with_output("score", json!(result.score))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::raw_signal::{MarketMetadata, RawEventDraft};

    fn event(title: &str, description: Option<&str>) -> RawSignalEvent {
        RawSignalEvent::new(RawEventDraft {
            event_id: "e1".into(),
            title: title.into(),
            description: description.map(String::from),
            probability: 0.5,
            market: Some(MarketMetadata::minimal("polymarket", "m1")),
            ..Default::default()
        })
    }

    #[test]
    fn sport_alone_does_not_match_port() {
        let rule = SemanticRelevanceRule;
        let result = rule.apply(&event("A sport tournament result", None)).unwrap();
        assert_eq!(result.status, ValidationStatus::RejectedIrrelevantSemantic);
        assert_eq!(result.reason, "No logistics risk keywords detected");
    }

    #[test]
    fn blocklist_rejects_immediately() {
        let rule = SemanticRelevanceRule;
        let result = rule
            .apply(&event("Premier league port city derby", None))
            .unwrap();
        assert_eq!(result.status, ValidationStatus::RejectedIrrelevantSemantic);
        assert_eq!(result.score, 0.0);
        assert!(result.reason.contains("premier league"));
    }

    #[test]
    fn euro_blocklist_entry_does_not_hit_europe() {
        let rule = SemanticRelevanceRule;
        let result = rule
            .apply(&event(
                "Attack threatens shipping between asia and europe",
                None,
            ))
            .unwrap();
        assert_eq!(result.status, ValidationStatus::Passed);
    }

    #[test]
    fn multi_category_event_passes() {
        let rule = SemanticRelevanceRule;
        let result = rule
            .apply(&event(
                "Houthi attack threatens port closure",
                Some("Military conflict escalates near canal"),
            ))
            .unwrap();
        assert_eq!(result.status, ValidationStatus::Passed);
        assert!(result.score >= 0.3);
        assert!(result.reason.contains("conflict"));
        assert!(result.reason.contains("infrastructure"));
    }
}
