//! Signal generator: projects a validated, enriched signal into the final
//! `OmenSignal` artifact.
//!
//! All fields are populated deterministically from the validated signal, the
//! enrichment, and the processing context.

use serde_json::json;

use crate::domain::common::{ConfidenceLevel, SignalCategory};
use crate::domain::context::ProcessingContext;
use crate::domain::explanation::ExplanationStep;
use crate::domain::omen_signal::{
    EvidenceItem, GeographicContext, OmenSignal, TemporalContext,
};
use crate::domain::validated_signal::ValidatedSignal;
use crate::pipeline::enricher::Enrichment;

/// Per-source reliability constants and source kinds.
const SOURCE_RELIABILITY: &[(&str, f64, &str)] = &[
    ("polymarket", 0.9, "prediction_market"),
    ("news", 0.7, "news"),
    ("commodity", 0.8, "commodity"),
    ("ais", 0.75, "ais"),
    ("freight", 0.75, "freight"),
    ("weather", 0.7, "weather"),
];

const DEFAULT_RELIABILITY: f64 = 0.6;

fn source_profile(source: &str) -> (f64, &'static str) {
    for (name, reliability, kind) in SOURCE_RELIABILITY {
        if source == *name || source.starts_with(&format!("{name}_")) {
            return (*reliability, kind);
        }
    }
    (DEFAULT_RELIABILITY, "unknown")
}

/// Which id scheme a generated signal uses. The background generator mints
/// live-cycle ids so API mode filtering stays a prefix check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IdStyle {
    #[default]
    Standard,
    Live,
}

pub struct SignalGenerator;

impl SignalGenerator {
    pub fn new() -> Self {
        Self
    }

    pub fn generate(
        &self,
        validated: &ValidatedSignal,
        enrichment: &Enrichment,
        context: &ProcessingContext,
        id_style: IdStyle,
    ) -> OmenSignal {
        let event = &validated.original_event;
        let (source_reliability, source_kind) = source_profile(&event.market.source);

        let liquidity_factor = validated.liquidity_score;
        let geographic_factor = validated
            .validation_results
            .iter()
            .find(|r| r.rule_name == "geographic_relevance")
            .map(|r| r.score)
            .unwrap_or(enrichment.relevance_score);
        let confidence_score =
            (liquidity_factor + geographic_factor + source_reliability) / 3.0;

        let trace_id = validated.trace_id.clone();
        let signal_id = match id_style {
            IdStyle::Standard => OmenSignal::standard_id(&trace_id),
            IdStyle::Live => OmenSignal::live_id(&trace_id),
        };

        // Tags: sorted union of keywords, keyword categories, source kind.
        let mut tags: Vec<String> = event.keywords.clone();
        tags.extend(enrichment.keyword_categories.keys().cloned());
        tags.push(source_kind.to_string());
        tags.sort();
        tags.dedup();

        let chokepoints = if !validated.affected_chokepoints.is_empty() {
            validated.affected_chokepoints.clone()
        } else {
            enrichment.matched_chokepoints.clone()
        };

        let mut explanation = validated.explanation.clone();
        explanation.push_step(
            ExplanationStep::new(
                1,
                "signal_generation",
                "1.0.0",
                format!(
                    "Projected validated event into OMEN signal with confidence {:.2} ({})",
                    confidence_score,
                    ConfidenceLevel::from_score(confidence_score).as_str()
                ),
                confidence_score.clamp(0.0, 1.0),
                context.processing_time,
            )
            .with_input("liquidity_factor", json!(liquidity_factor))
            .with_input("geographic_factor", json!(geographic_factor))
            .with_input("source_reliability", json!(source_reliability))
            .with_output("signal_id", json!(signal_id))
            .with_output("confidence_score", json!(confidence_score)),
        );
        explanation.finalize(context);

        let category = if validated.category == SignalCategory::Unknown
            && !enrichment.keyword_categories.is_empty()
        {
            // Keyword categories can sharpen an unknown classification.
            if enrichment.keyword_categories.contains_key("geopolitical") {
                SignalCategory::Geopolitical
            } else if enrichment.keyword_categories.contains_key("weather") {
                SignalCategory::Climate
            } else if enrichment.keyword_categories.contains_key("economic") {
                SignalCategory::Economic
            } else {
                SignalCategory::Other
            }
        } else {
            validated.category
        };

        OmenSignal {
            signal_id,
            source_event_id: event.event_id.clone(),
            trace_id,
            input_event_hash: event.input_event_hash.clone(),
            title: event.title.clone(),
            description: event.description.clone(),
            probability: event.probability,
            probability_source: event.probability_source,
            confidence_score,
            confidence_level: ConfidenceLevel::from_score(confidence_score),
            category,
            tags,
            geography: GeographicContext {
                regions: enrichment.matched_regions.clone(),
                chokepoints,
            },
            temporal: TemporalContext {
                event_horizon: event.market.created_at,
                resolution_date: event.market.resolution_date,
            },
            evidence: vec![EvidenceItem {
                source_name: event.market.source.clone(),
                source_kind: source_kind.to_string(),
                url: event.market.market_url.clone(),
                description: Some(format!(
                    "Market {} observed at {}",
                    event.market.market_id,
                    event.observed_at.to_rfc3339()
                )),
            }],
            ruleset_version: validated.ruleset_version.clone(),
            explanation,
            market_url: event.market.market_url.clone(),
            generated_at: context.processing_time,
        }
    }
}

impl Default for SignalGenerator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::common::GeoLocation;
    use crate::domain::raw_signal::{MarketMetadata, RawEventDraft, RawSignalEvent};
    use crate::pipeline::enricher::SignalEnricher;
    use crate::pipeline::validator::SignalValidator;
    use chrono::{TimeZone, Utc};

    fn generate_once() -> OmenSignal {
        let event = RawSignalEvent::new(RawEventDraft {
            event_id: "polymarket-m-001".into(),
            title: "Red Sea shipping disruption".into(),
            description: Some("Houthi attacks threaten commercial vessels".into()),
            probability: 0.75,
            keywords: vec!["red sea".into(), "shipping".into(), "houthi".into()],
            inferred_locations: vec![GeoLocation::new(15.5, 42.5)],
            market: Some(MarketMetadata {
                current_liquidity_usd: 50_000.0,
                total_volume_usd: 500_000.0,
                num_traders: Some(420),
                ..MarketMetadata::minimal("polymarket", "m-001")
            }),
            ..Default::default()
        });
        let ctx = ProcessingContext::create_for_replay(
            Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap(),
            "v1.0.0",
        );
        let validated = SignalValidator::create_default()
            .validate(&event, &ctx)
            .signal
            .unwrap();
        let enrichment = SignalEnricher::new().enrich(&event, &validated);
        SignalGenerator::new().generate(&validated, &enrichment, &ctx, IdStyle::Standard)
    }

    #[test]
    fn red_sea_scenario_shape() {
        let signal = generate_once();
        assert!(signal.signal_id.starts_with("OMEN-"));
        assert!(!signal.signal_id.starts_with("OMEN-LIVE"));
        assert_eq!(signal.category, SignalCategory::Geopolitical);
        assert!(matches!(
            signal.confidence_level,
            ConfidenceLevel::Medium | ConfidenceLevel::High
        ));
        assert!(signal
            .geography
            .chokepoints
            .contains(&"Red Sea".to_string()));
        assert_eq!(signal.probability, 0.75);
        assert!(signal.explanation.total_steps >= 5);
        assert!(signal.explanation.completed_at.is_some());
    }

    #[test]
    fn generation_is_bytewise_deterministic() {
        let a = generate_once();
        let b = generate_once();
        assert_eq!(a.canonical_json().unwrap(), b.canonical_json().unwrap());
    }

    #[test]
    fn tags_are_sorted_and_include_source_kind() {
        let signal = generate_once();
        let mut sorted = signal.tags.clone();
        sorted.sort();
        assert_eq!(signal.tags, sorted);
        assert!(signal.tags.contains(&"prediction_market".to_string()));
    }

    #[test]
    fn confidence_is_mean_of_three_factors() {
        let signal = generate_once();
        // liquidity 50k/(10*1000) = 1.0 capped; geographic from rule; source 0.9
        assert!(signal.confidence_score > 0.5 && signal.confidence_score <= 1.0);
    }
}
