//! Signal enricher: context only, never impact.
//!
//! Adds matched keywords, keyword categories, a relevance score, chokepoints
//! and regions. Does not calculate delay, cost, or severity and makes no
//! recommendations.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::domain::raw_signal::RawSignalEvent;
use crate::domain::validated_signal::{ValidatedSignal, ValidationResult};
use crate::rules::keywords::{keyword_categories, matched_keywords, relevance_score};

/// Geographic term lists for extraction (lowercase).
const CHOKEPOINT_TERMS: &[&str] = &[
    "red sea",
    "suez",
    "panama",
    "hormuz",
    "malacca",
    "bosphorus",
    "gibraltar",
    "taiwan strait",
    "bab el-mandeb",
];

const REGION_TERMS: &[&str] = &[
    "asia",
    "europe",
    "america",
    "africa",
    "middle east",
    "pacific",
    "atlantic",
    "mediterranean",
    "china",
    "india",
];

/// Context produced by enrichment, consumed by the generator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Enrichment {
    pub matched_keywords: Vec<String>,
    pub keyword_categories: BTreeMap<String, Vec<String>>,
    pub relevance_score: f64,
    pub matched_chokepoints: Vec<String>,
    pub matched_regions: Vec<String>,
    /// Carried forward from validation.
    pub confidence_factors: BTreeMap<String, f64>,
    pub validation_results: Vec<ValidationResult>,
}

pub struct SignalEnricher {
    chokepoints: Vec<String>,
    regions: Vec<String>,
}

impl SignalEnricher {
    pub fn new() -> Self {
        Self {
            chokepoints: CHOKEPOINT_TERMS.iter().map(|s| s.to_string()).collect(),
            regions: REGION_TERMS.iter().map(|s| s.to_string()).collect(),
        }
    }

    /// Enrich a validated event with context.
    pub fn enrich(&self, event: &RawSignalEvent, validated: &ValidatedSignal) -> Enrichment {
        let text = format!(
            "{} {}",
            event.title,
            event.description.as_deref().unwrap_or("")
        )
        .to_lowercase();

        let keywords = matched_keywords(&text);
        let categories = keyword_categories(&keywords);
        let score = relevance_score(&keywords);

        let matched_chokepoints: Vec<String> = self
            .chokepoints
            .iter()
            .filter(|cp| text.contains(cp.as_str()))
            .cloned()
            .collect();
        let matched_regions: Vec<String> = self
            .regions
            .iter()
            .filter(|r| text.contains(r.as_str()))
            .cloned()
            .collect();

        let mut confidence_factors = BTreeMap::new();
        confidence_factors.insert("signal_strength".to_string(), validated.signal_strength);
        confidence_factors.insert("liquidity_score".to_string(), validated.liquidity_score);
        confidence_factors.insert(
            "validation_score".to_string(),
            validated.overall_validation_score,
        );

        Enrichment {
            matched_keywords: keywords,
            keyword_categories: categories,
            relevance_score: score,
            matched_chokepoints,
            matched_regions,
            confidence_factors,
            validation_results: validated.validation_results.clone(),
        }
    }
}

impl Default for SignalEnricher {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::context::ProcessingContext;
    use crate::domain::raw_signal::{MarketMetadata, RawEventDraft};
    use crate::pipeline::validator::SignalValidator;
    use chrono::{TimeZone, Utc};

    #[test]
    fn enrichment_finds_chokepoints_and_regions() {
        let event = RawSignalEvent::new(RawEventDraft {
            event_id: "e1".into(),
            title: "Red Sea attack disrupts shipping between asia and europe".into(),
            probability: 0.6,
            keywords: vec!["red sea".into(), "shipping".into()],
            market: Some(MarketMetadata {
                current_liquidity_usd: 20_000.0,
                total_volume_usd: 100_000.0,
                ..MarketMetadata::minimal("polymarket", "m1")
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
        assert!(enrichment.matched_chokepoints.contains(&"red sea".to_string()));
        assert!(enrichment.matched_regions.contains(&"asia".to_string()));
        assert!(enrichment.matched_regions.contains(&"europe".to_string()));
        assert!(enrichment.relevance_score > 0.0);
        assert_eq!(enrichment.confidence_factors.len(), 3);
        assert_eq!(enrichment.validation_results.len(), 4);
    }

    #[test]
    fn relevance_score_buckets_carry_through() {
        let event = RawSignalEvent::new(RawEventDraft {
            event_id: "e2".into(),
            title: "cargo delayed".into(),
            probability: 0.5,
            market: Some(MarketMetadata {
                current_liquidity_usd: 20_000.0,
                ..MarketMetadata::minimal("polymarket", "m2")
            }),
            ..Default::default()
        });
        let ctx = ProcessingContext::create_for_replay(
            Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap(),
            "v1.0.0",
        );
        // Bypass validation specifics; enrichment is a pure function of the
        // event text plus carried-forward scores.
        let validated = SignalValidator::create_default().validate(&event, &ctx);
        if let Some(v) = validated.signal {
            let enrichment = SignalEnricher::new().enrich(&event, &v);
            assert!((enrichment.relevance_score - 0.3).abs() < 1e-9);
        }
    }
}
