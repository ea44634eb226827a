//! The final OMEN intelligence artifact.
//!
//! Contract with downstream consumers: structured, explainable, timestamped,
//! reproducible given the same inputs. No risk decisions, no impact metrics,
//! no recommendations. If a signal cannot meet these criteria it must not be
//! emitted.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::common::{
    deterministic_hash, ConfidenceLevel, ProbabilitySource, SignalCategory,
};
use crate::domain::explanation::ExplanationChain;

/// Geographic context attached to a signal. Context only, no impact.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct GeographicContext {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub regions: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub chokepoints: Vec<String>,
}

/// Temporal context: when the underlying event was observed and when the
/// source market resolves, if known.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct TemporalContext {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub event_horizon: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resolution_date: Option<DateTime<Utc>>,
}

/// A piece of evidence supporting the signal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvidenceItem {
    pub source_name: String,
    pub source_kind: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// The decision-grade output of the pipeline. Immutable after generation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OmenSignal {
    // Identity
    pub signal_id: String,
    pub source_event_id: String,
    pub trace_id: String,
    pub input_event_hash: String,

    // Content
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    // Probability
    pub probability: f64,
    pub probability_source: ProbabilitySource,

    // Confidence (explicit, never implied)
    pub confidence_score: f64,
    pub confidence_level: ConfidenceLevel,

    // Classification
    pub category: SignalCategory,
    /// Sorted union of keywords, keyword categories, and the source kind.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,

    // Context
    #[serde(default)]
    pub geography: GeographicContext,
    #[serde(default)]
    pub temporal: TemporalContext,

    // Evidence
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub evidence: Vec<EvidenceItem>,

    // Reproducibility contract
    pub ruleset_version: String,
    pub explanation: ExplanationChain,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub market_url: Option<String>,
    pub generated_at: DateTime<Utc>,
}

impl OmenSignal {
    /// Standard signal id: `OMEN-` + first 12 hex chars of the trace id,
    /// uppercased.
    pub fn standard_id(trace_id: &str) -> String {
        format!("OMEN-{}", trace_id[..trace_id.len().min(12)].to_uppercase())
    }

    /// Live-cycle signal id: `OMEN-LIVE` + 8 hex chars derived from the
    /// trace id. The distinct prefix makes API mode filtering trivial.
    pub fn live_id(trace_id: &str) -> String {
        let h = deterministic_hash(&[trace_id, "live"]);
        format!("OMEN-LIVE{}", h[..8].to_uppercase())
    }

    pub fn is_live(&self) -> bool {
        self.signal_id.starts_with("OMEN-LIVE")
    }

    /// Canonical JSON: serde output with all absent optionals elided.
    pub fn canonical_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::context::ProcessingContext;
    use chrono::TimeZone;

    fn sample() -> OmenSignal {
        let t = Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap();
        let ctx = ProcessingContext::create_for_replay(t, "v1.0.0");
        OmenSignal {
            signal_id: OmenSignal::standard_id("abcdef0123456789"),
            source_event_id: "polymarket-m-001".into(),
            trace_id: "abcdef0123456789".into(),
            input_event_hash: "1111222233334444".into(),
            title: "Red Sea shipping disruption".into(),
            description: None,
            probability: 0.75,
            probability_source: ProbabilitySource::MarketPrice,
            confidence_score: 0.8,
            confidence_level: ConfidenceLevel::High,
            category: SignalCategory::Geopolitical,
            tags: vec!["red sea".into(), "shipping".into()],
            geography: GeographicContext {
                regions: vec!["middle east".into()],
                chokepoints: vec!["Red Sea".into()],
            },
            temporal: TemporalContext::default(),
            evidence: vec![],
            ruleset_version: "v1.0.0".into(),
            explanation: ExplanationChain::create(&ctx),
            market_url: None,
            generated_at: t,
        }
    }

    #[test]
    fn id_prefixes() {
        assert_eq!(OmenSignal::standard_id("abcdef0123456789"), "OMEN-ABCDEF012345");
        let live = OmenSignal::live_id("abcdef0123456789");
        assert!(live.starts_with("OMEN-LIVE"));
        assert_eq!(live.len(), "OMEN-LIVE".len() + 8);
        // Deterministic
        assert_eq!(live, OmenSignal::live_id("abcdef0123456789"));
    }

    #[test]
    fn canonical_json_round_trips() {
        let s = sample();
        let json = s.canonical_json().unwrap();
        let back: OmenSignal = serde_json::from_str(&json).unwrap();
        assert_eq!(back, s);
        // Serializing again is byte-identical.
        assert_eq!(back.canonical_json().unwrap(), json);
    }

    #[test]
    fn canonical_json_elides_absent_optionals() {
        let json = sample().canonical_json().unwrap();
        assert!(!json.contains("\"description\""));
        assert!(!json.contains("\"market_url\""));
    }
}
