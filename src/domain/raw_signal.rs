//! Raw signal event: the entry point to OMEN.
//!
//! Every source adapter normalizes its upstream format into this single
//! internal shape. The event is immutable once constructed and carries its
//! deterministic fingerprint (`input_event_hash`), computed eagerly so it is
//! cheap to log and compare.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::domain::common::{
    deterministic_hash, GeoLocation, ProbabilityMovement, ProbabilitySource,
};

/// Metadata about the source market (or market-like source).
///
/// OMEN is market-agnostic; this captures source-specific details.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketMetadata {
    /// Source identifier, e.g. "polymarket", "news", "commodity".
    pub source: String,
    pub market_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub market_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resolution_date: Option<DateTime<Utc>>,
    pub total_volume_usd: f64,
    pub current_liquidity_usd: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub num_traders: Option<u32>,
    /// Condition token id for CLOB/WebSocket price tracking, when available.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub condition_token_id: Option<String>,
    /// CLOB token ids (YES and NO) for orderbook access.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub clob_token_ids: Option<Vec<String>>,
}

impl MarketMetadata {
    pub fn minimal(source: impl Into<String>, market_id: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            market_id: market_id.into(),
            market_url: None,
            created_at: None,
            resolution_date: None,
            total_volume_usd: 0.0,
            current_liquidity_usd: 0.0,
            num_traders: None,
            condition_token_id: None,
            clob_token_ids: None,
        }
    }
}

/// Everything a source adapter supplies before the fingerprint is computed.
#[derive(Debug, Clone, Default)]
pub struct RawEventDraft {
    pub event_id: String,
    pub title: String,
    pub description: Option<String>,
    pub probability: f64,
    pub probability_source: ProbabilitySource,
    pub movement: Option<ProbabilityMovement>,
    pub keywords: Vec<String>,
    pub inferred_locations: Vec<GeoLocation>,
    pub market: Option<MarketMetadata>,
    pub observed_at: Option<DateTime<Utc>>,
    pub market_last_updated: Option<DateTime<Utc>>,
    pub source_metrics: BTreeMap<String, Value>,
    pub raw_payload: Option<Value>,
}

/// Normalized event, common to all sources. Immutable once created.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawSignalEvent {
    pub event_id: String,
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// Current YES probability in [0, 1].
    pub probability: f64,
    pub probability_source: ProbabilitySource,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub movement: Option<ProbabilityMovement>,

    /// Lowercased, deduplicated, sorted.
    pub keywords: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub inferred_locations: Vec<GeoLocation>,

    pub market: MarketMetadata,

    /// When OMEN observed this data. Not part of event identity.
    pub observed_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub market_last_updated: Option<DateTime<Utc>>,

    /// Numeric evidence the adapter used for its classification.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub source_metrics: BTreeMap<String, Value>,

    /// Original upstream payload, for debugging only. Never serialized and
    /// never hashed.
    #[serde(skip)]
    pub raw_payload: Option<Value>,

    /// Deterministic fingerprint over the canonical identity tuple.
    pub input_event_hash: String,
}

impl RawSignalEvent {
    /// Build an event, normalizing keywords and computing the fingerprint.
    pub fn new(draft: RawEventDraft) -> Self {
        let mut keywords: Vec<String> = draft
            .keywords
            .iter()
            .map(|k| k.trim().to_lowercase())
            .filter(|k| !k.is_empty())
            .collect();
        keywords.sort();
        keywords.dedup();

        let market = draft
            .market
            .unwrap_or_else(|| MarketMetadata::minimal("unknown", &draft.event_id));

        let probability = draft.probability.clamp(0.0, 1.0);
        let input_event_hash = Self::compute_hash(
            &draft.event_id,
            &draft.title,
            draft.description.as_deref(),
            probability,
            draft.movement.as_ref(),
            &keywords,
            &market,
        );

        Self {
            event_id: draft.event_id,
            title: draft.title,
            description: draft.description,
            probability,
            probability_source: draft.probability_source,
            movement: draft.movement,
            keywords,
            inferred_locations: draft.inferred_locations,
            market,
            observed_at: draft.observed_at.unwrap_or_else(Utc::now),
            market_last_updated: draft.market_last_updated,
            source_metrics: draft.source_metrics,
            raw_payload: draft.raw_payload,
            input_event_hash,
        }
    }

    pub fn probability_is_fallback(&self) -> bool {
        self.probability_source.is_fallback()
    }

    /// Canonical fingerprint covering exactly the fields that define event
    /// identity. Observation time, derived locations, source metrics, the
    /// probability-source flag, and the raw payload are intentionally
    /// excluded: the same event observed twice hashes identically.
    fn compute_hash(
        event_id: &str,
        title: &str,
        description: Option<&str>,
        probability: f64,
        movement: Option<&ProbabilityMovement>,
        sorted_keywords: &[String],
        market: &MarketMetadata,
    ) -> String {
        let movement_str = movement
            .map(|m| {
                format!(
                    "{}|{}|{}|{}",
                    m.current, m.previous, m.delta, m.window_hours
                )
            })
            .unwrap_or_default();
        let keywords_str = sorted_keywords.join(",");
        let probability_str = format!("{probability:.10}");
        let volume_str = format!("{:.2}", market.total_volume_usd);
        let liquidity_str = format!("{:.2}", market.current_liquidity_usd);

        deterministic_hash(&[
            event_id,
            title,
            description.unwrap_or(""),
            &probability_str,
            &movement_str,
            &keywords_str,
            &market.source,
            &market.market_id,
            &volume_str,
            &liquidity_str,
        ])
    }
}
