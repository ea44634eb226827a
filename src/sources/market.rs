//! Prediction market source.
//!
//! Maps raw market objects (Gamma-style JSON) into `RawSignalEvent`s:
//! extracts the YES probability from the outcome-price field in its several
//! upstream encodings, fills liquidity/volume, maps keywords against the
//! logistics vocabulary, and infers locations from the chokepoint
//! dictionary. Per-item mapping failures are skipped and counted, never
//! propagated.

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use tracing::{debug, warn};

use crate::domain::attestation::SourceType;
use crate::domain::common::{GeoLocation, ProbabilitySource};
use crate::domain::raw_signal::{MarketMetadata, RawEventDraft, RawSignalEvent};
use crate::error::SourceError;
use crate::gate::SourceRegistry;
use crate::observability::MetricsCollector;
use crate::rules::geographic::CHOKEPOINTS;
use crate::rules::keywords::matched_keywords;
use crate::sources::{SignalSource, SourceCore};

/// Transport abstraction: returns raw market objects plus the raw response
/// body (hashed for attestation).
#[async_trait]
pub trait MarketDataProvider: Send + Sync {
    async fn fetch_markets(&self, limit: usize) -> Result<(Vec<Value>, Vec<u8>), SourceError>;
}

pub struct MarketSource {
    core: SourceCore,
    provider: Arc<dyn MarketDataProvider>,
}

impl MarketSource {
    pub fn new(
        source_id: impl Into<String>,
        source_type: SourceType,
        provider: Arc<dyn MarketDataProvider>,
        registry: Arc<SourceRegistry>,
        metrics: Arc<MetricsCollector>,
    ) -> Self {
        Self {
            core: SourceCore::new(source_id, source_type, registry, metrics),
            provider,
        }
    }

    /// Map one raw market object. `None` when the object is unusable.
    pub fn map_market(&self, raw: &Value, observed_at: DateTime<Utc>) -> Option<RawSignalEvent> {
        let id = raw
            .get("id")
            .map(value_to_string)
            .filter(|s| !s.is_empty())?;
        let title = raw
            .get("question")
            .or_else(|| raw.get("title"))
            .and_then(Value::as_str)
            .unwrap_or("")
            .chars()
            .take(500)
            .collect::<String>();
        if title.is_empty() {
            return None;
        }
        let description = raw
            .get("description")
            .and_then(Value::as_str)
            .map(|d| d.chars().take(5000).collect::<String>());

        let (probability, probability_source) = extract_probability(raw);

        let text = format!("{title} {}", description.as_deref().unwrap_or(""));
        let keywords = matched_keywords(&text);
        let locations = infer_locations(&text);

        let market = MarketMetadata {
            source: self.core.source_id.clone(),
            market_id: id.clone(),
            market_url: raw
                .get("slug")
                .and_then(Value::as_str)
                .map(|slug| format!("https://polymarket.com/event/{slug}")),
            created_at: raw
                .get("createdAt")
                .and_then(Value::as_str)
                .and_then(parse_timestamp),
            resolution_date: raw
                .get("endDate")
                .and_then(Value::as_str)
                .and_then(parse_timestamp),
            total_volume_usd: number_or_string(raw.get("volume")).unwrap_or(0.0).max(0.0),
            current_liquidity_usd: number_or_string(raw.get("liquidity"))
                .unwrap_or(0.0)
                .max(0.0),
            num_traders: raw
                .get("numTraders")
                .and_then(Value::as_u64)
                .map(|n| n as u32),
            condition_token_id: raw
                .get("conditionId")
                .and_then(Value::as_str)
                .map(String::from),
            clob_token_ids: parse_string_list(raw.get("clobTokenIds")),
        };

        Some(RawSignalEvent::new(RawEventDraft {
            event_id: format!("{}-{id}", self.core.source_id),
            title,
            description,
            probability,
            probability_source,
            keywords,
            inferred_locations: locations,
            market: Some(market),
            observed_at: Some(observed_at),
            raw_payload: Some(raw.clone()),
            ..Default::default()
        }))
    }
}

#[async_trait]
impl SignalSource for MarketSource {
    fn source_id(&self) -> &str {
        &self.core.source_id
    }

    fn source_type(&self) -> SourceType {
        self.core.source_type
    }

    async fn fetch_events(
        &self,
        limit: usize,
        asof: Option<DateTime<Utc>>,
    ) -> Result<Vec<RawSignalEvent>, SourceError> {
        if let Some(batch) = self.core.replay(asof) {
            debug!(source = %self.core.source_id, "serving replayed batch");
            return Ok(batch);
        }
        self.core.breaker.try_acquire(&self.core.source_id)?;

        let started = Instant::now();
        let observed_at = asof.unwrap_or_else(Utc::now);
        match self.provider.fetch_markets(limit).await {
            Ok((markets, raw_body)) => {
                let mut events = Vec::new();
                let mut skipped = 0usize;
                for raw in markets.iter().take(limit) {
                    match self.map_market(raw, observed_at) {
                        Some(event) => events.push(event),
                        None => skipped += 1,
                    }
                }
                if skipped > 0 {
                    warn!(source = %self.core.source_id, skipped, "skipped unmappable markets");
                }
                self.core.record_success(
                    &raw_body,
                    events.len(),
                    started.elapsed().as_secs_f64() * 1000.0,
                );
                self.core.store_batch(asof, &events);
                Ok(events)
            }
            Err(e) => {
                self.core
                    .record_failure(started.elapsed().as_secs_f64() * 1000.0);
                Err(e)
            }
        }
    }
}

/// Extract the YES probability. Handles a JSON-encoded list string, a
/// comma-separated string, a numeric list, then the best-ask fields, else a
/// flagged 0.5 fallback.
fn extract_probability(raw: &Value) -> (f64, ProbabilitySource) {
    let prices = raw.get("outcomePrices").or_else(|| raw.get("outcome_prices"));

    if let Some(Value::String(s)) = prices {
        if let Ok(parsed) = serde_json::from_str::<Vec<Value>>(s) {
            if let Some(p) = parsed.first().and_then(value_to_f64) {
                return (p.clamp(0.0, 1.0), ProbabilitySource::MarketPrice);
            }
        }
        if s.contains(',') {
            if let Some(first) = s.split(',').next() {
                if let Ok(p) = first.trim().parse::<f64>() {
                    return (p.clamp(0.0, 1.0), ProbabilitySource::MarketPrice);
                }
            }
        }
    }
    if let Some(Value::Array(arr)) = prices {
        if let Some(p) = arr.first().and_then(value_to_f64) {
            return (p.clamp(0.0, 1.0), ProbabilitySource::MarketPrice);
        }
    }

    for (key, source) in [
        ("probability", ProbabilitySource::MarketPrice),
        ("bestAsk", ProbabilitySource::BestAsk),
        ("price", ProbabilitySource::MarketPrice),
    ] {
        if let Some(p) = raw.get(key).and_then(value_to_f64) {
            return (p.clamp(0.0, 1.0), source);
        }
    }

    (0.5, ProbabilitySource::Fallback)
}

/// Infer locations by scanning for chokepoint names in the text.
fn infer_locations(text: &str) -> Vec<GeoLocation> {
    let lower = text.to_lowercase();
    CHOKEPOINTS
        .iter()
        .filter(|(name, _, _)| lower.contains(&name.to_lowercase()))
        .map(|(name, lat, lon)| GeoLocation::named(*lat, *lon, *name))
        .collect()
}

fn value_to_string(v: &Value) -> String {
    match v {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        _ => String::new(),
    }
}

fn value_to_f64(v: &Value) -> Option<f64> {
    match v {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn number_or_string(v: Option<&Value>) -> Option<f64> {
    v.and_then(value_to_f64)
}

/// Some upstream responses return JSON arrays as a string
/// (e.g. "[\"123\",\"456\"]").
fn parse_string_list(v: Option<&Value>) -> Option<Vec<String>> {
    match v? {
        Value::Array(arr) => Some(arr.iter().map(value_to_string).collect()),
        Value::String(s) => serde_json::from_str::<Vec<String>>(s).ok(),
        _ => None,
    }
}

fn parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .ok()
        .map(|t| t.with_timezone(&Utc))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn source() -> MarketSource {
        MarketSource::new(
            "polymarket",
            SourceType::Mock,
            Arc::new(EmptyProvider),
            Arc::new(SourceRegistry::new()),
            Arc::new(MetricsCollector::new()),
        )
    }

    struct EmptyProvider;
    #[async_trait]
    impl MarketDataProvider for EmptyProvider {
        async fn fetch_markets(&self, _limit: usize) -> Result<(Vec<Value>, Vec<u8>), SourceError> {
            Ok((vec![], b"[]".to_vec()))
        }
    }

    #[test]
    fn probability_from_json_encoded_string() {
        let raw = json!({"outcomePrices": "[\"0.75\", \"0.25\"]"});
        let (p, src) = extract_probability(&raw);
        assert_eq!(p, 0.75);
        assert_eq!(src, ProbabilitySource::MarketPrice);
    }

    #[test]
    fn probability_from_comma_string() {
        let raw = json!({"outcomePrices": "0.62, 0.38"});
        let (p, _) = extract_probability(&raw);
        assert_eq!(p, 0.62);
    }

    #[test]
    fn probability_from_best_ask() {
        let raw = json!({"bestAsk": 0.41});
        let (p, src) = extract_probability(&raw);
        assert_eq!(p, 0.41);
        assert_eq!(src, ProbabilitySource::BestAsk);
    }

    #[test]
    fn probability_fallback_is_flagged() {
        let raw = json!({"question": "anything"});
        let (p, src) = extract_probability(&raw);
        assert_eq!(p, 0.5);
        assert_eq!(src, ProbabilitySource::Fallback);
    }

    #[test]
    fn map_market_builds_event_with_keywords_and_locations() {
        let raw = json!({
            "id": "m-001",
            "question": "Red Sea shipping disruption before July?",
            "description": "Will commercial shipping through the Suez Canal be disrupted",
            "outcomePrices": "[\"0.75\",\"0.25\"]",
            "volume": "500000",
            "liquidity": "50000",
            "numTraders": 420,
        });
        let event = source().map_market(&raw, Utc::now()).unwrap();
        assert_eq!(event.event_id, "polymarket-m-001");
        assert_eq!(event.probability, 0.75);
        assert_eq!(event.market.total_volume_usd, 500_000.0);
        assert!(event.keywords.iter().any(|k| k == "red sea"));
        assert!(!event.inferred_locations.is_empty());
        // Keywords are sorted for deterministic hashing.
        let mut sorted = event.keywords.clone();
        sorted.sort();
        assert_eq!(event.keywords, sorted);
    }

    #[test]
    fn unmappable_market_is_skipped() {
        let raw = json!({"volume": 10});
        assert!(source().map_market(&raw, Utc::now()).is_none());
    }

    #[tokio::test]
    async fn replay_returns_cached_batch() {
        let registry = Arc::new(SourceRegistry::new());
        let metrics = Arc::new(MetricsCollector::new());

        struct OneMarket;
        #[async_trait]
        impl MarketDataProvider for OneMarket {
            async fn fetch_markets(
                &self,
                _limit: usize,
            ) -> Result<(Vec<Value>, Vec<u8>), SourceError> {
                Ok((
                    vec![json!({
                        "id": "m-1",
                        "question": "Suez canal closure?",
                        "outcomePrices": "[\"0.4\"]",
                        "liquidity": 5000,
                        "volume": 50000,
                    })],
                    b"body".to_vec(),
                ))
            }
        }

        let source = MarketSource::new(
            "polymarket",
            SourceType::Real,
            Arc::new(OneMarket),
            registry.clone(),
            metrics,
        );
        let asof = Utc::now();
        let first = source.fetch_events(10, Some(asof)).await.unwrap();
        let second = source.fetch_events(10, Some(asof)).await.unwrap();
        assert_eq!(first.len(), 1);
        assert_eq!(first[0].input_event_hash, second[0].input_event_hash);
        // The response hash was recorded for attestation.
        assert!(registry
            .get("polymarket")
            .unwrap()
            .last_response_hash
            .is_some());
    }
}
