//! Weather source.
//!
//! Emits events for storm alerts threatening chokepoints or shipping
//! regions. Probability blends storm category with path confidence.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::debug;

use crate::domain::attestation::SourceType;
use crate::domain::common::{GeoLocation, ProbabilitySource};
use crate::domain::raw_signal::{MarketMetadata, RawEventDraft, RawSignalEvent};
use crate::error::SourceError;
use crate::gate::SourceRegistry;
use crate::observability::MetricsCollector;
use crate::sources::{SignalSource, SourceCore};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StormAlert {
    pub storm_id: String,
    pub name: String,
    /// Saffir-Simpson-like category 1..=5.
    pub category: u8,
    /// Forecast path confidence in [0, 1].
    pub path_confidence: f64,
    pub latitude: f64,
    pub longitude: f64,
    /// Region label, e.g. "south china sea".
    pub region: String,
    pub observed_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct WeatherConfig {
    /// Minimum category that produces an event.
    pub min_category: u8,
}

impl Default for WeatherConfig {
    fn default() -> Self {
        Self { min_category: 2 }
    }
}

#[async_trait]
pub trait WeatherProvider: Send + Sync {
    async fn fetch_alerts(&self) -> Result<(Vec<StormAlert>, Vec<u8>), SourceError>;
}

pub struct WeatherSource {
    core: SourceCore,
    provider: Arc<dyn WeatherProvider>,
    config: WeatherConfig,
}

impl WeatherSource {
    pub fn new(
        source_id: impl Into<String>,
        source_type: SourceType,
        provider: Arc<dyn WeatherProvider>,
        registry: Arc<SourceRegistry>,
        metrics: Arc<MetricsCollector>,
    ) -> Self {
        Self {
            core: SourceCore::new(source_id, source_type, registry, metrics),
            provider,
            config: WeatherConfig::default(),
        }
    }

    pub fn map_storm_alert(
        &self,
        storm: &StormAlert,
        observed_at: DateTime<Utc>,
    ) -> Option<RawSignalEvent> {
        if storm.category < self.config.min_category {
            return None;
        }
        let category_score = (storm.category as f64 / 5.0).min(1.0);
        let probability =
            (category_score * 0.7 + storm.path_confidence.clamp(0.0, 1.0) * 0.3).clamp(0.0, 1.0);
        let date = observed_at.format("%Y%m%d%H").to_string();

        let mut source_metrics = BTreeMap::new();
        source_metrics.insert("category".into(), json!(storm.category));
        source_metrics.insert("path_confidence".into(), json!(storm.path_confidence));
        source_metrics.insert("region".into(), json!(storm.region));

        let event_id = format!(
            "weather-storm-{}-{date}",
            storm.storm_id.to_lowercase()
        );
        Some(RawSignalEvent::new(RawEventDraft {
            event_id: event_id.clone(),
            title: format!(
                "Category {} storm {} near {}",
                storm.category, storm.name, storm.region
            ),
            description: Some(format!(
                "Storm {} at category {} with {:.0}% path confidence, tracking through {}",
                storm.name,
                storm.category,
                storm.path_confidence * 100.0,
                storm.region
            )),
            probability,
            probability_source: ProbabilitySource::Derived,
            keywords: vec![
                "weather".into(),
                "storm".into(),
                storm.region.to_lowercase(),
                format!("category_{}", storm.category),
            ],
            inferred_locations: vec![GeoLocation::named(
                storm.latitude,
                storm.longitude,
                storm.name.clone(),
            )],
            market: Some(MarketMetadata::minimal(
                self.core.source_id.clone(),
                event_id,
            )),
            observed_at: Some(observed_at),
            source_metrics,
            ..Default::default()
        }))
    }
}

#[async_trait]
impl SignalSource for WeatherSource {
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
        match self.provider.fetch_alerts().await {
            Ok((alerts, raw_body)) => {
                let events: Vec<RawSignalEvent> = alerts
                    .iter()
                    .filter_map(|storm| self.map_storm_alert(storm, observed_at))
                    .take(limit)
                    .collect();
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

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn source() -> WeatherSource {
        struct NoOp;
        #[async_trait]
        impl WeatherProvider for NoOp {
            async fn fetch_alerts(&self) -> Result<(Vec<StormAlert>, Vec<u8>), SourceError> {
                Ok((vec![], vec![]))
            }
        }
        WeatherSource::new(
            "weather",
            SourceType::Mock,
            Arc::new(NoOp),
            Arc::new(SourceRegistry::new()),
            Arc::new(MetricsCollector::new()),
        )
    }

    fn storm(category: u8) -> StormAlert {
        StormAlert {
            storm_id: "WP202506".into(),
            name: "Nari".into(),
            category,
            path_confidence: 0.8,
            latitude: 20.0,
            longitude: 125.0,
            region: "South China Sea".into(),
            observed_at: Utc.with_ymd_and_hms(2025, 6, 1, 6, 0, 0).unwrap(),
        }
    }

    #[test]
    fn weak_storms_are_ignored() {
        let now = Utc.with_ymd_and_hms(2025, 6, 1, 6, 0, 0).unwrap();
        assert!(source().map_storm_alert(&storm(1), now).is_none());
    }

    #[test]
    fn strong_storm_maps_with_hour_bucketed_id() {
        let now = Utc.with_ymd_and_hms(2025, 6, 1, 6, 0, 0).unwrap();
        let event = source().map_storm_alert(&storm(4), now).unwrap();
        assert_eq!(event.event_id, "weather-storm-wp202506-2025060106");
        // category 4: 0.8*0.7 + 0.8*0.3 = 0.80
        assert!((event.probability - 0.80).abs() < 1e-9);
        assert!(event.keywords.contains(&"category_4".to_string()));
    }
}
