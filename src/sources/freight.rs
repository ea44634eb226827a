//! Freight rate source.
//!
//! Flags abnormal rate moves per route against a 30-day baseline, using the
//! same bounded z-score machinery as the other statistical detectors.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::debug;

use crate::domain::attestation::SourceType;
use crate::domain::common::{ProbabilityMovement, ProbabilitySource};
use crate::domain::raw_signal::{MarketMetadata, RawEventDraft, RawSignalEvent};
use crate::error::SourceError;
use crate::gate::SourceRegistry;
use crate::observability::MetricsCollector;
use crate::rules::anomaly::StatisticalAnomalyDetector;
use crate::sources::{SignalSource, SourceCore};

/// One route's current rate against its baseline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FreightRate {
    /// e.g. "shanghai-rotterdam".
    pub route: String,
    pub rate_usd_per_feu: f64,
    pub baseline_usd_per_feu: f64,
    /// Recent daily rates, oldest first, for the statistical check.
    pub history: Vec<f64>,
    pub observed_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct FreightConfig {
    /// Minimum percent change against baseline to emit an event.
    pub change_threshold_pct: f64,
}

impl Default for FreightConfig {
    fn default() -> Self {
        Self {
            change_threshold_pct: 15.0,
        }
    }
}

#[async_trait]
pub trait FreightProvider: Send + Sync {
    async fn fetch_rates(&self) -> Result<(Vec<FreightRate>, Vec<u8>), SourceError>;
}

pub struct FreightSource {
    core: SourceCore,
    provider: Arc<dyn FreightProvider>,
    config: FreightConfig,
}

impl FreightSource {
    pub fn new(
        source_id: impl Into<String>,
        source_type: SourceType,
        provider: Arc<dyn FreightProvider>,
        registry: Arc<SourceRegistry>,
        metrics: Arc<MetricsCollector>,
    ) -> Self {
        Self {
            core: SourceCore::new(source_id, source_type, registry, metrics),
            provider,
            config: FreightConfig::default(),
        }
    }

    pub fn map_rate_spike(
        &self,
        rate: &FreightRate,
        observed_at: DateTime<Utc>,
    ) -> Option<RawSignalEvent> {
        if rate.baseline_usd_per_feu <= 0.0 {
            return None;
        }
        let change_pct =
            ((rate.rate_usd_per_feu - rate.baseline_usd_per_feu) / rate.baseline_usd_per_feu)
                * 100.0;
        if change_pct.abs() < self.config.change_threshold_pct {
            return None;
        }

        // Statistical confirmation over the route's recent history.
        let mut detector = StatisticalAnomalyDetector::new(3.0);
        for value in &rate.history {
            detector.add_observation(*value);
        }
        let z = detector.detect(rate.rate_usd_per_feu);

        let is_increase = change_pct > 0.0;
        let probability = (0.4 + (change_pct.abs() - 15.0) / 50.0).clamp(0.3, 0.95);
        let date = observed_at.format("%Y%m%d").to_string();

        let mut source_metrics = BTreeMap::new();
        source_metrics.insert("rate_usd_per_feu".into(), json!(rate.rate_usd_per_feu));
        source_metrics.insert(
            "baseline_usd_per_feu".into(),
            json!(rate.baseline_usd_per_feu),
        );
        source_metrics.insert("change_pct".into(), json!(change_pct));
        source_metrics.insert("zscore".into(), json!(z.z_score));
        source_metrics.insert("zscore_anomaly".into(), json!(z.is_anomaly));

        let event_id = format!("freight-rate-{}-{date}", rate.route.to_lowercase());
        let direction = if is_increase { "surge" } else { "drop" };
        Some(RawSignalEvent::new(RawEventDraft {
            event_id: event_id.clone(),
            title: format!(
                "Freight rate {direction} on {}: {:+.0}%",
                rate.route, change_pct
            ),
            description: Some(format!(
                "Rate ${:.0}/FEU against a 30-day baseline of ${:.0}/FEU",
                rate.rate_usd_per_feu, rate.baseline_usd_per_feu
            )),
            probability,
            probability_source: ProbabilitySource::Derived,
            movement: Some(ProbabilityMovement {
                current: probability,
                previous: if is_increase {
                    (probability - 0.15).max(0.0)
                } else {
                    (probability + 0.15).min(1.0)
                },
                delta: if is_increase { 0.15 } else { -0.15 },
                window_hours: 24,
            }),
            keywords: vec![
                "freight".into(),
                "freight rate".into(),
                rate.route.to_lowercase(),
                direction.into(),
            ],
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
impl SignalSource for FreightSource {
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
        match self.provider.fetch_rates().await {
            Ok((rates, raw_body)) => {
                let events: Vec<RawSignalEvent> = rates
                    .iter()
                    .filter_map(|rate| self.map_rate_spike(rate, observed_at))
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
