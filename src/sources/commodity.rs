//! Commodity source and spike detector.
//!
//! Deterministic spike detection over price time series: percentage change
//! against an SMA baseline (excluding the most recent smoothing window to
//! avoid self-reference) and a bounded z-score. The z-score clamp to
//! [-10, 10] is the JSON-safety contract, no NaN/Inf ever escapes.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use statrs::statistics::Statistics;
use tracing::debug;

use crate::domain::attestation::SourceType;
use crate::domain::common::{deterministic_hash, ProbabilityMovement, ProbabilitySource};
use crate::domain::raw_signal::{MarketMetadata, RawEventDraft, RawSignalEvent};
use crate::error::SourceError;
use crate::gate::SourceRegistry;
use crate::observability::MetricsCollector;
use crate::sources::{SignalSource, SourceCore};

const Z_CLAMP: f64 = 10.0;

/// Sorted (timestamp, price) series for one symbol.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PriceTimeSeries {
    pub symbol: String,
    pub name: String,
    pub category: String,
    /// Sorted ascending by timestamp.
    pub prices: Vec<(DateTime<Utc>, f64)>,
    pub spike_threshold_pct: f64,
    pub zscore_threshold: f64,
}

impl PriceTimeSeries {
    pub fn latest(&self) -> Option<(DateTime<Utc>, f64)> {
        self.prices.last().copied()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommoditySpike {
    pub symbol: String,
    pub name: String,
    pub category: String,
    pub current_price: f64,
    pub price_timestamp: DateTime<Utc>,
    pub baseline_price: f64,
    pub pct_change: f64,
    /// Clamped to [-10, 10].
    pub zscore: f64,
    pub is_spike: bool,
    pub severity: String,
    pub direction: String,
}

#[derive(Debug, Clone)]
pub struct SpikeDetectorConfig {
    pub min_data_points: usize,
    /// Most recent observations excluded from the baseline.
    pub smoothing_window: usize,
    /// Severity bands over |pct_change|: (name, min_pct, max_pct).
    pub severity_bands: Vec<(String, f64, Option<f64>)>,
}

impl Default for SpikeDetectorConfig {
    fn default() -> Self {
        Self {
            min_data_points: 20,
            smoothing_window: 3,
            severity_bands: vec![
                ("minor".into(), 5.0, Some(10.0)),
                ("moderate".into(), 10.0, Some(20.0)),
                ("major".into(), 20.0, None),
            ],
        }
    }
}

pub struct SpikeDetector {
    config: SpikeDetectorConfig,
}

impl SpikeDetector {
    pub fn new(config: SpikeDetectorConfig) -> Self {
        Self { config }
    }

    /// Detect a spike in the series. `None` when the series is too short or
    /// unusable.
    pub fn detect(&self, series: &PriceTimeSeries) -> Option<CommoditySpike> {
        if series.prices.len() < self.config.min_data_points {
            return None;
        }
        let (latest_ts, latest_price) = series.latest()?;

        let baseline = self.baseline(series)?;
        if baseline <= 0.0 {
            return None;
        }

        let pct_change = ((latest_price - baseline) / baseline) * 100.0;
        let zscore = self.zscore(series, latest_price);

        let is_spike = pct_change.abs() >= series.spike_threshold_pct
            || zscore.abs() >= series.zscore_threshold;
        let severity = if is_spike {
            self.classify_severity(pct_change.abs())
        } else {
            "none".to_string()
        };
        let direction = if pct_change > 0.0 { "up" } else { "down" };

        Some(CommoditySpike {
            symbol: series.symbol.clone(),
            name: series.name.clone(),
            category: series.category.clone(),
            current_price: latest_price,
            price_timestamp: latest_ts,
            baseline_price: baseline,
            pct_change,
            zscore,
            is_spike,
            severity,
            direction: direction.to_string(),
        })
    }

    /// SMA over all observations except the most recent smoothing window.
    fn baseline(&self, series: &PriceTimeSeries) -> Option<f64> {
        let exclude = self.config.smoothing_window;
        if series.prices.len() <= exclude {
            return None;
        }
        let prices: Vec<f64> = series.prices[..series.prices.len() - exclude]
            .iter()
            .map(|(_, p)| *p)
            .collect();
        if prices.is_empty() {
            return None;
        }
        Some(prices.iter().sum::<f64>() / prices.len() as f64)
    }

    fn zscore(&self, series: &PriceTimeSeries, current: f64) -> f64 {
        let prices: Vec<f64> = series.prices.iter().map(|(_, p)| *p).collect();
        let mean = (&prices).mean();
        let std = (&prices).population_std_dev();
        if !std.is_finite() || std < 1e-4 {
            return 0.0;
        }
        ((current - mean) / std).clamp(-Z_CLAMP, Z_CLAMP)
    }

    fn classify_severity(&self, abs_pct: f64) -> String {
        for (name, min_pct, max_pct) in &self.config.severity_bands {
            if abs_pct >= *min_pct && max_pct.map(|max| abs_pct < max).unwrap_or(true) {
                return name.clone();
            }
        }
        "minor".to_string()
    }
}

impl Default for SpikeDetector {
    fn default() -> Self {
        Self::new(SpikeDetectorConfig::default())
    }
}

/// Deterministic event id for a spike:
/// `commodity-{symbol}-{direction}-{YYYYMMDD}-{hash8}`.
pub fn spike_event_id(spike: &CommoditySpike) -> String {
    let date = spike.price_timestamp.format("%Y%m%d").to_string();
    let hash = deterministic_hash(&[
        &spike.symbol,
        &spike.direction,
        &date,
        &spike.severity,
    ]);
    format!(
        "commodity-{}-{}-{date}-{}",
        spike.symbol.to_lowercase(),
        spike.direction,
        &hash[..8]
    )
}

/// Transport abstraction for commodity price providers.
#[async_trait]
pub trait CommodityProvider: Send + Sync {
    async fn fetch_series(
        &self,
        limit: usize,
    ) -> Result<(Vec<PriceTimeSeries>, Vec<u8>), SourceError>;
}

pub struct CommoditySource {
    core: SourceCore,
    provider: Arc<dyn CommodityProvider>,
    detector: SpikeDetector,
}

impl CommoditySource {
    pub fn new(
        source_id: impl Into<String>,
        source_type: SourceType,
        provider: Arc<dyn CommodityProvider>,
        registry: Arc<SourceRegistry>,
        metrics: Arc<MetricsCollector>,
    ) -> Self {
        Self {
            core: SourceCore::new(source_id, source_type, registry, metrics),
            provider,
            detector: SpikeDetector::default(),
        }
    }

    fn map_spike(&self, spike: &CommoditySpike, observed_at: DateTime<Utc>) -> RawSignalEvent {
        let probability = spike_probability(spike);

        let keywords = vec![
            "commodity".to_string(),
            spike.symbol.to_lowercase(),
            spike.category.to_lowercase(),
            format!("spike_{}", spike.severity),
            spike.direction.clone(),
        ];

        let mut source_metrics = BTreeMap::new();
        source_metrics.insert("current_price".into(), json!(spike.current_price));
        source_metrics.insert("baseline_price".into(), json!(spike.baseline_price));
        source_metrics.insert("pct_change".into(), json!(spike.pct_change));
        source_metrics.insert("zscore".into(), json!(spike.zscore));
        source_metrics.insert("severity".into(), json!(spike.severity));

        let event_id = spike_event_id(spike);
        RawSignalEvent::new(RawEventDraft {
            event_id: event_id.clone(),
            title: format!(
                "{} price spike: {:+.1}% ({})",
                spike.name, spike.pct_change, spike.severity
            ),
            description: Some(format!(
                "{} moved {:+.2}% against its baseline of {:.2} (z-score {:.2})",
                spike.name, spike.pct_change, spike.baseline_price, spike.zscore
            )),
            probability,
            probability_source: ProbabilitySource::Derived,
            movement: Some(ProbabilityMovement {
                current: probability,
                previous: 0.5,
                delta: probability - 0.5,
                window_hours: 24,
            }),
            keywords,
            market: Some(MarketMetadata::minimal(
                self.core.source_id.clone(),
                event_id,
            )),
            observed_at: Some(observed_at),
            source_metrics,
            ..Default::default()
        })
    }
}

/// Probability of logistics impact from spike characteristics.
fn spike_probability(spike: &CommoditySpike) -> f64 {
    let base = match spike.severity.as_str() {
        "minor" => 0.45,
        "moderate" => 0.60,
        "major" => 0.75,
        _ => 0.50,
    };
    let category_weight = match spike.category.as_str() {
        "energy" => 1.0,
        "metals" => 0.8,
        _ => 0.6,
    };
    let zscore_contrib = (spike.zscore.abs() / 5.0).min(1.0) * 0.15;
    ((base + zscore_contrib) * category_weight).clamp(0.30, 0.90)
}

#[async_trait]
impl SignalSource for CommoditySource {
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
        match self.provider.fetch_series(limit).await {
            Ok((series_list, raw_body)) => {
                let events: Vec<RawSignalEvent> = series_list
                    .iter()
                    .filter_map(|series| self.detector.detect(series))
                    .filter(|spike| spike.is_spike)
                    .take(limit)
                    .map(|spike| self.map_spike(&spike, observed_at))
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
    use chrono::{Duration, TimeZone};

    /// 30 flat days then a final +15% move.
    fn brent_series(final_jump_pct: f64) -> PriceTimeSeries {
        let start = Utc.with_ymd_and_hms(2025, 5, 1, 0, 0, 0).unwrap();
        let mut prices: Vec<(DateTime<Utc>, f64)> = (0..30)
            .map(|i| {
                // Mild ripple around 80 so the stddev is nonzero.
                let ripple = if i % 2 == 0 { 0.4 } else { -0.4 };
                (start + Duration::days(i), 80.0 + ripple)
            })
            .collect();
        let last = start + Duration::days(30);
        prices.push((last, 80.0 * (1.0 + final_jump_pct / 100.0)));
        PriceTimeSeries {
            symbol: "BRENT".into(),
            name: "Brent Crude".into(),
            category: "energy".into(),
            prices,
            spike_threshold_pct: 10.0,
            zscore_threshold: 2.0,
        }
    }

    #[test]
    fn fifteen_percent_jump_is_moderate_up_spike() {
        let detector = SpikeDetector::default();
        let spike = detector.detect(&brent_series(15.0)).unwrap();
        assert!(spike.is_spike);
        assert_eq!(spike.direction, "up");
        assert_eq!(spike.severity, "moderate");
        assert!(spike.zscore.abs() <= 10.0);
        assert!(spike.pct_change.is_finite());
        assert!(spike.pct_change > 10.0 && spike.pct_change < 20.0);
    }

    #[test]
    fn spike_event_id_is_deterministic() {
        let detector = SpikeDetector::default();
        let a = detector.detect(&brent_series(15.0)).unwrap();
        let b = detector.detect(&brent_series(15.0)).unwrap();
        let id_a = spike_event_id(&a);
        let id_b = spike_event_id(&b);
        assert_eq!(id_a, id_b);
        assert!(id_a.starts_with("commodity-brent-up-20250531-"));
    }

    #[test]
    fn quiet_series_is_not_a_spike() {
        let detector = SpikeDetector::default();
        let spike = detector.detect(&brent_series(1.0)).unwrap();
        assert!(!spike.is_spike);
        assert_eq!(spike.severity, "none");
    }

    #[test]
    fn short_series_yields_nothing() {
        let detector = SpikeDetector::default();
        let mut series = brent_series(15.0);
        series.prices.truncate(10);
        assert!(detector.detect(&series).is_none());
    }

    #[test]
    fn zscore_is_clamped_on_degenerate_series() {
        let detector = SpikeDetector::default();
        let start = Utc.with_ymd_and_hms(2025, 5, 1, 0, 0, 0).unwrap();
        // Perfectly flat series: stddev ~ 0, z must not blow up.
        let mut prices: Vec<(DateTime<Utc>, f64)> =
            (0..25).map(|i| (start + Duration::days(i), 80.0)).collect();
        prices.push((start + Duration::days(25), 160.0));
        let series = PriceTimeSeries {
            symbol: "X".into(),
            name: "X".into(),
            category: "metals".into(),
            prices,
            spike_threshold_pct: 10.0,
            zscore_threshold: 2.0,
        };
        let spike = detector.detect(&series).unwrap();
        assert!(spike.zscore.abs() <= 10.0);
        assert!(spike.is_spike, "pct threshold still fires");
    }

    #[test]
    fn severity_bands() {
        let detector = SpikeDetector::default();
        assert_eq!(detector.classify_severity(7.0), "minor");
        assert_eq!(detector.classify_severity(12.0), "moderate");
        assert_eq!(detector.classify_severity(35.0), "major");
    }
}
