//! Pipeline metrics collector.
//!
//! Rolling 60-minute window of real processing batches plus per-source
//! health tracked with exponentially weighted moving averages. The exposed
//! snapshot is computed from actual batches; with no batches in the window
//! the snapshot reports stale freshness.

use std::collections::{BTreeMap, HashMap, VecDeque};

use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

/// EWMA smoothing factor for source health.
const EWMA_ALPHA: f64 = 0.3;

/// One processed batch worth of counters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessingBatch {
    pub timestamp: DateTime<Utc>,
    pub events_received: u64,
    pub events_validated: u64,
    pub events_rejected: u64,
    pub signals_generated: u64,
    pub processing_time_ms: f64,
    pub avg_confidence: f64,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub rejection_reasons: BTreeMap<String, u64>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub stage_latency_ms: BTreeMap<String, f64>,
}

/// EWMA-tracked health for one source.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceHealth {
    pub avg_latency_ms: f64,
    pub error_rate: f64,
    pub events_per_minute: f64,
    pub consecutive_failures: u32,
    pub last_fetch_at: DateTime<Utc>,
}

/// Snapshot served by the stats endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub data_freshness: String,
    pub window_minutes: i64,
    pub batches_in_window: usize,
    pub events_received: u64,
    pub events_validated: u64,
    pub events_rejected: u64,
    pub signals_generated: u64,
    pub validation_pass_rate: f64,
    pub avg_processing_time_ms: f64,
    pub avg_confidence: f64,
    pub rejection_reasons: BTreeMap<String, u64>,
    pub source_health: BTreeMap<String, SourceHealth>,
}

pub struct MetricsCollector {
    window: Duration,
    batches: Mutex<VecDeque<ProcessingBatch>>,
    source_health: Mutex<HashMap<String, SourceHealth>>,
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self::with_window_minutes(60)
    }

    pub fn with_window_minutes(minutes: i64) -> Self {
        Self {
            window: Duration::minutes(minutes),
            batches: Mutex::new(VecDeque::new()),
            source_health: Mutex::new(HashMap::new()),
        }
    }

    pub fn record_batch(&self, batch: ProcessingBatch) {
        let cutoff = Utc::now() - self.window;
        let mut batches = self.batches.lock();
        batches.push_back(batch);
        while batches
            .front()
            .map(|b| b.timestamp < cutoff)
            .unwrap_or(false)
        {
            batches.pop_front();
        }
    }

    /// Update source health after a fetch. EWMA on latency, error rate, and
    /// event throughput.
    pub fn record_source_fetch(
        &self,
        source_id: &str,
        latency_ms: f64,
        events_fetched: usize,
        error: bool,
    ) {
        let now = Utc::now();
        let mut health_map = self.source_health.lock();
        let entry = health_map
            .entry(source_id.to_string())
            .or_insert(SourceHealth {
                avg_latency_ms: latency_ms,
                error_rate: if error { 1.0 } else { 0.0 },
                events_per_minute: 0.0,
                consecutive_failures: 0,
                last_fetch_at: now,
            });

        entry.avg_latency_ms = EWMA_ALPHA * latency_ms + (1.0 - EWMA_ALPHA) * entry.avg_latency_ms;
        entry.error_rate =
            EWMA_ALPHA * if error { 1.0 } else { 0.0 } + (1.0 - EWMA_ALPHA) * entry.error_rate;
        if !error {
            entry.events_per_minute = EWMA_ALPHA * (events_fetched as f64 * 60.0)
                + (1.0 - EWMA_ALPHA) * entry.events_per_minute;
            entry.consecutive_failures = 0;
        } else {
            entry.consecutive_failures += 1;
        }
        entry.last_fetch_at = now;
    }

    pub fn source_health(&self, source_id: &str) -> Option<SourceHealth> {
        self.source_health.lock().get(source_id).cloned()
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let now = Utc::now();
        let cutoff = now - self.window;
        let batches = self.batches.lock();
        let recent: Vec<&ProcessingBatch> =
            batches.iter().filter(|b| b.timestamp >= cutoff).collect();

        let source_health: BTreeMap<String, SourceHealth> = self
            .source_health
            .lock()
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();

        if recent.is_empty() {
            return MetricsSnapshot {
                data_freshness: "stale".into(),
                window_minutes: self.window.num_minutes(),
                batches_in_window: 0,
                events_received: 0,
                events_validated: 0,
                events_rejected: 0,
                signals_generated: 0,
                validation_pass_rate: 0.0,
                avg_processing_time_ms: 0.0,
                avg_confidence: 0.0,
                rejection_reasons: BTreeMap::new(),
                source_health,
            };
        }

        let events_received: u64 = recent.iter().map(|b| b.events_received).sum();
        let events_validated: u64 = recent.iter().map(|b| b.events_validated).sum();
        let events_rejected: u64 = recent.iter().map(|b| b.events_rejected).sum();
        let signals_generated: u64 = recent.iter().map(|b| b.signals_generated).sum();

        let mut rejection_reasons: BTreeMap<String, u64> = BTreeMap::new();
        for batch in &recent {
            for (reason, count) in &batch.rejection_reasons {
                *rejection_reasons.entry(reason.clone()).or_insert(0) += count;
            }
        }

        // Confidence averaged over batches that produced signals.
        let producing: Vec<&&ProcessingBatch> =
            recent.iter().filter(|b| b.signals_generated > 0).collect();
        let avg_confidence = if producing.is_empty() {
            0.0
        } else {
            producing.iter().map(|b| b.avg_confidence).sum::<f64>() / producing.len() as f64
        };

        MetricsSnapshot {
            data_freshness: "fresh".into(),
            window_minutes: self.window.num_minutes(),
            batches_in_window: recent.len(),
            events_received,
            events_validated,
            events_rejected,
            signals_generated,
            validation_pass_rate: if events_received > 0 {
                events_validated as f64 / events_received as f64
            } else {
                0.0
            },
            avg_processing_time_ms: recent.iter().map(|b| b.processing_time_ms).sum::<f64>()
                / recent.len() as f64,
            avg_confidence,
            rejection_reasons,
            source_health,
        }
    }
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn batch(received: u64, validated: u64, generated: u64, confidence: f64) -> ProcessingBatch {
        ProcessingBatch {
            timestamp: Utc::now(),
            events_received: received,
            events_validated: validated,
            events_rejected: received - validated,
            signals_generated: generated,
            processing_time_ms: 12.0,
            avg_confidence: confidence,
            rejection_reasons: BTreeMap::new(),
            stage_latency_ms: BTreeMap::new(),
        }
    }

    #[test]
    fn empty_window_is_stale() {
        let metrics = MetricsCollector::new();
        let snap = metrics.snapshot();
        assert_eq!(snap.data_freshness, "stale");
        assert_eq!(snap.batches_in_window, 0);
    }

    #[test]
    fn snapshot_aggregates_batches() {
        let metrics = MetricsCollector::new();
        metrics.record_batch(batch(10, 6, 3, 0.7));
        metrics.record_batch(batch(5, 5, 5, 0.9));
        let snap = metrics.snapshot();
        assert_eq!(snap.data_freshness, "fresh");
        assert_eq!(snap.events_received, 15);
        assert_eq!(snap.events_validated, 11);
        assert_eq!(snap.signals_generated, 8);
        assert!((snap.validation_pass_rate - 11.0 / 15.0).abs() < 1e-9);
        assert!((snap.avg_confidence - 0.8).abs() < 1e-9);
    }

    #[test]
    fn ewma_converges_toward_latest() {
        let metrics = MetricsCollector::new();
        metrics.record_source_fetch("polymarket", 100.0, 10, false);
        for _ in 0..20 {
            metrics.record_source_fetch("polymarket", 10.0, 10, false);
        }
        let health = metrics.source_health("polymarket").unwrap();
        assert!(health.avg_latency_ms < 20.0);
        assert_eq!(health.consecutive_failures, 0);
    }

    #[test]
    fn failures_increase_error_rate_and_streak() {
        let metrics = MetricsCollector::new();
        metrics.record_source_fetch("news", 50.0, 0, true);
        metrics.record_source_fetch("news", 50.0, 0, true);
        let health = metrics.source_health("news").unwrap();
        assert!(health.error_rate > 0.5);
        assert_eq!(health.consecutive_failures, 2);
    }
}
