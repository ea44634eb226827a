//! Signal sources.
//!
//! Every adapter normalizes one upstream into `RawSignalEvent`s behind the
//! same contract: `fetch_events(limit, asof)`. Passing `asof` replays the
//! cached batch for that timestamp unchanged, which is how deterministic
//! replay works over non-deterministic upstream APIs. A circuit breaker
//! fronts every source; per-item mapping failures are absorbed and counted,
//! rate limits propagate typed so the orchestrator can back off.
//!
//! The source-specific HTTP clients live behind provider traits, the
//! adapters own validation and mapping, not transport.

pub mod ais;
pub mod commodity;
pub mod freight;
pub mod market;
pub mod news;
pub mod scenario;
pub mod weather;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tracing::{info, warn};

use crate::domain::attestation::SourceType;
use crate::domain::common::sha256_hex;
use crate::domain::raw_signal::RawSignalEvent;
use crate::error::SourceError;
use crate::gate::SourceRegistry;
use crate::observability::MetricsCollector;

pub use market::{MarketDataProvider, MarketSource};
pub use news::{NewsArticle, NewsProvider, NewsQualityGate, NewsQualityScore, NewsSource};
pub use commodity::{CommodityProvider, CommoditySource, PriceTimeSeries, SpikeDetector};
pub use ais::{AisProvider, AisSource, ChokepointStatus, PortStatus, VesselMovement};
pub use freight::{FreightProvider, FreightRate, FreightSource};
pub use weather::{StormAlert, WeatherProvider, WeatherSource};

/// Common contract for all signal sources.
#[async_trait]
pub trait SignalSource: Send + Sync {
    fn source_id(&self) -> &str;
    fn source_type(&self) -> SourceType;

    /// Fetch up to `limit` normalized events. With `asof` set and a cached
    /// batch present, the cached batch is returned unchanged.
    async fn fetch_events(
        &self,
        limit: usize,
        asof: Option<DateTime<Utc>>,
    ) -> Result<Vec<RawSignalEvent>, SourceError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

struct BreakerInner {
    state: CircuitState,
    consecutive_failures: u32,
    opened_at: Option<Instant>,
}

/// Circuit breaker fronting a source: opens after N consecutive failures,
/// allows a single probe after the cooldown, closes again on success.
pub struct CircuitBreaker {
    failure_threshold: u32,
    cooldown: Duration,
    inner: Mutex<BreakerInner>,
}

impl CircuitBreaker {
    pub fn new(failure_threshold: u32, cooldown: Duration) -> Self {
        Self {
            failure_threshold,
            cooldown,
            inner: Mutex::new(BreakerInner {
                state: CircuitState::Closed,
                consecutive_failures: 0,
                opened_at: None,
            }),
        }
    }

    pub fn state(&self) -> CircuitState {
        self.inner.lock().state
    }

    /// Gate a fetch attempt. Open circuits reject until the cooldown has
    /// elapsed, then admit one half-open probe.
    pub fn try_acquire(&self, source: &str) -> Result<(), SourceError> {
        let mut inner = self.inner.lock();
        match inner.state {
            CircuitState::Closed | CircuitState::HalfOpen => Ok(()),
            CircuitState::Open => {
                let elapsed = inner.opened_at.map(|t| t.elapsed()).unwrap_or_default();
                if elapsed >= self.cooldown {
                    inner.state = CircuitState::HalfOpen;
                    info!(source, "circuit half-open, admitting probe");
                    Ok(())
                } else {
                    Err(SourceError::CircuitOpen {
                        source_name: source.to_string(),
                    })
                }
            }
        }
    }

    pub fn record_success(&self) {
        let mut inner = self.inner.lock();
        inner.consecutive_failures = 0;
        inner.opened_at = None;
        inner.state = CircuitState::Closed;
    }

    pub fn record_failure(&self, source: &str) {
        let mut inner = self.inner.lock();
        inner.consecutive_failures += 1;
        if inner.state == CircuitState::HalfOpen
            || inner.consecutive_failures >= self.failure_threshold
        {
            inner.state = CircuitState::Open;
            inner.opened_at = Some(Instant::now());
            warn!(
                source,
                failures = inner.consecutive_failures,
                "circuit opened"
            );
        }
    }
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::new(5, Duration::from_secs(60))
    }
}

/// Shared plumbing for adapters: replay cache, circuit breaker, registry and
/// metrics updates.
pub struct SourceCore {
    pub source_id: String,
    pub source_type: SourceType,
    pub breaker: CircuitBreaker,
    cache: Mutex<HashMap<i64, Vec<RawSignalEvent>>>,
    registry: Arc<SourceRegistry>,
    metrics: Arc<MetricsCollector>,
}

impl SourceCore {
    pub fn new(
        source_id: impl Into<String>,
        source_type: SourceType,
        registry: Arc<SourceRegistry>,
        metrics: Arc<MetricsCollector>,
    ) -> Self {
        let source_id = source_id.into();
        registry.register(&source_id, source_type);
        Self {
            source_id,
            source_type,
            breaker: CircuitBreaker::default(),
            cache: Mutex::new(HashMap::new()),
            registry,
            metrics,
        }
    }

    /// Cached batch for this `asof`, if any.
    pub fn replay(&self, asof: Option<DateTime<Utc>>) -> Option<Vec<RawSignalEvent>> {
        let key = asof?.timestamp();
        self.cache.lock().get(&key).cloned()
    }

    pub fn store_batch(&self, asof: Option<DateTime<Utc>>, events: &[RawSignalEvent]) {
        if let Some(asof) = asof {
            self.cache.lock().insert(asof.timestamp(), events.to_vec());
        }
    }

    /// Record a successful fetch: response hash (for attestation), source
    /// health, metrics.
    pub fn record_success(&self, raw_body: &[u8], events: usize, latency_ms: f64) {
        self.breaker.record_success();
        self.registry
            .record_response_hash(&self.source_id, &sha256_hex(raw_body));
        self.registry.set_health(&self.source_id, true);
        self.metrics
            .record_source_fetch(&self.source_id, latency_ms, events, false);
    }

    pub fn record_failure(&self, latency_ms: f64) {
        self.breaker.record_failure(&self.source_id);
        self.registry.set_health(&self.source_id, false);
        self.metrics
            .record_source_fetch(&self.source_id, latency_ms, 0, true);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn breaker_opens_after_threshold() {
        let breaker = CircuitBreaker::new(3, Duration::from_secs(60));
        assert!(breaker.try_acquire("s").is_ok());
        breaker.record_failure("s");
        breaker.record_failure("s");
        assert_eq!(breaker.state(), CircuitState::Closed);
        breaker.record_failure("s");
        assert_eq!(breaker.state(), CircuitState::Open);
        assert!(matches!(
            breaker.try_acquire("s"),
            Err(SourceError::CircuitOpen { .. })
        ));
    }

    #[test]
    fn breaker_probe_after_cooldown_then_closes() {
        let breaker = CircuitBreaker::new(1, Duration::from_millis(0));
        breaker.record_failure("s");
        assert_eq!(breaker.state(), CircuitState::Open);
        // Zero cooldown: next acquire is a half-open probe.
        assert!(breaker.try_acquire("s").is_ok());
        assert_eq!(breaker.state(), CircuitState::HalfOpen);
        breaker.record_success();
        assert_eq!(breaker.state(), CircuitState::Closed);
    }

    #[test]
    fn half_open_failure_reopens() {
        let breaker = CircuitBreaker::new(1, Duration::from_millis(0));
        breaker.record_failure("s");
        assert!(breaker.try_acquire("s").is_ok());
        breaker.record_failure("s");
        assert_eq!(breaker.state(), CircuitState::Open);
    }
}
