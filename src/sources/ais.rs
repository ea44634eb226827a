//! AIS source: vessel-tracking anomalies.
//!
//! Three detectors over AIS observations: port congestion (waiting ratio
//! against the normal baseline), chokepoint delay (transit ratio, with a
//! blockage requiring both a 3x ratio and a deep queue), and route
//! deviation (minimum Haversine distance to the expected waypoints).

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::debug;

use crate::domain::attestation::SourceType;
use crate::domain::common::{haversine_km, GeoLocation, ProbabilitySource};
use crate::domain::raw_signal::{MarketMetadata, RawEventDraft, RawSignalEvent};
use crate::error::SourceError;
use crate::gate::SourceRegistry;
use crate::observability::MetricsCollector;
use crate::sources::{SignalSource, SourceCore};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PortStatus {
    pub port_code: String,
    pub port_name: String,
    pub latitude: f64,
    pub longitude: f64,
    pub vessels_waiting: u32,
    /// Baseline waiting count for this port.
    pub normal_waiting: u32,
    pub observed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChokepointStatus {
    pub name: String,
    pub latitude: f64,
    pub longitude: f64,
    pub avg_transit_hours: f64,
    pub normal_transit_hours: f64,
    pub vessels_waiting: u32,
    pub observed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VesselMovement {
    pub vessel_id: String,
    pub vessel_name: String,
    pub current_lat: f64,
    pub current_lon: f64,
    /// Expected route waypoints as (lat, lon).
    pub expected_route: Vec<(f64, f64)>,
    pub observed_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct AisConfig {
    pub congestion_threshold: f64,
    pub delay_threshold: f64,
    pub blockage_ratio: f64,
    pub blockage_queue: u32,
    pub route_deviation_threshold_km: f64,
}

impl Default for AisConfig {
    fn default() -> Self {
        Self {
            congestion_threshold: 1.5,
            delay_threshold: 1.5,
            blockage_ratio: 3.0,
            blockage_queue: 50,
            route_deviation_threshold_km: 100.0,
        }
    }
}

/// Severity from a ratio: <1.5 none, <2.0 low, <2.5 medium, <3.0 high,
/// >=3.0 critical.
pub fn ratio_severity(ratio: f64) -> &'static str {
    if ratio < 1.5 {
        "none"
    } else if ratio < 2.0 {
        "low"
    } else if ratio < 2.5 {
        "medium"
    } else if ratio < 3.0 {
        "high"
    } else {
        "critical"
    }
}

fn slug(s: &str) -> String {
    s.to_lowercase().replace([' ', '-'], "_")
}

/// Transport abstraction for AIS providers.
#[async_trait]
pub trait AisProvider: Send + Sync {
    async fn fetch_observations(
        &self,
    ) -> Result<(Vec<PortStatus>, Vec<ChokepointStatus>, Vec<VesselMovement>, Vec<u8>), SourceError>;
}

pub struct AisSource {
    core: SourceCore,
    provider: Arc<dyn AisProvider>,
    config: AisConfig,
}

impl AisSource {
    pub fn new(
        source_id: impl Into<String>,
        source_type: SourceType,
        provider: Arc<dyn AisProvider>,
        registry: Arc<SourceRegistry>,
        metrics: Arc<MetricsCollector>,
    ) -> Self {
        Self {
            core: SourceCore::new(source_id, source_type, registry, metrics),
            provider,
            config: AisConfig::default(),
        }
    }

    /// Port congestion anomaly, if any.
    pub fn map_port_congestion(
        &self,
        port: &PortStatus,
        observed_at: DateTime<Utc>,
    ) -> Option<RawSignalEvent> {
        if port.normal_waiting == 0 {
            return None;
        }
        let ratio = port.vessels_waiting as f64 / port.normal_waiting as f64;
        if ratio < self.config.congestion_threshold {
            return None;
        }
        let severity = ratio_severity(ratio);
        let probability = (0.4 + (ratio - 1.5) * 0.15).clamp(0.3, 0.9);
        let date = observed_at.format("%Y%m%d").to_string();

        let mut source_metrics = BTreeMap::new();
        source_metrics.insert("vessels_waiting".into(), json!(port.vessels_waiting));
        source_metrics.insert("normal_waiting".into(), json!(port.normal_waiting));
        source_metrics.insert("congestion_ratio".into(), json!(ratio));
        source_metrics.insert("severity".into(), json!(severity));

        let event_id = format!("ais-congestion-{}-{date}", slug(&port.port_code));
        Some(RawSignalEvent::new(RawEventDraft {
            event_id: event_id.clone(),
            title: format!(
                "Port congestion at {}: {} vessels waiting ({}x normal)",
                port.port_name,
                port.vessels_waiting,
                (ratio * 10.0).round() / 10.0
            ),
            description: Some(format!(
                "{} has {} vessels waiting against a normal baseline of {}",
                port.port_name, port.vessels_waiting, port.normal_waiting
            )),
            probability,
            probability_source: ProbabilitySource::Derived,
            keywords: vec![
                "ais".into(),
                "congestion".into(),
                "port".into(),
                slug(&port.port_name),
                format!("severity_{severity}"),
            ],
            inferred_locations: vec![GeoLocation::named(
                port.latitude,
                port.longitude,
                port.port_name.clone(),
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

    /// Chokepoint delay/blockage anomaly, if any.
    pub fn map_chokepoint_delay(
        &self,
        chokepoint: &ChokepointStatus,
        observed_at: DateTime<Utc>,
    ) -> Option<RawSignalEvent> {
        if chokepoint.normal_transit_hours <= 0.0 {
            return None;
        }
        let ratio = chokepoint.avg_transit_hours / chokepoint.normal_transit_hours;
        if ratio < self.config.delay_threshold {
            return None;
        }
        let blockage = ratio >= self.config.blockage_ratio
            && chokepoint.vessels_waiting > self.config.blockage_queue;
        let severity = if blockage { "critical" } else { ratio_severity(ratio) };
        let probability = if blockage {
            0.85
        } else {
            (0.4 + (ratio - 1.5) * 0.2).clamp(0.3, 0.8)
        };
        let date = observed_at.format("%Y%m%d").to_string();

        let mut source_metrics = BTreeMap::new();
        source_metrics.insert("avg_transit_hours".into(), json!(chokepoint.avg_transit_hours));
        source_metrics.insert(
            "normal_transit_hours".into(),
            json!(chokepoint.normal_transit_hours),
        );
        source_metrics.insert("delay_ratio".into(), json!(ratio));
        source_metrics.insert("vessels_waiting".into(), json!(chokepoint.vessels_waiting));
        source_metrics.insert("blockage_detected".into(), json!(blockage));

        let kind = if blockage { "blockage" } else { "delay" };
        let event_id = format!("ais-{kind}-{}-{date}", slug(&chokepoint.name));
        Some(RawSignalEvent::new(RawEventDraft {
            event_id: event_id.clone(),
            title: if blockage {
                format!("Possible blockage at {}", chokepoint.name)
            } else {
                format!(
                    "Transit delays at {}: {:.1}x normal",
                    chokepoint.name, ratio
                )
            },
            description: Some(format!(
                "Average transit {:.1}h against normal {:.1}h, {} vessels waiting",
                chokepoint.avg_transit_hours,
                chokepoint.normal_transit_hours,
                chokepoint.vessels_waiting
            )),
            probability,
            probability_source: ProbabilitySource::Derived,
            keywords: vec![
                "ais".into(),
                kind.into(),
                "chokepoint".into(),
                slug(&chokepoint.name),
                format!("severity_{severity}"),
            ],
            inferred_locations: vec![GeoLocation::named(
                chokepoint.latitude,
                chokepoint.longitude,
                chokepoint.name.clone(),
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

    /// Route deviation anomaly, if any.
    pub fn map_route_deviation(
        &self,
        movement: &VesselMovement,
        observed_at: DateTime<Utc>,
    ) -> Option<RawSignalEvent> {
        if movement.expected_route.is_empty() {
            return None;
        }
        let deviation_km = movement
            .expected_route
            .iter()
            .map(|(lat, lon)| {
                haversine_km(movement.current_lat, movement.current_lon, *lat, *lon)
            })
            .fold(f64::INFINITY, f64::min);
        if deviation_km <= self.config.route_deviation_threshold_km {
            return None;
        }
        let deviation_type = if deviation_km > 500.0 { "reroute" } else { "minor" };
        let probability = if deviation_type == "reroute" { 0.7 } else { 0.45 };
        let date = observed_at.format("%Y%m%d").to_string();

        let mut source_metrics = BTreeMap::new();
        source_metrics.insert("deviation_km".into(), json!(deviation_km));
        source_metrics.insert("deviation_type".into(), json!(deviation_type));

        let event_id = format!("ais-deviation-{}-{date}", slug(&movement.vessel_id));
        Some(RawSignalEvent::new(RawEventDraft {
            event_id: event_id.clone(),
            title: format!(
                "Vessel {} off expected route by {:.0} km ({deviation_type})",
                movement.vessel_name, deviation_km
            ),
            probability,
            probability_source: ProbabilitySource::Derived,
            keywords: vec![
                "ais".into(),
                "deviation".into(),
                deviation_type.into(),
                slug(&movement.vessel_name),
            ],
            inferred_locations: vec![GeoLocation::new(
                movement.current_lat,
                movement.current_lon,
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
impl SignalSource for AisSource {
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
        match self.provider.fetch_observations().await {
            Ok((ports, chokepoints, movements, raw_body)) => {
                let mut events = Vec::new();
                for port in &ports {
                    if let Some(e) = self.map_port_congestion(port, observed_at) {
                        events.push(e);
                    }
                }
                for cp in &chokepoints {
                    if let Some(e) = self.map_chokepoint_delay(cp, observed_at) {
                        events.push(e);
                    }
                }
                for movement in &movements {
                    if let Some(e) = self.map_route_deviation(movement, observed_at) {
                        events.push(e);
                    }
                }
                events.truncate(limit);
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

    fn source() -> AisSource {
        struct NoOp;
        #[async_trait]
        impl AisProvider for NoOp {
            async fn fetch_observations(
                &self,
            ) -> Result<
                (Vec<PortStatus>, Vec<ChokepointStatus>, Vec<VesselMovement>, Vec<u8>),
                SourceError,
            > {
                Ok((vec![], vec![], vec![], vec![]))
            }
        }
        AisSource::new(
            "ais",
            SourceType::Mock,
            Arc::new(NoOp),
            Arc::new(SourceRegistry::new()),
            Arc::new(MetricsCollector::new()),
        )
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap()
    }

    #[test]
    fn ratio_severity_bands() {
        assert_eq!(ratio_severity(1.4), "none");
        assert_eq!(ratio_severity(1.5), "low");
        assert_eq!(ratio_severity(2.2), "medium");
        assert_eq!(ratio_severity(2.7), "high");
        assert_eq!(ratio_severity(3.0), "critical");
    }

    #[test]
    fn congestion_below_threshold_is_quiet() {
        let port = PortStatus {
            port_code: "SGSIN".into(),
            port_name: "Singapore".into(),
            latitude: 1.26,
            longitude: 103.8,
            vessels_waiting: 14,
            normal_waiting: 10,
            observed_at: now(),
        };
        assert!(source().map_port_congestion(&port, now()).is_none());
    }

    #[test]
    fn congestion_anomaly_has_deterministic_id_and_evidence() {
        let port = PortStatus {
            port_code: "SGSIN".into(),
            port_name: "Singapore".into(),
            latitude: 1.26,
            longitude: 103.8,
            vessels_waiting: 25,
            normal_waiting: 10,
            observed_at: now(),
        };
        let s = source();
        let a = s.map_port_congestion(&port, now()).unwrap();
        let b = s.map_port_congestion(&port, now()).unwrap();
        assert_eq!(a.event_id, "ais-congestion-sgsin-20250601");
        assert_eq!(a.input_event_hash, b.input_event_hash);
        assert_eq!(a.source_metrics["congestion_ratio"], json!(2.5));
        assert!(a.keywords.contains(&"severity_critical".to_string()) == false);
        assert!(a.keywords.contains(&"severity_high".to_string()));
    }

    #[test]
    fn blockage_requires_ratio_and_queue() {
        let s = source();
        let mut cp = ChokepointStatus {
            name: "Suez Canal".into(),
            latitude: 30.5,
            longitude: 32.3,
            avg_transit_hours: 45.0,
            normal_transit_hours: 14.0,
            vessels_waiting: 30,
            observed_at: now(),
        };
        // Ratio > 3 but queue too small: delay, not blockage.
        let e = s.map_chokepoint_delay(&cp, now()).unwrap();
        assert!(e.event_id.starts_with("ais-delay-"));

        cp.vessels_waiting = 80;
        let e = s.map_chokepoint_delay(&cp, now()).unwrap();
        assert!(e.event_id.starts_with("ais-blockage-"));
        assert_eq!(e.source_metrics["blockage_detected"], json!(true));
        assert_eq!(e.probability, 0.85);
    }

    #[test]
    fn route_deviation_classification() {
        let s = source();
        let mut movement = VesselMovement {
            vessel_id: "IMO123".into(),
            vessel_name: "Ever Given".into(),
            current_lat: 12.0,
            current_lon: 45.0,
            expected_route: vec![(12.1, 45.1)],
            observed_at: now(),
        };
        // Near a waypoint: no anomaly.
        assert!(s.map_route_deviation(&movement, now()).is_none());

        // Far off route (> 500 km): reroute.
        movement.current_lat = 5.0;
        movement.current_lon = 52.0;
        let e = s.map_route_deviation(&movement, now()).unwrap();
        assert!(e.keywords.contains(&"reroute".to_string()));
    }
}
