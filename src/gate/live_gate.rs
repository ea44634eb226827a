//! Live gate service: three-layer enforcement.
//!
//! Prevents the system from claiming LIVE mode when its data sources are not
//! production-ready.
//!
//! Layer 1: master switch (`OMEN_ALLOW_LIVE_MODE`). Off means BLOCKED, no
//! further checks. Layer 2: service checks, real-source coverage ratio and
//! each required real source registered, REAL, and healthy. Layer 3 lives in
//! the request middleware, which downgrades BLOCKED LIVE requests to DEMO
//! and echoes the effective mode on every response.
//!
//! `check_gate` never fails; it always returns a result.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::domain::attestation::SourceType;
use crate::gate::registry::SourceRegistry;
use crate::observability::activity::ActivityLog;

/// Requested / granted data mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Mode {
    Demo,
    Live,
}

impl Mode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Mode::Demo => "DEMO",
            Mode::Live => "LIVE",
        }
    }

    pub fn parse(s: &str) -> Mode {
        if s.eq_ignore_ascii_case("live") {
            Mode::Live
        } else {
            Mode::Demo
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum GateStatus {
    Allowed,
    Blocked,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BlockReason {
    MasterSwitchOff,
    InsufficientRealSources,
    RequiredSourceMissing,
    RequiredSourceMock,
    RequiredSourceUnhealthy,
    ConfigurationError,
}

impl BlockReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            BlockReason::MasterSwitchOff => "MASTER_SWITCH_OFF",
            BlockReason::InsufficientRealSources => "INSUFFICIENT_REAL_SOURCES",
            BlockReason::RequiredSourceMissing => "REQUIRED_SOURCE_MISSING",
            BlockReason::RequiredSourceMock => "REQUIRED_SOURCE_MOCK",
            BlockReason::RequiredSourceUnhealthy => "REQUIRED_SOURCE_UNHEALTHY",
            BlockReason::ConfigurationError => "CONFIGURATION_ERROR",
        }
    }
}

#[derive(Debug, Clone)]
pub struct GateConfig {
    /// Layer 1 master switch.
    pub allow_live_mode: bool,
    pub min_real_source_ratio: f64,
    pub required_real_sources: Vec<String>,
    pub cache_ttl: Duration,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            allow_live_mode: false,
            min_real_source_ratio: 0.80,
            required_real_sources: Vec::new(),
            cache_ttl: Duration::from_secs(30),
        }
    }
}

/// Result of a gate check, everything routing and response headers need.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GateCheckResult {
    pub status: GateStatus,
    pub granted_mode: Mode,
    pub requested_mode: Mode,

    pub real_source_count: usize,
    pub total_source_count: usize,
    pub real_source_ratio: f64,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub block_reasons: Vec<BlockReason>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub missing_sources: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub real_sources: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub mock_sources: Vec<String>,

    pub master_switch_enabled: bool,
    pub required_ratio: f64,
    pub checked_at: DateTime<Utc>,
}

impl GateCheckResult {
    pub fn is_allowed(&self) -> bool {
        self.status == GateStatus::Allowed
    }
}

pub struct LiveGateService {
    config: GateConfig,
    registry: Arc<SourceRegistry>,
    activity: Arc<ActivityLog>,
    cache: Mutex<Option<(GateCheckResult, Instant)>>,
}

impl LiveGateService {
    pub fn new(
        config: GateConfig,
        registry: Arc<SourceRegistry>,
        activity: Arc<ActivityLog>,
    ) -> Self {
        Self {
            config,
            registry,
            activity,
            cache: Mutex::new(None),
        }
    }

    /// Check whether the requested mode may be granted. DEMO requests always
    /// pass and short-circuit the cache.
    pub fn check_gate(&self, requested_mode: Mode) -> GateCheckResult {
        if requested_mode == Mode::Demo {
            return self.demo_result();
        }

        if let Some((cached, at)) = self.cache.lock().clone() {
            if at.elapsed() < self.config.cache_ttl {
                debug!("live gate served from cache");
                return GateCheckResult {
                    requested_mode,
                    ..cached
                };
            }
        }

        let result = self.perform_check(requested_mode);
        *self.cache.lock() = Some((result.clone(), Instant::now()));

        // Audit trail for every fresh LIVE decision.
        self.activity.log_gate_decision(
            result.granted_mode.as_str(),
            &result
                .block_reasons
                .iter()
                .map(|r| r.as_str().to_string())
                .collect::<Vec<_>>(),
        );
        result
    }

    fn demo_result(&self) -> GateCheckResult {
        let (real, total) = self.registry.coverage();
        GateCheckResult {
            status: GateStatus::Allowed,
            granted_mode: Mode::Demo,
            requested_mode: Mode::Demo,
            real_source_count: real,
            total_source_count: total,
            real_source_ratio: ratio(real, total),
            block_reasons: Vec::new(),
            missing_sources: Vec::new(),
            real_sources: self.registry.real_sources(),
            mock_sources: self.registry.mock_sources(),
            master_switch_enabled: self.config.allow_live_mode,
            required_ratio: self.config.min_real_source_ratio,
            checked_at: Utc::now(),
        }
    }

    fn perform_check(&self, requested_mode: Mode) -> GateCheckResult {
        let (real, total) = self.registry.coverage();
        let real_ratio = ratio(real, total);
        let mut block_reasons = Vec::new();
        let mut missing_sources = Vec::new();

        // Layer 1: master switch.
        if !self.config.allow_live_mode {
            block_reasons.push(BlockReason::MasterSwitchOff);
        } else {
            // Layer 2: coverage ratio.
            if total == 0 || real_ratio < self.config.min_real_source_ratio {
                block_reasons.push(BlockReason::InsufficientRealSources);
            }

            // Layer 2: each required source registered, REAL, healthy.
            for required in &self.config.required_real_sources {
                match self.registry.get(required) {
                    None => {
                        block_reasons.push(BlockReason::RequiredSourceMissing);
                        missing_sources.push(required.clone());
                    }
                    Some(record) if record.source_type != SourceType::Real => {
                        block_reasons.push(BlockReason::RequiredSourceMock);
                        missing_sources.push(required.clone());
                    }
                    Some(record) if !record.healthy => {
                        block_reasons.push(BlockReason::RequiredSourceUnhealthy);
                        missing_sources.push(required.clone());
                    }
                    Some(_) => {}
                }
            }
        }

        let blocked = !block_reasons.is_empty();
        GateCheckResult {
            status: if blocked {
                GateStatus::Blocked
            } else {
                GateStatus::Allowed
            },
            granted_mode: if blocked { Mode::Demo } else { Mode::Live },
            requested_mode,
            real_source_count: real,
            total_source_count: total,
            real_source_ratio: real_ratio,
            block_reasons,
            missing_sources,
            real_sources: self.registry.real_sources(),
            mock_sources: self.registry.mock_sources(),
            master_switch_enabled: self.config.allow_live_mode,
            required_ratio: self.config.min_real_source_ratio,
            checked_at: Utc::now(),
        }
    }
}

fn ratio(real: usize, total: usize) -> f64 {
    if total == 0 {
        0.0
    } else {
        real as f64 / total as f64
    }
}
