//! Service configuration from environment variables.
//!
//! Every `OMEN_*` variable has a working default so a bare `omen` run comes
//! up in demo mode. The live-mode master switch defaults to off.

use std::time::Duration;

use crate::gate::GateConfig;
use crate::persistence::{CompressionAlgo, LedgerConfig};
use crate::pipeline::PipelineConfig;

#[derive(Debug, Clone)]
pub struct OmenConfig {
    pub port: u16,
    pub ruleset_version: String,

    // Pipeline thresholds
    pub min_liquidity_usd: f64,
    pub min_volume_usd: f64,
    pub min_confidence_for_output: f64,

    // Ledger
    pub ledger_base_path: String,
    pub ledger: LedgerConfig,

    // Live gate
    pub allow_live_mode: bool,
    pub min_real_source_ratio: f64,
    pub required_real_sources: Vec<String>,

    // Background generator
    pub signal_poll_interval: Duration,

    // Webhook publishing
    pub webhook_url: Option<String>,
    pub webhook_secret: Option<String>,

    // Reconcile
    pub reconcile_interval: Duration,
    pub reconcile_state_db: String,
    pub history_db: String,
}

fn env_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

fn env_parse<T: std::str::FromStr>(name: &str, default: T) -> T {
    env_var(name)
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_bool(name: &str) -> bool {
    env_var(name)
        .map(|v| matches!(v.to_lowercase().as_str(), "1" | "true" | "on" | "yes"))
        .unwrap_or(false)
}

impl OmenConfig {
    pub fn from_env() -> Self {
        dotenv::dotenv().ok();

        let ledger = LedgerConfig {
            auto_seal_after_hours: env_parse("OMEN_RETENTION_AUTO_SEAL_HOURS", 24),
            seal_grace_period_hours: env_parse("OMEN_RETENTION_SEAL_GRACE_HOURS", 2),
            compression: CompressionAlgo::parse(
                &env_var("OMEN_RETENTION_COMPRESSION").unwrap_or_else(|| "zstd".into()),
            ),
            compression_level: env_parse("OMEN_RETENTION_COMPRESSION_LEVEL", 3),
            hot_days: env_parse("OMEN_RETENTION_HOT_DAYS", 3),
            warm_days: env_parse("OMEN_RETENTION_WARM_DAYS", 30),
            cold_days: env_parse("OMEN_RETENTION_COLD_DAYS", 365),
            delete_after_cold: env_bool("OMEN_RETENTION_DELETE_AFTER_COLD"),
        };

        Self {
            port: env_parse("PORT", 8080),
            ruleset_version: env_var("OMEN_RULESET_VERSION").unwrap_or_else(|| "v1.0.0".into()),
            min_liquidity_usd: env_parse("OMEN_MIN_LIQUIDITY_USD", 1000.0),
            min_volume_usd: env_parse("OMEN_MIN_VOLUME_USD", 10_000.0),
            min_confidence_for_output: env_parse("OMEN_MIN_CONFIDENCE_FOR_OUTPUT", 0.3),
            ledger_base_path: env_var("OMEN_LEDGER_BASE_PATH")
                .unwrap_or_else(|| "./omen-ledger".into()),
            ledger,
            allow_live_mode: env_bool("OMEN_ALLOW_LIVE_MODE"),
            min_real_source_ratio: env_parse("OMEN_MIN_REAL_SOURCE_RATIO", 0.80),
            required_real_sources: env_var("OMEN_REQUIRED_REAL_SOURCES")
                .map(|v| {
                    v.split(',')
                        .map(|s| s.trim().to_string())
                        .filter(|s| !s.is_empty())
                        .collect()
                })
                .unwrap_or_default(),
            signal_poll_interval: Duration::from_secs(env_parse(
                "OMEN_SIGNAL_POLL_INTERVAL",
                120,
            )),
            webhook_url: env_var("OMEN_WEBHOOK_URL"),
            webhook_secret: env_var("OMEN_WEBHOOK_SECRET"),
            reconcile_interval: Duration::from_secs(env_parse("OMEN_RECONCILE_INTERVAL", 300)),
            reconcile_state_db: env_var("OMEN_RECONCILE_STATE_DB")
                .unwrap_or_else(|| "./omen-reconcile.db".into()),
            history_db: env_var("OMEN_HISTORY_DB").unwrap_or_else(|| "./omen-history.db".into()),
        }
    }

    pub fn gate_config(&self) -> GateConfig {
        GateConfig {
            allow_live_mode: self.allow_live_mode,
            min_real_source_ratio: self.min_real_source_ratio,
            required_real_sources: self.required_real_sources.clone(),
            cache_ttl: Duration::from_secs(30),
        }
    }

    pub fn pipeline_config(&self) -> PipelineConfig {
        PipelineConfig {
            ruleset_version: self.ruleset_version.clone(),
            min_confidence_for_output: self.min_confidence_for_output,
            ..PipelineConfig::default()
        }
    }
}
