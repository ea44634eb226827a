//! OMEN error taxonomy.
//!
//! Every failure that crosses a component boundary is typed. Rule rejections
//! are NOT errors (they are normal `ValidationResult` outcomes); only rule
//! execution failures surface here.

use serde_json::json;
use thiserror::Error;

/// Errors raised by source adapters.
///
/// Adapters absorb per-item mapping failures internally; what escapes here is
/// a whole-fetch failure the orchestrator must react to.
#[derive(Debug, Clone, Error)]
pub enum SourceError {
    #[error("source {source_name} unavailable: {message}")]
    Unavailable { source_name: String, message: String },

    #[error("source {source_name} rate limited, retry after {retry_after_seconds}s")]
    RateLimited {
        source_name: String,
        retry_after_seconds: u64,
    },

    #[error("source {source_name} authentication failed")]
    AuthenticationFailed { source_name: String },

    #[error("circuit open for source {source_name}")]
    CircuitOpen { source_name: String },
}

impl SourceError {
    pub fn kind(&self) -> &'static str {
        match self {
            SourceError::Unavailable { .. } => "source_unavailable",
            SourceError::RateLimited { .. } => "source_rate_limited",
            SourceError::AuthenticationFailed { .. } => "source_auth_failed",
            SourceError::CircuitOpen { .. } => "source_circuit_open",
        }
    }
}

/// Errors raised by the persistence layer.
#[derive(Debug, Clone, Error)]
pub enum PersistenceError {
    #[error("signal not found: {signal_id}")]
    SignalNotFound { signal_id: String },

    #[error("duplicate signal: {signal_id}")]
    DuplicateSignal { signal_id: String },

    #[error("backing store unavailable: {message}")]
    StoreUnavailable { message: String },
}

/// Errors raised when publishing signals downstream.
#[derive(Debug, Clone, Error)]
pub enum PublishError {
    #[error("publish timed out after {timeout_secs}s")]
    Timeout { timeout_secs: u64 },

    #[error("publish retries exhausted after {attempts} attempts: {message}")]
    RetriesExhausted { attempts: u32, message: String },
}

/// Errors raised while attesting signal provenance.
#[derive(Debug, Clone, Error)]
pub enum AttestationError {
    #[error("REAL attestation requires api_response_hash (source {source_id})")]
    MissingResponseHash { source_id: String },

    #[error("unknown source: {source_id}")]
    UnknownSource { source_id: String },

    #[error("attestation verification failed: {message}")]
    VerificationFailed { message: String },

    #[error("attestation expired for signal {signal_id}")]
    Expired { signal_id: String },
}

/// Top-level OMEN error. All pipeline failure paths converge here before
/// landing in the dead letter queue.
#[derive(Debug, Clone, Error)]
pub enum OmenError {
    #[error(transparent)]
    Source(#[from] SourceError),

    #[error("rule {rule} failed to execute: {message}")]
    RuleExecution { rule: String, message: String },

    #[error(transparent)]
    Persistence(#[from] PersistenceError),

    #[error(transparent)]
    Publish(#[from] PublishError),

    #[error(transparent)]
    Attestation(#[from] AttestationError),

    #[error("configuration error: {message}")]
    Configuration { message: String },

    #[error("internal error: {message}")]
    Internal { message: String },
}

impl OmenError {
    pub fn internal(message: impl Into<String>) -> Self {
        OmenError::Internal {
            message: message.into(),
        }
    }

    /// Stable machine-readable kind, used in DLQ entries and activity logs.
    pub fn kind(&self) -> &'static str {
        match self {
            OmenError::Source(e) => e.kind(),
            OmenError::RuleExecution { .. } => "rule_execution",
            OmenError::Persistence(PersistenceError::SignalNotFound { .. }) => {
                "persistence_not_found"
            }
            OmenError::Persistence(PersistenceError::DuplicateSignal { .. }) => {
                "persistence_duplicate"
            }
            OmenError::Persistence(PersistenceError::StoreUnavailable { .. }) => {
                "persistence_unavailable"
            }
            OmenError::Publish(PublishError::Timeout { .. }) => "publish_timeout",
            OmenError::Publish(PublishError::RetriesExhausted { .. }) => "publish_exhausted",
            OmenError::Attestation(_) => "attestation",
            OmenError::Configuration { .. } => "configuration",
            OmenError::Internal { .. } => "internal",
        }
    }

    /// Structured form for audit surfaces (DLQ, activity log).
    pub fn to_json(&self) -> serde_json::Value {
        json!({
            "kind": self.kind(),
            "message": self.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rate_limit_carries_retry_after() {
        let err = OmenError::from(SourceError::RateLimited {
            source_name: "polymarket".into(),
            retry_after_seconds: 30,
        });
        assert_eq!(err.kind(), "source_rate_limited");
        assert!(err.to_string().contains("30"));
    }

    #[test]
    fn error_json_is_stable() {
        let err = OmenError::RuleExecution {
            rule: "liquidity_validation".into(),
            message: "boom".into(),
        };
        let v = err.to_json();
        assert_eq!(v["kind"], "rule_execution");
        assert!(v["message"].as_str().unwrap().contains("liquidity_validation"));
    }
}
