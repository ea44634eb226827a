//! Data source registry.
//!
//! Tracks every registered source: REAL or MOCK, health, and the hash of
//! its most recent raw response. The registry is what attestation and the
//! live gate consult; adapters push into it after every fetch.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::domain::attestation::{SignalAttestation, SourceType, VerificationMethod};
use crate::error::AttestationError;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceRecord {
    pub source_id: String,
    pub source_type: SourceType,
    pub healthy: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_response_hash: Option<String>,
    pub registered_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_fetch_at: Option<DateTime<Utc>>,
}

#[derive(Default)]
pub struct SourceRegistry {
    sources: RwLock<HashMap<String, SourceRecord>>,
}

impl SourceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, source_id: &str, source_type: SourceType) {
        self.sources.write().insert(
            source_id.to_string(),
            SourceRecord {
                source_id: source_id.to_string(),
                source_type,
                healthy: true,
                last_response_hash: None,
                registered_at: Utc::now(),
                last_fetch_at: None,
            },
        );
    }

    pub fn set_health(&self, source_id: &str, healthy: bool) {
        if let Some(record) = self.sources.write().get_mut(source_id) {
            record.healthy = healthy;
        }
    }

    /// Record the canonical hash of the latest raw response for a REAL
    /// source. Attestations for subsequent signals use it.
    pub fn record_response_hash(&self, source_id: &str, hash: &str) {
        if let Some(record) = self.sources.write().get_mut(source_id) {
            record.last_response_hash = Some(hash.to_string());
            record.last_fetch_at = Some(Utc::now());
        }
    }

    pub fn get(&self, source_id: &str) -> Option<SourceRecord> {
        self.sources.read().get(source_id).cloned()
    }

    pub fn all(&self) -> Vec<SourceRecord> {
        let mut records: Vec<SourceRecord> = self.sources.read().values().cloned().collect();
        records.sort_by(|a, b| a.source_id.cmp(&b.source_id));
        records
    }

    pub fn real_sources(&self) -> Vec<String> {
        self.all()
            .into_iter()
            .filter(|r| r.source_type == SourceType::Real)
            .map(|r| r.source_id)
            .collect()
    }

    pub fn mock_sources(&self) -> Vec<String> {
        self.all()
            .into_iter()
            .filter(|r| r.source_type != SourceType::Real)
            .map(|r| r.source_id)
            .collect()
    }

    /// `(real_count, total_count)`.
    pub fn coverage(&self) -> (usize, usize) {
        let sources = self.sources.read();
        let real = sources
            .values()
            .filter(|r| r.source_type == SourceType::Real)
            .count();
        (real, sources.len())
    }

    /// Build the attestation for a signal emitted from `source_id`.
    ///
    /// REAL sources attest with their latest response hash and fail closed
    /// when none has been recorded; MOCK sources attest via the registry.
    pub fn attest(
        &self,
        signal_id: &str,
        source_id: &str,
    ) -> Result<SignalAttestation, AttestationError> {
        let record = self
            .get(source_id)
            .ok_or_else(|| AttestationError::UnknownSource {
                source_id: source_id.to_string(),
            })?;

        match record.source_type {
            SourceType::Real => {
                let hash = record.last_response_hash.ok_or_else(|| {
                    AttestationError::MissingResponseHash {
                        source_id: source_id.to_string(),
                    }
                })?;
                SignalAttestation::create_real(
                    signal_id,
                    source_id,
                    hash,
                    VerificationMethod::ApiResponseHash,
                )
            }
            _ => Ok(SignalAttestation::create_mock(signal_id, source_id)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn coverage_counts_real_sources() {
        let registry = SourceRegistry::new();
        registry.register("polymarket", SourceType::Real);
        registry.register("ais_demo", SourceType::Mock);
        registry.register("weather_demo", SourceType::Mock);
        assert_eq!(registry.coverage(), (1, 3));
        assert_eq!(registry.real_sources(), vec!["polymarket"]);
    }

    #[test]
    fn real_attestation_requires_recorded_hash() {
        let registry = SourceRegistry::new();
        registry.register("polymarket", SourceType::Real);

        let err = registry.attest("OMEN-A", "polymarket");
        assert!(matches!(
            err,
            Err(AttestationError::MissingResponseHash { .. })
        ));

        registry.record_response_hash("polymarket", "abc123");
        let attestation = registry.attest("OMEN-A", "polymarket").unwrap();
        assert_eq!(attestation.source_type, SourceType::Real);
        assert!(attestation.is_live_eligible());
    }

    #[test]
    fn mock_attestation_from_registry() {
        let registry = SourceRegistry::new();
        registry.register("ais_demo", SourceType::Mock);
        let attestation = registry.attest("OMEN-A", "ais_demo").unwrap();
        assert_eq!(attestation.source_type, SourceType::Mock);
        assert!(!attestation.is_live_eligible());
    }

    #[test]
    fn unknown_source_fails() {
        let registry = SourceRegistry::new();
        assert!(matches!(
            registry.attest("OMEN-A", "ghost"),
            Err(AttestationError::UnknownSource { .. })
        ));
    }
}
