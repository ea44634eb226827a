//! Source attestation: data provenance for every emitted signal.
//!
//! Every signal must have exactly one attestation before storage. REAL
//! attestations require the hash of the raw API response; MOCK attestations
//! come from the source registry; HYBRID collapses from its inputs and is
//! treated as MOCK by all routing decisions.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::AttestationError;

/// Classification of data source authenticity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SourceType {
    /// Data from a verified live API with a response hash.
    Real,
    /// Simulated/demo data from a registered mock source.
    Mock,
    /// Derived from a mix of REAL and MOCK inputs.
    Hybrid,
}

impl SourceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceType::Real => "REAL",
            SourceType::Mock => "MOCK",
            SourceType::Hybrid => "HYBRID",
        }
    }
}

/// How the source was verified.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum VerificationMethod {
    ApiResponseHash,
    CertificateChain,
    SignatureVerification,
    TimestampValidation,
    MockSourceRegistry,
    ManualOverride,
}

/// Status of the attestation process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AttestationStatus {
    Pending,
    Verified,
    Failed,
    Expired,
}

/// Attestation record for a signal's data source.
///
/// Determines which schema (demo/live) receives the signal and provides the
/// provenance audit trail. Immutable; re-verification produces a separate
/// `AttestationVerification` record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignalAttestation {
    pub id: Uuid,
    pub signal_id: String,
    pub source_id: String,

    pub source_type: SourceType,
    pub verification_method: VerificationMethod,
    pub status: AttestationStatus,

    /// SHA-256 of the raw API response. Required for REAL.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_response_hash: Option<String>,

    pub determination_reason: String,
    pub confidence: f64,
    pub attested_at: DateTime<Utc>,

    /// Input provenance, populated for HYBRID tracking.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub input_source_ids: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub input_source_types: Vec<SourceType>,
}

impl SignalAttestation {
    /// Attestation for a REAL source. Rejects construction when the response
    /// hash is missing or the method is the mock registry.
    pub fn create_real(
        signal_id: impl Into<String>,
        source_id: impl Into<String>,
        api_response_hash: impl Into<String>,
        verification_method: VerificationMethod,
    ) -> Result<Self, AttestationError> {
        let source_id = source_id.into();
        let api_response_hash = api_response_hash.into();
        if api_response_hash.is_empty() {
            return Err(AttestationError::MissingResponseHash { source_id });
        }
        if verification_method == VerificationMethod::MockSourceRegistry {
            return Err(AttestationError::VerificationFailed {
                message: "REAL attestation cannot use MOCK_SOURCE_REGISTRY verification".into(),
            });
        }
        Ok(Self {
            id: Uuid::new_v4(),
            signal_id: signal_id.into(),
            determination_reason: format!(
                "Verified via {verification_method:?} from source {source_id}"
            ),
            source_id,
            source_type: SourceType::Real,
            verification_method,
            status: AttestationStatus::Verified,
            api_response_hash: Some(api_response_hash),
            confidence: 1.0,
            attested_at: Utc::now(),
            input_source_ids: Vec::new(),
            input_source_types: Vec::new(),
        })
    }

    /// Attestation for a MOCK source, via registry lookup.
    pub fn create_mock(signal_id: impl Into<String>, source_id: impl Into<String>) -> Self {
        let source_id = source_id.into();
        Self {
            id: Uuid::new_v4(),
            signal_id: signal_id.into(),
            determination_reason: format!(
                "Source {source_id} is registered as MOCK in the source registry"
            ),
            source_id,
            source_type: SourceType::Mock,
            verification_method: VerificationMethod::MockSourceRegistry,
            status: AttestationStatus::Verified,
            api_response_hash: None,
            confidence: 1.0,
            attested_at: Utc::now(),
            input_source_ids: Vec::new(),
            input_source_types: Vec::new(),
        }
    }

    /// Attestation for a signal derived from multiple inputs.
    ///
    /// All-same input types collapse to that type; mixed inputs collapse to
    /// HYBRID. Confidence is the minimum across inputs.
    pub fn create_hybrid(
        signal_id: impl Into<String>,
        input_attestations: &[SignalAttestation],
    ) -> Self {
        let input_source_ids: Vec<String> = input_attestations
            .iter()
            .map(|a| a.source_id.clone())
            .collect();
        let input_source_types: Vec<SourceType> =
            input_attestations.iter().map(|a| a.source_type).collect();

        let min_confidence = input_attestations
            .iter()
            .map(|a| a.confidence)
            .fold(1.0_f64, f64::min);

        let mut unique = input_source_types.to_vec();
        unique.sort_by_key(|t| t.as_str());
        unique.dedup();

        let (source_type, reason) = if unique.len() == 1 {
            let t = unique[0];
            (
                t,
                format!("All {} inputs are {}", input_attestations.len(), t.as_str()),
            )
        } else {
            let real = input_source_types
                .iter()
                .filter(|t| **t == SourceType::Real)
                .count();
            let mock = input_source_types
                .iter()
                .filter(|t| **t == SourceType::Mock)
                .count();
            (
                SourceType::Hybrid,
                format!("Mixed inputs: {real} REAL, {mock} MOCK"),
            )
        };

        Self {
            id: Uuid::new_v4(),
            signal_id: signal_id.into(),
            source_id: "hybrid".into(),
            source_type,
            verification_method: VerificationMethod::TimestampValidation,
            status: AttestationStatus::Verified,
            api_response_hash: None,
            determination_reason: reason,
            confidence: min_confidence,
            attested_at: Utc::now(),
            input_source_ids,
            input_source_types,
        }
    }

    /// Only REAL + VERIFIED + hash-present may route to the live schema.
    pub fn is_live_eligible(&self) -> bool {
        self.source_type == SourceType::Real
            && self.status == AttestationStatus::Verified
            && self.api_response_hash.is_some()
    }
}

/// Result of re-verifying an existing attestation. The original attestation
/// is never mutated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttestationVerification {
    pub attestation_id: Uuid,
    pub signal_id: String,
    pub is_valid: bool,
    pub verification_time: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

impl AttestationVerification {
    /// Re-check the structural invariants of an attestation.
    pub fn verify(attestation: &SignalAttestation, now: DateTime<Utc>) -> Self {
        let mut errors = Vec::new();
        let mut warnings = Vec::new();

        if attestation.source_type == SourceType::Real {
            if attestation.api_response_hash.is_none() {
                errors.push("REAL attestation missing api_response_hash".to_string());
            }
            if attestation.verification_method == VerificationMethod::MockSourceRegistry {
                errors.push("REAL attestation uses MOCK_SOURCE_REGISTRY".to_string());
            }
        }
        if attestation.status == AttestationStatus::Expired {
            errors.push("attestation is expired".to_string());
        }
        if attestation.confidence < 0.5 {
            warnings.push(format!(
                "low attestation confidence: {:.2}",
                attestation.confidence
            ));
        }

        Self {
            attestation_id: attestation.id,
            signal_id: attestation.signal_id.clone(),
            is_valid: errors.is_empty(),
            verification_time: now,
            errors,
            warnings,
        }
    }
}
