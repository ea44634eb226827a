//! OMEN domain model.
//!
//! Pure data and pure rules: no I/O, no clocks (timestamps always flow in
//! from a `ProcessingContext`), no logging.

pub mod attestation;
pub mod common;
pub mod context;
pub mod explanation;
pub mod omen_signal;
pub mod raw_signal;
pub mod signal_event;
pub mod validated_signal;

pub use attestation::{
    AttestationStatus, AttestationVerification, SignalAttestation, SourceType,
    VerificationMethod,
};
pub use common::{
    deterministic_hash, haversine_km, sha256_hex, ConfidenceLevel, GeoLocation,
    ProbabilityMovement, ProbabilitySource, SignalCategory, ValidationStatus,
};
pub use context::ProcessingContext;
pub use explanation::{ExplanationChain, ExplanationStep, ParameterReference};
pub use omen_signal::{EvidenceItem, GeographicContext, OmenSignal, TemporalContext};
pub use raw_signal::{MarketMetadata, RawEventDraft, RawSignalEvent};
pub use signal_event::{LedgerRecord, SignalEvent, SCHEMA_VERSION};
pub use validated_signal::{ValidatedSignal, ValidationResult};
