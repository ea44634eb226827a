//! Signal event envelope and ledger record.
//!
//! Canonical schema for the dual path: hot (webhook publish) and cold
//! (append-only ledger). Once created a `SignalEvent` is never modified;
//! updates mean a new event with a new signal id. All timestamps are
//! timezone-aware UTC by construction (`DateTime<Utc>`).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::omen_signal::OmenSignal;

pub const SCHEMA_VERSION: &str = "1.0.0";

/// Envelope wrapping an `OmenSignal` with delivery metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignalEvent {
    pub schema_version: String,

    pub signal_id: String,
    pub trace_id: String,
    pub input_event_hash: String,
    pub source_event_id: String,

    pub ruleset_version: String,

    /// When the source data was observed.
    pub observed_at: DateTime<Utc>,
    /// When OMEN emitted this signal.
    pub emitted_at: DateTime<Utc>,
    /// Set by the ledger writer.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ledger_written_at: Option<DateTime<Utc>>,

    pub signal: OmenSignal,

    /// Partition date (`YYYY-MM-DD`, possibly suffixed `-late`).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ledger_partition: Option<String>,
    /// Sequence number within the partition.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ledger_sequence: Option<u64>,
}

impl SignalEvent {
    /// Wrap a signal for delivery. `emitted_at` must come from the
    /// processing context, not the wall clock, for deterministic replay.
    pub fn from_signal(
        signal: OmenSignal,
        observed_at: DateTime<Utc>,
        emitted_at: DateTime<Utc>,
    ) -> Self {
        Self {
            schema_version: SCHEMA_VERSION.to_string(),
            signal_id: signal.signal_id.clone(),
            trace_id: signal.trace_id.clone(),
            input_event_hash: signal.input_event_hash.clone(),
            source_event_id: signal.source_event_id.clone(),
            ruleset_version: signal.ruleset_version.clone(),
            observed_at,
            emitted_at,
            ledger_written_at: None,
            signal,
            ledger_partition: None,
            ledger_sequence: None,
        }
    }

    /// Copy with ledger metadata stamped. Called by the ledger writer
    /// immediately before persisting.
    pub fn with_ledger_metadata(
        &self,
        partition: impl Into<String>,
        sequence: u64,
        written_at: DateTime<Utc>,
    ) -> Self {
        let mut event = self.clone();
        event.ledger_partition = Some(partition.into());
        event.ledger_sequence = Some(sequence);
        event.ledger_written_at = Some(written_at);
        event
    }

    /// Canonical JSON with absent optionals elided, the byte form the
    /// ledger checksum covers.
    pub fn canonical_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

/// One ledger line: `{"checksum":"crc32:<8hex>","length":<bytes>,"signal":{...}}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerRecord {
    pub checksum: String,
    pub length: u64,
    pub signal: SignalEvent,
}

impl LedgerRecord {
    pub fn create(event: SignalEvent) -> serde_json::Result<Self> {
        let signal_json = event.canonical_json()?;
        Ok(Self {
            checksum: Self::checksum_of(&signal_json),
            length: signal_json.len() as u64,
            signal: event,
        })
    }

    /// Verify the stored checksum against the canonical JSON of the signal.
    pub fn verify(&self) -> bool {
        match self.signal.canonical_json() {
            Ok(json) => Self::checksum_of(&json) == self.checksum,
            Err(_) => false,
        }
    }

    fn checksum_of(signal_json: &str) -> String {
        format!("crc32:{:08x}", crc32fast::hash(signal_json.as_bytes()))
    }
}
