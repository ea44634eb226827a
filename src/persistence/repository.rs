//! Signal repository: the idempotency backbone.
//!
//! `save` is an UPSERT by signal id; `find_by_hash` is the idempotency probe
//! that serializes concurrent duplicate arrivals. The reference
//! implementation is an in-memory multi-index under a reader-writer lock; a
//! production implementation backs the same contract with an external store.

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::collections::HashMap;

use crate::domain::omen_signal::OmenSignal;
use crate::error::PersistenceError;

/// Storage contract for OMEN signals.
pub trait SignalRepository: Send + Sync {
    /// UPSERT by `signal_id`.
    fn save(&self, signal: &OmenSignal) -> Result<(), PersistenceError>;

    fn find_by_id(&self, signal_id: &str) -> Result<Option<OmenSignal>, PersistenceError>;

    /// Idempotency probe: has this exact input already produced a signal?
    fn find_by_hash(&self, input_event_hash: &str)
        -> Result<Option<OmenSignal>, PersistenceError>;

    /// All signals ever derived from one source event, newest first.
    fn find_by_event_id(&self, source_event_id: &str)
        -> Result<Vec<OmenSignal>, PersistenceError>;

    /// Paginated listing, newest first.
    fn find_recent(
        &self,
        limit: usize,
        offset: usize,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<OmenSignal>, PersistenceError>;

    fn count(&self, since: Option<DateTime<Utc>>) -> Result<usize, PersistenceError>;
}

#[derive(Default)]
struct Indexes {
    by_id: HashMap<String, OmenSignal>,
    /// input_event_hash -> signal_id (unique)
    by_hash: HashMap<String, String>,
    /// source_event_id -> signal_ids
    by_event: HashMap<String, Vec<String>>,
    /// signal_ids sorted by generated_at descending
    ordered: Vec<String>,
}

/// In-memory multi-index repository.
pub struct InMemorySignalRepository {
    inner: RwLock<Indexes>,
}

impl InMemorySignalRepository {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(Indexes::default()),
        }
    }
}

impl Default for InMemorySignalRepository {
    fn default() -> Self {
        Self::new()
    }
}

impl SignalRepository for InMemorySignalRepository {
    fn save(&self, signal: &OmenSignal) -> Result<(), PersistenceError> {
        let mut inner = self.inner.write();

        let replacing = inner.by_id.contains_key(&signal.signal_id);
        if replacing {
            inner.ordered.retain(|id| id != &signal.signal_id);
        } else {
            let event_ids = inner
                .by_event
                .entry(signal.source_event_id.clone())
                .or_default();
            event_ids.push(signal.signal_id.clone());
        }

        inner
            .by_hash
            .insert(signal.input_event_hash.clone(), signal.signal_id.clone());
        inner
            .by_id
            .insert(signal.signal_id.clone(), signal.clone());

        // Insert keeping descending generated_at order.
        let generated_at = signal.generated_at;
        let position = inner
            .ordered
            .iter()
            .position(|id| {
                inner
                    .by_id
                    .get(id)
                    .map(|s| s.generated_at < generated_at)
                    .unwrap_or(true)
            })
            .unwrap_or(inner.ordered.len());
        inner.ordered.insert(position, signal.signal_id.clone());

        Ok(())
    }

    fn find_by_id(&self, signal_id: &str) -> Result<Option<OmenSignal>, PersistenceError> {
        Ok(self.inner.read().by_id.get(signal_id).cloned())
    }

    fn find_by_hash(
        &self,
        input_event_hash: &str,
    ) -> Result<Option<OmenSignal>, PersistenceError> {
        let inner = self.inner.read();
        Ok(inner
            .by_hash
            .get(input_event_hash)
            .and_then(|id| inner.by_id.get(id))
            .cloned())
    }

    fn find_by_event_id(
        &self,
        source_event_id: &str,
    ) -> Result<Vec<OmenSignal>, PersistenceError> {
        let inner = self.inner.read();
        let mut signals: Vec<OmenSignal> = inner
            .by_event
            .get(source_event_id)
            .map(|ids| {
                ids.iter()
                    .filter_map(|id| inner.by_id.get(id))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        signals.sort_by(|a, b| b.generated_at.cmp(&a.generated_at));
        Ok(signals)
    }

    fn find_recent(
        &self,
        limit: usize,
        offset: usize,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<OmenSignal>, PersistenceError> {
        let inner = self.inner.read();
        Ok(inner
            .ordered
            .iter()
            .filter_map(|id| inner.by_id.get(id))
            .filter(|s| since.map(|t| s.generated_at >= t).unwrap_or(true))
            .skip(offset)
            .take(limit)
            .cloned()
            .collect())
    }

    fn count(&self, since: Option<DateTime<Utc>>) -> Result<usize, PersistenceError> {
        let inner = self.inner.read();
        Ok(match since {
            None => inner.ordered.len(),
            Some(t) => inner
                .by_id
                .values()
                .filter(|s| s.generated_at >= t)
                .count(),
        })
    }
}
