//! Dead letter queue for failed events.
//!
//! Bounded, thread-safe FIFO of failed events with error context and retry
//! counts, so the reconciler/replayer can implement bounded retry.

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde_json::json;
use tracing::warn;

use crate::domain::raw_signal::RawSignalEvent;
use crate::error::OmenError;

/// A failed event with its error context.
#[derive(Debug, Clone)]
pub struct DeadLetterEntry {
    pub event: RawSignalEvent,
    pub error: OmenError,
    pub failed_at: DateTime<Utc>,
    pub retry_count: u32,
}

impl DeadLetterEntry {
    pub fn to_json(&self) -> serde_json::Value {
        json!({
            "event_id": self.event.event_id,
            "event_hash": self.event.input_event_hash,
            "error": self.error.to_json(),
            "failed_at": self.failed_at.to_rfc3339(),
            "retry_count": self.retry_count,
        })
    }
}

/// In-memory bounded dead letter queue. When full, the oldest entry is
/// evicted to admit the newest.
pub struct DeadLetterQueue {
    queue: Mutex<VecDeque<DeadLetterEntry>>,
    max_size: usize,
}

impl DeadLetterQueue {
    pub fn new(max_size: usize) -> Self {
        Self {
            queue: Mutex::new(VecDeque::new()),
            max_size,
        }
    }

    pub fn add(&self, event: RawSignalEvent, error: OmenError, retry_count: u32) -> DeadLetterEntry {
        let entry = DeadLetterEntry {
            event,
            error,
            failed_at: Utc::now(),
            retry_count,
        };
        warn!(
            event_id = %entry.event.event_id,
            error = %entry.error,
            retry_count,
            "event added to dead letter queue"
        );
        let mut queue = self.queue.lock();
        if queue.len() >= self.max_size {
            queue.pop_front();
        }
        queue.push_back(entry.clone());
        entry
    }

    /// Remove and return the oldest entry.
    pub fn pop(&self) -> Option<DeadLetterEntry> {
        self.queue.lock().pop_front()
    }

    /// View the oldest `n` entries without removing them.
    pub fn peek(&self, n: usize) -> Vec<DeadLetterEntry> {
        self.queue.lock().iter().take(n).cloned().collect()
    }

    pub fn size(&self) -> usize {
        self.queue.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.lock().is_empty()
    }

    /// Clear all entries, returning how many were dropped.
    pub fn clear(&self) -> usize {
        let mut queue = self.queue.lock();
        let count = queue.len();
        queue.clear();
        count
    }

    pub fn get_by_event_id(&self, event_id: &str) -> Option<DeadLetterEntry> {
        self.queue
            .lock()
            .iter()
            .find(|e| e.event.event_id == event_id)
            .cloned()
    }
}

impl Default for DeadLetterQueue {
    fn default() -> Self {
        Self::new(10_000)
    }
}
