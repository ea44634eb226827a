//! In-process activity log.
//!
//! Bounded ring of the last 1000 typed events. Every pipeline stage logs
//! here so operators can see what the system did without trawling tracing
//! output.

use std::collections::{BTreeMap, VecDeque};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityKind {
    Signal,
    Validation,
    Rule,
    Alert,
    Source,
    Error,
    System,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActivityEvent {
    pub kind: ActivityKind,
    pub message: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub details: BTreeMap<String, Value>,
    pub at: DateTime<Utc>,
}

pub struct ActivityLog {
    events: Mutex<VecDeque<ActivityEvent>>,
    max_events: usize,
}

impl ActivityLog {
    pub fn new(max_events: usize) -> Self {
        Self {
            events: Mutex::new(VecDeque::new()),
            max_events,
        }
    }

    fn log(&self, kind: ActivityKind, message: String, details: BTreeMap<String, Value>) {
        let mut events = self.events.lock();
        if events.len() >= self.max_events {
            events.pop_front();
        }
        events.push_back(ActivityEvent {
            kind,
            message,
            details,
            at: Utc::now(),
        });
    }

    pub fn log_signal_generated(&self, signal_id: &str, title: &str, confidence_level: &str) {
        let mut details = BTreeMap::new();
        details.insert("signal_id".into(), Value::from(signal_id));
        details.insert("confidence_level".into(), Value::from(confidence_level));
        self.log(
            ActivityKind::Signal,
            format!("Generated signal {signal_id}: {title}"),
            details,
        );
    }

    pub fn log_event_validated(
        &self,
        event_id: &str,
        rule_name: &str,
        passed: bool,
        reason: Option<&str>,
    ) {
        let mut details = BTreeMap::new();
        details.insert("event_id".into(), Value::from(event_id));
        details.insert("rule".into(), Value::from(rule_name));
        details.insert("passed".into(), Value::from(passed));
        if let Some(r) = reason {
            details.insert("reason".into(), Value::from(r));
        }
        let message = if passed {
            format!("Event {event_id} passed validation")
        } else {
            format!("Event {event_id} rejected by {rule_name}")
        };
        self.log(ActivityKind::Validation, message, details);
    }

    pub fn log_source_fetch(&self, source_id: &str, events: usize, latency_ms: f64, error: bool) {
        let mut details = BTreeMap::new();
        details.insert("source".into(), Value::from(source_id));
        details.insert("events".into(), Value::from(events as u64));
        details.insert("latency_ms".into(), Value::from(latency_ms));
        details.insert("error".into(), Value::from(error));
        let message = if error {
            format!("Source {source_id} fetch failed")
        } else {
            format!("Source {source_id} fetched {events} events")
        };
        self.log(ActivityKind::Source, message, details);
    }

    pub fn log_gate_decision(&self, granted_mode: &str, block_reasons: &[String]) {
        let mut details = BTreeMap::new();
        details.insert("granted_mode".into(), Value::from(granted_mode));
        details.insert(
            "block_reasons".into(),
            Value::from(block_reasons.to_vec()),
        );
        self.log(
            ActivityKind::System,
            format!("Live gate decision: {granted_mode}"),
            details,
        );
    }

    pub fn log_error(&self, message: impl Into<String>, details: BTreeMap<String, Value>) {
        self.log(ActivityKind::Error, message.into(), details);
    }

    pub fn log_system(&self, message: impl Into<String>) {
        self.log(ActivityKind::System, message.into(), BTreeMap::new());
    }

    /// Most recent events, newest first.
    pub fn recent(&self, limit: usize) -> Vec<ActivityEvent> {
        self.events.lock().iter().rev().take(limit).cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.events.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.lock().is_empty()
    }
}

impl Default for ActivityLog {
    fn default() -> Self {
        Self::new(1000)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ring_is_bounded() {
        let log = ActivityLog::new(3);
        for i in 0..5 {
            log.log_system(format!("event {i}"));
        }
        assert_eq!(log.len(), 3);
        let recent = log.recent(10);
        assert_eq!(recent[0].message, "event 4");
        assert_eq!(recent[2].message, "event 2");
    }

    #[test]
    fn typed_helpers_record_details() {
        let log = ActivityLog::default();
        log.log_signal_generated("OMEN-ABC", "Title", "HIGH");
        log.log_event_validated("e1", "liquidity_validation", false, Some("too low"));
        let recent = log.recent(2);
        assert_eq!(recent[0].kind, ActivityKind::Validation);
        assert_eq!(recent[1].kind, ActivityKind::Signal);
        assert_eq!(recent[0].details["reason"], Value::from("too low"));
    }
}
