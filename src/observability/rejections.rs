//! Rejection tracker.
//!
//! Separate bounded ring recording why each event was dropped, at which
//! stage, by which rule. Exposes stage counts, a top-N reason histogram,
//! and pass/fail rates for debugging signal scarcity.

use std::collections::{BTreeMap, VecDeque};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RejectionRecord {
    pub event_id: String,
    /// Pipeline stage, e.g. "validation", "confidence_floor", "source_gate".
    pub stage: String,
    pub rule_name: String,
    pub rule_version: String,
    pub reason: String,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PassedRecord {
    pub event_id: String,
    pub signal_id: String,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RejectionStatistics {
    pub total_rejections: usize,
    pub total_passed: usize,
    pub pass_rate: f64,
    pub stage_counts: BTreeMap<String, usize>,
    pub top_reasons: Vec<(String, usize)>,
}

pub struct RejectionTracker {
    rejections: Mutex<VecDeque<RejectionRecord>>,
    passed: Mutex<VecDeque<PassedRecord>>,
    max_records: usize,
}

impl RejectionTracker {
    pub fn new(max_records: usize) -> Self {
        Self {
            rejections: Mutex::new(VecDeque::new()),
            passed: Mutex::new(VecDeque::new()),
            max_records,
        }
    }

    pub fn record_rejection(
        &self,
        event_id: &str,
        stage: &str,
        rule_name: &str,
        rule_version: &str,
        reason: &str,
    ) {
        let mut ring = self.rejections.lock();
        if ring.len() >= self.max_records {
            ring.pop_front();
        }
        ring.push_back(RejectionRecord {
            event_id: event_id.to_string(),
            stage: stage.to_string(),
            rule_name: rule_name.to_string(),
            rule_version: rule_version.to_string(),
            reason: reason.to_string(),
            at: Utc::now(),
        });
    }

    pub fn record_passed(&self, event_id: &str, signal_id: &str) {
        let mut ring = self.passed.lock();
        if ring.len() >= self.max_records {
            ring.pop_front();
        }
        ring.push_back(PassedRecord {
            event_id: event_id.to_string(),
            signal_id: signal_id.to_string(),
            at: Utc::now(),
        });
    }

    pub fn recent_rejections(&self, limit: usize) -> Vec<RejectionRecord> {
        self.rejections
            .lock()
            .iter()
            .rev()
            .take(limit)
            .cloned()
            .collect()
    }

    pub fn statistics(&self, top_n: usize) -> RejectionStatistics {
        let rejections = self.rejections.lock();
        let passed = self.passed.lock();

        let mut stage_counts: BTreeMap<String, usize> = BTreeMap::new();
        let mut reason_counts: BTreeMap<String, usize> = BTreeMap::new();
        for r in rejections.iter() {
            *stage_counts.entry(r.stage.clone()).or_insert(0) += 1;
            *reason_counts.entry(r.reason.clone()).or_insert(0) += 1;
        }

        let mut top_reasons: Vec<(String, usize)> = reason_counts.into_iter().collect();
        top_reasons.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));
        top_reasons.truncate(top_n);

        let total = rejections.len() + passed.len();
        RejectionStatistics {
            total_rejections: rejections.len(),
            total_passed: passed.len(),
            pass_rate: if total > 0 {
                passed.len() as f64 / total as f64
            } else {
                0.0
            },
            stage_counts,
            top_reasons,
        }
    }

    pub fn clear(&self) {
        self.rejections.lock().clear();
        self.passed.lock().clear();
    }
}

impl Default for RejectionTracker {
    fn default() -> Self {
        Self::new(500)
    }
}
