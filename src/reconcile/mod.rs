//! Reconcile loop: heals divergence between the ledger (source of truth)
//! and a downstream processor.
//!
//! Per eligible partition: load the current highwater, compare with the
//! persisted reconcile state, diff ledger ids against downstream processed
//! ids, idempotently replay up to `max_replay_batch` missing signals, and
//! persist the new state. Late partitions are reconciled even when unsealed
//! and inherit the main partition's processed set. A failed partition never
//! aborts the loop.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::domain::signal_event::SignalEvent;
use crate::persistence::{ReconcileState, ReconcileStateStore, SignalLedger};

/// The downstream consumer being reconciled against. Replays must be
/// idempotent (the downstream dedups on signal id).
#[async_trait]
pub trait DownstreamProcessor: Send + Sync {
    async fn list_processed_ids(&self, partition: &str) -> Result<Vec<String>>;
    async fn replay(&self, event: &SignalEvent, partition: &str) -> Result<()>;
}

/// In-process downstream used when the real consumer cannot enumerate its
/// processed ids: the reconcile loop records successful replays here and
/// diffs against its own record next pass.
#[derive(Default)]
pub struct LocalDownstream {
    processed: Mutex<HashMap<String, HashSet<String>>>,
}

impl LocalDownstream {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mark_processed(&self, partition: &str, signal_id: &str) {
        self.processed
            .lock()
            .entry(partition.to_string())
            .or_default()
            .insert(signal_id.to_string());
    }
}

#[async_trait]
impl DownstreamProcessor for LocalDownstream {
    async fn list_processed_ids(&self, partition: &str) -> Result<Vec<String>> {
        Ok(self
            .processed
            .lock()
            .get(partition)
            .map(|ids| ids.iter().cloned().collect())
            .unwrap_or_default())
    }

    async fn replay(&self, event: &SignalEvent, partition: &str) -> Result<()> {
        self.mark_processed(partition, &event.signal_id);
        Ok(())
    }
}

/// HTTP downstream: POSTs replays to an ingest endpoint with an idempotency
/// key; 409 means already processed.
pub struct HttpDownstream {
    client: reqwest::Client,
    ingest_url: String,
    processed_url: String,
    api_key: Option<String>,
}

impl HttpDownstream {
    pub fn new(
        ingest_url: impl Into<String>,
        processed_url: impl Into<String>,
        api_key: Option<String>,
    ) -> Self {
        Self {
            client: reqwest::Client::new(),
            ingest_url: ingest_url.into(),
            processed_url: processed_url.into(),
            api_key,
        }
    }
}

#[async_trait]
impl DownstreamProcessor for HttpDownstream {
    async fn list_processed_ids(&self, partition: &str) -> Result<Vec<String>> {
        let mut request = self
            .client
            .get(&self.processed_url)
            .query(&[("partition", partition)])
            .timeout(Duration::from_secs(30));
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }
        let response = request
            .send()
            .await
            .context("processed-ids request failed")?
            .error_for_status()
            .context("processed-ids status")?;
        response
            .json::<Vec<String>>()
            .await
            .context("processed-ids json")
    }

    async fn replay(&self, event: &SignalEvent, partition: &str) -> Result<()> {
        let mut request = self
            .client
            .post(&self.ingest_url)
            .timeout(Duration::from_secs(30))
            .header("Content-Type", "application/json")
            .header("X-Idempotency-Key", &event.signal_id)
            .header("X-Replay-Source", "reconcile")
            .header("X-Replay-Partition", partition);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }
        let response = request
            .json(event)
            .send()
            .await
            .context("replay request failed")?;

        if response.status().as_u16() == 409 {
            debug!(signal_id = %event.signal_id, "signal already processed downstream");
            return Ok(());
        }
        response.error_for_status().context("replay status")?;
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReconcileStatus {
    Completed,
    Skipped,
    Partial,
    Failed,
}

impl ReconcileStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReconcileStatus::Completed => "COMPLETED",
            ReconcileStatus::Skipped => "SKIPPED",
            ReconcileStatus::Partial => "PARTIAL",
            ReconcileStatus::Failed => "FAILED",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconcileResult {
    pub status: ReconcileStatus,
    pub partition: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    pub ledger_count: usize,
    pub processed_count: usize,
    pub missing_count: usize,
    pub replayed_count: usize,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub failed_ids: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub extra_ids: Vec<String>,
    pub duration_ms: u64,
    pub highwater: u64,
    pub manifest_revision: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ReconcileResult {
    fn skipped(partition: &str, reason: impl Into<String>) -> Self {
        Self {
            status: ReconcileStatus::Skipped,
            partition: partition.to_string(),
            reason: Some(reason.into()),
            ledger_count: 0,
            processed_count: 0,
            missing_count: 0,
            replayed_count: 0,
            failed_ids: vec![],
            extra_ids: vec![],
            duration_ms: 0,
            highwater: 0,
            manifest_revision: 0,
            error: None,
        }
    }
}

pub struct ReconcileJob {
    ledger: Arc<SignalLedger>,
    state_store: Arc<ReconcileStateStore>,
    downstream: Arc<dyn DownstreamProcessor>,
    max_replay_batch: usize,
    since_days: i64,
}

impl ReconcileJob {
    pub fn new(
        ledger: Arc<SignalLedger>,
        state_store: Arc<ReconcileStateStore>,
        downstream: Arc<dyn DownstreamProcessor>,
    ) -> Self {
        Self {
            ledger,
            state_store,
            downstream,
            max_replay_batch: 100,
            since_days: 7,
        }
    }

    pub fn with_max_replay_batch(mut self, max: usize) -> Self {
        self.max_replay_batch = max;
        self
    }

    pub fn with_since_days(mut self, days: i64) -> Self {
        self.since_days = days;
        self
    }

    /// Reconcile every eligible partition in the window. Main partitions
    /// must be sealed; `-late` partitions are processed regardless.
    pub async fn run(&self, now: DateTime<Utc>) -> Vec<ReconcileResult> {
        info!(since_days = self.since_days, "starting reconcile run");
        let mut partitions = match self.ledger.list_partitions(now) {
            Ok(p) => p,
            Err(e) => {
                error!(error = %e, "failed to list ledger partitions");
                return vec![];
            }
        };
        let cutoff = now.date_naive() - chrono::Duration::days(self.since_days);
        partitions.retain(|p| {
            partition_date(&p.partition)
                .map(|d| d >= cutoff)
                .unwrap_or(false)
        });
        partitions.sort_by(|a, b| (a.is_late, &a.partition).cmp(&(b.is_late, &b.partition)));

        let mut results = Vec::with_capacity(partitions.len());
        for info in &partitions {
            let result = self.reconcile_partition(&info.partition, now).await;
            match result.status {
                ReconcileStatus::Completed if result.replayed_count > 0 => {
                    info!(partition = %result.partition, replayed = result.replayed_count, "reconcile replayed signals");
                }
                ReconcileStatus::Partial => {
                    warn!(
                        partition = %result.partition,
                        replayed = result.replayed_count,
                        failed = result.failed_ids.len(),
                        "reconcile partial"
                    );
                }
                ReconcileStatus::Failed => {
                    error!(partition = %result.partition, error = result.error.as_deref().unwrap_or(""), "reconcile failed");
                }
                _ => {}
            }
            results.push(result);
        }

        let completed = count(&results, ReconcileStatus::Completed);
        let partial = count(&results, ReconcileStatus::Partial);
        let failed = count(&results, ReconcileStatus::Failed);
        let skipped = count(&results, ReconcileStatus::Skipped);
        let replayed: usize = results.iter().map(|r| r.replayed_count).sum();
        info!(
            completed,
            partial, failed, skipped, replayed, "reconcile run finished"
        );
        results
    }

    pub async fn reconcile_partition(
        &self,
        partition: &str,
        now: DateTime<Utc>,
    ) -> ReconcileResult {
        let started = Instant::now();
        let is_late = partition.ends_with("-late");

        if !is_late && !self.ledger.is_sealed(partition, now) {
            return ReconcileResult::skipped(partition, "main_partition_not_sealed");
        }

        let (highwater, revision) = match self.ledger.highwater(partition) {
            Ok(v) => v,
            Err(e) => {
                return ReconcileResult {
                    status: ReconcileStatus::Failed,
                    error: Some(e.to_string()),
                    ..ReconcileResult::skipped(partition, "highwater_read_error")
                }
            }
        };

        let (needs, reason) = match self.state_store.needs_reconcile(partition, highwater, revision)
        {
            Ok(v) => v,
            Err(e) => {
                return ReconcileResult {
                    status: ReconcileStatus::Failed,
                    error: Some(e.to_string()),
                    ..ReconcileResult::skipped(partition, "state_read_error")
                }
            }
        };
        if !needs {
            debug!(partition, "partition up to date");
            let mut result = ReconcileResult::skipped(partition, reason);
            result.highwater = highwater;
            result.manifest_revision = revision;
            return result;
        }
        if reason.contains("highwater_increased") {
            warn!(partition, %reason, "re-reconciling after ledger growth");
        }

        let ledger_ids: HashSet<String> = match self.ledger.list_signal_ids(partition) {
            Ok(ids) => ids.into_iter().collect(),
            Err(e) => {
                return ReconcileResult {
                    status: ReconcileStatus::Failed,
                    error: Some(e.to_string()),
                    ..ReconcileResult::skipped(partition, "ledger_read_error")
                }
            }
        };

        let mut processed_ids: HashSet<String> =
            match self.downstream.list_processed_ids(partition).await {
                Ok(ids) => ids.into_iter().collect(),
                Err(e) => {
                    return ReconcileResult {
                        status: ReconcileStatus::Failed,
                        error: Some(e.to_string()),
                        ..ReconcileResult::skipped(partition, "downstream_read_error")
                    }
                }
            };
        // A late partition's signals may have been processed under the main
        // partition before the seal.
        if is_late {
            let base = partition.trim_end_matches("-late");
            if let Ok(ids) = self.downstream.list_processed_ids(base).await {
                processed_ids.extend(ids);
            }
        }

        let mut missing: Vec<String> = ledger_ids.difference(&processed_ids).cloned().collect();
        missing.sort();
        let mut extras: Vec<String> = processed_ids.difference(&ledger_ids).cloned().collect();
        extras.sort();
        if !extras.is_empty() {
            // Downstream holding ids the ledger never wrote violates the
            // source-of-truth invariant.
            error!(
                partition,
                extras = extras.len(),
                sample = ?&extras[..extras.len().min(10)],
                "CRITICAL: downstream has signals not present in ledger"
            );
        }

        let mut replayed = 0usize;
        let mut failed_ids: Vec<String> = Vec::new();
        for signal_id in missing.iter().take(self.max_replay_batch) {
            match self.ledger.get_signal(partition, signal_id) {
                Ok(Some(event)) => match self.downstream.replay(&event, partition).await {
                    Ok(()) => {
                        replayed += 1;
                        debug!(partition, signal_id = %signal_id, "replayed signal");
                    }
                    Err(e) => {
                        warn!(partition, signal_id = %signal_id, error = %e, "replay failed");
                        failed_ids.push(signal_id.clone());
                    }
                },
                Ok(None) => failed_ids.push(signal_id.clone()),
                Err(e) => {
                    warn!(partition, signal_id = %signal_id, error = %e, "ledger read failed");
                    failed_ids.push(signal_id.clone());
                }
            }
        }

        let status = if !failed_ids.is_empty() {
            ReconcileStatus::Partial
        } else if missing.len() > self.max_replay_batch {
            warn!(
                partition,
                capped = self.max_replay_batch,
                remaining = missing.len() - self.max_replay_batch,
                "replay capped"
            );
            ReconcileStatus::Partial
        } else {
            ReconcileStatus::Completed
        };

        let duration_ms = started.elapsed().as_millis() as u64;
        if let Err(e) = self.state_store.save(&ReconcileState {
            partition: partition.to_string(),
            last_highwater: highwater,
            manifest_revision: revision,
            ledger_record_count: ledger_ids.len() as u64,
            processed_count: processed_ids.len() as u64,
            missing_count: missing.len() as u64,
            replayed_count: replayed as u64,
            status: status.as_str().to_string(),
            duration_ms,
        }) {
            error!(partition, error = %e, "failed to persist reconcile state");
        }

        info!(
            partition,
            status = status.as_str(),
            ledger = ledger_ids.len(),
            processed = processed_ids.len(),
            missing = missing.len(),
            replayed,
            duration_ms,
            "reconcile partition summary"
        );

        ReconcileResult {
            status,
            partition: partition.to_string(),
            reason: Some(reason),
            ledger_count: ledger_ids.len(),
            processed_count: processed_ids.len(),
            missing_count: missing.len(),
            replayed_count: replayed,
            failed_ids,
            extra_ids: extras,
            duration_ms,
            highwater,
            manifest_revision: revision,
            error: None,
        }
    }

    /// Periodic scheduler. Finishes the in-flight run before honoring
    /// shutdown.
    pub async fn run_periodic(
        &self,
        interval: Duration,
        mut shutdown: tokio::sync::watch::Receiver<bool>,
    ) {
        let mut ticker = tokio::time::interval(interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.run(Utc::now()).await;
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("reconcile scheduler shutting down");
                        break;
                    }
                }
            }
        }
    }
}

fn partition_date(partition: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(partition.trim_end_matches("-late"), "%Y-%m-%d").ok()
}

fn count(results: &[ReconcileResult], status: ReconcileStatus) -> usize {
    results.iter().filter(|r| r.status == status).count()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::common::{ConfidenceLevel, ProbabilitySource, SignalCategory};
    use crate::domain::context::ProcessingContext;
    use crate::domain::explanation::ExplanationChain;
    use crate::domain::omen_signal::{GeographicContext, OmenSignal, TemporalContext};
    use crate::persistence::LedgerConfig;
    use chrono::TimeZone;
    use tempfile::TempDir;

    fn event(signal_id: &str, observed_at: DateTime<Utc>) -> SignalEvent {
        let ctx = ProcessingContext::create_for_replay(observed_at, "v1.0.0");
        let signal = OmenSignal {
            signal_id: signal_id.into(),
            source_event_id: "e1".into(),
            trace_id: "trace".into(),
            input_event_hash: signal_id.to_lowercase(),
            title: "t".into(),
            description: None,
            probability: 0.5,
            probability_source: ProbabilitySource::MarketPrice,
            confidence_score: 0.5,
            confidence_level: ConfidenceLevel::Medium,
            category: SignalCategory::Unknown,
            tags: vec![],
            geography: GeographicContext::default(),
            temporal: TemporalContext::default(),
            evidence: vec![],
            ruleset_version: "v1.0.0".into(),
            explanation: ExplanationChain::create(&ctx),
            market_url: None,
            generated_at: observed_at,
        };
        SignalEvent::from_signal(signal, observed_at, observed_at)
    }

    #[tokio::test]
    async fn replays_missing_signals_to_downstream() {
        let tmp = TempDir::new().unwrap();
        let ledger =
            Arc::new(SignalLedger::new(tmp.path(), LedgerConfig::default()).unwrap());
        let observed = Utc.with_ymd_and_hms(2025, 6, 1, 10, 0, 0).unwrap();
        ledger.append(&event("OMEN-A", observed), observed).unwrap();
        ledger.append(&event("OMEN-B", observed), observed).unwrap();

        let downstream = Arc::new(LocalDownstream::new());
        downstream.mark_processed("2025-06-01", "OMEN-A");

        let job = ReconcileJob::new(
            ledger,
            Arc::new(ReconcileStateStore::open_in_memory().unwrap()),
            downstream.clone(),
        );
        // Two days later the partition is sealed-by-deadline.
        let now = Utc.with_ymd_and_hms(2025, 6, 3, 12, 0, 0).unwrap();
        let result = job.reconcile_partition("2025-06-01", now).await;

        assert_eq!(result.status, ReconcileStatus::Completed);
        assert_eq!(result.missing_count, 1);
        assert_eq!(result.replayed_count, 1);
        let processed = downstream.list_processed_ids("2025-06-01").await.unwrap();
        assert!(processed.contains(&"OMEN-B".to_string()));
    }

    #[tokio::test]
    async fn unsealed_main_partition_is_skipped() {
        let tmp = TempDir::new().unwrap();
        let ledger =
            Arc::new(SignalLedger::new(tmp.path(), LedgerConfig::default()).unwrap());
        let observed = Utc.with_ymd_and_hms(2025, 6, 1, 10, 0, 0).unwrap();
        ledger.append(&event("OMEN-A", observed), observed).unwrap();

        let job = ReconcileJob::new(
            ledger,
            Arc::new(ReconcileStateStore::open_in_memory().unwrap()),
            Arc::new(LocalDownstream::new()),
        );
        let result = job
            .reconcile_partition("2025-06-01", observed + chrono::Duration::hours(1))
            .await;
        assert_eq!(result.status, ReconcileStatus::Skipped);
        assert_eq!(result.reason.as_deref(), Some("main_partition_not_sealed"));
    }

    #[tokio::test]
    async fn second_pass_skips_until_highwater_grows() {
        let tmp = TempDir::new().unwrap();
        let ledger =
            Arc::new(SignalLedger::new(tmp.path(), LedgerConfig::default()).unwrap());
        let observed = Utc.with_ymd_and_hms(2025, 6, 1, 10, 0, 0).unwrap();
        ledger.append(&event("OMEN-A", observed), observed).unwrap();

        let state = Arc::new(ReconcileStateStore::open_in_memory().unwrap());
        let downstream = Arc::new(LocalDownstream::new());
        let job = ReconcileJob::new(ledger.clone(), state, downstream);
        let now = Utc.with_ymd_and_hms(2025, 6, 3, 12, 0, 0).unwrap();

        let first = job.reconcile_partition("2025-06-01", now).await;
        assert_eq!(first.status, ReconcileStatus::Completed);

        let second = job.reconcile_partition("2025-06-01", now).await;
        assert_eq!(second.status, ReconcileStatus::Skipped);
        assert_eq!(second.reason.as_deref(), Some("up_to_date"));

        // Late growth: a new record lands in the -late partition, which is
        // reconciled independently and inherits the main processed set.
        let stamped = ledger.append(&event("OMEN-C", observed), now).unwrap();
        assert_eq!(stamped.ledger_partition.as_deref(), Some("2025-06-01-late"));
        let late = job.reconcile_partition("2025-06-01-late", now).await;
        assert_eq!(late.status, ReconcileStatus::Completed);
        assert_eq!(late.replayed_count, 1);
    }

    #[tokio::test]
    async fn run_covers_window_and_orders_late_last() {
        let tmp = TempDir::new().unwrap();
        let ledger =
            Arc::new(SignalLedger::new(tmp.path(), LedgerConfig::default()).unwrap());
        let observed = Utc.with_ymd_and_hms(2025, 6, 1, 10, 0, 0).unwrap();
        let now = Utc.with_ymd_and_hms(2025, 6, 3, 12, 0, 0).unwrap();
        ledger.append(&event("OMEN-A", observed), observed).unwrap();
        ledger.append(&event("OMEN-L", observed), now).unwrap();

        let job = ReconcileJob::new(
            ledger,
            Arc::new(ReconcileStateStore::open_in_memory().unwrap()),
            Arc::new(LocalDownstream::new()),
        );
        let results = job.run(now).await;
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].partition, "2025-06-01");
        assert_eq!(results[1].partition, "2025-06-01-late");
    }
}
