//! Pipeline orchestration.
//!
//! `process_single` runs the deterministic transformation chain for one raw
//! event: idempotency probe, validation, enrichment, generation, attestation
//! and schema routing, persistence (repository + ledger + history), publish.
//! Every failure path is independently wrapped; unrecoverable errors land
//! the original event in the dead letter queue and never abort a batch.

pub mod dead_letter;
pub mod enricher;
pub mod generator;
pub mod validator;

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use crate::domain::attestation::SignalAttestation;
use crate::domain::context::ProcessingContext;
use crate::domain::omen_signal::OmenSignal;
use crate::domain::raw_signal::RawSignalEvent;
use crate::domain::signal_event::SignalEvent;
use crate::domain::validated_signal::ValidationResult;
use crate::error::OmenError;
use crate::gate::{LiveGateService, Mode, SchemaRouter, SourceRegistry};
use crate::observability::{ActivityLog, MetricsCollector, ProcessingBatch, RejectionTracker};
use crate::persistence::{SignalHistoryStore, SignalLedger, SignalRepository};
use crate::publish::OutputPublisher;

pub use dead_letter::{DeadLetterEntry, DeadLetterQueue};
pub use enricher::{Enrichment, SignalEnricher};
pub use generator::{IdStyle, SignalGenerator};
pub use validator::{SignalValidator, ValidationOutcome};

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub ruleset_version: String,
    pub min_confidence_for_output: f64,
    pub enable_dlq: bool,
    pub enable_dry_run: bool,
    pub fail_on_persist_error: bool,
    pub fail_on_publish_error: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            ruleset_version: "v1.0.0".into(),
            min_confidence_for_output: 0.3,
            enable_dlq: true,
            enable_dry_run: false,
            fail_on_persist_error: false,
            fail_on_publish_error: false,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PipelineStats {
    pub events_received: u64,
    pub events_deduplicated: u64,
    pub events_validated: u64,
    pub events_rejected_validation: u64,
    pub events_below_confidence: u64,
    pub signals_generated: u64,
    pub events_failed: u64,
    pub processing_time_ms: f64,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub stage_latency_ms: BTreeMap<String, f64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PipelineResult {
    pub success: bool,
    pub cached: bool,
    pub signals: Vec<OmenSignal>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub validation_failures: Vec<ValidationResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rejection_reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub stats: PipelineStats,
}

pub struct OmenPipeline {
    validator: SignalValidator,
    enricher: SignalEnricher,
    generator: SignalGenerator,
    repository: Arc<dyn SignalRepository>,
    publisher: Option<Arc<dyn OutputPublisher>>,
    ledger: Option<Arc<SignalLedger>>,
    history: Option<Arc<SignalHistoryStore>>,
    registry: Arc<SourceRegistry>,
    gate: Arc<LiveGateService>,
    router: SchemaRouter,
    attestations: Mutex<HashMap<String, SignalAttestation>>,
    dlq: Arc<DeadLetterQueue>,
    metrics: Arc<MetricsCollector>,
    activity: Arc<ActivityLog>,
    rejections: Arc<RejectionTracker>,
    config: PipelineConfig,
}

impl OmenPipeline {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        validator: SignalValidator,
        repository: Arc<dyn SignalRepository>,
        registry: Arc<SourceRegistry>,
        gate: Arc<LiveGateService>,
        metrics: Arc<MetricsCollector>,
        activity: Arc<ActivityLog>,
        rejections: Arc<RejectionTracker>,
        config: PipelineConfig,
    ) -> Self {
        info!(
            ruleset = %config.ruleset_version,
            min_confidence = config.min_confidence_for_output,
            "pipeline initialized"
        );
        Self {
            validator,
            enricher: SignalEnricher::new(),
            generator: SignalGenerator::new(),
            repository,
            publisher: None,
            ledger: None,
            history: None,
            registry,
            gate,
            router: SchemaRouter::new(),
            attestations: Mutex::new(HashMap::new()),
            dlq: Arc::new(DeadLetterQueue::default()),
            metrics,
            activity,
            rejections,
            config,
        }
    }

    pub fn with_publisher(mut self, publisher: Arc<dyn OutputPublisher>) -> Self {
        self.publisher = Some(publisher);
        self
    }

    pub fn with_ledger(mut self, ledger: Arc<SignalLedger>) -> Self {
        self.ledger = Some(ledger);
        self
    }

    pub fn with_history(mut self, history: Arc<SignalHistoryStore>) -> Self {
        self.history = Some(history);
        self
    }

    pub fn with_dlq(mut self, dlq: Arc<DeadLetterQueue>) -> Self {
        self.dlq = dlq;
        self
    }

    pub fn dlq(&self) -> &DeadLetterQueue {
        &self.dlq
    }

    pub fn ruleset_version(&self) -> &str {
        &self.config.ruleset_version
    }

    pub fn attestation_for(&self, signal_id: &str) -> Option<SignalAttestation> {
        self.attestations.lock().get(signal_id).cloned()
    }

    /// Process a single raw event through the full pipeline.
    ///
    /// Pass an explicit context for deterministic replay; otherwise a fresh
    /// context is created from the current time.
    pub async fn process_single(
        &self,
        event: &RawSignalEvent,
        context: Option<&ProcessingContext>,
        id_style: IdStyle,
    ) -> PipelineResult {
        self.process_with_retry(event, context, id_style, 0).await
    }

    async fn process_with_retry(
        &self,
        event: &RawSignalEvent,
        context: Option<&ProcessingContext>,
        id_style: IdStyle,
        retry_count: u32,
    ) -> PipelineResult {
        let owned_ctx;
        let ctx = match context {
            Some(c) => c,
            None => {
                owned_ctx = ProcessingContext::create(self.config.ruleset_version.clone());
                &owned_ctx
            }
        };

        let mut stats = PipelineStats {
            events_received: 1,
            ..Default::default()
        };
        let started = Instant::now();

        let result = match self.process_inner(event, ctx, id_style, &mut stats, started).await {
            Ok(result) => result,
            Err(e) => self.handle_error(event, e, stats, started, retry_count),
        };
        self.record_metrics(&result);
        result
    }

    async fn process_inner(
        &self,
        event: &RawSignalEvent,
        ctx: &ProcessingContext,
        id_style: IdStyle,
        stats: &mut PipelineStats,
        started: Instant,
    ) -> Result<PipelineResult, OmenError> {
        // Idempotency: the same input hash never materially processes twice.
        if let Some(existing) = self.repository.find_by_hash(&event.input_event_hash)? {
            info!(
                event_id = %event.event_id,
                signal_id = %existing.signal_id,
                "event already processed, returning cached signal"
            );
            stats.events_deduplicated = 1;
            stats.processing_time_ms = started.elapsed().as_secs_f64() * 1000.0;
            return Ok(PipelineResult {
                success: true,
                cached: true,
                signals: vec![existing],
                stats: std::mem::take(stats),
                ..Default::default()
            });
        }

        // Validation.
        let validation_started = Instant::now();
        let outcome = self.validator.validate(event, ctx);
        stats.stage_latency_ms.insert(
            "validation".into(),
            validation_started.elapsed().as_secs_f64() * 1000.0,
        );
        if !outcome.passed {
            let first_failed = outcome
                .results
                .iter()
                .find(|r| !r.status.is_passed())
                .cloned();
            let (rule_name, rule_version) = first_failed
                .as_ref()
                .map(|r| (r.rule_name.clone(), r.rule_version.clone()))
                .unwrap_or_else(|| ("validation".into(), "0".into()));
            let reason = outcome
                .rejection_reason
                .clone()
                .unwrap_or_else(|| "unknown".into());

            info!(event_id = %event.event_id, %reason, "event rejected at validation");
            stats.events_rejected_validation = 1;
            stats.processing_time_ms = started.elapsed().as_secs_f64() * 1000.0;
            self.activity
                .log_event_validated(&event.event_id, &rule_name, false, Some(&reason));
            self.rejections.record_rejection(
                &event.event_id,
                "validation",
                &rule_name,
                &rule_version,
                &reason,
            );
            return Ok(PipelineResult {
                success: true,
                validation_failures: outcome.results,
                rejection_reason: Some(reason),
                stats: std::mem::take(stats),
                ..Default::default()
            });
        }
        let validated = outcome.signal.expect("passed outcome carries a signal");
        stats.events_validated = 1;
        let last_rule = outcome
            .results
            .last()
            .map(|r| r.rule_name.clone())
            .unwrap_or_else(|| "validation".into());
        self.activity
            .log_event_validated(&event.event_id, &last_rule, true, None);

        // Enrichment.
        let enrich_started = Instant::now();
        let enrichment = self.enricher.enrich(event, &validated);
        stats.stage_latency_ms.insert(
            "enrichment".into(),
            enrich_started.elapsed().as_secs_f64() * 1000.0,
        );

        // Generation.
        let generate_started = Instant::now();
        let signal = self
            .generator
            .generate(&validated, &enrichment, ctx, id_style);
        stats.stage_latency_ms.insert(
            "generation".into(),
            generate_started.elapsed().as_secs_f64() * 1000.0,
        );

        if signal.confidence_score < self.config.min_confidence_for_output {
            info!(
                signal_id = %signal.signal_id,
                confidence = signal.confidence_score,
                floor = self.config.min_confidence_for_output,
                "signal below confidence floor, dropped"
            );
            stats.events_below_confidence = 1;
            stats.processing_time_ms = started.elapsed().as_secs_f64() * 1000.0;
            self.rejections.record_rejection(
                &event.event_id,
                "confidence_floor",
                "signal_generation",
                "1.0.0",
                &format!(
                    "confidence {:.2} below floor {:.2}",
                    signal.confidence_score, self.config.min_confidence_for_output
                ),
            );
            return Ok(PipelineResult {
                success: true,
                stats: std::mem::take(stats),
                ..Default::default()
            });
        }

        stats.signals_generated = 1;
        self.activity.log_signal_generated(
            &signal.signal_id,
            &signal.title,
            signal.confidence_level.as_str(),
        );
        self.rejections
            .record_passed(&event.event_id, &signal.signal_id);

        // Attestation and schema routing. Attestation is mandatory; a signal
        // that cannot be attested must not be stored.
        let attestation = self
            .registry
            .attest(&signal.signal_id, &event.market.source)?;
        let gate_result = self.gate.check_gate(Mode::Live);
        let decision = self.router.route(&attestation, Some(&gate_result));
        self.attestations
            .lock()
            .insert(signal.signal_id.clone(), attestation);

        // Persist then publish, each wrapped independently.
        if !self.config.enable_dry_run {
            let persist_started = Instant::now();
            if let Err(e) = self.persist(&signal, event, ctx) {
                error!(signal_id = %signal.signal_id, error = %e, "failed to persist signal");
                if self.config.fail_on_persist_error {
                    return Err(e);
                }
            }
            stats.stage_latency_ms.insert(
                "persistence".into(),
                persist_started.elapsed().as_secs_f64() * 1000.0,
            );

            if let Some(publisher) = &self.publisher {
                if let Err(e) = publisher.publish(&signal).await {
                    error!(signal_id = %signal.signal_id, error = %e, "failed to publish signal");
                    if self.config.fail_on_publish_error {
                        return Err(e);
                    }
                }
            }
        }

        info!(
            signal_id = %signal.signal_id,
            confidence_level = signal.confidence_level.as_str(),
            schema = decision.schema.as_str(),
            "generated OMEN signal"
        );
        stats.processing_time_ms = started.elapsed().as_secs_f64() * 1000.0;
        Ok(PipelineResult {
            success: true,
            signals: vec![signal],
            stats: std::mem::take(stats),
            ..Default::default()
        })
    }

    fn persist(
        &self,
        signal: &OmenSignal,
        event: &RawSignalEvent,
        ctx: &ProcessingContext,
    ) -> Result<(), OmenError> {
        self.repository.save(signal)?;

        if let Some(ledger) = &self.ledger {
            let envelope =
                SignalEvent::from_signal(signal.clone(), event.observed_at, ctx.processing_time);
            ledger
                .append(&envelope, ctx.processing_time)
                .map_err(|e| OmenError::internal(format!("ledger append failed: {e}")))?;
        }

        if let Some(history) = &self.history {
            if let Err(e) = history.record(
                &signal.signal_id,
                signal.probability,
                &event.market.source,
                Some(&event.market.market_id),
                ctx.processing_time,
            ) {
                warn!(signal_id = %signal.signal_id, error = %e, "failed to record history");
            }
        }

        Ok(())
    }

    fn handle_error(
        &self,
        event: &RawSignalEvent,
        error: OmenError,
        mut stats: PipelineStats,
        started: Instant,
        retry_count: u32,
    ) -> PipelineResult {
        error!(event_id = %event.event_id, error = %error, "pipeline error");
        let mut details = BTreeMap::new();
        details.insert("event_id".into(), serde_json::Value::from(event.event_id.clone()));
        details.insert("error".into(), error.to_json());
        self.activity.log_error("pipeline failure", details);

        if self.config.enable_dlq {
            self.dlq.add(event.clone(), error.clone(), retry_count);
        }
        stats.events_failed = 1;
        stats.processing_time_ms = started.elapsed().as_secs_f64() * 1000.0;
        PipelineResult {
            success: false,
            error: Some(error.to_string()),
            stats,
            ..Default::default()
        }
    }

    /// Process a batch; every event is independently wrapped so one failure
    /// never aborts the rest.
    pub async fn process_batch(
        &self,
        events: &[RawSignalEvent],
        context: Option<&ProcessingContext>,
        id_style: IdStyle,
    ) -> Vec<PipelineResult> {
        let mut results = Vec::with_capacity(events.len());
        for event in events {
            results.push(self.process_single(event, context, id_style).await);
        }
        results
    }

    /// Reprocess dead-lettered events, oldest first. Idempotent: anything
    /// that succeeded in the meantime short-circuits at the hash probe.
    pub async fn reprocess_dlq(&self, max_items: usize) -> Vec<PipelineResult> {
        let mut results = Vec::new();
        for _ in 0..max_items {
            let Some(entry) = self.dlq.pop() else {
                break;
            };
            info!(
                event_id = %entry.event.event_id,
                retry_count = entry.retry_count,
                "reprocessing DLQ entry"
            );
            results.push(
                self.process_with_retry(
                    &entry.event,
                    None,
                    IdStyle::Standard,
                    entry.retry_count + 1,
                )
                .await,
            );
        }
        results
    }

    fn record_metrics(&self, result: &PipelineResult) {
        let avg_confidence = if result.signals.is_empty() {
            0.0
        } else {
            result
                .signals
                .iter()
                .map(|s| s.confidence_score)
                .sum::<f64>()
                / result.signals.len() as f64
        };
        let mut rejection_reasons = BTreeMap::new();
        if let Some(reason) = &result.rejection_reason {
            rejection_reasons.insert(reason.clone(), 1);
        }
        self.metrics.record_batch(ProcessingBatch {
            timestamp: chrono::Utc::now(),
            events_received: result.stats.events_received,
            events_validated: result.stats.events_validated,
            events_rejected: result.stats.events_rejected_validation,
            signals_generated: result.stats.signals_generated,
            processing_time_ms: result.stats.processing_time_ms,
            avg_confidence,
            rejection_reasons,
            stage_latency_ms: result.stats.stage_latency_ms.clone(),
        });
    }
}
