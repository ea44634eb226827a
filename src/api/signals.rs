//! Signal API endpoints.
//!
//! Listing with mode-prefix filtering, detail levels, batch/refresh
//! triggers, pipeline stats, and the SSE stream.

use std::convert::Infallible;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::sse::{Event, KeepAlive, Sse},
    response::{IntoResponse, Response},
    Extension, Json,
};
use chrono::{DateTime, Utc};
use futures_util::Stream;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::sync::broadcast;

use crate::api::AppState;
use crate::domain::omen_signal::OmenSignal;
use crate::middleware::EffectiveMode;
use crate::pipeline::IdStyle;

/// Structured error payload: `{error, message, hint}`.
#[derive(Debug, Serialize)]
pub struct ApiError {
    #[serde(skip)]
    pub status: StatusCode,
    pub error: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hint: Option<String>,
}

impl ApiError {
    pub fn not_found(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            error: "not_found".into(),
            message: message.into(),
            hint: None,
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            error: "internal".into(),
            message: message.into(),
            hint: None,
        }
    }

    pub fn unavailable(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::SERVICE_UNAVAILABLE,
            error: "source_unavailable".into(),
            message: message.into(),
            hint: Some("Retry shortly".into()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(&self)).into_response()
    }
}

#[derive(Debug, Deserialize)]
pub struct SignalsQuery {
    #[serde(default = "default_limit")]
    pub limit: usize,
    #[serde(default)]
    pub offset: usize,
    #[serde(default)]
    pub since: Option<DateTime<Utc>>,
    /// `live`, `demo`, or `all`.
    #[serde(default = "default_mode_filter")]
    pub mode: String,
}

fn default_limit() -> usize {
    50
}

fn default_mode_filter() -> String {
    "all".into()
}

#[derive(Debug, Deserialize)]
pub struct DetailQuery {
    #[serde(default = "default_detail")]
    pub detail_level: String,
}

fn default_detail() -> String {
    "standard".into()
}

#[derive(Debug, Deserialize, Default)]
pub struct BatchRequest {
    #[serde(default = "default_batch_limit")]
    pub limit: usize,
}

fn default_batch_limit() -> usize {
    25
}

/// Signal projection at a given detail level. Mode filtering rides on the
/// id-prefix convention (`OMEN-LIVE...` vs `OMEN-...`).
fn signal_view(signal: &OmenSignal, detail: &str) -> Value {
    match detail {
        "minimal" => json!({
            "signal_id": signal.signal_id,
            "title": signal.title,
            "probability": signal.probability,
            "confidence_level": signal.confidence_level,
            "category": signal.category,
            "generated_at": signal.generated_at,
        }),
        "full" => serde_json::to_value(signal).unwrap_or_else(|_| json!({})),
        _ => json!({
            "signal_id": signal.signal_id,
            "source_event_id": signal.source_event_id,
            "title": signal.title,
            "description": signal.description,
            "probability": signal.probability,
            "probability_source": signal.probability_source,
            "confidence_score": signal.confidence_score,
            "confidence_level": signal.confidence_level,
            "category": signal.category,
            "tags": signal.tags,
            "geography": signal.geography,
            "temporal": signal.temporal,
            "ruleset_version": signal.ruleset_version,
            "market_url": signal.market_url,
            "generated_at": signal.generated_at,
        }),
    }
}

fn matches_mode(signal: &OmenSignal, mode: &str) -> bool {
    match mode {
        "live" => signal.is_live(),
        "demo" => !signal.is_live(),
        _ => true,
    }
}

pub async fn health() -> Json<Value> {
    Json(json!({"status": "ok"}))
}

/// GET /signals: paginated listing, newest first.
pub async fn list_signals(
    State(state): State<AppState>,
    Extension(mode): Extension<EffectiveMode>,
    Query(params): Query<SignalsQuery>,
) -> Result<Json<Value>, ApiError> {
    // Over-fetch, then apply the prefix filter and page. The reference
    // repository is in-memory; a production store pushes the prefix filter
    // into the index.
    let candidates = state
        .repository
        .find_recent(params.limit + params.offset + 1000, 0, params.since)
        .map_err(|e| ApiError::internal(e.to_string()))?;
    let filtered: Vec<&OmenSignal> = candidates
        .iter()
        .filter(|s| matches_mode(s, &params.mode))
        .collect();
    let total = filtered.len();
    let page: Vec<Value> = filtered
        .into_iter()
        .skip(params.offset)
        .take(params.limit)
        .map(|s| signal_view(s, "standard"))
        .collect();

    Ok(Json(json!({
        "mode": mode.granted.as_str(),
        "total": total,
        "limit": params.limit,
        "offset": params.offset,
        "signals": page,
    })))
}

/// GET /signals/:signal_id
pub async fn get_signal(
    State(state): State<AppState>,
    Extension(mode): Extension<EffectiveMode>,
    Path(signal_id): Path<String>,
    Query(params): Query<DetailQuery>,
) -> Result<Json<Value>, ApiError> {
    let signal = state
        .repository
        .find_by_id(&signal_id)
        .map_err(|e| ApiError::internal(e.to_string()))?
        .ok_or_else(|| ApiError::not_found(format!("signal {signal_id} not found")))?;

    let mut body = json!({
        "mode": mode.granted.as_str(),
        "signal": signal_view(&signal, &params.detail_level),
    });
    if params.detail_level == "full" {
        if let Some(attestation) = state.pipeline.attestation_for(&signal.signal_id) {
            body["attestation"] = serde_json::to_value(&attestation)
                .map_err(|e| ApiError::internal(e.to_string()))?;
        }
    }
    Ok(Json(body))
}

/// POST /signals/batch: fetch the latest from every source and run the
/// pipeline with standard ids.
pub async fn run_batch(
    State(state): State<AppState>,
    Extension(mode): Extension<EffectiveMode>,
    body: Option<Json<BatchRequest>>,
) -> Result<Json<Value>, ApiError> {
    let request = body.map(|Json(b)| b).unwrap_or_default();

    let mut events = Vec::new();
    let mut source_errors = Vec::new();
    for source in &state.sources {
        match source.fetch_events(request.limit, None).await {
            Ok(batch) => events.extend(batch),
            Err(e) => source_errors.push(json!({
                "source": source.source_id(),
                "error": e.to_string(),
            })),
        }
    }
    if events.is_empty() && !source_errors.is_empty() {
        return Err(ApiError::unavailable("all sources failed"));
    }

    let results = state
        .pipeline
        .process_batch(&events, None, IdStyle::Standard)
        .await;

    let mut signals = Vec::new();
    let mut deduplicated = 0u64;
    let mut rejected = 0u64;
    let mut failed = 0u64;
    for result in &results {
        deduplicated += result.stats.events_deduplicated;
        rejected += result.stats.events_rejected_validation;
        failed += result.stats.events_failed;
        if !result.cached {
            signals.extend(result.signals.iter().map(|s| signal_view(s, "standard")));
        }
    }

    Ok(Json(json!({
        "mode": mode.granted.as_str(),
        "events_received": events.len(),
        "signals_generated": signals.len(),
        "events_deduplicated": deduplicated,
        "events_rejected": rejected,
        "events_failed": failed,
        "source_errors": source_errors,
        "signals": signals,
    })))
}

/// POST /signals/refresh: a named live-fetch cycle (`OMEN-LIVE...` ids).
pub async fn refresh(
    State(state): State<AppState>,
    Extension(mode): Extension<EffectiveMode>,
) -> Json<Value> {
    let summary = state.generator.run_once().await;
    Json(json!({
        "mode": mode.granted.as_str(),
        "started_at": summary.started_at,
        "duration_ms": summary.duration_ms,
        "sources_polled": summary.sources_polled,
        "sources_failed": summary.sources_failed,
        "events_fetched": summary.events_fetched,
        "signals_generated": summary.signals_generated,
        "signals": summary
            .signals
            .iter()
            .map(|s| signal_view(s, "minimal"))
            .collect::<Vec<_>>(),
    }))
}

/// POST /signals/generate: trigger one background-generator cycle.
pub async fn generate(
    State(state): State<AppState>,
    Extension(mode): Extension<EffectiveMode>,
) -> Json<Value> {
    let summary = state.generator.run_once().await;
    Json(json!({
        "mode": mode.granted.as_str(),
        "signals_generated": summary.signals_generated,
        "status": state.generator.status(),
    }))
}

/// GET /signals/generator/status
pub async fn generator_status(
    State(state): State<AppState>,
    Extension(mode): Extension<EffectiveMode>,
) -> Json<Value> {
    Json(json!({
        "mode": mode.granted.as_str(),
        "generator": state.generator.status(),
    }))
}

/// GET /signals/stats: pipeline stats snapshot.
pub async fn stats(
    State(state): State<AppState>,
    Extension(mode): Extension<EffectiveMode>,
) -> Result<Json<Value>, ApiError> {
    let total = state
        .repository
        .count(None)
        .map_err(|e| ApiError::internal(e.to_string()))?;
    Ok(Json(json!({
        "mode": mode.granted.as_str(),
        "pipeline": state.metrics.snapshot(),
        "signals_stored": total,
        "dlq_size": state.pipeline.dlq().size(),
        "rejections": state.rejections.statistics(10),
        "sources": state.registry.all(),
        "gate": mode.gate,
    })))
}

/// GET /signals/activity: recent activity ring.
pub async fn activity(
    State(state): State<AppState>,
    Extension(mode): Extension<EffectiveMode>,
) -> Json<Value> {
    Json(json!({
        "mode": mode.granted.as_str(),
        "events": state.activity.recent(100),
    }))
}

/// GET /signals/rejections: rejection tracker statistics.
pub async fn rejections(
    State(state): State<AppState>,
    Extension(mode): Extension<EffectiveMode>,
) -> Json<Value> {
    Json(json!({
        "mode": mode.granted.as_str(),
        "statistics": state.rejections.statistics(10),
        "recent": state.rejections.recent_rejections(50),
    }))
}

/// GET /signals/stream: SSE channel emitting one signal per event. A
/// disconnecting subscriber never affects the producer.
pub async fn stream(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let rx = state.broadcast_tx.subscribe();
    let stream = futures_util::stream::unfold(rx, |mut rx| async move {
        loop {
            match rx.recv().await {
                Ok(signal) => {
                    let event = Event::default()
                        .json_data(&signal)
                        .unwrap_or_else(|_| Event::default().data("{}"));
                    return Some((Ok::<_, Infallible>(event), rx));
                }
                // A slow subscriber that lagged just skips ahead.
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    });
    Sse::new(stream).keep_alive(KeepAlive::default())
}
