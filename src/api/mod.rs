//! HTTP API.
//!
//! The core's verbs over axum. The mode middleware (gate Layer 3) wraps
//! every route; responses always carry the effective `X-OMEN-Mode`.

pub mod signals;

use std::sync::Arc;

use axum::{
    middleware as axum_mw,
    routing::{get, post},
    Router,
};
use tokio::sync::broadcast;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::background::BackgroundGenerator;
use crate::domain::omen_signal::OmenSignal;
use crate::gate::{LiveGateService, SourceRegistry};
use crate::middleware::{
    mode_middleware, rate_limit_middleware, request_logging, RateLimitConfig, RateLimiter,
};
use crate::observability::{ActivityLog, MetricsCollector, RejectionTracker};
use crate::persistence::SignalRepository;
use crate::pipeline::OmenPipeline;
use crate::sources::SignalSource;

/// Shared state for all handlers.
#[derive(Clone)]
pub struct AppState {
    pub pipeline: Arc<OmenPipeline>,
    pub repository: Arc<dyn SignalRepository>,
    pub sources: Vec<Arc<dyn SignalSource>>,
    pub registry: Arc<SourceRegistry>,
    pub gate: Arc<LiveGateService>,
    pub metrics: Arc<MetricsCollector>,
    pub activity: Arc<ActivityLog>,
    pub rejections: Arc<RejectionTracker>,
    pub generator: Arc<BackgroundGenerator>,
    pub broadcast_tx: broadcast::Sender<OmenSignal>,
}

pub fn build_router(state: AppState) -> Router {
    let gate = state.gate.clone();
    let limiter = RateLimiter::new(RateLimitConfig::default());

    Router::new()
        .route("/health", get(signals::health))
        .route("/signals", get(signals::list_signals))
        .route("/signals/batch", post(signals::run_batch))
        .route("/signals/refresh", post(signals::refresh))
        .route("/signals/generate", post(signals::generate))
        .route("/signals/generator/status", get(signals::generator_status))
        .route("/signals/stats", get(signals::stats))
        .route("/signals/stream", get(signals::stream))
        .route("/signals/activity", get(signals::activity))
        .route("/signals/rejections", get(signals::rejections))
        .route("/signals/:signal_id", get(signals::get_signal))
        .layer(axum_mw::from_fn_with_state(gate, mode_middleware))
        .layer(axum_mw::from_fn_with_state(limiter, rate_limit_middleware))
        .layer(axum_mw::from_fn(request_logging))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
