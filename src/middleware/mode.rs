//! Live-mode request middleware: Layer 3 of the gate.
//!
//! Every request may carry `X-OMEN-Mode: LIVE`. The middleware consults the
//! live gate; a BLOCKED result silently downgrades the request to DEMO. The
//! effective mode is stored in request extensions for handlers and echoed
//! in the `X-OMEN-Mode` response header, with block reasons in
//! `X-OMEN-Block-Reasons`, so callers can never be confused about which
//! schema backed the data.

use std::sync::Arc;

use axum::{
    body::Body,
    http::{HeaderValue, Request},
    middleware::Next,
    response::Response,
};

use crate::gate::{GateCheckResult, LiveGateService, Mode};

pub const MODE_HEADER: &str = "x-omen-mode";
pub const BLOCK_REASONS_HEADER: &str = "x-omen-block-reasons";

/// Effective mode for this request, available to handlers via extensions.
#[derive(Debug, Clone)]
pub struct EffectiveMode {
    pub requested: Mode,
    pub granted: Mode,
    pub gate: GateCheckResult,
}

pub async fn mode_middleware(
    axum::extract::State(gate): axum::extract::State<Arc<LiveGateService>>,
    mut request: Request<Body>,
    next: Next,
) -> Response {
    let requested = request
        .headers()
        .get(MODE_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(Mode::parse)
        .unwrap_or(Mode::Demo);

    let gate_result = gate.check_gate(requested);
    let effective = EffectiveMode {
        requested,
        granted: gate_result.granted_mode,
        gate: gate_result,
    };
    let granted = effective.granted;
    let block_reasons: Vec<&str> = effective
        .gate
        .block_reasons
        .iter()
        .map(|r| r.as_str())
        .collect();
    let reasons_header = block_reasons.join(",");

    request.extensions_mut().insert(effective);
    let mut response = next.run(request).await;

    response.headers_mut().insert(
        MODE_HEADER,
        HeaderValue::from_static(granted.as_str()),
    );
    if !reasons_header.is_empty() {
        if let Ok(value) = HeaderValue::from_str(&reasons_header) {
            response.headers_mut().insert(BLOCK_REASONS_HEADER, value);
        }
    }
    response
}
