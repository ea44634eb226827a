//! Schema router.
//!
//! Decides which persistence schema (demo/live) receives a signal, from its
//! attestation and the live gate status. MOCK data never reaches the live
//! schema; neither does HYBRID, and neither does a REAL attestation that
//! somehow lost its response hash.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::domain::attestation::{SignalAttestation, SourceType};
use crate::gate::live_gate::{GateCheckResult, GateStatus};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Schema {
    Demo,
    Live,
}

impl Schema {
    pub fn as_str(&self) -> &'static str {
        match self {
            Schema::Demo => "demo",
            Schema::Live => "live",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoutingDecision {
    pub schema: Schema,
    pub signal_id: String,
    pub source_type: SourceType,
    pub gate_status: GateStatus,
    pub reason: String,
    pub decided_at: DateTime<Utc>,
}

#[derive(Default)]
pub struct SchemaRouter;

impl SchemaRouter {
    pub fn new() -> Self {
        Self
    }

    /// Routing table:
    ///
    /// | Gate    | Attestation | hash    | Target |
    /// |---------|-------------|---------|--------|
    /// | BLOCKED | any         | any     | demo   |
    /// | ALLOWED | MOCK        | -       | demo   |
    /// | ALLOWED | HYBRID      | -       | demo   |
    /// | ALLOWED | REAL        | missing | demo   |
    /// | ALLOWED | REAL        | present | live   |
    pub fn route(
        &self,
        attestation: &SignalAttestation,
        gate: Option<&GateCheckResult>,
    ) -> RoutingDecision {
        let now = Utc::now();
        // No gate result means blocked, the safe default.
        let gate_status = gate.map(|g| g.status).unwrap_or(GateStatus::Blocked);

        let decide = |schema: Schema, reason: String| {
            debug!(
                signal_id = %attestation.signal_id,
                schema = schema.as_str(),
                %reason,
                "schema routing decision"
            );
            RoutingDecision {
                schema,
                signal_id: attestation.signal_id.clone(),
                source_type: attestation.source_type,
                gate_status,
                reason,
                decided_at: now,
            }
        };

        if gate_status == GateStatus::Blocked {
            return decide(Schema::Demo, "live gate is BLOCKED".into());
        }

        match attestation.source_type {
            SourceType::Mock => decide(
                Schema::Demo,
                format!("source type is MOCK ({})", attestation.source_id),
            ),
            SourceType::Hybrid => {
                decide(Schema::Demo, "source type is HYBRID (treated as MOCK)".into())
            }
            SourceType::Real => {
                if attestation.api_response_hash.is_none() {
                    warn!(
                        signal_id = %attestation.signal_id,
                        "REAL attestation missing api_response_hash, routing to demo"
                    );
                    return decide(
                        Schema::Demo,
                        "REAL attestation missing api_response_hash".into(),
                    );
                }
                decide(
                    Schema::Live,
                    format!(
                        "REAL source ({}) with live gate ALLOWED",
                        attestation.source_id
                    ),
                )
            }
        }
    }

    pub fn signal_table(&self, decision: &RoutingDecision) -> String {
        format!("{}.signals", decision.schema.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::attestation::VerificationMethod;
    use crate::gate::live_gate::Mode;

    fn gate(status: GateStatus) -> GateCheckResult {
        GateCheckResult {
            status,
            granted_mode: if status == GateStatus::Allowed {
                Mode::Live
            } else {
                Mode::Demo
            },
            requested_mode: Mode::Live,
            real_source_count: 2,
            total_source_count: 2,
            real_source_ratio: 1.0,
            block_reasons: vec![],
            missing_sources: vec![],
            real_sources: vec![],
            mock_sources: vec![],
            master_switch_enabled: true,
            required_ratio: 0.8,
            checked_at: Utc::now(),
        }
    }

    fn real_attestation() -> SignalAttestation {
        SignalAttestation::create_real(
            "OMEN-A",
            "polymarket",
            "deadbeef",
            VerificationMethod::ApiResponseHash,
        )
        .unwrap()
    }

    #[test]
    fn blocked_gate_routes_everything_to_demo() {
        let router = SchemaRouter::new();
        let decision = router.route(&real_attestation(), Some(&gate(GateStatus::Blocked)));
        assert_eq!(decision.schema, Schema::Demo);
    }

    #[test]
    fn missing_gate_is_blocked_by_default() {
        let router = SchemaRouter::new();
        let decision = router.route(&real_attestation(), None);
        assert_eq!(decision.schema, Schema::Demo);
        assert_eq!(decision.gate_status, GateStatus::Blocked);
    }

    #[test]
    fn mock_and_hybrid_route_to_demo_even_when_allowed() {
        let router = SchemaRouter::new();
        let mock = SignalAttestation::create_mock("OMEN-A", "ais_demo");
        assert_eq!(
            router.route(&mock, Some(&gate(GateStatus::Allowed))).schema,
            Schema::Demo
        );

        let hybrid =
            SignalAttestation::create_hybrid("OMEN-B", &[real_attestation(), mock.clone()]);
        assert_eq!(hybrid.source_type, SourceType::Hybrid);
        assert_eq!(
            router.route(&hybrid, Some(&gate(GateStatus::Allowed))).schema,
            Schema::Demo
        );
    }

    #[test]
    fn real_without_hash_downgrades_to_demo() {
        let router = SchemaRouter::new();
        let mut attestation = real_attestation();
        attestation.api_response_hash = None;
        let decision = router.route(&attestation, Some(&gate(GateStatus::Allowed)));
        assert_eq!(decision.schema, Schema::Demo);
        assert!(decision.reason.contains("api_response_hash"));
    }

    #[test]
    fn real_with_hash_and_allowed_gate_routes_live() {
        let router = SchemaRouter::new();
        let decision = router.route(&real_attestation(), Some(&gate(GateStatus::Allowed)));
        assert_eq!(decision.schema, Schema::Live);
        assert_eq!(router.signal_table(&decision), "live.signals");
    }
}
