//! Provenance gating: source registry, live gate, schema router.

pub mod live_gate;
pub mod registry;
pub mod schema_router;

pub use live_gate::{
    BlockReason, GateCheckResult, GateConfig, GateStatus, LiveGateService, Mode,
};
pub use registry::{SourceRecord, SourceRegistry};
pub use schema_router::{RoutingDecision, Schema, SchemaRouter};
