//! OMEN Backend Library
//!
//! Signal intelligence engine: converts heterogeneous real-world events
//! (prediction markets, news, AIS, weather, commodities, freight) into
//! uniform, audited, decision-grade `OmenSignal` artifacts.
//!
//! The pipeline is deterministic and idempotent (same input + same ruleset =
//! byte-identical output, never a duplicate row) and provenance-gated
//! (signals touched by simulated inputs can never reach the live schema).

pub mod api;
pub mod background;
pub mod config;
pub mod domain;
pub mod error;
pub mod gate;
pub mod middleware;
pub mod observability;
pub mod persistence;
pub mod pipeline;
pub mod publish;
pub mod reconcile;
pub mod rules;
pub mod sources;

pub use config::OmenConfig;
pub use domain::{OmenSignal, ProcessingContext, RawSignalEvent};
pub use error::OmenError;
pub use pipeline::{OmenPipeline, PipelineConfig, PipelineResult};
