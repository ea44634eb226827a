//! Persistence: signal repository, append-only ledger, probability history,
//! and reconcile state.

pub mod history;
pub mod ledger;
pub mod reconcile_state;
pub mod repository;

pub use history::{Momentum, ProbabilityPoint, SignalHistoryStore};
pub use ledger::{
    CompressionAlgo, LedgerConfig, PartitionInfo, PartitionManifest, SignalLedger,
};
pub use reconcile_state::{ReconcileState, ReconcileStateStore};
pub use repository::{InMemorySignalRepository, SignalRepository};
