//! Observability: metrics, activity log, rejection tracker.
//!
//! All components are in-process, bounded, and guarded by fine-grained
//! locks; callers never hold a lock across I/O.

pub mod activity;
pub mod metrics;
pub mod rejections;

pub use activity::{ActivityEvent, ActivityKind, ActivityLog};
pub use metrics::{MetricsCollector, MetricsSnapshot, ProcessingBatch, SourceHealth};
pub use rejections::{RejectionRecord, RejectionStatistics, RejectionTracker};
