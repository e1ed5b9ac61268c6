//! The sync engine.
//!
//! Diff computation, the manifest ledger, bounded batch execution and the
//! state machine driving a full run.

pub mod batch;
pub mod diff;
pub mod events;
pub mod guard;
pub mod manifest;
pub mod orchestrator;

pub use batch::{BatchOptions, BatchRunner, BatchSummary};
pub use diff::{DiffResult, build_diff_batch, calculate_diff};
pub use events::{ChannelObserver, ConsoleObserver, NoopObserver, SyncEvent, SyncObserver};
pub use guard::{CircuitBreaker, CircuitBreakerConfig, GuardVerdict};
pub use manifest::{ManifestStore, build_manifest_batch};
pub use orchestrator::{IndexNames, SyncContext, SyncPlan, SyncReport, SyncState};
