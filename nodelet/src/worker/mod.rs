//! Per-workload reconciliation workers and their coordinator.
//!
//! The [`WorkCoordinator`] is the central component: it owns the
//! per-workload sync state and mailboxes, classifies every incoming
//! [`UpdateRequest`] into a lifecycle step, and spawns one worker task
//! per workload id. The worker task ([`task_loop`]) drives the injected
//! [`Reconciler`] through running → terminating → terminated.
//!
//! Updates for a busy worker are coalesced, latest wins, through a
//! single undelivered-work slot per id; the worker always observes the
//! most recent state rather than a backlog of intermediate ones.

pub mod coordinator;
pub mod options;
pub(crate) mod task_loop;
pub mod traits;

pub use coordinator::WorkCoordinator;
pub use options::{
    KillOptions, StatusOverrideFn, UpdateKind, UpdateRequest, WorkItem, WorkKind, WorkerState,
};
pub use traits::{BoxFuture, ReconcileError, Reconciler, StatusPublisher};
