//! Injected reconciliation and publication contracts.
//!
//! The coordinator owns ordering, cancellation, and retry semantics;
//! the actual container-engine interaction is injected through the
//! [`Reconciler`] trait, and computed statuses leave through the
//! [`StatusPublisher`] trait. Both are object-safe so they can be
//! stored as trait objects and mocked in tests.

use super::options::{StatusOverrideFn, UpdateKind};
use crate::status::{ApiStatus, RuntimeStatus};
use crate::workload::{RuntimeWorkload, Workload};
use std::future::Future;
use std::pin::Pin;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

/// Boxed future type for object-safe async trait methods.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Errors a reconciliation step can return.
#[derive(Debug, Error)]
pub enum ReconcileError {
    /// A dependency the workload needs is not ready yet (for example
    /// node networking). Retried on a short backoff.
    #[error("dependency not ready: {0}")]
    DependencyNotReady(String),

    /// The step observed its cancellation token and stopped early. Not
    /// a failure; a superseding work item is expected to be queued.
    #[error("reconciliation cancelled")]
    Cancelled,

    /// The step failed. Retried on the standard backoff.
    #[error("reconciliation failed: {0}")]
    Failed(String),
}

/// The three lifecycle steps of workload reconciliation, implemented
/// outside this crate against the container engine.
///
/// All methods must be cancellation-aware: they observe the provided
/// token at their I/O boundaries and return
/// [`ReconcileError::Cancelled`] promptly once it fires. They may be
/// called concurrently for different workloads.
pub trait Reconciler: Send + Sync {
    /// Drives the workload toward its desired state. Returns `true`
    /// once the workload has naturally reached a terminal phase and
    /// should begin terminating.
    fn sync<'a>(
        &'a self,
        cancel: CancellationToken,
        kind: UpdateKind,
        workload: &'a Workload,
        mirror: Option<&'a Workload>,
        observed: &'a RuntimeStatus,
    ) -> BoxFuture<'a, Result<bool, ReconcileError>>;

    /// Stops the workload's containers within the grace period.
    /// `observed` is absent for orphaned runtime-only workloads, for
    /// which `running` carries what the runtime knows.
    fn sync_terminating<'a>(
        &'a self,
        cancel: CancellationToken,
        workload: &'a Workload,
        observed: Option<&'a RuntimeStatus>,
        running: Option<&'a RuntimeWorkload>,
        grace_period_seconds: i64,
        status_override: Option<StatusOverrideFn>,
    ) -> BoxFuture<'a, Result<(), ReconcileError>>;

    /// Final cleanup once no containers remain.
    fn sync_terminated<'a>(
        &'a self,
        cancel: CancellationToken,
        workload: &'a Workload,
        observed: &'a RuntimeStatus,
    ) -> BoxFuture<'a, Result<(), ReconcileError>>;
}

/// Upstream publication of computed statuses. Fire and forget; the
/// implementation owns batching and retries.
pub trait StatusPublisher: Send + Sync {
    fn set_status(&self, workload: &Workload, status: ApiStatus);
}
