//! Nodelet - node-resident workload reconciliation core.
//!
//! This library reconciles a set of assigned workloads ("pods") against
//! their observed runtime state. Every workload gets a dedicated worker
//! task that drives it through a strict lifecycle:
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                       UpdateSource                           │
//! │  Inbound Add/Update/Delete/Remove batches, in order          │
//! ├──────────────────────────────────────────────────────────────┤
//! │                      WorkCoordinator                         │
//! │  Per-id sync status, mailboxes, coalescing, cancellation     │
//! ├──────────────────────────────────────────────────────────────┤
//! │  ┌─────────────┐  ┌─────────────┐  ┌──────────────────────┐  │
//! │  │ Per-workload│  │ StatusCache │  │ RetryQueue           │  │
//! │  │ worker task │  │             │  │ (jittered requeue)   │  │
//! │  └─────────────┘  └─────────────┘  └──────────────────────┘  │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Core Concepts
//!
//! - **Workload**: the unit of management. Identified by an opaque
//!   [`workload::WorkloadId`] that is stable for one instance; a
//!   replacement instance (even with the same name) gets a new id.
//!
//! - **Lifecycle**: running → terminating → terminated, with no reverse
//!   edges. The transition into terminating cancels any in-flight
//!   reconciliation; the grace period can only shrink once requested.
//!
//! - **Coalescing**: each worker has a single-slot mailbox. Updates that
//!   arrive while the worker is busy overwrite a "last undelivered work"
//!   slot, so the worker always observes the latest state rather than a
//!   backlog of intermediate ones.
//!
//! - **Reconcilers**: the actual container-engine interaction is
//!   injected through the [`worker::Reconciler`] trait; this crate only
//!   owns ordering, cancellation, and retry semantics.
//!
//! # Example
//!
//! ```ignore
//! use nodelet::config::CoordinatorConfig;
//! use nodelet::status::StatusCache;
//! use nodelet::worker::{UpdateKind, UpdateRequest, WorkCoordinator};
//! use std::sync::Arc;
//!
//! let cache = Arc::new(StatusCache::new());
//! let coordinator = WorkCoordinator::new(
//!     Arc::new(MyReconciler::new()),
//!     Arc::new(MyStatusPublisher::new()),
//!     Arc::clone(&cache),
//!     CoordinatorConfig::default(),
//! );
//!
//! coordinator.update(UpdateRequest::new(UpdateKind::Create, workload));
//! ```

pub mod config;
pub mod logging;
pub mod node;
pub mod queue;
pub mod source;
pub mod status;
pub mod worker;
pub mod workload;

/// Version of the nodelet library.
///
/// This is synchronized across all components in the workspace.
/// The version is defined in `Cargo.toml` and injected at compile time.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
