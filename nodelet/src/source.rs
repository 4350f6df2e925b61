//! Inbound update stream.
//!
//! An external aggregator merges the node's configuration sources into
//! a single ordered stream of batches. [`UpdateSource`] consumes that
//! stream and translates each batch 1:1 into coordinator updates, in
//! delivery order. It also resubmits workloads that the retry queue has
//! made due again.

use crate::worker::{UpdateKind, UpdateRequest, WorkCoordinator};
use crate::workload::Workload;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info};

/// Operation carried by an inbound batch.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SourceOp {
    /// Workloads newly assigned to this node.
    Add,
    /// Configuration changes to known workloads.
    Update,
    /// Workloads marked for graceful deletion.
    Delete,
    /// Workloads removed from the desired set; kill them.
    Remove,
}

/// One batch from the update stream.
#[derive(Debug)]
pub struct SourceBatch {
    pub op: SourceOp,
    pub workloads: Vec<Workload>,
}

/// Translates the inbound stream into coordinator updates.
pub struct UpdateSource {
    coordinator: Arc<WorkCoordinator>,
}

impl UpdateSource {
    pub fn new(coordinator: Arc<WorkCoordinator>) -> Self {
        Self { coordinator }
    }

    /// Consumes batches until the stream closes.
    pub async fn run(self, mut batches: mpsc::Receiver<SourceBatch>) {
        info!("update source started");
        while let Some(batch) = batches.recv().await {
            self.dispatch(batch);
        }
        info!("update source stream closed");
    }

    /// Submits one batch to the coordinator, in order.
    pub fn dispatch(&self, batch: SourceBatch) {
        debug!(op = ?batch.op, count = batch.workloads.len(), "dispatching update batch");
        let kind = match batch.op {
            SourceOp::Add => UpdateKind::Create,
            SourceOp::Update | SourceOp::Delete => UpdateKind::Update,
            SourceOp::Remove => UpdateKind::Kill,
        };
        for workload in batch.workloads {
            self.coordinator.update(UpdateRequest::new(kind, workload));
        }
    }

    /// Resubmits every workload whose retry delay has elapsed, using
    /// the current configuration snapshots. Ids without a snapshot are
    /// dropped; housekeeping owns their cleanup.
    pub fn resync(&self, current: &[Workload]) {
        for id in self.coordinator.retry_queue().due() {
            if let Some(workload) = current.iter().find(|workload| workload.id == id) {
                self.coordinator
                    .update(UpdateRequest::new(UpdateKind::Sync, workload.clone()));
            } else {
                debug!(workload_id = %id, "due workload no longer in configuration, skipping resync");
            }
        }
    }
}
