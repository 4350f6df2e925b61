//! The per-workload worker task.
//!
//! One task per workload id, spawned by the coordinator on the first
//! update. It consumes work items from its capacity-1 mailbox in
//! submission order, waits for a sufficiently fresh runtime
//! observation, dispatches the matching reconciliation step, publishes
//! the resulting status, and reports completion back to the
//! coordinator.

use super::coordinator::WorkCoordinator;
use super::options::{WorkItem, WorkKind};
use super::traits::ReconcileError;
use crate::status::{generate_api_status, RuntimeStatus};
use crate::workload::WorkloadId;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc;
use tracing::{debug, error};

pub(crate) async fn run(
    coordinator: Arc<WorkCoordinator>,
    id: WorkloadId,
    mut updates: mpsc::Receiver<WorkItem>,
) {
    let mut last_sync_at: Option<Instant> = None;
    let mut started = false;

    while let Some(item) = updates.recv().await {
        let Some(workload) = item.request.workload.clone() else {
            error!(workload_id = %id, "work item carried no workload snapshot");
            continue;
        };

        // Decide whether the workload may start. If it was terminated
        // before ever being allowed to start, finalize and exit.
        if !started {
            let (can_start, can_ever_start) = coordinator.allow_start(&workload);
            if !can_ever_start {
                coordinator.complete_unstarted_terminated(&id);
                debug!(
                    workload = %workload.full_name(),
                    workload_id = %id,
                    kind = ?item.kind,
                    "processing workload event done"
                );
                return;
            }
            if !can_start {
                debug!(
                    workload = %workload.full_name(),
                    workload_id = %id,
                    "workload cannot start yet"
                );
                continue;
            }
            started = true;
        }

        debug!(
            workload = %workload.full_name(),
            workload_id = %id,
            kind = ?item.kind,
            "processing workload event"
        );

        // Orphaned runtime-only kills need no observation; everything
        // else waits (bounded) for a refresh newer than the last sync.
        let observed = if item.request.running.is_some() {
            None
        } else {
            match coordinator
                .status_cache()
                .get_newer_than(&id, last_sync_at)
                .await
            {
                Ok(status) => Some(status),
                Err(err) => {
                    error!(
                        workload = %workload.full_name(),
                        workload_id = %id,
                        error = %err,
                        "error fetching runtime status, skipping"
                    );
                    coordinator.complete_work(
                        &id,
                        false,
                        Some(&ReconcileError::Failed(err.to_string())),
                    );
                    continue;
                }
            }
        };

        let Some(cancel) = coordinator.token_for_worker(&id) else {
            // The worker history is gone; nothing left to do.
            return;
        };

        let mut is_terminal = false;
        let status_override = match item.kind {
            WorkKind::Terminating => coordinator.acknowledge_terminating(&id),
            _ => None,
        };

        let result = match item.kind {
            WorkKind::Terminated => {
                let observed = observed
                    .clone()
                    .unwrap_or_else(|| RuntimeStatus::empty(id.clone()));
                coordinator
                    .reconciler()
                    .sync_terminated(cancel, &workload, &observed)
                    .await
            }
            WorkKind::Terminating => {
                let grace = item
                    .request
                    .kill
                    .as_ref()
                    .and_then(|kill| kill.grace_period_override)
                    .unwrap_or(1);
                coordinator
                    .reconciler()
                    .sync_terminating(
                        cancel,
                        &workload,
                        observed.as_ref(),
                        item.request.running.as_ref(),
                        grace,
                        status_override.clone(),
                    )
                    .await
            }
            WorkKind::Sync => {
                let observed = observed
                    .clone()
                    .unwrap_or_else(|| RuntimeStatus::empty(id.clone()));
                match coordinator
                    .reconciler()
                    .sync(
                        cancel,
                        item.request.kind,
                        &workload,
                        item.request.mirror.as_ref(),
                        &observed,
                    )
                    .await
                {
                    Ok(terminal) => {
                        is_terminal = terminal;
                        Ok(())
                    }
                    Err(err) => Err(err),
                }
            }
        };
        last_sync_at = Some(Instant::now());

        // Publish the computed status for everything except orphans,
        // which have no upstream representation.
        if result.is_ok() {
            if let Some(observed) = observed.as_ref() {
                let mut status =
                    generate_api_status(&workload, observed, coordinator.reason_cache());
                if let Some(override_fn) = &status_override {
                    override_fn(&mut status);
                }
                coordinator.publisher().set_status(&workload, status);
            }
        }

        let mut phase_transition = false;
        match &result {
            Err(ReconcileError::Cancelled) => {
                // A superseding update is expected to already be queued.
                debug!(
                    workload = %workload.full_name(),
                    workload_id = %id,
                    kind = ?item.kind,
                    "sync exited with cancellation"
                );
            }
            Err(err) => {
                error!(
                    workload = %workload.full_name(),
                    workload_id = %id,
                    error = %err,
                    "error syncing workload, skipping"
                );
            }
            Ok(()) if item.kind == WorkKind::Terminated => {
                coordinator.complete_terminated(&id);
                debug!(
                    workload = %workload.full_name(),
                    workload_id = %id,
                    kind = ?item.kind,
                    "processing workload event done"
                );
                return;
            }
            Ok(()) if item.kind == WorkKind::Terminating => {
                // Orphans have no configuration; garbage collection
                // covers whatever remains, so the worker exits here.
                if item.request.running.is_some() {
                    coordinator.complete_terminating_runtime(&id);
                    debug!(
                        workload = %workload.full_name(),
                        workload_id = %id,
                        kind = ?item.kind,
                        "processing workload event done"
                    );
                    return;
                }
                coordinator.complete_terminating(&id, &workload);
                phase_transition = true;
            }
            Ok(()) if is_terminal => {
                debug!(
                    workload = %workload.full_name(),
                    workload_id = %id,
                    "workload is terminal"
                );
                coordinator.complete_sync(&id, &workload);
                phase_transition = true;
            }
            Ok(()) => {}
        }

        // Queue a retry if necessary, then pull in any coalesced work.
        coordinator.complete_work(&id, phase_transition, result.as_ref().err());
        debug!(
            workload = %workload.full_name(),
            workload_id = %id,
            kind = ?item.kind,
            "processing workload event done"
        );
    }
}
