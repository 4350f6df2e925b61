//! The work coordinator.
//!
//! [`WorkCoordinator`] owns the per-workload sync state: one
//! [`SyncStatus`] record, one capacity-1 mailbox, and at most one
//! worker task per workload id. [`WorkCoordinator::update`] is the sole
//! mutation entry point; it classifies each update into a lifecycle
//! step, enforces the forward-only running → terminating → terminated
//! order, keeps the grace period monotonically non-increasing, and
//! cancels in-flight work when a termination or grace shortening
//! arrives while the worker is busy.
//!
//! All maps live behind one coarse [`std::sync::Mutex`] that is never
//! held across an await point.

use super::options::{
    KillOptions, StatusOverrideFn, UpdateKind, UpdateRequest, WorkItem, WorkKind, WorkerState,
};
use super::task_loop;
use super::traits::{Reconciler, StatusPublisher};
use crate::config::CoordinatorConfig;
use crate::queue::{jittered, RetryQueue};
use crate::status::{ReasonCache, StatusCache};
use crate::workload::{Workload, WorkloadId};
use std::collections::hash_map::Entry;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Per-workload sync state. Mutated only under the coordinator lock.
struct SyncStatus {
    /// A work item is currently dispatched to the worker.
    working: bool,
    /// Stable `namespace/name`, used for same-identity ordering.
    full_name: String,
    /// When the coordinator first observed this workload. Reported as
    /// the worker's age when its history is purged.
    synced_at: Instant,
    /// Set once termination has been requested. Never cleared.
    terminating_at: Option<Instant>,
    /// Set once the terminating step completed and no containers run.
    terminated_at: Option<Instant>,
    /// The worker has observed the terminating transition; no new
    /// containers will be started.
    started_terminating: bool,
    /// Graceful deletion was requested upstream, or the workload has no
    /// configuration backing it.
    deleted: bool,
    /// The termination was an eviction.
    evicted: bool,
    /// The worker has fully completed. No further reconciliation runs
    /// for this id until housekeeping purges it.
    finished: bool,
    /// A "should be running" request arrived while terminating; the
    /// history is cleared at the next housekeeping pass so the same id
    /// can start again.
    restart_requested: bool,
    /// Requested grace period in seconds, meaningful once
    /// `terminating_at` is set. Only ever decreases.
    grace_period: i64,
    /// Cancellation token for the in-flight reconciliation.
    cancel: Option<CancellationToken>,
    /// Fired once the workload transitions to terminated.
    completion_signals: Vec<tokio::sync::oneshot::Sender<()>>,
    /// Status overrides registered by kill requests; the most recent
    /// one is applied on each terminating attempt.
    status_overrides: Vec<StatusOverrideFn>,
}

impl SyncStatus {
    fn new(now: Instant, full_name: String) -> Self {
        Self {
            working: false,
            full_name,
            synced_at: now,
            terminating_at: None,
            terminated_at: None,
            started_terminating: false,
            deleted: false,
            evicted: false,
            finished: false,
            restart_requested: false,
            grace_period: 0,
            cancel: None,
            completion_signals: Vec::new(),
            status_overrides: Vec::new(),
        }
    }

    fn is_termination_requested(&self) -> bool {
        self.terminating_at.is_some()
    }

    fn is_terminated(&self) -> bool {
        self.terminated_at.is_some()
    }
}

#[derive(Default)]
struct Inner {
    /// True once housekeeping has run at least once. Flips the default
    /// answer of the presence queries for unknown ids.
    synced: bool,
    statuses: HashMap<WorkloadId, SyncStatus>,
    mailboxes: HashMap<WorkloadId, mpsc::Sender<WorkItem>>,
    /// The last work item that arrived while the worker was busy.
    /// Latest wins; the earliest submission timestamp is preserved.
    undelivered: HashMap<WorkloadId, WorkItem>,
    /// Started identity-stable workloads by full name.
    started_static: HashMap<String, WorkloadId>,
    /// Identity-stable workloads waiting to start, in arrival order.
    waiting_static: HashMap<String, Vec<WorkloadId>>,
}

/// Computes the effective grace period for a terminating workload.
///
/// The period starts from the previously recorded value (0 if unset)
/// and can only decrease: the control plane's requested period and any
/// kill override are adopted when smaller. If still unset, the spec's
/// declared default applies. The result is clamped to a minimum of 1
/// second. The returned flag is true when a previously nonzero period
/// actually changed, which drives cancellation of in-flight work.
fn effective_grace_period(
    current: i64,
    workload: &Workload,
    override_seconds: Option<i64>,
) -> (i64, bool) {
    let mut grace = current;
    if let Some(requested) = workload.deletion_grace_period_seconds {
        if grace == 0 || requested < grace {
            grace = requested;
        }
    }
    if let Some(requested) = override_seconds {
        if grace == 0 || requested < grace {
            grace = requested;
        }
    }
    if grace == 0 {
        if let Some(default) = workload.spec.termination_grace_period_seconds {
            grace = default;
        }
    }
    if grace < 1 {
        grace = 1;
    }
    (grace, current != 0 && current != grace)
}

/// Coordinates one worker task per workload id.
pub struct WorkCoordinator {
    inner: Mutex<Inner>,
    reconciler: Arc<dyn Reconciler>,
    publisher: Arc<dyn StatusPublisher>,
    cache: Arc<StatusCache>,
    reason_cache: Arc<ReasonCache>,
    retry_queue: Arc<RetryQueue>,
    config: CoordinatorConfig,
}

impl WorkCoordinator {
    /// Creates a coordinator. Worker tasks are spawned lazily on the
    /// first update for each workload id, so this must be used inside a
    /// tokio runtime.
    pub fn new(
        reconciler: Arc<dyn Reconciler>,
        publisher: Arc<dyn StatusPublisher>,
        cache: Arc<StatusCache>,
        config: CoordinatorConfig,
    ) -> Arc<Self> {
        Arc::new(Self {
            inner: Mutex::new(Inner::default()),
            reconciler,
            publisher,
            cache,
            reason_cache: Arc::new(ReasonCache::new()),
            retry_queue: Arc::new(RetryQueue::new()),
            config,
        })
    }

    pub fn status_cache(&self) -> &Arc<StatusCache> {
        &self.cache
    }

    pub fn reason_cache(&self) -> &Arc<ReasonCache> {
        &self.reason_cache
    }

    /// The queue an external sync loop drains to resubmit due
    /// workloads.
    pub fn retry_queue(&self) -> &Arc<RetryQueue> {
        &self.retry_queue
    }

    pub fn config(&self) -> &CoordinatorConfig {
        &self.config
    }

    pub(crate) fn reconciler(&self) -> &Arc<dyn Reconciler> {
        &self.reconciler
    }

    pub(crate) fn publisher(&self) -> &Arc<dyn StatusPublisher> {
        &self.publisher
    }

    /// Submits an update for a workload. The sole mutation entry point:
    /// decides whether the workload is being set up, torn down, or
    /// ignored, and delivers (or coalesces) the resulting work item to
    /// the workload's worker task.
    pub fn update(self: &Arc<Self>, mut request: UpdateRequest) {
        // Orphaned runtime-only entries run only the terminating part
        // of the lifecycle; a synthesized snapshot lets the worker loop
        // treat them uniformly.
        let mut is_orphan = false;
        match (&request.workload, &request.running) {
            (None, Some(running)) => {
                if request.kind != UpdateKind::Kill {
                    info!(
                        workload = %format!("{}/{}", running.namespace, running.name),
                        workload_id = %running.id,
                        "update ignored, runtime-only workloads can only be killed"
                    );
                    return;
                }
                request.workload = Some(running.to_workload());
                is_orphan = true;
            }
            (Some(workload), Some(_)) => {
                info!(
                    workload = %workload.full_name(),
                    workload_id = %workload.id,
                    "update included a runtime snapshot, which is only valid without a configuration snapshot"
                );
                request.running = None;
            }
            (None, None) => {
                warn!("update carried neither a configuration nor a runtime snapshot");
                return;
            }
            (Some(_), None) => {}
        }
        let Some(workload) = request.workload.clone() else {
            return;
        };
        let id = workload.id.clone();

        let mut inner = self.inner.lock().unwrap();
        let Inner {
            statuses,
            mailboxes,
            undelivered,
            waiting_static,
            ..
        } = &mut *inner;

        let now = Instant::now();
        let status = match statuses.entry(id.clone()) {
            Entry::Occupied(entry) => entry.into_mut(),
            Entry::Vacant(entry) => {
                debug!(
                    workload = %workload.full_name(),
                    workload_id = %id,
                    "workload is being synced for the first time"
                );
                let mut status = SyncStatus::new(now, workload.full_name());
                // Idempotent fast path: a first-seen workload whose
                // reported phase is already terminal and whose runtime
                // shows nothing running is recorded as terminated
                // outright.
                if !is_orphan && workload.reported_phase().is_terminal() {
                    let observed_terminal = self
                        .cache
                        .get(&id)
                        .map_or(true, |observed| observed.is_terminal());
                    if observed_terminal {
                        status.terminating_at = Some(now);
                        status.terminated_at = Some(now);
                        status.started_terminating = true;
                        status.finished = true;
                    }
                }
                entry.insert(status)
            }
        };

        // A fresh "should be running" request for an id that is still
        // tearing down means a replacement with the same id was created
        // in close temporal proximity. Flag it so housekeeping resets
        // the history once termination completes.
        if status.is_termination_requested() && request.kind == UpdateKind::Create {
            status.restart_requested = true;
            debug!(
                workload = %workload.full_name(),
                workload_id = %id,
                "workload is terminating but was requested to restart with the same id, will be reconciled later"
            );
            return;
        }

        // A terminated id cannot reenter until housekeeping purges it.
        if status.finished {
            debug!(
                workload = %workload.full_name(),
                workload_id = %id,
                "workload is finished processing, no further updates"
            );
            return;
        }

        // Check for a transition to terminating.
        let mut became_terminating = false;
        if !status.is_termination_requested() {
            if is_orphan {
                debug!(
                    workload = %workload.full_name(),
                    workload_id = %id,
                    "workload is orphaned and must be torn down"
                );
                status.deleted = true;
                status.terminating_at = Some(now);
                became_terminating = true;
            } else if workload.deletion_timestamp.is_some() {
                debug!(
                    workload = %workload.full_name(),
                    workload_id = %id,
                    "workload is marked for graceful deletion, begin teardown"
                );
                status.deleted = true;
                status.terminating_at = Some(now);
                became_terminating = true;
            } else if workload.reported_phase().is_terminal() {
                debug!(
                    workload = %workload.full_name(),
                    workload_id = %id,
                    "workload is in a terminal phase, begin teardown"
                );
                status.terminating_at = Some(now);
                became_terminating = true;
            } else if request.kind == UpdateKind::Kill {
                if request.kill.as_ref().is_some_and(|kill| kill.evict) {
                    debug!(
                        workload = %workload.full_name(),
                        workload_id = %id,
                        "workload is being evicted, begin teardown"
                    );
                    status.evicted = true;
                } else {
                    debug!(
                        workload = %workload.full_name(),
                        workload_id = %id,
                        "workload is being removed, begin teardown"
                    );
                }
                status.terminating_at = Some(now);
                became_terminating = true;
            }
        }

        // Once terminating, all updates are kills and the grace period
        // can only decrease.
        let mut grace_period_shortened = false;
        let kind = if status.is_terminated() {
            // A stale runtime-only kill for a terminated worker still
            // awaiting cleanup is ignored until the worker completes.
            if is_orphan {
                debug!(
                    workload = %workload.full_name(),
                    workload_id = %id,
                    "workload is waiting for termination, ignoring runtime-only kill"
                );
                return;
            }
            if let Some(mut kill) = request.kill.take() {
                if let Some(signal) = kill.completion_signal.take() {
                    let _ = signal.send(());
                }
            }
            WorkKind::Terminated
        } else if status.is_termination_requested() {
            let mut kill = request.kill.take().unwrap_or_default();
            if let Some(signal) = kill.completion_signal.take() {
                status.completion_signals.push(signal);
            }
            if let Some(override_fn) = kill.status_override.take() {
                status.status_overrides.push(override_fn);
            }

            let (grace, shortened) =
                effective_grace_period(status.grace_period, &workload, kill.grace_period_override);
            grace_period_shortened = shortened;
            status.grace_period = grace;
            // Always carry the computed value so the terminating step
            // never recalculates. Never zero.
            kill.grace_period_override = Some(grace);
            request.kill = Some(kill);
            WorkKind::Terminating
        } else {
            // Kill options are not valid outside the terminating phase.
            if let Some(mut kill) = request.kill.take() {
                if let Some(signal) = kill.completion_signal.take() {
                    let _ = signal.send(());
                }
            }
            WorkKind::Sync
        };

        let mut item = WorkItem { kind, request };

        // Start the worker task if it doesn't exist.
        let sender = match mailboxes.entry(id.clone()) {
            Entry::Occupied(entry) => entry.into_mut(),
            Entry::Vacant(entry) => {
                // Capacity 1: delivery into an idle worker never
                // blocks, and a busy worker's superseding updates go
                // through the coalescing slot instead.
                let (sender, receiver) = mpsc::channel(1);

                // Identity-stable workloads start in arrival order.
                if workload.static_workload {
                    waiting_static
                        .entry(status.full_name.clone())
                        .or_default()
                        .push(id.clone());
                }

                let coordinator = Arc::clone(self);
                let worker_id = id.clone();
                tokio::spawn(async move {
                    task_loop::run(coordinator, worker_id, receiver).await;
                });
                entry.insert(sender)
            }
        };

        // Dispatch directly if the worker is idle.
        if !status.working {
            status.working = true;
            if let Err(err) = sender.try_send(item) {
                // Cannot happen with an idle worker and an empty
                // capacity-1 channel.
                error!(
                    workload_id = %id,
                    error = %err,
                    "failed to deliver work item to idle worker"
                );
                status.working = false;
            }
            return;
        }

        // Latest wins, but keep the earliest submission time across
        // coalesced items for latency accounting.
        if let Some(previous) = undelivered.get(&id) {
            if previous.request.submitted_at < item.request.submitted_at {
                item.request.submitted_at = previous.request.submitted_at;
            }
        }
        undelivered.insert(id.clone(), item);

        if became_terminating || grace_period_shortened {
            if let Some(cancel) = &status.cancel {
                debug!(
                    workload = %workload.full_name(),
                    workload_id = %id,
                    kind = ?kind,
                    "cancelling current workload sync"
                );
                cancel.cancel();
            }
        }
    }

    /// Housekeeping: purges finished workers that are no longer desired
    /// or were flagged for a same-id restart, and returns the lifecycle
    /// classification of every tracked worker (including those purged
    /// in this pass).
    ///
    /// Once this has run at least once, the presence queries answer
    /// "not running" for unknown ids.
    pub fn sync_known_workloads(&self, desired: &[Workload]) -> HashMap<WorkloadId, WorkerState> {
        let known: HashSet<&WorkloadId> = desired.iter().map(|workload| &workload.id).collect();

        let mut inner = self.inner.lock().unwrap();
        inner.synced = true;

        let mut workers = HashMap::new();
        let ids: Vec<WorkloadId> = inner.statuses.keys().cloned().collect();
        for id in ids {
            let (purge, state) = match inner.statuses.get(&id) {
                Some(status) => {
                    let purge = !known.contains(&id) || status.restart_requested;
                    let state = if status.terminated_at.is_some() {
                        if status.restart_requested {
                            WorkerState::TerminatedAndRecreated
                        } else {
                            WorkerState::Terminated
                        }
                    } else if status.terminating_at.is_some() {
                        WorkerState::Terminating
                    } else {
                        WorkerState::Sync
                    };
                    (purge, state)
                }
                None => continue,
            };
            if purge {
                self.remove_terminated_worker(&mut inner, &id);
            }
            workers.insert(id, state);
        }
        workers
    }

    /// Removes all history for a finished worker so a new workload with
    /// the same id can be created. No-op if the worker has not finished.
    fn remove_terminated_worker(&self, inner: &mut Inner, id: &WorkloadId) {
        let Some(status) = inner.statuses.get(id) else {
            debug!(workload_id = %id, "worker requested for removal but is not known");
            return;
        };
        if !status.finished {
            debug!(workload_id = %id, "worker requested for removal but is not fully terminated");
            return;
        }
        let age = status.synced_at.elapsed();
        if status.restart_requested {
            debug!(
                workload_id = %id,
                age = ?age,
                "workload terminated but another with the same id was created, removing history to allow restart"
            );
        } else {
            debug!(
                workload_id = %id,
                age = ?age,
                "workload terminated and is no longer desired, removing all history"
            );
        }
        let full_name = status.full_name.clone();
        inner.statuses.remove(id);
        Self::cleanup_updates(inner, id);
        if inner.started_static.get(&full_name) == Some(id) {
            inner.started_static.remove(&full_name);
        }
        self.retry_queue.forget(id);
        self.cache.remove(id);
        self.reason_cache.remove_workload(id);
    }

    /// Drops the worker's mailbox (stopping its task once drained) and
    /// any undelivered work. Must be called under the coordinator lock.
    fn cleanup_updates(inner: &mut Inner, id: &WorkloadId) {
        inner.mailboxes.remove(id);
        inner.undelivered.remove(id);
    }

    // -------------------------------------------------------------------------
    // Worker task callbacks
    // -------------------------------------------------------------------------

    /// Start-admission check for the first work item of a worker.
    /// Returns `(can_start, can_ever_start)`; a temporarily blocked
    /// identity-stable workload is requeued with backoff.
    pub(crate) fn allow_start(&self, workload: &Workload) -> (bool, bool) {
        if !workload.static_workload {
            return (true, true);
        }
        let mut inner = self.inner.lock().unwrap();
        let Some(status) = inner.statuses.get(&workload.id) else {
            error!(
                workload = %workload.full_name(),
                workload_id = %workload.id,
                "workload sync status does not exist, the worker should not be running"
            );
            return (false, false);
        };
        if status.is_termination_requested() {
            return (false, false);
        }
        let full_name = status.full_name.clone();
        if !Self::allow_static_start(&mut inner, &full_name, &workload.id) {
            self.retry_queue.enqueue(
                workload.id.clone(),
                jittered(self.config.backoff_period, self.config.jitter_factor),
            );
            if let Some(status) = inner.statuses.get_mut(&workload.id) {
                status.working = false;
            }
            return (false, true);
        }
        (true, true)
    }

    /// An identity-stable workload may start when no other instance
    /// with its full name has started and it is the first viable entry
    /// in the waiting list (terminated or terminating entries ahead of
    /// it are skipped).
    fn allow_static_start(inner: &mut Inner, full_name: &str, id: &WorkloadId) -> bool {
        if let Some(started) = inner.started_static.get(full_name) {
            return started == id;
        }

        let mut waiting = inner
            .waiting_static
            .remove(full_name)
            .unwrap_or_default();
        let mut allowed = true;
        let mut index = waiting.len();
        for (i, waiting_id) in waiting.iter().enumerate() {
            let viable = inner
                .statuses
                .get(waiting_id)
                .map(|status| {
                    !status.is_termination_requested() && !status.is_terminated()
                })
                .unwrap_or(false);
            if !viable {
                continue;
            }
            if waiting_id != id {
                // Another instance is next in line.
                allowed = false;
                index = i;
                break;
            }
            // We are up next; remove ourselves from the list.
            index = i + 1;
            break;
        }
        let remaining: Vec<WorkloadId> = waiting.drain(index..).collect();
        if !remaining.is_empty() {
            inner.waiting_static.insert(full_name.to_string(), remaining);
        }
        if allowed {
            inner
                .started_static
                .insert(full_name.to_string(), id.clone());
        }
        allowed
    }

    /// Marks that the worker has observed the terminating transition,
    /// so other subsystems know no new containers will start, and
    /// returns the most recent status override to apply.
    pub(crate) fn acknowledge_terminating(&self, id: &WorkloadId) -> Option<StatusOverrideFn> {
        let mut inner = self.inner.lock().unwrap();
        let status = inner.statuses.get_mut(id)?;
        if status.terminating_at.is_some() && !status.started_terminating {
            debug!(workload_id = %id, "worker has observed request to terminate");
            status.started_terminating = true;
        }
        status.status_overrides.last().cloned()
    }

    /// Returns the cancellation token for the worker's next dispatch,
    /// replacing it if the previous one was already cancelled. Returns
    /// `None` if the worker is no longer tracked.
    pub(crate) fn token_for_worker(&self, id: &WorkloadId) -> Option<CancellationToken> {
        let mut inner = self.inner.lock().unwrap();
        let status = inner.statuses.get_mut(id)?;
        match &status.cancel {
            Some(token) if !token.is_cancelled() => Some(token.clone()),
            _ => {
                let token = CancellationToken::new();
                status.cancel = Some(token.clone());
                Some(token)
            }
        }
    }

    /// The sync step reported the workload reached a terminal phase
    /// naturally: begin termination and queue the terminating step.
    pub(crate) fn complete_sync(&self, id: &WorkloadId, workload: &Workload) {
        let mut inner = self.inner.lock().unwrap();

        debug!(
            workload = %workload.full_name(),
            workload_id = %id,
            "workload lifecycle completed naturally, will now terminate"
        );

        let mut grace = 1;
        if let Some(status) = inner.statuses.get_mut(id) {
            if status.terminating_at.is_none() {
                status.terminating_at = Some(Instant::now());
            } else {
                warn!(
                    workload_id = %id,
                    "terminating transition recorded twice, keeping the first"
                );
            }
            status.started_terminating = true;
            let (computed, _) = effective_grace_period(status.grace_period, workload, None);
            status.grace_period = computed;
            grace = computed;
        }

        let request = UpdateRequest {
            kind: UpdateKind::Kill,
            workload: Some(workload.clone()),
            mirror: None,
            running: None,
            kill: Some(KillOptions {
                grace_period_override: Some(grace),
                ..KillOptions::default()
            }),
            submitted_at: Instant::now(),
        };
        inner.undelivered.insert(
            id.clone(),
            WorkItem {
                kind: WorkKind::Terminating,
                request,
            },
        );
    }

    /// The terminating step completed for a config-backed workload: no
    /// container is running and none will start. Fires pending
    /// completion signals and queues the terminated step.
    pub(crate) fn complete_terminating(&self, id: &WorkloadId, workload: &Workload) {
        let mut inner = self.inner.lock().unwrap();

        debug!(
            workload = %workload.full_name(),
            workload_id = %id,
            "workload terminated all containers successfully"
        );

        if let Some(status) = inner.statuses.get_mut(id) {
            if status.terminating_at.is_none() {
                warn!(
                    workload_id = %id,
                    "worker terminated without a recorded terminating transition"
                );
            }
            status.terminated_at = Some(Instant::now());
            for signal in status.completion_signals.drain(..) {
                let _ = signal.send(());
            }
            status.status_overrides.clear();
        }

        let request = UpdateRequest {
            kind: UpdateKind::Sync,
            workload: Some(workload.clone()),
            mirror: None,
            running: None,
            kill: None,
            submitted_at: Instant::now(),
        };
        inner.undelivered.insert(
            id.clone(),
            WorkItem {
                kind: WorkKind::Terminated,
                request,
            },
        );
    }

    /// The terminating step completed for an orphaned runtime-only
    /// workload. Orphans have no upstream representation, so the worker
    /// finalizes here without a terminated step.
    pub(crate) fn complete_terminating_runtime(&self, id: &WorkloadId) {
        let mut inner = self.inner.lock().unwrap();

        debug!(
            workload_id = %id,
            "orphaned workload terminated all containers successfully, worker can stop"
        );

        if let Some(status) = inner.statuses.get_mut(id) {
            if status.terminating_at.is_none() {
                warn!(
                    workload_id = %id,
                    "worker terminated without a recorded terminating transition"
                );
            }
            status.terminated_at = Some(Instant::now());
            status.finished = true;
            status.working = false;
            for signal in status.completion_signals.drain(..) {
                let _ = signal.send(());
            }
            let full_name = status.full_name.clone();
            if inner.started_static.get(&full_name) == Some(id) {
                inner.started_static.remove(&full_name);
            }
        }

        Self::cleanup_updates(&mut inner, id);
    }

    /// The terminated step completed: the workload is finalized and the
    /// worker can stop.
    pub(crate) fn complete_terminated(&self, id: &WorkloadId) {
        let mut inner = self.inner.lock().unwrap();

        debug!(workload_id = %id, "workload is complete and the worker can now stop");

        Self::cleanup_updates(&mut inner, id);

        if let Some(status) = inner.statuses.get_mut(id) {
            if status.terminating_at.is_none() {
                warn!(workload_id = %id, "worker completed without a recorded terminating transition");
            }
            if status.terminated_at.is_none() {
                warn!(workload_id = %id, "worker completed without a recorded terminated transition");
            }
            status.finished = true;
            status.working = false;
            let full_name = status.full_name.clone();
            if inner.started_static.get(&full_name) == Some(id) {
                inner.started_static.remove(&full_name);
            }
        }
    }

    /// A workload that was never allowed to start received a
    /// termination signal: finalize it as terminated-without-run.
    pub(crate) fn complete_unstarted_terminated(&self, id: &WorkloadId) {
        let mut inner = self.inner.lock().unwrap();

        debug!(workload_id = %id, "workload never started and the worker can now stop");

        Self::cleanup_updates(&mut inner, id);

        if let Some(status) = inner.statuses.get_mut(id) {
            status.finished = true;
            status.working = false;
            status.terminated_at = Some(Instant::now());
            let full_name = status.full_name.clone();
            if inner.started_static.get(&full_name) == Some(id) {
                inner.started_static.remove(&full_name);
            }
        }
    }

    /// Requeues the workload according to the outcome of the last work
    /// item, then either delivers pending undelivered work or marks the
    /// worker idle.
    pub(crate) fn complete_work(
        &self,
        id: &WorkloadId,
        phase_transition: bool,
        error: Option<&super::traits::ReconcileError>,
    ) {
        use super::traits::ReconcileError;

        let delay = if phase_transition {
            // The next phase starts immediately.
            Duration::ZERO
        } else {
            match error {
                // Cancellation is not a failure; a superseding item is
                // already queued, so schedule an ordinary resync.
                None | Some(ReconcileError::Cancelled) => {
                    jittered(self.config.resync_interval, self.config.jitter_factor)
                }
                Some(ReconcileError::DependencyNotReady(_)) => jittered(
                    self.config.transient_backoff_period,
                    self.config.jitter_factor,
                ),
                Some(_) => jittered(self.config.backoff_period, self.config.jitter_factor),
            }
        };
        self.retry_queue.enqueue(id.clone(), delay);

        let mut inner = self.inner.lock().unwrap();
        if let Some(item) = inner.undelivered.remove(id) {
            if let Some(sender) = inner.mailboxes.get(id) {
                // The worker is between items, so its capacity-1
                // channel is empty and this cannot fail.
                if let Err(err) = sender.try_send(item) {
                    error!(
                        workload_id = %id,
                        error = %err,
                        "failed to deliver undelivered work item"
                    );
                }
            }
        } else if let Some(status) = inner.statuses.get_mut(id) {
            status.working = false;
        }
    }

    // -------------------------------------------------------------------------
    // Presence queries
    // -------------------------------------------------------------------------

    /// True if the id is known to have completed termination. Unknown
    /// ids answer false.
    pub fn is_known_terminated(&self, id: &WorkloadId) -> bool {
        let inner = self.inner.lock().unwrap();
        inner
            .statuses
            .get(id)
            .map(|status| status.is_terminated())
            .unwrap_or(false)
    }

    /// True until the workload's containers are guaranteed stopped.
    /// Unknown ids answer true until the first housekeeping pass.
    pub fn could_have_running_containers(&self, id: &WorkloadId) -> bool {
        let inner = self.inner.lock().unwrap();
        match inner.statuses.get(id) {
            Some(status) => !status.is_terminated(),
            None => !inner.synced,
        }
    }

    /// True from the moment termination is requested until the worker
    /// history is purged. Unknown ids answer false.
    pub fn is_termination_requested(&self, id: &WorkloadId) -> bool {
        let inner = self.inner.lock().unwrap();
        inner
            .statuses
            .get(id)
            .map(|status| status.is_termination_requested())
            .unwrap_or(false)
    }

    /// True once the worker has observed the terminating transition
    /// (no new containers can start). Unknown ids answer true after the
    /// first housekeeping pass.
    pub fn should_containers_be_terminating(&self, id: &WorkloadId) -> bool {
        let inner = self.inner.lock().unwrap();
        match inner.statuses.get(id) {
            Some(status) => status.started_terminating,
            None => inner.synced,
        }
    }

    /// True once all running containers are stopped and runtime
    /// resources can be reclaimed. Unknown ids answer true after the
    /// first housekeeping pass.
    pub fn should_runtime_be_removed(&self, id: &WorkloadId) -> bool {
        let inner = self.inner.lock().unwrap();
        match inner.statuses.get(id) {
            Some(status) => status.is_terminated(),
            None => inner.synced,
        }
    }

    /// True when all content belonging to the workload can be removed:
    /// it was evicted, or deleted and fully terminated. Unknown ids
    /// answer true after the first housekeeping pass.
    pub fn should_content_be_removed(&self, id: &WorkloadId) -> bool {
        let inner = self.inner.lock().unwrap();
        match inner.statuses.get(id) {
            Some(status) => status.evicted || (status.deleted && status.is_terminated()),
            None => inner.synced,
        }
    }

    /// True if a started identity-stable workload with this full name
    /// is currently terminating and has not yet completed. Gates
    /// mirror-snapshot cleanup.
    pub fn is_terminating_by_full_name(&self, full_name: &str) -> bool {
        let inner = self.inner.lock().unwrap();
        let Some(id) = inner.started_static.get(full_name) else {
            return false;
        };
        let Some(status) = inner.statuses.get(id) else {
            return false;
        };
        status.is_termination_requested() && !status.is_terminated()
    }
}
