//! Latest-observation cache for runtime statuses.
//!
//! The container engine is polled elsewhere; each observation lands
//! here via [`StatusCache::set`]. Worker tasks read the latest entry,
//! and the terminating path uses [`StatusCache::get_newer_than`] to
//! insist on an observation taken after termination began, with a
//! bounded wait so a stalled engine cannot wedge a worker.

use crate::status::RuntimeStatus;
use crate::workload::WorkloadId;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::Notify;

/// Upper bound on how long [`StatusCache::get_newer_than`] waits for a
/// fresh observation before settling for what it has.
pub const STATUS_WAIT_CEILING: Duration = Duration::from_secs(2);

/// Errors from bounded status waits.
#[derive(Debug, Error)]
pub enum StatusCacheError {
    /// The wait ceiling expired and no observation for the workload has
    /// ever been recorded.
    #[error("no runtime status observed for workload {0} within the wait ceiling")]
    Timeout(WorkloadId),
}

struct Entry {
    status: RuntimeStatus,
    observed_at: Instant,
}

/// Shared cache of the most recent [`RuntimeStatus`] per workload.
///
/// Internally synchronized; writers wake any pending
/// [`get_newer_than`](Self::get_newer_than) waiters.
#[derive(Default)]
pub struct StatusCache {
    entries: Mutex<HashMap<WorkloadId, Entry>>,
    updated: Notify,
}

impl StatusCache {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            updated: Notify::new(),
        }
    }

    /// Returns the latest observation for the workload, if any.
    pub fn get(&self, id: &WorkloadId) -> Option<RuntimeStatus> {
        self.entries
            .lock()
            .unwrap()
            .get(id)
            .map(|entry| entry.status.clone())
    }

    /// Records an observation, replacing any previous one for the same
    /// workload, and wakes pending waiters.
    pub fn set(&self, status: RuntimeStatus) {
        let entry = Entry {
            observed_at: Instant::now(),
            status,
        };
        self.entries
            .lock()
            .unwrap()
            .insert(entry.status.id.clone(), entry);
        self.updated.notify_waiters();
    }

    /// Drops the observation for the workload. Called when the worker
    /// is purged.
    pub fn remove(&self, id: &WorkloadId) {
        self.entries.lock().unwrap().remove(id);
    }

    /// Returns an observation taken strictly after `since` (any
    /// observation when `since` is `None`), waiting up to
    /// [`STATUS_WAIT_CEILING`] for one to arrive.
    ///
    /// If the ceiling expires the latest recorded observation is
    /// returned even if stale; [`StatusCacheError::Timeout`] is
    /// returned only when the workload has never been observed at all.
    pub async fn get_newer_than(
        &self,
        id: &WorkloadId,
        since: Option<Instant>,
    ) -> Result<RuntimeStatus, StatusCacheError> {
        let deadline = tokio::time::Instant::now() + STATUS_WAIT_CEILING;
        loop {
            // Register for the wakeup before checking, so a write
            // between the check and the wait is not missed.
            let updated = self.updated.notified();
            {
                let entries = self.entries.lock().unwrap();
                if let Some(entry) = entries.get(id) {
                    let fresh = match since {
                        Some(since) => entry.observed_at > since,
                        None => true,
                    };
                    if fresh {
                        return Ok(entry.status.clone());
                    }
                }
            }
            if tokio::time::timeout_at(deadline, updated).await.is_err() {
                let entries = self.entries.lock().unwrap();
                return match entries.get(id) {
                    Some(entry) => Ok(entry.status.clone()),
                    None => Err(StatusCacheError::Timeout(id.clone())),
                };
            }
        }
    }
}
