//! Update and work item types exchanged with the coordinator.

use crate::status::ApiStatus;
use crate::workload::{RuntimeWorkload, Workload};
use std::fmt;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::oneshot;

/// Function applied to override the published status when a workload is
/// killed. Later kills may override earlier ones, so the most recently
/// registered function wins.
pub type StatusOverrideFn = Arc<dyn Fn(&mut ApiStatus) + Send + Sync>;

/// What kind of update is being submitted.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UpdateKind {
    /// The workload was just added to the desired set.
    Create,
    /// The workload's configuration changed (including deletion marks).
    Update,
    /// Periodic resubmission of the current configuration.
    Sync,
    /// The workload should be killed.
    Kill,
}

impl fmt::Display for UpdateKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Create => write!(f, "create"),
            Self::Update => write!(f, "update"),
            Self::Sync => write!(f, "sync"),
            Self::Kill => write!(f, "kill"),
        }
    }
}

/// The lifecycle step a dispatched work item drives.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WorkKind {
    /// The workload is expected to be started and running.
    Sync,
    /// The workload is no longer being set up; running containers are
    /// being torn down.
    Terminating,
    /// No containers remain; final cleanup can run.
    Terminated,
}

/// How a tracked worker classifies during housekeeping.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WorkerState {
    /// Expected to be started and running.
    Sync,
    /// Tearing down containers.
    Terminating,
    /// Stopped with no running containers.
    Terminated,
    /// Terminated, but a same-id recreate request arrived while
    /// terminating. The worker history will be cleared so a create can
    /// start it again.
    TerminatedAndRecreated,
}

/// Options attached to a kill update.
#[derive(Default)]
pub struct KillOptions {
    /// Fired when the kill completes (the terminating step finished, or
    /// the workload was already terminated).
    pub completion_signal: Option<oneshot::Sender<()>>,
    /// True when the kill is an eviction. Evicted workloads are cleaned
    /// up more aggressively.
    pub evict: bool,
    /// Overrides the published status at kill time.
    pub status_override: Option<StatusOverrideFn>,
    /// Requested grace period in seconds. Can only shorten a previously
    /// requested period.
    pub grace_period_override: Option<i64>,
}

impl fmt::Debug for KillOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KillOptions")
            .field("completion_signal", &self.completion_signal.is_some())
            .field("evict", &self.evict)
            .field("status_override", &self.status_override.is_some())
            .field("grace_period_override", &self.grace_period_override)
            .finish()
    }
}

/// A single update submitted to the coordinator.
#[derive(Debug)]
pub struct UpdateRequest {
    /// The kind of update.
    pub kind: UpdateKind,
    /// Configuration snapshot. Required unless `running` is set.
    pub workload: Option<Workload>,
    /// Mirror snapshot of an identity-stable workload, passed through
    /// to the reconciler for visibility.
    pub mirror: Option<Workload>,
    /// Runtime-only snapshot of an orphaned workload. Only valid with
    /// [`UpdateKind::Kill`] when `workload` is not set.
    pub running: Option<RuntimeWorkload>,
    /// Kill options. Only meaningful while the workload is
    /// terminating.
    pub kill: Option<KillOptions>,
    /// When the update was created. Preserved across coalescing so the
    /// oldest pending submission is accounted for.
    pub submitted_at: Instant,
}

impl UpdateRequest {
    /// Creates an update carrying a configuration snapshot.
    pub fn new(kind: UpdateKind, workload: Workload) -> Self {
        Self {
            kind,
            workload: Some(workload),
            mirror: None,
            running: None,
            kill: None,
            submitted_at: Instant::now(),
        }
    }

    /// Creates a kill update with the given options.
    pub fn kill(workload: Workload, options: KillOptions) -> Self {
        Self {
            kind: UpdateKind::Kill,
            workload: Some(workload),
            mirror: None,
            running: None,
            kill: Some(options),
            submitted_at: Instant::now(),
        }
    }

    /// Creates a kill update for an orphaned runtime-only workload.
    pub fn kill_orphan(running: RuntimeWorkload) -> Self {
        Self {
            kind: UpdateKind::Kill,
            workload: None,
            mirror: None,
            running: Some(running),
            kill: None,
            submitted_at: Instant::now(),
        }
    }
}

/// A classified unit of work delivered to a worker's mailbox.
#[derive(Debug)]
pub struct WorkItem {
    /// The lifecycle step to perform.
    pub kind: WorkKind,
    /// The update that produced this item.
    pub request: UpdateRequest,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_update_kind_display() {
        assert_eq!(format!("{}", UpdateKind::Create), "create");
        assert_eq!(format!("{}", UpdateKind::Kill), "kill");
    }

    #[test]
    fn test_update_request_new() {
        let workload = Workload::new("uid-1", "default", "web");
        let request = UpdateRequest::new(UpdateKind::Create, workload);
        assert_eq!(request.kind, UpdateKind::Create);
        assert!(request.workload.is_some());
        assert!(request.running.is_none());
        assert!(request.kill.is_none());
    }

    #[test]
    fn test_kill_orphan_has_no_config_snapshot() {
        let running = RuntimeWorkload {
            id: "uid-1".into(),
            name: "stray".to_string(),
            namespace: "default".to_string(),
            containers: vec!["main".to_string()],
        };
        let request = UpdateRequest::kill_orphan(running);
        assert_eq!(request.kind, UpdateKind::Kill);
        assert!(request.workload.is_none());
        assert!(request.running.is_some());
    }

    #[test]
    fn test_kill_options_default() {
        let options = KillOptions::default();
        assert!(!options.evict);
        assert!(options.completion_signal.is_none());
        assert!(options.grace_period_override.is_none());
    }
}
