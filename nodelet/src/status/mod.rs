//! Workload status model and status derivation.
//!
//! Two representations live here:
//!
//! - **Runtime statuses** ([`RuntimeStatus`], [`RuntimeContainerStatus`])
//!   are what the container engine reports: raw per-container states,
//!   sandbox states, exit codes. They arrive through the [`StatusCache`].
//!
//! - **Published statuses** ([`ApiStatus`], [`ApiContainerStatus`]) are
//!   what this node reports upstream: per-container states with waiting
//!   reasons and last-termination records, plus a derived [`Phase`].
//!
//! The [`generate`] module converts runtime statuses into published
//! statuses; the [`phase`] module derives the lifecycle phase from the
//! published container statuses; [`cache`] holds the latest runtime
//! observation per workload with bounded freshness waits.

pub mod cache;
pub mod generate;
pub mod phase;
pub mod reason_cache;

pub use cache::{StatusCache, StatusCacheError, STATUS_WAIT_CEILING};
pub use generate::generate_api_status;
pub use phase::compute_phase;
pub use reason_cache::{ReasonCache, StartFailure};

use crate::workload::WorkloadId;
use chrono::{DateTime, Utc};
use std::fmt;

/// Waiting reason for containers that have not started because init
/// containers are still running.
pub const REASON_INITIALIZING: &str = "Initializing";

/// Waiting reason for containers that have not started yet.
pub const REASON_CREATING: &str = "Creating";

/// Termination reason synthesized when a previously running container
/// disappears from the runtime without an observed exit.
pub const REASON_STATUS_UNKNOWN: &str = "ContainerStatusUnknown";

/// Exit code recorded for a synthesized unexplained termination.
pub const UNKNOWN_EXIT_CODE: i32 = 137;

/// Lifecycle phase of a workload.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Phase {
    /// Not all containers have started.
    #[default]
    Pending,
    /// At least one container is running (or restarting).
    Running,
    /// All containers terminated successfully and will not restart.
    Succeeded,
    /// All containers terminated with at least one failure, and none
    /// will restart.
    Failed,
}

impl Phase {
    /// Returns true for the terminal phases (Succeeded, Failed).
    ///
    /// A workload never transitions out of a terminal phase for the
    /// same id.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed)
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "Pending"),
            Self::Running => write!(f, "Running"),
            Self::Succeeded => write!(f, "Succeeded"),
            Self::Failed => write!(f, "Failed"),
        }
    }
}

/// Published state of a single container.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ContainerState {
    /// The container is not running and is waiting on something.
    Waiting {
        /// Machine-readable reason (e.g. `Creating`).
        reason: String,
        /// Human-readable detail.
        message: String,
    },
    /// The container is running.
    Running {
        /// When the container started.
        started_at: Option<DateTime<Utc>>,
    },
    /// The container has terminated.
    Terminated {
        /// Process exit code.
        exit_code: i32,
        /// Machine-readable reason (e.g. `Completed`, `Error`).
        reason: String,
        /// Human-readable detail.
        message: String,
        /// When the container started, if known.
        started_at: Option<DateTime<Utc>>,
        /// When the container finished, if known.
        finished_at: Option<DateTime<Utc>>,
    },
}

impl ContainerState {
    /// Default waiting state with the given reason and no message.
    pub fn waiting(reason: impl Into<String>) -> Self {
        Self::Waiting {
            reason: reason.into(),
            message: String::new(),
        }
    }

    /// Returns true if this is a waiting state.
    pub fn is_waiting(&self) -> bool {
        matches!(self, Self::Waiting { .. })
    }

    /// Returns true if this is a running state.
    pub fn is_running(&self) -> bool {
        matches!(self, Self::Running { .. })
    }

    /// Returns true if this is a terminated state.
    pub fn is_terminated(&self) -> bool {
        matches!(self, Self::Terminated { .. })
    }

    /// Returns the waiting reason, if this is a waiting state.
    pub fn waiting_reason(&self) -> Option<&str> {
        match self {
            Self::Waiting { reason, .. } => Some(reason.as_str()),
            _ => None,
        }
    }
}

/// Published status of a single container.
#[derive(Clone, Debug)]
pub struct ApiContainerStatus {
    /// Container name.
    pub name: String,
    /// Image reference.
    pub image: String,
    /// Current state.
    pub state: ContainerState,
    /// State of the previous instance of this container, if any.
    pub last_termination_state: Option<ContainerState>,
    /// Number of times the container has been restarted.
    pub restart_count: u32,
}

impl ApiContainerStatus {
    /// Creates a status in the given waiting state.
    pub fn waiting(name: impl Into<String>, image: impl Into<String>, reason: &str) -> Self {
        Self {
            name: name.into(),
            image: image.into(),
            state: ContainerState::waiting(reason),
            last_termination_state: None,
            restart_count: 0,
        }
    }
}

/// Published status of a workload.
#[derive(Clone, Debug, Default)]
pub struct ApiStatus {
    /// Derived lifecycle phase.
    pub phase: Phase,
    /// Machine-readable reason associated with the phase.
    pub reason: Option<String>,
    /// Human-readable detail associated with the phase.
    pub message: Option<String>,
    /// Ordinary container statuses, in declaration order.
    pub container_statuses: Vec<ApiContainerStatus>,
    /// Init container statuses, in declaration order.
    pub init_container_statuses: Vec<ApiContainerStatus>,
}

/// Looks up a container status by name.
pub fn get_container_status<'a>(
    statuses: &'a [ApiContainerStatus],
    name: &str,
) -> Option<&'a ApiContainerStatus> {
    statuses.iter().find(|status| status.name == name)
}

/// Runtime state of a container as reported by the engine.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RuntimeContainerState {
    /// Created but not started.
    Created,
    /// Running.
    Running,
    /// Exited.
    Exited,
    /// The engine could not determine the state.
    Unknown,
}

/// Runtime status of a single container.
#[derive(Clone, Debug)]
pub struct RuntimeContainerStatus {
    /// Container name.
    pub name: String,
    /// Image reference.
    pub image: String,
    /// Observed state.
    pub state: RuntimeContainerState,
    /// Exit code; meaningful only for exited containers.
    pub exit_code: i32,
    /// Machine-readable reason (e.g. `Completed`, `Error`).
    pub reason: String,
    /// Human-readable detail.
    pub message: String,
    /// When the container was created.
    pub created_at: Option<DateTime<Utc>>,
    /// When the container started.
    pub started_at: Option<DateTime<Utc>>,
    /// When the container finished.
    pub finished_at: Option<DateTime<Utc>>,
    /// Restart count maintained by the engine.
    pub restart_count: u32,
}

impl RuntimeContainerStatus {
    /// Creates a container status in the given state with everything
    /// else defaulted.
    pub fn new(name: impl Into<String>, state: RuntimeContainerState) -> Self {
        Self {
            name: name.into(),
            image: String::new(),
            state,
            exit_code: 0,
            reason: String::new(),
            message: String::new(),
            created_at: None,
            started_at: None,
            finished_at: None,
            restart_count: 0,
        }
    }
}

/// State of a workload's sandbox (isolation boundary).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SandboxState {
    /// Sandbox is up and can host containers.
    Ready,
    /// Sandbox is down.
    NotReady,
}

/// Runtime status of a workload: its sandboxes and containers as last
/// observed from the container engine.
#[derive(Clone, Debug)]
pub struct RuntimeStatus {
    /// Workload id this status belongs to.
    pub id: WorkloadId,
    /// Workload name at observation time.
    pub name: String,
    /// Namespace at observation time.
    pub namespace: String,
    /// Sandbox states.
    pub sandbox_states: Vec<SandboxState>,
    /// Container statuses.
    pub container_statuses: Vec<RuntimeContainerStatus>,
}

impl RuntimeStatus {
    /// Creates an empty status (no sandboxes, no containers) for the
    /// given id.
    pub fn empty(id: WorkloadId) -> Self {
        Self {
            id,
            name: String::new(),
            namespace: String::new(),
            sandbox_states: Vec::new(),
            container_statuses: Vec::new(),
        }
    }

    /// Looks up a container status by name.
    pub fn find_container(&self, name: &str) -> Option<&RuntimeContainerStatus> {
        self.container_statuses
            .iter()
            .find(|status| status.name == name)
    }

    /// Returns true when nothing is running: no running containers and
    /// no ready sandboxes.
    ///
    /// Used by the coordinator's already-terminal fast path.
    pub fn is_terminal(&self) -> bool {
        let running = self
            .container_statuses
            .iter()
            .filter(|status| status.state == RuntimeContainerState::Running)
            .count();
        let ready = self
            .sandbox_states
            .iter()
            .filter(|state| **state == SandboxState::Ready)
            .count();
        running == 0 && ready == 0
    }
}
