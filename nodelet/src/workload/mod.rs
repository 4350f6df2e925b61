//! Workload data model.
//!
//! A workload is the unit of management for this node: a named set of
//! containers with a restart policy and termination settings. Workloads
//! arrive as configuration snapshots from an update source; orphaned
//! workloads that only exist in the runtime (no configuration) are
//! represented by [`RuntimeWorkload`].

use crate::status::ApiStatus;
use crate::status::Phase;
use chrono::{DateTime, Utc};
use std::fmt;

/// Unique identifier for a workload instance.
///
/// Ids are opaque strings, stable for the lifetime of one workload
/// instance. A replacement instance, even with the same name, gets a
/// new id.
#[derive(Clone, Hash, Eq, PartialEq)]
pub struct WorkloadId(String);

impl WorkloadId {
    /// Creates a new workload id with the given string value.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the string value of this id.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for WorkloadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "WorkloadId({})", self.0)
    }
}

impl fmt::Display for WorkloadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for WorkloadId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for WorkloadId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Restart policy for a workload's containers.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum RestartPolicy {
    /// Containers are restarted regardless of exit status.
    #[default]
    Always,
    /// Containers are restarted only after a nonzero exit.
    OnFailure,
    /// Containers are never restarted.
    Never,
}

/// Declaration of a single container within a workload.
#[derive(Clone, Debug)]
pub struct ContainerSpec {
    /// Container name, unique within the workload.
    pub name: String,
    /// Image reference.
    pub image: String,
}

impl ContainerSpec {
    /// Creates a container spec with the given name and image.
    pub fn new(name: impl Into<String>, image: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            image: image.into(),
        }
    }
}

/// The desired specification of a workload.
#[derive(Clone, Debug, Default)]
pub struct WorkloadSpec {
    /// Init containers, run to completion in declaration order before
    /// ordinary containers start.
    pub init_containers: Vec<ContainerSpec>,
    /// Ordinary containers.
    pub containers: Vec<ContainerSpec>,
    /// Restart policy applied to all containers.
    pub restart_policy: RestartPolicy,
    /// Declared default termination window in seconds, used when no
    /// other grace period has been requested.
    pub termination_grace_period_seconds: Option<i64>,
}

/// A configuration snapshot of a workload.
///
/// Snapshots are immutable once submitted; a newer snapshot for the
/// same id supersedes older ones through coalescing in the coordinator.
#[derive(Clone, Debug)]
pub struct Workload {
    /// Stable identifier for this instance.
    pub id: WorkloadId,
    /// Workload name.
    pub name: String,
    /// Namespace the workload belongs to.
    pub namespace: String,
    /// True for identity-stable ("static") workloads whose identity is
    /// derived from a fixed name. These require same-name start
    /// ordering.
    pub static_workload: bool,
    /// Set once graceful deletion has been requested upstream.
    pub deletion_timestamp: Option<DateTime<Utc>>,
    /// Authoritative requested grace period, owned by the control
    /// plane. Only meaningful while deletion is in progress.
    pub deletion_grace_period_seconds: Option<i64>,
    /// Desired specification.
    pub spec: WorkloadSpec,
    /// The status most recently reported upstream for this workload.
    /// Used as the merge baseline and the terminal-phase guard.
    pub reported_status: ApiStatus,
}

impl Workload {
    /// Creates a workload snapshot with an empty spec and default
    /// reported status.
    pub fn new(
        id: impl Into<WorkloadId>,
        namespace: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            namespace: namespace.into(),
            static_workload: false,
            deletion_timestamp: None,
            deletion_grace_period_seconds: None,
            spec: WorkloadSpec::default(),
            reported_status: ApiStatus::default(),
        }
    }

    /// Returns the stable `namespace/name` used for same-identity
    /// ordering.
    pub fn full_name(&self) -> String {
        format!("{}/{}", self.namespace, self.name)
    }

    /// Returns the phase last reported upstream.
    pub fn reported_phase(&self) -> Phase {
        self.reported_status.phase
    }
}

/// A runtime-observed workload with no configuration backing it.
///
/// Orphans appear when the runtime still holds containers for a
/// workload the configuration no longer knows about. They can only be
/// killed; the terminating step of the lifecycle runs once and the
/// worker exits without a terminated step.
#[derive(Clone, Debug)]
pub struct RuntimeWorkload {
    /// Identifier recovered from the runtime.
    pub id: WorkloadId,
    /// Workload name recovered from the runtime.
    pub name: String,
    /// Namespace recovered from the runtime.
    pub namespace: String,
    /// Names of the containers still present in the runtime.
    pub containers: Vec<String>,
}

impl RuntimeWorkload {
    /// Synthesizes a configuration snapshot from this runtime-only
    /// entry so the worker loop can treat orphans uniformly.
    pub fn to_workload(&self) -> Workload {
        let mut workload = Workload::new(self.id.clone(), &self.namespace, &self.name);
        workload.spec.containers = self
            .containers
            .iter()
            .map(|name| ContainerSpec::new(name, ""))
            .collect();
        workload
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_workload_id_new() {
        let id = WorkloadId::new("uid-1");
        assert_eq!(id.as_str(), "uid-1");
    }

    #[test]
    fn test_workload_id_equality() {
        assert_eq!(WorkloadId::new("a"), WorkloadId::new("a"));
        assert_ne!(WorkloadId::new("a"), WorkloadId::new("b"));
    }

    #[test]
    fn test_workload_id_display() {
        let id = WorkloadId::new("uid-42");
        assert_eq!(format!("{}", id), "uid-42");
    }

    #[test]
    fn test_workload_id_from_str() {
        let id: WorkloadId = "from-str".into();
        assert_eq!(id.as_str(), "from-str");
    }

    #[test]
    fn test_workload_full_name() {
        let workload = Workload::new("uid-1", "kube-system", "proxy");
        assert_eq!(workload.full_name(), "kube-system/proxy");
    }

    #[test]
    fn test_runtime_workload_to_workload() {
        let runtime = RuntimeWorkload {
            id: WorkloadId::new("uid-9"),
            name: "stray".to_string(),
            namespace: "default".to_string(),
            containers: vec!["main".to_string(), "sidecar".to_string()],
        };

        let workload = runtime.to_workload();
        assert_eq!(workload.id, runtime.id);
        assert_eq!(workload.full_name(), "default/stray");
        assert_eq!(workload.spec.containers.len(), 2);
        assert!(!workload.static_workload);
        assert!(workload.deletion_timestamp.is_none());
    }

    #[test]
    fn test_restart_policy_default_is_always() {
        assert_eq!(RestartPolicy::default(), RestartPolicy::Always);
    }
}
