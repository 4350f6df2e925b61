//! Phase derivation from container statuses.
//!
//! [`compute_phase`] is a pure function: given a workload spec and the
//! published container statuses (init and ordinary combined), it derives
//! the lifecycle phase. It holds no state and makes no I/O.

use super::{get_container_status, ApiContainerStatus, ContainerState, Phase};
use crate::workload::{RestartPolicy, WorkloadSpec};
use tracing::trace;

/// Derives the lifecycle phase of a workload from its spec and the
/// combined (init + ordinary) container statuses.
///
/// Init containers classify into pending/failed counts; ordinary
/// containers into running/waiting/stopped/succeeded/unknown. The
/// decision table then follows: failed init with `Never` restart policy
/// fails the workload; any pending init or waiting container keeps it
/// Pending; otherwise running and stopped counts together with the
/// restart policy decide between Running, Succeeded, and Failed.
///
/// A container whose fresh state could not be classified counts as
/// unknown when it has no status at all, and collapses to waiting when
/// the engine reported an unknown state upstream of this function. That
/// collapse can force an otherwise-running workload back to Pending;
/// this mirrors the upstream design and is deliberately not corrected
/// here.
pub fn compute_phase(spec: &WorkloadSpec, statuses: &[ApiContainerStatus]) -> Phase {
    let mut pending_init = 0;
    let mut failed_init = 0;
    for container in &spec.init_containers {
        let Some(status) = get_container_status(statuses, &container.name) else {
            pending_init += 1;
            continue;
        };
        match &status.state {
            ContainerState::Running { .. } => pending_init += 1,
            ContainerState::Terminated { exit_code, .. } => {
                if *exit_code != 0 {
                    failed_init += 1;
                }
            }
            ContainerState::Waiting { .. } => match &status.last_termination_state {
                Some(ContainerState::Terminated { exit_code, .. }) => {
                    if *exit_code != 0 {
                        failed_init += 1;
                    }
                }
                _ => pending_init += 1,
            },
        }
    }

    let mut unknown = 0;
    let mut running = 0;
    let mut waiting = 0;
    let mut stopped = 0;
    let mut succeeded = 0;
    for container in &spec.containers {
        let Some(status) = get_container_status(statuses, &container.name) else {
            unknown += 1;
            continue;
        };
        match &status.state {
            ContainerState::Running { .. } => running += 1,
            ContainerState::Terminated { exit_code, .. } => {
                stopped += 1;
                if *exit_code == 0 {
                    succeeded += 1;
                }
            }
            ContainerState::Waiting { .. } => {
                // A waiting container with a previous termination is a
                // stopped container mid-restart, not one that never ran.
                if matches!(
                    status.last_termination_state,
                    Some(ContainerState::Terminated { .. })
                ) {
                    stopped += 1;
                } else {
                    waiting += 1;
                }
            }
        }
    }

    if failed_init > 0 && spec.restart_policy == RestartPolicy::Never {
        return Phase::Failed;
    }

    match () {
        _ if pending_init > 0 || waiting > 0 => {
            trace!(pending_init, waiting, "one or more containers has not started");
            Phase::Pending
        }
        _ if running > 0 && unknown == 0 => Phase::Running,
        _ if running == 0 && stopped > 0 && unknown == 0 => {
            if spec.restart_policy == RestartPolicy::Always {
                // All containers are in the process of restarting.
                Phase::Running
            } else if stopped == succeeded {
                Phase::Succeeded
            } else if spec.restart_policy == RestartPolicy::Never {
                Phase::Failed
            } else {
                // OnFailure with at least one failure mid-restart.
                Phase::Running
            }
        }
        _ => Phase::Pending,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workload::ContainerSpec;

    fn spec_with(containers: &[&str], policy: RestartPolicy) -> WorkloadSpec {
        WorkloadSpec {
            init_containers: Vec::new(),
            containers: containers
                .iter()
                .map(|name| ContainerSpec::new(*name, "img"))
                .collect(),
            restart_policy: policy,
            termination_grace_period_seconds: None,
        }
    }

    fn terminated(name: &str, exit_code: i32) -> ApiContainerStatus {
        ApiContainerStatus {
            name: name.to_string(),
            image: "img".to_string(),
            state: ContainerState::Terminated {
                exit_code,
                reason: String::new(),
                message: String::new(),
                started_at: None,
                finished_at: None,
            },
            last_termination_state: None,
            restart_count: 0,
        }
    }

    fn running(name: &str) -> ApiContainerStatus {
        ApiContainerStatus {
            name: name.to_string(),
            image: "img".to_string(),
            state: ContainerState::Running { started_at: None },
            last_termination_state: None,
            restart_count: 0,
        }
    }

    fn waiting(name: &str) -> ApiContainerStatus {
        ApiContainerStatus::waiting(name, "img", super::super::REASON_CREATING)
    }

    #[test]
    fn test_all_terminated_zero_never_is_succeeded() {
        let spec = spec_with(&["a", "b"], RestartPolicy::Never);
        let statuses = vec![terminated("a", 0), terminated("b", 0)];
        assert_eq!(compute_phase(&spec, &statuses), Phase::Succeeded);
    }

    #[test]
    fn test_all_terminated_with_failure_never_is_failed() {
        let spec = spec_with(&["a", "b"], RestartPolicy::Never);
        let statuses = vec![terminated("a", 0), terminated("b", 1)];
        assert_eq!(compute_phase(&spec, &statuses), Phase::Failed);
    }

    #[test]
    fn test_waiting_container_without_prior_termination_is_pending() {
        let spec = spec_with(&["a", "b"], RestartPolicy::Always);
        let statuses = vec![running("a"), waiting("b")];
        assert_eq!(compute_phase(&spec, &statuses), Phase::Pending);
    }

    #[test]
    fn test_one_running_rest_failed_always_is_running() {
        let spec = spec_with(&["a", "b", "c"], RestartPolicy::Always);
        let statuses = vec![running("a"), terminated("b", 1), terminated("c", 137)];
        assert_eq!(compute_phase(&spec, &statuses), Phase::Running);
    }

    #[test]
    fn test_all_stopped_always_is_running() {
        // Restart policy Always: stopped containers are implicitly
        // restarting.
        let spec = spec_with(&["a"], RestartPolicy::Always);
        let statuses = vec![terminated("a", 1)];
        assert_eq!(compute_phase(&spec, &statuses), Phase::Running);
    }

    #[test]
    fn test_stopped_with_failure_on_failure_is_running() {
        let spec = spec_with(&["a", "b"], RestartPolicy::OnFailure);
        let statuses = vec![terminated("a", 0), terminated("b", 1)];
        assert_eq!(compute_phase(&spec, &statuses), Phase::Running);
    }

    #[test]
    fn test_no_statuses_is_pending() {
        let spec = spec_with(&["a"], RestartPolicy::Always);
        assert_eq!(compute_phase(&spec, &[]), Phase::Pending);
    }

    #[test]
    fn test_failed_init_never_is_failed() {
        let mut spec = spec_with(&["main"], RestartPolicy::Never);
        spec.init_containers.push(ContainerSpec::new("init", "img"));
        let statuses = vec![terminated("init", 1), running("main")];
        assert_eq!(compute_phase(&spec, &statuses), Phase::Failed);
    }

    #[test]
    fn test_failed_init_on_failure_keeps_pending() {
        let mut spec = spec_with(&["main"], RestartPolicy::OnFailure);
        spec.init_containers.push(ContainerSpec::new("init", "img"));
        // Failed init is retried under OnFailure; the init counts as
        // neither pending nor blocking, and main has no status yet.
        let statuses = vec![terminated("init", 1)];
        assert_eq!(compute_phase(&spec, &statuses), Phase::Pending);
    }

    #[test]
    fn test_running_init_is_pending() {
        let mut spec = spec_with(&["main"], RestartPolicy::Always);
        spec.init_containers.push(ContainerSpec::new("init", "img"));
        let statuses = vec![running("init"), running("main")];
        assert_eq!(compute_phase(&spec, &statuses), Phase::Pending);
    }

    #[test]
    fn test_waiting_init_with_failed_prior_run_counts_failed() {
        let mut spec = spec_with(&["main"], RestartPolicy::Never);
        spec.init_containers.push(ContainerSpec::new("init", "img"));
        let mut init = waiting("init");
        init.last_termination_state = Some(ContainerState::Terminated {
            exit_code: 2,
            reason: String::new(),
            message: String::new(),
            started_at: None,
            finished_at: None,
        });
        let statuses = vec![init];
        assert_eq!(compute_phase(&spec, &statuses), Phase::Failed);
    }

    #[test]
    fn test_waiting_with_prior_termination_counts_stopped() {
        let spec = spec_with(&["a"], RestartPolicy::OnFailure);
        let mut status = waiting("a");
        status.last_termination_state = Some(ContainerState::Terminated {
            exit_code: 1,
            reason: String::new(),
            message: String::new(),
            started_at: None,
            finished_at: None,
        });
        // Stopped with a failure under OnFailure: restarting.
        assert_eq!(compute_phase(&spec, &[status]), Phase::Running);
    }

    #[test]
    fn test_phase_unknown_state_forces_pending_known_edge_case() {
        // Known edge case: a container whose fresh runtime state cannot
        // be classified is published as Waiting, which pulls the whole
        // workload back to Pending even though another container is
        // still running. This mirrors the upstream behavior on partial
        // observation failures and is intentionally not "fixed".
        let spec = spec_with(&["a", "b"], RestartPolicy::Always);
        let statuses = vec![running("a"), waiting("b")];
        assert_eq!(compute_phase(&spec, &statuses), Phase::Pending);
    }
}
