//! Conversion of runtime observations into published statuses.
//!
//! [`generate_api_status`] merges three inputs: the workload's declared
//! containers, the latest runtime observation, and the status last
//! reported upstream. The merge keeps history (restart counts, last
//! termination states) stable across partial observations, synthesizes
//! terminations for containers that disappear without an observed exit,
//! and never lets a workload regress out of a terminal phase.

use super::{
    compute_phase, ApiContainerStatus, ApiStatus, ContainerState, ReasonCache,
    RuntimeContainerState, RuntimeStatus, REASON_CREATING, REASON_INITIALIZING,
    REASON_STATUS_UNKNOWN, UNKNOWN_EXIT_CODE,
};
use crate::workload::{ContainerSpec, RestartPolicy, Workload};
use std::collections::HashMap;
use tracing::{debug, error};

/// Returns true if the container should be started again on the next
/// reconciliation.
///
/// Deleted workloads never restart. A container with no observed status
/// has never run and should start. Running containers stay put; created
/// or unknown states always restart; exited containers restart per the
/// workload's restart policy.
pub fn should_container_be_restarted(
    container: &ContainerSpec,
    workload: &Workload,
    runtime: &RuntimeStatus,
) -> bool {
    if workload.deletion_timestamp.is_some() {
        return false;
    }
    let Some(status) = runtime.find_container(&container.name) else {
        return true;
    };
    match status.state {
        RuntimeContainerState::Running => false,
        RuntimeContainerState::Unknown | RuntimeContainerState::Created => true,
        RuntimeContainerState::Exited => match workload.spec.restart_policy {
            RestartPolicy::Never => false,
            RestartPolicy::OnFailure => status.exit_code != 0,
            RestartPolicy::Always => true,
        },
    }
}

fn convert_container_status(
    cs: &super::RuntimeContainerStatus,
    old: Option<&ApiContainerStatus>,
) -> ApiContainerStatus {
    let mut status = ApiContainerStatus {
        name: cs.name.clone(),
        image: cs.image.clone(),
        state: ContainerState::waiting(""),
        last_termination_state: None,
        restart_count: cs.restart_count,
    };

    match cs.state {
        RuntimeContainerState::Running => {
            status.state = ContainerState::Running {
                started_at: cs.started_at,
            };
        }
        RuntimeContainerState::Created => {
            // Created but not running: waiting to be running.
            status.state = ContainerState::waiting("");
        }
        RuntimeContainerState::Exited => {
            status.state = ContainerState::Terminated {
                exit_code: cs.exit_code,
                reason: cs.reason.clone(),
                message: cs.message.clone(),
                started_at: cs.started_at,
                finished_at: cs.finished_at,
            };
        }
        RuntimeContainerState::Unknown => {
            match old {
                // Previously running and now unlocatable: the container
                // ran and stopped without an observed exit. Publishing
                // it as waiting would make run-once containers run
                // twice, so synthesize a termination instead.
                Some(old) if old.state.is_running() => {
                    status.state = ContainerState::Terminated {
                        exit_code: UNKNOWN_EXIT_CODE,
                        reason: REASON_STATUS_UNKNOWN.to_string(),
                        message: "The container could not be located when the workload \
                                  was terminated"
                            .to_string(),
                        started_at: None,
                        finished_at: None,
                    };
                    // The engine reported no status, so its restart
                    // count cannot be trusted; carry the old count
                    // forward and account for the lost instance.
                    status.restart_count = old.restart_count + 1;
                }
                // Anything else unknown collapses to waiting. Any
                // waiting container pulls the workload back to Pending
                // even if its peers are running.
                _ => {
                    status.state = ContainerState::waiting("");
                }
            }
        }
    }
    status
}

fn convert_to_api_container_statuses(
    workload: &Workload,
    runtime: &RuntimeStatus,
    previous: &[ApiContainerStatus],
    containers: &[ContainerSpec],
    has_init_containers: bool,
    is_init_container: bool,
    reason_cache: &ReasonCache,
) -> Vec<ApiContainerStatus> {
    let old_statuses: HashMap<&str, &ApiContainerStatus> = previous
        .iter()
        .map(|status| (status.name.as_str(), status))
        .collect();

    let default_reason = if has_init_containers {
        REASON_INITIALIZING
    } else {
        REASON_CREATING
    };

    // Seed every declared container with a default waiting status,
    // carrying forward history from the previously reported status.
    let mut statuses: HashMap<&str, ApiContainerStatus> = HashMap::new();
    for container in containers {
        let mut status = ApiContainerStatus::waiting(&container.name, &container.image, default_reason);
        if let Some(old) = old_statuses.get(container.name.as_str()) {
            if old.state.is_terminated() {
                status = (*old).clone();
            } else {
                status.restart_count = old.restart_count;
                status.last_termination_state = old.last_termination_state.clone();
            }
        }
        statuses.insert(container.name.as_str(), status);
    }

    // Containers the runtime no longer knows about. If one was
    // previously running, record a synthesized termination so it shows
    // as stopped rather than never-started.
    for container in containers {
        if runtime.find_container(&container.name).is_some() {
            continue;
        }
        let Some(old) = old_statuses.get(container.name.as_str()) else {
            continue;
        };
        if old.state.is_terminated() || !old.state.is_running() {
            continue;
        }
        let Some(status) = statuses.get_mut(container.name.as_str()) else {
            continue;
        };
        if status.state.waiting_reason() != Some(default_reason) {
            // A real state was written above; don't override it.
            continue;
        }
        if matches!(
            status.last_termination_state,
            Some(ContainerState::Terminated { .. })
        ) {
            continue;
        }
        status.last_termination_state = Some(ContainerState::Terminated {
            exit_code: UNKNOWN_EXIT_CODE,
            reason: REASON_STATUS_UNKNOWN.to_string(),
            message: "The container could not be located when the workload was deleted. \
                      The container used to be Running"
                .to_string(),
            started_at: None,
            finished_at: None,
        });
        // Not being deleted means the runtime restarted it.
        if workload.deletion_timestamp.is_none() {
            status.restart_count += 1;
        }
    }

    // Apply observed states, newest instance first. The newest
    // observation becomes the current state; the second-newest becomes
    // the last termination state; older instances are ignored.
    let mut observed: Vec<&super::RuntimeContainerStatus> =
        runtime.container_statuses.iter().collect();
    observed.sort_by(|a, b| b.created_at.cmp(&a.created_at));

    let mut seen: HashMap<&str, usize> = HashMap::new();
    for cs in observed {
        if !statuses.contains_key(cs.name.as_str()) {
            continue;
        }
        let count = seen.entry(cs.name.as_str()).or_insert(0);
        if *count >= 2 {
            continue;
        }
        let converted = convert_container_status(cs, old_statuses.get(cs.name.as_str()).copied());
        if let Some(status) = statuses.get_mut(cs.name.as_str()) {
            if *count == 0 {
                *status = converted;
            } else {
                status.last_termination_state = Some(converted.state);
            }
        }
        *count += 1;
    }

    // Containers that failed to start are waiting with the recorded
    // failure reason, when one is known. Without a recorded reason the
    // observed state is more informative, so it is left alone.
    for container in containers {
        if is_init_container {
            // An init container that exited successfully will not be
            // restarted.
            if let Some(status) = runtime.find_container(&container.name) {
                if status.state == RuntimeContainerState::Exited && status.exit_code == 0 {
                    continue;
                }
            }
        }
        if !should_container_be_restarted(container, workload, runtime) {
            continue;
        }
        let Some(failure) = reason_cache.get(&workload.id, &container.name) else {
            continue;
        };
        if let Some(status) = statuses.get_mut(container.name.as_str()) {
            if status.state.is_terminated() {
                status.last_termination_state = Some(status.state.clone());
            }
            status.state = ContainerState::Waiting {
                reason: failure.reason,
                message: failure.message,
            };
        }
    }

    // Declaration order keeps the published list deterministic.
    containers
        .iter()
        .filter_map(|container| statuses.remove(container.name.as_str()))
        .collect()
}

/// Generates the status to publish for a workload from the latest
/// runtime observation, using the previously reported status as the
/// merge baseline.
pub fn generate_api_status(
    workload: &Workload,
    runtime: &RuntimeStatus,
    reason_cache: &ReasonCache,
) -> ApiStatus {
    debug!(workload = %workload.full_name(), "generating workload status");

    let old = &workload.reported_status;
    let has_init = !workload.spec.init_containers.is_empty();

    let mut status = ApiStatus {
        container_statuses: convert_to_api_container_statuses(
            workload,
            runtime,
            &old.container_statuses,
            &workload.spec.containers,
            has_init,
            false,
            reason_cache,
        ),
        init_container_statuses: convert_to_api_container_statuses(
            workload,
            runtime,
            &old.init_container_statuses,
            &workload.spec.init_containers,
            has_init,
            true,
            reason_cache,
        ),
        ..ApiStatus::default()
    };

    let mut all_statuses = status.container_statuses.clone();
    all_statuses.extend(status.init_container_statuses.iter().cloned());
    status.phase = compute_phase(&workload.spec, &all_statuses);
    debug!(
        workload = %workload.full_name(),
        old_phase = %old.phase,
        phase = %status.phase,
        "computed workload phase"
    );

    // A terminal phase reported upstream wins over any non-terminal
    // recomputation.
    if !status.phase.is_terminal() && old.phase.is_terminal() {
        debug!(
            workload = %workload.full_name(),
            phase = %old.phase,
            "reported phase was terminal, keeping it"
        );
        status.phase = old.phase;
    }

    if status.phase == old.phase {
        // The reason and message belong to the phase; keep them while
        // the phase holds.
        status.reason = old.reason.clone();
        status.message = old.message.clone();
    }

    // Workloads never leave a terminal phase. Reaching this branch
    // means the two terminal phases disagree, which is a bug somewhere
    // upstream; keep the reported one and log.
    if old.phase.is_terminal() && status.phase != old.phase {
        error!(
            workload = %workload.full_name(),
            reported_phase = %old.phase,
            computed_phase = %status.phase,
            "attempted illegal phase transition, forcing reported phase"
        );
        status.phase = old.phase;
    }

    status
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::status::{Phase, RuntimeContainerStatus, SandboxState};
    use crate::workload::WorkloadId;
    use chrono::{Duration, Utc};

    fn workload_with(containers: &[&str]) -> Workload {
        let mut workload = Workload::new("uid-1", "default", "web");
        workload.spec.containers = containers
            .iter()
            .map(|name| ContainerSpec::new(*name, "img"))
            .collect();
        workload
    }

    fn running_runtime(workload: &Workload) -> RuntimeStatus {
        let mut runtime = RuntimeStatus::empty(workload.id.clone());
        runtime.sandbox_states.push(SandboxState::Ready);
        for container in &workload.spec.containers {
            let mut cs =
                RuntimeContainerStatus::new(&container.name, RuntimeContainerState::Running);
            cs.image = container.image.clone();
            cs.created_at = Some(Utc::now());
            cs.started_at = Some(Utc::now());
            runtime.container_statuses.push(cs);
        }
        runtime
    }

    #[test]
    fn test_running_containers_produce_running_phase() {
        let workload = workload_with(&["a", "b"]);
        let runtime = running_runtime(&workload);
        let cache = ReasonCache::new();

        let status = generate_api_status(&workload, &runtime, &cache);
        assert_eq!(status.phase, Phase::Running);
        assert_eq!(status.container_statuses.len(), 2);
        assert!(status.container_statuses.iter().all(|s| s.state.is_running()));
    }

    #[test]
    fn test_no_observation_defaults_to_creating() {
        let workload = workload_with(&["a"]);
        let runtime = RuntimeStatus::empty(workload.id.clone());
        let cache = ReasonCache::new();

        let status = generate_api_status(&workload, &runtime, &cache);
        assert_eq!(status.phase, Phase::Pending);
        assert_eq!(
            status.container_statuses[0].state.waiting_reason(),
            Some(REASON_CREATING)
        );
    }

    #[test]
    fn test_default_reason_is_initializing_with_init_containers() {
        let mut workload = workload_with(&["a"]);
        workload
            .spec
            .init_containers
            .push(ContainerSpec::new("init", "img"));
        let runtime = RuntimeStatus::empty(workload.id.clone());
        let cache = ReasonCache::new();

        let status = generate_api_status(&workload, &runtime, &cache);
        assert_eq!(
            status.container_statuses[0].state.waiting_reason(),
            Some(REASON_INITIALIZING)
        );
    }

    #[test]
    fn test_disappeared_running_container_gets_synthesized_termination() {
        let mut workload = workload_with(&["a"]);
        workload.reported_status.container_statuses = vec![ApiContainerStatus {
            name: "a".to_string(),
            image: "img".to_string(),
            state: ContainerState::Running { started_at: None },
            last_termination_state: None,
            restart_count: 2,
        }];
        workload.reported_status.phase = Phase::Running;
        let runtime = RuntimeStatus::empty(workload.id.clone());
        let cache = ReasonCache::new();

        let status = generate_api_status(&workload, &runtime, &cache);
        let container = &status.container_statuses[0];
        match &container.last_termination_state {
            Some(ContainerState::Terminated {
                exit_code, reason, ..
            }) => {
                assert_eq!(*exit_code, UNKNOWN_EXIT_CODE);
                assert_eq!(reason, REASON_STATUS_UNKNOWN);
            }
            other => panic!("expected synthesized termination, got {:?}", other),
        }
        // Not deleted, so the disappearance counts as a restart.
        assert_eq!(container.restart_count, 3);
    }

    #[test]
    fn test_disappeared_container_no_restart_increment_when_deleted() {
        let mut workload = workload_with(&["a"]);
        workload.deletion_timestamp = Some(Utc::now());
        workload.reported_status.container_statuses = vec![ApiContainerStatus {
            name: "a".to_string(),
            image: "img".to_string(),
            state: ContainerState::Running { started_at: None },
            last_termination_state: None,
            restart_count: 2,
        }];
        let runtime = RuntimeStatus::empty(workload.id.clone());
        let cache = ReasonCache::new();

        let status = generate_api_status(&workload, &runtime, &cache);
        assert_eq!(status.container_statuses[0].restart_count, 2);
    }

    #[test]
    fn test_unknown_state_after_running_becomes_terminated() {
        let mut workload = workload_with(&["a"]);
        workload.reported_status.container_statuses = vec![ApiContainerStatus {
            name: "a".to_string(),
            image: "img".to_string(),
            state: ContainerState::Running { started_at: None },
            last_termination_state: None,
            restart_count: 0,
        }];
        let mut runtime = RuntimeStatus::empty(workload.id.clone());
        runtime
            .container_statuses
            .push(RuntimeContainerStatus::new("a", RuntimeContainerState::Unknown));
        let cache = ReasonCache::new();

        let status = generate_api_status(&workload, &runtime, &cache);
        let container = &status.container_statuses[0];
        match &container.state {
            ContainerState::Terminated { exit_code, reason, .. } => {
                assert_eq!(*exit_code, UNKNOWN_EXIT_CODE);
                assert_eq!(reason, REASON_STATUS_UNKNOWN);
            }
            other => panic!("expected terminated, got {:?}", other),
        }
        assert_eq!(container.restart_count, 1);
    }

    #[test]
    fn test_second_newest_instance_becomes_last_termination() {
        let workload = workload_with(&["a"]);
        let mut runtime = RuntimeStatus::empty(workload.id.clone());
        let now = Utc::now();

        let mut older = RuntimeContainerStatus::new("a", RuntimeContainerState::Exited);
        older.exit_code = 1;
        older.reason = "Error".to_string();
        older.created_at = Some(now - Duration::seconds(60));
        let mut newer = RuntimeContainerStatus::new("a", RuntimeContainerState::Running);
        newer.created_at = Some(now);
        runtime.container_statuses.push(older);
        runtime.container_statuses.push(newer);
        let cache = ReasonCache::new();

        let status = generate_api_status(&workload, &runtime, &cache);
        let container = &status.container_statuses[0];
        assert!(container.state.is_running());
        assert!(matches!(
            container.last_termination_state,
            Some(ContainerState::Terminated { exit_code: 1, .. })
        ));
    }

    #[test]
    fn test_start_failure_reason_published_for_restart_candidate() {
        let workload = workload_with(&["a"]);
        let mut runtime = RuntimeStatus::empty(workload.id.clone());
        let mut exited = RuntimeContainerStatus::new("a", RuntimeContainerState::Exited);
        exited.exit_code = 1;
        runtime.container_statuses.push(exited);

        let cache = ReasonCache::new();
        cache.add(&workload.id, "a", "ErrImagePull", "image not found");

        let status = generate_api_status(&workload, &runtime, &cache);
        let container = &status.container_statuses[0];
        match &container.state {
            ContainerState::Waiting { reason, message } => {
                assert_eq!(reason, "ErrImagePull");
                assert_eq!(message, "image not found");
            }
            other => panic!("expected waiting with failure reason, got {:?}", other),
        }
        // The terminated state moved into the last termination slot.
        assert!(matches!(
            container.last_termination_state,
            Some(ContainerState::Terminated { exit_code: 1, .. })
        ));
    }

    #[test]
    fn test_terminal_reported_phase_is_never_regressed() {
        let mut workload = workload_with(&["a"]);
        workload.reported_status.phase = Phase::Succeeded;
        let runtime = running_runtime(&workload);
        let cache = ReasonCache::new();

        let status = generate_api_status(&workload, &runtime, &cache);
        assert_eq!(status.phase, Phase::Succeeded);
    }

    #[test]
    fn test_reason_and_message_preserved_while_phase_holds() {
        let mut workload = workload_with(&["a"]);
        workload.reported_status.phase = Phase::Running;
        workload.reported_status.reason = Some("NodePressure".to_string());
        workload.reported_status.message = Some("memory pressure".to_string());
        let runtime = running_runtime(&workload);
        let cache = ReasonCache::new();

        let status = generate_api_status(&workload, &runtime, &cache);
        assert_eq!(status.phase, Phase::Running);
        assert_eq!(status.reason.as_deref(), Some("NodePressure"));
        assert_eq!(status.message.as_deref(), Some("memory pressure"));
    }

    #[test]
    fn test_output_follows_declaration_order() {
        let workload = workload_with(&["b", "a", "c"]);
        let runtime = running_runtime(&workload);
        let cache = ReasonCache::new();

        let status = generate_api_status(&workload, &runtime, &cache);
        let names: Vec<&str> = status
            .container_statuses
            .iter()
            .map(|s| s.name.as_str())
            .collect();
        assert_eq!(names, vec!["b", "a", "c"]);
    }

    #[test]
    fn test_should_restart_never_observed() {
        let workload = workload_with(&["a"]);
        let runtime = RuntimeStatus::empty(workload.id.clone());
        assert!(should_container_be_restarted(
            &workload.spec.containers[0],
            &workload,
            &runtime
        ));
    }

    #[test]
    fn test_should_not_restart_when_deleted() {
        let mut workload = workload_with(&["a"]);
        workload.deletion_timestamp = Some(Utc::now());
        let runtime = RuntimeStatus::empty(workload.id.clone());
        assert!(!should_container_be_restarted(
            &workload.spec.containers[0],
            &workload,
            &runtime
        ));
    }

    #[test]
    fn test_should_not_restart_successful_exit_on_failure_policy() {
        let mut workload = workload_with(&["a"]);
        workload.spec.restart_policy = RestartPolicy::OnFailure;
        let mut runtime = RuntimeStatus::empty(workload.id.clone());
        runtime
            .container_statuses
            .push(RuntimeContainerStatus::new("a", RuntimeContainerState::Exited));
        assert!(!should_container_be_restarted(
            &workload.spec.containers[0],
            &workload,
            &runtime
        ));
    }
}
