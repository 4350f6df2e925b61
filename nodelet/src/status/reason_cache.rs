//! Container start failure reasons.
//!
//! When a container fails to start, the raw runtime state alone is not
//! informative: the container is simply gone or exited. The reason
//! cache remembers the most recent start failure per (workload,
//! container) so status generation can publish a waiting state carrying
//! the actual failure instead of a bare restart.

use crate::workload::WorkloadId;
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

/// Upper bound on remembered failures across all workloads. Old entries
/// are evicted in insertion order once the bound is reached.
const MAX_ENTRIES: usize = 1000;

/// The most recent start failure of one container.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StartFailure {
    /// Machine-readable failure reason.
    pub reason: String,
    /// Human-readable detail.
    pub message: String,
}

#[derive(Default)]
struct Inner {
    entries: HashMap<(WorkloadId, String), StartFailure>,
    order: VecDeque<(WorkloadId, String)>,
}

/// Bounded cache of the most recent container start failure per
/// (workload, container).
///
/// Shared across worker tasks; all methods take `&self`.
#[derive(Default)]
pub struct ReasonCache {
    inner: Mutex<Inner>,
}

impl ReasonCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a start failure, replacing any previous entry for the
    /// same container.
    pub fn add(
        &self,
        id: &WorkloadId,
        container: &str,
        reason: impl Into<String>,
        message: impl Into<String>,
    ) {
        let key = (id.clone(), container.to_string());
        let failure = StartFailure {
            reason: reason.into(),
            message: message.into(),
        };
        let mut inner = self.inner.lock().unwrap();
        if inner.entries.insert(key.clone(), failure).is_none() {
            inner.order.push_back(key);
            while inner.entries.len() > MAX_ENTRIES {
                match inner.order.pop_front() {
                    Some(oldest) => {
                        inner.entries.remove(&oldest);
                    }
                    None => break,
                }
            }
        }
    }

    /// Returns the remembered failure for the container, if any.
    pub fn get(&self, id: &WorkloadId, container: &str) -> Option<StartFailure> {
        let key = (id.clone(), container.to_string());
        self.inner.lock().unwrap().entries.get(&key).cloned()
    }

    /// Clears the remembered failure for one container. Called once the
    /// container starts successfully.
    pub fn remove(&self, id: &WorkloadId, container: &str) {
        let key = (id.clone(), container.to_string());
        self.inner.lock().unwrap().entries.remove(&key);
    }

    /// Drops every entry belonging to the workload. Called when the
    /// worker is purged.
    pub fn remove_workload(&self, id: &WorkloadId) {
        let mut inner = self.inner.lock().unwrap();
        inner.entries.retain(|(entry_id, _), _| entry_id != id);
        inner.order.retain(|(entry_id, _)| entry_id != id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_add_and_get() {
        let cache = ReasonCache::new();
        let id = WorkloadId::new("uid-1");
        cache.add(&id, "main", "ErrImagePull", "image not found");

        let failure = cache.get(&id, "main").unwrap();
        assert_eq!(failure.reason, "ErrImagePull");
        assert_eq!(failure.message, "image not found");
    }

    #[test]
    fn test_get_missing_is_none() {
        let cache = ReasonCache::new();
        assert!(cache.get(&WorkloadId::new("uid-1"), "main").is_none());
    }

    #[test]
    fn test_add_replaces_previous_failure() {
        let cache = ReasonCache::new();
        let id = WorkloadId::new("uid-1");
        cache.add(&id, "main", "ErrImagePull", "first");
        cache.add(&id, "main", "CreateContainerError", "second");

        let failure = cache.get(&id, "main").unwrap();
        assert_eq!(failure.reason, "CreateContainerError");
        assert_eq!(failure.message, "second");
    }

    #[test]
    fn test_remove() {
        let cache = ReasonCache::new();
        let id = WorkloadId::new("uid-1");
        cache.add(&id, "main", "ErrImagePull", "");
        cache.remove(&id, "main");
        assert!(cache.get(&id, "main").is_none());
    }

    #[test]
    fn test_remove_workload_clears_all_containers() {
        let cache = ReasonCache::new();
        let id = WorkloadId::new("uid-1");
        let other = WorkloadId::new("uid-2");
        cache.add(&id, "a", "ErrImagePull", "");
        cache.add(&id, "b", "ErrImagePull", "");
        cache.add(&other, "a", "ErrImagePull", "");

        cache.remove_workload(&id);
        assert!(cache.get(&id, "a").is_none());
        assert!(cache.get(&id, "b").is_none());
        assert!(cache.get(&other, "a").is_some());
    }
}
