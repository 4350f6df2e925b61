//! Delayed requeue of workloads.
//!
//! Workers never loop on their own; when a reconciliation pass
//! finishes, the worker asks the [`RetryQueue`] to make the workload
//! due again after a delay. An external sync loop drains due ids and
//! feeds them back to the coordinator as [`UpdateKind::Sync`] requests.
//!
//! [`UpdateKind::Sync`]: crate::worker::UpdateKind::Sync

use crate::workload::WorkloadId;
use rand::Rng;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// Time source for the queue. Swapped for a controllable clock in
/// tests.
pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
}

/// Clock backed by [`Instant::now`].
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// Applies symmetric jitter to a delay: the result is uniformly drawn
/// from `base * (1 - factor)` to `base * (1 + factor)`.
///
/// Jitter keeps a node's worth of workers from resyncing in lockstep.
pub fn jittered(base: Duration, factor: f64) -> Duration {
    if factor <= 0.0 || base.is_zero() {
        return base;
    }
    let scale = 1.0 + rand::thread_rng().gen_range(-factor..factor);
    base.mul_f64(scale.max(0.0))
}

/// Queue of workload ids due for another reconciliation pass at some
/// future instant.
///
/// One entry per id: re-enqueueing overwrites the previous due time.
pub struct RetryQueue {
    clock: Arc<dyn Clock>,
    due_times: Mutex<HashMap<WorkloadId, Instant>>,
}

impl RetryQueue {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            due_times: Mutex::new(HashMap::new()),
        }
    }

    /// Schedules the workload to become due after `delay`. A zero delay
    /// makes it due immediately.
    pub fn enqueue(&self, id: WorkloadId, delay: Duration) {
        let due = self.clock.now() + delay;
        self.due_times.lock().unwrap().insert(id, due);
    }

    /// Removes and returns every id whose due time has passed.
    pub fn due(&self) -> Vec<WorkloadId> {
        let now = self.clock.now();
        let mut due_times = self.due_times.lock().unwrap();
        let ready: Vec<WorkloadId> = due_times
            .iter()
            .filter(|(_, due)| **due <= now)
            .map(|(id, _)| id.clone())
            .collect();
        for id in &ready {
            due_times.remove(id);
        }
        ready
    }

    /// Drops the entry for the workload, if any. Called when the worker
    /// is purged.
    pub fn forget(&self, id: &WorkloadId) {
        self.due_times.lock().unwrap().remove(id);
    }

    pub fn len(&self) -> usize {
        self.due_times.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.due_times.lock().unwrap().is_empty()
    }
}

impl Default for RetryQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct TestClock {
        now: Mutex<Instant>,
    }

    impl TestClock {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                now: Mutex::new(Instant::now()),
            })
        }

        fn advance(&self, by: Duration) {
            *self.now.lock().unwrap() += by;
        }
    }

    impl Clock for TestClock {
        fn now(&self) -> Instant {
            *self.now.lock().unwrap()
        }
    }

    #[test]
    fn test_zero_delay_is_due_immediately() {
        let queue = RetryQueue::new();
        queue.enqueue(WorkloadId::new("uid-1"), Duration::ZERO);
        assert_eq!(queue.due(), vec![WorkloadId::new("uid-1")]);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_not_due_before_delay_elapses() {
        let clock = TestClock::new();
        let queue = RetryQueue::with_clock(clock.clone());
        queue.enqueue(WorkloadId::new("uid-1"), Duration::from_secs(10));

        assert!(queue.due().is_empty());
        clock.advance(Duration::from_secs(11));
        assert_eq!(queue.due(), vec![WorkloadId::new("uid-1")]);
    }

    #[test]
    fn test_reenqueue_overwrites_due_time() {
        let clock = TestClock::new();
        let queue = RetryQueue::with_clock(clock.clone());
        queue.enqueue(WorkloadId::new("uid-1"), Duration::from_secs(1));
        queue.enqueue(WorkloadId::new("uid-1"), Duration::from_secs(60));

        clock.advance(Duration::from_secs(2));
        assert!(queue.due().is_empty());
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn test_due_drains_only_ready_entries() {
        let clock = TestClock::new();
        let queue = RetryQueue::with_clock(clock.clone());
        queue.enqueue(WorkloadId::new("soon"), Duration::from_secs(1));
        queue.enqueue(WorkloadId::new("later"), Duration::from_secs(100));

        clock.advance(Duration::from_secs(5));
        assert_eq!(queue.due(), vec![WorkloadId::new("soon")]);
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn test_forget_removes_entry() {
        let queue = RetryQueue::new();
        queue.enqueue(WorkloadId::new("uid-1"), Duration::from_secs(10));
        queue.forget(&WorkloadId::new("uid-1"));
        assert!(queue.is_empty());
    }

    #[test]
    fn test_jittered_stays_within_bounds() {
        let base = Duration::from_secs(10);
        for _ in 0..100 {
            let jittered = jittered(base, 0.5);
            assert!(jittered >= Duration::from_secs(5));
            assert!(jittered <= Duration::from_secs(15));
        }
    }

    #[test]
    fn test_jittered_zero_factor_is_identity() {
        let base = Duration::from_secs(10);
        assert_eq!(jittered(base, 0.0), base);
    }
}
