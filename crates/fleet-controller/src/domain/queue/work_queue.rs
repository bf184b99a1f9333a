use std::cmp::Reverse;
use std::collections::HashMap;
use std::collections::HashSet;
use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::MutexGuard;
use std::sync::PoisonError;
use std::time::Duration;

use priority_queue::PriorityQueue;
use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::trace;

use super::backoff::ExponentialBackoff;
use crate::domain::types::ObjectKey;

/// Why a key was enqueued. Only used for logging: the reconciler always
/// re-fetches canonical state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, derive_more::Display)]
pub enum TriggerReason {
    Added,
    Updated,
    Deleted,
    Relist,
    Requeue,
    Retry,
    Conflict,
    Delegated,
}

/// A key handed to a worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkItem {
    pub key: ObjectKey,
    /// When the item became eligible for processing.
    pub not_before: Instant,
    /// Consecutive failed attempts recorded for the key.
    pub attempt: u32,
}

#[derive(Default)]
struct QueueState {
    ready: VecDeque<(ObjectKey, Instant)>,
    /// Keys waiting in `ready` or re-triggered while in flight.
    dirty: HashSet<ObjectKey>,
    processing: HashSet<ObjectKey>,
    delayed: PriorityQueue<ObjectKey, Reverse<Instant>>,
    failures: HashMap<ObjectKey, u32>,
    shutting_down: bool,
}

impl QueueState {
    /// Returns true when the key was pushed onto the ready list.
    fn insert_ready(&mut self, key: ObjectKey, now: Instant) -> bool {
        self.delayed.remove(&key);
        if !self.dirty.insert(key.clone()) {
            return false;
        }
        if self.processing.contains(&key) {
            // picked up again by `done`
            return false;
        }
        self.ready.push_back((key, now));
        true
    }

    fn promote_due(&mut self, now: Instant) -> usize {
        let mut promoted = 0;
        while let Some((_, Reverse(at))) = self.delayed.peek() {
            if *at > now {
                break;
            }
            if let Some((key, _)) = self.delayed.pop() {
                if self.insert_ready(key, now) {
                    promoted += 1;
                }
            }
        }
        promoted
    }

    fn next_deadline(&self) -> Option<Instant> {
        self.delayed.peek().map(|(_, Reverse(at))| *at)
    }
}

/// Deduplicating, rate-limited work queue keyed by object identity.
///
/// A key is held by at most one worker at a time. Triggers for a key that is
/// already pending are coalesced; triggers for a key that is in flight mark
/// it dirty so it is handed out exactly once more after [`WorkQueue::done`].
/// Ready keys are served in arrival order, which gives round-robin fairness
/// across keys without any ordering guarantee between them.
pub struct WorkQueue {
    state: Mutex<QueueState>,
    notify: Notify,
    backoff: ExponentialBackoff,
}

impl WorkQueue {
    pub fn new(backoff: ExponentialBackoff) -> Self {
        Self {
            state: Mutex::new(QueueState::default()),
            notify: Notify::new(),
            backoff,
        }
    }

    fn lock(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Enqueue a key for immediate processing.
    pub fn add(&self, key: ObjectKey, reason: TriggerReason) {
        let pushed = {
            let mut state = self.lock();
            if state.shutting_down {
                return;
            }
            trace!(%key, %reason, "trigger received");
            state.insert_ready(key, Instant::now())
        };
        if pushed {
            self.notify.notify_one();
        }
    }

    /// Enqueue a key once `delay` has elapsed. A key that is already ready
    /// stays ready; two delayed enqueues keep the earlier deadline.
    pub fn add_after(&self, key: ObjectKey, delay: Duration) {
        if delay.is_zero() {
            self.add(key, TriggerReason::Requeue);
            return;
        }
        {
            let mut state = self.lock();
            if state.shutting_down {
                return;
            }
            if state.dirty.contains(&key) {
                return;
            }
            let at = Instant::now() + delay;
            let earlier = match state.delayed.get_priority(&key) {
                Some(Reverse(existing)) => *existing > at,
                None => true,
            };
            if earlier {
                state.delayed.push(key, Reverse(at));
            }
        }
        // wake a sleeper so it can recompute its deadline
        self.notify.notify_one();
    }

    /// Record a failure for the key and enqueue it after the backoff delay.
    /// Returns the delay applied.
    pub fn add_rate_limited(&self, key: ObjectKey) -> Duration {
        let delay = {
            let mut state = self.lock();
            let failures = state.failures.entry(key.clone()).or_insert(0);
            *failures = failures.saturating_add(1);
            self.backoff.delay(*failures)
        };
        self.add_after(key, delay);
        delay
    }

    /// Reset the failure count of a key.
    pub fn forget(&self, key: &ObjectKey) {
        self.lock().failures.remove(key);
    }

    pub fn attempts(&self, key: &ObjectKey) -> u32 {
        self.lock().failures.get(key).copied().unwrap_or(0)
    }

    /// Wait for the next ready key. Returns `None` once the queue is shut down.
    pub async fn get(&self) -> Option<WorkItem> {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let deadline = {
                let mut state = self.lock();
                if state.shutting_down {
                    return None;
                }
                let now = Instant::now();
                let promoted = state.promote_due(now);
                if let Some((key, not_before)) = state.ready.pop_front() {
                    state.dirty.remove(&key);
                    state.processing.insert(key.clone());
                    let attempt = state.failures.get(&key).copied().unwrap_or(0);
                    drop(state);
                    if promoted > 1 {
                        self.notify.notify_one();
                    }
                    return Some(WorkItem {
                        key,
                        not_before,
                        attempt,
                    });
                }
                state.next_deadline()
            };

            match deadline {
                Some(at) => {
                    tokio::select! {
                        _ = &mut notified => {}
                        _ = tokio::time::sleep_until(at) => {}
                    }
                }
                None => notified.await,
            }
        }
    }

    /// Release the in-flight marker of a key handed out by [`WorkQueue::get`].
    pub fn done(&self, key: &ObjectKey) {
        let pushed = {
            let mut state = self.lock();
            state.processing.remove(key);
            if state.dirty.contains(key) && !state.shutting_down {
                state.ready.push_back((key.clone(), Instant::now()));
                true
            } else {
                false
            }
        };
        if pushed {
            self.notify.notify_one();
        }
    }

    /// Stop intake and release every waiting worker.
    pub fn shut_down(&self) {
        {
            let mut state = self.lock();
            state.shutting_down = true;
            state.ready.clear();
            state.delayed.clear();
        }
        self.notify.notify_waiters();
    }

    pub fn is_shutting_down(&self) -> bool {
        self.lock().shutting_down
    }

    /// Number of keys pending, ready or delayed.
    pub fn len(&self) -> usize {
        let state = self.lock();
        state.ready.len() + state.delayed.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn in_flight(&self) -> usize {
        self.lock().processing.len()
    }
}

impl Default for WorkQueue {
    fn default() -> Self {
        Self::new(ExponentialBackoff::default())
    }
}
