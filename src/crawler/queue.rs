//! Shared priority queue for fetch tasks
//!
//! This module handles:
//! - Priority ordering with FIFO tie-break among equal priorities
//! - Delayed re-entry of retried tasks
//! - In-flight accounting, so workers know when the run has drained
//! - Waking idle workers on new work or cancellation

use crate::crawler::task::FetchTask;
use parking_lot::Mutex;
use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// A ready task with its enqueue sequence number
#[derive(Debug)]
struct QueuedTask {
    task: FetchTask,
    seq: u64,
}

// Lower priority values pop first from the max-heap, then lower sequence numbers
impl Ord for QueuedTask {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .task
            .priority
            .cmp(&self.task.priority)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

impl PartialOrd for QueuedTask {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for QueuedTask {
    fn eq(&self, other: &Self) -> bool {
        self.seq == other.seq
    }
}

impl Eq for QueuedTask {}

/// A task waiting out its retry delay
#[derive(Debug)]
struct DelayedTask {
    ready_at: Instant,
    task: FetchTask,
    seq: u64,
}

// Earliest ready time pops first
impl Ord for DelayedTask {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .ready_at
            .cmp(&self.ready_at)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

impl PartialOrd for DelayedTask {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for DelayedTask {
    fn eq(&self, other: &Self) -> bool {
        self.seq == other.seq
    }
}

impl Eq for DelayedTask {}

#[derive(Debug, Default)]
struct QueueState {
    ready: BinaryHeap<QueuedTask>,
    delayed: BinaryHeap<DelayedTask>,
    in_flight: usize,
    next_seq: u64,
}

impl QueueState {
    fn next_seq(&mut self) -> u64 {
        let seq = self.next_seq;
        self.next_seq += 1;
        seq
    }

    fn push_ready(&mut self, task: FetchTask) {
        let seq = self.next_seq();
        self.ready.push(QueuedTask { task, seq });
    }

    fn push_delayed(&mut self, task: FetchTask, ready_at: Instant) {
        let seq = self.next_seq();
        self.delayed.push(DelayedTask {
            ready_at,
            task,
            seq,
        });
    }

    /// Moves every delayed task whose time has come into the ready heap
    fn promote_due(&mut self, now: Instant) {
        while self.delayed.peek().is_some_and(|d| d.ready_at <= now) {
            if let Some(due) = self.delayed.pop() {
                self.push_ready(due.task);
            }
        }
    }
}

/// Priority queue shared by all workers of a run
///
/// Every task handed out by `pop` counts as in flight until the worker calls
/// either `requeue` or `finish` for it.
#[derive(Debug, Default)]
pub struct TaskQueue {
    state: Mutex<QueueState>,
    notify: Notify,
}

impl TaskQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a task that is ready immediately
    pub fn push(&self, task: FetchTask) {
        self.state.lock().push_ready(task);
        self.notify.notify_waiters();
    }

    /// Adds a task that becomes ready after `delay`
    #[cfg(test)]
    fn push_delayed(&self, task: FetchTask, delay: Duration) {
        {
            let mut state = self.state.lock();
            if delay.is_zero() {
                state.push_ready(task);
            } else {
                state.push_delayed(task, Instant::now() + delay);
            }
        }
        self.notify.notify_waiters();
    }

    /// Returns an in-flight task to the queue after `delay`
    pub fn requeue(&self, task: FetchTask, delay: Duration) {
        {
            let mut state = self.state.lock();
            state.in_flight = state.in_flight.saturating_sub(1);
            if delay.is_zero() {
                state.push_ready(task);
            } else {
                state.push_delayed(task, Instant::now() + delay);
            }
        }
        self.notify.notify_waiters();
    }

    /// Marks an in-flight task as done for good
    pub fn finish(&self) {
        {
            let mut state = self.state.lock();
            state.in_flight = state.in_flight.saturating_sub(1);
        }
        self.notify.notify_waiters();
    }

    /// Waits for the next ready task
    ///
    /// Returns `None` once the queue has drained (nothing ready, nothing
    /// delayed, nothing in flight that could be requeued) or when `cancel`
    /// fires.
    pub async fn pop(&self, cancel: &CancellationToken) -> Option<FetchTask> {
        loop {
            if cancel.is_cancelled() {
                return None;
            }

            // Register for wake-ups before inspecting state so a push between
            // the check and the await is not missed
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let wake_at = {
                let mut state = self.state.lock();
                state.promote_due(Instant::now());

                if let Some(next) = state.ready.pop() {
                    state.in_flight += 1;
                    tracing::trace!(
                        "Dequeued {} (priority {}, {} in flight)",
                        next.task.url,
                        next.task.priority,
                        state.in_flight
                    );
                    return Some(next.task);
                }

                if state.delayed.is_empty() && state.in_flight == 0 {
                    return None;
                }

                state.delayed.peek().map(|d| d.ready_at)
            };

            match wake_at {
                Some(at) => {
                    tokio::select! {
                        _ = cancel.cancelled() => return None,
                        _ = &mut notified => {}
                        _ = tokio::time::sleep_until(at) => {}
                    }
                }
                None => {
                    tokio::select! {
                        _ = cancel.cancelled() => return None,
                        _ = &mut notified => {}
                    }
                }
            }
        }
    }

    /// Number of queued tasks, ready or delayed
    pub fn len(&self) -> usize {
        let state = self.state.lock();
        state.ready.len() + state.delayed.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn in_flight(&self) -> usize {
        self.state.lock().in_flight
    }

    /// Removes and returns every queued task in dequeue order
    pub fn drain_pending(&self) -> Vec<FetchTask> {
        let mut state = self.state.lock();
        let mut pending: Vec<QueuedTask> = state.ready.drain().collect();
        let delayed: Vec<DelayedTask> = state.delayed.drain().collect();
        drop(state);

        pending.extend(delayed.into_iter().map(|d| QueuedTask {
            task: d.task,
            seq: d.seq,
        }));
        // max-heap order is dequeue order
        pending.sort_by(|a, b| b.cmp(a));
        pending.into_iter().map(|q| q.task).collect()
    }
}
