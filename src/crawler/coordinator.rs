//! Scheduler coordinator - worker pool orchestration
//!
//! This module drives every task through its lifecycle:
//! - Leasing an identity and an egress resource
//! - Fetching under a timeout and classifying the response
//! - Duplicate detection and delivery to the sink
//! - Resource exclusion on block signals, retries with paced delays
//! - Periodic persistence of detector state and pool exclusions
//!
//! A panicking fetcher or sink is contained to the task it was handling:
//! its resources are released and the worker keeps going.

use crate::backoff::{BackoffController, PacingOutcome};
use crate::config::SchedulerConfig;
use crate::crawler::fetcher::{classify_response, BlockKind, FetchRequest, FetchResponse, TaskError};
use crate::crawler::queue::TaskQueue;
use crate::crawler::sink::Sink;
use crate::crawler::task::{FetchOutcome, FetchTask};
use crate::crawler::{FetchError, Fetcher};
use crate::dedup::DuplicateDetector;
use crate::output::{RunReport, TaskResult};
use crate::pool::{LeasedResource, ResourceKind, ResourcePool};
use crate::state::{RunStatus, TaskState};
use crate::storage::{StateStore, StorageResult};
use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures::FutureExt;
use std::collections::BTreeMap;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

/// Fixed-size worker pool over a shared priority queue
pub struct CrawlScheduler {
    config: SchedulerConfig,
    identities: Arc<ResourcePool>,
    egress: Arc<ResourcePool>,
    detector: Arc<DuplicateDetector>,
    backoff: Arc<BackoffController>,
    store: Option<Arc<dyn StateStore>>,
    persist_exclusions: bool,
    queue: TaskQueue,

    /// Latest state of every enqueued task, keyed by URL
    ledger: DashMap<String, TaskResult>,

    /// Time of the last resource exclusion caused by each domain
    domain_blocks: DashMap<String, Instant>,

    terminal_tasks: AtomicU64,

    /// Serializes saves so an older recency window never overwrites a newer one
    persist_lock: tokio::sync::Mutex<()>,
}

impl CrawlScheduler {
    /// Creates a scheduler with an empty queue
    ///
    /// # Arguments
    ///
    /// * `config` - Scheduler settings
    /// * `identities` - Pool of client identities
    /// * `egress` - Pool of egress routes
    /// * `detector` - Duplicate detector shared with the caller
    /// * `backoff` - Per-domain pacing controller shared with the caller
    pub fn new(
        config: SchedulerConfig,
        identities: Arc<ResourcePool>,
        egress: Arc<ResourcePool>,
        detector: Arc<DuplicateDetector>,
        backoff: Arc<BackoffController>,
    ) -> Self {
        Self {
            config,
            identities,
            egress,
            detector,
            backoff,
            store: None,
            persist_exclusions: false,
            queue: TaskQueue::new(),
            ledger: DashMap::new(),
            domain_blocks: DashMap::new(),
            terminal_tasks: AtomicU64::new(0),
            persist_lock: tokio::sync::Mutex::new(()),
        }
    }

    /// Persists detector state (and optionally exclusions) through `store`
    pub fn with_store(mut self, store: Arc<dyn StateStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn persist_exclusions(mut self, enabled: bool) -> Self {
        self.persist_exclusions = enabled;
        self
    }

    /// Adds a task to the queue
    ///
    /// Returns false if a task for the same URL is already known.
    pub fn enqueue(&self, task: FetchTask) -> bool {
        match self.ledger.entry(task.url.to_string()) {
            Entry::Occupied(_) => {
                tracing::warn!("Skipping duplicate task for {}", task.url);
                false
            }
            Entry::Vacant(entry) => {
                entry.insert(TaskResult {
                    url: task.url.to_string(),
                    domain: task.domain.clone(),
                    state: TaskState::Queued,
                    attempt: task.attempt,
                    reason: None,
                });
                tracing::trace!("Enqueued {} (priority {})", task.url, task.priority);
                self.queue.push(task);
                true
            }
        }
    }

    /// Adds several tasks, returning how many were accepted
    pub fn enqueue_all<I>(&self, tasks: I) -> usize
    where
        I: IntoIterator<Item = FetchTask>,
    {
        tasks
            .into_iter()
            .map(|task| self.enqueue(task))
            .filter(|accepted| *accepted)
            .count()
    }

    /// Number of tasks waiting in the queue
    pub fn pending(&self) -> usize {
        self.queue.len()
    }

    /// Runs every queued task to a terminal state, or until `cancel` fires
    ///
    /// Fetches already in flight when cancellation is requested complete
    /// normally and their resources are released or excluded. Tasks still
    /// queued are listed in the report.
    pub async fn run(
        self,
        fetcher: Arc<dyn Fetcher>,
        sink: Arc<dyn Sink>,
        cancel: CancellationToken,
    ) -> RunReport {
        let started = Instant::now();
        tracing::info!(
            "Starting run: {} tasks, {} workers, {} identities, {} egress routes",
            self.queue.len(),
            self.config.concurrency,
            self.identities.len(),
            self.egress.len()
        );

        let scheduler = Arc::new(self);
        let mut workers = JoinSet::new();

        for worker_id in 0..scheduler.config.concurrency {
            let scheduler = Arc::clone(&scheduler);
            let fetcher = Arc::clone(&fetcher);
            let sink = Arc::clone(&sink);
            let cancel = cancel.clone();
            workers.spawn(async move {
                scheduler
                    .worker_loop(worker_id, fetcher.as_ref(), sink.as_ref(), &cancel)
                    .await
            });
        }

        while let Some(joined) = workers.join_next().await {
            if let Err(e) = joined {
                tracing::error!("Worker stopped abnormally: {}", e);
                // its task never reached finish or requeue
                scheduler.queue.finish();
            }
        }

        scheduler.persist_state().await;
        match scheduler.backoff.persist_all() {
            Ok(0) => {}
            Ok(n) => tracing::debug!("Persisted pacing state for {} domains", n),
            Err(e) => tracing::warn!("Failed to persist pacing state: {}", e),
        }

        let status = if cancel.is_cancelled() {
            RunStatus::Cancelled
        } else {
            RunStatus::Completed
        };
        let report = scheduler.build_report(status, started.elapsed());

        tracing::info!(
            "Run {}: {} succeeded, {} duplicates, {} failed, {} pending in {:.1}s",
            report.status,
            report.count(TaskState::Succeeded),
            report.count(TaskState::Duplicate),
            report.count(TaskState::Failed),
            report.pending.len(),
            report.elapsed.as_secs_f64()
        );

        report
    }

    async fn worker_loop(
        &self,
        worker_id: usize,
        fetcher: &dyn Fetcher,
        sink: &dyn Sink,
        cancel: &CancellationToken,
    ) {
        tracing::trace!("Worker {} started", worker_id);
        while let Some(task) = self.queue.pop(cancel).await {
            self.process(task, fetcher, sink).await;
        }
        tracing::trace!("Worker {} exiting", worker_id);
    }

    async fn process(&self, task: FetchTask, fetcher: &dyn Fetcher, sink: &dyn Sink) {
        if self.state_of(&task) == Some(TaskState::RetryScheduled) {
            self.transition(&task, TaskState::Queued);
        }
        self.transition(&task, TaskState::Leasing);

        let (identity, egress) = match self.lease_pair() {
            Ok(pair) => pair,
            Err(e) => {
                let delay = self.config.pool_retry_delay();
                tracing::trace!("{} for {}, retrying in {:?}", e, task.url, delay);
                self.schedule_retry(task, &e, delay);
                return;
            }
        };

        self.transition(&task, TaskState::Fetching);
        tracing::debug!(
            "Fetching {} (attempt {}) via {} as {}",
            task.url,
            task.attempt,
            egress.id,
            identity.id
        );

        let request = FetchRequest {
            url: &task.url,
            proxy: &egress.id,
            identity: &identity.id,
        };
        let fetch = AssertUnwindSafe(fetcher.fetch(request)).catch_unwind();
        let fetched = match tokio::time::timeout(self.config.fetch_timeout(), fetch).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => {
                tracing::error!("Fetcher panicked on {}", task.url);
                Err(FetchError::Connection("fetcher panicked".to_string()))
            }
            Err(_) => Err(FetchError::Timeout),
        };

        let classified = fetched.map_err(TaskError::from).and_then(|response| {
            classify_response(&response).map(|normalized| (response, normalized))
        });

        match classified {
            Ok((response, normalized)) => {
                self.complete(task, response, normalized, identity, egress, sink)
                    .await
            }
            Err(error) => self.fail(task, error, identity, egress).await,
        }
    }

    /// Leases an identity, then an egress route
    ///
    /// Nothing stays leased when either pool is exhausted.
    fn lease_pair(&self) -> Result<(LeasedResource, LeasedResource), TaskError> {
        let identity = self
            .identities
            .lease()
            .ok_or(TaskError::PoolExhausted(ResourceKind::Identity))?;

        match self.egress.lease() {
            Some(egress) => Ok((identity, egress)),
            None => {
                self.identities.release(identity);
                Err(TaskError::PoolExhausted(ResourceKind::Egress))
            }
        }
    }

    async fn complete(
        &self,
        task: FetchTask,
        response: FetchResponse,
        normalized: String,
        identity: LeasedResource,
        egress: LeasedResource,
        sink: &dyn Sink,
    ) {
        let url = task.url.to_string();
        let (verdict, hash) = self.detector.check_normalized(&url, &normalized);

        self.identities.release(identity);
        self.egress.release(egress);

        let pacing = if verdict.is_duplicate() {
            PacingOutcome::LowQuality
        } else {
            PacingOutcome::Success
        };
        self.backoff.observe(&task.domain, pacing);

        let state = if verdict.is_duplicate() {
            TaskState::Duplicate
        } else {
            TaskState::Succeeded
        };
        tracing::debug!(
            "Fetched {} in {:?} (attempt {}): {}",
            url,
            response.duration,
            task.attempt,
            verdict
        );

        let outcome = FetchOutcome {
            url: url.clone(),
            domain: task.domain.clone(),
            success: true,
            http_status: Some(response.status_code),
            duration: response.duration,
            content: response.content,
            content_hash: Some(hash),
            attempt: task.attempt,
        };
        match AssertUnwindSafe(sink.accept(outcome, verdict)).catch_unwind().await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::warn!("Sink rejected {}: {}", url, e),
            Err(_) => tracing::error!("Sink panicked on {}", url),
        }

        self.finish(&task, state, None).await;
    }

    async fn fail(&self, task: FetchTask, error: TaskError, identity: LeasedResource, egress: LeasedResource) {
        match &error {
            TaskError::BlockSignal(kind) => self.handle_block(&task.domain, *kind, identity, egress),
            _ => {
                self.identities.release(identity);
                self.egress.release(egress);
            }
        }

        let pacing = match &error {
            TaskError::BlockSignal(_) => PacingOutcome::Blocked,
            e if e.is_fatal() => PacingOutcome::LowQuality,
            _ => PacingOutcome::RetryableFailure,
        };
        let multiplier = self.backoff.observe(&task.domain, pacing);

        if error.is_fatal() {
            tracing::debug!("{} failed: {}", task.url, error);
            self.finish(&task, TaskState::Failed, Some(error.reason_code())).await;
            return;
        }

        if error.consumes_attempt() && task.attempt > self.config.max_retries {
            tracing::debug!(
                "{} failed after {} attempts, last error: {}",
                task.url,
                task.attempt,
                error
            );
            self.finish(&task, TaskState::Failed, Some("retries_exhausted".to_string())).await;
            return;
        }

        let delay = self.config.base_delay().mul_f64(multiplier);
        tracing::debug!("{} failed ({}), retrying in {:?}", task.url, error.reason_code(), delay);
        self.schedule_retry(task, &error, delay);
    }

    /// Puts a task back in the queue, charging an attempt if `error` does
    fn schedule_retry(&self, mut task: FetchTask, error: &TaskError, delay: Duration) {
        self.transition(&task, TaskState::RetryScheduled);
        if error.consumes_attempt() {
            task.advance_attempt(self.config.retry_priority_penalty);
        }
        self.queue.requeue(task, delay);
    }

    /// Excludes or releases the resources of a blocked attempt
    ///
    /// The first block from a domain is charged to the resources. Further
    /// blocks within `domain_block_window` of that exclusion are charged to
    /// the domain and the resources go back to the pool.
    fn handle_block(&self, domain: &str, kind: BlockKind, identity: LeasedResource, egress: LeasedResource) {
        let now = Instant::now();
        let window = self.config.domain_block_window();

        let charge_resources = match self.domain_blocks.entry(domain.to_string()) {
            Entry::Occupied(mut last) => {
                if now.duration_since(*last.get()) < window {
                    false
                } else {
                    last.insert(now);
                    true
                }
            }
            Entry::Vacant(entry) => {
                entry.insert(now);
                true
            }
        };

        if !charge_resources {
            tracing::debug!("{} from {} within block window, keeping resources", kind, domain);
            self.identities.release(identity);
            self.egress.release(egress);
            return;
        }

        if kind.excludes_egress() {
            let cooldown = self.config.egress_cooldown();
            tracing::warn!("{} from {}: excluding egress {} for {:?}", kind, domain, egress.id, cooldown);
            self.egress.exclude(&egress.id, cooldown);
        } else {
            self.egress.release(egress);
        }

        if kind.excludes_identity() {
            let cooldown = self.config.identity_cooldown();
            tracing::warn!("{} from {}: excluding identity {} for {:?}", kind, domain, identity.id, cooldown);
            self.identities.exclude(&identity.id, cooldown);
        } else {
            self.identities.release(identity);
        }
    }

    fn state_of(&self, task: &FetchTask) -> Option<TaskState> {
        self.ledger.get(task.url.as_str()).map(|entry| entry.state)
    }

    fn transition(&self, task: &FetchTask, next: TaskState) {
        if let Some(mut entry) = self.ledger.get_mut(task.url.as_str()) {
            if !entry.state.can_transition_to(next) {
                tracing::warn!("Invalid transition for {}: {} -> {}", task.url, entry.state, next);
            }
            entry.state = next;
            entry.attempt = task.attempt;
        }
    }

    async fn finish(&self, task: &FetchTask, state: TaskState, reason: Option<String>) {
        self.transition(task, state);
        if let Some(mut entry) = self.ledger.get_mut(task.url.as_str()) {
            entry.reason = reason;
        }
        self.queue.finish();

        let finished = self.terminal_tasks.fetch_add(1, Ordering::Relaxed) + 1;
        if finished % self.config.persist_every == 0 {
            tracing::debug!("{} tasks finished, persisting state", finished);
            self.persist_state().await;
        }
    }

    /// Saves detector changes and pool exclusions on the blocking pool
    ///
    /// Only exact index entries added since the previous save are written.
    async fn persist_state(&self) {
        let Some(store) = self.store.clone() else {
            return;
        };
        let _guard = self.persist_lock.lock().await;

        let delta = self.detector.take_unsaved();
        let exclusions: Vec<_> = if self.persist_exclusions {
            [&self.identities, &self.egress]
                .into_iter()
                .map(|pool| (pool.kind(), absolute_exclusions(pool)))
                .collect()
        } else {
            Vec::new()
        };

        let saved = tokio::task::spawn_blocking(move || {
            let detector_result = store.save_detector(&delta);
            for (kind, exclusions) in &exclusions {
                if let Err(e) = store.save_exclusions(*kind, exclusions) {
                    tracing::warn!("Failed to persist {} exclusions: {}", kind, e);
                }
            }
            (detector_result, delta)
        })
        .await;

        match saved {
            Ok((Ok(()), delta)) => {
                tracing::trace!("Persisted {} new content hashes", delta.exact.len());
            }
            Ok((Err(e), delta)) => {
                tracing::warn!("Failed to persist duplicate detector state: {}", e);
                self.detector.mark_unsaved(delta.exact);
            }
            Err(e) => tracing::error!("State persistence task failed: {}", e),
        }
    }

    fn build_report(&self, status: RunStatus, elapsed: Duration) -> RunReport {
        let mut results: Vec<TaskResult> = self.ledger.iter().map(|e| e.value().clone()).collect();
        results.sort_by(|a, b| a.url.cmp(&b.url));

        let mut counts = BTreeMap::new();
        let mut failure_reasons = BTreeMap::new();
        for result in &results {
            *counts.entry(result.state).or_insert(0) += 1;
            if result.state == TaskState::Failed {
                let reason = result.reason.clone().unwrap_or_else(|| "unknown".to_string());
                *failure_reasons.entry(reason).or_insert(0) += 1;
            }
        }

        RunReport {
            status,
            counts,
            failure_reasons,
            results,
            exclusion_events: self.identities.exclusion_events() + self.egress.exclusion_events(),
            pending: self.queue.drain_pending(),
            elapsed,
        }
    }
}

/// Active exclusions of a pool with wall-clock expiry times
fn absolute_exclusions(pool: &ResourcePool) -> Vec<(String, DateTime<Utc>)> {
    let wall_now = Utc::now();
    pool.exclusions_snapshot(Instant::now())
        .into_iter()
        .filter_map(|(id, remaining)| {
            chrono::Duration::from_std(remaining)
                .ok()
                .map(|remaining| (id, wall_now + remaining))
        })
        .collect()
}

/// Re-applies exclusions saved by an earlier run to a pool
///
/// Returns the number of exclusions still active.
pub fn restore_pool_exclusions(pool: &ResourcePool, store: &dyn StateStore) -> StorageResult<usize> {
    let wall_now = Utc::now();
    let remaining: Vec<(String, Duration)> = store
        .load_exclusions(pool.kind())?
        .into_iter()
        .filter_map(|(id, expires_at)| (expires_at - wall_now).to_std().ok().map(|d| (id, d)))
        .collect();

    pool.restore_exclusions(&remaining, Instant::now());
    Ok(remaining.len())
}
