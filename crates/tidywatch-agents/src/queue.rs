//! AnalysisQueueManager: priority queue feeding a fixed worker pool.
//!
//! ```text
//! enqueue ──▶ BinaryHeap<(priority, seq)> ──▶ worker × N ──▶ Semaphore (max_concurrent) ──▶ JobExecutor
//!                  ▲                                                                     │
//!                  └──────────── requeue as Retry while attempts < max_attempts ◀────────┘
//! ```
//!
//! Priority is enforced only at dequeue; equal priorities are FIFO. Shutdown
//! cancels workers cooperatively, gives in-flight jobs a grace period, then
//! aborts whatever is left and logs every job that never finished.

use std::collections::{BinaryHeap, HashMap};
use std::cmp::Ordering;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use coordination::{PrivacyLevel, QueueConfig};
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use tokio::sync::{Notify, Semaphore};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::errors::{panic_message, JobError};
use crate::lifecycle::{Lifecycle, LifecycleError};

/// Lower value is served first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobPriority {
    Manual = 1,
    HighMessiness = 2,
    Scheduled = 3,
    Retry = 4,
}

impl fmt::Display for JobPriority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Manual => write!(f, "manual"),
            Self::HighMessiness => write!(f, "high_messiness"),
            Self::Scheduled => write!(f, "scheduled"),
            Self::Retry => write!(f, "retry"),
        }
    }
}

/// Where the image comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobPayload {
    Inline(Vec<u8>),
    /// Capture the zone's camera when the job runs.
    CaptureAtExecution,
}

#[derive(Debug, Clone)]
pub struct AnalysisJob {
    pub id: Uuid,
    pub zone: String,
    pub priority: JobPriority,
    pub payload: JobPayload,
    pub privacy_override: Option<PrivacyLevel>,
    pub attempts: u32,
    /// 0 inherits the queue's `max_attempts`.
    pub max_attempts: u32,
    pub enqueued_at: DateTime<Utc>,
}

impl AnalysisJob {
    pub fn new(zone: impl Into<String>, priority: JobPriority, payload: JobPayload) -> Self {
        Self {
            id: Uuid::new_v4(),
            zone: zone.into(),
            priority,
            payload,
            privacy_override: None,
            attempts: 0,
            max_attempts: 0,
            enqueued_at: Utc::now(),
        }
    }

    pub fn with_privacy(mut self, level: PrivacyLevel) -> Self {
        self.privacy_override = Some(level);
        self
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }
}

/// Runs one job; errors make the queue retry or drop it.
#[async_trait]
pub trait JobExecutor: Send + Sync {
    async fn execute(&self, job: &AnalysisJob) -> Result<(), JobError>;
}

struct QueuedJob {
    seq: u64,
    job: AnalysisJob,
}

impl PartialEq for QueuedJob {
    fn eq(&self, other: &Self) -> bool {
        self.job.priority == other.job.priority && self.seq == other.seq
    }
}

impl Eq for QueuedJob {}

impl PartialOrd for QueuedJob {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for QueuedJob {
    // BinaryHeap pops the greatest: invert so (priority, seq) ascending wins.
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .job
            .priority
            .cmp(&self.job.priority)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

#[derive(Default)]
struct QueueState {
    heap: BinaryHeap<QueuedJob>,
    in_flight: HashMap<Uuid, String>,
}

/// Counters exposed through [`AnalysisQueueManager::stats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct QueueStats {
    pub pending: usize,
    pub in_flight: usize,
    pub completed: u64,
    pub retried: u64,
    pub dropped: u64,
    pub aborted: u64,
}

struct Shared {
    state: Mutex<QueueState>,
    work: Notify,
    idle: Notify,
    seq: AtomicU64,
    completed: AtomicU64,
    retried: AtomicU64,
    dropped: AtomicU64,
    aborted: AtomicU64,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn push(&self, job: AnalysisJob) {
        let seq = self.seq.fetch_add(1, AtomicOrdering::SeqCst);
        self.lock().heap.push(QueuedJob { seq, job });
        self.work.notify_one();
    }

    /// Pop the most urgent job and mark it in flight in one step.
    fn pop(&self) -> Option<AnalysisJob> {
        let mut state = self.lock();
        let queued = state.heap.pop()?;
        state.in_flight.insert(queued.job.id, queued.job.zone.clone());
        Some(queued.job)
    }

    async fn next_job(&self) -> AnalysisJob {
        loop {
            let notified = self.work.notified();
            if let Some(job) = self.pop() {
                return job;
            }
            notified.await;
        }
    }

    /// Clear the in-flight mark, optionally requeueing in the same critical section.
    fn finish(&self, job_id: Uuid, requeue: Option<AnalysisJob>) {
        let idle = {
            let mut state = self.lock();
            state.in_flight.remove(&job_id);
            if let Some(job) = requeue {
                let seq = self.seq.fetch_add(1, AtomicOrdering::SeqCst);
                state.heap.push(QueuedJob { seq, job });
                self.work.notify_one();
            }
            state.heap.is_empty() && state.in_flight.is_empty()
        };
        if idle {
            self.idle.notify_waiters();
        }
    }

    fn is_idle(&self) -> bool {
        let state = self.lock();
        state.heap.is_empty() && state.in_flight.is_empty()
    }
}

pub struct AnalysisQueueManager {
    shared: Arc<Shared>,
    executor: Arc<dyn JobExecutor>,
    semaphore: Arc<Semaphore>,
    cancel: CancellationToken,
    workers: tokio::sync::Mutex<JoinSet<()>>,
    config: QueueConfig,
}

impl AnalysisQueueManager {
    pub fn new(config: QueueConfig, executor: Arc<dyn JobExecutor>) -> Self {
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(QueueState::default()),
                work: Notify::new(),
                idle: Notify::new(),
                seq: AtomicU64::new(0),
                completed: AtomicU64::new(0),
                retried: AtomicU64::new(0),
                dropped: AtomicU64::new(0),
                aborted: AtomicU64::new(0),
            }),
            executor,
            semaphore: Arc::new(Semaphore::new(config.max_concurrent.max(1))),
            cancel: CancellationToken::new(),
            workers: tokio::sync::Mutex::new(JoinSet::new()),
            config,
        }
    }

    /// Token cancelled when shutdown begins.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Spawn the worker pool. Calling it again adds no workers.
    pub async fn start(&self) {
        let mut workers = self.workers.lock().await;
        if !workers.is_empty() {
            return;
        }
        for worker_id in 0..self.config.workers.max(1) {
            let shared = self.shared.clone();
            let executor = self.executor.clone();
            let semaphore = self.semaphore.clone();
            let cancel = self.cancel.clone();
            workers.spawn(worker_loop(worker_id, shared, executor, semaphore, cancel));
        }
        info!(
            workers = self.config.workers,
            max_concurrent = self.config.max_concurrent,
            "analysis queue started"
        );
    }

    /// Add a job; refused once shutdown has begun.
    pub fn enqueue(&self, mut job: AnalysisJob) -> Result<Uuid, JobError> {
        if self.cancel.is_cancelled() {
            return Err(JobError::Cancelled);
        }
        if job.max_attempts == 0 {
            job.max_attempts = self.config.max_attempts;
        }
        let id = job.id;
        debug!(job_id = %id, zone = %job.zone, priority = %job.priority, "job enqueued");
        self.shared.push(job);
        Ok(id)
    }

    pub fn stats(&self) -> QueueStats {
        let (pending, in_flight) = {
            let state = self.shared.lock();
            (state.heap.len(), state.in_flight.len())
        };
        QueueStats {
            pending,
            in_flight,
            completed: self.shared.completed.load(AtomicOrdering::SeqCst),
            retried: self.shared.retried.load(AtomicOrdering::SeqCst),
            dropped: self.shared.dropped.load(AtomicOrdering::SeqCst),
            aborted: self.shared.aborted.load(AtomicOrdering::SeqCst),
        }
    }

    /// Resolve once nothing is pending or in flight.
    pub async fn wait_idle(&self) {
        loop {
            let notified = self.shared.idle.notified();
            if self.shared.is_idle() {
                return;
            }
            notified.await;
        }
    }

    /// Stop workers, wait up to the grace period, abort the rest.
    pub async fn shutdown(&self) -> QueueStats {
        self.cancel.cancel();
        let grace = self.config.shutdown_grace();
        let mut workers = self.workers.lock().await;

        let drained = tokio::time::timeout(grace, async {
            while workers.join_next().await.is_some() {}
        })
        .await;
        if drained.is_err() {
            warn!(grace_secs = grace.as_secs(), "shutdown grace elapsed, aborting workers");
            workers.abort_all();
            while workers.join_next().await.is_some() {}
        }

        let (left_pending, left_running) = {
            let mut state = self.shared.lock();
            let pending: Vec<AnalysisJob> = state.heap.drain().map(|q| q.job).collect();
            let running: Vec<(Uuid, String)> = state.in_flight.drain().collect();
            (pending, running)
        };
        for job in &left_pending {
            warn!(job_id = %job.id, zone = %job.zone, "job aborted before it started");
        }
        for (job_id, zone) in &left_running {
            warn!(job_id = %job_id, zone = %zone, "in-flight job aborted at shutdown");
        }
        self.shared
            .aborted
            .fetch_add((left_pending.len() + left_running.len()) as u64, AtomicOrdering::SeqCst);
        self.shared.idle.notify_waiters();

        let stats = self.stats();
        info!(
            completed = stats.completed,
            dropped = stats.dropped,
            aborted = stats.aborted,
            "analysis queue stopped"
        );
        stats
    }
}

async fn worker_loop(
    worker_id: usize,
    shared: Arc<Shared>,
    executor: Arc<dyn JobExecutor>,
    semaphore: Arc<Semaphore>,
    cancel: CancellationToken,
) {
    debug!(worker_id, "worker started");
    loop {
        let mut job = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            job = shared.next_job() => job,
        };

        let permit = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                // Not started: hand it back so shutdown can account for it.
                let id = job.id;
                shared.finish(id, Some(job));
                break;
            }
            permit = semaphore.clone().acquire_owned() => match permit {
                Ok(permit) => permit,
                Err(_) => {
                    let id = job.id;
                    shared.finish(id, Some(job));
                    break;
                }
            },
        };

        let result = AssertUnwindSafe(executor.execute(&job))
            .catch_unwind()
            .await
            .unwrap_or_else(|payload| {
                Err(JobError::Execution(format!(
                    "executor panicked: {}",
                    panic_message(payload.as_ref())
                )))
            });
        drop(permit);
        job.attempts += 1;

        match result {
            Ok(()) => {
                shared.completed.fetch_add(1, AtomicOrdering::SeqCst);
                debug!(worker_id, job_id = %job.id, attempts = job.attempts, "job completed");
                shared.finish(job.id, None);
            }
            Err(e) if job.attempts < job.max_attempts => {
                shared.retried.fetch_add(1, AtomicOrdering::SeqCst);
                warn!(
                    job_id = %job.id,
                    zone = %job.zone,
                    attempt = job.attempts,
                    max_attempts = job.max_attempts,
                    error = %e,
                    "job failed, requeueing"
                );
                job.priority = JobPriority::Retry;
                let id = job.id;
                shared.finish(id, Some(job));
            }
            Err(e) => {
                shared.dropped.fetch_add(1, AtomicOrdering::SeqCst);
                let dropped = JobError::AttemptsExceeded {
                    job_id: job.id.to_string(),
                    attempts: job.attempts,
                    last_error: e.to_string(),
                };
                error!(zone = %job.zone, error = %dropped, "job dropped");
                shared.finish(job.id, None);
            }
        }
    }
    debug!(worker_id, "worker stopped");
}

#[async_trait]
impl Lifecycle for AnalysisQueueManager {
    fn name(&self) -> &'static str {
        "analysis_queue"
    }

    /// Queue sizing is fixed for the manager's lifetime.
    async fn reload(&self) -> Result<(), LifecycleError> {
        debug!(stats = ?self.stats(), "queue reload requested");
        Ok(())
    }

    async fn shutdown(&self) -> Result<(), LifecycleError> {
        AnalysisQueueManager::shutdown(self).await;
        Ok(())
    }
}
