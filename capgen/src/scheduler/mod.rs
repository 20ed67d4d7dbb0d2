//! Job admission, status table, and the fixed worker pool.
//!
//! Admission is governed by a synchronized counter bounding queued plus
//! running jobs at `worker_count + queue_depth`; beyond that, submission is
//! rejected. Each worker owns at most one job at a time, and only the
//! owning worker mutates a running job's record. The one exception is
//! cancellation of a still-queued job, which the scheduler settles directly
//! because no worker owns it yet.

pub mod purge;

use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::sync::{Notify, Semaphore};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::ServiceConfig;
use crate::job::{FailureKind, Job, JobError, JobId, JobOptions, JobState};
use crate::notify::WebhookNotifier;
use crate::pipeline::PipelineCoordinator;
use crate::resources::ResourceManager;
use crate::{Error, Result};

const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Queue and pool gauges for observability.
#[derive(Debug, Clone, Copy)]
pub struct PoolStats {
    pub queue_length: usize,
    pub queue_depth: usize,
    pub active_workers: usize,
    pub worker_count: usize,
}

pub struct JobScheduler {
    config: Arc<ServiceConfig>,
    coordinator: PipelineCoordinator,
    notifier: WebhookNotifier,
    /// Authoritative job records.
    table: Arc<DashMap<JobId, Job>>,
    /// FIFO wait queue of admitted, unstarted jobs.
    queue: Mutex<VecDeque<JobId>>,
    queue_notify: Notify,
    cancel_tokens: DashMap<JobId, CancellationToken>,
    /// Worker slots.
    slots: Arc<Semaphore>,
    /// Jobs admitted and not yet terminal (queued + running).
    admitted: AtomicUsize,
    shutdown: CancellationToken,
    workers: Mutex<Option<JoinSet<()>>>,
}

impl JobScheduler {
    pub fn new(config: Arc<ServiceConfig>, resources: Arc<ResourceManager>) -> Arc<Self> {
        let coordinator = PipelineCoordinator::new(config.clone(), resources);
        let notifier = WebhookNotifier::new(config.webhook_retries);
        Arc::new(Self {
            slots: Arc::new(Semaphore::new(config.worker_count)),
            coordinator,
            notifier,
            table: Arc::new(DashMap::new()),
            queue: Mutex::new(VecDeque::new()),
            queue_notify: Notify::new(),
            cancel_tokens: DashMap::new(),
            admitted: AtomicUsize::new(0),
            shutdown: CancellationToken::new(),
            workers: Mutex::new(Some(JoinSet::new())),
            config,
        })
    }

    /// Shared view of the status table, for the retention purge task.
    pub fn table(&self) -> Arc<DashMap<JobId, Job>> {
        self.table.clone()
    }

    /// Admit a job or reject with `PoolSaturated`.
    pub fn submit(&self, input: PathBuf, options: JobOptions) -> Result<Job> {
        let capacity = self.config.worker_count + self.config.queue_depth;
        let admitted = self
            .admitted
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| {
                (n < capacity).then_some(n + 1)
            });
        if admitted.is_err() {
            return Err(Error::PoolSaturated {
                slots: self.config.worker_count,
                queue_depth: self.config.queue_depth,
            });
        }

        let job = Job::new(input, options);
        let id = job.id;
        self.table.insert(id, job.clone());
        self.cancel_tokens.insert(id, CancellationToken::new());
        self.queue.lock().push_back(id);
        self.queue_notify.notify_one();

        info!(job_id = %id, input = %job.input.display(), "job admitted");
        Ok(job)
    }

    /// Snapshot of a job's current record.
    pub fn status(&self, id: JobId) -> Result<Job> {
        self.table
            .get(&id)
            .map(|j| j.value().clone())
            .ok_or_else(|| Error::not_found("job", id.to_string()))
    }

    /// Cancel a job. Queued jobs settle immediately; running jobs are
    /// signalled and settle cooperatively at the next safe checkpoint.
    pub fn cancel(&self, id: JobId) -> Result<()> {
        let mut entry = self
            .table
            .get_mut(&id)
            .ok_or_else(|| Error::not_found("job", id.to_string()))?;
        if entry.state.is_terminal() {
            return Err(Error::AlreadyTerminal { id: id.to_string() });
        }

        // Signal first so a mid-stage external process is interrupted.
        if let Some(token) = self.cancel_tokens.get(&id) {
            token.cancel();
        }

        if entry.state == JobState::Queued {
            // Pull it from the wait queue; if a worker already claimed it,
            // the cancelled token settles it through the worker instead.
            let removed = {
                let mut queue = self.queue.lock();
                let before = queue.len();
                queue.retain(|queued| *queued != id);
                before != queue.len()
            };
            if removed {
                let result = entry.fail(JobError {
                    kind: FailureKind::Cancelled,
                    message: "cancelled by user".to_string(),
                });
                let snapshot = entry.value().clone();
                drop(entry);
                if let Err(e) = result {
                    warn!(job_id = %id, "failed to settle queued cancellation: {e}");
                }
                self.admitted.fetch_sub(1, Ordering::SeqCst);
                self.cancel_tokens.remove(&id);
                self.notifier.notify_terminal(&snapshot);
                info!(job_id = %id, "queued job cancelled");
                return Ok(());
            }
        }

        info!(job_id = %id, "cancellation requested");
        Ok(())
    }

    pub fn stats(&self) -> PoolStats {
        PoolStats {
            queue_length: self.queue.lock().len(),
            queue_depth: self.config.queue_depth,
            active_workers: self.config.worker_count - self.slots.available_permits(),
            worker_count: self.config.worker_count,
        }
    }

    /// Start the fixed worker pool.
    pub fn start(self: &Arc<Self>) {
        info!(workers = self.config.worker_count, "starting worker pool");
        let mut workers = self.workers.lock();
        if let Some(ref mut join_set) = *workers {
            for worker_index in 0..self.config.worker_count {
                let scheduler = self.clone();
                join_set.spawn(async move {
                    scheduler.worker_loop(worker_index).await;
                });
            }
        }
    }

    async fn worker_loop(&self, worker_index: usize) {
        debug!(worker = worker_index, "worker started");
        loop {
            if self.shutdown.is_cancelled() {
                break;
            }

            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                _ = self.queue_notify.notified() => {}
                _ = tokio::time::sleep(POLL_INTERVAL) => {}
            }

            // One slot per running job; released only after cleanup, which
            // the coordinator performs before returning.
            let permit = match self.slots.clone().try_acquire_owned() {
                Ok(permit) => permit,
                Err(_) => continue,
            };

            let Some(id) = self.queue.lock().pop_front() else {
                drop(permit);
                continue;
            };

            let already_terminal = self
                .table
                .get(&id)
                .map(|j| j.state.is_terminal())
                .unwrap_or(true);
            if already_terminal {
                // Settled elsewhere (queued-state cancellation).
                drop(permit);
                continue;
            }

            let cancel = self
                .cancel_tokens
                .get(&id)
                .map(|t| t.value().clone())
                .unwrap_or_default();

            debug!(worker = worker_index, job_id = %id, "worker picked up job");
            self.coordinator.run(id, &self.table, &cancel).await;

            self.admitted.fetch_sub(1, Ordering::SeqCst);
            self.cancel_tokens.remove(&id);
            if let Some(job) = self.table.get(&id).map(|j| j.value().clone()) {
                self.notifier.notify_terminal(&job);
            }
            drop(permit);
        }
        debug!(worker = worker_index, "worker stopped");
    }

    /// Stop the pool and wait for in-flight jobs to settle.
    pub async fn stop(&self) {
        info!("stopping worker pool");
        self.shutdown.cancel();

        let join_set = {
            let mut workers = self.workers.lock();
            workers.take()
        };
        if let Some(mut join_set) = join_set {
            while join_set.join_next().await.is_some() {}
        }
        info!("worker pool stopped");
    }
}
