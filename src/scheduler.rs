// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Delayed, retriable job queues.
//!
//! Each named queue holds delayed jobs that become eligible at `run_at`,
//! get claimed by worker tasks, and retry with exponential backoff until
//! their attempts run out. Jobs can be removed while still in
//! {delayed, waiting}; an executing job cannot be cancelled.

use crate::error::ResolutionResult;
use crate::metrics::ResolutionMetrics;
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub const LIVENESS_QUEUE: &str = "liveness-monitoring";
pub const SETTLEMENT_QUEUE: &str = "settlement-processing";

pub const JOB_CHECK_LIVENESS: &str = "check-liveness";
pub const JOB_SETTLE_EVENT: &str = "settle-event";
pub const JOB_BATCH_SETTLEMENT: &str = "batch-settlement";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    Delayed,
    Waiting,
    Active,
    Completed,
    Failed,
}

#[derive(Debug, Clone)]
pub struct Job {
    pub id: u64,
    pub job_type: String,
    pub payload: serde_json::Value,
    pub state: JobState,
    /// Executions begun so far
    pub attempt: u32,
    pub max_attempts: u32,
    pub backoff_base: Duration,
    pub run_at: Instant,
}

#[derive(Debug, Clone)]
pub struct JobOptions {
    pub delay: Duration,
    pub attempts: u32,
    pub backoff_base: Duration,
}

impl Default for JobOptions {
    fn default() -> Self {
        Self {
            delay: Duration::ZERO,
            attempts: 1,
            backoff_base: Duration::from_secs(1),
        }
    }
}

#[async_trait]
pub trait JobHandler: Send + Sync {
    async fn handle(&self, job: &Job) -> ResolutionResult<()>;
}

struct QueueInner {
    name: String,
    jobs: RwLock<BTreeMap<u64, Job>>,
    next_id: AtomicU64,
    poll_interval: Duration,
    metrics: Option<Arc<ResolutionMetrics>>,
}

/// A named job queue. Cheap to clone; clones share the same job registry.
#[derive(Clone)]
pub struct JobQueue {
    inner: Arc<QueueInner>,
}

impl JobQueue {
    pub fn new(name: &str) -> Self {
        Self {
            inner: Arc::new(QueueInner {
                name: name.to_string(),
                jobs: RwLock::new(BTreeMap::new()),
                next_id: AtomicU64::new(1),
                poll_interval: Duration::from_millis(250),
                metrics: None,
            }),
        }
    }

    pub fn with_metrics(name: &str, metrics: Arc<ResolutionMetrics>) -> Self {
        Self {
            inner: Arc::new(QueueInner {
                name: name.to_string(),
                jobs: RwLock::new(BTreeMap::new()),
                next_id: AtomicU64::new(1),
                poll_interval: Duration::from_millis(250),
                metrics: Some(metrics),
            }),
        }
    }

    #[cfg(test)]
    pub(crate) fn with_poll_interval(name: &str, poll_interval: Duration) -> Self {
        Self {
            inner: Arc::new(QueueInner {
                name: name.to_string(),
                jobs: RwLock::new(BTreeMap::new()),
                next_id: AtomicU64::new(1),
                poll_interval,
                metrics: None,
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub async fn enqueue(
        &self,
        job_type: &str,
        payload: serde_json::Value,
        opts: JobOptions,
    ) -> u64 {
        let id = self.inner.next_id.fetch_add(1, Ordering::SeqCst);
        let job = Job {
            id,
            job_type: job_type.to_string(),
            payload,
            state: JobState::Delayed,
            attempt: 0,
            max_attempts: opts.attempts.max(1),
            backoff_base: opts.backoff_base,
            run_at: Instant::now() + opts.delay,
        };
        debug!(
            "[{}] Enqueued job id={} type={} delay={:?}",
            self.inner.name, id, job_type, opts.delay
        );
        self.inner.jobs.write().await.insert(id, job);
        if let Some(m) = &self.inner.metrics {
            m.jobs_enqueued.with_label_values(&[&self.inner.name]).inc();
        }
        id
    }

    /// Snapshot of jobs currently in any of the given states.
    pub async fn scan(&self, states: &[JobState]) -> Vec<Job> {
        let jobs = self.inner.jobs.read().await;
        jobs.values()
            .filter(|j| states.contains(&j.state))
            .cloned()
            .collect()
    }

    /// Remove a job. Succeeds only while the job is still in
    /// {delayed, waiting}; an active, completed or failed job stays put.
    pub async fn remove(&self, job_id: u64) -> bool {
        let mut jobs = self.inner.jobs.write().await;
        match jobs.get(&job_id) {
            Some(j) if matches!(j.state, JobState::Delayed | JobState::Waiting) => {
                jobs.remove(&job_id);
                debug!("[{}] Removed job id={}", self.inner.name, job_id);
                true
            }
            _ => false,
        }
    }

    /// Drop completed and failed jobs from the registry.
    pub async fn purge_finished(&self) -> usize {
        let mut jobs = self.inner.jobs.write().await;
        let before = jobs.len();
        jobs.retain(|_, j| !matches!(j.state, JobState::Completed | JobState::Failed));
        before - jobs.len()
    }

    /// Promote due delayed jobs and claim the earliest waiting one.
    async fn claim_next(&self) -> Option<Job> {
        let now = Instant::now();
        let mut jobs = self.inner.jobs.write().await;
        for job in jobs.values_mut() {
            if job.state == JobState::Delayed && job.run_at <= now {
                job.state = JobState::Waiting;
            }
        }
        let id = jobs
            .values()
            .filter(|j| j.state == JobState::Waiting)
            .min_by_key(|j| j.run_at)
            .map(|j| j.id)?;
        let job = jobs.get_mut(&id).expect("claimed id exists");
        job.state = JobState::Active;
        job.attempt += 1;
        Some(job.clone())
    }

    async fn finish(&self, job_id: u64, result: ResolutionResult<()>) {
        let mut jobs = self.inner.jobs.write().await;
        let Some(job) = jobs.get_mut(&job_id) else {
            return;
        };
        match result {
            Ok(()) => {
                job.state = JobState::Completed;
                if let Some(m) = &self.inner.metrics {
                    m.jobs_completed
                        .with_label_values(&[&self.inner.name])
                        .inc();
                }
            }
            Err(e) if e.is_retryable() && job.attempt < job.max_attempts => {
                // Exponential backoff on the per-enqueue base delay
                let backoff = job.backoff_base * 2u32.saturating_pow(job.attempt - 1);
                job.state = JobState::Delayed;
                job.run_at = Instant::now() + backoff;
                warn!(
                    "[{}] Job id={} type={} attempt {}/{} failed ({}), retrying in {:?}",
                    self.inner.name, job.id, job.job_type, job.attempt, job.max_attempts, e, backoff
                );
                if let Some(m) = &self.inner.metrics {
                    m.jobs_retried.with_label_values(&[&self.inner.name]).inc();
                }
            }
            Err(e) => {
                job.state = JobState::Failed;
                warn!(
                    "[{}] Job id={} type={} failed permanently after attempt {}/{}: {}",
                    self.inner.name, job.id, job.job_type, job.attempt, job.max_attempts, e
                );
                if let Some(m) = &self.inner.metrics {
                    m.jobs_failed.with_label_values(&[&self.inner.name]).inc();
                }
            }
        }
    }

    /// Spawn a worker that drains this queue until cancelled. Spawn several
    /// for parallel processing.
    pub fn run_worker(
        &self,
        handler: Arc<dyn JobHandler>,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        let queue = self.clone();
        tokio::spawn(async move {
            info!("[{}] Worker started", queue.inner.name);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        info!("[{}] Worker cancelled", queue.inner.name);
                        break;
                    }
                    _ = tokio::time::sleep(queue.inner.poll_interval) => {
                        while let Some(job) = queue.claim_next().await {
                            let result = handler.handle(&job).await;
                            queue.finish(job.id, result).await;
                            if cancel.is_cancelled() {
                                break;
                            }
                        }
                    }
                }
            }
        })
    }
}
