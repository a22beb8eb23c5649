//! Retryable queue — strict FIFO, one job at a time, with bounded retry of
//! transient failures.
//!
//! A retried job goes back to the tail of the queue so the jobs queued
//! behind it run first.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::Notify;
use tracing;

use docrelay_core::types::JobId;

use crate::job::{Job, JobError};

/// Handler invoked for every job taken off a [`RetryableQueue`].
#[async_trait]
pub trait JobWorker<P>: Send + Sync + 'static {
    /// Process one job.
    async fn process(&self, job: &Job<P>) -> Result<(), JobError>;
}

/// Queue statistics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueStats {
    /// Jobs waiting, including re-queued retries
    pub pending: usize,
    /// Jobs that finished successfully
    pub completed: u64,
    /// Failed attempts that were re-queued
    pub retried: u64,
    /// Jobs dropped after a permanent failure or too many attempts
    pub dropped: u64,
}

struct QueueState<P> {
    jobs: VecDeque<Job<P>>,
    processing: bool,
    stats: QueueStats,
}

struct QueueInner<P> {
    name: String,
    max_attempts: u32,
    worker: Arc<dyn JobWorker<P>>,
    state: Mutex<QueueState<P>>,
    idle: Notify,
}

/// FIFO queue processed by a single drain task.
pub struct RetryableQueue<P> {
    inner: Arc<QueueInner<P>>,
}

impl<P> Clone for RetryableQueue<P> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<P> std::fmt::Debug for RetryableQueue<P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryableQueue")
            .field("name", &self.inner.name)
            .field("max_attempts", &self.inner.max_attempts)
            .finish()
    }
}

enum Outcome {
    Completed,
    Retry,
    Dropped,
}

impl<P: Send + Sync + 'static> RetryableQueue<P> {
    /// Create a queue that attempts each job at most `max_attempts` times
    /// (minimum 1).
    pub fn new(name: impl Into<String>, max_attempts: u32, worker: Arc<dyn JobWorker<P>>) -> Self {
        Self {
            inner: Arc::new(QueueInner {
                name: name.into(),
                max_attempts: max_attempts.max(1),
                worker,
                state: Mutex::new(QueueState {
                    jobs: VecDeque::new(),
                    processing: false,
                    stats: QueueStats::default(),
                }),
                idle: Notify::new(),
            }),
        }
    }

    /// Append a payload to the tail and start draining if idle.
    pub fn enqueue(&self, payload: P) -> JobId {
        let job = Job::new(payload);
        let id = job.id;

        let start_drain = {
            let mut state = self.inner.state.lock().unwrap_or_else(|e| e.into_inner());
            state.jobs.push_back(job);
            !std::mem::replace(&mut state.processing, true)
        };

        tracing::debug!("Queue '{}' enqueued job {}", self.inner.name, id);

        if start_drain {
            let inner = Arc::clone(&self.inner);
            tokio::spawn(async move { inner.drain().await });
        }
        id
    }

    /// Snapshot of the counters.
    pub fn stats(&self) -> QueueStats {
        let state = self.inner.state.lock().unwrap_or_else(|e| e.into_inner());
        QueueStats {
            pending: state.jobs.len(),
            ..state.stats
        }
    }

    /// Whether nothing is queued or being processed.
    pub fn is_idle(&self) -> bool {
        let state = self.inner.state.lock().unwrap_or_else(|e| e.into_inner());
        !state.processing && state.jobs.is_empty()
    }

    /// Wait until the queue has been drained.
    pub async fn wait_idle(&self) {
        loop {
            let notified = self.inner.idle.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.is_idle() {
                return;
            }
            notified.await;
        }
    }
}

impl<P: Send + Sync + 'static> QueueInner<P> {
    async fn drain(self: Arc<Self>) {
        loop {
            let job = {
                let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
                match state.jobs.pop_front() {
                    Some(job) => job,
                    None => {
                        state.processing = false;
                        self.idle.notify_waiters();
                        return;
                    }
                }
            };

            let job_id = job.id;
            let attempt = job.attempt;
            let worker = Arc::clone(&self.worker);
            // A panicking worker must not take the drain loop down with it.
            let joined = tokio::spawn(async move {
                let result = worker.process(&job).await;
                (job, result)
            })
            .await;

            let (outcome, job) = match joined {
                Ok((_, Ok(()))) => {
                    tracing::debug!(
                        "Queue '{}' job {} completed (attempt {})",
                        self.name,
                        job_id,
                        attempt
                    );
                    (Outcome::Completed, None)
                }
                Ok((job, Err(JobError::Transient(msg)))) if attempt < self.max_attempts => {
                    tracing::warn!(
                        "Queue '{}' job {} failed (transient, attempt {}/{}): {}",
                        self.name,
                        job_id,
                        attempt,
                        self.max_attempts,
                        msg
                    );
                    (Outcome::Retry, Some(job.next_attempt()))
                }
                Ok((_, Err(JobError::Transient(msg)))) => {
                    tracing::error!(
                        "Queue '{}' job {} dropped after {} attempts: {}",
                        self.name,
                        job_id,
                        attempt,
                        msg
                    );
                    (Outcome::Dropped, None)
                }
                Ok((_, Err(JobError::Permanent(msg)))) => {
                    tracing::error!(
                        "Queue '{}' job {} failed permanently: {}",
                        self.name,
                        job_id,
                        msg
                    );
                    (Outcome::Dropped, None)
                }
                Err(e) => {
                    tracing::error!("Queue '{}' job {} panicked: {}", self.name, job_id, e);
                    (Outcome::Dropped, None)
                }
            };

            let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
            match outcome {
                Outcome::Completed => state.stats.completed += 1,
                Outcome::Retry => state.stats.retried += 1,
                Outcome::Dropped => state.stats.dropped += 1,
            }
            if let Some(job) = job {
                state.jobs.push_back(job);
            }
        }
    }
}
