//! Job envelope and failure classification shared by the executors.

use docrelay_core::error::AppError;
use docrelay_core::types::JobId;

/// Error from job execution
#[derive(Debug, Clone, thiserror::Error)]
pub enum JobError {
    /// Permanent failure, never retried
    #[error("Permanent job failure: {0}")]
    Permanent(String),

    /// Transient failure, may be retried
    #[error("Transient job failure: {0}")]
    Transient(String),
}

impl JobError {
    /// Whether the job may be attempted again.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transient(_))
    }
}

impl From<AppError> for JobError {
    fn from(err: AppError) -> Self {
        if err.is_retryable() {
            Self::Transient(err.to_string())
        } else {
            Self::Permanent(err.to_string())
        }
    }
}

/// A payload travelling through a queue, with its attempt counter.
#[derive(Debug, Clone)]
pub struct Job<P> {
    /// Identifier stable across retries.
    pub id: JobId,
    /// The work item.
    pub payload: P,
    /// 1-based attempt number of the upcoming (or current) run.
    pub attempt: u32,
}

impl<P> Job<P> {
    /// Wrap a payload for its first attempt.
    pub fn new(payload: P) -> Self {
        Self {
            id: JobId::new(),
            payload,
            attempt: 1,
        }
    }

    /// Advance to the next attempt.
    pub fn next_attempt(mut self) -> Self {
        self.attempt += 1;
        self
    }
}
