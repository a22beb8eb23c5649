//! Executor, queue and scheduler configuration.

use serde::{Deserialize, Serialize};
use validator::Validate;

/// Transfer worker configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct WorkerConfig {
    /// Maximum number of file transfers running at once.
    #[serde(default = "default_concurrency")]
    #[validate(range(min = 1))]
    pub concurrency: usize,
    /// Attempts per job (first run included) before a retryable failure is
    /// dropped.
    #[serde(default = "default_max_attempts")]
    #[validate(range(min = 1))]
    pub max_attempts: u32,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
            max_attempts: default_max_attempts(),
        }
    }
}

/// Task scheduler configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct SchedulerConfig {
    /// Tick interval in milliseconds. Tasks due within one interval are
    /// started on the current tick.
    #[serde(default = "default_interval_ms")]
    #[validate(range(min = 10))]
    pub interval_ms: u64,
    /// Maximum number of tasks running at once.
    #[serde(default = "default_max_concurrent_tasks")]
    #[validate(range(min = 1))]
    pub max_concurrent_tasks: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            interval_ms: default_interval_ms(),
            max_concurrent_tasks: default_max_concurrent_tasks(),
        }
    }
}

fn default_concurrency() -> usize {
    4
}

fn default_max_attempts() -> u32 {
    3
}

fn default_interval_ms() -> u64 {
    1000
}

fn default_max_concurrent_tasks() -> usize {
    4
}
