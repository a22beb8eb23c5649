//! Background execution for DocRelay.
//!
//! This crate provides:
//! - A bounded executor and a retryable FIFO queue for jobs
//! - A tick-driven task scheduler with per-task timeouts
//! - Channel monitors that keep each account's folder watched
//! - The dispatcher turning notifications into collections and transfers

pub mod accounts;
pub mod channel;
pub mod clock;
pub mod dispatcher;
pub mod executor;
pub mod job;
pub mod jobs;
pub mod queue;
pub mod scheduler;

#[cfg(test)]
pub(crate) mod testing;

pub use accounts::{AccountContext, AccountDirectory};
pub use channel::{ChannelMonitor, ChannelRegistry};
pub use clock::Clock;
pub use dispatcher::{DispatchStats, Dispatcher};
pub use executor::BoundedExecutor;
pub use queue::RetryableQueue;
pub use scheduler::{Task, TaskResult, TaskScheduler};
