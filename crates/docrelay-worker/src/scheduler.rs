//! Task scheduler for one-shot, time-scheduled, timeout-bounded work.
//!
//! Every tick the scheduler starts the tasks that fall due within the
//! coming interval, earliest first, as long as running slots are free.
//! A task leaves the schedule when it starts and is forgotten once it
//! completes, fails or times out. Recurring work re-registers itself.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use futures::FutureExt;
use futures::future::BoxFuture;
use serde_json::Value;
use tokio::sync::watch;
use tokio::time::{Instant, MissedTickBehavior};
use tracing;

use docrelay_core::config::worker::SchedulerConfig;
use docrelay_core::result::AppResult;
use docrelay_core::types::TaskId;

use crate::clock::Clock;

/// Outcome of one task execution.
#[derive(Debug, Clone, PartialEq)]
pub enum TaskResult {
    /// The handler finished, optionally with data.
    Success(Option<Value>),
    /// The handler failed or timed out.
    Failed(String),
}

impl TaskResult {
    /// Whether the task succeeded.
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success(_))
    }
}

type TaskHandler = Box<dyn FnOnce(TaskId) -> BoxFuture<'static, TaskResult> + Send>;
type TimeoutHandler = Box<dyn FnOnce(TaskId) -> BoxFuture<'static, AppResult<()>> + Send>;

/// A unit of scheduled work.
pub struct Task {
    /// Name used in logs.
    pub name: String,
    /// When the task becomes eligible to run.
    pub scheduled_time: DateTime<Utc>,
    /// Maximum time the handler is given before the task counts as failed.
    pub timeout: Duration,
    handler: TaskHandler,
    on_timeout: Option<TimeoutHandler>,
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task")
            .field("name", &self.name)
            .field("scheduled_time", &self.scheduled_time)
            .field("timeout", &self.timeout)
            .field("on_timeout", &self.on_timeout.is_some())
            .finish()
    }
}

impl Task {
    /// Create a task running `handler` at `scheduled_time`.
    pub fn new<F, Fut>(
        name: impl Into<String>,
        scheduled_time: DateTime<Utc>,
        timeout: Duration,
        handler: F,
    ) -> Self
    where
        F: FnOnce(TaskId) -> Fut + Send + 'static,
        Fut: Future<Output = TaskResult> + Send + 'static,
    {
        Self {
            name: name.into(),
            scheduled_time,
            timeout,
            handler: Box::new(move |id| handler(id).boxed()),
            on_timeout: None,
        }
    }

    /// Callback run once if the handler does not finish within the timeout.
    /// Its errors are logged.
    pub fn on_timeout<F, Fut>(mut self, callback: F) -> Self
    where
        F: FnOnce(TaskId) -> Fut + Send + 'static,
        Fut: Future<Output = AppResult<()>> + Send + 'static,
    {
        self.on_timeout = Some(Box::new(move |id| callback(id).boxed()));
        self
    }
}

struct ScheduledTask {
    /// Registration order, breaks ties between equal scheduled times.
    seq: u64,
    task: Task,
}

#[derive(Default)]
struct SchedulerState {
    scheduled: HashMap<TaskId, ScheduledTask>,
    running: HashSet<TaskId>,
    next_seq: u64,
}

struct SchedulerInner {
    interval: Duration,
    window: TimeDelta,
    max_concurrent: usize,
    clock: Clock,
    state: Mutex<SchedulerState>,
}

/// Tick-driven scheduler with a cap on concurrently running tasks.
#[derive(Clone)]
pub struct TaskScheduler {
    inner: Arc<SchedulerInner>,
}

impl fmt::Debug for TaskScheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskScheduler")
            .field("interval", &self.inner.interval)
            .field("max_concurrent", &self.inner.max_concurrent)
            .field("scheduled", &self.scheduled_count())
            .field("running", &self.running_count())
            .finish()
    }
}

impl TaskScheduler {
    /// Create a scheduler ticking every `interval`.
    pub fn new(interval: Duration, max_concurrent: usize, clock: Clock) -> Self {
        Self {
            inner: Arc::new(SchedulerInner {
                interval,
                window: TimeDelta::from_std(interval).unwrap_or(TimeDelta::MAX),
                max_concurrent,
                clock,
                state: Mutex::new(SchedulerState::default()),
            }),
        }
    }

    /// Create a scheduler from configuration.
    pub fn from_config(config: &SchedulerConfig, clock: Clock) -> Self {
        Self::new(
            Duration::from_millis(config.interval_ms),
            config.max_concurrent_tasks,
            clock,
        )
    }

    /// Current time as seen by the scheduler.
    pub fn now(&self) -> DateTime<Utc> {
        self.inner.clock.now()
    }

    /// The clock driving this scheduler.
    pub fn clock(&self) -> Clock {
        self.inner.clock
    }

    /// Add a task to the schedule. It is not started here, even if already
    /// due; the next tick picks it up.
    pub fn register_task(&self, task: Task) -> (TaskId, DateTime<Utc>) {
        let id = TaskId::new();
        let scheduled_time = task.scheduled_time;

        tracing::info!(
            task_id = %id,
            task = %task.name,
            scheduled_time = %scheduled_time,
            "Task registered"
        );

        let mut state = self.inner.state.lock().unwrap_or_else(|e| e.into_inner());
        let seq = state.next_seq;
        state.next_seq += 1;
        state.scheduled.insert(id, ScheduledTask { seq, task });

        (id, scheduled_time)
    }

    /// Remove a task that has not started yet.
    pub fn cancel(&self, id: &TaskId) -> bool {
        let removed = self
            .inner
            .state
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .scheduled
            .remove(id)
            .is_some();
        if removed {
            tracing::debug!(task_id = %id, "Task cancelled");
        }
        removed
    }

    /// Whether a task is waiting to start.
    pub fn is_scheduled(&self, id: &TaskId) -> bool {
        self.inner
            .state
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .scheduled
            .contains_key(id)
    }

    /// Number of tasks waiting to start.
    pub fn scheduled_count(&self) -> usize {
        self.inner
            .state
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .scheduled
            .len()
    }

    /// Number of tasks currently running.
    pub fn running_count(&self) -> usize {
        self.inner
            .state
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .running
            .len()
    }

    /// Run one scheduling pass and return how many tasks were started.
    pub fn tick(&self) -> usize {
        let now = self.inner.clock.now();

        let selected: Vec<(TaskId, Task)> = {
            let mut state = self.inner.state.lock().unwrap_or_else(|e| e.into_inner());

            let available = self.inner.max_concurrent.saturating_sub(state.running.len());
            if available == 0 {
                tracing::trace!("No free task slots, skipping tick");
                return 0;
            }

            let mut due: Vec<(DateTime<Utc>, u64, TaskId)> = state
                .scheduled
                .iter()
                .filter(|(_, s)| s.task.scheduled_time - now <= self.inner.window)
                .map(|(id, s)| (s.task.scheduled_time, s.seq, *id))
                .collect();
            due.sort_unstable();
            due.truncate(available);

            due.into_iter()
                .filter_map(|(_, _, id)| {
                    let scheduled = state.scheduled.remove(&id)?;
                    state.running.insert(id);
                    Some((id, scheduled.task))
                })
                .collect()
        };

        let started = selected.len();
        for (id, task) in selected {
            let inner = Arc::clone(&self.inner);
            tokio::spawn(async move {
                inner.execute(id, task).await;
            });
        }
        started
    }

    /// Tick every interval until `shutdown` turns true or its sender is
    /// dropped. Running tasks are left to finish on their own.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> AppResult<()> {
        let mut ticker = tokio::time::interval(self.inner.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        tracing::info!(
            "Task scheduler started with interval={}ms, max_concurrent_tasks={}",
            self.inner.interval.as_millis(),
            self.inner.max_concurrent
        );

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let started = self.tick();
                    if started > 0 {
                        tracing::debug!("Tick started {} task(s)", started);
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        tracing::info!(
            "Task scheduler stopped ({} scheduled, {} running)",
            self.scheduled_count(),
            self.running_count()
        );
        Ok(())
    }
}

impl SchedulerInner {
    /// Run one task, racing its handler against the timeout.
    async fn execute(&self, id: TaskId, task: Task) -> TaskResult {
        let Task {
            name,
            timeout,
            handler,
            on_timeout,
            ..
        } = task;

        let started = Instant::now();
        tracing::info!(task_id = %id, task = %name, "Task started");

        // Spawned so that a timed-out handler keeps running detached.
        let mut handle = tokio::spawn(handler(id));

        let result = tokio::select! {
            joined = &mut handle => match joined {
                Ok(result) => result,
                Err(e) => TaskResult::Failed(format!("Task handler panicked: {e}")),
            },
            _ = tokio::time::sleep(timeout) => {
                if let Some(callback) = on_timeout {
                    let task_name = name.clone();
                    tokio::spawn(async move {
                        if let Err(e) = callback(id).await {
                            tracing::warn!(
                                task_id = %id,
                                task = %task_name,
                                "Timeout callback failed: {}",
                                e
                            );
                        }
                    });
                }
                TaskResult::Failed(format!("Task timed out after {}ms", timeout.as_millis()))
            }
        };

        self.state
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .running
            .remove(&id);

        let duration_ms = started.elapsed().as_millis() as u64;
        match &result {
            TaskResult::Success(_) => {
                tracing::info!(task_id = %id, task = %name, duration_ms, "Task completed");
            }
            TaskResult::Failed(reason) => {
                tracing::warn!(
                    task_id = %id,
                    task = %name,
                    duration_ms,
                    "Task failed: {}",
                    reason
                );
            }
        }

        result
    }
}
