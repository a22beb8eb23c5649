//! Bounded executor — runs submitted jobs with a cap on how many are in
//! flight.
//!
//! Waiting jobs start in submission order. A slot is released when a job
//! finishes, fails or panics, and the next waiting job is started right
//! away.

use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};

use tokio::sync::{Notify, oneshot};
use tracing;

use docrelay_core::error::AppError;
use docrelay_core::result::AppResult;
use docrelay_core::types::JobId;

type BoxedJob = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

#[derive(Default)]
struct ExecutorState {
    waiting: VecDeque<(JobId, BoxedJob)>,
    running: usize,
}

struct ExecutorInner {
    name: String,
    concurrency: usize,
    state: Mutex<ExecutorState>,
    idle: Notify,
}

/// FIFO job runner with at most `concurrency` jobs running at once.
#[derive(Clone)]
pub struct BoundedExecutor {
    inner: Arc<ExecutorInner>,
}

impl std::fmt::Debug for BoundedExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BoundedExecutor")
            .field("name", &self.inner.name)
            .field("concurrency", &self.inner.concurrency)
            .field("running", &self.running())
            .field("waiting", &self.waiting())
            .finish()
    }
}

/// Completion handle of a submitted job.
///
/// Resolves to the job's own output, or to an error if the job panicked.
#[derive(Debug)]
pub struct JobHandle<T> {
    id: JobId,
    rx: oneshot::Receiver<T>,
}

impl<T> JobHandle<T> {
    /// Identifier assigned at submission.
    pub fn id(&self) -> JobId {
        self.id
    }
}

impl<T> Future for JobHandle<T> {
    type Output = AppResult<T>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let id = self.id;
        Pin::new(&mut self.rx)
            .poll(cx)
            .map(|r| r.map_err(|_| AppError::internal(format!("Job {id} aborted before completion"))))
    }
}

/// Releases a running slot when dropped, including on panic.
struct SlotGuard {
    inner: Arc<ExecutorInner>,
    job_id: JobId,
}

impl Drop for SlotGuard {
    fn drop(&mut self) {
        {
            let mut state = self.inner.state.lock().unwrap_or_else(|e| e.into_inner());
            state.running -= 1;
            if state.running == 0 && state.waiting.is_empty() {
                self.inner.idle.notify_waiters();
            }
        }
        tracing::trace!("Executor '{}' released slot of job {}", self.inner.name, self.job_id);
        ExecutorInner::dispatch(&self.inner);
    }
}

impl ExecutorInner {
    /// Start waiting jobs while slots are free.
    fn dispatch(inner: &Arc<Self>) {
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            tracing::warn!("Executor '{}' has no runtime; jobs stay queued", inner.name);
            return;
        };

        loop {
            let (job_id, job) = {
                let mut state = inner.state.lock().unwrap_or_else(|e| e.into_inner());
                if state.running >= inner.concurrency {
                    return;
                }
                match state.waiting.pop_front() {
                    Some(next) => {
                        state.running += 1;
                        next
                    }
                    None => return,
                }
            };

            let guard = SlotGuard {
                inner: Arc::clone(inner),
                job_id,
            };
            tracing::trace!("Executor '{}' starting job {}", inner.name, job_id);
            runtime.spawn(async move {
                let _guard = guard;
                job.await;
            });
        }
    }
}

impl BoundedExecutor {
    /// Create an executor allowing `concurrency` jobs in flight (minimum 1).
    pub fn new(name: impl Into<String>, concurrency: usize) -> Self {
        Self {
            inner: Arc::new(ExecutorInner {
                name: name.into(),
                concurrency: concurrency.max(1),
                state: Mutex::new(ExecutorState::default()),
                idle: Notify::new(),
            }),
        }
    }

    /// Submit a job. It starts immediately if a slot is free, otherwise
    /// after every job submitted before it has started.
    pub fn submit<F, T>(&self, job: F) -> JobHandle<T>
    where
        F: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        let id = JobId::new();
        let (tx, rx) = oneshot::channel();
        let wrapped: BoxedJob = Box::pin(async move {
            let output = job.await;
            // The caller may have dropped the handle; the job still counts.
            let _ = tx.send(output);
        });

        {
            let mut state = self.inner.state.lock().unwrap_or_else(|e| e.into_inner());
            state.waiting.push_back((id, wrapped));
        }
        ExecutorInner::dispatch(&self.inner);

        JobHandle { id, rx }
    }

    /// Maximum number of jobs in flight.
    pub fn concurrency(&self) -> usize {
        self.inner.concurrency
    }

    /// Number of jobs currently running.
    pub fn running(&self) -> usize {
        self.inner
            .state
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .running
    }

    /// Number of jobs waiting for a slot.
    pub fn waiting(&self) -> usize {
        self.inner
            .state
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .waiting
            .len()
    }

    /// Whether no job is running or waiting.
    pub fn is_idle(&self) -> bool {
        let state = self.inner.state.lock().unwrap_or_else(|e| e.into_inner());
        state.running == 0 && state.waiting.is_empty()
    }

    /// Wait until no job is running or waiting.
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

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_never_exceeds_concurrency() {
        let executor = BoundedExecutor::new("test", 3);
        let in_flight = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..10u64)
            .map(|i| {
                let in_flight = Arc::clone(&in_flight);
                let peak = Arc::clone(&peak);
                executor.submit(async move {
                    let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(10 + i % 3)).await;
                    in_flight.fetch_sub(1, Ordering::SeqCst);
                    i
                })
            })
            .collect();

        assert!(executor.running() <= 3);

        let mut results = Vec::new();
        for handle in handles {
            results.push(handle.await.unwrap());
        }

        assert_eq!(results, (0..10).collect::<Vec<_>>());
        assert_eq!(peak.load(Ordering::SeqCst), 3);
        executor.wait_idle().await;
        assert!(executor.is_idle());
    }

    #[tokio::test(start_paused = true)]
    async fn test_waiting_jobs_start_in_submission_order() {
        let executor = BoundedExecutor::new("ordered", 1);
        let order = Arc::new(Mutex::new(Vec::new()));

        let handles: Vec<_> = (0..5)
            .map(|i| {
                let order = Arc::clone(&order);
                executor.submit(async move {
                    order.lock().unwrap().push(i);
                    tokio::time::sleep(Duration::from_millis(5)).await;
                })
            })
            .collect();

        assert_eq!(executor.running(), 1);
        assert_eq!(executor.waiting(), 4);

        for handle in handles {
            handle.await.unwrap();
        }
        assert_eq!(*order.lock().unwrap(), vec![0, 1, 2, 3, 4]);
    }

    #[tokio::test]
    async fn test_failure_does_not_block_others() {
        let executor = BoundedExecutor::new("isolation", 1);

        let failing = executor.submit(async { Err::<u32, AppError>(AppError::internal("boom")) });
        let panicking = executor.submit(async {
            panic!("job panicked");
        });
        let ok = executor.submit(async { Ok::<u32, AppError>(7) });

        assert!(failing.await.unwrap().is_err());
        assert!(panicking.await.is_err());
        assert_eq!(ok.await.unwrap().unwrap(), 7);

        executor.wait_idle().await;
        assert_eq!(executor.running(), 0);
    }
}
