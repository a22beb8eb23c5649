//! File transfer — download from the source folder, upload to the
//! account's sink, move to the target folder.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Instant;

use bytes::BytesMut;
use futures::TryStreamExt;
use serde::{Deserialize, Serialize};
use tracing;

use docrelay_core::error::AppError;
use docrelay_core::traits::document::DocumentUpload;
use docrelay_core::traits::storage::RemoteFile;
use docrelay_core::types::AccountId;

use crate::accounts::AccountContext;
use crate::executor::BoundedExecutor;
use crate::job::{Job, JobError};

/// Relay one file.
///
/// Download and upload errors are classified by kind. A failed move is
/// permanent: the document is already uploaded, and running the job again
/// would upload it twice.
pub async fn transfer_file(account: &AccountContext, file: &RemoteFile) -> Result<(), JobError> {
    let stream = account.storage.get_file_content(&file.id).await?;
    let content = stream
        .try_fold(BytesMut::new(), |mut buf, chunk| async move {
            buf.extend_from_slice(&chunk);
            Ok(buf)
        })
        .await
        .map_err(|e| {
            AppError::external_service(format!("Download of '{}' interrupted: {}", file.name, e))
        })?
        .freeze();

    tracing::debug!(
        account = %account.name(),
        file_id = %file.id,
        bytes = content.len(),
        "Downloaded file"
    );

    account
        .sink
        .upload_document(DocumentUpload {
            content,
            filename: file.name.clone(),
            mime_type: file.mime_type.clone(),
            created: file.created_time,
        })
        .await?;

    account
        .storage
        .move_file(
            &file.id,
            &account.config.source_folder_id,
            &account.config.target_folder_id,
        )
        .await
        .map_err(|e| {
            JobError::Permanent(format!(
                "Uploaded '{}' but could not move it to the target folder: {}",
                file.name, e
            ))
        })?;

    Ok(())
}

/// Payload of a transfer job.
#[derive(Debug, Clone)]
pub struct TransferRequest {
    /// Account the file belongs to.
    pub account: Arc<AccountContext>,
    /// The file.
    pub file: RemoteFile,
}

/// Transfer counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferStats {
    /// Transfers currently running
    pub running: usize,
    /// Transfers waiting for a slot, including retries
    pub waiting: usize,
    /// Files relayed
    pub completed: u64,
    /// Failed attempts that were resubmitted
    pub retried: u64,
    /// Files given up on
    pub failed: u64,
    /// Submissions skipped because the file was already queued or running
    pub duplicates: u64,
}

struct PipelineInner {
    executor: BoundedExecutor,
    max_attempts: u32,
    stats: Mutex<TransferStats>,
    /// Files queued or running, released once the file is done with.
    in_flight: Mutex<HashSet<(AccountId, String)>>,
}

/// Claim on a file in the pipeline. Releases the file on drop unless it
/// is handed on to a retry.
struct InFlightClaim<'a> {
    pipeline: &'a TransferPipeline,
    key: (AccountId, String),
    retained: bool,
}

impl InFlightClaim<'_> {
    fn retain(mut self) {
        self.retained = true;
    }
}

impl Drop for InFlightClaim<'_> {
    fn drop(&mut self) {
        if !self.retained {
            self.pipeline.in_flight().remove(&self.key);
        }
    }
}

/// Transfers running on a [`BoundedExecutor`]. A retryable failure is
/// resubmitted at the tail of the wait list until `max_attempts`.
#[derive(Clone)]
pub struct TransferPipeline {
    inner: Arc<PipelineInner>,
}

impl std::fmt::Debug for TransferPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransferPipeline")
            .field("executor", &self.inner.executor)
            .field("max_attempts", &self.inner.max_attempts)
            .finish()
    }
}

impl TransferPipeline {
    /// Create a pipeline running at most `concurrency` transfers at once.
    pub fn new(concurrency: usize, max_attempts: u32) -> Self {
        Self {
            inner: Arc::new(PipelineInner {
                executor: BoundedExecutor::new("transfer", concurrency),
                max_attempts: max_attempts.max(1),
                stats: Mutex::new(TransferStats::default()),
                in_flight: Mutex::new(HashSet::new()),
            }),
        }
    }

    /// Queue a file for transfer.
    ///
    /// Returns `false` without queueing when the same file of the same
    /// account is already queued or running. Drive reports one upload as
    /// several changes, and the file stays in the source folder until its
    /// transfer has moved it.
    pub fn submit(&self, account: Arc<AccountContext>, file: RemoteFile) -> bool {
        if !self.in_flight().insert((account.id(), file.id.clone())) {
            tracing::debug!(
                account = %account.name(),
                file_id = %file.id,
                "Transfer already in flight, skipping"
            );
            self.record(|s| s.duplicates += 1);
            return false;
        }

        tracing::debug!(
            account = %account.name(),
            file_id = %file.id,
            "Transfer queued"
        );
        self.submit_job(Job::new(TransferRequest { account, file }));
        true
    }

    fn in_flight(&self) -> std::sync::MutexGuard<'_, HashSet<(AccountId, String)>> {
        self.inner.in_flight.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn submit_job(&self, job: Job<TransferRequest>) {
        let pipeline = self.clone();
        // Outcomes are recorded by the job itself; the handle is not needed.
        drop(self.inner.executor.submit(async move { pipeline.run(job).await }));
    }

    async fn run(&self, job: Job<TransferRequest>) {
        let started = Instant::now();
        let TransferRequest { account, file } = &job.payload;
        let claim = InFlightClaim {
            pipeline: self,
            key: (account.id(), file.id.clone()),
            retained: false,
        };

        match transfer_file(account, file).await {
            Ok(()) => {
                tracing::info!(
                    account = %account.name(),
                    file_id = %file.id,
                    attempt = job.attempt,
                    duration_ms = started.elapsed().as_millis() as u64,
                    "Relayed '{}'",
                    file.name
                );
                self.record(|s| s.completed += 1);
            }
            Err(e) if e.is_retryable() && job.attempt < self.inner.max_attempts => {
                tracing::warn!(
                    account = %account.name(),
                    file_id = %file.id,
                    "Transfer attempt {}/{} failed, retrying: {}",
                    job.attempt,
                    self.inner.max_attempts,
                    e
                );
                self.record(|s| s.retried += 1);
                claim.retain();
                self.submit_job(job.next_attempt());
            }
            Err(e) => {
                tracing::error!(
                    account = %account.name(),
                    file_id = %file.id,
                    attempt = job.attempt,
                    "Transfer of '{}' failed: {}",
                    file.name,
                    e
                );
                self.record(|s| s.failed += 1);
            }
        }
    }

    fn record(&self, update: impl FnOnce(&mut TransferStats)) {
        update(&mut self.inner.stats.lock().unwrap_or_else(|e| e.into_inner()));
    }

    /// Snapshot of the counters.
    pub fn stats(&self) -> TransferStats {
        let stats = *self.inner.stats.lock().unwrap_or_else(|e| e.into_inner());
        TransferStats {
            running: self.inner.executor.running(),
            waiting: self.inner.executor.waiting(),
            ..stats
        }
    }

    /// Maximum transfers in flight.
    pub fn concurrency(&self) -> usize {
        self.inner.executor.concurrency()
    }

    /// Whether nothing is running or waiting.
    pub fn is_idle(&self) -> bool {
        self.inner.executor.is_idle()
    }

    /// Wait until every queued transfer, retries included, has finished.
    pub async fn wait_idle(&self) {
        self.inner.executor.wait_idle().await
    }
}
