//! Dispatcher — turns notifications and startup scans into collect jobs,
//! and collected files into transfers.
//!
//! Collections run one at a time on a [`RetryableQueue`]; transfers run on
//! the bounded [`TransferPipeline`].

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing;

use docrelay_core::config::worker::WorkerConfig;
use docrelay_core::traits::token_store::ChangeTokenStore;
use docrelay_core::types::{AccountId, ChannelId, JobId};

use crate::accounts::AccountDirectory;
use crate::channel::ChannelRegistry;
use crate::jobs::{CollectRequest, CollectWorker, ScanMode, TransferPipeline, TransferStats};
use crate::queue::{QueueStats, RetryableQueue};

/// Resource state sent when a channel is first opened. Carries no change.
pub const SYNC_STATE: &str = "sync";

/// Combined pipeline counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatchStats {
    /// Collect queue
    pub collect: QueueStats,
    /// Transfer pipeline
    pub transfers: TransferStats,
}

struct DispatcherInner {
    accounts: Arc<AccountDirectory>,
    registry: Arc<ChannelRegistry>,
    collector: RetryableQueue<CollectRequest>,
    transfers: TransferPipeline,
}

/// Entry point for everything that should cause files to be relayed.
#[derive(Clone)]
pub struct Dispatcher {
    inner: Arc<DispatcherInner>,
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("accounts", &self.inner.accounts.len())
            .field("collector", &self.inner.collector)
            .field("transfers", &self.inner.transfers)
            .finish()
    }
}

impl Dispatcher {
    /// Create a dispatcher for the given accounts.
    pub fn new(
        accounts: Arc<AccountDirectory>,
        registry: Arc<ChannelRegistry>,
        tokens: Arc<dyn ChangeTokenStore>,
        config: &WorkerConfig,
    ) -> Self {
        let transfers = TransferPipeline::new(config.concurrency, config.max_attempts);
        let worker = CollectWorker::new(Arc::clone(&accounts), tokens, transfers.clone());
        let collector = RetryableQueue::new("collect", config.max_attempts, Arc::new(worker));

        Self {
            inner: Arc::new(DispatcherInner {
                accounts,
                registry,
                collector,
                transfers,
            }),
        }
    }

    /// Handle a change notification.
    ///
    /// Returns the id of the enqueued collect job, or `None` when the
    /// notification was ignored (sync message or unknown channel).
    pub fn notify(&self, channel_id: &ChannelId, resource_state: &str) -> Option<JobId> {
        if resource_state == SYNC_STATE {
            tracing::debug!(channel_id = %channel_id, "Ignoring sync notification");
            return None;
        }

        let Some(owner) = self.inner.registry.lookup_owner(channel_id) else {
            tracing::warn!(
                channel_id = %channel_id,
                resource_state = %resource_state,
                "Notification for unknown channel"
            );
            return None;
        };

        tracing::info!(
            channel_id = %channel_id,
            account_id = %owner,
            resource_state = %resource_state,
            "Change notification received"
        );
        Some(self.scan(owner, ScanMode::Changes))
    }

    /// Enqueue a collection for one account.
    pub fn scan(&self, account_id: AccountId, mode: ScanMode) -> JobId {
        self.inner.collector.enqueue(CollectRequest { account_id, mode })
    }

    /// Enqueue a full scan of every account.
    pub fn scan_all(&self) -> Vec<JobId> {
        let accounts = self.inner.accounts.all();
        tracing::info!("Scanning {} account(s) for unprocessed files", accounts.len());
        accounts
            .iter()
            .map(|account| self.scan(account.id(), ScanMode::All))
            .collect()
    }

    /// The channel registry notifications are matched against.
    pub fn registry(&self) -> &Arc<ChannelRegistry> {
        &self.inner.registry
    }

    /// The accounts served.
    pub fn accounts(&self) -> &Arc<AccountDirectory> {
        &self.inner.accounts
    }

    /// Snapshot of the counters.
    pub fn stats(&self) -> DispatchStats {
        DispatchStats {
            collect: self.inner.collector.stats(),
            transfers: self.inner.transfers.stats(),
        }
    }

    /// Whether no collection or transfer is queued or running.
    pub fn is_idle(&self) -> bool {
        self.inner.collector.is_idle() && self.inner.transfers.is_idle()
    }

    /// Wait until collections and the transfers they produced are done.
    pub async fn wait_idle(&self) {
        loop {
            self.inner.collector.wait_idle().await;
            self.inner.transfers.wait_idle().await;
            if self.is_idle() {
                return;
            }
        }
    }
}
