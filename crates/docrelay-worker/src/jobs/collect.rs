//! Change collection — works out which files of an account's source folder
//! need relaying and hands each to the transfer pipeline.

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing;

use docrelay_core::result::AppResult;
use docrelay_core::traits::storage::RemoteFile;
use docrelay_core::traits::token_store::ChangeTokenStore;
use docrelay_core::types::{AccountId, collect_pages, paginate};

use crate::accounts::{AccountContext, AccountDirectory};
use crate::job::{Job, JobError};
use crate::queue::JobWorker;

use super::transfer::TransferPipeline;

/// Which files a collection considers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScanMode {
    /// Every file in the source folder. Processed files are moved out, so
    /// whatever is left has not been relayed yet.
    All,
    /// Files of the source folder changed since the stored change token.
    Changes,
}

impl fmt::Display for ScanMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::All => write!(f, "all"),
            Self::Changes => write!(f, "changes"),
        }
    }
}

/// Payload of a collect job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CollectRequest {
    /// Account to scan.
    pub account_id: AccountId,
    /// Scan mode.
    pub mode: ScanMode,
}

/// List the files an account needs relayed.
///
/// A change scan advances the stored change token only after the folder
/// listing succeeded. A full scan resets the token to the current head, so
/// the next change scan only sees what happened after it.
pub async fn collect_files(
    account: &AccountContext,
    tokens: &dyn ChangeTokenStore,
    mode: ScanMode,
) -> AppResult<Vec<RemoteFile>> {
    let folder = account.config.source_folder_id.as_str();

    match mode {
        ScanMode::All => {
            let head = account.storage.start_page_token().await?;
            let files = list_folder(account, folder).await?;
            tokens.save(&account.id(), folder, &head).await?;
            Ok(files)
        }
        ScanMode::Changes => {
            let token = match tokens.load(&account.id(), folder).await? {
                Some(token) => token,
                None => {
                    tracing::info!(
                        account = %account.name(),
                        "No stored change token, starting from the current head"
                    );
                    account.storage.start_page_token().await?
                }
            };

            let storage = Arc::clone(&account.storage);
            let changes = collect_pages(paginate(Some(token), move |page_token| {
                let storage = Arc::clone(&storage);
                async move { storage.list_changes(page_token.unwrap_or_default()).await }
            }))
            .await?;

            let changed: HashSet<String> = changes
                .items
                .into_iter()
                .filter(|c| !c.removed)
                .filter_map(|c| c.file_id)
                .collect();

            let files = if changed.is_empty() {
                Vec::new()
            } else {
                list_folder(account, folder)
                    .await?
                    .into_iter()
                    .filter(|f| changed.contains(&f.id))
                    .collect()
            };

            match changes.new_start_page_token {
                Some(next) => tokens.save(&account.id(), folder, &next).await?,
                None => tracing::warn!(
                    account = %account.name(),
                    "Change listing ended without a new start token"
                ),
            }

            Ok(files)
        }
    }
}

async fn list_folder(account: &AccountContext, folder: &str) -> AppResult<Vec<RemoteFile>> {
    let storage = Arc::clone(&account.storage);
    let folder_id = folder.to_string();
    let listing = collect_pages(paginate(None, move |page_token| {
        let storage = Arc::clone(&storage);
        let folder_id = folder_id.clone();
        async move { storage.list_files(&folder_id, page_token).await }
    }))
    .await?;

    tracing::debug!(
        account = %account.name(),
        pages = listing.pages,
        "Listed {} file(s) in source folder",
        listing.items.len()
    );
    Ok(listing.items)
}

/// Queue worker running collections and feeding the transfer pipeline.
#[derive(Debug, Clone)]
pub struct CollectWorker {
    accounts: Arc<AccountDirectory>,
    tokens: Arc<dyn ChangeTokenStore>,
    transfers: TransferPipeline,
}

impl CollectWorker {
    /// Create a worker.
    pub fn new(
        accounts: Arc<AccountDirectory>,
        tokens: Arc<dyn ChangeTokenStore>,
        transfers: TransferPipeline,
    ) -> Self {
        Self {
            accounts,
            tokens,
            transfers,
        }
    }
}

#[async_trait]
impl JobWorker<CollectRequest> for CollectWorker {
    async fn process(&self, job: &Job<CollectRequest>) -> Result<(), JobError> {
        let request = job.payload;
        let account = self.accounts.get(&request.account_id).ok_or_else(|| {
            JobError::Permanent(format!("Unknown account {}", request.account_id))
        })?;

        let files = collect_files(&account, self.tokens.as_ref(), request.mode).await?;

        tracing::info!(
            account = %account.name(),
            mode = %request.mode,
            attempt = job.attempt,
            "Collected {} file(s) to relay",
            files.len()
        );

        for file in files {
            self.transfers.submit(Arc::clone(&account), file);
        }
        Ok(())
    }
}
