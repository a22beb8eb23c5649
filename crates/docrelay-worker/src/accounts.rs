//! Resolved accounts: each configured relay joined with the clients it
//! reads from and uploads to.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::TimeDelta;

use docrelay_core::config::AppConfig;
use docrelay_core::config::accounts::AccountConfig;
use docrelay_core::error::AppError;
use docrelay_core::result::AppResult;
use docrelay_core::traits::document::DocumentSink;
use docrelay_core::traits::storage::CloudStorage;
use docrelay_core::types::AccountId;
use docrelay_storage::ClientManager;

use crate::channel::{MonitorSettings, RenewalPolicy};

/// Everything needed to work on one account.
#[derive(Debug, Clone)]
pub struct AccountContext {
    /// The account's configuration.
    pub config: AccountConfig,
    /// Client of the drive account holding the folders.
    pub storage: Arc<dyn CloudStorage>,
    /// Upload target.
    pub sink: Arc<dyn DocumentSink>,
    /// Requested lifetime of notification channels.
    pub channel_expiration: TimeDelta,
}

impl AccountContext {
    /// Account id.
    pub fn id(&self) -> AccountId {
        self.config.id
    }

    /// Account name.
    pub fn name(&self) -> &str {
        &self.config.name
    }

    /// Monitor settings for this account's source folder.
    pub fn monitor_settings(&self, address: impl Into<String>, policy: RenewalPolicy) -> MonitorSettings {
        MonitorSettings {
            account_id: self.config.id,
            account_name: self.config.name.clone(),
            folder_id: self.config.source_folder_id.clone(),
            address: address.into(),
            channel_expiration: self.channel_expiration,
            policy,
        }
    }
}

/// Lookup of account contexts, in configuration order.
#[derive(Debug, Clone, Default)]
pub struct AccountDirectory {
    order: Vec<AccountId>,
    accounts: HashMap<AccountId, Arc<AccountContext>>,
}

impl AccountDirectory {
    /// Create an empty directory.
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolve every configured account against the client manager.
    pub fn from_config(config: &AppConfig, clients: &ClientManager) -> AppResult<Self> {
        let mut directory = Self::new();

        for account in &config.accounts {
            let drive = config.drive_account(account.drive_account_id).ok_or_else(|| {
                AppError::configuration(format!(
                    "Account '{}' references unknown drive account {}",
                    account.name, account.drive_account_id
                ))
            })?;

            let channel_expiration = i64::try_from(drive.channel_expiration_seconds)
                .map(TimeDelta::seconds)
                .map_err(|_| {
                    AppError::configuration(format!(
                        "Channel expiration of drive account '{}' is out of range",
                        drive.name
                    ))
                })?;

            directory.insert(AccountContext {
                config: account.clone(),
                storage: clients.storage(&account.drive_account_id)?,
                sink: clients.sink(&account.paperless_endpoint_id)?,
                channel_expiration,
            });
        }

        Ok(directory)
    }

    /// Add an account, replacing one with the same id.
    pub fn insert(&mut self, context: AccountContext) {
        let id = context.id();
        if self.accounts.insert(id, Arc::new(context)).is_none() {
            self.order.push(id);
        }
    }

    /// Find an account.
    pub fn get(&self, id: &AccountId) -> Option<Arc<AccountContext>> {
        self.accounts.get(id).cloned()
    }

    /// All accounts in insertion order.
    pub fn all(&self) -> Vec<Arc<AccountContext>> {
        self.order
            .iter()
            .filter_map(|id| self.accounts.get(id).cloned())
            .collect()
    }

    /// Number of accounts.
    pub fn len(&self) -> usize {
        self.order.len()
    }

    /// Whether there are no accounts.
    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}
