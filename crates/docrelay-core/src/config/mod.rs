//! Application configuration schemas.
//!
//! All configuration structs are deserialized from TOML files via the
//! `config` crate. Each sub-module represents a logical configuration
//! section.

pub mod accounts;
pub mod app;
pub mod channel;
pub mod logging;
pub mod storage;
pub mod worker;

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

use self::accounts::{AccountConfig, DriveAccountConfig, PaperlessEndpointConfig};
use self::app::ServerConfig;
use self::channel::ChannelConfig;
use self::logging::LoggingConfig;
use self::storage::StorageConfig;
use self::worker::{SchedulerConfig, WorkerConfig};

use crate::error::AppError;

/// Root application configuration.
///
/// This struct is the top-level deserialization target for the merged
/// TOML configuration files (default.toml + explicit file + environment).
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct AppConfig {
    /// HTTP server settings.
    #[validate(nested)]
    pub server: ServerConfig,
    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,
    /// Transfer worker settings.
    #[serde(default)]
    #[validate(nested)]
    pub worker: WorkerConfig,
    /// Task scheduler settings.
    #[serde(default)]
    #[validate(nested)]
    pub scheduler: SchedulerConfig,
    /// Channel renewal settings.
    #[serde(default)]
    #[validate(nested)]
    pub channel: ChannelConfig,
    /// Local state settings.
    #[serde(default)]
    pub storage: StorageConfig,
    /// Drive accounts.
    #[serde(default)]
    #[validate(nested)]
    pub drive_accounts: Vec<DriveAccountConfig>,
    /// Paperless endpoints.
    #[serde(default)]
    #[validate(nested)]
    pub paperless_endpoints: Vec<PaperlessEndpointConfig>,
    /// Relay accounts.
    #[serde(default)]
    #[validate(nested)]
    pub accounts: Vec<AccountConfig>,
}

impl AppConfig {
    /// Load configuration from TOML files.
    ///
    /// Merges `config/default.toml` (optional), `config/{DOCRELAY_ENV}.toml`
    /// (optional, env defaults to "development"), the explicit `path`
    /// (required when given) and environment variables prefixed with
    /// `DOCRELAY__`, then validates the result.
    pub fn load(path: Option<&str>) -> Result<Self, AppError> {
        let env = std::env::var("DOCRELAY_ENV").unwrap_or_else(|_| "development".to_string());

        let mut builder = config::Config::builder()
            .add_source(config::File::with_name("config/default").required(false))
            .add_source(config::File::with_name(&format!("config/{env}")).required(false));

        if let Some(path) = path {
            builder = builder.add_source(config::File::with_name(path).required(true));
        }

        let config = builder
            .add_source(
                config::Environment::with_prefix("DOCRELAY")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .map_err(|e| AppError::configuration(format!("Failed to build config: {e}")))?;

        let app_config: Self = config
            .try_deserialize()
            .map_err(|e| AppError::configuration(format!("Failed to deserialize config: {e}")))?;

        app_config.check()?;
        Ok(app_config)
    }

    /// Run field validation and cross-reference checks.
    pub fn check(&self) -> Result<(), AppError> {
        self.validate()?;
        self.validate_references()
    }

    /// Verify that every account points at configured collaborators and
    /// that channel lifetimes leave room for renewal.
    pub fn validate_references(&self) -> Result<(), AppError> {
        let mut seen = HashSet::new();
        for account in &self.accounts {
            if !seen.insert(account.id) {
                return Err(AppError::configuration(format!(
                    "Duplicate account id {}",
                    account.id
                )));
            }

            let drive = self
                .drive_account(account.drive_account_id)
                .ok_or_else(|| {
                    AppError::configuration(format!(
                        "Account '{}' references unknown drive account {}",
                        account.name, account.drive_account_id
                    ))
                })?;

            if drive.channel_expiration_seconds <= self.channel.renew_offset_seconds {
                return Err(AppError::configuration(format!(
                    "Drive account '{}': channel_expiration_seconds ({}) must exceed renew_offset_seconds ({})",
                    drive.name, drive.channel_expiration_seconds, self.channel.renew_offset_seconds
                )));
            }

            if self
                .paperless_endpoint(account.paperless_endpoint_id)
                .is_none()
            {
                return Err(AppError::configuration(format!(
                    "Account '{}' references unknown paperless endpoint {}",
                    account.name, account.paperless_endpoint_id
                )));
            }
        }
        Ok(())
    }

    /// Find a drive account by id.
    pub fn drive_account(&self, id: Uuid) -> Option<&DriveAccountConfig> {
        self.drive_accounts.iter().find(|d| d.id == id)
    }

    /// Find a paperless endpoint by id.
    pub fn paperless_endpoint(&self, id: Uuid) -> Option<&PaperlessEndpointConfig> {
        self.paperless_endpoints.iter().find(|p| p.id == id)
    }
}
