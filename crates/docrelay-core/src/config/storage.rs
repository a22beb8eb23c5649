//! Local state storage configuration.

use serde::{Deserialize, Serialize};

/// Where change tokens are kept.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenStoreKind {
    /// One text file per account under `{data_path}/tokens`.
    File,
    /// Process memory only; every restart rescans from the current log head.
    Memory,
}

/// Local state configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Root directory for all runtime data.
    #[serde(default = "default_data_path")]
    pub data_path: String,
    /// Change token backend.
    #[serde(default = "default_token_store")]
    pub token_store: TokenStoreKind,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_path: default_data_path(),
            token_store: default_token_store(),
        }
    }
}

fn default_data_path() -> String {
    "./data".to_string()
}

fn default_token_store() -> TokenStoreKind {
    TokenStoreKind::File
}
