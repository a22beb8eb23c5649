//! Change-token stores.
//!
//! [`FileTokenStore`] keeps one text file per account and source folder
//! under `{data_path}/tokens`; [`MemoryTokenStore`] keeps tokens for the
//! lifetime of the process.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use async_trait::async_trait;
use tokio::fs;
use tracing::debug;

use docrelay_core::error::{AppError, ErrorKind};
use docrelay_core::result::AppResult;
use docrelay_core::traits::token_store::ChangeTokenStore;
use docrelay_core::types::AccountId;

/// File-backed change-token store.
#[derive(Debug, Clone)]
pub struct FileTokenStore {
    dir: PathBuf,
}

impl FileTokenStore {
    /// Create a store under `{data_path}/tokens`, creating the directory.
    pub async fn new(data_path: impl AsRef<Path>) -> AppResult<Self> {
        let dir = data_path.as_ref().join("tokens");
        fs::create_dir_all(&dir).await.map_err(|e| {
            AppError::with_source(
                ErrorKind::Storage,
                format!("Failed to create token directory: {}", dir.display()),
                e,
            )
        })?;
        Ok(Self { dir })
    }

    /// Path of the token file for an account's source folder.
    pub fn token_path(&self, account_id: &AccountId, folder_id: &str) -> PathBuf {
        self.dir
            .join(format!("{account_id}.{folder_id}.change-token.txt"))
    }
}

#[async_trait]
impl ChangeTokenStore for FileTokenStore {
    async fn load(&self, account_id: &AccountId, folder_id: &str) -> AppResult<Option<String>> {
        let path = self.token_path(account_id, folder_id);
        match fs::read_to_string(&path).await {
            Ok(raw) => {
                let token = raw.trim();
                Ok((!token.is_empty()).then(|| token.to_string()))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(AppError::with_source(
                ErrorKind::Storage,
                format!("Failed to read change token: {}", path.display()),
                e,
            )),
        }
    }

    async fn save(&self, account_id: &AccountId, folder_id: &str, token: &str) -> AppResult<()> {
        let path = self.token_path(account_id, folder_id);
        // Atomic replace: write to a sibling file, then rename over.
        let tmp = path.with_extension("txt.tmp");
        fs::write(&tmp, token).await.map_err(|e| {
            AppError::with_source(
                ErrorKind::Storage,
                format!("Failed to write change token: {}", tmp.display()),
                e,
            )
        })?;
        fs::rename(&tmp, &path).await.map_err(|e| {
            AppError::with_source(
                ErrorKind::Storage,
                format!("Failed to store change token: {}", path.display()),
                e,
            )
        })?;

        debug!(account = %account_id, folder_id, "Saved change token");
        Ok(())
    }
}

/// In-memory change-token store.
#[derive(Debug, Default)]
pub struct MemoryTokenStore {
    tokens: Mutex<HashMap<(AccountId, String), String>>,
}

impl MemoryTokenStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ChangeTokenStore for MemoryTokenStore {
    async fn load(&self, account_id: &AccountId, folder_id: &str) -> AppResult<Option<String>> {
        let tokens = self.tokens.lock().unwrap_or_else(|e| e.into_inner());
        Ok(tokens.get(&(*account_id, folder_id.to_string())).cloned())
    }

    async fn save(&self, account_id: &AccountId, folder_id: &str, token: &str) -> AppResult<()> {
        let mut tokens = self.tokens.lock().unwrap_or_else(|e| e.into_inner());
        tokens.insert((*account_id, folder_id.to_string()), token.to_string());
        Ok(())
    }
}
