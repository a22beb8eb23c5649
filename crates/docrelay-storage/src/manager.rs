//! Client manager: builds and hands out the clients for every configured
//! drive account and Paperless endpoint.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tracing::info;
use uuid::Uuid;

use docrelay_core::config::AppConfig;
use docrelay_core::config::storage::TokenStoreKind;
use docrelay_core::error::AppError;
use docrelay_core::result::AppResult;
use docrelay_core::traits::document::DocumentSink;
use docrelay_core::traits::storage::CloudStorage;
use docrelay_core::traits::token_store::ChangeTokenStore;

use crate::providers::{DriveStorageProvider, PaperlessSink};
use crate::token_store::{FileTokenStore, MemoryTokenStore};

/// Default timeout for API calls (downloads override it per request).
const REQUEST_TIMEOUT_SECONDS: u64 = 60;

/// Registry of external service clients keyed by their configured id.
#[derive(Debug, Clone, Default)]
pub struct ClientManager {
    storages: HashMap<Uuid, Arc<dyn CloudStorage>>,
    sinks: HashMap<Uuid, Arc<dyn DocumentSink>>,
}

impl ClientManager {
    /// Create an empty manager.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build clients for every drive account and endpoint in the config.
    pub fn from_config(config: &AppConfig) -> AppResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECONDS))
            .build()
            .map_err(|e| AppError::internal(format!("Failed to create HTTP client: {e}")))?;

        let mut manager = Self::new();

        for drive in &config.drive_accounts {
            let provider = DriveStorageProvider::new(client.clone(), drive)?;
            manager.register_storage(drive.id, Arc::new(provider));
            info!(drive_account = %drive.name, "Registered drive account");
        }

        for endpoint in &config.paperless_endpoints {
            let sink = PaperlessSink::new(client.clone(), endpoint);
            manager.register_sink(endpoint.id, Arc::new(sink));
            info!(endpoint = %endpoint.name, "Registered paperless endpoint");
        }

        Ok(manager)
    }

    /// Register a storage client.
    pub fn register_storage(&mut self, id: Uuid, storage: Arc<dyn CloudStorage>) {
        self.storages.insert(id, storage);
    }

    /// Register a document sink.
    pub fn register_sink(&mut self, id: Uuid, sink: Arc<dyn DocumentSink>) {
        self.sinks.insert(id, sink);
    }

    /// Get a storage client by drive account id.
    pub fn storage(&self, id: &Uuid) -> AppResult<Arc<dyn CloudStorage>> {
        self.storages
            .get(id)
            .cloned()
            .ok_or_else(|| AppError::not_found(format!("Drive account {id} not found")))
    }

    /// Get a document sink by endpoint id.
    pub fn sink(&self, id: &Uuid) -> AppResult<Arc<dyn DocumentSink>> {
        self.sinks
            .get(id)
            .cloned()
            .ok_or_else(|| AppError::not_found(format!("Paperless endpoint {id} not found")))
    }
}

/// Build the change-token store selected by `storage.token_store`.
pub async fn token_store_from_config(config: &AppConfig) -> AppResult<Arc<dyn ChangeTokenStore>> {
    Ok(match config.storage.token_store {
        TokenStoreKind::File => Arc::new(FileTokenStore::new(&config.storage.data_path).await?),
        TokenStoreKind::Memory => Arc::new(MemoryTokenStore::new()),
    })
}

#[cfg(test)]
mod tests {
    use docrelay_core::config::accounts::PaperlessEndpointConfig;

    use super::*;

    #[test]
    fn test_lookup_unknown_ids() {
        let mut manager = ClientManager::new();
        let endpoint = PaperlessEndpointConfig {
            id: Uuid::new_v4(),
            name: "archive".to_string(),
            server_url: "https://paperless.example.com".to_string(),
            username: "relay".to_string(),
            password: "secret".to_string(),
        };
        manager.register_sink(
            endpoint.id,
            Arc::new(PaperlessSink::new(reqwest::Client::new(), &endpoint)),
        );

        assert!(manager.sink(&endpoint.id).is_ok());
        let err = manager.storage(&Uuid::new_v4()).unwrap_err();
        assert_eq!(err.kind, docrelay_core::error::ErrorKind::NotFound);
    }
}
