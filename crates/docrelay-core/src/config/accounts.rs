//! Drive accounts, Paperless endpoints and the relay accounts joining them.

use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

use crate::types::AccountId;

/// Service-account credentials for the Drive API.
#[derive(Clone, Serialize, Deserialize, Validate)]
pub struct ServiceAccountCredentials {
    /// Service account e-mail, used as the JWT issuer.
    #[validate(length(min = 1))]
    pub client_email: String,
    /// PEM-encoded RSA private key.
    #[validate(length(min = 1))]
    pub private_key: String,
    /// OAuth token endpoint.
    #[serde(default = "default_token_uri")]
    #[validate(url)]
    pub token_uri: String,
}

impl std::fmt::Debug for ServiceAccountCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceAccountCredentials")
            .field("client_email", &self.client_email)
            .field("private_key", &"<redacted>")
            .field("token_uri", &self.token_uri)
            .finish()
    }
}

/// A Google Drive account the relay reads from.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct DriveAccountConfig {
    /// Unique identifier referenced by [`AccountConfig::drive_account_id`].
    pub id: Uuid,
    /// Display name.
    pub name: String,
    /// Lifetime requested for each notification channel.
    #[serde(default = "default_channel_expiration")]
    #[validate(range(min = 60))]
    pub channel_expiration_seconds: u64,
    /// API credentials.
    #[validate(nested)]
    pub credentials: ServiceAccountCredentials,
}

/// A Paperless server the relay uploads to.
#[derive(Clone, Serialize, Deserialize, Validate)]
pub struct PaperlessEndpointConfig {
    /// Unique identifier referenced by [`AccountConfig::paperless_endpoint_id`].
    pub id: Uuid,
    /// Display name.
    pub name: String,
    /// Base URL of the Paperless server.
    #[validate(url)]
    pub server_url: String,
    /// Basic auth user.
    #[validate(length(min = 1))]
    pub username: String,
    /// Basic auth password.
    pub password: String,
}

impl std::fmt::Debug for PaperlessEndpointConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PaperlessEndpointConfig")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("server_url", &self.server_url)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// One relay: a watched source folder, the folder processed files are moved
/// to, and the endpoint their content is uploaded to.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct AccountConfig {
    /// Unique identifier.
    pub id: AccountId,
    /// Display name used in logs.
    pub name: String,
    /// Drive account holding both folders.
    pub drive_account_id: Uuid,
    /// Destination endpoint.
    pub paperless_endpoint_id: Uuid,
    /// Folder that is watched and scanned.
    #[validate(length(min = 1))]
    pub source_folder_id: String,
    /// Folder uploaded files are moved into.
    #[validate(length(min = 1))]
    pub target_folder_id: String,
}

fn default_channel_expiration() -> u64 {
    300
}

fn default_token_uri() -> String {
    "https://oauth2.googleapis.com/token".to_string()
}
