//! Cloud storage trait for the watched folders.

use std::pin::Pin;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::Stream;
use serde::{Deserialize, Serialize};

use crate::result::AppResult;
use crate::types::{ChannelId, Page};

/// A file stored in a watched folder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteFile {
    /// Storage-assigned file identifier.
    pub id: String,
    /// File name including extension.
    pub name: String,
    /// MIME type reported by the storage service.
    pub mime_type: String,
    /// Size in bytes (if reported).
    pub size_bytes: Option<u64>,
    /// Creation timestamp (if reported).
    pub created_time: Option<DateTime<Utc>>,
    /// Last modification timestamp (if reported).
    pub modified_time: Option<DateTime<Utc>>,
}

/// One entry of the storage change log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Change {
    /// The file the change refers to (absent for non-file changes).
    pub file_id: Option<String>,
    /// Whether the file was removed or is no longer accessible.
    pub removed: bool,
    /// When the change was recorded.
    pub time: Option<DateTime<Utc>>,
}

/// Parameters of a channel to open on a folder.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelSpec {
    /// Locally generated channel identifier.
    pub id: ChannelId,
    /// URL the storage service posts notifications to.
    pub address: String,
    /// Requested expiration time.
    pub expiration: DateTime<Utc>,
}

/// Channel as confirmed by the storage service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WatchResponse {
    /// Channel identifier echoed by the service.
    pub channel_id: ChannelId,
    /// Service-assigned id of the watched resource, required to stop the channel.
    pub resource_id: String,
    /// Effective expiration (the service may shorten the requested one).
    pub expiration: DateTime<Utc>,
}

/// A byte stream type used for reading file contents.
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes, std::io::Error>> + Send>>;

/// Trait for the cloud storage service holding the watched folders.
///
/// Every method may fail with a retryable error (network, rate limit, 5xx)
/// or a permanent one (auth, unknown folder); see
/// [`AppError::is_retryable`](crate::error::AppError::is_retryable).
#[async_trait]
pub trait CloudStorage: Send + Sync + std::fmt::Debug + 'static {
    /// Return the provider type name (e.g., "drive").
    fn provider_type(&self) -> &str;

    /// Open a push-notification channel on a folder.
    async fn watch(&self, folder_id: &str, spec: &ChannelSpec) -> AppResult<WatchResponse>;

    /// Close a push-notification channel.
    async fn stop_channel(&self, channel_id: &ChannelId, resource_id: &str) -> AppResult<()>;

    /// Fetch the token marking the current end of the change log.
    async fn start_page_token(&self) -> AppResult<String>;

    /// List one page of changes recorded since `page_token`.
    ///
    /// The last page carries `new_start_page_token`.
    async fn list_changes(&self, page_token: String) -> AppResult<Page<Change>>;

    /// List one page of the non-folder, non-trashed files in a folder.
    async fn list_files(
        &self,
        folder_id: &str,
        page_token: Option<String>,
    ) -> AppResult<Page<RemoteFile>>;

    /// Move a file from one parent folder to another.
    async fn move_file(&self, file_id: &str, from_folder: &str, to_folder: &str) -> AppResult<()>;

    /// Download the content of a file.
    async fn get_file_content(&self, file_id: &str) -> AppResult<ByteStream>;
}
