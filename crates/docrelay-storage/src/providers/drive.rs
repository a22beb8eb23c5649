//! Google Drive v3 client.
//!
//! Implements [`CloudStorage`] over the REST API: folder listing, the
//! change log, push-notification channels, file moves and downloads.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::TryStreamExt;
use reqwest::{Client, RequestBuilder};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, info};

use docrelay_core::config::accounts::DriveAccountConfig;
use docrelay_core::error::AppError;
use docrelay_core::result::AppResult;
use docrelay_core::traits::storage::{
    ByteStream, Change, ChannelSpec, CloudStorage, RemoteFile, WatchResponse,
};
use docrelay_core::types::{ChannelId, Page};

use crate::auth::{DRIVE_SCOPE, ServiceAccountAuth};
use crate::http::{check_response, map_reqwest_error};

/// Public Drive API root.
pub const DRIVE_API_BASE: &str = "https://www.googleapis.com/drive/v3";

const FOLDER_MIME_TYPE: &str = "application/vnd.google-apps.folder";
const PAGE_SIZE: &str = "100";
const FILE_FIELDS: &str =
    "nextPageToken, files(id, name, size, properties, mimeType, createdTime, modifiedTime)";
const CHANGE_FIELDS: &str = "nextPageToken, newStartPageToken, changes(fileId, removed, time)";

/// How requests to the Drive API are authorized.
#[derive(Debug)]
pub enum DriveAuth {
    /// Tokens minted from service-account credentials.
    ServiceAccount(Box<ServiceAccountAuth>),
    /// A fixed bearer token (emulators, local testing).
    Bearer(String),
}

impl DriveAuth {
    async fn token(&self) -> AppResult<String> {
        match self {
            Self::ServiceAccount(auth) => auth.access_token().await,
            Self::Bearer(token) => Ok(token.clone()),
        }
    }
}

/// Google Drive storage provider.
#[derive(Debug, Clone)]
pub struct DriveStorageProvider {
    client: Client,
    base_url: String,
    auth: Arc<DriveAuth>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct WatchRequest<'a> {
    id: String,
    #[serde(rename = "type")]
    kind: &'a str,
    address: &'a str,
    payload: bool,
    expiration: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WatchResponseBody {
    id: Option<String>,
    resource_id: Option<String>,
    expiration: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StartPageTokenBody {
    start_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ChangeListBody {
    #[serde(default)]
    changes: Vec<ChangeBody>,
    next_page_token: Option<String>,
    new_start_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ChangeBody {
    file_id: Option<String>,
    #[serde(default)]
    removed: bool,
    time: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FileListBody {
    #[serde(default)]
    files: Vec<FileBody>,
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FileBody {
    id: Option<String>,
    name: Option<String>,
    mime_type: Option<String>,
    size: Option<String>,
    created_time: Option<DateTime<Utc>>,
    modified_time: Option<DateTime<Utc>>,
}

impl TryFrom<FileBody> for RemoteFile {
    type Error = AppError;

    fn try_from(body: FileBody) -> Result<Self, Self::Error> {
        let id = body
            .id
            .ok_or_else(|| AppError::external_service("Drive returned a file without id"))?;
        let name = body
            .name
            .ok_or_else(|| AppError::external_service(format!("File {id} has no name")))?;
        let mime_type = body
            .mime_type
            .ok_or_else(|| AppError::external_service(format!("File {id} has no mime type")))?;

        Ok(RemoteFile {
            size_bytes: body.size.and_then(|s| s.parse().ok()),
            created_time: body.created_time,
            modified_time: body.modified_time,
            id,
            name,
            mime_type,
        })
    }
}

impl DriveStorageProvider {
    /// Create a provider for a configured drive account.
    pub fn new(client: Client, account: &DriveAccountConfig) -> AppResult<Self> {
        let auth = ServiceAccountAuth::new(client.clone(), &account.credentials, DRIVE_SCOPE)?;
        Ok(Self::with_base_url(
            client,
            DRIVE_API_BASE,
            DriveAuth::ServiceAccount(Box::new(auth)),
        ))
    }

    /// Create a provider against a custom API root.
    pub fn with_base_url(client: Client, base_url: &str, auth: DriveAuth) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            auth: Arc::new(auth),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path)
    }

    async fn send(&self, context: &str, request: RequestBuilder) -> AppResult<reqwest::Response> {
        let token = self.auth.token().await?;
        let response = request
            .bearer_auth(token)
            .send()
            .await
            .map_err(|e| map_reqwest_error(context, e))?;
        check_response(context, response).await
    }

    async fn send_json<T: serde::de::DeserializeOwned>(
        &self,
        context: &str,
        request: RequestBuilder,
    ) -> AppResult<T> {
        self.send(context, request)
            .await?
            .json()
            .await
            .map_err(|e| map_reqwest_error(context, e))
    }
}

fn parse_expiration(raw: Option<&str>) -> AppResult<DateTime<Utc>> {
    raw.and_then(|s| s.parse::<i64>().ok())
        .and_then(DateTime::from_timestamp_millis)
        .ok_or_else(|| AppError::external_service("Channel start failed: expiration not set"))
}

#[async_trait]
impl CloudStorage for DriveStorageProvider {
    fn provider_type(&self) -> &str {
        "drive"
    }

    async fn watch(&self, folder_id: &str, spec: &ChannelSpec) -> AppResult<WatchResponse> {
        let body = WatchRequest {
            id: spec.id.to_string(),
            kind: "web_hook",
            address: &spec.address,
            payload: true,
            expiration: spec.expiration.timestamp_millis().to_string(),
        };

        let response: WatchResponseBody = self
            .send_json(
                "Failed to open channel",
                self.client
                    .post(self.url(&format!("files/{folder_id}/watch")))
                    .json(&body),
            )
            .await?;

        let channel_id = response
            .id
            .as_deref()
            .and_then(|id| id.parse::<ChannelId>().ok())
            .ok_or_else(|| AppError::external_service("Channel start failed: id not set"))?;
        let resource_id = response
            .resource_id
            .ok_or_else(|| AppError::external_service("Channel start failed: resource id not set"))?;
        let expiration = parse_expiration(response.expiration.as_deref())?;

        info!(
            channel_id = %channel_id,
            folder_id,
            expiration = %expiration,
            "Channel opened"
        );

        Ok(WatchResponse {
            channel_id,
            resource_id,
            expiration,
        })
    }

    async fn stop_channel(&self, channel_id: &ChannelId, resource_id: &str) -> AppResult<()> {
        self.send(
            "Failed to stop channel",
            self.client
                .post(self.url("channels/stop"))
                .json(&json!({ "id": channel_id.to_string(), "resourceId": resource_id })),
        )
        .await?;

        info!(channel_id = %channel_id, "Channel stopped");
        Ok(())
    }

    async fn start_page_token(&self) -> AppResult<String> {
        let body: StartPageTokenBody = self
            .send_json(
                "Failed to get start page token",
                self.client.get(self.url("changes/startPageToken")),
            )
            .await?;

        body.start_page_token
            .ok_or_else(|| AppError::external_service("Start page token missing from response"))
    }

    async fn list_changes(&self, page_token: String) -> AppResult<Page<Change>> {
        let body: ChangeListBody = self
            .send_json(
                "Failed to list changes",
                self.client.get(self.url("changes")).query(&[
                    ("pageToken", page_token.as_str()),
                    ("spaces", "drive"),
                    ("includeRemoved", "true"),
                    ("pageSize", PAGE_SIZE),
                    ("fields", CHANGE_FIELDS),
                ]),
            )
            .await?;

        debug!(count = body.changes.len(), "Listed changes");

        Ok(Page {
            items: body
                .changes
                .into_iter()
                .map(|c| Change {
                    file_id: c.file_id,
                    removed: c.removed,
                    time: c.time,
                })
                .collect(),
            next_page_token: body.next_page_token,
            new_start_page_token: body.new_start_page_token,
        })
    }

    async fn list_files(
        &self,
        folder_id: &str,
        page_token: Option<String>,
    ) -> AppResult<Page<RemoteFile>> {
        let query = format!(
            "'{folder_id}' in parents and trashed = false and mimeType != '{FOLDER_MIME_TYPE}'"
        );

        let mut request = self.client.get(self.url("files")).query(&[
            ("q", query.as_str()),
            ("fields", FILE_FIELDS),
            ("orderBy", "modifiedTime desc"),
            ("pageSize", PAGE_SIZE),
        ]);
        if let Some(token) = page_token.as_deref() {
            request = request.query(&[("pageToken", token)]);
        }

        let body: FileListBody = self.send_json("Failed to list files", request).await?;

        let items = body
            .files
            .into_iter()
            .map(RemoteFile::try_from)
            .collect::<AppResult<Vec<_>>>()?;

        debug!(folder_id, count = items.len(), "Listed files");

        Ok(Page {
            items,
            next_page_token: body.next_page_token,
            new_start_page_token: None,
        })
    }

    async fn move_file(&self, file_id: &str, from_folder: &str, to_folder: &str) -> AppResult<()> {
        self.send(
            "Failed to move file",
            self.client
                .patch(self.url(&format!("files/{file_id}")))
                .query(&[("addParents", to_folder), ("removeParents", from_folder)])
                .json(&json!({})),
        )
        .await?;

        debug!(file_id, from_folder, to_folder, "Moved file");
        Ok(())
    }

    async fn get_file_content(&self, file_id: &str) -> AppResult<ByteStream> {
        let response = self
            .send(
                "Failed to download file",
                self.client
                    .get(self.url(&format!("files/{file_id}")))
                    .query(&[("alt", "media")])
                    .timeout(Duration::from_secs(300)),
            )
            .await?;

        Ok(Box::pin(
            response.bytes_stream().map_err(std::io::Error::other),
        ))
    }
}
