//! In-memory storage and sink used by the unit tests.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{TimeDelta, Utc};
use uuid::Uuid;

use docrelay_core::config::accounts::AccountConfig;
use docrelay_core::error::AppError;
use docrelay_core::result::AppResult;
use docrelay_core::traits::document::{DocumentSink, DocumentUpload};
use docrelay_core::traits::storage::{
    ByteStream, Change, ChannelSpec, CloudStorage, RemoteFile, WatchResponse,
};
use docrelay_core::types::{AccountId, ChannelId, Page};

use crate::accounts::AccountContext;

/// Changes returned per page.
const CHANGE_PAGE_SIZE: usize = 2;

/// Drive double. Change tokens are offsets into the change log.
#[derive(Debug, Default)]
pub(crate) struct FakeDrive {
    pub folders: Mutex<HashMap<String, Vec<RemoteFile>>>,
    pub changes: Mutex<Vec<Change>>,
    /// File id → transient download failures left.
    pub download_failures: Mutex<HashMap<String, u32>>,
    pub move_failures: Mutex<HashSet<String>>,
    pub moves: Mutex<Vec<(String, String, String)>>,
    pub change_requests: Mutex<Vec<String>>,
    pub download_delay: Option<Duration>,
    pub in_flight: AtomicUsize,
    pub peak_in_flight: AtomicUsize,
}

impl FakeDrive {
    pub fn with_delay(delay: Duration) -> Self {
        Self {
            download_delay: Some(delay),
            ..Default::default()
        }
    }

    pub fn add_file(&self, folder: &str, id: &str) {
        self.folders
            .lock()
            .unwrap()
            .entry(folder.to_string())
            .or_default()
            .push(RemoteFile {
                id: id.to_string(),
                name: format!("{id}.pdf"),
                mime_type: "application/pdf".to_string(),
                size_bytes: Some(16),
                created_time: Some(Utc::now()),
                modified_time: Some(Utc::now()),
            });
    }

    pub fn push_change(&self, file_id: &str, removed: bool) {
        self.changes.lock().unwrap().push(Change {
            file_id: Some(file_id.to_string()),
            removed,
            time: Some(Utc::now()),
        });
    }

    pub fn file_ids(&self, folder: &str) -> Vec<String> {
        self.folders
            .lock()
            .unwrap()
            .get(folder)
            .map(|files| files.iter().map(|f| f.id.clone()).collect())
            .unwrap_or_default()
    }
}

#[async_trait]
impl CloudStorage for FakeDrive {
    fn provider_type(&self) -> &str {
        "fake"
    }

    async fn watch(&self, _folder_id: &str, spec: &ChannelSpec) -> AppResult<WatchResponse> {
        Ok(WatchResponse {
            channel_id: spec.id,
            resource_id: "resource".to_string(),
            expiration: spec.expiration,
        })
    }

    async fn stop_channel(&self, _channel_id: &ChannelId, _resource_id: &str) -> AppResult<()> {
        Ok(())
    }

    async fn start_page_token(&self) -> AppResult<String> {
        Ok(self.changes.lock().unwrap().len().to_string())
    }

    async fn list_changes(&self, page_token: String) -> AppResult<Page<Change>> {
        self.change_requests.lock().unwrap().push(page_token.clone());
        let offset: usize = page_token
            .parse()
            .map_err(|_| AppError::validation(format!("bad page token {page_token}")))?;
        let changes = self.changes.lock().unwrap();
        let rest = changes.get(offset..).unwrap_or_default();

        if rest.len() > CHANGE_PAGE_SIZE {
            Ok(Page::with_next(
                rest[..CHANGE_PAGE_SIZE].to_vec(),
                (offset + CHANGE_PAGE_SIZE).to_string(),
            ))
        } else {
            Ok(Page {
                items: rest.to_vec(),
                next_page_token: None,
                new_start_page_token: Some(changes.len().to_string()),
            })
        }
    }

    async fn list_files(
        &self,
        folder_id: &str,
        _page_token: Option<String>,
    ) -> AppResult<Page<RemoteFile>> {
        let files = self
            .folders
            .lock()
            .unwrap()
            .get(folder_id)
            .cloned()
            .unwrap_or_default();
        Ok(Page::last(files))
    }

    async fn move_file(&self, file_id: &str, from_folder: &str, to_folder: &str) -> AppResult<()> {
        if self.move_failures.lock().unwrap().contains(file_id) {
            return Err(AppError::authorization(format!("cannot move {file_id}")));
        }
        let mut folders = self.folders.lock().unwrap();
        let source = folders.entry(from_folder.to_string()).or_default();
        let Some(pos) = source.iter().position(|f| f.id == file_id) else {
            return Err(AppError::not_found(format!("{file_id} not in {from_folder}")));
        };
        let file = source.remove(pos);
        folders.entry(to_folder.to_string()).or_default().push(file);
        self.moves.lock().unwrap().push((
            file_id.to_string(),
            from_folder.to_string(),
            to_folder.to_string(),
        ));
        Ok(())
    }

    async fn get_file_content(&self, file_id: &str) -> AppResult<ByteStream> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_in_flight.fetch_max(now, Ordering::SeqCst);
        if let Some(delay) = self.download_delay {
            tokio::time::sleep(delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        if let Some(left) = self.download_failures.lock().unwrap().get_mut(file_id) {
            if *left > 0 {
                *left -= 1;
                return Err(AppError::service_unavailable("drive returned 503"));
            }
        }

        let chunks: Vec<Result<Bytes, std::io::Error>> = vec![
            Ok(Bytes::from("content of ")),
            Ok(Bytes::from(file_id.to_string())),
        ];
        Ok(Box::pin(futures::stream::iter(chunks)))
    }
}

/// Sink double recording uploads.
#[derive(Debug, Default)]
pub(crate) struct FakeSink {
    pub uploads: Mutex<Vec<DocumentUpload>>,
    /// Transient failures to return before accepting uploads.
    pub failures_left: AtomicU32,
    pub reject: AtomicBool,
}

impl FakeSink {
    pub fn filenames(&self) -> Vec<String> {
        self.uploads
            .lock()
            .unwrap()
            .iter()
            .map(|u| u.filename.clone())
            .collect()
    }
}

#[async_trait]
impl DocumentSink for FakeSink {
    fn sink_type(&self) -> &str {
        "fake"
    }

    async fn upload_document(&self, document: DocumentUpload) -> AppResult<()> {
        if self.reject.load(Ordering::SeqCst) {
            return Err(AppError::validation("document rejected"));
        }
        let left = self.failures_left.load(Ordering::SeqCst);
        if left > 0 {
            self.failures_left.store(left - 1, Ordering::SeqCst);
            return Err(AppError::service_unavailable("paperless returned 502"));
        }
        self.uploads.lock().unwrap().push(document);
        Ok(())
    }
}

/// Account relaying `src` to `dst`.
pub(crate) fn account_context(
    name: &str,
    drive: Arc<FakeDrive>,
    sink: Arc<FakeSink>,
) -> AccountContext {
    AccountContext {
        config: AccountConfig {
            id: AccountId::new(),
            name: name.to_string(),
            drive_account_id: Uuid::new_v4(),
            paperless_endpoint_id: Uuid::new_v4(),
            source_folder_id: "src".to_string(),
            target_folder_id: "dst".to_string(),
        },
        storage: drive,
        sink,
        channel_expiration: TimeDelta::seconds(300),
    }
}
