//! Shared test helpers: in-memory Drive and Paperless doubles and a fully
//! wired relay around them.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::Router;
use axum::body::Body;
use bytes::Bytes;
use chrono::{TimeDelta, Utc};
use http::{Request, StatusCode};
use tower::ServiceExt;
use uuid::Uuid;

use docrelay_api::AppState;
use docrelay_api::router::build_router;
use docrelay_core::config::accounts::AccountConfig;
use docrelay_core::config::worker::WorkerConfig;
use docrelay_core::error::AppError;
use docrelay_core::result::AppResult;
use docrelay_core::traits::document::{DocumentSink, DocumentUpload};
use docrelay_core::traits::storage::{
    ByteStream, Change, ChannelSpec, CloudStorage, RemoteFile, WatchResponse,
};
use docrelay_core::types::{AccountId, ChannelId, Page};
use docrelay_storage::MemoryTokenStore;
use docrelay_worker::channel::{MonitorSettings, RenewalPolicy};
use docrelay_worker::{
    AccountContext, AccountDirectory, ChannelMonitor, ChannelRegistry, Clock, Dispatcher,
    TaskScheduler,
};

/// Source folder of the test account.
pub const SOURCE: &str = "inbox-folder";
/// Target folder of the test account.
pub const TARGET: &str = "done-folder";

/// In-memory Drive. Change tokens are offsets into the change log.
#[derive(Debug, Default)]
pub struct FakeDrive {
    pub folders: Mutex<HashMap<String, Vec<RemoteFile>>>,
    pub changes: Mutex<Vec<Change>>,
    pub watched: Mutex<Vec<ChannelId>>,
    pub stopped: Mutex<Vec<ChannelId>>,
    pub moves: Mutex<Vec<String>>,
    pub download_delay: Duration,
    pub in_flight: AtomicUsize,
    pub peak_in_flight: AtomicUsize,
}

impl FakeDrive {
    pub fn with_delay(download_delay: Duration) -> Self {
        Self {
            download_delay,
            ..Default::default()
        }
    }

    /// Put a file into a folder and record the change.
    pub fn upload(&self, folder: &str, id: &str) {
        self.folders
            .lock()
            .unwrap()
            .entry(folder.to_string())
            .or_default()
            .push(RemoteFile {
                id: id.to_string(),
                name: format!("{id}.pdf"),
                mime_type: "application/pdf".to_string(),
                size_bytes: None,
                created_time: Some(Utc::now()),
                modified_time: Some(Utc::now()),
            });
        self.changes.lock().unwrap().push(Change {
            file_id: Some(id.to_string()),
            removed: false,
            time: Some(Utc::now()),
        });
    }

    pub fn file_ids(&self, folder: &str) -> Vec<String> {
        let mut ids: Vec<String> = self
            .folders
            .lock()
            .unwrap()
            .get(folder)
            .map(|files| files.iter().map(|f| f.id.clone()).collect())
            .unwrap_or_default();
        ids.sort();
        ids
    }
}

#[async_trait]
impl CloudStorage for FakeDrive {
    fn provider_type(&self) -> &str {
        "fake-drive"
    }

    async fn watch(&self, _folder_id: &str, spec: &ChannelSpec) -> AppResult<WatchResponse> {
        self.watched.lock().unwrap().push(spec.id);
        Ok(WatchResponse {
            channel_id: spec.id,
            resource_id: format!("resource-{}", spec.id),
            expiration: spec.expiration,
        })
    }

    async fn stop_channel(&self, channel_id: &ChannelId, _resource_id: &str) -> AppResult<()> {
        self.stopped.lock().unwrap().push(*channel_id);
        Ok(())
    }

    async fn start_page_token(&self) -> AppResult<String> {
        Ok(self.changes.lock().unwrap().len().to_string())
    }

    async fn list_changes(&self, page_token: String) -> AppResult<Page<Change>> {
        let offset: usize = page_token
            .parse()
            .map_err(|_| AppError::validation("bad page token"))?;
        let changes = self.changes.lock().unwrap();
        Ok(Page {
            items: changes.get(offset..).unwrap_or_default().to_vec(),
            next_page_token: None,
            new_start_page_token: Some(changes.len().to_string()),
        })
    }

    async fn list_files(
        &self,
        folder_id: &str,
        _page_token: Option<String>,
    ) -> AppResult<Page<RemoteFile>> {
        Ok(Page::last(
            self.folders
                .lock()
                .unwrap()
                .get(folder_id)
                .cloned()
                .unwrap_or_default(),
        ))
    }

    async fn move_file(&self, file_id: &str, from_folder: &str, to_folder: &str) -> AppResult<()> {
        let mut folders = self.folders.lock().unwrap();
        let source = folders.entry(from_folder.to_string()).or_default();
        let pos = source
            .iter()
            .position(|f| f.id == file_id)
            .ok_or_else(|| AppError::not_found(file_id.to_string()))?;
        let file = source.remove(pos);
        folders.entry(to_folder.to_string()).or_default().push(file);
        self.moves.lock().unwrap().push(file_id.to_string());
        Ok(())
    }

    async fn get_file_content(&self, file_id: &str) -> AppResult<ByteStream> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_in_flight.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(self.download_delay).await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        let body = Bytes::from(format!("%PDF {file_id}"));
        Ok(Box::pin(futures::stream::iter(vec![Ok(body)])))
    }
}

/// In-memory Paperless.
#[derive(Debug, Default)]
pub struct FakeSink {
    pub uploads: Mutex<Vec<DocumentUpload>>,
    pub failures_left: AtomicU32,
}

impl FakeSink {
    pub fn filenames(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .uploads
            .lock()
            .unwrap()
            .iter()
            .map(|u| u.filename.clone())
            .collect();
        names.sort();
        names
    }
}

#[async_trait]
impl DocumentSink for FakeSink {
    fn sink_type(&self) -> &str {
        "fake-paperless"
    }

    async fn upload_document(&self, document: DocumentUpload) -> AppResult<()> {
        if self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(AppError::service_unavailable("paperless returned 502"));
        }
        self.uploads.lock().unwrap().push(document);
        Ok(())
    }
}

/// A relay with one account, wired the way the server wires it.
pub struct TestRelay {
    pub drive: Arc<FakeDrive>,
    pub sink: Arc<FakeSink>,
    pub account: AccountId,
    pub dispatcher: Dispatcher,
    pub scheduler: TaskScheduler,
    pub registry: Arc<ChannelRegistry>,
    pub monitor: ChannelMonitor,
    pub router: Router,
}

impl TestRelay {
    pub fn new(drive: FakeDrive, concurrency: usize) -> Self {
        let drive = Arc::new(drive);
        let sink = Arc::new(FakeSink::default());
        let account = AccountContext {
            config: AccountConfig {
                id: AccountId::new(),
                name: "inbox".to_string(),
                drive_account_id: Uuid::new_v4(),
                paperless_endpoint_id: Uuid::new_v4(),
                source_folder_id: SOURCE.to_string(),
                target_folder_id: TARGET.to_string(),
            },
            storage: drive.clone(),
            sink: sink.clone(),
            channel_expiration: TimeDelta::seconds(300),
        };
        let account_id = account.id();

        let mut accounts = AccountDirectory::new();
        accounts.insert(account.clone());

        let registry = Arc::new(ChannelRegistry::new());
        let dispatcher = Dispatcher::new(
            Arc::new(accounts),
            Arc::clone(&registry),
            Arc::new(MemoryTokenStore::new()),
            &WorkerConfig {
                concurrency,
                max_attempts: 3,
            },
        );

        let scheduler = TaskScheduler::new(Duration::from_millis(100), 4, Clock::new());
        let settings: MonitorSettings = account.monitor_settings(
            "https://relay.example.com/webhook",
            RenewalPolicy {
                renew_offset: Duration::from_secs(120),
                retry_delay: Duration::from_secs(30),
            },
        );
        let monitor = ChannelMonitor::new(
            settings,
            drive.clone(),
            scheduler.clone(),
            Arc::clone(&registry),
        );

        let router = build_router(AppState::new(dispatcher.clone()));

        Self {
            drive,
            sink,
            account: account_id,
            dispatcher,
            scheduler,
            registry,
            monitor,
            router,
        }
    }

    /// Send a request through the router.
    pub async fn request(&self, method: &str, path: &str, headers: &[(&str, String)]) -> TestResponse {
        let mut req = Request::builder().method(method).uri(path);
        for (name, value) in headers {
            req = req.header(*name, value.as_str());
        }
        let req = req.body(Body::empty()).expect("Failed to build request");

        let response = self
            .router
            .clone()
            .oneshot(req)
            .await
            .expect("Failed to send request");

        let status = response.status();
        let body_bytes = axum::body::to_bytes(response.into_body(), 1024 * 1024)
            .await
            .expect("Failed to read body");

        TestResponse {
            status,
            body: String::from_utf8_lossy(&body_bytes).into_owned(),
        }
    }

    /// Deliver a change notification as the storage service would.
    pub async fn notify(&self, channel_id: &ChannelId, state: &str) -> TestResponse {
        self.request(
            "POST",
            "/webhook",
            &[
                ("X-Goog-Channel-Id", channel_id.to_string()),
                ("X-Goog-Resource-State", state.to_string()),
                ("X-Goog-Message-Number", "1".to_string()),
            ],
        )
        .await
    }
}

/// Response from a test request
#[derive(Debug)]
pub struct TestResponse {
    /// HTTP status code
    pub status: StatusCode,
    /// Raw body
    pub body: String,
}

impl TestResponse {
    /// Body parsed as JSON.
    pub fn json(&self) -> serde_json::Value {
        serde_json::from_str(&self.body).expect("Response body is not JSON")
    }
}
