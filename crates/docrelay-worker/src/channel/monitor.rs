//! Channel monitor — keeps one account's source folder watched by opening
//! a channel, renewing it through the task scheduler before it expires and
//! closing it on shutdown.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use chrono::TimeDelta;
use tracing;

use docrelay_core::error::AppError;
use docrelay_core::result::AppResult;
use docrelay_core::traits::storage::{ChannelSpec, CloudStorage};
use docrelay_core::types::{AccountId, ChannelId, TaskId};

use crate::scheduler::{Task, TaskResult, TaskScheduler};

use super::registry::ChannelRegistry;
use super::state::{Channel, ChannelStatus, Command, MonitorEvent, MonitorState, RenewalPolicy, transition};

/// Static settings of a monitor.
#[derive(Debug, Clone)]
pub struct MonitorSettings {
    /// Account being monitored.
    pub account_id: AccountId,
    /// Account name used in logs and task names.
    pub account_name: String,
    /// Folder to watch.
    pub folder_id: String,
    /// Notification address handed to the storage service.
    pub address: String,
    /// Requested channel lifetime.
    pub channel_expiration: TimeDelta,
    /// Renewal timing.
    pub policy: RenewalPolicy,
}

struct MonitorInner {
    settings: MonitorSettings,
    storage: Arc<dyn CloudStorage>,
    scheduler: TaskScheduler,
    registry: Arc<ChannelRegistry>,
    /// Serializes start, renew and stop for this account.
    state: tokio::sync::Mutex<MonitorState>,
    /// Snapshot of the channel receiving notifications.
    current: Mutex<Option<Channel>>,
    renewal_task: Mutex<Option<TaskId>>,
}

/// Per-account channel lifecycle driver.
#[derive(Clone)]
pub struct ChannelMonitor {
    inner: Arc<MonitorInner>,
}

impl std::fmt::Debug for ChannelMonitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChannelMonitor")
            .field("account", &self.inner.settings.account_name)
            .field("folder_id", &self.inner.settings.folder_id)
            .field("current", &self.current_channel_id())
            .finish()
    }
}

impl ChannelMonitor {
    /// Create an idle monitor.
    pub fn new(
        settings: MonitorSettings,
        storage: Arc<dyn CloudStorage>,
        scheduler: TaskScheduler,
        registry: Arc<ChannelRegistry>,
    ) -> Self {
        Self {
            inner: Arc::new(MonitorInner {
                settings,
                storage,
                scheduler,
                registry,
                state: tokio::sync::Mutex::new(MonitorState::Idle),
                current: Mutex::new(None),
                renewal_task: Mutex::new(None),
            }),
        }
    }

    /// Account this monitor belongs to.
    pub fn account_id(&self) -> AccountId {
        self.inner.settings.account_id
    }

    /// Id of the channel currently receiving notifications.
    pub fn current_channel_id(&self) -> Option<ChannelId> {
        self.current_channel().map(|c| c.channel_id)
    }

    /// The channel currently receiving notifications.
    pub fn current_channel(&self) -> Option<Channel> {
        self.inner
            .current
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Open the first channel and schedule its renewal.
    pub async fn start(&self) -> AppResult<ChannelId> {
        tracing::info!("Starting channel monitor for '{}'", self.inner.settings.account_name);
        let mut state = self.inner.state.lock().await;
        self.apply(&mut state, MonitorEvent::Start).await?;
        state
            .channel()
            .map(|c| c.channel_id)
            .ok_or_else(|| AppError::internal("Channel monitor did not become active"))
    }

    /// Replace the current channel with a new one. The old channel is
    /// closed only after the new one is open.
    pub async fn renew(&self) -> AppResult<ChannelId> {
        tracing::info!("Renewing channel for '{}'", self.inner.settings.account_name);
        let mut state = self.inner.state.lock().await;
        if !matches!(*state, MonitorState::Active(_)) {
            return Err(AppError::validation(format!(
                "Monitor for '{}' has no active channel to renew",
                self.inner.settings.account_name
            )));
        }
        self.apply(&mut state, MonitorEvent::RenewalDue).await?;
        state
            .channel()
            .map(|c| c.channel_id)
            .ok_or_else(|| AppError::internal("Channel monitor stopped during renewal"))
    }

    /// Close the monitor's channel and stop renewing.
    ///
    /// With `Some(id)`, only acts if `id` is the current channel. Failures
    /// to close the remote channel are logged, not returned.
    pub async fn stop(&self, channel_id: Option<&ChannelId>) {
        let mut state = self.inner.state.lock().await;

        if let Some(id) = channel_id {
            if state.channel().map(|c| &c.channel_id) != Some(id) {
                tracing::warn!(
                    "Channel {} is not the current channel of '{}', ignoring stop",
                    id,
                    self.inner.settings.account_name
                );
                return;
            }
        }

        tracing::info!("Stopping channel monitor for '{}'", self.inner.settings.account_name);

        let pending = self
            .inner
            .renewal_task
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some(task_id) = pending {
            self.inner.scheduler.cancel(&task_id);
        }

        // Stop only emits infallible commands.
        let _ = self.apply(&mut state, MonitorEvent::Stop).await;
    }

    /// Feed an event through the state machine and run the resulting
    /// commands, feeding open outcomes back in. Returns the first open
    /// failure.
    async fn apply(&self, state: &mut MonitorState, event: MonitorEvent) -> AppResult<()> {
        let settings = &self.inner.settings;
        let mut events = VecDeque::from([event]);
        let mut outcome = Ok(());

        while let Some(event) = events.pop_front() {
            let now = self.inner.scheduler.now();
            let next = transition(state, event, &settings.policy, now);
            *state = next.state;
            *self.inner.current.lock().unwrap_or_else(|e| e.into_inner()) =
                state.channel().cloned();

            for command in next.commands {
                match command {
                    Command::OpenChannel => match self.open_channel().await {
                        Ok(channel) => events.push_back(MonitorEvent::Opened(channel)),
                        Err(e) => {
                            tracing::error!(
                                account = %settings.account_name,
                                "Failed to open channel: {}",
                                e
                            );
                            events.push_back(MonitorEvent::OpenFailed);
                            if outcome.is_ok() {
                                outcome = Err(e);
                            }
                        }
                    },
                    Command::RegisterChannel(channel) => {
                        tracing::info!(
                            account = %settings.account_name,
                            channel_id = %channel.channel_id,
                            expiration = %channel.expiration,
                            "Channel active"
                        );
                        self.inner.registry.insert(channel);
                    }
                    Command::MarkChannel(channel_id, status) => {
                        self.inner.registry.set_status(&channel_id, status);
                    }
                    Command::UnregisterChannel(channel_id) => {
                        self.inner.registry.remove(&channel_id);
                    }
                    Command::CloseChannel(channel) => self.close_channel(&channel).await,
                    Command::ScheduleRenewal { at, timeout } => {
                        let task = self.renewal_task(at, timeout);
                        let (task_id, scheduled_time) = self.inner.scheduler.register_task(task);
                        tracing::info!(
                            account = %settings.account_name,
                            task_id = %task_id,
                            "Channel renewal scheduled at {}",
                            scheduled_time
                        );
                        let previous = self
                            .inner
                            .renewal_task
                            .lock()
                            .unwrap_or_else(|e| e.into_inner())
                            .replace(task_id);
                        if let Some(previous) = previous {
                            self.inner.scheduler.cancel(&previous);
                        }
                    }
                }
            }
        }

        outcome
    }

    fn renewal_task(&self, at: chrono::DateTime<chrono::Utc>, timeout: std::time::Duration) -> Task {
        let monitor = self.clone();
        let name = format!("channel-renewal:{}", self.inner.settings.account_name);
        Task::new(name, at, timeout, move |_| async move {
            match monitor.renew().await {
                Ok(channel_id) => {
                    TaskResult::Success(Some(serde_json::json!({ "channel_id": channel_id })))
                }
                Err(e) => TaskResult::Failed(e.to_string()),
            }
        })
    }

    async fn open_channel(&self) -> AppResult<Channel> {
        let settings = &self.inner.settings;
        let spec = ChannelSpec {
            id: ChannelId::new(),
            address: settings.address.clone(),
            expiration: self.inner.scheduler.now() + settings.channel_expiration,
        };

        let response = self.inner.storage.watch(&settings.folder_id, &spec).await?;

        Ok(Channel {
            channel_id: response.channel_id,
            resource_id: response.resource_id,
            owner: settings.account_id,
            expiration: response.expiration,
            status: ChannelStatus::Starting,
        })
    }

    async fn close_channel(&self, channel: &Channel) {
        if let Err(e) = self
            .inner
            .storage
            .stop_channel(&channel.channel_id, &channel.resource_id)
            .await
        {
            tracing::error!(
                account = %self.inner.settings.account_name,
                channel_id = %channel.channel_id,
                "Failed to stop channel: {}",
                e
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;

    use async_trait::async_trait;
    use docrelay_core::traits::storage::{ByteStream, Change, RemoteFile, WatchResponse};
    use docrelay_core::types::Page;
    use tokio::sync::watch;

    use super::*;
    use crate::clock::Clock;

    /// Storage fake that records channel calls.
    #[derive(Debug, Default)]
    struct ChannelLog {
        watched: Mutex<Vec<ChannelId>>,
        stopped: Mutex<Vec<ChannelId>>,
        fail_watch: AtomicBool,
    }

    #[async_trait]
    impl CloudStorage for ChannelLog {
        fn provider_type(&self) -> &str {
            "fake"
        }

        async fn watch(&self, _folder_id: &str, spec: &ChannelSpec) -> AppResult<WatchResponse> {
            if self.fail_watch.load(Ordering::SeqCst) {
                return Err(AppError::service_unavailable("watch unavailable"));
            }
            self.watched.lock().unwrap().push(spec.id);
            Ok(WatchResponse {
                channel_id: spec.id,
                resource_id: format!("res-{}", spec.id),
                expiration: spec.expiration,
            })
        }

        async fn stop_channel(&self, channel_id: &ChannelId, _resource_id: &str) -> AppResult<()> {
            self.stopped.lock().unwrap().push(*channel_id);
            Ok(())
        }

        async fn start_page_token(&self) -> AppResult<String> {
            Ok("1".to_string())
        }

        async fn list_changes(&self, _page_token: String) -> AppResult<Page<Change>> {
            Ok(Page::last(Vec::new()))
        }

        async fn list_files(
            &self,
            _folder_id: &str,
            _page_token: Option<String>,
        ) -> AppResult<Page<RemoteFile>> {
            Ok(Page::last(Vec::new()))
        }

        async fn move_file(&self, _file_id: &str, _from: &str, _to: &str) -> AppResult<()> {
            Ok(())
        }

        async fn get_file_content(&self, file_id: &str) -> AppResult<ByteStream> {
            Err(AppError::not_found(format!("no content for {file_id}")))
        }
    }

    struct Fixture {
        storage: Arc<ChannelLog>,
        scheduler: TaskScheduler,
        registry: Arc<ChannelRegistry>,
        monitor: ChannelMonitor,
        account: AccountId,
    }

    fn fixture(expiration_secs: i64) -> Fixture {
        let storage = Arc::new(ChannelLog::default());
        let scheduler = TaskScheduler::new(Duration::from_millis(100), 4, Clock::new());
        let registry = Arc::new(ChannelRegistry::new());
        let account = AccountId::new();
        let monitor = ChannelMonitor::new(
            MonitorSettings {
                account_id: account,
                account_name: "inbox".to_string(),
                folder_id: "src".to_string(),
                address: "https://relay.example.com/webhook".to_string(),
                channel_expiration: TimeDelta::seconds(expiration_secs),
                policy: RenewalPolicy {
                    renew_offset: Duration::from_secs(120),
                    retry_delay: Duration::from_secs(30),
                },
            },
            storage.clone(),
            scheduler.clone(),
            registry.clone(),
        );
        Fixture {
            storage,
            scheduler,
            registry,
            monitor,
            account,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_registers_channel_and_renewal() {
        let f = fixture(300);

        let channel_id = f.monitor.start().await.unwrap();

        assert_eq!(f.registry.lookup_owner(&channel_id), Some(f.account));
        assert_eq!(f.monitor.current_channel_id(), Some(channel_id));
        assert_eq!(f.scheduler.scheduled_count(), 1);
        assert_eq!(f.storage.watched.lock().unwrap().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_renewal_fires_once_and_replaces_channel() {
        let f = fixture(300);
        let (tx, rx) = watch::channel(false);
        let runner = tokio::spawn({
            let scheduler = f.scheduler.clone();
            async move { scheduler.run(rx).await }
        });

        let original = f.monitor.start().await.unwrap();

        // Renewal is due at expiration - 120s = 180s from now.
        tokio::time::sleep(Duration::from_secs(181)).await;
        for _ in 0..20 {
            tokio::task::yield_now().await;
        }

        let renewed = f.monitor.current_channel_id().unwrap();
        assert_ne!(renewed, original);
        assert_eq!(f.storage.watched.lock().unwrap().len(), 2);
        assert_eq!(*f.storage.stopped.lock().unwrap(), vec![original]);
        assert_eq!(f.registry.lookup_owner(&original), None);
        assert_eq!(f.registry.lookup_owner(&renewed), Some(f.account));
        // The replacement's own renewal is pending, nothing else.
        assert_eq!(f.scheduler.scheduled_count(), 1);

        tx.send(true).unwrap();
        runner.await.unwrap().unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_renewal_keeps_channel_and_schedules_retry() {
        let f = fixture(300);
        let original = f.monitor.start().await.unwrap();

        f.storage.fail_watch.store(true, Ordering::SeqCst);
        assert!(f.monitor.renew().await.is_err());

        assert_eq!(f.monitor.current_channel_id(), Some(original));
        assert_eq!(f.registry.lookup_owner(&original), Some(f.account));
        assert!(f.storage.stopped.lock().unwrap().is_empty());
        // Original renewal replaced by the retry.
        assert_eq!(f.scheduler.scheduled_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_closes_channel_and_cancels_renewal() {
        let f = fixture(300);
        let channel_id = f.monitor.start().await.unwrap();

        f.monitor.stop(Some(&ChannelId::new())).await;
        assert_eq!(f.monitor.current_channel_id(), Some(channel_id));

        f.monitor.stop(None).await;
        assert_eq!(f.monitor.current_channel_id(), None);
        assert_eq!(*f.storage.stopped.lock().unwrap(), vec![channel_id]);
        assert_eq!(f.registry.channel_count(), 0);
        assert_eq!(f.scheduler.scheduled_count(), 0);
        assert!(f.monitor.renew().await.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_failure_is_returned() {
        let f = fixture(300);
        f.storage.fail_watch.store(true, Ordering::SeqCst);

        let err = f.monitor.start().await.unwrap_err();
        assert!(err.is_retryable());
        assert_eq!(f.registry.channel_count(), 0);
        assert_eq!(f.scheduler.scheduled_count(), 0);
    }
}
