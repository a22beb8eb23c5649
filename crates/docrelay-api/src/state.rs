//! Application state shared across all handlers and middleware.

use std::sync::Arc;
use std::time::Instant;

use docrelay_worker::{ChannelRegistry, Dispatcher};

/// Application state passed to every Axum handler via `State<AppState>`.
#[derive(Debug, Clone)]
pub struct AppState {
    /// Receives matched notifications
    pub dispatcher: Dispatcher,
    /// Server start, for uptime reporting
    pub started_at: Instant,
}

impl AppState {
    /// Create state for a server starting now.
    pub fn new(dispatcher: Dispatcher) -> Self {
        Self {
            dispatcher,
            started_at: Instant::now(),
        }
    }

    /// Channels notifications are matched against.
    pub fn registry(&self) -> &Arc<ChannelRegistry> {
        self.dispatcher.registry()
    }
}
