//! Webhook receiver for change notifications.
//!
//! Every request is acknowledged with `200 OK`, whatever it contains, so
//! the storage service never retries or disables the channel because of
//! us.

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use tracing;

use docrelay_core::types::ChannelId;

use crate::state::AppState;

/// Header carrying the id of the channel the notification belongs to.
pub const CHANNEL_ID_HEADER: &str = "x-goog-channel-id";
/// Header carrying the resource state (`sync`, `add`, `update`, ...).
pub const RESOURCE_STATE_HEADER: &str = "x-goog-resource-state";
/// Header carrying the notification sequence number.
pub const MESSAGE_NUMBER_HEADER: &str = "x-goog-message-number";

/// Channel id and resource state of a notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    /// Channel the notification was sent on.
    pub channel_id: ChannelId,
    /// Reported resource state.
    pub resource_state: String,
}

/// Read the notification headers. Returns `None` when either header is
/// missing or the channel id is not one of ours.
pub fn parse_notification(headers: &HeaderMap) -> Option<Notification> {
    let header = |name: &str| headers.get(name).and_then(|v| v.to_str().ok());

    let raw_channel = header(CHANNEL_ID_HEADER)?;
    let resource_state = header(RESOURCE_STATE_HEADER)?;

    let channel_id = match raw_channel.parse::<ChannelId>() {
        Ok(id) => id,
        Err(e) => {
            tracing::warn!(channel_id = %raw_channel, "Malformed channel id: {}", e);
            return None;
        }
    };

    Some(Notification {
        channel_id,
        resource_state: resource_state.to_string(),
    })
}

/// POST /webhook
pub async fn receive(State(state): State<AppState>, headers: HeaderMap) -> (StatusCode, &'static str) {
    match parse_notification(&headers) {
        Some(notification) => {
            tracing::debug!(
                channel_id = %notification.channel_id,
                resource_state = %notification.resource_state,
                message_number = ?headers.get(MESSAGE_NUMBER_HEADER),
                "Webhook received"
            );
            state
                .dispatcher
                .notify(&notification.channel_id, &notification.resource_state);
        }
        None => tracing::warn!("Webhook without usable notification headers"),
    }

    (StatusCode::OK, "OK")
}
