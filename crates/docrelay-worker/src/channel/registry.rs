//! Channel registry — the channels currently able to deliver
//! notifications, keyed by channel id.
//!
//! Written only by channel monitors; everything else gets read access.

use dashmap::DashMap;

use docrelay_core::types::{AccountId, ChannelId};

use super::state::{Channel, ChannelStatus};

/// Registry of open channels.
#[derive(Debug, Default)]
pub struct ChannelRegistry {
    /// Channel id → channel.
    channels: DashMap<ChannelId, Channel>,
}

impl ChannelRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds or replaces a channel.
    pub(crate) fn insert(&self, channel: Channel) {
        self.channels.insert(channel.channel_id, channel);
    }

    /// Updates a channel's status.
    pub(crate) fn set_status(&self, channel_id: &ChannelId, status: ChannelStatus) {
        if let Some(mut channel) = self.channels.get_mut(channel_id) {
            channel.status = status;
        }
    }

    /// Removes a channel.
    pub(crate) fn remove(&self, channel_id: &ChannelId) -> Option<Channel> {
        self.channels.remove(channel_id).map(|(_, channel)| channel)
    }

    /// Returns the account owning a channel.
    pub fn lookup_owner(&self, channel_id: &ChannelId) -> Option<AccountId> {
        self.channels.get(channel_id).map(|c| c.owner)
    }

    /// Returns a copy of a channel.
    pub fn get(&self, channel_id: &ChannelId) -> Option<Channel> {
        self.channels.get(channel_id).map(|c| c.clone())
    }

    /// Returns all channels of an account.
    pub fn channels_of(&self, owner: &AccountId) -> Vec<Channel> {
        self.channels
            .iter()
            .filter(|c| c.owner == *owner)
            .map(|c| c.clone())
            .collect()
    }

    /// Returns total number of registered channels.
    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }
}
