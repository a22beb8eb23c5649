//! Notification channel lifecycle configuration.

use serde::{Deserialize, Serialize};
use validator::Validate;

/// Channel renewal timing.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct ChannelConfig {
    /// How long before expiry a replacement channel is opened.
    #[serde(default = "default_renew_offset")]
    #[validate(range(min = 1))]
    pub renew_offset_seconds: u64,
    /// Delay before retrying a failed renewal.
    #[serde(default = "default_renewal_retry")]
    #[validate(range(min = 1))]
    pub renewal_retry_seconds: u64,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            renew_offset_seconds: default_renew_offset(),
            renewal_retry_seconds: default_renewal_retry(),
        }
    }
}

fn default_renew_offset() -> u64 {
    120
}

fn default_renewal_retry() -> u64 {
    30
}
