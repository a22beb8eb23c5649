//! Persistence of change-log checkpoints.

use async_trait::async_trait;

use crate::result::AppResult;
use crate::types::AccountId;

/// Stores the change token up to which an account's change log has been
/// consumed.
#[async_trait]
pub trait ChangeTokenStore: Send + Sync + std::fmt::Debug + 'static {
    /// Load the stored token, `None` if the account has no checkpoint yet.
    async fn load(&self, account_id: &AccountId, folder_id: &str) -> AppResult<Option<String>>;

    /// Replace the stored token.
    async fn save(&self, account_id: &AccountId, folder_id: &str, token: &str) -> AppResult<()>;
}
