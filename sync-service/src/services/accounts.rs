//! User-facing account operations.

use crate::error::SyncError;
use crate::models::{Account, AccountPreferences, UserContext};
use crate::store::Store;
use chrono::Utc;
use service_core::error::AppError;
use std::sync::Arc;
use tracing::instrument;

#[derive(Clone)]
pub struct AccountService {
    store: Arc<dyn Store>,
}

impl AccountService {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    pub async fn list(&self, user: &UserContext) -> Result<Vec<Account>, AppError> {
        self.store.list_accounts_by_user(&user.user_id).await
    }

    /// Apply display settings and manual balance overrides.
    #[instrument(skip(self, user, preferences), fields(user_id = %user.user_id))]
    pub async fn update_preferences(
        &self,
        user: &UserContext,
        external_id: &str,
        preferences: AccountPreferences,
    ) -> Result<Account, AppError> {
        let mut account = self
            .store
            .find_account_by_external_id(external_id)
            .await?
            .filter(|a| a.user_id == user.user_id)
            .ok_or_else(|| AppError::from(SyncError::NotFound("Account")))?;

        preferences.apply(&mut account, Utc::now());
        self.store.upsert_account(account).await
    }
}
