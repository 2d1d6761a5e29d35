//! Persistence seam.
//!
//! Every method is a single keyed read or write; callers never rely on
//! atomicity across calls. The one exception is the per-credential sync
//! lease, which fences cursor writes across processes sharing a store.

pub mod memory;
pub mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

use crate::models::{Account, ExternalCredential, Transaction, TransactionFilter};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use service_core::error::AppError;
use uuid::Uuid;

#[async_trait]
pub trait Store: Send + Sync {
    /// Liveness of the backing store.
    async fn health_check(&self) -> Result<(), AppError>;

    // Credentials

    /// Active credentials owned by `user_id`.
    async fn find_credentials_by_user(
        &self,
        user_id: &str,
    ) -> Result<Vec<ExternalCredential>, AppError>;

    async fn find_credential_by_item_id(
        &self,
        item_id: &str,
    ) -> Result<Option<ExternalCredential>, AppError>;

    /// Insert or replace keyed by `item_id`.
    async fn upsert_credential(
        &self,
        credential: ExternalCredential,
    ) -> Result<ExternalCredential, AppError>;

    /// Take the credential's sync lease unless another holder's lease is
    /// still live at `now`. Returns whether `lease_id` now holds it.
    async fn acquire_sync_lease(
        &self,
        credential_id: Uuid,
        lease_id: Uuid,
        now: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> Result<bool, AppError>;

    /// Drop the lease if `lease_id` still holds it.
    async fn release_sync_lease(&self, credential_id: Uuid, lease_id: Uuid)
        -> Result<(), AppError>;

    /// Persist a completed sync pass: new cursor, sync time, cleared error.
    ///
    /// Only the holder of the sync lease may write; anyone else gets
    /// `AppError::Conflict` and the stored cursor is left alone.
    async fn update_credential_cursor(
        &self,
        credential_id: Uuid,
        lease_id: Uuid,
        cursor: Option<&str>,
        synced_at: DateTime<Utc>,
    ) -> Result<(), AppError>;

    /// Record a failed pass. `requires_reauth` also deactivates the credential.
    async fn record_credential_error(
        &self,
        credential_id: Uuid,
        code: &str,
        message: &str,
        requires_reauth: bool,
    ) -> Result<(), AppError>;

    // Accounts

    async fn find_account_by_external_id(
        &self,
        external_id: &str,
    ) -> Result<Option<Account>, AppError>;

    /// Insert or replace keyed by `external_id`.
    async fn upsert_account(&self, account: Account) -> Result<Account, AppError>;

    async fn list_accounts_by_user(&self, user_id: &str) -> Result<Vec<Account>, AppError>;

    // Transactions

    async fn find_transaction_by_external_id(
        &self,
        external_id: &str,
    ) -> Result<Option<Transaction>, AppError>;

    async fn find_transaction_by_id(
        &self,
        transaction_id: Uuid,
    ) -> Result<Option<Transaction>, AppError>;

    /// Insert or replace keyed by `external_id`.
    async fn upsert_transaction(&self, transaction: Transaction) -> Result<Transaction, AppError>;

    /// Returns whether a row was deleted.
    async fn delete_transaction_by_external_id(&self, external_id: &str)
        -> Result<bool, AppError>;

    /// One page of the user's transactions plus the total match count.
    async fn list_transactions(
        &self,
        user_id: &str,
        filter: &TransactionFilter,
    ) -> Result<(Vec<Transaction>, u64), AppError>;
}
