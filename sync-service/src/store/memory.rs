//! In-process store.
//!
//! Used when no `DATABASE_URL` is configured and as the store behind the
//! integration tests. Semantics match [`super::PgStore`].

use super::Store;
use crate::models::{Account, ExternalCredential, Transaction, TransactionFilter};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use service_core::error::AppError;
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

struct Lease {
    lease_id: Uuid,
    expires_at: DateTime<Utc>,
}

#[derive(Default)]
struct Inner {
    credentials: HashMap<Uuid, ExternalCredential>,
    leases: HashMap<Uuid, Lease>,
    accounts: HashMap<String, Account>,
    transactions: HashMap<String, Transaction>,
}

#[derive(Default)]
pub struct MemoryStore {
    inner: RwLock<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every stored transaction ordered by external id.
    pub async fn all_transactions(&self) -> Vec<Transaction> {
        let inner = self.inner.read().await;
        let mut rows: Vec<Transaction> = inner.transactions.values().cloned().collect();
        rows.sort_by(|a, b| a.external_id.cmp(&b.external_id));
        rows
    }

    /// Every stored account ordered by external id.
    pub async fn all_accounts(&self) -> Vec<Account> {
        let inner = self.inner.read().await;
        let mut rows: Vec<Account> = inner.accounts.values().cloned().collect();
        rows.sort_by(|a, b| a.external_id.cmp(&b.external_id));
        rows
    }

    /// Credential by local id, including inactive ones.
    pub async fn credential(&self, credential_id: Uuid) -> Option<ExternalCredential> {
        self.inner
            .read()
            .await
            .credentials
            .get(&credential_id)
            .cloned()
    }
}

fn missing_credential(credential_id: Uuid) -> AppError {
    AppError::NotFound(anyhow::anyhow!("Credential {} not found", credential_id))
}

#[async_trait]
impl Store for MemoryStore {
    async fn health_check(&self) -> Result<(), AppError> {
        Ok(())
    }

    async fn find_credentials_by_user(
        &self,
        user_id: &str,
    ) -> Result<Vec<ExternalCredential>, AppError> {
        let inner = self.inner.read().await;
        let mut rows: Vec<ExternalCredential> = inner
            .credentials
            .values()
            .filter(|c| c.user_id == user_id && c.is_active)
            .cloned()
            .collect();
        rows.sort_by_key(|c| c.created_utc);
        Ok(rows)
    }

    async fn find_credential_by_item_id(
        &self,
        item_id: &str,
    ) -> Result<Option<ExternalCredential>, AppError> {
        let inner = self.inner.read().await;
        Ok(inner
            .credentials
            .values()
            .find(|c| c.item_id == item_id)
            .cloned())
    }

    async fn upsert_credential(
        &self,
        mut credential: ExternalCredential,
    ) -> Result<ExternalCredential, AppError> {
        let mut inner = self.inner.write().await;
        if let Some(existing) = inner
            .credentials
            .values()
            .find(|c| c.item_id == credential.item_id)
        {
            credential.credential_id = existing.credential_id;
            credential.created_utc = existing.created_utc;
        }
        inner
            .credentials
            .insert(credential.credential_id, credential.clone());
        Ok(credential)
    }

    async fn acquire_sync_lease(
        &self,
        credential_id: Uuid,
        lease_id: Uuid,
        now: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> Result<bool, AppError> {
        let mut inner = self.inner.write().await;
        if !inner.credentials.contains_key(&credential_id) {
            return Err(missing_credential(credential_id));
        }
        if let Some(held) = inner.leases.get(&credential_id) {
            if held.lease_id != lease_id && held.expires_at > now {
                return Ok(false);
            }
        }
        inner.leases.insert(
            credential_id,
            Lease {
                lease_id,
                expires_at,
            },
        );
        Ok(true)
    }

    async fn release_sync_lease(
        &self,
        credential_id: Uuid,
        lease_id: Uuid,
    ) -> Result<(), AppError> {
        let mut inner = self.inner.write().await;
        if inner
            .leases
            .get(&credential_id)
            .is_some_and(|held| held.lease_id == lease_id)
        {
            inner.leases.remove(&credential_id);
        }
        Ok(())
    }

    async fn update_credential_cursor(
        &self,
        credential_id: Uuid,
        lease_id: Uuid,
        cursor: Option<&str>,
        synced_at: DateTime<Utc>,
    ) -> Result<(), AppError> {
        let mut inner = self.inner.write().await;
        if !inner
            .leases
            .get(&credential_id)
            .is_some_and(|held| held.lease_id == lease_id)
        {
            return Err(AppError::Conflict(anyhow::anyhow!(
                "Sync lease for credential {} is not held",
                credential_id
            )));
        }
        let credential = inner
            .credentials
            .get_mut(&credential_id)
            .ok_or_else(|| missing_credential(credential_id))?;
        credential.cursor = cursor.map(str::to_string);
        credential.last_synced_utc = Some(synced_at);
        credential.error_code = None;
        credential.error_message = None;
        credential.updated_utc = synced_at;
        Ok(())
    }

    async fn record_credential_error(
        &self,
        credential_id: Uuid,
        code: &str,
        message: &str,
        requires_reauth: bool,
    ) -> Result<(), AppError> {
        let mut inner = self.inner.write().await;
        let credential = inner
            .credentials
            .get_mut(&credential_id)
            .ok_or_else(|| missing_credential(credential_id))?;
        credential.error_code = Some(code.to_string());
        credential.error_message = Some(message.to_string());
        if requires_reauth {
            credential.requires_reauth = true;
            credential.is_active = false;
        }
        credential.updated_utc = Utc::now();
        Ok(())
    }

    async fn find_account_by_external_id(
        &self,
        external_id: &str,
    ) -> Result<Option<Account>, AppError> {
        Ok(self.inner.read().await.accounts.get(external_id).cloned())
    }

    async fn upsert_account(&self, account: Account) -> Result<Account, AppError> {
        let mut inner = self.inner.write().await;
        inner
            .accounts
            .insert(account.external_id.clone(), account.clone());
        Ok(account)
    }

    async fn list_accounts_by_user(&self, user_id: &str) -> Result<Vec<Account>, AppError> {
        let inner = self.inner.read().await;
        let mut rows: Vec<Account> = inner
            .accounts
            .values()
            .filter(|a| a.user_id == user_id)
            .cloned()
            .collect();
        rows.sort_by(|a, b| a.name.cmp(&b.name).then(a.external_id.cmp(&b.external_id)));
        Ok(rows)
    }

    async fn find_transaction_by_external_id(
        &self,
        external_id: &str,
    ) -> Result<Option<Transaction>, AppError> {
        Ok(self
            .inner
            .read()
            .await
            .transactions
            .get(external_id)
            .cloned())
    }

    async fn find_transaction_by_id(
        &self,
        transaction_id: Uuid,
    ) -> Result<Option<Transaction>, AppError> {
        let inner = self.inner.read().await;
        Ok(inner
            .transactions
            .values()
            .find(|t| t.transaction_id == transaction_id)
            .cloned())
    }

    async fn upsert_transaction(&self, transaction: Transaction) -> Result<Transaction, AppError> {
        let mut inner = self.inner.write().await;
        inner
            .transactions
            .insert(transaction.external_id.clone(), transaction.clone());
        Ok(transaction)
    }

    async fn delete_transaction_by_external_id(
        &self,
        external_id: &str,
    ) -> Result<bool, AppError> {
        Ok(self
            .inner
            .write()
            .await
            .transactions
            .remove(external_id)
            .is_some())
    }

    async fn list_transactions(
        &self,
        user_id: &str,
        filter: &TransactionFilter,
    ) -> Result<(Vec<Transaction>, u64), AppError> {
        let inner = self.inner.read().await;
        let mut rows: Vec<Transaction> = inner
            .transactions
            .values()
            .filter(|t| t.user_id == user_id && filter.matches(t))
            .cloned()
            .collect();
        rows.sort_by(|a, b| {
            b.date
                .cmp(&a.date)
                .then(a.transaction_id.cmp(&b.transaction_id))
        });

        let total = rows.len() as u64;
        let page = rows
            .into_iter()
            .skip(filter.offset() as usize)
            .take(filter.limit() as usize)
            .collect();
        Ok((page, total))
    }
}
