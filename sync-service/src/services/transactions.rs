//! User-facing transaction operations.
//!
//! Every operation is scoped to the caller; rows owned by someone else behave
//! as if they did not exist.

use crate::error::SyncError;
use crate::models::{
    NewTransaction, Pagination, Transaction, TransactionFilter, TransactionPageResult,
    TransactionUpdate, UserContext,
};
use crate::store::Store;
use chrono::Utc;
use service_core::error::AppError;
use std::sync::Arc;
use tracing::{info, instrument};
use uuid::Uuid;

fn not_found() -> AppError {
    SyncError::NotFound("Transaction").into()
}

#[derive(Clone)]
pub struct TransactionService {
    store: Arc<dyn Store>,
}

impl TransactionService {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    #[instrument(skip(self, user, filter), fields(user_id = %user.user_id))]
    pub async fn list(
        &self,
        user: &UserContext,
        filter: &TransactionFilter,
    ) -> Result<TransactionPageResult, AppError> {
        let (data, total) = self.store.list_transactions(&user.user_id, filter).await?;
        let pagination = Pagination {
            page: filter.page(),
            limit: filter.limit(),
            total,
            has_more: filter.offset() + (data.len() as u64) < total,
        };
        Ok(TransactionPageResult { data, pagination })
    }

    #[instrument(skip(self, user, request), fields(user_id = %user.user_id))]
    pub async fn create(
        &self,
        user: &UserContext,
        request: NewTransaction,
    ) -> Result<Transaction, AppError> {
        if request.name.trim().is_empty() {
            return Err(AppError::BadRequest(anyhow::anyhow!("name is required")));
        }

        let transaction = request.into_transaction(&user.user_id, Utc::now());
        let stored = self.store.upsert_transaction(transaction).await?;
        info!(transaction_id = %stored.transaction_id, "Manual transaction created");
        Ok(stored)
    }

    pub async fn get_by_external_id(
        &self,
        user: &UserContext,
        external_id: &str,
    ) -> Result<Transaction, AppError> {
        self.store
            .find_transaction_by_external_id(external_id)
            .await?
            .filter(|t| t.user_id == user.user_id)
            .ok_or_else(not_found)
    }

    #[instrument(skip(self, user, update), fields(user_id = %user.user_id))]
    pub async fn update_by_id(
        &self,
        user: &UserContext,
        transaction_id: Uuid,
        update: TransactionUpdate,
    ) -> Result<Transaction, AppError> {
        let transaction = self
            .store
            .find_transaction_by_id(transaction_id)
            .await?
            .filter(|t| t.user_id == user.user_id)
            .ok_or_else(not_found)?;
        self.apply_update(transaction, update).await
    }

    #[instrument(skip(self, user, update), fields(user_id = %user.user_id))]
    pub async fn update_by_external_id(
        &self,
        user: &UserContext,
        external_id: &str,
        update: TransactionUpdate,
    ) -> Result<Transaction, AppError> {
        let transaction = self.get_by_external_id(user, external_id).await?;
        self.apply_update(transaction, update).await
    }

    /// Deleting a row that does not exist succeeds.
    #[instrument(skip(self, user), fields(user_id = %user.user_id))]
    pub async fn delete_by_external_id(
        &self,
        user: &UserContext,
        external_id: &str,
    ) -> Result<(), AppError> {
        match self.store.find_transaction_by_external_id(external_id).await? {
            None => Ok(()),
            Some(t) if t.user_id != user.user_id => Err(not_found()),
            Some(_) => {
                self.store.delete_transaction_by_external_id(external_id).await?;
                Ok(())
            }
        }
    }

    async fn apply_update(
        &self,
        mut transaction: Transaction,
        update: TransactionUpdate,
    ) -> Result<Transaction, AppError> {
        update.apply(&mut transaction, Utc::now());
        self.store.upsert_transaction(transaction).await
    }
}
