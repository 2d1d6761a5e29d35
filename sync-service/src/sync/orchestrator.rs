//! Per-user sync driver.

use super::{
    AccountSynchronizer, CredentialOutcome, SyncCounts, SyncReport, TransactionSynchronizer,
};
use crate::error::SyncError;
use crate::models::{ExternalCredential, UserContext};
use crate::provider::Provider;
use crate::services::metrics::{record_sync_entries, record_sync_run};
use crate::store::Store;
use chrono::Utc;
use futures::future::join_all;
use service_core::error::AppError;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

/// A held sync lease on one credential.
///
/// Released explicitly once the pass ends. If the pass future is dropped
/// first, release is handed to the runtime; a lease that is never released
/// expires on its own.
struct SyncLease {
    store: Arc<dyn Store>,
    credential_id: Uuid,
    lease_id: Uuid,
    released: bool,
}

impl SyncLease {
    async fn release(mut self) {
        self.released = true;
        if let Err(e) = self
            .store
            .release_sync_lease(self.credential_id, self.lease_id)
            .await
        {
            warn!(credential_id = %self.credential_id, error = %e, "Failed to release sync lease");
        }
    }
}

impl Drop for SyncLease {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            return;
        };
        let store = self.store.clone();
        let (credential_id, lease_id) = (self.credential_id, self.lease_id);
        runtime.spawn(async move {
            if let Err(e) = store.release_sync_lease(credential_id, lease_id).await {
                warn!(credential_id = %credential_id, error = %e, "Failed to release sync lease");
            }
        });
    }
}

pub struct SyncOrchestrator {
    store: Arc<dyn Store>,
    accounts: AccountSynchronizer,
    transactions: TransactionSynchronizer,
    permits: Arc<Semaphore>,
    lease_ttl: Duration,
}

impl SyncOrchestrator {
    /// `max_concurrent_credentials` caps credential passes across every
    /// caller of this orchestrator. `call_timeout` bounds each provider call.
    /// `lease_ttl` bounds how long a crashed pass keeps its credential locked
    /// and must exceed the longest expected pass.
    pub fn new(
        store: Arc<dyn Store>,
        provider: Arc<dyn Provider>,
        max_concurrent_credentials: usize,
        call_timeout: Duration,
        lease_ttl: Duration,
    ) -> Self {
        Self {
            accounts: AccountSynchronizer::new(store.clone(), provider.clone(), call_timeout),
            transactions: TransactionSynchronizer::new(store.clone(), provider, call_timeout),
            store,
            permits: Arc::new(Semaphore::new(max_concurrent_credentials.max(1))),
            lease_ttl,
        }
    }

    /// Sync every active credential of `user`.
    ///
    /// Each credential runs its account snapshot and then its transaction
    /// changelog. Credentials are isolated from each other: a failure on one is
    /// recorded in its [`CredentialOutcome`] and on the stored credential, and
    /// the remaining credentials still sync. (Earlier behavior aborted the whole
    /// request on the first failure.) The report status tells `complete`,
    /// `partial` and `failed` apart.
    ///
    /// Only a failure to load the user's credentials fails the call itself.
    #[instrument(skip(self, user, cancel), fields(user_id = %user.user_id))]
    pub async fn sync_user(
        &self,
        user: &UserContext,
        cancel: CancellationToken,
    ) -> Result<SyncReport, SyncError> {
        let credentials = self.store.find_credentials_by_user(&user.user_id).await?;
        info!(credentials = credentials.len(), "Starting sync");

        let outcomes = join_all(
            credentials
                .iter()
                .map(|credential| self.sync_credential(credential, &cancel)),
        )
        .await;

        let report = SyncReport::from_outcomes(outcomes);
        info!(
            status = report.status.as_str(),
            added = report.added(),
            modified = report.modified(),
            removed = report.removed(),
            "Sync finished"
        );
        Ok(report)
    }

    async fn sync_credential(
        &self,
        credential: &ExternalCredential,
        cancel: &CancellationToken,
    ) -> CredentialOutcome {
        match self.run_pass(credential, cancel).await {
            Ok((accounts, counts)) => {
                record_sync_run("success");
                record_sync_entries(counts.added, counts.modified, counts.removed);
                CredentialOutcome::succeeded(credential, accounts, counts)
            }
            Err(err) => {
                record_sync_run(err.code());
                self.record_failure(credential, &err).await;
                CredentialOutcome::failed(credential, err)
            }
        }
    }

    #[instrument(skip(self, credential, cancel), fields(credential_id = %credential.credential_id, item_id = %credential.item_id))]
    async fn run_pass(
        &self,
        credential: &ExternalCredential,
        cancel: &CancellationToken,
    ) -> Result<(u64, SyncCounts), SyncError> {
        let lease = self.claim(credential.credential_id).await?;
        let result = self.run_leased(credential, lease.lease_id, cancel).await;
        lease.release().await;
        result
    }

    async fn run_leased(
        &self,
        credential: &ExternalCredential,
        lease_id: Uuid,
        cancel: &CancellationToken,
    ) -> Result<(u64, SyncCounts), SyncError> {
        let _permit = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(SyncError::Cancelled),
            permit = self.permits.acquire() => permit.map_err(|_| SyncError::Cancelled)?,
        };

        let accounts = self.accounts.sync(credential, cancel).await?;
        let delta = self.transactions.sync(credential, cancel).await?;

        self.store
            .update_credential_cursor(
                credential.credential_id,
                lease_id,
                delta.cursor.as_deref(),
                Utc::now(),
            )
            .await
            .map_err(|e| match e {
                AppError::Conflict(_) => SyncError::SyncInProgress(credential.credential_id),
                other => SyncError::Store(other),
            })?;

        info!(
            accounts = accounts,
            pages = delta.pages,
            added = delta.counts.added,
            modified = delta.counts.modified,
            removed = delta.counts.removed,
            "Credential synced"
        );
        Ok((accounts, delta.counts))
    }

    /// Take the credential's sync lease in the store, so at most one pass runs
    /// per credential across every process sharing it.
    async fn claim(&self, credential_id: Uuid) -> Result<SyncLease, SyncError> {
        let lease_id = Uuid::new_v4();
        let now = Utc::now();
        let ttl = chrono::Duration::from_std(self.lease_ttl)
            .unwrap_or_else(|_| chrono::Duration::minutes(10));

        if !self
            .store
            .acquire_sync_lease(credential_id, lease_id, now, now + ttl)
            .await?
        {
            return Err(SyncError::SyncInProgress(credential_id));
        }

        Ok(SyncLease {
            store: self.store.clone(),
            credential_id,
            lease_id,
            released: false,
        })
    }

    /// Persist provider failures on the credential. Other failures leave it as is.
    async fn record_failure(&self, credential: &ExternalCredential, err: &SyncError) {
        let recorded = match err {
            SyncError::ReauthRequired { code, message } => {
                warn!(
                    credential_id = %credential.credential_id,
                    code = %code,
                    "Credential requires re-authentication, deactivating"
                );
                self.store
                    .record_credential_error(credential.credential_id, code, message, true)
                    .await
            }
            SyncError::Provider(provider_err) => {
                warn!(
                    credential_id = %credential.credential_id,
                    code = %provider_err.code(),
                    error = %provider_err,
                    "Credential sync failed"
                );
                self.store
                    .record_credential_error(
                        credential.credential_id,
                        provider_err.code(),
                        &provider_err.message(),
                        false,
                    )
                    .await
            }
            other => {
                warn!(
                    credential_id = %credential.credential_id,
                    error = %other,
                    "Credential sync aborted"
                );
                Ok(())
            }
        };

        if let Err(e) = recorded {
            error!(
                credential_id = %credential.credential_id,
                error = %e,
                "Failed to record credential error"
            );
        }
    }
}
