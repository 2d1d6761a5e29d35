//! Account snapshot pass.

use super::provider_call;
use super::reconcile::{merge_account, MergeContext};
use crate::error::SyncError;
use crate::models::ExternalCredential;
use crate::provider::Provider;
use crate::store::Store;
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument};

/// Pulls the provider's full account list for a credential and upserts every
/// entry. There is no dirty check: each returned account is written on every
/// pass.
pub struct AccountSynchronizer {
    store: Arc<dyn Store>,
    provider: Arc<dyn Provider>,
    call_timeout: Duration,
}

impl AccountSynchronizer {
    pub fn new(store: Arc<dyn Store>, provider: Arc<dyn Provider>, call_timeout: Duration) -> Self {
        Self {
            store,
            provider,
            call_timeout,
        }
    }

    /// Returns the number of accounts upserted.
    #[instrument(skip(self, credential, cancel), fields(credential_id = %credential.credential_id))]
    pub async fn sync(
        &self,
        credential: &ExternalCredential,
        cancel: &CancellationToken,
    ) -> Result<u64, SyncError> {
        if cancel.is_cancelled() {
            return Err(SyncError::Cancelled);
        }

        let accounts = provider_call(
            cancel,
            self.call_timeout,
            self.provider.fetch_accounts(credential),
        )
        .await?;

        let ctx = MergeContext {
            user_id: &credential.user_id,
            credential_id: credential.credential_id,
            now: Utc::now(),
        };

        let mut upserted = 0;
        for incoming in &accounts {
            let existing = self
                .store
                .find_account_by_external_id(&incoming.external_account_id)
                .await?;
            self.store
                .upsert_account(merge_account(existing, incoming, &ctx))
                .await?;
            upserted += 1;
        }

        debug!(accounts = upserted, "Account snapshot applied");
        Ok(upserted)
    }
}
