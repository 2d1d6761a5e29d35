//! Transaction changelog pass.

use super::reconcile::{merge_transaction, MergeContext};
use super::{provider_call, SyncCounts};
use crate::error::SyncError;
use crate::models::{Account, ExternalCredential};
use crate::provider::{Provider, ProviderTransaction, TransactionPage};
use crate::store::Store;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument};

/// Where the changelog loop stands.
enum DeltaState {
    /// Holding a cursor, next page not fetched yet.
    AwaitingPage { cursor: Option<String> },
    /// Applying a fetched page. `cursor` is the one the page was fetched with.
    ProcessingPage {
        cursor: Option<String>,
        page: TransactionPage,
    },
    /// Provider reported no more pages.
    Drained { cursor: Option<String> },
}

/// Result of a drained changelog loop. The cursor is not persisted here.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeltaOutcome {
    pub counts: SyncCounts,
    pub cursor: Option<String>,
    pub pages: u32,
}

/// Owning accounts resolved during one pass, keyed by provider account id.
type OwnerCache = HashMap<String, Option<Account>>;

pub struct TransactionSynchronizer {
    store: Arc<dyn Store>,
    provider: Arc<dyn Provider>,
    call_timeout: Duration,
}

impl TransactionSynchronizer {
    pub fn new(store: Arc<dyn Store>, provider: Arc<dyn Provider>, call_timeout: Duration) -> Self {
        Self {
            store,
            provider,
            call_timeout,
        }
    }

    /// Walk the changelog from the credential's stored cursor until the
    /// provider reports no more pages.
    ///
    /// Pages are applied as they arrive; a failure part-way leaves earlier
    /// pages applied and the stored cursor untouched, so the next pass replays
    /// from there.
    #[instrument(skip(self, credential, cancel), fields(credential_id = %credential.credential_id))]
    pub async fn sync(
        &self,
        credential: &ExternalCredential,
        cancel: &CancellationToken,
    ) -> Result<DeltaOutcome, SyncError> {
        let ctx = MergeContext {
            user_id: &credential.user_id,
            credential_id: credential.credential_id,
            now: Utc::now(),
        };
        let mut owners = OwnerCache::new();
        let mut counts = SyncCounts::default();
        let mut pages = 0u32;

        let mut state = DeltaState::AwaitingPage {
            cursor: credential.cursor.clone(),
        };

        loop {
            state = match state {
                DeltaState::AwaitingPage { cursor } => {
                    if cancel.is_cancelled() {
                        return Err(SyncError::Cancelled);
                    }
                    let page = provider_call(
                        cancel,
                        self.call_timeout,
                        self.provider
                            .fetch_transaction_page(credential, cursor.as_deref()),
                    )
                    .await?;
                    DeltaState::ProcessingPage { cursor, page }
                }
                DeltaState::ProcessingPage { cursor, page } => {
                    let applied = self.apply_page(&page, &ctx, &mut owners).await?;
                    counts += applied;
                    pages += 1;

                    debug!(
                        page = pages,
                        added = applied.added,
                        modified = applied.modified,
                        removed = applied.removed,
                        has_more = page.has_more,
                        "Changelog page applied"
                    );

                    let next = if page.next_cursor.is_empty() {
                        cursor
                    } else {
                        Some(page.next_cursor)
                    };
                    if page.has_more {
                        DeltaState::AwaitingPage { cursor: next }
                    } else {
                        DeltaState::Drained { cursor: next }
                    }
                }
                DeltaState::Drained { cursor } => {
                    return Ok(DeltaOutcome {
                        counts,
                        cursor,
                        pages,
                    });
                }
            };
        }
    }

    /// Added, then modified, then removed.
    async fn apply_page(
        &self,
        page: &TransactionPage,
        ctx: &MergeContext<'_>,
        owners: &mut OwnerCache,
    ) -> Result<SyncCounts, SyncError> {
        let mut counts = SyncCounts::default();

        for entry in &page.added {
            self.upsert_entry(entry, ctx, owners).await?;
            counts.added += 1;
        }
        for entry in &page.modified {
            self.upsert_entry(entry, ctx, owners).await?;
            counts.modified += 1;
        }
        for entry in &page.removed {
            let deleted = self
                .store
                .delete_transaction_by_external_id(&entry.external_transaction_id)
                .await?;
            if !deleted {
                debug!(
                    external_id = %entry.external_transaction_id,
                    "Removed transaction not stored locally"
                );
            }
            counts.removed += 1;
        }

        Ok(counts)
    }

    async fn upsert_entry(
        &self,
        entry: &ProviderTransaction,
        ctx: &MergeContext<'_>,
        owners: &mut OwnerCache,
    ) -> Result<(), SyncError> {
        if !owners.contains_key(&entry.external_account_id) {
            let owner = self
                .store
                .find_account_by_external_id(&entry.external_account_id)
                .await?;
            owners.insert(entry.external_account_id.clone(), owner);
        }
        let owner = owners.get(&entry.external_account_id).and_then(Option::as_ref);

        let existing = self
            .store
            .find_transaction_by_external_id(&entry.external_transaction_id)
            .await?;
        self.store
            .upsert_transaction(merge_transaction(existing, entry, owner, ctx))
            .await?;
        Ok(())
    }
}
