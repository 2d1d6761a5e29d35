//! Incremental sync engine.
//!
//! [`SyncOrchestrator`] drives, per credential, the account snapshot pass
//! ([`AccountSynchronizer`]) followed by the transaction changelog pass
//! ([`TransactionSynchronizer`]). Both delegate field-level merge decisions to
//! [`reconcile`].

pub mod accounts;
pub mod orchestrator;
pub mod reconcile;
pub mod transactions;

pub use accounts::AccountSynchronizer;
pub use orchestrator::SyncOrchestrator;
pub use transactions::{DeltaOutcome, TransactionSynchronizer};

use crate::error::SyncError;
use crate::models::ExternalCredential;
use crate::provider::ProviderError;
use serde::Serialize;
use std::future::Future;
use std::ops::AddAssign;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Run one provider round-trip under a hard timeout, abandoning it as soon as
/// `cancel` fires.
pub(crate) async fn provider_call<T, F>(
    cancel: &CancellationToken,
    timeout: Duration,
    call: F,
) -> Result<T, SyncError>
where
    F: Future<Output = Result<T, ProviderError>>,
{
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(SyncError::Cancelled),
        result = tokio::time::timeout(timeout, call) => match result {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(err)) => Err(SyncError::from_provider(err)),
            Err(_) => Err(SyncError::Provider(ProviderError::Timeout(timeout))),
        },
    }
}

/// Changelog entries applied.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SyncCounts {
    pub added: u64,
    pub modified: u64,
    pub removed: u64,
}

impl AddAssign for SyncCounts {
    fn add_assign(&mut self, rhs: Self) {
        self.added += rhs.added;
        self.modified += rhs.modified;
        self.removed += rhs.removed;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncStatus {
    /// Every credential synced (or there were none).
    Complete,
    /// At least one credential synced and at least one failed.
    Partial,
    /// Every credential failed.
    Failed,
}

impl SyncStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Complete => "complete",
            Self::Partial => "partial",
            Self::Failed => "failed",
        }
    }
}

/// Result of one credential's sync pass.
#[derive(Debug, Serialize)]
pub struct CredentialOutcome {
    pub credential_id: Uuid,
    pub item_id: String,
    pub institution_name: Option<String>,
    pub accounts: u64,
    #[serde(flatten)]
    pub counts: SyncCounts,
    pub error_code: Option<String>,
    pub error_message: Option<String>,
    #[serde(skip)]
    pub error: Option<SyncError>,
}

impl CredentialOutcome {
    pub fn succeeded(credential: &ExternalCredential, accounts: u64, counts: SyncCounts) -> Self {
        Self {
            credential_id: credential.credential_id,
            item_id: credential.item_id.clone(),
            institution_name: credential.institution_name.clone(),
            accounts,
            counts,
            error_code: None,
            error_message: None,
            error: None,
        }
    }

    pub fn failed(credential: &ExternalCredential, error: SyncError) -> Self {
        let message = match &error {
            SyncError::Provider(err) => err.message(),
            SyncError::ReauthRequired { message, .. } => message.clone(),
            other => other.to_string(),
        };
        Self {
            credential_id: credential.credential_id,
            item_id: credential.item_id.clone(),
            institution_name: credential.institution_name.clone(),
            accounts: 0,
            counts: SyncCounts::default(),
            error_code: Some(error.code().to_string()),
            error_message: Some(message),
            error: Some(error),
        }
    }

    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

/// User-level result of a sync request.
#[derive(Debug, Serialize)]
pub struct SyncReport {
    /// Totals over successful credentials.
    #[serde(flatten)]
    pub totals: SyncCounts,
    pub status: SyncStatus,
    pub credentials: Vec<CredentialOutcome>,
}

impl SyncReport {
    pub fn from_outcomes(credentials: Vec<CredentialOutcome>) -> Self {
        let mut totals = SyncCounts::default();
        for outcome in credentials.iter().filter(|o| o.is_success()) {
            totals += outcome.counts;
        }

        let succeeded = credentials.iter().filter(|o| o.is_success()).count();
        let status = if succeeded == credentials.len() {
            SyncStatus::Complete
        } else if succeeded == 0 {
            SyncStatus::Failed
        } else {
            SyncStatus::Partial
        };

        Self {
            totals,
            status,
            credentials,
        }
    }

    pub fn added(&self) -> u64 {
        self.totals.added
    }

    pub fn modified(&self) -> u64 {
        self.totals.modified
    }

    pub fn removed(&self) -> u64 {
        self.totals.removed
    }

    /// First credential failure, in credential order.
    pub fn first_error(&self) -> Option<&SyncError> {
        self.credentials.iter().find_map(|o| o.error.as_ref())
    }
}
