//! Sync error taxonomy and its mapping onto service errors.

use crate::provider::ProviderError;
use service_core::error::AppError;
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum SyncError {
    /// Non-success response, transport failure or timeout talking to the provider.
    #[error("Provider error: {0}")]
    Provider(ProviderError),

    /// The provider rejected the credential itself. Not retried automatically.
    #[error("Credential requires re-authentication: {code} - {message}")]
    ReauthRequired { code: String, message: String },

    /// Lookup by local or external id missed where presence was required.
    #[error("{0} not found")]
    NotFound(&'static str),

    /// Another sync of the same credential is in flight.
    #[error("Sync already in progress for credential {0}")]
    SyncInProgress(Uuid),

    #[error("Sync cancelled")]
    Cancelled,

    #[error("Store error: {0}")]
    Store(#[from] AppError),
}

impl SyncError {
    /// Classify a provider failure, lifting permanent auth failures out of the
    /// generic provider bucket.
    pub fn from_provider(err: ProviderError) -> Self {
        match err {
            ProviderError::Api {
                error_code,
                error_message,
                ..
            } if crate::provider::is_reauth_code(&error_code) => SyncError::ReauthRequired {
                code: error_code,
                message: error_message,
            },
            other => SyncError::Provider(other),
        }
    }

    /// Short machine-readable label, used for metrics and credential error codes.
    pub fn code(&self) -> &str {
        match self {
            SyncError::Provider(err) => err.code(),
            SyncError::ReauthRequired { code, .. } => code,
            SyncError::NotFound(_) => "NOT_FOUND",
            SyncError::SyncInProgress(_) => "SYNC_IN_PROGRESS",
            SyncError::Cancelled => "CANCELLED",
            SyncError::Store(_) => "STORE_ERROR",
        }
    }
}

impl From<SyncError> for AppError {
    fn from(err: SyncError) -> Self {
        match err {
            SyncError::Provider(ProviderError::Timeout(after)) => {
                AppError::GatewayTimeout(format!("provider did not answer within {:?}", after))
            }
            SyncError::Provider(ProviderError::NotConfigured(what)) => {
                tracing::warn!(detail = %what, "Provider not configured");
                AppError::ServiceUnavailable
            }
            SyncError::Provider(err) => AppError::BadGateway(err.to_string()),
            e @ SyncError::ReauthRequired { .. } => AppError::Conflict(anyhow::anyhow!(e)),
            e @ SyncError::NotFound(_) => AppError::NotFound(anyhow::anyhow!(e)),
            e @ SyncError::SyncInProgress(_) => AppError::Conflict(anyhow::anyhow!(e)),
            SyncError::Cancelled => AppError::ServiceUnavailable,
            SyncError::Store(err) => err,
        }
    }
}
