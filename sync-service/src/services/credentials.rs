//! Linking provider items to users.

use crate::error::SyncError;
use crate::models::{CredentialSummary, ExternalCredential, UserContext};
use crate::provider::{LinkToken, Provider};
use crate::store::Store;
use chrono::Utc;
use serde::Deserialize;
use service_core::error::AppError;
use std::sync::Arc;
use tracing::{info, instrument};

/// Completion of the provider's link flow.
#[derive(Debug, Clone, Deserialize)]
pub struct LinkRequest {
    #[serde(alias = "publicToken")]
    pub public_token: String,
    #[serde(default, alias = "institutionId")]
    pub institution_id: Option<String>,
    #[serde(default, alias = "institutionName")]
    pub institution_name: Option<String>,
}

#[derive(Clone)]
pub struct CredentialService {
    store: Arc<dyn Store>,
    provider: Arc<dyn Provider>,
}

impl CredentialService {
    pub fn new(store: Arc<dyn Store>, provider: Arc<dyn Provider>) -> Self {
        Self { store, provider }
    }

    /// Short-lived token the client uses to open the provider's link flow.
    #[instrument(skip(self, user), fields(user_id = %user.user_id))]
    pub async fn create_link_token(&self, user: &UserContext) -> Result<LinkToken, SyncError> {
        self.provider
            .create_link_token(&user.user_id)
            .await
            .map_err(SyncError::from_provider)
    }

    /// Exchange a public token and store the resulting credential.
    ///
    /// Re-linking an item the user already owns refreshes its secret and
    /// reactivates it; the changelog cursor is kept.
    #[instrument(skip(self, user, request), fields(user_id = %user.user_id))]
    pub async fn link_credential(
        &self,
        user: &UserContext,
        request: LinkRequest,
    ) -> Result<CredentialSummary, SyncError> {
        if request.public_token.trim().is_empty() {
            return Err(AppError::BadRequest(anyhow::anyhow!("public_token is required")).into());
        }

        let exchange = self
            .provider
            .exchange_public_token(&request.public_token)
            .await
            .map_err(SyncError::from_provider)?;

        let credential = match self
            .store
            .find_credential_by_item_id(&exchange.external_item_id)
            .await?
        {
            Some(existing) if existing.user_id != user.user_id => {
                return Err(AppError::Conflict(anyhow::anyhow!(
                    "Item is linked to another user"
                ))
                .into());
            }
            Some(mut existing) => {
                existing.access_secret = exchange.access_secret;
                existing.institution_id = request.institution_id.or(existing.institution_id);
                existing.institution_name =
                    request.institution_name.or(existing.institution_name);
                existing.requires_reauth = false;
                existing.is_active = true;
                existing.error_code = None;
                existing.error_message = None;
                existing.updated_utc = Utc::now();
                existing
            }
            None => ExternalCredential::new(
                &user.user_id,
                exchange.external_item_id,
                exchange.access_secret,
                request.institution_id,
                request.institution_name,
            ),
        };

        let stored = self.store.upsert_credential(credential).await?;
        info!(
            credential_id = %stored.credential_id,
            item_id = %stored.item_id,
            "Credential linked"
        );
        Ok(CredentialSummary::from(&stored))
    }

    /// Active credentials of the user, without secrets.
    pub async fn list_credentials(
        &self,
        user: &UserContext,
    ) -> Result<Vec<CredentialSummary>, AppError> {
        let credentials = self.store.find_credentials_by_user(&user.user_id).await?;
        Ok(credentials.iter().map(CredentialSummary::from).collect())
    }
}
