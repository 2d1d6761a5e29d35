//! External credential (one linked institution connection).

use chrono::{DateTime, Utc};
use secrecy::Secret;
use serde::Serialize;
use uuid::Uuid;

/// A linked provider item. The access secret never leaves this struct in
/// serialized form; use [`CredentialSummary`] for anything outward-facing.
#[derive(Debug, Clone)]
pub struct ExternalCredential {
    pub credential_id: Uuid,
    pub user_id: String,
    pub item_id: String,
    pub access_secret: Secret<String>,
    pub institution_id: Option<String>,
    pub institution_name: Option<String>,
    pub cursor: Option<String>,
    pub last_synced_utc: Option<DateTime<Utc>>,
    pub requires_reauth: bool,
    pub error_code: Option<String>,
    pub error_message: Option<String>,
    pub is_active: bool,
    pub created_utc: DateTime<Utc>,
    pub updated_utc: DateTime<Utc>,
}

impl ExternalCredential {
    /// A freshly exchanged credential: active, no cursor, no error.
    pub fn new(
        user_id: &str,
        item_id: String,
        access_secret: Secret<String>,
        institution_id: Option<String>,
        institution_name: Option<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            credential_id: Uuid::new_v4(),
            user_id: user_id.to_string(),
            item_id,
            access_secret,
            institution_id,
            institution_name,
            cursor: None,
            last_synced_utc: None,
            requires_reauth: false,
            error_code: None,
            error_message: None,
            is_active: true,
            created_utc: now,
            updated_utc: now,
        }
    }
}

/// Credential as returned to callers.
#[derive(Debug, Clone, Serialize)]
pub struct CredentialSummary {
    pub credential_id: Uuid,
    pub item_id: String,
    pub institution_id: Option<String>,
    pub institution_name: Option<String>,
    pub last_synced_utc: Option<DateTime<Utc>>,
    pub requires_reauth: bool,
    pub error_code: Option<String>,
    pub error_message: Option<String>,
    pub is_active: bool,
}

impl From<&ExternalCredential> for CredentialSummary {
    fn from(c: &ExternalCredential) -> Self {
        Self {
            credential_id: c.credential_id,
            item_id: c.item_id.clone(),
            institution_id: c.institution_id.clone(),
            institution_name: c.institution_name.clone(),
            last_synced_utc: c.last_synced_utc,
            requires_reauth: c.requires_reauth,
            error_code: c.error_code.clone(),
            error_message: c.error_message.clone(),
            is_active: c.is_active,
        }
    }
}
