//! Aggregation provider seam.
//!
//! The sync engine only depends on the [`Provider`] trait; [`PlaidClient`] is the
//! HTTP implementation used in production.

pub mod plaid;

pub use plaid::{PlaidClient, PlaidConfig};

use crate::models::ExternalCredential;
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use secrecy::Secret;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Provider error codes that mean the credential itself is no longer valid.
pub const REAUTH_ERROR_CODES: &[&str] = &[
    "ITEM_LOGIN_REQUIRED",
    "INVALID_CREDENTIALS",
    "INSUFFICIENT_CREDENTIALS",
    "INVALID_ACCESS_TOKEN",
];

pub fn is_reauth_code(code: &str) -> bool {
    REAUTH_ERROR_CODES.contains(&code)
}

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("{status} {error_type}/{error_code}: {error_message}")]
    Api {
        status: u16,
        error_type: String,
        error_code: String,
        error_message: String,
    },

    #[error("transport: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("malformed response: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("timed out after {0:?}")]
    Timeout(Duration),

    #[error("not configured: {0}")]
    NotConfigured(String),
}

impl ProviderError {
    pub fn code(&self) -> &str {
        match self {
            ProviderError::Api { error_code, .. } => error_code,
            ProviderError::Transport(_) => "TRANSPORT_ERROR",
            ProviderError::Decode(_) => "DECODE_ERROR",
            ProviderError::Timeout(_) => "TIMEOUT",
            ProviderError::NotConfigured(_) => "NOT_CONFIGURED",
        }
    }

    pub fn message(&self) -> String {
        match self {
            ProviderError::Api { error_message, .. } => error_message.clone(),
            other => other.to_string(),
        }
    }
}

/// One account as reported by the provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderAccount {
    pub external_account_id: String,
    pub name: String,
    pub official_name: Option<String>,
    pub account_type: String,
    pub subtype: Option<String>,
    pub current_balance: Option<Decimal>,
    pub available_balance: Option<Decimal>,
    pub limit: Option<Decimal>,
}

/// One added or modified changelog entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderTransaction {
    pub external_transaction_id: String,
    pub external_account_id: String,
    pub name: String,
    pub amount: Decimal,
    pub date: NaiveDate,
    pub merchant_name: Option<String>,
    /// Category path, most general first.
    #[serde(default)]
    pub category: Vec<String>,
}

impl ProviderTransaction {
    /// Most specific non-blank category label, if any.
    pub fn leaf_category(&self) -> Option<&str> {
        self.category
            .last()
            .map(String::as_str)
            .filter(|c| !c.trim().is_empty())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemovedTransaction {
    pub external_transaction_id: String,
}

/// One page of the transaction changelog.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TransactionPage {
    pub added: Vec<ProviderTransaction>,
    pub modified: Vec<ProviderTransaction>,
    pub removed: Vec<RemovedTransaction>,
    pub next_cursor: String,
    pub has_more: bool,
}

#[derive(Debug, Clone)]
pub struct TokenExchange {
    pub external_item_id: String,
    pub access_secret: Secret<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct LinkToken {
    pub link_token: String,
    pub expiration: Option<DateTime<Utc>>,
}

#[async_trait]
pub trait Provider: Send + Sync {
    /// Full current account list for the credential.
    async fn fetch_accounts(
        &self,
        credential: &ExternalCredential,
    ) -> Result<Vec<ProviderAccount>, ProviderError>;

    /// Next changelog page after `cursor`; `None` starts from the beginning.
    async fn fetch_transaction_page(
        &self,
        credential: &ExternalCredential,
        cursor: Option<&str>,
    ) -> Result<TransactionPage, ProviderError>;

    async fn exchange_public_token(&self, public_token: &str)
        -> Result<TokenExchange, ProviderError>;

    async fn create_link_token(&self, user_id: &str) -> Result<LinkToken, ProviderError>;
}
