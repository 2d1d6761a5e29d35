//! Plaid provider client.
//!
//! Implements the accounts, transactions-sync, token-exchange and link-token
//! endpoints over JSON/HTTP. Credentials travel in the request body, as Plaid
//! expects.

use super::{
    LinkToken, Provider, ProviderAccount, ProviderError, ProviderTransaction, RemovedTransaction,
    TokenExchange, TransactionPage,
};
use crate::models::ExternalCredential;
use crate::services::metrics::{record_provider_error, record_provider_request};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use reqwest::Client;
use rust_decimal::Decimal;
use secrecy::{ExposeSecret, Secret};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};

pub const SANDBOX_URL: &str = "https://sandbox.plaid.com";
pub const DEVELOPMENT_URL: &str = "https://development.plaid.com";
pub const PRODUCTION_URL: &str = "https://production.plaid.com";

/// Resolve a `PLAID_ENV` value to its API base URL. Unknown values fall back to sandbox.
pub fn base_url_for_env(env: &str) -> &'static str {
    match env.to_ascii_lowercase().as_str() {
        "production" => PRODUCTION_URL,
        "development" => DEVELOPMENT_URL,
        _ => SANDBOX_URL,
    }
}

#[derive(Debug, Clone)]
pub struct PlaidConfig {
    pub client_id: String,
    pub secret: Secret<String>,
    pub base_url: String,
    pub client_name: String,
    pub products: Vec<String>,
    pub country_codes: Vec<String>,
    pub language: String,
    /// History requested at link time; Plaid accepts 1..=730.
    pub days_requested: u32,
    /// Changelog entries per page; Plaid accepts 1..=500.
    pub page_size: u32,
    pub request_timeout: Duration,
    pub connect_timeout: Duration,
}

impl Default for PlaidConfig {
    fn default() -> Self {
        Self {
            client_id: String::new(),
            secret: Secret::new(String::new()),
            base_url: SANDBOX_URL.to_string(),
            client_name: "FinTrack".to_string(),
            products: vec!["transactions".to_string()],
            country_codes: vec!["US".to_string()],
            language: "en".to_string(),
            days_requested: 730,
            page_size: 500,
            request_timeout: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(5),
        }
    }
}

#[derive(Clone)]
pub struct PlaidClient {
    client: Client,
    config: PlaidConfig,
}

// ============================================================================
// Wire types
// ============================================================================

#[derive(Serialize)]
struct AccessRequest<'a> {
    client_id: &'a str,
    secret: &'a str,
    access_token: &'a str,
}

#[derive(Serialize)]
struct SyncRequest<'a> {
    client_id: &'a str,
    secret: &'a str,
    access_token: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    cursor: Option<&'a str>,
    count: u32,
}

#[derive(Serialize)]
struct ExchangeRequest<'a> {
    client_id: &'a str,
    secret: &'a str,
    public_token: &'a str,
}

#[derive(Serialize)]
struct LinkUser<'a> {
    client_user_id: &'a str,
}

#[derive(Serialize)]
struct LinkTransactions {
    days_requested: u32,
}

#[derive(Serialize)]
struct LinkTokenRequest<'a> {
    client_id: &'a str,
    secret: &'a str,
    client_name: &'a str,
    user: LinkUser<'a>,
    products: &'a [String],
    country_codes: &'a [String],
    language: &'a str,
    transactions: LinkTransactions,
}

#[derive(Deserialize)]
struct AccountsResponse {
    accounts: Vec<WireAccount>,
}

#[derive(Deserialize)]
struct WireAccount {
    account_id: String,
    name: String,
    official_name: Option<String>,
    #[serde(rename = "type")]
    account_type: String,
    subtype: Option<String>,
    #[serde(default)]
    balances: WireBalances,
}

#[derive(Default, Deserialize)]
struct WireBalances {
    current: Option<Decimal>,
    available: Option<Decimal>,
    limit: Option<Decimal>,
}

#[derive(Deserialize)]
struct SyncResponse {
    #[serde(default)]
    added: Vec<WireTransaction>,
    #[serde(default)]
    modified: Vec<WireTransaction>,
    #[serde(default)]
    removed: Vec<WireRemoved>,
    next_cursor: String,
    has_more: bool,
}

#[derive(Deserialize)]
struct WireTransaction {
    transaction_id: String,
    account_id: String,
    name: String,
    amount: Decimal,
    date: NaiveDate,
    merchant_name: Option<String>,
    category: Option<Vec<String>>,
}

#[derive(Deserialize)]
struct WireRemoved {
    transaction_id: String,
}

#[derive(Deserialize)]
struct ExchangeResponse {
    access_token: String,
    item_id: String,
}

#[derive(Deserialize)]
struct LinkTokenResponse {
    link_token: String,
    expiration: Option<DateTime<Utc>>,
}

#[derive(Deserialize)]
struct WireError {
    #[serde(default)]
    error_type: String,
    #[serde(default)]
    error_code: String,
    #[serde(default)]
    error_message: String,
}

impl From<WireAccount> for ProviderAccount {
    fn from(a: WireAccount) -> Self {
        Self {
            external_account_id: a.account_id,
            name: a.name,
            official_name: a.official_name,
            account_type: a.account_type,
            subtype: a.subtype,
            current_balance: a.balances.current,
            available_balance: a.balances.available,
            limit: a.balances.limit,
        }
    }
}

impl From<WireTransaction> for ProviderTransaction {
    fn from(t: WireTransaction) -> Self {
        Self {
            external_transaction_id: t.transaction_id,
            external_account_id: t.account_id,
            name: t.name,
            amount: t.amount,
            date: t.date,
            merchant_name: t.merchant_name,
            category: t.category.unwrap_or_default(),
        }
    }
}

// ============================================================================
// Client
// ============================================================================

impl PlaidClient {
    /// Create a new Plaid client with connect and request timeouts applied.
    pub fn new(config: PlaidConfig) -> Result<Self, ProviderError> {
        let client = Client::builder()
            .connect_timeout(config.connect_timeout)
            .timeout(config.request_timeout)
            .build()?;

        Ok(Self { client, config })
    }

    /// Check if Plaid is configured (credentials are set).
    pub fn is_configured(&self) -> bool {
        !self.config.client_id.is_empty() && !self.config.secret.expose_secret().is_empty()
    }

    pub fn config(&self) -> &PlaidConfig {
        &self.config
    }

    async fn post<B, R>(&self, operation: &'static str, path: &str, body: &B) -> Result<R, ProviderError>
    where
        B: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        if !self.is_configured() {
            return Err(ProviderError::NotConfigured(
                "PLAID_CLIENT_ID / PLAID_SECRET".to_string(),
            ));
        }

        let url = format!("{}{}", self.config.base_url.trim_end_matches('/'), path);
        let start = Instant::now();

        let result = self.send(&url, body).await;
        record_provider_request(operation, start.elapsed().as_secs_f64());

        match result.and_then(|body| serde_json::from_str(&body).map_err(ProviderError::from)) {
            Ok(decoded) => Ok(decoded),
            Err(err) => {
                record_provider_error(operation, err.code());
                tracing::warn!(
                    operation = operation,
                    code = %err.code(),
                    error = %err,
                    "Plaid request failed"
                );
                Err(err)
            }
        }
    }

    async fn send<B>(&self, url: &str, body: &B) -> Result<String, ProviderError>
    where
        B: Serialize + ?Sized,
    {
        let response = self
            .client
            .post(url)
            .json(body)
            .send()
            .await
            .map_err(|e| self.classify(e))?;

        let status = response.status();
        let text = response.text().await.map_err(|e| self.classify(e))?;

        if status.is_success() {
            return Ok(text);
        }

        let error: WireError = serde_json::from_str(&text).unwrap_or(WireError {
            error_type: "API_ERROR".to_string(),
            error_code: "UNKNOWN".to_string(),
            error_message: text,
        });

        Err(ProviderError::Api {
            status: status.as_u16(),
            error_type: error.error_type,
            error_code: error.error_code,
            error_message: error.error_message,
        })
    }

    fn classify(&self, err: reqwest::Error) -> ProviderError {
        if err.is_timeout() {
            ProviderError::Timeout(self.config.request_timeout)
        } else {
            ProviderError::Transport(err)
        }
    }
}

#[async_trait]
impl Provider for PlaidClient {
    #[tracing::instrument(skip(self, credential), fields(item_id = %credential.item_id))]
    async fn fetch_accounts(
        &self,
        credential: &ExternalCredential,
    ) -> Result<Vec<ProviderAccount>, ProviderError> {
        let request = AccessRequest {
            client_id: &self.config.client_id,
            secret: self.config.secret.expose_secret(),
            access_token: credential.access_secret.expose_secret(),
        };

        let response: AccountsResponse = self.post("accounts_get", "/accounts/get", &request).await?;
        Ok(response.accounts.into_iter().map(Into::into).collect())
    }

    #[tracing::instrument(skip(self, credential), fields(item_id = %credential.item_id, has_cursor = cursor.is_some()))]
    async fn fetch_transaction_page(
        &self,
        credential: &ExternalCredential,
        cursor: Option<&str>,
    ) -> Result<TransactionPage, ProviderError> {
        let request = SyncRequest {
            client_id: &self.config.client_id,
            secret: self.config.secret.expose_secret(),
            access_token: credential.access_secret.expose_secret(),
            cursor: cursor.filter(|c| !c.is_empty()),
            count: self.config.page_size.clamp(1, 500),
        };

        let response: SyncResponse = self
            .post("transactions_sync", "/transactions/sync", &request)
            .await?;

        Ok(TransactionPage {
            added: response.added.into_iter().map(Into::into).collect(),
            modified: response.modified.into_iter().map(Into::into).collect(),
            removed: response
                .removed
                .into_iter()
                .map(|r| RemovedTransaction {
                    external_transaction_id: r.transaction_id,
                })
                .collect(),
            next_cursor: response.next_cursor,
            has_more: response.has_more,
        })
    }

    #[tracing::instrument(skip_all)]
    async fn exchange_public_token(
        &self,
        public_token: &str,
    ) -> Result<TokenExchange, ProviderError> {
        let request = ExchangeRequest {
            client_id: &self.config.client_id,
            secret: self.config.secret.expose_secret(),
            public_token,
        };

        let response: ExchangeResponse = self
            .post("item_public_token_exchange", "/item/public_token/exchange", &request)
            .await?;

        tracing::info!(item_id = %response.item_id, "Public token exchanged");

        Ok(TokenExchange {
            external_item_id: response.item_id,
            access_secret: Secret::new(response.access_token),
        })
    }

    #[tracing::instrument(skip(self))]
    async fn create_link_token(&self, user_id: &str) -> Result<LinkToken, ProviderError> {
        let request = LinkTokenRequest {
            client_id: &self.config.client_id,
            secret: self.config.secret.expose_secret(),
            client_name: &self.config.client_name,
            user: LinkUser {
                client_user_id: user_id,
            },
            products: &self.config.products,
            country_codes: &self.config.country_codes,
            language: &self.config.language,
            transactions: LinkTransactions {
                days_requested: self.config.days_requested.clamp(1, 730),
            },
        };

        let response: LinkTokenResponse = self
            .post("link_token_create", "/link/token/create", &request)
            .await?;

        Ok(LinkToken {
            link_token: response.link_token,
            expiration: response.expiration,
        })
    }
}
