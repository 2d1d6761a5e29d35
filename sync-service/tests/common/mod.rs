//! Common test utilities for sync-service integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use rust_decimal::Decimal;
use secrecy::Secret;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, Once};
use std::time::Duration;
use sync_service::models::ExternalCredential;
use sync_service::provider::{
    LinkToken, Provider, ProviderAccount, ProviderError, ProviderTransaction, RemovedTransaction,
    TokenExchange, TransactionPage,
};
use sync_service::store::{MemoryStore, Store};
use sync_service::sync::SyncOrchestrator;
use tokio::sync::Notify;
use uuid::Uuid;

static INIT: Once = Once::new();

/// Initialize tracing for tests (only once).
pub fn init_tracing() {
    INIT.call_once(|| {
        tracing_subscriber::fmt()
            .with_env_filter("info,sync_service=debug,sqlx=warn")
            .with_test_writer()
            .try_init()
            .ok();
    });
}

// ============================================================================
// Scripted provider
// ============================================================================

enum AccountStep {
    Accounts(Vec<ProviderAccount>),
    Fail(String),
}

enum PageStep {
    Page(TransactionPage),
    Fail(String),
    /// Wait for the gate, then answer.
    Gated(Arc<Notify>, TransactionPage),
    /// Never answer.
    Hang,
}

fn api_error(code: &str) -> ProviderError {
    ProviderError::Api {
        status: 400,
        error_type: "ITEM_ERROR".to_string(),
        error_code: code.to_string(),
        error_message: format!("scripted failure {}", code),
    }
}

/// Provider whose answers are keyed by item id and cursor, so replays see the
/// same changelog a real provider would serve.
#[derive(Default)]
pub struct ScriptedProvider {
    accounts: Mutex<HashMap<String, AccountStep>>,
    pages: Mutex<HashMap<(String, Option<String>), PageStep>>,
    page_calls: Mutex<Vec<(String, Option<String>)>>,
    account_calls: Mutex<Vec<String>>,
}

impl ScriptedProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_accounts(&self, item_id: &str, accounts: Vec<ProviderAccount>) {
        self.accounts
            .lock()
            .unwrap()
            .insert(item_id.to_string(), AccountStep::Accounts(accounts));
    }

    pub fn fail_accounts(&self, item_id: &str, code: &str) {
        self.accounts
            .lock()
            .unwrap()
            .insert(item_id.to_string(), AccountStep::Fail(code.to_string()));
    }

    pub fn with_page(&self, item_id: &str, cursor: Option<&str>, page: TransactionPage) {
        self.set_page(item_id, cursor, PageStep::Page(page));
    }

    pub fn fail_page(&self, item_id: &str, cursor: Option<&str>, code: &str) {
        self.set_page(item_id, cursor, PageStep::Fail(code.to_string()));
    }

    pub fn gate_page(
        &self,
        item_id: &str,
        cursor: Option<&str>,
        gate: Arc<Notify>,
        page: TransactionPage,
    ) {
        self.set_page(item_id, cursor, PageStep::Gated(gate, page));
    }

    pub fn hang_page(&self, item_id: &str, cursor: Option<&str>) {
        self.set_page(item_id, cursor, PageStep::Hang);
    }

    fn set_page(&self, item_id: &str, cursor: Option<&str>, step: PageStep) {
        self.pages
            .lock()
            .unwrap()
            .insert((item_id.to_string(), cursor.map(str::to_string)), step);
    }

    /// Changelog requests seen so far, in order.
    pub fn page_calls(&self) -> Vec<(String, Option<String>)> {
        self.page_calls.lock().unwrap().clone()
    }

    pub fn account_calls(&self) -> Vec<String> {
        self.account_calls.lock().unwrap().clone()
    }

    /// Wait until at least `count` changelog requests were made.
    pub async fn wait_for_page_calls(&self, count: usize) {
        for _ in 0..500 {
            if self.page_calls.lock().unwrap().len() >= count {
                return;
            }
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
        panic!("provider never saw {} page requests", count);
    }
}

#[async_trait]
impl Provider for ScriptedProvider {
    async fn fetch_accounts(
        &self,
        credential: &ExternalCredential,
    ) -> Result<Vec<ProviderAccount>, ProviderError> {
        self.account_calls
            .lock()
            .unwrap()
            .push(credential.item_id.clone());
        match self.accounts.lock().unwrap().get(&credential.item_id) {
            Some(AccountStep::Accounts(accounts)) => Ok(accounts.clone()),
            Some(AccountStep::Fail(code)) => Err(api_error(code)),
            None => Ok(Vec::new()),
        }
    }

    async fn fetch_transaction_page(
        &self,
        credential: &ExternalCredential,
        cursor: Option<&str>,
    ) -> Result<TransactionPage, ProviderError> {
        let key = (credential.item_id.clone(), cursor.map(str::to_string));
        self.page_calls.lock().unwrap().push(key.clone());

        let step = {
            let pages = self.pages.lock().unwrap();
            match pages.get(&key) {
                Some(PageStep::Page(page)) => return Ok(page.clone()),
                Some(PageStep::Fail(code)) => return Err(api_error(code)),
                Some(PageStep::Gated(gate, page)) => Some((gate.clone(), page.clone())),
                Some(PageStep::Hang) => None,
                None => return Err(api_error("UNSCRIPTED_CURSOR")),
            }
        };

        match step {
            Some((gate, page)) => {
                gate.notified().await;
                Ok(page)
            }
            None => std::future::pending().await,
        }
    }

    async fn exchange_public_token(
        &self,
        public_token: &str,
    ) -> Result<TokenExchange, ProviderError> {
        let item = public_token.trim_start_matches("public-");
        Ok(TokenExchange {
            external_item_id: item.to_string(),
            access_secret: Secret::new(format!("access-{}", item)),
        })
    }

    async fn create_link_token(&self, user_id: &str) -> Result<LinkToken, ProviderError> {
        Ok(LinkToken {
            link_token: format!("link-sandbox-{}", user_id),
            expiration: None,
        })
    }
}

// ============================================================================
// Builders
// ============================================================================

pub fn money(cents: i64) -> Decimal {
    Decimal::new(cents, 2)
}

pub fn provider_account(id: &str, account_type: &str, subtype: Option<&str>) -> ProviderAccount {
    ProviderAccount {
        external_account_id: id.to_string(),
        name: format!("Account {}", id),
        official_name: None,
        account_type: account_type.to_string(),
        subtype: subtype.map(str::to_string),
        current_balance: Some(money(100_000)),
        available_balance: Some(money(95_000)),
        limit: None,
    }
}

pub fn provider_txn(id: &str, account_id: &str, cents: i64, category: &[&str]) -> ProviderTransaction {
    ProviderTransaction {
        external_transaction_id: id.to_string(),
        external_account_id: account_id.to_string(),
        name: format!("Transaction {}", id),
        amount: money(cents),
        date: NaiveDate::from_ymd_opt(2024, 3, 1).unwrap(),
        merchant_name: Some("Merchant".to_string()),
        category: category.iter().map(|c| c.to_string()).collect(),
    }
}

pub fn page(
    added: Vec<ProviderTransaction>,
    modified: Vec<ProviderTransaction>,
    removed: &[&str],
    next_cursor: &str,
    has_more: bool,
) -> TransactionPage {
    TransactionPage {
        added,
        modified,
        removed: removed
            .iter()
            .map(|id| RemovedTransaction {
                external_transaction_id: id.to_string(),
            })
            .collect(),
        next_cursor: next_cursor.to_string(),
        has_more,
    }
}

// ============================================================================
// Fixtures
// ============================================================================

pub async fn seed_credential(store: &MemoryStore, user_id: &str, item_id: &str) -> ExternalCredential {
    store
        .upsert_credential(ExternalCredential::new(
            user_id,
            item_id.to_string(),
            Secret::new(format!("access-{}", item_id)),
            Some("ins_1".to_string()),
            Some("Platypus Bank".to_string()),
        ))
        .await
        .unwrap()
}

/// Overwrite a credential's cursor the way a committed pass would.
pub async fn set_cursor(store: &MemoryStore, credential_id: Uuid, cursor: Option<&str>) {
    let lease = Uuid::new_v4();
    let now = Utc::now();
    assert!(store
        .acquire_sync_lease(credential_id, lease, now, now + chrono::Duration::minutes(1))
        .await
        .unwrap());
    store
        .update_credential_cursor(credential_id, lease, cursor, now)
        .await
        .unwrap();
    store.release_sync_lease(credential_id, lease).await.unwrap();
}

pub struct Harness {
    pub store: Arc<MemoryStore>,
    pub provider: Arc<ScriptedProvider>,
    pub orchestrator: Arc<SyncOrchestrator>,
}

impl Harness {
    /// Another orchestrator over the same store and provider, standing in for
    /// a second replica of the service.
    pub fn replica(&self) -> Arc<SyncOrchestrator> {
        orchestrator(&self.store, &self.provider)
    }
}

fn orchestrator(store: &Arc<MemoryStore>, provider: &Arc<ScriptedProvider>) -> Arc<SyncOrchestrator> {
    Arc::new(SyncOrchestrator::new(
        store.clone(),
        provider.clone(),
        4,
        Duration::from_secs(5),
        Duration::from_secs(60),
    ))
}

pub fn harness() -> Harness {
    init_tracing();
    let store = Arc::new(MemoryStore::new());
    let provider = Arc::new(ScriptedProvider::new());
    let orchestrator = orchestrator(&store, &provider);
    Harness {
        store,
        provider,
        orchestrator,
    }
}
