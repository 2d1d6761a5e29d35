//! Application startup and lifecycle management.

use crate::config::SyncServiceConfig;
use crate::handlers::{accounts, health, plaid, transactions};
use crate::middleware::request_middleware;
use crate::provider::{PlaidClient, Provider};
use crate::services::{init_metrics, AccountService, CredentialService, TransactionService};
use crate::store::{MemoryStore, PgStore, Store};
use crate::sync::SyncOrchestrator;
use axum::{
    middleware,
    routing::{get, patch, post},
    Router,
};
use secrecy::ExposeSecret;
use service_core::error::AppError;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn Store>,
    pub orchestrator: Arc<SyncOrchestrator>,
    pub credentials: CredentialService,
    pub accounts: AccountService,
    pub transactions: TransactionService,
    /// Cancelled on shutdown; every sync request runs under a child token.
    pub shutdown: CancellationToken,
}

impl AppState {
    pub fn new(
        config: &SyncServiceConfig,
        store: Arc<dyn Store>,
        provider: Arc<dyn Provider>,
        shutdown: CancellationToken,
    ) -> Self {
        let orchestrator = SyncOrchestrator::new(
            store.clone(),
            provider.clone(),
            config.sync.max_concurrent_credentials,
            config.plaid.request_timeout,
            config.sync.lease_ttl,
        );

        Self {
            orchestrator: Arc::new(orchestrator),
            credentials: CredentialService::new(store.clone(), provider),
            accounts: AccountService::new(store.clone()),
            transactions: TransactionService::new(store.clone()),
            store,
            shutdown,
        }
    }
}

/// HTTP routes of the service.
pub fn router(state: AppState) -> Router {
    let api = Router::new()
        .route("/plaid/create_link_token", post(plaid::create_link_token))
        .route("/plaid/exchange_public_token", post(plaid::exchange_public_token))
        .route("/plaid/sync_transactions", post(plaid::sync_transactions))
        .route("/plaid/items", get(plaid::list_items))
        .route("/accounts", get(accounts::list_accounts))
        .route("/accounts/:external_id", patch(accounts::update_account))
        .route(
            "/transactions",
            get(transactions::list_transactions).post(transactions::create_transaction),
        )
        .route(
            "/transactions/:transaction_id",
            patch(transactions::update_transaction),
        )
        .route(
            "/transactions/by-external-id/:external_id",
            get(transactions::get_by_external_id)
                .patch(transactions::update_by_external_id)
                .delete(transactions::delete_by_external_id),
        );

    Router::new()
        .route("/health", get(health::health_check))
        .route("/ready", get(health::readiness_check))
        .route("/metrics", get(health::metrics_handler))
        .nest("/api", api)
        .layer(TraceLayer::new_for_http())
        .layer(middleware::from_fn(request_middleware))
        .with_state(state)
}

/// Application container for managing server lifecycle.
pub struct Application {
    port: u16,
    listener: TcpListener,
    state: AppState,
}

impl Application {
    /// Build the application with the given configuration.
    ///
    /// Without `DATABASE_URL` the service runs on the in-process store and
    /// loses all data on restart.
    pub async fn build(config: SyncServiceConfig) -> Result<Self, AppError> {
        let store: Arc<dyn Store> = match &config.database {
            Some(database) => {
                let db = PgStore::new(
                    database.url.expose_secret(),
                    database.max_connections,
                    database.min_connections,
                )
                .await
                .map_err(|e| {
                    tracing::error!(error = %e, "Failed to connect to PostgreSQL");
                    e
                })?;
                db.run_migrations().await.map_err(|e| {
                    tracing::error!(error = %e, "Failed to run migrations");
                    e
                })?;
                Arc::new(db)
            }
            None => {
                tracing::warn!("DATABASE_URL not set - using in-memory store, data is not persisted");
                Arc::new(MemoryStore::new())
            }
        };

        let plaid = PlaidClient::new(config.plaid.clone()).map_err(|e| {
            AppError::ConfigError(anyhow::anyhow!("Failed to build Plaid client: {}", e))
        })?;
        if !plaid.is_configured() {
            tracing::warn!("PLAID_CLIENT_ID / PLAID_SECRET not set - provider calls will fail");
        }

        Self::build_with(config, store, Arc::new(plaid)).await
    }

    /// Build around an existing store and provider.
    pub async fn build_with(
        config: SyncServiceConfig,
        store: Arc<dyn Store>,
        provider: Arc<dyn Provider>,
    ) -> Result<Self, AppError> {
        init_metrics();

        let state = AppState::new(&config, store, provider, CancellationToken::new());

        let addr = SocketAddr::from(([0, 0, 0, 0], config.common.port));
        let listener = TcpListener::bind(addr).await.map_err(|e| {
            tracing::error!(error = %e, addr = %addr, "Failed to bind HTTP listener");
            AppError::from(e)
        })?;
        let port = listener.local_addr()?.port();

        tracing::info!(port = port, "Sync service listener bound");

        Ok(Self {
            port,
            listener,
            state,
        })
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Token that stops the server and cancels in-flight syncs when cancelled.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.state.shutdown.clone()
    }

    /// Run the application until the shutdown token is cancelled.
    pub async fn run_until_stopped(self) -> std::io::Result<()> {
        let shutdown = self.state.shutdown.clone();
        let app = router(self.state);

        tracing::info!(
            service = "sync-service",
            version = env!("CARGO_PKG_VERSION"),
            port = self.port,
            "Service ready to accept connections"
        );

        axum::serve(self.listener, app)
            .with_graceful_shutdown(shutdown.cancelled_owned())
            .await
            .map_err(|e| {
                tracing::error!(error = %e, "HTTP server error");
                std::io::Error::other(format!("HTTP server error: {}", e))
            })
    }
}
