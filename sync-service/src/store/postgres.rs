//! PostgreSQL store.

use super::Store;
use crate::models::transaction::non_blank;
use crate::models::{
    Account, AccountKind, CategorySource, ExternalCredential, Transaction, TransactionFilter,
    TransactionType,
};
use crate::services::metrics::DB_QUERY_DURATION;
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use secrecy::{ExposeSecret, Secret};
use service_core::error::AppError;
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::FromRow;
use std::time::Duration;
use tracing::{info, instrument};
use uuid::Uuid;

const CREDENTIAL_COLUMNS: &str = "credential_id, user_id, item_id, access_secret, institution_id, \
    institution_name, cursor, last_synced_utc, requires_reauth, error_code, error_message, \
    is_active, created_utc, updated_utc";

const ACCOUNT_COLUMNS: &str = "account_id, user_id, external_id, name, official_name, \
    provider_type, provider_subtype, account_type, account_subtype, current_balance, \
    available_balance, credit_limit, balance_updated_utc, display_name, color, is_hidden, \
    is_active, deactivated_utc, credential_id, created_utc, updated_utc";

const TRANSACTION_COLUMNS: &str = "transaction_id, user_id, external_id, name, amount, \
    normalized_amount, date, category, category_source, category_corrected, merchant_name, \
    transaction_type, account_type, account_subtype, is_recurring, excluded_from_budget, tags, \
    description, account_id, credential_id, created_utc, updated_utc";

const TRANSACTION_FILTER: &str = r#"
    WHERE user_id = $1
      AND ($2::date IS NULL OR date >= $2)
      AND ($3::date IS NULL OR date <= $3)
      AND ($4::varchar[] IS NULL OR category = ANY($4))
      AND ($5::varchar[] IS NULL OR account_type = ANY($5))
      AND ($6::varchar[] IS NULL OR transaction_type = ANY($6))
      AND ($7::varchar IS NULL OR merchant_name ILIKE $7)
      AND ($8::varchar IS NULL OR name ILIKE $8)
      AND ($9::numeric IS NULL OR amount >= $9)
      AND ($10::numeric IS NULL OR amount <= $10)
      AND (NOT $11 OR transaction_type <> 'transfer')
      AND (NOT $12 OR is_recurring)
"#;

// =========================================================================
// Row types
// =========================================================================

#[derive(FromRow)]
struct CredentialRow {
    credential_id: Uuid,
    user_id: String,
    item_id: String,
    access_secret: String,
    institution_id: Option<String>,
    institution_name: Option<String>,
    cursor: Option<String>,
    last_synced_utc: Option<DateTime<Utc>>,
    requires_reauth: bool,
    error_code: Option<String>,
    error_message: Option<String>,
    is_active: bool,
    created_utc: DateTime<Utc>,
    updated_utc: DateTime<Utc>,
}

impl From<CredentialRow> for ExternalCredential {
    fn from(row: CredentialRow) -> Self {
        Self {
            credential_id: row.credential_id,
            user_id: row.user_id,
            item_id: row.item_id,
            access_secret: Secret::new(row.access_secret),
            institution_id: row.institution_id,
            institution_name: row.institution_name,
            cursor: row.cursor,
            last_synced_utc: row.last_synced_utc,
            requires_reauth: row.requires_reauth,
            error_code: row.error_code,
            error_message: row.error_message,
            is_active: row.is_active,
            created_utc: row.created_utc,
            updated_utc: row.updated_utc,
        }
    }
}

#[derive(FromRow)]
struct AccountRow {
    account_id: Uuid,
    user_id: String,
    external_id: String,
    name: String,
    official_name: Option<String>,
    provider_type: String,
    provider_subtype: Option<String>,
    account_type: String,
    account_subtype: Option<String>,
    current_balance: Decimal,
    available_balance: Option<Decimal>,
    credit_limit: Option<Decimal>,
    balance_updated_utc: Option<DateTime<Utc>>,
    display_name: Option<String>,
    color: Option<String>,
    is_hidden: bool,
    is_active: bool,
    deactivated_utc: Option<DateTime<Utc>>,
    credential_id: Option<Uuid>,
    created_utc: DateTime<Utc>,
    updated_utc: DateTime<Utc>,
}

impl From<AccountRow> for Account {
    fn from(row: AccountRow) -> Self {
        Self {
            account_id: row.account_id,
            user_id: row.user_id,
            external_id: row.external_id,
            name: row.name,
            official_name: row.official_name,
            provider_type: row.provider_type,
            provider_subtype: row.provider_subtype,
            account_type: AccountKind::from_str(&row.account_type),
            account_subtype: row.account_subtype,
            current_balance: row.current_balance,
            available_balance: row.available_balance,
            credit_limit: row.credit_limit,
            balance_updated_utc: row.balance_updated_utc,
            display_name: row.display_name,
            color: row.color,
            is_hidden: row.is_hidden,
            is_active: row.is_active,
            deactivated_utc: row.deactivated_utc,
            credential_id: row.credential_id,
            created_utc: row.created_utc,
            updated_utc: row.updated_utc,
        }
    }
}

#[derive(FromRow)]
struct TransactionRow {
    transaction_id: Uuid,
    user_id: String,
    external_id: String,
    name: String,
    amount: Decimal,
    normalized_amount: Decimal,
    date: NaiveDate,
    category: Option<String>,
    category_source: Option<String>,
    category_corrected: bool,
    merchant_name: Option<String>,
    transaction_type: String,
    account_type: Option<String>,
    account_subtype: Option<String>,
    is_recurring: bool,
    excluded_from_budget: bool,
    tags: Vec<String>,
    description: Option<String>,
    account_id: Option<Uuid>,
    credential_id: Option<Uuid>,
    created_utc: DateTime<Utc>,
    updated_utc: DateTime<Utc>,
}

impl From<TransactionRow> for Transaction {
    fn from(row: TransactionRow) -> Self {
        Self {
            transaction_id: row.transaction_id,
            user_id: row.user_id,
            external_id: row.external_id,
            name: row.name,
            amount: row.amount,
            normalized_amount: row.normalized_amount,
            date: row.date,
            category: row.category,
            category_source: row.category_source.as_deref().map(CategorySource::from_str),
            category_corrected: row.category_corrected,
            merchant_name: row.merchant_name,
            transaction_type: TransactionType::from_str(&row.transaction_type),
            account_type: row.account_type.as_deref().map(AccountKind::from_str),
            account_subtype: row.account_subtype,
            is_recurring: row.is_recurring,
            excluded_from_budget: row.excluded_from_budget,
            tags: row.tags.into_iter().collect(),
            description: row.description,
            account_id: row.account_id,
            credential_id: row.credential_id,
            created_utc: row.created_utc,
            updated_utc: row.updated_utc,
        }
    }
}

/// Bind values for [`TRANSACTION_FILTER`], in placeholder order.
struct FilterBinds {
    start_date: Option<NaiveDate>,
    end_date: Option<NaiveDate>,
    categories: Option<Vec<String>>,
    account_types: Option<Vec<String>>,
    transaction_types: Option<Vec<String>>,
    merchant_pattern: Option<String>,
    search_pattern: Option<String>,
    min_amount: Option<Decimal>,
    max_amount: Option<Decimal>,
    exclude_transfers: bool,
    only_recurring: bool,
}

impl FilterBinds {
    fn from_filter(filter: &TransactionFilter) -> Self {
        fn non_empty(values: Vec<String>) -> Option<Vec<String>> {
            (!values.is_empty()).then_some(values)
        }

        Self {
            start_date: filter.start_date,
            end_date: filter.end_date,
            categories: non_empty(filter.categories.clone()),
            account_types: non_empty(
                filter
                    .account_types
                    .iter()
                    .map(|k| k.as_str().to_string())
                    .collect(),
            ),
            transaction_types: non_empty(
                filter
                    .transaction_types
                    .iter()
                    .map(|t| t.as_str().to_string())
                    .collect(),
            ),
            merchant_pattern: non_blank(&filter.merchant_name).map(contains_pattern),
            search_pattern: non_blank(&filter.search).map(contains_pattern),
            min_amount: filter.min_amount,
            max_amount: filter.max_amount,
            exclude_transfers: filter.exclude_transfers,
            only_recurring: filter.only_recurring,
        }
    }
}

/// Case-insensitive substring pattern with LIKE metacharacters escaped.
fn contains_pattern(needle: &str) -> String {
    let escaped = needle
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_");
    format!("%{}%", escaped)
}

// =========================================================================
// Store
// =========================================================================

/// Database connection pool wrapper.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    /// Create a new database connection pool.
    #[instrument(skip(database_url), fields(service = "sync-service"))]
    pub async fn new(
        database_url: &str,
        max_connections: u32,
        min_connections: u32,
    ) -> Result<Self, AppError> {
        info!(
            max_connections = max_connections,
            min_connections = min_connections,
            "Connecting to PostgreSQL"
        );

        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .min_connections(min_connections)
            .acquire_timeout(Duration::from_secs(30))
            .idle_timeout(Duration::from_secs(600))
            .connect(database_url)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to connect: {}", e)))?;

        info!("PostgreSQL connection pool established");

        Ok(Self { pool })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Run database migrations.
    #[instrument(skip(self))]
    pub async fn run_migrations(&self) -> Result<(), AppError> {
        info!("Running database migrations");
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Migration failed: {}", e)))?;
        info!("Database migrations completed");
        Ok(())
    }

    async fn credential_exists(&self, credential_id: Uuid) -> Result<bool, AppError> {
        sqlx::query_scalar::<_, bool>(
            "SELECT EXISTS (SELECT 1 FROM external_credentials WHERE credential_id = $1)",
        )
        .bind(credential_id)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to look up credential: {}", e)))
    }
}

fn missing_credential(credential_id: Uuid) -> AppError {
    AppError::NotFound(anyhow::anyhow!("Credential {} not found", credential_id))
}

#[async_trait]
impl Store for PgStore {
    #[instrument(skip(self))]
    async fn health_check(&self) -> Result<(), AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["health_check"])
            .start_timer();

        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Health check failed: {}", e)))?;

        timer.observe_duration();
        Ok(())
    }

    // =========================================================================
    // Credential Operations
    // =========================================================================

    #[instrument(skip(self))]
    async fn find_credentials_by_user(
        &self,
        user_id: &str,
    ) -> Result<Vec<ExternalCredential>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["find_credentials_by_user"])
            .start_timer();

        let rows = sqlx::query_as::<_, CredentialRow>(&format!(
            "SELECT {} FROM external_credentials WHERE user_id = $1 AND is_active ORDER BY created_utc",
            CREDENTIAL_COLUMNS
        ))
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to list credentials: {}", e)))?;

        timer.observe_duration();

        Ok(rows.into_iter().map(Into::into).collect())
    }

    #[instrument(skip(self))]
    async fn find_credential_by_item_id(
        &self,
        item_id: &str,
    ) -> Result<Option<ExternalCredential>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["find_credential_by_item_id"])
            .start_timer();

        let row = sqlx::query_as::<_, CredentialRow>(&format!(
            "SELECT {} FROM external_credentials WHERE item_id = $1",
            CREDENTIAL_COLUMNS
        ))
        .bind(item_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to get credential: {}", e)))?;

        timer.observe_duration();

        Ok(row.map(Into::into))
    }

    #[instrument(skip(self, credential), fields(item_id = %credential.item_id))]
    async fn upsert_credential(
        &self,
        credential: ExternalCredential,
    ) -> Result<ExternalCredential, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["upsert_credential"])
            .start_timer();

        let row = sqlx::query_as::<_, CredentialRow>(&format!(
            r#"
            INSERT INTO external_credentials ({columns})
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
            ON CONFLICT (item_id) DO UPDATE SET
                user_id = EXCLUDED.user_id,
                access_secret = EXCLUDED.access_secret,
                institution_id = EXCLUDED.institution_id,
                institution_name = EXCLUDED.institution_name,
                cursor = EXCLUDED.cursor,
                last_synced_utc = EXCLUDED.last_synced_utc,
                requires_reauth = EXCLUDED.requires_reauth,
                error_code = EXCLUDED.error_code,
                error_message = EXCLUDED.error_message,
                is_active = EXCLUDED.is_active,
                updated_utc = EXCLUDED.updated_utc
            RETURNING {columns}
            "#,
            columns = CREDENTIAL_COLUMNS
        ))
        .bind(credential.credential_id)
        .bind(&credential.user_id)
        .bind(&credential.item_id)
        .bind(credential.access_secret.expose_secret())
        .bind(&credential.institution_id)
        .bind(&credential.institution_name)
        .bind(&credential.cursor)
        .bind(credential.last_synced_utc)
        .bind(credential.requires_reauth)
        .bind(&credential.error_code)
        .bind(&credential.error_message)
        .bind(credential.is_active)
        .bind(credential.created_utc)
        .bind(credential.updated_utc)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to upsert credential: {}", e)))?;

        timer.observe_duration();
        info!(credential_id = %row.credential_id, "Credential stored");

        Ok(row.into())
    }

    #[instrument(skip(self, now, expires_at), fields(credential_id = %credential_id))]
    async fn acquire_sync_lease(
        &self,
        credential_id: Uuid,
        lease_id: Uuid,
        now: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> Result<bool, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["acquire_sync_lease"])
            .start_timer();

        let result = sqlx::query(
            r#"
            UPDATE external_credentials
            SET sync_lease_id = $2, sync_lease_expires_utc = $4
            WHERE credential_id = $1
              AND (sync_lease_id IS NULL OR sync_lease_id = $2 OR sync_lease_expires_utc <= $3)
            "#,
        )
        .bind(credential_id)
        .bind(lease_id)
        .bind(now)
        .bind(expires_at)
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to acquire sync lease: {}", e)))?;

        timer.observe_duration();

        if result.rows_affected() == 1 {
            return Ok(true);
        }
        if self.credential_exists(credential_id).await? {
            Ok(false)
        } else {
            Err(missing_credential(credential_id))
        }
    }

    #[instrument(skip(self), fields(credential_id = %credential_id))]
    async fn release_sync_lease(
        &self,
        credential_id: Uuid,
        lease_id: Uuid,
    ) -> Result<(), AppError> {
        sqlx::query(
            r#"
            UPDATE external_credentials
            SET sync_lease_id = NULL, sync_lease_expires_utc = NULL
            WHERE credential_id = $1 AND sync_lease_id = $2
            "#,
        )
        .bind(credential_id)
        .bind(lease_id)
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to release sync lease: {}", e)))?;
        Ok(())
    }

    #[instrument(skip(self, cursor), fields(credential_id = %credential_id))]
    async fn update_credential_cursor(
        &self,
        credential_id: Uuid,
        lease_id: Uuid,
        cursor: Option<&str>,
        synced_at: DateTime<Utc>,
    ) -> Result<(), AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["update_credential_cursor"])
            .start_timer();

        let result = sqlx::query(
            r#"
            UPDATE external_credentials
            SET cursor = $3, last_synced_utc = $4, error_code = NULL, error_message = NULL,
                updated_utc = $4
            WHERE credential_id = $1 AND sync_lease_id = $2
            "#,
        )
        .bind(credential_id)
        .bind(lease_id)
        .bind(cursor)
        .bind(synced_at)
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to update cursor: {}", e)))?;

        timer.observe_duration();

        if result.rows_affected() == 1 {
            return Ok(());
        }
        if self.credential_exists(credential_id).await? {
            Err(AppError::Conflict(anyhow::anyhow!(
                "Sync lease for credential {} is not held",
                credential_id
            )))
        } else {
            Err(missing_credential(credential_id))
        }
    }

    #[instrument(skip(self, message), fields(credential_id = %credential_id))]
    async fn record_credential_error(
        &self,
        credential_id: Uuid,
        code: &str,
        message: &str,
        requires_reauth: bool,
    ) -> Result<(), AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["record_credential_error"])
            .start_timer();

        let result = sqlx::query(
            r#"
            UPDATE external_credentials
            SET error_code = $2, error_message = $3,
                requires_reauth = requires_reauth OR $4,
                is_active = is_active AND NOT $4,
                updated_utc = NOW()
            WHERE credential_id = $1
            "#,
        )
        .bind(credential_id)
        .bind(code)
        .bind(message)
        .bind(requires_reauth)
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to record credential error: {}", e)))?;

        timer.observe_duration();

        if result.rows_affected() == 0 {
            return Err(missing_credential(credential_id));
        }
        Ok(())
    }

    // =========================================================================
    // Account Operations
    // =========================================================================

    #[instrument(skip(self))]
    async fn find_account_by_external_id(
        &self,
        external_id: &str,
    ) -> Result<Option<Account>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["find_account_by_external_id"])
            .start_timer();

        let row = sqlx::query_as::<_, AccountRow>(&format!(
            "SELECT {} FROM accounts WHERE external_id = $1",
            ACCOUNT_COLUMNS
        ))
        .bind(external_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to get account: {}", e)))?;

        timer.observe_duration();

        Ok(row.map(Into::into))
    }

    #[instrument(skip(self, account), fields(external_id = %account.external_id))]
    async fn upsert_account(&self, account: Account) -> Result<Account, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["upsert_account"])
            .start_timer();

        let row = sqlx::query_as::<_, AccountRow>(&format!(
            r#"
            INSERT INTO accounts ({columns})
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17,
                    $18, $19, $20, $21)
            ON CONFLICT (external_id) DO UPDATE SET
                user_id = EXCLUDED.user_id,
                name = EXCLUDED.name,
                official_name = EXCLUDED.official_name,
                provider_type = EXCLUDED.provider_type,
                provider_subtype = EXCLUDED.provider_subtype,
                account_type = EXCLUDED.account_type,
                account_subtype = EXCLUDED.account_subtype,
                current_balance = EXCLUDED.current_balance,
                available_balance = EXCLUDED.available_balance,
                credit_limit = EXCLUDED.credit_limit,
                balance_updated_utc = EXCLUDED.balance_updated_utc,
                display_name = EXCLUDED.display_name,
                color = EXCLUDED.color,
                is_hidden = EXCLUDED.is_hidden,
                is_active = EXCLUDED.is_active,
                deactivated_utc = EXCLUDED.deactivated_utc,
                credential_id = EXCLUDED.credential_id,
                updated_utc = EXCLUDED.updated_utc
            RETURNING {columns}
            "#,
            columns = ACCOUNT_COLUMNS
        ))
        .bind(account.account_id)
        .bind(&account.user_id)
        .bind(&account.external_id)
        .bind(&account.name)
        .bind(&account.official_name)
        .bind(&account.provider_type)
        .bind(&account.provider_subtype)
        .bind(account.account_type.as_str())
        .bind(&account.account_subtype)
        .bind(account.current_balance)
        .bind(account.available_balance)
        .bind(account.credit_limit)
        .bind(account.balance_updated_utc)
        .bind(&account.display_name)
        .bind(&account.color)
        .bind(account.is_hidden)
        .bind(account.is_active)
        .bind(account.deactivated_utc)
        .bind(account.credential_id)
        .bind(account.created_utc)
        .bind(account.updated_utc)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to upsert account: {}", e)))?;

        timer.observe_duration();

        Ok(row.into())
    }

    #[instrument(skip(self))]
    async fn list_accounts_by_user(&self, user_id: &str) -> Result<Vec<Account>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["list_accounts_by_user"])
            .start_timer();

        let rows = sqlx::query_as::<_, AccountRow>(&format!(
            "SELECT {} FROM accounts WHERE user_id = $1 ORDER BY name, external_id",
            ACCOUNT_COLUMNS
        ))
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to list accounts: {}", e)))?;

        timer.observe_duration();

        Ok(rows.into_iter().map(Into::into).collect())
    }

    // =========================================================================
    // Transaction Operations
    // =========================================================================

    #[instrument(skip(self))]
    async fn find_transaction_by_external_id(
        &self,
        external_id: &str,
    ) -> Result<Option<Transaction>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["find_transaction_by_external_id"])
            .start_timer();

        let row = sqlx::query_as::<_, TransactionRow>(&format!(
            "SELECT {} FROM transactions WHERE external_id = $1",
            TRANSACTION_COLUMNS
        ))
        .bind(external_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to get transaction: {}", e)))?;

        timer.observe_duration();

        Ok(row.map(Into::into))
    }

    #[instrument(skip(self), fields(transaction_id = %transaction_id))]
    async fn find_transaction_by_id(
        &self,
        transaction_id: Uuid,
    ) -> Result<Option<Transaction>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["find_transaction_by_id"])
            .start_timer();

        let row = sqlx::query_as::<_, TransactionRow>(&format!(
            "SELECT {} FROM transactions WHERE transaction_id = $1",
            TRANSACTION_COLUMNS
        ))
        .bind(transaction_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to get transaction: {}", e)))?;

        timer.observe_duration();

        Ok(row.map(Into::into))
    }

    #[instrument(skip(self, transaction), fields(external_id = %transaction.external_id))]
    async fn upsert_transaction(&self, transaction: Transaction) -> Result<Transaction, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["upsert_transaction"])
            .start_timer();

        let tags: Vec<String> = transaction.tags.iter().cloned().collect();

        let row = sqlx::query_as::<_, TransactionRow>(&format!(
            r#"
            INSERT INTO transactions ({columns})
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17,
                    $18, $19, $20, $21, $22)
            ON CONFLICT (external_id) DO UPDATE SET
                user_id = EXCLUDED.user_id,
                name = EXCLUDED.name,
                amount = EXCLUDED.amount,
                normalized_amount = EXCLUDED.normalized_amount,
                date = EXCLUDED.date,
                category = EXCLUDED.category,
                category_source = EXCLUDED.category_source,
                category_corrected = EXCLUDED.category_corrected,
                merchant_name = EXCLUDED.merchant_name,
                transaction_type = EXCLUDED.transaction_type,
                account_type = EXCLUDED.account_type,
                account_subtype = EXCLUDED.account_subtype,
                is_recurring = EXCLUDED.is_recurring,
                excluded_from_budget = EXCLUDED.excluded_from_budget,
                tags = EXCLUDED.tags,
                description = EXCLUDED.description,
                account_id = EXCLUDED.account_id,
                credential_id = EXCLUDED.credential_id,
                updated_utc = EXCLUDED.updated_utc
            RETURNING {columns}
            "#,
            columns = TRANSACTION_COLUMNS
        ))
        .bind(transaction.transaction_id)
        .bind(&transaction.user_id)
        .bind(&transaction.external_id)
        .bind(&transaction.name)
        .bind(transaction.amount)
        .bind(transaction.normalized_amount)
        .bind(transaction.date)
        .bind(&transaction.category)
        .bind(transaction.category_source.map(|s| s.as_str()))
        .bind(transaction.category_corrected)
        .bind(&transaction.merchant_name)
        .bind(transaction.transaction_type.as_str())
        .bind(transaction.account_type.map(|k| k.as_str()))
        .bind(&transaction.account_subtype)
        .bind(transaction.is_recurring)
        .bind(transaction.excluded_from_budget)
        .bind(&tags)
        .bind(&transaction.description)
        .bind(transaction.account_id)
        .bind(transaction.credential_id)
        .bind(transaction.created_utc)
        .bind(transaction.updated_utc)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to upsert transaction: {}", e)))?;

        timer.observe_duration();

        Ok(row.into())
    }

    #[instrument(skip(self))]
    async fn delete_transaction_by_external_id(
        &self,
        external_id: &str,
    ) -> Result<bool, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["delete_transaction"])
            .start_timer();

        let result = sqlx::query("DELETE FROM transactions WHERE external_id = $1")
            .bind(external_id)
            .execute(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to delete transaction: {}", e)))?;

        timer.observe_duration();

        Ok(result.rows_affected() > 0)
    }

    #[instrument(skip(self, filter))]
    async fn list_transactions(
        &self,
        user_id: &str,
        filter: &TransactionFilter,
    ) -> Result<(Vec<Transaction>, u64), AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["list_transactions"])
            .start_timer();

        let binds = FilterBinds::from_filter(filter);
        let limit = i64::from(filter.limit());
        let offset = i64::try_from(filter.offset())
            .map_err(|_| AppError::BadRequest(anyhow::anyhow!("Page out of range")))?;

        let total: i64 = sqlx::query_scalar(&format!(
            "SELECT COUNT(*) FROM transactions {}",
            TRANSACTION_FILTER
        ))
        .bind(user_id)
        .bind(binds.start_date)
        .bind(binds.end_date)
        .bind(&binds.categories)
        .bind(&binds.account_types)
        .bind(&binds.transaction_types)
        .bind(&binds.merchant_pattern)
        .bind(&binds.search_pattern)
        .bind(binds.min_amount)
        .bind(binds.max_amount)
        .bind(binds.exclude_transfers)
        .bind(binds.only_recurring)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to count transactions: {}", e)))?;

        let rows = sqlx::query_as::<_, TransactionRow>(&format!(
            "SELECT {} FROM transactions {} ORDER BY date DESC, transaction_id LIMIT $13 OFFSET $14",
            TRANSACTION_COLUMNS, TRANSACTION_FILTER
        ))
        .bind(user_id)
        .bind(binds.start_date)
        .bind(binds.end_date)
        .bind(&binds.categories)
        .bind(&binds.account_types)
        .bind(&binds.transaction_types)
        .bind(&binds.merchant_pattern)
        .bind(&binds.search_pattern)
        .bind(binds.min_amount)
        .bind(binds.max_amount)
        .bind(binds.exclude_transfers)
        .bind(binds.only_recurring)
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to list transactions: {}", e)))?;

        timer.observe_duration();

        Ok((
            rows.into_iter().map(Into::into).collect(),
            u64::try_from(total).unwrap_or_default(),
        ))
    }
}
