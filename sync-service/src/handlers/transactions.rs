//! Transaction endpoints.

use crate::models::{
    AccountKind, NewTransaction, Transaction, TransactionFilter, TransactionPageResult,
    TransactionType, TransactionUpdate, UserContext,
};
use crate::models::transaction::DEFAULT_PAGE_LIMIT;
use crate::startup::AppState;
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::Deserialize;
use service_core::error::AppError;
use uuid::Uuid;

/// Query string of `GET /api/transactions`. List parameters are comma-separated.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionQuery {
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    pub category: Option<String>,
    pub account_type: Option<String>,
    pub transaction_type: Option<String>,
    pub merchant_name: Option<String>,
    pub search: Option<String>,
    pub min_amount: Option<Decimal>,
    pub max_amount: Option<Decimal>,
    pub exclude_transfers: Option<bool>,
    pub only_recurring: Option<bool>,
    pub page: Option<u32>,
    pub limit: Option<u32>,
}

fn split(raw: &Option<String>) -> Vec<String> {
    raw.as_deref()
        .unwrap_or_default()
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

impl From<TransactionQuery> for TransactionFilter {
    fn from(q: TransactionQuery) -> Self {
        Self {
            categories: split(&q.category),
            account_types: split(&q.account_type)
                .iter()
                .map(|s| AccountKind::from_str(&s.to_ascii_lowercase()))
                .collect(),
            transaction_types: split(&q.transaction_type)
                .iter()
                .map(|s| TransactionType::from_str(&s.to_ascii_lowercase()))
                .collect(),
            start_date: q.start_date,
            end_date: q.end_date,
            merchant_name: q.merchant_name,
            search: q.search,
            min_amount: q.min_amount,
            max_amount: q.max_amount,
            exclude_transfers: q.exclude_transfers.unwrap_or(false),
            only_recurring: q.only_recurring.unwrap_or(false),
            page: q.page.unwrap_or(1),
            limit: q.limit.unwrap_or(DEFAULT_PAGE_LIMIT),
        }
    }
}

pub async fn list_transactions(
    State(state): State<AppState>,
    user: UserContext,
    Query(query): Query<TransactionQuery>,
) -> Result<Json<TransactionPageResult>, AppError> {
    let filter = TransactionFilter::from(query);
    Ok(Json(state.transactions.list(&user, &filter).await?))
}

pub async fn create_transaction(
    State(state): State<AppState>,
    user: UserContext,
    Json(payload): Json<NewTransaction>,
) -> Result<(StatusCode, Json<Transaction>), AppError> {
    let transaction = state.transactions.create(&user, payload).await?;
    Ok((StatusCode::CREATED, Json(transaction)))
}

pub async fn update_transaction(
    State(state): State<AppState>,
    user: UserContext,
    Path(transaction_id): Path<Uuid>,
    Json(payload): Json<TransactionUpdate>,
) -> Result<Json<Transaction>, AppError> {
    let transaction = state
        .transactions
        .update_by_id(&user, transaction_id, payload)
        .await?;
    Ok(Json(transaction))
}

pub async fn get_by_external_id(
    State(state): State<AppState>,
    user: UserContext,
    Path(external_id): Path<String>,
) -> Result<Json<Transaction>, AppError> {
    Ok(Json(
        state
            .transactions
            .get_by_external_id(&user, &external_id)
            .await?,
    ))
}

pub async fn update_by_external_id(
    State(state): State<AppState>,
    user: UserContext,
    Path(external_id): Path<String>,
    Json(payload): Json<TransactionUpdate>,
) -> Result<Json<Transaction>, AppError> {
    let transaction = state
        .transactions
        .update_by_external_id(&user, &external_id, payload)
        .await?;
    Ok(Json(transaction))
}

pub async fn delete_by_external_id(
    State(state): State<AppState>,
    user: UserContext,
    Path(external_id): Path<String>,
) -> Result<StatusCode, AppError> {
    state
        .transactions
        .delete_by_external_id(&user, &external_id)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}
