use crate::models::{Account, AccountPreferences, UserContext};
use crate::startup::AppState;
use axum::{
    extract::{Path, State},
    Json,
};
use service_core::error::AppError;

pub async fn list_accounts(
    State(state): State<AppState>,
    user: UserContext,
) -> Result<Json<Vec<Account>>, AppError> {
    Ok(Json(state.accounts.list(&user).await?))
}

pub async fn update_account(
    State(state): State<AppState>,
    user: UserContext,
    Path(external_id): Path<String>,
    Json(payload): Json<AccountPreferences>,
) -> Result<Json<Account>, AppError> {
    let account = state
        .accounts
        .update_preferences(&user, &external_id, payload)
        .await?;
    Ok(Json(account))
}
