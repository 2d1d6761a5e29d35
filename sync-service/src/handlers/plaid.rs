//! Provider link and sync endpoints.

use crate::models::{CredentialSummary, UserContext};
use crate::provider::LinkToken;
use crate::services::LinkRequest;
use crate::startup::AppState;
use crate::sync::{SyncReport, SyncStatus};
use axum::{extract::State, http::StatusCode, Json};
use service_core::error::AppError;

pub async fn create_link_token(
    State(state): State<AppState>,
    user: UserContext,
) -> Result<Json<LinkToken>, AppError> {
    let token = state.credentials.create_link_token(&user).await?;
    Ok(Json(token))
}

pub async fn exchange_public_token(
    State(state): State<AppState>,
    user: UserContext,
    Json(payload): Json<LinkRequest>,
) -> Result<Json<CredentialSummary>, AppError> {
    tracing::info!(user_id = %user.user_id, "Exchanging public token");
    let credential = state.credentials.link_credential(&user, payload).await?;
    Ok(Json(credential))
}

/// Sync every active credential of the caller.
///
/// Answers 200 when at least one credential synced (the body says which did
/// not) and 502 when all of them failed.
pub async fn sync_transactions(
    State(state): State<AppState>,
    user: UserContext,
) -> Result<(StatusCode, Json<SyncReport>), AppError> {
    let cancel = state.shutdown.child_token();
    let report = state.orchestrator.sync_user(&user, cancel).await?;

    let status = match report.status {
        SyncStatus::Failed => StatusCode::BAD_GATEWAY,
        SyncStatus::Complete | SyncStatus::Partial => StatusCode::OK,
    };
    Ok((status, Json(report)))
}

pub async fn list_items(
    State(state): State<AppState>,
    user: UserContext,
) -> Result<Json<Vec<CredentialSummary>>, AppError> {
    Ok(Json(state.credentials.list_credentials(&user).await?))
}
