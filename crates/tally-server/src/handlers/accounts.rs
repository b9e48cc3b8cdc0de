//! Account handlers

use std::sync::Arc;

use axum::{
    extract::{Path, Request, State},
    http::{HeaderMap, StatusCode},
    Json,
};
use serde::Deserialize;

use crate::{require_user, AppError, AppState};
use tally_core::models::Account;

/// Request body for creating an account
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateAccountRequest {
    pub name: String,
    #[serde(default)]
    pub opening_balance: f64,
}

/// GET /api/accounts - List the caller's accounts
pub async fn list_accounts(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<Vec<Account>>, AppError> {
    let user_id = require_user(&headers)?;

    let accounts = state.db.list_accounts(Some(&user_id))?;

    // Audit log - read access
    state.db.log_audit(
        &user_id,
        "list",
        Some("account"),
        None,
        Some(&format!("count={}", accounts.len())),
    )?;

    Ok(Json(accounts))
}

/// POST /api/accounts - Create an account for the caller
pub async fn create_account(
    State(state): State<Arc<AppState>>,
    request: Request,
) -> Result<(StatusCode, Json<Account>), AppError> {
    let user_id = require_user(request.headers())?;

    // Extract JSON body
    let bytes = axum::body::to_bytes(request.into_body(), 1024 * 10)
        .await
        .map_err(|_| AppError::bad_request("Invalid request body"))?;
    let req: CreateAccountRequest =
        serde_json::from_slice(&bytes).map_err(|_| AppError::bad_request("Invalid JSON"))?;

    let name = req.name.trim();
    if name.is_empty() {
        return Err(AppError::bad_request("Account name is required"));
    }
    if !req.opening_balance.is_finite() {
        return Err(AppError::bad_request("Opening balance must be a number"));
    }

    let account_id = state
        .db
        .create_account(&user_id, name, req.opening_balance)?;

    state.db.log_audit(
        &user_id,
        "create",
        Some("account"),
        Some(account_id),
        Some(&format!("name={}", name)),
    )?;

    let account = state
        .db
        .get_account(account_id)?
        .ok_or_else(|| AppError::internal("Account not found after creation"))?;

    Ok((StatusCode::CREATED, Json(account)))
}

/// GET /api/accounts/:id - Get one of the caller's accounts
pub async fn get_account(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
    headers: HeaderMap,
) -> Result<Json<Account>, AppError> {
    let user_id = require_user(&headers)?;

    let account = state
        .db
        .get_account(id)?
        .ok_or_else(|| AppError::not_found(&format!("Account {} not found", id)))?;
    if account.user_id != user_id {
        return Err(AppError::forbidden("Access denied"));
    }

    state
        .db
        .log_audit(&user_id, "get", Some("account"), Some(id), None)?;

    Ok(Json(account))
}
