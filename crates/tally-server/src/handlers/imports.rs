//! Statement import handlers

use std::sync::Arc;

use axum::{
    extract::{Multipart, Path, Query, Request, State},
    http::{HeaderMap, StatusCode},
    Json,
};
use serde::{Deserialize, Serialize};

use crate::{require_operator, require_user, AppError, AppState, MAX_PAGE_LIMIT, MAX_UPLOAD_SIZE};
use tally_core::models::{
    CountRegression, ImportCheckpoint, ImportOutcome, StatementImport, Transaction,
};
use tally_core::purge::{self, PurgeReport};

/// Request body for the processing trigger
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessStatementRequest {
    #[serde(alias = "importId")]
    pub statement_import_id: i64,
}

/// POST /process-statement (also /api/process-statement) - Run a pending import to a terminal status
pub async fn process_statement(
    State(state): State<Arc<AppState>>,
    request: Request,
) -> Result<Json<ImportOutcome>, AppError> {
    let user_id = require_user(request.headers())?;

    let bytes = axum::body::to_bytes(request.into_body(), 1024)
        .await
        .map_err(|_| AppError::bad_request("Invalid request body"))?;
    let req: ProcessStatementRequest = serde_json::from_slice(&bytes)
        .map_err(|_| AppError::bad_request("Expected {\"statementImportId\": <id>}"))?;

    let outcome = state
        .pipeline
        .process(req.statement_import_id, &user_id)
        .await?;

    Ok(Json(outcome))
}

/// POST /api/imports - Upload a statement file
///
/// Expects multipart form with:
/// - file: statement file (PDF, image or CSV; max 20MB)
/// - accountId: destination account (required)
pub async fn upload_statement(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    mut multipart: Multipart,
) -> Result<(StatusCode, Json<StatementImport>), AppError> {
    let user_id = require_user(&headers)?;

    if !state.limiter.admit(&user_id)? {
        return Err(AppError::rate_limited(&format!(
            "Import limit of {} per hour reached",
            state.limiter.limit()
        )));
    }

    let mut file: Option<(String, Vec<u8>)> = None;
    let mut account_id: Option<i64> = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| AppError::bad_request(&format!("Failed to read form field: {}", e)))?
    {
        let name = field.name().unwrap_or("").to_string();
        match name.as_str() {
            "file" => {
                let file_name = field
                    .file_name()
                    .filter(|n| !n.is_empty())
                    .unwrap_or("statement")
                    .to_string();
                let bytes = field
                    .bytes()
                    .await
                    .map_err(|_| AppError::bad_request("Failed to read file data"))?;

                if bytes.len() > MAX_UPLOAD_SIZE {
                    return Err(AppError::bad_request(&format!(
                        "File too large. Maximum size is {} MB",
                        MAX_UPLOAD_SIZE / 1024 / 1024
                    )));
                }
                file = Some((file_name, bytes.to_vec()));
            }
            "accountId" | "account_id" => {
                let value = field
                    .text()
                    .await
                    .map_err(|_| AppError::bad_request("Failed to read accountId"))?;
                account_id = Some(value.trim().parse().map_err(|_| {
                    AppError::bad_request(&format!("Invalid accountId: {}", value))
                })?);
            }
            _ => {}
        }
    }

    let (file_name, data) = file.ok_or_else(|| AppError::bad_request("Missing file field"))?;
    let account_id = account_id.ok_or_else(|| AppError::bad_request("Missing accountId field"))?;

    let import = state
        .pipeline
        .upload(&user_id, account_id, &file_name, data)
        .await?;

    state.db.log_audit(
        &user_id,
        "upload",
        Some("statement_import"),
        Some(import.id),
        Some(&format!(
            "file={}, correlationId={}",
            import.file_name, import.correlation_id
        )),
    )?;

    Ok((StatusCode::CREATED, Json(import)))
}

/// Query parameters for listing imports
#[derive(Debug, Deserialize)]
pub struct ImportsQuery {
    #[serde(default = "default_limit")]
    pub limit: i64,
}

fn default_limit() -> i64 {
    50
}

/// GET /api/imports - List the caller's imports, newest first
pub async fn list_imports(
    State(state): State<Arc<AppState>>,
    Query(params): Query<ImportsQuery>,
    headers: HeaderMap,
) -> Result<Json<Vec<StatementImport>>, AppError> {
    let user_id = require_user(&headers)?;
    let limit = params.limit.clamp(1, MAX_PAGE_LIMIT);

    let imports = state.db.list_statement_imports(&user_id, limit)?;

    state.db.log_audit(
        &user_id,
        "list",
        Some("statement_import"),
        None,
        Some(&format!("count={}", imports.len())),
    )?;

    Ok(Json(imports))
}

/// GET /api/imports/:id - Import status, counts and metadata
pub async fn get_import(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
    headers: HeaderMap,
) -> Result<Json<StatementImport>, AppError> {
    let user_id = require_user(&headers)?;
    let import = state.pipeline.import_for_user(id, &user_id)?;

    state
        .db
        .log_audit(&user_id, "get", Some("statement_import"), Some(id), None)?;

    Ok(Json(import))
}

/// GET /api/imports/:id/transactions - Ledger rows written by an import
pub async fn list_import_transactions(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
    headers: HeaderMap,
) -> Result<Json<Vec<Transaction>>, AppError> {
    let user_id = require_user(&headers)?;
    state.pipeline.import_for_user(id, &user_id)?;

    let transactions = state.db.list_import_transactions(id)?;

    state.db.log_audit(
        &user_id,
        "list",
        Some("transaction"),
        None,
        Some(&format!("import={}, count={}", id, transactions.len())),
    )?;

    Ok(Json(transactions))
}

/// Checkpoint trail with any count drops nothing accounts for
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckpointsResponse {
    pub checkpoints: Vec<ImportCheckpoint>,
    pub unexplained_drops: Vec<CountRegression>,
}

/// GET /api/imports/:id/checkpoints
pub async fn get_checkpoints(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
    headers: HeaderMap,
) -> Result<Json<CheckpointsResponse>, AppError> {
    let user_id = require_user(&headers)?;
    state.pipeline.import_for_user(id, &user_id)?;

    let checkpoints = state.db.list_checkpoints(id)?;
    let unexplained_drops = state.pipeline.state_machine().unexplained_drops(id)?;

    state
        .db
        .log_audit(&user_id, "get", Some("import_checkpoint"), Some(id), None)?;

    Ok(Json(CheckpointsResponse {
        checkpoints,
        unexplained_drops,
    }))
}

/// POST /api/imports/:id/cancel - Cancel a pending or processing import
pub async fn cancel_import(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
    headers: HeaderMap,
) -> Result<Json<StatementImport>, AppError> {
    let user_id = require_user(&headers)?;
    state.pipeline.import_for_user(id, &user_id)?;

    let import = state.pipeline.state_machine().cancel(id, &user_id)?;
    Ok(Json(import))
}

/// Request body for purging an import
#[derive(Debug, Deserialize)]
pub struct PurgeRequest {
    pub reason: String,
}

/// POST /api/imports/:id/purge - Remove everything a bad import wrote (operator only)
pub async fn purge_import(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
    request: Request,
) -> Result<Json<PurgeReport>, AppError> {
    let actor = require_operator(&state, request.headers())?;

    let bytes = axum::body::to_bytes(request.into_body(), 1024 * 10)
        .await
        .map_err(|_| AppError::bad_request("Invalid request body"))?;
    let req: PurgeRequest =
        serde_json::from_slice(&bytes).map_err(|_| AppError::bad_request("Invalid JSON"))?;

    let reason = req.reason.trim();
    if reason.is_empty() {
        return Err(AppError::bad_request("A purge reason is required"));
    }

    let report = purge::purge_import(&state.db, id, reason, &actor)?;
    Ok(Json(report))
}
