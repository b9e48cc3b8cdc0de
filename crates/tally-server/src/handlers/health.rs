//! Health and rate-limit status handlers

use std::sync::Arc;

use axum::{extract::State, http::HeaderMap, Json};
use serde::Serialize;

use crate::{require_user, AppError, AppState};

/// Health check response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub database: bool,
}

/// GET /health - Liveness and database reachability
pub async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    let database = state.db.conn().is_ok();
    Json(HealthResponse {
        status: if database { "ok" } else { "degraded" },
        version: env!("CARGO_PKG_VERSION"),
        database,
    })
}

/// Caller's standing against the hourly import limit
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RateLimitResponse {
    pub limit: i64,
    /// Imports counted at the last refresh
    pub used: i64,
    pub refreshed_at: Option<String>,
}

/// GET /api/rate-limit
pub async fn get_rate_limit(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<RateLimitResponse>, AppError> {
    let user_id = require_user(&headers)?;
    let window = state.db.get_rate_window(&user_id)?;

    Ok(Json(RateLimitResponse {
        limit: state.limiter.limit(),
        used: window.as_ref().map(|w| w.import_count).unwrap_or(0),
        refreshed_at: window.map(|w| w.refreshed_at.to_rfc3339()),
    }))
}
