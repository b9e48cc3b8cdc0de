//! Tally Web Server
//!
//! Axum-based REST API for statement ingestion.
//!
//! Security features:
//! - Caller identity from the `x-user-id` header set by the fronting gateway
//! - Operator endpoints (purge) require an API key
//! - Restrictive CORS policy and security headers
//! - Audit logging for reads and writes
//! - Sanitized error responses with machine-readable codes

use std::sync::Arc;

use axum::{
    extract::{DefaultBodyLimit, Request, State},
    http::{header, HeaderMap, HeaderValue, Method, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use tower_http::{cors::CorsLayer, set_header::SetResponseHeaderLayer, trace::TraceLayer};
use tracing::{error, info, warn};

use tally_core::{Database, ImportPipeline, RateLimiter, TallyConfig};

mod handlers;
mod scheduler;

pub use scheduler::{start_rate_refresh_scheduler, RateRefreshConfig};

/// Maximum statement upload size (20 MB)
pub const MAX_UPLOAD_SIZE: usize = 20 * 1024 * 1024;

/// Maximum pagination limit
pub const MAX_PAGE_LIMIT: i64 = 500;

/// Caller identity header
pub const USER_ID_HEADER: &str = "x-user-id";

/// Authorization header for API key auth
const AUTHORIZATION_HEADER: &str = "authorization";

/// Server configuration
#[derive(Clone)]
pub struct ServerConfig {
    /// Whether authentication is required (secure by default)
    pub require_auth: bool,
    /// Allowed CORS origins (empty = same-origin only)
    pub allowed_origins: Vec<String>,
    /// Operator API keys, sent as "Bearer <key>"
    pub api_keys: Vec<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            require_auth: true,
            allowed_origins: vec![],
            api_keys: vec![],
        }
    }
}

/// Shared application state
pub struct AppState {
    pub db: Database,
    pub config: ServerConfig,
    pub pipeline: ImportPipeline,
    pub limiter: RateLimiter,
}

/// Authentication middleware
///
/// A request passes with a non-empty `x-user-id` header or a valid operator
/// API key. The identity header is trusted as-is; the server must sit behind
/// a gateway that strips client-supplied values. API keys are compared in
/// constant time.
async fn auth_middleware(
    State(state): State<Arc<AppState>>,
    request: Request,
    next: Next,
) -> Response {
    if !state.config.require_auth {
        return next.run(request).await;
    }

    if caller_id(request.headers()).is_some() {
        return next.run(request).await;
    }

    if has_valid_api_key(request.headers(), &state.config.api_keys) {
        info!(user = "api-key", path = %request.uri().path(), "Authenticated via API key");
        return next.run(request).await;
    }

    warn!(path = %request.uri().path(), "Unauthorized request - no identity");
    AppError::unauthorized("Authentication required").into_response()
}

/// Validate an API key against the configured keys using constant-time comparison
fn validate_api_key(provided: &str, valid_keys: &[String]) -> bool {
    use subtle::ConstantTimeEq;

    let provided_bytes = provided.as_bytes();

    for key in valid_keys {
        let key_bytes = key.as_bytes();
        // Only compare if lengths match (constant-time for same-length keys)
        if provided_bytes.len() == key_bytes.len() && provided_bytes.ct_eq(key_bytes).into() {
            return true;
        }
    }
    false
}

fn has_valid_api_key(headers: &HeaderMap, valid_keys: &[String]) -> bool {
    headers
        .get(AUTHORIZATION_HEADER)
        .and_then(|v| v.to_str().ok())
        .and_then(|auth| auth.strip_prefix("Bearer "))
        .map(|key| validate_api_key(key, valid_keys))
        .unwrap_or(false)
}

fn caller_id(headers: &HeaderMap) -> Option<String> {
    headers
        .get(USER_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

/// Identity of the calling user, required by every user-scoped endpoint
pub fn require_user(headers: &HeaderMap) -> Result<String, AppError> {
    caller_id(headers).ok_or_else(|| AppError::unauthorized("Missing x-user-id header"))
}

/// Check operator credentials and return the audit actor
pub fn require_operator(state: &AppState, headers: &HeaderMap) -> Result<String, AppError> {
    if has_valid_api_key(headers, &state.config.api_keys) {
        return Ok("api-key".to_string());
    }
    if !state.config.require_auth {
        return Ok(caller_id(headers).unwrap_or_else(|| "local-dev".to_string()));
    }
    Err(AppError::forbidden("Operator API key required"))
}

/// Create the application router
pub fn create_router(pipeline: ImportPipeline, tally: &TallyConfig, config: ServerConfig) -> Router {
    let db = pipeline.db().clone();
    let state = Arc::new(AppState {
        limiter: RateLimiter::new(db.clone(), tally.rate_limit_per_hour),
        db,
        config: config.clone(),
        pipeline,
    });

    let api_routes = Router::new()
        // Trigger (alias of the root route)
        .route("/process-statement", post(handlers::process_statement))
        // Imports
        .route(
            "/imports",
            get(handlers::list_imports)
                .post(handlers::upload_statement)
                .layer(DefaultBodyLimit::max(MAX_UPLOAD_SIZE)),
        )
        .route("/imports/:id", get(handlers::get_import))
        .route("/imports/:id/transactions", get(handlers::list_import_transactions))
        .route("/imports/:id/checkpoints", get(handlers::get_checkpoints))
        .route("/imports/:id/cancel", post(handlers::cancel_import))
        .route("/imports/:id/purge", post(handlers::purge_import))
        // Accounts
        .route(
            "/accounts",
            get(handlers::list_accounts).post(handlers::create_account),
        )
        .route("/accounts/:id", get(handlers::get_account))
        // Rate limiting
        .route("/rate-limit", get(handlers::get_rate_limit));

    // Build CORS layer
    let cors = if config.allowed_origins.is_empty() {
        // Restrictive default: only allow same-origin
        CorsLayer::new()
            .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
            .allow_headers([
                header::CONTENT_TYPE,
                header::AUTHORIZATION,
                header::HeaderName::from_static(USER_ID_HEADER),
            ])
    } else {
        let origins: Vec<HeaderValue> = config
            .allowed_origins
            .iter()
            .filter_map(|o| o.parse().ok())
            .collect();
        CorsLayer::new()
            .allow_origin(origins)
            .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
            .allow_headers([
                header::CONTENT_TYPE,
                header::AUTHORIZATION,
                header::HeaderName::from_static(USER_ID_HEADER),
            ])
    };

    // The API serves JSON only
    let csp_value = HeaderValue::from_static("default-src 'none'; frame-ancestors 'none'");

    Router::new()
        .route("/process-statement", post(handlers::process_statement))
        .nest("/api", api_routes)
        .layer(middleware::from_fn_with_state(
            state.clone(),
            auth_middleware,
        ))
        // Health stays outside authentication for load balancer health checks
        .route("/health", get(handlers::health))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        // Security headers
        .layer(SetResponseHeaderLayer::overriding(
            header::X_CONTENT_TYPE_OPTIONS,
            HeaderValue::from_static("nosniff"),
        ))
        .layer(SetResponseHeaderLayer::overriding(
            header::X_FRAME_OPTIONS,
            HeaderValue::from_static("DENY"),
        ))
        .layer(SetResponseHeaderLayer::overriding(
            header::CONTENT_SECURITY_POLICY,
            csp_value,
        ))
}

/// Start the server with the default server configuration
pub async fn serve(db: Database, host: &str, port: u16, tally: TallyConfig) -> anyhow::Result<()> {
    serve_with_config(db, host, port, tally, ServerConfig::default()).await
}

/// Start the server with custom configuration
pub async fn serve_with_config(
    db: Database,
    host: &str,
    port: u16,
    tally: TallyConfig,
    config: ServerConfig,
) -> anyhow::Result<()> {
    if !config.require_auth {
        warn!("⚠️  Authentication disabled - do not expose to network!");
    }
    if config.api_keys.is_empty() {
        warn!("No operator API keys configured, purge endpoint is unavailable");
    }

    let pipeline = ImportPipeline::from_config(db.clone(), &tally)?;

    // Build the rate windows once so admission is not wide open until the first tick
    let limiter = RateLimiter::new(db.clone(), tally.rate_limit_per_hour);
    if let Err(e) = limiter.refresh() {
        warn!("Initial rate window refresh failed: {}", e);
    }
    start_rate_refresh_scheduler(limiter, RateRefreshConfig::from_config(&tally));

    let app = create_router(pipeline, &tally, config);
    let addr = format!("{}:{}", host, port);

    info!("Starting server at http://{}", addr);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

// ============================================================================
// Error Handling
// ============================================================================

/// Application error type with HTTP status codes and a machine-readable code
#[derive(Debug)]
pub struct AppError {
    status: StatusCode,
    code: &'static str,
    message: String,
    internal: Option<anyhow::Error>,
}

impl AppError {
    fn new(status: StatusCode, code: &'static str, msg: &str) -> Self {
        Self {
            status,
            code,
            message: msg.to_string(),
            internal: None,
        }
    }

    pub fn bad_request(msg: &str) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "BAD_REQUEST", msg)
    }

    pub fn unauthorized(msg: &str) -> Self {
        Self::new(StatusCode::UNAUTHORIZED, "UNAUTHORIZED", msg)
    }

    pub fn forbidden(msg: &str) -> Self {
        Self::new(StatusCode::FORBIDDEN, "FORBIDDEN", msg)
    }

    pub fn not_found(msg: &str) -> Self {
        Self::new(StatusCode::NOT_FOUND, "NOT_FOUND", msg)
    }

    pub fn conflict(msg: &str) -> Self {
        Self::new(StatusCode::CONFLICT, "CONFLICT", msg)
    }

    pub fn rate_limited(msg: &str) -> Self {
        Self::new(StatusCode::TOO_MANY_REQUESTS, "RATE_LIMITED", msg)
    }

    pub fn internal(msg: &str) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR", msg)
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn code(&self) -> &'static str {
        self.code
    }

    /// Map caller-facing core errors; everything else is internal
    fn from_core(err: &tally_core::Error) -> Option<Self> {
        use tally_core::Error;

        let mapped = match err {
            Error::NotFound(what) => Self::not_found(&format!("{} not found", what)),
            Error::Forbidden(_) => Self::forbidden("Access denied"),
            Error::FileNotInStorage(_) => Self::new(
                StatusCode::NOT_FOUND,
                "FILE_NOT_IN_STORAGE",
                "Statement file is not in storage",
            ),
            Error::InvalidTransition { .. } | Error::Conflict(_) => Self::conflict(&err.to_string()),
            Error::InvalidData(msg) => Self::bad_request(msg),
            _ => return None,
        };
        Some(mapped)
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        // Log the full internal error if present
        if let Some(err) = &self.internal {
            error!(error = %err, "Internal error");
        }

        let body = Json(serde_json::json!({
            "error": self.message,
            "code": self.code,
        }));

        (self.status, body).into_response()
    }
}

impl<E> From<E> for AppError
where
    E: Into<anyhow::Error>,
{
    fn from(err: E) -> Self {
        let err = err.into();
        if let Some(mapped) = err.downcast_ref::<tally_core::Error>().and_then(Self::from_core) {
            return mapped;
        }
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            code: "INTERNAL_ERROR",
            // Return generic message to client
            message: "An internal error occurred".to_string(),
            // Keep full error for logging
            internal: Some(err),
        }
    }
}

#[cfg(test)]
mod tests;
