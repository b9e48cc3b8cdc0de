//! Test utilities for tally-core
//!
//! A mock HTTP server speaking the OCR engine protocol and both extractor
//! protocols (Ollama and OpenAI-compatible), for integration tests and local
//! development without real backends.

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use axum::{
    extract::{Json, State},
    http::StatusCode,
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::sync::oneshot;

#[derive(Clone, Default)]
struct MockState {
    document: Arc<Mutex<Value>>,
    ocr_markdown: Arc<Mutex<Option<String>>>,
    failing: Arc<Mutex<bool>>,
}

impl MockState {
    fn document(&self) -> Value {
        self.document.lock().unwrap().clone()
    }

    fn failing(&self) -> bool {
        *self.failing.lock().unwrap()
    }
}

/// Mock OCR + extractor server
pub struct MockExtractorServer {
    addr: SocketAddr,
    state: MockState,
    shutdown_tx: Option<oneshot::Sender<()>>,
}

impl MockExtractorServer {
    /// Start the mock server on an available port
    pub async fn start() -> Self {
        let state = MockState::default();
        *state.document.lock().unwrap() = json!({ "transactions": [] });

        let app = Router::new()
            .route("/api/tags", get(handle_tags))
            .route("/api/generate", post(handle_generate))
            .route("/v1/models", get(handle_models))
            .route("/v1/chat/completions", post(handle_chat))
            .route("/v1/ocr", post(handle_ocr))
            .with_state(state.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let (shutdown_tx, shutdown_rx) = oneshot::channel();

        tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async {
                    shutdown_rx.await.ok();
                })
                .await
                .unwrap();
        });

        Self {
            addr,
            state,
            shutdown_tx: Some(shutdown_tx),
        }
    }

    /// Get the base URL for this mock server
    pub fn url(&self) -> String {
        format!("http://{}", self.addr)
    }

    /// Document returned by both extractor endpoints
    pub fn set_document(&self, document: Value) {
        *self.state.document.lock().unwrap() = document;
    }

    /// Fixed OCR text (default: the uploaded bytes decoded as UTF-8)
    pub fn set_ocr_markdown(&self, markdown: &str) {
        *self.state.ocr_markdown.lock().unwrap() = Some(markdown.to_string());
    }

    /// Make every endpoint answer 500
    pub fn set_failing(&self, failing: bool) {
        *self.state.failing.lock().unwrap() = failing;
    }

    /// Stop the mock server
    pub fn stop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
    }
}

impl Drop for MockExtractorServer {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn handle_tags() -> Json<Value> {
    Json(json!({ "models": [{ "name": "llama3.2:latest", "size": 4_000_000_000u64 }] }))
}

async fn handle_models() -> Json<Value> {
    Json(json!({ "object": "list", "data": [{ "id": "gpt-4o-mini", "object": "model" }] }))
}

#[derive(Debug, Deserialize)]
struct GenerateRequest {
    model: String,
    #[allow(dead_code)]
    prompt: String,
}

#[derive(Debug, Serialize)]
struct GenerateResponse {
    model: String,
    response: String,
    done: bool,
}

async fn handle_generate(
    State(state): State<MockState>,
    Json(request): Json<GenerateRequest>,
) -> Result<Json<GenerateResponse>, StatusCode> {
    if state.failing() {
        return Err(StatusCode::INTERNAL_SERVER_ERROR);
    }
    Ok(Json(GenerateResponse {
        model: request.model,
        response: state.document().to_string(),
        done: true,
    }))
}

async fn handle_chat(
    State(state): State<MockState>,
    Json(request): Json<Value>,
) -> Result<Json<Value>, StatusCode> {
    if state.failing() {
        return Err(StatusCode::INTERNAL_SERVER_ERROR);
    }
    Ok(Json(json!({
        "model": request.get("model").cloned().unwrap_or(Value::Null),
        "choices": [{
            "index": 0,
            "message": { "role": "assistant", "content": state.document().to_string() },
            "finish_reason": "stop"
        }]
    })))
}

#[derive(Debug, Deserialize)]
struct OcrRequest {
    #[allow(dead_code)]
    file_name: String,
    content_base64: String,
}

async fn handle_ocr(
    State(state): State<MockState>,
    Json(request): Json<OcrRequest>,
) -> Result<Json<Value>, StatusCode> {
    use base64::Engine;

    if state.failing() {
        return Err(StatusCode::INTERNAL_SERVER_ERROR);
    }
    let fixed = state.ocr_markdown.lock().unwrap().clone();
    let markdown = match fixed {
        Some(markdown) => markdown,
        None => {
            let bytes = base64::engine::general_purpose::STANDARD
                .decode(request.content_base64)
                .map_err(|_| StatusCode::BAD_REQUEST)?;
            String::from_utf8_lossy(&bytes).to_string()
        }
    };
    Ok(Json(json!({ "markdown": markdown, "page_count": 1 })))
}
