//! HTTP OCR engine
//!
//! Posts the statement bytes (base64) to `{OCR_HOST}/v1/ocr` and expects
//! `{"markdown": "...", "page_count": n}` back.

use async_trait::async_trait;
use base64::Engine;
use reqwest::Client;
use serde::Serialize;
use tracing::debug;

use super::{OcrEngine, OcrOutput};
use crate::error::{Error, Result};

#[derive(Clone)]
pub struct HttpOcrEngine {
    http_client: Client,
    base_url: String,
    api_key: Option<String>,
}

impl HttpOcrEngine {
    pub fn new(base_url: &str) -> Self {
        Self {
            http_client: Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: None,
        }
    }

    /// Create with a bearer token
    pub fn with_api_key(base_url: &str, api_key: &str) -> Self {
        Self {
            api_key: Some(api_key.to_string()),
            ..Self::new(base_url)
        }
    }

    /// Required: `OCR_HOST`. Optional: `OCR_API_KEY`
    pub fn from_env() -> Option<Self> {
        let host = std::env::var("OCR_HOST").ok()?;
        let mut engine = Self::new(&host);
        engine.api_key = std::env::var("OCR_API_KEY").ok().filter(|k| !k.is_empty());
        Some(engine)
    }
}

#[derive(Debug, Serialize)]
struct OcrRequest<'a> {
    file_name: &'a str,
    content_base64: String,
}

#[async_trait]
impl OcrEngine for HttpOcrEngine {
    async fn recognize(&self, file_name: &str, data: &[u8]) -> Result<OcrOutput> {
        let request = OcrRequest {
            file_name,
            content_base64: base64::engine::general_purpose::STANDARD.encode(data),
        };

        let mut req_builder = self
            .http_client
            .post(format!("{}/v1/ocr", self.base_url))
            .json(&request);

        if let Some(ref api_key) = self.api_key {
            req_builder = req_builder.header("Authorization", format!("Bearer {}", api_key));
        }

        let response = req_builder.send().await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Extraction(format!("OCR engine error {}: {}", status, body)));
        }

        let output: OcrOutput = response
            .json()
            .await
            .map_err(|e| Error::Extraction(format!("Invalid OCR engine response: {}", e)))?;
        debug!(
            file_name,
            pages = output.page_count,
            chars = output.markdown.len(),
            "OCR engine response"
        );

        Ok(output)
    }

    fn host(&self) -> &str {
        &self.base_url
    }
}
