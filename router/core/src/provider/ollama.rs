//! Ollama Provider
//!
//! Local inference through an Ollama server.
//!
//! # Ollama API
//!
//! - `/api/tags` - List installed models (used as the liveness probe)
//! - `/api/generate` - Completions, NDJSON when streaming
//!
//! Local inference has no quota, so rate limits are the unlimited sentinel.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Value};

use super::error::ProviderError;
use super::http::{build_client, classify_status, classify_transport, line_stream, LineEvent};
use super::traits::{ChunkStream, Provider};
use super::types::{GenerateRequest, GenerateResponse, ProviderTier, RateLimitInfo, Usage};

/// Default server address
pub const DEFAULT_OLLAMA_URL: &str = "http://localhost:11434";

/// Default model
pub const DEFAULT_OLLAMA_MODEL: &str = "llama3.2";

const PROVIDER_NAME: &str = "ollama";
const PROBE_TIMEOUT: Duration = Duration::from_secs(5);
const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

/// Ollama provider client
pub struct OllamaProvider {
    /// Server base URL without trailing slash
    base_url: String,
    /// Model used for completions
    model: String,
    /// HTTP client with the per-call timeout applied
    http_client: reqwest::Client,
    /// Installed models seen by the last probe
    models: Mutex<Option<Vec<String>>>,
}

impl OllamaProvider {
    /// Create a new Ollama provider
    pub fn new(base_url: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            model: model.into(),
            http_client: build_client(REQUEST_TIMEOUT),
            models: Mutex::new(None),
        }
    }

    /// Override the per-call timeout
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.http_client = build_client(timeout);
        self
    }

    /// Model used for completions
    #[must_use]
    pub fn model(&self) -> &str {
        &self.model
    }

    fn generate_url(&self) -> String {
        format!("{}/api/generate", self.base_url)
    }

    fn tags_url(&self) -> String {
        format!("{}/api/tags", self.base_url)
    }

    fn request_body(&self, request: &GenerateRequest, stream: bool) -> Value {
        let mut options = json!({
            "temperature": request.temperature,
            "num_predict": request.max_tokens,
        });
        if !request.stop.is_empty() {
            options["stop"] = json!(request.stop);
        }

        json!({
            "model": self.model,
            "prompt": request.flattened_prompt(),
            "stream": stream,
            "options": options,
        })
    }

    async fn post_generate(
        &self,
        request: &GenerateRequest,
        stream: bool,
    ) -> Result<reqwest::Response, ProviderError> {
        let response = self
            .http_client
            .post(self.generate_url())
            .json(&self.request_body(request, stream))
            .send()
            .await
            .map_err(|e| classify_transport(PROVIDER_NAME, &e))?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(ProviderError::unavailable(
                PROVIDER_NAME,
                format!("Model '{}' not found. Run: ollama pull {}", self.model, self.model),
            ));
        }

        let headers = response.headers().clone();
        let body = response.text().await.unwrap_or_default();
        Err(classify_status(PROVIDER_NAME, status, &headers, &body))
    }

    async fn fetch_models(&self) -> Option<Vec<String>> {
        let response = self
            .http_client
            .get(self.tags_url())
            .timeout(PROBE_TIMEOUT)
            .send()
            .await
            .ok()?;

        if !response.status().is_success() {
            tracing::debug!(status = %response.status(), "Ollama tags request failed");
            return None;
        }

        let data: Value = response.json().await.ok()?;
        let names = data
            .get("models")
            .and_then(Value::as_array)
            .map(|arr| {
                arr.iter()
                    .filter_map(|m| m.get("name").and_then(Value::as_str))
                    .map(String::from)
                    .collect::<Vec<_>>()
            })
            .unwrap_or_default();

        *self.models.lock() = Some(names.clone());
        Some(names)
    }
}

impl Default for OllamaProvider {
    fn default() -> Self {
        Self::new(DEFAULT_OLLAMA_URL, DEFAULT_OLLAMA_MODEL)
    }
}

/// Parse one NDJSON line from `/api/generate`
fn parse_ndjson_line(line: &str) -> LineEvent {
    let Ok(data) = serde_json::from_str::<Value>(line) else {
        return LineEvent::Skip;
    };

    if let Some(error) = data.get("error").and_then(Value::as_str) {
        return LineEvent::Fail(ProviderError::other(PROVIDER_NAME, error.to_string()));
    }

    let token = data
        .get("response")
        .and_then(Value::as_str)
        .unwrap_or_default();
    let done = data.get("done").and_then(Value::as_bool).unwrap_or(false);

    match (token.is_empty(), done) {
        (false, _) => LineEvent::Chunk(token.to_string()),
        (true, true) => LineEvent::Done,
        (true, false) => LineEvent::Skip,
    }
}

#[async_trait]
impl Provider for OllamaProvider {
    fn name(&self) -> &str {
        PROVIDER_NAME
    }

    fn tier(&self) -> ProviderTier {
        ProviderTier::Local
    }

    async fn is_available(&self) -> bool {
        let Some(models) = self.fetch_models().await else {
            tracing::debug!(url = %self.base_url, "Ollama not reachable");
            return false;
        };

        if models.is_empty() {
            tracing::debug!("Ollama reachable but no models installed");
            return false;
        }

        if !models.iter().any(|m| m.starts_with(&self.model)) {
            tracing::warn!(
                model = %self.model,
                installed = ?models,
                "Configured Ollama model is not installed"
            );
        }

        true
    }

    async fn generate(&self, request: &GenerateRequest) -> Result<GenerateResponse, ProviderError> {
        let start = Instant::now();
        let response = self.post_generate(request, false).await?;

        let data: Value = response
            .json()
            .await
            .map_err(|e| ProviderError::request_failed(PROVIDER_NAME, e))?;

        let text = data
            .get("response")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let usage = Usage::new(
            data.get("prompt_eval_count").and_then(Value::as_u64).unwrap_or(0),
            data.get("eval_count").and_then(Value::as_u64).unwrap_or(0),
        );
        let finish_reason = match data.get("done_reason").and_then(Value::as_str) {
            Some("length") => "length",
            _ => "stop",
        };

        tracing::debug!(
            model = %self.model,
            tokens = usage.total_tokens,
            elapsed_ms = start.elapsed().as_millis(),
            "Ollama generation complete"
        );

        Ok(GenerateResponse::new(text, PROVIDER_NAME, self.model.clone())
            .with_usage(usage)
            .with_finish_reason(finish_reason)
            .with_raw(data))
    }

    async fn generate_stream(&self, request: &GenerateRequest) -> Result<ChunkStream, ProviderError> {
        let response = self.post_generate(request, true).await?;
        Ok(line_stream(PROVIDER_NAME, response, parse_ndjson_line))
    }

    async fn rate_limits(&self) -> Result<RateLimitInfo, ProviderError> {
        Ok(RateLimitInfo::unlimited(ProviderTier::Local))
    }

    async fn models(&self) -> Vec<String> {
        let cached = self.models.lock().clone();
        if let Some(cached) = cached.filter(|m| !m.is_empty()) {
            return cached;
        }
        self.fetch_models().await.unwrap_or_default()
    }
}
