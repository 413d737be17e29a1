//! Gemini Provider (BYOK)
//!
//! Google's Generative Language REST API, using the caller's own API key.
//!
//! # Endpoints
//!
//! - `POST /v1beta/models/{model}:generateContent`
//! - `POST /v1beta/models/{model}:streamGenerateContent?alt=sse`
//!
//! Availability is purely local: the provider is available iff a key is
//! configured. Throttled calls are retried in place with exponential backoff
//! before the rate limit is surfaced to the router.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::error::{ProviderError, RateLimitDetails};
use super::http::{
    build_client, classify_status, classify_transport, in_band_error, line_stream, sse_data,
    LineEvent,
};
use super::retry::RetryConfig;
use super::traits::{ChunkStream, Provider};
use super::types::{
    GenerateRequest, GenerateResponse, ProviderTier, RateLimitInfo, RateLimitPeriod, Role, Usage,
};

/// Public API endpoint
pub const DEFAULT_GEMINI_URL: &str = "https://generativelanguage.googleapis.com";

/// Default model
pub const DEFAULT_GEMINI_MODEL: &str = "gemini-1.5-flash";

/// Models offered to callers
pub const GEMINI_MODELS: &[&str] = &[
    "gemini-1.5-flash",
    "gemini-1.5-flash-8b",
    "gemini-1.5-pro",
    "gemini-2.0-flash-exp",
];

/// Free-tier requests per day
pub const GEMINI_DAILY_LIMIT: u64 = 1500;

const PROVIDER_NAME: &str = "gemini";
const UPGRADE_URL: &str = "https://ai.google.dev/pricing";
const KEY_URL: &str = "https://aistudio.google.com/app/apikey";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

// ============================================================================
// Wire types
// ============================================================================

#[derive(Serialize, Deserialize)]
struct Part {
    #[serde(default)]
    text: String,
}

#[derive(Serialize)]
struct Content {
    role: &'static str,
    parts: Vec<Part>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    temperature: f32,
    max_output_tokens: u32,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    stop_sequences: Vec<String>,
}

#[derive(Serialize)]
struct SystemInstruction {
    parts: Vec<Part>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiRequest {
    contents: Vec<Content>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system_instruction: Option<SystemInstruction>,
    generation_config: GenerationConfig,
}

#[derive(Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    #[serde(default)]
    usage_metadata: Option<UsageMetadata>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    #[serde(default)]
    content: Option<CandidateContent>,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct UsageMetadata {
    #[serde(default)]
    prompt_token_count: u64,
    #[serde(default)]
    candidates_token_count: u64,
    #[serde(default)]
    total_token_count: u64,
}

impl GeminiResponse {
    fn text(&self) -> String {
        self.candidates
            .first()
            .and_then(|c| c.content.as_ref())
            .map(|c| c.parts.iter().map(|p| p.text.as_str()).collect())
            .unwrap_or_default()
    }
}

// ============================================================================
// Provider
// ============================================================================

/// Gemini provider using a caller-supplied key
pub struct GeminiProvider {
    api_key: Option<String>,
    model: String,
    base_url: String,
    retry: RetryConfig,
    http_client: reqwest::Client,
    /// Successful requests made by this process, for the quota estimate
    requests_made: AtomicU64,
}

impl GeminiProvider {
    /// Create a provider; an empty key leaves it unavailable
    pub fn new(api_key: Option<String>, model: impl Into<String>) -> Self {
        Self {
            api_key: api_key.filter(|k| !k.trim().is_empty()),
            model: model.into(),
            base_url: DEFAULT_GEMINI_URL.to_string(),
            retry: RetryConfig::default(),
            http_client: build_client(REQUEST_TIMEOUT),
            requests_made: AtomicU64::new(0),
        }
    }

    /// Point at a different API host
    #[must_use]
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    /// Override the in-place retry policy for throttled calls
    #[must_use]
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Override the per-call timeout
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.http_client = build_client(timeout);
        self
    }

    fn key(&self) -> Result<&str, ProviderError> {
        self.api_key.as_deref().ok_or_else(|| {
            ProviderError::config(
                PROVIDER_NAME,
                format!("No Gemini API key configured. Get a key at: {KEY_URL}"),
            )
        })
    }

    fn endpoint(&self, stream: bool) -> String {
        if stream {
            format!(
                "{}/v1beta/models/{}:streamGenerateContent?alt=sse",
                self.base_url, self.model
            )
        } else {
            format!("{}/v1beta/models/{}:generateContent", self.base_url, self.model)
        }
    }

    fn request_body(request: &GenerateRequest) -> GeminiRequest {
        let mut contents: Vec<Content> = request
            .messages
            .iter()
            .filter(|m| m.role != Role::System)
            .map(|m| Content {
                role: if m.role == Role::User { "user" } else { "model" },
                parts: vec![Part {
                    text: m.content.clone(),
                }],
            })
            .collect();
        contents.push(Content {
            role: "user",
            parts: vec![Part {
                text: request.prompt.clone(),
            }],
        });

        GeminiRequest {
            contents,
            system_instruction: request.system.as_ref().map(|s| SystemInstruction {
                parts: vec![Part { text: s.clone() }],
            }),
            generation_config: GenerationConfig {
                temperature: request.temperature,
                max_output_tokens: request.max_tokens,
                stop_sequences: request.stop.clone(),
            },
        }
    }

    /// Map a failed response, recognizing Gemini's "bad key" 400s
    fn classify(status: reqwest::StatusCode, headers: &reqwest::header::HeaderMap, body: &str) -> ProviderError {
        let lowered = body.to_lowercase();
        if status == reqwest::StatusCode::BAD_REQUEST && lowered.contains("api key") {
            return ProviderError::config(
                PROVIDER_NAME,
                format!("Invalid or expired Gemini API key. Get a new key at: {KEY_URL}"),
            );
        }

        match classify_status(PROVIDER_NAME, status, headers, body) {
            ProviderError::Config { .. } => ProviderError::config(
                PROVIDER_NAME,
                format!("Invalid or expired Gemini API key. Get a new key at: {KEY_URL}"),
            ),
            other => other,
        }
    }

    /// Send with in-place backoff on throttling
    async fn send(&self, request: &GenerateRequest, stream: bool) -> Result<reqwest::Response, ProviderError> {
        let key = self.key()?;
        let body = Self::request_body(request);
        let attempts = self.retry.max_attempts.max(1);
        let mut last_details = RateLimitDetails::default();

        for attempt in 0..attempts {
            let response = self
                .http_client
                .post(self.endpoint(stream))
                .header("x-goog-api-key", key)
                .json(&body)
                .send()
                .await
                .map_err(|e| classify_transport(PROVIDER_NAME, &e))?;

            let status = response.status();
            if status.is_success() {
                return Ok(response);
            }

            let headers = response.headers().clone();
            let text = response.text().await.unwrap_or_default();
            let error = Self::classify(status, &headers, &text);

            let ProviderError::RateLimited { details, .. } = error else {
                return Err(error);
            };
            last_details = details;

            if attempt + 1 < attempts {
                let wait = self.retry.backoff_for_attempt(attempt);
                tracing::warn!(
                    attempt = attempt + 1,
                    max_attempts = attempts,
                    wait_ms = u64::try_from(wait.as_millis()).unwrap_or(u64::MAX),
                    "Gemini rate limit hit, retrying"
                );
                tokio::time::sleep(wait).await;
            }
        }

        Err(ProviderError::rate_limited(
            PROVIDER_NAME,
            "Rate limit exceeded after retries. Consider upgrading your plan.",
            RateLimitDetails {
                retry_after: last_details.retry_after.or(Some(Duration::from_secs(60))),
                upgrade_url: Some(UPGRADE_URL.to_string()),
                ..last_details
            },
        ))
    }
}

fn parse_sse_line(line: &str) -> LineEvent {
    let Some(data) = sse_data(line) else {
        return LineEvent::Skip;
    };

    let Ok(value) = serde_json::from_str::<Value>(data) else {
        return LineEvent::Skip;
    };
    if let Some(err) = in_band_error(PROVIDER_NAME, &value) {
        return LineEvent::Fail(err);
    }

    match serde_json::from_value::<GeminiResponse>(value) {
        Ok(chunk) => {
            let text = chunk.text();
            if text.is_empty() {
                LineEvent::Skip
            } else {
                LineEvent::Chunk(text)
            }
        }
        Err(_) => LineEvent::Skip,
    }
}

#[async_trait]
impl Provider for GeminiProvider {
    fn name(&self) -> &str {
        PROVIDER_NAME
    }

    fn tier(&self) -> ProviderTier {
        ProviderTier::Byok
    }

    async fn is_available(&self) -> bool {
        if self.api_key.is_none() {
            tracing::debug!("Gemini provider not available: no API key");
            return false;
        }
        true
    }

    async fn generate(&self, request: &GenerateRequest) -> Result<GenerateResponse, ProviderError> {
        let start = Instant::now();
        let response = self.send(request, false).await?;

        let raw: serde_json::Value = response
            .json()
            .await
            .map_err(|e| ProviderError::request_failed(PROVIDER_NAME, e))?;
        let data: GeminiResponse = serde_json::from_value(raw.clone())
            .map_err(|e| ProviderError::request_failed(PROVIDER_NAME, e))?;

        let usage = data.usage_metadata.as_ref().map_or_else(Usage::default, |u| Usage {
            prompt_tokens: u.prompt_token_count,
            completion_tokens: u.candidates_token_count,
            total_tokens: u.total_token_count,
        });
        let finish_reason = data.candidates.first().and_then(|c| c.finish_reason.clone());

        self.requests_made.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(
            tokens = usage.total_tokens,
            elapsed_ms = start.elapsed().as_millis(),
            "Gemini generation complete"
        );

        let mut response = GenerateResponse::new(data.text(), PROVIDER_NAME, self.model.clone())
            .with_usage(usage)
            .with_raw(raw);
        response.finish_reason = finish_reason;
        Ok(response)
    }

    async fn generate_stream(&self, request: &GenerateRequest) -> Result<ChunkStream, ProviderError> {
        let response = self.send(request, true).await?;
        self.requests_made.fetch_add(1, Ordering::Relaxed);
        Ok(line_stream(PROVIDER_NAME, response, parse_sse_line))
    }

    async fn rate_limits(&self) -> Result<RateLimitInfo, ProviderError> {
        let used = self.requests_made.load(Ordering::Relaxed);
        Ok(RateLimitInfo::new(
            GEMINI_DAILY_LIMIT,
            GEMINI_DAILY_LIMIT.saturating_sub(used),
            ProviderTier::Byok,
        )
        .with_period(RateLimitPeriod::Day))
    }

    async fn models(&self) -> Vec<String> {
        GEMINI_MODELS.iter().map(|m| (*m).to_string()).collect()
    }
}
