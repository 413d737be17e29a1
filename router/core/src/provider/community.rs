//! Community Proxy Provider
//!
//! Shared free-tier endpoint for callers without their own key. Quotas are
//! per day: 5 requests anonymously (by IP), 25 with an elevated-tier token.
//!
//! # Endpoints
//!
//! - `GET /health` - liveness
//! - `POST /v1/generate` - completion, quota in body `usage` and headers
//! - `GET /v1/limits` - current quota
//!
//! Quota snapshots are cached for [`RATE_LIMIT_TTL`] before being re-fetched.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::{DateTime, Datelike, TimeZone, Utc};
use futures::StreamExt;
use parking_lot::Mutex;
use reqwest::header::{HeaderMap, CONTENT_TYPE};
use serde_json::{json, Value};

use super::error::{ProviderError, RateLimitDetails};
use super::http::{
    build_client, classify_status, classify_transport, header_quota, in_band_error, line_stream,
    sse_data, unix_seconds, LineEvent,
};
use super::traits::{ChunkStream, Provider};
use super::types::{GenerateRequest, GenerateResponse, ProviderTier, RateLimitInfo, Usage};

/// Production proxy endpoint
pub const DEFAULT_PROXY_URL: &str = "https://api.rocket-cli.dev";

/// Daily quota without a token
pub const ANONYMOUS_DAILY_LIMIT: u64 = 5;

/// Daily quota with an elevated-tier token
pub const AUTHENTICATED_DAILY_LIMIT: u64 = 25;

/// How long a fetched quota snapshot is trusted
pub const RATE_LIMIT_TTL: Duration = Duration::from_secs(60);

const PROVIDER_NAME: &str = "community-proxy";
const UPGRADE_URL: &str = "https://rocket-cli.dev/upgrade";
const DEFAULT_PROXY_MODEL: &str = "gemini-1.5-flash";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// Community proxy client
pub struct CommunityProxyProvider {
    base_url: String,
    token: Option<String>,
    http_client: reqwest::Client,
    /// Last quota snapshot and when it was fetched
    cached_limits: Mutex<Option<(RateLimitInfo, Instant)>>,
}

impl CommunityProxyProvider {
    /// Create a proxy client; a token selects the authenticated tier
    pub fn new(base_url: impl Into<String>, token: Option<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token: token.filter(|t| !t.trim().is_empty()),
            http_client: build_client(REQUEST_TIMEOUT),
            cached_limits: Mutex::new(None),
        }
    }

    /// Override the per-call timeout
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.http_client = build_client(timeout);
        self
    }

    /// Whether an elevated-tier token is configured
    #[must_use]
    pub fn is_authenticated(&self) -> bool {
        self.token.is_some()
    }

    fn default_limit(&self) -> u64 {
        if self.is_authenticated() {
            AUTHENTICATED_DAILY_LIMIT
        } else {
            ANONYMOUS_DAILY_LIMIT
        }
    }

    fn authorize(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match self.token {
            Some(ref token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    fn request_body(request: &GenerateRequest, stream: bool) -> Value {
        let mut body = json!({
            "prompt": request.prompt,
            "temperature": request.temperature,
            "maxTokens": request.max_tokens,
        });
        if stream {
            body["stream"] = json!(true);
        }
        if let Some(ref system) = request.system {
            body["systemInstruction"] = json!(system);
        }
        if !request.messages.is_empty() {
            body["messages"] = json!(request.messages);
        }
        body
    }

    /// Merge quota from the body's `usage` block and `X-RateLimit-*` headers
    ///
    /// Headers win over the body. Without a reset time the quota is assumed
    /// to reset at the next UTC midnight.
    fn parse_rate_limit(&self, headers: &HeaderMap, data: &Value, now: DateTime<Utc>) -> RateLimitInfo {
        let usage = data.get("usage");
        let field = |name: &str| usage.and_then(|u| u.get(name)).and_then(Value::as_u64);

        let quota = header_quota(headers);
        let limit = quota.limit.or_else(|| field("limit")).unwrap_or(self.default_limit());
        let remaining = quota.remaining.or_else(|| field("remaining")).unwrap_or(limit);
        let reset_at = quota
            .reset_at
            .or_else(|| field("reset").and_then(unix_seconds))
            .unwrap_or_else(|| next_utc_midnight(now));

        RateLimitInfo::new(limit, remaining, self.tier()).with_reset_at(reset_at)
    }

    fn store_limits(&self, info: &RateLimitInfo) {
        *self.cached_limits.lock() = Some((info.clone(), Instant::now()));
    }

    fn fresh_cached_limits(&self) -> Option<RateLimitInfo> {
        self.cached_limits
            .lock()
            .as_ref()
            .filter(|(_, fetched)| fetched.elapsed() < RATE_LIMIT_TTL)
            .map(|(info, _)| info.clone())
    }

    fn rate_limit_error(&self, info: &RateLimitInfo, message: String, now: DateTime<Utc>) -> ProviderError {
        let retry_after = info
            .reset_at
            .and_then(|reset| (reset - now).to_std().ok())
            .unwrap_or(Duration::from_secs(86_400));

        let mut details = RateLimitDetails::default()
            .with_retry_after(retry_after)
            .with_limit(info.limit)
            .with_remaining(0);
        if let Some(reset) = info.reset_at {
            details = details.with_reset_at(reset);
        }
        if !self.is_authenticated() {
            details = details.with_upgrade_url(UPGRADE_URL);
        }

        ProviderError::rate_limited(PROVIDER_NAME, message, details)
    }

    async fn post_generate(
        &self,
        request: &GenerateRequest,
        stream: bool,
    ) -> Result<reqwest::Response, ProviderError> {
        self.authorize(self.http_client.post(format!("{}/v1/generate", self.base_url)))
            .json(&Self::request_body(request, stream))
            .send()
            .await
            .map_err(|e| classify_transport(PROVIDER_NAME, &e))
    }

    /// Map a non-success response to the taxonomy
    fn classify(&self, status: reqwest::StatusCode, headers: &HeaderMap, data: &Value) -> ProviderError {
        let message = data
            .get("error")
            .and_then(Value::as_str)
            .map(String::from);

        match status.as_u16() {
            429 => {
                let now = Utc::now();
                let info = self.parse_rate_limit(headers, data, now);
                let mut limited = info.clone();
                limited.remaining = 0;
                self.store_limits(&limited);
                self.rate_limit_error(
                    &info,
                    message.unwrap_or_else(|| "Rate limit exceeded".to_string()),
                    now,
                )
            }
            401 => ProviderError::config(
                PROVIDER_NAME,
                "Invalid or expired token. Log in again to restore the authenticated tier.",
            ),
            503 => ProviderError::unavailable(
                PROVIDER_NAME,
                "Community proxy is temporarily unavailable. Try again later.",
            ),
            _ => match classify_status(PROVIDER_NAME, status, headers, "") {
                ProviderError::Other { .. } => ProviderError::other(
                    PROVIDER_NAME,
                    message.unwrap_or_else(|| format!("HTTP {status}")),
                ),
                other => other,
            },
        }
    }
}

/// Start of the next UTC day
fn next_utc_midnight(now: DateTime<Utc>) -> DateTime<Utc> {
    let tomorrow = now.date_naive().succ_opt().unwrap_or(now.date_naive());
    Utc.with_ymd_and_hms(tomorrow.year(), tomorrow.month(), tomorrow.day(), 0, 0, 0)
        .single()
        .unwrap_or(now)
}

fn parse_sse_line(line: &str) -> LineEvent {
    let Some(data) = sse_data(line) else {
        return LineEvent::Skip;
    };
    if data == "[DONE]" {
        return LineEvent::Done;
    }

    match serde_json::from_str::<Value>(data) {
        Ok(chunk) => match in_band_error(PROVIDER_NAME, &chunk) {
            Some(err) => LineEvent::Fail(err),
            None => chunk
                .get("text")
                .and_then(Value::as_str)
                .filter(|t| !t.is_empty())
                .map_or(LineEvent::Skip, |t| LineEvent::Chunk(t.to_string())),
        },
        Err(_) => LineEvent::Chunk(data.to_string()),
    }
}

#[async_trait]
impl Provider for CommunityProxyProvider {
    fn name(&self) -> &str {
        PROVIDER_NAME
    }

    fn tier(&self) -> ProviderTier {
        if self.is_authenticated() {
            ProviderTier::Authenticated
        } else {
            ProviderTier::Anonymous
        }
    }

    /// Optimistic: an unreachable proxy still reports available and the
    /// actual request fails into the fallback chain instead.
    async fn is_available(&self) -> bool {
        let result = self
            .authorize(self.http_client.get(format!("{}/health", self.base_url)))
            .timeout(Duration::from_secs(5))
            .send()
            .await;

        match result {
            Ok(response) if response.status().is_success() => true,
            Ok(response) => {
                tracing::debug!(status = %response.status(), "Community proxy health check failed");
                false
            }
            Err(e) => {
                tracing::debug!(error = %e, "Community proxy unreachable, assuming available");
                true
            }
        }
    }

    async fn generate(&self, request: &GenerateRequest) -> Result<GenerateResponse, ProviderError> {
        let response = self.post_generate(request, false).await?;
        let status = response.status();
        let headers = response.headers().clone();

        if !status.is_success() {
            let data: Value = response.json().await.unwrap_or_else(|_| json!({}));
            return Err(self.classify(status, &headers, &data));
        }

        let data: Value = response
            .json()
            .await
            .map_err(|e| ProviderError::request_failed(PROVIDER_NAME, e))?;

        let rate_limit = self.parse_rate_limit(&headers, &data, Utc::now());
        self.store_limits(&rate_limit);

        let usage = data.get("usage");
        let count = |name: &str| usage.and_then(|u| u.get(name)).and_then(Value::as_u64).unwrap_or(0);
        let usage = Usage {
            prompt_tokens: count("promptTokens"),
            completion_tokens: count("completionTokens"),
            total_tokens: count("totalTokens"),
        };

        tracing::debug!(
            remaining = rate_limit.remaining,
            limit = rate_limit.limit,
            "Community proxy generation complete"
        );

        let text = data.get("text").and_then(Value::as_str).unwrap_or_default().to_string();
        let model = data
            .get("model")
            .and_then(Value::as_str)
            .unwrap_or(DEFAULT_PROXY_MODEL)
            .to_string();
        let finish_reason = data.get("finishReason").and_then(Value::as_str).map(String::from);

        let mut response = GenerateResponse::new(text, PROVIDER_NAME, model)
            .with_usage(usage)
            .with_rate_limit(rate_limit)
            .with_raw(data);
        response.finish_reason = finish_reason;
        Ok(response)
    }

    /// Streams when the proxy answers with SSE; otherwise falls back to a
    /// single chunk holding the full text.
    async fn generate_stream(&self, request: &GenerateRequest) -> Result<ChunkStream, ProviderError> {
        let response = match self.post_generate(request, true).await {
            Ok(response) => response,
            Err(e) => {
                tracing::debug!(error = %e, "Streaming request failed, falling back to generate");
                let full = self.generate(request).await?;
                return Ok(futures::stream::once(async move { Ok(full.text) }).boxed());
            }
        };

        let status = response.status();
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            let headers = response.headers().clone();
            let data: Value = response.json().await.unwrap_or_else(|_| json!({}));
            return Err(self.classify(status, &headers, &data));
        }
        if !status.is_success() {
            let full = self.generate(request).await?;
            return Ok(futures::stream::once(async move { Ok(full.text) }).boxed());
        }

        let is_sse = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|v| v.contains("text/event-stream"));

        if is_sse {
            return Ok(line_stream(PROVIDER_NAME, response, parse_sse_line));
        }

        let data: Value = response
            .json()
            .await
            .map_err(|e| ProviderError::request_failed(PROVIDER_NAME, e))?;
        let text = data.get("text").and_then(Value::as_str).unwrap_or_default().to_string();
        Ok(futures::stream::once(async move { Ok(text) }).boxed())
    }

    async fn rate_limits(&self) -> Result<RateLimitInfo, ProviderError> {
        if let Some(cached) = self.fresh_cached_limits() {
            return Ok(cached);
        }

        let result = self
            .authorize(self.http_client.get(format!("{}/v1/limits", self.base_url)))
            .send()
            .await;

        match result {
            Ok(response) if response.status().is_success() => {
                let headers = response.headers().clone();
                if let Ok(data) = response.json::<Value>().await {
                    let info = self.parse_rate_limit(&headers, &data, Utc::now());
                    self.store_limits(&info);
                    return Ok(info);
                }
            }
            Ok(response) => {
                tracing::debug!(status = %response.status(), "Failed to fetch proxy limits");
            }
            Err(e) => {
                tracing::debug!(error = %e, "Failed to fetch proxy limits");
            }
        }

        let limit = self.default_limit();
        Ok(RateLimitInfo::new(limit, limit, self.tier()))
    }

    async fn models(&self) -> Vec<String> {
        vec![DEFAULT_PROXY_MODEL.to_string()]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::HeaderValue;

    fn noon() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 14, 12, 0, 0).unwrap()
    }

    #[test]
    fn test_tier_follows_token() {
        let anon = CommunityProxyProvider::new(DEFAULT_PROXY_URL, None);
        assert_eq!(anon.tier(), ProviderTier::Anonymous);
        assert_eq!(anon.default_limit(), 5);

        let auth = CommunityProxyProvider::new(DEFAULT_PROXY_URL, Some("tok".into()));
        assert_eq!(auth.tier(), ProviderTier::Authenticated);
        assert_eq!(auth.default_limit(), 25);

        let blank = CommunityProxyProvider::new(DEFAULT_PROXY_URL, Some(String::new()));
        assert_eq!(blank.tier(), ProviderTier::Anonymous);
    }

    #[test]
    fn test_rate_limit_defaults_to_next_midnight() {
        let provider = CommunityProxyProvider::new(DEFAULT_PROXY_URL, None);
        let info = provider.parse_rate_limit(&HeaderMap::new(), &json!({}), noon());

        assert_eq!(info.limit, 5);
        assert_eq!(info.remaining, 5);
        assert_eq!(
            info.reset_at,
            Some(Utc.with_ymd_and_hms(2026, 3, 15, 0, 0, 0).unwrap())
        );
    }

    #[test]
    fn test_headers_override_body() {
        let provider = CommunityProxyProvider::new(DEFAULT_PROXY_URL, None);
        let mut headers = HeaderMap::new();
        headers.insert("x-ratelimit-remaining", HeaderValue::from_static("1"));

        let body = json!({"usage": {"limit": 5, "remaining": 4, "reset": 1_773_532_800u64}});
        let info = provider.parse_rate_limit(&headers, &body, noon());

        assert_eq!(info.limit, 5);
        assert_eq!(info.remaining, 1);
        assert_eq!(info.reset_at, unix_seconds(1_773_532_800));
    }

    #[test]
    fn test_rate_limit_error_carries_upgrade_for_anonymous() {
        let provider = CommunityProxyProvider::new(DEFAULT_PROXY_URL, None);
        let info = provider.parse_rate_limit(&HeaderMap::new(), &json!({}), noon());
        let err = provider.rate_limit_error(&info, "limit".into(), noon());

        let details = err.rate_limit_details().unwrap();
        assert_eq!(details.upgrade_url.as_deref(), Some(UPGRADE_URL));
        assert_eq!(details.retry_after, Some(Duration::from_secs(12 * 3600)));

        let provider = CommunityProxyProvider::new(DEFAULT_PROXY_URL, Some("tok".into()));
        let err = provider.rate_limit_error(&info, "limit".into(), noon());
        assert_eq!(err.rate_limit_details().unwrap().upgrade_url, None);
    }

    #[test]
    fn test_request_body() {
        let request = GenerateRequest::new("Hi").with_system("Sys").with_max_tokens(5);
        let body = CommunityProxyProvider::request_body(&request, false);
        assert_eq!(body["maxTokens"], 5);
        assert_eq!(body["systemInstruction"], "Sys");
        assert!(body.get("stream").is_none());
        assert!(body.get("messages").is_none());
    }

    #[test]
    fn test_parse_sse_line() {
        assert!(matches!(parse_sse_line(r#"data: {"text":"ab"}"#), LineEvent::Chunk(ref t) if t == "ab"));
        assert!(matches!(parse_sse_line("data: plain"), LineEvent::Chunk(ref t) if t == "plain"));
        assert!(matches!(parse_sse_line("data: [DONE]"), LineEvent::Done));
    }

    #[test]
    fn test_parse_sse_line_surfaces_in_band_error() {
        assert!(matches!(
            parse_sse_line(r#"data: {"error":"Daily limit reached"}"#),
            LineEvent::Fail(ref e) if e.message().contains("Daily limit reached")
        ));
        assert!(matches!(parse_sse_line(r#"data: {"error":null,"text":"ok"}"#), LineEvent::Chunk(ref t) if t == "ok"));
    }
}
