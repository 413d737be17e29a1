//! OpenAI-Compatible Provider
//!
//! Any self-hosted server speaking the `/v1` chat API (LM Studio, vLLM,
//! llama.cpp server, ...). Requests go to `{base_url}/chat/completions`;
//! streaming uses server-sent events terminated by `data: [DONE]`.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::error::ProviderError;
use super::http::{
    build_client, classify_status, classify_transport, in_band_error, line_stream, sse_data,
    LineEvent,
};
use super::traits::{ChunkStream, Provider};
use super::types::{
    ChatMessage, GenerateRequest, GenerateResponse, ProviderTier, RateLimitInfo, Role, Usage,
};

const PROVIDER_NAME: &str = "openai_compat";
const PROBE_TIMEOUT: Duration = Duration::from_secs(5);
const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

// ============================================================================
// Wire types
// ============================================================================

#[derive(Serialize)]
struct WireMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Serialize)]
struct ChatCompletionRequest<'a> {
    model: &'a str,
    messages: Vec<WireMessage<'a>>,
    max_tokens: u32,
    temperature: f32,
    stream: bool,
    #[serde(skip_serializing_if = "no_stops")]
    stop: &'a [String],
}

fn no_stops(stop: &&[String]) -> bool {
    stop.is_empty()
}

#[derive(Deserialize)]
struct ChatCompletionResponse {
    #[serde(default)]
    model: Option<String>,
    choices: Vec<Choice>,
    #[serde(default)]
    usage: Option<WireUsage>,
}

#[derive(Deserialize)]
struct Choice {
    message: ChoiceMessage,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Deserialize)]
struct WireUsage {
    #[serde(default)]
    prompt_tokens: u64,
    #[serde(default)]
    completion_tokens: u64,
    #[serde(default)]
    total_tokens: Option<u64>,
}

#[derive(Deserialize)]
struct StreamChunk {
    #[serde(default)]
    choices: Vec<StreamChoice>,
}

#[derive(Deserialize)]
struct StreamChoice {
    #[serde(default)]
    delta: StreamDelta,
}

#[derive(Default, Deserialize)]
struct StreamDelta {
    #[serde(default)]
    content: Option<String>,
}

// ============================================================================
// Provider
// ============================================================================

/// Self-hosted OpenAI-compatible server
pub struct OpenAiCompatProvider {
    base_url: String,
    model: String,
    api_key: Option<String>,
    http_client: reqwest::Client,
}

impl OpenAiCompatProvider {
    /// Create a provider for `base_url` (e.g. `http://localhost:1234/v1`)
    pub fn new(base_url: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            model: model.into(),
            api_key: None,
            http_client: build_client(REQUEST_TIMEOUT),
        }
    }

    /// Send a bearer token with every request
    #[must_use]
    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    /// Override the per-call timeout
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.http_client = build_client(timeout);
        self
    }

    fn authorize(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match self.api_key {
            Some(ref key) => builder.bearer_auth(key),
            None => builder,
        }
    }

    fn wire_messages(request: &GenerateRequest) -> Vec<WireMessage<'_>> {
        let mut messages = Vec::with_capacity(request.messages.len() + 2);
        if let Some(ref system) = request.system {
            messages.push(WireMessage {
                role: Role::System.as_str(),
                content: system,
            });
        }
        messages.extend(request.messages.iter().map(|m: &ChatMessage| WireMessage {
            role: m.role.as_str(),
            content: &m.content,
        }));
        messages.push(WireMessage {
            role: Role::User.as_str(),
            content: &request.prompt,
        });
        messages
    }

    async fn post_completion(
        &self,
        request: &GenerateRequest,
        stream: bool,
    ) -> Result<reqwest::Response, ProviderError> {
        let body = ChatCompletionRequest {
            model: &self.model,
            messages: Self::wire_messages(request),
            max_tokens: request.max_tokens,
            temperature: request.temperature,
            stream,
            stop: &request.stop,
        };

        let response = self
            .authorize(self.http_client.post(format!("{}/chat/completions", self.base_url)))
            .json(&body)
            .send()
            .await
            .map_err(|e| classify_transport(PROVIDER_NAME, &e))?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let headers = response.headers().clone();
        let body = response.text().await.unwrap_or_default();
        Err(classify_status(PROVIDER_NAME, status, &headers, &body))
    }
}

fn parse_sse_line(line: &str) -> LineEvent {
    let Some(data) = sse_data(line) else {
        return LineEvent::Skip;
    };
    if data == "[DONE]" {
        return LineEvent::Done;
    }

    let Ok(value) = serde_json::from_str::<Value>(data) else {
        return LineEvent::Skip;
    };
    if let Some(err) = in_band_error(PROVIDER_NAME, &value) {
        return LineEvent::Fail(err);
    }

    match serde_json::from_value::<StreamChunk>(value) {
        Ok(chunk) => chunk
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.delta.content)
            .filter(|c| !c.is_empty())
            .map_or(LineEvent::Skip, LineEvent::Chunk),
        Err(_) => LineEvent::Skip,
    }
}

#[async_trait]
impl Provider for OpenAiCompatProvider {
    fn name(&self) -> &str {
        PROVIDER_NAME
    }

    fn tier(&self) -> ProviderTier {
        ProviderTier::Local
    }

    async fn is_available(&self) -> bool {
        let result = self
            .authorize(self.http_client.get(format!("{}/models", self.base_url)))
            .timeout(PROBE_TIMEOUT)
            .send()
            .await;

        match result {
            Ok(response) => response.status().is_success(),
            Err(e) => {
                tracing::debug!(url = %self.base_url, error = %e, "OpenAI-compatible server not reachable");
                false
            }
        }
    }

    async fn generate(&self, request: &GenerateRequest) -> Result<GenerateResponse, ProviderError> {
        let start = Instant::now();
        let response = self.post_completion(request, false).await?;

        let raw: serde_json::Value = response
            .json()
            .await
            .map_err(|e| ProviderError::request_failed(PROVIDER_NAME, e))?;
        let data: ChatCompletionResponse = serde_json::from_value(raw.clone())
            .map_err(|e| ProviderError::request_failed(PROVIDER_NAME, e))?;

        let Some(choice) = data.choices.into_iter().next() else {
            return Err(ProviderError::other(PROVIDER_NAME, "Response contained no choices"));
        };

        let usage = data.usage.map_or_else(Usage::default, |u| Usage {
            prompt_tokens: u.prompt_tokens,
            completion_tokens: u.completion_tokens,
            total_tokens: u
                .total_tokens
                .unwrap_or(u.prompt_tokens + u.completion_tokens),
        });

        tracing::debug!(
            tokens = usage.total_tokens,
            elapsed_ms = start.elapsed().as_millis(),
            "OpenAI-compatible generation complete"
        );

        Ok(GenerateResponse::new(
            choice.message.content.unwrap_or_default(),
            PROVIDER_NAME,
            data.model.unwrap_or_else(|| self.model.clone()),
        )
        .with_usage(usage)
        .with_finish_reason(choice.finish_reason.unwrap_or_else(|| "stop".to_string()))
        .with_raw(raw))
    }

    async fn generate_stream(&self, request: &GenerateRequest) -> Result<ChunkStream, ProviderError> {
        let response = self.post_completion(request, true).await?;
        Ok(line_stream(PROVIDER_NAME, response, parse_sse_line))
    }

    async fn rate_limits(&self) -> Result<RateLimitInfo, ProviderError> {
        Ok(RateLimitInfo::unlimited(ProviderTier::Local))
    }

    async fn models(&self) -> Vec<String> {
        vec![self.model.clone()]
    }
}
