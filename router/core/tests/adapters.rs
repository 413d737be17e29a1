//! Adapter wire tests
//!
//! Each adapter talks to a local wiremock server; the assertions check the
//! translation of vendor responses into the shared types and error kinds.

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use pretty_assertions::assert_eq;
use serde_json::json;
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use router_core::provider::RetryConfig;
use router_core::testing::MockProvider;
use router_core::{
    CommunityProxyProvider, ErrorKind, GeminiProvider, GenerateRequest, OllamaProvider,
    OpenAiCompatProvider, Provider, ProviderTier, Router, RouterConfig,
};

fn fast_retry(max_attempts: u32) -> RetryConfig {
    RetryConfig {
        max_attempts,
        initial_backoff_ms: 1,
        max_backoff_ms: 1,
        backoff_multiplier: 1.0,
        use_jitter: false,
    }
}

async fn collect_text(provider: &dyn Provider, request: &GenerateRequest) -> String {
    let stream = provider.generate_stream(request).await.unwrap();
    let chunks: Vec<String> = stream.map(Result::unwrap).collect().await;
    chunks.concat()
}

// =============================================================================
// Gemini
// =============================================================================

const GEMINI_PATH: &str = "/v1beta/models/gemini-1.5-flash:generateContent";

fn gemini(server: &MockServer) -> GeminiProvider {
    GeminiProvider::new(Some("test-key".into()), "gemini-1.5-flash")
        .with_base_url(server.uri())
        .with_retry(fast_retry(2))
}

#[tokio::test]
async fn test_gemini_generate() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(GEMINI_PATH))
        .and(header("x-goog-api-key", "test-key"))
        .and(body_partial_json(json!({"generationConfig": {"maxOutputTokens": 64}})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "candidates": [{
                "content": {"parts": [{"text": "Hello "}, {"text": "world"}]},
                "finishReason": "STOP"
            }],
            "usageMetadata": {"promptTokenCount": 3, "candidatesTokenCount": 2, "totalTokenCount": 5}
        })))
        .expect(1)
        .mount(&server)
        .await;

    let provider = gemini(&server);
    let response = provider
        .generate(&GenerateRequest::new("hi").with_max_tokens(64))
        .await
        .unwrap();

    assert_eq!(response.text, "Hello world");
    assert_eq!(response.provider, "gemini");
    assert_eq!(response.usage.total_tokens, 5);
    assert_eq!(response.finish_reason.as_deref(), Some("STOP"));
    assert!(response.raw.is_some());

    let limits = provider.rate_limits().await.unwrap();
    assert_eq!(limits.remaining, limits.limit - 1);
}

#[tokio::test]
async fn test_gemini_retries_then_reports_rate_limit() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(GEMINI_PATH))
        .respond_with(ResponseTemplate::new(429).set_body_string("quota"))
        .expect(2)
        .mount(&server)
        .await;

    let err = gemini(&server)
        .generate(&GenerateRequest::new("hi"))
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::RateLimit);
    let details = err.rate_limit_details().unwrap();
    assert_eq!(details.retry_after, Some(Duration::from_secs(60)));
    assert_eq!(details.upgrade_url.as_deref(), Some("https://ai.google.dev/pricing"));
}

#[tokio::test]
async fn test_gemini_bad_key_is_config_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(GEMINI_PATH))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({
            "error": {"message": "API key not valid. Please pass a valid API key."}
        })))
        .mount(&server)
        .await;

    let err = gemini(&server)
        .generate(&GenerateRequest::new("hi"))
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Config);
    assert!(err.marks_unavailable());
}

#[tokio::test]
async fn test_gemini_server_error_is_unavailable() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(GEMINI_PATH))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let err = gemini(&server)
        .generate(&GenerateRequest::new("hi"))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Unavailable);
}

#[tokio::test]
async fn test_gemini_stream() {
    let server = MockServer::start().await;
    let body = concat!(
        "data: {\"candidates\":[{\"content\":{\"parts\":[{\"text\":\"Hel\"}]}}]}\n\n",
        "data: {\"candidates\":[{\"content\":{\"parts\":[{\"text\":\"lo\"}]}}]}\n\n",
    );
    Mock::given(method("POST"))
        .and(path("/v1beta/models/gemini-1.5-flash:streamGenerateContent"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(body, "text/event-stream"))
        .mount(&server)
        .await;

    let provider = gemini(&server);
    assert_eq!(collect_text(&provider, &GenerateRequest::new("hi")).await, "Hello");
}

#[tokio::test]
async fn test_gemini_in_band_stream_error_falls_back() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1beta/models/gemini-1.5-flash:streamGenerateContent"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(
            "data: {\"error\":{\"code\":503,\"message\":\"The model is overloaded\"}}\n\n",
            "text/event-stream",
        ))
        .mount(&server)
        .await;

    let provider = gemini(&server);
    let items: Vec<_> = provider
        .generate_stream(&GenerateRequest::new("hi"))
        .await
        .unwrap()
        .collect()
        .await;
    assert_eq!(items.len(), 1);
    assert_eq!(items[0].as_ref().unwrap_err().kind(), ErrorKind::Unavailable);

    let backup = Arc::new(MockProvider::new("backup", ProviderTier::Local).with_text("backup text"));
    let router = Router::builder()
        .config(RouterConfig::default().with_preferred_provider("gemini"))
        .provider(gemini(&server))
        .shared_provider(backup.clone())
        .build()
        .unwrap();

    let chunks: Vec<String> = router
        .generate_stream(&GenerateRequest::new("hi"))
        .map(Result::unwrap)
        .collect()
        .await;

    assert_eq!(chunks, vec!["backup text".to_string()]);
    assert_eq!(backup.calls(), 1);
    assert_eq!(router.status()["gemini"].consecutive_failures, 1);
}

// =============================================================================
// Community proxy
// =============================================================================

#[tokio::test]
async fn test_proxy_generate_parses_quota() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/generate"))
        .and(header("authorization", "Bearer tok"))
        .and(body_partial_json(json!({"prompt": "hi", "maxTokens": 2048})))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("x-ratelimit-remaining", "20")
                .set_body_json(json!({
                    "text": "proxied",
                    "model": "gemini-1.5-flash",
                    "usage": {"limit": 25, "remaining": 24, "totalTokens": 9}
                })),
        )
        .mount(&server)
        .await;

    let provider = CommunityProxyProvider::new(server.uri(), Some("tok".into()));
    assert_eq!(provider.tier(), ProviderTier::Authenticated);

    let response = provider.generate(&GenerateRequest::new("hi")).await.unwrap();
    assert_eq!(response.text, "proxied");
    assert_eq!(response.usage.total_tokens, 9);

    let quota = response.rate_limit.unwrap();
    assert_eq!(quota.limit, 25);
    assert_eq!(quota.remaining, 20);
    assert!(quota.reset_at.is_some());

    let cached = provider.rate_limits().await.unwrap();
    assert_eq!(cached.remaining, 20);
}

#[tokio::test]
async fn test_proxy_429_is_rate_limited_with_upgrade_for_anonymous() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/generate"))
        .respond_with(ResponseTemplate::new(429).set_body_json(json!({
            "error": "Daily limit reached",
            "usage": {"limit": 5, "remaining": 0}
        })))
        .mount(&server)
        .await;

    let provider = CommunityProxyProvider::new(server.uri(), None);
    let err = provider.generate(&GenerateRequest::new("hi")).await.unwrap_err();

    assert_eq!(err.kind(), ErrorKind::RateLimit);
    assert_eq!(err.message(), "Daily limit reached");
    let details = err.rate_limit_details().unwrap();
    assert_eq!(details.limit, Some(5));
    assert!(details.upgrade_url.is_some());

    let snapshot = provider.rate_limits().await.unwrap();
    assert_eq!(snapshot.remaining, 0);
}

#[tokio::test]
async fn test_proxy_status_mapping() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/generate"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;

    let provider = CommunityProxyProvider::new(server.uri(), Some("expired".into()));
    let err = provider.generate(&GenerateRequest::new("hi")).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Config);

    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/generate"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let provider = CommunityProxyProvider::new(server.uri(), None);
    let err = provider.generate(&GenerateRequest::new("hi")).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Unavailable);
}

#[tokio::test]
async fn test_proxy_health_probe() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/health"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let provider = CommunityProxyProvider::new(server.uri(), None);
    assert!(!provider.is_available().await);
}

#[tokio::test]
async fn test_proxy_json_stream_is_single_chunk() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/generate"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"text": "all at once"})))
        .mount(&server)
        .await;

    let provider = CommunityProxyProvider::new(server.uri(), None);
    let stream = provider.generate_stream(&GenerateRequest::new("hi")).await.unwrap();
    let chunks: Vec<String> = stream.map(Result::unwrap).collect().await;
    assert_eq!(chunks, vec!["all at once".to_string()]);
}

#[tokio::test]
async fn test_proxy_success_with_unreadable_body_is_an_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/generate"))
        .respond_with(ResponseTemplate::new(200).set_body_raw("<html>captive portal</html>", "text/html"))
        .mount(&server)
        .await;

    let provider = CommunityProxyProvider::new(server.uri(), None);
    let err = provider.generate(&GenerateRequest::new("hi")).await.unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Provider);
    assert!(err.message().starts_with("Request failed"));
}

#[tokio::test]
async fn test_proxy_sse_error_event_is_surfaced() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/generate"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(
            "data: {\"error\":\"Daily limit reached\"}\n\n",
            "text/event-stream",
        ))
        .mount(&server)
        .await;

    let provider = CommunityProxyProvider::new(server.uri(), None);
    let items: Vec<_> = provider
        .generate_stream(&GenerateRequest::new("hi"))
        .await
        .unwrap()
        .collect()
        .await;

    assert_eq!(items.len(), 1);
    assert!(items[0].as_ref().unwrap_err().message().contains("Daily limit reached"));
}

// =============================================================================
// Ollama
// =============================================================================

#[tokio::test]
async fn test_ollama_probe_and_models() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/tags"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "models": [{"name": "llama3.2:latest"}, {"name": "qwen2.5:7b"}]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let provider = OllamaProvider::new(server.uri(), "llama3.2");
    assert!(provider.is_available().await);
    assert_eq!(provider.models().await, vec!["llama3.2:latest", "qwen2.5:7b"]);
}

#[tokio::test]
async fn test_ollama_without_models_is_unavailable() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/tags"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"models": []})))
        .mount(&server)
        .await;

    assert!(!OllamaProvider::new(server.uri(), "llama3.2").is_available().await);
}

#[tokio::test]
async fn test_ollama_generate_and_missing_model() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/generate"))
        .and(body_partial_json(json!({"model": "llama3.2", "stream": false})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "response": "local answer",
            "done": true,
            "prompt_eval_count": 4,
            "eval_count": 6
        })))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/generate"))
        .and(body_partial_json(json!({"model": "missing"})))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let response = OllamaProvider::new(server.uri(), "llama3.2")
        .generate(&GenerateRequest::new("hi"))
        .await
        .unwrap();
    assert_eq!(response.text, "local answer");
    assert_eq!(response.usage.total_tokens, 10);

    let err = OllamaProvider::new(server.uri(), "missing")
        .generate(&GenerateRequest::new("hi"))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Unavailable);
    assert!(err.message().contains("ollama pull missing"));
}

#[tokio::test]
async fn test_ollama_ndjson_stream() {
    let server = MockServer::start().await;
    let body = concat!(
        "{\"response\":\"one \",\"done\":false}\n",
        "{\"response\":\"two\",\"done\":false}\n",
        "{\"response\":\"\",\"done\":true}\n",
    );
    Mock::given(method("POST"))
        .and(path("/api/generate"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(body, "application/x-ndjson"))
        .mount(&server)
        .await;

    let provider = OllamaProvider::new(server.uri(), "llama3.2");
    assert_eq!(collect_text(&provider, &GenerateRequest::new("hi")).await, "one two");
}

#[tokio::test]
async fn test_ollama_unreachable() {
    let provider = OllamaProvider::new("http://127.0.0.1:1", "llama3.2");
    assert!(!provider.is_available().await);

    let err = provider.generate(&GenerateRequest::new("hi")).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Unavailable);
}

// =============================================================================
// OpenAI-compatible
// =============================================================================

#[tokio::test]
async fn test_openai_compat_generate() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .and(header("authorization", "Bearer sk-local"))
        .and(body_partial_json(json!({
            "model": "qwen",
            "messages": [{"role": "system", "content": "be brief"}, {"role": "user", "content": "hi"}]
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "model": "qwen",
            "choices": [{"message": {"content": "hey"}, "finish_reason": "stop"}],
            "usage": {"prompt_tokens": 5, "completion_tokens": 1}
        })))
        .mount(&server)
        .await;

    let provider = OpenAiCompatProvider::new(format!("{}/v1", server.uri()), "qwen").with_api_key("sk-local");
    let response = provider
        .generate(&GenerateRequest::new("hi").with_system("be brief"))
        .await
        .unwrap();

    assert_eq!(response.text, "hey");
    assert_eq!(response.usage.total_tokens, 6);
}

#[tokio::test]
async fn test_openai_compat_sse_stream() {
    let server = MockServer::start().await;
    let body = concat!(
        "data: {\"choices\":[{\"delta\":{\"content\":\"str\"}}]}\n\n",
        "data: {\"choices\":[{\"delta\":{\"content\":\"eam\"}}]}\n\n",
        "data: [DONE]\n\n",
    );
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(body, "text/event-stream"))
        .mount(&server)
        .await;

    let provider = OpenAiCompatProvider::new(format!("{}/v1", server.uri()), "qwen");
    assert_eq!(collect_text(&provider, &GenerateRequest::new("hi")).await, "stream");
}

#[tokio::test]
async fn test_openai_compat_statuses() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/models"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"data": []})))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(429).insert_header("retry-after", "7"))
        .mount(&server)
        .await;

    let provider = OpenAiCompatProvider::new(format!("{}/v1", server.uri()), "qwen");
    assert!(provider.is_available().await);

    let err = provider.generate(&GenerateRequest::new("hi")).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::RateLimit);
    assert_eq!(
        err.rate_limit_details().unwrap().retry_after,
        Some(Duration::from_secs(7))
    );
}

#[tokio::test]
async fn test_openai_compat_sse_error_event_is_surfaced() {
    let server = MockServer::start().await;
    let body = concat!(
        "data: {\"error\":{\"type\":\"server_error\",\"message\":\"backend crashed\"}}\n\n",
        "data: [DONE]\n\n",
    );
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(body, "text/event-stream"))
        .mount(&server)
        .await;

    let provider = OpenAiCompatProvider::new(format!("{}/v1", server.uri()), "qwen");
    let items: Vec<_> = provider
        .generate_stream(&GenerateRequest::new("hi"))
        .await
        .unwrap()
        .collect()
        .await;

    assert_eq!(items.len(), 1);
    assert_eq!(items[0].as_ref().unwrap_err().kind(), ErrorKind::Unavailable);
}

#[tokio::test]
async fn test_enormous_retry_after_header_is_capped_and_router_falls_back() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/models"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"data": []})))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(429).insert_header("retry-after", "10000000000000"))
        .mount(&server)
        .await;

    let provider = OpenAiCompatProvider::new(format!("{}/v1", server.uri()), "qwen");
    let err = provider.generate(&GenerateRequest::new("hi")).await.unwrap_err();
    assert_eq!(
        err.rate_limit_details().unwrap().retry_after,
        Some(Duration::from_secs(7 * 24 * 60 * 60))
    );

    let backup = Arc::new(MockProvider::new("backup", ProviderTier::Anonymous).with_text("served"));
    let router = Router::builder()
        .config(RouterConfig::default().with_preferred_provider("openai_compat"))
        .provider(provider)
        .shared_provider(backup.clone())
        .build()
        .unwrap();

    let response = router.generate(&GenerateRequest::new("hi")).await.unwrap();

    assert_eq!(response.provider, "backup");
    assert_eq!(backup.calls(), 1);
}

// =============================================================================
// End to end
// =============================================================================

#[tokio::test]
async fn test_router_falls_back_from_proxy_to_ollama() {
    let proxy = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/health"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&proxy)
        .await;
    Mock::given(method("GET"))
        .and(path("/v1/limits"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"usage": {"limit": 5, "remaining": 5}})))
        .mount(&proxy)
        .await;
    Mock::given(method("POST"))
        .and(path("/v1/generate"))
        .respond_with(ResponseTemplate::new(503))
        .expect(1)
        .mount(&proxy)
        .await;

    let ollama = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/tags"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"models": [{"name": "llama3.2"}]})))
        .mount(&ollama)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/generate"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"response": "from ollama", "done": true})))
        .mount(&ollama)
        .await;

    let mut config = RouterConfig::default().with_preferred_provider("community-proxy");
    config.providers.proxy_url = proxy.uri();
    config.providers.ollama_url = ollama.uri();
    let router = Router::from_config(config).unwrap();

    assert_eq!(router.priority_order(), vec!["community-proxy", "ollama"]);

    let response = router.generate(&GenerateRequest::new("hi")).await.unwrap();
    assert_eq!(response.provider, "ollama");
    assert_eq!(response.text, "from ollama");
    assert!(!router.status()["community-proxy"].available);

    router.close().await;
}
