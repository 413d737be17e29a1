//! Scripted providers for exercising the router without a network
//!
//! [`MockProvider`] answers `generate` from a queue of outcomes, falling back
//! to a default text once the queue is empty, and counts every call so tests
//! can assert that no provider was tried twice.
//!
//! ```ignore
//! let flaky = MockProvider::new("flaky", ProviderTier::Byok)
//!     .then_fail(ProviderError::unavailable("flaky", "connection refused"))
//!     .with_text("recovered");
//! ```

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::provider::{
    ChunkStream, GenerateRequest, GenerateResponse, Provider, ProviderError, ProviderTier,
    RateLimitInfo, Usage,
};

/// Model name reported by mock responses
pub const MOCK_MODEL: &str = "mock-model";

/// One scripted `generate` result
#[derive(Clone, Debug)]
pub enum MockOutcome {
    /// Succeed with this text
    Text(String),
    /// Succeed with this text and attach a quota snapshot
    TextWithRateLimit(String, RateLimitInfo),
    /// Fail with this error
    Fail(ProviderError),
    /// Panic with this message
    Panic(String),
}

/// A provider driven entirely by its script
#[derive(Debug)]
pub struct MockProvider {
    name: String,
    tier: ProviderTier,
    default_text: String,
    available: AtomicBool,
    outcomes: Mutex<VecDeque<MockOutcome>>,
    stream_open_error: Mutex<Option<ProviderError>>,
    stream_chunks: Mutex<Option<Vec<Result<String, ProviderError>>>>,
    rate_limit: Mutex<Result<RateLimitInfo, ProviderError>>,
    probe_delay: Option<Duration>,
    calls: AtomicUsize,
    stream_calls: AtomicUsize,
    probe_calls: AtomicUsize,
    closed: AtomicBool,
}

impl MockProvider {
    /// An available provider answering `"<name> response"` with no rate limit
    pub fn new(name: impl Into<String>, tier: ProviderTier) -> Self {
        let name = name.into();
        Self {
            default_text: format!("{name} response"),
            name,
            tier,
            available: AtomicBool::new(true),
            outcomes: Mutex::new(VecDeque::new()),
            stream_open_error: Mutex::new(None),
            stream_chunks: Mutex::new(None),
            rate_limit: Mutex::new(Ok(RateLimitInfo::unlimited(tier))),
            probe_delay: None,
            calls: AtomicUsize::new(0),
            stream_calls: AtomicUsize::new(0),
            probe_calls: AtomicUsize::new(0),
            closed: AtomicBool::new(false),
        }
    }

    /// Text returned once the outcome queue is empty
    #[must_use]
    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.default_text = text.into();
        self
    }

    /// Report unavailable from the liveness probe
    #[must_use]
    pub fn unavailable(self) -> Self {
        self.available.store(false, Ordering::SeqCst);
        self
    }

    /// Quota snapshot returned by `rate_limits`
    #[must_use]
    pub fn with_rate_limit(self, rate_limit: RateLimitInfo) -> Self {
        *self.rate_limit.lock() = Ok(rate_limit);
        self
    }

    /// Make `rate_limits` fail
    #[must_use]
    pub fn with_rate_limit_error(self, error: ProviderError) -> Self {
        *self.rate_limit.lock() = Err(error);
        self
    }

    /// Make the liveness probe take this long
    #[must_use]
    pub fn with_probe_delay(mut self, delay: Duration) -> Self {
        self.probe_delay = Some(delay);
        self
    }

    /// Queue a successful call
    #[must_use]
    pub fn then_ok(self, text: impl Into<String>) -> Self {
        self.push(MockOutcome::Text(text.into()));
        self
    }

    /// Queue a failing call
    #[must_use]
    pub fn then_fail(self, error: ProviderError) -> Self {
        self.push(MockOutcome::Fail(error));
        self
    }

    /// Queue a panicking call
    #[must_use]
    pub fn then_panic(self, message: impl Into<String>) -> Self {
        self.push(MockOutcome::Panic(message.into()));
        self
    }

    /// Queue `n` identical failures
    #[must_use]
    pub fn then_fail_times(self, n: usize, error: &ProviderError) -> Self {
        for _ in 0..n {
            self.push(MockOutcome::Fail(error.clone()));
        }
        self
    }

    /// Make `generate_stream` fail before producing a stream
    #[must_use]
    pub fn with_stream_open_error(self, error: ProviderError) -> Self {
        *self.stream_open_error.lock() = Some(error);
        self
    }

    /// Items yielded by every `generate_stream` call
    #[must_use]
    pub fn with_stream_chunks(self, chunks: Vec<Result<String, ProviderError>>) -> Self {
        *self.stream_chunks.lock() = Some(chunks);
        self
    }

    /// Append an outcome to the queue
    pub fn push(&self, outcome: MockOutcome) {
        self.outcomes.lock().push_back(outcome);
    }

    /// Flip the liveness probe result
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Replace the quota snapshot
    pub fn set_rate_limit(&self, rate_limit: RateLimitInfo) {
        *self.rate_limit.lock() = Ok(rate_limit);
    }

    /// Number of `generate` calls
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Number of `generate_stream` calls
    pub fn stream_calls(&self) -> usize {
        self.stream_calls.load(Ordering::SeqCst)
    }

    /// Number of liveness probes
    pub fn probe_calls(&self) -> usize {
        self.probe_calls.load(Ordering::SeqCst)
    }

    /// Whether `close` was called
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn respond(&self, request: &GenerateRequest, text: String) -> GenerateResponse {
        let prompt_tokens = request.prompt.split_whitespace().count() as u64;
        let completion_tokens = text.split_whitespace().count() as u64;
        GenerateResponse::new(text, self.name.clone(), MOCK_MODEL)
            .with_usage(Usage::new(prompt_tokens, completion_tokens))
            .with_finish_reason("stop")
    }
}

#[async_trait]
impl Provider for MockProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn tier(&self) -> ProviderTier {
        self.tier
    }

    async fn is_available(&self) -> bool {
        self.probe_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.probe_delay {
            tokio::time::sleep(delay).await;
        }
        self.available.load(Ordering::SeqCst)
    }

    async fn generate(&self, request: &GenerateRequest) -> Result<GenerateResponse, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let outcome = self.outcomes.lock().pop_front();

        match outcome {
            None => Ok(self.respond(request, self.default_text.clone())),
            Some(MockOutcome::Text(text)) => Ok(self.respond(request, text)),
            Some(MockOutcome::TextWithRateLimit(text, rate_limit)) => {
                Ok(self.respond(request, text).with_rate_limit(rate_limit))
            }
            Some(MockOutcome::Fail(error)) => Err(error),
            Some(MockOutcome::Panic(message)) => panic!("{message}"),
        }
    }

    /// Scripted chunks when configured, otherwise the queued `generate`
    /// outcome as a single chunk (counted as a `generate` call).
    async fn generate_stream(&self, request: &GenerateRequest) -> Result<ChunkStream, ProviderError> {
        self.stream_calls.fetch_add(1, Ordering::SeqCst);

        let open_error = self.stream_open_error.lock().clone();
        if let Some(error) = open_error {
            return Err(error);
        }

        let scripted = self.stream_chunks.lock().clone();
        if let Some(chunks) = scripted {
            return Ok(Box::pin(futures::stream::iter(chunks)));
        }

        let response = self.generate(request).await?;
        Ok(Box::pin(futures::stream::once(async move { Ok(response.text) })))
    }

    async fn rate_limits(&self) -> Result<RateLimitInfo, ProviderError> {
        self.rate_limit.lock().clone()
    }

    async fn models(&self) -> Vec<String> {
        vec![MOCK_MODEL.to_string()]
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}
