//! Router (Provider Manager)
//!
//! Orchestrates initialization, priority ordering, selection with fallback,
//! and status reporting across every registered provider.
//!
//! # Lifecycle
//!
//! ```text
//! Uninitialized ──initialize()──▶ Initializing ──probes joined──▶ Ready
//!                                                                  │
//!                                   refresh() re-probes in place ◀─┤
//!                                                                  ▼
//!                                                         close() ▶ Closed
//! ```
//!
//! # Selection
//!
//! For each logical request the router keeps a `tried` list and repeats:
//!
//! 1. Healthy providers not yet tried, in priority order.
//! 2. None left: raise one aggregated [`RouterError`].
//! 3. A healthy preferred provider wins outright; a single candidate is used
//!    as-is; otherwise the [`Scorer`] picks.
//! 4. Call `generate` once. Success returns immediately; a typed failure
//!    updates health and metrics and loops (unless fallback is disabled).
//!
//! Providers are attempted strictly one at a time, and never twice within
//! one call. Dropping the returned future cancels the in-flight adapter call.

use std::any::Any;
use std::collections::BTreeMap;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use futures::future::join_all;
use futures::stream::BoxStream;
use futures::{FutureExt, StreamExt};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::Instrument;
use uuid::Uuid;

use super::clock::{Clock, SystemClock};
use super::config::RouterConfig;
use super::error::{RouterError, UpgradeSuggestion};
use super::health::ProviderStatus;
use super::metrics::MetricsSummary;
use super::scorer::{ProviderProfile, ProviderScore, Scorer};
use crate::provider::{
    providers_from_settings, ErrorKind, GenerateRequest, GenerateResponse, Provider,
    ProviderError, ProviderTier, RateLimitInfo,
};

// ============================================================================
// Lifecycle Phase
// ============================================================================

/// Lifecycle phase of a [`Router`]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RouterPhase {
    /// Built but never probed
    Uninitialized,
    /// First probe round in flight
    Initializing,
    /// Probed and routing
    Ready,
    /// Adapters released
    Closed,
}

impl fmt::Display for RouterPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Uninitialized => write!(f, "uninitialized"),
            Self::Initializing => write!(f, "initializing"),
            Self::Ready => write!(f, "ready"),
            Self::Closed => write!(f, "closed"),
        }
    }
}

/// One piece of streamed text and the provider that produced it
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StreamChunk {
    /// Provider that served the text
    pub provider: String,
    /// The text itself
    pub text: String,
}

impl StreamChunk {
    fn new(provider: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
            text: text.into(),
        }
    }
}

// ============================================================================
// Internal State
// ============================================================================

struct Entry {
    provider: Arc<dyn Provider>,
    status: ProviderStatus,
}

struct RouterState {
    /// Registration order
    entries: Vec<Entry>,
    /// Indices into `entries`, best first
    priority: Vec<usize>,
    scorer: Scorer,
    phase: RouterPhase,
}

impl RouterState {
    fn entry(&self, name: &str) -> Option<&Entry> {
        self.entries.iter().find(|e| e.status.name == name)
    }

    fn entry_mut(&mut self, name: &str) -> Option<&mut Entry> {
        self.entries.iter_mut().find(|e| e.status.name == name)
    }

    /// Preferred provider first with the rest in registration order, or
    /// tier order (local promoted behind BYOK when `prefer_local`).
    fn rebuild_priority(&mut self, config: &RouterConfig) {
        let mut order: Vec<usize> = (0..self.entries.len()).collect();

        let preferred = self
            .entries
            .iter()
            .position(|e| config.is_preferred(&e.status.name));

        if let Some(first) = preferred {
            order.retain(|&i| i != first);
            order.insert(0, first);
        } else {
            order.sort_by_key(|&i| tier_rank(self.entries[i].status.tier, config.prefer_local));
        }

        self.priority = order;
    }

    fn candidates(&self, tried: &[String], now: DateTime<Utc>) -> Vec<&Entry> {
        self.priority
            .iter()
            .map(|&i| &self.entries[i])
            .filter(|e| e.status.is_healthy(now) && !tried.contains(&e.status.name))
            .collect()
    }
}

fn tier_rank(tier: ProviderTier, prefer_local: bool) -> u8 {
    if !prefer_local {
        return tier.rank();
    }
    match tier {
        ProviderTier::Byok => 0,
        ProviderTier::Local => 1,
        ProviderTier::Authenticated => 2,
        ProviderTier::Anonymous => 3,
    }
}

enum ProbeOutcome {
    Available(RateLimitInfo),
    NotAvailable,
    Failed(String),
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| (*s).to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "adapter panicked".to_string())
}

fn elapsed_ms(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}

async fn probe(provider: Arc<dyn Provider>, timeout: Duration) -> ProbeOutcome {
    let check = async {
        if !provider.is_available().await {
            return ProbeOutcome::NotAvailable;
        }
        match provider.rate_limits().await {
            Ok(rate_limit) => ProbeOutcome::Available(rate_limit),
            Err(err) => ProbeOutcome::Failed(err.to_string()),
        }
    };

    match tokio::time::timeout(timeout, AssertUnwindSafe(check).catch_unwind()).await {
        Ok(Ok(outcome)) => outcome,
        Ok(Err(panic)) => ProbeOutcome::Failed(format!("Probe panicked: {}", panic_message(&*panic))),
        Err(_) => ProbeOutcome::Failed(format!("Probe timed out after {}ms", timeout.as_millis())),
    }
}

// ============================================================================
// Builder
// ============================================================================

/// Assembles a [`Router`]
pub struct RouterBuilder {
    config: RouterConfig,
    providers: Vec<Arc<dyn Provider>>,
    clock: Arc<dyn Clock>,
    profiles: Vec<(String, ProviderProfile)>,
}

impl Default for RouterBuilder {
    fn default() -> Self {
        Self {
            config: RouterConfig::default(),
            providers: Vec::new(),
            clock: Arc::new(SystemClock),
            profiles: Vec::new(),
        }
    }
}

impl RouterBuilder {
    /// Routing behavior
    #[must_use]
    pub fn config(mut self, config: RouterConfig) -> Self {
        self.config = config;
        self
    }

    /// Register a provider (registration order matters for ties)
    #[must_use]
    pub fn provider(self, provider: impl Provider + 'static) -> Self {
        self.shared_provider(Arc::new(provider))
    }

    /// Register a provider the caller keeps a handle to
    #[must_use]
    pub fn shared_provider(mut self, provider: Arc<dyn Provider>) -> Self {
        self.providers.push(provider);
        self
    }

    /// Register several providers
    #[must_use]
    pub fn providers(mut self, providers: impl IntoIterator<Item = Arc<dyn Provider>>) -> Self {
        self.providers.extend(providers);
        self
    }

    /// Time source for rate-limit expiry
    #[must_use]
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Override a provider's scoring profile
    #[must_use]
    pub fn profile(mut self, name: impl Into<String>, profile: ProviderProfile) -> Self {
        self.profiles.push((name.into(), profile));
        self
    }

    /// Build the router
    ///
    /// # Errors
    ///
    /// [`RouterError::DuplicateProvider`] when two providers share a name.
    pub fn build(self) -> Result<Router, RouterError> {
        let mut scorer = Scorer::new()
            .with_preferred_provider(self.config.preferred_provider.clone())
            .with_prefer_local(self.config.prefer_local);
        for (name, profile) in self.profiles {
            scorer = scorer.with_profile(name, profile);
        }

        let mut entries: Vec<Entry> = Vec::with_capacity(self.providers.len());
        for provider in self.providers {
            let name = provider.name().to_string();
            if entries.iter().any(|e| e.status.name == name) {
                return Err(RouterError::DuplicateProvider(name));
            }
            scorer.register(&name);
            let status = ProviderStatus::new(name, provider.tier());
            entries.push(Entry { provider, status });
        }

        let mut state = RouterState {
            entries,
            priority: Vec::new(),
            scorer,
            phase: RouterPhase::Uninitialized,
        };
        state.rebuild_priority(&self.config);

        Ok(Router {
            config: self.config,
            clock: self.clock,
            state: Mutex::new(state),
            init_lock: tokio::sync::Mutex::new(()),
        })
    }
}

// ============================================================================
// Router
// ============================================================================

/// Adaptive provider router
///
/// Build one at the composition root and share it by reference. All state is
/// in memory and lives as long as the router.
pub struct Router {
    config: RouterConfig,
    clock: Arc<dyn Clock>,
    state: Mutex<RouterState>,
    init_lock: tokio::sync::Mutex<()>,
}

impl fmt::Debug for Router {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        let providers: Vec<&str> = state.entries.iter().map(|e| e.status.name.as_str()).collect();
        f.debug_struct("Router")
            .field("providers", &providers)
            .field("phase", &state.phase)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl Router {
    /// Start building a router
    #[must_use]
    pub fn builder() -> RouterBuilder {
        RouterBuilder::default()
    }

    /// Build a router with the bundled adapters configured by `config.providers`
    ///
    /// # Errors
    ///
    /// Propagates [`RouterBuilder::build`] failures.
    pub fn from_config(config: RouterConfig) -> Result<Self, RouterError> {
        let providers = providers_from_settings(&config.providers);
        Self::builder().providers(providers).config(config).build()
    }

    /// Routing behavior
    #[must_use]
    pub fn config(&self) -> &RouterConfig {
        &self.config
    }

    /// Current lifecycle phase
    #[must_use]
    pub fn phase(&self) -> RouterPhase {
        self.state.lock().phase
    }

    /// A registered provider by name
    #[must_use]
    pub fn provider(&self, name: &str) -> Option<Arc<dyn Provider>> {
        self.state.lock().entry(name).map(|e| Arc::clone(&e.provider))
    }

    // ------------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------------

    /// Probe every provider concurrently and become ready
    ///
    /// A failing, panicking or slow probe marks only that provider
    /// unavailable.
    pub async fn initialize(&self) {
        let _guard = self.init_lock.lock().await;
        self.state.lock().phase = RouterPhase::Initializing;

        self.probe_all().await;

        let (available, total) = {
            let mut state = self.state.lock();
            state.phase = RouterPhase::Ready;
            let available = state.entries.iter().filter(|e| e.status.available).count();
            (available, state.entries.len())
        };

        tracing::info!(
            available,
            total,
            priority = ?self.priority_order(),
            "Router initialized"
        );
    }

    async fn ensure_initialized(&self) {
        if self.phase() != RouterPhase::Uninitialized {
            return;
        }
        let guard = self.init_lock.lock().await;
        let still_uninitialized = self.phase() == RouterPhase::Uninitialized;
        drop(guard);
        if still_uninitialized {
            self.initialize().await;
        }
    }

    /// Re-probe every provider and rebuild the priority order
    ///
    /// A successful probe clears that provider's failure streak.
    pub async fn refresh(&self) {
        self.probe_all().await;
        let mut state = self.state.lock();
        if state.phase == RouterPhase::Uninitialized {
            state.phase = RouterPhase::Ready;
        }
        tracing::debug!("Provider statuses refreshed");
    }

    async fn probe_all(&self) {
        let providers: Vec<Arc<dyn Provider>> = self
            .state
            .lock()
            .entries
            .iter()
            .map(|e| Arc::clone(&e.provider))
            .collect();

        let timeout = self.config.probe_timeout();
        let outcomes = join_all(providers.iter().map(|p| probe(Arc::clone(p), timeout))).await;

        let now = self.clock.now();
        let mut state = self.state.lock();
        for (provider, outcome) in providers.iter().zip(outcomes) {
            let name = provider.name();
            let Some(entry) = state.entry_mut(name) else {
                continue;
            };
            Self::apply_probe(&mut entry.status, outcome, now);
        }
        state.rebuild_priority(&self.config);
    }

    fn apply_probe(status: &mut ProviderStatus, outcome: ProbeOutcome, now: DateTime<Utc>) {
        match outcome {
            ProbeOutcome::Available(rate_limit) => {
                tracing::debug!(provider = %status.name, remaining = rate_limit.remaining, "Provider available");
                status.apply_probe(true, Some(rate_limit), now);
            }
            ProbeOutcome::NotAvailable => {
                tracing::debug!(provider = %status.name, "Provider not available");
                status.apply_probe(false, None, now);
            }
            ProbeOutcome::Failed(message) => {
                tracing::warn!(provider = %status.name, error = %message, "Provider probe failed");
                status.apply_probe_failure(message, now);
            }
        }
    }

    /// Swap in a reconfigured provider
    ///
    /// The provider replaces any registered one with the same name (or is
    /// appended), gets a fresh probe, keeps its accumulated metrics, and the
    /// priority order is rebuilt. The replaced adapter is closed.
    pub async fn replace_provider(&self, provider: Arc<dyn Provider>) {
        let name = provider.name().to_string();
        let outcome = probe(Arc::clone(&provider), self.config.probe_timeout()).await;
        let now = self.clock.now();

        let replaced = {
            let mut state = self.state.lock();
            let mut status = ProviderStatus::new(name.clone(), provider.tier());
            Self::apply_probe(&mut status, outcome, now);

            let replaced = match state.entry_mut(&name) {
                Some(entry) => {
                    entry.status = status;
                    Some(std::mem::replace(&mut entry.provider, provider))
                }
                None => {
                    state.scorer.register(&name);
                    state.entries.push(Entry { provider, status });
                    None
                }
            };
            state.rebuild_priority(&self.config);
            replaced
        };

        tracing::info!(provider = %name, replaced = replaced.is_some(), "Provider reconfigured");

        if let Some(old) = replaced {
            old.close().await;
        }
    }

    /// Close every adapter
    pub async fn close(&self) {
        let providers: Vec<Arc<dyn Provider>> = {
            let mut state = self.state.lock();
            state.phase = RouterPhase::Closed;
            state.entries.iter().map(|e| Arc::clone(&e.provider)).collect()
        };
        join_all(providers.iter().map(|p| p.close())).await;
        tracing::debug!(count = providers.len(), "Providers closed");
    }

    // ------------------------------------------------------------------------
    // Selection
    // ------------------------------------------------------------------------

    fn select(&self, tried: &[String]) -> Option<Arc<dyn Provider>> {
        let now = self.clock.now();
        let state = self.state.lock();
        let candidates = state.candidates(tried, now);

        if let Some(preferred) = candidates.iter().find(|e| self.config.is_preferred(&e.status.name)) {
            return Some(Arc::clone(&preferred.provider));
        }

        match candidates.as_slice() {
            [] => None,
            [only] => Some(Arc::clone(&only.provider)),
            many => {
                let pool: Vec<(String, ProviderTier)> = many
                    .iter()
                    .map(|e| (e.status.name.clone(), e.status.tier))
                    .collect();
                let ranked = state.scorer.rank(&pool);
                let best = ranked.first()?;
                tracing::debug!(
                    provider = %best.name,
                    score = best.total,
                    reason = %best.reason,
                    candidates = many.len(),
                    "Scored candidates"
                );
                state.entry(&best.name).map(|e| Arc::clone(&e.provider))
            }
        }
    }

    fn record_success(&self, name: &str, latency_ms: u64, tokens: u64, rate_limit: Option<RateLimitInfo>) {
        let now = self.clock.now();
        let mut state = self.state.lock();
        if let Some(entry) = state.entry_mut(name) {
            entry.status.record_success(rate_limit, now);
        }
        state.scorer.record_request(name, latency_ms, tokens, true);
    }

    fn record_failure(&self, name: &str, latency_ms: u64, error: &ProviderError) {
        let now = self.clock.now();
        let mut state = self.state.lock();
        if let Some(entry) = state.entry_mut(name) {
            entry.status.record_failure(error, now);
        }
        state.scorer.record_request(name, latency_ms, 0, false);

        match error.kind() {
            ErrorKind::RateLimit => tracing::warn!(provider = %name, error = %error, "Provider rate limited"),
            ErrorKind::Config | ErrorKind::Unavailable => {
                tracing::warn!(provider = %name, error = %error, "Provider unavailable");
            }
            ErrorKind::Provider => tracing::error!(provider = %name, error = %error, "Provider error"),
        }
    }

    /// Build the single error for an exhausted fallback chain
    fn exhausted(&self, attempted: Vec<String>, mut failures: Vec<ProviderError>) -> RouterError {
        let now = self.clock.now();
        let state = self.state.lock();

        let all_rate_limited = !failures.is_empty()
            && failures.iter().all(|e| e.kind() == ErrorKind::RateLimit);
        let limited_elsewhere = failures.is_empty()
            && state.entries.iter().any(|e| e.status.is_rate_limited(now));

        if !(all_rate_limited || limited_elsewhere) {
            return match failures.pop() {
                Some(last) => RouterError::Exhausted { attempted, last },
                None => RouterError::NoProviders,
            };
        }

        let mut providers: Vec<String> = failures.iter().map(|e| e.provider().to_string()).collect();
        let mut earliest_reset: Option<DateTime<Utc>> = None;
        let mut consider = |reset: Option<DateTime<Utc>>| {
            if let Some(reset) = reset {
                earliest_reset = Some(earliest_reset.map_or(reset, |e: DateTime<Utc>| e.min(reset)));
            }
        };

        for entry in state.entries.iter().filter(|e| e.status.is_rate_limited(now)) {
            consider(entry.status.rate_limit.as_ref().and_then(|r| r.reset_at));
            if !providers.contains(&entry.status.name) {
                providers.push(entry.status.name.clone());
            }
        }
        for details in failures.iter().filter_map(ProviderError::rate_limit_details) {
            consider(details.effective_reset(now));
        }

        let retry_after = failures
            .iter()
            .filter_map(|e| e.rate_limit_details().and_then(|d| d.retry_after))
            .min();
        let upgrade_url = failures
            .iter()
            .find_map(|e| e.rate_limit_details().and_then(|d| d.upgrade_url.clone()));

        let has_byok = state
            .entries
            .iter()
            .any(|e| e.status.tier == ProviderTier::Byok && e.status.available);
        let has_elevated = state
            .entries
            .iter()
            .any(|e| e.status.tier == ProviderTier::Authenticated);

        let mut suggestions = Vec::new();
        if !has_byok {
            suggestions.push(UpgradeSuggestion::ByokCredential);
        }
        if !has_elevated {
            suggestions.push(UpgradeSuggestion::ElevatedAuth);
        }

        RouterError::rate_limited(providers, earliest_reset, retry_after, upgrade_url, suggestions)
    }

    // ------------------------------------------------------------------------
    // Generation
    // ------------------------------------------------------------------------

    /// Route one completion through the fallback chain
    ///
    /// Initializes the router on first use.
    ///
    /// # Errors
    ///
    /// - [`RouterError::RateLimited`] when every attempted provider was
    ///   throttled (or nothing was attempted because all are throttled)
    /// - [`RouterError::Exhausted`] when every candidate failed otherwise
    /// - [`RouterError::NoProviders`] when nothing was healthy
    /// - [`RouterError::Provider`] with fallback disabled
    pub async fn generate(&self, request: &GenerateRequest) -> Result<GenerateResponse, RouterError> {
        self.ensure_initialized().await;

        let request_id = Uuid::new_v4();
        self.run_fallback(request, Vec::new(), Vec::new())
            .instrument(tracing::debug_span!("generate", %request_id))
            .await
    }

    async fn run_fallback(
        &self,
        request: &GenerateRequest,
        mut tried: Vec<String>,
        mut failures: Vec<ProviderError>,
    ) -> Result<GenerateResponse, RouterError> {
        loop {
            let Some(provider) = self.select(&tried) else {
                return Err(self.exhausted(tried, failures));
            };
            let name = provider.name().to_string();
            tried.push(name.clone());

            tracing::debug!(provider = %name, attempt = tried.len(), "Trying provider");

            let started = Instant::now();
            let outcome = AssertUnwindSafe(provider.generate(request))
                .catch_unwind()
                .await
                .unwrap_or_else(|panic| Err(ProviderError::request_failed(&name, panic_message(&*panic))));
            let latency_ms = elapsed_ms(started);

            match outcome {
                Ok(mut response) => {
                    response.provider.clone_from(&name);
                    self.record_success(&name, latency_ms, response.usage.total_tokens, response.rate_limit.clone());
                    tracing::info!(
                        provider = %name,
                        model = %response.model,
                        latency_ms,
                        tokens = response.usage.total_tokens,
                        "Generated response"
                    );
                    return Ok(response);
                }
                Err(err) => {
                    self.record_failure(&name, latency_ms, &err);
                    if !self.config.enable_fallback {
                        return Err(RouterError::Provider(err));
                    }
                    failures.push(err);
                }
            }
        }
    }

    /// Stream one completion from a single provider
    ///
    /// The stream does not fail over once text has been delivered: a later
    /// failure ends it with [`RouterError::StreamInterrupted`]. A provider
    /// that fails before its first chunk, or ends without producing any
    /// text, is abandoned for the non-streaming fallback chain, whose full
    /// text arrives as one terminal chunk.
    pub fn generate_stream<'a>(
        &'a self,
        request: &'a GenerateRequest,
    ) -> BoxStream<'a, Result<String, RouterError>> {
        Box::pin(self.generate_stream_tagged(request).map(|item| item.map(|chunk| chunk.text)))
    }

    /// [`Router::generate_stream`] with every chunk tagged by the provider
    /// that produced it
    pub fn generate_stream_tagged<'a>(
        &'a self,
        request: &'a GenerateRequest,
    ) -> BoxStream<'a, Result<StreamChunk, RouterError>> {
        let request_id = Uuid::new_v4();

        let stream = async_stream::stream! {
            self.ensure_initialized().await;

            let Some(provider) = self.select(&[]) else {
                yield Err(self.exhausted(Vec::new(), Vec::new()));
                return;
            };
            let name = provider.name().to_string();
            tracing::debug!(provider = %name, %request_id, "Streaming from provider");

            let started = Instant::now();
            let opened = AssertUnwindSafe(provider.generate_stream(request))
                .catch_unwind()
                .await
                .unwrap_or_else(|panic| Err(ProviderError::request_failed(&name, panic_message(&*panic))));

            let early_failure = match opened {
                Err(err) => err,
                Ok(mut chunks) => {
                    let mut delivered = false;
                    let mut failure = None;
                    loop {
                        match AssertUnwindSafe(chunks.next()).catch_unwind().await {
                            Ok(Some(Ok(chunk))) => {
                                if chunk.is_empty() {
                                    continue;
                                }
                                delivered = true;
                                yield Ok(StreamChunk::new(&name, chunk));
                            }
                            Ok(Some(Err(err))) => {
                                failure = Some(err);
                                break;
                            }
                            Ok(None) => break,
                            Err(panic) => {
                                failure = Some(ProviderError::request_failed(&name, panic_message(&*panic)));
                                break;
                            }
                        }
                    }

                    let latency_ms = elapsed_ms(started);
                    match failure {
                        None if delivered => {
                            self.record_success(&name, latency_ms, 0, None);
                            tracing::info!(provider = %name, latency_ms, "Stream completed");
                            return;
                        }
                        None => ProviderError::other(&name, "Stream ended without producing any text"),
                        Some(err) if delivered => {
                            self.record_failure(&name, latency_ms, &err);
                            yield Err(RouterError::StreamInterrupted { provider: name.clone(), source: err });
                            return;
                        }
                        Some(err) => err,
                    }
                }
            };

            self.record_failure(&name, elapsed_ms(started), &early_failure);
            if !self.config.enable_fallback {
                yield Err(RouterError::Provider(early_failure));
                return;
            }

            tracing::debug!(provider = %name, "Stream failed before output, falling back");
            let fallback_request = request.clone().with_stream(false);
            let fallback = self
                .run_fallback(&fallback_request, vec![name], vec![early_failure])
                .instrument(tracing::debug_span!("generate_stream", %request_id));
            match fallback.await {
                Ok(response) => yield Ok(StreamChunk::new(response.provider, response.text)),
                Err(err) => yield Err(err),
            }
        };

        Box::pin(stream)
    }

    // ------------------------------------------------------------------------
    // Status
    // ------------------------------------------------------------------------

    /// Status of every registered provider
    #[must_use]
    pub fn status(&self) -> BTreeMap<String, ProviderStatus> {
        self.state
            .lock()
            .entries
            .iter()
            .map(|e| (e.status.name.clone(), e.status.clone()))
            .collect()
    }

    /// The provider the next request would try first
    #[must_use]
    pub fn active_provider(&self) -> Option<Arc<dyn Provider>> {
        self.select(&[])
    }

    /// Provider names in priority order
    #[must_use]
    pub fn priority_order(&self) -> Vec<String> {
        let state = self.state.lock();
        state
            .priority
            .iter()
            .map(|&i| state.entries[i].status.name.clone())
            .collect()
    }

    /// Full ranked scoring of the currently healthy providers
    #[must_use]
    pub fn rank(&self) -> Vec<ProviderScore> {
        let now = self.clock.now();
        let state = self.state.lock();
        let pool: Vec<(String, ProviderTier)> = state
            .candidates(&[], now)
            .iter()
            .map(|e| (e.status.name.clone(), e.status.tier))
            .collect();
        state.scorer.rank(&pool)
    }

    /// Quota snapshot of every provider that has one
    ///
    /// Available providers whose snapshot is missing or older than the
    /// configured TTL are re-queried first.
    pub async fn rate_limits(&self) -> BTreeMap<String, RateLimitInfo> {
        let ttl = self.config.rate_limit_ttl();
        let stale: Vec<Arc<dyn Provider>> = {
            let now = self.clock.now();
            self.state
                .lock()
                .entries
                .iter()
                .filter(|e| e.status.available && e.status.rate_limit_is_stale(now, ttl))
                .map(|e| Arc::clone(&e.provider))
                .collect()
        };

        if !stale.is_empty() {
            let timeout = self.config.probe_timeout();
            let fetched = join_all(stale.iter().map(|p| async move {
                let result = tokio::time::timeout(timeout, AssertUnwindSafe(p.rate_limits()).catch_unwind()).await;
                (p.name().to_string(), result)
            }))
            .await;

            let now = self.clock.now();
            let mut state = self.state.lock();
            for (name, result) in fetched {
                match result {
                    Ok(Ok(Ok(rate_limit))) => {
                        if let Some(entry) = state.entry_mut(&name) {
                            entry.status.update_rate_limit(rate_limit, now);
                        }
                    }
                    Ok(Ok(Err(err))) => {
                        tracing::debug!(provider = %name, error = %err, "Rate limit refresh failed");
                    }
                    Ok(Err(_)) | Err(_) => {
                        tracing::debug!(provider = %name, "Rate limit refresh did not complete");
                    }
                }
            }
        }

        self.state
            .lock()
            .entries
            .iter()
            .filter_map(|e| e.status.rate_limit.clone().map(|r| (e.status.name.clone(), r)))
            .collect()
    }

    /// Per-provider metrics for telemetry
    #[must_use]
    pub fn summary(&self) -> BTreeMap<String, MetricsSummary> {
        self.state.lock().scorer.summary()
    }

    /// Zero every provider's metrics
    pub fn reset_metrics(&self) {
        self.state.lock().scorer.reset();
    }
}
