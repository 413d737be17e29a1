//! Provider Capability Contract
//!
//! The small interface every backend adapter implements. The router depends
//! on nothing else, so new vendors plug in without touching routing logic.
//!
//! # Contract
//!
//! - `is_available` is a bounded-time liveness probe and never fails; `true`
//!   is a best-effort signal, not a promise about the next call.
//! - `generate` fails with exactly one [`ProviderError`] kind, never a raw
//!   transport error.
//! - `generate_stream` yields a finite, non-restartable sequence of chunks.
//!   An adapter may fall back to `generate` before the first chunk, but must
//!   never silently drop text.
//! - Every adapter enforces its own per-call timeout. The router adds none
//!   around `generate`, so an adapter without one can stall a request.

use async_trait::async_trait;
use futures::stream::BoxStream;

use super::error::ProviderError;
use super::types::{GenerateRequest, GenerateResponse, ProviderTier, RateLimitInfo};

/// Lazily produced text chunks from a streaming completion
pub type ChunkStream = BoxStream<'static, Result<String, ProviderError>>;

/// LLM provider capability contract
///
/// Implement this trait to route requests to a new backend.
#[async_trait]
pub trait Provider: Send + Sync {
    /// Unique slug (e.g. "gemini", "ollama")
    fn name(&self) -> &str;

    /// Intrinsic priority class
    fn tier(&self) -> ProviderTier;

    /// Check whether the provider can take requests right now
    async fn is_available(&self) -> bool;

    /// Run one non-streaming completion
    async fn generate(&self, request: &GenerateRequest) -> Result<GenerateResponse, ProviderError>;

    /// Run one streaming completion
    ///
    /// The default implementation calls [`Provider::generate`] and yields the
    /// full text as a single chunk.
    async fn generate_stream(&self, request: &GenerateRequest) -> Result<ChunkStream, ProviderError> {
        let response = self.generate(request).await?;
        Ok(Box::pin(futures::stream::once(async move {
            Ok(response.text)
        })))
    }

    /// Current quota snapshot
    ///
    /// Local/offline adapters return [`RateLimitInfo::unlimited`].
    async fn rate_limits(&self) -> Result<RateLimitInfo, ProviderError>;

    /// Model identifiers this provider can serve (adapter-cached)
    async fn models(&self) -> Vec<String> {
        Vec::new()
    }

    /// Release connections and other resources
    async fn close(&self) {}
}
