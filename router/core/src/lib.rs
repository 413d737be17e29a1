//! Router Core - Adaptive Client-Side Routing for LLM Completions
//!
//! This crate picks the best reachable completion provider for every request,
//! fails over transparently on errors or throttling, and hands the caller one
//! coherent result. Callers never need to know which backend served them.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                            Caller                                │
//! │          generate() / generate_stream() / status()               │
//! └───────────────────────────────┬──────────────────────────────────┘
//!                                 │
//! ┌───────────────────────────────┼──────────────────────────────────┐
//! │                          ROUTER CORE                             │
//! │  ┌────────────────────────────┴───────────────────────────────┐  │
//! │  │                          Router                             │  │
//! │  │  ┌──────────────┐   ┌──────────────┐   ┌────────────────┐  │  │
//! │  │  │   Health /   │   │    Scorer    │   │   Fallback     │  │  │
//! │  │  │  Rate Limits │──▶│  (weighted)  │──▶│     loop       │  │  │
//! │  │  └──────────────┘   └──────────────┘   └───────┬────────┘  │  │
//! │  └────────────────────────────────────────────────┼───────────┘  │
//! │                                                   │              │
//! │            dyn Provider (capability contract)     │              │
//! │  ┌──────────┐ ┌─────────────────┐ ┌────────┐ ┌────┴──────────┐   │
//! │  │  Gemini  │ │ Community proxy │ │ Ollama │ │ OpenAI-compat │   │
//! │  │  (BYOK)  │ │ (auth / anon)   │ │ (local)│ │    (local)    │   │
//! │  └──────────┘ └─────────────────┘ └────────┘ └───────────────┘   │
//! └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Key Types
//!
//! - [`Router`]: owns provider health, metrics and the fallback loop
//! - [`Provider`]: the capability contract every backend adapter implements
//! - [`ProviderError`]: the four-kind failure taxonomy adapters must speak
//! - [`RouterError`]: the single aggregated error callers see
//! - [`Scorer`]: weighted multi-factor ranking of healthy providers
//!
//! # Quick Start
//!
//! ```ignore
//! use router_core::{GenerateRequest, Router, RouterConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), router_core::RouterError> {
//!     let mut config = RouterConfig::default();
//!     config.providers.ollama_model = "llama3.2".into();
//!
//!     let router = Router::from_config(config)?;
//!     router.initialize().await;
//!
//!     let response = router.generate(&GenerateRequest::new("Hello!")).await?;
//!     println!("[{}] {}", response.provider, response.text);
//!
//!     router.close().await;
//!     Ok(())
//! }
//! ```

#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod provider;
pub mod routing;
pub mod testing;

pub use provider::{
    ChatMessage, ChunkStream, CommunityProxyProvider, ErrorKind, GeminiProvider,
    GenerateRequest, GenerateResponse, OllamaProvider, OpenAiCompatProvider, Provider,
    ProviderError, ProviderSettings, ProviderTier, RateLimitDetails, RateLimitInfo,
    RateLimitPeriod, Role, Usage,
};
pub use routing::{
    Clock, HealthState, ManualClock, MetricsSummary, ProviderMetrics, ProviderProfile,
    ProviderScore, ProviderStatus, Router, RouterBuilder, RouterConfig, RouterError,
    RouterPhase, Scorer, StreamChunk, SystemClock, UpgradeSuggestion,
};
