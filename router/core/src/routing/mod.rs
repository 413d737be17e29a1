//! Routing Engine
//!
//! Selection, fallback, health tracking and scoring across providers.
//!
//! # Request Flow
//!
//! ```text
//!   request
//!      │
//!      ▼
//! ┌──────────────┐   healthy, untried   ┌──────────┐  >1 candidate  ┌────────┐
//! │ ProviderStatus├────────────────────▶│ candidates├──────────────▶│ Scorer │
//! └──────────────┘                      └─────┬────┘                └───┬────┘
//!        ▲                                    │ 1 candidate             │ top pick
//!        │ record outcome                     ▼                         ▼
//!        │                              ┌───────────────────────────────────┐
//!        └──────────────────────────────┤        provider.generate()        │
//!                 failure: try next     └───────────────────────────────────┘
//! ```
//!
//! Health expiry is lazy: rate-limit windows and the circuit breaker are
//! evaluated against the injected [`Clock`] at selection time. No timers or
//! background tasks run.

pub mod clock;
pub mod config;
pub mod error;
pub mod health;
pub mod metrics;
pub mod router;
pub mod scorer;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::RouterConfig;
pub use error::{RouterError, UpgradeSuggestion};
pub use health::{HealthState, ProviderStatus, FAILURE_THRESHOLD};
pub use metrics::{MetricsSummary, ProviderMetrics};
pub use router::{Router, RouterBuilder, RouterPhase, StreamChunk};
pub use scorer::{ProviderProfile, ProviderScore, Scorer, ScoringWeights};
