//! Provider Capability Contract and Adapters
//!
//! Everything the router knows about a backend goes through the [`Provider`]
//! trait. Adapters translate their vendor's wire format and failure modes
//! into the shared request/response types and the four-kind
//! [`ProviderError`] taxonomy.
//!
//! # Adapters
//!
//! | Adapter                    | Name              | Tier                     |
//! |----------------------------|-------------------|--------------------------|
//! | [`GeminiProvider`]         | `gemini`          | BYOK                     |
//! | [`CommunityProxyProvider`] | `community-proxy` | Authenticated/Anonymous  |
//! | [`OllamaProvider`]         | `ollama`          | Local                    |
//! | [`OpenAiCompatProvider`]   | `openai_compat`   | Local                    |

pub mod community;
pub mod error;
pub mod factory;
pub mod gemini;
mod http;
pub mod ollama;
pub mod openai_compat;
pub mod retry;
pub mod traits;
pub mod types;

pub use community::CommunityProxyProvider;
pub use error::{ErrorKind, ProviderError, RateLimitDetails};
pub use factory::{providers_from_settings, ProviderSettings};
pub use gemini::GeminiProvider;
pub use ollama::OllamaProvider;
pub use openai_compat::OpenAiCompatProvider;
pub use retry::RetryConfig;
pub use traits::{ChunkStream, Provider};
pub use types::{
    ChatMessage, GenerateRequest, GenerateResponse, ProviderTier, RateLimitInfo,
    RateLimitPeriod, Role, Usage,
};
