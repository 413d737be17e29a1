//! Router-level errors
//!
//! Whatever happened across the fallback chain, the caller sees exactly one
//! of these. Per-provider details stay available through
//! [`Router::status`](super::Router::status) and the logs.

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::provider::{ErrorKind, ProviderError};

/// Where a BYOK key can be obtained
pub const BYOK_KEY_URL: &str = "https://aistudio.google.com/app/apikey";

/// Action that would lift a universal rate limit, in recommendation order
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpgradeSuggestion {
    /// Bring your own commercial API key
    ByokCredential,
    /// Authenticate to the shared proxy's elevated tier
    ElevatedAuth,
}

impl fmt::Display for UpgradeSuggestion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ByokCredential => write!(
                f,
                "Use your own Gemini API key for unlimited requests (get one at {BYOK_KEY_URL})"
            ),
            Self::ElevatedAuth => write!(
                f,
                "Configure an auth token for the community proxy for 5x more requests (25/day)"
            ),
        }
    }
}

/// Failure of a routed request
#[derive(Debug, Error)]
pub enum RouterError {
    /// Every attempted provider was rate limited
    #[error("{message}")]
    RateLimited {
        /// Rendered message with suggestions and reset time
        message: String,
        /// Earliest known reset among the limited providers
        earliest_reset: Option<DateTime<Utc>>,
        /// Shortest wait hint reported by any provider
        retry_after: Option<Duration>,
        /// First upgrade URL reported by any provider
        upgrade_url: Option<String>,
        /// Ranked, de-duplicated upgrade actions
        suggestions: Vec<UpgradeSuggestion>,
        /// Providers that were rate limited
        providers: Vec<String>,
    },

    /// Every candidate failed, not all of them on quota
    #[error("All providers failed. Last error: {last}")]
    Exhausted {
        /// Providers attempted, in order
        attempted: Vec<String>,
        /// The final provider's error
        last: ProviderError,
    },

    /// Nothing healthy to try
    #[error("No providers available. Configure an API key or start Ollama.")]
    NoProviders,

    /// Two providers registered under one name
    #[error("Provider '{0}' is already registered")]
    DuplicateProvider(String),

    /// Single-provider mode: the provider's own error, unchanged
    #[error(transparent)]
    Provider(#[from] ProviderError),

    /// A stream failed after part of the output was delivered
    #[error("Stream from {provider} interrupted after partial output: {source}")]
    StreamInterrupted {
        /// Provider that was streaming
        provider: String,
        /// What went wrong
        #[source]
        source: ProviderError,
    },
}

impl RouterError {
    /// Build the aggregated rate-limit error
    #[must_use]
    pub fn rate_limited(
        providers: Vec<String>,
        earliest_reset: Option<DateTime<Utc>>,
        retry_after: Option<Duration>,
        upgrade_url: Option<String>,
        mut suggestions: Vec<UpgradeSuggestion>,
    ) -> Self {
        suggestions.sort();
        suggestions.dedup();

        let mut lines = vec!["Rate limit reached on all providers.".to_string()];
        for suggestion in &suggestions {
            lines.push(format!("Tip: {suggestion}"));
        }
        if let Some(reset) = earliest_reset {
            lines.push(format!("Limits reset at {}", reset.format("%H:%M UTC")));
        }

        Self::RateLimited {
            message: lines.join("\n"),
            earliest_reset,
            retry_after,
            upgrade_url,
            suggestions,
            providers,
        }
    }

    /// Map onto the four-kind provider taxonomy
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::RateLimited { .. } => ErrorKind::RateLimit,
            Self::Exhausted { last, .. } => last.kind(),
            Self::NoProviders => ErrorKind::Unavailable,
            Self::DuplicateProvider(_) => ErrorKind::Config,
            Self::Provider(err) | Self::StreamInterrupted { source: err, .. } => err.kind(),
        }
    }

    /// Whether this is the aggregated rate-limit error
    #[must_use]
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, Self::RateLimited { .. })
    }
}
