//! Provider Error Taxonomy
//!
//! Every adapter failure is exactly one of four kinds. The router's retry
//! policy is driven by the kind alone, so adapters must never leak transport
//! errors or vendor SDK types through this boundary.
//!
//! | Kind          | Router reaction                                         |
//! |---------------|---------------------------------------------------------|
//! | `Config`      | mark unavailable until reconfigured, try next provider  |
//! | `RateLimited` | record quota snapshot, try next provider                |
//! | `Unavailable` | mark unavailable until next refresh, try next provider  |
//! | `Other`       | count the failure, try next provider                    |

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

// ============================================================================
// Error Kind
// ============================================================================

/// Payload-free classification of a provider failure
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Missing or invalid credential/setting
    Config,
    /// Quota exhausted
    RateLimit,
    /// Transient outage (refused connection, timeout, 5xx)
    Unavailable,
    /// Anything else
    Provider,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Config => write!(f, "configuration error"),
            Self::RateLimit => write!(f, "rate limited"),
            Self::Unavailable => write!(f, "unavailable"),
            Self::Provider => write!(f, "provider error"),
        }
    }
}

// ============================================================================
// Rate Limit Details
// ============================================================================

/// Quota information attached to a rate-limit failure
///
/// All fields are optional because vendors report wildly different subsets.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RateLimitDetails {
    /// How long the vendor asked us to wait
    pub retry_after: Option<Duration>,
    /// Requests allowed per period
    pub limit: Option<u64>,
    /// Requests left in the current period
    pub remaining: Option<u64>,
    /// When the quota resets
    pub reset_at: Option<DateTime<Utc>>,
    /// Where the user can buy a higher quota
    pub upgrade_url: Option<String>,
}

impl RateLimitDetails {
    /// Set the retry-after hint
    #[must_use]
    pub fn with_retry_after(mut self, retry_after: Duration) -> Self {
        self.retry_after = Some(retry_after);
        self
    }

    /// Set the quota limit
    #[must_use]
    pub fn with_limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Set the remaining quota
    #[must_use]
    pub fn with_remaining(mut self, remaining: u64) -> Self {
        self.remaining = Some(remaining);
        self
    }

    /// Set the reset time
    #[must_use]
    pub fn with_reset_at(mut self, reset_at: DateTime<Utc>) -> Self {
        self.reset_at = Some(reset_at);
        self
    }

    /// Set the upgrade URL
    #[must_use]
    pub fn with_upgrade_url(mut self, url: impl Into<String>) -> Self {
        self.upgrade_url = Some(url.into());
        self
    }

    /// Best estimate of when the quota becomes usable again
    ///
    /// Prefers an explicit reset time and falls back to `now + retry_after`.
    /// A delay that overflows the calendar means no known reset.
    #[must_use]
    pub fn effective_reset(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.reset_at.or_else(|| {
            self.retry_after
                .and_then(|d| chrono::Duration::from_std(d).ok())
                .and_then(|d| now.checked_add_signed(d))
        })
    }
}

// ============================================================================
// Provider Error
// ============================================================================

/// A typed failure raised by a provider adapter
#[derive(Clone, Debug, Error)]
pub enum ProviderError {
    /// Provider is fundamentally misconfigured
    #[error("[{provider}] {message}")]
    Config {
        /// Provider that failed
        provider: String,
        /// Human-readable cause
        message: String,
    },

    /// Quota exhausted
    #[error("[{provider}] {message}")]
    RateLimited {
        /// Provider that failed
        provider: String,
        /// Human-readable cause
        message: String,
        /// Quota details reported by the vendor
        details: RateLimitDetails,
    },

    /// Transient outage
    #[error("[{provider}] {message}")]
    Unavailable {
        /// Provider that failed
        provider: String,
        /// Human-readable cause
        message: String,
    },

    /// Catch-all for unexpected failures
    #[error("[{provider}] {message}")]
    Other {
        /// Provider that failed
        provider: String,
        /// Human-readable cause
        message: String,
    },
}

impl ProviderError {
    /// Create a configuration error
    pub fn config(provider: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Config {
            provider: provider.into(),
            message: message.into(),
        }
    }

    /// Create a rate-limit error
    pub fn rate_limited(
        provider: impl Into<String>,
        message: impl Into<String>,
        details: RateLimitDetails,
    ) -> Self {
        Self::RateLimited {
            provider: provider.into(),
            message: message.into(),
            details,
        }
    }

    /// Create an unavailability error
    pub fn unavailable(provider: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Unavailable {
            provider: provider.into(),
            message: message.into(),
        }
    }

    /// Create a catch-all error
    pub fn other(provider: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Other {
            provider: provider.into(),
            message: message.into(),
        }
    }

    /// Wrap a foreign failure as `Other("Request failed: <cause>")`
    pub fn request_failed(provider: impl Into<String>, cause: impl fmt::Display) -> Self {
        Self::other(provider, format!("Request failed: {cause}"))
    }

    /// The failure kind
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Config { .. } => ErrorKind::Config,
            Self::RateLimited { .. } => ErrorKind::RateLimit,
            Self::Unavailable { .. } => ErrorKind::Unavailable,
            Self::Other { .. } => ErrorKind::Provider,
        }
    }

    /// Name of the provider that raised this error
    #[must_use]
    pub fn provider(&self) -> &str {
        match self {
            Self::Config { provider, .. }
            | Self::RateLimited { provider, .. }
            | Self::Unavailable { provider, .. }
            | Self::Other { provider, .. } => provider,
        }
    }

    /// The message without the provider prefix
    #[must_use]
    pub fn message(&self) -> &str {
        match self {
            Self::Config { message, .. }
            | Self::RateLimited { message, .. }
            | Self::Unavailable { message, .. }
            | Self::Other { message, .. } => message,
        }
    }

    /// Quota details when this is a rate-limit failure
    #[must_use]
    pub fn rate_limit_details(&self) -> Option<&RateLimitDetails> {
        match self {
            Self::RateLimited { details, .. } => Some(details),
            _ => None,
        }
    }

    /// Whether the provider should be taken out of rotation until re-probed
    #[must_use]
    pub fn marks_unavailable(&self) -> bool {
        matches!(self, Self::Config { .. } | Self::Unavailable { .. })
    }
}
