//! Router configuration
//!
//! Pure data resolved by the caller. Loading from files or the environment
//! is the composition root's job.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::provider::ProviderSettings;

/// Behavior settings for a [`Router`](super::Router)
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RouterConfig {
    /// Provider to try first regardless of tier (matched case-insensitively)
    pub preferred_provider: Option<String>,

    /// Promote local providers ahead of the shared tiers (never ahead of BYOK)
    pub prefer_local: bool,

    /// Try the next candidate after a failure; when off, the first failure
    /// is returned as-is
    pub enable_fallback: bool,

    /// Upper bound on one provider's liveness probe during initialize/refresh
    pub probe_timeout_ms: u64,

    /// Age after which a stored quota snapshot is re-queried by `rate_limits()`
    pub rate_limit_ttl_secs: u64,

    /// Adapter settings used by [`Router::from_config`](super::Router::from_config)
    pub providers: ProviderSettings,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            preferred_provider: None,
            prefer_local: false,
            enable_fallback: true,
            probe_timeout_ms: 10_000,
            rate_limit_ttl_secs: 60,
            providers: ProviderSettings::default(),
        }
    }
}

impl RouterConfig {
    /// Set the preferred provider
    #[must_use]
    pub fn with_preferred_provider(mut self, name: impl Into<String>) -> Self {
        self.preferred_provider = Some(name.into());
        self
    }

    /// Set local-first ordering
    #[must_use]
    pub fn with_prefer_local(mut self, prefer_local: bool) -> Self {
        self.prefer_local = prefer_local;
        self
    }

    /// Enable or disable fallback
    #[must_use]
    pub fn with_fallback(mut self, enable: bool) -> Self {
        self.enable_fallback = enable;
        self
    }

    /// Probe timeout as a `Duration`
    #[must_use]
    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }

    /// Quota snapshot TTL as a chrono duration
    #[must_use]
    pub fn rate_limit_ttl(&self) -> chrono::Duration {
        chrono::Duration::seconds(i64::try_from(self.rate_limit_ttl_secs).unwrap_or(i64::MAX))
    }

    /// Whether `name` is the configured preferred provider
    #[must_use]
    pub fn is_preferred(&self, name: &str) -> bool {
        self.preferred_provider
            .as_deref()
            .is_some_and(|p| p.eq_ignore_ascii_case(name))
    }
}
