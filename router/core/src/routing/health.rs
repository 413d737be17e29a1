//! Provider Health and Rate-Limit Tracking
//!
//! One [`ProviderStatus`] per registered provider, mutated after every
//! attempt and by probes.
//!
//! # State Machine
//!
//! ```text
//!                 probe ok                  failure
//! ┌─────────┐ ─────────────▶ ┌───────────┐ ─────────▶ ┌──────────┐
//! │ Unknown │                │ Available │            │ Degraded │
//! └─────────┘ ─────┐         └───────────┘ ◀───────── └────┬─────┘
//!                  │ probe fails      ▲       success       │ 3rd consecutive
//!                  ▼                  │ success             ▼ failure
//!            ┌─────────────┐          └──────────────  ┌─────────────┐
//!            │ Unavailable │ ◀──────────────────────── │ Unavailable │
//!            └─────────────┘     (circuit open)        └─────────────┘
//! ```
//!
//! Being rate limited is orthogonal: a provider whose quota snapshot shows
//! `remaining == 0` with a future reset is "available but limited". The
//! limit lifts by itself once the clock passes `reset_at`; nothing needs to
//! fire for that to happen.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::provider::{ErrorKind, ProviderError, ProviderTier, RateLimitInfo, RateLimitPeriod};

/// Consecutive failures that open the circuit
pub const FAILURE_THRESHOLD: u32 = 3;

// ============================================================================
// Health State
// ============================================================================

/// Coarse health of a provider, derived from its status
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthState {
    /// Never probed
    #[default]
    Unknown,
    /// Reachable with no recent failures
    Available,
    /// Reachable but recently failing
    Degraded,
    /// Unreachable, misconfigured, or circuit open
    Unavailable,
}

impl fmt::Display for HealthState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unknown => write!(f, "unknown"),
            Self::Available => write!(f, "available"),
            Self::Degraded => write!(f, "degraded"),
            Self::Unavailable => write!(f, "unavailable"),
        }
    }
}

// ============================================================================
// Provider Status
// ============================================================================

/// Runtime health of one provider
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ProviderStatus {
    /// Provider name
    pub name: String,

    /// Provider tier
    pub tier: ProviderTier,

    /// Whether the provider is believed reachable and configured
    pub available: bool,

    /// Whether any probe or attempt has been observed yet
    pub probed: bool,

    /// Last known quota snapshot
    pub rate_limit: Option<RateLimitInfo>,

    /// When `rate_limit` was recorded
    pub rate_limit_checked: Option<DateTime<Utc>>,

    /// Message of the most recent failure
    pub last_error: Option<String>,

    /// Kind of the most recent failure
    pub last_error_kind: Option<ErrorKind>,

    /// When the status last changed
    pub last_checked: Option<DateTime<Utc>>,

    /// Failures since the last success
    pub consecutive_failures: u32,
}

impl ProviderStatus {
    /// Status of a provider that has not been probed yet
    pub fn new(name: impl Into<String>, tier: ProviderTier) -> Self {
        Self {
            name: name.into(),
            tier,
            available: false,
            probed: false,
            rate_limit: None,
            rate_limit_checked: None,
            last_error: None,
            last_error_kind: None,
            last_checked: None,
            consecutive_failures: 0,
        }
    }

    /// Whether the quota is exhausted at `now`
    #[must_use]
    pub fn is_rate_limited(&self, now: DateTime<Utc>) -> bool {
        self.rate_limit
            .as_ref()
            .is_some_and(|rl| rl.is_limited_at(now))
    }

    /// Whether the provider may be selected at `now`
    #[must_use]
    pub fn is_healthy(&self, now: DateTime<Utc>) -> bool {
        self.available && !self.is_rate_limited(now) && self.consecutive_failures < FAILURE_THRESHOLD
    }

    /// Coarse health state (ignores rate limiting)
    #[must_use]
    pub fn health(&self) -> HealthState {
        if !self.probed {
            HealthState::Unknown
        } else if !self.available || self.consecutive_failures >= FAILURE_THRESHOLD {
            HealthState::Unavailable
        } else if self.consecutive_failures > 0 {
            HealthState::Degraded
        } else {
            HealthState::Available
        }
    }

    /// Whether a stored quota snapshot is older than `ttl`
    #[must_use]
    pub fn rate_limit_is_stale(&self, now: DateTime<Utc>, ttl: chrono::Duration) -> bool {
        self.rate_limit_checked.map_or(true, |checked| now - checked >= ttl)
    }

    /// Replace the quota snapshot
    pub fn update_rate_limit(&mut self, rate_limit: RateLimitInfo, now: DateTime<Utc>) {
        self.rate_limit = Some(rate_limit);
        self.rate_limit_checked = Some(now);
    }

    /// Apply a completed liveness probe
    ///
    /// A successful probe clears the failure streak.
    pub fn apply_probe(&mut self, available: bool, rate_limit: Option<RateLimitInfo>, now: DateTime<Utc>) {
        self.probed = true;
        self.available = available;
        self.last_checked = Some(now);

        if available {
            self.consecutive_failures = 0;
            self.last_error = None;
            self.last_error_kind = None;
        }
        if let Some(rate_limit) = rate_limit {
            self.update_rate_limit(rate_limit, now);
        }
    }

    /// Apply a probe that panicked or timed out
    pub fn apply_probe_failure(&mut self, message: impl Into<String>, now: DateTime<Utc>) {
        self.probed = true;
        self.available = false;
        self.last_error = Some(message.into());
        self.last_error_kind = Some(ErrorKind::Unavailable);
        self.last_checked = Some(now);
    }

    /// Record a successful call
    ///
    /// Success resets the failure streak and proves the quota is not
    /// exhausted, so an exhausted snapshot without a fresh replacement is
    /// dropped.
    pub fn record_success(&mut self, rate_limit: Option<RateLimitInfo>, now: DateTime<Utc>) {
        self.probed = true;
        self.available = true;
        self.consecutive_failures = 0;
        self.last_error = None;
        self.last_error_kind = None;
        self.last_checked = Some(now);

        match rate_limit {
            Some(rate_limit) => self.update_rate_limit(rate_limit, now),
            None => {
                if self.is_rate_limited(now) {
                    self.rate_limit = None;
                    self.rate_limit_checked = None;
                }
            }
        }
    }

    /// Record a failed call
    pub fn record_failure(&mut self, error: &ProviderError, now: DateTime<Utc>) {
        self.probed = true;
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        self.last_error = Some(error.to_string());
        self.last_error_kind = Some(error.kind());
        self.last_checked = Some(now);

        if error.marks_unavailable() {
            self.available = false;
        }

        if let Some(details) = error.rate_limit_details() {
            let previous = self.rate_limit.as_ref();
            let snapshot = RateLimitInfo {
                limit: details
                    .limit
                    .or_else(|| previous.map(|p| p.limit))
                    .unwrap_or(0),
                remaining: 0,
                reset_at: details.effective_reset(now),
                period: previous
                    .map(|p| p.period)
                    .filter(|p| *p != RateLimitPeriod::Unlimited)
                    .unwrap_or_default(),
                tier: self.tier,
            };
            self.update_rate_limit(snapshot, now);
        }
    }
}
