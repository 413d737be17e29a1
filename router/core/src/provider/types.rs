//! Request and Response Envelope
//!
//! Provider-neutral types passed across the capability contract. The router
//! never inspects `raw`; it exists so callers can debug vendor payloads.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ============================================================================
// Provider Tier
// ============================================================================

/// Intrinsic priority class of a provider, independent of runtime health
///
/// Variants are declared in priority order, so `Ord` sorts best-first.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ProviderTier {
    /// Caller-supplied credential to a commercial backend
    #[serde(rename = "byok")]
    Byok,
    /// Shared endpoint with an elevated (logged-in) quota
    #[serde(rename = "auth")]
    Authenticated,
    /// Shared endpoint with the anonymous quota
    #[serde(rename = "anon")]
    Anonymous,
    /// Inference running on the caller's own hardware
    #[serde(rename = "local")]
    Local,
}

impl ProviderTier {
    /// Default priority rank (lower is tried first)
    #[must_use]
    pub fn rank(self) -> u8 {
        match self {
            Self::Byok => 0,
            Self::Authenticated => 1,
            Self::Anonymous => 2,
            Self::Local => 3,
        }
    }

    /// Short slug used in logs and serialized output
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Byok => "byok",
            Self::Authenticated => "auth",
            Self::Anonymous => "anon",
            Self::Local => "local",
        }
    }
}

impl fmt::Display for ProviderTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Rate Limits
// ============================================================================

/// Length of a quota window
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RateLimitPeriod {
    /// Per-minute quota
    Minute,
    /// Per-hour quota
    Hour,
    /// Per-day quota
    #[default]
    Day,
    /// No quota at all
    Unlimited,
}

impl fmt::Display for RateLimitPeriod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Minute => write!(f, "minute"),
            Self::Hour => write!(f, "hour"),
            Self::Day => write!(f, "day"),
            Self::Unlimited => write!(f, "unlimited"),
        }
    }
}

/// Point-in-time quota snapshot for one provider
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitInfo {
    /// Requests allowed per period
    pub limit: u64,
    /// Requests left in the current period
    pub remaining: u64,
    /// When the quota resets, if known
    pub reset_at: Option<DateTime<Utc>>,
    /// Quota window
    pub period: RateLimitPeriod,
    /// Tier the quota applies to
    pub tier: ProviderTier,
}

impl RateLimitInfo {
    /// Sentinel value used by the "unlimited" snapshot
    pub const UNLIMITED: u64 = 999_999;

    /// Create a daily quota snapshot
    #[must_use]
    pub fn new(limit: u64, remaining: u64, tier: ProviderTier) -> Self {
        Self {
            limit,
            remaining,
            reset_at: None,
            period: RateLimitPeriod::Day,
            tier,
        }
    }

    /// Snapshot for local/offline providers that have no quota
    #[must_use]
    pub fn unlimited(tier: ProviderTier) -> Self {
        Self {
            limit: Self::UNLIMITED,
            remaining: Self::UNLIMITED,
            reset_at: None,
            period: RateLimitPeriod::Unlimited,
            tier,
        }
    }

    /// Set the reset time
    #[must_use]
    pub fn with_reset_at(mut self, reset_at: DateTime<Utc>) -> Self {
        self.reset_at = Some(reset_at);
        self
    }

    /// Set the quota window
    #[must_use]
    pub fn with_period(mut self, period: RateLimitPeriod) -> Self {
        self.period = period;
        self
    }

    /// Whether this is the unlimited sentinel
    #[must_use]
    pub fn is_unlimited(&self) -> bool {
        self.period == RateLimitPeriod::Unlimited
    }

    /// Whether the quota is exhausted at `now`
    ///
    /// An exhausted quota with no known reset time stays exhausted until a
    /// newer snapshot replaces it.
    #[must_use]
    pub fn is_limited_at(&self, now: DateTime<Utc>) -> bool {
        self.remaining == 0 && self.reset_at.map_or(true, |reset| now < reset)
    }
}

// ============================================================================
// Requests
// ============================================================================

/// Speaker of a prior conversation turn
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// System instruction
    System,
    /// End user
    User,
    /// Model output
    Assistant,
}

impl Role {
    /// Wire name shared by most chat APIs
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::System => "system",
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }
}

/// One prior conversation turn
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    /// Who said it
    pub role: Role,
    /// What was said
    pub content: String,
}

impl ChatMessage {
    /// Create a message
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }
}

/// A single completion request, immutable for the duration of a call
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GenerateRequest {
    /// The prompt to complete
    pub prompt: String,
    /// Optional system instruction
    pub system: Option<String>,
    /// Prior conversation turns, oldest first
    pub messages: Vec<ChatMessage>,
    /// Sampling temperature (0.0-2.0)
    pub temperature: f32,
    /// Maximum tokens to generate
    pub max_tokens: u32,
    /// Stop sequences
    pub stop: Vec<String>,
    /// Whether the caller wants a streamed response
    pub stream: bool,
}

impl Default for GenerateRequest {
    fn default() -> Self {
        Self {
            prompt: String::new(),
            system: None,
            messages: Vec::new(),
            temperature: 0.7,
            max_tokens: 2048,
            stop: Vec::new(),
            stream: false,
        }
    }
}

impl GenerateRequest {
    /// Create a request for a prompt
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            ..Default::default()
        }
    }

    /// Set the system instruction
    #[must_use]
    pub fn with_system(mut self, system: impl Into<String>) -> Self {
        self.system = Some(system.into());
        self
    }

    /// Append a prior conversation turn
    #[must_use]
    pub fn with_message(mut self, message: ChatMessage) -> Self {
        self.messages.push(message);
        self
    }

    /// Set temperature
    #[must_use]
    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature.clamp(0.0, 2.0);
        self
    }

    /// Set max tokens
    #[must_use]
    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    /// Add a stop sequence
    #[must_use]
    pub fn with_stop(mut self, stop: impl Into<String>) -> Self {
        self.stop.push(stop.into());
        self
    }

    /// Set streaming mode
    #[must_use]
    pub fn with_stream(mut self, stream: bool) -> Self {
        self.stream = stream;
        self
    }

    /// Single-string rendering for completion-style endpoints
    ///
    /// System instruction first, then prior turns, then the prompt.
    #[must_use]
    pub fn flattened_prompt(&self) -> String {
        let mut full = String::new();

        if let Some(ref system) = self.system {
            full.push_str(system);
            full.push_str("\n\n");
        }

        for message in &self.messages {
            full.push_str(message.role.as_str());
            full.push_str(": ");
            full.push_str(&message.content);
            full.push('\n');
        }

        full.push_str(&self.prompt);
        full
    }
}

// ============================================================================
// Responses
// ============================================================================

/// Token accounting for one completion
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    /// Tokens in the prompt
    pub prompt_tokens: u64,
    /// Tokens generated
    pub completion_tokens: u64,
    /// Sum of both
    pub total_tokens: u64,
}

impl Usage {
    /// Create usage from prompt and completion counts
    #[must_use]
    pub fn new(prompt_tokens: u64, completion_tokens: u64) -> Self {
        Self {
            prompt_tokens,
            completion_tokens,
            total_tokens: prompt_tokens + completion_tokens,
        }
    }
}

/// A completed generation, tagged with the provider that served it
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GenerateResponse {
    /// Generated text
    pub text: String,
    /// Name of the serving provider
    pub provider: String,
    /// Model that produced the text
    pub model: String,
    /// Token accounting
    pub usage: Usage,
    /// Why generation stopped, as reported by the vendor
    pub finish_reason: Option<String>,
    /// Quota snapshot piggybacked on the response
    pub rate_limit: Option<RateLimitInfo>,
    /// Vendor payload, never interpreted by the router
    pub raw: Option<serde_json::Value>,
}

impl GenerateResponse {
    /// Create a response with empty usage
    pub fn new(
        text: impl Into<String>,
        provider: impl Into<String>,
        model: impl Into<String>,
    ) -> Self {
        Self {
            text: text.into(),
            provider: provider.into(),
            model: model.into(),
            usage: Usage::default(),
            finish_reason: None,
            rate_limit: None,
            raw: None,
        }
    }

    /// Set token usage
    #[must_use]
    pub fn with_usage(mut self, usage: Usage) -> Self {
        self.usage = usage;
        self
    }

    /// Set the finish reason
    #[must_use]
    pub fn with_finish_reason(mut self, reason: impl Into<String>) -> Self {
        self.finish_reason = Some(reason.into());
        self
    }

    /// Attach a quota snapshot
    #[must_use]
    pub fn with_rate_limit(mut self, rate_limit: RateLimitInfo) -> Self {
        self.rate_limit = Some(rate_limit);
        self
    }

    /// Attach the vendor payload
    #[must_use]
    pub fn with_raw(mut self, raw: serde_json::Value) -> Self {
        self.raw = Some(raw);
        self
    }
}
