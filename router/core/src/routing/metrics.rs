//! Per-provider performance counters
//!
//! Counters only grow. They are cleared solely by an explicit
//! [`Scorer::reset`](super::Scorer::reset).

use serde::{Deserialize, Serialize};

/// Cumulative counters for one provider
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ProviderMetrics {
    /// Attempts recorded, successful or not
    pub total_requests: u64,

    /// Attempts that failed
    pub failed_requests: u64,

    /// Sum of attempt latencies
    pub total_latency_ms: u64,

    /// Tokens consumed by successful attempts
    pub total_tokens: u64,

    /// Estimated spend
    pub total_cost_usd: f64,

    /// Latency of the most recent attempt
    pub last_latency_ms: Option<u64>,
}

impl ProviderMetrics {
    /// Accumulate one attempt
    pub fn record(&mut self, latency_ms: u64, tokens: u64, success: bool, cost_per_million: f64) {
        self.total_requests += 1;
        if !success {
            self.failed_requests += 1;
        }
        self.total_latency_ms = self.total_latency_ms.saturating_add(latency_ms);
        self.total_tokens = self.total_tokens.saturating_add(tokens);
        #[allow(clippy::cast_precision_loss)]
        {
            self.total_cost_usd += tokens as f64 * cost_per_million / 1_000_000.0;
        }
        self.last_latency_ms = Some(latency_ms);
    }

    /// Fraction of successful attempts; 1.0 before any attempt
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn success_rate(&self) -> f64 {
        if self.total_requests == 0 {
            return 1.0;
        }
        (self.total_requests - self.failed_requests) as f64 / self.total_requests as f64
    }

    /// Mean latency, if anything was recorded
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn avg_latency_ms(&self) -> Option<f64> {
        if self.total_requests == 0 {
            None
        } else {
            Some(self.total_latency_ms as f64 / self.total_requests as f64)
        }
    }

    /// Read-only view for telemetry
    #[must_use]
    pub fn summary(&self) -> MetricsSummary {
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let avg_latency_ms = self.avg_latency_ms().map_or(0, |avg| avg.round() as u64);

        MetricsSummary {
            total_requests: self.total_requests,
            success_rate: self.success_rate(),
            avg_latency_ms,
            total_tokens: self.total_tokens,
            total_cost_usd: (self.total_cost_usd * 1_000_000.0).round() / 1_000_000.0,
        }
    }
}

/// Telemetry snapshot of one provider's counters
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MetricsSummary {
    /// Attempts recorded
    pub total_requests: u64,

    /// Fraction of successful attempts in `[0, 1]`
    pub success_rate: f64,

    /// Mean latency rounded to whole milliseconds
    pub avg_latency_ms: u64,

    /// Tokens consumed
    pub total_tokens: u64,

    /// Estimated spend rounded to 6 decimals
    pub total_cost_usd: f64,
}
