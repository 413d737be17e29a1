//! Provider Scorer
//!
//! Multi-factor weighted ranking of the currently healthy providers.
//!
//! # Scoring
//!
//! ```text
//! total = 0.40 × reliability   (success rate, 1.0 before any request)
//!       + 0.30 × preference    (1.0 preferred, else per-tier constant)
//!       + 0.20 × latency       (1 − avg_ms / 5000, baseline before any request)
//!       + 0.10 × cost          (1 − cost_per_1M / 10, 1.0 when free)
//! ```
//!
//! Every sub-score is clamped to `[0, 1]` and the total is rounded to four
//! decimals. Scoring reads only recorded metrics and configuration, so the
//! same inputs always produce the same total.

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};

use super::metrics::{MetricsSummary, ProviderMetrics};
use crate::provider::ProviderTier;

/// Latency at which the latency sub-score reaches zero
const LATENCY_CEILING_MS: f64 = 5_000.0;

/// Cost per million tokens at which the cost sub-score reaches zero
const COST_CEILING_PER_MILLION: f64 = 10.0;

// ============================================================================
// Weights & Profiles
// ============================================================================

/// Relative weight of each sub-score; the four sum to 1.0
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct ScoringWeights {
    /// Weight of the historical success rate
    pub reliability: f64,
    /// Weight of configured or tier preference
    pub preference: f64,
    /// Weight of observed or baseline latency
    pub latency: f64,
    /// Weight of token cost
    pub cost: f64,
}

impl Default for ScoringWeights {
    fn default() -> Self {
        Self {
            reliability: 0.4,
            preference: 0.3,
            latency: 0.2,
            cost: 0.1,
        }
    }
}

/// Static characteristics used before a provider has history
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct ProviderProfile {
    /// Expected latency until real measurements exist
    pub baseline_latency_ms: u64,
    /// Estimated USD per million tokens
    pub cost_per_million: f64,
}

impl ProviderProfile {
    /// Profile for a provider with no known characteristics
    pub const UNKNOWN: Self = Self {
        baseline_latency_ms: 2_000,
        cost_per_million: 1.0,
    };

    /// Create a profile
    #[must_use]
    pub const fn new(baseline_latency_ms: u64, cost_per_million: f64) -> Self {
        Self {
            baseline_latency_ms,
            cost_per_million,
        }
    }

    /// Built-in profile for the bundled adapters
    #[must_use]
    pub fn builtin(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "gemini" => Some(Self::new(800, 0.075)),
            "community-proxy" => Some(Self::new(1_500, 0.0)),
            "ollama" => Some(Self::new(2_000, 0.0)),
            "openai_compat" => Some(Self::new(1_000, 0.0)),
            _ => None,
        }
    }
}

// ============================================================================
// Score
// ============================================================================

/// Ranking output for one provider
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ProviderScore {
    /// Provider name
    pub name: String,
    /// Success-rate sub-score
    pub reliability: f64,
    /// Preference sub-score
    pub preference: f64,
    /// Latency sub-score
    pub latency: f64,
    /// Cost sub-score
    pub cost: f64,
    /// Weighted total, rounded to 4 decimals
    pub total: f64,
    /// Human-readable explanation
    pub reason: String,
}

fn clamp_unit(value: f64) -> f64 {
    value.clamp(0.0, 1.0)
}

fn round4(value: f64) -> f64 {
    (value * 10_000.0).round() / 10_000.0
}

// ============================================================================
// Scorer
// ============================================================================

/// Ranks providers and accumulates their metrics
#[derive(Clone, Debug, Default)]
pub struct Scorer {
    weights: ScoringWeights,
    preferred_provider: Option<String>,
    prefer_local: bool,
    profiles: HashMap<String, ProviderProfile>,
    metrics: BTreeMap<String, ProviderMetrics>,
}

impl Scorer {
    /// Create a scorer with the default weights and built-in profiles
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Give `name` the full preference sub-score
    #[must_use]
    pub fn with_preferred_provider(mut self, name: Option<String>) -> Self {
        self.preferred_provider = name;
        self
    }

    /// Raise the local tier's preference constant
    #[must_use]
    pub fn with_prefer_local(mut self, prefer_local: bool) -> Self {
        self.prefer_local = prefer_local;
        self
    }

    /// Override the profile of one provider
    #[must_use]
    pub fn with_profile(mut self, name: impl Into<String>, profile: ProviderProfile) -> Self {
        self.profiles.insert(name.into().to_ascii_lowercase(), profile);
        self
    }

    /// The weights in use
    #[must_use]
    pub fn weights(&self) -> ScoringWeights {
        self.weights
    }

    /// Seed an empty metrics entry for `name`
    pub fn register(&mut self, name: &str) {
        self.metrics.entry(name.to_string()).or_default();
    }

    /// Effective profile for `name`
    #[must_use]
    pub fn profile(&self, name: &str) -> ProviderProfile {
        self.profiles
            .get(&name.to_ascii_lowercase())
            .copied()
            .or_else(|| ProviderProfile::builtin(name))
            .unwrap_or(ProviderProfile::UNKNOWN)
    }

    /// Metrics recorded for `name`
    #[must_use]
    pub fn metrics(&self, name: &str) -> Option<&ProviderMetrics> {
        self.metrics.get(name)
    }

    fn is_preferred(&self, name: &str) -> bool {
        self.preferred_provider
            .as_deref()
            .is_some_and(|p| p.eq_ignore_ascii_case(name))
    }

    fn tier_preference(&self, tier: ProviderTier) -> f64 {
        match tier {
            ProviderTier::Byok => 0.8,
            ProviderTier::Authenticated => 0.6,
            ProviderTier::Local if self.prefer_local => 0.7,
            ProviderTier::Local => 0.5,
            ProviderTier::Anonymous => 0.4,
        }
    }

    /// Score one provider
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn score(&self, name: &str, tier: ProviderTier) -> ProviderScore {
        let profile = self.profile(name);
        let metrics = self.metrics.get(name);
        let history = metrics.filter(|m| m.total_requests > 0);

        let reliability = clamp_unit(history.map_or(1.0, ProviderMetrics::success_rate));

        let preferred = self.is_preferred(name);
        let preference = if preferred {
            1.0
        } else {
            self.tier_preference(tier)
        };

        let (latency_ms, measured) = match history.and_then(ProviderMetrics::avg_latency_ms) {
            Some(avg) => (avg, true),
            None => (profile.baseline_latency_ms as f64, false),
        };
        let latency = clamp_unit(1.0 - latency_ms / LATENCY_CEILING_MS);

        let cost = if profile.cost_per_million <= 0.0 {
            1.0
        } else {
            clamp_unit(1.0 - profile.cost_per_million / COST_CEILING_PER_MILLION)
        };

        let w = self.weights;
        let total = round4(
            w.reliability * reliability + w.preference * preference + w.latency * latency + w.cost * cost,
        );

        let reason = format!(
            "{}, success {:.0}%{}, {} {:.0}ms, {}",
            if preferred { "preferred".to_string() } else { format!("{tier} tier") },
            reliability * 100.0,
            history.map_or(String::new(), |m| format!(" of {}", m.total_requests)),
            if measured { "avg" } else { "baseline" },
            latency_ms,
            if profile.cost_per_million <= 0.0 {
                "free".to_string()
            } else {
                format!("${}/1M tokens", profile.cost_per_million)
            },
        );

        ProviderScore {
            name: name.to_string(),
            reliability,
            preference,
            latency,
            cost,
            total,
            reason,
        }
    }

    /// Score and sort candidates, best first
    ///
    /// The sort is stable: equal totals keep the input order.
    #[must_use]
    pub fn rank(&self, candidates: &[(String, ProviderTier)]) -> Vec<ProviderScore> {
        let mut scores: Vec<ProviderScore> = candidates
            .iter()
            .map(|(name, tier)| self.score(name, *tier))
            .collect();
        scores.sort_by(|a, b| b.total.total_cmp(&a.total));
        scores
    }

    /// Record the outcome of one attempt
    pub fn record_request(&mut self, name: &str, latency_ms: u64, tokens: u64, success: bool) {
        let cost_per_million = self.profile(name).cost_per_million;
        self.metrics
            .entry(name.to_string())
            .or_default()
            .record(latency_ms, tokens, success, cost_per_million);

        tracing::debug!(
            provider = %name,
            latency_ms,
            tokens,
            success,
            "Recorded request"
        );
    }

    /// Telemetry view of every provider's counters
    #[must_use]
    pub fn summary(&self) -> BTreeMap<String, MetricsSummary> {
        self.metrics
            .iter()
            .map(|(name, metrics)| (name.clone(), metrics.summary()))
            .collect()
    }

    /// Zero every provider's counters
    pub fn reset(&mut self) {
        for metrics in self.metrics.values_mut() {
            *metrics = ProviderMetrics::default();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn approx(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn test_weights_sum_to_one() {
        let w = ScoringWeights::default();
        assert!(approx(w.reliability + w.preference + w.latency + w.cost, 1.0));
    }

    #[test]
    fn test_fresh_gemini_score() {
        let scorer = Scorer::new();
        let score = scorer.score("gemini", ProviderTier::Byok);

        // 0.4×1.0 + 0.3×0.8 + 0.2×(1 − 800/5000) + 0.1×(1 − 0.075/10)
        assert!(approx(score.reliability, 1.0));
        assert!(approx(score.preference, 0.8));
        assert!(approx(score.latency, 0.84));
        assert!(approx(score.cost, 0.9925));
        assert!((score.total - 0.907_25).abs() <= 1e-4);
        assert!(score.reason.contains("baseline"));
    }

    #[test]
    fn test_preferred_gets_full_preference() {
        let scorer = Scorer::new().with_preferred_provider(Some("OLLAMA".into()));
        let score = scorer.score("ollama", ProviderTier::Local);
        assert!(approx(score.preference, 1.0));
        assert!(score.reason.starts_with("preferred"));
    }

    #[test]
    fn test_prefer_local_raises_local_constant() {
        let plain = Scorer::new().score("ollama", ProviderTier::Local);
        let local = Scorer::new()
            .with_prefer_local(true)
            .score("ollama", ProviderTier::Local);
        assert!(approx(plain.preference, 0.5));
        assert!(approx(local.preference, 0.7));
    }

    #[test]
    fn test_unknown_provider_uses_fallback_profile() {
        let scorer = Scorer::new();
        assert_eq!(scorer.profile("mystery"), ProviderProfile::UNKNOWN);

        let score = scorer.score("mystery", ProviderTier::Anonymous);
        assert!(approx(score.latency, 0.6));
        assert!(approx(score.cost, 0.9));
    }

    #[test]
    fn test_measured_latency_replaces_baseline() {
        let mut scorer = Scorer::new();
        scorer.record_request("ollama", 500, 10, true);

        let score = scorer.score("ollama", ProviderTier::Local);
        assert!(approx(score.latency, 0.9));
        assert!(score.reason.contains("avg"));
    }

    #[test]
    fn test_failures_lower_reliability() {
        let mut scorer = Scorer::new();
        scorer.record_request("gemini", 800, 0, false);
        scorer.record_request("gemini", 800, 100, true);

        let score = scorer.score("gemini", ProviderTier::Byok);
        assert!(approx(score.reliability, 0.5));
    }

    #[test]
    fn test_latency_is_clamped() {
        let mut scorer = Scorer::new();
        scorer.record_request("slow", 60_000, 0, true);
        assert!(approx(scorer.score("slow", ProviderTier::Local).latency, 0.0));
    }

    #[test]
    fn test_scoring_is_deterministic() {
        let mut scorer = Scorer::new();
        scorer.record_request("gemini", 1234, 99, true);
        scorer.record_request("gemini", 10, 0, false);

        let a = scorer.score("gemini", ProviderTier::Byok);
        let b = scorer.score("gemini", ProviderTier::Byok);
        assert_eq!(a, b);
    }

    #[test]
    fn test_rank_orders_best_first_and_keeps_ties_stable() {
        let scorer = Scorer::new()
            .with_profile("a", ProviderProfile::new(1_000, 0.0))
            .with_profile("b", ProviderProfile::new(1_000, 0.0));

        let ranked = scorer.rank(&[
            ("a".to_string(), ProviderTier::Local),
            ("gemini".to_string(), ProviderTier::Byok),
            ("b".to_string(), ProviderTier::Local),
        ]);

        let names: Vec<&str> = ranked.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["gemini", "a", "b"]);
    }

    #[test]
    fn test_record_request_accrues_cost() {
        let mut scorer = Scorer::new();
        scorer.register("gemini");
        scorer.record_request("gemini", 100, 2_000_000, true);

        let metrics = scorer.metrics("gemini").unwrap();
        assert!(approx(metrics.total_cost_usd, 0.15));
    }

    #[test]
    fn test_summary_and_reset() {
        let mut scorer = Scorer::new();
        scorer.register("ollama");
        scorer.record_request("ollama", 250, 42, true);

        let summary = scorer.summary();
        assert_eq!(summary["ollama"].total_requests, 1);
        assert_eq!(summary["ollama"].avg_latency_ms, 250);
        assert_eq!(summary["ollama"].total_tokens, 42);

        scorer.reset();
        assert_eq!(scorer.summary()["ollama"].total_requests, 0);
    }
}
