//! Performance scoring for provider selection
//!
//! Raw latency, error, cost and success samples collapse into one weighted
//! score. Scores fade toward half their value over the freshness window so a
//! provider that looked great an hour ago cannot dominate selection forever.
//! The fade is applied on read and never stored.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Weights for the four score components; must sum to 1.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoringWeights {
    pub latency: f64,
    pub error: f64,
    pub cost: f64,
    pub success: f64,
}

impl Default for ScoringWeights {
    fn default() -> Self {
        Self {
            latency: 0.3,
            error: 0.4,
            cost: 0.2,
            success: 0.1,
        }
    }
}

impl ScoringWeights {
    pub fn sum(&self) -> f64 {
        self.latency + self.error + self.cost + self.success
    }

    /// Validate the weights; return an error string if invalid.
    pub fn validate(&self) -> Result<(), String> {
        let parts = [self.latency, self.error, self.cost, self.success];
        if parts.iter().any(|w| !w.is_finite() || *w < 0.0) {
            return Err(format!("scoring weights must be non-negative, got {self:?}"));
        }
        if (self.sum() - 1.0).abs() > 0.01 {
            return Err(format!("scoring weights must sum to 1, got {:.3}", self.sum()));
        }
        Ok(())
    }
}

/// Scorer tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoringConfig {
    pub weights: ScoringWeights,
    /// Seconds over which a score fades from full weight to `stale_floor`.
    pub freshness_window_secs: u64,
    /// Multiplier applied to fully stale scores.
    pub stale_floor: f64,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            weights: ScoringWeights::default(),
            freshness_window_secs: 3_600,
            stale_floor: 0.5,
        }
    }
}

/// Rolling performance figures for one provider.
///
/// Rates are percentages (0-100).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerformanceScore {
    /// Mean latency over completed attempts.
    pub latency_ms: f64,
    pub error_rate: f64,
    pub cost_efficiency: f64,
    pub success_rate: f64,
    /// Stored raw score; freshness is applied separately on read.
    pub weighted_score: f64,
    pub last_updated: DateTime<Utc>,
    pub attempts: u64,
    pub successes: u64,
}

impl PerformanceScore {
    /// Optimistic starting point for a provider with no history.
    pub fn initial(cost_efficiency: f64, weights: &ScoringWeights, now: DateTime<Utc>) -> Self {
        let mut score = Self {
            latency_ms: 0.0,
            error_rate: 0.0,
            cost_efficiency: cost_efficiency.clamp(0.0, 100.0),
            success_rate: 100.0,
            weighted_score: 0.0,
            last_updated: now,
            attempts: 0,
            successes: 0,
        };
        score.weighted_score = PerformanceScorer::weighted(&score, weights);
        score
    }
}

/// Converts samples into weighted scores.
#[derive(Debug, Clone, Default)]
pub struct PerformanceScorer {
    config: ScoringConfig,
}

impl PerformanceScorer {
    pub fn new(config: ScoringConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ScoringConfig {
        &self.config
    }

    /// The raw weighted formula, without freshness.
    pub fn weighted(score: &PerformanceScore, weights: &ScoringWeights) -> f64 {
        let latency_term = (100.0 - score.latency_ms / 10.0).max(0.0);
        latency_term * weights.latency
            + (100.0 - score.error_rate) * weights.error
            + score.cost_efficiency * weights.cost
            + score.success_rate * weights.success
    }

    /// Fold one completed attempt into `score`.
    pub fn record(&self, score: &mut PerformanceScore, latency_ms: u64, success: bool, now: DateTime<Utc>) {
        let previous = score.attempts as f64;
        score.attempts += 1;
        if success {
            score.successes += 1;
        }
        score.latency_ms = (score.latency_ms * previous + latency_ms as f64) / score.attempts as f64;
        score.success_rate = score.successes as f64 / score.attempts as f64 * 100.0;
        score.error_rate = 100.0 - score.success_rate;
        score.weighted_score = Self::weighted(score, &self.config.weights);
        score.last_updated = now;
    }

    /// Linear fade from 1.0 to `stale_floor` across the freshness window.
    pub fn freshness(&self, last_updated: DateTime<Utc>, now: DateTime<Utc>) -> f64 {
        let window = self.config.freshness_window_secs.max(1) as f64;
        let age = (now - last_updated).num_milliseconds().max(0) as f64 / 1_000.0;
        let progress = (age / window).min(1.0);
        1.0 - (1.0 - self.config.stale_floor) * progress
    }

    /// Score used for ranking at `now`.
    pub fn effective_score(&self, score: &PerformanceScore, now: DateTime<Utc>) -> f64 {
        score.weighted_score * self.freshness(score.last_updated, now)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_default_weights_validate() {
        ScoringWeights::default()
            .validate()
            .expect("default weights should be valid");
    }

    #[test]
    fn test_weights_must_sum_to_one() {
        let weights = ScoringWeights {
            latency: 0.5,
            error: 0.5,
            cost: 0.5,
            success: 0.0,
        };
        assert!(weights.validate().is_err());
    }

    #[test]
    fn test_formula_matches_components() {
        let now = Utc::now();
        let score = PerformanceScore {
            latency_ms: 200.0,
            error_rate: 10.0,
            cost_efficiency: 50.0,
            success_rate: 90.0,
            weighted_score: 0.0,
            last_updated: now,
            attempts: 10,
            successes: 9,
        };
        // (100 - 20)*0.3 + 90*0.4 + 50*0.2 + 90*0.1 = 24 + 36 + 10 + 9
        let value = PerformanceScorer::weighted(&score, &ScoringWeights::default());
        assert!((value - 79.0).abs() < 1e-9);
    }

    #[test]
    fn test_latency_term_never_negative() {
        let now = Utc::now();
        let mut score = PerformanceScore::initial(0.0, &ScoringWeights::default(), now);
        score.latency_ms = 5_000.0;
        let value = PerformanceScorer::weighted(&score, &ScoringWeights::default());
        assert!((value - 50.0).abs() < 1e-9);
    }

    #[test]
    fn test_single_success_gives_full_success_rate() {
        let scorer = PerformanceScorer::default();
        let now = Utc::now();
        let mut score = PerformanceScore::initial(50.0, &ScoringWeights::default(), now);
        scorer.record(&mut score, 120, true, now);
        assert_eq!(score.success_rate, 100.0);
        assert_eq!(score.error_rate, 0.0);
        assert_eq!(score.latency_ms, 120.0);
    }

    #[test]
    fn test_rates_track_mixed_outcomes() {
        let scorer = PerformanceScorer::default();
        let now = Utc::now();
        let mut score = PerformanceScore::initial(50.0, &ScoringWeights::default(), now);
        scorer.record(&mut score, 100, true, now);
        scorer.record(&mut score, 300, false, now);
        assert_eq!(score.success_rate, 50.0);
        assert_eq!(score.error_rate, 50.0);
        assert_eq!(score.latency_ms, 200.0);
    }

    #[test]
    fn test_freshness_decays_linearly_to_floor() {
        let scorer = PerformanceScorer::default();
        let now = Utc::now();
        assert_eq!(scorer.freshness(now, now), 1.0);
        let half = scorer.freshness(now - Duration::minutes(30), now);
        assert!((half - 0.75).abs() < 1e-6);
        assert_eq!(scorer.freshness(now - Duration::hours(1), now), 0.5);
        assert_eq!(scorer.freshness(now - Duration::hours(9), now), 0.5);
    }

    #[test]
    fn test_effective_score_applies_freshness_on_read() {
        let scorer = PerformanceScorer::default();
        let now = Utc::now();
        let score = PerformanceScore::initial(50.0, &ScoringWeights::default(), now - Duration::hours(2));
        let stored = score.weighted_score;
        assert!((scorer.effective_score(&score, now) - stored * 0.5).abs() < 1e-9);
        assert_eq!(score.weighted_score, stored);
    }
}
