//! Per-provider circuit breaker.
//!
//! The breaker counts consecutive failures. Half the threshold marks the
//! provider *degraded* (still attemptable); the full threshold opens the
//! circuit until `next_retry_time`, with exponential backoff capped at
//! `max_timeout_secs`. Once the retry time passes the provider becomes
//! attemptable again (half-open) and the next outcome decides.
//!
//! ```text
//! Healthy ──(failures ≥ threshold/2)──▶ Degraded ──(failures ≥ threshold)──▶ CircuitOpen
//!    ▲                                                                          │
//!    └──────────────────────────── any success ◀───────────────────────────────┘
//!
//! Disabled: manual override, wins over every automatic transition
//! ```

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Hard ceiling on any cooldown (one week), whatever the config says.
pub const MAX_COOLDOWN_SECS: u64 = 7 * 24 * 3_600;

/// Health of a single provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthState {
    /// No recent trouble.
    Healthy,
    /// Failing intermittently, still attemptable.
    Degraded,
    /// Tripped; blocked until `next_retry_time`.
    CircuitOpen,
    /// Switched off by an operator.
    Disabled,
}

impl fmt::Display for HealthState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Healthy => write!(f, "healthy"),
            Self::Degraded => write!(f, "degraded"),
            Self::CircuitOpen => write!(f, "circuit_open"),
            Self::Disabled => write!(f, "disabled"),
        }
    }
}

/// Breaker tuning shared by every provider in a registry.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures before the circuit opens.
    pub failure_threshold: u32,
    /// Cooldown after the first trip, doubled for every further failure.
    pub base_timeout_secs: u64,
    /// Upper bound on the cooldown.
    pub max_timeout_secs: u64,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            base_timeout_secs: 60,
            max_timeout_secs: 3_600,
        }
    }
}

impl CircuitBreakerConfig {
    /// Cooldown for a circuit that has seen `failures` consecutive failures.
    pub fn backoff(&self, failures: u32, threshold: u32) -> Duration {
        let exponent = failures.saturating_sub(threshold);
        let factor = 1u64.checked_shl(exponent).unwrap_or(u64::MAX);
        let secs = self
            .base_timeout_secs
            .saturating_mul(factor)
            .min(self.max_timeout_secs);
        Duration::seconds(secs.min(MAX_COOLDOWN_SECS) as i64)
    }
}

/// Circuit state for one provider.
///
/// `next_retry_time` is `Some` only while `state == CircuitOpen`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CircuitBreakerState {
    pub failure_count: u32,
    pub state: HealthState,
    pub last_failure_time: Option<DateTime<Utc>>,
    pub next_retry_time: Option<DateTime<Utc>>,
}

impl Default for CircuitBreakerState {
    fn default() -> Self {
        Self::new()
    }
}

impl CircuitBreakerState {
    pub fn new() -> Self {
        Self {
            failure_count: 0,
            state: HealthState::Healthy,
            last_failure_time: None,
            next_retry_time: None,
        }
    }

    /// Record a success: the failure streak ends immediately.
    pub fn record_success(&mut self) {
        self.failure_count = 0;
        self.next_retry_time = None;
        if self.state != HealthState::Disabled {
            self.state = HealthState::Healthy;
        }
    }

    /// Record a failure and return the resulting state.
    pub fn record_failure(
        &mut self,
        threshold: u32,
        config: &CircuitBreakerConfig,
        now: DateTime<Utc>,
    ) -> HealthState {
        self.failure_count = self.failure_count.saturating_add(1);
        self.last_failure_time = Some(now);

        if self.state == HealthState::Disabled {
            return self.state;
        }

        let threshold = threshold.max(1);
        // Ceiling: "half the threshold" with an odd threshold rounds up.
        let degraded_at = threshold.div_ceil(2);

        if self.failure_count >= threshold {
            self.state = HealthState::CircuitOpen;
            self.next_retry_time = Some(now + config.backoff(self.failure_count, threshold));
        } else if self.failure_count >= degraded_at {
            self.state = HealthState::Degraded;
            self.next_retry_time = None;
        } else {
            self.state = HealthState::Healthy;
            self.next_retry_time = None;
        }
        self.state
    }

    /// Whether a request may be routed to this provider at `now`.
    pub fn is_available_at(&self, now: DateTime<Utc>) -> bool {
        match self.state {
            HealthState::Healthy | HealthState::Degraded => true,
            HealthState::Disabled => false,
            HealthState::CircuitOpen => self.next_retry_time.map(|t| now >= t).unwrap_or(true),
        }
    }

    /// Whether the circuit is open but past its retry time.
    pub fn is_half_open_at(&self, now: DateTime<Utc>) -> bool {
        self.state == HealthState::CircuitOpen && self.is_available_at(now)
    }

    /// Manual override: block all traffic.
    pub fn disable(&mut self) {
        self.state = HealthState::Disabled;
        self.next_retry_time = None;
    }

    /// Lift the manual override and start from a clean slate.
    pub fn enable(&mut self) {
        if self.state == HealthState::Disabled {
            self.state = HealthState::Healthy;
            self.failure_count = 0;
            self.next_retry_time = None;
        }
    }
}
