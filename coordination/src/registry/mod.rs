//! Provider Registry: circuit breakers, performance scores and usage counters
//!
//! The registry is the single source of truth for provider health. It is an
//! explicitly constructed value, shared by `Arc`, guarded by one mutex whose
//! critical sections only touch in-memory state. Usage persistence snapshots
//! under the lock and performs repository I/O after releasing it.

pub mod circuit_breaker;
pub mod usage;

pub use circuit_breaker::{CircuitBreakerConfig, CircuitBreakerState, HealthState};
pub use usage::{
    JsonFileUsageRepository, MemoryUsageRepository, UsageCounters, UsageRepository,
    UsageSnapshot, UsageStoreError,
};

use crate::provider::{ProviderCatalog, ProviderSpec};
use crate::scoring::{PerformanceScore, PerformanceScorer, ScoringConfig};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Mutable per-provider record.
#[derive(Debug, Clone)]
struct ProviderRecord {
    breaker: CircuitBreakerState,
    score: PerformanceScore,
    usage: UsageCounters,
}

/// Point-in-time view of one provider, for alerting and dashboards.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderStatus {
    pub provider: String,
    pub priority: u32,
    pub local: bool,
    pub available: bool,
    pub breaker: CircuitBreakerState,
    pub score: PerformanceScore,
    /// Score after the freshness multiplier.
    pub effective_score: f64,
    pub usage: UsageCounters,
}

/// Shared reference to a ProviderRegistry
pub type SharedProviderRegistry = Arc<ProviderRegistry>;

/// Registry of all configured providers and their live health.
pub struct ProviderRegistry {
    catalog: ProviderCatalog,
    breaker_config: CircuitBreakerConfig,
    scorer: PerformanceScorer,
    records: Mutex<HashMap<String, ProviderRecord>>,
    usage_repository: Option<Arc<dyn UsageRepository>>,
}

impl ProviderRegistry {
    /// Create a registry with one healthy record per catalog entry.
    pub fn new(
        catalog: ProviderCatalog,
        breaker_config: CircuitBreakerConfig,
        scoring: ScoringConfig,
    ) -> Self {
        let now = Utc::now();
        let records = catalog
            .by_priority()
            .iter()
            .map(|spec| {
                (
                    spec.id.clone(),
                    ProviderRecord {
                        breaker: CircuitBreakerState::new(),
                        score: PerformanceScore::initial(spec.cost_efficiency, &scoring.weights, now),
                        usage: UsageCounters::default(),
                    },
                )
            })
            .collect();
        Self {
            catalog,
            breaker_config,
            scorer: PerformanceScorer::new(scoring),
            records: Mutex::new(records),
            usage_repository: None,
        }
    }

    /// Attach a repository for usage persistence.
    pub fn with_usage_repository(mut self, repository: Arc<dyn UsageRepository>) -> Self {
        self.usage_repository = Some(repository);
        self
    }

    /// Create a shared reference to this registry
    pub fn shared(self) -> SharedProviderRegistry {
        Arc::new(self)
    }

    pub fn catalog(&self) -> &ProviderCatalog {
        &self.catalog
    }

    pub fn spec(&self, provider: &str) -> Option<&ProviderSpec> {
        self.catalog.get(provider)
    }

    pub fn scorer(&self) -> &PerformanceScorer {
        &self.scorer
    }

    pub fn breaker_config(&self) -> &CircuitBreakerConfig {
        &self.breaker_config
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, ProviderRecord>> {
        // A panic elsewhere must not take provider routing down with it.
        self.records.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Current circuit state for `provider`.
    pub fn get_state(&self, provider: &str) -> Option<CircuitBreakerState> {
        self.lock().get(provider).map(|r| r.breaker.clone())
    }

    /// Record a success; resets the failure streak.
    pub fn record_success(&self, provider: &str) -> Option<HealthState> {
        let (before, after) = {
            let mut records = self.lock();
            let record = records.get_mut(provider)?;
            let before = record.breaker.state;
            record.breaker.record_success();
            (before, record.breaker.state)
        };
        if before != after {
            info!(provider, from = %before, to = %after, "provider recovered");
        }
        Some(after)
    }

    /// Record a failure against `threshold`.
    pub fn record_failure(&self, provider: &str, threshold: u32) -> Option<HealthState> {
        self.record_failure_at(provider, threshold, Utc::now())
    }

    pub fn record_failure_at(
        &self,
        provider: &str,
        threshold: u32,
        now: DateTime<Utc>,
    ) -> Option<HealthState> {
        let (before, breaker) = {
            let mut records = self.lock();
            let record = records.get_mut(provider)?;
            let before = record.breaker.state;
            record.breaker.record_failure(threshold, &self.breaker_config, now);
            (before, record.breaker.clone())
        };
        Self::log_failure(provider, before, &breaker);
        Some(breaker.state)
    }

    fn log_failure(provider: &str, before: HealthState, breaker: &CircuitBreakerState) {
        if before == breaker.state {
            debug!(provider, failures = breaker.failure_count, state = %breaker.state, "provider failure recorded");
            return;
        }
        match breaker.state {
            HealthState::CircuitOpen => warn!(
                provider,
                failures = breaker.failure_count,
                retry_at = ?breaker.next_retry_time,
                "circuit opened"
            ),
            state => info!(provider, failures = breaker.failure_count, from = %before, to = %state, "provider state changed"),
        }
    }

    /// Fold one completed attempt into breaker, score and usage.
    pub fn record_attempt(&self, provider: &str, latency: Duration, success: bool) -> Option<HealthState> {
        self.record_attempt_at(provider, latency, success, Utc::now())
    }

    pub fn record_attempt_at(
        &self,
        provider: &str,
        latency: Duration,
        success: bool,
        now: DateTime<Utc>,
    ) -> Option<HealthState> {
        let latency_ms = u64::try_from(latency.as_millis()).unwrap_or(u64::MAX);
        let (before, breaker) = {
            let mut records = self.lock();
            let record = records.get_mut(provider)?;
            let before = record.breaker.state;
            if success {
                record.breaker.record_success();
            } else {
                record.breaker.record_failure(
                    self.breaker_config.failure_threshold,
                    &self.breaker_config,
                    now,
                );
            }
            self.scorer.record(&mut record.score, latency_ms, success, now);
            record.usage.record(success, now);
            (before, record.breaker.clone())
        };
        if success {
            if before != breaker.state {
                info!(provider, from = %before, to = %breaker.state, "provider recovered");
            }
        } else {
            Self::log_failure(provider, before, &breaker);
        }
        Some(breaker.state)
    }

    pub fn is_available(&self, provider: &str) -> bool {
        self.is_available_at(provider, Utc::now())
    }

    /// Unknown providers are never available.
    pub fn is_available_at(&self, provider: &str, now: DateTime<Utc>) -> bool {
        self.lock()
            .get(provider)
            .map(|r| r.breaker.is_available_at(now))
            .unwrap_or(false)
    }

    /// Operator override: block the provider. Returns false if unknown.
    pub fn disable(&self, provider: &str) -> bool {
        let found = match self.lock().get_mut(provider) {
            Some(record) => {
                record.breaker.disable();
                true
            }
            None => false,
        };
        if found {
            warn!(provider, "provider disabled");
        }
        found
    }

    /// Lift an operator override. Returns false if unknown.
    pub fn enable(&self, provider: &str) -> bool {
        let found = match self.lock().get_mut(provider) {
            Some(record) => {
                record.breaker.enable();
                true
            }
            None => false,
        };
        if found {
            info!(provider, "provider enabled");
        }
        found
    }

    pub fn score(&self, provider: &str) -> Option<PerformanceScore> {
        self.lock().get(provider).map(|r| r.score.clone())
    }

    /// Available providers ranked by freshness-adjusted score (best first).
    ///
    /// Ties keep priority order.
    pub fn ranked_available_at(&self, now: DateTime<Utc>) -> Vec<(String, f64)> {
        let records = self.lock();
        let mut ranked: Vec<(String, f64)> = self
            .catalog
            .by_priority()
            .iter()
            .filter_map(|spec| {
                let record = records.get(&spec.id)?;
                record
                    .breaker
                    .is_available_at(now)
                    .then(|| (spec.id.clone(), self.scorer.effective_score(&record.score, now)))
            })
            .collect();
        drop(records);
        ranked.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        ranked
    }

    /// Snapshot of every provider, for alert polling.
    pub fn snapshot_all(&self) -> BTreeMap<String, ProviderStatus> {
        self.snapshot_all_at(Utc::now())
    }

    pub fn snapshot_all_at(&self, now: DateTime<Utc>) -> BTreeMap<String, ProviderStatus> {
        let records = self.lock();
        self.catalog
            .by_priority()
            .iter()
            .filter_map(|spec| {
                let record = records.get(&spec.id)?;
                Some((
                    spec.id.clone(),
                    ProviderStatus {
                        provider: spec.id.clone(),
                        priority: spec.priority,
                        local: spec.local,
                        available: record.breaker.is_available_at(now),
                        breaker: record.breaker.clone(),
                        score: record.score.clone(),
                        effective_score: self.scorer.effective_score(&record.score, now),
                        usage: record.usage.clone(),
                    },
                ))
            })
            .collect()
    }

    pub fn usage_snapshot(&self) -> UsageSnapshot {
        self.lock()
            .iter()
            .map(|(id, r)| (id.clone(), r.usage.clone()))
            .collect()
    }

    /// Save usage counters. Returns false when no repository is attached.
    pub fn persist_usage(&self) -> Result<bool, UsageStoreError> {
        let Some(repository) = &self.usage_repository else {
            return Ok(false);
        };
        let snapshot = self.usage_snapshot();
        repository.save(&snapshot)?;
        debug!(providers = snapshot.len(), "usage counters persisted");
        Ok(true)
    }

    /// Restore usage counters for known providers. Returns how many were restored.
    pub fn load_usage(&self) -> Result<usize, UsageStoreError> {
        let Some(repository) = &self.usage_repository else {
            return Ok(0);
        };
        let snapshot = repository.load()?;
        let mut restored = 0;
        {
            let mut records = self.lock();
            for (id, counters) in snapshot {
                if let Some(record) = records.get_mut(&id) {
                    record.usage = counters;
                    restored += 1;
                }
            }
        }
        debug!(restored, "usage counters loaded");
        Ok(restored)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;

    fn registry() -> ProviderRegistry {
        let catalog = ProviderCatalog::new(vec![
            ProviderSpec::new("a", 1, &["model-a"]),
            ProviderSpec::new("b", 2, &["model-b"]),
            ProviderSpec::new("local", 3, &["llava"]).local(),
        ]);
        ProviderRegistry::new(catalog, CircuitBreakerConfig::default(), ScoringConfig::default())
    }

    #[test]
    fn test_registry_populated() {
        let registry = registry();
        let snapshot = registry.snapshot_all();
        assert_eq!(snapshot.len(), 3);
        assert!(snapshot.values().all(|s| s.available));
        assert!(snapshot["local"].local);
        assert_eq!(registry.get_state("a").unwrap().state, HealthState::Healthy);
        assert!(registry.get_state("missing").is_none());
    }

    #[test]
    fn test_threshold_failures_block_until_retry_time() {
        let registry = registry();
        let now = Utc::now();
        for _ in 0..5 {
            registry.record_failure_at("a", 5, now);
        }
        assert!(!registry.is_available_at("a", now));
        let retry = registry.get_state("a").unwrap().next_retry_time.unwrap();
        assert!(!registry.is_available_at("a", retry - ChronoDuration::seconds(1)));
        assert!(registry.is_available_at("a", retry));
    }

    #[test]
    fn test_success_restores_healthy() {
        let registry = registry();
        let now = Utc::now();
        for _ in 0..6 {
            registry.record_failure_at("a", 5, now);
        }
        assert_eq!(registry.record_success("a"), Some(HealthState::Healthy));
        let state = registry.get_state("a").unwrap();
        assert_eq!(state.failure_count, 0);
        assert!(registry.is_available("a"));
    }

    #[test]
    fn test_record_attempt_updates_score_and_usage() {
        let registry = registry();
        registry.record_attempt("b", Duration::from_millis(250), true);
        let score = registry.score("b").unwrap();
        assert_eq!(score.success_rate, 100.0);
        assert_eq!(score.latency_ms, 250.0);
        let usage = registry.usage_snapshot();
        assert_eq!(usage["b"].requests, 1);
        assert_eq!(usage["b"].successes, 1);
    }

    #[test]
    fn test_record_attempt_failure_counts_toward_threshold() {
        let registry = registry();
        for _ in 0..5 {
            registry.record_attempt("a", Duration::from_millis(10), false);
        }
        assert_eq!(registry.get_state("a").unwrap().state, HealthState::CircuitOpen);
        assert!(!registry.is_available("a"));
    }

    #[test]
    fn test_disable_and_enable() {
        let registry = registry();
        assert!(registry.disable("b"));
        assert!(!registry.is_available("b"));
        assert!(registry.enable("b"));
        assert!(registry.is_available("b"));
        assert!(!registry.disable("nope"));
    }

    #[test]
    fn test_unknown_provider_is_unavailable() {
        let registry = registry();
        assert!(!registry.is_available("nope"));
        assert!(registry.record_failure("nope", 5).is_none());
    }

    #[test]
    fn test_ranked_available_skips_open_circuits() {
        let registry = registry();
        let now = Utc::now();
        for _ in 0..5 {
            registry.record_failure_at("a", 5, now);
        }
        let ranked = registry.ranked_available_at(now);
        assert!(ranked.iter().all(|(id, _)| id != "a"));
        assert_eq!(ranked.len(), 2);
    }

    #[test]
    fn test_ranked_prefers_better_score() {
        let registry = registry();
        registry.record_attempt("a", Duration::from_millis(900), false);
        registry.record_attempt("b", Duration::from_millis(100), true);
        let ranked = registry.ranked_available_at(Utc::now());
        let pos_a = ranked.iter().position(|(id, _)| id == "a").unwrap();
        let pos_b = ranked.iter().position(|(id, _)| id == "b").unwrap();
        assert!(pos_b < pos_a);
    }

    #[test]
    fn test_usage_round_trips_through_repository() {
        let repository: Arc<dyn UsageRepository> = Arc::new(MemoryUsageRepository::new());
        let first = registry().with_usage_repository(repository.clone());
        first.record_attempt("a", Duration::from_millis(5), true);
        assert!(first.persist_usage().unwrap());

        let second = registry().with_usage_repository(repository);
        assert_eq!(second.load_usage().unwrap(), 3);
        assert_eq!(second.usage_snapshot()["a"].successes, 1);
    }

    #[test]
    fn test_persist_without_repository_is_noop() {
        assert!(!registry().persist_usage().unwrap());
        assert_eq!(registry().load_usage().unwrap(), 0);
    }
}
