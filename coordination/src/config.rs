//! Engine configuration
//!
//! One TOML document configures the whole engine. Every section has defaults
//! except `[[providers]]`, which must list at least one provider.
//!
//! ```toml
//! [[providers]]
//! id = "ollama"
//! priority = 1
//! models = ["llava:13b", "llava:7b"]
//! default_model = "llava:13b"
//! local = true
//! base_url = "http://localhost:11434/v1"
//!
//! [compatibility]
//! "llava:13b" = ["llava:7b"]
//!
//! [privacy]
//! default_level = "sanitized"
//! zones = { bedroom = "local" }
//! ```

use crate::error::{ConfigError, ConfigResult};
use crate::failover::{CompatibilityMap, FailoverRules};
use crate::privacy::PrivacyConfig;
use crate::provider::{ProviderCatalog, ProviderSpec};
use crate::registry::circuit_breaker::MAX_COOLDOWN_SECS;
use crate::registry::CircuitBreakerConfig;
use crate::scoring::ScoringConfig;
use crate::validation::CheckThresholds;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Worker pool and retry settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    pub workers: usize,
    /// Concurrent in-flight analyses across all workers.
    pub max_concurrent: usize,
    pub max_attempts: u32,
    /// How long shutdown waits for in-flight jobs.
    pub shutdown_grace_secs: u64,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            workers: 2,
            max_concurrent: 2,
            max_attempts: 3,
            shutdown_grace_secs: 30,
        }
    }
}

impl QueueConfig {
    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }
}

/// Provider health probing.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthConfig {
    /// Per-probe timeout.
    pub timeout_secs: u64,
    /// Interval between probe rounds in watch mode.
    pub interval_secs: u64,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 10,
            interval_secs: 300,
        }
    }
}

impl HealthConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchConfig {
    /// Timeout for a single provider call.
    pub request_timeout_secs: u64,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            request_timeout_secs: 60,
        }
    }
}

impl DispatchConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PdcaConfig {
    /// Rolling performance-history entries kept.
    pub history_limit: usize,
}

impl Default for PdcaConfig {
    fn default() -> Self {
        Self { history_limit: 100 }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct UsageConfig {
    /// JSON file for usage counters; in-memory only when unset.
    pub path: Option<PathBuf>,
}

/// Top-level configuration document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    pub providers: Vec<ProviderSpec>,
    #[serde(default)]
    pub compatibility: CompatibilityMap,
    #[serde(default)]
    pub failover: FailoverRules,
    #[serde(default)]
    pub scoring: ScoringConfig,
    #[serde(default)]
    pub circuit_breaker: CircuitBreakerConfig,
    #[serde(default)]
    pub queue: QueueConfig,
    #[serde(default)]
    pub health: HealthConfig,
    #[serde(default)]
    pub dispatch: DispatchConfig,
    #[serde(default)]
    pub privacy: PrivacyConfig,
    #[serde(default)]
    pub check: CheckThresholds,
    #[serde(default)]
    pub pdca: PdcaConfig,
    #[serde(default)]
    pub usage: UsageConfig,
}

impl EngineConfig {
    /// Configuration with the given providers and every other section defaulted.
    pub fn with_providers(providers: Vec<ProviderSpec>) -> Self {
        Self {
            providers,
            compatibility: CompatibilityMap::new(),
            failover: FailoverRules::default(),
            scoring: ScoringConfig::default(),
            circuit_breaker: CircuitBreakerConfig::default(),
            queue: QueueConfig::default(),
            health: HealthConfig::default(),
            dispatch: DispatchConfig::default(),
            privacy: PrivacyConfig::default(),
            check: CheckThresholds::default(),
            pdca: PdcaConfig::default(),
            usage: UsageConfig::default(),
        }
    }

    /// Parse and validate a TOML document.
    pub fn from_toml_str(raw: &str) -> ConfigResult<Self> {
        let config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> ConfigResult<Self> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&raw)
    }

    pub fn catalog(&self) -> ProviderCatalog {
        ProviderCatalog::new(self.providers.clone())
    }

    /// Reject configurations the engine cannot run with.
    pub fn validate(&self) -> ConfigResult<()> {
        if self.providers.is_empty() {
            return Err(ConfigError::NoProviders);
        }

        let mut ids = HashSet::new();
        let mut known_models = HashSet::new();
        for spec in &self.providers {
            if spec.id.trim().is_empty() {
                return Err(ConfigError::invalid("provider id must not be empty"));
            }
            if !ids.insert(spec.id.as_str()) {
                return Err(ConfigError::DuplicateProvider(spec.id.clone()));
            }
            if spec.models.is_empty() {
                return Err(ConfigError::invalid(format!("provider '{}' lists no models", spec.id)));
            }
            if !spec.supports_model(&spec.default_model) {
                return Err(ConfigError::DefaultModelMissing {
                    provider: spec.id.clone(),
                    model: spec.default_model.clone(),
                });
            }
            if !(0.0..=100.0).contains(&spec.cost_efficiency) {
                return Err(ConfigError::invalid(format!(
                    "provider '{}' cost_efficiency must be within 0-100",
                    spec.id
                )));
            }
            known_models.extend(spec.models.iter().map(String::as_str));
        }

        for (model, alternates) in &self.compatibility {
            for name in std::iter::once(model).chain(alternates) {
                if !known_models.contains(name.as_str()) {
                    return Err(ConfigError::UnknownModel(name.clone()));
                }
            }
        }

        self.scoring.weights.validate().map_err(ConfigError::Invalid)?;
        if self.scoring.freshness_window_secs == 0 {
            return Err(ConfigError::invalid("scoring.freshness_window_secs must be positive"));
        }
        if !(0.0..=1.0).contains(&self.scoring.stale_floor) {
            return Err(ConfigError::invalid("scoring.stale_floor must be within [0, 1]"));
        }

        let cb = &self.circuit_breaker;
        if cb.failure_threshold == 0 {
            return Err(ConfigError::invalid("circuit_breaker.failure_threshold must be at least 1"));
        }
        if cb.base_timeout_secs == 0 || cb.max_timeout_secs < cb.base_timeout_secs {
            return Err(ConfigError::invalid(
                "circuit_breaker timeouts must satisfy 0 < base_timeout_secs <= max_timeout_secs",
            ));
        }
        if cb.max_timeout_secs > MAX_COOLDOWN_SECS {
            return Err(ConfigError::invalid(format!(
                "circuit_breaker.max_timeout_secs must not exceed {MAX_COOLDOWN_SECS}"
            )));
        }

        if self.queue.workers == 0 || self.queue.max_concurrent == 0 || self.queue.max_attempts == 0 {
            return Err(ConfigError::invalid(
                "queue.workers, queue.max_concurrent and queue.max_attempts must be positive",
            ));
        }
        if self.health.timeout_secs == 0 || self.health.interval_secs == 0 {
            return Err(ConfigError::invalid("health timings must be positive"));
        }
        if self.dispatch.request_timeout_secs == 0 {
            return Err(ConfigError::invalid("dispatch.request_timeout_secs must be positive"));
        }
        if self.pdca.history_limit == 0 {
            return Err(ConfigError::invalid("pdca.history_limit must be positive"));
        }
        self.check.validate().map_err(ConfigError::Invalid)?;
        self.privacy.validate().map_err(ConfigError::Invalid)?;
        Ok(())
    }
}
