//! tidywatch coordination core
//!
//! Deterministic, synchronous building blocks for multi-provider image
//! analysis:
//!
//! - [`registry`]: per-provider circuit breakers, performance scores and usage
//! - [`scoring`]: weighted performance scoring with freshness decay
//! - [`failover`]: ordered alternate (provider, model) sequences
//! - [`privacy`]: privacy tiers and payload sanitization
//! - [`analysis`]: task model and provider reply parsing
//! - [`validation`]: Check-phase thresholds
//! - [`config`]: the TOML engine configuration
//!
//! Nothing here performs network I/O; the async runtime lives in
//! `tidywatch-agents`.
//!
//! # Usage
//!
//! ```rust,ignore
//! let config = EngineConfig::from_file(Path::new("tidywatch.toml"))?;
//! let registry = ProviderRegistry::new(
//!     config.catalog(),
//!     config.circuit_breaker.clone(),
//!     config.scoring.clone(),
//! )
//! .shared();
//! let failover = FailoverEngine::new(config.failover.clone(), config.compatibility.clone(), registry);
//! ```

#![allow(clippy::uninlined_format_args)]

pub mod analysis;
pub mod config;
pub mod error;
pub mod failover;
pub mod privacy;
pub mod provider;
pub mod registry;
pub mod scoring;
pub mod validation;

pub use analysis::{
    parse_task_reply, AnalysisResult, BoundingBox, ProcessingSummary, ReplyParseError, Task,
    TaskReply,
};
pub use config::{
    DispatchConfig, EngineConfig, HealthConfig, PdcaConfig, QueueConfig, UsageConfig,
};
pub use error::{ConfigError, ConfigResult};
pub use failover::{
    CompatibilityMap, FailoverEngine, FailoverReason, FailoverRules, FailoverStep, Locality,
};
pub use privacy::{
    DetectedObject, LocalNetworkPolicy, ObjectKind, PrivacyConfig, PrivacyError, PrivacyLevel,
    PrivacyProcessor, SanitizationResult,
};
pub use provider::{Capability, CapabilitySet, ProviderCatalog, ProviderKind, ProviderSpec};
pub use registry::{
    CircuitBreakerConfig, CircuitBreakerState, HealthState, JsonFileUsageRepository,
    MemoryUsageRepository, ProviderRegistry, ProviderStatus, SharedProviderRegistry,
    UsageCounters, UsageRepository, UsageSnapshot, UsageStoreError,
};
pub use scoring::{PerformanceScore, PerformanceScorer, ScoringConfig, ScoringWeights};
pub use validation::{validate_result, CheckThresholds, ValidationIssue, ValidationReport};
