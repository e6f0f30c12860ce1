//! Failover: deterministic alternate (provider, model) sequences
//!
//! Given a failed `(provider, model)` pair the engine produces an ordered,
//! duplicate-free list of alternates in three phases:
//!
//! ```text
//! 1. same_provider_fallback     other models of the failed provider (config order)
//! 2. compatible_model_fallback  compatible models on other providers (priority order)
//! 3. best_available_provider    top-scoring available providers not yet listed
//! ```
//!
//! The origin pair never appears. Under [`Locality::LocalOnly`] every phase is
//! restricted to local-capable providers.
//!
//! # Usage
//!
//! ```rust,ignore
//! let engine = FailoverEngine::new(rules, compatibility, registry.clone());
//! for step in engine.sequence("openai", "gpt-4o", Locality::Any) {
//!     // try step.provider / step.model
//! }
//! ```

use crate::registry::SharedProviderRegistry;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::fmt;

/// Model name → models that can stand in for it.
pub type CompatibilityMap = BTreeMap<String, Vec<String>>;

/// Why a step was added to the sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailoverReason {
    SameProviderFallback,
    CompatibleModelFallback,
    BestAvailableProvider,
}

impl fmt::Display for FailoverReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SameProviderFallback => write!(f, "same_provider_fallback"),
            Self::CompatibleModelFallback => write!(f, "compatible_model_fallback"),
            Self::BestAvailableProvider => write!(f, "best_available_provider"),
        }
    }
}

/// One alternate to try.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FailoverStep {
    pub provider: String,
    pub model: String,
    pub reason: FailoverReason,
}

impl FailoverStep {
    pub fn matches(&self, provider: &str, model: &str) -> bool {
        self.provider == provider && self.model == model
    }
}

/// Where a job's content may be processed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Locality {
    #[default]
    Any,
    /// Only local-capable providers may be used.
    LocalOnly,
}

/// Failover rules from configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FailoverRules {
    /// Try the failed provider's other models before switching provider.
    pub same_provider_first: bool,
    /// Alternate attempts the dispatcher makes after the primary fails.
    pub max_retries_before_switch: u32,
    /// Cap on best-available additions (phase 3).
    pub max_additional_candidates: usize,
}

impl Default for FailoverRules {
    fn default() -> Self {
        Self {
            same_provider_first: true,
            max_retries_before_switch: 3,
            max_additional_candidates: 3,
        }
    }
}

/// Accumulates steps while refusing duplicates and the origin pair.
struct SequenceBuilder {
    origin: (String, String),
    seen: HashSet<(String, String)>,
    steps: Vec<FailoverStep>,
}

impl SequenceBuilder {
    fn new(provider: &str, model: &str) -> Self {
        Self {
            origin: (provider.to_string(), model.to_string()),
            seen: HashSet::new(),
            steps: Vec::new(),
        }
    }

    fn push(&mut self, provider: &str, model: &str, reason: FailoverReason) {
        let key = (provider.to_string(), model.to_string());
        if key == self.origin || !self.seen.insert(key) {
            return;
        }
        self.steps.push(FailoverStep {
            provider: provider.to_string(),
            model: model.to_string(),
            reason,
        });
    }

    fn lists_provider(&self, provider: &str) -> bool {
        self.steps.iter().any(|s| s.provider == provider)
    }
}

/// Generates failover sequences from configuration plus live registry state.
#[derive(Clone)]
pub struct FailoverEngine {
    rules: FailoverRules,
    compatibility: CompatibilityMap,
    registry: SharedProviderRegistry,
}

impl FailoverEngine {
    pub fn new(
        rules: FailoverRules,
        compatibility: CompatibilityMap,
        registry: SharedProviderRegistry,
    ) -> Self {
        Self {
            rules,
            compatibility,
            registry,
        }
    }

    pub fn rules(&self) -> &FailoverRules {
        &self.rules
    }

    pub fn registry(&self) -> &SharedProviderRegistry {
        &self.registry
    }

    fn eligible(&self, provider: &str, locality: Locality) -> bool {
        match locality {
            Locality::Any => self.registry.spec(provider).is_some(),
            Locality::LocalOnly => self.registry.catalog().is_local(provider),
        }
    }

    /// First available provider (priority order) allowed under `locality`,
    /// paired with its default model.
    pub fn primary(&self, locality: Locality) -> Option<(String, String)> {
        self.primary_at(locality, Utc::now())
    }

    pub fn primary_at(&self, locality: Locality, now: DateTime<Utc>) -> Option<(String, String)> {
        self.registry
            .catalog()
            .by_priority()
            .iter()
            .filter(|spec| self.eligible(&spec.id, locality))
            .find(|spec| self.registry.is_available_at(&spec.id, now))
            .map(|spec| (spec.id.clone(), spec.default_model.clone()))
    }

    /// Alternates for a failed `(provider, model)`.
    pub fn sequence(&self, provider: &str, model: &str, locality: Locality) -> Vec<FailoverStep> {
        self.sequence_at(provider, model, locality, Utc::now())
    }

    pub fn sequence_at(
        &self,
        provider: &str,
        model: &str,
        locality: Locality,
        now: DateTime<Utc>,
    ) -> Vec<FailoverStep> {
        let catalog = self.registry.catalog();
        let mut builder = SequenceBuilder::new(provider, model);

        // Phase 1: same provider, other models.
        if self.rules.same_provider_first && self.eligible(provider, locality) {
            if let Some(spec) = catalog.get(provider) {
                for candidate in &spec.models {
                    builder.push(provider, candidate, FailoverReason::SameProviderFallback);
                }
            }
        }

        // Phase 2: compatible models on other providers.
        if let Some(compatible) = self.compatibility.get(model) {
            for compatible_model in compatible {
                for spec in catalog.by_priority() {
                    if spec.id == provider || !self.eligible(&spec.id, locality) {
                        continue;
                    }
                    if spec.supports_model(compatible_model) {
                        builder.push(&spec.id, compatible_model, FailoverReason::CompatibleModelFallback);
                    }
                }
            }
        }

        // Phase 3: best available providers not yet listed.
        let mut added = 0;
        for (candidate, score) in self.registry.ranked_available_at(now) {
            if added >= self.rules.max_additional_candidates {
                break;
            }
            if candidate == provider
                || builder.lists_provider(&candidate)
                || !self.eligible(&candidate, locality)
            {
                continue;
            }
            if let Some(spec) = catalog.get(&candidate) {
                tracing::trace!(provider = %candidate, score, "best-available candidate");
                builder.push(&spec.id, &spec.default_model, FailoverReason::BestAvailableProvider);
                added += 1;
            }
        }

        builder.steps
    }
}
