//! Provider identity and declared capabilities
//!
//! A [`ProviderSpec`] is immutable configuration loaded once at startup. What a
//! provider can do is declared through [`Capability`] flags rather than probed
//! at runtime.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// Capabilities a provider plugin declares up front.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    /// Accepts image bytes alongside the prompt.
    Vision,
    /// Returns bounding boxes for tasks.
    Coordinates,
    /// Runs on this host; image content never leaves the device.
    LocalInference,
    /// Can work from an extracted metadata summary instead of pixels.
    MetadataInput,
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Vision => write!(f, "vision"),
            Self::Coordinates => write!(f, "coordinates"),
            Self::LocalInference => write!(f, "local_inference"),
            Self::MetadataInput => write!(f, "metadata_input"),
        }
    }
}

/// Ordered capability set (ordered so snapshots serialize deterministically).
pub type CapabilitySet = BTreeSet<Capability>;

/// Which plugin implementation serves a provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    /// OpenAI-compatible `/chat/completions` endpoint (Ollama, vLLM, llama.cpp, gateways).
    #[default]
    OpenaiCompatible,
}

fn default_cost_efficiency() -> f64 {
    50.0
}

/// Static configuration for one upstream AI provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderSpec {
    /// Unique provider identifier (e.g. `"ollama"`, `"openai"`).
    pub id: String,
    /// Priority rank; lower is preferred.
    pub priority: u32,
    /// Supported models in configuration order.
    pub models: Vec<String>,
    /// Model used when none is requested.
    pub default_model: String,
    /// Whether the provider is eligible for on-device-only jobs.
    #[serde(default)]
    pub local: bool,
    /// Cost efficiency on a 0-100 scale (100 = free).
    #[serde(default = "default_cost_efficiency")]
    pub cost_efficiency: f64,
    #[serde(default)]
    pub capabilities: CapabilitySet,
    #[serde(default)]
    pub kind: ProviderKind,
    /// Base URL of the provider endpoint.
    #[serde(default)]
    pub base_url: Option<String>,
    /// Name of the environment variable holding the API key.
    #[serde(default)]
    pub api_key_env: Option<String>,
}

impl ProviderSpec {
    /// Minimal spec used by tests and programmatic setups.
    pub fn new(id: &str, priority: u32, models: &[&str]) -> Self {
        Self {
            id: id.to_string(),
            priority,
            models: models.iter().map(|m| m.to_string()).collect(),
            default_model: models.first().map(|m| m.to_string()).unwrap_or_default(),
            local: false,
            cost_efficiency: default_cost_efficiency(),
            capabilities: CapabilitySet::from([Capability::Vision]),
            kind: ProviderKind::default(),
            base_url: None,
            api_key_env: None,
        }
    }

    /// Mark the provider as local-capable.
    pub fn local(mut self) -> Self {
        self.local = true;
        self.capabilities.insert(Capability::LocalInference);
        self
    }

    pub fn with_cost_efficiency(mut self, cost_efficiency: f64) -> Self {
        self.cost_efficiency = cost_efficiency;
        self
    }

    pub fn with_capability(mut self, capability: Capability) -> Self {
        self.capabilities.insert(capability);
        self
    }

    pub fn supports_model(&self, model: &str) -> bool {
        self.models.iter().any(|m| m == model)
    }

    pub fn has_capability(&self, capability: Capability) -> bool {
        self.capabilities.contains(&capability)
    }
}

/// Configured providers, kept sorted by priority rank.
#[derive(Debug, Clone, Default)]
pub struct ProviderCatalog {
    specs: Vec<ProviderSpec>,
}

impl ProviderCatalog {
    /// Build a catalog; ties in priority keep their configuration order.
    ///
    /// Local providers always declare [`Capability::LocalInference`].
    pub fn new(mut specs: Vec<ProviderSpec>) -> Self {
        for spec in specs.iter_mut().filter(|s| s.local) {
            spec.capabilities.insert(Capability::LocalInference);
        }
        specs.sort_by_key(|s| s.priority);
        Self { specs }
    }

    pub fn get(&self, id: &str) -> Option<&ProviderSpec> {
        self.specs.iter().find(|s| s.id == id)
    }

    /// All providers in priority order.
    pub fn by_priority(&self) -> &[ProviderSpec] {
        &self.specs
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.specs.iter().map(|s| s.id.as_str())
    }

    pub fn is_local(&self, id: &str) -> bool {
        self.get(id).map(|s| s.local).unwrap_or(false)
    }

    pub fn len(&self) -> usize {
        self.specs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.specs.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn catalog_sorts_by_priority() {
        let catalog = ProviderCatalog::new(vec![
            ProviderSpec::new("cloud", 2, &["gpt-4o"]),
            ProviderSpec::new("ollama", 1, &["llava:13b"]).local(),
        ]);
        let ids: Vec<&str> = catalog.ids().collect();
        assert_eq!(ids, vec!["ollama", "cloud"]);
        assert!(catalog.is_local("ollama"));
        assert!(!catalog.is_local("cloud"));
        assert!(!catalog.is_local("missing"));
    }

    #[test]
    fn catalog_marks_local_capability() {
        let mut spec = ProviderSpec::new("ollama", 1, &["llava:13b"]);
        spec.local = true;
        let catalog = ProviderCatalog::new(vec![spec]);
        assert!(catalog.get("ollama").unwrap().has_capability(Capability::LocalInference));
    }

    #[test]
    fn local_builder_declares_capability() {
        let spec = ProviderSpec::new("ollama", 1, &["llava:13b", "llava:7b"]).local();
        assert!(spec.has_capability(Capability::LocalInference));
        assert_eq!(spec.default_model, "llava:13b");
        assert!(spec.supports_model("llava:7b"));
        assert!(!spec.supports_model("gpt-4o"));
    }

    #[test]
    fn capability_serializes_snake_case() {
        let json = serde_json::to_string(&Capability::LocalInference).unwrap();
        assert_eq!(json, "\"local_inference\"");
    }
}
