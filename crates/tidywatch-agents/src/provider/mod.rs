//! Provider plugin interface
//!
//! Every upstream AI backend is one [`Provider`] implementation. Plugins
//! declare their [`CapabilitySet`] up front; the dispatcher never calls a
//! provider for a request it cannot serve.

pub mod openai_compat;

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use coordination::{Capability, CapabilitySet, ConfigError, Locality, ProviderCatalog, ProviderKind};
use serde_json::{Map, Value};
use tracing::warn;

use crate::errors::ProviderError;

pub use openai_compat::OpenAiCompatProvider;

/// What a caller wants analyzed; the dispatcher picks provider and model.
#[derive(Debug, Clone, Default)]
pub struct ProviderRequest {
    pub system: Option<String>,
    pub prompt: String,
    /// Image bytes, already through the privacy processor.
    pub image: Option<Vec<u8>>,
    /// Metadata summary for metadata-only jobs.
    pub metadata: Option<Map<String, Value>>,
    pub locality: Locality,
    pub max_tokens: Option<u32>,
}

impl ProviderRequest {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            ..Self::default()
        }
    }

    pub fn with_system(mut self, system: impl Into<String>) -> Self {
        self.system = Some(system.into());
        self
    }

    pub fn with_image(mut self, image: Vec<u8>) -> Self {
        self.image = Some(image);
        self
    }

    pub fn with_metadata(mut self, metadata: Map<String, Value>) -> Self {
        self.metadata = Some(metadata);
        self
    }

    pub fn with_locality(mut self, locality: Locality) -> Self {
        self.locality = locality;
        self
    }

    /// Capabilities a provider must declare to serve this request.
    pub fn required_capabilities(&self) -> CapabilitySet {
        let mut required = CapabilitySet::new();
        if self.image.is_some() {
            required.insert(Capability::Vision);
        }
        if self.image.is_none() && self.metadata.is_some() {
            required.insert(Capability::MetadataInput);
        }
        if self.locality == Locality::LocalOnly {
            required.insert(Capability::LocalInference);
        }
        required
    }
}

/// Raw provider reply.
#[derive(Debug, Clone, PartialEq)]
pub struct ProviderResponse {
    pub text: String,
    pub model: String,
    pub tokens_used: Option<u64>,
}

#[async_trait]
pub trait Provider: Send + Sync {
    /// Identifier matching the provider's configuration entry.
    fn id(&self) -> &str;

    fn capabilities(&self) -> CapabilitySet;

    /// Run one analysis against `model`.
    async fn analyze(&self, model: &str, request: &ProviderRequest) -> Result<ProviderResponse, ProviderError>;

    /// Cheap liveness probe.
    async fn health_check(&self) -> Result<(), ProviderError>;
}

/// Registered provider plugins, keyed by id.
#[derive(Clone, Default)]
pub struct ProviderSet {
    providers: BTreeMap<String, Arc<dyn Provider>>,
}

impl ProviderSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, provider: Arc<dyn Provider>) {
        self.providers.insert(provider.id().to_string(), provider);
    }

    pub fn with(mut self, provider: Arc<dyn Provider>) -> Self {
        self.register(provider);
        self
    }

    pub fn get(&self, id: &str) -> Option<&Arc<dyn Provider>> {
        self.providers.get(id)
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.providers.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.providers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }

    /// Build one plugin per catalog entry.
    pub fn from_catalog(catalog: &ProviderCatalog, client: reqwest::Client) -> Result<Self, ConfigError> {
        let mut set = Self::new();
        for spec in catalog.by_priority() {
            let provider: Arc<dyn Provider> = match spec.kind {
                ProviderKind::OpenaiCompatible => Arc::new(OpenAiCompatProvider::from_spec(spec, client.clone())?),
            };
            set.register(provider);
        }
        Ok(set)
    }

    /// Compare declared plugin capabilities with configuration.
    ///
    /// Returns one message per mismatch; a plugin claiming less than its
    /// configuration is a misconfiguration worth surfacing at startup.
    pub fn capability_mismatches(&self, catalog: &ProviderCatalog) -> Vec<String> {
        let mut problems = Vec::new();
        for spec in catalog.by_priority() {
            let Some(provider) = self.get(&spec.id) else {
                problems.push(format!("provider '{}' has no plugin registered", spec.id));
                continue;
            };
            let declared = provider.capabilities();
            for missing in spec.capabilities.difference(&declared) {
                problems.push(format!(
                    "provider '{}' is configured with '{missing}' but its plugin does not declare it",
                    spec.id
                ));
            }
        }
        for problem in &problems {
            warn!(problem = %problem, "provider capability mismatch");
        }
        problems
    }
}
