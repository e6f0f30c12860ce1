//! Wires configuration into a running engine.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use coordination::{
    EngineConfig, FailoverEngine, JsonFileUsageRepository, PrivacyProcessor, ProviderRegistry,
    SharedProviderRegistry,
};
use tracing::{info, warn};

use crate::config::RuntimeConfig;
use crate::dispatcher::AIService;
use crate::health::HealthMonitor;
use crate::lifecycle::{Lifecycle, UsagePersister};
use crate::pdca::PdcaOrchestrator;
use crate::provider::ProviderSet;
use crate::queue::AnalysisQueueManager;
use crate::sinks::{DirectoryCapture, MetricsSink, TaskSink};

/// How often usage counters are flushed while running.
pub const USAGE_PERSIST_INTERVAL: Duration = Duration::from_secs(60);

/// Every long-lived component of one engine instance.
pub struct Runtime {
    pub registry: SharedProviderRegistry,
    pub ai: Arc<AIService>,
    pub health: Arc<HealthMonitor>,
    pub orchestrator: Arc<PdcaOrchestrator>,
    pub queue: Arc<AnalysisQueueManager>,
    pub persister: Arc<UsagePersister>,
}

/// Registry with the configured usage repository, counters restored.
pub fn build_registry(engine: &EngineConfig) -> SharedProviderRegistry {
    let mut registry = ProviderRegistry::new(
        engine.catalog(),
        engine.circuit_breaker.clone(),
        engine.scoring.clone(),
    );
    if let Some(path) = &engine.usage.path {
        registry = registry.with_usage_repository(Arc::new(JsonFileUsageRepository::new(path)));
    }
    let registry = registry.shared();
    match registry.load_usage() {
        Ok(0) => {}
        Ok(restored) => info!(restored, "Restored provider usage counters"),
        Err(e) => warn!(error = %e, "Failed to load usage counters, starting from zero"),
    }
    registry
}

impl Runtime {
    /// Build against the configured HTTP providers.
    pub fn build(config: &RuntimeConfig, task_sink: Arc<dyn TaskSink>, metrics: Arc<dyn MetricsSink>) -> Result<Self> {
        let engine = &config.engine;
        let client = reqwest::Client::builder()
            .timeout(engine.dispatch.request_timeout())
            .build()
            .context("Failed to build HTTP client")?;
        let providers =
            ProviderSet::from_catalog(&engine.catalog(), client).context("Failed to build provider plugins")?;
        Self::with_providers(config, providers, task_sink, metrics)
    }

    /// Build against an explicit plugin set.
    pub fn with_providers(
        config: &RuntimeConfig,
        providers: ProviderSet,
        task_sink: Arc<dyn TaskSink>,
        metrics: Arc<dyn MetricsSink>,
    ) -> Result<Self> {
        let engine = &config.engine;
        let registry = build_registry(engine);
        let mismatches = providers.capability_mismatches(registry.catalog());
        if !mismatches.is_empty() {
            anyhow::bail!("Provider capability mismatch: {}", mismatches.join("; "));
        }

        let failover = FailoverEngine::new(
            engine.failover.clone(),
            engine.compatibility.clone(),
            registry.clone(),
        );
        let privacy = PrivacyProcessor::new(engine.privacy.clone());
        let health = HealthMonitor::new(providers.clone(), registry.clone(), engine.health.timeout())
            .with_remote_checks(privacy.remote_health_checks_allowed());
        let ai = Arc::new(AIService::new(providers, failover, engine.dispatch.request_timeout()));

        let orchestrator = Arc::new(
            PdcaOrchestrator::new(
                ai.clone(),
                privacy,
                engine.check.clone(),
                engine.pdca.history_limit,
                task_sink,
                metrics,
            )
            .with_capture(Arc::new(DirectoryCapture::new(&config.capture_dir))),
        );
        let queue = Arc::new(AnalysisQueueManager::new(engine.queue.clone(), orchestrator.clone()));
        let persister = Arc::new(UsagePersister::new(registry.clone()));

        Ok(Self {
            registry,
            ai,
            health: Arc::new(health),
            orchestrator,
            queue,
            persister,
        })
    }

    /// Components that take part in reload/shutdown, in shutdown order.
    pub fn lifecycle_components(&self) -> Vec<Arc<dyn Lifecycle>> {
        vec![
            self.queue.clone() as Arc<dyn Lifecycle>,
            self.persister.clone() as Arc<dyn Lifecycle>,
        ]
    }

    /// Shut every component down, logging failures.
    pub async fn shutdown(&self) {
        for component in self.lifecycle_components() {
            if let Err(e) = component.shutdown().await {
                warn!(component = component.name(), error = %e, "Shutdown failed");
            }
        }
    }
}
