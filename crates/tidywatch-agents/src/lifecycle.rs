//! Uniform reload/shutdown interface for long-lived components.

use std::time::Duration;

use async_trait::async_trait;
use coordination::{SharedProviderRegistry, UsageStoreError};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error("usage store: {0}")]
    Usage(#[from] UsageStoreError),

    #[error("{component}: {message}")]
    Component { component: &'static str, message: String },
}

#[async_trait]
pub trait Lifecycle: Send + Sync {
    fn name(&self) -> &'static str;

    /// Re-read persisted or configured state.
    async fn reload(&self) -> Result<(), LifecycleError>;

    /// Flush and stop.
    async fn shutdown(&self) -> Result<(), LifecycleError>;
}

/// Keeps registry usage counters in step with their repository.
pub struct UsagePersister {
    registry: SharedProviderRegistry,
}

impl UsagePersister {
    pub fn new(registry: SharedProviderRegistry) -> Self {
        Self { registry }
    }

    /// Persist on `interval` until cancelled.
    pub async fn run(&self, interval: Duration, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(interval);
        // The first tick fires immediately; nothing to save yet.
        ticker.tick().await;
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    if let Err(e) = self.persist().await {
                        warn!(error = %e, "periodic usage persist failed");
                    }
                }
            }
        }
        debug!("usage persister stopping");
    }

    async fn persist(&self) -> Result<bool, UsageStoreError> {
        let registry = self.registry.clone();
        // Repository I/O is blocking; keep it off the async workers.
        tokio::task::spawn_blocking(move || registry.persist_usage())
            .await
            .unwrap_or_else(|e| {
                warn!(error = %e, "usage persist task failed");
                Ok(false)
            })
    }
}

#[async_trait]
impl Lifecycle for UsagePersister {
    fn name(&self) -> &'static str {
        "usage_persister"
    }

    async fn reload(&self) -> Result<(), LifecycleError> {
        let restored = self.registry.load_usage()?;
        info!(restored, "usage counters reloaded");
        Ok(())
    }

    async fn shutdown(&self) -> Result<(), LifecycleError> {
        if self.persist().await? {
            info!("usage counters saved");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use coordination::{
        CircuitBreakerConfig, MemoryUsageRepository, ProviderCatalog, ProviderRegistry, ProviderSpec,
        ScoringConfig, UsageRepository,
    };
    use std::sync::Arc;

    fn registry(repo: Arc<dyn UsageRepository>) -> SharedProviderRegistry {
        ProviderRegistry::new(
            ProviderCatalog::new(vec![ProviderSpec::new("a", 1, &["m"])]),
            CircuitBreakerConfig::default(),
            ScoringConfig::default(),
        )
        .with_usage_repository(repo)
        .shared()
    }

    #[tokio::test]
    async fn shutdown_saves_and_reload_restores() {
        let repo: Arc<dyn UsageRepository> = Arc::new(MemoryUsageRepository::new());
        let first = registry(repo.clone());
        first.record_attempt("a", Duration::from_millis(3), true);
        UsagePersister::new(first).shutdown().await.unwrap();

        let second = registry(repo);
        let persister = UsagePersister::new(second.clone());
        persister.reload().await.unwrap();
        assert_eq!(second.usage_snapshot()["a"].requests, 1);
        assert_eq!(persister.name(), "usage_persister");
    }

    #[tokio::test]
    async fn run_stops_on_cancel() {
        let repo: Arc<dyn UsageRepository> = Arc::new(MemoryUsageRepository::new());
        let persister = UsagePersister::new(registry(repo));
        let cancel = CancellationToken::new();
        cancel.cancel();
        persister.run(Duration::from_secs(60), cancel).await;
    }
}
