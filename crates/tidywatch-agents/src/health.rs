//! Concurrent provider health probing.
//!
//! All probes run at once (`join_all`), each under its own timeout and
//! panic guard, so one hung or crashing plugin cannot delay or sink the
//! others. Results feed the circuit breakers.

use std::panic::AssertUnwindSafe;
use std::time::{Duration, Instant};

use coordination::SharedProviderRegistry;
use futures::future::join_all;
use futures::FutureExt;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::errors::{panic_message, ProviderError};
use crate::provider::ProviderSet;

#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub provider: String,
    pub healthy: bool,
    /// Not probed (remote probing suppressed by privacy policy).
    pub skipped: bool,
    pub latency_ms: u64,
    pub error: Option<String>,
}

pub struct HealthMonitor {
    providers: ProviderSet,
    registry: SharedProviderRegistry,
    timeout: Duration,
    remote_checks: bool,
}

impl HealthMonitor {
    pub fn new(providers: ProviderSet, registry: SharedProviderRegistry, timeout: Duration) -> Self {
        Self {
            providers,
            registry,
            timeout,
            remote_checks: true,
        }
    }

    /// Allow or suppress probes to non-local providers.
    pub fn with_remote_checks(mut self, allowed: bool) -> Self {
        self.remote_checks = allowed;
        self
    }

    /// Probe every configured provider once.
    pub async fn check_all(&self) -> Vec<HealthReport> {
        let catalog = self.registry.catalog();
        let probes = catalog.by_priority().iter().map(|spec| async move {
            let id = spec.id.clone();
            if !self.remote_checks && !spec.local {
                debug!(provider = %id, "remote health check suppressed");
                return HealthReport {
                    provider: id,
                    healthy: false,
                    skipped: true,
                    latency_ms: 0,
                    error: None,
                };
            }
            let Some(plugin) = self.providers.get(&id) else {
                return HealthReport {
                    provider: id,
                    healthy: false,
                    skipped: true,
                    latency_ms: 0,
                    error: Some("no plugin registered".into()),
                };
            };

            let started = Instant::now();
            let check = AssertUnwindSafe(plugin.health_check()).catch_unwind();
            let error = match tokio::time::timeout(self.timeout, check).await {
                Ok(Ok(Ok(()))) => None,
                Ok(Ok(Err(e))) => Some(e.to_string()),
                Ok(Err(payload)) => Some(ProviderError::Panicked(panic_message(payload.as_ref())).to_string()),
                Err(_) => Some(format!("timed out after {}ms", self.timeout.as_millis())),
            };
            let latency_ms = started.elapsed().as_millis() as u64;

            match &error {
                None => {
                    self.registry.record_success(&id);
                }
                Some(e) => {
                    warn!(provider = %id, error = %e, "health check failed");
                    self.registry
                        .record_failure(&id, self.registry.breaker_config().failure_threshold);
                }
            }
            HealthReport {
                provider: id,
                healthy: error.is_none(),
                skipped: false,
                latency_ms,
                error,
            }
        });

        let reports = join_all(probes).await;
        let healthy = reports.iter().filter(|r| r.healthy).count();
        info!(total = reports.len(), healthy, "health round complete");
        reports
    }

    /// Probe on `interval` until cancelled.
    pub async fn run(&self, interval: Duration, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    debug!("health monitor stopping");
                    return;
                }
                _ = ticker.tick() => {
                    self.check_all().await;
                }
            }
        }
    }
}
