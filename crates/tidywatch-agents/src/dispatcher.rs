//! AIService: one bounded loop over a pre-generated failover sequence.
//!
//! ```text
//! primary (requested or best available)
//!   │ fail
//!   ▼
//! FailoverEngine::sequence(primary) ──▶ step 1 ──▶ step 2 ──▶ … (≤ max_retries_before_switch calls)
//!                                          │ unavailable: skipped, budget untouched
//!                                          │ success: stop
//!                                          ▼
//!                             ExhaustedFailover { causes (attempt order) }
//! ```
//!
//! Every real call is recorded in the registry (breaker, score, usage)
//! before the loop moves on. A panicking plugin counts as a failed call. The registry lock is never held across a call.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use coordination::{FailoverEngine, Locality, SharedProviderRegistry};
use futures::FutureExt;
use tracing::{debug, info, warn};

use crate::errors::{panic_message, DispatchError, ProviderError};
use crate::provider::{Provider, ProviderRequest, ProviderResponse, ProviderSet};

/// One real provider call.
#[derive(Debug, Clone, PartialEq)]
pub struct AttemptRecord {
    pub provider: String,
    pub model: String,
    pub success: bool,
    pub latency: Duration,
    pub error: Option<String>,
}

/// Successful dispatch.
#[derive(Debug, Clone)]
pub struct DispatchOutcome {
    pub response: ProviderResponse,
    pub provider: String,
    pub model: String,
    /// True when the answer came from a failover step.
    pub fallback_used: bool,
    /// Real calls made, in order, including the successful one.
    pub attempts: Vec<AttemptRecord>,
}

pub struct AIService {
    providers: ProviderSet,
    failover: FailoverEngine,
    request_timeout: Duration,
}

impl AIService {
    pub fn new(providers: ProviderSet, failover: FailoverEngine, request_timeout: Duration) -> Self {
        Self {
            providers,
            failover,
            request_timeout,
        }
    }

    pub fn registry(&self) -> &SharedProviderRegistry {
        self.failover.registry()
    }

    pub fn failover(&self) -> &FailoverEngine {
        &self.failover
    }

    pub fn providers(&self) -> &ProviderSet {
        &self.providers
    }

    /// Pick the starting `(provider, model)`.
    fn origin(
        &self,
        request: &ProviderRequest,
        provider: Option<&str>,
        model: Option<&str>,
    ) -> Result<(String, String), DispatchError> {
        let catalog = self.registry().catalog();
        match provider {
            Some(id) => {
                let spec = catalog
                    .get(id)
                    .ok_or_else(|| DispatchError::Configuration(format!("unknown provider '{id}'")))?;
                let model = model.unwrap_or(&spec.default_model);
                if !spec.supports_model(model) {
                    return Err(DispatchError::Configuration(format!(
                        "provider '{id}' does not offer model '{model}'"
                    )));
                }
                Ok((id.to_string(), model.to_string()))
            }
            None => {
                if let Some(primary) = self.failover.primary(request.locality) {
                    return Ok(primary);
                }
                // Nothing available: start from the preferred eligible provider
                // so the sequence still gets built.
                catalog
                    .by_priority()
                    .iter()
                    .find(|s| request.locality == Locality::Any || s.local)
                    .map(|s| (s.id.clone(), s.default_model.clone()))
                    .ok_or_else(|| {
                        DispatchError::Configuration("no provider is eligible for this request".into())
                    })
            }
        }
    }

    /// Resolve a candidate, or explain why it must be skipped.
    fn candidate(
        &self,
        provider: &str,
        model: &str,
        request: &ProviderRequest,
    ) -> Result<&Arc<dyn Provider>, DispatchError> {
        let registry = self.registry();
        let Some(spec) = registry.spec(provider) else {
            return Err(DispatchError::unavailable(provider, "not configured"));
        };
        if !spec.supports_model(model) {
            return Err(DispatchError::unavailable(provider, format!("model '{model}' not offered")));
        }
        if request.locality == Locality::LocalOnly && !spec.local {
            return Err(DispatchError::unavailable(provider, "not local-capable"));
        }
        if !registry.is_available_at(provider, Utc::now()) {
            let state = registry
                .get_state(provider)
                .map(|s| s.state.to_string())
                .unwrap_or_else(|| "unknown".into());
            return Err(DispatchError::unavailable(provider, state));
        }
        let Some(plugin) = self.providers.get(provider) else {
            return Err(DispatchError::unavailable(provider, "no plugin registered"));
        };
        let declared = plugin.capabilities();
        if let Some(missing) = request
            .required_capabilities()
            .into_iter()
            .find(|c| !declared.contains(c))
        {
            return Err(DispatchError::unavailable(provider, format!("missing capability {missing}")));
        }
        Ok(plugin)
    }

    /// One bounded call; the outcome is recorded before returning.
    async fn attempt(
        &self,
        plugin: &Arc<dyn Provider>,
        provider: &str,
        model: &str,
        request: &ProviderRequest,
        log: &mut Vec<AttemptRecord>,
    ) -> Result<ProviderResponse, DispatchError> {
        let started = Instant::now();
        let call = AssertUnwindSafe(plugin.analyze(model, request)).catch_unwind();
        let outcome = match tokio::time::timeout(self.request_timeout, call).await {
            Ok(Ok(result)) => Ok(result),
            Ok(Err(payload)) => Ok(Err(ProviderError::Panicked(panic_message(payload.as_ref())))),
            Err(elapsed) => Err(elapsed),
        };
        let latency = started.elapsed();

        let result = match outcome {
            Ok(Ok(response)) => {
                self.registry().record_attempt(provider, latency, true);
                Ok(response)
            }
            Ok(Err(source)) => {
                if source.retry_category().counts_against_provider() {
                    self.registry().record_attempt(provider, latency, false);
                }
                Err(DispatchError::Transport {
                    provider: provider.to_string(),
                    model: model.to_string(),
                    source,
                })
            }
            Err(_) => {
                self.registry().record_attempt(provider, latency, false);
                Err(DispatchError::Timeout {
                    provider: provider.to_string(),
                    model: model.to_string(),
                    timeout_ms: self.request_timeout.as_millis() as u64,
                })
            }
        };

        match &result {
            Ok(_) => debug!(provider, model, latency_ms = latency.as_millis() as u64, "provider call succeeded"),
            Err(e) => warn!(provider, model, latency_ms = latency.as_millis() as u64, error = %e, "provider call failed"),
        }
        log.push(AttemptRecord {
            provider: provider.to_string(),
            model: model.to_string(),
            success: result.is_ok(),
            latency,
            error: result.as_ref().err().map(ToString::to_string),
        });
        result
    }

    /// Analyze with failover.
    ///
    /// Starts at `provider`/`model` when given (model defaults to the
    /// provider's default), otherwise at the best available provider.
    pub async fn generate(
        &self,
        request: &ProviderRequest,
        provider: Option<&str>,
        model: Option<&str>,
    ) -> Result<DispatchOutcome, DispatchError> {
        let (origin_provider, origin_model) = self.origin(request, provider, model)?;
        let mut causes = Vec::new();
        let mut attempts = Vec::new();

        match self.candidate(&origin_provider, &origin_model, request) {
            Ok(plugin) => match self
                .attempt(plugin, &origin_provider, &origin_model, request, &mut attempts)
                .await
            {
                Ok(response) => {
                    return Ok(DispatchOutcome {
                        response,
                        provider: origin_provider,
                        model: origin_model,
                        fallback_used: false,
                        attempts,
                    })
                }
                Err(e) => causes.push(e),
            },
            Err(skip) => {
                debug!(provider = %origin_provider, reason = %skip, "primary skipped");
                causes.push(skip);
            }
        }

        let budget = self.failover.rules().max_retries_before_switch;
        let mut calls = 0u32;
        let sequence = self
            .failover
            .sequence(&origin_provider, &origin_model, request.locality);

        for step in sequence {
            if calls >= budget {
                debug!(budget, "failover budget spent");
                break;
            }
            let plugin = match self.candidate(&step.provider, &step.model, request) {
                Ok(plugin) => plugin,
                Err(skip) => {
                    debug!(provider = %step.provider, reason = %skip, "failover candidate skipped");
                    causes.push(skip);
                    continue;
                }
            };
            calls += 1;
            match self
                .attempt(plugin, &step.provider, &step.model, request, &mut attempts)
                .await
            {
                Ok(response) => {
                    info!(
                        from = %origin_provider,
                        to = %step.provider,
                        model = %step.model,
                        reason = %step.reason,
                        "failover succeeded"
                    );
                    return Ok(DispatchOutcome {
                        response,
                        provider: step.provider,
                        model: step.model,
                        fallback_used: true,
                        attempts,
                    });
                }
                Err(e) => causes.push(e),
            }
        }

        warn!(origin = %origin_provider, causes = causes.len(), "failover exhausted");
        Err(DispatchError::ExhaustedFailover { causes })
    }

    /// Exactly one attempt against `provider`/`model`, no failover.
    pub async fn generate_pinned(
        &self,
        request: &ProviderRequest,
        provider: &str,
        model: &str,
    ) -> Result<DispatchOutcome, DispatchError> {
        let plugin = self.candidate(provider, model, request)?;
        let mut attempts = Vec::new();
        let response = self.attempt(plugin, provider, model, request, &mut attempts).await?;
        Ok(DispatchOutcome {
            response,
            provider: provider.to_string(),
            model: model.to_string(),
            fallback_used: false,
            attempts,
        })
    }
}
