//! Runtime error taxonomy with retry classification.
//!
//! Callers ask `retry_category()` instead of matching on strings.
//!
//! | Category         | Retriable | Counts against provider |
//! |------------------|-----------|-------------------------|
//! | Transient        | yes       | yes                     |
//! | RateLimit        | yes       | yes                     |
//! | Timeout          | yes       | yes                     |
//! | InvalidResponse  | yes       | yes                     |
//! | Unavailable      | yes       | no                      |
//! | Configuration    | no        | no                      |
//! | Exhausted        | no        | no                      |

use std::any::Any;
use std::fmt;

use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryCategory {
    /// Network or backend error; the next candidate may succeed.
    Transient,
    /// Provider throttled the request.
    RateLimit,
    /// Per-request timeout elapsed.
    Timeout,
    /// Provider answered with something unusable.
    InvalidResponse,
    /// Candidate was skipped without being called.
    Unavailable,
    /// Misconfiguration; retrying cannot help.
    Configuration,
    /// Every candidate has been tried.
    Exhausted,
}

impl RetryCategory {
    pub fn is_retriable(self) -> bool {
        matches!(
            self,
            Self::Transient | Self::RateLimit | Self::Timeout | Self::InvalidResponse | Self::Unavailable
        )
    }

    /// Whether the failure is charged to the provider's circuit breaker.
    pub fn counts_against_provider(self) -> bool {
        matches!(
            self,
            Self::Transient | Self::RateLimit | Self::Timeout | Self::InvalidResponse
        )
    }
}

impl fmt::Display for RetryCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Transient => write!(f, "transient"),
            Self::RateLimit => write!(f, "rate_limit"),
            Self::Timeout => write!(f, "timeout"),
            Self::InvalidResponse => write!(f, "invalid_response"),
            Self::Unavailable => write!(f, "unavailable"),
            Self::Configuration => write!(f, "configuration"),
            Self::Exhausted => write!(f, "exhausted"),
        }
    }
}

/// Errors raised by provider plugins.
#[derive(Debug, Clone, Error)]
pub enum ProviderError {
    #[error("transport error: {0}")]
    Transport(String),

    #[error("rate limited (retry after {retry_after_secs:?}s)")]
    RateLimited { retry_after_secs: Option<u64> },

    #[error("HTTP {status}: {body}")]
    Http { status: u16, body: String },

    #[error("invalid response: {0}")]
    InvalidResponse(String),

    /// The request needs something the plugin cannot do.
    #[error("unsupported request: {0}")]
    Unsupported(String),

    /// The plugin panicked mid-call.
    #[error("plugin panicked: {0}")]
    Panicked(String),
}

impl ProviderError {
    pub fn retry_category(&self) -> RetryCategory {
        match self {
            Self::Transport(_) => RetryCategory::Transient,
            Self::RateLimited { .. } => RetryCategory::RateLimit,
            Self::Http { status, .. } if *status == 429 => RetryCategory::RateLimit,
            Self::Http { status, .. } if (400..500).contains(status) && *status != 408 => {
                RetryCategory::InvalidResponse
            }
            Self::Http { .. } => RetryCategory::Transient,
            Self::InvalidResponse(_) => RetryCategory::InvalidResponse,
            Self::Unsupported(_) => RetryCategory::Unavailable,
            Self::Panicked(_) => RetryCategory::Transient,
        }
    }
}

impl From<reqwest::Error> for ProviderError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            Self::InvalidResponse(e.to_string())
        } else {
            Self::Transport(e.to_string())
        }
    }
}

/// Text of a caught panic payload.
pub fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Errors from the dispatcher.
#[derive(Debug, Error)]
pub enum DispatchError {
    /// Candidate skipped before any call was made.
    #[error("provider {provider} unavailable: {reason}")]
    ProviderUnavailable { provider: String, reason: String },

    #[error("provider {provider} ({model}) failed: {source}")]
    Transport {
        provider: String,
        model: String,
        #[source]
        source: ProviderError,
    },

    #[error("provider {provider} ({model}) timed out after {timeout_ms}ms")]
    Timeout {
        provider: String,
        model: String,
        timeout_ms: u64,
    },

    /// Every candidate failed or was skipped; causes are in attempt order.
    #[error("all {} failover candidates failed", causes.len())]
    ExhaustedFailover { causes: Vec<DispatchError> },

    #[error("configuration error: {0}")]
    Configuration(String),
}

impl DispatchError {
    pub fn retry_category(&self) -> RetryCategory {
        match self {
            Self::ProviderUnavailable { .. } => RetryCategory::Unavailable,
            Self::Transport { source, .. } => source.retry_category(),
            Self::Timeout { .. } => RetryCategory::Timeout,
            Self::ExhaustedFailover { .. } => RetryCategory::Exhausted,
            Self::Configuration(_) => RetryCategory::Configuration,
        }
    }

    pub fn is_retriable(&self) -> bool {
        self.retry_category().is_retriable()
    }

    /// Provider the error is attributed to, if any.
    pub fn provider(&self) -> Option<&str> {
        match self {
            Self::ProviderUnavailable { provider, .. }
            | Self::Transport { provider, .. }
            | Self::Timeout { provider, .. } => Some(provider),
            _ => None,
        }
    }

    pub fn unavailable(provider: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::ProviderUnavailable {
            provider: provider.into(),
            reason: reason.into(),
        }
    }
}

/// Errors surfaced by queued jobs.
#[derive(Debug, Error)]
pub enum JobError {
    #[error("job {job_id} dropped after {attempts} attempts: {last_error}")]
    AttemptsExceeded {
        job_id: String,
        attempts: u32,
        last_error: String,
    },

    #[error("validation failed: {}", issues.join("; "))]
    ValidationFailed { issues: Vec<String> },

    #[error("execution failed: {0}")]
    Execution(String),

    #[error("job cancelled")]
    Cancelled,
}

impl From<DispatchError> for JobError {
    fn from(e: DispatchError) -> Self {
        Self::Execution(e.to_string())
    }
}
