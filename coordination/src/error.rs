//! Configuration error type
//!
//! Configuration problems are fatal at startup and never recovered at runtime.

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for configuration loading and validation
pub type ConfigResult<T> = Result<T, ConfigError>;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("no providers configured")]
    NoProviders,

    #[error("duplicate provider id '{0}'")]
    DuplicateProvider(String),

    #[error("unknown provider '{0}'")]
    UnknownProvider(String),

    #[error("provider '{provider}' default model '{model}' is not in its model list")]
    DefaultModelMissing { provider: String, model: String },

    #[error("compatibility map references unknown model '{0}'")]
    UnknownModel(String),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

impl ConfigError {
    pub fn invalid(message: impl Into<String>) -> Self {
        Self::Invalid(message.into())
    }
}
