use anyhow::{Context, Result};
use coordination::{ConfigError, EngineConfig};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::telemetry::DEFAULT_METRICS_FILE;

/// Path of the TOML engine configuration.
pub const CONFIG_PATH_ENV: &str = "TIDYWATCH_CONFIG";
/// Worker task count.
pub const WORKERS_ENV: &str = "TIDYWATCH_WORKERS";
/// Concurrent in-flight analyses.
pub const MAX_CONCURRENT_ENV: &str = "TIDYWATCH_MAX_CONCURRENT";
/// Usage counter JSON file.
pub const USAGE_PATH_ENV: &str = "TIDYWATCH_USAGE_PATH";
/// Directory holding `<zone>.png` snapshots.
pub const CAPTURE_DIR_ENV: &str = "TIDYWATCH_CAPTURE_DIR";
/// Performance record JSONL file.
pub const METRICS_PATH_ENV: &str = "TIDYWATCH_METRICS_PATH";

pub const DEFAULT_CONFIG_FILE: &str = "tidywatch.toml";
pub const DEFAULT_CAPTURE_DIR: &str = "snapshots";

/// Source of the engine configuration.
pub trait ConfigurationProvider: Send + Sync {
    fn engine_config(&self) -> Result<EngineConfig, ConfigError>;

    /// Human-readable origin, for logs.
    fn describe(&self) -> String;
}

/// Reads and validates a TOML file on every call.
#[derive(Debug, Clone)]
pub struct FileConfigProvider {
    path: PathBuf,
}

impl FileConfigProvider {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// `$TIDYWATCH_CONFIG`, else `tidywatch.toml`.
    pub fn from_env() -> Self {
        Self::new(std::env::var(CONFIG_PATH_ENV).unwrap_or_else(|_| DEFAULT_CONFIG_FILE.into()))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl ConfigurationProvider for FileConfigProvider {
    fn engine_config(&self) -> Result<EngineConfig, ConfigError> {
        EngineConfig::from_file(&self.path)
    }

    fn describe(&self) -> String {
        self.path.display().to_string()
    }
}

/// Fixed, already-built configuration.
#[derive(Debug, Clone)]
pub struct StaticConfigProvider(pub EngineConfig);

impl ConfigurationProvider for StaticConfigProvider {
    fn engine_config(&self) -> Result<EngineConfig, ConfigError> {
        self.0.validate()?;
        Ok(self.0.clone())
    }

    fn describe(&self) -> String {
        "static".into()
    }
}

/// Everything the binary needs: the engine document plus runtime paths.
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    pub engine: EngineConfig,
    pub capture_dir: PathBuf,
    pub metrics_path: PathBuf,
}

impl RuntimeConfig {
    /// Load from `provider`, then apply `TIDYWATCH_*` environment overrides.
    pub fn load(provider: &dyn ConfigurationProvider) -> Result<Self> {
        Self::load_with(provider, |key| std::env::var(key).ok())
    }

    /// As [`load`](Self::load) with an explicit variable lookup.
    pub fn load_with(
        provider: &dyn ConfigurationProvider,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Self> {
        let engine = provider
            .engine_config()
            .with_context(|| format!("Failed to load configuration from {}", provider.describe()))?;
        let mut config = Self {
            engine,
            capture_dir: PathBuf::from(DEFAULT_CAPTURE_DIR),
            metrics_path: PathBuf::from(DEFAULT_METRICS_FILE),
        };
        config.apply_overrides(lookup)?;
        config
            .engine
            .validate()
            .context("Configuration invalid after environment overrides")?;
        info!(
            source = %provider.describe(),
            providers = config.engine.providers.len(),
            workers = config.engine.queue.workers,
            max_concurrent = config.engine.queue.max_concurrent,
            "Configuration loaded"
        );
        Ok(config)
    }

    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(raw) = lookup(WORKERS_ENV) {
            self.engine.queue.workers = raw
                .trim()
                .parse()
                .with_context(|| format!("{WORKERS_ENV} must be a positive integer, got '{raw}'"))?;
            debug!(workers = self.engine.queue.workers, "override from {WORKERS_ENV}");
        }
        if let Some(raw) = lookup(MAX_CONCURRENT_ENV) {
            self.engine.queue.max_concurrent = raw.trim().parse().with_context(|| {
                format!("{MAX_CONCURRENT_ENV} must be a positive integer, got '{raw}'")
            })?;
            debug!(max_concurrent = self.engine.queue.max_concurrent, "override from {MAX_CONCURRENT_ENV}");
        }
        if let Some(path) = lookup(USAGE_PATH_ENV) {
            self.engine.usage.path = Some(PathBuf::from(path));
        }
        if let Some(dir) = lookup(CAPTURE_DIR_ENV) {
            self.capture_dir = PathBuf::from(dir);
        }
        if let Some(path) = lookup(METRICS_PATH_ENV) {
            self.metrics_path = PathBuf::from(path);
        }
        Ok(())
    }
}
