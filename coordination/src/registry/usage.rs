//! Usage counters and their persistence.
//!
//! Counters live inside the registry; saving and loading go through an
//! injected [`UsageRepository`] so no process-wide state is involved.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use thiserror::Error;

/// Request counters for one provider.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageCounters {
    pub requests: u64,
    pub successes: u64,
    pub failures: u64,
    pub last_used: Option<DateTime<Utc>>,
}

impl UsageCounters {
    pub fn record(&mut self, success: bool, now: DateTime<Utc>) {
        self.requests += 1;
        if success {
            self.successes += 1;
        } else {
            self.failures += 1;
        }
        self.last_used = Some(now);
    }
}

/// Usage for every provider, keyed by provider id.
pub type UsageSnapshot = BTreeMap<String, UsageCounters>;

#[derive(Debug, Error)]
pub enum UsageStoreError {
    #[error("usage store I/O failed for {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("usage store is corrupted: {0}")]
    Corrupted(#[from] serde_json::Error),
}

/// Load/save interface for usage counters.
pub trait UsageRepository: Send + Sync {
    /// Load persisted counters; an absent store yields an empty snapshot.
    fn load(&self) -> Result<UsageSnapshot, UsageStoreError>;

    fn save(&self, snapshot: &UsageSnapshot) -> Result<(), UsageStoreError>;
}

/// JSON file on disk, written atomically through a sibling temp file.
#[derive(Debug, Clone)]
pub struct JsonFileUsageRepository {
    path: PathBuf,
}

impl JsonFileUsageRepository {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn io_error(&self, source: std::io::Error) -> UsageStoreError {
        UsageStoreError::Io {
            path: self.path.clone(),
            source,
        }
    }
}

impl UsageRepository for JsonFileUsageRepository {
    fn load(&self) -> Result<UsageSnapshot, UsageStoreError> {
        match std::fs::read_to_string(&self.path) {
            Ok(raw) if raw.trim().is_empty() => Ok(UsageSnapshot::new()),
            Ok(raw) => Ok(serde_json::from_str(&raw)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(UsageSnapshot::new()),
            Err(e) => Err(self.io_error(e)),
        }
    }

    fn save(&self, snapshot: &UsageSnapshot) -> Result<(), UsageStoreError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| self.io_error(e))?;
            }
        }
        let json = serde_json::to_string_pretty(snapshot)?;
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, json).map_err(|e| self.io_error(e))?;
        std::fs::rename(&tmp, &self.path).map_err(|e| self.io_error(e))
    }
}

/// In-memory repository for tests and ephemeral runs.
#[derive(Debug, Default)]
pub struct MemoryUsageRepository {
    inner: Mutex<UsageSnapshot>,
}

impl MemoryUsageRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

impl UsageRepository for MemoryUsageRepository {
    fn load(&self) -> Result<UsageSnapshot, UsageStoreError> {
        Ok(self
            .inner
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone())
    }

    fn save(&self, snapshot: &UsageSnapshot) -> Result<(), UsageStoreError> {
        *self.inner.lock().unwrap_or_else(|e| e.into_inner()) = snapshot.clone();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_record() {
        let mut counters = UsageCounters::default();
        let now = Utc::now();
        counters.record(true, now);
        counters.record(false, now);
        assert_eq!(counters.requests, 2);
        assert_eq!(counters.successes, 1);
        assert_eq!(counters.failures, 1);
        assert_eq!(counters.last_used, Some(now));
    }

    #[test]
    fn test_file_repository_missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let repo = JsonFileUsageRepository::new(dir.path().join("usage.json"));
        assert!(repo.load().unwrap().is_empty());
    }

    #[test]
    fn test_file_repository_persists() {
        let dir = tempfile::tempdir().unwrap();
        let repo = JsonFileUsageRepository::new(dir.path().join("state/usage.json"));
        let mut snapshot = UsageSnapshot::new();
        let mut counters = UsageCounters::default();
        counters.record(true, Utc::now());
        snapshot.insert("ollama".to_string(), counters.clone());

        repo.save(&snapshot).unwrap();
        let loaded = repo.load().unwrap();
        assert_eq!(loaded.get("ollama"), Some(&counters));
    }

    #[test]
    fn test_file_repository_rejects_garbage() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("usage.json");
        std::fs::write(&path, "{not json").unwrap();
        let repo = JsonFileUsageRepository::new(path);
        assert!(matches!(repo.load(), Err(UsageStoreError::Corrupted(_))));
    }
}
