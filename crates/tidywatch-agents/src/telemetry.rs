//! Per-job performance records and tracing setup.
//!
//! One [`PerformanceRecord`] is emitted per finished PDCA cycle, success or
//! not. [`JsonlMetricsSink`] appends them to a `.jsonl` file, one object per
//! line, so they can be tailed or loaded with any JSON tooling.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use coordination::{AnalysisResult, PrivacyLevel};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::sinks::{MetricsSink, SinkError};

/// Default metrics file name, relative to the working directory.
pub const DEFAULT_METRICS_FILE: &str = ".tidywatch-metrics.jsonl";

/// Outcome of one analysis job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerformanceRecord {
    pub job_id: Uuid,
    pub zone: String,
    pub timestamp: DateTime<Utc>,
    pub privacy_level: PrivacyLevel,
    pub provider_used: Option<String>,
    pub model_used: String,
    pub fallback_used: bool,
    pub success: bool,
    pub task_count: usize,
    pub confidence: f64,
    pub elapsed_ms: u64,
    pub providers_tried: Vec<String>,
    pub validation_issues: Vec<String>,
    /// 1-based queue attempt that produced this record.
    pub attempt: u32,
}

impl PerformanceRecord {
    pub fn from_result(job_id: Uuid, attempt: u32, result: &AnalysisResult) -> Self {
        let summary = &result.processing_summary;
        Self {
            job_id,
            zone: summary.zone.clone(),
            timestamp: Utc::now(),
            privacy_level: summary.privacy_level,
            provider_used: result.provider_used.clone(),
            model_used: summary.model_used.clone(),
            fallback_used: result.fallback_used,
            success: result.success,
            task_count: result.tasks.len(),
            confidence: result.confidence,
            elapsed_ms: summary.elapsed.as_millis() as u64,
            providers_tried: summary.providers_tried.clone(),
            validation_issues: summary.validation_issues.clone(),
            attempt,
        }
    }
}

/// Appends records as JSON lines.
#[derive(Debug)]
pub struct JsonlMetricsSink {
    path: PathBuf,
    // Serializes appends from concurrent workers so lines never interleave.
    write_lock: Mutex<()>,
}

impl JsonlMetricsSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn append(&self, line: &str) -> std::io::Result<()> {
        let _guard = self.write_lock.lock().unwrap_or_else(|e| e.into_inner());
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        writeln!(file, "{line}")
    }
}

#[async_trait]
impl MetricsSink for JsonlMetricsSink {
    async fn record(&self, record: &PerformanceRecord) -> Result<(), SinkError> {
        let json = serde_json::to_string(record)?;
        match self.append(&json) {
            Ok(()) => {
                debug!(path = %self.path.display(), job = %record.job_id, "Appended performance record");
                Ok(())
            }
            Err(e) => {
                warn!("Failed to append performance record: {e}");
                Err(SinkError::Io(e))
            }
        }
    }
}

/// Read back every parseable record, skipping malformed lines.
pub fn load_records(path: &Path) -> std::io::Result<Vec<PerformanceRecord>> {
    let raw = std::fs::read_to_string(path)?;
    Ok(raw
        .lines()
        .filter(|l| !l.trim().is_empty())
        .filter_map(|l| match serde_json::from_str(l) {
            Ok(record) => Some(record),
            Err(e) => {
                warn!("Skipping malformed performance record: {e}");
                None
            }
        })
        .collect())
}

/// Install the fmt subscriber; `RUST_LOG` overrides the `info` default.
pub fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .init();
}
