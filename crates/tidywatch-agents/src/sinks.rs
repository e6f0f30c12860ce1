//! External collaborators: image capture, annotation, task and metrics sinks.
//!
//! The engine only talks to these traits. Defaults cover local use: a
//! directory of snapshots for capture, logging or a channel for tasks, and
//! JSONL or memory for metrics (see [`crate::telemetry`]).

use std::path::{Component, Path, PathBuf};
use std::sync::Mutex;

use async_trait::async_trait;
use coordination::{AnalysisResult, Task};
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::telemetry::PerformanceRecord;

#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("invalid zone name '{0}'")]
    InvalidZone(String),

    #[error("no image found for zone '{zone}' in {dir}")]
    NotFound { zone: String, dir: PathBuf },

    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("camera unavailable: {0}")]
    Unavailable(String),
}

#[derive(Debug, Error)]
pub enum SinkError {
    #[error("sink unavailable: {0}")]
    Unavailable(String),

    #[error("sink I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to serialize record: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Produces a frame for a zone.
#[async_trait]
pub trait ImageCaptureService: Send + Sync {
    async fn capture(&self, zone: &str) -> Result<Vec<u8>, CaptureError>;
}

/// Draws task boxes onto an image. Rendering lives outside the engine.
#[async_trait]
pub trait AnnotationEngine: Send + Sync {
    async fn annotate(&self, zone: &str, image: &[u8], tasks: &[Task]) -> Result<(), SinkError>;
}

/// Receives validated task lists.
#[async_trait]
pub trait TaskSink: Send + Sync {
    async fn publish(&self, zone: &str, result: &AnalysisResult) -> Result<(), SinkError>;
}

/// Receives one performance record per job.
#[async_trait]
pub trait MetricsSink: Send + Sync {
    async fn record(&self, record: &PerformanceRecord) -> Result<(), SinkError>;
}

/// Reads `<dir>/<zone>.png`, `.jpg` or `.jpeg`.
#[derive(Debug, Clone)]
pub struct DirectoryCapture {
    dir: PathBuf,
}

const CAPTURE_EXTENSIONS: [&str; 3] = ["png", "jpg", "jpeg"];

impl DirectoryCapture {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

fn is_plain_name(zone: &str) -> bool {
    let mut components = Path::new(zone).components();
    matches!(components.next(), Some(Component::Normal(_))) && components.next().is_none()
}

#[async_trait]
impl ImageCaptureService for DirectoryCapture {
    async fn capture(&self, zone: &str) -> Result<Vec<u8>, CaptureError> {
        if zone.is_empty() || !is_plain_name(zone) {
            return Err(CaptureError::InvalidZone(zone.to_string()));
        }
        for ext in CAPTURE_EXTENSIONS {
            let path = self.dir.join(format!("{zone}.{ext}"));
            match tokio::fs::read(&path).await {
                Ok(bytes) => {
                    debug!(zone, path = %path.display(), bytes = bytes.len(), "frame captured");
                    return Ok(bytes);
                }
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(source) => return Err(CaptureError::Io { path, source }),
            }
        }
        Err(CaptureError::NotFound {
            zone: zone.to_string(),
            dir: self.dir.clone(),
        })
    }
}

/// Logs each task list.
#[derive(Debug, Default, Clone)]
pub struct LoggingTaskSink;

#[async_trait]
impl TaskSink for LoggingTaskSink {
    async fn publish(&self, zone: &str, result: &AnalysisResult) -> Result<(), SinkError> {
        info!(
            zone,
            tasks = result.tasks.len(),
            provider = result.provider_used.as_deref().unwrap_or("none"),
            confidence = result.confidence,
            "tasks ready"
        );
        for (rank, task) in result.tasks.iter().enumerate() {
            info!(zone, rank = rank + 1, priority = task.priority, minutes = task.estimated_duration, "  {}", task.description);
        }
        Ok(())
    }
}

/// Forwards results over an unbounded channel.
#[derive(Debug, Clone)]
pub struct ChannelTaskSink {
    tx: mpsc::UnboundedSender<(String, AnalysisResult)>,
}

impl ChannelTaskSink {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<(String, AnalysisResult)>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

#[async_trait]
impl TaskSink for ChannelTaskSink {
    async fn publish(&self, zone: &str, result: &AnalysisResult) -> Result<(), SinkError> {
        self.tx
            .send((zone.to_string(), result.clone()))
            .map_err(|_| SinkError::Unavailable("task receiver dropped".into()))
    }
}

/// Keeps records in memory.
#[derive(Debug, Default)]
pub struct MemoryMetricsSink {
    records: Mutex<Vec<PerformanceRecord>>,
}

impl MemoryMetricsSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<PerformanceRecord> {
        self.records.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

#[async_trait]
impl MetricsSink for MemoryMetricsSink {
    async fn record(&self, record: &PerformanceRecord) -> Result<(), SinkError> {
        self.records
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(record.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn directory_capture_prefers_png() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("kitchen.jpg"), b"jpeg").unwrap();
        std::fs::write(dir.path().join("kitchen.png"), b"png").unwrap();
        let capture = DirectoryCapture::new(dir.path());
        assert_eq!(capture.capture("kitchen").await.unwrap(), b"png");
    }

    #[tokio::test]
    async fn directory_capture_missing_zone() {
        let dir = tempfile::tempdir().unwrap();
        let capture = DirectoryCapture::new(dir.path());
        assert!(matches!(
            capture.capture("garage").await,
            Err(CaptureError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn directory_capture_rejects_traversal() {
        let capture = DirectoryCapture::new("/tmp");
        for zone in ["../etc/passwd", "a/b", "", ".."] {
            assert!(matches!(
                capture.capture(zone).await,
                Err(CaptureError::InvalidZone(_))
            ));
        }
    }

    #[test]
    fn plain_names() {
        assert!(is_plain_name("living_room"));
        assert!(!is_plain_name("/abs"));
        assert!(!is_plain_name("."));
    }
}
