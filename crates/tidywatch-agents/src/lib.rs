//! tidywatch async runtime
//!
//! Everything that touches the network, the clock or a worker lives here;
//! the deterministic state machines are in the `coordination` crate.
//!
//! - [`dispatcher`]: `AIService`, one bounded failover loop per request
//! - [`queue`]: priority queue, worker pool and retry policy
//! - [`pdca`]: Plan-Do-Check-Act around a single analysis job
//! - [`health`]: concurrent provider probes feeding the circuit breakers
//! - [`provider`]: the `Provider` plugin trait and the OpenAI-compatible plugin
//! - [`sinks`]: capture, annotation, task and metrics collaborators

pub mod config;
pub mod dispatcher;
pub mod errors;
pub mod health;
pub mod lifecycle;
pub mod pdca;
pub mod prompt;
pub mod provider;
pub mod queue;
pub mod runtime;
pub mod sinks;
pub mod telemetry;

pub use config::{ConfigurationProvider, FileConfigProvider, RuntimeConfig, StaticConfigProvider};
pub use dispatcher::{AIService, AttemptRecord, DispatchOutcome};
pub use errors::{DispatchError, JobError, ProviderError, RetryCategory};
pub use health::{HealthMonitor, HealthReport};
pub use lifecycle::{Lifecycle, LifecycleError, UsagePersister};
pub use pdca::{HistoryEntry, PdcaOrchestrator};
pub use provider::{OpenAiCompatProvider, Provider, ProviderRequest, ProviderResponse, ProviderSet};
pub use queue::{AnalysisJob, AnalysisQueueManager, JobExecutor, JobPayload, JobPriority, QueueStats};
pub use runtime::Runtime;
pub use sinks::{
    AnnotationEngine, CaptureError, ChannelTaskSink, DirectoryCapture, ImageCaptureService,
    LoggingTaskSink, MemoryMetricsSink, MetricsSink, SinkError, TaskSink,
};
pub use telemetry::{JsonlMetricsSink, PerformanceRecord};
