//! PDCA orchestrator: Plan → Do → Check → Act for one analysis job.
//!
//! ```text
//! Plan   privacy tier (job > zone > default) → locality
//! Do     capture? → sanitize → dispatch (with failover) → parse → annotate?
//! Check  validate_result(tasks, elapsed of this Do round, thresholds)
//! Act    history entry; on Check failure exactly one pinned fallback Do
//!        with the next untried failover candidate, then Act again
//! ```
//!
//! `run` never returns an error: every path ends in an [`AnalysisResult`],
//! marked failed when nothing passed Check. Successful results go to the
//! [`TaskSink`]; every job produces one [`PerformanceRecord`].

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use coordination::{
    parse_task_reply, validate_result, AnalysisResult, CheckThresholds, Locality, PrivacyLevel,
    PrivacyProcessor, ProcessingSummary, SanitizationResult, Task,
};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::dispatcher::{AIService, DispatchOutcome};
use crate::errors::{DispatchError, JobError};
use crate::prompt;
use crate::provider::ProviderRequest;
use crate::queue::{AnalysisJob, JobExecutor, JobPayload};
use crate::sinks::{AnnotationEngine, ImageCaptureService, MetricsSink, TaskSink};
use crate::telemetry::PerformanceRecord;

/// One Act-phase entry in the rolling history.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HistoryEntry {
    pub timestamp: DateTime<Utc>,
    pub zone: String,
    pub provider: Option<String>,
    pub model: Option<String>,
    pub passed: bool,
    pub task_count: usize,
    pub elapsed_ms: u64,
    /// True for the fallback round.
    pub fallback: bool,
}

/// Result of one Do phase.
#[derive(Debug, Default)]
struct DoOutcome {
    provider: Option<String>,
    model: Option<String>,
    tasks: Vec<Task>,
    confidence: f64,
    /// Dispatcher had to fail over inside this round.
    failed_over: bool,
    /// Every (provider, model) actually called, in order.
    tried: Vec<(String, String)>,
    annotated: bool,
    /// The call itself failed; no reply to check.
    dispatch_error: Option<String>,
    parse_error: Option<String>,
}

/// Sanitized input shared by both Do rounds.
struct Prepared {
    level: PrivacyLevel,
    request: ProviderRequest,
    image: Option<Vec<u8>>,
    objects_blurred: usize,
}

pub struct PdcaOrchestrator {
    ai: Arc<AIService>,
    privacy: PrivacyProcessor,
    thresholds: CheckThresholds,
    history_limit: usize,
    history: Mutex<VecDeque<HistoryEntry>>,
    capture: Option<Arc<dyn ImageCaptureService>>,
    annotator: Option<Arc<dyn AnnotationEngine>>,
    task_sink: Arc<dyn TaskSink>,
    metrics: Arc<dyn MetricsSink>,
}

impl PdcaOrchestrator {
    pub fn new(
        ai: Arc<AIService>,
        privacy: PrivacyProcessor,
        thresholds: CheckThresholds,
        history_limit: usize,
        task_sink: Arc<dyn TaskSink>,
        metrics: Arc<dyn MetricsSink>,
    ) -> Self {
        Self {
            ai,
            privacy,
            thresholds,
            history_limit: history_limit.max(1),
            history: Mutex::new(VecDeque::new()),
            capture: None,
            annotator: None,
            task_sink,
            metrics,
        }
    }

    pub fn with_capture(mut self, capture: Arc<dyn ImageCaptureService>) -> Self {
        self.capture = Some(capture);
        self
    }

    pub fn with_annotator(mut self, annotator: Arc<dyn AnnotationEngine>) -> Self {
        self.annotator = Some(annotator);
        self
    }

    pub fn ai(&self) -> &AIService {
        &self.ai
    }

    /// Rolling history, oldest first.
    pub fn history(&self) -> Vec<HistoryEntry> {
        self.history
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .cloned()
            .collect()
    }

    /// Run one full cycle for `job`.
    pub async fn run(&self, job: &AnalysisJob) -> AnalysisResult {
        self.cycle(job).await.0
    }

    /// The result plus the execution error (capture, sanitize or dispatch)
    /// that caused a failure, if any.
    async fn cycle(&self, job: &AnalysisJob) -> (AnalysisResult, Option<String>) {
        let started = Instant::now();

        // ── Plan ──
        let level = self.privacy.level_for(&job.zone, job.privacy_override);
        let locality = level.locality();
        debug!(job = %job.id, zone = %job.zone, level = %level, ?locality, "plan");

        let prepared = match self.prepare(job, level).await {
            Ok(prepared) => prepared,
            Err(message) => {
                warn!(job = %job.id, zone = %job.zone, error = %message, "job could not be prepared");
                let result = AnalysisResult {
                    tasks: Vec::new(),
                    confidence: 0.0,
                    provider_used: None,
                    fallback_used: false,
                    success: false,
                    processing_summary: ProcessingSummary {
                        zone: job.zone.clone(),
                        privacy_level: level,
                        model_used: String::new(),
                        providers_tried: Vec::new(),
                        elapsed: started.elapsed(),
                        objects_blurred: 0,
                        annotated: false,
                        validation_issues: vec![message.clone()],
                    },
                };
                self.finish(job, &result).await;
                return (result, Some(message));
            }
        };

        // ── Do / Check / Act ──
        // Each Do round is checked against its own elapsed time.
        let round = Instant::now();
        let first = self.dispatch(&job.zone, &prepared, None).await;
        let first_elapsed = round.elapsed();
        let mut issues = self.check(&first, first_elapsed);
        self.act(&job.zone, &first, issues.is_empty(), first_elapsed, false);
        let mut providers_tried: Vec<String> = first.tried.iter().map(|(p, _)| p.clone()).collect();

        let mut fallback_used = first.failed_over;
        let mut annotated = first.annotated;
        let mut last = first;

        if !issues.is_empty() {
            match self.fallback_candidate(&last, locality) {
                Some((provider, model)) => {
                    info!(
                        job = %job.id,
                        zone = %job.zone,
                        provider = %provider,
                        model = %model,
                        issues = %issues.join("; "),
                        "check failed, trying fallback"
                    );
                    let round = Instant::now();
                    let second = self
                        .dispatch(&job.zone, &prepared, Some((provider.as_str(), model.as_str())))
                        .await;
                    let second_elapsed = round.elapsed();
                    issues = self.check(&second, second_elapsed);
                    self.act(&job.zone, &second, issues.is_empty(), second_elapsed, true);
                    providers_tried.extend(second.tried.iter().map(|(p, _)| p.clone()));
                    fallback_used = true;
                    annotated |= second.annotated;
                    last = second;
                }
                None => debug!(job = %job.id, "no untried fallback candidate"),
            }
        }

        let success = issues.is_empty();
        let execution_error = if success { None } else { last.dispatch_error.take() };
        let result = AnalysisResult {
            confidence: if success { last.confidence } else { 0.0 },
            tasks: if success { last.tasks } else { Vec::new() },
            provider_used: last.provider,
            fallback_used,
            success,
            processing_summary: ProcessingSummary {
                zone: job.zone.clone(),
                privacy_level: prepared.level,
                model_used: last.model.unwrap_or_default(),
                providers_tried,
                elapsed: started.elapsed(),
                objects_blurred: prepared.objects_blurred,
                annotated,
                validation_issues: issues,
            },
        };
        self.finish(job, &result).await;
        (result, execution_error)
    }

    /// Acquire and sanitize the payload, then build the request.
    async fn prepare(&self, job: &AnalysisJob, level: PrivacyLevel) -> Result<Prepared, String> {
        let payload = match &job.payload {
            JobPayload::Inline(bytes) => bytes.clone(),
            JobPayload::CaptureAtExecution => {
                let capture = self
                    .capture
                    .as_ref()
                    .ok_or_else(|| "no capture service configured".to_string())?;
                capture
                    .capture(&job.zone)
                    .await
                    .map_err(|e| format!("capture failed: {e}"))?
            }
        };

        let privacy = self.privacy.clone();
        // Decoding, blurring and re-encoding are CPU-bound.
        let sanitized: SanitizationResult =
            tokio::task::spawn_blocking(move || privacy.process(&payload, level))
                .await
                .map_err(|e| format!("sanitizer task failed: {e}"))?
                .map_err(|e| format!("sanitization failed: {e}"))?;

        let objects_blurred = sanitized.objects_detected.len();
        let locality = sanitized.privacy_level.locality();
        let request = match &sanitized.sanitized_payload {
            Some(bytes) => ProviderRequest::new(prompt::image_prompt(
                &job.zone,
                level,
                objects_blurred,
                self.annotator.is_some(),
            ))
            .with_image(bytes.clone()),
            None => ProviderRequest::new(prompt::metadata_prompt(&job.zone, &sanitized.metadata))
                .with_metadata(sanitized.metadata.clone()),
        }
        .with_system(prompt::SYSTEM_PREAMBLE)
        .with_locality(locality);

        Ok(Prepared {
            level,
            request,
            image: sanitized.sanitized_payload,
            objects_blurred,
        })
    }

    /// Do: dispatch, parse, annotate. `pinned` makes exactly one call.
    async fn dispatch(&self, zone: &str, prepared: &Prepared, pinned: Option<(&str, &str)>) -> DoOutcome {
        let dispatched = match pinned {
            Some((provider, model)) => self.ai.generate_pinned(&prepared.request, provider, model).await,
            None => self.ai.generate(&prepared.request, None, None).await,
        };

        let outcome: DispatchOutcome = match dispatched {
            Ok(outcome) => outcome,
            Err(e) => {
                let mut tried = Vec::new();
                collect_tried(&e, &mut tried);
                return DoOutcome {
                    tried,
                    dispatch_error: Some(format!("dispatch failed: {e}")),
                    ..DoOutcome::default()
                };
            }
        };

        let tried = outcome
            .attempts
            .iter()
            .map(|a| (a.provider.clone(), a.model.clone()))
            .collect();
        let mut done = DoOutcome {
            provider: Some(outcome.provider.clone()),
            model: Some(outcome.model.clone()),
            failed_over: outcome.fallback_used,
            tried,
            ..DoOutcome::default()
        };

        match parse_task_reply(&outcome.response.text) {
            Ok(reply) => {
                done.confidence = reply.overall_confidence();
                done.tasks = reply.tasks;
            }
            Err(e) => {
                warn!(provider = %outcome.provider, error = %e, "unparseable provider reply");
                done.parse_error = Some(format!("unparseable reply from {}: {e}", outcome.provider));
                return done;
            }
        }

        if let (Some(annotator), Some(image)) = (&self.annotator, &prepared.image) {
            if done.tasks.iter().any(|t| t.bbox.is_some()) {
                match annotator.annotate(zone, image, &done.tasks).await {
                    Ok(()) => done.annotated = true,
                    Err(e) => warn!(zone, error = %e, "annotation failed"),
                }
            }
        }
        done
    }

    /// Check: threshold issues plus any Do error.
    fn check(&self, outcome: &DoOutcome, elapsed: Duration) -> Vec<String> {
        let mut issues = Vec::new();
        issues.extend(outcome.dispatch_error.iter().cloned());
        issues.extend(outcome.parse_error.iter().cloned());
        issues.extend(validate_result(&outcome.tasks, elapsed, &self.thresholds).messages());
        issues
    }

    /// Act: append to the rolling history.
    fn act(&self, zone: &str, outcome: &DoOutcome, passed: bool, elapsed: Duration, fallback: bool) {
        let entry = HistoryEntry {
            timestamp: Utc::now(),
            zone: zone.to_string(),
            provider: outcome.provider.clone(),
            model: outcome.model.clone(),
            passed,
            task_count: outcome.tasks.len(),
            elapsed_ms: elapsed.as_millis() as u64,
            fallback,
        };
        let mut history = self.history.lock().unwrap_or_else(|e| e.into_inner());
        history.push_back(entry);
        while history.len() > self.history_limit {
            history.pop_front();
        }
    }

    /// First failover step not yet tried whose provider can be called now.
    fn fallback_candidate(&self, last: &DoOutcome, locality: Locality) -> Option<(String, String)> {
        let registry = self.ai.registry();
        let origin = match (&last.provider, &last.model) {
            (Some(p), Some(m)) => (p.clone(), m.clone()),
            _ => match last.tried.first() {
                Some(pair) => pair.clone(),
                None => self.ai.failover().primary(locality)?,
            },
        };
        let origin_untried = !last.tried.contains(&origin);

        // An origin that was skipped, never called, is itself a candidate.
        if origin_untried && registry.is_available(&origin.0) && self.ai.providers().get(&origin.0).is_some() {
            return Some(origin);
        }
        self.ai
            .failover()
            .sequence(&origin.0, &origin.1, locality)
            .into_iter()
            .map(|step| (step.provider, step.model))
            .find(|(provider, model)| {
                !last.tried.iter().any(|(p, m)| p == provider && m == model)
                    && registry.is_available(provider)
                    && self.ai.providers().get(provider).is_some()
            })
    }

    /// Publish on success and always record metrics. Sink errors are logged only.
    async fn finish(&self, job: &AnalysisJob, result: &AnalysisResult) {
        if result.success {
            if let Err(e) = self.task_sink.publish(&job.zone, result).await {
                warn!(job = %job.id, zone = %job.zone, error = %e, "task sink rejected result");
            }
        }
        let record = PerformanceRecord::from_result(job.id, job.attempts + 1, result);
        if let Err(e) = self.metrics.record(&record).await {
            warn!(job = %job.id, error = %e, "metrics sink rejected record");
        }
        info!(
            job = %job.id,
            zone = %job.zone,
            success = result.success,
            tasks = result.tasks.len(),
            provider = result.provider_used.as_deref().unwrap_or("none"),
            fallback = result.fallback_used,
            elapsed_ms = result.processing_summary.elapsed.as_millis() as u64,
            "analysis finished"
        );
    }
}

/// Every (provider, model) a failed dispatch actually called.
fn collect_tried(error: &DispatchError, out: &mut Vec<(String, String)>) {
    match error {
        DispatchError::Transport { provider, model, .. } | DispatchError::Timeout { provider, model, .. } => {
            out.push((provider.clone(), model.clone()));
        }
        DispatchError::ExhaustedFailover { causes } => {
            for cause in causes {
                collect_tried(cause, out);
            }
        }
        DispatchError::ProviderUnavailable { .. } | DispatchError::Configuration(_) => {}
    }
}

#[async_trait]
impl JobExecutor for PdcaOrchestrator {
    async fn execute(&self, job: &AnalysisJob) -> Result<(), JobError> {
        let (result, execution_error) = self.cycle(job).await;
        if result.success {
            return Ok(());
        }
        match execution_error {
            Some(message) => Err(JobError::Execution(message)),
            None => Err(JobError::ValidationFailed {
                issues: result.processing_summary.validation_issues,
            }),
        }
    }
}
