//! Analysis data model and provider reply parsing
//!
//! Providers are asked to answer with a JSON object matching [`TaskReply`];
//! its JSON schema (via `schemars`) is embedded in the prompt. Replies are
//! parsed leniently: markdown fences and surrounding prose are stripped
//! before deserializing.

use crate::privacy::PrivacyLevel;
use regex::Regex;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::sync::LazyLock;
use std::time::Duration;
use thiserror::Error;

static FENCED_JSON: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)```(?:json)?\s*(.*?)```").expect("fenced JSON regex should compile")
});

/// Location of a task in the frame, as fractions of width/height (0-1).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct BoundingBox {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl BoundingBox {
    /// Clamp into the unit square.
    pub fn clamped(self) -> Self {
        let finite = |v: f64| if v.is_finite() { v } else { 0.0 };
        let x = finite(self.x).clamp(0.0, 1.0);
        let y = finite(self.y).clamp(0.0, 1.0);
        Self {
            x,
            y,
            width: finite(self.width).clamp(0.0, 1.0 - x),
            height: finite(self.height).clamp(0.0, 1.0 - y),
        }
    }
}

fn default_task_priority() -> u8 {
    3
}

fn default_task_confidence() -> f64 {
    0.5
}

/// One cleaning task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Task {
    /// What to do, e.g. "Put the dishes in the dishwasher".
    #[schemars(description = "Short imperative description of the task")]
    pub description: String,
    /// 1 = most urgent.
    #[serde(default = "default_task_priority")]
    #[schemars(description = "Urgency from 1 (most urgent) to 5")]
    pub priority: u8,
    /// Estimated minutes.
    #[serde(default)]
    #[schemars(description = "Estimated duration in minutes")]
    pub estimated_duration: u32,
    #[serde(default = "default_task_confidence")]
    #[schemars(description = "Confidence between 0 and 1")]
    pub confidence: f64,
    #[serde(default)]
    #[schemars(description = "Optional location as fractions of the frame (0-1)")]
    pub bbox: Option<BoundingBox>,
}

impl Task {
    pub fn new(description: impl Into<String>) -> Self {
        Self {
            description: description.into(),
            priority: default_task_priority(),
            estimated_duration: 0,
            confidence: default_task_confidence(),
            bbox: None,
        }
    }

    fn normalized(mut self) -> Self {
        self.description = self.description.trim().to_string();
        self.priority = self.priority.clamp(1, 5);
        self.confidence = if self.confidence.is_finite() {
            self.confidence.clamp(0.0, 1.0)
        } else {
            0.0
        };
        self.bbox = self.bbox.map(BoundingBox::clamped);
        self
    }
}

/// Shape providers are asked to reply with.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct TaskReply {
    #[schemars(description = "Tasks ordered most urgent first")]
    pub tasks: Vec<Task>,
    /// Overall confidence; defaults to the mean task confidence.
    #[serde(default)]
    #[schemars(description = "Overall confidence between 0 and 1")]
    pub confidence: Option<f64>,
}

impl TaskReply {
    /// JSON schema of the reply, for prompt construction.
    pub fn schema_json() -> String {
        let schema = schemars::schema_for!(TaskReply);
        serde_json::to_string_pretty(&schema).unwrap_or_default()
    }

    /// Overall confidence, falling back to the mean of the tasks.
    pub fn overall_confidence(&self) -> f64 {
        match self.confidence {
            Some(c) if c.is_finite() => c.clamp(0.0, 1.0),
            _ if self.tasks.is_empty() => 0.0,
            _ => self.tasks.iter().map(|t| t.confidence).sum::<f64>() / self.tasks.len() as f64,
        }
    }
}

#[derive(Debug, Error)]
pub enum ReplyParseError {
    #[error("reply contains no JSON object")]
    NoJson,

    #[error("reply JSON does not match the task schema: {0}")]
    Schema(#[from] serde_json::Error),
}

fn json_candidate(text: &str) -> Option<&str> {
    if let Some(caps) = FENCED_JSON.captures(text) {
        return caps.get(1).map(|m| m.as_str().trim());
    }
    let trimmed = text.trim();
    if trimmed.starts_with('[') {
        return Some(trimmed);
    }
    let start = trimmed.find('{')?;
    let end = trimmed.rfind('}')?;
    (end > start).then(|| &trimmed[start..=end])
}

/// Parse a provider's free-text reply into normalized tasks.
///
/// Accepts a `TaskReply` object or a bare array of tasks, optionally wrapped
/// in a markdown fence or surrounded by prose.
pub fn parse_task_reply(text: &str) -> Result<TaskReply, ReplyParseError> {
    let candidate = json_candidate(text).ok_or(ReplyParseError::NoJson)?;
    let reply = if candidate.starts_with('[') {
        TaskReply {
            tasks: serde_json::from_str(candidate)?,
            confidence: None,
        }
    } else {
        serde_json::from_str::<TaskReply>(candidate)?
    };
    let mut tasks: Vec<Task> = reply.tasks.into_iter().map(Task::normalized).collect();
    // Stable: equal priorities keep the provider's order.
    tasks.sort_by_key(|t| t.priority);
    Ok(TaskReply {
        tasks,
        confidence: reply.confidence,
    })
}

/// How one analysis ran.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessingSummary {
    pub zone: String,
    pub privacy_level: PrivacyLevel,
    pub model_used: String,
    /// Providers actually called, in order.
    pub providers_tried: Vec<String>,
    pub elapsed: Duration,
    pub objects_blurred: usize,
    pub annotated: bool,
    /// Check issues from the final attempt; empty when it passed.
    pub validation_issues: Vec<String>,
}

/// Final outcome of a PDCA cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisResult {
    pub tasks: Vec<Task>,
    pub confidence: f64,
    pub provider_used: Option<String>,
    pub fallback_used: bool,
    /// False when every attempt failed or the final result did not pass Check.
    pub success: bool,
    pub processing_summary: ProcessingSummary,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_plain_object() {
        let reply = parse_task_reply(
            r#"{"tasks":[{"description":"Fold laundry","priority":2,"estimated_duration":10,"confidence":0.9}]}"#,
        )
        .unwrap();
        assert_eq!(reply.tasks.len(), 1);
        assert_eq!(reply.tasks[0].description, "Fold laundry");
        assert_eq!(reply.tasks[0].estimated_duration, 10);
        assert!((reply.overall_confidence() - 0.9).abs() < 1e-9);
    }

    #[test]
    fn test_parse_fenced_with_prose() {
        let text = "Here you go:\n```json\n{\"tasks\":[{\"description\":\"Clear desk\"}],\"confidence\":0.7}\n```\nThanks";
        let reply = parse_task_reply(text).unwrap();
        assert_eq!(reply.tasks[0].priority, 3);
        assert_eq!(reply.overall_confidence(), 0.7);
    }

    #[test]
    fn test_parse_bare_array_sorted_by_priority() {
        let text = r#"[{"description":"b","priority":4},{"description":"a","priority":1},{"description":"c","priority":4}]"#;
        let reply = parse_task_reply(text).unwrap();
        let order: Vec<_> = reply.tasks.iter().map(|t| t.description.as_str()).collect();
        assert_eq!(order, ["a", "b", "c"]);
    }

    #[test]
    fn test_parse_normalizes_fields() {
        let text = r#"{"tasks":[{"description":"  Sweep  ","priority":9,"confidence":3.5,"bbox":{"x":0.9,"y":-1,"width":0.5,"height":0.2}}]}"#;
        let task = &parse_task_reply(text).unwrap().tasks[0];
        assert_eq!(task.description, "Sweep");
        assert_eq!(task.priority, 5);
        assert_eq!(task.confidence, 1.0);
        let bbox = task.bbox.unwrap();
        assert_eq!(bbox.y, 0.0);
        assert!((bbox.width - 0.1).abs() < 1e-9);
    }

    #[test]
    fn test_parse_rejects_prose_only() {
        assert!(matches!(parse_task_reply("the room looks fine"), Err(ReplyParseError::NoJson)));
    }

    #[test]
    fn test_parse_rejects_wrong_shape() {
        assert!(matches!(parse_task_reply(r#"{"items": 3}"#), Err(ReplyParseError::Schema(_))));
    }

    #[test]
    fn test_schema_mentions_tasks() {
        let schema = TaskReply::schema_json();
        assert!(schema.contains("\"tasks\""));
        assert!(schema.contains("estimated_duration"));
    }
}
