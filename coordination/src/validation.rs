//! Check phase: validate an analysis result against configured thresholds.

use crate::analysis::Task;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Named Check thresholds.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CheckThresholds {
    pub min_tasks: usize,
    pub max_tasks: usize,
    /// Budget for one Do phase.
    pub max_elapsed_secs: u64,
}

impl Default for CheckThresholds {
    fn default() -> Self {
        Self {
            min_tasks: 1,
            max_tasks: 20,
            max_elapsed_secs: 120,
        }
    }
}

impl CheckThresholds {
    pub fn validate(&self) -> Result<(), String> {
        if self.min_tasks == 0 {
            return Err("min_tasks must be at least 1".to_string());
        }
        if self.max_tasks < self.min_tasks {
            return Err(format!(
                "max_tasks ({}) must not be below min_tasks ({})",
                self.max_tasks, self.min_tasks
            ));
        }
        if self.max_elapsed_secs == 0 {
            return Err("max_elapsed_secs must be positive".to_string());
        }
        Ok(())
    }

    pub fn max_elapsed(&self) -> Duration {
        Duration::from_secs(self.max_elapsed_secs)
    }
}

/// A single reason a result failed Check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "issue", rename_all = "snake_case")]
pub enum ValidationIssue {
    NoTasks,
    TooFewTasks { found: usize, min: usize },
    TooManyTasks { found: usize, max: usize },
    EmptyDescription { index: usize },
    TooSlow { elapsed_ms: u64, budget_ms: u64 },
}

impl fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoTasks => write!(f, "no tasks returned"),
            Self::TooFewTasks { found, min } => write!(f, "{found} tasks, expected at least {min}"),
            Self::TooManyTasks { found, max } => write!(f, "{found} tasks, expected at most {max}"),
            Self::EmptyDescription { index } => write!(f, "task {index} has an empty description"),
            Self::TooSlow { elapsed_ms, budget_ms } => {
                write!(f, "analysis took {elapsed_ms}ms, budget {budget_ms}ms")
            }
        }
    }
}

/// Outcome of Check.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationReport {
    pub issues: Vec<ValidationIssue>,
}

impl ValidationReport {
    pub fn passed(&self) -> bool {
        self.issues.is_empty()
    }

    pub fn messages(&self) -> Vec<String> {
        self.issues.iter().map(ToString::to_string).collect()
    }
}

/// Run every check and collect all issues.
pub fn validate_result(tasks: &[Task], elapsed: Duration, thresholds: &CheckThresholds) -> ValidationReport {
    let mut issues = Vec::new();

    if tasks.is_empty() {
        issues.push(ValidationIssue::NoTasks);
    } else if tasks.len() < thresholds.min_tasks {
        issues.push(ValidationIssue::TooFewTasks {
            found: tasks.len(),
            min: thresholds.min_tasks,
        });
    }
    if tasks.len() > thresholds.max_tasks {
        issues.push(ValidationIssue::TooManyTasks {
            found: tasks.len(),
            max: thresholds.max_tasks,
        });
    }
    for (index, task) in tasks.iter().enumerate() {
        if task.description.trim().is_empty() {
            issues.push(ValidationIssue::EmptyDescription { index });
        }
    }
    if elapsed > thresholds.max_elapsed() {
        issues.push(ValidationIssue::TooSlow {
            elapsed_ms: elapsed.as_millis() as u64,
            budget_ms: thresholds.max_elapsed().as_millis() as u64,
        });
    }

    ValidationReport { issues }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tasks(n: usize) -> Vec<Task> {
        (0..n).map(|i| Task::new(format!("task {i}"))).collect()
    }

    #[test]
    fn test_valid_result_passes() {
        let report = validate_result(&tasks(3), Duration::from_secs(5), &CheckThresholds::default());
        assert!(report.passed());
    }

    #[test]
    fn test_empty_list_fails() {
        let report = validate_result(&[], Duration::ZERO, &CheckThresholds::default());
        assert_eq!(report.issues, vec![ValidationIssue::NoTasks]);
    }

    #[test]
    fn test_bounds_are_inclusive() {
        let thresholds = CheckThresholds::default();
        assert!(validate_result(&tasks(20), Duration::ZERO, &thresholds).passed());
        let report = validate_result(&tasks(21), Duration::ZERO, &thresholds);
        assert_eq!(report.issues, vec![ValidationIssue::TooManyTasks { found: 21, max: 20 }]);
    }

    #[test]
    fn test_min_tasks_threshold() {
        let thresholds = CheckThresholds {
            min_tasks: 3,
            ..CheckThresholds::default()
        };
        let report = validate_result(&tasks(2), Duration::ZERO, &thresholds);
        assert_eq!(report.issues, vec![ValidationIssue::TooFewTasks { found: 2, min: 3 }]);
    }

    #[test]
    fn test_blank_description_and_slow_both_reported() {
        let mut list = tasks(2);
        list[1].description = "   ".into();
        let report = validate_result(&list, Duration::from_secs(121), &CheckThresholds::default());
        assert_eq!(report.issues.len(), 2);
        assert!(report.messages()[0].contains("task 1"));
    }

    #[test]
    fn test_thresholds_validate() {
        assert!(CheckThresholds::default().validate().is_ok());
        let bad = CheckThresholds {
            min_tasks: 5,
            max_tasks: 2,
            ..CheckThresholds::default()
        };
        assert!(bad.validate().is_err());
    }
}
