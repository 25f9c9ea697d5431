//! Detects when a task's embedded service starts accepting connections by matching streamed
//! container log lines against named predicates.

use std::collections::BTreeMap;

use regex::Regex;

use crate::models::{CoreError, CoreErrorKind, CoreResult, TaskType};

pub const SHELL_READY_MARKER: &str = "Server listening on";
pub const NOTEBOOK_READY_PATTERN: &str = r"Jupyter Server .* is running at";
pub const TENSORBOARD_READY_PATTERN: &str = r"TensorBoard \S+ at http";

#[derive(Clone, Debug)]
pub enum ReadinessCheck {
    Contains(String),
    Matches(Regex),
}

impl ReadinessCheck {
    pub fn contains(needle: impl Into<String>) -> Self {
        Self::Contains(needle.into())
    }

    pub fn matches(pattern: &str) -> CoreResult<Self> {
        Regex::new(pattern).map(Self::Matches).map_err(|error| {
            CoreError::new(
                CoreErrorKind::InvalidInput,
                format!("invalid readiness pattern '{pattern}': {error}"),
            )
        })
    }

    pub fn is_satisfied_by(&self, line: &str) -> bool {
        match self {
            Self::Contains(needle) => line.contains(needle.as_str()),
            Self::Matches(regex) => regex.is_match(line),
        }
    }
}

/// The still-pending readiness predicates of one task. A predicate that matches a line is
/// removed; the set is ready once it is empty.
#[derive(Clone, Debug, Default)]
pub struct ReadinessChecks {
    pending: BTreeMap<String, ReadinessCheck>,
}

impl ReadinessChecks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn for_task_type(task_type: TaskType) -> CoreResult<Self> {
        let mut checks = Self::new();
        match task_type {
            TaskType::Command => {}
            TaskType::Shell => {
                checks.insert("shell", ReadinessCheck::contains(SHELL_READY_MARKER));
            }
            TaskType::Notebook => {
                checks.insert("notebook", ReadinessCheck::matches(NOTEBOOK_READY_PATTERN)?);
            }
            TaskType::Tensorboard => {
                checks.insert(
                    "tensorboard",
                    ReadinessCheck::matches(TENSORBOARD_READY_PATTERN)?,
                );
            }
        }
        Ok(checks)
    }

    pub fn insert(&mut self, name: impl Into<String>, check: ReadinessCheck) {
        self.pending.insert(name.into(), check);
    }

    /// Evaluates every pending predicate against `line`, dropping the ones it satisfies.
    /// Returns the names of the predicates that matched.
    pub fn observe(&mut self, line: &str) -> Vec<String> {
        let matched: Vec<String> = self
            .pending
            .iter()
            .filter(|(_, check)| check.is_satisfied_by(line))
            .map(|(name, _)| name.clone())
            .collect();
        for name in &matched {
            self.pending.remove(name);
        }
        matched
    }

    pub fn is_ready(&self) -> bool {
        self.pending.is_empty()
    }

    pub fn pending(&self) -> impl Iterator<Item = &str> {
        self.pending.keys().map(String::as_str)
    }
}
