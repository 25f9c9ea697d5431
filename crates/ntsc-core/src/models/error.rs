use thiserror::Error;

use crate::models::{TaskId, TaskType};

pub type CoreResult<T> = Result<T, CoreError>;

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum CoreErrorKind {
    NotFound,
    TypeMismatch,
    Unsupported,
    PolicyViolation,
    InvalidInput,
    ResourceManagerFailure,
    StorageFailure,
    Internal,
}

#[derive(Clone, Debug, Eq, PartialEq, Error)]
#[error("{kind:?}: {message}")]
pub struct CoreError {
    pub task_id: Option<TaskId>,
    pub task_type: Option<TaskType>,
    pub kind: CoreErrorKind,
    pub message: String,
}

impl CoreError {
    pub fn new(kind: CoreErrorKind, message: impl Into<String>) -> Self {
        Self {
            task_id: None,
            task_type: None,
            kind,
            message: message.into(),
        }
    }

    pub fn for_task(
        task_id: &TaskId,
        task_type: Option<TaskType>,
        kind: CoreErrorKind,
        message: impl Into<String>,
    ) -> Self {
        Self {
            task_id: Some(task_id.clone()),
            task_type,
            kind,
            message: message.into(),
        }
    }

    pub fn not_found(task_id: &TaskId) -> Self {
        Self::for_task(
            task_id,
            None,
            CoreErrorKind::NotFound,
            format!("task '{task_id}' not found"),
        )
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(CoreErrorKind::Internal, message)
    }

    /// Fills in task attribution the error does not already carry.
    pub fn attributed(self, task_id: &TaskId, task_type: TaskType) -> Self {
        Self {
            task_id: self.task_id.or_else(|| Some(task_id.clone())),
            task_type: self.task_type.or(Some(task_type)),
            kind: self.kind,
            message: self.message,
        }
    }
}
