use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, Eq, PartialEq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(pub String);

impl TaskId {
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for TaskId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TaskId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

#[derive(Clone, Debug, Eq, PartialEq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(pub String);

impl JobId {
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for JobId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for JobId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

#[derive(Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AllocationId(pub String);

impl AllocationId {
    /// Tasks in this core only ever hold their first allocation.
    pub fn first_for(task_id: &TaskId) -> Self {
        Self(format!("{task_id}.1"))
    }
}

impl Display for AllocationId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskType {
    Command,
    Notebook,
    Shell,
    Tensorboard,
}

impl TaskType {
    pub const ALL: [TaskType; 4] = [
        TaskType::Command,
        TaskType::Notebook,
        TaskType::Shell,
        TaskType::Tensorboard,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Command => "command",
            Self::Notebook => "notebook",
            Self::Shell => "shell",
            Self::Tensorboard => "tensorboard",
        }
    }
}

impl std::str::FromStr for TaskType {
    type Err = ();

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "command" => Ok(Self::Command),
            "notebook" => Ok(Self::Notebook),
            "shell" => Ok(Self::Shell),
            "tensorboard" => Ok(Self::Tensorboard),
            _ => Err(()),
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobType {
    Experiment,
    Command,
    Notebook,
    Shell,
    Tensorboard,
}

impl JobType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Experiment => "experiment",
            Self::Command => "command",
            Self::Notebook => "notebook",
            Self::Shell => "shell",
            Self::Tensorboard => "tensorboard",
        }
    }
}

impl std::str::FromStr for JobType {
    type Err = ();

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "experiment" => Ok(Self::Experiment),
            "command" => Ok(Self::Command),
            "notebook" => Ok(Self::Notebook),
            "shell" => Ok(Self::Shell),
            "tensorboard" => Ok(Self::Tensorboard),
            _ => Err(()),
        }
    }
}

impl From<TaskType> for JobType {
    fn from(value: TaskType) -> Self {
        match value {
            TaskType::Command => Self::Command,
            TaskType::Notebook => Self::Notebook,
            TaskType::Shell => Self::Shell,
            TaskType::Tensorboard => Self::Tensorboard,
        }
    }
}

/// Progress of a task's current allocation. Variants are declared in the order a task moves
/// through them, so the derived ordering doubles as the "more progressed than" relation.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleState {
    Pending,
    Assigned,
    Pulling,
    Starting,
    Running,
    Terminated,
}

impl LifecycleState {
    pub fn is_terminal(self) -> bool {
        self == Self::Terminated
    }

    /// The state shown to users; allocations still waiting on placement read as queued.
    pub fn user_facing(self) -> TaskState {
        match self {
            Self::Pending | Self::Assigned => TaskState::Queued,
            Self::Pulling => TaskState::Pulling,
            Self::Starting => TaskState::Starting,
            Self::Running => TaskState::Running,
            Self::Terminated => TaskState::Terminated,
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    Queued,
    Pulling,
    Starting,
    Running,
    Terminated,
}

#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct Owner {
    pub id: i32,
    pub username: String,
    pub display_name: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ResourcesConfig {
    pub slots: u32,
    pub weight: f64,
    pub priority: Option<i32>,
    pub resource_pool: String,
}

impl Default for ResourcesConfig {
    fn default() -> Self {
        Self {
            slots: 1,
            weight: 1.0,
            priority: None,
            resource_pool: String::new(),
        }
    }
}

#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct Address {
    pub container_ip: String,
    pub container_port: u16,
    pub host_ip: String,
    pub host_port: u16,
}

#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct ExitStatus {
    pub code: Option<i32>,
    pub failure: Option<String>,
}

impl ExitStatus {
    pub fn success() -> Self {
        Self {
            code: Some(0),
            failure: None,
        }
    }

    pub fn failed(failure: impl Into<String>) -> Self {
        Self {
            code: None,
            failure: Some(failure.into()),
        }
    }

    pub fn never_scheduled() -> Self {
        Self::failed("task terminated without being scheduled")
    }
}

impl Display for ExitStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match (&self.failure, self.code) {
            (Some(failure), _) => f.write_str(failure),
            (None, Some(code)) => write!(f, "exited with code {code}"),
            (None, None) => f.write_str("exited"),
        }
    }
}
