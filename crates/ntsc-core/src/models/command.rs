use std::time::SystemTime;

use serde::{Deserialize, Serialize};

use crate::models::{
    Address, AllocationId, ExitStatus, JobId, JobType, LifecycleState, Owner, ResourcesConfig,
    TaskId, TaskState, TaskType,
};

#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct CommandMetadata {
    pub workspace_id: i32,
    pub experiment_ids: Vec<i32>,
    pub trial_ids: Vec<i32>,
}

/// Everything needed to launch, and later relaunch, one task.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CommandSpec {
    pub owner: Owner,
    #[serde(default)]
    pub description: String,
    pub image: String,
    pub entrypoint: Vec<String>,
    #[serde(default)]
    pub environment: Vec<(String, String)>,
    #[serde(default)]
    pub resources: ResourcesConfig,
    #[serde(default)]
    pub metadata: CommandMetadata,
    #[serde(default = "default_preemptible")]
    pub preemptible: bool,
    /// Uploaded files; persisted apart from the spec and dropped once the container starts.
    #[serde(skip)]
    pub context_directory: Vec<u8>,
}

fn default_preemptible() -> bool {
    true
}

impl CommandSpec {
    pub fn new(owner: Owner, image: impl Into<String>, entrypoint: Vec<String>) -> Self {
        Self {
            owner,
            description: String::new(),
            image: image.into(),
            entrypoint,
            environment: Vec::new(),
            resources: ResourcesConfig::default(),
            metadata: CommandMetadata::default(),
            preemptible: true,
            context_directory: Vec::new(),
        }
    }
}

/// Read-only view of one task as callers see it.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CommandSummary {
    pub task_id: TaskId,
    pub job_id: JobId,
    pub task_type: TaskType,
    pub owner: Owner,
    pub description: String,
    pub registered_time: SystemTime,
    pub state: TaskState,
    pub lifecycle: LifecycleState,
    pub service_address: String,
    pub addresses: Vec<Address>,
    pub exit_status: Option<ExitStatus>,
    pub ready: bool,
    pub resources: ResourcesConfig,
    pub metadata: CommandMetadata,
}

impl CommandSummary {
    pub fn resource_pool(&self) -> &str {
        &self.resources.resource_pool
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct CommandDetails {
    pub summary: CommandSummary,
    pub spec: CommandSpec,
}

/// Broadcast whenever a task's lifecycle state or readiness changes.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CommandEvent {
    pub task_id: TaskId,
    pub task_type: TaskType,
    pub state: LifecycleState,
    pub ready: bool,
}

/// What gets persisted so a task can be reconstructed after a restart.
#[derive(Clone, Debug, PartialEq)]
pub struct TaskSnapshot {
    pub task_id: TaskId,
    pub task_type: TaskType,
    pub job_id: JobId,
    pub job_type: JobType,
    pub registered_time: SystemTime,
    pub allocation_id: AllocationId,
    pub spec: CommandSpec,
}

/// Restricts listings to tasks owned by the given users, and/or living in given workspaces.
/// Empty sets place no restriction.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct TaskFilter {
    pub usernames: Vec<String>,
    pub user_ids: Vec<i32>,
    pub workspace_ids: Vec<i32>,
}

impl TaskFilter {
    pub fn matches_owner(&self, owner: &Owner) -> bool {
        if self.usernames.is_empty() && self.user_ids.is_empty() {
            return true;
        }
        self.usernames.contains(&owner.username) || self.user_ids.contains(&owner.id)
    }

    pub fn matches_workspace(&self, workspace_id: i32) -> bool {
        self.workspace_ids.is_empty() || self.workspace_ids.contains(&workspace_id)
    }
}
