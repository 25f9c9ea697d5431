pub mod in_memory;
pub mod registry;

pub use in_memory::InMemoryResourceManager;
pub use registry::{ResourceManagerFactory, ResourceManagerRegistry};

use std::collections::HashMap;
use std::fmt::{Debug, Formatter};
use std::sync::Arc;
use std::time::SystemTime;

use thiserror::Error;

use crate::models::{
    Address, AllocationId, CoreError, CoreErrorKind, ExitStatus, JobId, MoveJob, RmJobInfo,
    TaskId,
};

pub type ResourceManagerResult<T> = Result<T, ResourceManagerError>;

#[derive(Clone, Debug, Eq, PartialEq, Error)]
pub enum ResourceManagerError {
    #[error("operation not supported by this resource manager: {0}")]
    Unsupported(String),

    #[error("unknown resource pool '{0}'")]
    UnknownResourcePool(String),

    #[error("task '{0}' is not known to the resource manager")]
    UnknownTask(TaskId),

    #[error("job '{0}' is not known to the resource manager")]
    UnknownJob(JobId),

    #[error("{0}")]
    Failed(String),
}

impl From<ResourceManagerError> for CoreError {
    fn from(error: ResourceManagerError) -> Self {
        let kind = match error {
            ResourceManagerError::Unsupported(_) => CoreErrorKind::Unsupported,
            _ => CoreErrorKind::ResourceManagerFailure,
        };
        CoreError::new(kind, error.to_string())
    }
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct FittingRequirements {
    pub single_agent: bool,
}

/// Progress the resource manager reports back to the task that owns an allocation.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum AllocationEvent {
    Assigned,
    ContainerStateChanged(ContainerState),
    ContainerLog(String),
    Aborted,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum ContainerState {
    Pulling,
    Starting,
    Running { addresses: Vec<Address> },
    Terminated(ExitStatus),
}

/// Delivers events to the owning task. Implementations must call it in the order events are
/// produced for that task.
#[derive(Clone)]
pub struct EventSink(Arc<dyn Fn(AllocationEvent) + Send + Sync>);

impl EventSink {
    pub fn new(deliver: impl Fn(AllocationEvent) + Send + Sync + 'static) -> Self {
        Self(Arc::new(deliver))
    }

    pub fn send(&self, event: AllocationEvent) {
        (self.0)(event)
    }
}

impl Debug for EventSink {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str("EventSink")
    }
}

#[derive(Clone, Debug)]
pub struct AllocateRequest {
    pub allocation_id: AllocationId,
    pub task_id: TaskId,
    pub job_id: JobId,
    pub job_submission_time: SystemTime,
    pub label: String,
    pub slots_needed: u32,
    pub resource_pool: String,
    pub fitting_requirements: FittingRequirements,
    pub preemptible: bool,
    pub restore: bool,
    pub events: EventSink,
}

#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub struct AllocationHandle {
    pub allocation_id: AllocationId,
    pub task_id: TaskId,
    pub resource_pool: String,
}

/// What the manager needs to launch the task's container once resources are assigned.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct StartSpec {
    pub image: String,
    pub entrypoint: Vec<String>,
    pub environment: Vec<(String, String)>,
    pub context_directory: Vec<u8>,
}

pub trait ResourceManager: Send + Sync {
    fn allocate(&self, request: AllocateRequest) -> ResourceManagerResult<AllocationHandle>;

    fn start(&self, allocation: &AllocationHandle, spec: StartSpec) -> ResourceManagerResult<()>;

    fn release(&self, allocation: &AllocationHandle);

    fn terminate_task(&self, task_id: &TaskId, forcible: bool) -> ResourceManagerResult<()>;

    fn set_group_priority(
        &self,
        job_id: &JobId,
        resource_pool: &str,
        priority: i32,
    ) -> ResourceManagerResult<()>;

    fn set_group_weight(
        &self,
        job_id: &JobId,
        resource_pool: &str,
        weight: f64,
    ) -> ResourceManagerResult<()>;

    fn smaller_value_is_higher_priority(&self) -> ResourceManagerResult<bool>;

    fn get_job_queue(&self, resource_pool: &str) -> ResourceManagerResult<HashMap<JobId, RmJobInfo>>;

    fn move_job(&self, resource_pool: &str, request: &MoveJob) -> ResourceManagerResult<()>;
}
