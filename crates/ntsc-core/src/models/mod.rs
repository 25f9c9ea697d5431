pub mod command;
pub mod error;
pub mod job;
pub mod task;

pub use command::{
    CommandDetails, CommandEvent, CommandMetadata, CommandSpec, CommandSummary, TaskFilter,
    TaskSnapshot,
};
pub use error::{CoreError, CoreErrorKind, CoreResult};
pub use job::{
    DEFAULT_JOB_PRIORITY, Job, JobSummary, MoveJob, QueueAnchor, RmJobInfo, SchedulingState,
    SetJobPriority,
};
pub use task::{
    Address, AllocationId, ExitStatus, JobId, JobType, LifecycleState, Owner, ResourcesConfig,
    TaskId, TaskState, TaskType,
};
