//! One actor per notebook, tensorboard, shell or command. The actor owns the task's state and
//! is the only thing that talks to the resource manager about it.

pub mod actor;
pub mod state;

pub use actor::{CommandActor, CommandContext, StopHook};
pub use state::{CommandState, StateChange};

use tokio::sync::oneshot;

use crate::actor::ActorHandle;
use crate::models::{CommandDetails, CommandSummary, CoreResult, Job, TaskFilter};
use crate::resource_manager::AllocationEvent;

pub type CommandHandle = ActorHandle<CommandActor>;

#[derive(Clone, Debug, PartialEq)]
pub enum ApiRequest {
    Get,
    Kill,
    SetPriority(i32),
    SetWeight(f64),
    SetResourcePool(String),
}

#[derive(Clone, Debug, PartialEq)]
pub enum ApiResponse {
    Details(Box<CommandDetails>),
    Summary(CommandSummary),
}

pub enum CommandMessage {
    /// Persists the task and requests its allocation. Replies once the request is accepted.
    Launch {
        reply: oneshot::Sender<CoreResult<CommandSummary>>,
    },
    Allocation(AllocationEvent),
    /// Replies `None` when the task's owner is filtered out.
    GetSummary {
        filter: TaskFilter,
        reply: oneshot::Sender<Option<CommandSummary>>,
    },
    Api {
        request: ApiRequest,
        reply: oneshot::Sender<CoreResult<ApiResponse>>,
    },
    GetJob {
        reply: oneshot::Sender<Job>,
    },
    /// Sent by the task to itself once its retention period after termination has elapsed.
    TerminateForGc,
}
