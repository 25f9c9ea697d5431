use std::sync::Arc;
use std::time::{Duration, SystemTime};

use tokio::sync::broadcast;

use crate::actor::{Actor, ActorAction, ActorHandle};
use crate::command::state::CommandState;
use crate::command::{ApiRequest, ApiResponse, CommandMessage};
use crate::models::{
    AllocationId, CommandDetails, CommandEvent, CommandSpec, CommandSummary, CoreError,
    CoreErrorKind, CoreResult, DEFAULT_JOB_PRIORITY, ExitStatus, Job, JobId, JobType, TaskId,
    TaskSnapshot, TaskType,
};
use crate::persistence::{TaskSnapshotStore, run_blocking};
use crate::readiness::ReadinessChecks;
use crate::resource_manager::{
    AllocateRequest, AllocationEvent, AllocationHandle, ContainerState, EventSink,
    FittingRequirements, ResourceManager, ResourceManagerError, StartSpec,
};

/// Called once when a task tears itself down.
pub type StopHook = Box<dyn FnOnce(&TaskId) + Send + Sync>;

/// Collaborators shared by every task of one registry.
#[derive(Clone)]
pub struct CommandContext {
    pub rm: Arc<dyn ResourceManager>,
    pub store: Option<Arc<dyn TaskSnapshotStore>>,
    pub events: broadcast::Sender<CommandEvent>,
    pub terminated_retention: Duration,
}

pub struct CommandActor {
    task_id: TaskId,
    task_type: TaskType,
    job_id: JobId,
    job_type: JobType,
    registered_time: SystemTime,
    allocation_id: AllocationId,
    spec: CommandSpec,
    state: CommandState,
    allocation: Option<AllocationHandle>,
    restored: bool,
    gc_scheduled: bool,
    context: CommandContext,
    on_stop: Option<StopHook>,
}

impl CommandActor {
    pub fn new(
        task_type: TaskType,
        job_type: JobType,
        spec: CommandSpec,
        context: CommandContext,
        on_stop: StopHook,
    ) -> CoreResult<Self> {
        let task_id = TaskId::generate();
        Ok(Self {
            allocation_id: AllocationId::first_for(&task_id),
            task_id,
            task_type,
            job_id: JobId::generate(),
            job_type,
            registered_time: SystemTime::now(),
            spec,
            state: CommandState::new(ReadinessChecks::for_task_type(task_type)?),
            allocation: None,
            restored: false,
            gc_scheduled: false,
            context,
            on_stop: Some(on_stop),
        })
    }

    /// Rebuilds a task from its persisted snapshot. Launching it re-attaches to the resource
    /// manager instead of persisting again.
    pub fn restore(
        snapshot: TaskSnapshot,
        context_directory: Option<Vec<u8>>,
        context: CommandContext,
        on_stop: StopHook,
    ) -> CoreResult<Self> {
        let mut spec = snapshot.spec;
        spec.context_directory = context_directory.unwrap_or_default();
        Ok(Self {
            task_id: snapshot.task_id,
            task_type: snapshot.task_type,
            job_id: snapshot.job_id,
            job_type: snapshot.job_type,
            registered_time: snapshot.registered_time,
            allocation_id: snapshot.allocation_id,
            spec,
            state: CommandState::new(ReadinessChecks::for_task_type(snapshot.task_type)?),
            allocation: None,
            restored: true,
            gc_scheduled: false,
            context,
            on_stop: Some(on_stop),
        })
    }

    pub fn task_id(&self) -> &TaskId {
        &self.task_id
    }

    pub fn job_id(&self) -> &JobId {
        &self.job_id
    }

    pub fn task_type(&self) -> TaskType {
        self.task_type
    }

    pub fn spec(&self) -> &CommandSpec {
        &self.spec
    }

    fn summary(&self) -> CommandSummary {
        CommandSummary {
            task_id: self.task_id.clone(),
            job_id: self.job_id.clone(),
            task_type: self.task_type,
            owner: self.spec.owner.clone(),
            description: self.spec.description.clone(),
            registered_time: self.registered_time,
            state: self.state.lifecycle().user_facing(),
            lifecycle: self.state.lifecycle(),
            service_address: format!("/proxy/{}/", self.task_id),
            addresses: self.state.addresses().to_vec(),
            exit_status: self.state.exit_status().cloned(),
            ready: self.state.is_ready(),
            resources: self.spec.resources.clone(),
            metadata: self.spec.metadata.clone(),
        }
    }

    fn job(&self) -> Job {
        Job {
            job_id: self.job_id.clone(),
            job_type: self.job_type,
            name: self.spec.description.clone(),
            username: self.spec.owner.username.clone(),
            user_id: self.spec.owner.id,
            resource_pool: self.spec.resources.resource_pool.clone(),
            submission_time: self.registered_time,
            priority: self.spec.resources.priority.unwrap_or(DEFAULT_JOB_PRIORITY),
            weight: self.spec.resources.weight,
            summary: None,
            requested_slots: self.spec.resources.slots,
            allocated_slots: 0,
        }
    }

    fn snapshot(&self) -> TaskSnapshot {
        TaskSnapshot {
            task_id: self.task_id.clone(),
            task_type: self.task_type,
            job_id: self.job_id.clone(),
            job_type: self.job_type,
            registered_time: self.registered_time,
            allocation_id: self.allocation_id.clone(),
            spec: self.spec.clone(),
        }
    }

    fn error(&self, kind: CoreErrorKind, message: impl Into<String>) -> CoreError {
        CoreError::for_task(&self.task_id, Some(self.task_type), kind, message)
    }

    fn attribute(&self, error: impl Into<CoreError>) -> CoreError {
        error.into().attributed(&self.task_id, self.task_type)
    }

    async fn launch(&mut self, handle: &ActorHandle<Self>) -> CoreResult<()> {
        if !self.restored {
            self.persist_launch().await?;
        }
        // Restored tasks send their priority again too.
        if let Some(priority) = self.spec.resources.priority {
            self.forward_priority(priority)?;
        }

        let events_handle = handle.clone();
        let events = EventSink::new(move |event| {
            // The task may already be gone; late events have nobody left to inform.
            let _ = events_handle.tell(CommandMessage::Allocation(event));
        });
        let request = AllocateRequest {
            allocation_id: self.allocation_id.clone(),
            task_id: self.task_id.clone(),
            job_id: self.job_id.clone(),
            job_submission_time: self.registered_time,
            label: format!("{} {}", self.task_type.as_str(), self.task_id),
            slots_needed: self.spec.resources.slots,
            resource_pool: self.spec.resources.resource_pool.clone(),
            fitting_requirements: FittingRequirements { single_agent: true },
            preemptible: self.spec.preemptible,
            restore: self.restored,
            events,
        };

        let allocation = self
            .context
            .rm
            .allocate(request)
            .map_err(|error| self.attribute(error))?;
        tracing::info!(
            task_id = %self.task_id,
            job_id = %self.job_id,
            task_type = self.task_type.as_str(),
            allocation_id = %allocation.allocation_id,
            restored = self.restored,
            "requested allocation for task"
        );
        self.allocation = Some(allocation);
        Ok(())
    }

    async fn persist_launch(&self) -> CoreResult<()> {
        let Some(store) = self.context.store.clone() else {
            return Ok(());
        };
        let snapshot = self.snapshot();
        run_blocking(store.clone(), move |store| store.upsert_snapshot(&snapshot))
            .await
            .map_err(|error| self.attribute(error))?;

        if !self.spec.context_directory.is_empty() {
            let task_id = self.task_id.clone();
            let contents = self.spec.context_directory.clone();
            run_blocking(store, move |store| {
                store.save_context_directory(&task_id, &contents)
            })
            .await
            .map_err(|error| self.attribute(error))?;
        }
        Ok(())
    }

    fn forward_priority(&self, priority: i32) -> CoreResult<()> {
        let result = self.context.rm.set_group_priority(
            &self.job_id,
            &self.spec.resources.resource_pool,
            priority,
        );
        self.tolerate_unsupported(result, "priority")
    }

    fn tolerate_unsupported(
        &self,
        result: Result<(), ResourceManagerError>,
        setting: &str,
    ) -> CoreResult<()> {
        match result {
            Ok(()) => Ok(()),
            Err(ResourceManagerError::Unsupported(message)) => {
                tracing::debug!(
                    task_id = %self.task_id,
                    job_id = %self.job_id,
                    setting,
                    message = %message,
                    "resource manager does not support group setting; keeping it locally"
                );
                Ok(())
            }
            Err(error) => Err(self.attribute(error)),
        }
    }

    async fn handle_allocation_event(
        &mut self,
        event: AllocationEvent,
        handle: &ActorHandle<Self>,
    ) {
        let change = self.state.apply(&event);
        if !change.changed {
            return;
        }
        if event == AllocationEvent::Assigned {
            self.start_container();
        }

        self.broadcast();
        if change.became_ready {
            tracing::info!(
                task_id = %self.task_id,
                task_type = self.task_type.as_str(),
                "task service is ready"
            );
        }
        if self.state.lifecycle().is_terminal() {
            self.on_terminated(handle).await;
        }
    }

    fn start_container(&mut self) {
        let Some(allocation) = self.allocation.clone() else {
            return;
        };
        let spec = StartSpec {
            image: self.spec.image.clone(),
            entrypoint: self.spec.entrypoint.clone(),
            environment: self.spec.environment.clone(),
            context_directory: std::mem::take(&mut self.spec.context_directory),
        };
        if let Err(error) = self.context.rm.start(&allocation, spec) {
            tracing::error!(
                task_id = %self.task_id,
                task_type = self.task_type.as_str(),
                message = %error,
                "failed to start task container"
            );
            self.state
                .apply(&AllocationEvent::ContainerStateChanged(ContainerState::Terminated(
                    ExitStatus::failed(format!("failed to start container: {error}")),
                )));
        }
    }

    async fn on_terminated(&mut self, handle: &ActorHandle<Self>) {
        let exit_status = self
            .state
            .exit_status()
            .map(ToString::to_string)
            .unwrap_or_default();
        tracing::info!(
            task_id = %self.task_id,
            task_type = self.task_type.as_str(),
            exit_status = %exit_status,
            "task terminated"
        );

        self.release_allocation();
        self.mark_ended().await;

        if self.gc_scheduled {
            return;
        }
        self.gc_scheduled = true;
        let handle = handle.clone();
        let retention = self.context.terminated_retention;
        tokio::spawn(async move {
            tokio::time::sleep(retention).await;
            let _ = handle.tell(CommandMessage::TerminateForGc);
        });
    }

    async fn mark_ended(&self) {
        let Some(store) = self.context.store.clone() else {
            return;
        };
        let task_id = self.task_id.clone();
        if let Err(error) = run_blocking(store, move |store| {
            store.mark_task_ended(&task_id, SystemTime::now())
        })
        .await
        {
            tracing::error!(
                task_id = %self.task_id,
                task_type = self.task_type.as_str(),
                kind = ?error.kind,
                message = %error.message,
                "failed to mark task ended"
            );
        }
    }

    async fn handle_api_request(&mut self, request: ApiRequest) -> CoreResult<ApiResponse> {
        match request {
            ApiRequest::Get => Ok(ApiResponse::Details(Box::new(CommandDetails {
                summary: self.summary(),
                spec: self.spec.clone(),
            }))),
            ApiRequest::Kill => {
                self.kill().await?;
                Ok(ApiResponse::Summary(self.summary()))
            }
            ApiRequest::SetPriority(priority) => {
                self.forward_priority(priority)?;
                self.spec.resources.priority = Some(priority);
                Ok(ApiResponse::Summary(self.summary()))
            }
            ApiRequest::SetWeight(weight) => {
                if !(weight.is_finite() && weight > 0.0) {
                    return Err(self.error(
                        CoreErrorKind::InvalidInput,
                        format!("weight must be a positive number, got {weight}"),
                    ));
                }
                let result = self.context.rm.set_group_weight(
                    &self.job_id,
                    &self.spec.resources.resource_pool,
                    weight,
                );
                self.tolerate_unsupported(result, "weight")?;
                self.spec.resources.weight = weight;
                Ok(ApiResponse::Summary(self.summary()))
            }
            ApiRequest::SetResourcePool(resource_pool) => Err(self.error(
                CoreErrorKind::Unsupported,
                format!(
                    "cannot move a launched task from resource pool '{}' to '{resource_pool}'",
                    self.spec.resources.resource_pool
                ),
            )),
        }
    }

    /// Asks the resource manager to kill the task and waits for its acknowledgement. The task
    /// becomes terminated only once the manager reports it.
    async fn kill(&self) -> CoreResult<()> {
        if self.state.lifecycle().is_terminal() {
            return Ok(());
        }
        let rm = self.context.rm.clone();
        let task_id = self.task_id.clone();
        tokio::task::spawn_blocking(move || rm.terminate_task(&task_id, true))
            .await
            .map_err(|join_error| {
                self.error(
                    CoreErrorKind::Internal,
                    format!("terminate request join failure: {join_error}"),
                )
            })?
            .map_err(|error| self.attribute(error))?;
        tracing::info!(
            task_id = %self.task_id,
            task_type = self.task_type.as_str(),
            "resource manager acknowledged kill request"
        );
        Ok(())
    }

    fn broadcast(&self) {
        // No subscribers is fine.
        let _ = self.context.events.send(CommandEvent {
            task_id: self.task_id.clone(),
            task_type: self.task_type,
            state: self.state.lifecycle(),
            ready: self.state.is_ready(),
        });
    }

    fn release_allocation(&mut self) {
        if let Some(allocation) = self.allocation.take() {
            self.context.rm.release(&allocation);
        }
    }

    async fn teardown(&mut self) {
        self.release_allocation();
        if self.state.exit_status().is_none() {
            self.mark_ended().await;
        }
        if let Some(on_stop) = self.on_stop.take() {
            on_stop(&self.task_id);
        }
        tracing::debug!(
            task_id = %self.task_id,
            task_type = self.task_type.as_str(),
            "task torn down"
        );
    }
}

impl Actor for CommandActor {
    type Message = CommandMessage;

    fn start(&mut self, _: &ActorHandle<Self>) {
        tracing::debug!(
            task_id = %self.task_id,
            task_type = self.task_type.as_str(),
            restored = self.restored,
            "task actor started"
        );
    }

    async fn receive(&mut self, message: Self::Message, handle: &ActorHandle<Self>) -> ActorAction {
        match message {
            CommandMessage::Launch { reply } => match self.launch(handle).await {
                Ok(()) => {
                    let _ = reply.send(Ok(self.summary()));
                    ActorAction::Continue
                }
                Err(error) => {
                    tracing::error!(
                        task_id = %self.task_id,
                        task_type = self.task_type.as_str(),
                        kind = ?error.kind,
                        message = %error.message,
                        "failed to launch task"
                    );
                    let _ = reply.send(Err(error));
                    self.teardown().await;
                    ActorAction::Stop
                }
            },
            CommandMessage::Allocation(event) => {
                self.handle_allocation_event(event, handle).await;
                ActorAction::Continue
            }
            CommandMessage::GetSummary { filter, reply } => {
                let summary = filter
                    .matches_owner(&self.spec.owner)
                    .then(|| self.summary());
                let _ = reply.send(summary);
                ActorAction::Continue
            }
            CommandMessage::Api { request, reply } => {
                let _ = reply.send(self.handle_api_request(request).await);
                ActorAction::Continue
            }
            CommandMessage::GetJob { reply } => {
                let _ = reply.send(self.job());
                ActorAction::Continue
            }
            CommandMessage::TerminateForGc => {
                self.teardown().await;
                ActorAction::Stop
            }
        }
    }

    fn stop(self) {}
}
