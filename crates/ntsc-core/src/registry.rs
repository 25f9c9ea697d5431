use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::broadcast;
use tokio::task::JoinSet;

use crate::actor::ActorHandle;
use crate::command::{
    ApiRequest, ApiResponse, CommandActor, CommandContext, CommandHandle, CommandMessage,
    StopHook,
};
use crate::config::OrchestratorConfig;
use crate::jobs::{JobSource, JobSourceFuture};
use crate::models::{
    CommandDetails, CommandEvent, CommandSpec, CommandSummary, CoreError, CoreErrorKind,
    CoreResult, Job, JobId, JobType, Owner, TaskFilter, TaskId, TaskSnapshot, TaskType,
};
use crate::persistence::{TaskSnapshotStore, run_blocking};
use crate::policy::PriorityPolicy;
use crate::resource_manager::{ResourceManager, ResourceManagerRegistry};
use crate::sqlite::SqliteStore;

const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Every live notebook, tensorboard, shell and command, keyed by task ID. The map lock is only
/// ever held for the map operation itself; all talking to tasks happens after it is released.
#[derive(Clone)]
pub struct TaskRegistry {
    inner: Arc<RegistryInner>,
}

struct RegistryInner {
    tasks: Mutex<HashMap<TaskId, TaskEntry>>,
    context: CommandContext,
    policy: PriorityPolicy,
    default_resource_pool: String,
}

#[derive(Clone)]
struct TaskEntry {
    task_type: TaskType,
    job_id: JobId,
    owner: Owner,
    workspace_id: i32,
    handle: CommandHandle,
}

impl TaskEntry {
    /// Captures the immutable facts the registry filters on, before the actor is spawned.
    fn describe(actor: &CommandActor) -> impl FnOnce(CommandHandle) -> Self + use<> {
        let task_type = actor.task_type();
        let job_id = actor.job_id().clone();
        let owner = actor.spec().owner.clone();
        let workspace_id = actor.spec().metadata.workspace_id;
        move |handle| Self {
            task_type,
            job_id,
            owner,
            workspace_id,
            handle,
        }
    }
}

impl RegistryInner {
    fn lock_tasks(&self) -> CoreResult<MutexGuard<'_, HashMap<TaskId, TaskEntry>>> {
        self.tasks
            .lock()
            .map_err(|_| CoreError::internal("task registry mutex poisoned"))
    }

    fn remove(&self, task_id: &TaskId) -> bool {
        match self.lock_tasks() {
            Ok(mut tasks) => tasks.remove(task_id).is_some(),
            Err(error) => {
                tracing::error!(
                    task_id = %task_id,
                    kind = ?error.kind,
                    message = %error.message,
                    "failed to unregister task"
                );
                false
            }
        }
    }
}

impl TaskRegistry {
    pub fn new(
        rm: Arc<dyn ResourceManager>,
        store: Option<Arc<dyn TaskSnapshotStore>>,
        config: &OrchestratorConfig,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            inner: Arc::new(RegistryInner {
                tasks: Mutex::new(HashMap::new()),
                context: CommandContext {
                    rm,
                    store,
                    events,
                    terminated_retention: config.terminated_retention,
                },
                policy: PriorityPolicy::new(config.priority_limit),
                default_resource_pool: config.default_resource_pool.clone(),
            }),
        }
    }

    /// Builds the configured resource manager and, when a database path is set, a migrated
    /// SQLite snapshot store.
    pub fn from_config(
        config: &OrchestratorConfig,
        resource_managers: &ResourceManagerRegistry,
    ) -> CoreResult<Self> {
        let rm = resource_managers.build(config)?;
        let store = match &config.database_path {
            Some(path) => {
                let store = SqliteStore::new(path);
                store.migrate_to_latest()?;
                Some(Arc::new(store) as Arc<dyn TaskSnapshotStore>)
            }
            None => None,
        };
        Ok(Self::new(rm, store, config))
    }

    pub fn resource_manager(&self) -> Arc<dyn ResourceManager> {
        self.inner.context.rm.clone()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<CommandEvent> {
        self.inner.context.events.subscribe()
    }

    pub fn len(&self) -> CoreResult<usize> {
        Ok(self.inner.lock_tasks()?.len())
    }

    pub fn is_empty(&self) -> CoreResult<bool> {
        Ok(self.inner.lock_tasks()?.is_empty())
    }

    /// Registers a new task and launches it. The task is unregistered again if the launch
    /// fails.
    pub async fn create(
        &self,
        task_type: TaskType,
        job_type: JobType,
        mut spec: CommandSpec,
    ) -> CoreResult<CommandSummary> {
        if spec.resources.resource_pool.is_empty() {
            spec.resources.resource_pool = self.inner.default_resource_pool.clone();
        }
        if let Some(priority) = spec.resources.priority {
            self.inner
                .policy
                .check(self.inner.context.rm.as_ref(), priority)
                .map_err(|error| CoreError {
                    task_type: Some(task_type),
                    ..error
                })?;
        }

        let actor = CommandActor::new(
            task_type,
            job_type,
            spec,
            self.inner.context.clone(),
            self.stop_hook(),
        )?;
        let task_id = actor.task_id().clone();
        let entry = TaskEntry::describe(&actor);

        let handle = ActorHandle::spawn(actor);
        self.inner
            .lock_tasks()?
            .insert(task_id.clone(), entry(handle.clone()));

        let launched = handle
            .ask(|reply| CommandMessage::Launch { reply })
            .await
            .and_then(|result| result);
        match launched {
            Ok(summary) => {
                tracing::info!(
                    task_id = %task_id,
                    job_id = %summary.job_id,
                    task_type = task_type.as_str(),
                    owner = %summary.owner.username,
                    "task created"
                );
                Ok(summary)
            }
            Err(error) => {
                self.unregister(&task_id);
                Err(error.attributed(&task_id, task_type))
            }
        }
    }

    /// Re-attaches every persisted task that never ended. Tasks that are already tracked are
    /// left alone, so running this again is harmless. Returns the IDs that were restored.
    pub async fn restore_all(&self) -> CoreResult<Vec<TaskId>> {
        let Some(store) = self.inner.context.store.clone() else {
            return Ok(Vec::new());
        };
        let snapshots = run_blocking(store.clone(), |store| store.list_unfinished_snapshots()).await?;

        let mut restored = Vec::new();
        for snapshot in snapshots {
            let task_id = snapshot.task_id.clone();
            if self.inner.lock_tasks()?.contains_key(&task_id) {
                continue;
            }
            match self.restore_one(store.clone(), snapshot).await {
                Ok(()) => restored.push(task_id),
                Err(error) => {
                    tracing::warn!(
                        task_id = %task_id,
                        kind = ?error.kind,
                        message = %error.message,
                        "failed to restore task"
                    );
                }
            }
        }
        Ok(restored)
    }

    async fn restore_one(
        &self,
        store: Arc<dyn TaskSnapshotStore>,
        snapshot: TaskSnapshot,
    ) -> CoreResult<()> {
        let task_id = snapshot.task_id.clone();
        let task_type = snapshot.task_type;
        let lookup_id = task_id.clone();
        let context_directory =
            run_blocking(store, move |store| store.load_context_directory(&lookup_id)).await?;

        let actor = CommandActor::restore(
            snapshot,
            context_directory,
            self.inner.context.clone(),
            self.stop_hook(),
        )?;
        let entry = TaskEntry::describe(&actor);
        let handle = ActorHandle::spawn(actor);
        self.inner
            .lock_tasks()?
            .insert(task_id.clone(), entry(handle.clone()));

        let launched = handle
            .ask(|reply| CommandMessage::Launch { reply })
            .await
            .and_then(|result| result);
        if let Err(error) = launched {
            self.unregister(&task_id);
            return Err(error);
        }
        tracing::info!(
            task_id = %task_id,
            task_type = task_type.as_str(),
            "task restored"
        );
        Ok(())
    }

    /// Summary plus launch spec of one task. Not finding the task and finding it under
    /// another type are reported as different error kinds.
    pub async fn get(&self, task_id: &TaskId, task_type: TaskType) -> CoreResult<CommandDetails> {
        match self.api(task_id, task_type, ApiRequest::Get).await? {
            ApiResponse::Details(details) => Ok(*details),
            ApiResponse::Summary(_) => Err(unexpected_response(task_id, task_type)),
        }
    }

    pub async fn list_by_type(
        &self,
        task_type: TaskType,
        filter: &TaskFilter,
    ) -> CoreResult<Vec<CommandSummary>> {
        let handles: Vec<CommandHandle> = {
            let tasks = self.inner.lock_tasks()?;
            tasks
                .values()
                .filter(|entry| entry.task_type == task_type)
                .filter(|entry| filter.matches_owner(&entry.owner))
                .filter(|entry| filter.matches_workspace(entry.workspace_id))
                .map(|entry| entry.handle.clone())
                .collect()
        };

        let mut asks = JoinSet::new();
        for handle in handles {
            let filter = filter.clone();
            asks.spawn(async move {
                handle
                    .ask(|reply| CommandMessage::GetSummary { filter, reply })
                    .await
            });
        }

        let mut summaries = Vec::new();
        while let Some(joined) = asks.join_next().await {
            // Tasks that stopped in the meantime are simply left out.
            if let Ok(Ok(Some(summary))) = joined {
                summaries.push(summary);
            }
        }
        summaries.sort_by(|left, right| {
            left.registered_time
                .cmp(&right.registered_time)
                .then_with(|| left.task_id.cmp(&right.task_id))
        });
        Ok(summaries)
    }

    pub async fn kill(&self, task_id: &TaskId, task_type: TaskType) -> CoreResult<CommandSummary> {
        self.summary_api(task_id, task_type, ApiRequest::Kill).await
    }

    pub async fn set_priority(
        &self,
        task_id: &TaskId,
        task_type: TaskType,
        priority: i32,
    ) -> CoreResult<CommandSummary> {
        self.check_priority(task_id, task_type, priority)?;
        self.summary_api(task_id, task_type, ApiRequest::SetPriority(priority))
            .await
    }

    pub async fn set_weight(
        &self,
        task_id: &TaskId,
        task_type: TaskType,
        weight: f64,
    ) -> CoreResult<CommandSummary> {
        self.summary_api(task_id, task_type, ApiRequest::SetWeight(weight))
            .await
    }

    pub async fn set_resource_pool(
        &self,
        task_id: &TaskId,
        task_type: TaskType,
        resource_pool: impl Into<String>,
    ) -> CoreResult<CommandSummary> {
        self.summary_api(
            task_id,
            task_type,
            ApiRequest::SetResourcePool(resource_pool.into()),
        )
        .await
    }

    /// Kills every task in `workspace_id`. Failures are logged and do not stop the sweep.
    /// Returns how many tasks acknowledged the kill.
    pub async fn delete_workspace_tasks(&self, workspace_id: i32) -> CoreResult<usize> {
        let targets: Vec<(TaskId, TaskType)> = {
            let tasks = self.inner.lock_tasks()?;
            tasks
                .iter()
                .filter(|(_, entry)| entry.workspace_id == workspace_id)
                .map(|(task_id, entry)| (task_id.clone(), entry.task_type))
                .collect()
        };

        let mut killed = 0;
        for (task_id, task_type) in targets {
            match self.kill(&task_id, task_type).await {
                Ok(_) => killed += 1,
                Err(error) => {
                    tracing::warn!(
                        task_id = %task_id,
                        task_type = task_type.as_str(),
                        workspace_id,
                        kind = ?error.kind,
                        message = %error.message,
                        "failed to kill task while deleting workspace"
                    );
                }
            }
        }
        Ok(killed)
    }

    pub fn unregister(&self, task_id: &TaskId) -> bool {
        self.inner.remove(task_id)
    }

    fn stop_hook(&self) -> StopHook {
        let registry = Arc::downgrade(&self.inner);
        Box::new(move |task_id| {
            if let Some(inner) = registry.upgrade() {
                inner.remove(task_id);
            }
        })
    }

    fn check_priority(&self, task_id: &TaskId, task_type: TaskType, priority: i32) -> CoreResult<()> {
        self.inner
            .policy
            .check(self.inner.context.rm.as_ref(), priority)
            .map_err(|error| error.attributed(task_id, task_type))
    }

    fn entry(&self, task_id: &TaskId, task_type: TaskType) -> CoreResult<TaskEntry> {
        let tasks = self.inner.lock_tasks()?;
        let entry = tasks
            .get(task_id)
            .ok_or_else(|| CoreError::not_found(task_id))?;
        if entry.task_type != task_type {
            return Err(CoreError::for_task(
                task_id,
                Some(entry.task_type),
                CoreErrorKind::TypeMismatch,
                format!(
                    "task '{task_id}' is a {}, not a {}",
                    entry.task_type.as_str(),
                    task_type.as_str()
                ),
            ));
        }
        Ok(entry.clone())
    }

    async fn api(
        &self,
        task_id: &TaskId,
        task_type: TaskType,
        request: ApiRequest,
    ) -> CoreResult<ApiResponse> {
        let entry = self.entry(task_id, task_type)?;
        entry
            .handle
            .ask(|reply| CommandMessage::Api { request, reply })
            .await
            // The task stopped between the lookup and the ask.
            .map_err(|_| CoreError::not_found(task_id))?
            .map_err(|error| error.attributed(task_id, task_type))
    }

    async fn summary_api(
        &self,
        task_id: &TaskId,
        task_type: TaskType,
        request: ApiRequest,
    ) -> CoreResult<CommandSummary> {
        match self.api(task_id, task_type, request).await? {
            ApiResponse::Summary(summary) => Ok(summary),
            ApiResponse::Details(details) => Ok(details.summary),
        }
    }
}

impl JobSource for TaskRegistry {
    fn jobs(&self) -> JobSourceFuture<'_, Vec<Job>> {
        Box::pin(async move {
            let handles: Vec<CommandHandle> = {
                let tasks = self.inner.lock_tasks()?;
                tasks.values().map(|entry| entry.handle.clone()).collect()
            };

            let mut asks = JoinSet::new();
            for handle in handles {
                asks.spawn(async move { handle.ask(|reply| CommandMessage::GetJob { reply }).await });
            }

            let mut jobs = Vec::new();
            while let Some(joined) = asks.join_next().await {
                if let Ok(Ok(job)) = joined {
                    jobs.push(job);
                }
            }
            Ok(jobs)
        })
    }

    fn set_job_priority(&self, job_id: JobId, priority: i32) -> JobSourceFuture<'_, Option<Job>> {
        Box::pin(async move {
            let owned = {
                let tasks = self.inner.lock_tasks()?;
                tasks
                    .iter()
                    .find(|(_, entry)| entry.job_id == job_id)
                    .map(|(task_id, entry)| (task_id.clone(), entry.task_type, entry.handle.clone()))
            };
            let Some((task_id, task_type, handle)) = owned else {
                return Ok(None);
            };

            self.set_priority(&task_id, task_type, priority).await?;
            let job = handle
                .ask(|reply| CommandMessage::GetJob { reply })
                .await
                .map_err(|_| CoreError::not_found(&task_id))?;
            Ok(Some(job))
        })
    }
}

fn unexpected_response(task_id: &TaskId, task_type: TaskType) -> CoreError {
    CoreError::for_task(
        task_id,
        Some(task_type),
        CoreErrorKind::Internal,
        "task answered with an unexpected response",
    )
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::TaskRegistry;
    use crate::config::OrchestratorConfig;
    use crate::models::CoreErrorKind;
    use crate::resource_manager::InMemoryResourceManager;

    #[test]
    fn poisoned_task_map_is_reported_not_hidden() {
        let registry = TaskRegistry::new(
            Arc::new(InMemoryResourceManager::new(["default"])),
            None,
            &OrchestratorConfig::default(),
        );
        assert_eq!(registry.len().unwrap(), 0);

        let poisoner = registry.clone();
        let _ = std::thread::spawn(move || {
            let _tasks = poisoner.inner.tasks.lock().unwrap();
            panic!("poison the task map");
        })
        .join();

        assert_eq!(registry.len().unwrap_err().kind, CoreErrorKind::Internal);
        assert_eq!(
            registry.is_empty().unwrap_err().kind,
            CoreErrorKind::Internal
        );
    }
}
