use std::sync::Arc;
use std::time::SystemTime;

use crate::models::{CoreError, CoreErrorKind, TaskId, TaskSnapshot};

pub type PersistenceResult<T> = Result<T, CoreError>;

pub trait MigrationStore: Send + Sync {
    fn current_version(&self) -> PersistenceResult<i64>;

    fn apply_migration(&self, target_version: i64) -> PersistenceResult<()>;
}

pub trait TaskSnapshotStore: Send + Sync {
    fn upsert_snapshot(&self, snapshot: &TaskSnapshot) -> PersistenceResult<()>;

    /// Snapshots of tasks that were never marked ended, oldest registration first.
    fn list_unfinished_snapshots(&self) -> PersistenceResult<Vec<TaskSnapshot>>;

    fn mark_task_ended(&self, task_id: &TaskId, ended_at: SystemTime) -> PersistenceResult<()>;

    fn save_context_directory(&self, task_id: &TaskId, contents: &[u8]) -> PersistenceResult<()>;

    fn load_context_directory(&self, task_id: &TaskId) -> PersistenceResult<Option<Vec<u8>>>;
}

/// Runs a blocking store call off the async executor.
pub async fn run_blocking<T, F>(
    store: Arc<dyn TaskSnapshotStore>,
    operation: F,
) -> PersistenceResult<T>
where
    T: Send + 'static,
    F: FnOnce(&dyn TaskSnapshotStore) -> PersistenceResult<T> + Send + 'static,
{
    tokio::task::spawn_blocking(move || operation(store.as_ref()))
        .await
        .map_err(|join_error| {
            CoreError::new(
                CoreErrorKind::Internal,
                format!("task persistence join failure: {join_error}"),
            )
        })?
}
