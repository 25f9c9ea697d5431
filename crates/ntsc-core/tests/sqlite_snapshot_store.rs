use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use ntsc_core::config::OrchestratorConfig;
use ntsc_core::models::{
    AllocationId, CommandSpec, CoreErrorKind, JobId, JobType, LifecycleState, Owner, TaskId,
    TaskSnapshot, TaskType,
};
use ntsc_core::persistence::{MigrationStore, TaskSnapshotStore};
use ntsc_core::registry::TaskRegistry;
use ntsc_core::resource_manager::InMemoryResourceManager;
use ntsc_core::sqlite::{SqliteStore, current_schema_version};

fn test_db_path(test_name: &str) -> PathBuf {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock before unix epoch")
        .as_nanos();
    std::env::temp_dir().join(format!("ntsc-{test_name}-{nanos}.sqlite3"))
}

fn spec(image: &str) -> CommandSpec {
    CommandSpec::new(
        Owner {
            id: 4,
            username: "lin".to_string(),
            display_name: None,
        },
        image,
        vec!["serve".to_string()],
    )
}

fn snapshot(task_id: &str, registered_secs: u64) -> TaskSnapshot {
    let task_id = TaskId::from(task_id);
    TaskSnapshot {
        allocation_id: AllocationId::first_for(&task_id),
        task_id,
        task_type: TaskType::Notebook,
        job_id: JobId::generate(),
        job_type: JobType::Notebook,
        registered_time: UNIX_EPOCH + Duration::from_secs(registered_secs),
        spec: spec("notebook-image"),
    }
}

#[test]
fn migrations_reach_latest_and_reject_unknown_targets() {
    let path = test_db_path("migrations");
    let store = SqliteStore::new(&path);
    assert_eq!(store.current_version().unwrap(), 0);
    assert_eq!(store.planned_migrations(0).len() as i64, current_schema_version());

    store.migrate_to_latest().unwrap();
    assert_eq!(store.current_version().unwrap(), current_schema_version());
    assert!(store.planned_migrations(current_schema_version()).is_empty());

    let error = store
        .apply_migration(current_schema_version() + 1)
        .unwrap_err();
    assert_eq!(error.kind, CoreErrorKind::StorageFailure);

    store.apply_migration(0).unwrap();
    assert_eq!(store.current_version().unwrap(), 0);

    let _ = std::fs::remove_file(path);
}

#[test]
fn ended_tasks_drop_out_of_unfinished_listing() {
    let path = test_db_path("snapshots");
    let store = SqliteStore::new(&path);
    store.migrate_to_latest().unwrap();

    let later = snapshot("task-later", 200);
    let earlier = snapshot("task-earlier", 100);
    store.upsert_snapshot(&later).unwrap();
    store.upsert_snapshot(&earlier).unwrap();

    let listed = store.list_unfinished_snapshots().unwrap();
    assert_eq!(listed, vec![earlier.clone(), later.clone()]);

    store
        .mark_task_ended(&earlier.task_id, SystemTime::now())
        .unwrap();
    // Re-saving an ended task must not bring it back.
    store.upsert_snapshot(&earlier).unwrap();

    let listed = store.list_unfinished_snapshots().unwrap();
    assert_eq!(listed, vec![later]);

    let _ = std::fs::remove_file(path);
}

#[test]
fn context_directory_is_stored_beside_the_snapshot() {
    let path = test_db_path("context-directory");
    let store = SqliteStore::new(&path);
    store.migrate_to_latest().unwrap();
    let task_id = TaskId::from("task-with-context");

    assert_eq!(store.load_context_directory(&task_id).unwrap(), None);
    store.save_context_directory(&task_id, &[1, 2, 3]).unwrap();
    store.save_context_directory(&task_id, &[4, 5]).unwrap();
    assert_eq!(
        store.load_context_directory(&task_id).unwrap(),
        Some(vec![4, 5])
    );

    let _ = std::fs::remove_file(path);
}

#[test]
fn unmigrated_store_refuses_snapshot_writes() {
    let path = test_db_path("unmigrated");
    let store = SqliteStore::new(&path);

    let error = store.upsert_snapshot(&snapshot("task", 1)).unwrap_err();
    assert_eq!(error.kind, CoreErrorKind::StorageFailure);

    let _ = std::fs::remove_file(path);
}

#[tokio::test]
async fn registry_restores_unfinished_tasks_after_restart() {
    let path = test_db_path("restore");
    let store = Arc::new(SqliteStore::new(&path));
    store.migrate_to_latest().unwrap();

    let first_rm = Arc::new(InMemoryResourceManager::new(["default"]));
    let first = TaskRegistry::new(
        first_rm,
        Some(store.clone()),
        &OrchestratorConfig::default(),
    );
    let mut survivor_spec = spec("survivor");
    survivor_spec.context_directory = vec![9, 9, 9];
    survivor_spec.resources.priority = Some(5);
    let survivor = first
        .create(TaskType::Notebook, JobType::Notebook, survivor_spec)
        .await
        .unwrap();
    let killed = first
        .create(TaskType::Shell, JobType::Shell, spec("killed"))
        .await
        .unwrap();

    first.kill(&killed.task_id, TaskType::Shell).await.unwrap();
    let killed_summary = first
        .get(&killed.task_id, TaskType::Shell)
        .await
        .unwrap()
        .summary;
    assert_eq!(killed_summary.lifecycle, LifecycleState::Terminated);

    let second_rm = Arc::new(InMemoryResourceManager::new(["default"]));
    let second = TaskRegistry::new(
        second_rm.clone(),
        Some(store.clone()),
        &OrchestratorConfig::default(),
    );
    let restored = second.restore_all().await.unwrap();
    assert_eq!(restored, vec![survivor.task_id.clone()]);

    let details = second
        .get(&survivor.task_id, TaskType::Notebook)
        .await
        .unwrap();
    assert_eq!(details.summary.job_id, survivor.job_id);
    assert_eq!(details.summary.registered_time, survivor.registered_time);
    assert_eq!(details.spec.image, "survivor");
    assert_eq!(second_rm.group_priority(&survivor.job_id), Some(5));

    second_rm.assign(&survivor.task_id).unwrap();
    second
        .get(&survivor.task_id, TaskType::Notebook)
        .await
        .unwrap();
    let started = second_rm
        .started_spec(&survivor.task_id)
        .expect("restored task should start");
    assert_eq!(started.context_directory, vec![9, 9, 9]);

    assert!(second.restore_all().await.unwrap().is_empty());
    assert_eq!(second.len().unwrap(), 1);

    let _ = std::fs::remove_file(path);
}
