use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use rusqlite::{Connection, OptionalExtension, params};

use crate::models::{
    AllocationId, CommandSpec, CoreError, CoreErrorKind, JobId, JobType, TaskId, TaskSnapshot,
    TaskType,
};
use crate::persistence::{MigrationStore, PersistenceResult, TaskSnapshotStore};
use crate::sqlite::migrations::{SqliteMigration, current_schema_version, migration, migrations};

const MIGRATIONS_TABLE: &str = "ntsc_schema_migrations";

pub struct SqliteStore {
    database_path: PathBuf,
}

impl SqliteStore {
    pub fn new(database_path: impl Into<PathBuf>) -> Self {
        Self {
            database_path: database_path.into(),
        }
    }

    pub fn database_path(&self) -> &Path {
        &self.database_path
    }

    pub fn planned_migrations(&self, from_version: i64) -> Vec<&'static SqliteMigration> {
        migrations()
            .iter()
            .filter(|entry| entry.version > from_version)
            .collect()
    }

    pub fn migrate_to_latest(&self) -> PersistenceResult<()> {
        self.apply_migration(current_schema_version())
    }

    fn with_connection<T>(
        &self,
        operation_name: &str,
        operation: impl FnOnce(&mut Connection) -> rusqlite::Result<T>,
    ) -> PersistenceResult<T> {
        let mut connection = open_connection(&self.database_path)
            .map_err(|error| storage_error(operation_name, error))?;
        operation(&mut connection).map_err(|error| storage_error(operation_name, error))
    }
}

impl MigrationStore for SqliteStore {
    fn current_version(&self) -> PersistenceResult<i64> {
        self.with_connection("current_version", |connection| {
            ensure_migrations_table(connection)?;
            read_current_version(connection)
        })
    }

    fn apply_migration(&self, target_version: i64) -> PersistenceResult<()> {
        if target_version < 0 || target_version > current_schema_version() {
            return Err(storage_error_text(
                "apply_migration",
                format!("invalid migration target version '{target_version}'"),
            ));
        }

        self.with_connection("apply_migration", |connection| {
            ensure_migrations_table(connection)?;
            let current_version = read_current_version(connection)?;

            if target_version > current_version {
                for version in (current_version + 1)..=target_version {
                    apply_up_migration(connection, defined_migration(version)?)?;
                }
            } else {
                for version in ((target_version + 1)..=current_version).rev() {
                    apply_down_migration(connection, defined_migration(version)?)?;
                }
            }

            Ok(())
        })
    }
}

impl TaskSnapshotStore for SqliteStore {
    fn upsert_snapshot(&self, snapshot: &TaskSnapshot) -> PersistenceResult<()> {
        let spec_json = serde_json::to_string(&snapshot.spec).map_err(|error| {
            storage_error_text(
                "upsert_snapshot",
                format!("failed to encode command spec: {error}"),
            )
        })?;

        self.with_connection("upsert_snapshot", |connection| {
            ensure_schema_ready(connection)?;
            connection.execute(
                "
INSERT INTO command_snapshots (
    task_id, task_type, job_id, job_type, allocation_id, registered_at_unix_nanos, spec_json
)
VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
ON CONFLICT(task_id) DO UPDATE SET
    task_type = excluded.task_type,
    job_id = excluded.job_id,
    job_type = excluded.job_type,
    allocation_id = excluded.allocation_id,
    registered_at_unix_nanos = excluded.registered_at_unix_nanos,
    spec_json = excluded.spec_json
",
                params![
                    snapshot.task_id.as_str(),
                    snapshot.task_type.as_str(),
                    snapshot.job_id.as_str(),
                    snapshot.job_type.as_str(),
                    snapshot.allocation_id.0,
                    to_unix_nanos(snapshot.registered_time)?,
                    spec_json,
                ],
            )?;
            Ok(())
        })
    }

    fn list_unfinished_snapshots(&self) -> PersistenceResult<Vec<TaskSnapshot>> {
        self.with_connection("list_unfinished_snapshots", |connection| {
            ensure_schema_ready(connection)?;
            let mut statement = connection.prepare(
                "
SELECT task_id, task_type, job_id, job_type, allocation_id, registered_at_unix_nanos, spec_json
FROM command_snapshots
WHERE ended_at_unix IS NULL
ORDER BY registered_at_unix_nanos ASC, task_id ASC
",
            )?;
            let rows = statement.query_map([], |row| {
                let task_id: String = row.get(0)?;
                let task_type_raw: String = row.get(1)?;
                let job_id: String = row.get(2)?;
                let job_type_raw: String = row.get(3)?;
                let allocation_id: String = row.get(4)?;
                let registered_at: i64 = row.get(5)?;
                let spec_json: String = row.get(6)?;

                Ok(TaskSnapshot {
                    task_id: TaskId(task_id),
                    task_type: parse_task_type(&task_type_raw)?,
                    job_id: JobId(job_id),
                    job_type: parse_job_type(&job_type_raw)?,
                    allocation_id: AllocationId(allocation_id),
                    registered_time: from_unix_nanos(registered_at)?,
                    spec: parse_spec(&spec_json)?,
                })
            })?;

            rows.collect()
        })
    }

    fn mark_task_ended(&self, task_id: &TaskId, ended_at: SystemTime) -> PersistenceResult<()> {
        self.with_connection("mark_task_ended", |connection| {
            ensure_schema_ready(connection)?;
            connection.execute(
                "
UPDATE command_snapshots
SET ended_at_unix = ?2
WHERE task_id = ?1 AND ended_at_unix IS NULL
",
                params![task_id.as_str(), to_unix_seconds(ended_at)?],
            )?;
            Ok(())
        })
    }

    fn save_context_directory(&self, task_id: &TaskId, contents: &[u8]) -> PersistenceResult<()> {
        self.with_connection("save_context_directory", |connection| {
            ensure_schema_ready(connection)?;
            connection.execute(
                "
INSERT INTO task_context_directories (task_id, contents, saved_at_unix)
VALUES (?1, ?2, ?3)
ON CONFLICT(task_id) DO UPDATE SET
    contents = excluded.contents,
    saved_at_unix = excluded.saved_at_unix
",
                params![
                    task_id.as_str(),
                    contents,
                    to_unix_seconds(SystemTime::now())?
                ],
            )?;
            Ok(())
        })
    }

    fn load_context_directory(&self, task_id: &TaskId) -> PersistenceResult<Option<Vec<u8>>> {
        self.with_connection("load_context_directory", |connection| {
            ensure_schema_ready(connection)?;
            connection
                .query_row(
                    "SELECT contents FROM task_context_directories WHERE task_id = ?1",
                    params![task_id.as_str()],
                    |row| row.get(0),
                )
                .optional()
        })
    }
}

fn open_connection(database_path: &Path) -> rusqlite::Result<Connection> {
    if let Some(parent) = database_path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .map_err(|error| rusqlite::Error::ToSqlConversionFailure(Box::new(error)))?;
    }
    Connection::open(database_path)
}

fn ensure_migrations_table(connection: &Connection) -> rusqlite::Result<()> {
    connection.execute_batch(&format!(
        "
CREATE TABLE IF NOT EXISTS {MIGRATIONS_TABLE} (
    version INTEGER PRIMARY KEY,
    name TEXT NOT NULL,
    applied_at_unix INTEGER NOT NULL
);
"
    ))?;
    Ok(())
}

fn ensure_schema_ready(connection: &Connection) -> rusqlite::Result<()> {
    ensure_migrations_table(connection)?;
    let version = read_current_version(connection)?;
    if version < current_schema_version() {
        return Err(storage_error_sqlite(
            "database schema is not up to date; apply migrations before task operations",
        ));
    }
    Ok(())
}

fn read_current_version(connection: &Connection) -> rusqlite::Result<i64> {
    connection.query_row(
        &format!("SELECT COALESCE(MAX(version), 0) FROM {MIGRATIONS_TABLE}"),
        [],
        |row| row.get(0),
    )
}

fn defined_migration(version: i64) -> rusqlite::Result<&'static SqliteMigration> {
    migration(version).ok_or_else(|| {
        storage_error_sqlite(&format!("migration version '{version}' is not defined"))
    })
}

fn apply_up_migration(
    connection: &mut Connection,
    migration: &SqliteMigration,
) -> rusqlite::Result<()> {
    let transaction = connection.transaction()?;
    transaction.execute_batch(migration.up_sql)?;
    transaction.execute(
        &format!(
            "INSERT INTO {MIGRATIONS_TABLE} (version, name, applied_at_unix)
             VALUES (?1, ?2, strftime('%s', 'now'))"
        ),
        (migration.version, migration.name),
    )?;
    transaction.commit()?;
    Ok(())
}

fn apply_down_migration(
    connection: &mut Connection,
    migration: &SqliteMigration,
) -> rusqlite::Result<()> {
    let transaction = connection.transaction()?;
    transaction.execute_batch(migration.down_sql)?;
    transaction.execute(
        &format!("DELETE FROM {MIGRATIONS_TABLE} WHERE version = ?1"),
        [migration.version],
    )?;
    transaction.commit()?;
    Ok(())
}

fn storage_error(operation: &str, error: rusqlite::Error) -> CoreError {
    storage_error_text(operation, error.to_string())
}

fn storage_error_sqlite(message: &str) -> rusqlite::Error {
    rusqlite::Error::ToSqlConversionFailure(Box::new(std::io::Error::other(message.to_string())))
}

fn parse_task_type(raw: &str) -> rusqlite::Result<TaskType> {
    raw.parse::<TaskType>().map_err(|_| {
        storage_error_sqlite(&format!("unknown task type '{raw}' in sqlite record"))
    })
}

fn parse_job_type(raw: &str) -> rusqlite::Result<JobType> {
    raw.parse::<JobType>()
        .map_err(|_| storage_error_sqlite(&format!("unknown job type '{raw}' in sqlite record")))
}

fn parse_spec(raw: &str) -> rusqlite::Result<CommandSpec> {
    serde_json::from_str(raw)
        .map_err(|error| storage_error_sqlite(&format!("malformed command spec: {error}")))
}

fn to_unix_seconds(value: SystemTime) -> rusqlite::Result<i64> {
    let duration = value.duration_since(UNIX_EPOCH).map_err(|error| {
        storage_error_sqlite(&format!("time before unix epoch is not supported: {error}"))
    })?;
    i64::try_from(duration.as_secs())
        .map_err(|_| storage_error_sqlite("unix timestamp seconds exceed i64 range"))
}

fn to_unix_nanos(value: SystemTime) -> rusqlite::Result<i64> {
    let duration = value.duration_since(UNIX_EPOCH).map_err(|error| {
        storage_error_sqlite(&format!("time before unix epoch is not supported: {error}"))
    })?;
    i64::try_from(duration.as_nanos())
        .map_err(|_| storage_error_sqlite("unix timestamp nanoseconds exceed i64 range"))
}

fn from_unix_nanos(value: i64) -> rusqlite::Result<SystemTime> {
    let nanos = u64::try_from(value)
        .map_err(|_| storage_error_sqlite("negative unix timestamps are not supported"))?;
    Ok(UNIX_EPOCH + Duration::from_nanos(nanos))
}

fn storage_error_text(operation: &str, message: impl AsRef<str>) -> CoreError {
    CoreError::new(
        CoreErrorKind::StorageFailure,
        format!("sqlite store '{operation}' failed: {}", message.as_ref()),
    )
}
