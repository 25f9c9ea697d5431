#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct SqliteMigration {
    pub version: i64,
    pub name: &'static str,
    pub up_sql: &'static str,
    pub down_sql: &'static str,
}

const MIGRATION_0001: SqliteMigration = SqliteMigration {
    version: 1,
    name: "command_snapshots",
    up_sql: r#"
CREATE TABLE IF NOT EXISTS command_snapshots (
    task_id TEXT PRIMARY KEY,
    task_type TEXT NOT NULL,
    job_id TEXT NOT NULL,
    job_type TEXT NOT NULL,
    allocation_id TEXT NOT NULL,
    registered_at_unix_nanos INTEGER NOT NULL,
    spec_json TEXT NOT NULL,
    ended_at_unix INTEGER
);

CREATE INDEX IF NOT EXISTS idx_command_snapshots_unfinished
    ON command_snapshots (ended_at_unix, registered_at_unix_nanos);
"#,
    down_sql: r#"
DROP INDEX IF EXISTS idx_command_snapshots_unfinished;
DROP TABLE IF EXISTS command_snapshots;
"#,
};

const MIGRATION_0002: SqliteMigration = SqliteMigration {
    version: 2,
    name: "task_context_directories",
    up_sql: r#"
CREATE TABLE IF NOT EXISTS task_context_directories (
    task_id TEXT PRIMARY KEY,
    contents BLOB NOT NULL,
    saved_at_unix INTEGER NOT NULL
);
"#,
    down_sql: r#"
DROP TABLE IF EXISTS task_context_directories;
"#,
};

const MIGRATIONS: [SqliteMigration; 2] = [MIGRATION_0001, MIGRATION_0002];

pub fn migrations() -> &'static [SqliteMigration] {
    &MIGRATIONS
}

pub fn migration(version: i64) -> Option<&'static SqliteMigration> {
    MIGRATIONS.iter().find(|entry| entry.version == version)
}

pub fn current_schema_version() -> i64 {
    MIGRATIONS.last().map(|entry| entry.version).unwrap_or(0)
}
