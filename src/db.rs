use anyhow::Context;
use rusqlite::Connection;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

pub const DB_FILE: &str = "riskbook.sqlite3";
pub const SCHEMA_VERSION: i64 = 1;

const SCHEMA_V1: &str = "
CREATE TABLE IF NOT EXISTS actors(
    id TEXT PRIMARY KEY,
    username TEXT NOT NULL UNIQUE,
    password_hash TEXT NOT NULL,
    role TEXT NOT NULL CHECK(role IN ('Admin', 'Teacher')),
    created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS records(
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL,
    owner TEXT NOT NULL,
    attendance REAL NOT NULL DEFAULT 0,
    activities REAL NOT NULL DEFAULT 0,
    quizzes REAL NOT NULL DEFAULT 0,
    performance_task REAL NOT NULL DEFAULT 0,
    exam REAL NOT NULL DEFAULT 0,
    written_works REAL NOT NULL DEFAULT 0,
    final_grade REAL NOT NULL DEFAULT 0,
    risk TEXT NOT NULL,
    notes TEXT NOT NULL DEFAULT '',
    section TEXT NOT NULL DEFAULT '',
    subject TEXT NOT NULL DEFAULT '',
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_records_owner ON records(owner);
CREATE INDEX IF NOT EXISTS idx_records_owner_section ON records(owner, section);

CREATE TABLE IF NOT EXISTS audit_entries(
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    action TEXT NOT NULL CHECK(action IN ('create', 'update', 'delete')),
    actor TEXT NOT NULL,
    record_id TEXT NOT NULL,
    timestamp TEXT NOT NULL,
    detail TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_audit_entries_record ON audit_entries(record_id);

CREATE TABLE IF NOT EXISTS tickets(
    token TEXT PRIMARY KEY,
    kind TEXT NOT NULL,
    payload TEXT NOT NULL,
    created_at INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_tickets_kind_created ON tickets(kind, created_at);
";

#[derive(Debug, Error)]
#[error("workspace schema version {found} is newer than supported version {supported}")]
pub struct SchemaTooNew {
    pub found: i64,
    pub supported: i64,
}

pub fn db_path(workspace: &Path) -> std::path::PathBuf {
    workspace.join(DB_FILE)
}

pub fn open_db(workspace: &Path, busy_timeout: Duration) -> anyhow::Result<Connection> {
    std::fs::create_dir_all(workspace).with_context(|| {
        format!(
            "failed to create workspace {}",
            workspace.to_string_lossy()
        )
    })?;
    let conn = Connection::open(db_path(workspace)).context("failed to open database")?;
    conn.busy_timeout(busy_timeout)?;
    let _mode: String =
        conn.pragma_update_and_check(None, "journal_mode", "WAL", |r| r.get(0))?;
    conn.pragma_update(None, "foreign_keys", "ON")?;
    migrate(&conn)?;
    Ok(conn)
}

/// Brings the schema to `SCHEMA_VERSION`. Workspaces written by a newer
/// build are refused rather than patched.
pub fn migrate(conn: &Connection) -> anyhow::Result<()> {
    let version: i64 = conn.query_row("PRAGMA user_version", [], |r| r.get(0))?;
    if version > SCHEMA_VERSION {
        return Err(SchemaTooNew {
            found: version,
            supported: SCHEMA_VERSION,
        }
        .into());
    }
    if version == SCHEMA_VERSION {
        return Ok(());
    }

    let tx = conn.unchecked_transaction()?;
    tx.execute_batch(SCHEMA_V1)
        .context("failed to create schema v1")?;
    tx.pragma_update(None, "user_version", SCHEMA_VERSION)?;
    tx.commit()?;
    tracing::info!(from = version, to = SCHEMA_VERSION, "workspace schema migrated");
    Ok(())
}

pub fn schema_version(conn: &Connection) -> rusqlite::Result<i64> {
    conn.query_row("PRAGMA user_version", [], |r| r.get(0))
}
