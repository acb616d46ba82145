//! SQLite-backed persistence.
//!
//! A single [`Store`] owns the connection behind a mutex; every public method
//! hops onto the blocking thread pool so async workers never block a runtime
//! thread on database I/O. Methods that the pipeline needs to be atomic
//! (extraction persist, batch settlement, claim) run whole transactions
//! inside one call.
//!
//! The schema is versioned through `PRAGMA user_version`; `init_schema` is
//! idempotent and runs on every open.

mod commits;
mod contributors;
mod jobs;
mod repos;

use std::path::Path;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use rusqlite::Connection;
use thiserror::Error;

use crate::state::TransitionError;
use crate::types::RepositoryId;

pub(crate) use repos::{apply_event_on_conn, repo_from_row, REPO_COLUMNS};

const SCHEMA_VERSION: i64 = 1;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS repositories (
    id                   INTEGER PRIMARY KEY,
    url                  TEXT NOT NULL UNIQUE,
    state                TEXT NOT NULL DEFAULT 'pending',
    failure_reason       TEXT,
    total_commits        INTEGER NOT NULL DEFAULT 0,
    unique_contributors  INTEGER NOT NULL DEFAULT 0,
    last_attempt_at      INTEGER,
    commits_processed_at INTEGER,
    last_processed_at    INTEGER,
    created_at           INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS commit_data (
    repository_id INTEGER NOT NULL REFERENCES repositories(id),
    author_email  TEXT NOT NULL,
    commit_count  INTEGER NOT NULL,
    processed     INTEGER NOT NULL DEFAULT 0,
    PRIMARY KEY (repository_id, author_email)
);

CREATE INDEX IF NOT EXISTS idx_commit_data_unprocessed
    ON commit_data(repository_id) WHERE processed = 0;

CREATE TABLE IF NOT EXISTS contributors (
    id          INTEGER PRIMARY KEY,
    username    TEXT UNIQUE,
    email       TEXT NOT NULL UNIQUE,
    profile_url TEXT,
    updated_at  INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS repository_contributors (
    repository_id  INTEGER NOT NULL REFERENCES repositories(id),
    contributor_id INTEGER NOT NULL REFERENCES contributors(id),
    commit_count   INTEGER NOT NULL,
    PRIMARY KEY (repository_id, contributor_id)
);

CREATE TABLE IF NOT EXISTS jobs (
    id            INTEGER PRIMARY KEY,
    kind          TEXT NOT NULL,
    repository_id INTEGER NOT NULL REFERENCES repositories(id),
    batch         INTEGER NOT NULL DEFAULT 0,
    dedupe_key    TEXT NOT NULL,
    status        TEXT NOT NULL DEFAULT 'pending',
    attempts      INTEGER NOT NULL DEFAULT 0,
    not_before    INTEGER NOT NULL DEFAULT 0,
    created_at    INTEGER NOT NULL,
    updated_at    INTEGER NOT NULL
);

CREATE UNIQUE INDEX IF NOT EXISTS idx_jobs_live_dedupe
    ON jobs(dedupe_key) WHERE status IN ('pending', 'running');

CREATE INDEX IF NOT EXISTS idx_jobs_claim
    ON jobs(kind, status, not_before);
";

/// Errors from the persistence layer.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("storage init failed: {0}")]
    Init(String),

    /// A state-machine rejection surfaced through a store transaction.
    #[error(transparent)]
    Transition(#[from] TransitionError),

    #[error("repository {0} not found")]
    RepositoryMissing(RepositoryId),

    #[error("corrupt row: {0}")]
    Corrupt(String),

    #[error("background task failed: {0}")]
    Background(String),
}

/// Handle to the SQLite database. Cheap to clone; all clones share one
/// connection.
#[derive(Debug, Clone)]
pub struct Store {
    conn: Arc<Mutex<Connection>>,
}

impl Store {
    /// Opens (creating if necessary) the database at `path` and applies the
    /// schema. The parent directory is created when missing. WAL mode is
    /// required for file-backed databases.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(path)?;

        let mode: String = conn.query_row("PRAGMA journal_mode = WAL", [], |row| row.get(0))?;
        if !mode.eq_ignore_ascii_case("wal") {
            return Err(StoreError::Init(format!(
                "journal mode is {mode}, expected wal"
            )));
        }

        Self::init(conn)
    }

    /// An in-memory database with the full schema. Used by tests.
    pub fn in_memory() -> Result<Self, StoreError> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self, StoreError> {
        conn.pragma_update(None, "foreign_keys", "ON")?;
        conn.pragma_update(None, "synchronous", "FULL")?;
        conn.busy_timeout(std::time::Duration::from_millis(5000))?;
        init_schema(&conn)?;
        Ok(Store {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Runs `f` against the connection on the blocking pool.
    pub(crate) async fn call<T, F>(&self, f: F) -> Result<T, StoreError>
    where
        F: FnOnce(&mut Connection) -> Result<T, StoreError> + Send + 'static,
        T: Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let mut guard = conn.lock().unwrap();
            f(&mut guard)
        })
        .await
        .map_err(|e| StoreError::Background(e.to_string()))?
    }
}

fn init_schema(conn: &Connection) -> Result<(), StoreError> {
    let version: i64 = conn.pragma_query_value(None, "user_version", |row| row.get(0))?;
    if version < SCHEMA_VERSION {
        conn.execute_batch(SCHEMA)?;
        conn.pragma_update(None, "user_version", SCHEMA_VERSION)?;
    }
    Ok(())
}

/// Unix-seconds representation used for every timestamp column.
pub(crate) fn ts(at: DateTime<Utc>) -> i64 {
    at.timestamp()
}

pub(crate) fn from_ts(idx: usize, secs: i64) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::from_timestamp(secs, 0)
        .ok_or_else(|| corrupt(idx, format!("unrepresentable timestamp {secs}")))
}

pub(crate) fn from_opt_ts(
    idx: usize,
    secs: Option<i64>,
) -> rusqlite::Result<Option<DateTime<Utc>>> {
    secs.map(|s| from_ts(idx, s)).transpose()
}

#[derive(Debug)]
struct CorruptColumn(String);

impl std::fmt::Display for CorruptColumn {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::error::Error for CorruptColumn {}

/// Wraps a domain-level decode failure as a rusqlite conversion error so row
/// mappers can reject unparseable columns.
pub(crate) fn corrupt(idx: usize, message: impl Into<String>) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(
        idx,
        rusqlite::types::Type::Text,
        Box::new(CorruptColumn(message.into())),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn open_creates_parent_dirs_and_enables_wal() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/deeper/commitboard.db");
        let store = Store::open(&path).unwrap();
        assert!(path.exists());

        let mode: String = store
            .call(|conn| {
                Ok(conn.pragma_query_value(None, "journal_mode", |row| row.get(0))?)
            })
            .await
            .unwrap();
        assert_eq!(mode.to_ascii_lowercase(), "wal");
    }

    #[tokio::test]
    async fn schema_init_is_idempotent_across_reopens() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("commitboard.db");
        drop(Store::open(&path).unwrap());
        let store = Store::open(&path).unwrap();

        let version: i64 = store
            .call(|conn| Ok(conn.pragma_query_value(None, "user_version", |row| row.get(0))?))
            .await
            .unwrap();
        assert_eq!(version, SCHEMA_VERSION);
    }

    #[tokio::test]
    async fn in_memory_store_has_all_tables() {
        let store = Store::in_memory().unwrap();
        let count: i64 = store
            .call(|conn| {
                Ok(conn.query_row(
                    "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table'
                     AND name IN ('repositories', 'commit_data', 'contributors',
                                  'repository_contributors', 'jobs')",
                    [],
                    |row| row.get(0),
                )?)
            })
            .await
            .unwrap();
        assert_eq!(count, 5);
    }
}
