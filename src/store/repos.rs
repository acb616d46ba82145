//! Repository rows: creation, lookup, and validated state transitions.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};

use crate::state::{self, RepoEvent};
use crate::types::{RepoState, RepoUrl, Repository, RepositoryId};

use super::{corrupt, from_opt_ts, from_ts, ts, Store, StoreError};

pub(crate) const REPO_COLUMNS: &str = "id, url, state, failure_reason, total_commits, \
     unique_contributors, last_attempt_at, commits_processed_at, last_processed_at, created_at";

pub(crate) fn repo_from_row(row: &Row<'_>) -> rusqlite::Result<Repository> {
    let state_raw: String = row.get(2)?;
    let state = RepoState::parse(&state_raw)
        .ok_or_else(|| corrupt(2, format!("unknown repository state: {state_raw}")))?;
    Ok(Repository {
        id: RepositoryId(row.get(0)?),
        url: RepoUrl::from_normalized(row.get::<_, String>(1)?),
        state,
        failure_reason: row.get(3)?,
        total_commits: row.get::<_, i64>(4)? as u64,
        unique_contributors: row.get::<_, i64>(5)? as u64,
        last_attempt_at: from_opt_ts(6, row.get(6)?)?,
        commits_processed_at: from_opt_ts(7, row.get(7)?)?,
        last_processed_at: from_opt_ts(8, row.get(8)?)?,
        created_at: from_ts(9, row.get(9)?)?,
    })
}

fn load_by_id(conn: &Connection, id: RepositoryId) -> Result<Repository, StoreError> {
    conn.query_row(
        &format!("SELECT {REPO_COLUMNS} FROM repositories WHERE id = ?1"),
        params![id.0],
        repo_from_row,
    )
    .optional()?
    .ok_or(StoreError::RepositoryMissing(id))
}

/// Applies `event` to the repository's persisted state inside the caller's
/// transaction: validates through [`state::apply`], then writes the next
/// state plus the event's side columns (attempt timestamp, failure reason,
/// completion timestamp).
pub(crate) fn apply_event_on_conn(
    conn: &Connection,
    id: RepositoryId,
    event: &RepoEvent,
    now: DateTime<Utc>,
) -> Result<Repository, StoreError> {
    let current = load_by_id(conn, id)?;
    let next = state::apply(current.state, event)?;

    match event {
        RepoEvent::CommitJobStarted => {
            conn.execute(
                "UPDATE repositories
                 SET state = ?1, last_attempt_at = ?2, failure_reason = NULL
                 WHERE id = ?3",
                params![next.as_str(), ts(now), id.0],
            )?;
        }
        RepoEvent::CommitsExtracted => {
            conn.execute(
                "UPDATE repositories SET state = ?1, commits_processed_at = ?2 WHERE id = ?3",
                params![next.as_str(), ts(now), id.0],
            )?;
        }
        RepoEvent::CommitPhaseFailed { reason } => {
            conn.execute(
                "UPDATE repositories SET state = ?1, failure_reason = ?2 WHERE id = ?3",
                params![next.as_str(), reason, id.0],
            )?;
        }
        RepoEvent::BatchSettled { .. } if next == RepoState::Completed => {
            conn.execute(
                "UPDATE repositories SET state = ?1, last_processed_at = ?2 WHERE id = ?3",
                params![next.as_str(), ts(now), id.0],
            )?;
        }
        RepoEvent::BatchSettled { .. } | RepoEvent::Resubmitted => {
            conn.execute(
                "UPDATE repositories SET state = ?1 WHERE id = ?2",
                params![next.as_str(), id.0],
            )?;
        }
    }

    load_by_id(conn, id)
}

impl Store {
    /// Finds the repository for a normalized URL, creating a `pending` row on
    /// first submission.
    pub async fn get_or_create_repository(
        &self,
        url: &RepoUrl,
    ) -> Result<Repository, StoreError> {
        let url = url.clone();
        self.call(move |conn| {
            conn.execute(
                "INSERT INTO repositories (url, state, created_at) VALUES (?1, 'pending', ?2)
                 ON CONFLICT(url) DO NOTHING",
                params![url.as_str(), ts(Utc::now())],
            )?;
            Ok(conn.query_row(
                &format!("SELECT {REPO_COLUMNS} FROM repositories WHERE url = ?1"),
                params![url.as_str()],
                repo_from_row,
            )?)
        })
        .await
    }

    pub async fn get_repository(&self, url: &RepoUrl) -> Result<Option<Repository>, StoreError> {
        let url = url.clone();
        self.call(move |conn| {
            Ok(conn
                .query_row(
                    &format!("SELECT {REPO_COLUMNS} FROM repositories WHERE url = ?1"),
                    params![url.as_str()],
                    repo_from_row,
                )
                .optional()?)
        })
        .await
    }

    pub async fn get_repository_by_id(
        &self,
        id: RepositoryId,
    ) -> Result<Option<Repository>, StoreError> {
        self.call(move |conn| {
            Ok(conn
                .query_row(
                    &format!("SELECT {REPO_COLUMNS} FROM repositories WHERE id = ?1"),
                    params![id.0],
                    repo_from_row,
                )
                .optional()?)
        })
        .await
    }

    /// Validates and persists a state transition, returning the updated row.
    pub async fn apply_repo_event(
        &self,
        id: RepositoryId,
        event: RepoEvent,
    ) -> Result<Repository, StoreError> {
        self.call(move |conn| {
            let tx = conn.transaction()?;
            let repo = apply_event_on_conn(&tx, id, &event, Utc::now())?;
            tx.commit()?;
            Ok(repo)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn seeded_repo(store: &Store) -> Repository {
        let url = RepoUrl::parse("https://github.com/acme/widget").unwrap();
        store.get_or_create_repository(&url).await.unwrap()
    }

    #[tokio::test]
    async fn get_or_create_is_idempotent() {
        let store = Store::in_memory().unwrap();
        let url = RepoUrl::parse("https://github.com/acme/widget").unwrap();

        let first = store.get_or_create_repository(&url).await.unwrap();
        let second = store.get_or_create_repository(&url).await.unwrap();

        assert_eq!(first.id, second.id);
        assert_eq!(first.state, RepoState::Pending);
        assert_eq!(second.state, RepoState::Pending);
    }

    #[tokio::test]
    async fn lookup_by_url_and_id() {
        let store = Store::in_memory().unwrap();
        let repo = seeded_repo(&store).await;

        let by_url = store.get_repository(&repo.url).await.unwrap().unwrap();
        assert_eq!(by_url.id, repo.id);

        let by_id = store.get_repository_by_id(repo.id).await.unwrap().unwrap();
        assert_eq!(by_id.url, repo.url);

        let missing = RepoUrl::parse("https://github.com/acme/other").unwrap();
        assert!(store.get_repository(&missing).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn commit_job_started_records_attempt_and_clears_reason() {
        let store = Store::in_memory().unwrap();
        let repo = seeded_repo(&store).await;

        let started = store
            .apply_repo_event(repo.id, RepoEvent::CommitJobStarted)
            .await
            .unwrap();
        assert_eq!(started.state, RepoState::CommitsProcessing);
        assert!(started.last_attempt_at.is_some());

        let failed = store
            .apply_repo_event(
                repo.id,
                RepoEvent::CommitPhaseFailed {
                    reason: "repository not found".to_string(),
                },
            )
            .await
            .unwrap();
        assert_eq!(failed.state, RepoState::Failed);
        assert_eq!(failed.failure_reason.as_deref(), Some("repository not found"));

        // Re-driving clears the stale reason once a worker picks it up again.
        store
            .apply_repo_event(repo.id, RepoEvent::Resubmitted)
            .await
            .unwrap();
        let restarted = store
            .apply_repo_event(repo.id, RepoEvent::CommitJobStarted)
            .await
            .unwrap();
        assert_eq!(restarted.state, RepoState::CommitsProcessing);
        assert!(restarted.failure_reason.is_none());
    }

    #[tokio::test]
    async fn illegal_transition_is_rejected_and_not_persisted() {
        let store = Store::in_memory().unwrap();
        let repo = seeded_repo(&store).await;

        let err = store
            .apply_repo_event(repo.id, RepoEvent::BatchSettled { remaining: 0 })
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Transition(_)));

        let unchanged = store.get_repository_by_id(repo.id).await.unwrap().unwrap();
        assert_eq!(unchanged.state, RepoState::Pending);
    }

    #[tokio::test]
    async fn missing_repository_is_reported() {
        let store = Store::in_memory().unwrap();
        let err = store
            .apply_repo_event(RepositoryId(999), RepoEvent::CommitJobStarted)
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::RepositoryMissing(_)));
    }
}
