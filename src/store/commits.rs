//! Intermediate commit statistics (`commit_data` rows).

use std::collections::BTreeMap;

use chrono::Utc;
use rusqlite::types::Value;
use rusqlite::{params, params_from_iter};

use crate::state::RepoEvent;
use crate::types::{AuthorEmail, CommitStat, Repository, RepositoryId};

use super::{apply_event_on_conn, Store, StoreError};

impl Store {
    /// Persists a fresh extraction in one transaction: transitions the
    /// repository to `users_processing`, replaces its commit_data rows
    /// (all `processed = 0`), drops the previous run's leaderboard linkage,
    /// and updates the aggregate counters.
    ///
    /// Replacing the whole row set (rather than patching) is what makes
    /// re-extraction supersede the previous run: emails that vanished from
    /// history cannot linger and block convergence.
    pub async fn record_extraction(
        &self,
        id: RepositoryId,
        counts: BTreeMap<AuthorEmail, u64>,
    ) -> Result<Repository, StoreError> {
        self.call(move |conn| {
            let tx = conn.transaction()?;
            apply_event_on_conn(&tx, id, &RepoEvent::CommitsExtracted, Utc::now())?;

            tx.execute(
                "DELETE FROM repository_contributors WHERE repository_id = ?1",
                params![id.0],
            )?;
            tx.execute(
                "DELETE FROM commit_data WHERE repository_id = ?1",
                params![id.0],
            )?;
            {
                let mut insert = tx.prepare(
                    "INSERT INTO commit_data (repository_id, author_email, commit_count, processed)
                     VALUES (?1, ?2, ?3, 0)",
                )?;
                for (email, count) in &counts {
                    insert.execute(params![id.0, email.as_str(), *count as i64])?;
                }
            }

            let total: i64 = counts.values().map(|c| *c as i64).sum();
            tx.execute(
                "UPDATE repositories SET total_commits = ?1, unique_contributors = ?2 WHERE id = ?3",
                params![total, counts.len() as i64, id.0],
            )?;

            let repo = tx.query_row(
                &format!("SELECT {} FROM repositories WHERE id = ?1", super::REPO_COLUMNS),
                params![id.0],
                super::repo_from_row,
            )?;
            tx.commit()?;
            Ok(repo)
        })
        .await
    }

    /// Every author email for the repository, sorted. This full ordered set
    /// is the basis batches are sliced from, so batch boundaries stay stable
    /// while individual rows flip to processed.
    pub async fn commit_emails(&self, id: RepositoryId) -> Result<Vec<AuthorEmail>, StoreError> {
        self.call(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT author_email FROM commit_data
                 WHERE repository_id = ?1 ORDER BY author_email",
            )?;
            let rows = stmt.query_map(params![id.0], |row| row.get::<_, String>(0))?;
            let mut emails = Vec::new();
            for row in rows {
                emails.push(AuthorEmail::new(row?));
            }
            Ok(emails)
        })
        .await
    }

    /// The still-unprocessed rows among `emails`, sorted by email.
    pub async fn unprocessed_for_emails(
        &self,
        id: RepositoryId,
        emails: Vec<AuthorEmail>,
    ) -> Result<Vec<CommitStat>, StoreError> {
        if emails.is_empty() {
            return Ok(Vec::new());
        }
        self.call(move |conn| {
            let placeholders = vec!["?"; emails.len()].join(", ");
            let sql = format!(
                "SELECT author_email, commit_count, processed FROM commit_data
                 WHERE repository_id = ? AND processed = 0 AND author_email IN ({placeholders})
                 ORDER BY author_email"
            );
            let mut values: Vec<Value> = Vec::with_capacity(emails.len() + 1);
            values.push(Value::Integer(id.0));
            values.extend(emails.iter().map(|e| Value::Text(e.as_str().to_string())));

            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt.query_map(params_from_iter(values), stat_from_row)?;
            let mut stats = Vec::new();
            for row in rows {
                stats.push(row?);
            }
            Ok(stats)
        })
        .await
    }

    pub async fn unprocessed_count(&self, id: RepositoryId) -> Result<u64, StoreError> {
        self.call(move |conn| {
            let count: i64 = conn.query_row(
                "SELECT COUNT(*) FROM commit_data WHERE repository_id = ?1 AND processed = 0",
                params![id.0],
                |row| row.get(0),
            )?;
            Ok(count as u64)
        })
        .await
    }

    /// All commit_data rows for a repository, sorted by email.
    pub async fn commit_stats(&self, id: RepositoryId) -> Result<Vec<CommitStat>, StoreError> {
        self.call(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT author_email, commit_count, processed FROM commit_data
                 WHERE repository_id = ?1 ORDER BY author_email",
            )?;
            let rows = stmt.query_map(params![id.0], stat_from_row)?;
            let mut stats = Vec::new();
            for row in rows {
                stats.push(row?);
            }
            Ok(stats)
        })
        .await
    }
}

fn stat_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<CommitStat> {
    Ok(CommitStat {
        author_email: AuthorEmail::new(row.get::<_, String>(0)?),
        commit_count: row.get::<_, i64>(1)? as u64,
        processed: row.get::<_, i64>(2)? != 0,
    })
}
