//! Canonical contributors and the per-repository leaderboard linkage.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};

use crate::types::{AuthorEmail, Contributor, ContributorId, LeaderboardEntry, RepositoryId, Username};

use super::{from_ts, ts, Store, StoreError};

const CONTRIB_COLUMNS: &str = "id, username, email, profile_url, updated_at";

fn contributor_from_row(row: &Row<'_>) -> rusqlite::Result<Contributor> {
    Ok(Contributor {
        id: ContributorId(row.get(0)?),
        username: row.get::<_, Option<String>>(1)?.map(Username::new),
        email: AuthorEmail::new(row.get::<_, String>(2)?),
        profile_url: row.get(3)?,
        updated_at: from_ts(4, row.get(4)?)?,
    })
}

fn load_by_id(conn: &Connection, id: ContributorId) -> rusqlite::Result<Contributor> {
    conn.query_row(
        &format!("SELECT {CONTRIB_COLUMNS} FROM contributors WHERE id = ?1"),
        params![id.0],
        contributor_from_row,
    )
}

pub(crate) fn find_by_email_on_conn(
    conn: &Connection,
    email: &AuthorEmail,
) -> rusqlite::Result<Option<Contributor>> {
    conn.query_row(
        &format!("SELECT {CONTRIB_COLUMNS} FROM contributors WHERE email = ?1"),
        params![email.as_str()],
        contributor_from_row,
    )
    .optional()
}

pub(crate) fn find_by_username_on_conn(
    conn: &Connection,
    username: &Username,
) -> rusqlite::Result<Option<Contributor>> {
    conn.query_row(
        &format!("SELECT {CONTRIB_COLUMNS} FROM contributors WHERE username = ?1"),
        params![username.as_str()],
        contributor_from_row,
    )
    .optional()
}

/// Upsert keyed by username when one is known, by email otherwise.
///
/// The username lookup runs first so that a second email belonging to an
/// already-known login converges onto the existing row instead of claiming
/// a duplicate. `COALESCE` keeps whatever username/profile the row already
/// carries when the incoming resolution has none: a lapsed lookup refreshes
/// `updated_at` but never strips an identity resolved earlier.
pub(crate) fn upsert_contributor_on_conn(
    conn: &Connection,
    email: &AuthorEmail,
    username: Option<&Username>,
    profile_url: Option<&str>,
    now: DateTime<Utc>,
) -> rusqlite::Result<Contributor> {
    let existing = match username {
        Some(name) => match find_by_username_on_conn(conn, name)? {
            Some(row) => Some(row),
            None => find_by_email_on_conn(conn, email)?,
        },
        None => find_by_email_on_conn(conn, email)?,
    };
    match existing {
        Some(row) => {
            conn.execute(
                "UPDATE contributors SET username = COALESCE(?1, username),
                     profile_url = COALESCE(?2, profile_url), updated_at = ?3
                 WHERE id = ?4",
                params![username.map(Username::as_str), profile_url, ts(now), row.id.0],
            )?;
            load_by_id(conn, row.id)
        }
        None => {
            conn.execute(
                "INSERT INTO contributors (username, email, profile_url, updated_at)
                 VALUES (?1, ?2, ?3, ?4)",
                params![username.map(Username::as_str), email.as_str(), profile_url, ts(now)],
            )?;
            load_by_id(conn, ContributorId(conn.last_insert_rowid()))
        }
    }
}

impl Store {
    pub async fn find_contributor_by_email(
        &self,
        email: AuthorEmail,
    ) -> Result<Option<Contributor>, StoreError> {
        self.call(move |conn| Ok(find_by_email_on_conn(conn, &email)?))
            .await
    }

    pub async fn find_contributor_by_username(
        &self,
        username: Username,
    ) -> Result<Option<Contributor>, StoreError> {
        self.call(move |conn| Ok(find_by_username_on_conn(conn, &username)?))
            .await
    }

    pub async fn upsert_contributor(
        &self,
        email: AuthorEmail,
        username: Option<Username>,
        profile_url: Option<String>,
    ) -> Result<Contributor, StoreError> {
        self.call(move |conn| {
            let tx = conn.transaction()?;
            let contributor = upsert_contributor_on_conn(
                &tx,
                &email,
                username.as_ref(),
                profile_url.as_deref(),
                Utc::now(),
            )?;
            tx.commit()?;
            Ok(contributor)
        })
        .await
    }

    /// Commits one identity batch atomically: the staged per-contributor
    /// counts are added into `repository_contributors` and the batch's
    /// commit_data rows flip to processed in the same transaction. Returns
    /// how many unprocessed rows the repository still has.
    ///
    /// Addition (not overwrite) is what lets several emails of one person,
    /// possibly spread over different batches, sum onto a single leaderboard
    /// row; a re-delivered batch stages nothing because its rows are already
    /// processed.
    pub async fn apply_user_batch(
        &self,
        id: RepositoryId,
        links: BTreeMap<ContributorId, u64>,
        processed: Vec<AuthorEmail>,
    ) -> Result<u64, StoreError> {
        self.call(move |conn| {
            let tx = conn.transaction()?;
            {
                let mut upsert = tx.prepare(
                    "INSERT INTO repository_contributors (repository_id, contributor_id, commit_count)
                     VALUES (?1, ?2, ?3)
                     ON CONFLICT(repository_id, contributor_id)
                     DO UPDATE SET commit_count = commit_count + excluded.commit_count",
                )?;
                for (contributor, count) in &links {
                    upsert.execute(params![id.0, contributor.0, *count as i64])?;
                }
                let mut mark = tx.prepare(
                    "UPDATE commit_data SET processed = 1
                     WHERE repository_id = ?1 AND author_email = ?2",
                )?;
                for email in &processed {
                    mark.execute(params![id.0, email.as_str()])?;
                }
            }
            let remaining: i64 = tx.query_row(
                "SELECT COUNT(*) FROM commit_data WHERE repository_id = ?1 AND processed = 0",
                params![id.0],
                |row| row.get(0),
            )?;
            tx.commit()?;
            Ok(remaining as u64)
        })
        .await
    }

    /// Ranked leaderboard: commit count descending, display name ascending
    /// as the tie-break.
    pub async fn leaderboard(
        &self,
        id: RepositoryId,
    ) -> Result<Vec<LeaderboardEntry>, StoreError> {
        self.call(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT c.username, c.email, c.profile_url, rc.commit_count
                 FROM repository_contributors rc
                 JOIN contributors c ON c.id = rc.contributor_id
                 WHERE rc.repository_id = ?1
                 ORDER BY rc.commit_count DESC, COALESCE(c.username, c.email) ASC",
            )?;
            let rows = stmt.query_map(params![id.0], |row| {
                let username: Option<String> = row.get(0)?;
                let email: String = row.get(1)?;
                Ok(LeaderboardEntry {
                    name: username.unwrap_or(email),
                    profile_url: row.get(2)?,
                    commit_count: row.get::<_, i64>(3)? as u64,
                })
            })?;
            let mut entries = Vec::new();
            for row in rows {
                entries.push(row?);
            }
            Ok(entries)
        })
        .await
    }

    #[cfg(test)]
    pub(crate) async fn backdate_contributor(
        &self,
        id: ContributorId,
        to: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        self.call(move |conn| {
            conn.execute(
                "UPDATE contributors SET updated_at = ?1 WHERE id = ?2",
                params![ts(to), id.0],
            )?;
            Ok(())
        })
        .await
    }
}
