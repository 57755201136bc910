//! SQLite backend
//!
//! A single connection behind a mutex, driven from `spawn_blocking` so the
//! async runtime never waits on disk. Uniqueness of public and temporary
//! tokens is enforced by partial unique indexes; promotion and token updates
//! are single conditional `UPDATE`s.

use std::path::Path;
use std::sync::{Arc, Mutex};

use provider::{BoxFuture, Profile};
use rusqlite::{Connection, ErrorCode, OptionalExtension, Row, params};
use tracing::{debug, info, warn};

use super::{CredentialStore, new_token, reject_empty};
use crate::error::{Error, Result};
use crate::record::{CredentialRecord, IssuedTokens, TokenRotation, UpdateOutcome, now_millis};

/// Attempts at generating a public token that does not collide with an existing one.
const PROMOTE_ATTEMPTS: usize = 3;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS credentials (
    identity_id      TEXT PRIMARY KEY,
    display_name     TEXT NOT NULL DEFAULT '',
    access_token     TEXT NOT NULL,
    refresh_token    TEXT NOT NULL,
    public_token     TEXT,
    temporary_token  TEXT,
    expires_at       INTEGER,
    updated_at       INTEGER NOT NULL
);
CREATE UNIQUE INDEX IF NOT EXISTS idx_credentials_public_token
    ON credentials(public_token) WHERE public_token IS NOT NULL;
CREATE UNIQUE INDEX IF NOT EXISTS idx_credentials_temporary_token
    ON credentials(temporary_token) WHERE temporary_token IS NOT NULL;
"#;

const COLUMNS: &str = "identity_id, display_name, access_token, refresh_token, \
                       public_token, temporary_token, expires_at, updated_at";

#[derive(Clone)]
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    /// Open or create the database at `path` with WAL journaling.
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        conn.pragma_update(None, "busy_timeout", 5000)?;
        conn.execute_batch(SCHEMA)?;
        info!(path = %path.display(), "opened sqlite credential store");
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Open an in-memory database (for testing).
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    async fn with_conn<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let mut guard = conn
                .lock()
                .map_err(|_| Error::StorageFailure("database mutex poisoned".into()))?;
            f(&mut guard)
        })
        .await
        .map_err(|e| Error::StorageFailure(format!("database task failed: {e}")))?
    }

    async fn find_where(&self, column: &'static str, token: &str) -> Result<Option<CredentialRecord>> {
        let token = token.to_string();
        self.with_conn(move |conn| {
            let sql = format!("SELECT {COLUMNS} FROM credentials WHERE {column} = ?1");
            Ok(conn.query_row(&sql, params![token], row_to_record).optional()?)
        })
        .await
    }
}

fn row_to_record(row: &Row<'_>) -> rusqlite::Result<CredentialRecord> {
    let expires_at: Option<i64> = row.get(6)?;
    let updated_at: i64 = row.get(7)?;
    Ok(CredentialRecord {
        identity_id: row.get(0)?,
        display_name: row.get(1)?,
        access_token: row.get(2)?,
        refresh_token: row.get(3)?,
        public_token: row.get(4)?,
        temporary_token: row.get(5)?,
        expires_at: expires_at.map(|v| v.max(0) as u64),
        updated_at: updated_at.max(0) as u64,
    })
}

fn to_sql_millis(millis: u64) -> i64 {
    i64::try_from(millis).unwrap_or(i64::MAX)
}

fn is_constraint_violation(err: &rusqlite::Error) -> bool {
    matches!(err, rusqlite::Error::SqliteFailure(e, _) if e.code == ErrorCode::ConstraintViolation)
}

impl CredentialStore for SqliteStore {
    fn backend(&self) -> &'static str {
        "sqlite"
    }

    fn upsert<'a>(
        &'a self,
        profile: &'a Profile,
        tokens: IssuedTokens,
    ) -> BoxFuture<'a, Result<CredentialRecord>> {
        let identity_id = profile.id.clone();
        let display_name = profile.label().to_string();
        Box::pin(async move {
            self.with_conn(move |conn| {
                let tx = conn.transaction()?;
                tx.execute(
                    "INSERT INTO credentials (identity_id, display_name, access_token, refresh_token,
                                              public_token, temporary_token, expires_at, updated_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
                     ON CONFLICT(identity_id) DO UPDATE SET
                         display_name = excluded.display_name,
                         access_token = excluded.access_token,
                         refresh_token = excluded.refresh_token,
                         temporary_token = excluded.temporary_token,
                         expires_at = excluded.expires_at,
                         updated_at = excluded.updated_at",
                    params![
                        identity_id,
                        display_name,
                        tokens.access_token,
                        tokens.refresh_token,
                        tokens.public_token,
                        tokens.temporary_token,
                        tokens.expires_at.map(to_sql_millis),
                        to_sql_millis(now_millis()),
                    ],
                )?;
                let record = tx.query_row(
                    &format!("SELECT {COLUMNS} FROM credentials WHERE identity_id = ?1"),
                    params![identity_id],
                    row_to_record,
                )?;
                tx.commit()?;
                debug!(%identity_id, "upserted credential record");
                Ok(record)
            })
            .await
        })
    }

    fn find_by_public_token<'a>(&'a self, token: &'a str) -> BoxFuture<'a, Result<CredentialRecord>> {
        Box::pin(async move {
            reject_empty(token, "public")?;
            self.find_where("public_token", token)
                .await?
                .ok_or_else(|| Error::RecordNotFound("unknown public token".into()))
        })
    }

    fn find_by_temporary_token<'a>(
        &'a self,
        token: &'a str,
    ) -> BoxFuture<'a, Result<CredentialRecord>> {
        Box::pin(async move {
            reject_empty(token, "temporary")?;
            self.find_where("temporary_token", token)
                .await?
                .ok_or_else(|| Error::RecordNotFound("unknown temporary token".into()))
        })
    }

    fn promote_temporary_to_public<'a>(
        &'a self,
        temporary_token: &'a str,
    ) -> BoxFuture<'a, Result<String>> {
        Box::pin(async move {
            reject_empty(temporary_token, "temporary")?;
            let temporary_token = temporary_token.to_string();
            self.with_conn(move |conn| {
                for attempt in 1..=PROMOTE_ATTEMPTS {
                    let public_token = new_token();
                    let changed = conn.execute(
                        "UPDATE credentials
                         SET public_token = ?1, temporary_token = NULL, updated_at = ?2
                         WHERE temporary_token = ?3",
                        params![public_token, to_sql_millis(now_millis()), temporary_token],
                    );
                    match changed {
                        Ok(0) => {
                            return Err(Error::RecordNotFound(
                                "unknown or used temporary token".into(),
                            ));
                        }
                        Ok(_) => {
                            debug!("promoted temporary token");
                            return Ok(public_token);
                        }
                        Err(e) if is_constraint_violation(&e) => {
                            warn!(attempt, "public token collision, regenerating");
                        }
                        Err(e) => return Err(e.into()),
                    }
                }
                Err(Error::StorageFailure(
                    "could not generate a unique public token".into(),
                ))
            })
            .await
        })
    }

    fn update_tokens<'a>(
        &'a self,
        public_token: &'a str,
        rotation: &'a TokenRotation,
    ) -> BoxFuture<'a, Result<UpdateOutcome>> {
        Box::pin(async move {
            reject_empty(public_token, "public")?;
            let public_token = public_token.to_string();
            let rotation = rotation.clone();
            self.with_conn(move |conn| {
                let changed = conn.execute(
                    "UPDATE credentials
                     SET access_token = ?1, refresh_token = ?2, expires_at = ?3, updated_at = ?4
                     WHERE public_token = ?5 AND refresh_token = ?6",
                    params![
                        rotation.tokens.access_token,
                        rotation.tokens.refresh_token,
                        rotation.tokens.expires_at.map(to_sql_millis),
                        to_sql_millis(now_millis()),
                        public_token,
                        rotation.previous_refresh,
                    ],
                )?;
                if changed > 0 {
                    debug!("stored refreshed tokens");
                    return Ok(UpdateOutcome::Updated);
                }

                let exists: bool = conn.query_row(
                    "SELECT EXISTS(SELECT 1 FROM credentials WHERE public_token = ?1)",
                    params![public_token],
                    |row| row.get(0),
                )?;
                if exists {
                    debug!("token update skipped, record already rotated");
                    Ok(UpdateOutcome::Stale)
                } else {
                    Err(Error::RecordNotFound("unknown public token".into()))
                }
            })
            .await
        })
    }
}
