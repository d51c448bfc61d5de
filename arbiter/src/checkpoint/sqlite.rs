//! SQLite-backed checkpoint store. Persistent across process restarts.
//!
//! One `checkpoints` table keyed by `(session_id, step_number, kind)` with
//! replace-on-conflict. All rusqlite work runs on the blocking pool so the
//! async scheduler is never stalled. Storage I/O failures are retried once
//! with exponential backoff; serialization failures surface immediately.

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use rusqlite::params;
use tracing::{info, warn};

use crate::checkpoint::{
    CheckpointError, CheckpointKind, CheckpointListItem, CheckpointStore,
};
use crate::state::SessionState;

const RETRY_BACKOFF_MS: u64 = 50;

/// Durable checkpoint store on a single SQLite file.
pub struct SqliteCheckpointStore {
    db_path: PathBuf,
}

impl SqliteCheckpointStore {
    /// Opens (or creates) the database and ensures the schema exists.
    pub fn new(path: impl AsRef<Path>) -> Result<Self, CheckpointError> {
        let db_path = path.as_ref().to_path_buf();
        if let Some(dir) = db_path.parent() {
            if !dir.as_os_str().is_empty() && !dir.exists() {
                std::fs::create_dir_all(dir)
                    .map_err(|e| CheckpointError::Storage(e.to_string()))?;
            }
        }
        let conn = rusqlite::Connection::open(&db_path)
            .map_err(|e| CheckpointError::Storage(e.to_string()))?;
        conn.execute(
            r#"
            CREATE TABLE IF NOT EXISTS checkpoints (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                session_id TEXT NOT NULL,
                step_number INTEGER NOT NULL,
                kind TEXT NOT NULL,
                state_json TEXT NOT NULL,
                label TEXT DEFAULT '',
                created_at TEXT NOT NULL,
                UNIQUE(session_id, step_number, kind)
            )
            "#,
            [],
        )
        .map_err(|e| CheckpointError::Storage(e.to_string()))?;
        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_checkpoints_session
             ON checkpoints(session_id, step_number)",
            [],
        )
        .map_err(|e| CheckpointError::Storage(e.to_string()))?;
        info!(db = %db_path.display(), "checkpoint store ready");
        Ok(Self { db_path })
    }

    /// Runs a blocking closure against a fresh connection, retrying once with
    /// backoff on storage errors.
    async fn with_conn_retry<T, F>(&self, op: F) -> Result<T, CheckpointError>
    where
        T: Send + 'static,
        F: Fn(&rusqlite::Connection) -> Result<T, CheckpointError> + Send + Sync + 'static,
    {
        let db_path = self.db_path.clone();
        tokio::task::spawn_blocking(move || {
            let mut backoff = Duration::from_millis(RETRY_BACKOFF_MS);
            let mut attempt = 0;
            loop {
                let result = rusqlite::Connection::open(&db_path)
                    .map_err(|e| CheckpointError::Storage(e.to_string()))
                    .and_then(|conn| op(&conn));
                match result {
                    Err(CheckpointError::Storage(msg)) if attempt == 0 => {
                        warn!(error = %msg, "checkpoint storage error, retrying once");
                        std::thread::sleep(backoff);
                        backoff *= 2;
                        attempt += 1;
                    }
                    other => return other,
                }
            }
        })
        .await
        .map_err(|e| CheckpointError::Storage(e.to_string()))?
    }

    fn row_to_state(json: String) -> Result<SessionState, CheckpointError> {
        serde_json::from_str(&json).map_err(|e| CheckpointError::Serialization(e.to_string()))
    }
}

#[async_trait]
impl CheckpointStore for SqliteCheckpointStore {
    async fn save(
        &self,
        state: &SessionState,
        kind: CheckpointKind,
        label: &str,
    ) -> Result<i64, CheckpointError> {
        let state_json = serde_json::to_string(state)
            .map_err(|e| CheckpointError::Serialization(e.to_string()))?;
        let session_id = state.session_id.clone();
        let step = state.step;
        let kind_str = kind.as_str();
        let label = label.to_string();
        let created_at = chrono::Utc::now().to_rfc3339();

        let id = self
            .with_conn_retry(move |conn| {
                conn.execute(
                    r#"
                    INSERT OR REPLACE INTO checkpoints
                        (session_id, step_number, kind, state_json, label, created_at)
                    VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                    "#,
                    params![session_id, step, kind_str, state_json, label, created_at],
                )
                .map_err(|e| CheckpointError::Storage(e.to_string()))?;
                Ok(conn.last_insert_rowid())
            })
            .await?;

        info!(step, kind = kind_str, checkpoint_id = id, "checkpoint saved");
        Ok(id)
    }

    async fn load(
        &self,
        session_id: &str,
        step: Option<i64>,
    ) -> Result<SessionState, CheckpointError> {
        let session = session_id.to_string();
        let json = self
            .with_conn_retry(move |conn| {
                let row: Option<String> = if let Some(step) = step {
                    conn.query_row(
                        "SELECT state_json FROM checkpoints
                         WHERE session_id = ?1 AND step_number = ?2
                         ORDER BY id DESC LIMIT 1",
                        params![session, step],
                        |r| r.get(0),
                    )
                    .map(Some)
                    .or_else(|e| match e {
                        rusqlite::Error::QueryReturnedNoRows => Ok(None),
                        other => Err(CheckpointError::Storage(other.to_string())),
                    })?
                } else {
                    conn.query_row(
                        "SELECT state_json FROM checkpoints
                         WHERE session_id = ?1
                         ORDER BY step_number DESC, id DESC LIMIT 1",
                        params![session],
                        |r| r.get(0),
                    )
                    .map(Some)
                    .or_else(|e| match e {
                        rusqlite::Error::QueryReturnedNoRows => Ok(None),
                        other => Err(CheckpointError::Storage(other.to_string())),
                    })?
                };
                row.ok_or_else(|| CheckpointError::NotFound(session.clone()))
            })
            .await?;
        Self::row_to_state(json)
    }

    async fn list(&self, session_id: &str) -> Result<Vec<CheckpointListItem>, CheckpointError> {
        let session = session_id.to_string();
        self.with_conn_retry(move |conn| {
            let mut stmt = conn
                .prepare(
                    "SELECT step_number, kind, label, created_at FROM checkpoints
                     WHERE session_id = ?1
                     ORDER BY step_number ASC, id ASC",
                )
                .map_err(|e| CheckpointError::Storage(e.to_string()))?;
            let rows = stmt
                .query_map(params![session], |row| {
                    Ok(CheckpointListItem {
                        step: row.get(0)?,
                        kind: CheckpointKind::from_str_lossy(&row.get::<_, String>(1)?),
                        label: row.get(2)?,
                        created_at: row.get(3)?,
                    })
                })
                .map_err(|e| CheckpointError::Storage(e.to_string()))?;
            rows.collect::<Result<Vec<_>, _>>()
                .map_err(|e| CheckpointError::Storage(e.to_string()))
        })
        .await
    }

    async fn rollback(
        &self,
        session_id: &str,
        step: i64,
    ) -> Result<SessionState, CheckpointError> {
        let session = session_id.to_string();
        let json = self
            .with_conn_retry(move |conn| {
                // Load and delete inside one transaction so a failed delete
                // never leaves a half-rolled-back session behind.
                conn.execute("BEGIN IMMEDIATE", [])
                    .map_err(|e| CheckpointError::Storage(e.to_string()))?;
                let result: Result<String, CheckpointError> = (|| {
                    let json: String = conn
                        .query_row(
                            "SELECT state_json FROM checkpoints
                             WHERE session_id = ?1 AND step_number = ?2
                             ORDER BY id DESC LIMIT 1",
                            params![session, step],
                            |r| r.get(0),
                        )
                        .map_err(|e| match e {
                            rusqlite::Error::QueryReturnedNoRows => {
                                CheckpointError::NotFound(format!("{} step {}", session, step))
                            }
                            other => CheckpointError::Storage(other.to_string()),
                        })?;
                    conn.execute(
                        "DELETE FROM checkpoints
                         WHERE session_id = ?1 AND step_number > ?2",
                        params![session, step],
                    )
                    .map_err(|e| CheckpointError::Storage(e.to_string()))?;
                    Ok(json)
                })();
                match result {
                    Ok(json) => {
                        conn.execute("COMMIT", [])
                            .map_err(|e| CheckpointError::Storage(e.to_string()))?;
                        Ok(json)
                    }
                    Err(e) => {
                        let _ = conn.execute("ROLLBACK", []);
                        Err(e)
                    }
                }
            })
            .await?;
        info!(step, "rolled back");
        Self::row_to_state(json)
    }

    async fn delete_session(&self, session_id: &str) -> Result<usize, CheckpointError> {
        let session = session_id.to_string();
        let deleted = self
            .with_conn_retry(move |conn| {
                conn.execute(
                    "DELETE FROM checkpoints WHERE session_id = ?1",
                    params![session],
                )
                .map_err(|e| CheckpointError::Storage(e.to_string()))
            })
            .await?;
        info!(count = deleted, "session checkpoints deleted");
        Ok(deleted)
    }
}
