//! Checkpointing: durable snapshots of [`SessionState`] keyed by
//! `(session_id, step, kind)`.
//!
//! TRANSACTION checkpoints bracket risky operations (tool batches, cloud
//! dispatch, HITL suspension); MILESTONE checkpoints mark completed work.
//! Saving the same key replaces the previous snapshot. Rollback loads a
//! checkpoint and deletes everything after it, atomically.
//!
//! Implementations: [`SqliteCheckpointStore`] (durable),
//! [`MemoryCheckpointStore`] (tests and cache-less runs).

mod memory;
mod sqlite;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::state::SessionState;

pub use memory::MemoryCheckpointStore;
pub use sqlite::SqliteCheckpointStore;

/// Checkpoint category.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum CheckpointKind {
    /// Boundary around a risky operation; automatic, used for retries.
    Transaction,
    /// Logical task completion; manual or automatic recovery point.
    Milestone,
}

impl CheckpointKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            CheckpointKind::Transaction => "TRANSACTION",
            CheckpointKind::Milestone => "MILESTONE",
        }
    }

    /// Parses the stored string form; unknown values map to Transaction.
    pub fn from_str_lossy(s: &str) -> Self {
        match s {
            "MILESTONE" => CheckpointKind::Milestone,
            _ => CheckpointKind::Transaction,
        }
    }
}

/// Error type for checkpoint operations.
#[derive(Debug, thiserror::Error)]
pub enum CheckpointError {
    #[error("serialization: {0}")]
    Serialization(String),
    #[error("storage: {0}")]
    Storage(String),
    #[error("not found: {0}")]
    NotFound(String),
}

/// Summary row returned by [`CheckpointStore::list`].
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CheckpointListItem {
    pub step: i64,
    pub kind: CheckpointKind,
    pub label: String,
    pub created_at: String,
}

/// Saves and loads session snapshots by `(session_id, step, kind)`.
///
/// Mutating operations are transactional; concurrent reads are safe.
/// Storage I/O failures are retried once with backoff inside the
/// implementation; the second failure surfaces. Serialization failures
/// surface immediately.
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    /// Persists a snapshot, replacing any checkpoint with the same key.
    /// Returns the row id of the stored checkpoint.
    async fn save(
        &self,
        state: &SessionState,
        kind: CheckpointKind,
        label: &str,
    ) -> Result<i64, CheckpointError>;

    /// Loads the checkpoint at `step`, or the highest-step checkpoint when
    /// `step` is `None`. `NotFound` when the session has no checkpoints.
    async fn load(
        &self,
        session_id: &str,
        step: Option<i64>,
    ) -> Result<SessionState, CheckpointError>;

    /// Lists the session's checkpoints ordered by step ascending.
    async fn list(&self, session_id: &str) -> Result<Vec<CheckpointListItem>, CheckpointError>;

    /// Loads the checkpoint at `step` and deletes every checkpoint of the
    /// session with a larger step. Atomic: both or neither persist.
    async fn rollback(
        &self,
        session_id: &str,
        step: i64,
    ) -> Result<SessionState, CheckpointError>;

    /// Removes all checkpoints of the session; returns the number deleted.
    async fn delete_session(&self, session_id: &str) -> Result<usize, CheckpointError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    /// **Scenario**: kind round-trips through its string form; unknown input
    /// degrades to Transaction.
    #[test]
    fn kind_string_roundtrip() {
        for kind in [CheckpointKind::Transaction, CheckpointKind::Milestone] {
            assert_eq!(CheckpointKind::from_str_lossy(kind.as_str()), kind);
        }
        assert_eq!(
            CheckpointKind::from_str_lossy("unknown"),
            CheckpointKind::Transaction
        );
    }

    /// **Scenario**: Display of each error variant contains its kind keyword.
    #[test]
    fn checkpoint_error_display() {
        assert!(CheckpointError::Serialization("e".into())
            .to_string()
            .contains("serialization"));
        assert!(CheckpointError::Storage("io".into())
            .to_string()
            .contains("storage"));
        assert!(CheckpointError::NotFound("s1".into())
            .to_string()
            .contains("not found"));
    }
}
