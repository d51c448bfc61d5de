//! In-memory checkpoint store: same contract as SQLite, no durability.
//!
//! Used in tests and in deployments that disable checkpointing but still want
//! rollback within the process lifetime.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicI64, Ordering};

use async_trait::async_trait;
use dashmap::DashMap;

use crate::checkpoint::{
    CheckpointError, CheckpointKind, CheckpointListItem, CheckpointStore,
};
use crate::state::SessionState;

#[derive(Clone)]
struct StoredCheckpoint {
    row_id: i64,
    state_json: String,
    label: String,
    created_at: String,
}

/// Checkpoint store over a per-session ordered map.
///
/// Key order `(step, kind)` gives `list` its ascending order for free; the
/// row id mimics the SQLite autoincrement so "latest insert wins at equal
/// step" behaves identically.
#[derive(Default)]
pub struct MemoryCheckpointStore {
    sessions: DashMap<String, BTreeMap<(i64, CheckpointKind), StoredCheckpoint>>,
    next_row_id: AtomicI64,
}

impl MemoryCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CheckpointStore for MemoryCheckpointStore {
    async fn save(
        &self,
        state: &SessionState,
        kind: CheckpointKind,
        label: &str,
    ) -> Result<i64, CheckpointError> {
        let state_json = serde_json::to_string(state)
            .map_err(|e| CheckpointError::Serialization(e.to_string()))?;
        let row_id = self.next_row_id.fetch_add(1, Ordering::SeqCst) + 1;
        self.sessions
            .entry(state.session_id.clone())
            .or_default()
            .insert(
                (state.step, kind),
                StoredCheckpoint {
                    row_id,
                    state_json,
                    label: label.to_string(),
                    created_at: chrono::Utc::now().to_rfc3339(),
                },
            );
        Ok(row_id)
    }

    async fn load(
        &self,
        session_id: &str,
        step: Option<i64>,
    ) -> Result<SessionState, CheckpointError> {
        let session = self
            .sessions
            .get(session_id)
            .ok_or_else(|| CheckpointError::NotFound(session_id.to_string()))?;
        let stored = match step {
            Some(step) => session
                .range((step, CheckpointKind::Transaction)..=(step, CheckpointKind::Milestone))
                .max_by_key(|(_, cp)| cp.row_id)
                .map(|(_, cp)| cp.clone()),
            None => {
                // Highest step; at equal step the latest insert wins.
                let max_step = session.keys().map(|(s, _)| *s).max();
                max_step.and_then(|step| {
                    session
                        .range(
                            (step, CheckpointKind::Transaction)
                                ..=(step, CheckpointKind::Milestone),
                        )
                        .max_by_key(|(_, cp)| cp.row_id)
                        .map(|(_, cp)| cp.clone())
                })
            }
        }
        .ok_or_else(|| CheckpointError::NotFound(format!("{} step {:?}", session_id, step)))?;
        serde_json::from_str(&stored.state_json)
            .map_err(|e| CheckpointError::Serialization(e.to_string()))
    }

    async fn list(&self, session_id: &str) -> Result<Vec<CheckpointListItem>, CheckpointError> {
        Ok(self
            .sessions
            .get(session_id)
            .map(|session| {
                session
                    .iter()
                    .map(|((step, kind), cp)| CheckpointListItem {
                        step: *step,
                        kind: *kind,
                        label: cp.label.clone(),
                        created_at: cp.created_at.clone(),
                    })
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn rollback(
        &self,
        session_id: &str,
        step: i64,
    ) -> Result<SessionState, CheckpointError> {
        let state = self.load(session_id, Some(step)).await?;
        if let Some(mut session) = self.sessions.get_mut(session_id) {
            session.retain(|(s, _), _| *s <= step);
        }
        Ok(state)
    }

    async fn delete_session(&self, session_id: &str) -> Result<usize, CheckpointError> {
        Ok(self
            .sessions
            .remove(session_id)
            .map(|(_, session)| session.len())
            .unwrap_or(0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state_at(session_id: &str, step: i64) -> SessionState {
        let mut s = SessionState::new();
        s.session_id = session_id.to_string();
        s.step = step;
        s
    }

    /// **Scenario**: save then load of the same (session, step, kind) returns
    /// equal state.
    #[tokio::test]
    async fn save_load_same_key() {
        let store = MemoryCheckpointStore::new();
        let mut state = state_at("s1", 3);
        state.update_summary("progress");
        store
            .save(&state, CheckpointKind::Transaction, "t")
            .await
            .unwrap();
        let loaded = store.load("s1", Some(3)).await.unwrap();
        assert_eq!(loaded.internal_summary, "progress");
        assert_eq!(loaded.step, 3);
    }

    /// **Scenario**: load without a step returns the highest-step checkpoint.
    #[tokio::test]
    async fn load_latest_without_step() {
        let store = MemoryCheckpointStore::new();
        for step in [1, 5, 3] {
            store
                .save(&state_at("s1", step), CheckpointKind::Transaction, "")
                .await
                .unwrap();
        }
        let loaded = store.load("s1", None).await.unwrap();
        assert_eq!(loaded.step, 5);
    }

    /// **Scenario**: after rollback(k), list returns only steps ≤ k and load
    /// returns exactly step k.
    #[tokio::test]
    async fn rollback_prunes_later_steps() {
        let store = MemoryCheckpointStore::new();
        for step in 1..=4 {
            store
                .save(&state_at("s1", step), CheckpointKind::Transaction, "")
                .await
                .unwrap();
        }
        let state = store.rollback("s1", 2).await.unwrap();
        assert_eq!(state.step, 2);

        let items = store.list("s1").await.unwrap();
        assert!(items.iter().all(|i| i.step <= 2));
        assert_eq!(store.load("s1", None).await.unwrap().step, 2);
    }

    /// **Scenario**: saving the same key twice replaces the snapshot.
    #[tokio::test]
    async fn save_replaces_on_same_key() {
        let store = MemoryCheckpointStore::new();
        let mut state = state_at("s1", 1);
        state.update_summary("first");
        store
            .save(&state, CheckpointKind::Milestone, "a")
            .await
            .unwrap();
        state.update_summary("second");
        store
            .save(&state, CheckpointKind::Milestone, "b")
            .await
            .unwrap();

        assert_eq!(store.list("s1").await.unwrap().len(), 1);
        assert_eq!(
            store.load("s1", Some(1)).await.unwrap().internal_summary,
            "second"
        );
    }

    /// **Scenario**: missing session yields NotFound; delete_session empties
    /// the listing.
    #[tokio::test]
    async fn not_found_and_delete() {
        let store = MemoryCheckpointStore::new();
        assert!(matches!(
            store.load("absent", None).await,
            Err(CheckpointError::NotFound(_))
        ));

        store
            .save(&state_at("s2", 1), CheckpointKind::Transaction, "")
            .await
            .unwrap();
        assert_eq!(store.delete_session("s2").await.unwrap(), 1);
        assert!(store.list("s2").await.unwrap().is_empty());
    }
}
