//! Human-in-the-loop: suspend the state machine, wait for an external
//! decision, resume or fail.
//!
//! [`HitlController`] owns the suspend/resume state transitions and the
//! pending-approval registry; delivery of the actual human decision is a
//! capability behind [`ApprovalChannel`], with two realizations:
//!
//! - [`CliApprovalChannel`]: in-process notify/slot pair fed by the shell's
//!   `/approve` and `/reject` commands.
//! - [`BusApprovalChannel`]: publishes an `approval_request` event and
//!   consumes the response from a bounded mailbox (external gateways).
//!
//! A timeout without a response is an implicit reject (`action=Timeout`).

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::{json, Value};
use tokio::sync::{mpsc, Mutex, Notify};
use tracing::{error, info, warn};

use crate::checkpoint::{CheckpointError, CheckpointKind, CheckpointStore};
use crate::events::{Event, EventBus, EventType};
use crate::state::{SessionState, SessionStatus};

/// Default wait before an approval request times out.
pub const DEFAULT_APPROVAL_TIMEOUT: Duration = Duration::from_secs(300);

/// Human decision on a pending approval.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ApprovalAction {
    Approve,
    Reject,
    Modify,
    /// No response within the wait window.
    Timeout,
}

impl ApprovalAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            ApprovalAction::Approve => "approve",
            ApprovalAction::Reject => "reject",
            ApprovalAction::Modify => "modify",
            ApprovalAction::Timeout => "timeout",
        }
    }
}

/// Outcome of one approval wait.
#[derive(Clone, Debug)]
pub struct ApprovalResult {
    pub approved: bool,
    pub action: ApprovalAction,
    pub reason: String,
    pub responded_at: String,
    /// Patch supplied with a Modify decision.
    pub modified_data: Option<Value>,
}

impl ApprovalResult {
    fn timed_out() -> Self {
        Self {
            approved: false,
            action: ApprovalAction::Timeout,
            reason: "no response within the wait window".to_string(),
            responded_at: chrono::Utc::now().to_rfc3339(),
            modified_data: None,
        }
    }
}

/// Capability for requesting an approval and waiting for the decision.
///
/// `timeout` of zero falls back to the channel default (300 s).
#[async_trait]
pub trait ApprovalChannel: Send + Sync {
    /// Announces a pending approval to whoever can answer it.
    async fn request(&self, reason: &str, context: Value);

    /// Waits for the decision; elapses into an implicit reject.
    async fn wait(&self, timeout: Duration) -> ApprovalResult;
}

fn effective_timeout(timeout: Duration) -> Duration {
    if timeout.is_zero() {
        DEFAULT_APPROVAL_TIMEOUT
    } else {
        timeout
    }
}

/// In-process channel for an interactive shell: `/approve` or `/reject`
/// resolves the wait.
#[derive(Default)]
pub struct CliApprovalChannel {
    notify: Notify,
    slot: Mutex<Option<ApprovalResult>>,
    pending_reason: Mutex<Option<String>>,
}

impl CliApprovalChannel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reason of the request currently awaiting an answer, if any.
    pub async fn pending_reason(&self) -> Option<String> {
        self.pending_reason.lock().await.clone()
    }

    /// Delivers the human decision; called by the shell command handler.
    pub async fn respond(&self, action: ApprovalAction, reason: &str, modified_data: Option<Value>) {
        let result = ApprovalResult {
            approved: matches!(action, ApprovalAction::Approve | ApprovalAction::Modify),
            action,
            reason: reason.to_string(),
            responded_at: chrono::Utc::now().to_rfc3339(),
            modified_data,
        };
        *self.slot.lock().await = Some(result);
        self.notify.notify_one();
    }
}

#[async_trait]
impl ApprovalChannel for CliApprovalChannel {
    async fn request(&self, reason: &str, _context: Value) {
        *self.pending_reason.lock().await = Some(reason.to_string());
        *self.slot.lock().await = None;
        info!(reason, "approval requested (answer with /approve or /reject)");
    }

    async fn wait(&self, timeout: Duration) -> ApprovalResult {
        let deadline = effective_timeout(timeout);
        let result = tokio::time::timeout(deadline, async {
            loop {
                if let Some(result) = self.slot.lock().await.take() {
                    return result;
                }
                self.notify.notified().await;
            }
        })
        .await
        .unwrap_or_else(|_| ApprovalResult::timed_out());
        *self.pending_reason.lock().await = None;
        result
    }
}

/// Event-bus-backed channel: the request is published as an
/// `approval_request` event; the decision arrives through a bounded mailbox.
pub struct BusApprovalChannel {
    bus: Arc<EventBus>,
    mailbox_tx: mpsc::Sender<ApprovalResult>,
    mailbox_rx: Mutex<mpsc::Receiver<ApprovalResult>>,
}

impl BusApprovalChannel {
    pub fn new(bus: Arc<EventBus>) -> Self {
        let (tx, rx) = mpsc::channel(8);
        Self {
            bus,
            mailbox_tx: tx,
            mailbox_rx: Mutex::new(rx),
        }
    }

    /// Delivers a decision into the mailbox (e.g. from a gateway handler).
    /// Returns false when the mailbox is full.
    pub fn deliver(&self, result: ApprovalResult) -> bool {
        self.mailbox_tx.try_send(result).is_ok()
    }
}

#[async_trait]
impl ApprovalChannel for BusApprovalChannel {
    async fn request(&self, reason: &str, context: Value) {
        self.bus.publish(Event::new(
            EventType::ApprovalRequest,
            "hitl",
            json!({ "reason": reason, "context": context }),
        ));
    }

    async fn wait(&self, timeout: Duration) -> ApprovalResult {
        let deadline = effective_timeout(timeout);
        let mut rx = self.mailbox_rx.lock().await;
        match tokio::time::timeout(deadline, rx.recv()).await {
            Ok(Some(result)) => {
                self.bus.publish(Event::new(
                    EventType::ApprovalResponse,
                    "hitl",
                    json!({ "action": result.action.as_str(), "approved": result.approved }),
                ));
                result
            }
            _ => ApprovalResult::timed_out(),
        }
    }
}

/// A pending approval as seen by operators.
#[derive(Clone, Debug)]
pub struct PendingApproval {
    pub reason: String,
    pub context: Value,
    pub step: i64,
}

/// Suspend/resume controller over the checkpoint store.
pub struct HitlController {
    checkpoints: Arc<dyn CheckpointStore>,
    pending: DashMap<String, PendingApproval>,
}

impl HitlController {
    pub fn new(checkpoints: Arc<dyn CheckpointStore>) -> Self {
        Self {
            checkpoints,
            pending: DashMap::new(),
        }
    }

    /// Transitions the state to Suspended, persists a TRANSACTION checkpoint,
    /// and records the pending approval.
    pub async fn suspend(
        &self,
        state: &mut SessionState,
        reason: &str,
        function: Option<String>,
        args: Option<Value>,
    ) -> Result<(), CheckpointError> {
        state.suspend(reason, function.clone(), args.clone());
        self.checkpoints
            .save(
                state,
                CheckpointKind::Transaction,
                &format!("HITL: {}", reason),
            )
            .await?;
        self.pending.insert(
            state.session_id.clone(),
            PendingApproval {
                reason: reason.to_string(),
                context: json!({ "function": function, "args": args }),
                step: state.step,
            },
        );
        info!(session = %state.session_id, reason, "session suspended");
        Ok(())
    }

    /// Resumes a suspended session.
    ///
    /// - `Approve`: back to Running, optional patch merged, state returned.
    /// - `Modify`: as Approve; `modified_data` is required.
    /// - `Reject` (and `Timeout`): Failed, a MILESTONE "rejected" checkpoint
    ///   is written, nothing is returned.
    pub async fn resume(
        &self,
        session_id: &str,
        action: ApprovalAction,
        modified_data: Option<&Value>,
    ) -> Result<Option<SessionState>, CheckpointError> {
        let mut state = match self.checkpoints.load(session_id, None).await {
            Ok(state) => state,
            Err(e) => {
                error!(session = %session_id, error = %e, "cannot resume: no checkpoint");
                return Err(e);
            }
        };

        if state.status != SessionStatus::Suspended {
            warn!(
                session = %session_id,
                status = ?state.status,
                "resume on a session that is not suspended"
            );
        }

        match action {
            ApprovalAction::Reject | ApprovalAction::Timeout => {
                state.status = SessionStatus::Failed;
                state.hitl_context = None;
                self.checkpoints
                    .save(&state, CheckpointKind::Milestone, "HITL: rejected")
                    .await?;
                self.pending.remove(session_id);
                info!(session = %session_id, "session rejected");
                Ok(None)
            }
            ApprovalAction::Modify => {
                let Some(data) = modified_data else {
                    return Err(CheckpointError::Serialization(
                        "modify requires modified_data".to_string(),
                    ));
                };
                state.resume(Some(data));
                self.pending.remove(session_id);
                info!(session = %session_id, "session modified and resumed");
                Ok(Some(state))
            }
            ApprovalAction::Approve => {
                state.resume(modified_data);
                self.pending.remove(session_id);
                info!(session = %session_id, "session approved and resumed");
                Ok(Some(state))
            }
        }
    }

    /// The pending approval of one session, if any.
    pub fn pending(&self, session_id: &str) -> Option<PendingApproval> {
        self.pending.get(session_id).map(|p| p.clone())
    }

    /// All pending approvals, keyed by session.
    pub fn list_pending(&self) -> Vec<(String, PendingApproval)> {
        self.pending
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect()
    }
}
