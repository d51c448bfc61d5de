//! Durable session state shared across the whole pipeline.
//!
//! [`SessionState`] is the one serializable entity the orchestrator mutates
//! and the checkpoint store persists. It carries the conversation history,
//! working memory (summary, entities, artifacts), routing stickiness, the
//! active persona, and the HITL suspension context.
//!
//! Invariants:
//! - `status == Suspended` ⇔ `hitl_context.is_some()` (enforced by
//!   [`SessionState::suspend`] / [`SessionState::resume`] being the only
//!   mutators of the pair).
//! - `step` never decreases outside a checkpoint rollback.
//! - `current_agent` is cleared on any escalation
//!   ([`SessionState::reset_routing`]).
//! - The whole struct round-trips losslessly through serde.

use std::collections::BTreeMap;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::router::Destination;

/// Lifecycle status of a session.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionStatus {
    Running,
    Paused,
    /// Waiting for a human decision; `hitl_context` holds the request.
    Suspended,
    Completed,
    Failed,
}

/// A single tool invocation produced by the LLM and consumed by the
/// inference loop.
///
/// `arguments` stays a JSON string until dispatch; the registry parses and
/// schema-validates it. `id` ties the eventual tool-role result message back
/// to this call.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ToolCall {
    pub name: String,
    pub arguments: String,
    pub id: Option<String>,
}

/// Role tag for durable conversation history.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
    Tool,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::System => "system",
            Role::Tool => "tool",
        }
    }
}

/// Typed per-message metadata. Dynamic JSON stays at the LLM boundary; here
/// every recorded fact has a field.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct MessageMeta {
    /// Which component produced the reply ("semantic-cache", "local-worker",
    /// a cloud model id, ...).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub handler: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cache_hit: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub validation_passed: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub critic_passed: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub streamed: Option<bool>,
    /// Routing or escalation reason label.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    /// Persona active when the message was produced.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub persona: Option<String>,
    /// True when the routing decision was reused from the previous turn.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sticky: Option<bool>,
    /// First 500 characters of the failed local output, recorded on escalation.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prior_output_excerpt: Option<String>,
}

/// One durable conversation entry: role, content, timestamp, typed metadata.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct HistoryMessage {
    pub role: Role,
    pub content: String,
    pub timestamp: String,
    #[serde(default)]
    pub metadata: MessageMeta,
}

impl HistoryMessage {
    /// Creates an entry stamped with the current UTC time.
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            timestamp: Utc::now().to_rfc3339(),
            metadata: MessageMeta::default(),
        }
    }

    /// Attaches metadata.
    pub fn with_meta(mut self, metadata: MessageMeta) -> Self {
        self.metadata = metadata;
        self
    }
}

/// Aggregate usage and cost accounting, persisted with the state.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct UsageMetadata {
    pub created_at: String,
    pub elapsed_ms: f64,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub estimated_cost_usd: f64,
}

/// Pending human-approval request, present iff the session is Suspended.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct HitlContext {
    pub reason: String,
    pub suspended_at: String,
    /// Function whose invocation triggered the suspension, when known.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub function: Option<String>,
    /// Arguments of that function.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub args: Option<Value>,
}

/// Condensed context passed between agents instead of the full history.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct HandoffContext {
    pub summary: String,
    pub entities: BTreeMap<String, Value>,
    pub turn_number: u32,
    pub active_persona: String,
    /// Last three conversation entries.
    pub recent_messages: Vec<HistoryMessage>,
}

impl HandoffContext {
    /// Renders the handoff as a compact prompt block; empty sections omitted.
    pub fn to_prompt_block(&self) -> String {
        let mut lines = Vec::new();
        if !self.summary.is_empty() {
            lines.push(format!("Summary so far: {}", self.summary));
        }
        if !self.entities.is_empty() {
            let entities = self
                .entities
                .iter()
                .map(|(k, v)| format!("{}={}", k, v))
                .collect::<Vec<_>>()
                .join(", ");
            lines.push(format!("Known facts: {}", entities));
        }
        for m in &self.recent_messages {
            lines.push(format!("[{}] {}", m.role.as_str(), m.content));
        }
        lines.join("\n")
    }
}

/// The serializable state shared across the agent pipeline.
///
/// Owned by exactly one orchestrator at a time; other components receive it
/// by reference and mutate only through these helpers.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SessionState {
    // Session identity
    pub session_id: String,
    /// Monotonic step counter; incremented on each significant action and
    /// restored only by rollback.
    pub step: i64,
    pub status: SessionStatus,

    // Conversation
    pub conversation_history: Vec<HistoryMessage>,

    // Working memory
    pub internal_summary: String,
    pub entities: BTreeMap<String, Value>,
    pub artifacts: BTreeMap<String, Value>,

    // Routing
    /// Sticky routing target; `None` means "consult the router", which is
    /// distinct from an explicit Local decision.
    pub current_agent: Option<Destination>,
    pub retry_count: u32,
    pub turn_number: u32,

    // Persona
    pub active_persona: String,

    // Accounting
    pub metadata: UsageMetadata,

    // HITL
    pub hitl_context: Option<HitlContext>,
}

impl Default for SessionState {
    fn default() -> Self {
        Self {
            session_id: uuid::Uuid::new_v4().to_string(),
            step: 0,
            status: SessionStatus::Running,
            conversation_history: Vec::new(),
            internal_summary: String::new(),
            entities: BTreeMap::new(),
            artifacts: BTreeMap::new(),
            current_agent: None,
            retry_count: 0,
            turn_number: 0,
            active_persona: "worker".to_string(),
            metadata: UsageMetadata {
                created_at: Utc::now().to_rfc3339(),
                ..UsageMetadata::default()
            },
            hitl_context: None,
        }
    }
}

impl SessionState {
    /// Creates a fresh running session with a random id.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets an extracted fact.
    pub fn set_entity(&mut self, key: impl Into<String>, value: Value) {
        self.entities.insert(key.into(), value);
    }

    /// Reads an extracted fact.
    pub fn entity(&self, key: &str) -> Option<&Value> {
        self.entities.get(key)
    }

    /// Replaces the condensed handoff summary.
    pub fn update_summary(&mut self, summary: impl Into<String>) {
        self.internal_summary = summary.into();
    }

    /// Clears sticky routing; called on every escalation.
    pub fn reset_routing(&mut self) {
        self.current_agent = None;
    }

    /// Starts a new user-facing turn; resets the per-turn retry budget.
    pub fn increment_turn(&mut self) {
        self.turn_number += 1;
        self.retry_count = 0;
    }

    /// Advances the monotonic step counter.
    pub fn increment_step(&mut self) {
        self.step += 1;
    }

    /// Appends a conversation entry.
    pub fn push_message(&mut self, message: HistoryMessage) {
        self.conversation_history.push(message);
    }

    /// Condensed context for agent handoff: summary, entities, turn number,
    /// and the last three messages.
    pub fn handoff_context(&self) -> HandoffContext {
        let recent = self
            .conversation_history
            .iter()
            .rev()
            .take(3)
            .rev()
            .cloned()
            .collect();
        HandoffContext {
            summary: self.internal_summary.clone(),
            entities: self.entities.clone(),
            turn_number: self.turn_number,
            active_persona: self.active_persona.clone(),
            recent_messages: recent,
        }
    }

    /// Transitions to Suspended with the pending approval recorded.
    pub fn suspend(&mut self, reason: impl Into<String>, function: Option<String>, args: Option<Value>) {
        self.status = SessionStatus::Suspended;
        self.hitl_context = Some(HitlContext {
            reason: reason.into(),
            suspended_at: Utc::now().to_rfc3339(),
            function,
            args,
        });
    }

    /// Returns to Running, optionally merging human-modified data.
    ///
    /// `modified_data` keys `entities` and `artifacts` merge into the
    /// corresponding maps; any other key is stored as an artifact.
    pub fn resume(&mut self, modified_data: Option<&Value>) {
        self.status = SessionStatus::Running;
        if let Some(Value::Object(map)) = modified_data {
            for (key, value) in map {
                match (key.as_str(), value) {
                    ("entities", Value::Object(patch)) => {
                        for (k, v) in patch {
                            self.entities.insert(k.clone(), v.clone());
                        }
                    }
                    ("artifacts", Value::Object(patch)) => {
                        for (k, v) in patch {
                            self.artifacts.insert(k.clone(), v.clone());
                        }
                    }
                    _ => {
                        self.artifacts.insert(key.clone(), value.clone());
                    }
                }
            }
        }
        self.hitl_context = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    /// **Scenario**: full serde round-trip preserves every observable field.
    #[test]
    fn session_state_roundtrip() {
        let mut state = SessionState::new();
        state.increment_turn();
        state.increment_step();
        state.set_entity("customer", json!("acme"));
        state.artifacts.insert("draft".into(), json!({"v": 1}));
        state.current_agent = Some(Destination::Local);
        state.update_summary("first contact");
        state.push_message(
            HistoryMessage::new(Role::User, "hello").with_meta(MessageMeta {
                handler: Some("local-worker".into()),
                ..MessageMeta::default()
            }),
        );
        state.suspend("sensitive op", Some("send_email".into()), Some(json!({"to": "x"})));

        let bytes = serde_json::to_vec(&state).expect("serialize");
        let back: SessionState = serde_json::from_slice(&bytes).expect("deserialize");

        assert_eq!(back.session_id, state.session_id);
        assert_eq!(back.step, state.step);
        assert_eq!(back.status, SessionStatus::Suspended);
        assert_eq!(back.turn_number, 1);
        assert_eq!(back.conversation_history, state.conversation_history);
        assert_eq!(back.internal_summary, state.internal_summary);
        assert_eq!(back.entities, state.entities);
        assert_eq!(back.artifacts, state.artifacts);
        assert_eq!(back.current_agent, Some(Destination::Local));
        assert_eq!(back.hitl_context, state.hitl_context);
    }

    /// **Scenario**: suspended ⇔ hitl_context present; resume clears both.
    #[test]
    fn suspend_resume_invariant() {
        let mut state = SessionState::new();
        assert!(state.hitl_context.is_none());

        state.suspend("approval needed", None, None);
        assert_eq!(state.status, SessionStatus::Suspended);
        assert!(state.hitl_context.is_some());

        state.resume(None);
        assert_eq!(state.status, SessionStatus::Running);
        assert!(state.hitl_context.is_none());
    }

    /// **Scenario**: resume merges entities/artifacts patches and stores
    /// unknown keys as artifacts.
    #[test]
    fn resume_merges_modified_data() {
        let mut state = SessionState::new();
        state.set_entity("keep", json!(1));
        state.suspend("check", None, None);

        state.resume(Some(&json!({
            "entities": {"added": "yes"},
            "artifacts": {"doc": "v2"},
            "note": "stored as artifact"
        })));

        assert_eq!(state.entity("keep"), Some(&json!(1)));
        assert_eq!(state.entity("added"), Some(&json!("yes")));
        assert_eq!(state.artifacts.get("doc"), Some(&json!("v2")));
        assert_eq!(state.artifacts.get("note"), Some(&json!("stored as artifact")));
    }

    /// **Scenario**: increment_turn resets the retry budget; handoff carries
    /// only the last three messages.
    #[test]
    fn turn_and_handoff() {
        let mut state = SessionState::new();
        state.retry_count = 2;
        state.increment_turn();
        assert_eq!(state.retry_count, 0);

        for i in 0..5 {
            state.push_message(HistoryMessage::new(Role::User, format!("m{}", i)));
        }
        let handoff = state.handoff_context();
        assert_eq!(handoff.recent_messages.len(), 3);
        assert_eq!(handoff.recent_messages[0].content, "m2");
        assert_eq!(handoff.recent_messages[2].content, "m4");
    }

    /// **Scenario**: reset_routing clears stickiness but nothing else.
    #[test]
    fn reset_routing_clears_current_agent() {
        let mut state = SessionState::new();
        state.current_agent = Some(Destination::Cloud);
        state.reset_routing();
        assert!(state.current_agent.is_none());
    }
}
