//! Event type and payload: wire shape for one observability event.
//!
//! `EventType` is a closed enumeration; new categories are a breaking change
//! by design so consumers can match exhaustively. Payloads stay `serde_json::Value`
//! at this boundary; arbiter converts to typed structs on consumption.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// All event categories exchanged inside the orchestration process.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    // User interaction
    UserMessage,
    AgentResponse,

    // Agent internals
    Thinking,
    Decision,

    // Tool execution
    ToolCall,
    ToolResult,

    // Human-in-the-loop
    ApprovalRequest,
    ApprovalResponse,

    // System
    SystemNotification,
    Error,
    Metric,

    // Lifecycle
    SessionStart,
    SessionEnd,
}

impl EventType {
    /// Snake_case name as it appears on the wire (e.g. `tool_call`).
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::UserMessage => "user_message",
            EventType::AgentResponse => "agent_response",
            EventType::Thinking => "thinking",
            EventType::Decision => "decision",
            EventType::ToolCall => "tool_call",
            EventType::ToolResult => "tool_result",
            EventType::ApprovalRequest => "approval_request",
            EventType::ApprovalResponse => "approval_response",
            EventType::SystemNotification => "system_notification",
            EventType::Error => "error",
            EventType::Metric => "metric",
            EventType::SessionStart => "session_start",
            EventType::SessionEnd => "session_end",
        }
    }
}

/// One structured event: id, type, source, timestamp, payload.
///
/// `source` names the producing component ("user", "router", "worker",
/// "critic", "hitl", "system", ...). `timestamp` is an ISO-8601 UTC string.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Event {
    pub event_id: String,
    #[serde(rename = "type")]
    pub event_type: EventType,
    pub source: String,
    pub timestamp: String,
    pub payload: Value,
}

impl Event {
    /// Creates an event with a fresh id and the current UTC timestamp.
    pub fn new(event_type: EventType, source: impl Into<String>, payload: Value) -> Self {
        Self {
            event_id: uuid::Uuid::new_v4().to_string(),
            event_type,
            source: source.into(),
            timestamp: Utc::now().to_rfc3339(),
            payload,
        }
    }

    /// Serializes this event to a JSON object.
    pub fn to_value(&self) -> Result<Value, serde_json::Error> {
        serde_json::to_value(self)
    }
}
