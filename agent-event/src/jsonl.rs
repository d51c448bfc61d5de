//! JSONL encoding: one event per line.
//!
//! The per-session event log file is a sequence of these lines; a line never
//! contains embedded newlines regardless of payload content.

use crate::event::Event;

/// Encodes one event as a single JSONL line (no trailing newline).
///
/// serde_json's compact encoding escapes newlines inside strings, so the
/// result is guaranteed to be one physical line.
pub fn to_jsonl_line(event: &Event) -> Result<String, serde_json::Error> {
    serde_json::to_string(event)
}
