//! Per-session JSONL event log: one line per event.
//!
//! The target file is `{dir}/{session_id}.events.jsonl`, where the session id
//! is read from the event payload (the orchestrator stamps it on every event
//! it publishes). Events without a session id land in `events.jsonl`.

use std::path::{Path, PathBuf};

use agent_event::{to_jsonl_line, Event};

/// Append-only JSONL sink. Writes happen on the blocking pool.
pub struct JsonlEventLog {
    dir: PathBuf,
}

impl JsonlEventLog {
    /// Creates the sink, ensuring the log directory exists.
    pub fn new(dir: impl AsRef<Path>) -> std::io::Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    fn path_for(&self, event: &Event) -> PathBuf {
        match event.payload.get("session_id").and_then(|v| v.as_str()) {
            Some(session) => self.dir.join(format!("{}.events.jsonl", session)),
            None => self.dir.join("events.jsonl"),
        }
    }

    /// Appends one event as a single line.
    pub async fn append(&self, event: &Event) -> std::io::Result<()> {
        let line = to_jsonl_line(event)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        let path = self.path_for(event);
        tokio::task::spawn_blocking(move || {
            use std::io::Write;
            let mut file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)?;
            writeln!(file, "{}", line)
        })
        .await
        .map_err(|e| std::io::Error::other(e.to_string()))?
    }
}
