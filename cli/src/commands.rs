//! Slash command parsing for the interactive shell.

/// A parsed shell command.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Command {
    /// Create and switch to a fresh session.
    New { name: String },
    /// Load an existing session's latest checkpoint.
    Load { name: String },
    /// List sessions seen this run.
    List,
    /// Show the current session's status.
    Current,
    /// Clear the current conversation history.
    Clear,
    /// Conversation statistics.
    Stats,
    /// Switch the cloud model (shortcut or full name).
    Model { name: String },
    /// Switch the active persona.
    Persona { id: String },
    /// Manual milestone checkpoint with an optional label.
    Checkpoint { label: Option<String> },
    /// Roll back to a step (latest checkpointed step when omitted).
    Rollback { step: Option<i64> },
    /// Run adversarial verification on the last response.
    Debate,
    /// Approve the pending HITL request.
    Approve,
    /// Reject the pending HITL request.
    Reject,
    /// Leave the shell.
    Exit,
}

/// Parse error with the message shown to the user.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ParseError {
    #[error("unknown command: {0}")]
    Unknown(String),
    #[error("usage: {0}")]
    Usage(&'static str),
}

impl Command {
    /// Parses a `/command` line. Returns `Ok(None)` for non-command input.
    pub fn parse(line: &str) -> Result<Option<Command>, ParseError> {
        let line = line.trim();
        if !line.starts_with('/') {
            return Ok(None);
        }
        let mut parts = line.splitn(2, char::is_whitespace);
        let head = parts.next().unwrap_or_default();
        let rest = parts.next().map(str::trim).filter(|s| !s.is_empty());

        let command = match head {
            "/new" => Command::New {
                name: rest.ok_or(ParseError::Usage("/new <name>"))?.to_string(),
            },
            "/load" => Command::Load {
                name: rest.ok_or(ParseError::Usage("/load <name>"))?.to_string(),
            },
            "/list" => Command::List,
            "/current" => Command::Current,
            "/clear" => Command::Clear,
            "/stats" => Command::Stats,
            "/model" => Command::Model {
                name: rest.ok_or(ParseError::Usage("/model <name>"))?.to_string(),
            },
            "/persona" => Command::Persona {
                id: rest.ok_or(ParseError::Usage("/persona <id>"))?.to_string(),
            },
            "/checkpoint" => Command::Checkpoint {
                label: rest.map(str::to_string),
            },
            "/rollback" => Command::Rollback {
                step: match rest {
                    Some(s) => Some(
                        s.parse()
                            .map_err(|_| ParseError::Usage("/rollback [step]"))?,
                    ),
                    None => None,
                },
            },
            "/debate" => Command::Debate,
            "/approve" => Command::Approve,
            "/reject" => Command::Reject,
            "/exit" | "/quit" => Command::Exit,
            other => return Err(ParseError::Unknown(other.to_string())),
        };
        Ok(Some(command))
    }
}
