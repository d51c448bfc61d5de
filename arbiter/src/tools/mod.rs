//! Tool abstraction: a uniform capability set over built-in local tools and
//! dynamically attached external providers.
//!
//! A tool is `{name, description, JSON schema, invoke(args) → text}`. The
//! registry merges two sources into one name-indexed map: the built-in set
//! (file read, directory listing) and any number of
//! [`ExternalToolProvider`]s resolved once at startup. Arguments are
//! validated against the tool's schema before dispatch; a validation failure
//! becomes the tool result so the model can retry with corrected arguments.

mod file;
mod provider;
mod registry;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

pub use file::{ListDirTool, ReadFileTool, TOOL_LIST_DIR, TOOL_READ_FILE};
pub use provider::{register_provider_tools, ExternalToolProvider, ProviderTool};
pub use registry::ToolRegistry;

/// Tool specification advertised to the LLM.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct ToolSpec {
    pub name: String,
    pub description: Option<String>,
    /// JSON Schema of the arguments object.
    pub input_schema: Value,
}

/// Result text of a single tool call.
#[derive(Debug, Clone)]
pub struct ToolCallContent {
    pub text: String,
}

/// Errors from listing or calling tools.
///
/// Everything except `ApprovalRequired` ends up as an error string in a
/// tool-role message; `ApprovalRequired` unwinds the inference loop into a
/// HITL suspension.
#[derive(Debug, Error)]
pub enum ToolError {
    #[error("tool not found: {0}")]
    NotFound(String),
    #[error("invalid arguments: {0}")]
    InvalidInput(String),
    /// Sandbox policy denial; the message is the denial string.
    #[error("{0}")]
    Denied(String),
    #[error("tool execution failed: {0}")]
    Execution(String),
    /// The tool requires a human decision before it may run.
    #[error("approval required: {reason}")]
    ApprovalRequired {
        reason: String,
        function: String,
        args: Value,
    },
}

/// A callable tool.
#[async_trait]
pub trait Tool: Send + Sync {
    /// Registry key; must match `spec().name`.
    fn name(&self) -> &str;

    /// Schema and description for the LLM.
    fn spec(&self) -> ToolSpec;

    /// Executes with already-validated arguments.
    async fn call(&self, args: Value) -> Result<ToolCallContent, ToolError>;
}
