//! Built-in file tools: read a file, list a directory.
//!
//! Both consult the [`SandboxGuard`] before touching the filesystem, so path
//! traversal and symlink games end as denial strings in the tool result.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::sandbox::SandboxGuard;
use crate::tools::{Tool, ToolCallContent, ToolError, ToolSpec};

/// Tool name for reading a file.
pub const TOOL_READ_FILE: &str = "read_file";

/// Tool name for listing a directory.
pub const TOOL_LIST_DIR: &str = "list_dir";

/// Default cap on file content returned to the model.
pub const DEFAULT_MAX_READ_BYTES: usize = 64 * 1024;

/// Reads UTF-8 file content up to a configured maximum size.
pub struct ReadFileTool {
    guard: Arc<SandboxGuard>,
    max_bytes: usize,
}

impl ReadFileTool {
    pub fn new(guard: Arc<SandboxGuard>) -> Self {
        Self {
            guard,
            max_bytes: DEFAULT_MAX_READ_BYTES,
        }
    }

    pub fn with_max_bytes(mut self, max_bytes: usize) -> Self {
        self.max_bytes = max_bytes;
        self
    }
}

#[async_trait]
impl Tool for ReadFileTool {
    fn name(&self) -> &str {
        TOOL_READ_FILE
    }

    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: TOOL_READ_FILE.to_string(),
            description: Some(
                "Read the text content of a file. Use for source analysis or \
                 configuration inspection. Paths are relative to the workspace."
                    .to_string(),
            ),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "path": {
                        "type": "string",
                        "minLength": 1,
                        "description": "File path, relative or absolute (e.g. 'src/main.rs')."
                    }
                },
                "required": ["path"]
            }),
        }
    }

    async fn call(&self, args: Value) -> Result<ToolCallContent, ToolError> {
        let path_param = args
            .get("path")
            .and_then(|v| v.as_str())
            .ok_or_else(|| ToolError::InvalidInput("missing path".to_string()))?;

        let path = self
            .guard
            .check_read(path_param)
            .map_err(ToolError::Denied)?;
        if !path.exists() {
            return Err(ToolError::InvalidInput(format!(
                "file not found: {}",
                path_param
            )));
        }
        if path.is_dir() {
            return Err(ToolError::InvalidInput(format!(
                "is a directory, not a file: {}",
                path_param
            )));
        }

        let max_bytes = self.max_bytes;
        let content = tokio::task::spawn_blocking(move || std::fs::read(&path))
            .await
            .map_err(|e| ToolError::Execution(e.to_string()))?
            .map_err(|e| ToolError::Execution(format!("read failed: {}", e)))?;

        let truncated = content.len() > max_bytes;
        let slice = if truncated {
            &content[..max_bytes]
        } else {
            &content[..]
        };
        let mut text = String::from_utf8_lossy(slice).into_owned();
        if truncated {
            text.push_str("\n[truncated]");
        }
        Ok(ToolCallContent { text })
    }
}

/// Lists a directory as sorted `kind name` entries, hidden entries excluded.
pub struct ListDirTool {
    guard: Arc<SandboxGuard>,
}

impl ListDirTool {
    pub fn new(guard: Arc<SandboxGuard>) -> Self {
        Self { guard }
    }
}

#[async_trait]
impl Tool for ListDirTool {
    fn name(&self) -> &str {
        TOOL_LIST_DIR
    }

    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: TOOL_LIST_DIR.to_string(),
            description: Some(
                "List files and subdirectories of a directory. Use to explore \
                 project structure."
                    .to_string(),
            ),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "path": {
                        "type": "string",
                        "description": "Directory path, default '.'.",
                        "default": "."
                    }
                },
                "required": []
            }),
        }
    }

    async fn call(&self, args: Value) -> Result<ToolCallContent, ToolError> {
        let path_param = args
            .get("path")
            .and_then(|v| v.as_str())
            .unwrap_or(".")
            .to_string();

        let path = self
            .guard
            .check_read(&path_param)
            .map_err(ToolError::Denied)?;
        if !path.exists() {
            return Err(ToolError::InvalidInput(format!(
                "directory not found: {}",
                path_param
            )));
        }
        if !path.is_dir() {
            return Err(ToolError::InvalidInput(format!(
                "not a directory: {}",
                path_param
            )));
        }

        let entries = tokio::task::spawn_blocking(move || -> std::io::Result<Vec<String>> {
            let mut out = Vec::new();
            for entry in std::fs::read_dir(&path)? {
                let entry = entry?;
                let name = entry.file_name().to_string_lossy().into_owned();
                if name.starts_with('.') {
                    continue;
                }
                let kind = if entry.file_type()?.is_dir() { "dir" } else { "file" };
                out.push(format!("{} {}", kind, name));
            }
            out.sort();
            Ok(out)
        })
        .await
        .map_err(|e| ToolError::Execution(e.to_string()))?
        .map_err(|e| ToolError::Execution(format!("list failed: {}", e)))?;

        let text = if entries.is_empty() {
            "(empty directory)".to_string()
        } else {
            entries.join("\n")
        };
        Ok(ToolCallContent { text })
    }
}
