//! Name-indexed tool registry with schema validation at dispatch.
//!
//! Built once at startup (static set, then provider attach), read-only
//! afterwards; the orchestrator shares it behind an `Arc`.

use std::collections::HashMap;

use serde_json::Value;
use tracing::{debug, warn};

use crate::tools::{Tool, ToolCallContent, ToolError, ToolSpec};

/// Central registry: merge of built-in and provider tools.
#[derive(Default)]
pub struct ToolRegistry {
    tools: HashMap<String, Box<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a tool. On a name collision the later registration wins and
    /// a warning is logged.
    pub fn register(&mut self, tool: Box<dyn Tool>) {
        let name = tool.name().to_string();
        if self.tools.contains_key(&name) {
            warn!(tool = %name, "tool overridden by later registration");
        }
        self.tools.insert(name, tool);
    }

    /// All specs, sorted by name for a stable prompt order.
    pub fn list(&self) -> Vec<ToolSpec> {
        let mut specs: Vec<ToolSpec> = self.tools.values().map(|t| t.spec()).collect();
        specs.sort_by(|a, b| a.name.cmp(&b.name));
        specs
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Validates `args` against the named tool's schema.
    ///
    /// `Err(NotFound)` for an unknown tool. A failing instance yields
    /// `Ok(Some(message))` where the message enumerates offending fields; a
    /// schema that itself fails to compile skips validation (the tool author's
    /// bug must not block the model).
    pub fn validate_args(&self, name: &str, args: &Value) -> Result<Option<String>, ToolError> {
        let tool = self
            .tools
            .get(name)
            .ok_or_else(|| ToolError::NotFound(name.to_string()))?;
        let spec = tool.spec();

        let Ok(validator) = jsonschema::validator_for(&spec.input_schema) else {
            warn!(tool = %name, "tool schema does not compile, skipping validation");
            return Ok(None);
        };

        let errors: Vec<String> = validator
            .iter_errors(args)
            .map(|e| format!("  - {}", e))
            .collect();

        if errors.is_empty() {
            Ok(None)
        } else {
            Ok(Some(format!(
                "Tool input error ({}):\n{}\nRetry with corrected arguments.",
                name,
                errors.join("\n")
            )))
        }
    }

    /// Dispatches a call: validation first, then the tool itself.
    ///
    /// Validation failures are returned as the tool result (never an error)
    /// so the LLM can self-correct. Unknown tools and execution failures are
    /// errors for the caller to format.
    pub async fn dispatch(
        &self,
        name: &str,
        args: Value,
    ) -> Result<ToolCallContent, ToolError> {
        if let Some(message) = self.validate_args(name, &args)? {
            debug!(tool = %name, "argument validation failed");
            return Ok(ToolCallContent { text: message });
        }
        let tool = self
            .tools
            .get(name)
            .ok_or_else(|| ToolError::NotFound(name.to_string()))?;
        tool.call(args).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde_json::json;

    struct EchoTool {
        name: &'static str,
        reply: &'static str,
    }

    #[async_trait]
    impl Tool for EchoTool {
        fn name(&self) -> &str {
            self.name
        }

        fn spec(&self) -> ToolSpec {
            ToolSpec {
                name: self.name.to_string(),
                description: Some("echo".into()),
                input_schema: json!({
                    "type": "object",
                    "properties": {
                        "text": { "type": "string" }
                    },
                    "required": ["text"]
                }),
            }
        }

        async fn call(&self, _args: Value) -> Result<ToolCallContent, ToolError> {
            Ok(ToolCallContent {
                text: self.reply.to_string(),
            })
        }
    }

    /// **Scenario**: later registration under the same name overrides.
    #[tokio::test]
    async fn later_registration_overrides() {
        let mut registry = ToolRegistry::new();
        registry.register(Box::new(EchoTool { name: "echo", reply: "old" }));
        registry.register(Box::new(EchoTool { name: "echo", reply: "new" }));
        assert_eq!(registry.len(), 1);

        let out = registry
            .dispatch("echo", json!({"text": "x"}))
            .await
            .unwrap();
        assert_eq!(out.text, "new");
    }

    /// **Scenario**: invalid args come back as a tool result enumerating the
    /// offending field, not as an error; validation is idempotent.
    #[tokio::test]
    async fn validation_failure_is_a_result() {
        let mut registry = ToolRegistry::new();
        registry.register(Box::new(EchoTool { name: "echo", reply: "ok" }));

        let out = registry.dispatch("echo", json!({})).await.unwrap();
        assert!(out.text.contains("Tool input error"));
        assert!(out.text.contains("text"));

        let first = registry.validate_args("echo", &json!({})).unwrap();
        let second = registry.validate_args("echo", &json!({})).unwrap();
        assert_eq!(first, second);
    }

    /// **Scenario**: unknown tool is an error (the loop formats it).
    #[tokio::test]
    async fn unknown_tool_is_not_found() {
        let registry = ToolRegistry::new();
        assert!(matches!(
            registry.dispatch("missing", json!({})).await,
            Err(ToolError::NotFound(_))
        ));
    }

    /// **Scenario**: list is sorted by name.
    #[test]
    fn list_is_sorted() {
        let mut registry = ToolRegistry::new();
        registry.register(Box::new(EchoTool { name: "zeta", reply: "" }));
        registry.register(Box::new(EchoTool { name: "alpha", reply: "" }));
        let names: Vec<String> = registry.list().into_iter().map(|s| s.name).collect();
        assert_eq!(names, vec!["alpha".to_string(), "zeta".to_string()]);
    }
}
