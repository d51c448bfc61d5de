//! External tool providers: an opaque discovery handshake that contributes
//! tools to the registry at startup.
//!
//! A provider exposes `list_tools` (discovery) and `call` (invocation
//! returning text blocks). [`register_provider_tools`] wraps each advertised
//! tool in a [`ProviderTool`] adapter and registers it; later registrations
//! override built-ins of the same name with a warning, per registry policy.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tracing::info;

use crate::tools::{Tool, ToolCallContent, ToolError, ToolRegistry, ToolSpec};

/// Opaque external tool source, resolved once at startup.
#[async_trait]
pub trait ExternalToolProvider: Send + Sync {
    /// Provider name for logging.
    fn provider_name(&self) -> &str;

    /// Discovery handshake: the tools this provider serves.
    async fn list_tools(&self) -> Result<Vec<ToolSpec>, ToolError>;

    /// Invokes a tool; the result is a sequence of text blocks.
    async fn call(&self, name: &str, args: Value) -> Result<Vec<String>, ToolError>;
}

/// Adapter presenting one provider tool as a local [`Tool`].
pub struct ProviderTool {
    provider: Arc<dyn ExternalToolProvider>,
    spec: ToolSpec,
}

impl ProviderTool {
    pub fn new(provider: Arc<dyn ExternalToolProvider>, spec: ToolSpec) -> Self {
        Self { provider, spec }
    }
}

#[async_trait]
impl Tool for ProviderTool {
    fn name(&self) -> &str {
        &self.spec.name
    }

    fn spec(&self) -> ToolSpec {
        self.spec.clone()
    }

    async fn call(&self, args: Value) -> Result<ToolCallContent, ToolError> {
        let blocks = self.provider.call(&self.spec.name, args).await?;
        Ok(ToolCallContent {
            text: blocks.join("\n"),
        })
    }
}

/// Runs the discovery handshake and registers every advertised tool.
/// Returns the number of tools added.
pub async fn register_provider_tools(
    registry: &mut ToolRegistry,
    provider: Arc<dyn ExternalToolProvider>,
) -> Result<usize, ToolError> {
    let specs = provider.list_tools().await?;
    let count = specs.len();
    for spec in specs {
        registry.register(Box::new(ProviderTool::new(Arc::clone(&provider), spec)));
    }
    info!(
        provider = provider.provider_name(),
        count, "external tools registered"
    );
    Ok(count)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct FakeProvider;

    #[async_trait]
    impl ExternalToolProvider for FakeProvider {
        fn provider_name(&self) -> &str {
            "fake"
        }

        async fn list_tools(&self) -> Result<Vec<ToolSpec>, ToolError> {
            Ok(vec![ToolSpec {
                name: "remote_lookup".into(),
                description: Some("Remote lookup".into()),
                input_schema: json!({
                    "type": "object",
                    "properties": { "key": { "type": "string" } },
                    "required": ["key"]
                }),
            }])
        }

        async fn call(&self, name: &str, args: Value) -> Result<Vec<String>, ToolError> {
            assert_eq!(name, "remote_lookup");
            Ok(vec![
                format!("key={}", args["key"].as_str().unwrap_or("")),
                "block two".to_string(),
            ])
        }
    }

    /// **Scenario**: discovery registers the provider's tools; invocation
    /// joins text blocks and still passes schema validation.
    #[tokio::test]
    async fn provider_tools_register_and_dispatch() {
        let mut registry = ToolRegistry::new();
        let added = register_provider_tools(&mut registry, Arc::new(FakeProvider))
            .await
            .unwrap();
        assert_eq!(added, 1);
        assert!(registry.contains("remote_lookup"));

        let out = registry
            .dispatch("remote_lookup", json!({"key": "abc"}))
            .await
            .unwrap();
        assert_eq!(out.text, "key=abc\nblock two");

        // Schema validation still applies to remote tools.
        let out = registry.dispatch("remote_lookup", json!({})).await.unwrap();
        assert!(out.text.contains("Tool input error"));
    }
}
