//! Bounded tool-use inference loop.
//!
//! The react pattern collapsed into one loop: call the provider, dispatch any
//! tool calls through the registry, feed results back as tool-role messages,
//! repeat. The loop is bounded by `max_steps` (default 5) and returns a
//! sum-typed [`LoopOutcome`] instead of unwinding the stack — a tool that
//! needs human sign-off surfaces as [`LoopOutcome::NeedsApproval`] and the
//! orchestrator decides what to do with it.
//!
//! When a checkpoint store is attached, every batch of tool dispatches is
//! preceded by a TRANSACTION checkpoint at a fresh step, so a crash or
//! suspension between batches resumes from the last recorded batch boundary
//! instead of replaying already-executed side-effecting tools.
//!
//! Tool failures (not found, denied, execution error) are formatted into the
//! tool result so the model can revise its plan; only provider failures end
//! the loop. Checkpoint failures are storage failures and surface as errors.

use std::sync::Arc;

use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::checkpoint::{CheckpointError, CheckpointKind, CheckpointStore};
use crate::events::{Event, EventBus, EventType};
use crate::llm::LlmClient;
use crate::message::Message;
use crate::state::{SessionState, ToolCall};
use crate::tools::{ToolError, ToolRegistry};

/// Default bound on provider rounds in one loop run.
pub const MAX_TOOL_STEPS: usize = 5;

/// Terminal result of one loop run.
#[derive(Debug)]
pub enum LoopOutcome {
    /// The model produced a final text answer.
    Text(String),
    /// A tool requires a human decision; the loop stopped before running it.
    NeedsApproval {
        reason: String,
        function: String,
        args: Value,
    },
    /// The provider failed (after its internal retry); counts as a
    /// validation-level failure upstream.
    Failure(String),
    /// Cancellation observed between iterations.
    Cancelled,
}

/// Runs bounded react loops over a shared tool registry.
pub struct ToolUseLoop {
    registry: Arc<ToolRegistry>,
    max_steps: usize,
    bus: Option<Arc<EventBus>>,
    checkpoints: Option<Arc<dyn CheckpointStore>>,
}

impl ToolUseLoop {
    pub fn new(registry: Arc<ToolRegistry>) -> Self {
        Self {
            registry,
            max_steps: MAX_TOOL_STEPS,
            bus: None,
            checkpoints: None,
        }
    }

    pub fn with_max_steps(mut self, max_steps: usize) -> Self {
        self.max_steps = max_steps.max(1);
        self
    }

    /// Publishes tool_call / tool_result events for each dispatch.
    pub fn with_events(mut self, bus: Arc<EventBus>) -> Self {
        self.bus = Some(bus);
        self
    }

    /// Writes a TRANSACTION checkpoint before each batch of tool dispatches.
    pub fn with_checkpoints(mut self, checkpoints: Arc<dyn CheckpointStore>) -> Self {
        self.checkpoints = Some(checkpoints);
        self
    }

    fn publish(&self, session_id: &str, event_type: EventType, payload: Value) {
        if let Some(bus) = &self.bus {
            let mut payload = payload;
            if let Some(obj) = payload.as_object_mut() {
                obj.insert(
                    "session_id".to_string(),
                    Value::String(session_id.to_string()),
                );
            }
            bus.publish(Event::new(event_type, "worker", payload));
        }
    }

    /// Formats a tool failure as the tool result text.
    fn format_tool_error(error: &ToolError, call: &ToolCall) -> String {
        match error {
            ToolError::NotFound(name) => format!(
                "Error: tool '{}' is not registered. Use one of the provided tools.",
                name
            ),
            ToolError::Denied(denial) => denial.clone(),
            other => format!(
                "Error executing tool '{}' with arguments {}: {}. Fix the error and try again.",
                call.name, call.arguments, other
            ),
        }
    }

    /// Runs the loop to completion, a bound, an approval interrupt, a
    /// provider failure, or cancellation. `state` advances one step per tool
    /// batch so each batch checkpoint lands on its own key.
    pub async fn run(
        &self,
        llm: &dyn LlmClient,
        mut messages: Vec<Message>,
        state: &mut SessionState,
        cancel: &CancellationToken,
    ) -> Result<LoopOutcome, CheckpointError> {
        let mut latest_text = String::new();

        for step in 0..self.max_steps {
            if cancel.is_cancelled() {
                debug!(step, "tool loop cancelled");
                return Ok(LoopOutcome::Cancelled);
            }

            let response = match llm.invoke(&messages).await {
                Ok(response) => response,
                Err(e) => {
                    warn!(step, error = %e, "provider failed, ending loop");
                    return Ok(LoopOutcome::Failure(e.to_string()));
                }
            };

            if !response.content.is_empty() {
                latest_text = response.content.clone();
            }

            if response.tool_calls.is_empty() {
                return Ok(LoopOutcome::Text(response.content));
            }

            // TRANSACTION boundary before this batch: a resume continues
            // from here rather than re-running dispatched tools. The step
            // bump gives every batch its own checkpoint key.
            state.increment_step();
            if let Some(checkpoints) = &self.checkpoints {
                checkpoints
                    .save(state, CheckpointKind::Transaction, "pre-tool-batch")
                    .await?;
            }

            messages.push(Message::AssistantToolCalls {
                content: response.content,
                tool_calls: response.tool_calls.clone(),
            });

            for call in &response.tool_calls {
                let call_id = call
                    .id
                    .clone()
                    .unwrap_or_else(|| format!("call_{}", uuid::Uuid::new_v4()));
                let args: Value = if call.arguments.trim().is_empty() {
                    Value::Object(Default::default())
                } else {
                    serde_json::from_str(&call.arguments).unwrap_or_else(|e| {
                        warn!(tool = %call.name, error = %e, "tool arguments are not JSON, using empty object");
                        Value::Object(Default::default())
                    })
                };

                self.publish(
                    &state.session_id,
                    EventType::ToolCall,
                    serde_json::json!({ "tool": call.name, "args": args }),
                );

                let result_text = match self.registry.dispatch(&call.name, args.clone()).await {
                    Ok(content) => content.text,
                    Err(ToolError::ApprovalRequired {
                        reason,
                        function,
                        args,
                    }) => {
                        debug!(tool = %function, "tool requires approval, suspending loop");
                        return Ok(LoopOutcome::NeedsApproval {
                            reason,
                            function,
                            args,
                        });
                    }
                    Err(other) => Self::format_tool_error(&other, call),
                };

                self.publish(
                    &state.session_id,
                    EventType::ToolResult,
                    serde_json::json!({ "tool": call.name, "result": result_text }),
                );
                messages.push(Message::tool(call_id, result_text));
            }
        }

        debug!(max_steps = self.max_steps, "tool step budget exhausted");
        Ok(LoopOutcome::Text(latest_text))
    }
}
