//! Scripted LLM for tests: a queue of canned responses plus a call counter.
//!
//! Each `invoke` pops the next scripted response; when the script runs dry
//! the last response repeats. `Fail` entries simulate an unreachable
//! provider. The counter makes "the model was (not) called" observable in
//! tests, which several pipeline properties require.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::error::AgentError;
use crate::llm::{LlmClient, LlmResponse, LlmUsage};
use crate::message::Message;
use crate::state::ToolCall;

/// One scripted turn.
pub enum MockTurn {
    /// Plain text reply.
    Text(String),
    /// Reply with tool calls (content may be empty).
    WithToolCalls(String, Vec<ToolCall>),
    /// Provider failure.
    Fail(String),
}

/// Scripted chat-completion provider.
pub struct MockLlm {
    script: Mutex<std::collections::VecDeque<MockTurn>>,
    requests: Mutex<Vec<Vec<String>>>,
    calls: AtomicUsize,
}

impl MockLlm {
    /// Always replies with the same text.
    pub fn fixed(reply: impl Into<String>) -> Self {
        Self::with_script(vec![MockTurn::Text(reply.into())])
    }

    /// Replies with the scripted turns in order; the final turn repeats.
    pub fn with_script(turns: Vec<MockTurn>) -> Self {
        Self {
            script: Mutex::new(turns.into()),
            requests: Mutex::new(Vec::new()),
            calls: AtomicUsize::new(0),
        }
    }

    /// Always fails, simulating an unreachable provider.
    pub fn unreachable() -> Self {
        Self::with_script(vec![MockTurn::Fail("provider unreachable".into())])
    }

    /// Number of `invoke` calls so far.
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Message texts of each recorded request, in call order. Lets tests
    /// assert on what a component actually sent to the provider.
    pub fn recorded_requests(&self) -> Vec<Vec<String>> {
        self.requests.lock().expect("mock request lock").clone()
    }
}

#[async_trait]
impl LlmClient for MockLlm {
    async fn invoke(&self, messages: &[Message]) -> Result<LlmResponse, AgentError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.requests.lock().expect("mock request lock").push(
            messages
                .iter()
                .map(|m| m.content_text().to_string())
                .collect(),
        );
        let mut script = self.script.lock().expect("mock script lock");
        let turn = if script.len() > 1 {
            script.pop_front()
        } else {
            // Keep the last turn so further calls repeat it.
            script.front().map(|t| match t {
                MockTurn::Text(s) => MockTurn::Text(s.clone()),
                MockTurn::WithToolCalls(s, calls) => {
                    MockTurn::WithToolCalls(s.clone(), calls.clone())
                }
                MockTurn::Fail(s) => MockTurn::Fail(s.clone()),
            })
        };
        match turn {
            Some(MockTurn::Text(content)) => Ok(LlmResponse {
                content,
                tool_calls: vec![],
                usage: Some(LlmUsage::default()),
            }),
            Some(MockTurn::WithToolCalls(content, tool_calls)) => Ok(LlmResponse {
                content,
                tool_calls,
                usage: Some(LlmUsage::default()),
            }),
            Some(MockTurn::Fail(reason)) => Err(AgentError::ExecutionFailed(reason)),
            None => Err(AgentError::ExecutionFailed("mock script empty".into())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// **Scenario**: scripted turns pop in order and the last one repeats;
    /// the call counter tracks every invoke.
    #[tokio::test]
    async fn script_order_and_repeat() {
        let llm = MockLlm::with_script(vec![
            MockTurn::Text("first".into()),
            MockTurn::Text("second".into()),
        ]);
        assert_eq!(llm.invoke(&[]).await.unwrap().content, "first");
        assert_eq!(llm.invoke(&[]).await.unwrap().content, "second");
        assert_eq!(llm.invoke(&[]).await.unwrap().content, "second");
        assert_eq!(llm.call_count(), 3);
    }

    /// **Scenario**: unreachable mock always errors.
    #[tokio::test]
    async fn unreachable_always_fails() {
        let llm = MockLlm::unreachable();
        assert!(llm.invoke(&[]).await.is_err());
        assert!(llm.invoke(&[]).await.is_err());
        assert_eq!(llm.call_count(), 2);
    }
}
