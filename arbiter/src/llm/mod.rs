//! Chat-completion provider abstraction.
//!
//! The pipeline depends on [`LlmClient`] instead of a concrete API client.
//! Implementations: [`ChatOpenAI`] (any OpenAI-compatible endpoint, e.g. a
//! local LiteLLM proxy) and [`MockLlm`] (scripted responses with a call
//! counter for tests).
//!
//! # Streaming
//!
//! `invoke_stream` accepts an optional `Sender<MessageChunk>`; streaming
//! implementations push tokens as they arrive and still return the complete
//! response. The default implementation calls `invoke` and emits the full
//! content as a single chunk.

mod mock;
mod openai;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::AgentError;
use crate::message::Message;
use crate::state::ToolCall;

pub use mock::{MockLlm, MockTurn};
pub use openai::ChatOpenAI;

/// One streamed content fragment.
#[derive(Clone, Debug)]
pub struct MessageChunk {
    pub content: String,
}

/// Token usage for one call; consumed for cost metrics when the provider
/// reports it.
#[derive(Clone, Debug, Default, serde::Serialize, serde::Deserialize)]
pub struct LlmUsage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

/// Response from one completion: assistant text plus any tool calls.
#[derive(Debug, Default)]
pub struct LlmResponse {
    pub content: String,
    /// Empty means the model produced a final text answer.
    pub tool_calls: Vec<ToolCall>,
    pub usage: Option<LlmUsage>,
}

/// Sampling parameters for one call; usually derived from the active persona.
#[derive(Clone, Debug, Default)]
pub struct SamplingParams {
    pub temperature: Option<f32>,
    pub top_p: Option<f32>,
    pub max_tokens: Option<u32>,
}

/// Chat-completion provider: messages in, assistant text + tool calls out.
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// One completion turn over the full message list.
    async fn invoke(&self, messages: &[Message]) -> Result<LlmResponse, AgentError>;

    /// Streaming variant. When `chunk_tx` is set, implementations send
    /// content fragments as they arrive; the complete response is still
    /// returned at the end.
    async fn invoke_stream(
        &self,
        messages: &[Message],
        chunk_tx: Option<mpsc::Sender<MessageChunk>>,
    ) -> Result<LlmResponse, AgentError> {
        let response = self.invoke(messages).await?;
        if let Some(tx) = chunk_tx {
            if !response.content.is_empty() {
                let _ = tx
                    .send(MessageChunk {
                        content: response.content.clone(),
                    })
                    .await;
            }
        }
        Ok(response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct StubLlm;

    #[async_trait]
    impl LlmClient for StubLlm {
        async fn invoke(&self, _messages: &[Message]) -> Result<LlmResponse, AgentError> {
            Ok(LlmResponse {
                content: "answer".into(),
                ..LlmResponse::default()
            })
        }
    }

    /// **Scenario**: default invoke_stream delivers the full content as one
    /// chunk when a sender is supplied.
    #[tokio::test]
    async fn default_stream_sends_one_chunk() {
        let (tx, mut rx) = mpsc::channel(2);
        let resp = StubLlm.invoke_stream(&[], Some(tx)).await.unwrap();
        assert_eq!(resp.content, "answer");
        assert_eq!(rx.recv().await.expect("chunk").content, "answer");
    }
}
