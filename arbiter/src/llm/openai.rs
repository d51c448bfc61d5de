//! OpenAI-compatible chat completions client implementing [`LlmClient`].
//!
//! Targets any endpoint speaking the Chat Completions API, which in this
//! system is usually a local model proxy multiplexing the router, worker,
//! helper, and cloud models behind one base URL. Model name selects the tier.
//!
//! Transport failures are retried once with backoff here, so callers see a
//! single failure after both attempts; what that failure means (escalate,
//! pass, miss) is the caller's policy.

use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_stream::StreamExt;
use tracing::{debug, trace, warn};

use crate::error::AgentError;
use crate::llm::{LlmClient, LlmResponse, LlmUsage, MessageChunk, SamplingParams};
use crate::message::Message;
use crate::state::ToolCall;
use crate::tools::ToolSpec;

use async_openai::{
    config::OpenAIConfig,
    types::chat::{
        ChatCompletionMessageToolCall, ChatCompletionMessageToolCalls,
        ChatCompletionRequestAssistantMessageArgs, ChatCompletionRequestMessage,
        ChatCompletionRequestSystemMessage, ChatCompletionRequestToolMessageArgs,
        ChatCompletionRequestUserMessage, ChatCompletionTool, ChatCompletionToolChoiceOption,
        ChatCompletionTools, CreateChatCompletionRequest, CreateChatCompletionRequestArgs,
        FunctionCall, FunctionObject, ToolChoiceOptions,
    },
    Client,
};

const RETRY_BACKOFF: Duration = Duration::from_millis(500);

/// Chat completions client for one model behind an OpenAI-compatible endpoint.
pub struct ChatOpenAI {
    client: Client<OpenAIConfig>,
    model: String,
    tools: Option<Vec<ToolSpec>>,
    sampling: SamplingParams,
}

impl ChatOpenAI {
    /// Builds a client with default config (`OPENAI_API_KEY` from env).
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            model: model.into(),
            tools: None,
            sampling: SamplingParams::default(),
        }
    }

    /// Builds a client with explicit config (API key, base URL).
    pub fn with_config(config: OpenAIConfig, model: impl Into<String>) -> Self {
        Self {
            client: Client::with_config(config),
            model: model.into(),
            tools: None,
            sampling: SamplingParams::default(),
        }
    }

    /// Convenience for a proxy that ignores keys: base URL + model.
    pub fn for_proxy(base_url: impl Into<String>, model: impl Into<String>) -> Self {
        let config = OpenAIConfig::new()
            .with_api_base(base_url)
            .with_api_key("not-needed");
        Self::with_config(config, model)
    }

    /// Advertises tools with every request (enables tool_calls in responses).
    pub fn with_tools(mut self, tools: Vec<ToolSpec>) -> Self {
        self.tools = Some(tools);
        self
    }

    /// Sets sampling parameters (usually from the active persona).
    pub fn with_sampling(mut self, sampling: SamplingParams) -> Self {
        self.sampling = sampling;
        self
    }

    /// Model name this client dispatches to.
    pub fn model(&self) -> &str {
        &self.model
    }

    fn messages_to_request(messages: &[Message]) -> Result<Vec<ChatCompletionRequestMessage>, AgentError> {
        let mut out = Vec::with_capacity(messages.len());
        for m in messages {
            let request_message = match m {
                Message::System(s) => ChatCompletionRequestMessage::System(
                    ChatCompletionRequestSystemMessage::from(s.as_str()),
                ),
                Message::User(s) => ChatCompletionRequestMessage::User(
                    ChatCompletionRequestUserMessage::from(s.as_str()),
                ),
                Message::Assistant(s) => {
                    ChatCompletionRequestMessage::Assistant((s.as_str()).into())
                }
                Message::AssistantToolCalls {
                    content,
                    tool_calls,
                } => {
                    let calls: Vec<ChatCompletionMessageToolCalls> = tool_calls
                        .iter()
                        .map(|tc| {
                            ChatCompletionMessageToolCalls::Function(
                                ChatCompletionMessageToolCall {
                                    id: tc.id.clone().unwrap_or_default(),
                                    function: FunctionCall {
                                        name: tc.name.clone(),
                                        arguments: tc.arguments.clone(),
                                    },
                                },
                            )
                        })
                        .collect();
                    let mut args = ChatCompletionRequestAssistantMessageArgs::default();
                    if !content.is_empty() {
                        args.content(content.as_str());
                    }
                    ChatCompletionRequestMessage::Assistant(
                        args.tool_calls(calls).build().map_err(|e| {
                            AgentError::ExecutionFailed(format!(
                                "assistant message build failed: {}",
                                e
                            ))
                        })?,
                    )
                }
                Message::Tool { call_id, content } => ChatCompletionRequestMessage::Tool(
                    ChatCompletionRequestToolMessageArgs::default()
                        .content(content.as_str())
                        .tool_call_id(call_id.clone())
                        .build()
                        .map_err(|e| {
                            AgentError::ExecutionFailed(format!(
                                "tool message build failed: {}",
                                e
                            ))
                        })?,
                ),
            };
            out.push(request_message);
        }
        Ok(out)
    }

    fn build_request(
        &self,
        messages: &[Message],
        stream: bool,
    ) -> Result<CreateChatCompletionRequest, AgentError> {
        let mut args = CreateChatCompletionRequestArgs::default();
        args.model(self.model.clone());
        args.messages(Self::messages_to_request(messages)?);
        if stream {
            args.stream(true);
        }

        if let Some(ref tools) = self.tools {
            if !tools.is_empty() {
                let chat_tools: Vec<ChatCompletionTools> = tools
                    .iter()
                    .map(|t| {
                        ChatCompletionTools::Function(ChatCompletionTool {
                            function: FunctionObject {
                                name: t.name.clone(),
                                description: t.description.clone(),
                                parameters: Some(t.input_schema.clone()),
                                ..Default::default()
                            },
                        })
                    })
                    .collect();
                args.tools(chat_tools);
                args.tool_choice(ChatCompletionToolChoiceOption::Mode(ToolChoiceOptions::Auto));
            }
        }

        if let Some(t) = self.sampling.temperature {
            args.temperature(t);
        }
        if let Some(p) = self.sampling.top_p {
            args.top_p(p);
        }
        if let Some(n) = self.sampling.max_tokens {
            args.max_completion_tokens(n);
        }

        args.build()
            .map_err(|e| AgentError::ExecutionFailed(format!("request build failed: {}", e)))
    }

    async fn create_once(&self, messages: &[Message]) -> Result<LlmResponse, AgentError> {
        let request = self.build_request(messages, false)?;
        if let Ok(js) = serde_json::to_string(&request) {
            trace!(model = %self.model, request = %js, "chat create");
        }

        let response = self
            .client
            .chat()
            .create(request)
            .await
            .map_err(|e| AgentError::ExecutionFailed(format!("chat API error: {}", e)))?;

        let choice = response
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| AgentError::ExecutionFailed("provider returned no choices".into()))?;

        let msg = choice.message;
        let content = msg.content.unwrap_or_default();
        let tool_calls: Vec<ToolCall> = msg
            .tool_calls
            .unwrap_or_default()
            .into_iter()
            .filter_map(|tc| {
                if let ChatCompletionMessageToolCalls::Function(f) = tc {
                    Some(ToolCall {
                        name: f.function.name,
                        arguments: f.function.arguments,
                        id: Some(f.id),
                    })
                } else {
                    None
                }
            })
            .collect();

        let usage = response.usage.map(|u| LlmUsage {
            prompt_tokens: u.prompt_tokens,
            completion_tokens: u.completion_tokens,
            total_tokens: u.total_tokens,
        });
        Ok(LlmResponse {
            content,
            tool_calls,
            usage,
        })
    }
}

#[async_trait]
impl LlmClient for ChatOpenAI {
    async fn invoke(&self, messages: &[Message]) -> Result<LlmResponse, AgentError> {
        debug!(
            model = %self.model,
            message_count = messages.len(),
            tools = self.tools.as_ref().map(|t| t.len()).unwrap_or(0),
            "chat completion"
        );
        match self.create_once(messages).await {
            Ok(resp) => Ok(resp),
            Err(first) => {
                warn!(model = %self.model, error = %first, "chat call failed, retrying once");
                tokio::time::sleep(RETRY_BACKOFF).await;
                self.create_once(messages).await
            }
        }
    }

    async fn invoke_stream(
        &self,
        messages: &[Message],
        chunk_tx: Option<mpsc::Sender<MessageChunk>>,
    ) -> Result<LlmResponse, AgentError> {
        let Some(chunk_tx) = chunk_tx else {
            return self.invoke(messages).await;
        };

        let request = self.build_request(messages, true)?;
        let mut stream = self
            .client
            .chat()
            .create_stream(request)
            .await
            .map_err(|e| AgentError::ExecutionFailed(format!("chat stream error: {}", e)))?;

        let mut full_content = String::new();
        // index -> (id, name, arguments), accumulated across deltas
        let mut tool_call_map: std::collections::HashMap<u32, (String, String, String)> =
            std::collections::HashMap::new();
        let mut usage: Option<LlmUsage> = None;

        while let Some(result) = stream.next().await {
            let response = result
                .map_err(|e| AgentError::ExecutionFailed(format!("chat stream error: {}", e)))?;

            if let Some(ref u) = response.usage {
                usage = Some(LlmUsage {
                    prompt_tokens: u.prompt_tokens,
                    completion_tokens: u.completion_tokens,
                    total_tokens: u.total_tokens,
                });
            }

            for choice in response.choices {
                let delta = &choice.delta;
                if let Some(ref content) = delta.content {
                    if !content.is_empty() {
                        full_content.push_str(content);
                        let _ = chunk_tx
                            .send(MessageChunk {
                                content: content.clone(),
                            })
                            .await;
                    }
                }
                if let Some(ref tool_calls) = delta.tool_calls {
                    for tc in tool_calls {
                        let entry = tool_call_map.entry(tc.index).or_insert_with(|| {
                            (tc.id.clone().unwrap_or_default(), String::new(), String::new())
                        });
                        if let Some(ref id) = tc.id {
                            if !id.is_empty() {
                                entry.0 = id.clone();
                            }
                        }
                        if let Some(ref func) = tc.function {
                            if let Some(ref name) = func.name {
                                entry.1.push_str(name);
                            }
                            if let Some(ref arguments) = func.arguments {
                                entry.2.push_str(arguments);
                            }
                        }
                    }
                }
            }
        }

        let mut indices: Vec<u32> = tool_call_map.keys().copied().collect();
        indices.sort_unstable();
        let tool_calls = indices
            .into_iter()
            .filter_map(|i| tool_call_map.remove(&i))
            .map(|(id, name, arguments)| ToolCall {
                name,
                arguments,
                id: if id.is_empty() { None } else { Some(id) },
            })
            .collect();

        Ok(LlmResponse {
            content: full_content,
            tool_calls,
            usage,
        })
    }

}
