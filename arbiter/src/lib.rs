//! # Arbiter
//!
//! A hybrid local/cloud AI agent orchestration core. User tasks route between
//! a cheap local worker model and an expensive cloud model, pass through
//! deterministic validation and adversarial review, can suspend for human
//! approval, and leave a durable checkpoint trail the whole way.
//!
//! ## Design principles
//!
//! - **Trust the rule, not the model**: generated code is validated
//!   mechanically ([`validator`]) and reviewed adversarially ([`critic`],
//!   [`debate`]) before it reaches the user.
//! - **Durable by default**: [`SessionState`] snapshots bracket every risky
//!   operation ([`checkpoint`]); a crash or a human interrupt resumes from
//!   the last checkpoint instead of starting over.
//! - **Control flow in types**: tools that need sign-off return
//!   [`LoopOutcome::NeedsApproval`] instead of unwinding the stack; the
//!   orchestrator matches on the outcome and suspends through [`hitl`].
//! - **Spend-aware routing**: the rule-based stage of the [`router`] answers
//!   most inputs for free; the classifier model runs only for the ambiguous
//!   middle, and everything defaults to the local tier.
//!
//! ## Main modules
//!
//! - [`orchestrator`]: [`Orchestrator`] — the end-to-end pipeline state machine.
//! - [`state`]: [`SessionState`], [`HistoryMessage`] — the durable session entity.
//! - [`checkpoint`]: [`CheckpointStore`], [`SqliteCheckpointStore`], [`MemoryCheckpointStore`].
//! - [`inference`]: [`ToolUseLoop`], [`LoopOutcome`] — bounded react loop with tool dispatch.
//! - [`tools`]: [`Tool`], [`ToolRegistry`], file tools, [`ExternalToolProvider`].
//! - [`sandbox`]: [`SandboxGuard`] path/command policy, [`SandboxRuntime`] isolated execution.
//! - [`validator`]: fenced-block extraction + structural syntax scan + execution probe.
//! - [`critic`]: [`Critic`] — reviewer verdicts with fail-closed parsing.
//! - [`debate`]: [`DebateEngine`] — attack / judge / revise rounds with convergence rules.
//! - [`hitl`]: [`HitlController`], [`ApprovalChannel`] — suspend/resume with timeouts.
//! - [`router`]: [`Router`] — regex tables first, LLM classifier second.
//! - [`cache`]: [`SemanticCache`] — embedding short-circuit for cacheable requests.
//! - [`limiter`]: [`RateLimiter`] — sliding-window throttle for outbound calls.
//! - [`persona`]: [`PersonaManager`] — swappable prompt/sampling bundles.
//! - [`events`]: [`EventBus`] — typed pub/sub plus the JSONL session log.
//! - [`llm`]: [`LlmClient`] trait with [`ChatOpenAI`] and [`MockLlm`].
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use arbiter::{
//!     Critic, MemoryCheckpointStore, MockLlm, Orchestrator, OrchestratorBuilder,
//!     PersonaLibrary, PersonaManager, Router, SessionState, ToolRegistry, ToolUseLoop,
//! };
//! use tokio_util::sync::CancellationToken;
//!
//! # #[tokio::main]
//! # async fn main() {
//! let library = Arc::new(PersonaLibrary::embedded());
//! let personas = Arc::new(PersonaManager::new(Arc::clone(&library), "worker").unwrap());
//! let llm = Arc::new(MockLlm::fixed("hello from the worker"));
//!
//! let orchestrator: Orchestrator = OrchestratorBuilder::new(
//!     Router::new(llm.clone()),
//!     llm.clone(),
//!     llm.clone(),
//!     "cloud-pm",
//!     ToolUseLoop::new(Arc::new(ToolRegistry::new())),
//!     Critic::new(llm, &library).unwrap(),
//!     Arc::new(MemoryCheckpointStore::new()),
//!     personas,
//! )
//! .build();
//!
//! let mut state = SessionState::new();
//! let outcome = orchestrator
//!     .process(&mut state, "hello", &CancellationToken::new())
//!     .await
//!     .unwrap();
//! println!("{:?}", outcome);
//! # }
//! ```

pub mod cache;
pub mod checkpoint;
pub mod critic;
pub mod debate;
pub mod error;
pub mod events;
pub mod hitl;
pub mod inference;
pub mod limiter;
pub mod llm;
pub mod message;
pub mod orchestrator;
pub mod persona;
pub mod router;
pub mod sandbox;
pub mod state;
pub mod tools;
pub mod validator;

pub use cache::{
    Embedder, EmbedderError, InMemoryVectorIndex, OpenAIEmbedder, SemanticCache, VectorHit,
    VectorIndex,
};
pub use checkpoint::{
    CheckpointError, CheckpointKind, CheckpointListItem, CheckpointStore, MemoryCheckpointStore,
    SqliteCheckpointStore,
};
pub use critic::{
    format_suggestions_feedback, parse_review, Critic, CriticReview, CriticVerdict,
    MAX_CRITIC_ROUNDS,
};
pub use debate::{DebateEngine, DebateResult, DebateRound, JudgeVerdict};
pub use error::{AgentError, OrchestrateError};
pub use events::{Event, EventBus, EventHandler, EventType, JsonlEventLog};
pub use hitl::{
    ApprovalAction, ApprovalChannel, ApprovalResult, BusApprovalChannel, CliApprovalChannel,
    HitlController, PendingApproval, DEFAULT_APPROVAL_TIMEOUT,
};
pub use inference::{LoopOutcome, ToolUseLoop, MAX_TOOL_STEPS};
pub use limiter::RateLimiter;
pub use llm::{
    ChatOpenAI, LlmClient, LlmResponse, LlmUsage, MessageChunk, MockLlm, MockTurn, SamplingParams,
};
pub use message::Message;
pub use orchestrator::{
    Orchestrator, OrchestratorBuilder, OrchestratorConfig, PipelineOutcome, ESCALATE_MARKER,
    MAX_VALIDATION_RETRIES,
};
pub use persona::{
    Persona, PersonaError, PersonaLibrary, PersonaManager, PersonaTransition,
};
pub use router::{Destination, RouteDecision, Router, ROUTER_SYSTEM_PROMPT};
pub use sandbox::{
    ExecOutcome, IsolatedOutcome, ProcessSandbox, SandboxGuard, SandboxPolicy, SandboxRuntime,
};
pub use state::{
    HandoffContext, HistoryMessage, HitlContext, MessageMeta, Role, SessionState, SessionStatus,
    ToolCall, UsageMetadata,
};
pub use tools::{
    register_provider_tools, ExternalToolProvider, ListDirTool, ProviderTool, ReadFileTool,
    Tool, ToolCallContent, ToolError, ToolRegistry, ToolSpec, TOOL_LIST_DIR, TOOL_READ_FILE,
};
pub use validator::{
    check_syntax, extract_code_blocks, format_error_feedback, validate_response,
    validate_with_probe, SyntaxIssue, ValidationReport, PROBE_TIMEOUT,
};

/// When running `cargo test -p arbiter`, initializes tracing from `RUST_LOG`
/// so unit tests in `src/**` can print logs with `--nocapture`.
#[cfg(test)]
mod test_logging {
    use ctor::ctor;
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;
    use tracing_subscriber::EnvFilter;
    use tracing_subscriber::Layer;

    #[ctor]
    fn init() {
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
        let _ = tracing_subscriber::registry()
            .with(
                tracing_subscriber::fmt::layer()
                    .with_test_writer()
                    .with_filter(filter),
            )
            .try_init();
    }
}
