//! The orchestrator: the end-to-end per-request state machine.
//!
//! Pipeline: cache lookup → route (sticky skip) → worker tool-loop or cloud
//! dispatch → deterministic validation (bounded retries) → critic rounds
//! (bounded) → optional auto-debate on cloud output → milestone checkpoint →
//! respond. Local failures past their retry budget escalate to the cloud
//! tier carrying the failed output as context; escalated output bypasses
//! validation and critic. A tool demanding approval, or a debate escalation,
//! suspends the session through the HITL controller instead of answering.
//!
//! Checkpoint policy: TRANSACTION after routing, before every batch of tool
//! dispatches inside the inference loop (each batch at its own step, so
//! retries and multi-batch loops never overwrite a prior recovery point),
//! before every cloud call, on cancellation, and before HITL suspension;
//! MILESTONE on every respond.
//!
//! The orchestrator is the sole mutator of a session's state: callers hold
//! per-session exclusivity (one `&mut SessionState` at a time) and all other
//! components see the state only through the helpers here.

use std::sync::{Arc, RwLock};
use std::time::Instant;

use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::cache::SemanticCache;
use crate::checkpoint::{CheckpointKind, CheckpointStore};
use crate::critic::{format_suggestions_feedback, Critic, MAX_CRITIC_ROUNDS};
use crate::debate::DebateEngine;
use crate::error::OrchestrateError;
use crate::events::{Event, EventBus, EventType};
use crate::hitl::HitlController;
use crate::inference::{LoopOutcome, ToolUseLoop};
use crate::llm::LlmClient;
use crate::message::Message;
use crate::persona::PersonaManager;
use crate::limiter::RateLimiter;
use crate::router::{Destination, Router};
use crate::state::{HistoryMessage, MessageMeta, Role, SessionState};
use crate::validator::{format_error_feedback, validate_response};

/// Marker the worker emits when it wants the cloud tier to take over.
pub const ESCALATE_MARKER: &str = "[ESCALATE]";

/// Default bound on validation-driven regeneration.
pub const MAX_VALIDATION_RETRIES: u32 = 2;

/// Handler label for cache hits.
const CACHE_HANDLER: &str = "semantic-cache";

/// Handler label for the local worker.
const LOCAL_HANDLER: &str = "local-worker";

/// Orchestration options; usually derived from the `system.*` config section.
#[derive(Clone, Debug)]
pub struct OrchestratorConfig {
    pub max_validation_retries: u32,
    pub max_critic_rounds: u32,
    pub checkpoint_enabled: bool,
    pub debate_auto_trigger_on_cloud: bool,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_validation_retries: MAX_VALIDATION_RETRIES,
            max_critic_rounds: MAX_CRITIC_ROUNDS as u32,
            checkpoint_enabled: true,
            debate_auto_trigger_on_cloud: false,
        }
    }
}

impl OrchestratorConfig {
    /// Derives the options from the parsed config document.
    pub fn from_system(section: &sys_config::SystemSection) -> Self {
        Self {
            checkpoint_enabled: section.checkpoint_enabled,
            debate_auto_trigger_on_cloud: section.debate_auto_trigger_on_cloud,
            ..Self::default()
        }
    }
}

/// Terminal result of one pipeline run.
#[derive(Debug)]
pub enum PipelineOutcome {
    /// Final answer for the user.
    Response(String),
    /// Session suspended awaiting a human decision.
    Suspended { reason: String },
    /// Cancelled between stages; a TRANSACTION checkpoint was written.
    Cancelled,
}

struct CloudTier {
    llm: Arc<dyn LlmClient>,
    label: String,
}

/// Why the local path handed off to the cloud tier.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum EscalationReason {
    WorkerEscalation,
    ValidationFail,
    CriticReject,
}

impl EscalationReason {
    fn as_str(&self) -> &'static str {
        match self {
            EscalationReason::WorkerEscalation => "worker-escalation",
            EscalationReason::ValidationFail => "validation-fail",
            EscalationReason::CriticReject => "critic-reject",
        }
    }
}

enum LocalRun {
    Completed {
        response: String,
        validation_passed: bool,
        critic_passed: Option<bool>,
    },
    Escalate {
        reason: EscalationReason,
        prior_output: String,
        validation_passed: bool,
        critic_passed: Option<bool>,
    },
    Suspended {
        reason: String,
    },
    Cancelled,
}

/// Composes every component into the request pipeline.
pub struct Orchestrator {
    router: Router,
    worker_llm: Arc<dyn LlmClient>,
    cloud: RwLock<CloudTier>,
    tool_loop: ToolUseLoop,
    critic: Critic,
    debate: Option<DebateEngine>,
    hitl: Arc<HitlController>,
    checkpoints: Arc<dyn CheckpointStore>,
    personas: Arc<PersonaManager>,
    cache: Option<Arc<SemanticCache>>,
    limiter: Arc<RateLimiter>,
    bus: Option<Arc<EventBus>>,
    config: OrchestratorConfig,
}

/// Step-by-step construction; required pieces up front, the rest optional.
pub struct OrchestratorBuilder {
    router: Router,
    worker_llm: Arc<dyn LlmClient>,
    cloud_llm: Arc<dyn LlmClient>,
    cloud_label: String,
    tool_loop: ToolUseLoop,
    critic: Critic,
    checkpoints: Arc<dyn CheckpointStore>,
    personas: Arc<PersonaManager>,
    debate: Option<DebateEngine>,
    cache: Option<Arc<SemanticCache>>,
    limiter: Option<Arc<RateLimiter>>,
    bus: Option<Arc<EventBus>>,
    config: OrchestratorConfig,
}

impl OrchestratorBuilder {
    pub fn new(
        router: Router,
        worker_llm: Arc<dyn LlmClient>,
        cloud_llm: Arc<dyn LlmClient>,
        cloud_label: impl Into<String>,
        tool_loop: ToolUseLoop,
        critic: Critic,
        checkpoints: Arc<dyn CheckpointStore>,
        personas: Arc<PersonaManager>,
    ) -> Self {
        Self {
            router,
            worker_llm,
            cloud_llm,
            cloud_label: cloud_label.into(),
            tool_loop,
            critic,
            checkpoints,
            personas,
            debate: None,
            cache: None,
            limiter: None,
            bus: None,
            config: OrchestratorConfig::default(),
        }
    }

    pub fn with_debate(mut self, debate: DebateEngine) -> Self {
        self.debate = Some(debate);
        self
    }

    pub fn with_cache(mut self, cache: Arc<SemanticCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn with_limiter(mut self, limiter: Arc<RateLimiter>) -> Self {
        self.limiter = Some(limiter);
        self
    }

    pub fn with_bus(mut self, bus: Arc<EventBus>) -> Self {
        self.bus = Some(bus);
        self
    }

    pub fn with_config(mut self, config: OrchestratorConfig) -> Self {
        self.config = config;
        self
    }

    pub fn build(self) -> Orchestrator {
        // The loop checkpoints before every tool batch; it shares the same
        // store and honors the checkpoint toggle.
        let tool_loop = if self.config.checkpoint_enabled {
            self.tool_loop
                .with_checkpoints(Arc::clone(&self.checkpoints))
        } else {
            self.tool_loop
        };
        Orchestrator {
            router: self.router,
            worker_llm: self.worker_llm,
            cloud: RwLock::new(CloudTier {
                llm: self.cloud_llm,
                label: self.cloud_label,
            }),
            tool_loop,
            critic: self.critic,
            debate: self.debate,
            hitl: Arc::new(HitlController::new(Arc::clone(&self.checkpoints))),
            checkpoints: self.checkpoints,
            personas: self.personas,
            cache: self.cache,
            limiter: self
                .limiter
                .unwrap_or_else(|| Arc::new(RateLimiter::default_local())),
            bus: self.bus,
            config: self.config,
        }
    }
}

impl Orchestrator {
    /// The HITL controller, for external resume paths (gateways, shell).
    pub fn hitl(&self) -> Arc<HitlController> {
        Arc::clone(&self.hitl)
    }

    /// The router, for observability in callers and tests.
    pub fn router(&self) -> &Router {
        &self.router
    }

    /// Current cloud model label.
    pub fn cloud_label(&self) -> String {
        self.cloud.read().expect("cloud lock").label.clone()
    }

    /// Swaps the cloud tier (the `/model` command).
    pub fn set_cloud(&self, llm: Arc<dyn LlmClient>, label: impl Into<String>) {
        let mut cloud = self.cloud.write().expect("cloud lock");
        cloud.llm = llm;
        cloud.label = label.into();
    }

    fn publish(&self, state: &SessionState, event_type: EventType, mut payload: Value) {
        if let Some(bus) = &self.bus {
            if let Some(obj) = payload.as_object_mut() {
                obj.insert(
                    "session_id".to_string(),
                    Value::String(state.session_id.clone()),
                );
            }
            bus.publish(Event::new(event_type, "orchestrator", payload));
        }
    }

    async fn checkpoint(
        &self,
        state: &SessionState,
        kind: CheckpointKind,
        label: &str,
    ) -> Result<(), OrchestrateError> {
        if !self.config.checkpoint_enabled {
            return Ok(());
        }
        self.checkpoints.save(state, kind, label).await?;
        Ok(())
    }

    async fn cancel_exit(&self, state: &mut SessionState) -> Result<PipelineOutcome, OrchestrateError> {
        info!(session = %state.session_id, "pipeline cancelled");
        self.checkpoint(state, CheckpointKind::Transaction, "cancelled")
            .await?;
        Ok(PipelineOutcome::Cancelled)
    }

    /// Runs one user request through the full pipeline.
    pub async fn process(
        &self,
        state: &mut SessionState,
        user_input: &str,
        cancel: &CancellationToken,
    ) -> Result<PipelineOutcome, OrchestrateError> {
        let started = Instant::now();
        state.increment_turn();
        state.increment_step();
        state.push_message(HistoryMessage::new(Role::User, user_input));
        self.publish(
            state,
            EventType::UserMessage,
            json!({ "text": user_input, "turn": state.turn_number }),
        );

        // ── Cache lookup: short-circuit before any model work ────────
        if let Some(cache) = &self.cache {
            if let Some(cached) = cache.get(user_input).await {
                state.push_message(HistoryMessage::new(Role::Assistant, cached.clone()).with_meta(
                    MessageMeta {
                        handler: Some(CACHE_HANDLER.into()),
                        cache_hit: Some(true),
                        ..MessageMeta::default()
                    },
                ));
                self.publish(
                    state,
                    EventType::Metric,
                    json!({ "metric": "cache_hit", "value": true }),
                );
                return self.respond(state, cached, started).await;
            }
        }

        if cancel.is_cancelled() {
            return self.cancel_exit(state).await;
        }

        // ── Route: sticky decision wins, otherwise consult the router ─
        let (destination, route_reason, sticky) = match state.current_agent {
            Some(destination) => {
                info!(destination = %destination, "sticky route, router skipped");
                (destination, "sticky routing (same agent as previous turn)".to_string(), true)
            }
            None => {
                let decision = self.router.route(user_input).await;
                state.current_agent = Some(decision.destination);
                (decision.destination, decision.reason, false)
            }
        };
        state.push_message(
            HistoryMessage::new(Role::System, format!("[ROUTING] {}: {}", destination, route_reason))
                .with_meta(MessageMeta {
                    reason: Some(route_reason.clone()),
                    sticky: Some(sticky),
                    ..MessageMeta::default()
                }),
        );
        self.publish(
            state,
            EventType::Decision,
            json!({ "destination": destination.as_str(), "reason": route_reason, "sticky": sticky }),
        );
        self.checkpoint(state, CheckpointKind::Transaction, "post-routing")
            .await?;

        if cancel.is_cancelled() {
            return self.cancel_exit(state).await;
        }

        // ── Execute ──────────────────────────────────────────────────
        let mut via_cloud = destination == Destination::Cloud;
        let final_response = match destination {
            Destination::Cloud => {
                let response = self.run_cloud(state, user_input).await?;
                let label = self.cloud_label();
                state.push_message(HistoryMessage::new(Role::Assistant, response.clone()).with_meta(
                    MessageMeta {
                        handler: Some(label),
                        reason: Some(route_reason),
                        persona: Some(self.personas.current_id()),
                        ..MessageMeta::default()
                    },
                ));
                response
            }
            Destination::Local => match self.run_local(state, user_input, cancel).await? {
                LocalRun::Completed {
                    response,
                    validation_passed,
                    critic_passed,
                } => {
                    state.push_message(
                        HistoryMessage::new(Role::Assistant, response.clone()).with_meta(
                            MessageMeta {
                                handler: Some(LOCAL_HANDLER.into()),
                                validation_passed: Some(validation_passed),
                                critic_passed,
                                ..MessageMeta::default()
                            },
                        ),
                    );
                    response
                }
                LocalRun::Escalate {
                    reason,
                    prior_output,
                    validation_passed,
                    critic_passed,
                } => {
                    via_cloud = true;
                    info!(reason = reason.as_str(), "escalating to cloud tier");
                    // Escalation clears stickiness: the next turn re-routes.
                    state.reset_routing();

                    let escalation_task = format!(
                        "A previous attempt by the local tier:\n{}\n\nOriginal request:\n{}",
                        prior_output, user_input
                    );
                    let response = self.run_cloud(state, &escalation_task).await?;
                    let excerpt: String = prior_output.chars().take(500).collect();
                    let label = self.cloud_label();
                    state.push_message(
                        HistoryMessage::new(Role::Assistant, response.clone()).with_meta(
                            MessageMeta {
                                handler: Some(label),
                                reason: Some(reason.as_str().to_string()),
                                validation_passed: Some(validation_passed),
                                critic_passed,
                                prior_output_excerpt: Some(excerpt),
                                ..MessageMeta::default()
                            },
                        ),
                    );
                    response
                }
                LocalRun::Suspended { reason } => {
                    return Ok(PipelineOutcome::Suspended { reason });
                }
                LocalRun::Cancelled => {
                    return self.cancel_exit(state).await;
                }
            },
        };

        if cancel.is_cancelled() {
            return self.cancel_exit(state).await;
        }

        // ── Optional adversarial debate on cloud output ──────────────
        let mut final_response = final_response;
        if via_cloud && self.config.debate_auto_trigger_on_cloud {
            if let Some(debate) = &self.debate {
                info!("auto-triggering adversarial debate on cloud response");
                match debate.run(&final_response, user_input).await {
                    Ok(result) if result.escalated => {
                        self.hitl
                            .suspend(
                                state,
                                "Adversarial debate escalation",
                                None,
                                Some(json!({ "debate_report": result.report })),
                            )
                            .await?;
                        self.publish(
                            state,
                            EventType::ApprovalRequest,
                            json!({ "reason": "Adversarial debate escalation" }),
                        );
                        return Ok(PipelineOutcome::Suspended {
                            reason: "Adversarial debate escalation".to_string(),
                        });
                    }
                    Ok(result) => {
                        info!(rounds = result.total_rounds, "debate approved");
                        final_response = result.final_proposal;
                    }
                    Err(e) => {
                        warn!(error = %e, "debate failed, keeping undebated response");
                    }
                }
            }
        }

        self.respond(state, final_response, started).await
    }

    /// Terminal RESPOND state: milestone checkpoint, cache write, events.
    async fn respond(
        &self,
        state: &mut SessionState,
        response: String,
        started: Instant,
    ) -> Result<PipelineOutcome, OrchestrateError> {
        state.metadata.elapsed_ms = started.elapsed().as_secs_f64() * 1000.0;
        self.checkpoint(state, CheckpointKind::Milestone, "task-complete")
            .await?;

        if let Some(cache) = &self.cache {
            let last_user = state
                .conversation_history
                .iter()
                .rev()
                .find(|m| m.role == Role::User)
                .map(|m| m.content.clone());
            if let Some(query) = last_user {
                if !response.starts_with("[ERROR]") {
                    cache.put(&query, &response).await;
                }
            }
        }

        self.publish(
            state,
            EventType::AgentResponse,
            json!({ "text": response, "turn": state.turn_number }),
        );
        Ok(PipelineOutcome::Response(response))
    }

    /// Cloud dispatch: rate limit, pre-cloud checkpoint, one completion under
    /// the active persona. Provider failure (after the client's internal
    /// retry) yields an `[ERROR]` response that is never cached.
    async fn run_cloud(
        &self,
        state: &mut SessionState,
        task: &str,
    ) -> Result<String, OrchestrateError> {
        if !self.limiter.try_acquire().await {
            return Err(OrchestrateError::RateLimited);
        }
        state.increment_step();
        self.checkpoint(state, CheckpointKind::Transaction, "pre-cloud")
            .await?;

        let mut messages = vec![Message::system(self.personas.system_prompt(None))];
        let handoff = state.handoff_context().to_prompt_block();
        if !handoff.is_empty() {
            messages.push(Message::system(format!("Context from this session:\n{}", handoff)));
        }
        messages.push(Message::user(task.to_string()));

        let (llm, label) = {
            let cloud = self.cloud.read().expect("cloud lock");
            (Arc::clone(&cloud.llm), cloud.label.clone())
        };
        match llm.invoke(&messages).await {
            Ok(reply) => {
                if let Some(usage) = reply.usage {
                    state.metadata.input_tokens += usage.prompt_tokens as u64;
                    state.metadata.output_tokens += usage.completion_tokens as u64;
                }
                if reply.content.is_empty() {
                    Ok("[ERROR] cloud tier returned an empty response".to_string())
                } else {
                    Ok(reply.content)
                }
            }
            Err(e) => {
                warn!(model = %label, error = %e, "cloud call failed");
                self.publish(
                    state,
                    EventType::Error,
                    json!({ "kind": "upstream", "detail": e.to_string() }),
                );
                Ok(format!("[ERROR] cloud tier ({}) failed: {}", label, e))
            }
        }
    }

    /// Local worker pipeline: tool loop, validation retries, critic rounds.
    async fn run_local(
        &self,
        state: &mut SessionState,
        user_input: &str,
        cancel: &CancellationToken,
    ) -> Result<LocalRun, OrchestrateError> {
        if !self.limiter.try_acquire().await {
            return Err(OrchestrateError::RateLimited);
        }

        let mut messages = vec![Message::system(self.personas.system_prompt(None))];
        let handoff = state.handoff_context().to_prompt_block();
        if !handoff.is_empty() {
            messages.push(Message::system(format!("Context from this session:\n{}", handoff)));
        }
        messages.push(Message::user(user_input.to_string()));

        // Tool-batch checkpoints are written inside the inference loop, one
        // per batch, on every attempt including the retries below.
        let mut response = match self.drive_worker(state, messages.clone(), cancel).await? {
            Ok(text) => text,
            Err(run) => return Ok(run),
        };

        // Worker self-escalation beats every other check.
        if response.contains(ESCALATE_MARKER) {
            warn!("worker requested escalation");
            return Ok(LocalRun::Escalate {
                reason: EscalationReason::WorkerEscalation,
                prior_output: response,
                validation_passed: false,
                critic_passed: None,
            });
        }

        // ── Deterministic validation with bounded regeneration ───────
        let mut validation = validate_response(&response);
        let mut retries = 0u32;
        while !validation.valid && retries < self.config.max_validation_retries {
            if cancel.is_cancelled() {
                return Ok(LocalRun::Cancelled);
            }
            retries += 1;
            state.retry_count += 1;
            info!(retry = retries, "validation failed, regenerating with feedback");

            let mut retry_messages = messages.clone();
            retry_messages.push(Message::assistant(response.clone()));
            retry_messages.push(Message::user(format_error_feedback(&validation)));

            response = match self.drive_worker(state, retry_messages, cancel).await? {
                Ok(text) => text,
                Err(run) => return Ok(run),
            };
            if response.contains(ESCALATE_MARKER) {
                return Ok(LocalRun::Escalate {
                    reason: EscalationReason::WorkerEscalation,
                    prior_output: response,
                    validation_passed: false,
                    critic_passed: None,
                });
            }
            validation = validate_response(&response);
        }
        if !validation.valid {
            warn!("validation retries exhausted, escalating");
            return Ok(LocalRun::Escalate {
                reason: EscalationReason::ValidationFail,
                prior_output: response,
                validation_passed: false,
                critic_passed: None,
            });
        }

        // ── Critic rounds; plain text answers skip the critic ────────
        let mut critic_passed = None;
        if validation.has_code {
            let mut rounds = 0u32;
            loop {
                if cancel.is_cancelled() {
                    return Ok(LocalRun::Cancelled);
                }
                let review = self.critic.review(user_input, &response).await;
                if review.passed() {
                    critic_passed = Some(true);
                    break;
                }
                rounds += 1;
                if rounds >= self.config.max_critic_rounds {
                    warn!("critic rounds exhausted, escalating");
                    return Ok(LocalRun::Escalate {
                        reason: EscalationReason::CriticReject,
                        prior_output: response,
                        validation_passed: true,
                        critic_passed: Some(false),
                    });
                }
                info!(round = rounds, "critic rejected, regenerating with suggestions");
                state.retry_count += 1;

                let mut retry_messages = messages.clone();
                retry_messages.push(Message::assistant(response.clone()));
                retry_messages.push(Message::user(format_suggestions_feedback(&review)));
                response = match self.drive_worker(state, retry_messages, cancel).await? {
                    Ok(text) => text,
                    Err(run) => return Ok(run),
                };
                if response.contains(ESCALATE_MARKER) {
                    return Ok(LocalRun::Escalate {
                        reason: EscalationReason::WorkerEscalation,
                        prior_output: response,
                        validation_passed: true,
                        critic_passed: Some(false),
                    });
                }
                let revalidated = validate_response(&response);
                if !revalidated.valid {
                    return Ok(LocalRun::Escalate {
                        reason: EscalationReason::ValidationFail,
                        prior_output: response,
                        validation_passed: false,
                        critic_passed: Some(false),
                    });
                }
            }
        }

        Ok(LocalRun::Completed {
            response,
            validation_passed: true,
            critic_passed,
        })
    }

    /// One worker tool-loop run; maps non-text outcomes to their LocalRun
    /// terminal forms.
    async fn drive_worker(
        &self,
        state: &mut SessionState,
        messages: Vec<Message>,
        cancel: &CancellationToken,
    ) -> Result<Result<String, LocalRun>, OrchestrateError> {
        match self
            .tool_loop
            .run(self.worker_llm.as_ref(), messages, state, cancel)
            .await?
        {
            LoopOutcome::Text(text) => Ok(Ok(text)),
            LoopOutcome::NeedsApproval {
                reason,
                function,
                args,
            } => {
                self.hitl
                    .suspend(state, &reason, Some(function.clone()), Some(args))
                    .await?;
                self.publish(
                    state,
                    EventType::ApprovalRequest,
                    json!({ "reason": reason, "function": function }),
                );
                Ok(Err(LocalRun::Suspended { reason }))
            }
            LoopOutcome::Failure(detail) => {
                // Provider failure counts as a validation-level failure:
                // escalate with whatever context exists.
                warn!(error = %detail, "worker provider failed");
                Ok(Err(LocalRun::Escalate {
                    reason: EscalationReason::ValidationFail,
                    prior_output: format!("[worker unavailable: {}]", detail),
                    validation_passed: false,
                    critic_passed: None,
                }))
            }
            LoopOutcome::Cancelled => Ok(Err(LocalRun::Cancelled)),
        }
    }
}
