//! End-to-end pipeline scenarios: cache short-circuit, sticky routing,
//! validation-driven retry, escalation, auto-debate, and HITL suspension.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;
use tokio_util::sync::CancellationToken;

use arbiter::{
    Critic, DebateEngine, Destination, Embedder, EmbedderError, InMemoryVectorIndex,
    MemoryCheckpointStore, MockLlm, MockTurn, Orchestrator, OrchestratorBuilder,
    OrchestratorConfig, PersonaLibrary, PersonaManager, PipelineOutcome, RateLimiter, Role,
    Router, SemanticCache, SessionState, SessionStatus, Tool, ToolCall, ToolCallContent,
    ToolError, ToolRegistry, ToolSpec, ToolUseLoop, CheckpointKind, CheckpointStore,
    OrchestrateError, SandboxGuard, SandboxPolicy, ReadFileTool,
};

/// Deterministic bag-of-words embedder: identical texts embed identically.
struct HashEmbedder;

#[async_trait]
impl Embedder for HashEmbedder {
    async fn embed(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, EmbedderError> {
        Ok(texts
            .iter()
            .map(|text| {
                let mut v = vec![0.0f32; 64];
                for word in text.split_whitespace() {
                    let mut h: u64 = 1469598103934665603;
                    for b in word.as_bytes() {
                        h ^= *b as u64;
                        h = h.wrapping_mul(1099511628211);
                    }
                    v[(h % 64) as usize] += 1.0;
                }
                v
            })
            .collect())
    }

    fn dimension(&self) -> usize {
        64
    }
}

/// Tool that always demands human sign-off.
struct DeployTool;

#[async_trait]
impl Tool for DeployTool {
    fn name(&self) -> &str {
        "deploy"
    }
    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: "deploy".into(),
            description: Some("Deploy the service".into()),
            input_schema: json!({"type": "object"}),
        }
    }
    async fn call(&self, args: serde_json::Value) -> Result<ToolCallContent, ToolError> {
        Err(ToolError::ApprovalRequired {
            reason: "production deploy".into(),
            function: "deploy".into(),
            args,
        })
    }
}

struct Mocks {
    worker: Arc<MockLlm>,
    cloud: Arc<MockLlm>,
    critic: Arc<MockLlm>,
    debate: Arc<MockLlm>,
}

struct Harness {
    orchestrator: Orchestrator,
    checkpoints: Arc<MemoryCheckpointStore>,
    cache: Arc<SemanticCache>,
    mocks: Mocks,
}

fn pass_review() -> MockTurn {
    MockTurn::Text(json!({"verdict": "PASS", "reason": "fine", "suggestions": []}).to_string())
}

fn reject_review() -> MockTurn {
    MockTurn::Text(
        json!({"verdict": "REJECT", "reason": "broken", "suggestions": ["handle empty input"]})
            .to_string(),
    )
}

fn build(
    worker_turns: Vec<MockTurn>,
    cloud_turns: Vec<MockTurn>,
    critic_turns: Vec<MockTurn>,
    debate_turns: Vec<MockTurn>,
    config: OrchestratorConfig,
    registry: ToolRegistry,
) -> Harness {
    let library = Arc::new(PersonaLibrary::embedded());
    let personas = Arc::new(PersonaManager::new(Arc::clone(&library), "worker").unwrap());

    let router_llm = Arc::new(MockLlm::fixed(
        json!({"thinking": "", "route": "LOCAL", "reason": "default"}).to_string(),
    ));
    let worker = Arc::new(MockLlm::with_script(worker_turns));
    let cloud = Arc::new(MockLlm::with_script(cloud_turns));
    let critic_llm = Arc::new(MockLlm::with_script(critic_turns));
    let debate_llm = Arc::new(MockLlm::with_script(debate_turns));

    let checkpoints = Arc::new(MemoryCheckpointStore::new());
    let cache = Arc::new(SemanticCache::new(
        Arc::new(HashEmbedder),
        Arc::new(InMemoryVectorIndex::new()),
    ));

    let orchestrator = OrchestratorBuilder::new(
        Router::new(router_llm.clone() as Arc<dyn arbiter::LlmClient>),
        worker.clone(),
        cloud.clone(),
        "cloud-pm-gemini",
        ToolUseLoop::new(Arc::new(registry)),
        Critic::new(critic_llm.clone(), &library).unwrap(),
        checkpoints.clone() as Arc<dyn CheckpointStore>,
        Arc::clone(&personas),
    )
    .with_cache(Arc::clone(&cache))
    .with_debate(DebateEngine::new(debate_llm.clone(), Arc::clone(&personas)))
    .with_limiter(Arc::new(RateLimiter::new(100, std::time::Duration::from_secs(60))))
    .with_config(config)
    .build();

    Harness {
        orchestrator,
        checkpoints,
        cache,
        mocks: Mocks {
            worker,
            cloud,
            critic: critic_llm,
            debate: debate_llm,
        },
    }
}

fn response_text(outcome: PipelineOutcome) -> String {
    match outcome {
        PipelineOutcome::Response(text) => text,
        other => panic!("expected a response, got {:?}", other),
    }
}

/// Scenario: a pre-populated cache entry short-circuits the pipeline — no
/// router, worker, or cloud invocation, handler recorded as the cache.
#[tokio::test]
async fn cache_short_circuit() {
    let h = build(
        vec![MockTurn::Text("never used".into())],
        vec![],
        vec![],
        vec![],
        OrchestratorConfig::default(),
        ToolRegistry::new(),
    );
    let query = "영업 시간이 언제야?";
    h.cache.put(query, "We are open 9am to 6pm.").await;

    let mut state = SessionState::new();
    let outcome = h
        .orchestrator
        .process(&mut state, query, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(response_text(outcome), "We are open 9am to 6pm.");
    assert_eq!(h.mocks.worker.call_count(), 0);
    assert_eq!(h.mocks.cloud.call_count(), 0);
    assert_eq!(h.orchestrator.router().route_call_count(), 0);

    let last = state.conversation_history.last().unwrap();
    assert_eq!(last.role, Role::Assistant);
    assert_eq!(last.metadata.handler.as_deref(), Some("semantic-cache"));
    assert_eq!(last.metadata.cache_hit, Some(true));
}

/// Scenario: two consecutive LOCAL turns — the second reuses the sticky
/// decision and never consults the router; a MILESTONE checkpoint lands on
/// each respond.
#[tokio::test]
async fn sticky_routing_skips_router() {
    let h = build(
        vec![MockTurn::Text("plain answer, no code".into())],
        vec![],
        vec![pass_review()],
        vec![],
        OrchestratorConfig::default(),
        ToolRegistry::new(),
    );
    let mut state = SessionState::new();

    let outcome = h
        .orchestrator
        .process(&mut state, "fix the code in this function", &CancellationToken::new())
        .await
        .unwrap();
    response_text(outcome);
    assert_eq!(h.orchestrator.router().route_call_count(), 1);
    assert_eq!(state.current_agent, Some(Destination::Local));

    let outcome = h
        .orchestrator
        .process(&mut state, "now fix the second function too", &CancellationToken::new())
        .await
        .unwrap();
    response_text(outcome);
    // Router untouched on the sticky turn; stage 2 never ran at all.
    assert_eq!(h.orchestrator.router().route_call_count(), 1);
    assert_eq!(h.orchestrator.router().llm_call_count(), 0);

    let last = state.conversation_history.last().unwrap();
    assert_eq!(last.metadata.handler.as_deref(), Some("local-worker"));

    // Plain text answers skip the critic entirely.
    assert_eq!(h.mocks.critic.call_count(), 0);

    // Terminal step carries a MILESTONE checkpoint.
    let items = h.checkpoints.list(&state.session_id).await.unwrap();
    assert!(items
        .iter()
        .any(|i| i.kind == CheckpointKind::Milestone && i.label == "task-complete"));
}

/// Scenario: the worker emits `def x(:`, validation fails, the feedback
/// retry produces corrected code, and the turn completes locally.
#[tokio::test]
async fn validation_driven_retry() {
    let h = build(
        vec![
            MockTurn::Text("```python\ndef x(:\n```".into()),
            MockTurn::Text("```python\ndef x():\n    return 1\n```".into()),
        ],
        vec![],
        vec![pass_review()],
        vec![],
        OrchestratorConfig::default(),
        ToolRegistry::new(),
    );
    let mut state = SessionState::new();

    let outcome = h
        .orchestrator
        .process(&mut state, "fix this code please", &CancellationToken::new())
        .await
        .unwrap();
    let text = response_text(outcome);
    assert!(text.contains("def x():"));

    assert_eq!(h.mocks.worker.call_count(), 2);
    assert_eq!(state.retry_count, 1);
    assert_eq!(h.mocks.cloud.call_count(), 0);

    let last = state.conversation_history.last().unwrap();
    assert_eq!(last.metadata.validation_passed, Some(true));
    assert_eq!(last.metadata.critic_passed, Some(true));

    // The retry prompt carried the validation feedback.
    let requests = h.mocks.worker.recorded_requests();
    assert!(requests[1].iter().any(|m| m.contains("[CODE ERROR]")));
}

/// Scenario: the critic rejects twice — the orchestrator clears stickiness
/// and escalates to the cloud with the local output embedded in the prompt.
#[tokio::test]
async fn escalation_after_critic_rejection() {
    let local_code = "```python\nvalue = compute()\n```";
    let h = build(
        vec![MockTurn::Text(local_code.into())],
        vec![MockTurn::Text("cloud rescue answer".into())],
        vec![reject_review(), reject_review()],
        vec![],
        OrchestratorConfig::default(),
        ToolRegistry::new(),
    );
    let mut state = SessionState::new();

    let outcome = h
        .orchestrator
        .process(&mut state, "write the aggregation code", &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(response_text(outcome), "cloud rescue answer");

    // Escalation cleared the sticky decision.
    assert!(state.current_agent.is_none());
    assert_eq!(h.mocks.cloud.call_count(), 1);

    let last = state.conversation_history.last().unwrap();
    assert_eq!(last.metadata.handler.as_deref(), Some("cloud-pm-gemini"));
    assert_eq!(last.metadata.reason.as_deref(), Some("critic-reject"));
    assert_eq!(last.metadata.critic_passed, Some(false));

    // The escalation prompt embeds the local output (first 500 chars).
    let excerpt: String = local_code.chars().take(500).collect();
    assert_eq!(last.metadata.prior_output_excerpt.as_deref(), Some(excerpt.as_str()));
    let cloud_requests = h.mocks.cloud.recorded_requests();
    assert!(cloud_requests[0].iter().any(|m| m.contains(&excerpt)));
}

/// Scenario: CLOUD route with auto-debate; the moderator approves in round
/// one with a weak-attack score, so the proposer is never asked to revise.
#[tokio::test]
async fn debate_early_approval_on_cloud() {
    let attack = MockTurn::Text(
        json!({
            "attack_vectors": [{"severity": "LOW", "finding": "minor nit", "evidence": "taste"}],
            "overall_assessment": "solid",
            "recommendation": "PASS"
        })
        .to_string(),
    );
    let judgment = MockTurn::Text(
        json!({"validity_score": 3, "verdict": "APPROVE", "reasoning": "attacks are weak"})
            .to_string(),
    );
    let config = OrchestratorConfig {
        debate_auto_trigger_on_cloud: true,
        ..OrchestratorConfig::default()
    };
    let h = build(
        vec![],
        vec![MockTurn::Text("the grand design".into())],
        vec![],
        vec![attack, judgment],
        config,
        ToolRegistry::new(),
    );
    let mut state = SessionState::new();

    let outcome = h
        .orchestrator
        .process(
            &mut state,
            "please design the overall architecture of the billing system",
            &CancellationToken::new(),
        )
        .await
        .unwrap();

    assert_eq!(response_text(outcome), "the grand design");
    // Attack + judgment only; no revision call.
    assert_eq!(h.mocks.debate.call_count(), 2);
    assert_eq!(h.mocks.worker.call_count(), 0);
    assert_eq!(state.status, SessionStatus::Running);
}

/// Scenario: a tool raises the approval requirement — the session suspends
/// with a TRANSACTION checkpoint and a visible pending request; an approve
/// resume returns it to Running with the context cleared.
#[tokio::test]
async fn hitl_suspend_and_resume() {
    let mut registry = ToolRegistry::new();
    registry.register(Box::new(DeployTool));
    let h = build(
        vec![MockTurn::WithToolCalls(
            String::new(),
            vec![ToolCall {
                name: "deploy".into(),
                arguments: json!({"env": "prod"}).to_string(),
                id: Some("call_1".into()),
            }],
        )],
        vec![],
        vec![],
        vec![],
        OrchestratorConfig::default(),
        registry,
    );
    let mut state = SessionState::new();

    let outcome = h
        .orchestrator
        .process(&mut state, "fix the deploy code and ship it", &CancellationToken::new())
        .await
        .unwrap();
    match outcome {
        PipelineOutcome::Suspended { reason } => assert_eq!(reason, "production deploy"),
        other => panic!("expected suspension, got {:?}", other),
    }

    assert_eq!(state.status, SessionStatus::Suspended);
    let context = state.hitl_context.as_ref().expect("hitl context");
    assert_eq!(context.reason, "production deploy");
    assert_eq!(context.function.as_deref(), Some("deploy"));

    let items = h.checkpoints.list(&state.session_id).await.unwrap();
    assert!(items
        .iter()
        .any(|i| i.kind == CheckpointKind::Transaction && i.label.starts_with("HITL:")));

    let hitl = h.orchestrator.hitl();
    assert!(hitl.pending(&state.session_id).is_some());

    let resumed = hitl
        .resume(&state.session_id, arbiter::ApprovalAction::Approve, None)
        .await
        .unwrap()
        .expect("resumed state");
    assert_eq!(resumed.status, SessionStatus::Running);
    assert!(resumed.hitl_context.is_none());
    assert!(hitl.pending(&state.session_id).is_none());
}

/// Scenario: an exhausted rate limiter surfaces as a retry-later error
/// without corrupting the session.
#[tokio::test]
async fn rate_limited_surfaces_retry_later() {
    let library = Arc::new(PersonaLibrary::embedded());
    let personas = Arc::new(PersonaManager::new(Arc::clone(&library), "worker").unwrap());
    let llm = Arc::new(MockLlm::fixed("unused"));
    let orchestrator = OrchestratorBuilder::new(
        Router::new(llm.clone() as Arc<dyn arbiter::LlmClient>),
        llm.clone(),
        llm.clone(),
        "cloud-pm",
        ToolUseLoop::new(Arc::new(ToolRegistry::new())),
        Critic::new(llm.clone(), &library).unwrap(),
        Arc::new(MemoryCheckpointStore::new()) as Arc<dyn CheckpointStore>,
        personas,
    )
    .with_limiter(Arc::new(RateLimiter::new(0, std::time::Duration::from_secs(60))))
    .build();

    let mut state = SessionState::new();
    let result = orchestrator
        .process(&mut state, "fix this code", &CancellationToken::new())
        .await;
    assert!(matches!(result, Err(OrchestrateError::RateLimited)));
}

/// Scenario: cancellation between stages exits cleanly with a TRANSACTION
/// checkpoint and no response.
#[tokio::test]
async fn cancellation_checkpoints_and_exits() {
    let h = build(
        vec![MockTurn::Text("never".into())],
        vec![],
        vec![],
        vec![],
        OrchestratorConfig::default(),
        ToolRegistry::new(),
    );
    let mut state = SessionState::new();
    let cancel = CancellationToken::new();
    cancel.cancel();

    let outcome = h
        .orchestrator
        .process(&mut state, "what are your opening hours", &cancel)
        .await
        .unwrap();
    assert!(matches!(outcome, PipelineOutcome::Cancelled));
    assert_eq!(h.mocks.worker.call_count(), 0);

    let items = h.checkpoints.list(&state.session_id).await.unwrap();
    assert!(items.iter().any(|i| i.label == "cancelled"));
}

/// Scenario: the worker's own `[ESCALATE]` marker hands the task to the
/// cloud tier with the worker-escalation label.
#[tokio::test]
async fn worker_self_escalation() {
    let h = build(
        vec![MockTurn::Text("I cannot do this. [ESCALATE]".into())],
        vec![MockTurn::Text("cloud took over".into())],
        vec![],
        vec![],
        OrchestratorConfig::default(),
        ToolRegistry::new(),
    );
    let mut state = SessionState::new();

    let outcome = h
        .orchestrator
        .process(&mut state, "fix the impossible bug", &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(response_text(outcome), "cloud took over");

    let last = state.conversation_history.last().unwrap();
    assert_eq!(last.metadata.reason.as_deref(), Some("worker-escalation"));
    assert!(state.current_agent.is_none());
}

/// Scenario: sandboxed file tools work end-to-end through the inference
/// loop — the model reads a file and answers from its contents.
#[tokio::test]
async fn file_tool_through_pipeline() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("notes.txt"), "the answer is 42").unwrap();
    let guard = Arc::new(SandboxGuard::new(SandboxPolicy::default(), dir.path()));
    let mut registry = ToolRegistry::new();
    registry.register(Box::new(ReadFileTool::new(guard)));

    let h = build(
        vec![
            MockTurn::WithToolCalls(
                String::new(),
                vec![ToolCall {
                    name: "read_file".into(),
                    arguments: json!({"path": "notes.txt"}).to_string(),
                    id: Some("call_r".into()),
                }],
            ),
            MockTurn::Text("the notes say 42".into()),
        ],
        vec![],
        vec![],
        vec![],
        OrchestratorConfig::default(),
        registry,
    );
    let mut state = SessionState::new();

    let outcome = h
        .orchestrator
        .process(&mut state, "debug what the notes file says", &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(response_text(outcome), "the notes say 42");

    // The tool result reached the model on the second call.
    let requests = h.mocks.worker.recorded_requests();
    assert!(requests[1].iter().any(|m| m.contains("the answer is 42")));
}
