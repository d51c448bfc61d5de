//! Two-stage task router: rule tables first, LLM classifier only for the
//! ambiguous middle.
//!
//! Stage 1 matches the input against the ordered `FAST_LOCAL` and
//! `FAST_CLOUD` regex tables (LOCAL consulted first, first match wins) and
//! costs nothing. Stage 2 asks a small model for
//! `{thinking, route, reason}`; parse precedence is JSON →
//! `<think>`/`ROUTE:`/`REASON:` extraction → LOCAL. Any provider failure
//! also lands on LOCAL — the cost-preserving default.
//!
//! Sticky routing (reusing the previous decision) is the orchestrator's
//! business; the router only ever answers for a single input.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::llm::LlmClient;
use crate::message::Message;

/// Routing destination: the cheap local tier or the expensive cloud tier.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Destination {
    Local,
    Cloud,
}

impl Destination {
    pub fn as_str(&self) -> &'static str {
        match self {
            Destination::Local => "LOCAL",
            Destination::Cloud => "CLOUD",
        }
    }
}

impl std::fmt::Display for Destination {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One routing decision with its provenance.
#[derive(Clone, Debug)]
pub struct RouteDecision {
    pub destination: Destination,
    pub reason: String,
    pub thinking: String,
}

/// Simple tasks that stay local: greetings, CLI commands, arithmetic,
/// formatting chores, debugging, everyday code work.
static FAST_LOCAL_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        r"(?i)^(hi|hello|안녕|감사|thanks|thank you)",
        r"^/",
        r"^\d+\s*[\+\-\*/]",
        r"(?i)(주석|포맷팅|format|번역|translate|docstring|lint|type hint)",
        r"(?i)(디버깅|debug|fix|bug|오류|수정)",
        r"(?i)(코드|code|함수|function|class|모듈|module)",
    ]
    .iter()
    .map(|p| Regex::new(p).expect("local route pattern"))
    .collect()
});

/// Heavyweight work that goes straight to the cloud tier: architecture and
/// system design, security audits, mathematical proofs.
static FAST_CLOUD_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        r"(?i)(아키텍처|architecture).*(설계|design)",
        r"(?i)(설계|design).*(아키텍처|architecture)",
        r"(?i)(시스템|system).*(설계|design|아키텍처|architecture)",
        r"(?i)(전체|overall).*(설계|design|아키텍처|architecture)",
        r"(?i)(보안|security).*(감사|audit)",
        r"(?i)(수학적 증명|mathematical proof)",
    ]
    .iter()
    .map(|p| Regex::new(p).expect("cloud route pattern"))
    .collect()
});

/// Classifier contract for the stage-2 model.
pub const ROUTER_SYSTEM_PROMPT: &str = r#"You are a task router for a hybrid AI system.
Your job is to analyze user requests and decide the best execution path.

You MUST respond with a valid JSON object in this EXACT format:
{
  "thinking": "[Your reasoning about task complexity here]",
  "route": "LOCAL or CLOUD",
  "reason": "[One-line reason for the routing decision]"
}

Routing criteria:
- LOCAL: Code implementation, debugging, refactoring, simple Q&A, formatting, documentation, translation, standard programming tasks.
- CLOUD: High-level architecture design, complex multi-step reasoning, security audits, mathematical proofs, novel algorithm design, strategic planning that requires deep domain expertise.

When in doubt, prefer LOCAL to minimize cloud costs.
You MUST respond ONLY with the JSON object. No markdown, no extra text."#;

static THINK_TAG: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)<think>(.*?)</think>").expect("think pattern"));
static ROUTE_MARKER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)ROUTE:\s*(LOCAL|CLOUD)").expect("route pattern"));
static REASON_MARKER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"REASON:\s*(.+)").expect("reason pattern"));

/// Two-stage router. The stage-2 invocation count is observable so callers
/// can verify "rule match ⇒ no model call".
pub struct Router {
    llm: Arc<dyn LlmClient>,
    llm_calls: AtomicU64,
    route_calls: AtomicU64,
}

impl Router {
    pub fn new(llm: Arc<dyn LlmClient>) -> Self {
        Self {
            llm,
            llm_calls: AtomicU64::new(0),
            route_calls: AtomicU64::new(0),
        }
    }

    /// Number of stage-2 classifier invocations so far.
    pub fn llm_call_count(&self) -> u64 {
        self.llm_calls.load(Ordering::SeqCst)
    }

    /// Number of `route` invocations so far; lets callers verify that sticky
    /// routing really skipped the router.
    pub fn route_call_count(&self) -> u64 {
        self.route_calls.load(Ordering::SeqCst)
    }

    /// Routes one user input.
    pub async fn route(&self, user_message: &str) -> RouteDecision {
        self.route_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(fast) = Self::fast_route(user_message) {
            return fast;
        }

        self.llm_calls.fetch_add(1, Ordering::SeqCst);
        let messages = vec![
            Message::system(ROUTER_SYSTEM_PROMPT),
            Message::user(user_message),
        ];
        match self.llm.invoke(&messages).await {
            Ok(reply) => Self::parse_routing_response(&reply.content),
            Err(e) => {
                warn!(error = %e, "router model failed, defaulting to LOCAL");
                RouteDecision {
                    destination: Destination::Local,
                    reason: format!("router fallback due to error: {}", e),
                    thinking: String::new(),
                }
            }
        }
    }

    /// Stage 1: ordered rule tables, LOCAL first, first match wins.
    /// `None` delegates to the model.
    fn fast_route(user_message: &str) -> Option<RouteDecision> {
        if FAST_LOCAL_PATTERNS.iter().any(|re| re.is_match(user_message)) {
            info!("fast route: LOCAL (rule match)");
            return Some(RouteDecision {
                destination: Destination::Local,
                reason: "rule-based fast routing (simple task)".to_string(),
                thinking: String::new(),
            });
        }
        if FAST_CLOUD_PATTERNS.iter().any(|re| re.is_match(user_message)) {
            info!("fast route: CLOUD (rule match)");
            return Some(RouteDecision {
                destination: Destination::Cloud,
                reason: "rule-based fast routing (complex task)".to_string(),
                thinking: String::new(),
            });
        }
        None
    }

    /// Stage-2 response parser: JSON first, marker extraction second,
    /// LOCAL when nothing is recognizable.
    fn parse_routing_response(raw: &str) -> RouteDecision {
        if let Ok(value) = serde_json::from_str::<serde_json::Value>(raw.trim()) {
            let destination = match value
                .get("route")
                .and_then(|v| v.as_str())
                .map(str::to_uppercase)
                .as_deref()
            {
                Some("CLOUD") => Destination::Cloud,
                _ => Destination::Local,
            };
            let reason = value
                .get("reason")
                .and_then(|v| v.as_str())
                .unwrap_or("no reason provided")
                .to_string();
            let thinking = value
                .get("thinking")
                .and_then(|v| v.as_str())
                .unwrap_or_default()
                .to_string();
            info!(destination = %destination, reason = %reason, "route decision (json)");
            return RouteDecision {
                destination,
                reason,
                thinking,
            };
        }

        warn!("router output is not JSON, falling back to marker extraction");
        let thinking = THINK_TAG
            .captures(raw)
            .and_then(|cap| cap.get(1))
            .map(|m| m.as_str().trim().to_string())
            .unwrap_or_default();
        let destination = ROUTE_MARKER
            .captures(raw)
            .and_then(|cap| cap.get(1))
            .map(|m| {
                if m.as_str().eq_ignore_ascii_case("CLOUD") {
                    Destination::Cloud
                } else {
                    Destination::Local
                }
            })
            .unwrap_or(Destination::Local);
        let reason = REASON_MARKER
            .captures(raw)
            .and_then(|cap| cap.get(1))
            .map(|m| m.as_str().trim().to_string())
            .unwrap_or_else(|| "no reason provided".to_string());

        info!(destination = %destination, reason = %reason, "route decision (markers)");
        RouteDecision {
            destination,
            reason,
            thinking,
        }
    }
}
