//! Adversarial debate engine: three-role dialectical verification.
//!
//! A proposal survives only if it withstands attack. Each round:
//!
//! - **Attack** (devil persona): produce a structured list of attack vectors.
//! - **Judge** (moderator persona): score the attack's validity 0–10 and
//!   deliver `APPROVE | REVISE | ESCALATE`.
//! - **Revise** (worker persona): rewrite the proposal under the critique —
//!   only on REVISE with rounds remaining.
//!
//! Branching: ESCALATE stops with `escalated=true` (human takes over);
//! APPROVE, or a validity score below the approval threshold (weak attacks),
//! stops approved; exhausting `max_rounds` force-approves the latest
//! revision. Failures degrade without approving: an unparsable judgment and
//! an unreachable judge both score 10 with verdict REVISE, so neither a
//! babbling nor a dead moderator waves a proposal through — the only exit
//! then is the round budget.
//!
//! The caller's persona is restored on every exit path.

use std::sync::Arc;

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{json, Value};
use tracing::{info, warn};

use crate::error::AgentError;
use crate::llm::LlmClient;
use crate::message::Message;
use crate::persona::PersonaManager;

/// Default round bound.
pub const DEFAULT_MAX_ROUNDS: u32 = 3;

/// Default validity score below which the proposal is approved.
pub const DEFAULT_APPROVAL_THRESHOLD: f64 = 7.0;

static FENCED_JSON: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)```(?:json)?\s*\n(.*?)```").expect("fenced json pattern"));

/// Moderator verdict.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum JudgeVerdict {
    Approve,
    Revise,
    Escalate,
}

impl JudgeVerdict {
    fn from_str_lossy(s: &str) -> Self {
        match s.to_uppercase().as_str() {
            "APPROVE" => JudgeVerdict::Approve,
            "ESCALATE" => JudgeVerdict::Escalate,
            _ => JudgeVerdict::Revise,
        }
    }
}

/// One debate round: raw and parsed text of each phase.
#[derive(Clone, Debug)]
pub struct DebateRound {
    pub round_number: u32,
    pub critique: String,
    pub critique_parsed: Value,
    pub judgment: String,
    pub judgment_parsed: Value,
    pub validity_score: f64,
    pub verdict: JudgeVerdict,
    pub revision: String,
}

/// Final debate result.
#[derive(Clone, Debug)]
pub struct DebateResult {
    pub final_proposal: String,
    pub approved: bool,
    pub total_rounds: u32,
    pub rounds: Vec<DebateRound>,
    pub escalated: bool,
    pub report: String,
}

/// Extracts a JSON object from model output; failure wraps the raw text.
fn parse_json_safe(text: &str) -> Value {
    let candidate = FENCED_JSON
        .captures(text)
        .and_then(|cap| cap.get(1))
        .map(|m| m.as_str())
        .unwrap_or(text);
    serde_json::from_str(candidate.trim()).unwrap_or_else(|_| json!({ "raw_text": text }))
}

/// Dialectical verification loop over swappable personas.
pub struct DebateEngine {
    llm: Arc<dyn LlmClient>,
    personas: Arc<PersonaManager>,
    max_rounds: u32,
    approval_threshold: f64,
}

impl DebateEngine {
    pub fn new(llm: Arc<dyn LlmClient>, personas: Arc<PersonaManager>) -> Self {
        Self {
            llm,
            personas,
            max_rounds: DEFAULT_MAX_ROUNDS,
            approval_threshold: DEFAULT_APPROVAL_THRESHOLD,
        }
    }

    pub fn with_max_rounds(mut self, max_rounds: u32) -> Self {
        self.max_rounds = max_rounds.max(1);
        self
    }

    pub fn with_approval_threshold(mut self, threshold: f64) -> Self {
        self.approval_threshold = threshold;
        self
    }

    /// Runs the debate. The active persona on entry is restored on every
    /// exit path, including errors.
    pub async fn run(&self, proposal: &str, task: &str) -> Result<DebateResult, AgentError> {
        let original_persona = self.personas.current_id();
        info!(
            max_rounds = self.max_rounds,
            threshold = self.approval_threshold,
            "debate started"
        );

        let result = self.run_inner(proposal, task).await;

        if self.personas.current_id() != original_persona {
            if let Err(e) = self
                .personas
                .switch(&original_persona, "debate finished, restoring caller persona")
            {
                warn!(error = %e, "failed to restore persona after debate");
            }
        }
        result
    }

    async fn run_inner(&self, proposal: &str, task: &str) -> Result<DebateResult, AgentError> {
        let mut rounds: Vec<DebateRound> = Vec::new();
        let mut current_proposal = proposal.to_string();

        for round_number in 1..=self.max_rounds {
            info!(round = round_number, total = self.max_rounds, "debate round");

            let critique = self.attack(&current_proposal, task).await;
            let critique_parsed = parse_json_safe(&critique);

            let judgment = self.judge(&current_proposal, &critique, task).await;
            let judgment_parsed = parse_json_safe(&judgment);

            // Unparsable or missing score degrades to 10: strong-by-default
            // attacks prevent accidental approval.
            let validity_score = judgment_parsed
                .get("validity_score")
                .and_then(|v| {
                    v.as_f64()
                        .or_else(|| v.as_str().and_then(|s| s.parse().ok()))
                })
                .unwrap_or(10.0);
            let verdict = judgment_parsed
                .get("verdict")
                .and_then(|v| v.as_str())
                .map(JudgeVerdict::from_str_lossy)
                .unwrap_or(JudgeVerdict::Revise);

            info!(
                round = round_number,
                score = validity_score,
                verdict = ?verdict,
                "judgment"
            );

            let mut round = DebateRound {
                round_number,
                critique,
                critique_parsed,
                judgment,
                judgment_parsed,
                validity_score,
                verdict,
                revision: String::new(),
            };

            match verdict {
                JudgeVerdict::Escalate => {
                    warn!("moderator requested escalation, handing to human review");
                    rounds.push(round);
                    let report = Self::generate_report(&rounds);
                    return Ok(DebateResult {
                        final_proposal: current_proposal,
                        approved: false,
                        total_rounds: round_number,
                        rounds,
                        escalated: true,
                        report,
                    });
                }
                _ if verdict == JudgeVerdict::Approve
                    || validity_score < self.approval_threshold =>
                {
                    info!(round = round_number, score = validity_score, "debate resolved");
                    rounds.push(round);
                    let report = Self::generate_report(&rounds);
                    return Ok(DebateResult {
                        final_proposal: current_proposal,
                        approved: true,
                        total_rounds: round_number,
                        rounds,
                        escalated: false,
                        report,
                    });
                }
                _ => {
                    if round_number < self.max_rounds {
                        let revision = self
                            .revise(&current_proposal, &round.critique, &round.judgment, task)
                            .await;
                        round.revision = revision.clone();
                        current_proposal = revision;
                    }
                    rounds.push(round);
                }
            }
        }

        warn!(
            max_rounds = self.max_rounds,
            "round budget exhausted, approving latest revision"
        );
        let report = Self::generate_report(&rounds);
        Ok(DebateResult {
            final_proposal: current_proposal,
            approved: true,
            total_rounds: self.max_rounds,
            rounds,
            escalated: false,
            report,
        })
    }

    async fn phase_call(&self, persona_id: &str, reason: &str, user_prompt: String) -> Option<String> {
        if let Err(e) = self.personas.switch(persona_id, reason) {
            warn!(persona = persona_id, error = %e, "persona switch failed");
            return None;
        }
        let messages = vec![
            Message::system(self.personas.system_prompt(None)),
            Message::system(self.personas.transition_message()),
            Message::user(user_prompt),
        ];
        match self.llm.invoke(&messages).await {
            Ok(reply) => Some(reply.content),
            Err(e) => {
                warn!(persona = persona_id, error = %e, "debate phase call failed");
                None
            }
        }
    }

    async fn attack(&self, proposal: &str, task: &str) -> String {
        let prompt = format!(
            "## Original request\n{}\n\n## Author's proposal\n{}\n\n\
             Analyze the proposal and produce your attack vector list.",
            task, proposal
        );
        match self.phase_call("devil", "debate: attack phase", prompt).await {
            Some(text) => text,
            // A failed attack is an empty attack: the judge sees weak vectors.
            None => json!({
                "attack_vectors": [],
                "overall_assessment": "attack generation failed",
                "recommendation": "CONDITIONAL_PASS",
            })
            .to_string(),
        }
    }

    async fn judge(&self, proposal: &str, critique: &str, task: &str) -> String {
        let prompt = format!(
            "## Original request\n{}\n\n## Author's proposal\n{}\n\n\
             ## Critic's attack\n{}\n\n\
             Evaluate the validity of the attack and deliver your judgment.",
            task, proposal, critique
        );
        match self
            .phase_call("moderator", "debate: judgment phase", prompt)
            .await
        {
            Some(text) => text,
            // An unreachable judge degrades exactly like an unparsable one:
            // attacks stand at full strength and the round demands revision.
            // The critic's unreachable-pass is the sole availability
            // carve-out; the debate never auto-approves on a dead judge, and
            // termination comes from the round budget.
            None => json!({
                "validity_score": 10,
                "verdict": "REVISE",
                "reasoning": "judgment unavailable",
            })
            .to_string(),
        }
    }

    async fn revise(&self, proposal: &str, critique: &str, judgment: &str, task: &str) -> String {
        let prompt = format!(
            "## Original request\n{}\n\n## Your previous proposal\n{}\n\n\
             ## Critic's attack\n{}\n\n## Moderator's judgment\n{}\n\n\
             Rework the proposal to address the critique. Output only the \
             complete revised result, no commentary.",
            task, proposal, critique, judgment
        );
        match self
            .phase_call("worker", "debate: revision phase", prompt)
            .await
        {
            Some(text) if !text.is_empty() => text,
            // Revision failure keeps the standing proposal.
            _ => proposal.to_string(),
        }
    }

    /// Human-readable verification report: per-round score, verdict, and the
    /// top attack vectors.
    fn generate_report(rounds: &[DebateRound]) -> String {
        let mut lines = vec![
            "# Adversarial Verification Report".to_string(),
            format!("Total rounds: {}", rounds.len()),
            String::new(),
        ];
        for round in rounds {
            lines.push(format!("## Round {}", round.round_number));
            lines.push(format!("Validity score: {}/10", round.validity_score));
            lines.push(format!("Verdict: {:?}", round.verdict));
            if let Some(attacks) = round
                .critique_parsed
                .get("attack_vectors")
                .and_then(|v| v.as_array())
            {
                lines.push(format!("Attack vectors: {}", attacks.len()));
                for attack in attacks.iter().take(3) {
                    let severity = attack
                        .get("severity")
                        .and_then(|v| v.as_str())
                        .unwrap_or("?");
                    let finding = attack
                        .get("finding")
                        .and_then(|v| v.as_str())
                        .unwrap_or("n/a");
                    lines.push(format!("  - [{}] {}", severity, finding));
                }
            }
            lines.push(String::new());
        }
        lines.join("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{MockLlm, MockTurn};
    use crate::persona::PersonaLibrary;

    fn personas() -> Arc<PersonaManager> {
        Arc::new(PersonaManager::new(Arc::new(PersonaLibrary::embedded()), "worker").unwrap())
    }

    fn engine(llm: MockLlm) -> (DebateEngine, Arc<PersonaManager>) {
        let personas = personas();
        (
            DebateEngine::new(Arc::new(llm), Arc::clone(&personas)),
            personas,
        )
    }

    fn attack_turn() -> MockTurn {
        MockTurn::Text(
            json!({
                "attack_vectors": [
                    {"severity": "HIGH", "finding": "ignores concurrent writes", "evidence": "no lock"}
                ],
                "overall_assessment": "fragile",
                "recommendation": "REJECT"
            })
            .to_string(),
        )
    }

    fn judgment_turn(score: f64, verdict: &str) -> MockTurn {
        MockTurn::Text(
            json!({"validity_score": score, "verdict": verdict, "reasoning": "r"}).to_string(),
        )
    }

    /// **Scenario**: low validity score with APPROVE stops after round one;
    /// the proposer is never invoked for revision (2 calls: attack + judge).
    #[tokio::test]
    async fn early_approval_skips_revision() {
        let (engine, personas) = engine(MockLlm::with_script(vec![
            attack_turn(),
            judgment_turn(3.0, "APPROVE"),
        ]));
        let result = engine.run("proposal text", "task").await.unwrap();

        assert!(result.approved);
        assert!(!result.escalated);
        assert_eq!(result.total_rounds, 1);
        assert_eq!(result.final_proposal, "proposal text");
        assert!(result.rounds[0].revision.is_empty());
        assert_eq!(personas.current_id(), "worker");
    }

    /// **Scenario**: ESCALATE stops immediately with escalated=true.
    #[tokio::test]
    async fn escalate_stops_debate() {
        let (engine, personas) = engine(MockLlm::with_script(vec![
            attack_turn(),
            judgment_turn(9.0, "ESCALATE"),
        ]));
        let result = engine.run("p", "t").await.unwrap();

        assert!(!result.approved);
        assert!(result.escalated);
        assert_eq!(result.total_rounds, 1);
        assert_eq!(personas.current_id(), "worker");
    }

    /// **Scenario**: persistent REVISE through max_rounds force-approves the
    /// latest revision with total_rounds == max_rounds.
    #[tokio::test]
    async fn max_rounds_force_approves() {
        let (engine, _) = engine(MockLlm::with_script(vec![
            // round 1: attack, judge(REVISE), revise
            attack_turn(),
            judgment_turn(9.0, "REVISE"),
            MockTurn::Text("revision one".into()),
            // round 2: attack, judge(REVISE), no revision (last round)
            attack_turn(),
            judgment_turn(9.0, "REVISE"),
        ]));
        let engine = engine.with_max_rounds(2);
        let result = engine.run("original", "task").await.unwrap();

        assert!(result.approved);
        assert!(!result.escalated);
        assert_eq!(result.total_rounds, 2);
        assert_eq!(result.final_proposal, "revision one");
        assert_eq!(result.rounds.len(), 2);
    }

    /// **Scenario**: an unparsable judgment degrades to score 10 + REVISE —
    /// no approval that round.
    #[tokio::test]
    async fn unparsable_judgment_degrades_to_revise() {
        let (engine, _) = engine(MockLlm::with_script(vec![
            attack_turn(),
            MockTurn::Text("I simply cannot decide.".into()),
            MockTurn::Text("revised after babble".into()),
            attack_turn(),
            judgment_turn(2.0, "APPROVE"),
        ]));
        let engine = engine.with_max_rounds(3);
        let result = engine.run("p", "t").await.unwrap();

        assert_eq!(result.rounds[0].validity_score, 10.0);
        assert_eq!(result.rounds[0].verdict, JudgeVerdict::Revise);
        assert!(result.approved);
        assert_eq!(result.total_rounds, 2);
        assert_eq!(result.final_proposal, "revised after babble");
    }

    /// **Scenario**: the report names rounds, scores, and attack vectors.
    #[tokio::test]
    async fn report_contains_rounds() {
        let (engine, _) = engine(MockLlm::with_script(vec![
            attack_turn(),
            judgment_turn(3.0, "APPROVE"),
        ]));
        let result = engine.run("p", "t").await.unwrap();
        assert!(result.report.contains("Adversarial Verification Report"));
        assert!(result.report.contains("Round 1"));
        assert!(result.report.contains("ignores concurrent writes"));
    }

    /// **Scenario**: with the provider down, every round degrades to score
    /// 10 + REVISE — no auto-approval on a dead judge — and the round budget
    /// force-approves the unchanged proposal; the original persona is still
    /// restored.
    #[tokio::test]
    async fn persona_restored_on_provider_failure() {
        let (engine, personas) = engine(MockLlm::unreachable());
        let result = engine.run("p", "t").await.unwrap();

        assert_eq!(result.total_rounds, DEFAULT_MAX_ROUNDS);
        assert!(result.rounds.iter().all(|r| {
            r.verdict == JudgeVerdict::Revise && r.validity_score == 10.0
        }));
        // Approval comes only from round-budget exhaustion; the revision
        // phase also failed, so the proposal is unchanged.
        assert!(result.approved);
        assert!(!result.escalated);
        assert_eq!(result.final_proposal, "p");
        assert_eq!(personas.current_id(), "worker");
    }
}
