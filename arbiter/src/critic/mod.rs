//! Critic review: a cheap model under a reviewer persona judges a response.
//!
//! The author is biased toward "it works"; the reviewer is biased toward
//! finding fault, which is exactly what catches the confidently wrong
//! answer. The critic must return `{verdict, reason, suggestions[]}` as
//! JSON; parse precedence is JSON → fenced JSON → `[PASS]`/`[REJECT]`
//! markers → REJECT (ambiguity fails closed).
//!
//! The one deliberate inversion: an *unreachable* critic counts as PASS by
//! default, because critic downtime must not strand every response. The
//! `unreachable_pass` flag flips that bias for deployments that prefer to
//! fail closed.

use std::sync::Arc;

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use tracing::{info, warn};

use crate::llm::LlmClient;
use crate::message::Message;
use crate::persona::PersonaLibrary;

/// Default bound on critic-driven regeneration rounds.
pub const MAX_CRITIC_ROUNDS: usize = 2;

static FENCED_JSON: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)```(?:json)?\s*\n(.*?)```").expect("fenced json pattern"));

/// Critic verdict.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CriticVerdict {
    Pass,
    Reject,
}

/// Parsed critic review.
#[derive(Clone, Debug)]
pub struct CriticReview {
    pub verdict: CriticVerdict,
    pub reason: String,
    pub suggestions: Vec<String>,
    /// Raw critic output, kept for the audit trail.
    pub raw: String,
}

impl CriticReview {
    pub fn passed(&self) -> bool {
        self.verdict == CriticVerdict::Pass
    }
}

/// Parses a critic response with explicit precedence: JSON object → fenced
/// JSON → bracket markers → REJECT.
pub fn parse_review(raw: &str) -> CriticReview {
    if let Some(review) = parse_json_review(raw) {
        return review;
    }

    // Marker fallback.
    let upper = raw.to_uppercase();
    let passed = upper.contains("[PASS]");
    let rejected = upper.contains("[REJECT]");
    let verdict = if passed && !rejected {
        CriticVerdict::Pass
    } else {
        // Ambiguity (both, or neither) fails closed.
        CriticVerdict::Reject
    };
    let trimmed = raw.trim().to_string();
    CriticReview {
        verdict,
        reason: trimmed.clone(),
        suggestions: if verdict == CriticVerdict::Reject && !trimmed.is_empty() {
            vec![trimmed]
        } else {
            vec![]
        },
        raw: raw.to_string(),
    }
}

fn parse_json_review(raw: &str) -> Option<CriticReview> {
    let candidate = FENCED_JSON
        .captures(raw)
        .and_then(|cap| cap.get(1))
        .map(|m| m.as_str())
        .unwrap_or(raw);
    let value: Value = serde_json::from_str(candidate.trim()).ok()?;
    let verdict_str = value.get("verdict")?.as_str()?.to_uppercase();
    let verdict = if verdict_str == "PASS" {
        CriticVerdict::Pass
    } else {
        CriticVerdict::Reject
    };
    let reason = value
        .get("reason")
        .and_then(|v| v.as_str())
        .unwrap_or("no reason provided")
        .to_string();
    let suggestions = match verdict {
        CriticVerdict::Pass => vec![],
        CriticVerdict::Reject => value
            .get("suggestions")
            .and_then(|v| v.as_array())
            .map(|items| {
                items
                    .iter()
                    .filter_map(|s| s.as_str().map(String::from))
                    .collect()
            })
            .unwrap_or_default(),
    };
    Some(CriticReview {
        verdict,
        reason,
        suggestions,
        raw: raw.to_string(),
    })
}

/// Renders the re-generation feedback embedding the suggestions verbatim.
pub fn format_suggestions_feedback(review: &CriticReview) -> String {
    let mut lines = vec![
        "A reviewer rejected your previous answer.".to_string(),
        format!("Reason: {}", review.reason),
    ];
    if !review.suggestions.is_empty() {
        lines.push("Apply these fixes:".to_string());
        for suggestion in &review.suggestions {
            lines.push(format!("  - {}", suggestion));
        }
    }
    lines.push("Produce a corrected answer.".to_string());
    lines.join("\n")
}

/// The critic: reviewer persona over a cheap model.
pub struct Critic {
    llm: Arc<dyn LlmClient>,
    system_prompt: String,
    unreachable_pass: bool,
}

impl Critic {
    /// Builds the critic with the reviewer persona's system prompt.
    pub fn new(
        llm: Arc<dyn LlmClient>,
        personas: &PersonaLibrary,
    ) -> Result<Self, crate::persona::PersonaError> {
        let persona = personas.load("critic")?;
        Ok(Self {
            llm,
            system_prompt: persona.system_prompt.clone(),
            unreachable_pass: true,
        })
    }

    /// Flips the availability bias: an unreachable critic becomes REJECT.
    pub fn with_unreachable_pass(mut self, unreachable_pass: bool) -> Self {
        self.unreachable_pass = unreachable_pass;
        self
    }

    /// Reviews a response against the original task.
    pub async fn review(&self, task: &str, response: &str) -> CriticReview {
        let messages = vec![
            Message::system(self.system_prompt.clone()),
            Message::user(format!(
                "## Original request\n{}\n\n## Submitted answer\n{}\n\n\
                 Evaluate the answer and deliver [PASS] or [REJECT].",
                task, response
            )),
        ];

        match self.llm.invoke(&messages).await {
            Ok(reply) => {
                let review = parse_review(&reply.content);
                match review.verdict {
                    CriticVerdict::Pass => info!("critic verdict: PASS"),
                    CriticVerdict::Reject => warn!("critic verdict: REJECT"),
                }
                review
            }
            Err(e) => {
                let verdict = if self.unreachable_pass {
                    warn!(error = %e, "critic unreachable, passing by policy");
                    CriticVerdict::Pass
                } else {
                    warn!(error = %e, "critic unreachable, rejecting by policy");
                    CriticVerdict::Reject
                };
                CriticReview {
                    verdict,
                    reason: format!("critic unavailable: {}", e),
                    suggestions: vec![],
                    raw: String::new(),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::MockLlm;

    fn critic(llm: MockLlm) -> Critic {
        Critic::new(Arc::new(llm), &PersonaLibrary::embedded()).unwrap()
    }

    /// **Scenario**: well-formed JSON parses; PASS empties suggestions.
    #[test]
    fn json_parse_precedence() {
        let review = parse_review(
            r#"{"verdict": "PASS", "reason": "solid", "suggestions": ["ignored"]}"#,
        );
        assert!(review.passed());
        assert!(review.suggestions.is_empty());

        let review = parse_review(
            r#"{"verdict": "REJECT", "reason": "bug", "suggestions": ["handle None"]}"#,
        );
        assert!(!review.passed());
        assert_eq!(review.suggestions, vec!["handle None".to_string()]);
    }

    /// **Scenario**: fenced JSON is extracted before marker fallback.
    #[test]
    fn fenced_json_parses() {
        let raw = "Here:\n```json\n{\"verdict\": \"PASS\", \"reason\": \"ok\"}\n```";
        assert!(parse_review(raw).passed());
    }

    /// **Scenario**: marker fallback; total ambiguity rejects (safety bias).
    #[test]
    fn marker_fallback_and_ambiguity() {
        assert!(parse_review("Looks good. [PASS]").passed());
        assert!(!parse_review("No. [REJECT], obviously").passed());
        assert!(!parse_review("hard to say, maybe fine?").passed());
        assert!(!parse_review("[PASS] ... actually [REJECT]").passed());
    }

    /// **Scenario**: unreachable critic passes by default and rejects when
    /// the flag is flipped.
    #[tokio::test]
    async fn unreachable_bias() {
        let review = critic(MockLlm::unreachable()).review("task", "answer").await;
        assert!(review.passed());
        assert!(review.reason.contains("critic unavailable"));

        let review = critic(MockLlm::unreachable())
            .with_unreachable_pass(false)
            .review("task", "answer")
            .await;
        assert!(!review.passed());
    }

    /// **Scenario**: feedback embeds suggestions verbatim.
    #[test]
    fn feedback_embeds_suggestions() {
        let review = parse_review(
            r#"{"verdict": "REJECT", "reason": "r", "suggestions": ["fix the loop bound", "add a test"]}"#,
        );
        let feedback = format_suggestions_feedback(&review);
        assert!(feedback.contains("fix the loop bound"));
        assert!(feedback.contains("add a test"));
    }
}
