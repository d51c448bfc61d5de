//! Error types shared across the pipeline.
//!
//! `AgentError` is the LLM-boundary error (provider call failed); each
//! subsystem keeps its own enum (`CheckpointError`, `ToolError`,
//! `PersonaError`, ...). `OrchestrateError` is the only type that crosses the
//! orchestrator boundary to callers: every other failure kind is recovered
//! locally (validation retries, critic rounds, single provider retry,
//! cache-miss degradation).

use thiserror::Error;

use crate::checkpoint::CheckpointError;

/// Error from one LLM provider call.
///
/// Returned by `LlmClient::invoke`. Callers decide the failure mode per the
/// error taxonomy: the worker escalates, the critic passes, the router
/// defaults to LOCAL, the cache misses.
#[derive(Debug, Error)]
pub enum AgentError {
    /// Provider call failed (transport, API error, empty response).
    #[error("execution failed: {0}")]
    ExecutionFailed(String),
}

/// Orchestrator-level error surfaced to the caller.
///
/// Only storage failures and state-machine invariant violations propagate;
/// `RateLimited` asks the caller to retry later without touching state.
#[derive(Debug, Error)]
pub enum OrchestrateError {
    /// Checkpoint write/read failed; fatal for the turn.
    #[error("storage: {0}")]
    Storage(#[from] CheckpointError),

    /// A state-machine invariant was violated (bug, not an input problem).
    #[error("invariant violation: {0}")]
    Invariant(String),

    /// Outbound call budget exhausted; retry after the window slides.
    #[error("rate limited: retry later")]
    RateLimited,
}

#[cfg(test)]
mod tests {
    use super::*;

    /// **Scenario**: Display of each variant carries a machine-greppable kind.
    #[test]
    fn error_display_kinds() {
        let s = AgentError::ExecutionFailed("boom".into()).to_string();
        assert!(s.contains("execution failed") && s.contains("boom"));

        let s = OrchestrateError::Invariant("step went backwards".into()).to_string();
        assert!(s.contains("invariant"));

        let s = OrchestrateError::RateLimited.to_string();
        assert!(s.contains("rate limited"));
    }
}
