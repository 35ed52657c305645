//! # Error Taxonomy
//!
//! Every failure the core can surface, split by where it lands:
//! `AgentFailure` on a step record, `RunFailure` on a run, and
//! `OrchestratorError` at the external API boundary. Step-level failures are
//! always recovered into state; they never escape the engine loop.

use serde::{Deserialize, Serialize};

use crate::run::{RunId, WorkflowKind};

/// Failure of a single agent invocation.
///
/// Returned by capability implementations or synthesized by the engine
/// around them (timeouts, input derivation, normalization). Serializes with
/// a `kind` tag so consumers can dispatch without parsing messages.
#[derive(Debug, Clone, PartialEq, thiserror::Error, Serialize, Deserialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum AgentFailure {
    /// The invocation exceeded its wall-clock budget. Any late result is
    /// discarded; the engine has already moved on.
    #[error("agent call exceeded its time budget")]
    Timeout,
    /// The backing agent service was unreachable or rejected the call.
    #[error("agent backend unavailable: {0}")]
    RemoteUnavailable(String),
    /// A required input key was missing from the assembled step input.
    #[error("missing required input `{0}`")]
    InvalidInput(String),
    /// The agent returned output that failed normalization for its role.
    #[error("malformed agent output: {0}")]
    MalformedOutput(String),
}

/// Why a run ended `Failed`.
///
/// `status` stays `Failed` either way; this tells operators whether the
/// workflow legitimately failed a step or the orchestrator itself broke.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RunFailure {
    /// A required step failed and execution stopped at that point.
    RequiredStepFailed { step_id: String },
    /// The orchestrator hit an internal inconsistency.
    Internal { message: String },
}

/// Errors surfaced by the orchestrator's external API.
///
/// These reject the call up front; none of them leaves a half-created or
/// half-mutated run behind.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum OrchestratorError {
    /// No step plan is registered for the requested workflow kind.
    #[error("workflow `{0}` is not registered")]
    UnknownWorkflow(WorkflowKind),
    /// The seed context is missing a key the first step's inputs require.
    #[error("seed context is missing required key `{0}`")]
    MissingSeedKey(String),
    /// A step in the plan has no capability bound for its agent.
    #[error("no capability registered for agent `{0}`")]
    MissingCapability(&'static str),
    #[error("run `{0}` not found")]
    RunNotFound(RunId),
    /// The run is not terminal yet and cannot be reaped.
    #[error("run `{0}` is still active")]
    RunActive(RunId),
}

/// A subscriber fell behind the bounded event buffer and was dropped.
///
/// The producer is never blocked by slow consumers; the remedy is to
/// re-subscribe, which yields a fresh snapshot synchronized with the live
/// sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("subscriber lagged {missed} events behind; re-subscribe for a fresh snapshot")]
pub struct StreamLagged {
    /// How many events were dropped before the lag was observed.
    pub missed: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_agent_failure_kind_tag() {
        let failure = AgentFailure::RemoteUnavailable("connection refused".to_string());
        let json = serde_json::to_string(&failure).unwrap();
        assert!(json.contains("\"kind\":\"remote_unavailable\""));
        assert!(json.contains("connection refused"));

        let unit = serde_json::to_string(&AgentFailure::Timeout).unwrap();
        assert!(unit.contains("\"kind\":\"timeout\""));
    }

    #[test]
    fn test_run_failure_distinguishes_internal() {
        let step = RunFailure::RequiredStepFailed {
            step_id: "ideation".to_string(),
        };
        let internal = RunFailure::Internal {
            message: "plan mismatch".to_string(),
        };
        assert!(serde_json::to_string(&step)
            .unwrap()
            .contains("required_step_failed"));
        assert!(serde_json::to_string(&internal).unwrap().contains("internal"));
    }

    #[test]
    fn test_agent_failure_roundtrip() {
        let failure = AgentFailure::InvalidInput("generated_code".to_string());
        let json = serde_json::to_string(&failure).unwrap();
        let back: AgentFailure = serde_json::from_str(&json).unwrap();
        assert_eq!(back, failure);
    }
}
