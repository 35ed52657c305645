//! # Progress Events
//!
//! The ordered, replayable event vocabulary a run emits as it executes.
//! Sequence numbers are per-run, monotonic, and start at 1; subscribers
//! observe events in sequence order with no gaps.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::run::{RunId, RunSummary, StepRecord, WorkflowKind};

/// One state transition in a run's execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressEvent {
    pub run_id: RunId,
    /// Monotonic per-run counter, starting at 1.
    pub sequence: u64,
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub kind: ProgressEventKind,
}

/// What happened, with the relevant record snapshot attached.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProgressEventKind {
    RunStarted { workflow: WorkflowKind },
    StepStarted { step: StepRecord },
    StepCompleted { step: StepRecord },
    StepFailed { step: StepRecord },
    StepSkipped { step: StepRecord },
    RunCompleted { summary: RunSummary },
    RunFailed { summary: RunSummary },
    RunCancelled { summary: RunSummary },
}

impl ProgressEventKind {
    /// Terminal events close a run's event sequence; nothing follows them.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ProgressEventKind::RunCompleted { .. }
                | ProgressEventKind::RunFailed { .. }
                | ProgressEventKind::RunCancelled { .. }
        )
    }

    /// Wire name of the event type, for logging.
    pub fn name(&self) -> &'static str {
        match self {
            ProgressEventKind::RunStarted { .. } => "run_started",
            ProgressEventKind::StepStarted { .. } => "step_started",
            ProgressEventKind::StepCompleted { .. } => "step_completed",
            ProgressEventKind::StepFailed { .. } => "step_failed",
            ProgressEventKind::StepSkipped { .. } => "step_skipped",
            ProgressEventKind::RunCompleted { .. } => "run_completed",
            ProgressEventKind::RunFailed { .. } => "run_failed",
            ProgressEventKind::RunCancelled { .. } => "run_cancelled",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_serialization_flattens_type() {
        let event = ProgressEvent {
            run_id: RunId::generate(),
            sequence: 1,
            timestamp: Utc::now(),
            kind: ProgressEventKind::RunStarted {
                workflow: WorkflowKind::FullDevelopment,
            },
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"type\":\"run_started\""));
        assert!(json.contains("\"sequence\":1"));
        assert!(json.contains("full_development"));
    }

    #[test]
    fn test_terminal_kinds() {
        let step = StepRecord::new("ideation", "ideation", true);
        assert!(!ProgressEventKind::StepFailed { step }.is_terminal());

        let run = crate::run::WorkflowRun::new(
            WorkflowKind::FullDevelopment,
            Default::default(),
            vec![],
        );
        assert!(ProgressEventKind::RunCancelled {
            summary: run.summary()
        }
        .is_terminal());
    }
}
