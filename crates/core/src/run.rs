//! # Run State
//!
//! The data model for one workflow execution: the run itself, its step
//! records, and the shared context that grows as steps complete. A run
//! exclusively owns its records and context; the engine is the sole
//! mutator.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{AgentFailure, RunFailure};
use crate::normalize::ResultEnvelope;

/// Seed key the provided-code workflows read their input source from.
pub const SOURCE_CODE_KEY: &str = "source_code";

/// Opaque run identifier. Generated at creation, never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunId(Uuid);

impl RunId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Which step sequence a run executes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowKind {
    /// Idea to code, tests, and docs from a description.
    FullDevelopment,
    /// Review and rework provided code.
    CodeImprovement,
    /// Audit provided code for vulnerabilities.
    SecurityFocused,
    /// Document provided code.
    DocumentationFocused,
}

impl WorkflowKind {
    pub fn all() -> Vec<WorkflowKind> {
        vec![
            WorkflowKind::FullDevelopment,
            WorkflowKind::CodeImprovement,
            WorkflowKind::SecurityFocused,
            WorkflowKind::DocumentationFocused,
        ]
    }

    pub fn name(&self) -> &'static str {
        match self {
            WorkflowKind::FullDevelopment => "full_development",
            WorkflowKind::CodeImprovement => "code_improvement",
            WorkflowKind::SecurityFocused => "security_focused",
            WorkflowKind::DocumentationFocused => "documentation_focused",
        }
    }
}

impl fmt::Display for WorkflowKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Run lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl RunStatus {
    /// Terminal states admit no further transitions, for the run or any of
    /// its steps.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RunStatus::Completed | RunStatus::Failed | RunStatus::Cancelled
        )
    }
}

/// Step lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Pending,
    Running,
    Completed,
    Failed,
    /// Never reached: an earlier required step failed, the run was
    /// cancelled, or this optional step's input could not be derived.
    Skipped,
}

impl StepStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            StepStatus::Completed | StepStatus::Failed | StepStatus::Skipped
        )
    }
}

/// A value in the run context: a seed string from the request, or a
/// completed step's normalized envelope stored under its step id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum ContextValue {
    Text(String),
    Envelope(ResultEnvelope),
}

impl ContextValue {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            ContextValue::Text(text) => Some(text),
            ContextValue::Envelope(_) => None,
        }
    }

    pub fn as_envelope(&self) -> Option<&ResultEnvelope> {
        match self {
            ContextValue::Envelope(envelope) => Some(envelope),
            ContextValue::Text(_) => None,
        }
    }
}

/// One agent invocation within a run's ordered sequence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepRecord {
    pub step_id: String,
    pub agent_name: String,
    pub required: bool,
    pub status: StepStatus,
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub ended_at: Option<DateTime<Utc>>,
    /// Present only when `status` is `Completed`.
    #[serde(default)]
    pub result: Option<ResultEnvelope>,
    /// Present only when `status` is `Failed`.
    #[serde(default)]
    pub error: Option<AgentFailure>,
}

impl StepRecord {
    pub(crate) fn new(step_id: &str, agent_name: &str, required: bool) -> Self {
        Self {
            step_id: step_id.to_string(),
            agent_name: agent_name.to_string(),
            required,
            status: StepStatus::Pending,
            started_at: None,
            ended_at: None,
            result: None,
            error: None,
        }
    }
}

/// One execution instance of a workflow, with its own isolated state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowRun {
    pub id: RunId,
    pub workflow: WorkflowKind,
    pub status: RunStatus,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub ended_at: Option<DateTime<Utc>>,
    /// Set when `status` is `Failed`.
    #[serde(default)]
    pub failure: Option<RunFailure>,
    pub context: BTreeMap<String, ContextValue>,
    pub steps: Vec<StepRecord>,
}

impl WorkflowRun {
    pub(crate) fn new(
        workflow: WorkflowKind,
        seed: BTreeMap<String, String>,
        steps: Vec<StepRecord>,
    ) -> Self {
        Self {
            id: RunId::generate(),
            workflow,
            status: RunStatus::Pending,
            created_at: Utc::now(),
            started_at: None,
            ended_at: None,
            failure: None,
            context: seed
                .into_iter()
                .map(|(key, value)| (key, ContextValue::Text(value)))
                .collect(),
            steps,
        }
    }

    pub fn step(&self, step_id: &str) -> Option<&StepRecord> {
        self.steps.iter().find(|step| step.step_id == step_id)
    }

    /// The working code at this point in the run: the most recent completed
    /// step's code envelope, falling back to the `source_code` seed.
    pub fn latest_code(&self) -> Option<BTreeMap<String, String>> {
        for step in self.steps.iter().rev() {
            if step.status != StepStatus::Completed {
                continue;
            }
            if let Some(files) = step.result.as_ref().and_then(ResultEnvelope::code_files) {
                return Some(files.clone());
            }
        }
        self.context
            .get(SOURCE_CODE_KEY)
            .and_then(ContextValue::as_text)
            .map(|text| BTreeMap::from([(SOURCE_CODE_KEY.to_string(), text.to_string())]))
    }

    pub fn summary(&self) -> RunSummary {
        let count = |status: StepStatus| self.steps.iter().filter(|s| s.status == status).count();
        RunSummary {
            run_id: self.id,
            workflow: self.workflow,
            status: self.status,
            failure: self.failure.clone(),
            total_steps: self.steps.len(),
            completed_steps: count(StepStatus::Completed),
            failed_steps: count(StepStatus::Failed),
            skipped_steps: count(StepStatus::Skipped),
            ended_at: self.ended_at,
        }
    }
}

/// Condensed run state carried by terminal progress events.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    pub run_id: RunId,
    pub workflow: WorkflowKind,
    pub status: RunStatus,
    #[serde(default)]
    pub failure: Option<RunFailure>,
    pub total_steps: usize,
    pub completed_steps: usize,
    pub failed_steps: usize,
    pub skipped_steps: usize,
    #[serde(default)]
    pub ended_at: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run_with_steps() -> WorkflowRun {
        WorkflowRun::new(
            WorkflowKind::FullDevelopment,
            BTreeMap::from([
                ("description".to_string(), "todo app".to_string()),
                ("language".to_string(), "python".to_string()),
            ]),
            vec![
                StepRecord::new("ideation", "ideation", true),
                StepRecord::new("code_generation", "code_generation", true),
            ],
        )
    }

    #[test]
    fn test_new_run_is_pending() {
        let run = run_with_steps();
        assert_eq!(run.status, RunStatus::Pending);
        assert!(run.started_at.is_none());
        assert_eq!(run.context.len(), 2);
        assert!(run.steps.iter().all(|s| s.status == StepStatus::Pending));
    }

    #[test]
    fn test_terminal_statuses() {
        assert!(RunStatus::Completed.is_terminal());
        assert!(RunStatus::Cancelled.is_terminal());
        assert!(!RunStatus::Running.is_terminal());
        assert!(StepStatus::Skipped.is_terminal());
        assert!(!StepStatus::Pending.is_terminal());
    }

    #[test]
    fn test_latest_code_prefers_step_output_over_seed() {
        let mut run = run_with_steps();
        run.context.insert(
            SOURCE_CODE_KEY.to_string(),
            ContextValue::Text("print('old')".to_string()),
        );
        assert!(run.latest_code().unwrap().contains_key(SOURCE_CODE_KEY));

        run.steps[1].status = StepStatus::Completed;
        run.steps[1].result = Some(ResultEnvelope::Code(BTreeMap::from([(
            "app.py".to_string(),
            "print('new')".to_string(),
        )])));
        assert!(run.latest_code().unwrap().contains_key("app.py"));
    }

    #[test]
    fn test_summary_counts() {
        let mut run = run_with_steps();
        run.steps[0].status = StepStatus::Completed;
        run.steps[1].status = StepStatus::Skipped;
        let summary = run.summary();
        assert_eq!(summary.total_steps, 2);
        assert_eq!(summary.completed_steps, 1);
        assert_eq!(summary.skipped_steps, 1);
        assert_eq!(summary.failed_steps, 0);
    }

    #[test]
    fn test_run_serialization_uses_snake_case() {
        let run = run_with_steps();
        let json = serde_json::to_string(&run).unwrap();
        assert!(json.contains("\"status\":\"pending\""));
        assert!(json.contains("\"workflow\":\"full_development\""));
    }

    #[test]
    fn test_run_ids_are_unique() {
        assert_ne!(RunId::generate(), RunId::generate());
    }
}
