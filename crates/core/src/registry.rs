//! # Step Definition Registry
//!
//! Declares, per workflow kind, the ordered step plan: which agent runs,
//! whether its failure is fatal, and how its input is derived from the run
//! context. Definitions are shared across plans via `Arc`, so two workflow
//! kinds binding the same agent reuse one definition; only the required
//! flag is per-plan.
//!
//! The registry is immutable once an orchestrator owns it and safe for
//! unsynchronized concurrent reads.

use std::collections::HashMap;
use std::sync::Arc;

use crate::capability::{AgentRole, InputValue, StepInput};
use crate::error::AgentFailure;
use crate::run::{ContextValue, WorkflowKind, WorkflowRun, SOURCE_CODE_KEY};

/// Where one step input value comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InputSource {
    /// A seed key provided at run creation.
    Seed(&'static str),
    /// The normalized envelope of an earlier completed step, by step id.
    Step(&'static str),
    /// The working code at this point in the run: the most recent completed
    /// step's code envelope, else the `source_code` seed. This indirection
    /// is what lets one definition serve both generated-code and
    /// provided-code workflows.
    LatestCode,
}

/// A named input and its source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InputBinding {
    pub name: &'static str,
    pub source: InputSource,
}

impl InputBinding {
    pub fn new(name: &'static str, source: InputSource) -> Self {
        Self { name, source }
    }
}

/// A workflow-independent step definition: the agent binding and its
/// input-derivation rule.
#[derive(Debug)]
pub struct StepDef {
    /// Stable identifier, unique within any plan that includes it. Also the
    /// context key the step's envelope is stored under.
    pub step_id: &'static str,
    pub role: AgentRole,
    pub inputs: Vec<InputBinding>,
}

impl StepDef {
    /// Assemble the step input from the run's current context.
    ///
    /// Pure with respect to the run. A binding whose source is absent
    /// (typically because an upstream optional step failed and never wrote
    /// its output) yields [`AgentFailure::InvalidInput`] naming the
    /// missing input.
    pub fn derive_input(&self, run: &WorkflowRun) -> Result<StepInput, AgentFailure> {
        let mut input = StepInput::new();
        for binding in &self.inputs {
            let value = match &binding.source {
                InputSource::Seed(key) => run
                    .context
                    .get(*key)
                    .and_then(ContextValue::as_text)
                    .map(|text| InputValue::Text(text.to_string())),
                InputSource::Step(step_id) => run
                    .context
                    .get(*step_id)
                    .and_then(ContextValue::as_envelope)
                    .cloned()
                    .map(InputValue::Envelope),
                InputSource::LatestCode => run.latest_code().map(InputValue::Files),
            };
            match value {
                Some(value) => input.insert(binding.name, value),
                None => return Err(AgentFailure::InvalidInput(binding.name.to_string())),
            }
        }
        Ok(input)
    }

    /// Seed keys this definition needs when it runs first in a plan, used
    /// to validate the seed context at run creation.
    pub(crate) fn seed_keys(&self) -> Vec<&'static str> {
        self.inputs
            .iter()
            .filter_map(|binding| match binding.source {
                InputSource::Seed(key) => Some(key),
                // With no completed steps ahead of it, LatestCode can only
                // come from the seed.
                InputSource::LatestCode => Some(SOURCE_CODE_KEY),
                InputSource::Step(_) => None,
            })
            .collect()
    }
}

/// One row of a workflow plan: a shared definition plus this plan's
/// required flag.
#[derive(Debug, Clone)]
pub struct StepEntry {
    pub def: Arc<StepDef>,
    /// If true, failure of this step fails the run and skips the rest; if
    /// false, failure is recorded and the run proceeds degraded.
    pub required: bool,
}

impl StepEntry {
    pub fn required(def: &Arc<StepDef>) -> Self {
        Self {
            def: Arc::clone(def),
            required: true,
        }
    }

    pub fn optional(def: &Arc<StepDef>) -> Self {
        Self {
            def: Arc::clone(def),
            required: false,
        }
    }
}

/// Read-only table of step plans per workflow kind.
#[derive(Debug, Default)]
pub struct StepRegistry {
    plans: HashMap<WorkflowKind, Vec<StepEntry>>,
}

impl StepRegistry {
    /// An empty registry. Plans are added with [`StepRegistry::register`].
    pub fn new() -> Self {
        Self::default()
    }

    /// The built-in workflow plans.
    pub fn builtin() -> Self {
        let ideation = Arc::new(StepDef {
            step_id: "ideation",
            role: AgentRole::Ideation,
            inputs: vec![
                InputBinding::new("description", InputSource::Seed("description")),
                InputBinding::new("language", InputSource::Seed("language")),
            ],
        });
        let code_generation = Arc::new(StepDef {
            step_id: "code_generation",
            role: AgentRole::CodeGeneration,
            inputs: vec![
                InputBinding::new("description", InputSource::Seed("description")),
                InputBinding::new("language", InputSource::Seed("language")),
                InputBinding::new("idea", InputSource::Step("ideation")),
            ],
        });
        let optimization = Arc::new(StepDef {
            step_id: "optimization",
            role: AgentRole::Optimization,
            inputs: vec![
                InputBinding::new("description", InputSource::Seed("description")),
                InputBinding::new("language", InputSource::Seed("language")),
                InputBinding::new("generated_code", InputSource::LatestCode),
            ],
        });
        let security_analysis = Arc::new(StepDef {
            step_id: "security_analysis",
            role: AgentRole::SecurityAnalysis,
            inputs: vec![
                InputBinding::new("language", InputSource::Seed("language")),
                InputBinding::new("generated_code", InputSource::LatestCode),
            ],
        });
        let test_generation = Arc::new(StepDef {
            step_id: "test_generation",
            role: AgentRole::TestGeneration,
            inputs: vec![
                InputBinding::new("language", InputSource::Seed("language")),
                InputBinding::new("generated_code", InputSource::LatestCode),
            ],
        });
        let documentation = Arc::new(StepDef {
            step_id: "documentation",
            role: AgentRole::Documentation,
            inputs: vec![
                InputBinding::new("description", InputSource::Seed("description")),
                InputBinding::new("language", InputSource::Seed("language")),
                InputBinding::new("generated_code", InputSource::LatestCode),
            ],
        });
        let review = Arc::new(StepDef {
            step_id: "review",
            role: AgentRole::Review,
            inputs: vec![
                InputBinding::new("description", InputSource::Seed("description")),
                InputBinding::new("language", InputSource::Seed("language")),
                InputBinding::new("generated_code", InputSource::LatestCode),
            ],
        });

        let mut registry = Self::new();
        registry.register(
            WorkflowKind::FullDevelopment,
            vec![
                StepEntry::required(&ideation),
                StepEntry::required(&code_generation),
                StepEntry::optional(&security_analysis),
                StepEntry::required(&test_generation),
                StepEntry::optional(&documentation),
            ],
        );
        registry.register(
            WorkflowKind::CodeImprovement,
            vec![
                StepEntry::required(&review),
                StepEntry::required(&optimization),
                StepEntry::optional(&test_generation),
                StepEntry::optional(&documentation),
            ],
        );
        registry.register(
            WorkflowKind::SecurityFocused,
            vec![
                StepEntry::required(&security_analysis),
                StepEntry::optional(&optimization),
                StepEntry::optional(&test_generation),
            ],
        );
        registry.register(
            WorkflowKind::DocumentationFocused,
            vec![
                StepEntry::required(&documentation),
                StepEntry::optional(&review),
            ],
        );
        registry
    }

    /// Set the ordered plan for a workflow kind. Other kinds' plans are
    /// never touched. Step ids must be unique within the plan since each
    /// step's envelope is stored in context under its id.
    pub fn register(&mut self, kind: WorkflowKind, plan: Vec<StepEntry>) {
        debug_assert!(
            {
                let mut ids: Vec<_> = plan.iter().map(|entry| entry.def.step_id).collect();
                ids.sort_unstable();
                ids.windows(2).all(|pair| pair[0] != pair[1])
            },
            "duplicate step_id in plan for {kind}"
        );
        self.plans.insert(kind, plan);
    }

    pub fn plan(&self, kind: WorkflowKind) -> Option<&[StepEntry]> {
        self.plans.get(&kind).map(Vec::as_slice)
    }

    pub fn kinds(&self) -> Vec<WorkflowKind> {
        let mut kinds: Vec<_> = self.plans.keys().copied().collect();
        kinds.sort_by_key(|kind| kind.name());
        kinds
    }
}
