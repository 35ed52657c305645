//! # Crucible Core
//!
//! The "Conductor" of the Crucible system - sequences specialized AI agents
//! into multi-step workflows, streams progress to subscribers, and
//! normalizes heterogeneous agent outputs into a stable envelope schema.
//!
//! ## Architecture
//!
//! - `capability/` - the uniform invoke contract agents implement
//! - `registry` - ordered step plans per workflow kind
//! - `engine/` - the run state machine, registry of live runs, and the
//!   progress stream multiplexer
//! - `normalize` - raw agent output → kind-tagged result envelopes
//! - `run` - run and step state records
//!
//! ## Usage
//!
//! ```rust,ignore
//! use crucible_core::{AgentRole, EngineConfig, Orchestrator, WorkflowKind};
//!
//! let orchestrator = Orchestrator::new(EngineConfig::default())
//!     .with_capability(AgentRole::Ideation, ideation_backend)
//!     .with_capability(AgentRole::CodeGeneration, codegen_backend);
//!     // ... one binding per role in the plans you run
//!
//! let run_id = orchestrator.create_run(WorkflowKind::FullDevelopment, seed)?;
//! orchestrator.start(run_id)?;
//!
//! let mut subscription = orchestrator.subscribe(run_id)?;
//! while let Some(event) = subscription.next().await? {
//!     render(event);
//! }
//! ```

pub mod capability;
pub mod engine;
pub mod error;
pub mod normalize;
pub mod registry;
pub mod run;

pub use capability::{
    AgentCapability, AgentOutput, AgentRole, Assessment, CodeSet, InputValue, ProseDoc,
    ProseSection, StepInput,
};
pub use engine::events::{ProgressEvent, ProgressEventKind};
pub use engine::stream::RunSubscription;
pub use engine::{EngineConfig, Orchestrator};
pub use error::{AgentFailure, OrchestratorError, RunFailure, StreamLagged};
pub use normalize::{normalize, EnvelopeKind, MetricValue, ResultEnvelope};
pub use registry::{InputBinding, InputSource, StepDef, StepEntry, StepRegistry};
pub use run::{
    ContextValue, RunId, RunStatus, RunSummary, StepRecord, StepStatus, WorkflowKind, WorkflowRun,
};
