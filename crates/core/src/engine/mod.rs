//! # Workflow Engine
//!
//! Owns the run registry and drives each run through its step plan.
//!
//! ## Execution Flow
//!
//! ```text
//! create_run ──▶ Pending ──start──▶ Running ──▶ step 1 ──▶ ... ──▶ step N
//!                  │                   │                              │
//!                  │ cancel            │ required step failed         │
//!                  ▼                   ▼                              ▼
//!               Cancelled           Failed                        Completed
//! ```
//!
//! One tokio task per run; runs never share state. Every transition is
//! mirrored as a progress event through the per-run stream (see
//! [`stream`]), so a UI can follow a multi-minute run live or join late
//! from a snapshot.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::capability::{AgentCapability, AgentRole};
use crate::error::OrchestratorError;
use crate::registry::StepRegistry;
use crate::run::{RunId, StepRecord, WorkflowKind, WorkflowRun};

pub mod events;
mod executor;
pub mod stream;

use events::ProgressEvent;
use stream::{RunHandle, RunSubscription};

/// Engine tuning knobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Wall-clock budget per step, in seconds. Generous by default since
    /// the calls behind a capability are remote and slow.
    pub default_step_timeout_secs: u64,
    /// Per-step overrides keyed by step id.
    #[serde(default)]
    pub per_step_timeout_secs: HashMap<String, u64>,
    /// Per-subscriber event buffer size; a subscriber that falls further
    /// behind is dropped and must re-subscribe.
    pub event_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            default_step_timeout_secs: 180,
            per_step_timeout_secs: HashMap::new(),
            event_capacity: 256,
        }
    }
}

impl EngineConfig {
    pub fn step_timeout(&self, step_id: &str) -> Duration {
        Duration::from_secs(
            self.per_step_timeout_secs
                .get(step_id)
                .copied()
                .unwrap_or(self.default_step_timeout_secs),
        )
    }
}

/// The run registry and external API of the engine.
///
/// Construction is builder-style: bind one capability per agent role, then
/// share the orchestrator (typically behind an `Arc`) with whatever
/// transport layer fronts it. Runs are memory-resident; terminal runs stay
/// queryable until explicitly reaped.
pub struct Orchestrator {
    config: EngineConfig,
    registry: Arc<StepRegistry>,
    capabilities: HashMap<AgentRole, Arc<dyn AgentCapability>>,
    runs: RwLock<HashMap<RunId, Arc<RunHandle>>>,
}

impl Orchestrator {
    /// New orchestrator over the built-in workflow plans.
    pub fn new(config: EngineConfig) -> Self {
        Self {
            config,
            registry: Arc::new(StepRegistry::builtin()),
            capabilities: HashMap::new(),
            runs: RwLock::new(HashMap::new()),
        }
    }

    /// Replace the step registry.
    pub fn with_registry(mut self, registry: StepRegistry) -> Self {
        self.registry = Arc::new(registry);
        self
    }

    /// Bind the capability implementing `role`.
    pub fn with_capability(
        mut self,
        role: AgentRole,
        capability: Arc<dyn AgentCapability>,
    ) -> Self {
        self.capabilities.insert(role, capability);
        self
    }

    // Lock helpers tolerate poisoning: a panicked caller must not take the
    // whole registry down with it.
    fn runs_read(&self) -> RwLockReadGuard<'_, HashMap<RunId, Arc<RunHandle>>> {
        self.runs.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn runs_write(&self) -> RwLockWriteGuard<'_, HashMap<RunId, Arc<RunHandle>>> {
        self.runs.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn handle(&self, run_id: RunId) -> Result<Arc<RunHandle>, OrchestratorError> {
        self.runs_read()
            .get(&run_id)
            .cloned()
            .ok_or(OrchestratorError::RunNotFound(run_id))
    }

    /// Validate and allocate a new run in `Pending`.
    ///
    /// Rejected outright, with no run created, when the workflow has no
    /// registered plan, a plan step has no bound capability, or the seed is
    /// missing a key the first step's input derivation needs.
    pub fn create_run(
        &self,
        workflow: WorkflowKind,
        seed: BTreeMap<String, String>,
    ) -> Result<RunId, OrchestratorError> {
        let plan = self
            .registry
            .plan(workflow)
            .ok_or(OrchestratorError::UnknownWorkflow(workflow))?;
        for entry in plan {
            if !self.capabilities.contains_key(&entry.def.role) {
                return Err(OrchestratorError::MissingCapability(
                    entry.def.role.agent_name(),
                ));
            }
        }
        if let Some(first) = plan.first() {
            for key in first.def.seed_keys() {
                if !seed.contains_key(key) {
                    return Err(OrchestratorError::MissingSeedKey(key.to_string()));
                }
            }
        }

        let steps: Vec<StepRecord> = plan
            .iter()
            .map(|entry| {
                StepRecord::new(
                    entry.def.step_id,
                    entry.def.role.agent_name(),
                    entry.required,
                )
            })
            .collect();
        let run = WorkflowRun::new(workflow, seed, steps);
        let run_id = run.id;
        let handle = Arc::new(RunHandle::new(run, self.config.event_capacity));
        self.runs_write().insert(run_id, handle);
        tracing::info!(run_id = %run_id, workflow = %workflow, "run created");
        Ok(run_id)
    }

    /// Begin executing a pending run on its own task.
    ///
    /// Idempotent: repeated calls (and calls on terminal runs) are no-ops.
    /// Must be called from within a tokio runtime.
    pub fn start(&self, run_id: RunId) -> Result<(), OrchestratorError> {
        let handle = self.handle(run_id)?;
        if !handle.claim_start() {
            return Ok(());
        }
        let workflow = handle.read(|run| run.workflow);
        let plan = self
            .registry
            .plan(workflow)
            .ok_or(OrchestratorError::UnknownWorkflow(workflow))?
            .to_vec();
        let capabilities = self.capabilities.clone();
        let config = self.config.clone();
        tokio::spawn(executor::execute_run(handle, plan, capabilities, config));
        Ok(())
    }

    /// Point-in-time clone of the full run and step state. Never blocks on
    /// execution.
    pub fn get_snapshot(&self, run_id: RunId) -> Result<WorkflowRun, OrchestratorError> {
        Ok(self.handle(run_id)?.snapshot())
    }

    /// Attach to the run's progress stream: a snapshot of the current
    /// state, followed by every event after it. See [`RunSubscription`].
    pub fn subscribe(&self, run_id: RunId) -> Result<RunSubscription, OrchestratorError> {
        Ok(self.handle(run_id)?.subscribe())
    }

    /// Replay retained events with sequence numbers greater than
    /// `after_sequence` (pass 0 for the full history).
    pub fn events_since(
        &self,
        run_id: RunId,
        after_sequence: u64,
    ) -> Result<Vec<ProgressEvent>, OrchestratorError> {
        Ok(self.handle(run_id)?.events_since(after_sequence))
    }

    /// Request cooperative cancellation.
    ///
    /// A running step is never interrupted; the run finalizes at the next
    /// step boundary. A run that never started is finalized immediately.
    /// No-op on terminal runs.
    pub fn cancel(&self, run_id: RunId) -> Result<(), OrchestratorError> {
        let handle = self.handle(run_id)?;
        handle.request_cancel();
        executor::cancel_if_pending(&handle);
        tracing::info!(run_id = %run_id, "cancellation requested");
        Ok(())
    }

    /// Drop a terminal run from the registry, freeing its state and event
    /// log. Live runs are refused with [`OrchestratorError::RunActive`].
    pub fn reap(&self, run_id: RunId) -> Result<(), OrchestratorError> {
        let mut runs = self.runs_write();
        let handle = runs
            .get(&run_id)
            .ok_or(OrchestratorError::RunNotFound(run_id))?;
        if !handle.read(|run| run.status.is_terminal()) {
            return Err(OrchestratorError::RunActive(run_id));
        }
        runs.remove(&run_id);
        Ok(())
    }

    /// Drop every terminal run; returns how many were reaped.
    pub fn reap_terminal(&self) -> usize {
        let mut runs = self.runs_write();
        let before = runs.len();
        runs.retain(|_, handle| !handle.read(|run| run.status.is_terminal()));
        before - runs.len()
    }
}
