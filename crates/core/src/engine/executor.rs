//! # Run Executor
//!
//! Walks one run's step plan strictly in order: derive input, invoke the
//! capability under a deadline, normalize, record, emit. All failures are
//! recovered into run state; nothing escapes this task.
//!
//! Cancellation is cooperative: the flag is observed only at step
//! boundaries, never by interrupting an in-flight capability call. The
//! design stays sequential on purpose, since every built-in plan feeds
//! later steps from earlier outputs, but nothing in the per-step contract
//! would have to change to execute a declared group of independent steps
//! concurrently.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use tokio::time::timeout;
use tracing::Instrument;

use super::events::ProgressEventKind;
use super::stream::RunHandle;
use super::EngineConfig;
use crate::capability::{AgentCapability, AgentRole};
use crate::error::{AgentFailure, RunFailure};
use crate::normalize::normalize;
use crate::registry::StepEntry;
use crate::run::{ContextValue, RunStatus, StepStatus, WorkflowRun};

pub(crate) async fn execute_run(
    handle: Arc<RunHandle>,
    plan: Vec<StepEntry>,
    capabilities: HashMap<AgentRole, Arc<dyn AgentCapability>>,
    config: EngineConfig,
) {
    let (run_id, workflow) = handle.read(|run| (run.id, run.workflow));
    let span = tracing::info_span!("run", id = %run_id, workflow = %workflow);
    drive(handle, plan, capabilities, config).instrument(span).await
}

async fn drive(
    handle: Arc<RunHandle>,
    plan: Vec<StepEntry>,
    capabilities: HashMap<AgentRole, Arc<dyn AgentCapability>>,
    config: EngineConfig,
) {
    let proceed = handle.transition(|run| {
        if run.status != RunStatus::Pending {
            // Cancelled (or otherwise finalized) before execution began.
            return (false, vec![]);
        }
        run.status = RunStatus::Running;
        run.started_at = Some(Utc::now());
        (
            true,
            vec![ProgressEventKind::RunStarted {
                workflow: run.workflow,
            }],
        )
    });
    if !proceed {
        return;
    }
    tracing::info!(steps = plan.len(), "run started");

    if let Err(error) = verify_plan(&handle, &plan) {
        fail_internal(&handle, 0, &error.to_string());
        return;
    }

    for (index, entry) in plan.iter().enumerate() {
        if handle.is_cancel_requested() {
            finish_cancelled(&handle, index);
            return;
        }
        let def = Arc::clone(&entry.def);

        let input = match handle.read(|run| def.derive_input(run)) {
            Ok(input) => input,
            Err(failure) => {
                if entry.required {
                    tracing::warn!(step = def.step_id, error = %failure, "required step has no input");
                    handle.transition(|run| {
                        let mut events = Vec::new();
                        {
                            let step = &mut run.steps[index];
                            step.status = StepStatus::Failed;
                            step.error = Some(failure.clone());
                            events.push(ProgressEventKind::StepFailed { step: step.clone() });
                        }
                        skip_remaining(run, index + 1, &mut events);
                        finish_failed(
                            run,
                            RunFailure::RequiredStepFailed {
                                step_id: def.step_id.to_string(),
                            },
                            &mut events,
                        );
                        ((), events)
                    });
                    return;
                }
                tracing::info!(step = def.step_id, error = %failure, "optional step has no input, skipping");
                handle.transition(|run| {
                    let step = &mut run.steps[index];
                    step.status = StepStatus::Skipped;
                    ((), vec![ProgressEventKind::StepSkipped { step: step.clone() }])
                });
                continue;
            }
        };

        let Some(capability) = capabilities.get(&def.role).cloned() else {
            fail_internal(
                &handle,
                index,
                &format!("no capability bound for agent `{}`", def.role),
            );
            return;
        };

        handle.transition(|run| {
            let step = &mut run.steps[index];
            step.status = StepStatus::Running;
            step.started_at = Some(Utc::now());
            ((), vec![ProgressEventKind::StepStarted { step: step.clone() }])
        });
        tracing::info!(step = def.step_id, agent = %def.role, "step started");

        // Race the remote call against its budget. On expiry the future is
        // dropped, which discards any late result.
        let outcome = match timeout(config.step_timeout(def.step_id), capability.invoke(input)).await
        {
            Ok(result) => result,
            Err(_) => Err(AgentFailure::Timeout),
        };
        let normalized = outcome.and_then(|raw| normalize(def.role, raw));

        match normalized {
            Ok(envelope) => {
                handle.transition(|run| {
                    run.context.insert(
                        def.step_id.to_string(),
                        ContextValue::Envelope(envelope.clone()),
                    );
                    let step = &mut run.steps[index];
                    step.status = StepStatus::Completed;
                    step.ended_at = Some(Utc::now());
                    step.result = Some(envelope);
                    ((), vec![ProgressEventKind::StepCompleted { step: step.clone() }])
                });
                tracing::info!(step = def.step_id, "step completed");
            }
            Err(failure) => {
                tracing::warn!(step = def.step_id, error = %failure, "step failed");
                if entry.required {
                    handle.transition(|run| {
                        let mut events = Vec::new();
                        {
                            let step = &mut run.steps[index];
                            step.status = StepStatus::Failed;
                            step.ended_at = Some(Utc::now());
                            step.error = Some(failure.clone());
                            events.push(ProgressEventKind::StepFailed { step: step.clone() });
                        }
                        skip_remaining(run, index + 1, &mut events);
                        finish_failed(
                            run,
                            RunFailure::RequiredStepFailed {
                                step_id: def.step_id.to_string(),
                            },
                            &mut events,
                        );
                        ((), events)
                    });
                    tracing::warn!(step = def.step_id, "required step failed, run aborted");
                    return;
                }
                // Degraded mode: record the failure and keep walking.
                handle.transition(|run| {
                    let step = &mut run.steps[index];
                    step.status = StepStatus::Failed;
                    step.ended_at = Some(Utc::now());
                    step.error = Some(failure.clone());
                    ((), vec![ProgressEventKind::StepFailed { step: step.clone() }])
                });
            }
        }
    }

    handle.transition(|run| {
        run.status = RunStatus::Completed;
        run.ended_at = Some(Utc::now());
        (
            (),
            vec![ProgressEventKind::RunCompleted {
                summary: run.summary(),
            }],
        )
    });
    tracing::info!("run completed");
}

/// The materialized records must line up with the registry plan; a mismatch
/// means the orchestrator itself is broken, not the workflow.
fn verify_plan(handle: &RunHandle, plan: &[StepEntry]) -> anyhow::Result<()> {
    handle.read(|run| {
        anyhow::ensure!(
            run.steps.len() == plan.len(),
            "run carries {} step records but the plan has {} steps",
            run.steps.len(),
            plan.len()
        );
        for (record, entry) in run.steps.iter().zip(plan) {
            anyhow::ensure!(
                record.step_id == entry.def.step_id,
                "step record `{}` does not match plan step `{}`",
                record.step_id,
                entry.def.step_id
            );
        }
        Ok(())
    })
}

fn skip_remaining(run: &mut WorkflowRun, from: usize, events: &mut Vec<ProgressEventKind>) {
    for step in run.steps.iter_mut().skip(from) {
        if step.status == StepStatus::Pending {
            step.status = StepStatus::Skipped;
            events.push(ProgressEventKind::StepSkipped { step: step.clone() });
        }
    }
}

fn finish_failed(run: &mut WorkflowRun, failure: RunFailure, events: &mut Vec<ProgressEventKind>) {
    run.status = RunStatus::Failed;
    run.ended_at = Some(Utc::now());
    run.failure = Some(failure);
    events.push(ProgressEventKind::RunFailed {
        summary: run.summary(),
    });
}

fn fail_internal(handle: &RunHandle, from: usize, message: &str) {
    tracing::error!(%message, "orchestrator internal failure");
    handle.transition(|run| {
        let mut events = Vec::new();
        skip_remaining(run, from, &mut events);
        finish_failed(
            run,
            RunFailure::Internal {
                message: message.to_string(),
            },
            &mut events,
        );
        ((), events)
    });
}

fn finish_cancelled(handle: &RunHandle, from: usize) {
    handle.transition(|run| {
        let mut events = Vec::new();
        skip_remaining(run, from, &mut events);
        run.status = RunStatus::Cancelled;
        run.ended_at = Some(Utc::now());
        events.push(ProgressEventKind::RunCancelled {
            summary: run.summary(),
        });
        ((), events)
    });
    tracing::info!("run cancelled");
}

/// Finalize a run that is cancelled before it ever started executing.
/// Requested-but-started runs are instead finalized by the executor at the
/// next step boundary.
pub(crate) fn cancel_if_pending(handle: &RunHandle) {
    handle.transition(|run| {
        if run.status != RunStatus::Pending {
            return ((), vec![]);
        }
        let mut events = Vec::new();
        skip_remaining(run, 0, &mut events);
        run.status = RunStatus::Cancelled;
        run.ended_at = Some(Utc::now());
        events.push(ProgressEventKind::RunCancelled {
            summary: run.summary(),
        });
        ((), events)
    });
}
