// SPDX-License-Identifier: MIT

//! The Lifecycle Controller (§4.H): the single authority for mutating
//! protocol and step status. Exposes one handler per `JobType`, coordinating
//! the store (§4.A), queue (§4.B), execution tracker (§4.C), engine registry
//! (§4.D), spec resolver (§4.E), policy evaluator (§4.F), and DAG planner
//! (§4.G). Grounded in the teacher's `engine::runtime::handlers::*` —
//! `impl LifecycleController` split one file per job family, each method
//! loading state, validating before mutating, then calling the store.

#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

mod ci;
mod execute;
mod plan;
mod pr;
mod quality;
mod setup;
mod verdict;
mod worktree;

pub use ci::{CiHost, PrOutcome, ShellCiHost};
pub use verdict::{parse_verdict, Verdict};

use forge_core::{CoreConfig, CoreError, CoreResult, Event, NewEvent, ProtocolRun, ProtocolRunId, ProtocolStatus, StepRun, StepRunId, StepStatus};
use forge_engine::EngineRegistry;
use forge_queue::Queue;
use forge_spec::ProtocolSpec;
use forge_storage::{EventFilter, Store};
use std::sync::Arc;

/// The durable queue name every job family dispatches through. A single
/// queue keeps the DAG ordering guarantee simple: one worker, one claim.
pub const DEFAULT_QUEUE: &str = "default";

/// Coordinates A–G behind the five job-type handlers in §4.H, plus the
/// pause/resume/cancel transitions.
pub struct LifecycleController {
    pub store: Arc<dyn Store>,
    pub queue: Arc<dyn Queue>,
    pub engines: Arc<EngineRegistry>,
    pub ci_host: Arc<dyn CiHost>,
    pub config: CoreConfig,
}

impl LifecycleController {
    pub fn new(store: Arc<dyn Store>, queue: Arc<dyn Queue>, engines: Arc<EngineRegistry>, config: CoreConfig) -> Self {
        Self { store, queue, engines, ci_host: Arc::new(ShellCiHost), config }
    }

    pub fn with_ci_host(mut self, ci_host: Arc<dyn CiHost>) -> Self {
        self.ci_host = ci_host;
        self
    }

    /// Appends an event, logging at the same point (teacher style: state
    /// mutation and its log line live next to each other, not in a
    /// separate audit layer).
    pub(crate) async fn emit(&self, new: NewEvent) -> CoreResult<Event> {
        tracing::info!(
            event_type = %new.event_type,
            protocol_run_id = ?new.protocol_run_id,
            step_run_id = ?new.step_run_id,
            project_id = ?new.project_id,
            "{}",
            new.message
        );
        self.store.append_event(new).await
    }

    /// Moves a protocol run to `next`, a no-op if it is already there
    /// (at-least-once job redelivery must not turn a benign re-run into an
    /// `IllegalTransition`), otherwise enforcing §4.A's transition table.
    pub(crate) async fn set_protocol_status(&self, run: &ProtocolRun, next: ProtocolStatus) -> CoreResult<ProtocolRun> {
        if run.status == next {
            return Ok(run.clone());
        }
        if !run.status.can_transition(next) {
            return Err(CoreError::IllegalTransition { from: run.status.to_string(), to: next.to_string() });
        }
        self.store.update_protocol_status(run.id, next).await
    }

    pub(crate) async fn set_step_status(&self, step: &StepRun, next: StepStatus, summary: Option<String>) -> CoreResult<StepRun> {
        if step.status == next {
            return Ok(step.clone());
        }
        if !step.status.can_transition(next) {
            return Err(CoreError::IllegalTransition { from: step.status.to_string(), to: next.to_string() });
        }
        self.store.update_step_status(step.id, next, summary).await
    }

    /// If the protocol has no non-terminal step left, completes it. Called
    /// after every successful step/QA completion (§4.H `run_quality_job`
    /// step 4: "re-check whether the protocol has any non-terminal steps").
    pub(crate) async fn complete_protocol_if_done(&self, run: &ProtocolRun) -> CoreResult<()> {
        let steps = self.store.list_step_runs(run.id).await?;
        if steps.iter().all(|s| s.status.is_terminal()) {
            let run = self.set_protocol_status(run, ProtocolStatus::Completed).await?;
            self.emit(NewEvent {
                protocol_run_id: Some(run.id),
                project_id: Some(run.project_id),
                event_type: "protocol_completed".into(),
                message: format!("protocol {} completed", run.protocol_name),
                ..Default::default()
            })
            .await?;
        }
        Ok(())
    }

    /// Recovers the `ProtocolSpec` a `plan_protocol_job` run resolved, from
    /// the `planned` event's metadata — the `ProtocolRun` row itself has no
    /// column for it, and the event log is already the system's durable
    /// record of what planning decided (§3, §8 property 3).
    pub(crate) async fn load_protocol_spec(&self, protocol_run_id: ProtocolRunId) -> CoreResult<ProtocolSpec> {
        let events = self
            .store
            .list_events(EventFilter {
                protocol_run_id: Some(protocol_run_id),
                event_type: Some("planned".to_string()),
                limit: 1,
                ..Default::default()
            })
            .await?;
        let event = events
            .into_iter()
            .next()
            .ok_or_else(|| CoreError::NotFound(format!("no planned event for protocol run {}", protocol_run_id.get())))?;
        let metadata = event
            .metadata
            .ok_or_else(|| CoreError::Storage("planned event has no metadata".to_string()))?;
        let spec_value = metadata
            .get("protocol_spec")
            .cloned()
            .ok_or_else(|| CoreError::Storage("planned event metadata has no protocol_spec".to_string()))?;
        serde_json::from_value(spec_value).map_err(|e| CoreError::Storage(format!("malformed protocol_spec: {e}")))
    }

    /// Picks the next pending step whose dependencies are satisfied (§4.G)
    /// and enqueues `execute_step_job` for it. A no-op if nothing is
    /// runnable — either the protocol is done or is waiting on a step
    /// that's already in flight.
    pub(crate) async fn enqueue_next_runnable_step(&self, protocol_run_id: ProtocolRunId) -> CoreResult<()> {
        let steps = self.store.list_step_runs(protocol_run_id).await?;
        let rows: Vec<(String, i64, StepStatus, Vec<String>)> = steps
            .iter()
            .map(|s| (s.id.get().to_string(), s.step_index, s.status, s.depends_on.iter().map(|d| d.get().to_string()).collect()))
            .collect();
        let Some(next_id) = forge_dag::next_runnable_step(&rows) else { return Ok(()) };
        let Ok(step_run_id) = next_id.parse::<i64>() else { return Ok(()) };
        self.queue
            .enqueue(
                forge_core::JobType::ExecuteStep,
                forge_wire::JobPayload::ExecuteStep(forge_wire::ExecuteStepPayload { step_run_id: StepRunId::new(step_run_id) }).encode(),
                DEFAULT_QUEUE,
            )
            .await?;
        Ok(())
    }

    /// User-initiated pause/resume/cancel (§4.H "Pause/resume/cancel").
    /// Already-terminated protocols are a no-op, not an error.
    pub async fn pause(&self, protocol_run_id: ProtocolRunId) -> CoreResult<ProtocolRun> {
        let run = self.store.get_protocol_run(protocol_run_id).await?;
        self.set_protocol_status(&run, ProtocolStatus::Paused).await
    }

    pub async fn resume(&self, protocol_run_id: ProtocolRunId) -> CoreResult<ProtocolRun> {
        let run = self.store.get_protocol_run(protocol_run_id).await?;
        self.set_protocol_status(&run, ProtocolStatus::Running).await
    }

    /// Cancels every non-terminal step before the protocol itself (§8 S5:
    /// a step mid-`execute_step_job` must land on `cancelled`, not be left
    /// `running` under a `cancelled` protocol). `needs_qa` has no legal
    /// `-> cancelled` edge — a step already past execution finishes QA
    /// rather than being cut off mid-verdict.
    pub async fn cancel(&self, protocol_run_id: ProtocolRunId) -> CoreResult<ProtocolRun> {
        let run = self.store.get_protocol_run(protocol_run_id).await?;
        if run.status.is_terminal() {
            return Ok(run);
        }
        for step in self.store.list_step_runs(protocol_run_id).await? {
            if !step.status.is_terminal() && step.status.can_transition(StepStatus::Cancelled) {
                self.set_step_status(&step, StepStatus::Cancelled, Some("protocol cancelled".into())).await?;
            }
        }
        let run = self.set_protocol_status(&run, ProtocolStatus::Cancelled).await?;
        self.emit(NewEvent {
            protocol_run_id: Some(run.id),
            project_id: Some(run.project_id),
            event_type: "protocol_cancelled".into(),
            message: format!("protocol {} cancelled", run.protocol_name),
            ..Default::default()
        })
        .await?;
        Ok(run)
    }
}
