// SPDX-License-Identifier: MIT

//! `forge step retry` — moves a `failed`/`blocked` step back to `pending`
//! and re-enqueues its execution (§4.A step transition table: `failed ->
//! pending`, `blocked -> pending`).

use crate::exit_error::ExitError;
use clap::Subcommand;
use forge_core::{JobType, StepRunId, StepStatus};
use forge_lifecycle::DEFAULT_QUEUE;
use forge_queue::{Queue, StoreQueue};
use forge_storage::Store;
use forge_wire::{ExecuteStepPayload, JobPayload};
use std::sync::Arc;

#[derive(Subcommand)]
pub enum StepCommand {
    Retry { step_run_id: i64 },
}

pub async fn run(action: StepCommand, store: Arc<dyn Store>, queue: Arc<StoreQueue>) -> Result<(), ExitError> {
    let StepCommand::Retry { step_run_id } = action;
    let id = StepRunId::new(step_run_id);
    let step = store.get_step_run(id).await?;
    if !step.status.can_transition(StepStatus::Pending) {
        return Err(ExitError::config(format!("step {step_run_id} cannot retry from {}", step.status)));
    }
    store.update_step_status(id, StepStatus::Pending, Some("retried".into())).await?;
    queue.enqueue(JobType::ExecuteStep, JobPayload::ExecuteStep(ExecuteStepPayload { step_run_id: id }).encode(), DEFAULT_QUEUE).await?;
    println!("step {step_run_id} requeued");
    Ok(())
}
