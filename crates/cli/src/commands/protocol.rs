// SPDX-License-Identifier: MIT

//! `forge protocol` — create a run and drive its pause/resume/cancel
//! transitions (§4.A "ProtocolRun", §4.H "Pause/resume/cancel").

use crate::exit_error::ExitError;
use clap::Subcommand;
use forge_core::{NewProtocolRun, ProtocolRunId};
use forge_lifecycle::{LifecycleController, DEFAULT_QUEUE};
use forge_queue::{Queue, StoreQueue};
use forge_storage::Store;
use forge_wire::{JobPayload, PlanProtocolPayload};
use std::sync::Arc;

#[derive(Subcommand)]
pub enum ProtocolCommand {
    /// Creates a protocol run and enqueues its planning job.
    Run {
        #[arg(long)]
        project: i64,
        #[arg(long)]
        name: String,
        #[arg(long, default_value = "main")]
        base_branch: String,
        #[arg(long)]
        description: Option<String>,
    },
    /// Re-enqueues the planning job for an existing run.
    Plan {
        protocol_run_id: i64,
    },
    Pause {
        protocol_run_id: i64,
    },
    Resume {
        protocol_run_id: i64,
    },
    Cancel {
        protocol_run_id: i64,
    },
    Status {
        protocol_run_id: i64,
    },
}

pub async fn run(action: ProtocolCommand, store: Arc<dyn Store>, queue: Arc<StoreQueue>) -> Result<(), ExitError> {
    match action {
        ProtocolCommand::Run { project, name, base_branch, description } => {
            let project_id = forge_core::ProjectId::new(project);
            let protocol_run = store
                .create_protocol_run(NewProtocolRun { project_id, protocol_name: name, base_branch, description, template_source: None, template_config: None })
                .await?;
            enqueue_plan(&queue, protocol_run.id).await?;
            println!("created protocol run {} and enqueued planning", protocol_run.id.get());
        }
        ProtocolCommand::Plan { protocol_run_id } => {
            enqueue_plan(&queue, ProtocolRunId::new(protocol_run_id)).await?;
            println!("enqueued planning for protocol run {protocol_run_id}");
        }
        ProtocolCommand::Pause { protocol_run_id } => {
            let controller = controller(store, queue);
            let run = controller.pause(ProtocolRunId::new(protocol_run_id)).await?;
            println!("protocol run {} is now {}", run.id.get(), run.status);
        }
        ProtocolCommand::Resume { protocol_run_id } => {
            let controller = controller(store, queue);
            let run = controller.resume(ProtocolRunId::new(protocol_run_id)).await?;
            println!("protocol run {} is now {}", run.id.get(), run.status);
        }
        ProtocolCommand::Cancel { protocol_run_id } => {
            let controller = controller(store, queue);
            let run = controller.cancel(ProtocolRunId::new(protocol_run_id)).await?;
            println!("protocol run {} is now {}", run.id.get(), run.status);
        }
        ProtocolCommand::Status { protocol_run_id } => {
            let id = ProtocolRunId::new(protocol_run_id);
            let run = store.get_protocol_run(id).await?;
            println!("protocol run {} ({}): {}", run.id.get(), run.protocol_name, run.status);
            for step in store.list_step_runs(id).await? {
                println!("  [{}] {} — {}", step.step_index, step.step_name, step.status);
            }
        }
    }
    Ok(())
}

async fn enqueue_plan(queue: &Arc<StoreQueue>, protocol_run_id: ProtocolRunId) -> Result<(), ExitError> {
    queue
        .enqueue(forge_core::JobType::PlanProtocol, JobPayload::PlanProtocol(PlanProtocolPayload { protocol_run_id }).encode(), DEFAULT_QUEUE)
        .await?;
    Ok(())
}

fn controller(store: Arc<dyn Store>, queue: Arc<StoreQueue>) -> LifecycleController {
    LifecycleController::new(store, queue, Arc::new(forge_engine::EngineRegistry::new()), forge_core::CoreConfig::from_env())
}
