// SPDX-License-Identifier: MIT

//! `forge policy show` — the resolved policy pack bound to a project
//! (§4.F, §3 "policy_pack_key/version").

use crate::exit_error::ExitError;
use clap::Subcommand;
use forge_core::ProjectId;
use forge_storage::Store;
use std::sync::Arc;

#[derive(Subcommand)]
pub enum PolicyCommand {
    Show {
        #[arg(long)]
        project: i64,
    },
}

pub async fn run(action: PolicyCommand, store: Arc<dyn Store>) -> Result<(), ExitError> {
    let PolicyCommand::Show { project } = action;
    let project = store.get_project(ProjectId::new(project)).await?;
    let Some(key) = project.policy_pack_key.as_deref() else {
        println!("project {} has no policy pack bound", project.id.get());
        return Ok(());
    };
    let pack = store.load_policy_pack(key, project.policy_pack_version.as_deref()).await?;
    println!("{}", serde_json::to_string_pretty(&pack).map_err(|e| ExitError::new(1, e.to_string()))?);
    Ok(())
}
