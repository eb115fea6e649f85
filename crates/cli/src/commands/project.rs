// SPDX-License-Identifier: MIT

//! `forge project` — register and list tenants (§4.A "Project").

use crate::exit_error::ExitError;
use clap::Subcommand;
use forge_core::NewProject;
use forge_storage::Store;
use std::sync::Arc;

#[derive(Subcommand)]
pub enum ProjectCommand {
    Create {
        #[arg(long)]
        name: String,
        #[arg(long)]
        git_url: String,
        #[arg(long)]
        local_path: Option<String>,
        #[arg(long, default_value = "main")]
        base_branch: String,
    },
    List,
}

pub async fn run(action: ProjectCommand, store: Arc<dyn Store>) -> Result<(), ExitError> {
    match action {
        ProjectCommand::Create { name, git_url, local_path, base_branch } => {
            let project = store.create_project(NewProject { name, git_url, local_path, base_branch, ..Default::default() }).await?;
            println!("created project {} ({})", project.id.get(), project.name);
        }
        ProjectCommand::List => {
            let projects = store.list_projects().await?;
            if projects.is_empty() {
                println!("no projects");
            }
            for project in projects {
                println!("{}\t{}\t{}", project.id.get(), project.name, project.git_url);
            }
        }
    }
    Ok(())
}
