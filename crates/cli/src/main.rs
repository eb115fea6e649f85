// SPDX-License-Identifier: MIT

//! `forge`: operate projects, protocol runs, steps, the queue, and policy
//! packs against the same sqlite file the worker runtime reads (§6). Exit
//! codes: 0 ok, 1 runtime error, 2 config error, 3 missing dependency.

mod commands;
mod exit_error;

use clap::{Parser, Subcommand};
use exit_error::ExitError;
use forge_core::CoreConfig;
use forge_queue::StoreQueue;
use forge_storage::{SqliteStore, Store};
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "forge", about = "Multi-tenant protocol orchestrator CLI")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Project lifecycle: registering and listing tenants.
    Project {
        #[command(subcommand)]
        action: commands::project::ProjectCommand,
    },
    /// Protocol run lifecycle: plan, pause, resume, cancel, status.
    Protocol {
        #[command(subcommand)]
        action: commands::protocol::ProtocolCommand,
    },
    /// Step-level operations.
    Step {
        #[command(subcommand)]
        action: commands::step::StepCommand,
    },
    /// Durable queue introspection.
    Queue {
        #[command(subcommand)]
        action: commands::queue::QueueCommand,
    },
    /// Policy pack inspection.
    Policy {
        #[command(subcommand)]
        action: commands::policy::PolicyCommand,
    },
}

#[tokio::main]
async fn main() {
    let code = match run().await {
        Ok(()) => 0,
        Err(e) => {
            eprintln!("error: {e}");
            e.code
        }
    };
    std::process::exit(code);
}

async fn run() -> Result<(), ExitError> {
    let cli = Cli::parse();
    let config = CoreConfig::from_env();
    let store: Arc<dyn Store> = Arc::new(
        SqliteStore::connect(&config.db_path)
            .await
            .map_err(|e| ExitError::new(3, format!("cannot open store at {}: {e}", config.db_path.display())))?,
    );
    let queue = Arc::new(StoreQueue::new(store.clone()));

    match cli.command {
        Commands::Project { action } => commands::project::run(action, store).await,
        Commands::Protocol { action } => commands::protocol::run(action, store, queue).await,
        Commands::Step { action } => commands::step::run(action, store, queue).await,
        Commands::Queue { action } => commands::queue::run(action, queue).await,
        Commands::Policy { action } => commands::policy::run(action, store).await,
    }
}
