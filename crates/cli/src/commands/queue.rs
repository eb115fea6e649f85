// SPDX-License-Identifier: MIT

//! `forge queue stats` — queue depth by status (§4.B).

use crate::exit_error::ExitError;
use clap::Subcommand;
use forge_queue::{Queue, StoreQueue};
use std::sync::Arc;

#[derive(Subcommand)]
pub enum QueueCommand {
    Stats,
}

pub async fn run(action: QueueCommand, queue: Arc<StoreQueue>) -> Result<(), ExitError> {
    let QueueCommand::Stats = action;
    let stats = queue.stats().await?;
    println!("queued: {}\nstarted: {}\nfailed: {}", stats.queued, stats.started, stats.failed);
    Ok(())
}
