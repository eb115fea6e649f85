// SPDX-License-Identifier: MIT

//! `forged`: the worker runtime process. Connects the sqlite-backed store,
//! registers the configured CLI engine, and runs a fixed pool of workers
//! against the `default` queue until interrupted.

use forge_adapters::cli::CliEngine;
use forge_adapters::{Engine, EngineKind, EngineMetadata};
use forge_core::CoreConfig;
use forge_engine::EngineRegistry;
use forge_lifecycle::LifecycleController;
use forge_queue::{Queue, StoreQueue};
use forge_storage::{SqliteStore, Store};
use std::sync::Arc;

const WORKER_COUNT: usize = 4;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = CoreConfig::from_env();
    let filter = tracing_subscriber::EnvFilter::try_from_env("RUST_LOG")
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.log_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let store: Arc<dyn Store> = Arc::new(SqliteStore::connect(&config.db_path).await?);
    let queue: Arc<dyn Queue> = Arc::new(StoreQueue::new(store.clone()));

    let engines = Arc::new(EngineRegistry::new());
    let engine: Arc<dyn Engine> = Arc::new(CliEngine::new(
        EngineMetadata {
            id: "codex".into(),
            display_name: "Codex CLI".into(),
            kind: EngineKind::Cli,
            default_model: std::env::var("FORGE_DEFAULT_MODEL").ok(),
            capabilities: vec!["plan".into(), "execute".into(), "qa".into()],
            description: None,
        },
        std::env::var("FORGE_ENGINE_BINARY").unwrap_or_else(|_| "codex".into()),
        vec!["exec".into(), "--sandbox".into(), "{sandbox}".into(), "--model".into(), "{model}".into()],
    ));
    engines.register(engine, true);

    let controller = Arc::new(LifecycleController::new(store, queue.clone(), engines, config.clone()));

    let mut shutdown_senders = Vec::new();
    let mut handles = Vec::new();
    for i in 0..WORKER_COUNT {
        let (tx, rx) = tokio::sync::oneshot::channel();
        shutdown_senders.push(tx);
        let worker = forge_daemon::Worker::new(queue.clone(), controller.clone(), forge_lifecycle::DEFAULT_QUEUE);
        handles.push(tokio::spawn(async move {
            tracing::info!(worker = i, "worker started");
            worker.run(rx).await;
        }));
    }

    let reaper_queue = queue.clone();
    let visibility_timeout = chrono::Duration::from_std(config.visibility_timeout).unwrap_or(chrono::Duration::seconds(1800));
    let heartbeat_interval = config.heartbeat_interval;
    let reaper_worker = forge_daemon::Worker::new(reaper_queue, controller.clone(), forge_lifecycle::DEFAULT_QUEUE);
    let reaper = tokio::spawn(async move {
        loop {
            tokio::time::sleep(heartbeat_interval).await;
            let n = reaper_worker.reap_expired(visibility_timeout).await;
            if n > 0 {
                tracing::info!(count = n, "requeued expired jobs");
            }
        }
    });

    tokio::signal::ctrl_c().await?;
    tracing::info!("shutdown signal received");
    reaper.abort();
    for tx in shutdown_senders {
        let _ = tx.send(());
    }
    for handle in handles {
        let _ = handle.await;
    }
    Ok(())
}
