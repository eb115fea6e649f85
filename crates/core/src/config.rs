// SPDX-License-Identifier: MIT

//! Flat, explicitly-constructed configuration object (spec §9: "Configuration
//! object" design note). No runtime-mutable globals; every component that
//! needs configuration receives a `CoreConfig` handle at construction.

use std::path::PathBuf;
use std::time::Duration;

/// Effective configuration for one core process (daemon worker or CLI
/// invocation), built once from environment variables under the `FORGE_`
/// prefix (spec §6).
#[derive(Debug, Clone)]
pub struct CoreConfig {
    /// `FORGE_DB_PATH` — sqlite database file backing the store.
    pub db_path: PathBuf,
    /// `FORGE_REDIS_URL` — durable queue endpoint; `None` selects the
    /// in-memory queue, which additionally requires `allow_inmemory_queue`.
    pub redis_url: Option<String>,
    /// `FORGE_ALLOW_INMEMORY_QUEUE` — explicit opt-in to run without Redis.
    pub allow_inmemory_queue: bool,
    /// `FORGE_AUTO_QA_AFTER_EXEC` — default QA policy when a step spec omits one.
    pub auto_qa_after_exec: bool,
    /// `FORGE_AUTO_CLONE` — allow `project_setup_job` to clone missing repos.
    pub auto_clone: bool,
    /// `FORGE_LOG_LEVEL` — fallback for `RUST_LOG` when unset.
    pub log_level: String,
    /// `FORGE_OPENCODE_API_KEY`
    pub opencode_api_key: Option<String>,
    /// `FORGE_OPENCODE_BASE_URL`
    pub opencode_base_url: Option<String>,
    /// `FORGE_OPENCODE_TIMEOUT_SECONDS`
    pub opencode_timeout: Duration,
    /// `FORGE_OPENCODE_CHUNK_TIMEOUT_SECONDS`
    pub opencode_chunk_timeout: Duration,
    /// `GITHUB_TOKEN`
    pub github_token: Option<String>,
    /// `FORGE_COPILOT_MODEL`
    pub copilot_model: Option<String>,
    /// Visibility timeout before a `started` job is returned to `queued` (§4.B).
    pub visibility_timeout: Duration,
    /// Worker heartbeat cadence (§4.I).
    pub heartbeat_interval: Duration,
}

impl CoreConfig {
    /// Worker liveness window; a worker is presumed dead after 3 missed
    /// heartbeats (spec §4.I: `T_worker_dead = 3 × T_heartbeat`).
    pub fn worker_dead_after(&self) -> Duration {
        self.heartbeat_interval * 3
    }

    pub fn from_env() -> Self {
        let env_bool = |key: &str| -> bool {
            std::env::var(key).map(|v| truthy(&v)).unwrap_or(false)
        };
        let env_duration_secs = |key: &str, default_secs: u64| -> Duration {
            std::env::var(key)
                .ok()
                .and_then(|v| v.parse::<u64>().ok())
                .map(Duration::from_secs)
                .unwrap_or_else(|| Duration::from_secs(default_secs))
        };

        Self {
            db_path: std::env::var("FORGE_DB_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from(".forge.sqlite")),
            redis_url: std::env::var("FORGE_REDIS_URL").ok(),
            allow_inmemory_queue: env_bool("FORGE_ALLOW_INMEMORY_QUEUE"),
            auto_qa_after_exec: env_bool("FORGE_AUTO_QA_AFTER_EXEC"),
            auto_clone: env_bool("FORGE_AUTO_CLONE"),
            log_level: std::env::var("FORGE_LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            opencode_api_key: std::env::var("FORGE_OPENCODE_API_KEY").ok(),
            opencode_base_url: std::env::var("FORGE_OPENCODE_BASE_URL").ok(),
            opencode_timeout: env_duration_secs("FORGE_OPENCODE_TIMEOUT_SECONDS", 180),
            opencode_chunk_timeout: env_duration_secs("FORGE_OPENCODE_CHUNK_TIMEOUT_SECONDS", 60),
            github_token: std::env::var("GITHUB_TOKEN").ok(),
            copilot_model: std::env::var("FORGE_COPILOT_MODEL").ok(),
            visibility_timeout: env_duration_secs("FORGE_VISIBILITY_TIMEOUT_SECONDS", 30 * 60),
            heartbeat_interval: env_duration_secs("FORGE_HEARTBEAT_SECONDS", 10),
        }
    }
}

fn truthy(value: &str) -> bool {
    matches!(value.to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on")
}
