// SPDX-License-Identifier: MIT

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! forge-tracker: process-wide tracking of in-flight engine executions (§4.C),
//! grounded in `cli_execution_tracker.py`'s `CLIExecutionTracker` singleton —
//! bounded log rings, a cancel-then-complete invariant, and eviction of old
//! completed executions to bound memory.

mod log_entry;

pub use log_entry::{LogEntry, LogLevel};

use forge_core::CodexRunId;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::OnceLock;
use tokio::sync::broadcast;

const MAX_LOG_ENTRIES: usize = 10_000;
const MAX_COMPLETED_EXECUTIONS: usize = 100;
const SUBSCRIBER_CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
    Cancelled,
}

/// An in-progress or completed engine execution. Holds its own bounded log
/// ring so a slow consumer never grows memory unbounded.
#[derive(Debug, Clone)]
pub struct Execution {
    pub run_id: CodexRunId,
    pub execution_type: String,
    pub engine_id: String,
    pub project_id: Option<i64>,
    pub status: ExecutionStatus,
    pub started_at: chrono::DateTime<chrono::Utc>,
    pub finished_at: Option<chrono::DateTime<chrono::Utc>>,
    pub pid: Option<u32>,
    pub exit_code: Option<i32>,
    pub error: Option<String>,
    logs: VecDeque<LogEntry>,
}

impl Execution {
    pub fn logs(&self) -> impl Iterator<Item = &LogEntry> {
        self.logs.iter()
    }

    pub fn log_count(&self) -> usize {
        self.logs.len()
    }
}

struct TrackerState {
    executions: HashMap<CodexRunId, Execution>,
    subscribers: HashMap<CodexRunId, broadcast::Sender<LogEntry>>,
}

/// Thread-safe tracker for CLI/API engine executions. One process-wide
/// instance is reachable through [`tracker()`]; tests construct their own
/// with [`ExecutionTracker::new`] to avoid cross-test interference.
pub struct ExecutionTracker {
    state: Mutex<TrackerState>,
}

impl Default for ExecutionTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl ExecutionTracker {
    pub fn new() -> Self {
        Self { state: Mutex::new(TrackerState { executions: HashMap::new(), subscribers: HashMap::new() }) }
    }

    pub fn start_execution(
        &self,
        run_id: CodexRunId,
        execution_type: impl Into<String>,
        engine_id: impl Into<String>,
        project_id: Option<i64>,
    ) -> Execution {
        let execution_type = execution_type.into();
        let engine_id = engine_id.into();
        let execution = Execution {
            run_id,
            execution_type: execution_type.clone(),
            engine_id: engine_id.clone(),
            project_id,
            status: ExecutionStatus::Running,
            started_at: chrono::Utc::now(),
            finished_at: None,
            pid: None,
            exit_code: None,
            error: None,
            logs: VecDeque::with_capacity(64),
        };
        let mut state = self.state.lock();
        state.executions.insert(run_id, execution.clone());
        tracing::info!(%run_id, execution_type, engine_id, "execution started");
        execution
    }

    pub fn log(&self, run_id: CodexRunId, level: LogLevel, message: impl Into<String>, source: Option<&str>) {
        let mut state = self.state.lock();
        let Some(execution) = state.executions.get_mut(&run_id) else { return };
        let entry = LogEntry { timestamp: chrono::Utc::now(), level, message: message.into(), source: source.map(str::to_string) };
        if execution.logs.len() >= MAX_LOG_ENTRIES {
            execution.logs.pop_front();
        }
        execution.logs.push_back(entry.clone());
        if let Some(tx) = state.subscribers.get(&run_id) {
            let _ = tx.send(entry);
        }
    }

    pub fn set_pid(&self, run_id: CodexRunId, pid: u32) {
        let mut state = self.state.lock();
        if let Some(execution) = state.executions.get_mut(&run_id) {
            execution.pid = Some(pid);
        }
    }

    /// Marks an execution finished. Once `cancel` has run, a later `complete`
    /// preserves the cancelled status — the cancel-then-complete invariant.
    pub fn complete(&self, run_id: CodexRunId, success: bool, exit_code: Option<i32>, error: Option<String>) {
        let mut state = self.state.lock();
        let Some(execution) = state.executions.get_mut(&run_id) else { return };
        if execution.status == ExecutionStatus::Cancelled {
            execution.exit_code = exit_code;
            if error.is_some() {
                execution.error = error;
            }
            execution.finished_at.get_or_insert(chrono::Utc::now());
        } else {
            execution.status = if success { ExecutionStatus::Succeeded } else { ExecutionStatus::Failed };
            execution.finished_at = Some(chrono::Utc::now());
            execution.exit_code = exit_code;
            execution.error = error;
        }
        tracing::info!(%run_id, success, "execution completed");
        self.evict_old_completed(&mut state);
    }

    pub fn cancel(&self, run_id: CodexRunId) {
        let mut state = self.state.lock();
        if let Some(execution) = state.executions.get_mut(&run_id) {
            execution.status = ExecutionStatus::Cancelled;
            execution.finished_at = Some(chrono::Utc::now());
        }
    }

    pub fn get(&self, run_id: CodexRunId) -> Option<Execution> {
        self.state.lock().executions.get(&run_id).cloned()
    }

    pub fn list_active(&self) -> Vec<Execution> {
        self.state.lock().executions.values().filter(|e| e.status == ExecutionStatus::Running).cloned().collect()
    }

    /// Every tracked execution, running or among the last
    /// [`MAX_COMPLETED_EXECUTIONS`] terminal ones still retained.
    pub fn list(&self) -> Vec<Execution> {
        self.state.lock().executions.values().cloned().collect()
    }

    pub fn subscribe(&self, run_id: CodexRunId) -> broadcast::Receiver<LogEntry> {
        let mut state = self.state.lock();
        state.subscribers.entry(run_id).or_insert_with(|| broadcast::channel(SUBSCRIBER_CHANNEL_CAPACITY).0).subscribe()
    }

    /// Drops the broadcast channel backing `run_id`'s subscribers; any
    /// receiver still held simply starts seeing `RecvError::Closed`.
    pub fn unsubscribe(&self, run_id: CodexRunId) {
        self.state.lock().subscribers.remove(&run_id);
    }

    fn evict_old_completed(&self, state: &mut TrackerState) {
        let mut completed: Vec<(CodexRunId, chrono::DateTime<chrono::Utc>)> = state
            .executions
            .values()
            .filter(|e| e.status != ExecutionStatus::Running)
            .map(|e| (e.run_id, e.finished_at.unwrap_or(e.started_at)))
            .collect();
        if completed.len() <= MAX_COMPLETED_EXECUTIONS {
            return;
        }
        completed.sort_by_key(|(_, finished_at)| *finished_at);
        let overflow = completed.len() - MAX_COMPLETED_EXECUTIONS;
        for (run_id, _) in completed.into_iter().take(overflow) {
            state.executions.remove(&run_id);
            state.subscribers.remove(&run_id);
        }
    }
}

static GLOBAL: OnceLock<ExecutionTracker> = OnceLock::new();

/// The process-wide tracker instance (§4.C).
pub fn tracker() -> &'static ExecutionTracker {
    GLOBAL.get_or_init(ExecutionTracker::new)
}

#[cfg(test)]
#[path = "lib_tests.rs"]
mod tests;
