// SPDX-License-Identifier: MIT

//! The engine adapter contract (§4.D) and the three adapter styles a
//! concrete engine is built from: CLI subprocess, IDE command-file, and
//! HTTP API.

#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

pub mod cli;
pub mod http_api;
pub mod ide_file;

use async_trait::async_trait;
use forge_core::{CoreResult, ProjectId, ProtocolRunId, StepRunId};
use std::path::PathBuf;
use std::time::Duration;

/// Sandbox an engine invocation runs under. `plan` uses `FullAccess`,
/// `execute` uses `WorkspaceWrite`, `qa` uses `ReadOnly` (§4.D).
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Sandbox {
    ReadOnly,
    WorkspaceWrite,
    FullAccess,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EngineKind {
    Cli,
    Ide,
    Api,
}

#[derive(Debug, Clone)]
pub struct EngineMetadata {
    pub id: String,
    pub display_name: String,
    pub kind: EngineKind,
    pub default_model: Option<String>,
    pub capabilities: Vec<String>,
    pub description: Option<String>,
}

#[derive(Debug, Clone)]
pub struct EngineRequest {
    pub project_id: ProjectId,
    pub protocol_run_id: ProtocolRunId,
    pub step_run_id: StepRunId,
    pub model: Option<String>,
    pub prompt_files: Vec<PathBuf>,
    pub working_dir: PathBuf,
    pub sandbox: Sandbox,
    pub timeout: Option<Duration>,
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl EngineRequest {
    pub fn prompt_text(&self) -> std::io::Result<String> {
        let mut buf = String::new();
        for path in &self.prompt_files {
            buf.push_str(&std::fs::read_to_string(path)?);
            buf.push('\n');
        }
        Ok(buf)
    }
}

#[derive(Debug, Clone, Default)]
pub struct EngineResult {
    pub success: bool,
    pub stdout: String,
    pub stderr: String,
    pub error: Option<String>,
    pub tokens_used: Option<u64>,
    pub cost: Option<f64>,
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

/// A concrete, callable engine. Three implementations exist, one per
/// adapter style, not one per vendor — a vendor CLI is just a
/// differently-configured [`cli::CliEngine`].
#[async_trait]
pub trait Engine: Send + Sync {
    fn metadata(&self) -> &EngineMetadata;

    async fn check_availability(&self) -> CoreResult<()>;

    async fn plan(&self, req: &EngineRequest) -> CoreResult<EngineResult>;

    async fn execute(&self, req: &EngineRequest) -> CoreResult<EngineResult>;

    async fn qa(&self, req: &EngineRequest) -> CoreResult<EngineResult>;
}

/// A scriptable [`Engine`] for tests outside this crate: each call pops the
/// next queued result (or repeats the last one once the queue is empty).
#[cfg(any(test, feature = "test-support"))]
pub struct StubEngine {
    metadata: EngineMetadata,
    results: parking_lot::Mutex<std::collections::VecDeque<CoreResult<EngineResult>>>,
}

#[cfg(any(test, feature = "test-support"))]
impl StubEngine {
    pub fn new(id: impl Into<String>, kind: EngineKind) -> Self {
        let id = id.into();
        Self {
            metadata: EngineMetadata {
                display_name: id.clone(),
                id,
                kind,
                default_model: None,
                capabilities: vec![],
                description: None,
            },
            results: parking_lot::Mutex::new(std::collections::VecDeque::new()),
        }
    }

    /// Queues the result returned by the next `plan`/`execute`/`qa` call.
    pub fn push_result(&self, result: CoreResult<EngineResult>) {
        self.results.lock().push_back(result);
    }

    fn next_result(&self) -> CoreResult<EngineResult> {
        let mut queue = self.results.lock();
        match queue.pop_front() {
            Some(result) => result,
            None => Ok(EngineResult { success: true, stdout: "ok".into(), ..EngineResult::default() }),
        }
    }
}

#[cfg(any(test, feature = "test-support"))]
#[async_trait]
impl Engine for StubEngine {
    fn metadata(&self) -> &EngineMetadata {
        &self.metadata
    }

    async fn check_availability(&self) -> CoreResult<()> {
        Ok(())
    }

    async fn plan(&self, _req: &EngineRequest) -> CoreResult<EngineResult> {
        self.next_result()
    }

    async fn execute(&self, _req: &EngineRequest) -> CoreResult<EngineResult> {
        self.next_result()
    }

    async fn qa(&self, _req: &EngineRequest) -> CoreResult<EngineResult> {
        self.next_result()
    }
}
