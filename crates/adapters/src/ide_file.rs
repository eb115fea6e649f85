// SPDX-License-Identifier: MIT

//! IDE command-file adapter style (§4.D, §5 "`_wait_for_result`"): write a
//! JSON command file under the workspace, poll for the matching
//! `.result.json` at >=1s cadence until it appears or the request times out.

use crate::{Engine, EngineMetadata, EngineRequest, EngineResult, Sandbox};
use async_trait::async_trait;
use forge_core::{CoreError, CoreResult};
use forge_wire::{IdeCommand, IdeCommandFile, IdeResultFile, SandboxMode};
use std::time::Duration;

const POLL_INTERVAL: Duration = Duration::from_secs(1);
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(900);

/// Writes `cmd-<project>-<protocol>-<step>.json` into a watched directory
/// and polls for the sibling `.result.json` the IDE extension writes back.
pub struct IdeFileEngine {
    metadata: EngineMetadata,
    command_dir: std::path::PathBuf,
}

impl IdeFileEngine {
    pub fn new(metadata: EngineMetadata, command_dir: impl Into<std::path::PathBuf>) -> Self {
        Self { metadata, command_dir: command_dir.into() }
    }

    fn sandbox_mode(sandbox: Sandbox) -> SandboxMode {
        match sandbox {
            Sandbox::ReadOnly => SandboxMode::ReadOnly,
            Sandbox::WorkspaceWrite => SandboxMode::WorkspaceWrite,
            Sandbox::FullAccess => SandboxMode::DangerFullAccess,
        }
    }

    async fn dispatch(&self, req: &EngineRequest, sandbox: Sandbox, command_type: &str) -> CoreResult<EngineResult> {
        let prompt = req
            .prompt_text()
            .map_err(|e| CoreError::Dependency(format!("cannot read prompt files: {e}")))?;
        let stem = IdeCommandFile::file_stem(req.project_id, req.protocol_run_id, req.step_run_id);
        let command_path = self.command_dir.join(format!("{stem}.json"));
        let result_path = self.command_dir.join(format!("{stem}.result.json"));
        let _ = std::fs::remove_file(&result_path);

        let file = IdeCommandFile {
            commands: vec![IdeCommand {
                command_type: command_type.to_string(),
                target: req.working_dir.display().to_string(),
                instruction: prompt,
                context: None,
                metadata: serde_json::Map::new(),
            }],
            project_id: req.project_id,
            protocol_run_id: req.protocol_run_id,
            step_run_id: req.step_run_id,
            created_at: chrono::Utc::now(),
            sandbox: Self::sandbox_mode(sandbox),
            model: req.model.clone().or_else(|| self.metadata.default_model.clone()),
            timeout_seconds: req.timeout.map(|t| t.as_secs()),
            metadata: serde_json::Map::new(),
        };
        tokio::fs::write(&command_path, serde_json::to_vec_pretty(&file).expect("ide command file serializes"))
            .await
            .map_err(|e| CoreError::Dependency(format!("cannot write {}: {e}", command_path.display())))?;

        let timeout = req.timeout.unwrap_or(DEFAULT_TIMEOUT);
        let result = tokio::time::timeout(timeout, Self::wait_for_result(&result_path))
            .await
            .map_err(|_| CoreError::Timeout(format!("no result file at {} within timeout", result_path.display())))??;

        let _ = tokio::fs::remove_file(&command_path).await;
        let _ = tokio::fs::remove_file(&result_path).await;

        Ok(EngineResult {
            success: result.success,
            stdout: result.stdout.or(result.chat_response).unwrap_or_default(),
            stderr: result.stderr.unwrap_or_default(),
            error: result.error,
            tokens_used: None,
            cost: None,
            metadata: serde_json::Map::new(),
        })
    }

    async fn wait_for_result(path: &std::path::Path) -> CoreResult<IdeResultFile> {
        loop {
            if path.exists() {
                let raw = tokio::fs::read(path)
                    .await
                    .map_err(|e| CoreError::Dependency(format!("cannot read {}: {e}", path.display())))?;
                return serde_json::from_slice(&raw)
                    .map_err(|e| CoreError::EngineFailure(format!("malformed ide result file: {e}")));
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }
}

#[async_trait]
impl Engine for IdeFileEngine {
    fn metadata(&self) -> &EngineMetadata {
        &self.metadata
    }

    async fn check_availability(&self) -> CoreResult<()> {
        if self.command_dir.is_dir() {
            Ok(())
        } else {
            Err(CoreError::Dependency(format!("ide command directory {} does not exist", self.command_dir.display())))
        }
    }

    async fn plan(&self, req: &EngineRequest) -> CoreResult<EngineResult> {
        self.dispatch(req, Sandbox::FullAccess, "plan").await
    }

    async fn execute(&self, req: &EngineRequest) -> CoreResult<EngineResult> {
        self.dispatch(req, Sandbox::WorkspaceWrite, "execute").await
    }

    async fn qa(&self, req: &EngineRequest) -> CoreResult<EngineResult> {
        self.dispatch(req, Sandbox::ReadOnly, "qa").await
    }
}
