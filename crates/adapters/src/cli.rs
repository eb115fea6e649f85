// SPDX-License-Identifier: MIT

//! CLI adapter style (§4.D): spawn a subprocess, feed the prompt on stdin,
//! capture stdout/stderr, enforce a hard timeout with SIGTERM then SIGKILL.
//!
//! One adapter serves every vendor CLI (Codex, Copilot's `gh copilot`,
//! Cursor's `cursor-agent`, OpenCode-as-CLI) by taking a configurable binary
//! name and argv template rather than hard-coding a vendor.

use crate::{Engine, EngineMetadata, EngineRequest, EngineResult, Sandbox};
use async_trait::async_trait;
use forge_core::{CoreError, CoreResult};
use std::process::Stdio;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(600);
const KILL_GRACE: Duration = Duration::from_secs(5);

/// A CLI-spawning engine. `argv_template` entries containing `{sandbox}` or
/// `{model}` are substituted per request; the prompt is always piped on stdin.
pub struct CliEngine {
    metadata: EngineMetadata,
    binary: String,
    argv_template: Vec<String>,
}

impl CliEngine {
    pub fn new(metadata: EngineMetadata, binary: impl Into<String>, argv_template: Vec<String>) -> Self {
        Self { metadata, binary: binary.into(), argv_template }
    }

    fn argv(&self, req: &EngineRequest, sandbox: Sandbox) -> Vec<String> {
        let sandbox_flag = match sandbox {
            Sandbox::ReadOnly => "read-only",
            Sandbox::WorkspaceWrite => "workspace-write",
            Sandbox::FullAccess => "full-access",
        };
        let model = req.model.as_deref().or(self.metadata.default_model.as_deref()).unwrap_or("default");
        self.argv_template
            .iter()
            .map(|arg| arg.replace("{sandbox}", sandbox_flag).replace("{model}", model))
            .collect()
    }

    async fn run(&self, req: &EngineRequest, sandbox: Sandbox) -> CoreResult<EngineResult> {
        let prompt = req
            .prompt_text()
            .map_err(|e| CoreError::Dependency(format!("cannot read prompt files: {e}")))?;
        let args = self.argv(req, sandbox);
        let mut child = Command::new(&self.binary)
            .args(&args)
            .current_dir(&req.working_dir)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| CoreError::Dependency(format!("spawn {}: {e}", self.binary)))?;

        if let Some(mut stdin) = child.stdin.take() {
            let _ = stdin.write_all(prompt.as_bytes()).await;
        }

        let timeout = req.timeout.unwrap_or(DEFAULT_TIMEOUT);
        #[allow(clippy::expect_used)]
        let mut stdout_pipe = child.stdout.take().expect("piped stdout");
        #[allow(clippy::expect_used)]
        let mut stderr_pipe = child.stderr.take().expect("piped stderr");
        let mut out_buf = Vec::new();
        let mut err_buf = Vec::new();
        let drain = async {
            use tokio::io::AsyncReadExt;
            let (_, _, status) = tokio::join!(
                stdout_pipe.read_to_end(&mut out_buf),
                stderr_pipe.read_to_end(&mut err_buf),
                child.wait(),
            );
            status
        };

        match tokio::time::timeout(timeout, drain).await {
            Ok(Ok(status)) => Ok(EngineResult {
                success: status.success(),
                stdout: String::from_utf8_lossy(&out_buf).into_owned(),
                stderr: String::from_utf8_lossy(&err_buf).into_owned(),
                error: (!status.success()).then(|| format!("exit status {status}")),
                tokens_used: None,
                cost: None,
                metadata: serde_json::Map::new(),
            }),
            Ok(Err(e)) => Err(CoreError::EngineFailure(format!("{} exited abnormally: {e}", self.binary))),
            Err(_) => {
                terminate_then_kill(&mut child).await;
                Err(CoreError::Timeout(format!("{} exceeded {}s timeout", self.binary, timeout.as_secs())))
            }
        }
    }
}

/// Sends SIGTERM, waits [`KILL_GRACE`], then SIGKILL if the process is still alive.
#[cfg(unix)]
async fn terminate_then_kill(child: &mut tokio::process::Child) {
    if let Some(pid) = child.id() {
        let _ = nix::sys::signal::kill(nix::unistd::Pid::from_raw(pid as i32), nix::sys::signal::Signal::SIGTERM);
    }
    tokio::select! {
        _ = child.wait() => {}
        _ = tokio::time::sleep(KILL_GRACE) => {
            let _ = child.start_kill();
            let _ = child.wait().await;
        }
    }
}

#[cfg(not(unix))]
async fn terminate_then_kill(child: &mut tokio::process::Child) {
    let _ = child.start_kill();
    let _ = child.wait().await;
}

#[async_trait]
impl Engine for CliEngine {
    fn metadata(&self) -> &EngineMetadata {
        &self.metadata
    }

    async fn check_availability(&self) -> CoreResult<()> {
        Command::new(&self.binary)
            .arg("--version")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await
            .map(|_| ())
            .map_err(|e| CoreError::Dependency(format!("{} not available: {e}", self.binary)))
    }

    async fn plan(&self, req: &EngineRequest) -> CoreResult<EngineResult> {
        self.run(req, Sandbox::FullAccess).await
    }

    async fn execute(&self, req: &EngineRequest) -> CoreResult<EngineResult> {
        self.run(req, Sandbox::WorkspaceWrite).await
    }

    async fn qa(&self, req: &EngineRequest) -> CoreResult<EngineResult> {
        self.run(req, Sandbox::ReadOnly).await
    }
}
