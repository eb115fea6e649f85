// SPDX-License-Identifier: MIT

//! The IDE adapter's file-drop protocol (§6 "IDE command file"): a command
//! file written for the IDE extension to pick up, and the result file it
//! writes back once the instruction has been carried out.

use forge_core::{ProjectId, ProtocolRunId, StepRunId};
use serde::{Deserialize, Serialize};

/// How much autonomy the IDE extension is allowed when carrying out a command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SandboxMode {
    ReadOnly,
    WorkspaceWrite,
    DangerFullAccess,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IdeCommand {
    pub command_type: String,
    pub target: String,
    pub instruction: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

/// `cmd-<project>-<protocol>-<step>.json` — what the orchestrator writes.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IdeCommandFile {
    pub commands: Vec<IdeCommand>,
    pub project_id: ProjectId,
    pub protocol_run_id: ProtocolRunId,
    pub step_run_id: StepRunId,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub sandbox: SandboxMode,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_seconds: Option<u64>,
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

impl IdeCommandFile {
    /// The filename stem the adapter watches for, per §6's naming scheme.
    pub fn file_stem(project_id: ProjectId, protocol_run_id: ProtocolRunId, step_run_id: StepRunId) -> String {
        format!("cmd-{}-{}-{}", project_id.get(), protocol_run_id.get(), step_run_id.get())
    }
}

/// One file change the IDE reports having made.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IdeChange {
    pub file: String,
    pub action: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
}

/// The matching `.result.json` the IDE extension writes back.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct IdeResultFile {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stdout: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stderr: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub changes: Option<Vec<IdeChange>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suggestions: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chat_response: Option<String>,
}
