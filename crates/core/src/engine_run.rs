// SPDX-License-Identifier: MIT

//! CodexRun: the generic engine-execution record. The name is kept for
//! on-disk compatibility (§3) even though the record is engine-agnostic.

use crate::project::ProjectId;
use crate::protocol::ProtocolRunId;
use crate::step::StepRunId;
use crate::define_uuid_id;
use serde::{Deserialize, Serialize};

define_uuid_id!(
    /// Globally unique identifier for a [`CodexRun`].
    pub struct CodexRunId("run_");
);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CodexRunStatus {
    Queued,
    Running,
    Succeeded,
    Failed,
    Cancelled,
}

impl CodexRunStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            CodexRunStatus::Succeeded | CodexRunStatus::Failed | CodexRunStatus::Cancelled
        )
    }
}

/// A single engine invocation (plan, execute, or qa) and its outcome.
/// `run_id` is globally unique; terminal status is monotonic; `log_path`
/// is always set on creation (§3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CodexRun {
    pub run_id: CodexRunId,
    pub job_type: String,
    pub run_kind: Option<String>,
    pub status: CodexRunStatus,
    pub project_id: Option<ProjectId>,
    pub protocol_run_id: Option<ProtocolRunId>,
    pub step_run_id: Option<StepRunId>,
    pub queue: Option<String>,
    pub attempt: i64,
    pub worker_id: Option<String>,
    pub started_at: Option<chrono::DateTime<chrono::Utc>>,
    pub finished_at: Option<chrono::DateTime<chrono::Utc>>,
    pub prompt_version: Option<String>,
    pub params: Option<serde_json::Value>,
    pub result: Option<serde_json::Value>,
    pub error: Option<String>,
    pub log_path: String,
    pub cost_tokens: Option<i64>,
    pub cost_cents: Option<i64>,
}
