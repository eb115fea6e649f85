// SPDX-License-Identifier: MIT

//! StepRun: one unit of agent work within a protocol, and its status
//! transition table (§4.A "Step transitions").

use crate::protocol::ProtocolRunId;
use crate::{define_int_id, simple_display};
use serde::{Deserialize, Serialize};

define_int_id!(
    /// Store-assigned identifier for a [`StepRun`].
    pub struct StepRunId;
);

/// What a step is for; inferred by the spec resolver from filename (§4.E).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepType {
    Setup,
    Work,
    Qa,
}

simple_display!(StepType {
    Setup => "setup",
    Work => "work",
    Qa => "qa",
});

/// Step-level lifecycle status (§3, §4.A).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Pending,
    Running,
    NeedsQa,
    Completed,
    Failed,
    Cancelled,
    Blocked,
}

simple_display!(StepStatus {
    Pending => "pending",
    Running => "running",
    NeedsQa => "needs_qa",
    Completed => "completed",
    Failed => "failed",
    Cancelled => "cancelled",
    Blocked => "blocked",
});

impl StepStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, StepStatus::Completed | StepStatus::Cancelled)
    }

    /// Whether `self -> next` is legal per §4.A:
    ///
    /// ```text
    /// pending  -> running, cancelled, blocked
    /// running  -> needs_qa, completed, failed, cancelled
    /// needs_qa -> completed, failed
    /// blocked  -> pending, cancelled
    /// failed   -> pending (retry), cancelled
    /// completed, cancelled -> (terminal)
    /// ```
    pub fn can_transition(self, next: StepStatus) -> bool {
        use StepStatus::*;
        matches!(
            (self, next),
            (Pending, Running)
                | (Pending, Cancelled)
                | (Pending, Blocked)
                | (Running, NeedsQa)
                | (Running, Completed)
                | (Running, Failed)
                | (Running, Cancelled)
                | (NeedsQa, Completed)
                | (NeedsQa, Failed)
                | (Blocked, Pending)
                | (Blocked, Cancelled)
                | (Failed, Pending)
                | (Failed, Cancelled)
        )
    }
}

/// QA gating policy for one step, from the resolved `StepSpec` (§4.E).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QaPolicy {
    Skip,
    Full,
}

/// Fields accepted by `create_step_run`. `step_index` and `step_name` are
/// jointly unique within a protocol run.
#[derive(Debug, Clone)]
pub struct NewStepRun {
    pub protocol_run_id: ProtocolRunId,
    pub step_index: i64,
    pub step_name: String,
    pub step_type: StepType,
    pub status: StepStatus,
    pub priority: i64,
    pub model: Option<String>,
    pub engine_id: Option<String>,
    pub policy: Option<serde_json::Value>,
    pub depends_on: Vec<StepRunId>,
    pub parallel_group: Option<i64>,
}

/// One unit of agent work within a protocol run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepRun {
    pub id: StepRunId,
    pub protocol_run_id: ProtocolRunId,
    pub step_index: i64,
    pub step_name: String,
    pub step_type: StepType,
    pub status: StepStatus,
    pub retries: i64,
    pub priority: i64,
    pub model: Option<String>,
    pub engine_id: Option<String>,
    pub policy: Option<serde_json::Value>,
    pub runtime_state: Option<serde_json::Value>,
    pub depends_on: Vec<StepRunId>,
    pub parallel_group: Option<i64>,
    pub assigned_agent: Option<String>,
    pub summary: Option<String>,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub updated_at: chrono::DateTime<chrono::Utc>,
}
