// SPDX-License-Identifier: MIT

//! ProtocolRun: the named sequence of steps, and its status transition table
//! (§4.A "Allowed status transitions (protocol)").

use crate::project::ProjectId;
use crate::{define_int_id, simple_display};
use serde::{Deserialize, Serialize};

define_int_id!(
    /// Store-assigned identifier for a [`ProtocolRun`].
    pub struct ProtocolRunId;
);

/// Protocol-level lifecycle status (§3, §4.A).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProtocolStatus {
    Pending,
    Planning,
    Planned,
    Running,
    Paused,
    Blocked,
    Failed,
    Cancelled,
    Completed,
}

simple_display!(ProtocolStatus {
    Pending => "pending",
    Planning => "planning",
    Planned => "planned",
    Running => "running",
    Paused => "paused",
    Blocked => "blocked",
    Failed => "failed",
    Cancelled => "cancelled",
    Completed => "completed",
});

impl ProtocolStatus {
    /// True once the status can never change again.
    pub fn is_terminal(self) -> bool {
        matches!(self, ProtocolStatus::Completed | ProtocolStatus::Cancelled)
    }

    /// Whether `self -> next` is a legal transition per the table in §4.A:
    ///
    /// ```text
    /// pending     -> planning, cancelled
    /// planning    -> planned, failed, cancelled
    /// planned     -> running, cancelled
    /// running     -> paused, blocked, completed, failed, cancelled
    /// paused      -> running, cancelled
    /// blocked     -> running, failed, cancelled
    /// failed      -> running (retry), cancelled
    /// completed, cancelled -> (terminal)
    /// ```
    pub fn can_transition(self, next: ProtocolStatus) -> bool {
        use ProtocolStatus::*;
        matches!(
            (self, next),
            (Pending, Planning)
                | (Pending, Cancelled)
                | (Planning, Planned)
                | (Planning, Failed)
                | (Planning, Cancelled)
                | (Planned, Running)
                | (Planned, Cancelled)
                | (Running, Paused)
                | (Running, Blocked)
                | (Running, Completed)
                | (Running, Failed)
                | (Running, Cancelled)
                | (Paused, Running)
                | (Paused, Cancelled)
                | (Blocked, Running)
                | (Blocked, Failed)
                | (Blocked, Cancelled)
                | (Failed, Running)
                | (Failed, Cancelled)
        )
    }
}

/// A planned and executed sequence of steps against one project.
/// Fields accepted by `create_protocol_run`. `protocol_name` is unique
/// per project.
#[derive(Debug, Clone)]
pub struct NewProtocolRun {
    pub project_id: ProjectId,
    pub protocol_name: String,
    pub base_branch: String,
    pub description: Option<String>,
    pub template_source: Option<String>,
    /// An external agent-configuration object (§4.E): when set, planning
    /// builds the step list from this JSON instead of scanning the
    /// protocol root for generated `NN-*.md` files.
    pub template_config: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProtocolRun {
    pub id: ProtocolRunId,
    pub project_id: ProjectId,
    pub protocol_name: String,
    pub status: ProtocolStatus,
    pub base_branch: String,
    pub worktree_path: Option<String>,
    pub protocol_root: Option<String>,
    pub description: Option<String>,
    pub template_config: Option<serde_json::Value>,
    pub template_source: Option<String>,
    pub policy_pack_key: Option<String>,
    pub policy_pack_version: Option<String>,
    pub policy_effective_hash: Option<String>,
    pub policy_effective_json: Option<serde_json::Value>,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub updated_at: chrono::DateTime<chrono::Utc>,
}
