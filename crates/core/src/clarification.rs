// SPDX-License-Identifier: MIT

//! Clarification: an open question that can block a protocol (§3).

use crate::project::ProjectId;
use crate::protocol::ProtocolRunId;
use crate::step::StepRunId;
use crate::define_int_id;
use serde::{Deserialize, Serialize};

define_int_id!(
    /// Store-assigned identifier for a [`Clarification`].
    pub struct ClarificationId;
);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClarificationScope {
    Project,
    Protocol,
    Step,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClarificationStatus {
    Open,
    Answered,
    Dismissed,
}

/// A question raised for a human, scoped to a project, protocol, or step.
/// A blocking clarification with `status=open` forces the owning protocol
/// into `blocked` (§3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Clarification {
    pub id: ClarificationId,
    pub scope: ClarificationScope,
    pub project_id: ProjectId,
    pub protocol_run_id: Option<ProtocolRunId>,
    pub step_run_id: Option<StepRunId>,
    pub key: String,
    pub question: String,
    pub options: Option<Vec<String>>,
    pub recommended: Option<String>,
    pub blocking: bool,
    pub answer: Option<String>,
    pub status: ClarificationStatus,
    pub answered_at: Option<chrono::DateTime<chrono::Utc>>,
    pub answered_by: Option<String>,
}

impl Clarification {
    /// Whether this clarification alone should force its protocol to `blocked`.
    pub fn forces_block(&self) -> bool {
        self.blocking && self.status == ClarificationStatus::Open
    }
}
