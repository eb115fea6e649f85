// SPDX-License-Identifier: MIT

//! Event: the append-only history row (§3, §8 property 3).

use crate::project::ProjectId;
use crate::protocol::ProtocolRunId;
use crate::step::StepRunId;
use crate::define_int_id;
use serde::{Deserialize, Serialize};

define_int_id!(
    /// Store-assigned identifier for an [`Event`]. Ordering within one
    /// `protocol_run_id` is this id, ascending (§5 "Ordering guarantees").
    pub struct EventId;
);

/// An immutable record of something that happened to a project, protocol
/// run, or step. Either `protocol_run_id` or `project_id` must be set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub id: EventId,
    pub protocol_run_id: Option<ProtocolRunId>,
    pub step_run_id: Option<StepRunId>,
    pub project_id: Option<ProjectId>,
    pub event_type: String,
    pub message: String,
    pub metadata: Option<serde_json::Value>,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

/// Fields accepted by `append_event`.
#[derive(Debug, Clone, Default)]
pub struct NewEvent {
    pub protocol_run_id: Option<ProtocolRunId>,
    pub step_run_id: Option<StepRunId>,
    pub project_id: Option<ProjectId>,
    pub event_type: String,
    pub message: String,
    pub metadata: Option<serde_json::Value>,
}

impl NewEvent {
    /// The store rejects events with neither scope id set.
    pub fn has_scope(&self) -> bool {
        self.protocol_run_id.is_some() || self.project_id.is_some()
    }
}
