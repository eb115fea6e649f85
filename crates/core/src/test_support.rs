// SPDX-License-Identifier: MIT

//! Shared test helpers for use across crates.
//!
//! Gated behind `#[cfg(any(test, feature = "test-support"))]`.

use crate::project::ProjectId;
use crate::protocol::{ProtocolRunId, ProtocolStatus};
use crate::step::{StepStatus, StepType};

/// Proptest strategies for the core state machine enums.
pub mod strategies {
    use super::*;
    use proptest::prelude::*;

    pub fn arb_protocol_status() -> impl Strategy<Value = ProtocolStatus> {
        prop_oneof![
            Just(ProtocolStatus::Pending),
            Just(ProtocolStatus::Planning),
            Just(ProtocolStatus::Planned),
            Just(ProtocolStatus::Running),
            Just(ProtocolStatus::Paused),
            Just(ProtocolStatus::Blocked),
            Just(ProtocolStatus::Failed),
            Just(ProtocolStatus::Cancelled),
            Just(ProtocolStatus::Completed),
        ]
    }

    pub fn arb_step_status() -> impl Strategy<Value = StepStatus> {
        prop_oneof![
            Just(StepStatus::Pending),
            Just(StepStatus::Running),
            Just(StepStatus::NeedsQa),
            Just(StepStatus::Completed),
            Just(StepStatus::Failed),
            Just(StepStatus::Cancelled),
            Just(StepStatus::Blocked),
        ]
    }

    pub fn arb_step_type() -> impl Strategy<Value = StepType> {
        prop_oneof![Just(StepType::Setup), Just(StepType::Work), Just(StepType::Qa)]
    }
}

/// A project id guaranteed not to collide with ids used in fixture setup.
pub fn test_project_id() -> ProjectId {
    ProjectId::new(1)
}

/// A protocol run id guaranteed not to collide with ids used in fixture setup.
pub fn test_protocol_run_id() -> ProtocolRunId {
    ProtocolRunId::new(1)
}
