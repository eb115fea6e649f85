// SPDX-License-Identifier: MIT

//! Wire-stable JSON payload shapes crossing a process boundary (§6):
//! durable queue job payloads, the IDE adapter's command/result file
//! schema, and the OpenAI-compatible HTTP adapter payload.

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

mod api_payload;
mod ide_command;
mod job_payload;

pub use api_payload::{ApiChoice, ApiMessage, ApiRequest, ApiResponse, ApiUsage};
pub use ide_command::{
    IdeChange, IdeCommand, IdeCommandFile, IdeResultFile, SandboxMode,
};
pub use job_payload::{
    ExecuteStepPayload, JobPayload, OpenPrPayload, PlanProtocolPayload, ProjectSetupPayload, RunQualityPayload,
};
