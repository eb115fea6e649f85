// SPDX-License-Identifier: MIT

//! Typed job payloads (§6 "Job payloads"). The wire value itself carries no
//! type tag — `job.job_type` selects which shape to parse — so decoding goes
//! through [`JobPayload::decode`] rather than `serde`'s externally-tagged
//! enum representation.

use forge_core::{CoreError, CoreResult, JobType, ProjectId, ProtocolRunId, StepRunId};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PlanProtocolPayload {
    pub protocol_run_id: ProtocolRunId,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ExecuteStepPayload {
    pub step_run_id: StepRunId,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct RunQualityPayload {
    pub step_run_id: StepRunId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gates: Option<Vec<String>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct OpenPrPayload {
    pub protocol_run_id: ProtocolRunId,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProjectSetupPayload {
    pub project_id: ProjectId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub protocol_run_id: Option<ProtocolRunId>,
}

/// Decoded job payload, one variant per `JobType`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobPayload {
    PlanProtocol(PlanProtocolPayload),
    ExecuteStep(ExecuteStepPayload),
    RunQuality(RunQualityPayload),
    OpenPr(OpenPrPayload),
    ProjectSetup(ProjectSetupPayload),
}

impl JobPayload {
    pub fn decode(job_type: JobType, raw: &serde_json::Value) -> CoreResult<Self> {
        fn parse<T: for<'de> Deserialize<'de>>(value: &serde_json::Value) -> serde_json::Result<T> {
            serde_json::from_value(value.clone())
        }
        match job_type {
            JobType::PlanProtocol => parse(raw).map(JobPayload::PlanProtocol),
            JobType::ExecuteStep => parse(raw).map(JobPayload::ExecuteStep),
            JobType::RunQuality => parse(raw).map(JobPayload::RunQuality),
            JobType::OpenPr => parse(raw).map(JobPayload::OpenPr),
            JobType::ProjectSetup => parse(raw).map(JobPayload::ProjectSetup),
        }
        .map_err(|e| CoreError::ValidationError(format!("malformed {job_type} payload: {e}")))
    }

    #[allow(clippy::expect_used)]
    pub fn encode(&self) -> serde_json::Value {
        match self {
            JobPayload::PlanProtocol(p) => serde_json::to_value(p),
            JobPayload::ExecuteStep(p) => serde_json::to_value(p),
            JobPayload::RunQuality(p) => serde_json::to_value(p),
            JobPayload::OpenPr(p) => serde_json::to_value(p),
            JobPayload::ProjectSetup(p) => serde_json::to_value(p),
        }
        .expect("payload types are plain data and always serialize")
    }
}
