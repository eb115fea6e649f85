// SPDX-License-Identifier: MIT

//! Job: the durable queue row (§3, §4.B). Owned by `forge-queue`; the type
//! lives in core because the lifecycle controller and store both reference it.

use crate::define_uuid_id;
use serde::{Deserialize, Serialize};

define_uuid_id!(
    /// Globally unique identifier for a [`Job`].
    pub struct JobId("job_");
);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Queued,
    Started,
    Finished,
    Failed,
}

/// The fixed set of handler keys dispatched by the lifecycle controller (§4.H).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobType {
    PlanProtocol,
    ExecuteStep,
    RunQuality,
    OpenPr,
    ProjectSetup,
}

crate::simple_display!(JobType {
    PlanProtocol => "plan_protocol_job",
    ExecuteStep => "execute_step_job",
    RunQuality => "run_quality_job",
    OpenPr => "open_pr_job",
    ProjectSetup => "project_setup_job",
});

/// A durable queue row. A job in `started` is owned by exactly one worker;
/// the visibility timeout triggers requeue (§3, §4.B).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub job_id: JobId,
    pub job_type: JobType,
    pub payload: serde_json::Value,
    pub queue: String,
    pub status: JobStatus,
    pub attempts: i64,
    pub max_attempts: i64,
    pub next_run_at: chrono::DateTime<chrono::Utc>,
    pub started_at: Option<chrono::DateTime<chrono::Utc>>,
    pub ended_at: Option<chrono::DateTime<chrono::Utc>>,
    pub result: Option<serde_json::Value>,
    pub error: Option<String>,
}

impl Job {
    /// Exponential backoff per §5 "Retries": `min(2^attempt * 1s, 60s)`.
    pub fn backoff_delay(attempt: i64) -> std::time::Duration {
        let capped_exp = attempt.clamp(0, 6) as u32;
        let secs = 2u64.saturating_pow(capped_exp).min(60);
        std::time::Duration::from_secs(secs)
    }
}
