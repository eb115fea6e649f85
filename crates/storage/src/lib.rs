// SPDX-License-Identifier: MIT

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! forge-storage: typed persistence, forward-only migrations, and the
//! atomic status-transition facade (§4.A).

pub mod error;
pub mod memory;
pub mod sqlite;

use async_trait::async_trait;
use forge_core::{
    Clarification, ClarificationId, ClarificationScope, ClarificationStatus, CodexRun,
    CodexRunId, CoreResult, Event, EventId, Job, JobId, JobStatus, NewEvent, NewProject,
    NewProtocolRun, NewStepRun, PolicyPack, PolicyUpdate, Project, ProjectId, ProtocolRun,
    ProtocolRunId, ProtocolStatus, StepRun, StepRunId, StepStatus,
};

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

/// Filters accepted by `list_events` (§4.A). `limit` is mandatory; `after_id`
/// paginates strictly-descending by id (§8 property: events totally ordered).
#[derive(Debug, Clone, Default)]
pub struct EventFilter {
    pub protocol_run_id: Option<ProtocolRunId>,
    pub step_run_id: Option<StepRunId>,
    pub project_id: Option<ProjectId>,
    pub event_type: Option<String>,
    pub limit: i64,
    pub after_id: Option<EventId>,
}

/// Typed, transaction-capable persistence facade (§4.A). Every writer
/// operation is serializable at the row level and idempotent when keyed by a
/// natural uniqueness constraint.
#[async_trait]
pub trait Store: Send + Sync {
    async fn create_project(&self, new: NewProject) -> CoreResult<Project>;
    async fn get_project(&self, id: ProjectId) -> CoreResult<Project>;
    async fn get_project_by_name(&self, name: &str) -> CoreResult<Option<Project>>;
    async fn update_project_policy(&self, id: ProjectId, update: PolicyUpdate) -> CoreResult<Project>;
    async fn list_projects(&self) -> CoreResult<Vec<Project>>;
    async fn delete_project(&self, id: ProjectId) -> CoreResult<()>;

    async fn create_protocol_run(&self, new: NewProtocolRun) -> CoreResult<ProtocolRun>;
    async fn get_protocol_run(&self, id: ProtocolRunId) -> CoreResult<ProtocolRun>;
    async fn update_protocol_status(
        &self,
        id: ProtocolRunId,
        new_status: ProtocolStatus,
    ) -> CoreResult<ProtocolRun>;
    async fn list_protocol_runs(&self, project_id: ProjectId) -> CoreResult<Vec<ProtocolRun>>;

    async fn create_step_run(&self, new: NewStepRun) -> CoreResult<StepRun>;
    async fn get_step_run(&self, id: StepRunId) -> CoreResult<StepRun>;
    async fn update_step_status(
        &self,
        id: StepRunId,
        new_status: StepStatus,
        summary: Option<String>,
    ) -> CoreResult<StepRun>;
    async fn list_step_runs(&self, protocol_run_id: ProtocolRunId) -> CoreResult<Vec<StepRun>>;

    async fn append_event(&self, new: NewEvent) -> CoreResult<Event>;
    async fn list_events(&self, filter: EventFilter) -> CoreResult<Vec<Event>>;

    async fn upsert_policy_pack(&self, pack: PolicyPack) -> CoreResult<PolicyPack>;
    async fn load_policy_pack(&self, key: &str, version: Option<&str>) -> CoreResult<PolicyPack>;

    async fn create_codex_run(&self, run: CodexRun) -> CoreResult<CodexRun>;
    async fn update_codex_run(&self, run: CodexRun) -> CoreResult<CodexRun>;
    async fn get_codex_run(&self, id: CodexRunId) -> CoreResult<CodexRun>;

    async fn insert_job(&self, job: Job) -> CoreResult<Job>;
    async fn claim_job(&self, queue: &str) -> CoreResult<Option<Job>>;
    async fn finish_job(&self, job_id: JobId, status: JobStatus, result: Option<serde_json::Value>, error: Option<String>) -> CoreResult<Job>;
    async fn requeue_job(&self, job_id: JobId, delay: chrono::Duration, bump_attempts: bool) -> CoreResult<Job>;
    async fn recover_expired_jobs(&self, visibility_timeout: chrono::Duration) -> CoreResult<usize>;
    async fn list_jobs(&self, status: Option<JobStatus>) -> CoreResult<Vec<Job>>;
    async fn get_job(&self, job_id: JobId) -> CoreResult<Job>;

    async fn create_clarification(&self, clarification: Clarification) -> CoreResult<Clarification>;
    async fn answer_clarification(
        &self,
        id: ClarificationId,
        answer: String,
        answered_by: String,
    ) -> CoreResult<Clarification>;
    async fn list_clarifications(
        &self,
        scope: Option<ClarificationScope>,
        protocol_run_id: Option<ProtocolRunId>,
    ) -> CoreResult<Vec<Clarification>>;
    async fn has_open_blocking_clarification(&self, protocol_run_id: ProtocolRunId) -> CoreResult<bool>;
}

fn clarification_is_open_blocking(c: &Clarification) -> bool {
    c.blocking && c.status == ClarificationStatus::Open
}
