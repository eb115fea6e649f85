// SPDX-License-Identifier: MIT

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! forge-queue: the durable job queue (§4.B). `StoreQueue` claims and
//! requeues rows in `forge-storage`'s `jobs` table; `LocalQueue` is a
//! pure in-memory stand-in for tests and for explicitly-opted-in
//! single-process runs.

mod local;
mod store_backed;

pub use local::LocalQueue;
pub use store_backed::StoreQueue;

use async_trait::async_trait;
use forge_core::{CoreResult, Job, JobId, JobStatus, JobType};

/// Snapshot of queue depth, grounded in the teacher's queue listing
/// (`oj-cli`'s `commands/queue.rs`) generalized from shell-backed items
/// to job-type counts.
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct QueueStats {
    pub queued: usize,
    pub started: usize,
    pub failed: usize,
}

/// Transport-specific detail behind a narrow adapter trait (§4.B), mirroring
/// how the teacher isolates queue backing behind `QueueType` rather than
/// letting shell-vs-WAL detail leak into callers.
#[async_trait]
pub trait Queue: Send + Sync {
    async fn enqueue(&self, job_type: JobType, payload: serde_json::Value, queue: &str) -> CoreResult<Job>;
    async fn claim(&self, queue: &str) -> CoreResult<Option<Job>>;
    async fn complete(&self, job_id: JobId, result: Option<serde_json::Value>) -> CoreResult<Job>;
    async fn fail(&self, job_id: JobId, error: String) -> CoreResult<Job>;
    async fn requeue_expired(&self, visibility_timeout: chrono::Duration) -> CoreResult<usize>;
    async fn list(&self, status: Option<JobStatus>) -> CoreResult<Vec<Job>>;
    async fn stats(&self) -> CoreResult<QueueStats>;
}

pub(crate) fn new_job(job_type: JobType, payload: serde_json::Value, queue: &str) -> Job {
    Job {
        job_id: JobId::new(),
        job_type,
        payload,
        queue: queue.to_string(),
        status: JobStatus::Queued,
        attempts: 0,
        max_attempts: 5,
        next_run_at: chrono::Utc::now(),
        started_at: None,
        ended_at: None,
        result: None,
        error: None,
    }
}

pub(crate) fn stats_from(jobs: &[Job]) -> QueueStats {
    let mut stats = QueueStats::default();
    for job in jobs {
        match job.status {
            JobStatus::Queued => stats.queued += 1,
            JobStatus::Started => stats.started += 1,
            JobStatus::Failed => stats.failed += 1,
            JobStatus::Finished => {}
        }
    }
    stats
}
