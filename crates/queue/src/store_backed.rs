// SPDX-License-Identifier: MIT

//! `Queue` backed by `forge-storage`'s `jobs` table, so "durable" means
//! "survives a process restart" without a second external service (§4.B).

use crate::{new_job, stats_from, Queue, QueueStats};
use async_trait::async_trait;
use forge_core::{CoreResult, Job, JobId, JobStatus, JobType};
use forge_storage::Store;
use std::sync::Arc;

pub struct StoreQueue {
    store: Arc<dyn Store>,
}

impl StoreQueue {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl Queue for StoreQueue {
    async fn enqueue(&self, job_type: JobType, payload: serde_json::Value, queue: &str) -> CoreResult<Job> {
        self.store.insert_job(new_job(job_type, payload, queue)).await
    }

    async fn claim(&self, queue: &str) -> CoreResult<Option<Job>> {
        self.store.claim_job(queue).await
    }

    async fn complete(&self, job_id: JobId, result: Option<serde_json::Value>) -> CoreResult<Job> {
        self.store.finish_job(job_id, JobStatus::Finished, result, None).await
    }

    async fn fail(&self, job_id: JobId, error: String) -> CoreResult<Job> {
        let job = self.store.get_job(job_id).await?;
        let attempts = job.attempts + 1;
        if attempts >= job.max_attempts {
            self.store.finish_job(job_id, JobStatus::Failed, None, Some(error)).await
        } else {
            let delay = chrono::Duration::from_std(Job::backoff_delay(attempts)).unwrap_or_default();
            self.store.requeue_job(job_id, delay, true).await
        }
    }

    async fn requeue_expired(&self, visibility_timeout: chrono::Duration) -> CoreResult<usize> {
        self.store.recover_expired_jobs(visibility_timeout).await
    }

    async fn list(&self, status: Option<JobStatus>) -> CoreResult<Vec<Job>> {
        self.store.list_jobs(status).await
    }

    async fn stats(&self) -> CoreResult<QueueStats> {
        let jobs = self.store.list_jobs(None).await?;
        Ok(stats_from(&jobs))
    }
}
