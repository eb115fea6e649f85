// SPDX-License-Identifier: MIT

//! Pure in-memory `Queue`. Never durable across a process restart; gated
//! behind `FORGE_ALLOW_INMEMORY_QUEUE` at the daemon boundary (§4.B).

use crate::{new_job, stats_from, Queue, QueueStats};
use async_trait::async_trait;
use forge_core::{CoreError, CoreResult, Job, JobId, JobStatus, JobType};
use parking_lot::Mutex;
use std::collections::HashMap;

#[derive(Default)]
pub struct LocalQueue {
    jobs: Mutex<HashMap<JobId, Job>>,
}

impl LocalQueue {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Queue for LocalQueue {
    async fn enqueue(&self, job_type: JobType, payload: serde_json::Value, queue: &str) -> CoreResult<Job> {
        let job = new_job(job_type, payload, queue);
        self.jobs.lock().insert(job.job_id, job.clone());
        Ok(job)
    }

    async fn claim(&self, queue: &str) -> CoreResult<Option<Job>> {
        let mut jobs = self.jobs.lock();
        let now = chrono::Utc::now();
        let candidate = jobs
            .values_mut()
            .filter(|j| j.queue == queue && j.status == JobStatus::Queued && j.next_run_at <= now)
            .min_by_key(|j| j.next_run_at)
            .map(|j| j.job_id);
        let Some(job_id) = candidate else {
            return Ok(None);
        };
        #[allow(clippy::expect_used)]
        let job = jobs.get_mut(&job_id).expect("candidate id came from this map");
        job.status = JobStatus::Started;
        job.started_at = Some(now);
        Ok(Some(job.clone()))
    }

    async fn complete(&self, job_id: JobId, result: Option<serde_json::Value>) -> CoreResult<Job> {
        let mut jobs = self.jobs.lock();
        let job = jobs.get_mut(&job_id).ok_or_else(|| CoreError::NotFound(format!("job {job_id}")))?;
        job.status = JobStatus::Finished;
        job.ended_at = Some(chrono::Utc::now());
        job.result = result;
        Ok(job.clone())
    }

    async fn fail(&self, job_id: JobId, error: String) -> CoreResult<Job> {
        let mut jobs = self.jobs.lock();
        let job = jobs.get_mut(&job_id).ok_or_else(|| CoreError::NotFound(format!("job {job_id}")))?;
        job.attempts += 1;
        job.error = Some(error);
        if job.attempts >= job.max_attempts {
            job.status = JobStatus::Failed;
            job.ended_at = Some(chrono::Utc::now());
        } else {
            job.status = JobStatus::Queued;
            job.started_at = None;
            job.next_run_at = chrono::Utc::now() + chrono::Duration::from_std(Job::backoff_delay(job.attempts)).unwrap_or_default();
        }
        Ok(job.clone())
    }

    async fn requeue_expired(&self, visibility_timeout: chrono::Duration) -> CoreResult<usize> {
        let mut jobs = self.jobs.lock();
        let cutoff = chrono::Utc::now() - visibility_timeout;
        let mut recovered = 0;
        for job in jobs.values_mut() {
            if job.status == JobStatus::Started && job.started_at.is_some_and(|t| t < cutoff) {
                job.status = JobStatus::Queued;
                job.started_at = None;
                job.attempts += 1;
                recovered += 1;
            }
        }
        Ok(recovered)
    }

    async fn list(&self, status: Option<JobStatus>) -> CoreResult<Vec<Job>> {
        let jobs = self.jobs.lock();
        Ok(jobs.values().filter(|j| status.map_or(true, |s| j.status == s)).cloned().collect())
    }

    async fn stats(&self) -> CoreResult<QueueStats> {
        let jobs = self.jobs.lock();
        let snapshot: Vec<Job> = jobs.values().cloned().collect();
        Ok(stats_from(&snapshot))
    }
}
