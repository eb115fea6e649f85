// SPDX-License-Identifier: MIT

//! The worker loop (§4.I): claim a job, dispatch it to the lifecycle
//! controller by `job_type`, report the outcome, repeat. Grounded in the
//! teacher's `engine::runtime` claim/execute/report shape, collapsed onto
//! one handler dispatch table since job handling here has no per-job-type
//! process model to manage.

use forge_core::{CoreError, Job};
use forge_lifecycle::LifecycleController;
use forge_queue::Queue;
use forge_wire::JobPayload;
use std::sync::Arc;
use std::time::Duration;

/// How long to sleep after an empty claim before polling again. Grounded in
/// the teacher's listener poll loop backing off when there is nothing to do.
const IDLE_POLL_INTERVAL: Duration = Duration::from_millis(500);

pub struct Worker {
    queue: Arc<dyn Queue>,
    controller: Arc<LifecycleController>,
    queue_name: String,
}

impl Worker {
    pub fn new(queue: Arc<dyn Queue>, controller: Arc<LifecycleController>, queue_name: impl Into<String>) -> Self {
        Self { queue, controller, queue_name: queue_name.into() }
    }

    /// Runs until `shutdown` resolves. Each iteration claims at most one job;
    /// heartbeating is implicit in claim cadence since `StoreQueue::claim`
    /// renews the visibility timeout (§4.B).
    pub async fn run(&self, mut shutdown: tokio::sync::oneshot::Receiver<()>) {
        loop {
            if shutdown.try_recv().is_ok() {
                return;
            }
            match self.queue.claim(&self.queue_name).await {
                Ok(Some(job)) => self.handle(job).await,
                Ok(None) => tokio::time::sleep(IDLE_POLL_INTERVAL).await,
                Err(e) => {
                    tracing::error!(error = %e, "claim failed");
                    tokio::time::sleep(IDLE_POLL_INTERVAL).await;
                }
            }
        }
    }

    async fn handle(&self, job: Job) {
        let job_id = job.job_id;
        tracing::info!(job_id = %job_id, job_type = %job.job_type, "claimed job");
        let result = self.dispatch(&job).await;
        match result {
            Ok(()) => {
                if let Err(e) = self.queue.complete(job_id, None).await {
                    tracing::error!(job_id = %job_id, error = %e, "could not mark job complete");
                }
            }
            Err(e) => {
                tracing::warn!(job_id = %job_id, error = %e, "job handler failed");
                if let Err(e) = self.queue.fail(job_id, e.to_string()).await {
                    tracing::error!(job_id = %job_id, error = %e, "could not mark job failed");
                }
            }
        }
    }

    async fn dispatch(&self, job: &Job) -> Result<(), CoreError> {
        let payload = JobPayload::decode(job.job_type, &job.payload)?;
        match payload {
            JobPayload::PlanProtocol(p) => self.controller.plan_protocol_job(p.protocol_run_id).await,
            JobPayload::ExecuteStep(p) => self.controller.execute_step_job(p.step_run_id).await,
            JobPayload::RunQuality(p) => self.controller.run_quality_job(p.step_run_id).await,
            JobPayload::OpenPr(p) => self.controller.open_pr_job(p.protocol_run_id).await,
            JobPayload::ProjectSetup(p) => self.controller.project_setup_job(p.project_id, p.protocol_run_id).await,
        }
    }

    /// Returns jobs whose visibility timeout lapsed to `queued` so a
    /// crashed worker's jobs get picked up again (§4.B, §4.I "Fault
    /// recovery").
    pub async fn reap_expired(&self, visibility_timeout: chrono::Duration) -> usize {
        match self.queue.requeue_expired(visibility_timeout).await {
            Ok(n) => n,
            Err(e) => {
                tracing::error!(error = %e, "could not requeue expired jobs");
                0
            }
        }
    }
}
