// SPDX-License-Identifier: MIT

//! Shared fixtures for the end-to-end scenario tests: a `LifecycleController`
//! wired to an in-memory store/queue plus a stub engine, a tiny worker loop
//! that drains the queue the way `forge-daemon`'s `Worker` does, and the
//! `<repo>/../worktrees/<name>/.protocols/<name>` layout `forge-lifecycle`'s
//! worktree helpers compute.

use forge_adapters::{EngineKind, EngineResult, StubEngine};
use forge_core::{CoreConfig, CoreResult, Event, NewProject, NewProtocolRun, Project, ProtocolRunId};
use forge_engine::EngineRegistry;
use forge_lifecycle::{CiHost, LifecycleController};
use forge_queue::{LocalQueue, Queue};
use forge_storage::{MemoryStore, Store};
use forge_wire::JobPayload;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// A `CiHost` that always succeeds without shelling out to `git`/`gh` — the
/// scenario fixtures aren't real git checkouts, and none of the scenarios in
/// §8 are about PR/CI integration, so a host that never fails keeps the
/// branch-push/PR side effects out of every scenario's event sequence.
struct NoopCiHost;

#[async_trait::async_trait]
impl CiHost for NoopCiHost {
    async fn push_branch(&self, _repo_path: &Path, _branch: &str) -> Result<(), String> {
        Ok(())
    }
    async fn open_pr(&self, _repo_path: &Path, _branch: &str, _base_branch: &str, _title: &str) -> Result<String, String> {
        Ok("https://example.invalid/pr/1".to_string())
    }
    async fn trigger_ci(&self, _repo_path: &Path, _branch: &str) -> Result<(), String> {
        Ok(())
    }
}

pub struct Harness {
    pub controller: Arc<LifecycleController>,
    pub store: Arc<dyn Store>,
    pub queue: Arc<dyn Queue>,
    pub engine: Arc<StubEngine>,
    pub repo_dir: PathBuf,
    pub dir: tempfile::TempDir,
}

impl Harness {
    pub async fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let repo_dir = dir.path().join("repo");
        std::fs::create_dir_all(&repo_dir).unwrap();

        let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
        let queue: Arc<dyn Queue> = Arc::new(LocalQueue::new());
        let engines = Arc::new(EngineRegistry::new());
        let engine = Arc::new(StubEngine::new("codex", EngineKind::Cli));
        engines.register(engine.clone(), true);

        let mut config = CoreConfig::from_env();
        config.auto_qa_after_exec = true;

        let controller = Arc::new(LifecycleController::new(store.clone(), queue.clone(), engines, config).with_ci_host(Arc::new(NoopCiHost)));
        Self { controller, store, queue, engine, repo_dir, dir }
    }

    /// Root that `forge_lifecycle::worktree::protocol_root(local_path, name)`
    /// resolves to for a project whose `local_path` is `self.repo_dir`.
    pub fn protocol_root(&self, protocol_name: &str) -> PathBuf {
        self.dir.path().join("worktrees").join(protocol_name).join(".protocols").join(protocol_name)
    }

    pub fn write_step(&self, protocol_name: &str, file_name: &str, body: &str) {
        let root = self.protocol_root(protocol_name);
        std::fs::create_dir_all(&root).unwrap();
        std::fs::write(root.join(file_name), body).unwrap();
    }

    pub async fn project(&self, name: &str) -> Project {
        self.store
            .create_project(NewProject {
                name: name.into(),
                git_url: "git@example.invalid:demo.git".into(),
                local_path: Some(self.repo_dir.to_string_lossy().to_string()),
                base_branch: "main".into(),
                ..Default::default()
            })
            .await
            .unwrap()
    }

    pub async fn protocol_run(&self, project: &Project, protocol_name: &str) -> ProtocolRunId {
        self.protocol_run_with_template(project, protocol_name, None).await
    }

    pub async fn protocol_run_with_template(&self, project: &Project, protocol_name: &str, template_config: Option<serde_json::Value>) -> ProtocolRunId {
        self.store
            .create_protocol_run(NewProtocolRun {
                project_id: project.id,
                protocol_name: protocol_name.into(),
                base_branch: "main".into(),
                description: None,
                template_source: None,
                template_config,
            })
            .await
            .unwrap()
            .id
    }

    /// Drains the queue until empty, dispatching each job to the controller
    /// the way `forge-daemon`'s `Worker::dispatch` does, and returns how many
    /// jobs ran. A handler's `Err` marks the job failed via `Queue::fail`
    /// rather than propagating, mirroring the worker loop's own behavior.
    pub async fn drain(&self) -> usize {
        let mut ran = 0;
        loop {
            let Some(job) = self.queue.claim(forge_lifecycle::DEFAULT_QUEUE).await.unwrap() else { break };
            ran += 1;
            let outcome = self.dispatch(&job.payload, job.job_type).await;
            match outcome {
                Ok(()) => {
                    self.queue.complete(job.job_id, None).await.unwrap();
                }
                Err(e) => {
                    self.queue.fail(job.job_id, e.to_string()).await.unwrap();
                }
            }
        }
        ran
    }

    async fn dispatch(&self, payload: &serde_json::Value, job_type: forge_core::JobType) -> CoreResult<()> {
        match JobPayload::decode(job_type, payload)? {
            JobPayload::PlanProtocol(p) => self.controller.plan_protocol_job(p.protocol_run_id).await,
            JobPayload::ExecuteStep(p) => self.controller.execute_step_job(p.step_run_id).await,
            JobPayload::RunQuality(p) => self.controller.run_quality_job(p.step_run_id).await,
            JobPayload::OpenPr(p) => self.controller.open_pr_job(p.protocol_run_id).await,
            JobPayload::ProjectSetup(p) => self.controller.project_setup_job(p.project_id, p.protocol_run_id).await,
        }
    }

    pub fn push_ok(&self) {
        self.engine.push_result(Ok(EngineResult { success: true, stdout: String::new(), ..Default::default() }));
    }

    pub fn push_ok_with(&self, stdout: &str) {
        self.engine.push_result(Ok(EngineResult { success: true, stdout: stdout.into(), ..Default::default() }));
    }

    pub fn push_fail(&self, error: &str) {
        self.engine.push_result(Ok(EngineResult { success: false, error: Some(error.into()), ..Default::default() }));
    }
}

/// Event types chronologically ordered, with the PR/CI bookkeeping events
/// stripped out — every project in this harness carries a `local_path`
/// (needed so worktree resolution lands inside a tempdir), which makes
/// `plan_protocol_job` enqueue an `open_pr_job` the literal scenarios (whose
/// projects have no `local_path` at all) never produce.
pub fn event_types(events: &[Event]) -> Vec<&str> {
    let mut events: Vec<&Event> = events.iter().collect();
    events.reverse();
    events
        .into_iter()
        .map(|e| e.event_type.as_str())
        .filter(|t| !matches!(*t, "open_pr_failed" | "pr_opened" | "open_pr_skipped" | "ci_trigger_failed" | "worktree_warning"))
        .collect()
}

pub fn make_executable(path: &Path) {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let mut perms = std::fs::metadata(path).unwrap().permissions();
        perms.set_mode(0o755);
        std::fs::set_permissions(path, perms).unwrap();
    }
}
