// SPDX-License-Identifier: MIT

//! In-process `Store` implementation used by tests and single-process dev,
//! generalized from the teacher's `MaterializedState` pattern
//! (`examples/alfredjeanlab-oddjobs/crates/storage/src/state/mod.rs`) from
//! WAL-replay state to a plain in-memory table set guarded by one lock.

use crate::{clarification_is_open_blocking, EventFilter, Store};
use async_trait::async_trait;
use forge_core::{
    Clarification, ClarificationId, ClarificationScope, ClarificationStatus, CodexRun,
    CodexRunId, CoreError, CoreResult, Event, EventId, Job, JobId, JobStatus, NewEvent,
    NewProject, NewProtocolRun, NewStepRun, PolicyPack, PolicyPackId, PolicyUpdate, Project,
    ProjectId, ProtocolRun, ProtocolRunId, ProtocolStatus, StepRun, StepRunId, StepStatus,
};
use parking_lot::Mutex;
use std::collections::HashMap;

#[derive(Default)]
struct Inner {
    projects: HashMap<ProjectId, Project>,
    next_project_id: i64,
    protocol_runs: HashMap<ProtocolRunId, ProtocolRun>,
    next_protocol_run_id: i64,
    step_runs: HashMap<StepRunId, StepRun>,
    next_step_run_id: i64,
    events: HashMap<EventId, Event>,
    next_event_id: i64,
    policy_packs: HashMap<PolicyPackId, PolicyPack>,
    next_policy_pack_id: i64,
    codex_runs: HashMap<CodexRunId, CodexRun>,
    jobs: HashMap<JobId, Job>,
    clarifications: HashMap<ClarificationId, Clarification>,
    next_clarification_id: i64,
}

/// In-memory `Store`. Fully behaves like the sqlite backend with respect to
/// uniqueness constraints and transition validation; does not persist across
/// process restarts.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn now() -> chrono::DateTime<chrono::Utc> {
    chrono::Utc::now()
}

#[async_trait]
impl Store for MemoryStore {
    async fn create_project(&self, new: NewProject) -> CoreResult<Project> {
        let mut inner = self.inner.lock();
        if inner.projects.values().any(|p| p.name == new.name) {
            return Err(CoreError::Conflict(format!("project name {:?} already exists", new.name)));
        }
        inner.next_project_id += 1;
        let id = ProjectId::new(inner.next_project_id);
        let ts = now();
        let project = Project {
            id,
            name: new.name,
            git_url: new.git_url,
            local_path: new.local_path,
            base_branch: new.base_branch,
            ci_provider: new.ci_provider,
            secrets_enc: new.secrets_enc,
            default_models: new.default_models,
            policy_pack_key: new.policy_pack_key,
            policy_pack_version: new.policy_pack_version,
            policy_overrides: new.policy_overrides,
            policy_repo_local_enabled: new.policy_repo_local_enabled,
            policy_effective_hash: None,
            policy_enforcement_mode: new.policy_enforcement_mode,
            created_at: ts,
            updated_at: ts,
        };
        inner.projects.insert(id, project.clone());
        Ok(project)
    }

    async fn get_project(&self, id: ProjectId) -> CoreResult<Project> {
        self.inner
            .lock()
            .projects
            .get(&id)
            .cloned()
            .ok_or_else(|| CoreError::NotFound(format!("project {id}")))
    }

    async fn get_project_by_name(&self, name: &str) -> CoreResult<Option<Project>> {
        Ok(self.inner.lock().projects.values().find(|p| p.name == name).cloned())
    }

    async fn update_project_policy(&self, id: ProjectId, update: PolicyUpdate) -> CoreResult<Project> {
        if update.is_conflicting() {
            return Err(CoreError::Conflict("ConflictingOptions".to_string()));
        }
        let mut inner = self.inner.lock();
        let project = inner
            .projects
            .get_mut(&id)
            .ok_or_else(|| CoreError::NotFound(format!("project {id}")))?;
        if let Some(key) = update.policy_pack_key {
            project.policy_pack_key = Some(key);
        }
        if update.clear_policy_pack_version {
            project.policy_pack_version = None;
        } else if let Some(version) = update.policy_pack_version {
            project.policy_pack_version = Some(version);
        }
        if let Some(overrides) = update.policy_overrides {
            project.policy_overrides = Some(overrides);
        }
        if let Some(enabled) = update.policy_repo_local_enabled {
            project.policy_repo_local_enabled = enabled;
        }
        if let Some(mode) = update.policy_enforcement_mode {
            project.policy_enforcement_mode = mode;
        }
        project.policy_effective_hash = Some(compute_policy_placeholder_hash(project));
        project.updated_at = now();
        Ok(project.clone())
    }

    async fn list_projects(&self) -> CoreResult<Vec<Project>> {
        let mut out: Vec<Project> = self.inner.lock().projects.values().cloned().collect();
        out.sort_by_key(|p| p.id);
        Ok(out)
    }

    async fn delete_project(&self, id: ProjectId) -> CoreResult<()> {
        let mut inner = self.inner.lock();
        if inner.projects.remove(&id).is_none() {
            return Err(CoreError::NotFound(format!("project {id}")));
        }
        let dead_runs: Vec<ProtocolRunId> = inner
            .protocol_runs
            .values()
            .filter(|r| r.project_id == id)
            .map(|r| r.id)
            .collect();
        for run_id in dead_runs {
            inner.protocol_runs.remove(&run_id);
            inner.step_runs.retain(|_, s| s.protocol_run_id != run_id);
            inner.events.retain(|_, e| e.protocol_run_id != Some(run_id));
        }
        inner.events.retain(|_, e| e.project_id != Some(id));
        inner.clarifications.retain(|_, c| c.project_id != id);
        Ok(())
    }

    async fn create_protocol_run(&self, new: NewProtocolRun) -> CoreResult<ProtocolRun> {
        let mut inner = self.inner.lock();
        if !inner.projects.contains_key(&new.project_id) {
            return Err(CoreError::NotFound(format!("project {}", new.project_id)));
        }
        let duplicate = inner
            .protocol_runs
            .values()
            .any(|r| r.project_id == new.project_id && r.protocol_name == new.protocol_name);
        if duplicate {
            return Err(CoreError::Conflict(format!(
                "DuplicateProtocol: {} already exists for project {}",
                new.protocol_name, new.project_id
            )));
        }
        #[allow(clippy::expect_used)]
        let project = inner.projects.get(&new.project_id).expect("checked above").clone();
        inner.next_protocol_run_id += 1;
        let id = ProtocolRunId::new(inner.next_protocol_run_id);
        let ts = now();
        let run = ProtocolRun {
            id,
            project_id: new.project_id,
            protocol_name: new.protocol_name,
            status: ProtocolStatus::Pending,
            base_branch: new.base_branch,
            worktree_path: None,
            protocol_root: None,
            description: new.description,
            template_config: new.template_config,
            template_source: new.template_source,
            policy_pack_key: project.policy_pack_key.clone(),
            policy_pack_version: project.policy_pack_version.clone(),
            policy_effective_hash: project.policy_effective_hash.clone(),
            policy_effective_json: None,
            created_at: ts,
            updated_at: ts,
        };
        inner.protocol_runs.insert(id, run.clone());
        Ok(run)
    }

    async fn get_protocol_run(&self, id: ProtocolRunId) -> CoreResult<ProtocolRun> {
        self.inner
            .lock()
            .protocol_runs
            .get(&id)
            .cloned()
            .ok_or_else(|| CoreError::NotFound(format!("protocol run {id}")))
    }

    async fn update_protocol_status(&self, id: ProtocolRunId, new_status: ProtocolStatus) -> CoreResult<ProtocolRun> {
        let mut inner = self.inner.lock();
        let run = inner
            .protocol_runs
            .get_mut(&id)
            .ok_or_else(|| CoreError::NotFound(format!("protocol run {id}")))?;
        if !run.status.can_transition(new_status) {
            return Err(CoreError::IllegalTransition {
                from: run.status.to_string(),
                to: new_status.to_string(),
            });
        }
        run.status = new_status;
        run.updated_at = now();
        Ok(run.clone())
    }

    async fn list_protocol_runs(&self, project_id: ProjectId) -> CoreResult<Vec<ProtocolRun>> {
        let mut out: Vec<ProtocolRun> = self
            .inner
            .lock()
            .protocol_runs
            .values()
            .filter(|r| r.project_id == project_id)
            .cloned()
            .collect();
        out.sort_by_key(|r| r.id);
        Ok(out)
    }

    async fn create_step_run(&self, new: NewStepRun) -> CoreResult<StepRun> {
        let mut inner = self.inner.lock();
        if !inner.protocol_runs.contains_key(&new.protocol_run_id) {
            return Err(CoreError::NotFound(format!("protocol run {}", new.protocol_run_id)));
        }
        let duplicate = inner.step_runs.values().any(|s| {
            s.protocol_run_id == new.protocol_run_id
                && (s.step_index == new.step_index || s.step_name == new.step_name)
        });
        if duplicate {
            return Err(CoreError::Conflict(format!(
                "DuplicateStep: index {} or name {:?} already exists in protocol run {}",
                new.step_index, new.step_name, new.protocol_run_id
            )));
        }
        inner.next_step_run_id += 1;
        let id = StepRunId::new(inner.next_step_run_id);
        let ts = now();
        let step = StepRun {
            id,
            protocol_run_id: new.protocol_run_id,
            step_index: new.step_index,
            step_name: new.step_name,
            step_type: new.step_type,
            status: new.status,
            retries: 0,
            priority: new.priority,
            model: new.model,
            engine_id: new.engine_id,
            policy: new.policy,
            runtime_state: None,
            depends_on: new.depends_on,
            parallel_group: new.parallel_group,
            assigned_agent: None,
            summary: None,
            created_at: ts,
            updated_at: ts,
        };
        inner.step_runs.insert(id, step.clone());
        Ok(step)
    }

    async fn get_step_run(&self, id: StepRunId) -> CoreResult<StepRun> {
        self.inner
            .lock()
            .step_runs
            .get(&id)
            .cloned()
            .ok_or_else(|| CoreError::NotFound(format!("step run {id}")))
    }

    async fn update_step_status(&self, id: StepRunId, new_status: StepStatus, summary: Option<String>) -> CoreResult<StepRun> {
        let mut inner = self.inner.lock();
        let step = inner
            .step_runs
            .get_mut(&id)
            .ok_or_else(|| CoreError::NotFound(format!("step run {id}")))?;
        if !step.status.can_transition(new_status) {
            return Err(CoreError::IllegalTransition {
                from: step.status.to_string(),
                to: new_status.to_string(),
            });
        }
        if matches!(new_status, StepStatus::Pending) && matches!(step.status, StepStatus::Failed) {
            step.retries += 1;
        }
        step.status = new_status;
        if summary.is_some() {
            step.summary = summary;
        }
        step.updated_at = now();
        Ok(step.clone())
    }

    async fn list_step_runs(&self, protocol_run_id: ProtocolRunId) -> CoreResult<Vec<StepRun>> {
        let mut out: Vec<StepRun> = self
            .inner
            .lock()
            .step_runs
            .values()
            .filter(|s| s.protocol_run_id == protocol_run_id)
            .cloned()
            .collect();
        out.sort_by(|a, b| (a.step_index, a.id).cmp(&(b.step_index, b.id)));
        Ok(out)
    }

    async fn append_event(&self, new: NewEvent) -> CoreResult<Event> {
        if !new.has_scope() {
            return Err(CoreError::ValidationError(
                "append_event requires protocol_run_id or project_id".to_string(),
            ));
        }
        let mut inner = self.inner.lock();
        inner.next_event_id += 1;
        let id = EventId::new(inner.next_event_id);
        let event = Event {
            id,
            protocol_run_id: new.protocol_run_id,
            step_run_id: new.step_run_id,
            project_id: new.project_id,
            event_type: new.event_type,
            message: new.message,
            metadata: new.metadata,
            created_at: now(),
        };
        inner.events.insert(id, event.clone());
        Ok(event)
    }

    async fn list_events(&self, filter: EventFilter) -> CoreResult<Vec<Event>> {
        let inner = self.inner.lock();
        let mut out: Vec<Event> = inner
            .events
            .values()
            .filter(|e| filter.protocol_run_id.is_none() || e.protocol_run_id == filter.protocol_run_id)
            .filter(|e| filter.step_run_id.is_none() || e.step_run_id == filter.step_run_id)
            .filter(|e| filter.project_id.is_none() || e.project_id == filter.project_id)
            .filter(|e| filter.event_type.as_deref().map_or(true, |t| t == e.event_type))
            .filter(|e| filter.after_id.map_or(true, |after| e.id.get() < after.get()))
            .cloned()
            .collect();
        out.sort_by(|a, b| b.id.cmp(&a.id));
        if filter.limit > 0 {
            out.truncate(filter.limit as usize);
        }
        Ok(out)
    }

    async fn upsert_policy_pack(&self, mut pack: PolicyPack) -> CoreResult<PolicyPack> {
        let mut inner = self.inner.lock();
        let existing = inner
            .policy_packs
            .values()
            .find(|p| p.key == pack.key && p.version == pack.version)
            .map(|p| p.id);
        let ts = now();
        pack.updated_at = ts;
        if let Some(id) = existing {
            pack.id = id;
            pack.created_at = inner.policy_packs[&id].created_at;
            inner.policy_packs.insert(id, pack.clone());
        } else {
            inner.next_policy_pack_id += 1;
            pack.id = PolicyPackId::new(inner.next_policy_pack_id);
            pack.created_at = ts;
            inner.policy_packs.insert(pack.id, pack.clone());
        }
        Ok(pack)
    }

    async fn load_policy_pack(&self, key: &str, version: Option<&str>) -> CoreResult<PolicyPack> {
        let inner = self.inner.lock();
        let mut candidates: Vec<&PolicyPack> = inner
            .policy_packs
            .values()
            .filter(|p| p.key == key)
            .filter(|p| version.map_or(true, |v| p.version == v))
            .collect();
        if version.is_none() {
            candidates.retain(|p| matches!(p.status, forge_core::PolicyPackStatus::Active));
        }
        candidates.sort_by(|a, b| a.version.cmp(&b.version));
        candidates
            .last()
            .cloned()
            .cloned()
            .ok_or_else(|| CoreError::NotFound(format!("policy pack {key}")))
    }

    async fn create_codex_run(&self, run: CodexRun) -> CoreResult<CodexRun> {
        let mut inner = self.inner.lock();
        if inner.codex_runs.contains_key(&run.run_id) {
            return Err(CoreError::Conflict(format!("codex run {} already exists", run.run_id)));
        }
        inner.codex_runs.insert(run.run_id, run.clone());
        Ok(run)
    }

    async fn update_codex_run(&self, run: CodexRun) -> CoreResult<CodexRun> {
        let mut inner = self.inner.lock();
        let existing = inner
            .codex_runs
            .get(&run.run_id)
            .ok_or_else(|| CoreError::NotFound(format!("codex run {}", run.run_id)))?;
        if existing.status.is_terminal() && existing.status != run.status {
            return Err(CoreError::IllegalTransition {
                from: format!("{:?}", existing.status),
                to: format!("{:?}", run.status),
            });
        }
        inner.codex_runs.insert(run.run_id, run.clone());
        Ok(run)
    }

    async fn get_codex_run(&self, id: CodexRunId) -> CoreResult<CodexRun> {
        self.inner
            .lock()
            .codex_runs
            .get(&id)
            .cloned()
            .ok_or_else(|| CoreError::NotFound(format!("codex run {id}")))
    }

    async fn insert_job(&self, job: Job) -> CoreResult<Job> {
        let mut inner = self.inner.lock();
        if inner.jobs.contains_key(&job.job_id) {
            return Err(CoreError::Conflict(format!("job {} already exists", job.job_id)));
        }
        inner.jobs.insert(job.job_id, job.clone());
        Ok(job)
    }

    async fn claim_job(&self, queue: &str) -> CoreResult<Option<Job>> {
        let mut inner = self.inner.lock();
        let now_ts = now();
        let candidate_id = inner
            .jobs
            .values()
            .filter(|j| j.queue == queue && j.status == JobStatus::Queued && j.next_run_at <= now_ts)
            .min_by_key(|j| (j.next_run_at, j.job_id.as_uuid()))
            .map(|j| j.job_id);
        let Some(id) = candidate_id else { return Ok(None) };
        #[allow(clippy::expect_used)]
        let job = inner.jobs.get_mut(&id).expect("found above");
        job.status = JobStatus::Started;
        job.started_at = Some(now_ts);
        Ok(Some(job.clone()))
    }

    async fn finish_job(&self, job_id: JobId, status: JobStatus, result: Option<serde_json::Value>, error: Option<String>) -> CoreResult<Job> {
        let mut inner = self.inner.lock();
        let job = inner
            .jobs
            .get_mut(&job_id)
            .ok_or_else(|| CoreError::NotFound(format!("job {job_id}")))?;
        job.status = status;
        job.ended_at = Some(now());
        job.result = result;
        job.error = error;
        Ok(job.clone())
    }

    async fn requeue_job(&self, job_id: JobId, delay: chrono::Duration, bump_attempts: bool) -> CoreResult<Job> {
        let mut inner = self.inner.lock();
        let job = inner
            .jobs
            .get_mut(&job_id)
            .ok_or_else(|| CoreError::NotFound(format!("job {job_id}")))?;
        if bump_attempts {
            job.attempts += 1;
        }
        job.status = JobStatus::Queued;
        job.next_run_at = now() + delay;
        job.started_at = None;
        Ok(job.clone())
    }

    async fn recover_expired_jobs(&self, visibility_timeout: chrono::Duration) -> CoreResult<usize> {
        let mut inner = self.inner.lock();
        let cutoff = now() - visibility_timeout;
        let mut recovered = 0;
        for job in inner.jobs.values_mut() {
            if job.status == JobStatus::Started && job.started_at.is_some_and(|s| s < cutoff) {
                job.status = JobStatus::Queued;
                job.attempts += 1;
                job.started_at = None;
                recovered += 1;
            }
        }
        Ok(recovered)
    }

    async fn list_jobs(&self, status: Option<JobStatus>) -> CoreResult<Vec<Job>> {
        Ok(self
            .inner
            .lock()
            .jobs
            .values()
            .filter(|j| status.map_or(true, |s| j.status == s))
            .cloned()
            .collect())
    }

    async fn get_job(&self, job_id: JobId) -> CoreResult<Job> {
        self.inner
            .lock()
            .jobs
            .get(&job_id)
            .cloned()
            .ok_or_else(|| CoreError::NotFound(format!("job {job_id}")))
    }

    async fn create_clarification(&self, mut clarification: Clarification) -> CoreResult<Clarification> {
        let mut inner = self.inner.lock();
        let duplicate = inner.clarifications.values().any(|c| {
            c.scope == clarification.scope
                && c.project_id == clarification.project_id
                && c.protocol_run_id == clarification.protocol_run_id
                && c.step_run_id == clarification.step_run_id
                && c.key == clarification.key
        });
        if duplicate {
            return Err(CoreError::Conflict(format!("clarification key {:?} already exists in scope", clarification.key)));
        }
        inner.next_clarification_id += 1;
        clarification.id = ClarificationId::new(inner.next_clarification_id);
        inner.clarifications.insert(clarification.id, clarification.clone());
        Ok(clarification)
    }

    async fn answer_clarification(&self, id: ClarificationId, answer: String, answered_by: String) -> CoreResult<Clarification> {
        let mut inner = self.inner.lock();
        let c = inner
            .clarifications
            .get_mut(&id)
            .ok_or_else(|| CoreError::NotFound(format!("clarification {id}")))?;
        c.answer = Some(answer);
        c.status = ClarificationStatus::Answered;
        c.answered_at = Some(now());
        c.answered_by = Some(answered_by);
        Ok(c.clone())
    }

    async fn list_clarifications(&self, scope: Option<ClarificationScope>, protocol_run_id: Option<ProtocolRunId>) -> CoreResult<Vec<Clarification>> {
        Ok(self
            .inner
            .lock()
            .clarifications
            .values()
            .filter(|c| scope.map_or(true, |s| c.scope == s))
            .filter(|c| protocol_run_id.is_none() || c.protocol_run_id == protocol_run_id)
            .cloned()
            .collect())
    }

    async fn has_open_blocking_clarification(&self, protocol_run_id: ProtocolRunId) -> CoreResult<bool> {
        Ok(self
            .inner
            .lock()
            .clarifications
            .values()
            .any(|c| c.protocol_run_id == Some(protocol_run_id) && clarification_is_open_blocking(c)))
    }
}

fn compute_policy_placeholder_hash(project: &Project) -> String {
    use sha2::{Digest, Sha256};
    let mut hasher = Sha256::new();
    hasher.update(project.policy_pack_key.as_deref().unwrap_or(""));
    hasher.update(project.policy_pack_version.as_deref().unwrap_or(""));
    if let Some(overrides) = &project.policy_overrides {
        hasher.update(overrides.to_string());
    }
    hex::encode(hasher.finalize())
}

#[cfg(test)]
#[path = "memory_tests.rs"]
mod tests;
