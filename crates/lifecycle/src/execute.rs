// SPDX-License-Identifier: MIT

//! `execute_step_job` (§4.H): evaluates policy, runs the step's engine, and
//! transitions the step toward `needs_qa`/`completed`/`failed`.
//!
//! Policy findings are evaluated *before* any status transition, while the
//! step is still `pending` — `StepStatus::can_transition` has no
//! `running -> blocked` edge, only `pending -> blocked`, so a block-severity
//! finding has to be caught ahead of the `pending -> running` move, not
//! after it as the narrative description would otherwise suggest.

use crate::worktree::protocol_root;
use crate::LifecycleController;
use forge_adapters::{EngineRequest, Sandbox};
use forge_core::{CodexRunId, CoreError, CoreResult, Job, NewEvent, ProtocolRun, ProtocolStatus, Project, StepRun, StepRunId, StepStatus};
use forge_spec::QaPolicyKind;
use std::path::Path;

/// §4.H.7 "max_retries": a step may fail and be requeued this many times
/// before it fails terminally (§8 property for S3: two requeues, then a
/// third, successful attempt).
const MAX_STEP_RETRIES: i64 = 3;

impl LifecycleController {
    pub async fn execute_step_job(&self, step_run_id: StepRunId) -> CoreResult<()> {
        let step = self.store.get_step_run(step_run_id).await?;
        if matches!(step.status, StepStatus::Completed | StepStatus::Cancelled | StepStatus::Failed | StepStatus::Blocked | StepStatus::NeedsQa) {
            return Ok(());
        }
        let run = self.store.get_protocol_run(step.protocol_run_id).await?;
        let project = self.store.get_project(run.project_id).await?;

        let spec = self.load_protocol_spec(run.id).await?;
        let Some(step_spec) = spec.steps.iter().find(|s| s.name == step.step_name).cloned() else {
            return self.fail_step(&step, &run, CoreError::ValidationError(format!("no spec entry for step {}", step.step_name))).await;
        };

        let mut step = step;
        if step.status == StepStatus::Pending {
            if let Some(finding) = self.blocking_policy_finding(&project, &run, &step_spec).await? {
                step = self.set_step_status(&step, StepStatus::Blocked, Some(finding.message.clone())).await?;
                self.emit(NewEvent {
                    protocol_run_id: Some(run.id),
                    step_run_id: Some(step.id),
                    project_id: Some(project.id),
                    event_type: "policy_blocked".into(),
                    message: finding.message.clone(),
                    metadata: Some(serde_json::json!({"code": finding.code})),
                })
                .await?;
                let _ = self.set_protocol_status(&run, ProtocolStatus::Blocked).await;
                return Ok(());
            }
            step = self.set_step_status(&step, StepStatus::Running, None).await?;
            let _ = self.set_protocol_status(&run, ProtocolStatus::Running).await;
        }

        let protocol_root = protocol_root(project.local_path.as_deref(), &run.protocol_name);
        let resolution = match forge_spec::resolve_step(&step_spec, &protocol_root, &protocol_root, &spec, &step_spec.engine_id) {
            Ok(r) => r,
            Err(e) => return self.fail_step(&step, &run, e).await,
        };

        let engine_id = step.engine_id.clone().unwrap_or_else(|| resolution.engine_id.clone());
        let engine = match self.engines.get(&engine_id).or_else(|_| self.engines.default()) {
            Ok(e) => e,
            Err(e) => return self.fail_step(&step, &run, e).await,
        };

        let request = EngineRequest {
            project_id: project.id,
            protocol_run_id: run.id,
            step_run_id: step.id,
            model: step.model.clone().or_else(|| resolution.model.clone()),
            prompt_files: vec![resolution.prompt_path.clone()],
            working_dir: resolution.workdir.clone(),
            sandbox: Sandbox::WorkspaceWrite,
            timeout: None,
            extra: Default::default(),
        };

        let codex_run_id = CodexRunId::new();
        forge_tracker::tracker().start_execution(codex_run_id, "execute_step", engine_id.clone(), Some(project.id.get()));

        let result = match engine.execute(&request).await {
            Ok(result) if result.success => {
                forge_tracker::tracker().complete(codex_run_id, true, Some(0), None);
                result
            }
            Ok(result) => {
                let error = result.error.unwrap_or_else(|| "engine reported failure".to_string());
                forge_tracker::tracker().complete(codex_run_id, false, None, Some(error.clone()));
                return self.retry_or_fail_step(&step, &run, error).await;
            }
            Err(e) => {
                let error = e.to_string();
                forge_tracker::tracker().complete(codex_run_id, false, None, Some(error.clone()));
                return self.retry_or_fail_step(&step, &run, error).await;
            }
        };

        if let Some(output_path) = &resolution.outputs.protocol {
            if let Err(e) = tokio::fs::write(output_path, &result.stdout).await {
                tracing::warn!(step = %step.step_name, error = %e, "could not persist step output");
            }
        }

        let qa_kind = resolution.qa.policy.unwrap_or(if self.config.auto_qa_after_exec { QaPolicyKind::Full } else { QaPolicyKind::Skip });
        let next_status = if qa_kind == QaPolicyKind::Skip { StepStatus::Completed } else { StepStatus::NeedsQa };
        let step = self.set_step_status(&step, next_status, Some("execution completed".into())).await?;
        self.emit(NewEvent {
            protocol_run_id: Some(run.id),
            step_run_id: Some(step.id),
            project_id: Some(project.id),
            event_type: "step_completed".into(),
            message: format!("step {} execution completed", step.step_name),
            ..Default::default()
        })
        .await?;

        match next_status {
            StepStatus::NeedsQa => {
                self.queue
                    .enqueue(
                        forge_core::JobType::RunQuality,
                        forge_wire::JobPayload::RunQuality(forge_wire::RunQualityPayload { step_run_id: step.id, gates: None }).encode(),
                        crate::DEFAULT_QUEUE,
                    )
                    .await?;
            }
            StepStatus::Completed => {
                self.complete_protocol_if_done(&run).await?;
                self.enqueue_next_runnable_step(run.id).await?;
            }
            _ => {}
        }
        Ok(())
    }

    /// §4.F: the project's policy pack plus project/step findings, escalated
    /// per the project's enforcement mode. `None` pack key degrades to no
    /// findings rather than failing the job.
    async fn blocking_policy_finding(
        &self,
        project: &Project,
        run: &ProtocolRun,
        step_spec: &forge_spec::StepSpec,
    ) -> CoreResult<Option<forge_policy::Finding>> {
        let Some(pack_key) = project.policy_pack_key.as_deref() else { return Ok(None) };
        let pack = match self.store.load_policy_pack(pack_key, project.policy_pack_version.as_deref()).await {
            Ok(pack) => pack,
            Err(CoreError::NotFound(_)) => return Ok(None),
            Err(e) => return Err(e),
        };

        let effective = self.effective_policy_document(&pack.pack, project).await?;

        let mut findings = forge_policy::findings_for_project(project.policy_repo_local_enabled, project.local_path.as_deref());
        findings.extend(forge_policy::findings_for_protocol(&effective, project.local_path.as_deref().map(Path::new)));

        let protocol_root = protocol_root(project.local_path.as_deref(), &run.protocol_name);
        let prompt_path = protocol_root.join(&step_spec.prompt_ref);
        let step_markdown = tokio::fs::read_to_string(&prompt_path).await.unwrap_or_default();
        findings.extend(forge_policy::findings_for_step(&effective, &step_spec.name, &step_markdown));

        let findings = forge_policy::escalate(findings, &effective, project.policy_enforcement_mode);
        Ok(findings.into_iter().find(|f| f.severity == forge_policy::Severity::Block))
    }

    /// Deep-merges `project.policy_overrides` and, when repo-local policy is
    /// enabled, `<local_path>/.forge/policy.json` on top of the pack (§4.F,
    /// pack < project < repo-local). Only JSON repo-local files are read —
    /// the workspace has no YAML parser in its dependency stack and nothing
    /// else in this crate needs one.
    async fn effective_policy_document(&self, pack: &forge_core::policy_pack::PolicyPackDocument, project: &Project) -> CoreResult<forge_core::policy_pack::PolicyPackDocument> {
        let repo_local = if project.policy_repo_local_enabled {
            match project.local_path.as_deref() {
                Some(local_path) => match tokio::fs::read_to_string(Path::new(local_path).join(".forge").join("policy.json")).await {
                    Ok(raw) => Some(serde_json::from_str(&raw).map_err(|e| CoreError::ValidationError(format!("invalid repo-local policy json: {e}")))?),
                    Err(_) => None,
                },
                None => None,
            }
        } else {
            None
        };

        let (effective, _hash, _sources) = forge_policy::compute_effective(pack, project.policy_overrides.as_ref(), repo_local.as_ref());
        serde_json::from_value(effective).map_err(|e| CoreError::ValidationError(format!("invalid effective policy document: {e}")))
    }

    /// §4.H.7: on an engine failure, increment `retries` (`failed -> pending`
    /// is the only legal edge back to a runnable state); below
    /// `MAX_STEP_RETRIES` wait the same backoff schedule the queue uses for
    /// job redelivery, then requeue a fresh `execute_step_job` for the same
    /// step. At the cap, fail the step terminally instead.
    async fn retry_or_fail_step(&self, step: &StepRun, run: &ProtocolRun, error: String) -> CoreResult<()> {
        let failed = self.set_step_status(step, StepStatus::Failed, Some(error.clone())).await?;
        if failed.retries + 1 >= MAX_STEP_RETRIES {
            return self.fail_step(&failed, run, CoreError::EngineFailure(error)).await;
        }
        let pending = self.set_step_status(&failed, StepStatus::Pending, None).await?;
        self.emit(NewEvent {
            protocol_run_id: Some(run.id),
            step_run_id: Some(pending.id),
            project_id: Some(run.project_id),
            event_type: "step_retrying".into(),
            message: format!("step {} failed (retry {}/{}): {error}", pending.step_name, pending.retries, MAX_STEP_RETRIES),
            metadata: Some(serde_json::json!({"retries": pending.retries})),
        })
        .await?;
        tokio::time::sleep(Job::backoff_delay(pending.retries)).await;
        self.queue
            .enqueue(
                forge_core::JobType::ExecuteStep,
                forge_wire::JobPayload::ExecuteStep(forge_wire::ExecuteStepPayload { step_run_id: pending.id }).encode(),
                crate::DEFAULT_QUEUE,
            )
            .await?;
        Ok(())
    }

    /// Terminal step failure: `running -> failed`, protocol `-> blocked`
    /// (recoverable by retry) except `Dependency` errors, which are
    /// unrecoverable and fail the whole protocol (§7).
    pub(crate) async fn fail_step(&self, step: &StepRun, run: &ProtocolRun, err: CoreError) -> CoreResult<()> {
        let next_protocol_status = if matches!(err, CoreError::Dependency(_)) { ProtocolStatus::Failed } else { ProtocolStatus::Blocked };
        let step = self.set_step_status(step, StepStatus::Failed, Some(err.to_string())).await?;
        self.emit(NewEvent {
            protocol_run_id: Some(run.id),
            step_run_id: Some(step.id),
            project_id: Some(run.project_id),
            event_type: err.event_type().to_string(),
            message: err.to_string(),
            ..Default::default()
        })
        .await?;
        let _ = self.set_protocol_status(run, next_protocol_status).await;
        Ok(())
    }
}
