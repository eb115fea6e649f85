// SPDX-License-Identifier: MIT

//! `plan_protocol_job` (§4.H): provisions a worktree, invokes the planning
//! engine, resolves the generated step files into a `ProtocolSpec`, checks
//! the step dependency graph for cycles (§8 property 4), and persists one
//! `StepRun` per planned step in dependency order.

use crate::worktree::{ensure_worktree, protocol_root};
use crate::LifecycleController;
use forge_adapters::{EngineRequest, Sandbox};
use forge_core::{CoreError, CoreResult, NewEvent, NewStepRun, ProtocolRun, ProtocolRunId, ProtocolStatus, StepRunId, StepStatus};
use forge_spec::{build_spec_from_directory, build_spec_from_external_config, create_steps_from_spec, ExternalAgentConfig, QaPolicyKind};
use std::collections::{HashMap, HashSet};

impl LifecycleController {
    pub async fn plan_protocol_job(&self, protocol_run_id: ProtocolRunId) -> CoreResult<()> {
        let run = self.store.get_protocol_run(protocol_run_id).await?;
        let project = self.store.get_project(run.project_id).await?;

        if run.status.is_terminal() {
            return Ok(());
        }
        let run = self.set_protocol_status(&run, ProtocolStatus::Planning).await?;
        self.emit(NewEvent {
            protocol_run_id: Some(run.id),
            project_id: Some(run.project_id),
            event_type: "planning_started".into(),
            message: format!("planning protocol {}", run.protocol_name),
            ..Default::default()
        })
        .await?;

        let worktree = ensure_worktree(project.local_path.as_deref(), &run.protocol_name).await;
        if let Some(warning) = &worktree.warning {
            self.emit(NewEvent {
                protocol_run_id: Some(run.id),
                project_id: Some(run.project_id),
                event_type: "worktree_warning".into(),
                message: warning.clone(),
                ..Default::default()
            })
            .await?;
        }

        let protocol_root = protocol_root(project.local_path.as_deref(), &run.protocol_name);
        if let Err(e) = tokio::fs::create_dir_all(&protocol_root).await {
            return self.fail_planning(&run, CoreError::Dependency(format!("cannot create protocol root: {e}"))).await;
        }

        let engine = self.engines.default()?;

        // §4.E: a run created with `template_config` set skips the planning
        // engine entirely — the step list is already fully specified, so
        // there's nothing for an agent to generate into the protocol root.
        let spec = if let Some(template_config) = &run.template_config {
            let cfg: ExternalAgentConfig = match serde_json::from_value(template_config.clone()) {
                Ok(cfg) => cfg,
                Err(e) => return self.fail_planning(&run, CoreError::ValidationError(format!("invalid template_config: {e}"))).await,
            };
            build_spec_from_external_config(&cfg)
        } else {
            let plan_request = EngineRequest {
                project_id: run.project_id,
                protocol_run_id: run.id,
                step_run_id: StepRunId::new(0),
                model: None,
                prompt_files: vec![],
                working_dir: worktree.path.clone(),
                sandbox: Sandbox::FullAccess,
                timeout: None,
                extra: Default::default(),
            };
            let plan_result = match engine.plan(&plan_request).await {
                Ok(result) => result,
                Err(e) => return self.fail_planning(&run, e).await,
            };
            if !plan_result.stdout.trim().is_empty() {
                if let Err(e) = tokio::fs::write(protocol_root.join("plan.md"), &plan_result.stdout).await {
                    tracing::warn!(error = %e, "could not persist plan.md");
                }
            }

            match build_spec_from_directory(&protocol_root, &engine.metadata().id, QaPolicyKind::Full, "qa.md") {
                Ok(spec) => spec,
                Err(e) => return self.fail_planning(&run, e).await,
            }
        };

        let existing = self.store.list_step_runs(run.id).await?;
        let existing_names: HashSet<String> = existing.iter().map(|s| s.step_name.clone()).collect();
        let planned = create_steps_from_spec(&spec, &existing_names);

        let dag_rows: Vec<(String, i64, Vec<String>)> = planned.iter().map(|p| (p.id.clone(), p.step_index, p.depends_on.clone())).collect();
        let dag = forge_dag::Dag::from_steps(&dag_rows);
        if dag.has_cycle() {
            let message = "step dependency graph contains a cycle".to_string();
            let run = self.set_protocol_status(&run, ProtocolStatus::Failed).await?;
            self.emit(NewEvent {
                protocol_run_id: Some(run.id),
                project_id: Some(run.project_id),
                event_type: "planning_failed".into(),
                message: message.clone(),
                ..Default::default()
            })
            .await?;
            return Err(CoreError::ValidationError(message));
        }

        // Create steps in topological order so each dependency's StepRunId is
        // already known when its dependents are created.
        let mut assigned: HashMap<String, StepRunId> = HashMap::new();
        let planned_by_id: HashMap<&str, &forge_spec::PlannedStep> = planned.iter().map(|p| (p.id.as_str(), p)).collect();
        for level in dag.levels() {
            for step_id in level {
                let Some(step) = planned_by_id.get(step_id.as_str()) else { continue };
                let depends_on = step.depends_on.iter().filter_map(|dep| assigned.get(dep).copied()).collect();
                let created = self
                    .store
                    .create_step_run(NewStepRun {
                        protocol_run_id: run.id,
                        step_index: step.step_index,
                        step_name: step.step_name.clone(),
                        step_type: step.step_type,
                        status: StepStatus::Pending,
                        priority: 0,
                        model: step.model.clone(),
                        engine_id: step.engine_id.clone(),
                        policy: step.policy.clone(),
                        depends_on,
                        parallel_group: None,
                    })
                    .await?;
                assigned.insert(step.id.clone(), created.id);
            }
        }

        let run = self.set_protocol_status(&run, ProtocolStatus::Planned).await?;
        self.emit(NewEvent {
            protocol_run_id: Some(run.id),
            project_id: Some(run.project_id),
            event_type: "planned".into(),
            message: format!("protocol {} planned with {} steps", run.protocol_name, planned.len()),
            metadata: Some(serde_json::json!({"steps_created": planned.len(), "protocol_spec": spec})),
            ..Default::default()
        })
        .await?;

        let run = self.set_protocol_status(&run, ProtocolStatus::Running).await?;

        let push_branch = run.protocol_name.clone();
        if let Some(local_path) = project.local_path.as_deref() {
            if let Err(e) = self.ci_host.push_branch(std::path::Path::new(local_path), &push_branch).await {
                self.emit(NewEvent {
                    protocol_run_id: Some(run.id),
                    project_id: Some(run.project_id),
                    event_type: "open_pr_failed".into(),
                    message: format!("could not push branch {push_branch}: {e}"),
                    ..Default::default()
                })
                .await?;
            } else {
                self.queue
                    .enqueue(
                        forge_core::JobType::OpenPr,
                        forge_wire::JobPayload::OpenPr(forge_wire::OpenPrPayload { protocol_run_id: run.id }).encode(),
                        crate::DEFAULT_QUEUE,
                    )
                    .await?;
            }
        }

        self.enqueue_next_runnable_step(run.id).await
    }

    async fn fail_planning(&self, run: &ProtocolRun, err: CoreError) -> CoreResult<()> {
        let run = self.set_protocol_status(run, ProtocolStatus::Failed).await?;
        self.emit(NewEvent {
            protocol_run_id: Some(run.id),
            project_id: Some(run.project_id),
            event_type: "planning_failed".into(),
            message: err.to_string(),
            ..Default::default()
        })
        .await?;
        Err(err)
    }
}
