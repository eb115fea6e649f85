// SPDX-License-Identifier: MIT

//! `run_quality_job` (§4.H): runs the QA gate for a step already sitting in
//! `needs_qa`, parses its verdict (§8 property 10), and transitions the step
//! to `completed` or `failed`.

use crate::verdict::{parse_verdict, Verdict};
use crate::worktree::protocol_root;
use crate::LifecycleController;
use forge_adapters::{EngineRequest, Sandbox};
use forge_core::{CoreError, CoreResult, NewEvent, ProtocolStatus, StepRunId, StepStatus};
use forge_spec::QaPolicyKind;

impl LifecycleController {
    pub async fn run_quality_job(&self, step_run_id: StepRunId) -> CoreResult<()> {
        let step = self.store.get_step_run(step_run_id).await?;
        if step.status != StepStatus::NeedsQa {
            return Ok(());
        }
        let run = self.store.get_protocol_run(step.protocol_run_id).await?;
        let project = self.store.get_project(run.project_id).await?;

        let spec = self.load_protocol_spec(run.id).await?;
        let Some(step_spec) = spec.steps.iter().find(|s| s.name == step.step_name).cloned() else {
            return self.fail_step(&step, &run, CoreError::ValidationError(format!("no spec entry for step {}", step.step_name))).await;
        };

        if step_spec.qa.policy == Some(QaPolicyKind::Skip) {
            let step = self.set_step_status(&step, StepStatus::Completed, Some("qa skipped".into())).await?;
            self.emit(NewEvent {
                protocol_run_id: Some(run.id),
                step_run_id: Some(step.id),
                project_id: Some(project.id),
                event_type: "qa_skipped".into(),
                message: format!("qa skipped for step {}", step.step_name),
                ..Default::default()
            })
            .await?;
            self.complete_protocol_if_done(&run).await?;
            return self.enqueue_next_runnable_step(run.id).await;
        }

        let protocol_root = protocol_root(project.local_path.as_deref(), &run.protocol_name);
        let resolution = match forge_spec::resolve_step(&step_spec, &protocol_root, &protocol_root, &spec, &step_spec.engine_id) {
            Ok(r) => r,
            Err(e) => return self.fail_step(&step, &run, e).await,
        };

        let qa_prompt_path = match &step_spec.qa.prompt {
            Some(name) => protocol_root.join(name),
            None => protocol_root.join("qa.md"),
        };

        let engine = match self.engines.get(&resolution.engine_id).or_else(|_| self.engines.default()) {
            Ok(e) => e,
            Err(e) => return self.fail_step(&step, &run, e).await,
        };

        let request = EngineRequest {
            project_id: project.id,
            protocol_run_id: run.id,
            step_run_id: step.id,
            model: step_spec.qa.model.clone(),
            prompt_files: vec![qa_prompt_path, resolution.prompt_path.clone()],
            working_dir: resolution.workdir.clone(),
            sandbox: Sandbox::ReadOnly,
            timeout: None,
            extra: Default::default(),
        };

        let result = match engine.qa(&request).await {
            Ok(result) => result,
            Err(e) => return self.fail_step(&step, &run, e).await,
        };

        match parse_verdict(&result.stdout) {
            Verdict::Pass => {
                let step = self.set_step_status(&step, StepStatus::Completed, Some("qa passed".into())).await?;
                self.emit(NewEvent {
                    protocol_run_id: Some(run.id),
                    step_run_id: Some(step.id),
                    project_id: Some(project.id),
                    event_type: "qa_passed".into(),
                    message: format!("qa passed for step {}", step.step_name),
                    ..Default::default()
                })
                .await?;
                self.complete_protocol_if_done(&run).await?;
                self.enqueue_next_runnable_step(run.id).await
            }
            Verdict::Fail => {
                let report_path = protocol_root.join(format!("{}.quality-report.md", step.step_name));
                if let Err(e) = tokio::fs::write(&report_path, &result.stdout).await {
                    tracing::warn!(step = %step.step_name, error = %e, "could not persist quality report");
                }
                let step = self.set_step_status(&step, StepStatus::Failed, Some("qa failed".into())).await?;
                self.emit(NewEvent {
                    protocol_run_id: Some(run.id),
                    step_run_id: Some(step.id),
                    project_id: Some(project.id),
                    event_type: "qa_failed".into(),
                    message: format!("qa failed for step {}", step.step_name),
                    metadata: Some(serde_json::json!({"report_path": report_path.display().to_string()})),
                })
                .await?;
                let _ = self.set_protocol_status(&run, ProtocolStatus::Blocked).await;
                Ok(())
            }
        }
    }
}
