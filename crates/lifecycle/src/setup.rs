// SPDX-License-Identifier: MIT

//! `project_setup_job` (§4.H): ensures a project has a local clone and a
//! configured git remote before any protocol plans against it. Emits
//! `setup_*` events only — onboarding a project has no `ProtocolStatus` of
//! its own to move, and a `protocol_run_id` here is informational context
//! for the event trail, not a state the job mutates.

use crate::LifecycleController;
use forge_core::{CoreResult, NewEvent, ProjectId, ProtocolRunId};
use std::path::Path;

impl LifecycleController {
    pub async fn project_setup_job(&self, project_id: ProjectId, protocol_run_id: Option<ProtocolRunId>) -> CoreResult<()> {
        let project = self.store.get_project(project_id).await?;

        if !self.config.auto_clone {
            self.emit(NewEvent {
                protocol_run_id,
                project_id: Some(project.id),
                event_type: "setup_blocked".into(),
                message: format!("auto_clone disabled; not cloning {}", project.git_url),
                ..Default::default()
            })
            .await?;
            return Ok(());
        }

        let Some(local_path) = project.local_path.as_deref() else {
            self.emit(NewEvent {
                protocol_run_id,
                project_id: Some(project.id),
                event_type: "setup_blocked".into(),
                message: "project has no local_path configured".into(),
                ..Default::default()
            })
            .await?;
            return Ok(());
        };
        let local_path = Path::new(local_path);

        if local_path.exists() {
            self.emit(NewEvent {
                protocol_run_id,
                project_id: Some(project.id),
                event_type: "setup_skipped".into(),
                message: format!("local clone already present at {}", local_path.display()),
                ..Default::default()
            })
            .await?;
            return Ok(());
        }

        if let Some(parent) = local_path.parent() {
            if let Err(e) = tokio::fs::create_dir_all(parent).await {
                self.emit(NewEvent {
                    protocol_run_id,
                    project_id: Some(project.id),
                    event_type: "setup_failed".into(),
                    message: format!("cannot create parent directory: {e}"),
                    ..Default::default()
                })
                .await?;
                return Ok(());
            }
        }

        let output = tokio::process::Command::new("git")
            .args(["clone", &project.git_url, &local_path.display().to_string()])
            .output()
            .await;

        match output {
            Ok(output) if output.status.success() => {
                self.emit(NewEvent {
                    protocol_run_id,
                    project_id: Some(project.id),
                    event_type: "setup_cloned".into(),
                    message: format!("cloned {} to {}", project.git_url, local_path.display()),
                    ..Default::default()
                })
                .await?;
            }
            Ok(output) => {
                let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
                self.emit(NewEvent {
                    protocol_run_id,
                    project_id: Some(project.id),
                    event_type: "setup_failed".into(),
                    message: format!("git clone failed: {stderr}"),
                    ..Default::default()
                })
                .await?;
            }
            Err(e) => {
                self.emit(NewEvent {
                    protocol_run_id,
                    project_id: Some(project.id),
                    event_type: "setup_failed".into(),
                    message: format!("git binary unavailable: {e}"),
                    ..Default::default()
                })
                .await?;
            }
        }
        Ok(())
    }
}
