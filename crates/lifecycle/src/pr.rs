// SPDX-License-Identifier: MIT

//! `open_pr_job` (§4.H): opens a PR/MR for a planned protocol's branch and
//! triggers CI. Best-effort — a host outage here should not fail the
//! protocol run, since the branch is already pushed and the work is not
//! lost, only the PR bookkeeping.

use crate::LifecycleController;
use forge_core::{CoreResult, NewEvent, ProtocolRunId};
use std::path::Path;

impl LifecycleController {
    pub async fn open_pr_job(&self, protocol_run_id: ProtocolRunId) -> CoreResult<()> {
        let run = self.store.get_protocol_run(protocol_run_id).await?;
        let project = self.store.get_project(run.project_id).await?;

        let Some(local_path) = project.local_path.as_deref() else {
            return self
                .emit(NewEvent {
                    protocol_run_id: Some(run.id),
                    project_id: Some(project.id),
                    event_type: "open_pr_skipped".into(),
                    message: "project has no local_path; cannot open a pr".into(),
                    ..Default::default()
                })
                .await
                .map(|_| ());
        };
        let repo_path = Path::new(local_path);
        let title = format!("{}: automated protocol run", run.protocol_name);

        match self.ci_host.open_pr(repo_path, &run.protocol_name, &run.base_branch, &title).await {
            Ok(pr_url) => {
                self.emit(NewEvent {
                    protocol_run_id: Some(run.id),
                    project_id: Some(project.id),
                    event_type: "pr_opened".into(),
                    message: format!("opened pr for {}: {pr_url}", run.protocol_name),
                    metadata: Some(serde_json::json!({"pr_url": pr_url})),
                    ..Default::default()
                })
                .await?;
            }
            Err(e) => {
                self.emit(NewEvent {
                    protocol_run_id: Some(run.id),
                    project_id: Some(project.id),
                    event_type: "open_pr_failed".into(),
                    message: format!("could not open pr for {}: {e}", run.protocol_name),
                    ..Default::default()
                })
                .await?;
                return Ok(());
            }
        }

        if let Err(e) = self.ci_host.trigger_ci(repo_path, &run.protocol_name).await {
            self.emit(NewEvent {
                protocol_run_id: Some(run.id),
                project_id: Some(project.id),
                event_type: "ci_trigger_failed".into(),
                message: format!("could not trigger ci for {}: {e}", run.protocol_name),
                ..Default::default()
            })
            .await?;
        }

        Ok(())
    }
}
