// SPDX-License-Identifier: MIT

//! Worktree provisioning for `plan_protocol_job` (§4.H step 2). Grounded in
//! the teacher's `engine::workspace_fs::create_worktree` — shell out to
//! `git worktree add`, surface failures as text rather than typed errors
//! since the caller degrades to a stub path instead of failing the job.

use std::path::{Path, PathBuf};

/// Result of provisioning a protocol's worktree: the path to use either way,
/// plus a warning message if git/the repo was unavailable (§4.H step 2:
/// "record the gap as a warning and keep a stub path").
pub struct WorktreeOutcome {
    pub path: PathBuf,
    pub warning: Option<String>,
}

/// `<project.local_path>/../worktrees/<protocol_name>` per §6's persisted
/// filesystem layout. A pure function of the project and protocol name, so
/// later jobs recompute it instead of the `ProtocolRun` row carrying it.
pub fn resolve_worktree_path(local_path: Option<&str>, protocol_name: &str) -> PathBuf {
    match local_path {
        Some(local_path) => Path::new(local_path).join("..").join("worktrees").join(protocol_name),
        None => PathBuf::from("worktrees").join(protocol_name),
    }
}

/// `<worktree>/.protocols/<protocol_name>`: the root that holds a protocol's
/// plan, context, step prompts, and outputs (§6).
pub fn protocol_root(local_path: Option<&str>, protocol_name: &str) -> PathBuf {
    resolve_worktree_path(local_path, protocol_name).join(".protocols").join(protocol_name)
}

pub async fn ensure_worktree(local_path: Option<&str>, branch: &str) -> WorktreeOutcome {
    let Some(local_path) = local_path else {
        return WorktreeOutcome {
            path: resolve_worktree_path(None, branch),
            warning: Some("project has no local_path; using a stub worktree path".to_string()),
        };
    };
    let target = resolve_worktree_path(Some(local_path), branch);
    let local_path = Path::new(local_path);

    if !local_path.exists() {
        return WorktreeOutcome {
            path: target,
            warning: Some(format!("repo not present at {}; using a stub worktree path", local_path.display())),
        };
    }

    if let Some(parent) = target.parent() {
        if let Err(e) = tokio::fs::create_dir_all(parent).await {
            return WorktreeOutcome { path: target, warning: Some(format!("cannot create worktree parent dir: {e}")) };
        }
    }

    if target.exists() {
        return WorktreeOutcome { path: target, warning: None };
    }

    let mut cmd = tokio::process::Command::new("git");
    cmd.args(["-C", &local_path.display().to_string(), "worktree", "add", "-b", branch, &target.display().to_string()])
        .env_remove("GIT_DIR")
        .env_remove("GIT_WORK_TREE");

    match cmd.output().await {
        Ok(output) if output.status.success() => WorktreeOutcome { path: target, warning: None },
        Ok(output) => {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            WorktreeOutcome { path: target, warning: Some(format!("git worktree add failed: {stderr}")) }
        }
        Err(e) => WorktreeOutcome { path: target, warning: Some(format!("git binary unavailable: {e}")) },
    }
}
