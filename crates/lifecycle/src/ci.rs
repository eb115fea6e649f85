// SPDX-License-Identifier: MIT

//! `CiHost` (§9 open question): pushes a branch, opens a PR/MR, and triggers
//! CI by shelling out to the configured host CLI — `gh` for GitHub, `glab`
//! for GitLab — mirroring the teacher's general preference for shelling out
//! to host CLIs (`engine::workspace_fs`) over hand-rolled REST clients. A
//! narrow trait keeps a future REST-based implementation a pure adapter swap.

use async_trait::async_trait;
use std::path::Path;

#[derive(Debug, Clone)]
pub struct PrOutcome {
    pub pushed: bool,
    pub pr_url: Option<String>,
    pub ci_triggered: bool,
}

#[async_trait]
pub trait CiHost: Send + Sync {
    async fn push_branch(&self, repo_path: &Path, branch: &str) -> Result<(), String>;

    async fn open_pr(&self, repo_path: &Path, branch: &str, base_branch: &str, title: &str) -> Result<String, String>;

    async fn trigger_ci(&self, repo_path: &Path, branch: &str) -> Result<(), String>;
}

/// Shells out to `git push` then `gh pr create` (falling back to `glab mr
/// create` when `gh` is not on `PATH`). CI is whatever the host's default
/// push/PR-open hooks trigger; this adapter does not poll for a run id.
pub struct ShellCiHost;

async fn run(program: &str, args: &[&str], cwd: &Path) -> Result<String, String> {
    let output = tokio::process::Command::new(program)
        .args(args)
        .current_dir(cwd)
        .output()
        .await
        .map_err(|e| format!("{program} unavailable: {e}"))?;
    if output.status.success() {
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    } else {
        Err(String::from_utf8_lossy(&output.stderr).trim().to_string())
    }
}

#[async_trait]
impl CiHost for ShellCiHost {
    async fn push_branch(&self, repo_path: &Path, branch: &str) -> Result<(), String> {
        run("git", &["push", "-u", "origin", branch], repo_path).await.map(|_| ())
    }

    async fn open_pr(&self, repo_path: &Path, branch: &str, base_branch: &str, title: &str) -> Result<String, String> {
        let gh_args = ["pr", "create", "--head", branch, "--base", base_branch, "--title", title, "--fill"];
        match run("gh", &gh_args, repo_path).await {
            Ok(url) => Ok(url),
            Err(gh_err) => {
                let glab_args = ["mr", "create", "--source-branch", branch, "--target-branch", base_branch, "--title", title];
                run("glab", &glab_args, repo_path).await.map_err(|glab_err| format!("gh: {gh_err}; glab: {glab_err}"))
            }
        }
    }

    async fn trigger_ci(&self, repo_path: &Path, branch: &str) -> Result<(), String> {
        run("gh", &["workflow", "run", "--ref", branch], repo_path).await.map(|_| ())
    }
}
