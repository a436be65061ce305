//! Self-update collaborator: synchronizes the working copy with its
//! remote through the git CLI and restarts the running process.

use std::path::PathBuf;

use chrono::DateTime;
use tokio::process::Command;
use tracing::info;
use verdacam_types::{Result, VerdacamError};

/// Generate an error aligned with updater semantics.
pub fn updater_error(message: impl Into<String>) -> VerdacamError {
    VerdacamError::Updater(message.into())
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepoStatus {
    pub branch: String,
    pub last_commit_date: String,
}

pub struct UpdaterService {
    repo_root: PathBuf,
    remote_name: String,
    main_branch: String,
}

impl UpdaterService {
    pub fn new(
        repo_root: impl Into<PathBuf>,
        remote_name: impl Into<String>,
        main_branch: impl Into<String>,
    ) -> Self {
        Self {
            repo_root: repo_root.into(),
            remote_name: remote_name.into(),
            main_branch: main_branch.into(),
        }
    }

    async fn run_git(&self, args: &[&str]) -> Result<String> {
        let output = Command::new("git")
            .args(args)
            .current_dir(&self.repo_root)
            .output()
            .await
            .map_err(|err| updater_error(format!("failed to run git {:?}: {err}", args)))?;
        if output.status.success() {
            Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
        } else {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            Err(updater_error(if stderr.is_empty() {
                "git command failed".to_string()
            } else {
                stderr
            }))
        }
    }

    async fn candidate_branches(&self) -> Result<Vec<String>> {
        let remote_raw = self
            .run_git(&["branch", "-r", "--format=%(refname:short)"])
            .await?;
        Ok(parse_candidate_branches(
            &remote_raw,
            &self.remote_name,
            &self.main_branch,
        ))
    }

    async fn remote_branch_exists(&self, branch_name: &str) -> Result<bool> {
        let refs = self
            .run_git(&["ls-remote", "--heads", &self.remote_name, branch_name])
            .await?;
        Ok(!refs.is_empty())
    }

    pub async fn get_status(&self) -> Result<RepoStatus> {
        let branch = self.run_git(&["rev-parse", "--abbrev-ref", "HEAD"]).await?;
        let commit_iso = self.run_git(&["log", "-1", "--format=%cI"]).await?;
        let last_commit_date = DateTime::parse_from_rfc3339(&commit_iso)
            .map(|date| date.format("%Y-%m-%d %H:%M:%S %z").to_string())
            .unwrap_or(commit_iso);
        Ok(RepoStatus {
            branch,
            last_commit_date,
        })
    }

    /// Hard-syncs the working copy to the selected remote branch and
    /// discards any local drift.
    pub async fn update_repo(&self) -> Result<RepoStatus> {
        self.run_git(&["fetch", "--all", "--prune"]).await?;
        let current = self.run_git(&["rev-parse", "--abbrev-ref", "HEAD"]).await?;
        let candidates = self.candidate_branches().await?;
        let has_remote = self.remote_branch_exists(&current).await?;
        let target = select_update_branch(&current, &self.main_branch, &candidates, has_remote);

        if self.remote_branch_exists(&target).await? {
            let tracking = format!("{}/{target}", self.remote_name);
            self.run_git(&["checkout", "-B", &target, &tracking]).await?;
            self.run_git(&["reset", "--hard", &tracking]).await?;
        } else {
            self.run_git(&["checkout", "-f", &target]).await?;
            self.run_git(&["reset", "--hard", "HEAD"]).await?;
        }

        self.run_git(&["clean", "-fd"]).await?;
        info!("update completed on branch {target}");
        self.get_status().await
    }
}

/// Remote branches that qualify as update targets: everything under the
/// remote except HEAD, the main branch, and a bare remote alias.
pub fn parse_candidate_branches(
    remote_raw: &str,
    remote_name: &str,
    main_branch: &str,
) -> Vec<String> {
    let prefix = format!("{remote_name}/");
    let mut names: Vec<String> = Vec::new();
    for raw_ref in remote_raw.lines() {
        let clean = raw_ref.trim();
        if clean.is_empty() || clean.ends_with("/HEAD") || !clean.starts_with(&prefix) {
            continue;
        }
        let branch_name = &clean[prefix.len()..];
        if branch_name.is_empty() || branch_name == main_branch || branch_name == remote_name {
            continue;
        }
        if names.iter().any(|name| name == branch_name) {
            continue;
        }
        names.push(branch_name.to_string());
    }
    names.sort();
    names
}

/// A feature branch with a remote counterpart updates in place; one
/// without falls back to main; from main (or a detached HEAD) the first
/// candidate wins, then main.
pub fn select_update_branch(
    current_branch: &str,
    main_branch: &str,
    candidates: &[String],
    has_remote: bool,
) -> String {
    let on_feature_branch = current_branch != main_branch && current_branch != "HEAD";
    if on_feature_branch {
        return if has_remote {
            current_branch.to_string()
        } else {
            main_branch.to_string()
        };
    }
    match candidates.first() {
        Some(first) => first.clone(),
        None => main_branch.to_string(),
    }
}

/// Replaces the current process image with a fresh copy of this binary,
/// preserving the original arguments. Returns only on failure.
#[cfg(unix)]
pub fn restart_process() -> Result<()> {
    use std::os::unix::process::CommandExt;
    let exe = std::env::current_exe()
        .map_err(|err| updater_error(format!("cannot locate current executable: {err}")))?;
    let err = std::process::Command::new(exe)
        .args(std::env::args_os().skip(1))
        .exec();
    Err(updater_error(format!("failed to restart process: {err}")))
}

#[cfg(not(unix))]
pub fn restart_process() -> Result<()> {
    Err(updater_error("process restart is only supported on unix"))
}
