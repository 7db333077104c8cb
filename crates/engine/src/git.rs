// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Git implementation of the version-control seam.
//!
//! All operations shell out to the `git` binary through the timeout
//! wrapper and first verify that the target path is itself a repository
//! root, so an agent workspace that lost its `.git` can never leak
//! operations into a parent repository.

use crate::subprocess::{git_command, run_with_timeout, SubprocessError, GIT_TIMEOUT};
use crate::traits::{VcsError, VcsProvider};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Output;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct GitCli {
    timeout: Duration,
}

impl Default for GitCli {
    fn default() -> Self {
        Self { timeout: GIT_TIMEOUT }
    }
}

impl GitCli {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_timeout(timeout: Duration) -> Self {
        Self { timeout }
    }

    async fn run(&self, workspace: &Path, args: &[&str], op: &str) -> Result<Output, VcsError> {
        run_with_timeout(git_command(workspace, args), self.timeout, op).await.map_err(|e| {
            match e {
                SubprocessError::Timeout { secs, .. } => {
                    VcsError::Timeout { op: op.to_string(), secs }
                }
                SubprocessError::Io { source, .. } => VcsError::Io(source),
            }
        })
    }

    async fn run_ok(&self, workspace: &Path, args: &[&str], op: &str) -> Result<Output, VcsError> {
        let output = self.run(workspace, args, op).await?;
        if !output.status.success() {
            return Err(VcsError::Git {
                op: op.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(output)
    }

    /// Refuse to operate unless `workspace` is itself the repository root.
    async fn verify_repo_root(&self, workspace: &Path) -> Result<(), VcsError> {
        let output =
            self.run(workspace, &["rev-parse", "--show-toplevel"], "rev-parse --show-toplevel").await?;
        if !output.status.success() {
            return Err(VcsError::NotARepoRoot(workspace.to_path_buf()));
        }
        let toplevel = PathBuf::from(String::from_utf8_lossy(&output.stdout).trim());
        let workspace = workspace.canonicalize()?;
        let toplevel = toplevel.canonicalize()?;
        if workspace != toplevel {
            // The git context belongs to a parent repository.
            return Err(VcsError::NotARepoRoot(workspace));
        }
        Ok(())
    }
}

fn stdout_lines(output: &Output) -> Vec<String> {
    String::from_utf8_lossy(&output.stdout)
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(str::to_string)
        .collect()
}

#[async_trait]
impl VcsProvider for GitCli {
    async fn ensure_branch(&self, workspace: &Path, branch: &str) -> Result<(), VcsError> {
        self.verify_repo_root(workspace).await?;
        let probe = self
            .run(
                workspace,
                &["rev-parse", "--verify", "--quiet", &format!("refs/heads/{}", branch)],
                "rev-parse branch",
            )
            .await?;
        if probe.status.success() {
            self.run_ok(workspace, &["checkout", branch], "checkout").await?;
        } else {
            self.run_ok(workspace, &["checkout", "-b", branch], "checkout -b").await?;
        }
        Ok(())
    }

    async fn current_commit(&self, workspace: &Path) -> Result<Option<String>, VcsError> {
        self.verify_repo_root(workspace).await?;
        let output =
            self.run(workspace, &["rev-parse", "--verify", "--quiet", "HEAD"], "rev-parse HEAD").await?;
        if !output.status.success() {
            // Unborn HEAD: the repository has no commits yet.
            return Ok(None);
        }
        Ok(stdout_lines(&output).into_iter().next())
    }

    async fn commits_since(
        &self,
        workspace: &Path,
        commit: &str,
    ) -> Result<Vec<String>, VcsError> {
        self.verify_repo_root(workspace).await?;
        let output = self
            .run_ok(workspace, &["rev-list", &format!("{}..HEAD", commit)], "rev-list")
            .await?;
        Ok(stdout_lines(&output))
    }

    async fn changed_files_since(
        &self,
        workspace: &Path,
        commit: &str,
    ) -> Result<Vec<PathBuf>, VcsError> {
        self.verify_repo_root(workspace).await?;
        let output = self
            .run_ok(workspace, &["diff", "--name-only", commit, "HEAD"], "diff --name-only")
            .await?;
        Ok(stdout_lines(&output).into_iter().map(PathBuf::from).collect())
    }

    async fn is_reachable(&self, workspace: &Path, commit: &str) -> Result<bool, VcsError> {
        self.verify_repo_root(workspace).await?;
        let output = self
            .run(workspace, &["merge-base", "--is-ancestor", commit, "HEAD"], "merge-base")
            .await?;
        if output.status.success() {
            return Ok(true);
        }
        // Exit 1 is "not an ancestor"; anything else (unknown object id,
        // corrupt ref) equally means the commit is unusable as a rollback
        // target.
        tracing::debug!(
            commit,
            stderr = %String::from_utf8_lossy(&output.stderr).trim(),
            "commit not reachable"
        );
        Ok(false)
    }

    async fn hard_reset_to(&self, workspace: &Path, commit: &str) -> Result<(), VcsError> {
        self.verify_repo_root(workspace).await?;
        self.run_ok(workspace, &["reset", "--hard", commit], "reset --hard").await?;
        Ok(())
    }

    async fn create_annotated_tag(
        &self,
        workspace: &Path,
        name: &str,
        message: &str,
    ) -> Result<(), VcsError> {
        self.verify_repo_root(workspace).await?;
        self.run_ok(workspace, &["tag", "-a", name, "-m", message], "tag -a").await?;
        Ok(())
    }

    async fn clean_untracked(&self, workspace: &Path) -> Result<(), VcsError> {
        self.verify_repo_root(workspace).await?;
        self.run_ok(workspace, &["clean", "-fd"], "clean -fd").await?;
        Ok(())
    }
}
