// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Checkpoint snapshots and rollback on version-control primitives.
//!
//! Before each risky step the orchestrator records a [`StepCheckpoint`]
//! and an annotated safety tag. On failure the workspace can be hard
//! reset to the checkpoint, or the step can be skipped without touching
//! git. A checkpoint carrying the no-commits sentinel is rejected before
//! any git operation runs.

use crate::progress::{self, WorkflowProgress};
use crate::traits::{VcsError, VcsProvider};
use sr_core::{recovery_tag, short, Clock, RollbackRecord, StepCheckpoint, TaskId};
use sr_storage::{StoreError, TaskStateStore};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RollbackError {
    #[error("invalid checkpoint: {0}")]
    InvalidCheckpoint(String),
    #[error(transparent)]
    Vcs(#[from] VcsError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Tuning for a rollback invocation.
#[derive(Debug, Clone, Copy)]
pub struct RollbackOptions {
    /// Keep untracked files (the default); partial artifacts are cleaned
    /// by path, not by a blanket `git clean`.
    pub preserve_untracked: bool,
}

impl Default for RollbackOptions {
    fn default() -> Self {
        Self { preserve_untracked: true }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RollbackOutcome {
    pub commits_discarded: usize,
    pub cleaned_paths: Vec<PathBuf>,
}

/// Non-destructive listing for user-facing confirmation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RollbackPreview {
    pub commits: Vec<String>,
    pub changed_files: Vec<PathBuf>,
}

pub struct CheckpointRollbackService<C> {
    vcs: Arc<dyn VcsProvider>,
    store: TaskStateStore<C>,
    clock: C,
}

impl<C: Clock> CheckpointRollbackService<C> {
    pub fn new(vcs: Arc<dyn VcsProvider>, store: TaskStateStore<C>, clock: C) -> Self {
        Self { vcs, store, clock }
    }

    /// Snapshot the workspace before a risky step: an annotated safety
    /// tag at HEAD plus a recorded checkpoint.
    ///
    /// A repository with no commits yet yields the sentinel checkpoint
    /// (not an error) and no tag.
    pub async fn snapshot(
        &self,
        workspace: &Path,
        task_id: &TaskId,
        step: u32,
    ) -> Result<StepCheckpoint, RollbackError> {
        let now_ms = self.clock.epoch_ms();
        let checkpoint = match self.vcs.current_commit(workspace).await? {
            Some(commit) => {
                let tag = recovery_tag(task_id.as_str(), step, now_ms);
                self.vcs
                    .create_annotated_tag(
                        workspace,
                        &tag,
                        &format!("checkpoint before step {}", step),
                    )
                    .await?;
                tracing::info!(task_id = %task_id, step, commit = %short(&commit, 12), tag = %tag, "checkpoint recorded");
                StepCheckpoint::new(step, commit, now_ms)
            }
            None => {
                tracing::info!(task_id = %task_id, step, "no commits yet, recording placeholder checkpoint");
                StepCheckpoint::placeholder(step, now_ms)
            }
        };

        let family = TaskId::from_string(task_id.family());
        let recorded = checkpoint.clone();
        self.store.upsert(&family, |s| s.record_checkpoint(recorded))?;
        Ok(checkpoint)
    }

    /// Hard-reset the working tree to `checkpoint` and clean the
    /// discarded step's partial artifacts.
    ///
    /// The sentinel placeholder and unreachable commits are rejected with
    /// [`RollbackError::InvalidCheckpoint`] before any git operation.
    pub async fn rollback(
        &self,
        workspace: &Path,
        task_id: &TaskId,
        checkpoint: &StepCheckpoint,
        opts: &RollbackOptions,
    ) -> Result<RollbackOutcome, RollbackError> {
        if !checkpoint.has_commit() {
            return Err(RollbackError::InvalidCheckpoint(
                "no valid commit to roll back to".to_string(),
            ));
        }
        if !self.vcs.is_reachable(workspace, &checkpoint.git_commit_hash).await? {
            return Err(RollbackError::InvalidCheckpoint(format!(
                "commit {} is not reachable from HEAD",
                short(&checkpoint.git_commit_hash, 12)
            )));
        }

        let now_ms = self.clock.epoch_ms();
        let safety_tag = recovery_tag(task_id.as_str(), checkpoint.step_number, now_ms);
        self.vcs
            .create_annotated_tag(workspace, &safety_tag, "pre-rollback safety tag")
            .await?;

        let discarded = self.vcs.commits_since(workspace, &checkpoint.git_commit_hash).await?;
        self.vcs.hard_reset_to(workspace, &checkpoint.git_commit_hash).await?;
        if !opts.preserve_untracked {
            self.vcs.clean_untracked(workspace).await?;
        }
        let cleaned_paths = clean_step_artifacts(workspace, checkpoint.step_number);

        let record = RollbackRecord {
            step_number: checkpoint.step_number,
            commit: checkpoint.git_commit_hash.clone(),
            commits_discarded: discarded.len(),
            cleaned_paths: cleaned_paths.clone(),
            at_ms: now_ms,
        };
        let family = TaskId::from_string(task_id.family());
        self.store.upsert(&family, |s| s.metadata.last_rollback = Some(record))?;

        tracing::info!(
            task_id = %task_id,
            step = checkpoint.step_number,
            commit = %short(&checkpoint.git_commit_hash, 12),
            commits_discarded = discarded.len(),
            cleaned = cleaned_paths.len(),
            "rolled back workspace"
        );
        Ok(RollbackOutcome { commits_discarded: discarded.len(), cleaned_paths })
    }

    /// What a rollback would discard: commits and changed files since the
    /// checkpoint. Touches nothing.
    pub async fn preview(
        &self,
        workspace: &Path,
        checkpoint: &StepCheckpoint,
    ) -> Result<RollbackPreview, RollbackError> {
        if !checkpoint.has_commit() {
            return Err(RollbackError::InvalidCheckpoint(
                "no valid commit to roll back to".to_string(),
            ));
        }
        let commits = self.vcs.commits_since(workspace, &checkpoint.git_commit_hash).await?;
        let changed_files =
            self.vcs.changed_files_since(workspace, &checkpoint.git_commit_hash).await?;
        Ok(RollbackPreview { commits, changed_files })
    }

    /// Advance past a failed step without rolling back. Git is untouched.
    ///
    /// The workspace progress record is the primary write; the
    /// skipped-step list in the task state is the secondary. A secondary
    /// failure rolls the primary back so the two stay in sync. Idempotent
    /// per step number. Returns the new current step.
    pub async fn skip_step(
        &self,
        workspace: &Path,
        task_id: &TaskId,
        failed_step: u32,
    ) -> Result<u32, RollbackError> {
        let previous = progress::load(workspace);
        let next_step = failed_step + 1;
        let updated = match previous.clone() {
            Some(p) => WorkflowProgress { current_step: p.current_step.max(next_step), ..p },
            None => WorkflowProgress {
                current_step: next_step,
                total_steps: next_step,
                prompt: String::new(),
                client_folder_path: PathBuf::new(),
                branch: String::new(),
                priority: Default::default(),
            },
        };
        progress::store(workspace, &updated)?;

        let family = TaskId::from_string(task_id.family());
        let result = self.store.upsert(&family, |s| {
            if !s.record_skipped_step(failed_step) {
                tracing::debug!(task_id = %task_id, failed_step, "step already recorded as skipped");
            }
        });
        if let Err(e) = result {
            // Keep the two records in sync: undo the primary write.
            match previous {
                Some(p) => progress::store(workspace, &p)?,
                None => progress::remove(workspace).map_err(RollbackError::Io)?,
            }
            return Err(e.into());
        }

        tracing::info!(task_id = %task_id, failed_step, next_step = updated.current_step, "step skipped");
        Ok(updated.current_step)
    }
}

/// Partial artifacts of a discarded step: screenshots, diffs, and agent
/// temp files. Removal is best-effort; failures are logged and the path
/// is left out of the cleaned list.
fn clean_step_artifacts(workspace: &Path, step: u32) -> Vec<PathBuf> {
    let candidates = [
        workspace.join("screenshots").join(format!("step-{}", step)),
        workspace.join("diffs").join(format!("step-{}", step)),
        workspace.join(".agent-tmp"),
    ];
    let mut cleaned = Vec::new();
    for path in candidates {
        if !path.exists() {
            continue;
        }
        let result =
            if path.is_dir() { fs::remove_dir_all(&path) } else { fs::remove_file(&path) };
        match result {
            Ok(()) => cleaned.push(path),
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "failed to clean step artifact");
            }
        }
    }
    cleaned
}

#[cfg(test)]
#[path = "rollback_tests.rs"]
mod tests;
