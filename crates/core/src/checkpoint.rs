// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Checkpoint and rollback records.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Placeholder commit hash recorded when a repository has no commits yet.
///
/// Rollback operations must reject this sentinel with a descriptive error
/// instead of attempting any git operation on it.
pub const NO_COMMITS_YET: &str = "NO_COMMITS_YET";

/// A recorded commit position safe to roll back to, taken before each
/// risky workflow step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepCheckpoint {
    pub step_number: u32,
    pub git_commit_hash: String,
    pub timestamp_ms: u64,
}

impl StepCheckpoint {
    pub fn new(step_number: u32, git_commit_hash: impl Into<String>, timestamp_ms: u64) -> Self {
        Self { step_number, git_commit_hash: git_commit_hash.into(), timestamp_ms }
    }

    /// Sentinel checkpoint for a repository with no commits yet.
    pub fn placeholder(step_number: u32, timestamp_ms: u64) -> Self {
        Self::new(step_number, NO_COMMITS_YET, timestamp_ms)
    }

    /// Whether this checkpoint points at an actual commit (vs the sentinel).
    pub fn has_commit(&self) -> bool {
        !self.git_commit_hash.is_empty() && self.git_commit_hash != NO_COMMITS_YET
    }
}

/// Safety-tag name created before risky git operations:
/// `recovery-<taskId>-step<N>-<unixMillis>`.
pub fn recovery_tag(task_id: &str, step: u32, epoch_ms: u64) -> String {
    format!("recovery-{}-step{}-{}", task_id, step, epoch_ms)
}

/// Record of the most recent rollback applied to a task's workspace.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RollbackRecord {
    pub step_number: u32,
    /// Commit the working tree was reset to.
    pub commit: String,
    pub commits_discarded: usize,
    #[serde(default)]
    pub cleaned_paths: Vec<PathBuf>,
    pub at_ms: u64,
}

#[cfg(test)]
#[path = "checkpoint_tests.rs"]
mod tests;
