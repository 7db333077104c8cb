// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Collaborator seams, injected at construction.
//!
//! The queue, the agent launcher, the workspace provisioner, the
//! version-control provider, and the progress sink are all consumed
//! through these narrow traits; the orchestrator and detector never name
//! a concrete collaborator type.

use async_trait::async_trait;
use sr_core::{AgentFailure, Clock, TaskId};
use sr_queue::{NewTask, QueueEntry, QueueError, QueueSnapshot, StalePolicy, TaskQueue};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Outcome of one agent run, as classified by the completion detector.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    Success,
    /// Terminal failure record, classified for user-facing surfaces.
    Failure(AgentFailure),
    /// Heartbeat went silent while the record still claimed a live state.
    HeartbeatTimeout { age_ms: u64 },
    /// Wall-clock max wait elapsed since detection start.
    TimedOut,
}

impl RunOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, RunOutcome::Success)
    }

    /// User-facing message for failure surfaces; the raw diagnostic stays
    /// in logs. Success has none.
    pub fn user_message(&self) -> Option<String> {
        match self {
            RunOutcome::Success => None,
            RunOutcome::Failure(failure) => Some(failure.user_message()),
            RunOutcome::HeartbeatTimeout { age_ms } => Some(format!(
                "Agent process appears hung — no heartbeat for {}s",
                age_ms / 1000
            )),
            RunOutcome::TimedOut => {
                Some("Agent run exceeded the maximum wait time".to_string())
            }
        }
    }
}

/// Narrow queue seam consumed by the orchestrator.
pub trait QueueHandle: Send + Sync {
    fn enqueue(&self, task: NewTask) -> Result<QueueEntry, QueueError>;
    fn claim_next(&self) -> Result<Option<QueueEntry>, QueueError>;
    fn complete(
        &self,
        task_id: &TaskId,
        success: bool,
        error: Option<String>,
    ) -> Result<(), QueueError>;
    fn detect_stale(&self, ttl: Duration, policy: StalePolicy)
        -> Result<Vec<TaskId>, QueueError>;
    fn prune(&self, keep: usize) -> Result<usize, QueueError>;
    fn publish_snapshot(&self, status_dir: &Path) -> Result<QueueSnapshot, QueueError>;
}

impl<C: Clock> QueueHandle for TaskQueue<C> {
    fn enqueue(&self, task: NewTask) -> Result<QueueEntry, QueueError> {
        TaskQueue::enqueue(self, task)
    }

    fn claim_next(&self) -> Result<Option<QueueEntry>, QueueError> {
        TaskQueue::claim_next(self)
    }

    fn complete(
        &self,
        task_id: &TaskId,
        success: bool,
        error: Option<String>,
    ) -> Result<(), QueueError> {
        TaskQueue::complete(self, task_id, success, error)
    }

    fn detect_stale(
        &self,
        ttl: Duration,
        policy: StalePolicy,
    ) -> Result<Vec<TaskId>, QueueError> {
        TaskQueue::detect_stale(self, ttl, policy)
    }

    fn prune(&self, keep: usize) -> Result<usize, QueueError> {
        TaskQueue::prune(self, keep)
    }

    fn publish_snapshot(&self, status_dir: &Path) -> Result<QueueSnapshot, QueueError> {
        TaskQueue::publish_snapshot(self, status_dir)
    }
}

#[derive(Debug, Error)]
#[error("agent launch failed: {0}")]
pub struct LaunchError(pub String);

/// Handle to a launched agent process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LaunchedAgent {
    pub pid: u32,
}

/// Starts the headless agent for one run.
///
/// The launcher owns the child process and the status record it writes;
/// completion is observed through that record by the detector, with the
/// launcher's exit callback feeding the same completion channel as a
/// fallback signal.
#[async_trait]
pub trait AgentLauncher: Send + Sync {
    async fn launch(
        &self,
        task_id: &TaskId,
        workspace: &Path,
        prompt: &str,
        env: HashMap<String, String>,
    ) -> Result<LaunchedAgent, LaunchError>;
}

#[derive(Debug, Error)]
#[error("workspace provisioning failed: {0}")]
pub struct ProvisionError(pub String);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreparedWorkspace {
    pub workspace_path: PathBuf,
    /// Commit the workspace starts from, when it is version-controlled.
    pub base_commit: Option<String>,
}

/// Materializes the working copy an agent run mutates.
#[async_trait]
pub trait WorkspaceProvisioner: Send + Sync {
    async fn prepare(&self, entry: &QueueEntry) -> Result<PreparedWorkspace, ProvisionError>;
}

#[derive(Debug, Error)]
#[error("progress report failed: {0}")]
pub struct ProgressError(pub String);

/// Step-boundary reporting to the external task source and publishing
/// systems. Consumed only at workflow step boundaries; not part of the
/// core.
#[async_trait]
pub trait ProgressSink: Send + Sync {
    async fn step_completed(
        &self,
        task_id: &TaskId,
        step: u32,
        total_steps: u32,
    ) -> Result<(), ProgressError>;
    async fn workflow_completed(&self, task_id: &TaskId) -> Result<(), ProgressError>;
    async fn workflow_failed(&self, task_id: &TaskId, message: &str)
        -> Result<(), ProgressError>;
}

/// Receiver of classified run completions (the workflow continuation).
#[async_trait]
pub trait CompletionNotifier: Send + Sync {
    async fn on_run_complete(&self, task_id: TaskId, outcome: RunOutcome);
}

/// Late-bound forwarder breaking the detector/orchestrator construction
/// cycle: the detector is built against the relay, the orchestrator is
/// built against the detector, then [`CompletionRelay::bind`] points the
/// relay at the orchestrator.
#[derive(Clone, Default)]
pub struct CompletionRelay {
    target: Arc<parking_lot::Mutex<Option<Arc<dyn CompletionNotifier>>>>,
}

impl CompletionRelay {
    pub fn bind(&self, notifier: Arc<dyn CompletionNotifier>) {
        *self.target.lock() = Some(notifier);
    }
}

#[async_trait]
impl CompletionNotifier for CompletionRelay {
    async fn on_run_complete(&self, task_id: TaskId, outcome: RunOutcome) {
        let target = self.target.lock().clone();
        match target {
            Some(notifier) => notifier.on_run_complete(task_id, outcome).await,
            None => {
                tracing::warn!(task_id = %task_id, "completion signal before relay was bound, dropped")
            }
        }
    }
}

#[derive(Debug, Error)]
pub enum VcsError {
    #[error("{0} is not a repository root")]
    NotARepoRoot(PathBuf),
    #[error("git {op} failed: {stderr}")]
    Git { op: String, stderr: String },
    #[error("git {op} timed out after {secs}s")]
    Timeout { op: String, secs: u64 },
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Version-control operations scoped to a single working copy.
///
/// Implementations must refuse to operate when the target path is not
/// itself a repository root — a parent repository does not count.
#[async_trait]
pub trait VcsProvider: Send + Sync {
    /// Check out `branch`, creating it at HEAD if it does not exist.
    async fn ensure_branch(&self, workspace: &Path, branch: &str) -> Result<(), VcsError>;
    /// Current HEAD commit; `None` for a repository with no commits yet.
    async fn current_commit(&self, workspace: &Path) -> Result<Option<String>, VcsError>;
    /// Commit hashes strictly after `commit`, newest first.
    async fn commits_since(&self, workspace: &Path, commit: &str)
        -> Result<Vec<String>, VcsError>;
    async fn changed_files_since(
        &self,
        workspace: &Path,
        commit: &str,
    ) -> Result<Vec<PathBuf>, VcsError>;
    /// Whether `commit` is an ancestor of (or equal to) HEAD.
    async fn is_reachable(&self, workspace: &Path, commit: &str) -> Result<bool, VcsError>;
    async fn hard_reset_to(&self, workspace: &Path, commit: &str) -> Result<(), VcsError>;
    async fn create_annotated_tag(
        &self,
        workspace: &Path,
        name: &str,
        message: &str,
    ) -> Result<(), VcsError>;
    async fn clean_untracked(&self, workspace: &Path) -> Result<(), VcsError>;
}

#[cfg(test)]
#[path = "traits_tests.rs"]
mod tests;
