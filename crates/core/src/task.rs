// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Per-task persisted state machine record.

use crate::checkpoint::{RollbackRecord, StepCheckpoint};
use crate::id::TaskId;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Lifecycle state of a task.
///
/// Transitions are decided by workflows, not enforced here; every
/// transition is persisted atomically together with a human-readable
/// reason for the audit trail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskStatus {
    Queued,
    InProgress,
    AwaitingApproval,
    Testing,
    Completed,
    Error,
    Failed,
}

impl TaskStatus {
    /// Terminal for this run. A terminal task may still be re-queued
    /// manually, producing a fresh queue entry under the same identity.
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Error | TaskStatus::Failed)
    }
}

crate::simple_display! {
    TaskStatus {
        Queued => "queued",
        InProgress => "in_progress",
        AwaitingApproval => "awaiting_approval",
        Testing => "testing",
        Completed => "completed",
        Error => "error",
        Failed => "failed",
    }
}

/// Checkpoint history and rollback bookkeeping for one task.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskMetadata {
    #[serde(default)]
    pub checkpoints: Vec<StepCheckpoint>,
    #[serde(default)]
    pub skipped_steps: Vec<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_rollback: Option<RollbackRecord>,
}

impl TaskMetadata {
    /// Checkpoint recorded for the given step, if any.
    pub fn checkpoint_for_step(&self, step: u32) -> Option<&StepCheckpoint> {
        self.checkpoints.iter().rev().find(|c| c.step_number == step)
    }
}

/// Detection timestamps maintained by the completion detector.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentCompletion {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detection_started_at_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_checked_at_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completion_detected_at_ms: Option<u64>,
}

impl AgentCompletion {
    /// Whether a completion has already been recorded for the current
    /// detection session.
    pub fn is_complete(&self) -> bool {
        self.completion_detected_at_ms.is_some()
    }
}

/// Persisted state-machine record for one task.
///
/// Outlives individual queue entries: a task may be enqueued once per
/// workflow step while one `TaskState` persists across all of them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskState {
    pub task_id: TaskId,
    pub status: TaskStatus,
    /// Why the last transition happened (audit trail).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_reason: Option<String>,
    #[serde(default)]
    pub updated_at_ms: u64,
    #[serde(default)]
    pub metadata: TaskMetadata,
    #[serde(default)]
    pub agent_completion: AgentCompletion,
    /// Workspace the current run executes in. Set at launch; restart
    /// recovery polls here.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workspace_path: Option<PathBuf>,
    /// Step number the task failed on, when status is ERROR/FAILED.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failed_step: Option<u32>,
}

impl TaskState {
    /// Fresh record in `Queued` state.
    pub fn new(task_id: TaskId, epoch_ms: u64) -> Self {
        Self {
            task_id,
            status: TaskStatus::Queued,
            status_reason: None,
            updated_at_ms: epoch_ms,
            metadata: TaskMetadata::default(),
            agent_completion: AgentCompletion::default(),
            workspace_path: None,
            failed_step: None,
        }
    }

    /// Apply a transition, carrying its reason.
    pub fn set_status(&mut self, status: TaskStatus, reason: impl Into<String>, epoch_ms: u64) {
        self.status = status;
        self.status_reason = Some(reason.into());
        self.updated_at_ms = epoch_ms;
    }

    /// Record a skipped step. Idempotent: returns false when the step was
    /// already in the list.
    pub fn record_skipped_step(&mut self, step: u32) -> bool {
        if self.metadata.skipped_steps.contains(&step) {
            return false;
        }
        self.metadata.skipped_steps.push(step);
        true
    }

    /// Record a checkpoint taken before a step.
    pub fn record_checkpoint(&mut self, checkpoint: StepCheckpoint) {
        self.metadata.checkpoints.push(checkpoint);
    }

    /// Reset detection bookkeeping for a new polling session.
    pub fn begin_detection(&mut self, epoch_ms: u64) {
        self.agent_completion = AgentCompletion {
            detection_started_at_ms: Some(epoch_ms),
            last_checked_at_ms: None,
            completion_detected_at_ms: None,
        };
    }
}

crate::builder! {
    pub struct TaskStateBuilder => TaskState {
        into {
            task_id: TaskId = "task-1",
        }
        set {
            status: TaskStatus = TaskStatus::Queued,
            updated_at_ms: u64 = 0,
            metadata: TaskMetadata = TaskMetadata::default(),
            agent_completion: AgentCompletion = AgentCompletion::default(),
        }
        option {
            status_reason: String = None,
            workspace_path: PathBuf = None,
            failed_step: u32 = None,
        }
    }
}

#[cfg(test)]
#[path = "task_tests.rs"]
mod tests;
