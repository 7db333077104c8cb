// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Live status record written by the external agent launcher.
//!
//! One current file per workspace, overwritten per run. The orchestrator
//! resets it between steps so a prior step's terminal state can never be
//! mistaken for the new step's.

use crate::id::TaskId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Name of the per-workspace status file.
pub const STATUS_FILE_NAME: &str = ".agent-status.json";

/// Run state as reported by the launcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunState {
    Starting,
    Running,
    Done,
    Failed,
}

impl RunState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, RunState::Done | RunState::Failed)
    }

    /// Starting/running — states whose liveness the heartbeat proves.
    pub fn is_live(&self) -> bool {
        matches!(self, RunState::Starting | RunState::Running)
    }
}

crate::simple_display! {
    RunState {
        Starting => "starting",
        Running => "running",
        Done => "done",
        Failed => "failed",
    }
}

/// Status snapshot for one agent run. External wire format (camelCase).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusRecord {
    pub task_id: TaskId,
    pub state: RunState,
    #[serde(default)]
    pub percent: f64,
    #[serde(default)]
    pub step: String,
    pub last_heartbeat: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pid: Option<u32>,
    #[serde(default)]
    pub exit_code: Option<i32>,
    #[serde(default)]
    pub error: Option<String>,
}

impl StatusRecord {
    /// Fresh `starting` record carrying the run identity. Written by the
    /// orchestrator before each launch so stale terminal records cannot
    /// satisfy the new step.
    pub fn reset(task_id: TaskId, now: DateTime<Utc>) -> Self {
        Self {
            task_id,
            state: RunState::Starting,
            percent: 0.0,
            step: String::new(),
            last_heartbeat: now,
            pid: None,
            exit_code: None,
            error: None,
        }
    }

    /// The identity check: a record only counts for the run it names.
    pub fn is_for(&self, task_id: &TaskId) -> bool {
        self.task_id == *task_id
    }

    /// Milliseconds since the last heartbeat (saturating at zero for
    /// heartbeats in the future, e.g. across clock skew).
    pub fn heartbeat_age_ms(&self, now_ms: u64) -> u64 {
        let hb = self.last_heartbeat.timestamp_millis().max(0) as u64;
        now_ms.saturating_sub(hb)
    }
}

#[cfg(test)]
#[path = "status_tests.rs"]
mod tests;
