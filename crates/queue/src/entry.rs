// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Queue entries and their on-disk filename codec.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sr_core::TaskId;
use std::path::PathBuf;

/// Width of the zero-padded sequence prefix in entry filenames.
pub const SEQ_WIDTH: usize = 4;

/// Scheduling priority. `Urgent` is the one manual escape hatch; there is
/// no finer scheduling than (priority, sequence).
///
/// `Urgent` is declared first so the derived ordering sorts urgent entries
/// ahead of normal ones.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Urgent,
    #[default]
    Normal,
}

sr_core::simple_display! {
    Priority {
        Urgent => "urgent",
        Normal => "normal",
    }
}

/// Terminal outcome written into the entry body at completion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", tag = "result")]
pub enum Outcome {
    Succeeded,
    Failed { error: String },
}

/// Input for [`crate::TaskQueue::enqueue`].
#[derive(Debug, Clone)]
pub struct NewTask {
    pub task_id: TaskId,
    pub client_folder_path: PathBuf,
    pub branch: String,
    pub priority: Priority,
    pub payload: serde_json::Value,
    /// Entries with the same key cannot coexist in `queue/` + `running/`.
    pub dedup_key: Option<String>,
}

/// One queue entry, persisted as a single JSON file. External wire format
/// (camelCase), same as the status record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueEntry {
    /// Zero-padded sequence id; establishes FIFO position.
    pub id: String,
    pub task_id: TaskId,
    pub client_folder_path: PathBuf,
    pub branch: String,
    #[serde(default)]
    pub priority: Priority,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub payload: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dedup_key: Option<String>,
    /// Stamped when the entry is relocated into `running/`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub claimed_at_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub outcome: Option<Outcome>,
}

impl QueueEntry {
    pub fn sequence(&self) -> u64 {
        self.id.parse().unwrap_or(0)
    }

    pub fn file_name(&self) -> String {
        file_name(self.sequence(), &self.task_id)
    }
}

/// `<NNNN>_<taskId>` — sequence then identity, so a plain directory
/// listing is FIFO order and human-inspectable.
pub fn file_name(seq: u64, task_id: &TaskId) -> String {
    format!("{:0width$}_{}", seq, task_id, width = SEQ_WIDTH)
}

/// Parse `<NNNN>_<taskId>` back into its parts. Returns `None` for names
/// that are not queue entries — atomic-write temp files and quarantine
/// copies land in the same directories and must never be listed.
pub fn parse_file_name(name: &str) -> Option<(u64, TaskId)> {
    if name.contains(".tmp.") || name.contains(".corrupt.") {
        return None;
    }
    let (seq, task_id) = name.split_once('_')?;
    if task_id.is_empty() {
        return None;
    }
    let seq = seq.parse().ok()?;
    Some((seq, TaskId::from_string(task_id)))
}

#[cfg(test)]
#[path = "entry_tests.rs"]
mod tests;
