// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Per-task state store.
//!
//! One JSON record per task under `state/`, read-modify-written through
//! the atomic store. The store enforces no transition table — workflows
//! decide legality — but every transition lands atomically and carries a
//! reason string for the audit trail.

use crate::atomic::{read_safe, write_atomic, StoreError};
use sr_core::{Clock, TaskId, TaskState, TaskStatus};
use std::fs;
use std::path::{Path, PathBuf};

/// Directory-backed store of [`TaskState`] records.
#[derive(Debug, Clone)]
pub struct TaskStateStore<C> {
    dir: PathBuf,
    clock: C,
}

impl<C: Clock> TaskStateStore<C> {
    /// Open (creating if needed) the `state/` directory under `root`.
    pub fn open(root: &Path, clock: C) -> Result<Self, StoreError> {
        let dir = root.join("state");
        fs::create_dir_all(&dir)?;
        Ok(Self { dir, clock })
    }

    pub fn record_path(&self, task_id: &TaskId) -> PathBuf {
        self.dir.join(format!("{}.json", task_id))
    }

    /// Load a task's record. A corrupt record is quarantined by the atomic
    /// layer and reported as absent.
    pub fn load(&self, task_id: &TaskId) -> Option<TaskState> {
        read_safe(&self.record_path(task_id), None)
    }

    /// Read-modify-write. Creates a fresh `Queued` record when none exists.
    pub fn upsert(
        &self,
        task_id: &TaskId,
        mutate: impl FnOnce(&mut TaskState),
    ) -> Result<TaskState, StoreError> {
        let mut state = self
            .load(task_id)
            .unwrap_or_else(|| TaskState::new(task_id.clone(), self.clock.epoch_ms()));
        mutate(&mut state);
        write_atomic(&self.record_path(task_id), &state)?;
        Ok(state)
    }

    /// Persist a state transition with its reason.
    pub fn update_status(
        &self,
        task_id: &TaskId,
        status: TaskStatus,
        reason: impl Into<String>,
    ) -> Result<TaskState, StoreError> {
        let reason = reason.into();
        let epoch_ms = self.clock.epoch_ms();
        let state = self.upsert(task_id, |state| {
            state.set_status(status, reason.clone(), epoch_ms);
        })?;
        tracing::info!(
            task_id = %task_id,
            status = %status,
            reason = %reason,
            "task state transition"
        );
        Ok(state)
    }

    /// All stored records, for restart recovery. Unparsable files are
    /// skipped (and quarantined by the read path).
    pub fn scan(&self) -> Result<Vec<TaskState>, StoreError> {
        let mut states = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            if let Some(state) = read_safe::<Option<TaskState>>(&path, None) {
                states.push(state);
            }
        }
        Ok(states)
    }
}

#[cfg(test)]
#[path = "task_store_tests.rs"]
mod tests;
