// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Per-workspace workflow progress record.
//!
//! Primary record for step advancement: written before each launch,
//! consulted by the continuation to decide the next step, and the first
//! thing `skip_step` updates (rolled back if the secondary task-state
//! write fails). Carries the launch parameters subsequent steps reuse.

use serde::{Deserialize, Serialize};
use sr_queue::Priority;
use sr_storage::{read_safe, write_atomic, StoreError};
use std::path::{Path, PathBuf};

pub const PROGRESS_FILE_NAME: &str = ".workflow-progress.json";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowProgress {
    pub current_step: u32,
    pub total_steps: u32,
    #[serde(default)]
    pub prompt: String,
    #[serde(default)]
    pub client_folder_path: PathBuf,
    #[serde(default)]
    pub branch: String,
    #[serde(default)]
    pub priority: Priority,
}

impl WorkflowProgress {
    pub fn is_multi_step(&self) -> bool {
        self.total_steps > 1
    }

    pub fn is_final_step(&self) -> bool {
        self.current_step >= self.total_steps
    }
}

pub fn load(workspace: &Path) -> Option<WorkflowProgress> {
    read_safe(&workspace.join(PROGRESS_FILE_NAME), None)
}

pub fn store(workspace: &Path, progress: &WorkflowProgress) -> Result<(), StoreError> {
    write_atomic(&workspace.join(PROGRESS_FILE_NAME), progress)
}

/// Remove the record, tolerating its absence.
pub fn remove(workspace: &Path) -> std::io::Result<()> {
    match std::fs::remove_file(workspace.join(PROGRESS_FILE_NAME)) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}
