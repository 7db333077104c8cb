// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Directory-based FIFO task queue.
//!
//! Four sibling directories under one root: `queue/`, `running/`, `done/`,
//! `failed/`. An entry is one JSON file whose name encodes (sequence,
//! task id); claiming is an atomic rename into `running/`, which is what
//! makes claims safe across processes sharing the filesystem. All four
//! directories must live on one device so rename never degrades to
//! copy+delete — validated at open.

use crate::entry::{file_name, parse_file_name, NewTask, Outcome, Priority, QueueEntry, SEQ_WIDTH};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sr_core::{Clock, TaskId};
use sr_storage::{read_safe, write_atomic, write_atomic_staged, LockError, LockOptions, StoreError};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

pub const PENDING_DIR: &str = "queue";
pub const RUNNING_DIR: &str = "running";
pub const DONE_DIR: &str = "done";
pub const FAILED_DIR: &str = "failed";

/// Errors from queue operations.
#[derive(Debug, Error)]
pub enum QueueError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Lock(#[from] LockError),
    #[error("payload of {size} bytes exceeds the {max} byte cap")]
    SizeExceeded { size: usize, max: usize },
    #[error("queue already holds {pending} pending entries (cap {max})")]
    PendingLimit { pending: usize, max: usize },
    #[error("an entry with dedup key '{0}' is already pending or running")]
    Duplicate(String),
    #[error("queue directories span devices; renames would not be atomic")]
    CrossDevice,
    #[error("no queue entry for task '{0}' in {1}/")]
    NotFound(TaskId, &'static str),
    #[error("payload serialization: {0}")]
    Payload(#[from] serde_json::Error),
}

/// What `detect_stale` does with an expired running entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StalePolicy {
    /// Move to `failed/`. The default: a requeue without a fresh workspace
    /// risks double-applied work.
    Fail,
    /// Re-enqueue under a fresh sequence number.
    Requeue,
}

/// Tuning for a queue instance.
#[derive(Debug, Clone, Copy)]
pub struct QueueOptions {
    /// Hard cap on the serialized payload of one entry.
    pub max_payload_bytes: usize,
    /// Cap on entries waiting in `queue/`.
    pub max_pending: usize,
    /// Lock tuning for the enqueue sequence-allocation critical section.
    pub lock: LockOptions,
}

impl Default for QueueOptions {
    fn default() -> Self {
        Self { max_payload_bytes: 1024 * 1024, max_pending: 100, lock: LockOptions::default() }
    }
}

/// Summary of one entry, for the dashboard snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntrySummary {
    pub id: String,
    pub task_id: TaskId,
    pub priority: Priority,
    pub created_at: DateTime<Utc>,
}

impl From<&QueueEntry> for EntrySummary {
    fn from(entry: &QueueEntry) -> Self {
        Self {
            id: entry.id.clone(),
            task_id: entry.task_id.clone(),
            priority: entry.priority,
            created_at: entry.created_at,
        }
    }
}

/// Point-in-time view of all four directories.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueSnapshot {
    pub pending: Vec<EntrySummary>,
    pub running: Vec<EntrySummary>,
    pub done: usize,
    pub failed: usize,
    pub generated_at: DateTime<Utc>,
}

/// The filesystem-backed FIFO queue.
#[derive(Debug, Clone)]
pub struct TaskQueue<C> {
    root: PathBuf,
    opts: QueueOptions,
    clock: C,
}

impl<C: Clock> TaskQueue<C> {
    /// Open (creating if needed) the queue directories under `root` and
    /// validate the same-filesystem precondition.
    pub fn open(root: &Path, opts: QueueOptions, clock: C) -> Result<Self, QueueError> {
        for dir in [PENDING_DIR, RUNNING_DIR, DONE_DIR, FAILED_DIR] {
            fs::create_dir_all(root.join(dir))?;
        }
        let queue = Self { root: root.to_path_buf(), opts, clock };
        queue.verify_same_device()?;
        Ok(queue)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn dir(&self, name: &str) -> PathBuf {
        self.root.join(name)
    }

    #[cfg(unix)]
    fn verify_same_device(&self) -> Result<(), QueueError> {
        use std::os::unix::fs::MetadataExt;
        let root_dev = fs::metadata(&self.root)?.dev();
        for dir in [PENDING_DIR, RUNNING_DIR, DONE_DIR, FAILED_DIR] {
            let dev = fs::metadata(self.dir(dir))?.dev();
            if dev != root_dev {
                tracing::error!(dir, "queue directory is on a different device");
                return Err(QueueError::CrossDevice);
            }
        }
        Ok(())
    }

    #[cfg(not(unix))]
    fn verify_same_device(&self) -> Result<(), QueueError> {
        Ok(())
    }

    /// Append a task to the pending queue.
    ///
    /// Sequence allocation is serialized across processes by a short-lived
    /// file lock; the entry file itself is published with `create_new`, so
    /// the unique filename is the atomic action and a create conflict just
    /// retries with the next free number.
    pub fn enqueue(&self, task: NewTask) -> Result<QueueEntry, QueueError> {
        let payload_size = serde_json::to_vec(&task.payload)?.len();
        if payload_size > self.opts.max_payload_bytes {
            return Err(QueueError::SizeExceeded {
                size: payload_size,
                max: self.opts.max_payload_bytes,
            });
        }
        self.enqueue_inner(task, false)
    }

    fn enqueue_inner(&self, task: NewTask, skip_dedup: bool) -> Result<QueueEntry, QueueError> {
        let lock_path = self.root.join("locks/enqueue.lock");
        sr_storage::with_lock(&lock_path, &self.opts.lock, &self.clock, || {
            self.enqueue_locked(task, skip_dedup)
        })?
    }

    fn enqueue_locked(&self, task: NewTask, skip_dedup: bool) -> Result<QueueEntry, QueueError> {
        let pending = self.list(PENDING_DIR)?.len();
        if pending >= self.opts.max_pending {
            return Err(QueueError::PendingLimit { pending, max: self.opts.max_pending });
        }

        if let Some(ref key) = task.dedup_key {
            if !skip_dedup && self.dedup_key_present(key)? {
                return Err(QueueError::Duplicate(key.clone()));
            }
        }

        let mut seq = self.next_sequence()?;
        loop {
            let entry = QueueEntry {
                id: format!("{:0width$}", seq, width = SEQ_WIDTH),
                task_id: task.task_id.clone(),
                client_folder_path: task.client_folder_path.clone(),
                branch: task.branch.clone(),
                priority: task.priority,
                created_at: self.clock.now_utc(),
                payload: task.payload.clone(),
                dedup_key: task.dedup_key.clone(),
                claimed_at_ms: None,
                outcome: None,
            };
            let path = self.dir(PENDING_DIR).join(file_name(seq, &task.task_id));
            match fs::OpenOptions::new().write(true).create_new(true).open(&path) {
                Ok(file) => {
                    serde_json::to_writer_pretty(&file, &entry)?;
                    file.sync_all()?;
                    tracing::info!(
                        task_id = %entry.task_id,
                        id = %entry.id,
                        priority = %entry.priority,
                        "enqueued task"
                    );
                    return Ok(entry);
                }
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                    tracing::debug!(seq, "sequence taken, retrying with next number");
                    seq += 1;
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    fn dedup_key_present(&self, key: &str) -> Result<bool, QueueError> {
        for dir in [PENDING_DIR, RUNNING_DIR] {
            for (_, path) in self.list(dir)? {
                if self.read_entry(&path).is_some_and(|e| e.dedup_key.as_deref() == Some(key)) {
                    return Ok(true);
                }
            }
        }
        Ok(false)
    }

    /// Next unused sequence number, scanning filenames across all four
    /// directories so completed history keeps the sequence monotonic.
    fn next_sequence(&self) -> Result<u64, QueueError> {
        let mut max = 0;
        for dir in [PENDING_DIR, RUNNING_DIR, DONE_DIR, FAILED_DIR] {
            for (name, _) in self.list(dir)? {
                if let Some((seq, _)) = parse_file_name(&name) {
                    max = max.max(seq);
                }
            }
        }
        Ok(max + 1)
    }

    /// Claim the first pending entry, relocating it into `running/`.
    ///
    /// Refuses while `running/` is occupied (single global runner slot).
    /// A rename that fails because the source vanished is a lost race, not
    /// an error — the walk silently moves to the next candidate.
    pub fn claim_next(&self) -> Result<Option<QueueEntry>, QueueError> {
        if !self.list(RUNNING_DIR)?.is_empty() {
            tracing::debug!("runner slot occupied, not claiming");
            return Ok(None);
        }

        let mut candidates = Vec::new();
        for (name, path) in self.list(PENDING_DIR)? {
            let Some((seq, _)) = parse_file_name(&name) else { continue };
            let Some(entry) = self.read_entry(&path) else { continue };
            candidates.push((entry.priority, seq, name, entry));
        }
        candidates.sort_by(|a, b| (a.0, a.1).cmp(&(b.0, b.1)));

        for (_, _, name, mut entry) in candidates {
            let from = self.dir(PENDING_DIR).join(&name);
            let to = self.dir(RUNNING_DIR).join(&name);
            match fs::rename(&from, &to) {
                Ok(()) => {
                    entry.claimed_at_ms = Some(self.clock.epoch_ms());
                    write_atomic(&to, &entry)?;
                    tracing::info!(task_id = %entry.task_id, id = %entry.id, "claimed queue entry");
                    return Ok(Some(entry));
                }
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                    tracing::debug!(entry = %name, "claim conflict, trying next candidate");
                }
                Err(e) => return Err(e.into()),
            }
        }
        Ok(None)
    }

    /// Move the running entry for `task_id` to `done/` or `failed/` and
    /// write the outcome into its body.
    ///
    /// A source entry that is no longer in `running/` (a concurrent
    /// reclaimer won) is logged and tolerated; the outcome is still
    /// written best-effort wherever the entry landed.
    pub fn complete(
        &self,
        task_id: &TaskId,
        success: bool,
        error: Option<String>,
    ) -> Result<(), QueueError> {
        let outcome = if success {
            Outcome::Succeeded
        } else {
            Outcome::Failed { error: error.unwrap_or_else(|| "unspecified failure".to_string()) }
        };
        let dest_dir = if success { DONE_DIR } else { FAILED_DIR };

        let Some((name, from)) = self.find(RUNNING_DIR, task_id)? else {
            tracing::warn!(task_id = %task_id, "complete: entry not in running/, outcome write is best-effort");
            self.write_outcome_best_effort(task_id, &outcome);
            return Ok(());
        };

        let to = self.dir(dest_dir).join(&name);
        match fs::rename(&from, &to) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::warn!(task_id = %task_id, error = %e, "complete: entry moved concurrently, outcome write is best-effort");
                self.write_outcome_best_effort(task_id, &outcome);
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        }

        if let Some(mut entry) = self.read_entry(&to) {
            entry.outcome = Some(outcome);
            write_atomic(&to, &entry)?;
        }
        tracing::info!(task_id = %task_id, dest = dest_dir, success, "queue entry completed");
        Ok(())
    }

    fn write_outcome_best_effort(&self, task_id: &TaskId, outcome: &Outcome) {
        for dir in [DONE_DIR, FAILED_DIR] {
            let found = match self.find(dir, task_id) {
                Ok(found) => found,
                Err(e) => {
                    tracing::warn!(task_id = %task_id, error = %e, "outcome lookup failed");
                    return;
                }
            };
            if let Some((_, path)) = found {
                if let Some(mut entry) = self.read_entry(&path) {
                    if entry.outcome.is_none() {
                        entry.outcome = Some(outcome.clone());
                        if let Err(e) = write_atomic(&path, &entry) {
                            tracing::warn!(task_id = %task_id, error = %e, "best-effort outcome write failed");
                        }
                    }
                }
                return;
            }
        }
    }

    /// Reclaim running entries whose claim is older than `ttl`.
    ///
    /// Age is measured from `claimed_at_ms`, falling back to `created_at`
    /// for entries claimed before the stamp existed. Returns the task ids
    /// reclaimed.
    pub fn detect_stale(
        &self,
        ttl: Duration,
        policy: StalePolicy,
    ) -> Result<Vec<TaskId>, QueueError> {
        let now_ms = self.clock.epoch_ms();
        let ttl_ms = ttl.as_millis() as u64;
        let mut reclaimed = Vec::new();

        for (name, path) in self.list(RUNNING_DIR)? {
            let Some(entry) = self.read_entry(&path) else { continue };
            let claimed_ms = entry
                .claimed_at_ms
                .unwrap_or_else(|| entry.created_at.timestamp_millis().max(0) as u64);
            let age_ms = now_ms.saturating_sub(claimed_ms);
            if age_ms <= ttl_ms {
                continue;
            }

            match policy {
                StalePolicy::Fail => {
                    let to = self.dir(FAILED_DIR).join(&name);
                    match fs::rename(&path, &to) {
                        Ok(()) => {
                            if let Some(mut moved) = self.read_entry(&to) {
                                moved.outcome = Some(Outcome::Failed {
                                    error: format!("stale: no progress within {}s", ttl.as_secs()),
                                });
                                write_atomic(&to, &moved)?;
                            }
                        }
                        Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                        Err(e) => return Err(e.into()),
                    }
                }
                StalePolicy::Requeue => {
                    // New entry first, then drop the stale one; the dedup
                    // check is skipped because the running copy still
                    // exists at this point.
                    self.enqueue_inner(
                        NewTask {
                            task_id: entry.task_id.clone(),
                            client_folder_path: entry.client_folder_path.clone(),
                            branch: entry.branch.clone(),
                            priority: entry.priority,
                            payload: entry.payload.clone(),
                            dedup_key: entry.dedup_key.clone(),
                        },
                        true,
                    )?;
                    match fs::remove_file(&path) {
                        Ok(()) => {}
                        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                        Err(e) => return Err(e.into()),
                    }
                }
            }

            tracing::warn!(
                task_id = %entry.task_id,
                age_ms,
                ?policy,
                "reclaimed stale running entry"
            );
            reclaimed.push(entry.task_id.clone());
        }
        Ok(reclaimed)
    }

    /// The manual priority escape hatch: rewrite a pending entry as urgent.
    pub fn promote(&self, task_id: &TaskId) -> Result<(), QueueError> {
        let Some((_, path)) = self.find(PENDING_DIR, task_id)? else {
            return Err(QueueError::NotFound(task_id.clone(), PENDING_DIR));
        };
        let Some(mut entry) = self.read_entry(&path) else {
            return Err(QueueError::NotFound(task_id.clone(), PENDING_DIR));
        };
        if entry.priority != Priority::Urgent {
            entry.priority = Priority::Urgent;
            write_atomic(&path, &entry)?;
            tracing::info!(task_id = %task_id, "promoted entry to urgent");
        }
        Ok(())
    }

    /// Fresh pending entry built from a failed one. The task identity is
    /// reused (the TaskState record carries over); the sequence is new.
    pub fn requeue(&self, task_id: &TaskId) -> Result<QueueEntry, QueueError> {
        let Some((_, path)) = self.find(FAILED_DIR, task_id)? else {
            return Err(QueueError::NotFound(task_id.clone(), FAILED_DIR));
        };
        let Some(entry) = self.read_entry(&path) else {
            return Err(QueueError::NotFound(task_id.clone(), FAILED_DIR));
        };
        self.enqueue(NewTask {
            task_id: entry.task_id,
            client_folder_path: entry.client_folder_path,
            branch: entry.branch,
            priority: entry.priority,
            payload: entry.payload,
            dedup_key: entry.dedup_key,
        })
    }

    /// Bound `done/` and `failed/` retention to the newest `keep` entries
    /// each. Returns how many files were removed.
    pub fn prune(&self, keep: usize) -> Result<usize, QueueError> {
        let mut removed = 0;
        for dir in [DONE_DIR, FAILED_DIR] {
            let mut entries = self.list(dir)?;
            if entries.len() <= keep {
                continue;
            }
            let excess = entries.len() - keep;
            for (name, path) in entries.drain(..excess) {
                match fs::remove_file(&path) {
                    Ok(()) => {
                        tracing::debug!(entry = %name, dir, "pruned");
                        removed += 1;
                    }
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                    Err(e) => return Err(e.into()),
                }
            }
        }
        Ok(removed)
    }

    /// Point-in-time view of all four directories.
    pub fn snapshot(&self) -> Result<QueueSnapshot, QueueError> {
        let summarize = |dir: &str| -> Result<Vec<EntrySummary>, QueueError> {
            let mut out = Vec::new();
            for (_, path) in self.list(dir)? {
                if let Some(entry) = self.read_entry(&path) {
                    out.push(EntrySummary::from(&entry));
                }
            }
            Ok(out)
        };
        Ok(QueueSnapshot {
            pending: summarize(PENDING_DIR)?,
            running: summarize(RUNNING_DIR)?,
            done: self.list(DONE_DIR)?.len(),
            failed: self.list(FAILED_DIR)?.len(),
            generated_at: self.clock.now_utc(),
        })
    }

    /// Dashboard feed: write the snapshot to `<status_dir>/current.json`,
    /// staged through `<status_dir>/tmp/` so readers never see a torn write.
    pub fn publish_snapshot(&self, status_dir: &Path) -> Result<QueueSnapshot, QueueError> {
        let snapshot = self.snapshot()?;
        fs::create_dir_all(status_dir)?;
        write_atomic_staged(&status_dir.join("current.json"), &status_dir.join("tmp"), &snapshot)?;
        Ok(snapshot)
    }

    /// Entries in one directory, sorted by sequence ascending. Names that
    /// are not queue entries (temp files, quarantine copies) are skipped.
    fn list(&self, dir: &str) -> Result<Vec<(String, PathBuf)>, QueueError> {
        let mut out = Vec::new();
        for entry in fs::read_dir(self.dir(dir))? {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().into_owned();
            if parse_file_name(&name).is_none() {
                continue;
            }
            out.push((name, entry.path()));
        }
        out.sort_by_key(|(name, _)| parse_file_name(name).map(|(seq, _)| seq).unwrap_or(0));
        Ok(out)
    }

    fn read_entry(&self, path: &Path) -> Option<QueueEntry> {
        read_safe(path, None)
    }

    /// Highest-sequence entry for `task_id` in one directory.
    fn find(&self, dir: &'static str, task_id: &TaskId) -> Result<Option<(String, PathBuf)>, QueueError> {
        Ok(self
            .list(dir)?
            .into_iter()
            .rev()
            .find(|(name, _)| parse_file_name(name).is_some_and(|(_, id)| id == *task_id)))
    }
}

#[cfg(test)]
#[path = "queue_tests.rs"]
mod tests;
