// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Polling-based completion detection with heartbeat liveness.
//!
//! One independent, non-blocking polling loop per in-flight run, owned by
//! an explicit per-instance registry (no process-wide state) so isolated
//! instances can be constructed in tests. Cancellation is cooperative at
//! tick boundaries; timeouts are wall-clock from detection start, so they
//! survive a process restart and are replayed by [`CompletionDetector::resume_pending`].

use crate::progress;
use crate::traits::{CompletionNotifier, RunOutcome};
use parking_lot::Mutex;
use sr_core::{
    classify_agent_error, AgentFailure, Clock, RunState, StatusRecord, TaskId, TaskStatus,
    STATUS_FILE_NAME,
};
use sr_storage::{StoreError, TaskStateStore};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Tuning for the detector.
#[derive(Debug, Clone, Copy)]
pub struct DetectorConfig {
    pub tick_interval: Duration,
    /// Heartbeat allowance for single-step tasks.
    pub heartbeat_max: Duration,
    /// Longer allowance for multi-step workflows.
    pub heartbeat_max_multi_step: Duration,
    /// Wall-clock bound from detection start; exceeding it is a timeout.
    pub max_wait: Duration,
    /// Consecutive transient read errors before forcing a failure.
    pub max_consecutive_errors: u32,
    pub error_backoff: Duration,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_secs(30),
            heartbeat_max: Duration::from_secs(2 * 60),
            heartbeat_max_multi_step: Duration::from_secs(10 * 60),
            max_wait: Duration::from_secs(45 * 60),
            max_consecutive_errors: 5,
            error_backoff: Duration::from_secs(5),
        }
    }
}

/// One polling assignment.
#[derive(Debug, Clone)]
pub struct PollSpec {
    /// Run identity; for a workflow step this is the step-run id, which
    /// is what the status record's identity check compares against.
    pub task_id: TaskId,
    pub workspace: PathBuf,
    pub multi_step: bool,
}

/// Counts from a restart-recovery pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResumeReport {
    pub resumed: usize,
    pub timed_out: usize,
    pub skipped: usize,
}

enum Tick {
    Continue,
    ContinueAfterBackoff,
    /// Workspace externally deleted — stop without notifying.
    StopSilently,
    Complete(RunOutcome),
}

/// Cheap clonable handle: clones share one polling registry, so a clone
/// moved into a spawned loop observes the same start/stop/cancel state.
#[derive(Clone)]
pub struct CompletionDetector<C: Clock> {
    store: TaskStateStore<C>,
    notifier: Arc<dyn CompletionNotifier>,
    config: DetectorConfig,
    clock: C,
    registry: Arc<Mutex<HashMap<TaskId, CancellationToken>>>,
}

impl<C: Clock> CompletionDetector<C> {
    pub fn new(
        store: TaskStateStore<C>,
        notifier: Arc<dyn CompletionNotifier>,
        config: DetectorConfig,
        clock: C,
    ) -> Self {
        Self { store, notifier, config, clock, registry: Arc::new(Mutex::new(HashMap::new())) }
    }

    /// Run ids currently being polled.
    pub fn active(&self) -> Vec<TaskId> {
        self.registry.lock().keys().cloned().collect()
    }

    /// Begin a fresh polling session for a run.
    ///
    /// Resets the detection bookkeeping; an existing loop for the same id
    /// is cancelled first.
    pub fn start(&self, spec: PollSpec) -> Result<(), StoreError> {
        let now_ms = self.clock.epoch_ms();
        let family = TaskId::from_string(spec.task_id.family());
        self.store.upsert(&family, |s| s.begin_detection(now_ms))?;
        self.spawn_loop(spec, now_ms);
        Ok(())
    }

    fn spawn_loop(&self, spec: PollSpec, detection_started_ms: u64) {
        let token = CancellationToken::new();
        if let Some(previous) = self.registry.lock().insert(spec.task_id.clone(), token.clone())
        {
            tracing::warn!(task_id = %spec.task_id, "replacing an existing polling loop");
            previous.cancel();
        }
        tracing::info!(
            task_id = %spec.task_id,
            workspace = %spec.workspace.display(),
            multi_step = spec.multi_step,
            "polling for completion"
        );
        let detector = self.clone();
        tokio::spawn(async move {
            detector.poll_loop(spec, token, detection_started_ms).await;
        });
    }

    /// Cooperative cancel; takes effect at the next tick boundary.
    /// Returns whether a loop was registered.
    pub fn stop(&self, task_id: &TaskId) -> bool {
        match self.registry.lock().remove(task_id) {
            Some(token) => {
                token.cancel();
                tracing::debug!(task_id = %task_id, "polling cancelled");
                true
            }
            None => false,
        }
    }

    /// Cancel every loop belonging to one task family (workflow abandon).
    pub fn cancel_family(&self, family: &str) -> usize {
        let mut registry = self.registry.lock();
        let ids: Vec<TaskId> =
            registry.keys().filter(|id| id.in_family(family)).cloned().collect();
        for id in &ids {
            if let Some(token) = registry.remove(id) {
                token.cancel();
            }
        }
        if !ids.is_empty() {
            tracing::info!(family, count = ids.len(), "cancelled polling for task family");
        }
        ids.len()
    }

    pub fn cancel_all(&self) -> usize {
        let mut registry = self.registry.lock();
        let count = registry.len();
        for (_, token) in registry.drain() {
            token.cancel();
        }
        count
    }

    /// Restart recovery: resume a polling loop for every stored task that
    /// is IN_PROGRESS without a recorded completion.
    ///
    /// A detection already past the max-wait bound is classified timed-out
    /// immediately; a task whose workspace no longer exists is skipped.
    pub async fn resume_pending(&self) -> Result<ResumeReport, StoreError> {
        let now_ms = self.clock.epoch_ms();
        let mut report = ResumeReport::default();

        for state in self.store.scan()? {
            if state.status != TaskStatus::InProgress || state.agent_completion.is_complete() {
                continue;
            }
            let Some(workspace) = state.workspace_path.clone() else {
                tracing::warn!(task_id = %state.task_id, "in-progress task has no workspace recorded, skipping");
                report.skipped += 1;
                continue;
            };
            if !workspace.exists() {
                tracing::info!(
                    task_id = %state.task_id,
                    workspace = %workspace.display(),
                    "recovering: workspace gone while the process was down, skipping"
                );
                report.skipped += 1;
                continue;
            }

            let started_ms =
                state.agent_completion.detection_started_at_ms.unwrap_or(state.updated_at_ms);
            let (run_id, multi_step) = match progress::load(&workspace) {
                Some(p) => (state.task_id.step_run(p.current_step), p.is_multi_step()),
                None => (state.task_id.clone(), false),
            };

            if now_ms.saturating_sub(started_ms) > self.config.max_wait.as_millis() as u64 {
                tracing::warn!(
                    task_id = %run_id,
                    "recovering: detection already past max wait, classifying as timed out"
                );
                self.record_completion(&run_id)?;
                self.notifier.on_run_complete(run_id, RunOutcome::TimedOut).await;
                report.timed_out += 1;
                continue;
            }

            tracing::info!(task_id = %run_id, "recovering: resuming polling loop");
            self.spawn_loop(
                PollSpec { task_id: run_id, workspace, multi_step },
                started_ms,
            );
            report.resumed += 1;
        }
        Ok(report)
    }

    async fn poll_loop(
        self,
        spec: PollSpec,
        token: CancellationToken,
        detection_started_ms: u64,
    ) {
        let mut consecutive_errors = 0u32;
        loop {
            tokio::select! {
                _ = token.cancelled() => {
                    tracing::debug!(task_id = %spec.task_id, "polling loop cancelled");
                    return;
                }
                _ = tokio::time::sleep(self.config.tick_interval) => {}
            }

            match self.tick(&spec, detection_started_ms, &mut consecutive_errors) {
                Tick::Continue => {}
                Tick::ContinueAfterBackoff => {
                    tokio::time::sleep(self.config.error_backoff).await;
                }
                Tick::StopSilently => {
                    self.registry.lock().remove(&spec.task_id);
                    return;
                }
                Tick::Complete(outcome) => {
                    // Leave the registry before notifying: the first
                    // completion signal wins and any second source finds
                    // nothing to deliver.
                    if self.registry.lock().remove(&spec.task_id).is_none() {
                        tracing::debug!(task_id = %spec.task_id, "completion already delivered elsewhere, skipping notify");
                        return;
                    }
                    if let Err(e) = self.record_completion(&spec.task_id) {
                        tracing::warn!(task_id = %spec.task_id, error = %e, "failed to record completion time");
                    }
                    tracing::info!(task_id = %spec.task_id, ?outcome, "run completion detected");
                    self.notifier.on_run_complete(spec.task_id.clone(), outcome).await;
                    return;
                }
            }
        }
    }

    fn tick(&self, spec: &PollSpec, detection_started_ms: u64, consecutive_errors: &mut u32) -> Tick {
        if !spec.workspace.exists() {
            tracing::info!(
                task_id = %spec.task_id,
                workspace = %spec.workspace.display(),
                "workspace externally deleted, stopping polling"
            );
            return Tick::StopSilently;
        }

        let now_ms = self.clock.epoch_ms();
        let family = TaskId::from_string(spec.task_id.family());
        if let Err(e) = self.store.upsert(&family, |s| {
            s.agent_completion.last_checked_at_ms = Some(now_ms);
        }) {
            tracing::warn!(task_id = %spec.task_id, error = %e, "failed to stamp tick time");
        }

        let status = match read_status(&spec.workspace.join(STATUS_FILE_NAME)) {
            Ok(status) => {
                *consecutive_errors = 0;
                status
            }
            Err(e) => {
                *consecutive_errors += 1;
                if *consecutive_errors >= self.config.max_consecutive_errors {
                    tracing::error!(
                        task_id = %spec.task_id,
                        error = %e,
                        attempts = *consecutive_errors,
                        "status record unreadable, forcing failure"
                    );
                    return Tick::Complete(RunOutcome::Failure(AgentFailure::Other(format!(
                        "status record unreadable after {} attempts: {}",
                        *consecutive_errors, e
                    ))));
                }
                tracing::warn!(
                    task_id = %spec.task_id,
                    error = %e,
                    attempt = *consecutive_errors,
                    "transient status read error, backing off"
                );
                return Tick::ContinueAfterBackoff;
            }
        };

        match evaluate(
            &spec.task_id,
            spec.multi_step,
            status.as_ref(),
            now_ms,
            detection_started_ms,
            &self.config,
        ) {
            Some(outcome) => Tick::Complete(outcome),
            None => Tick::Continue,
        }
    }

    fn record_completion(&self, run_id: &TaskId) -> Result<(), StoreError> {
        let now_ms = self.clock.epoch_ms();
        let family = TaskId::from_string(run_id.family());
        self.store.upsert(&family, |s| {
            s.agent_completion.completion_detected_at_ms = Some(now_ms);
        })?;
        Ok(())
    }
}

/// Pure per-tick classification, separated from IO so tests can drive it
/// directly. `None` means keep polling.
pub(crate) fn evaluate(
    task_id: &TaskId,
    multi_step: bool,
    status: Option<&StatusRecord>,
    now_ms: u64,
    detection_started_ms: u64,
    config: &DetectorConfig,
) -> Option<RunOutcome> {
    // Identity check before anything else: a leftover record from a
    // previous run must read as "not started yet" even when terminal.
    let status = status.filter(|record| record.is_for(task_id));

    if let Some(record) = status {
        let allowance =
            if multi_step { config.heartbeat_max_multi_step } else { config.heartbeat_max };
        let heartbeat_age_ms = record.heartbeat_age_ms(now_ms);
        if record.state.is_live() && heartbeat_age_ms > allowance.as_millis() as u64 {
            return Some(RunOutcome::HeartbeatTimeout { age_ms: heartbeat_age_ms });
        }
        match record.state {
            RunState::Done => return Some(RunOutcome::Success),
            RunState::Failed => {
                let raw =
                    record.error.as_deref().unwrap_or("agent reported failure without detail");
                return Some(RunOutcome::Failure(classify_agent_error(raw)));
            }
            RunState::Starting | RunState::Running => {}
        }
    }

    if now_ms.saturating_sub(detection_started_ms) > config.max_wait.as_millis() as u64 {
        return Some(RunOutcome::TimedOut);
    }
    None
}

/// Read the status record. Missing or empty means "still starting";
/// anything else unreadable is a transient error the caller retries.
fn read_status(path: &Path) -> Result<Option<StatusRecord>, StoreError> {
    let raw = match std::fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    if raw.trim().is_empty() {
        return Ok(None);
    }
    Ok(Some(serde_json::from_str(&raw)?))
}

#[cfg(test)]
#[path = "detector_tests.rs"]
mod tests;
