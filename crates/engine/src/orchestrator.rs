// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Workflow orchestration over the queue, detector, and collaborators.
//!
//! Drives a task through its fixed-count step sequence: claim → provision
//! → checkpoint → status reset → launch → detect → continue. Every
//! collaborator is injected at construction; the orchestrator itself is
//! the completion notifier the detector (and any exit callback) reports
//! into — one channel, first signal wins.

use crate::config::EngineConfig;
use crate::detector::{CompletionDetector, PollSpec};
use crate::progress::{self, WorkflowProgress};
use crate::rollback::{
    CheckpointRollbackService, RollbackError, RollbackOptions, RollbackOutcome,
};
use crate::traits::{
    AgentLauncher, CompletionNotifier, LaunchError, ProgressError, ProgressSink, ProvisionError,
    QueueHandle, RunOutcome, VcsProvider, WorkspaceProvisioner,
};
use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use sr_core::{Clock, StatusRecord, TaskId, TaskStatus, STATUS_FILE_NAME};
use sr_queue::{NewTask, Priority, QueueEntry, QueueError};
use sr_storage::{try_acquire, write_atomic, LockError, StoreError, TaskStateStore};
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error(transparent)]
    Queue(#[from] QueueError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Rollback(#[from] RollbackError),
    #[error(transparent)]
    Lock(#[from] LockError),
    #[error(transparent)]
    Provision(#[from] ProvisionError),
    #[error(transparent)]
    Launch(#[from] LaunchError),
    #[error(transparent)]
    Progress(#[from] ProgressError),
    #[error("payload serialization: {0}")]
    Payload(#[from] serde_json::Error),
    #[error("step transition failed for task '{task_id}': {reason}")]
    StepTransitionFailure { task_id: TaskId, reason: String },
    #[error("no state record for task '{0}'")]
    UnknownTask(TaskId),
    #[error("no failed step recorded for task '{0}'")]
    NoFailedStep(TaskId),
    #[error("no workspace recorded for task '{0}'")]
    NoWorkspace(TaskId),
}

/// A workflow as submitted by the front end.
#[derive(Debug, Clone)]
pub struct WorkflowTask {
    pub task_id: TaskId,
    pub client_folder_path: PathBuf,
    pub branch: String,
    pub priority: Priority,
    pub prompt: String,
    /// Fixed step count, known at orchestration time.
    pub total_steps: u32,
}

/// Payload carried by each step's queue entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StepPayload {
    prompt: String,
    total_steps: u32,
}

impl Default for StepPayload {
    fn default() -> Self {
        Self { prompt: String::new(), total_steps: 1 }
    }
}

/// Collaborators and state handed to [`WorkflowOrchestrator::new`].
pub struct OrchestratorParams<C: Clock> {
    /// Root for `locks/` and `status/`.
    pub root: PathBuf,
    pub queue: Arc<dyn QueueHandle>,
    pub launcher: Arc<dyn AgentLauncher>,
    pub provisioner: Arc<dyn WorkspaceProvisioner>,
    pub sink: Arc<dyn ProgressSink>,
    pub vcs: Arc<dyn VcsProvider>,
    pub detector: Arc<CompletionDetector<C>>,
    pub store: TaskStateStore<C>,
    pub config: EngineConfig,
    pub clock: C,
}

pub struct WorkflowOrchestrator<C: Clock> {
    root: PathBuf,
    queue: Arc<dyn QueueHandle>,
    launcher: Arc<dyn AgentLauncher>,
    provisioner: Arc<dyn WorkspaceProvisioner>,
    sink: Arc<dyn ProgressSink>,
    rollback: CheckpointRollbackService<C>,
    detector: Arc<CompletionDetector<C>>,
    store: TaskStateStore<C>,
    config: EngineConfig,
    clock: C,
    /// Run ids whose completion has already been admitted. The guard is
    /// what turns two signal sources into one completion channel.
    completing: Mutex<HashSet<TaskId>>,
}

impl<C: Clock> WorkflowOrchestrator<C> {
    pub fn new(params: OrchestratorParams<C>) -> Self {
        let rollback = CheckpointRollbackService::new(
            params.vcs,
            params.store.clone(),
            params.clock.clone(),
        );
        Self {
            root: params.root,
            queue: params.queue,
            launcher: params.launcher,
            provisioner: params.provisioner,
            sink: params.sink,
            rollback,
            detector: params.detector,
            store: params.store,
            config: params.config,
            clock: params.clock,
            completing: Mutex::new(HashSet::new()),
        }
    }

    /// Register a new workflow and enqueue its first step.
    pub fn submit(&self, task: WorkflowTask) -> Result<QueueEntry, OrchestratorError> {
        let payload = serde_json::to_value(StepPayload {
            prompt: task.prompt.clone(),
            total_steps: task.total_steps.max(1),
        })?;
        self.store.update_status(&task.task_id, TaskStatus::Queued, "workflow submitted")?;
        let entry = self.queue.enqueue(NewTask {
            task_id: task.task_id.step_run(1),
            client_folder_path: task.client_folder_path,
            branch: task.branch,
            priority: task.priority,
            payload,
            // One live entry per workflow across queue/ and running/.
            dedup_key: Some(task.task_id.as_str().to_string()),
        })?;
        Ok(entry)
    }

    /// Claim the next queued run and launch its agent.
    ///
    /// Returns `None` when nothing is claimable (empty queue or occupied
    /// runner slot). A launch failure moves the entry to `failed/` so the
    /// slot is never wedged, records ERROR, and propagates.
    pub async fn launch_next(&self) -> Result<Option<QueueEntry>, OrchestratorError> {
        let Some(entry) = self.queue.claim_next()? else {
            return Ok(None);
        };
        let run_id = entry.task_id.clone();
        let family = TaskId::from_string(run_id.family());
        let step = run_id.step().unwrap_or(1);

        match self.prepare_and_launch(&entry, &family, step).await {
            Ok(()) => {
                // Fresh run: allow its completion to be admitted.
                self.completing.lock().remove(&run_id);
                Ok(Some(entry))
            }
            Err(e) => {
                if let Err(qe) = self.queue.complete(&run_id, false, Some(e.to_string())) {
                    tracing::warn!(
                        task_id = %run_id,
                        error = %qe,
                        "failed to move unlaunchable entry out of running/"
                    );
                }
                self.store.update_status(
                    &family,
                    TaskStatus::Error,
                    format!("step {} launch failed: {}", step, e),
                )?;
                Err(e)
            }
        }
    }

    async fn prepare_and_launch(
        &self,
        entry: &QueueEntry,
        family: &TaskId,
        step: u32,
    ) -> Result<(), OrchestratorError> {
        let payload: StepPayload =
            serde_json::from_value(entry.payload.clone()).unwrap_or_default();
        let prepared = self.provisioner.prepare(entry).await?;
        let workspace = prepared.workspace_path;

        // Checkpoint before the risky step.
        self.rollback.snapshot(&workspace, family, step).await?;

        // The progress record drives step advancement and carries the
        // launch parameters subsequent steps reuse.
        progress::store(
            &workspace,
            &WorkflowProgress {
                current_step: step,
                total_steps: payload.total_steps.max(1),
                prompt: payload.prompt.clone(),
                client_folder_path: entry.client_folder_path.clone(),
                branch: entry.branch.clone(),
                priority: entry.priority,
            },
        )?;

        // Reset the status record so a prior step's terminal state can
        // never satisfy this run.
        let fresh = StatusRecord::reset(entry.task_id.clone(), self.clock.now_utc());
        write_atomic(&workspace.join(STATUS_FILE_NAME), &fresh)?;

        let env = HashMap::from([
            ("SR_TASK_ID".to_string(), entry.task_id.to_string()),
            ("SR_STEP".to_string(), step.to_string()),
        ]);
        let agent =
            self.launcher.launch(&entry.task_id, &workspace, &payload.prompt, env).await?;

        let now_ms = self.clock.epoch_ms();
        let workspace_for_state = workspace.clone();
        self.store.upsert(family, |s| {
            s.set_status(
                TaskStatus::InProgress,
                format!("step {} launched (pid {})", step, agent.pid),
                now_ms,
            );
            s.workspace_path = Some(workspace_for_state);
            s.failed_step = None;
        })?;

        self.detector.start(PollSpec {
            task_id: entry.task_id.clone(),
            workspace,
            multi_step: payload.total_steps > 1,
        })?;
        Ok(())
    }

    /// Single completion channel. Both signal sources — the detector's
    /// polling loop and the launcher's exit callback — land here; the
    /// first signal per run is admitted, the second is a logged no-op.
    ///
    /// Queue bookkeeping runs unconditionally and before continuation, so
    /// the queue can always advance even when continuation fails; a
    /// continuation failure is recorded as ERROR and raised, never
    /// swallowed.
    pub async fn handle_run_complete(
        &self,
        run_id: TaskId,
        outcome: RunOutcome,
    ) -> Result<(), OrchestratorError> {
        if !self.completing.lock().insert(run_id.clone()) {
            tracing::debug!(task_id = %run_id, "duplicate completion signal, ignoring");
            return Ok(());
        }
        // Quiet any still-registered polling loop; a no-op when the
        // detector itself delivered the signal.
        self.detector.stop(&run_id);

        if let Err(e) =
            self.queue.complete(&run_id, outcome.is_success(), outcome.user_message())
        {
            tracing::warn!(task_id = %run_id, error = %e, "queue completion bookkeeping failed");
        }

        let family = TaskId::from_string(run_id.family());
        let step = run_id.step().unwrap_or(1);
        match self.continue_workflow(&family, step, &outcome).await {
            Ok(()) => Ok(()),
            Err(e) => {
                let reason = format!("step {} transition failed: {}", step, e);
                if let Err(se) =
                    self.store.update_status(&family, TaskStatus::Error, reason.clone())
                {
                    tracing::error!(
                        task_id = %family,
                        error = %se,
                        "failed to record step transition failure"
                    );
                }
                Err(OrchestratorError::StepTransitionFailure { task_id: family, reason })
            }
        }
    }

    async fn continue_workflow(
        &self,
        family: &TaskId,
        step: u32,
        outcome: &RunOutcome,
    ) -> Result<(), OrchestratorError> {
        if !outcome.is_success() {
            let message =
                outcome.user_message().unwrap_or_else(|| "agent run failed".to_string());
            let now_ms = self.clock.epoch_ms();
            let reason = message.clone();
            self.store.upsert(family, |s| {
                s.set_status(TaskStatus::Failed, reason, now_ms);
                s.failed_step = Some(step);
            })?;
            // Failure reporting is informational; it must not mask the
            // recorded failure.
            if let Err(e) = self.sink.workflow_failed(family, &message).await {
                tracing::warn!(task_id = %family, error = %e, "failure report to sink failed");
            }
            return Ok(());
        }

        let state =
            self.store.load(family).ok_or_else(|| OrchestratorError::UnknownTask(family.clone()))?;
        let progress = state.workspace_path.as_deref().and_then(progress::load);
        let total_steps = progress.as_ref().map(|p| p.total_steps).unwrap_or(1);

        self.sink.step_completed(family, step, total_steps).await?;

        if step < total_steps {
            // Progress record present, since total_steps > 1 came from it.
            let Some(progress) = progress else {
                return Err(OrchestratorError::NoWorkspace(family.clone()));
            };
            let next_step = step + 1;
            self.queue.enqueue(NewTask {
                task_id: family.step_run(next_step),
                client_folder_path: progress.client_folder_path,
                branch: progress.branch,
                priority: progress.priority,
                payload: serde_json::to_value(StepPayload {
                    prompt: progress.prompt,
                    total_steps,
                })?,
                dedup_key: Some(family.as_str().to_string()),
            })?;
            self.store.update_status(
                family,
                TaskStatus::Queued,
                format!("step {} queued", next_step),
            )?;
        } else {
            self.sink.workflow_completed(family).await?;
            self.store.update_status(family, TaskStatus::Completed, "all steps completed")?;
        }
        Ok(())
    }

    /// Roll the workspace back to the checkpoint taken before the failed
    /// step. Invoked explicitly by the embedding layer after a failure.
    pub async fn rollback_failed_step(
        &self,
        task_id: &TaskId,
        opts: &RollbackOptions,
    ) -> Result<RollbackOutcome, OrchestratorError> {
        let family = TaskId::from_string(task_id.family());
        let state = self
            .store
            .load(&family)
            .ok_or_else(|| OrchestratorError::UnknownTask(family.clone()))?;
        let failed_step =
            state.failed_step.ok_or_else(|| OrchestratorError::NoFailedStep(family.clone()))?;
        let workspace = state
            .workspace_path
            .clone()
            .ok_or_else(|| OrchestratorError::NoWorkspace(family.clone()))?;
        let checkpoint = state.metadata.checkpoint_for_step(failed_step).cloned().ok_or_else(
            || {
                RollbackError::InvalidCheckpoint(format!(
                    "no checkpoint recorded for step {}",
                    failed_step
                ))
            },
        )?;

        let outcome = self.rollback.rollback(&workspace, &family, &checkpoint, opts).await?;
        self.store.update_status(
            &family,
            TaskStatus::AwaitingApproval,
            format!(
                "rolled back step {} ({} commits discarded)",
                failed_step, outcome.commits_discarded
            ),
        )?;
        Ok(outcome)
    }

    /// Advance past the failed step without rolling back: enqueue the
    /// next step, or complete the workflow when none remain.
    pub async fn skip_failed_step(&self, task_id: &TaskId) -> Result<u32, OrchestratorError> {
        let family = TaskId::from_string(task_id.family());
        let state = self
            .store
            .load(&family)
            .ok_or_else(|| OrchestratorError::UnknownTask(family.clone()))?;
        let failed_step =
            state.failed_step.ok_or_else(|| OrchestratorError::NoFailedStep(family.clone()))?;
        let workspace = state
            .workspace_path
            .clone()
            .ok_or_else(|| OrchestratorError::NoWorkspace(family.clone()))?;

        let next_step = self.rollback.skip_step(&workspace, &family, failed_step).await?;
        let progress = progress::load(&workspace)
            .ok_or_else(|| OrchestratorError::NoWorkspace(family.clone()))?;

        if next_step <= progress.total_steps {
            self.queue.enqueue(NewTask {
                task_id: family.step_run(next_step),
                client_folder_path: progress.client_folder_path,
                branch: progress.branch,
                priority: progress.priority,
                payload: serde_json::to_value(StepPayload {
                    prompt: progress.prompt,
                    total_steps: progress.total_steps,
                })?,
                dedup_key: Some(family.as_str().to_string()),
            })?;
            self.store.update_status(
                &family,
                TaskStatus::Queued,
                format!("step {} queued after skipping step {}", next_step, failed_step),
            )?;
        } else {
            self.store.update_status(
                &family,
                TaskStatus::Completed,
                format!("completed with step {} skipped", failed_step),
            )?;
            if let Err(e) = self.sink.workflow_completed(&family).await {
                tracing::warn!(task_id = %family, error = %e, "completion report to sink failed");
            }
        }
        Ok(next_step)
    }

    /// Abandon a workflow: cancel every polling loop in its family and
    /// record the failure. Returns how many loops were cancelled.
    pub fn cancel_workflow(
        &self,
        task_id: &TaskId,
        reason: &str,
    ) -> Result<usize, OrchestratorError> {
        let family = TaskId::from_string(task_id.family());
        let cancelled = self.detector.cancel_family(family.as_str());
        self.store.update_status(
            &family,
            TaskStatus::Failed,
            format!("workflow cancelled: {}", reason),
        )?;
        Ok(cancelled)
    }

    /// Scheduled maintenance pass, exclusive across processes via
    /// `locks/scheduler.lock`.
    ///
    /// Returns `false` when another process holds the lock — the loser
    /// observes it and skips, which is the intended behavior for two
    /// schedulers firing in the same tick window.
    pub fn run_maintenance(&self) -> Result<bool, OrchestratorError> {
        let lock_path = self.root.join("locks").join("scheduler.lock");
        let Some(guard) = try_acquire(&lock_path, &self.config.lock_options(), &self.clock)?
        else {
            tracing::debug!("scheduler lock held elsewhere, skipping maintenance");
            return Ok(false);
        };

        let result = self.maintenance_pass();
        if let Err(e) = guard.release() {
            tracing::warn!(error = %e, "scheduler lock release failed");
        }
        result.map(|()| true)
    }

    fn maintenance_pass(&self) -> Result<(), OrchestratorError> {
        let reclaimed =
            self.queue.detect_stale(self.config.running_ttl(), self.config.stale_policy())?;
        for run_id in &reclaimed {
            self.detector.stop(run_id);
            let family = TaskId::from_string(run_id.family());
            self.store.update_status(
                &family,
                TaskStatus::Failed,
                "stale task reclaimed: no progress within the running TTL",
            )?;
        }
        self.queue.prune(self.config.queue.retention)?;
        self.queue.publish_snapshot(&self.root.join("status"))?;
        Ok(())
    }
}

#[async_trait]
impl<C: Clock> CompletionNotifier for WorkflowOrchestrator<C> {
    async fn on_run_complete(&self, task_id: TaskId, outcome: RunOutcome) {
        if let Err(e) = self.handle_run_complete(task_id.clone(), outcome).await {
            tracing::error!(task_id = %task_id, error = %e, "workflow continuation failed");
        }
    }
}

#[cfg(test)]
#[path = "orchestrator_tests.rs"]
mod tests;
