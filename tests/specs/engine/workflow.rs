// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! End-to-end workflow specs: queue, detector, rollback, and
//! orchestrator wired together over a real git workspace, with the
//! external agent launcher simulated by writing status records.

use crate::prelude::*;
use parking_lot::Mutex;
use sr_core::{Clock, RunState, StatusRecord, TaskStatus, STATUS_FILE_NAME};
use sr_engine::{
    AgentLauncher, CompletionDetector, CompletionRelay, DetectorConfig, EngineConfig, GitCli,
    LaunchError, LaunchedAgent, OrchestratorParams, PreparedWorkspace, ProgressError,
    ProgressSink, ProvisionError, WorkflowOrchestrator, WorkflowTask, WorkspaceProvisioner,
};
use sr_queue::{Priority, QueueEntry, QueueOptions, TaskQueue, DONE_DIR, FAILED_DIR, PENDING_DIR};
use sr_storage::TaskStateStore;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

#[derive(Default)]
struct SpecLauncher {
    launches: Mutex<Vec<TaskId>>,
}

#[async_trait::async_trait]
impl AgentLauncher for SpecLauncher {
    async fn launch(
        &self,
        task_id: &TaskId,
        _workspace: &Path,
        _prompt: &str,
        _env: HashMap<String, String>,
    ) -> Result<LaunchedAgent, LaunchError> {
        self.launches.lock().push(task_id.clone());
        Ok(LaunchedAgent { pid: 7777 })
    }
}

struct SpecProvisioner {
    workspace: PathBuf,
}

#[async_trait::async_trait]
impl WorkspaceProvisioner for SpecProvisioner {
    async fn prepare(&self, _entry: &QueueEntry) -> Result<PreparedWorkspace, ProvisionError> {
        Ok(PreparedWorkspace { workspace_path: self.workspace.clone(), base_commit: None })
    }
}

#[derive(Default)]
struct CountingSink {
    steps: Mutex<Vec<(u32, u32)>>,
    completed: Mutex<usize>,
    failed: Mutex<usize>,
}

#[async_trait::async_trait]
impl ProgressSink for CountingSink {
    async fn step_completed(
        &self,
        _task_id: &TaskId,
        step: u32,
        total_steps: u32,
    ) -> Result<(), ProgressError> {
        self.steps.lock().push((step, total_steps));
        Ok(())
    }

    async fn workflow_completed(&self, _task_id: &TaskId) -> Result<(), ProgressError> {
        *self.completed.lock() += 1;
        Ok(())
    }

    async fn workflow_failed(
        &self,
        _task_id: &TaskId,
        _message: &str,
    ) -> Result<(), ProgressError> {
        *self.failed.lock() += 1;
        Ok(())
    }
}

struct World {
    orch: Arc<WorkflowOrchestrator<FakeClock>>,
    launcher: Arc<SpecLauncher>,
    sink: Arc<CountingSink>,
    store: TaskStateStore<FakeClock>,
    clock: FakeClock,
    dir: tempfile::TempDir,
    workspace: PathBuf,
}

fn world() -> World {
    let dir = tempfile::tempdir().unwrap();
    let workspace = dir.path().join("ws");
    std::fs::create_dir_all(&workspace).unwrap();
    init_repo(&workspace);
    commit_file(&workspace, "index.html", "v1", "base");

    let clock = FakeClock::new();
    let store = TaskStateStore::open(dir.path(), clock.clone()).unwrap();
    let queue =
        Arc::new(TaskQueue::open(dir.path(), QueueOptions::default(), clock.clone()).unwrap());

    let relay = CompletionRelay::default();
    let detector = Arc::new(CompletionDetector::new(
        store.clone(),
        Arc::new(relay.clone()),
        DetectorConfig { tick_interval: Duration::from_millis(5), ..DetectorConfig::default() },
        clock.clone(),
    ));

    let launcher = Arc::new(SpecLauncher::default());
    let sink = Arc::new(CountingSink::default());
    let orch = Arc::new(WorkflowOrchestrator::new(OrchestratorParams {
        root: dir.path().to_path_buf(),
        queue,
        launcher: launcher.clone(),
        provisioner: Arc::new(SpecProvisioner { workspace: workspace.clone() }),
        sink: sink.clone(),
        vcs: Arc::new(GitCli::new()),
        detector,
        store: store.clone(),
        config: EngineConfig::default(),
        clock: clock.clone(),
    }));
    relay.bind(orch.clone());

    World { orch, launcher, sink, store, clock, dir, workspace }
}

impl World {
    /// Simulate the external launcher finishing a run.
    fn agent_reports(&self, task_id: &str, state: RunState, error: Option<&str>) {
        let mut record =
            StatusRecord::reset(TaskId::from_string(task_id), self.clock.now_utc());
        record.state = state;
        record.error = error.map(str::to_string);
        sr_storage::write_atomic(&self.workspace.join(STATUS_FILE_NAME), &record).unwrap();
    }

    fn status_of(&self, id: &str) -> TaskStatus {
        self.store.load(&TaskId::from_string(id)).unwrap().status
    }
}

fn task(id: &str, total_steps: u32) -> WorkflowTask {
    WorkflowTask {
        task_id: TaskId::from_string(id),
        client_folder_path: PathBuf::from("/srv/clients/acme"),
        branch: "task/landing".to_string(),
        priority: Priority::Normal,
        prompt: "build the landing page".to_string(),
        total_steps,
    }
}

#[tokio::test]
async fn a_two_step_workflow_runs_to_completion() {
    let w = world();
    w.orch.submit(task("demo-1", 2)).unwrap();

    // Step 1: claim, launch, agent finishes.
    w.orch.launch_next().await.unwrap().unwrap();
    assert_eq!(w.status_of("demo-1"), TaskStatus::InProgress);
    w.agent_reports("demo-1.step1", RunState::Done, None);

    // The detector notices, the orchestrator advances, step 2 queues.
    assert!(
        wait_for(|| w.dir.path().join(PENDING_DIR).join("0002_demo-1.step2").exists()).await
    );
    assert!(wait_for(|| w.status_of("demo-1") == TaskStatus::Queued).await);
    assert!(w.dir.path().join(DONE_DIR).join("0001_demo-1.step1").exists());

    // Step 2: same cycle, workflow completes.
    w.orch.launch_next().await.unwrap().unwrap();
    w.agent_reports("demo-1.step2", RunState::Done, None);
    assert!(wait_for(|| w.status_of("demo-1") == TaskStatus::Completed).await);
    assert!(w.dir.path().join(DONE_DIR).join("0002_demo-1.step2").exists());

    assert_eq!(w.launcher.launches.lock().as_slice(), &[
        TaskId::from_string("demo-1.step1"),
        TaskId::from_string("demo-1.step2"),
    ]);
    assert_eq!(w.sink.steps.lock().as_slice(), &[(1, 2), (2, 2)]);
    assert_eq!(*w.sink.completed.lock(), 1);

    // One checkpoint tag per step in the workspace repository.
    let tags = git(&w.workspace, &["tag", "-l"]);
    assert!(tags.contains("recovery-demo-1-step1-"));
    assert!(tags.contains("recovery-demo-1-step2-"));
}

#[tokio::test]
async fn a_hung_agent_fails_the_run_and_frees_the_queue() {
    let w = world();
    w.orch.submit(task("demo-1", 1)).unwrap();
    w.orch.launch_next().await.unwrap().unwrap();

    // The agent writes one running heartbeat, then goes silent while the
    // wall clock moves past the liveness allowance.
    w.agent_reports("demo-1.step1", RunState::Running, None);
    w.clock.advance(Duration::from_secs(3 * 60));

    assert!(wait_for(|| w.status_of("demo-1") == TaskStatus::Failed).await);

    let state = w.store.load(&TaskId::from_string("demo-1")).unwrap();
    assert_eq!(state.failed_step, Some(1));
    assert!(state.status_reason.unwrap().contains("appears hung"));

    // The queue advanced the entry to failed/, freeing the runner slot.
    assert!(w.dir.path().join(FAILED_DIR).join("0001_demo-1.step1").exists());
    assert_eq!(*w.sink.failed.lock(), 1);
}

#[tokio::test]
async fn credit_exhaustion_surfaces_a_categorized_message() {
    let w = world();
    w.orch.submit(task("demo-1", 1)).unwrap();
    w.orch.launch_next().await.unwrap().unwrap();

    w.agent_reports(
        "demo-1.step1",
        RunState::Failed,
        Some("Error: you have exceeded your usage limit for this billing cycle"),
    );

    assert!(wait_for(|| w.status_of("demo-1") == TaskStatus::Failed).await);
    let state = w.store.load(&TaskId::from_string("demo-1")).unwrap();
    // The user-facing surface gets the categorized message, not the raw
    // diagnostic.
    assert_eq!(
        state.status_reason.unwrap(),
        "AI usage limit reached — add credits or wait for the limit to reset"
    );
}

#[tokio::test]
async fn a_failed_step_can_be_rolled_back_and_retried() {
    let w = world();
    w.orch.submit(task("demo-1", 2)).unwrap();
    w.orch.launch_next().await.unwrap().unwrap();

    // The agent commits partial work, then dies.
    let base = git(&w.workspace, &["rev-parse", "HEAD"]);
    commit_file(&w.workspace, "index.html", "broken", "partial step work");
    w.agent_reports("demo-1.step1", RunState::Failed, Some("agent crashed"));
    assert!(wait_for(|| w.status_of("demo-1") == TaskStatus::Failed).await);

    // Distinct timestamp for the pre-rollback safety tag.
    w.clock.advance(Duration::from_secs(60));
    let outcome = w
        .orch
        .rollback_failed_step(&TaskId::from_string("demo-1"), &Default::default())
        .await
        .unwrap();
    assert_eq!(outcome.commits_discarded, 1);
    assert_eq!(git(&w.workspace, &["rev-parse", "HEAD"]), base);
    assert_eq!(w.status_of("demo-1"), TaskStatus::AwaitingApproval);
}

#[tokio::test]
async fn a_failed_step_can_be_skipped_to_the_next() {
    let w = world();
    w.orch.submit(task("demo-1", 2)).unwrap();
    w.orch.launch_next().await.unwrap().unwrap();
    w.agent_reports("demo-1.step1", RunState::Failed, Some("agent crashed"));
    assert!(wait_for(|| w.status_of("demo-1") == TaskStatus::Failed).await);

    let next = w.orch.skip_failed_step(&TaskId::from_string("demo-1")).await.unwrap();
    assert_eq!(next, 2);
    assert!(w.dir.path().join(PENDING_DIR).join("0002_demo-1.step2").exists());
    assert_eq!(w.status_of("demo-1"), TaskStatus::Queued);

    // The skipped workflow still finishes.
    w.orch.launch_next().await.unwrap().unwrap();
    w.agent_reports("demo-1.step2", RunState::Done, None);
    assert!(wait_for(|| w.status_of("demo-1") == TaskStatus::Completed).await);

    let state = w.store.load(&TaskId::from_string("demo-1")).unwrap();
    assert_eq!(state.metadata.skipped_steps, vec![1]);
}
