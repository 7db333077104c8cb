// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Completion-detection specs: identity defense, liveness, and restart
//! recovery against a real filesystem.

use crate::prelude::*;
use parking_lot::Mutex;
use sr_core::{Clock, RunState, StatusRecord, TaskStatus, STATUS_FILE_NAME};
use sr_engine::{
    CompletionDetector, CompletionNotifier, DetectorConfig, PollSpec, ResumeReport, RunOutcome,
};
use sr_storage::TaskStateStore;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

#[derive(Default)]
struct Recorder {
    calls: Mutex<Vec<(TaskId, RunOutcome)>>,
}

#[async_trait::async_trait]
impl CompletionNotifier for Recorder {
    async fn on_run_complete(&self, task_id: TaskId, outcome: RunOutcome) {
        self.calls.lock().push((task_id, outcome));
    }
}

struct World {
    detector: Arc<CompletionDetector<FakeClock>>,
    recorder: Arc<Recorder>,
    store: TaskStateStore<FakeClock>,
    clock: FakeClock,
    _dir: tempfile::TempDir,
    workspace: PathBuf,
}

fn world() -> World {
    let dir = tempfile::tempdir().unwrap();
    let workspace = dir.path().join("ws");
    std::fs::create_dir_all(&workspace).unwrap();
    let clock = FakeClock::new();
    let store = TaskStateStore::open(dir.path(), clock.clone()).unwrap();
    let recorder = Arc::new(Recorder::default());
    let config = DetectorConfig {
        tick_interval: Duration::from_millis(5),
        ..DetectorConfig::default()
    };
    let detector = Arc::new(CompletionDetector::new(
        store.clone(),
        recorder.clone(),
        config,
        clock.clone(),
    ));
    World { detector, recorder, store, clock, _dir: dir, workspace }
}

fn write_status(workspace: &Path, task_id: &str, state: RunState, clock: &FakeClock) {
    let mut record = StatusRecord::reset(TaskId::from_string(task_id), clock.now_utc());
    record.state = state;
    sr_storage::write_atomic(&workspace.join(STATUS_FILE_NAME), &record).unwrap();
}

#[tokio::test]
async fn a_leftover_done_record_never_satisfies_the_next_step() {
    let w = world();
    // Step 1 finished and its terminal record is still in the workspace
    // when step 2's polling session begins.
    write_status(&w.workspace, "demo-1.step1", RunState::Done, &w.clock);
    w.detector
        .start(PollSpec {
            task_id: TaskId::from_string("demo-1.step2"),
            workspace: w.workspace.clone(),
            multi_step: true,
        })
        .unwrap();

    tokio::time::sleep(Duration::from_millis(80)).await;
    assert!(w.recorder.calls.lock().is_empty(), "stale record must read as not-started");

    write_status(&w.workspace, "demo-1.step2", RunState::Done, &w.clock);
    assert!(wait_for(|| !w.recorder.calls.lock().is_empty()).await);
    assert_eq!(w.recorder.calls.lock()[0].0, "demo-1.step2");
}

#[tokio::test]
async fn a_hung_agent_is_classified_by_heartbeat_age() {
    let w = world();
    write_status(&w.workspace, "demo-1", RunState::Running, &w.clock);
    w.detector
        .start(PollSpec {
            task_id: TaskId::from_string("demo-1"),
            workspace: w.workspace.clone(),
            multi_step: false,
        })
        .unwrap();

    // The heartbeat freezes while the wall clock moves on.
    w.clock.advance(Duration::from_secs(3 * 60));
    assert!(wait_for(|| !w.recorder.calls.lock().is_empty()).await);
    let calls = w.recorder.calls.lock();
    assert!(matches!(calls[0].1, RunOutcome::HeartbeatTimeout { .. }));
    assert!(calls[0].1.user_message().unwrap().contains("appears hung"));
}

#[tokio::test]
async fn restart_recovery_resumes_and_expires_detections() {
    let w = world();

    // Live task, mid-detection when the previous process died.
    w.store
        .upsert(&TaskId::from_string("alive"), |s| {
            s.set_status(TaskStatus::InProgress, "step 1 launched", 1_000);
            s.workspace_path = Some(w.workspace.clone());
            s.begin_detection(w.clock.epoch_ms());
        })
        .unwrap();

    // Task whose detection began far beyond the max-wait bound.
    let expired_ws = w._dir.path().join("expired-ws");
    std::fs::create_dir_all(&expired_ws).unwrap();
    w.store
        .upsert(&TaskId::from_string("expired"), |s| {
            s.set_status(TaskStatus::InProgress, "step 1 launched", 1_000);
            s.workspace_path = Some(expired_ws);
            s.begin_detection(w.clock.epoch_ms());
        })
        .unwrap();
    // Move the clock past max wait before recovery runs.
    w.clock.advance(Duration::from_secs(46 * 60));
    // Re-stamp the live task's detection so only "expired" is over.
    w.store
        .upsert(&TaskId::from_string("alive"), |s| s.begin_detection(w.clock.epoch_ms()))
        .unwrap();

    let report = w.detector.resume_pending().await.unwrap();
    assert_eq!(report, ResumeReport { resumed: 1, timed_out: 1, skipped: 0 });

    // The expired one was classified immediately.
    {
        let calls = w.recorder.calls.lock();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].0, "expired");
        assert_eq!(calls[0].1, RunOutcome::TimedOut);
    }

    // The live one resumes polling and still completes normally.
    write_status(&w.workspace, "alive", RunState::Done, &w.clock);
    assert!(wait_for(|| w.recorder.calls.lock().len() == 2).await);
    assert_eq!(w.recorder.calls.lock()[1].0, "alive");
    assert!(w.recorder.calls.lock()[1].1.is_success());
}
