// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Checkpoint/rollback specs against real git repositories.

use crate::prelude::*;
use sr_core::StepCheckpoint;
use sr_engine::{CheckpointRollbackService, GitCli, RollbackError, RollbackOptions, VcsError};
use sr_storage::TaskStateStore;
use std::path::Path;
use std::sync::Arc;

fn service(
    root: &Path,
) -> (CheckpointRollbackService<FakeClock>, TaskStateStore<FakeClock>, FakeClock) {
    let clock = FakeClock::new();
    let store = TaskStateStore::open(root, clock.clone()).unwrap();
    (
        CheckpointRollbackService::new(Arc::new(GitCli::new()), store.clone(), clock.clone()),
        store,
        clock,
    )
}

fn id(s: &str) -> TaskId {
    TaskId::from_string(s)
}

#[tokio::test]
async fn rollback_discards_exactly_the_commits_after_the_checkpoint() {
    let dir = tempfile::tempdir().unwrap();
    let ws = dir.path().join("ws");
    std::fs::create_dir_all(&ws).unwrap();
    init_repo(&ws);
    let base = commit_file(&ws, "index.html", "v1", "base");

    let (service, _, clock) = service(dir.path());
    let checkpoint = service.snapshot(&ws, &id("demo-1"), 2).await.unwrap();
    assert_eq!(checkpoint.git_commit_hash, base);

    // Two commits of partially-applied step work.
    commit_file(&ws, "index.html", "v2", "step work 1");
    commit_file(&ws, "about.html", "draft", "step work 2");

    // Distinct timestamp for the pre-rollback safety tag.
    clock.advance(std::time::Duration::from_secs(60));

    let outcome = service
        .rollback(&ws, &id("demo-1"), &checkpoint, &RollbackOptions::default())
        .await
        .unwrap();

    assert_eq!(outcome.commits_discarded, 2);
    assert_eq!(git(&ws, &["rev-parse", "HEAD"]), base);
    assert_eq!(std::fs::read_to_string(ws.join("index.html")).unwrap(), "v1");
    assert!(!ws.join("about.html").exists());

    // Both the checkpoint tag and the pre-rollback safety tag exist for
    // manual recovery.
    let tags = git(&ws, &["tag", "-l"]);
    assert_eq!(tags.lines().filter(|t| t.starts_with("recovery-demo-1-step2-")).count(), 2);
}

#[tokio::test]
async fn sentinel_checkpoint_is_rejected_without_touching_git() {
    let dir = tempfile::tempdir().unwrap();
    let ws = dir.path().join("ws");
    std::fs::create_dir_all(&ws).unwrap();
    init_repo(&ws);
    let head = commit_file(&ws, "index.html", "v1", "base");

    let (service, _, _) = service(dir.path());
    let err = service
        .rollback(&ws, &id("demo-1"), &StepCheckpoint::placeholder(1, 0), &RollbackOptions::default())
        .await
        .unwrap_err();

    assert!(
        matches!(err, RollbackError::InvalidCheckpoint(ref msg) if msg == "no valid commit to roll back to")
    );
    assert_eq!(git(&ws, &["rev-parse", "HEAD"]), head, "working tree untouched");
    assert!(git(&ws, &["tag", "-l"]).is_empty(), "no safety tag without a rollback");
}

#[tokio::test]
async fn unreachable_commit_is_an_invalid_checkpoint() {
    let dir = tempfile::tempdir().unwrap();
    let ws = dir.path().join("ws");
    std::fs::create_dir_all(&ws).unwrap();
    init_repo(&ws);
    commit_file(&ws, "index.html", "v1", "base");

    let (service, _, _) = service(dir.path());
    let bogus = StepCheckpoint::new(1, "0123456789abcdef0123456789abcdef01234567", 0);
    let err = service
        .rollback(&ws, &id("demo-1"), &bogus, &RollbackOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, RollbackError::InvalidCheckpoint(_)));
}

#[tokio::test]
async fn snapshot_of_an_empty_repository_records_the_placeholder() {
    let dir = tempfile::tempdir().unwrap();
    let ws = dir.path().join("ws");
    std::fs::create_dir_all(&ws).unwrap();
    init_repo(&ws);

    let (service, store, _) = service(dir.path());
    let checkpoint = service.snapshot(&ws, &id("demo-1"), 1).await.unwrap();
    assert!(!checkpoint.has_commit());

    let state = store.load(&id("demo-1")).unwrap();
    assert_eq!(state.metadata.checkpoints[0], checkpoint);
}

#[tokio::test]
async fn operations_refuse_a_non_root_workspace() {
    // The workspace is a plain subdirectory of a repository; git context
    // would leak into the parent repo, so the provider must refuse.
    let dir = tempfile::tempdir().unwrap();
    let repo = dir.path().join("repo");
    let ws = repo.join("sites/acme");
    std::fs::create_dir_all(&ws).unwrap();
    init_repo(&repo);
    commit_file(&repo, "README.md", "hi", "base");

    let (service, _, _) = service(dir.path());
    let err = service.snapshot(&ws, &id("demo-1"), 1).await.unwrap_err();
    assert!(matches!(err, RollbackError::Vcs(VcsError::NotARepoRoot(_))));
}

#[tokio::test]
async fn preview_lists_what_a_rollback_would_discard() {
    let dir = tempfile::tempdir().unwrap();
    let ws = dir.path().join("ws");
    std::fs::create_dir_all(&ws).unwrap();
    init_repo(&ws);
    commit_file(&ws, "index.html", "v1", "base");

    let (service, _, _) = service(dir.path());
    let checkpoint = service.snapshot(&ws, &id("demo-1"), 1).await.unwrap();
    let after = commit_file(&ws, "style.css", "body{}", "step work");

    let preview = service.preview(&ws, &checkpoint).await.unwrap();
    assert_eq!(preview.commits, vec![after]);
    assert_eq!(preview.changed_files, vec![std::path::PathBuf::from("style.css")]);

    // Non-destructive: the step work is still there.
    assert_eq!(git(&ws, &["rev-parse", "HEAD"]), preview.commits[0]);
}

#[tokio::test]
async fn skip_step_is_idempotent_across_rapid_calls() {
    let dir = tempfile::tempdir().unwrap();
    let ws = dir.path().join("ws");
    std::fs::create_dir_all(&ws).unwrap();

    let (service, store, _) = service(dir.path());
    service.skip_step(&ws, &id("demo-1"), 3).await.unwrap();
    service.skip_step(&ws, &id("demo-1"), 3).await.unwrap();

    let state = store.load(&id("demo-1")).unwrap();
    assert_eq!(state.metadata.skipped_steps, vec![3], "exactly one entry per step");
}
