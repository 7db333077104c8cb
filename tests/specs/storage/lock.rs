// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Cross-process exclusion specs for the scheduler lock.

use crate::prelude::*;
use sr_storage::{try_acquire, LockOptions};
use std::sync::Arc;

#[test]
fn concurrent_schedulers_elect_exactly_one() {
    // Two (or more) maintenance passes firing in the same tick window:
    // exactly one acquires locks/scheduler.lock and runs; the rest
    // observe the lock and skip. Guards are carried back to the main
    // thread so no release happens inside the contention window.
    let dir = tempfile::tempdir().unwrap();
    let lock_path = Arc::new(dir.path().join("locks/scheduler.lock"));
    let opts = LockOptions::default();

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let lock_path = Arc::clone(&lock_path);
            std::thread::spawn(move || {
                let clock = FakeClock::new();
                try_acquire(&lock_path, &opts, &clock).unwrap()
            })
        })
        .collect();
    let guards: Vec<_> =
        handles.into_iter().filter_map(|handle| handle.join().unwrap()).collect();

    assert_eq!(guards.len(), 1, "exactly one scheduler runs the pass");
    for guard in guards {
        guard.release().unwrap();
    }
    assert!(!lock_path.exists(), "winner released the lock");
}

#[test]
fn next_scheduler_breaks_a_crashed_holders_lease() {
    let dir = tempfile::tempdir().unwrap();
    let lock_path = dir.path().join("locks/scheduler.lock");
    let clock = FakeClock::new();
    let opts = LockOptions { stale_ms: 10_000, ..LockOptions::default() };

    let guard = try_acquire(&lock_path, &opts, &clock).unwrap().unwrap();
    // Crash without release.
    std::mem::forget(guard);

    clock.advance(std::time::Duration::from_millis(10_001));
    let recovered = try_acquire(&lock_path, &opts, &clock).unwrap();
    assert!(recovered.is_some(), "expired lease must not wedge maintenance");
}
