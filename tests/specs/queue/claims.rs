// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Concurrency specs: sequence allocation and claim races.

use crate::prelude::*;
use sr_queue::{NewTask, Priority, QueueOptions, TaskQueue};
use std::collections::HashSet;
use std::path::PathBuf;

fn new_task(id: &str) -> NewTask {
    NewTask {
        task_id: TaskId::from_string(id),
        client_folder_path: PathBuf::from("/srv/clients/acme"),
        branch: "main".to_string(),
        priority: Priority::Normal,
        payload: serde_json::json!({"prompt": "work"}),
        dedup_key: None,
    }
}

#[test]
fn concurrent_enqueues_get_unique_increasing_sequences() {
    // Each thread opens its own queue instance over the shared root, the
    // way separate server processes would.
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path().to_path_buf();

    let handles: Vec<_> = (0..8)
        .map(|worker| {
            let root = root.clone();
            std::thread::spawn(move || {
                let queue =
                    TaskQueue::open(&root, QueueOptions::default(), FakeClock::new()).unwrap();
                (0..5u32)
                    .map(|n| {
                        queue.enqueue(new_task(&format!("w{}-{}", worker, n))).unwrap().id
                    })
                    .collect::<Vec<_>>()
            })
        })
        .collect();

    let mut ids: Vec<String> = Vec::new();
    for handle in handles {
        ids.extend(handle.join().unwrap());
    }

    let unique: HashSet<_> = ids.iter().cloned().collect();
    assert_eq!(unique.len(), 40, "no sequence number handed out twice");
    let max: u64 = ids.iter().map(|id| id.parse::<u64>().unwrap()).max().unwrap();
    assert_eq!(max, 40, "sequences are dense and increasing");
}

#[test]
fn concurrent_claims_of_one_entry_elect_a_single_winner() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path().to_path_buf();
    let setup = TaskQueue::open(&root, QueueOptions::default(), FakeClock::new()).unwrap();
    setup.enqueue(new_task("only")).unwrap();

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let root = root.clone();
            std::thread::spawn(move || {
                let queue =
                    TaskQueue::open(&root, QueueOptions::default(), FakeClock::new()).unwrap();
                queue.claim_next().unwrap()
            })
        })
        .collect();

    let claims: Vec<_> = handles.into_iter().filter_map(|h| h.join().unwrap()).collect();
    assert_eq!(claims.len(), 1, "exactly one claimer wins the rename race");
    assert_eq!(claims[0].task_id, "only");
}
