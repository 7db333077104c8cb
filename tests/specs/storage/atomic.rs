// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Torn-write specs for the atomic store.

use serde::{Deserialize, Serialize};
use sr_storage::{read_safe, write_atomic};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct Record {
    version: u32,
    body: String,
}

#[test]
fn a_kill_before_rename_never_tears_the_target() {
    // A process dying between the temp-file write and the rename leaves
    // only the temp file behind. Readers of the target must still see the
    // previous, fully-written content.
    let dir = tempfile::tempdir().unwrap();
    let target = dir.path().join("record.json");

    let old = Record { version: 1, body: "x".repeat(4096) };
    write_atomic(&target, &old).unwrap();

    // Simulated crash: a half-serialized temp file next to the target.
    let orphan = dir.path().join("record.json.tmp.999.111");
    std::fs::write(&orphan, &serde_json::to_vec(&old).unwrap()[..10]).unwrap();

    let seen: Option<Record> = read_safe(&target, None);
    assert_eq!(seen, Some(old));
}

#[test]
fn readers_see_old_or_new_never_a_mixture() {
    let dir = tempfile::tempdir().unwrap();
    let target = dir.path().join("record.json");
    write_atomic(&target, &Record { version: 0, body: "seed".to_string() }).unwrap();

    let path = target.clone();
    let writer = std::thread::spawn(move || {
        for version in 1..=50u32 {
            write_atomic(&path, &Record { version, body: format!("body-{}", version) })
                .unwrap();
        }
    });

    for _ in 0..200 {
        let seen: Option<Record> = read_safe(&target, None);
        let record = seen.expect("target always parses");
        // Every observation is internally consistent.
        if record.version == 0 {
            assert_eq!(record.body, "seed");
        } else {
            assert_eq!(record.body, format!("body-{}", record.version));
        }
    }
    writer.join().unwrap();
}

#[test]
fn corrupt_target_is_quarantined_and_defaulted() {
    let dir = tempfile::tempdir().unwrap();
    let target = dir.path().join("record.json");
    std::fs::write(&target, "{\"version\": 3, \"body\": ").unwrap();

    let seen: Option<Record> = read_safe(&target, None);
    assert!(seen.is_none());

    let quarantined = std::fs::read_dir(dir.path())
        .unwrap()
        .filter_map(|e| e.ok())
        .any(|e| e.file_name().to_string_lossy().contains(".corrupt."));
    assert!(quarantined, "bad file kept for postmortem");
}
