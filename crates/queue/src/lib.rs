// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! sr-queue: crash-safe, filesystem-backed FIFO task queue with a single
//! global runner slot.

pub mod entry;
pub mod queue;

pub use entry::{file_name, parse_file_name, NewTask, Outcome, Priority, QueueEntry, SEQ_WIDTH};
pub use queue::{
    EntrySummary, QueueError, QueueOptions, QueueSnapshot, StalePolicy, TaskQueue, DONE_DIR,
    FAILED_DIR, PENDING_DIR, RUNNING_DIR,
};
