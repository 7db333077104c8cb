// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! sr-core: Domain types for the Showrunner agent-run orchestrator

pub mod macros;

pub mod checkpoint;
pub mod clock;
pub mod failure;
pub mod id;
pub mod status;
pub mod task;

#[cfg(any(test, feature = "test-support"))]
pub mod test_support;

pub use checkpoint::{recovery_tag, RollbackRecord, StepCheckpoint, NO_COMMITS_YET};
pub use clock::{Clock, FakeClock, SystemClock};
pub use failure::{classify_agent_error, AgentFailure};
pub use id::{short, TaskId};
pub use status::{RunState, StatusRecord, STATUS_FILE_NAME};
#[cfg(any(test, feature = "test-support"))]
pub use task::TaskStateBuilder;
pub use task::{AgentCompletion, TaskMetadata, TaskState, TaskStatus};
