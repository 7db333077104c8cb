// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Subprocess execution with hard timeouts.

use std::path::Path;
use std::process::Output;
use std::time::Duration;
use thiserror::Error;
use tokio::process::Command;

/// Default timeout for git operations; none of the supported commands
/// should run longer than this against a workspace-sized repository.
pub const GIT_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Error)]
pub enum SubprocessError {
    #[error("{context} timed out after {secs}s")]
    Timeout { context: String, secs: u64 },
    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },
}

/// Run a command to completion with a hard timeout, killing the child on
/// expiry.
pub async fn run_with_timeout(
    mut cmd: Command,
    timeout: Duration,
    context: &str,
) -> Result<Output, SubprocessError> {
    cmd.kill_on_drop(true);
    match tokio::time::timeout(timeout, cmd.output()).await {
        Ok(Ok(output)) => Ok(output),
        Ok(Err(e)) => Err(SubprocessError::Io { context: context.to_string(), source: e }),
        Err(_) => {
            tracing::warn!(context, secs = timeout.as_secs(), "subprocess timed out");
            Err(SubprocessError::Timeout {
                context: context.to_string(),
                secs: timeout.as_secs(),
            })
        }
    }
}

/// Build a git command scoped to `dir`, scrubbing ambient git environment
/// so the operation cannot escape into a parent repository.
pub fn git_command(dir: &Path, args: &[&str]) -> Command {
    let mut cmd = Command::new("git");
    cmd.arg("-C").arg(dir).args(args).env_remove("GIT_DIR").env_remove("GIT_WORK_TREE");
    cmd
}

#[cfg(test)]
#[path = "subprocess_tests.rs"]
mod tests;
