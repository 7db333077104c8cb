// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Cross-process mutual exclusion via lock-file leases.
//!
//! A lock is an exclusively-created file whose body is a [`Lease`]
//! (holder pid + acquisition time). Release is deletion. A lease older
//! than `stale_ms`, or whose holder process no longer exists, is broken
//! by the next acquirer — a crashed holder can therefore never wedge the
//! system.

use crate::atomic::read_safe;
use serde::{Deserialize, Serialize};
use sr_core::Clock;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Errors from lock acquisition
#[derive(Debug, Error)]
pub enum LockError {
    #[error("timed out waiting for lock {0} after {1} attempts")]
    Timeout(PathBuf, u32),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Ownership record stored inside a lock file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lease {
    pub holder_pid: u32,
    pub acquired_at_ms: u64,
}

impl Lease {
    fn current(epoch_ms: u64) -> Self {
        Self { holder_pid: std::process::id(), acquired_at_ms: epoch_ms }
    }

    /// A lease is breakable when it has outlived `stale_ms` or its holder
    /// process is gone.
    pub fn is_breakable(&self, now_ms: u64, stale_ms: u64) -> bool {
        if now_ms.saturating_sub(self.acquired_at_ms) > stale_ms {
            return true;
        }
        !holder_alive(self.holder_pid)
    }
}

#[cfg(unix)]
fn holder_alive(pid: u32) -> bool {
    use nix::sys::signal::kill;
    use nix::unistd::Pid;
    // Signal 0 probes existence without delivering anything.
    let Ok(pid) = i32::try_from(pid) else {
        return false;
    };
    kill(Pid::from_raw(pid), None).is_ok()
}

#[cfg(not(unix))]
fn holder_alive(_pid: u32) -> bool {
    // No cheap probe; fall back to age-based staleness only.
    true
}

/// Tuning for lock acquisition.
#[derive(Debug, Clone, Copy)]
pub struct LockOptions {
    /// Age beyond which an existing lease is forcibly broken.
    pub stale_ms: u64,
    /// Backoff between acquisition attempts.
    pub retry_interval: Duration,
    /// Attempts before giving up with [`LockError::Timeout`].
    pub max_retries: u32,
}

impl Default for LockOptions {
    fn default() -> Self {
        Self { stale_ms: 60_000, retry_interval: Duration::from_millis(250), max_retries: 40 }
    }
}

/// Held lock. Deleting the file releases it; `Drop` does so best-effort
/// on every exit path.
#[derive(Debug)]
pub struct LockGuard {
    path: PathBuf,
    released: bool,
}

impl LockGuard {
    /// Explicit release, surfacing the deletion error if any.
    pub fn release(mut self) -> Result<(), LockError> {
        self.released = true;
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        if !self.released {
            if let Err(e) = fs::remove_file(&self.path) {
                if e.kind() != std::io::ErrorKind::NotFound {
                    tracing::warn!(path = %self.path.display(), error = %e, "failed to release lock");
                }
            }
        }
    }
}

/// One non-blocking acquisition attempt.
///
/// Breaks a stale or holder-dead lease it finds, then tries once more.
/// Returns `None` when another live process holds the lock — the caller
/// observes the lock and skips, which is exactly what the scheduled
/// maintenance path wants.
pub fn try_acquire(
    path: &Path,
    opts: &LockOptions,
    clock: &impl Clock,
) -> Result<Option<LockGuard>, LockError> {
    if let Some(guard) = create_exclusive(path, clock.epoch_ms())? {
        return Ok(Some(guard));
    }

    let lease: Option<Lease> = read_safe(path, None);
    let breakable = match lease {
        Some(ref lease) => lease.is_breakable(clock.epoch_ms(), opts.stale_ms),
        // Unreadable lease body carries no holder or age to honor.
        None => true,
    };

    if breakable {
        tracing::warn!(path = %path.display(), ?lease, "breaking stale lock");
        match fs::remove_file(path) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        return create_exclusive(path, clock.epoch_ms());
    }

    Ok(None)
}

/// Run `f` with the lock held, retrying with backoff until acquired or
/// `max_retries` is exhausted. The lock is released on every exit path.
pub fn with_lock<R>(
    path: &Path,
    opts: &LockOptions,
    clock: &impl Clock,
    f: impl FnOnce() -> R,
) -> Result<R, LockError> {
    let mut attempts = 0u32;
    let guard = loop {
        if let Some(guard) = try_acquire(path, opts, clock)? {
            break guard;
        }
        attempts += 1;
        if attempts >= opts.max_retries {
            return Err(LockError::Timeout(path.to_path_buf(), attempts));
        }
        std::thread::sleep(opts.retry_interval);
    };

    let result = f();
    if let Err(e) = guard.release() {
        tracing::warn!(path = %path.display(), error = %e, "lock release failed");
    }
    Ok(result)
}

fn create_exclusive(path: &Path, epoch_ms: u64) -> Result<Option<LockGuard>, LockError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    match fs::OpenOptions::new().write(true).create_new(true).open(path) {
        Ok(mut file) => {
            let lease = Lease::current(epoch_ms);
            // The file existing IS the lock; the body is diagnostics +
            // staleness input. A failed body write must not leave us
            // holding an anonymous lock.
            if let Err(e) = serde_json::to_vec(&lease)
                .map_err(std::io::Error::other)
                .and_then(|data| file.write_all(&data))
            {
                let _ = fs::remove_file(path);
                return Err(e.into());
            }
            Ok(Some(LockGuard { path: path.to_path_buf(), released: false }))
        }
        Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => Ok(None),
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
#[path = "lock_tests.rs"]
mod tests;
