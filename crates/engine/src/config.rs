// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Engine configuration: TOML with a default for every knob.
//!
//! An absent file means defaults; a malformed file is an error — a half
//! readable config silently falling back would hide operator mistakes.

use crate::detector::DetectorConfig;
use serde::{Deserialize, Serialize};
use sr_queue::{QueueOptions, StalePolicy};
use sr_storage::LockOptions;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("malformed config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EngineConfig {
    pub detector: DetectorSettings,
    pub queue: QueueSettings,
    pub lock: LockSettings,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DetectorSettings {
    pub tick_interval_secs: u64,
    /// Heartbeat allowance for single-step tasks.
    pub heartbeat_max_secs: u64,
    /// Longer allowance for multi-step workflows.
    pub heartbeat_max_multi_step_secs: u64,
    pub max_wait_secs: u64,
    pub max_consecutive_errors: u32,
    pub error_backoff_secs: u64,
}

impl Default for DetectorSettings {
    fn default() -> Self {
        Self {
            tick_interval_secs: 30,
            heartbeat_max_secs: 2 * 60,
            heartbeat_max_multi_step_secs: 10 * 60,
            max_wait_secs: 45 * 60,
            max_consecutive_errors: 5,
            error_backoff_secs: 5,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct QueueSettings {
    pub max_payload_bytes: usize,
    pub max_pending: usize,
    /// Running entries older than this are reclaimed by maintenance.
    pub running_ttl_secs: u64,
    /// Whether reclamation re-enqueues instead of failing.
    pub requeue_stale: bool,
    /// Entries kept in each of `done/` and `failed/`.
    pub retention: usize,
}

impl Default for QueueSettings {
    fn default() -> Self {
        Self {
            max_payload_bytes: 1024 * 1024,
            max_pending: 100,
            running_ttl_secs: 60 * 60,
            requeue_stale: false,
            retention: 200,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LockSettings {
    pub stale_ms: u64,
    pub retry_interval_ms: u64,
    pub max_retries: u32,
}

impl Default for LockSettings {
    fn default() -> Self {
        Self { stale_ms: 60_000, retry_interval_ms: 250, max_retries: 40 }
    }
}

impl EngineConfig {
    /// Load from a TOML file. Absent file → defaults; malformed → error.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = match fs::read_to_string(path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "no config file, using defaults");
                return Ok(Self::default());
            }
            Err(e) => return Err(e.into()),
        };
        toml::from_str(&raw)
            .map_err(|source| ConfigError::Parse { path: path.to_path_buf(), source })
    }

    pub fn detector_config(&self) -> DetectorConfig {
        DetectorConfig {
            tick_interval: Duration::from_secs(self.detector.tick_interval_secs),
            heartbeat_max: Duration::from_secs(self.detector.heartbeat_max_secs),
            heartbeat_max_multi_step: Duration::from_secs(
                self.detector.heartbeat_max_multi_step_secs,
            ),
            max_wait: Duration::from_secs(self.detector.max_wait_secs),
            max_consecutive_errors: self.detector.max_consecutive_errors,
            error_backoff: Duration::from_secs(self.detector.error_backoff_secs),
        }
    }

    pub fn queue_options(&self) -> QueueOptions {
        QueueOptions {
            max_payload_bytes: self.queue.max_payload_bytes,
            max_pending: self.queue.max_pending,
            lock: self.lock_options(),
        }
    }

    pub fn lock_options(&self) -> LockOptions {
        LockOptions {
            stale_ms: self.lock.stale_ms,
            retry_interval: Duration::from_millis(self.lock.retry_interval_ms),
            max_retries: self.lock.max_retries,
        }
    }

    pub fn running_ttl(&self) -> Duration {
        Duration::from_secs(self.queue.running_ttl_secs)
    }

    pub fn stale_policy(&self) -> StalePolicy {
        if self.queue.requeue_stale {
            StalePolicy::Requeue
        } else {
            StalePolicy::Fail
        }
    }
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
