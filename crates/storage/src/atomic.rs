// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Safe JSON reads and atomic JSON writes.
//!
//! `read_safe` quarantines corrupt files instead of erroring; `write_atomic`
//! guarantees a reader never observes a partially-written file (temp file +
//! fsync + rename, which is atomic within one filesystem).

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};
use thiserror::Error;

/// Errors from atomic store operations
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

fn epoch_ms_now() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_millis() as u64
}

/// Read a JSON file, returning `default` when the file is missing, empty,
/// or unparsable. See [`read_safe_validated`] for the variant with a
/// validation predicate.
pub fn read_safe<T: DeserializeOwned>(path: &Path, default: T) -> T {
    read_safe_validated(path, default, |_| true)
}

/// Read a JSON file, returning `default` when the file is missing, empty,
/// unparsable, or fails `validate`.
///
/// A file that exists but cannot be used is copied to a timestamped
/// quarantine path (`<path>.corrupt.<ms>`) before the default is returned.
/// The original is left in place — reading never destroys evidence.
pub fn read_safe_validated<T, F>(path: &Path, default: T, validate: F) -> T
where
    T: DeserializeOwned,
    F: Fn(&T) -> bool,
{
    let raw = match fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return default,
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "unreadable record, using default");
            return default;
        }
    };

    if raw.trim().is_empty() {
        return default;
    }

    match serde_json::from_str::<T>(&raw) {
        Ok(value) => {
            if !validate(&value) {
                tracing::warn!(path = %path.display(), "record failed validation, quarantining");
                quarantine(path);
                return default;
            }
            value
        }
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "corrupt record, quarantining");
            quarantine(path);
            default
        }
    }
}

/// Copy a bad file aside for postmortem inspection. Best-effort.
fn quarantine(path: &Path) {
    let target = quarantine_path(path, epoch_ms_now());
    if let Err(e) = fs::copy(path, &target) {
        tracing::warn!(
            path = %path.display(),
            target = %target.display(),
            error = %e,
            "failed to quarantine corrupt record"
        );
    } else {
        tracing::info!(path = %path.display(), target = %target.display(), "quarantined corrupt record");
    }
}

pub(crate) fn quarantine_path(path: &Path, epoch_ms: u64) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(format!(".corrupt.{}", epoch_ms));
    PathBuf::from(name)
}

/// Serialize `value` and atomically replace `path` with it.
///
/// The temp file lands next to the target (`<path>.tmp.<pid>.<ms>`) so the
/// final rename stays on one device. On any failure the temp file is
/// removed and the error propagated.
pub fn write_atomic<T: Serialize>(path: &Path, value: &T) -> Result<(), StoreError> {
    let tmp = temp_sibling(path);
    write_via_temp(path, &tmp, value)
}

/// Same contract as [`write_atomic`], but stages the temp file in an
/// explicit directory (the `status/tmp/` convention) instead of next to
/// the target.
pub fn write_atomic_staged<T: Serialize>(
    path: &Path,
    stage_dir: &Path,
    value: &T,
) -> Result<(), StoreError> {
    fs::create_dir_all(stage_dir)?;
    let file_name = path.file_name().unwrap_or_default().to_os_string();
    let mut tmp_name = file_name;
    tmp_name.push(format!(".tmp.{}.{}", std::process::id(), epoch_ms_now()));
    let tmp = stage_dir.join(tmp_name);
    write_via_temp(path, &tmp, value)
}

fn temp_sibling(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(format!(".tmp.{}.{}", std::process::id(), epoch_ms_now()));
    PathBuf::from(name)
}

fn write_via_temp<T: Serialize>(path: &Path, tmp: &Path, value: &T) -> Result<(), StoreError> {
    let result = (|| -> Result<(), StoreError> {
        let data = serde_json::to_vec_pretty(value)?;
        let mut file = fs::File::create(tmp)?;
        file.write_all(&data)?;
        file.sync_all()?;
        fs::rename(tmp, path)?;
        Ok(())
    })();

    if result.is_err() {
        let _ = fs::remove_file(tmp);
    }
    result
}

#[cfg(test)]
#[path = "atomic_tests.rs"]
mod tests;
