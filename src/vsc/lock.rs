//! Process-level run lock, one per job.

use crate::error::SyncError;
use crate::vsc::paths::SyncPaths;
use anyhow::{Context, Result};
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use std::fs::{self, File, OpenOptions};
use std::io::{Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockPayload {
    pub pid: u32,
    pub version: String,
    pub start_time: String,
}

/// Held for the whole run; the lock is released when dropped.
#[derive(Debug)]
pub struct RunLock {
    file: File,
    path: PathBuf,
}

impl RunLock {
    pub fn acquire(paths: &SyncPaths, job: &str) -> Result<Self> {
        fs::create_dir_all(&paths.logs_dir)
            .with_context(|| format!("failed to create {}", paths.logs_dir.display()))?;
        let path = paths.lock_file(job);
        let mut file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .read(true)
            .write(true)
            .open(&path)
            .with_context(|| format!("failed to open {}", path.display()))?;

        if file.try_lock_exclusive().is_err() {
            let holder = read_payload(&path)
                .ok()
                .flatten()
                .map(|p| format!(" (held by pid {})", p.pid))
                .unwrap_or_default();
            return Err(SyncError::Locked(format!("{}{holder}", path.display())).into());
        }

        let payload = LockPayload {
            pid: std::process::id(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            start_time: chrono::Utc::now().to_rfc3339(),
        };
        file.set_len(0)?;
        file.seek(SeekFrom::Start(0))?;
        file.write_all(serde_json::to_string(&payload)?.as_bytes())?;
        file.flush()?;
        tracing::debug!(lock = %path.display(), "run lock acquired");
        Ok(Self { file, path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for RunLock {
    fn drop(&mut self) {
        if let Err(err) = self.file.unlock() {
            tracing::warn!(lock = %self.path.display(), error = %err, "failed to release run lock");
        }
    }
}

/// Payload of an existing lock file, `None` when there is none or it is empty.
pub fn read_payload(path: &Path) -> Result<Option<LockPayload>> {
    if !path.exists() {
        return Ok(None);
    }
    let raw = fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))?;
    if raw.trim().is_empty() {
        return Ok(None);
    }
    let payload = serde_json::from_str(&raw)
        .with_context(|| format!("failed to parse lock payload {}", path.display()))?;
    Ok(Some(payload))
}
