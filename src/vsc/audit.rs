//! Run outcomes appended to `<logs>/audit.log`, one JSON object per line.

use crate::vsc::paths::SyncPaths;
use crate::vsc::util::now_epoch_secs;
use anyhow::{Context, Result};
use serde::Serialize;
use std::fs::{self, OpenOptions};
use std::io::Write;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Started,
    Ok,
    /// Finished, but some entities failed.
    Partial,
    Failed,
}

#[derive(Serialize)]
struct AuditLine<'a> {
    at_epoch_secs: u64,
    phase: &'a str,
    status: RunStatus,
    message: &'a str,
}

fn append(paths: &SyncPaths, job: &str, status: RunStatus, message: &str) -> Result<()> {
    let line = AuditLine {
        at_epoch_secs: now_epoch_secs()?,
        phase: job,
        status,
        message,
    };
    let mut encoded = serde_json::to_vec(&line)?;
    encoded.push(b'\n');

    fs::create_dir_all(&paths.logs_dir)
        .with_context(|| format!("failed to create {}", paths.logs_dir.display()))?;
    let path = paths.audit_log();
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)
        .and_then(|mut file| file.write_all(&encoded))
        .with_context(|| format!("failed to append to {}", path.display()))
}

/// Appends one event for `job`. A failed write is logged and dropped so the
/// run itself carries on.
pub fn record(paths: &SyncPaths, job: &str, status: RunStatus, message: &str) {
    if let Err(err) = append(paths, job, status, message) {
        tracing::warn!(error = %format!("{err:#}"), job, ?status, "audit log write failed");
    }
}
