pub mod active_jobs;
pub mod parse_dump;
pub mod status;
pub mod sync_slurm;
pub mod sync_storage;

use anyhow::Result;
use serde::Serialize;

use crate::error::SyncErrorCode;
use crate::vsc::audit::{self, RunStatus};
use crate::vsc::health::HealthReport;
use crate::vsc::lock::RunLock;
use crate::vsc::paths::SyncPaths;

#[derive(Debug, Clone, Serialize)]
pub struct CommandReport {
    pub command: String,
    pub ok: bool,
    pub details: Vec<String>,
    pub issues: Vec<String>,
}

impl CommandReport {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            ok: true,
            details: Vec::new(),
            issues: Vec::new(),
        }
    }

    pub fn detail(&mut self, text: impl Into<String>) {
        self.details.push(text.into());
    }

    pub fn issue(&mut self, text: impl Into<String>) {
        self.ok = false;
        self.issues.push(text.into());
    }
}

/// Writes the health file of a run that stopped on an error. The original
/// error is what the caller sees; bookkeeping failures are only logged.
pub fn record_aborted_run(paths: &SyncPaths, job: &str, err: &anyhow::Error) {
    let message = format!("{}: {err:#}", SyncErrorCode::of(err).as_str());
    let mut health = HealthReport::new(job);
    health.critical(message.clone());
    match health.finish().and_then(|h| h.save(paths)) {
        Ok(file) => tracing::debug!(health = %file.display(), "critical health written"),
        Err(save_err) => tracing::warn!(error = %format!("{save_err:#}"), "failed to write health file"),
    }
    audit::record(paths, job, RunStatus::Failed, &message);
}

/// Runs `body` while holding the job's run lock. Every failure, a held lock
/// included, is recorded as a critical run before it reaches the caller.
pub fn run_locked<F>(paths: &SyncPaths, job: &str, dry_run: bool, body: F) -> Result<CommandReport>
where
    F: FnOnce() -> Result<CommandReport>,
{
    RunLock::acquire(paths, job)
        .and_then(|lock| {
            let mode = if dry_run { "dry run" } else { "live run" };
            audit::record(paths, job, RunStatus::Started, mode);
            let mut report = body()?;
            report.detail(format!("lock_file={}", lock.path().display()));
            Ok(report)
        })
        .inspect_err(|err| record_aborted_run(paths, job, err))
}
