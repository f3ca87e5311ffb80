//! Running and pending jobs of a user, from `sacct`.

use super::dump::{SlurmJob, parse_dump};
use super::resolve_tool;
use crate::error::SyncError;
use crate::vsc::config::SlurmConfig;
use crate::vsc::util::{render_command, run_command_with_optional_timeout};
use anyhow::{Context, Result};
use std::collections::BTreeSet;
use std::path::PathBuf;
use std::process::Command;

const UNKNOWN_USER_MARKER: &str = "Invalid user id";

#[derive(Debug, Clone)]
pub struct Sacct {
    bin: PathBuf,
    timeout_secs: u64,
}

impl Sacct {
    pub fn new(bin: impl Into<PathBuf>, timeout_secs: u64) -> Self {
        Self {
            bin: bin.into(),
            timeout_secs,
        }
    }

    pub fn from_config(cfg: &SlurmConfig) -> Result<Self> {
        let bin = resolve_tool(cfg.sacct_bin.as_deref(), "sacct")?;
        Ok(Self::new(bin, cfg.command_timeout_secs))
    }

    /// `None` when Slurm does not know the user at all.
    pub fn active_jobs(&self, user: &str) -> Result<Option<BTreeSet<SlurmJob>>> {
        let mut cmd = Command::new(&self.bin);
        cmd.args([
            "--allclusters",
            "--parsable2",
            "--state",
            "RUNNING,PENDING",
            "--user",
            user,
        ]);
        let rendered = render_command(&cmd);
        let output = run_command_with_optional_timeout(&mut cmd, None, Some(self.timeout_secs))
            .with_context(|| format!("failed to run {rendered}"))?;
        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);

        if !output.status.success() {
            if stdout.contains(UNKNOWN_USER_MARKER) || stderr.contains(UNKNOWN_USER_MARKER) {
                tracing::warn!(user, "user unknown to slurm, assuming no active jobs");
                return Ok(None);
            }
            return Err(SyncError::CommandFailed {
                command: rendered,
                code: output.status.code(),
                stderr: stderr.trim().to_string(),
            }
            .into());
        }

        let lines: Vec<&str> = stdout.lines().collect();
        let jobs = parse_dump::<SlurmJob, _>(&lines)
            .with_context(|| format!("failed to parse output of {rendered}"))?;
        Ok(Some(jobs))
    }
}
