//! Sequential execution of a planned `sacctmgr` batch.

use super::sacctmgr::{SacctMgr, SacctMgrCommand};
use crate::error::SyncError;
use crate::vsc::util::{render_command, run_command_with_optional_timeout};
use anyhow::{Context, Result};
use serde::Serialize;

/// `sacctmgr` asks `(N/y):` before committing when it is not told `-i`.
const CONFIRMATION: &str = "y\n";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ExecSummary {
    pub planned: usize,
    pub executed: usize,
}

/// Runs `commands` in order. The first failing command stops the batch; the
/// error says how many ran and how many were left.
pub fn execute_commands(
    sacctmgr: &SacctMgr,
    commands: &[SacctMgrCommand],
    dry_run: bool,
) -> Result<ExecSummary> {
    let mut summary = ExecSummary {
        planned: commands.len(),
        executed: 0,
    };
    if dry_run {
        for command in commands {
            tracing::info!(dry_run = true, "would run {command}");
        }
        return Ok(summary);
    }

    for (idx, command) in commands.iter().enumerate() {
        let mut cmd = sacctmgr.command(command);
        let rendered = render_command(&cmd);
        tracing::info!(command = %rendered, "running accounting command");
        let output = run_command_with_optional_timeout(&mut cmd, Some(CONFIRMATION), Some(sacctmgr.timeout_secs()))
            .with_context(|| format!("failed to run {rendered}"))?;
        if !output.status.success() {
            let remaining = commands.len() - idx - 1;
            tracing::error!(
                command = %rendered,
                executed = summary.executed,
                remaining,
                "accounting command failed, stopping the batch"
            );
            let failure = SyncError::CommandFailed {
                command: rendered,
                code: output.status.code(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            };
            return Err(anyhow::Error::new(failure).context(format!(
                "stopped after {} of {} accounting commands; {remaining} not run",
                summary.executed,
                commands.len()
            )));
        }
        summary.executed += 1;
    }
    Ok(summary)
}
