//! Slurm accounting: dump parsing, desired-state diffing and `sacctmgr`
//! command execution.

pub mod dump;
pub mod exec;
pub mod sacct;
pub mod sacctmgr;
pub mod sync;

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

/// Configured binary when set, else the first match on `PATH`.
pub fn resolve_tool(configured: Option<&Path>, name: &str) -> Result<PathBuf> {
    if let Some(path) = configured {
        return Ok(path.to_path_buf());
    }
    which::which(name).with_context(|| format!("{name} not found on PATH; configure its location"))
}
