//! Per-job watermark: the start time of the last clean pass.

use crate::vsc::paths::SyncPaths;
use anyhow::{Context, Result, bail};
use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::Write;
use std::path::PathBuf;
use tempfile::NamedTempFile;

pub const WATERMARK_FORMAT: &str = "%Y%m%d%H%M%SZ";
/// Used when no watermark was ever written: older than any account page change.
pub const DEFAULT_WATERMARK: &str = "20140101000000Z";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct JobState {
    pub schema_version: u32,
    pub timestamp: String,
    pub last_success_epoch_secs: Option<u64>,
}

impl Default for JobState {
    fn default() -> Self {
        Self {
            schema_version: 1,
            timestamp: DEFAULT_WATERMARK.to_string(),
            last_success_epoch_secs: None,
        }
    }
}

pub fn format_watermark(at: DateTime<Utc>) -> String {
    at.format(WATERMARK_FORMAT).to_string()
}

/// Accepts `YYYYMMDDHHMMSSZ` and returns it normalized.
pub fn parse_watermark(raw: &str) -> Result<String> {
    let trimmed = raw.trim();
    if !trimmed.ends_with('Z') {
        bail!("timestamp `{trimmed}` must end in Z (UTC)");
    }
    let parsed = NaiveDateTime::parse_from_str(trimmed, WATERMARK_FORMAT)
        .with_context(|| format!("timestamp `{trimmed}` is not in YYYYMMDDHHMMSSZ form"))?;
    Ok(format_watermark(parsed.and_utc()))
}

pub fn load(paths: &SyncPaths, job: &str) -> Result<JobState> {
    let file = paths.timestamp_file(job);
    if !file.exists() {
        return Ok(JobState::default());
    }

    let raw =
        fs::read_to_string(&file).with_context(|| format!("failed to read {}", file.display()))?;
    let parsed: JobState = serde_json::from_str(&raw)
        .with_context(|| format!("failed to parse {}", file.display()))?;
    parse_watermark(&parsed.timestamp)
        .with_context(|| format!("invalid watermark in {}", file.display()))?;
    Ok(parsed)
}

/// Replaces the state file atomically so a crash never leaves half a watermark.
pub fn save(paths: &SyncPaths, job: &str, state: &JobState) -> Result<PathBuf> {
    let file = paths.timestamp_file(job);
    fs::create_dir_all(&paths.state_dir)
        .with_context(|| format!("failed to create {}", paths.state_dir.display()))?;
    let data = serde_json::to_string_pretty(state)?;
    let mut tmp = NamedTempFile::new_in(&paths.state_dir)
        .with_context(|| format!("failed to stage {}", file.display()))?;
    tmp.write_all(format!("{data}\n").as_bytes())?;
    tmp.persist(&file)
        .with_context(|| format!("failed to write {}", file.display()))?;
    Ok(file)
}
