//! Nagios-style health file written at the end of every run.

use crate::vsc::paths::SyncPaths;
use crate::vsc::report::SyncOutcome;
use crate::vsc::util::now_epoch_secs;
use anyhow::{Context, Result};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::PathBuf;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncKind {
    Users,
    Quota,
    Vos,
    Projects,
}

impl SyncKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Users => "users",
            Self::Quota => "quota",
            Self::Vos => "vos",
            Self::Projects => "projects",
        }
    }

    /// Failure counts at which the run turns WARNING and CRITICAL.
    pub fn thresholds(self) -> (u64, u64) {
        match self {
            Self::Users => (1, 10),
            Self::Quota => (1, 5),
            Self::Vos | Self::Projects => (1, 2),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HealthState {
    Ok,
    Warning,
    Critical,
}

impl fmt::Display for HealthState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Ok => "OK",
            Self::Warning => "WARNING",
            Self::Critical => "CRITICAL",
        })
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub job: String,
    pub state: HealthState,
    pub summary: String,
    pub at_epoch_secs: u64,
    pub stats: BTreeMap<String, u64>,
    #[serde(skip)]
    perfdata: Vec<String>,
    #[serde(skip)]
    error: Option<String>,
}

impl HealthReport {
    pub fn new(job: &str) -> Self {
        Self {
            job: job.to_string(),
            state: HealthState::Ok,
            summary: String::new(),
            at_epoch_secs: 0,
            stats: BTreeMap::new(),
            perfdata: Vec::new(),
            error: None,
        }
    }

    /// Counts one pass over one storage and raises the state by threshold.
    pub fn record(&mut self, storage: &str, kind: SyncKind, outcome: &SyncOutcome) {
        let prefix = format!("{storage}_{}_sync", kind.as_str());
        let (warning, critical) = kind.thresholds();
        let ok = outcome.ok.len() as u64;
        let failed = outcome.failed.len() as u64;
        self.stats.insert(prefix.clone(), ok);
        self.stats.insert(format!("{prefix}_fail"), failed);
        self.stats.insert(format!("{prefix}_fail_warning"), warning);
        self.stats.insert(format!("{prefix}_fail_critical"), critical);
        self.perfdata.push(format!("{prefix}={ok}"));
        self.perfdata
            .push(format!("{prefix}_fail={failed};{warning};{critical}"));

        let state = if failed >= critical {
            HealthState::Critical
        } else if failed >= warning {
            HealthState::Warning
        } else {
            HealthState::Ok
        };
        self.state = self.state.max(state);
    }

    pub fn stat(&mut self, key: &str, value: u64) {
        self.stats.insert(key.to_string(), value);
        self.perfdata.push(format!("{key}={value}"));
    }

    /// A run that errored out is critical regardless of the counts.
    pub fn critical(&mut self, message: impl Into<String>) {
        self.state = HealthState::Critical;
        self.error = Some(message.into());
    }

    pub fn finish(mut self) -> Result<Self> {
        self.at_epoch_secs = now_epoch_secs()?;
        let headline = match &self.error {
            Some(error) => format!("{} {}: {error}", self.state, self.job),
            None => format!("{} {}", self.state, self.job),
        };
        self.summary = if self.perfdata.is_empty() {
            headline
        } else {
            format!("{headline} | {}", self.perfdata.join(" "))
        };
        Ok(self)
    }

    pub fn save(&self, paths: &SyncPaths) -> Result<PathBuf> {
        let file = paths.health_file(&self.job);
        fs::create_dir_all(&paths.state_dir)
            .with_context(|| format!("failed to create {}", paths.state_dir.display()))?;
        let data = serde_json::to_string_pretty(self)?;
        fs::write(&file, format!("{data}\n"))
            .with_context(|| format!("failed to write {}", file.display()))?;
        Ok(file)
    }
}
