use anyhow::Result;
use serde::Deserialize;
use std::env;
use std::fs;

use crate::commands::{CommandReport, sync_slurm, sync_storage};
use crate::vsc::config::{ENV_KEYS, load_config, resolve_config_path};
use crate::vsc::lock::read_payload;
use crate::vsc::paths::{SyncPaths, resolve_paths};
use crate::vsc::state;
use crate::vsc::util::pid_alive;

/// The part of a saved health file `status` cares about.
#[derive(Debug, Deserialize)]
struct SavedHealth {
    state: String,
    summary: String,
}

fn job_status(report: &mut CommandReport, paths: &SyncPaths, job: &str) {
    match read_payload(&paths.lock_file(job)) {
        Ok(Some(payload)) if pid_alive(payload.pid) => {
            report.detail(format!("{job}.running=true pid={} since={}", payload.pid, payload.start_time));
            let current = env!("CARGO_PKG_VERSION");
            if payload.version != current {
                report.issue(format!(
                    "{job}: running version {} differs from this version {current}",
                    payload.version
                ));
            }
        }
        Ok(_) => report.detail(format!("{job}.running=false")),
        Err(err) => report.issue(format!("{job}: lock payload unreadable ({err:#})")),
    }

    match state::load(paths, job) {
        Ok(saved) => {
            report.detail(format!("{job}.watermark={}", saved.timestamp));
            if let Some(at) = saved.last_success_epoch_secs {
                report.detail(format!("{job}.last_success_epoch_secs={at}"));
            }
        }
        Err(err) => report.issue(format!("{job}: {err:#}")),
    }

    let health_file = paths.health_file(job);
    if !health_file.exists() {
        report.detail(format!("{job}.health=none"));
        return;
    }
    let parsed = fs::read_to_string(&health_file)
        .map_err(anyhow::Error::from)
        .and_then(|raw| serde_json::from_str::<SavedHealth>(&raw).map_err(anyhow::Error::from));
    match parsed {
        Ok(health) => {
            report.detail(format!("{job}.health={}", health.summary));
            if health.state == "CRITICAL" {
                report.issue(format!("{job}: last run was critical"));
            }
        }
        Err(err) => report.issue(format!("{job}: health file unreadable ({err:#})")),
    }
}

pub fn run() -> Result<CommandReport> {
    let paths = resolve_paths()?;
    let mut report = CommandReport::new("status");

    report.detail(format!("sync_home={}", paths.sync_home.display()));
    report.detail(format!("state_dir={}", paths.state_dir.display()));
    report.detail(format!("logs_dir={}", paths.logs_dir.display()));
    report.detail(format!("version={}", env!("CARGO_PKG_VERSION")));
    if let Some(path) = resolve_config_path() {
        report.detail(format!("config_path={}", path.display()));
    }

    match load_config() {
        Ok(cfg) => {
            report.detail(format!("host_institute={}", cfg.institute.host));
            let names: Vec<&str> = cfg.storage.iter().map(|s| s.name.as_str()).collect();
            report.detail(format!("storage={}", names.join(",")));
            report.detail(format!("slurm.clusters={}", cfg.slurm.clusters.join(",")));
        }
        Err(err) => report.issue(format!("config: {err:#}")),
    }

    let set: Vec<&str> = ENV_KEYS
        .iter()
        .map(|(key, _)| *key)
        .filter(|key| env::var_os(key).is_some())
        .collect();
    report.detail(format!("env.known={}", ENV_KEYS.len()));
    if !set.is_empty() {
        report.detail(format!("env.set={}", set.join(",")));
    }

    for job in [sync_storage::JOB, sync_slurm::JOB] {
        job_status(&mut report, &paths, job);
    }
    Ok(report)
}
