use anyhow::Result;
use std::collections::BTreeSet;

use crate::accountpage::{AccountPage, RestAccountPage};
use crate::commands::{CommandReport, run_locked};
use crate::error::SyncError;
use crate::slurm::dump::{SlurmAccount, SlurmQos, SlurmUser};
use crate::slurm::exec::execute_commands;
use crate::slurm::sacctmgr::{SacctMgr, SacctMgrCommand};
use crate::slurm::sync::{AccountingSync, CurrentAccounting, DesiredAccounting};
use crate::vsc::audit::{self, RunStatus};
use crate::vsc::config::{SyncConfig, load_config};
use crate::vsc::health::HealthReport;
use crate::vsc::paths::{SyncPaths, resolve_paths};

pub const JOB: &str = "sync-slurm";

#[derive(Debug, Clone, Default)]
pub struct SyncSlurmOptions {
    pub clusters: Vec<String>,
    pub dry_run: bool,
}

pub fn run(opts: &SyncSlurmOptions) -> Result<CommandReport> {
    let paths = resolve_paths()?;
    run_locked(&paths, JOB, opts.dry_run, || sync(&paths, opts))
}

fn clusters(cfg: &SyncConfig, requested: &[String]) -> Result<Vec<String>> {
    let clusters = if requested.is_empty() {
        cfg.slurm.clusters.clone()
    } else {
        requested.to_vec()
    };
    if clusters.is_empty() {
        return Err(SyncError::InvalidConfig(
            "no slurm clusters configured; set [slurm] clusters or pass --clusters".to_string(),
        )
        .into());
    }
    Ok(clusters)
}

/// Desired state from the account page: every VO, every project and the set
/// of active accounts, since VO membership does not track activity.
pub fn desired_state(client: &dyn AccountPage) -> Result<DesiredAccounting> {
    let vos = client.vos().map_err(|err| err.into_listing_error("VOs"))?;
    let projects = client.projects().map_err(|err| err.into_listing_error("projects"))?;
    let active_accounts = client
        .accounts()
        .map_err(|err| err.into_listing_error("accounts"))?
        .into_iter()
        .filter(|a| a.isactive)
        .map(|a| a.vsc_id)
        .collect();
    Ok(DesiredAccounting {
        vos,
        projects,
        active_accounts,
    })
}

fn sync(paths: &SyncPaths, opts: &SyncSlurmOptions) -> Result<CommandReport> {
    let cfg = load_config()?;
    let clusters = clusters(&cfg, &opts.clusters)?;
    let sacctmgr = SacctMgr::from_config(&cfg.slurm)?;

    let accounts: BTreeSet<SlurmAccount> = sacctmgr.list()?;
    let users: BTreeSet<SlurmUser> = sacctmgr.list()?;
    let qos: BTreeSet<SlurmQos> = sacctmgr.list()?;
    let current = CurrentAccounting { accounts, users, qos };
    tracing::info!(
        accounts = current.accounts.len(),
        users = current.users.len(),
        qos = current.qos.len(),
        "accounting snapshot"
    );

    let client = RestAccountPage::new(&cfg.accountpage)?;
    let desired = desired_state(&client)?;
    tracing::info!(
        vos = desired.vos.len(),
        projects = desired.projects.len(),
        active_accounts = desired.active_accounts.len(),
        "account page snapshot"
    );

    let planner = AccountingSync::new(&clusters, &cfg.institute, &cfg.slurm);
    let commands = planner.plan(&desired, &current)?;

    let mut report = CommandReport::new(JOB);
    report.detail(format!("sacctmgr={}", sacctmgr.bin().display()));
    report.detail(format!("clusters={}", clusters.join(",")));
    report.detail(format!("dry_run={}", opts.dry_run));
    report.detail(format!("slurm.accounts={}", current.accounts.len()));
    report.detail(format!("slurm.users={}", current.users.len()));
    report.detail(format!("slurm.qos={}", current.qos.len()));
    report.detail(format!("accountpage.vos={}", desired.vos.len()));
    report.detail(format!("accountpage.projects={}", desired.projects.len()));
    report.detail(format!("accountpage.active_accounts={}", desired.active_accounts.len()));
    report.detail(format!("commands.planned={}", commands.len()));
    if opts.dry_run {
        list_commands(&mut report, &commands);
    }

    let summary = execute_commands(&sacctmgr, &commands, opts.dry_run)?;
    report.detail(format!("commands.executed={}", summary.executed));

    let mut health = HealthReport::new(JOB);
    health.stat("commands_planned", summary.planned as u64);
    health.stat("commands_executed", summary.executed as u64);
    let health = health.finish()?;
    if !opts.dry_run {
        let file = health.save(paths)?;
        report.detail(format!("health_file={}", file.display()));
    }
    report.detail(format!("health={}", health.summary));
    audit::record(paths, JOB, RunStatus::Ok, &health.summary);
    Ok(report)
}

fn list_commands(report: &mut CommandReport, commands: &[SacctMgrCommand]) {
    for command in commands {
        report.detail(format!("command={command}"));
    }
}
