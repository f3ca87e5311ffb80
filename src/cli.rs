use anyhow::{Result, anyhow};
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

use crate::commands::parse_dump::ParseDumpOptions;
use crate::commands::sync_slurm::SyncSlurmOptions;
use crate::commands::sync_storage::{SyncStorageOptions, split_csv};
use crate::commands::{self, CommandReport};
use crate::logging::{self, LogFormat};
use crate::slurm::dump::DumpKind;
use crate::vsc::changeset::Overrides;

/// Reconciles VSC accounts and VOs with storage backends and Slurm accounting.
#[derive(Debug, Parser)]
#[command(name = "vsc-sync", author, version, about, long_about = None)]
pub struct Cli {
    /// Print the command report as JSON.
    #[arg(long, global = true)]
    pub json: bool,

    /// Format of the log lines written to stderr.
    #[arg(long, global = true, value_enum, default_value_t = LogFormat::Plain)]
    pub log_format: LogFormat,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Create directories, filesets and quota for changed accounts, VOs and
    /// projects.
    SyncStorage(SyncStorageArgs),
    /// Bring Slurm accounts and user associations in line with the VOs.
    SyncSlurm(SyncSlurmArgs),
    /// List running and pending jobs of a user.
    ActiveJobs(ActiveJobsArgs),
    /// Parse a `sacctmgr`/`sacct` parsable dump and print its records.
    ParseDump(ParseDumpArgs),
    /// Show paths, watermarks, locks and last health of each job.
    Status,
}

#[derive(Debug, Args)]
pub struct SyncStorageArgs {
    /// Storage names to sync (repeatable or comma separated); all when omitted.
    #[arg(long = "storage")]
    pub storage: Vec<String>,
    /// Run the account and account quota passes.
    #[arg(long)]
    pub user: bool,
    /// Run the VO pass.
    #[arg(long)]
    pub vo: bool,
    /// Run the project scratch pass.
    #[arg(long)]
    pub project: bool,
    /// Log every change instead of making it.
    #[arg(long)]
    pub dry_run: bool,
    /// Sync changes since this `YYYYMMDDHHMMSSZ` instead of the saved watermark.
    #[arg(long)]
    pub start_timestamp: Option<String>,
    /// Sync only these accounts.
    #[arg(long = "account")]
    pub accounts: Vec<String>,
    /// Sync only these VOs.
    #[arg(long = "vo-id")]
    pub vo_ids: Vec<String>,
    /// Sync only these projects.
    #[arg(long = "project-id")]
    pub project_ids: Vec<String>,
}

#[derive(Debug, Args)]
pub struct SyncSlurmArgs {
    /// Clusters to sync (comma separated); overrides the configured list.
    #[arg(long)]
    pub clusters: Option<String>,
    /// Print the planned `sacctmgr` commands without running them.
    #[arg(long)]
    pub dry_run: bool,
}

#[derive(Debug, Args)]
pub struct ActiveJobsArgs {
    pub user: String,
}

#[derive(Debug, Args)]
pub struct ParseDumpArgs {
    /// Record kind: accounts, users, qos or jobs.
    #[arg(long)]
    pub kind: DumpKind,
    /// Dump file; stdin when omitted or `-`.
    pub input: Option<PathBuf>,
}

impl From<SyncStorageArgs> for SyncStorageOptions {
    fn from(args: SyncStorageArgs) -> Self {
        Self {
            storage: split_csv(&args.storage),
            users: args.user,
            vos: args.vo,
            projects: args.project,
            dry_run: args.dry_run,
            start_timestamp: args.start_timestamp,
            overrides: Overrides {
                accounts: split_csv(&args.accounts),
                vos: split_csv(&args.vo_ids),
                projects: split_csv(&args.project_ids),
            },
        }
    }
}

impl From<SyncSlurmArgs> for SyncSlurmOptions {
    fn from(args: SyncSlurmArgs) -> Self {
        let clusters = args
            .clusters
            .map(|raw| split_csv(&[raw]))
            .unwrap_or_default();
        Self {
            clusters,
            dry_run: args.dry_run,
        }
    }
}

fn render(report: &CommandReport, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(report)?);
        return Ok(());
    }

    let verdict = if report.ok { "ok" } else { "issues" };
    println!("{}: {verdict}", report.command);
    for detail in &report.details {
        println!("  {detail}");
    }
    for issue in &report.issues {
        println!("  ! {issue}");
    }
    Ok(())
}

pub fn run() -> Result<()> {
    let cli = Cli::parse();
    logging::init(cli.log_format);

    let report = match cli.command {
        Command::SyncStorage(args) => commands::sync_storage::run(&args.into())?,
        Command::SyncSlurm(args) => commands::sync_slurm::run(&args.into())?,
        Command::ActiveJobs(args) => commands::active_jobs::run(&args.user)?,
        Command::ParseDump(args) => commands::parse_dump::run(&ParseDumpOptions {
            kind: args.kind,
            input: args.input,
        })?,
        Command::Status => commands::status::run()?,
    };

    render(&report, cli.json)?;
    if report.ok {
        Ok(())
    } else {
        Err(anyhow!(
            "{} finished with {} issue(s)",
            report.command,
            report.issues.len()
        ))
    }
}
