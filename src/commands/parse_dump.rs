use anyhow::{Context, Result};
use serde::Serialize;
use std::fs;
use std::io::{self, Read};
use std::path::PathBuf;

use crate::commands::CommandReport;
use crate::slurm::dump::{DumpKind, DumpRecord, SlurmAccount, SlurmJob, SlurmQos, SlurmUser, parse_dump};

#[derive(Debug, Clone)]
pub struct ParseDumpOptions {
    pub kind: DumpKind,
    /// Reads stdin when unset or `-`.
    pub input: Option<PathBuf>,
}

fn read_input(input: Option<&PathBuf>) -> Result<String> {
    match input {
        Some(path) if path.as_os_str() != "-" => {
            fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))
        }
        _ => {
            let mut raw = String::new();
            io::stdin()
                .read_to_string(&mut raw)
                .context("failed to read dump from stdin")?;
            Ok(raw)
        }
    }
}

fn records<R: DumpRecord + Serialize>(lines: &[&str], report: &mut CommandReport) -> Result<()> {
    let parsed = parse_dump::<R, _>(lines)?;
    report.detail(format!("records={}", parsed.len()));
    for record in &parsed {
        report.detail(format!("record={}", serde_json::to_string(record)?));
    }
    Ok(())
}

pub fn run(opts: &ParseDumpOptions) -> Result<CommandReport> {
    let raw = read_input(opts.input.as_ref())?;
    let lines: Vec<&str> = raw.lines().collect();
    let mut report = CommandReport::new("parse-dump");
    report.detail(format!("kind={}", opts.kind));

    let parsed = match opts.kind {
        DumpKind::Accounts => records::<SlurmAccount>(&lines, &mut report),
        DumpKind::Users => records::<SlurmUser>(&lines, &mut report),
        DumpKind::Qos => records::<SlurmQos>(&lines, &mut report),
        DumpKind::Jobs => records::<SlurmJob>(&lines, &mut report),
    };
    if let Err(err) = parsed {
        report.issue(format!("{err:#}"));
    }
    Ok(report)
}
