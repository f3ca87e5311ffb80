use anyhow::Result;

use crate::commands::CommandReport;
use crate::slurm::sacct::Sacct;
use crate::vsc::config::load_config;

pub fn run(user: &str) -> Result<CommandReport> {
    let cfg = load_config()?;
    let sacct = Sacct::from_config(&cfg.slurm)?;
    let mut report = CommandReport::new("active-jobs");
    report.detail(format!("user={user}"));

    match sacct.active_jobs(user)? {
        None => report.detail("known_to_slurm=false"),
        Some(jobs) => {
            report.detail("known_to_slurm=true");
            report.detail(format!("active_jobs={}", jobs.len()));
            for job in &jobs {
                report.detail(format!(
                    "job={} state={} account={} partition={}",
                    job.job_id, job.state, job.account, job.partition
                ));
            }
        }
    }
    Ok(report)
}
