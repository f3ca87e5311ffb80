use anyhow::Result;
use chrono::Utc;

use crate::accountpage::RestAccountPage;
use crate::backend::{Backend, StorageOps};
use crate::commands::{CommandReport, run_locked};
use crate::error::SyncError;
use crate::logging;
use crate::vsc::audit::{self, RunStatus};
use crate::vsc::changeset::{self, Changeset, Overrides, Passes};
use crate::vsc::config::{StorageConfig, SyncConfig, load_config};
use crate::vsc::health::{HealthReport, SyncKind};
use crate::vsc::paths::{SyncPaths, resolve_paths};
use crate::vsc::project::ProjectSync;
use crate::vsc::provision::SyncContext;
use crate::vsc::report::SyncOutcome;
use crate::vsc::state::{self, format_watermark, parse_watermark};
use crate::vsc::user::UserSync;
use crate::vsc::util::now_epoch_secs;
use crate::vsc::vo::VoSync;

pub const JOB: &str = "sync-storage";

#[derive(Debug, Clone, Default)]
pub struct SyncStorageOptions {
    pub storage: Vec<String>,
    pub users: bool,
    pub vos: bool,
    pub projects: bool,
    pub dry_run: bool,
    pub start_timestamp: Option<String>,
    pub overrides: Overrides,
}

impl SyncStorageOptions {
    /// Without `--user`, `--vo` or `--project` every pass runs.
    fn passes(&self) -> Passes {
        if self.users || self.vos || self.projects {
            Passes {
                users: self.users,
                vos: self.vos,
                projects: self.projects,
            }
        } else {
            Passes::ALL
        }
    }
}

pub fn run(opts: &SyncStorageOptions) -> Result<CommandReport> {
    let paths = resolve_paths()?;
    run_locked(&paths, JOB, opts.dry_run, || sync(&paths, opts))
}

fn select_storage<'c>(cfg: &'c SyncConfig, names: &[String]) -> Result<Vec<&'c StorageConfig>> {
    if cfg.storage.is_empty() {
        return Err(SyncError::InvalidConfig("no [[storage]] configured".to_string()).into());
    }
    if names.is_empty() {
        return Ok(cfg.storage.iter().collect());
    }
    names.iter().map(|name| cfg.storage_named(name)).collect()
}

fn sync(paths: &SyncPaths, opts: &SyncStorageOptions) -> Result<CommandReport> {
    let cfg = load_config()?;
    let targets = select_storage(&cfg, &opts.storage)?;
    let passes = opts.passes();

    let mut job_state = state::load(paths, JOB)?;
    let since = match &opts.start_timestamp {
        Some(raw) => parse_watermark(raw)?,
        None => job_state.timestamp.clone(),
    };
    let started = Utc::now();

    let client = RestAccountPage::new(&cfg.accountpage)?;
    let ctx = SyncContext::new(&cfg, &client, opts.dry_run);
    let changes = changeset::collect(&client, &cfg.institute, &since, passes)?;
    let changes = changeset::apply_overrides(changes, &opts.overrides);

    let mut report = CommandReport::new(JOB);
    report.detail(format!("since={since}"));
    report.detail(format!("dry_run={}", opts.dry_run));
    report.detail(format!("changed.accounts={}", changes.accounts.len()));
    report.detail(format!("changed.user_quota={}", changes.user_quota.len()));
    report.detail(format!("changed.vos={}", changes.vos.len()));
    report.detail(format!("changed.projects={}", changes.projects.len()));

    let mut health = HealthReport::new(JOB);
    let mut totals = SyncOutcome::default();
    for storage in targets {
        let backend = Backend::from_config(storage, Some(cfg.policy.helper_timeout_secs))?;
        for (kind, outcome) in sync_target(ctx, storage, &backend, &changes, passes) {
            health.record(&storage.name, kind, &outcome);
            describe(&mut report, &storage.name, kind, &outcome);
            totals = totals.merged(&outcome);
        }
    }
    let clean = totals.is_clean();
    report.detail(format!("total.ok={}", totals.ok.len()));
    report.detail(format!("total.failed={}", totals.failed.len()));

    let health = health.finish()?;
    report.detail(format!("health={}", health.summary));
    if opts.dry_run {
        report.detail("health file unchanged: dry run");
    } else {
        let health_file = health.save(paths)?;
        report.detail(format!("health_file={}", health_file.display()));
    }

    if opts.dry_run {
        report.detail("watermark unchanged: dry run");
    } else if !clean {
        report.detail(format!("watermark unchanged: {since}"));
    } else {
        job_state.timestamp = format_watermark(started);
        job_state.last_success_epoch_secs = Some(now_epoch_secs()?);
        let file = state::save(paths, JOB, &job_state)?;
        report.detail(format!("watermark={}", job_state.timestamp));
        report.detail(format!("state_file={}", file.display()));
    }

    let status = if clean { RunStatus::Ok } else { RunStatus::Partial };
    audit::record(paths, JOB, status, &health.summary);
    Ok(report)
}

/// Runs the enabled passes over one storage target: accounts, then VOs, then
/// projects.
pub fn sync_target(
    ctx: SyncContext<'_>,
    storage: &StorageConfig,
    backend: &dyn StorageOps,
    changes: &Changeset,
    passes: Passes,
) -> Vec<(SyncKind, SyncOutcome)> {
    let span = logging::storage_span(JOB, &storage.name, ctx.dry_run);
    let _guard = span.enter();

    let mut outcomes = Vec::new();
    if passes.users {
        let sync = UserSync::new(ctx);
        outcomes.push((
            SyncKind::Users,
            sync.process_users(&changes.accounts, storage, backend),
        ));
        outcomes.push((
            SyncKind::Quota,
            sync.process_users_quota(&changes.user_quota, storage, backend),
        ));
    }
    if passes.vos {
        let sync = VoSync::new(ctx);
        outcomes.push((
            SyncKind::Vos,
            sync.process_vos(&changes.vos, storage, backend, &changes.since),
        ));
    }
    if passes.projects {
        let sync = ProjectSync::new(ctx);
        outcomes.push((
            SyncKind::Projects,
            sync.process_projects(&changes.projects, storage, backend),
        ));
    }
    for (kind, outcome) in &outcomes {
        tracing::info!(
            pass = kind.as_str(),
            ok = outcome.ok.len(),
            failed = outcome.failed.len(),
            "pass finished"
        );
    }
    outcomes
}

fn describe(report: &mut CommandReport, storage: &str, kind: SyncKind, outcome: &SyncOutcome) {
    let kind = kind.as_str();
    report.detail(format!("{storage}.{kind}.ok={}", outcome.ok.len()));
    report.detail(format!("{storage}.{kind}.failed={}", outcome.failed.len()));
    for (key, items) in outcome.failed.iter() {
        if items.is_empty() {
            report.issue(format!("{storage}: {kind} sync failed for {key}"));
        } else {
            report.issue(format!(
                "{storage}: {kind} sync failed for {key} ({})",
                items.join(",")
            ));
        }
    }
}

/// Accepts `--storage` values that are either repeated or comma separated.
pub fn split_csv(values: &[String]) -> Vec<String> {
    values
        .iter()
        .flat_map(|v| v.split(','))
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(ToOwned::to_owned)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::{SyncStorageOptions, select_storage, split_csv, sync_target};
    use crate::accountpage::fake::{FakeAccountPage, project, quota, vo};
    use crate::backend::recording::RecordingBackend;
    use crate::vsc::changeset::{Changeset, Passes, collect};
    use crate::vsc::config::from_toml_str;
    use crate::vsc::health::SyncKind;
    use crate::vsc::model::Status;
    use crate::vsc::provision::SyncContext;
    use std::path::Path;

    const CONFIG: &str = r#"
[[storage]]
name = "VSC_DATA"
storage_type = "data"
backend = "gpfs"
filesystem = "kyukondata"
login_mount_point = "/user/data"
backend_mount_point = "/kyukondata"
version = "5.1.0"
quota_vo_kib = 1024
helper_bin = "/usr/libexec/vsc-sync/gpfs-helper"

[[storage]]
name = "VSC_HOME"
storage_type = "home"
backend = "posix"
filesystem = "home"
login_mount_point = "/user/home"
backend_mount_point = "/home"

[[storage]]
name = "VSC_SCRATCH_KYUKON"
storage_type = "scratch"
backend = "gpfs"
filesystem = "kyukonscratch"
login_mount_point = "/user/scratch"
backend_mount_point = "/kyukonscratch"
helper_bin = "/usr/libexec/vsc-sync/gpfs-helper"
"#;

    fn page() -> FakeAccountPage {
        let mut page = FakeAccountPage::new();
        page.add_account("vsc40001", 2540001, Status::Active);
        page.add_account("vsc40002", 2540002, Status::Active);
        page.add_vo(vo("gvo00001", 2640001, Status::Active, &["vsc40001", "vsc40002"], &["vsc40001"]));
        page.add_vo_quota("gvo00001", quota("VSC_DATA", "data", "gvo00001", 2048, "gvo00001"));
        page.set_modified_members("gvo00001", &["vsc40001", "vsc40002"]);
        page.add_project(project("gpr_compute00012", 2900012, Some("vsc40002"), &[]));
        page
    }

    #[test]
    fn passes_default_to_all() {
        assert_eq!(SyncStorageOptions::default().passes(), Passes::ALL);
        let only_vos = SyncStorageOptions {
            vos: true,
            ..SyncStorageOptions::default()
        };
        assert_eq!(
            only_vos.passes(),
            Passes {
                users: false,
                vos: true,
                projects: false
            }
        );
    }

    #[test]
    fn storage_selection_checks_names() {
        let cfg = from_toml_str(CONFIG).expect("config");
        assert_eq!(select_storage(&cfg, &[]).expect("all").len(), 3);
        let picked = select_storage(&cfg, &["VSC_HOME".to_string()]).expect("home");
        assert_eq!(picked[0].name, "VSC_HOME");
        assert!(select_storage(&cfg, &["VSC_SCRATCH".to_string()]).is_err());
    }

    #[test]
    fn storage_values_may_be_comma_separated() {
        let raw = vec!["VSC_HOME,VSC_DATA".to_string(), " VSC_SCRATCH ".to_string()];
        assert_eq!(split_csv(&raw), vec!["VSC_HOME", "VSC_DATA", "VSC_SCRATCH"]);
    }

    #[test]
    fn data_target_runs_all_passes_in_order() {
        let cfg = from_toml_str(CONFIG).expect("config");
        let page = page();
        let changes = collect(&page, &cfg.institute, "20240101000000Z", Passes::ALL).expect("changes");
        let backend = RecordingBackend::new();
        let data = cfg.storage_named("VSC_DATA").expect("data");

        let passes = sync_target(SyncContext::new(&cfg, &page, false), data, &backend, &changes, Passes::ALL);
        let kinds: Vec<SyncKind> = passes.iter().map(|(k, _)| *k).collect();
        assert_eq!(
            kinds,
            vec![SyncKind::Users, SyncKind::Quota, SyncKind::Vos, SyncKind::Projects]
        );
        assert!(passes[3].1.ok.is_empty());
        assert!(passes.iter().all(|(_, outcome)| outcome.is_clean()));

        let (_, users) = &passes[0];
        assert_eq!(users.ok.keys().collect::<Vec<_>>(), vec!["vsc40001", "vsc40002"]);
        let (_, vos) = &passes[2];
        assert_eq!(vos.ok.get("gvo00001"), Some(&["vsc40001".to_string(), "vsc40002".to_string()][..]));
        assert!(
            backend
                .state()
                .entries
                .contains_key(Path::new("/kyukondata/gent/vo/000/gvo00001/vsc40002"))
        );
    }

    #[test]
    fn home_target_skips_vos() {
        let cfg = from_toml_str(CONFIG).expect("config");
        let page = page();
        let changes = Changeset {
            since: "20240101000000Z".to_string(),
            accounts: vec!["vsc40001".to_string()],
            vos: vec!["gvo00001".to_string()],
            projects: Vec::new(),
            user_quota: Vec::new(),
        };
        let backend = RecordingBackend::new();
        let home = cfg.storage_named("VSC_HOME").expect("home");

        let only_vos = Passes {
            users: false,
            vos: true,
            projects: false,
        };
        let passes = sync_target(SyncContext::new(&cfg, &page, true), home, &backend, &changes, only_vos);
        assert_eq!(passes.len(), 1);
        assert!(passes[0].1.ok.is_empty());
        assert!(backend.mutations().is_empty());
    }

    #[test]
    fn scratch_target_provisions_changed_projects() {
        let cfg = from_toml_str(CONFIG).expect("config");
        let page = page();
        let projects_only = Passes {
            users: false,
            vos: false,
            projects: true,
        };
        let changes = collect(&page, &cfg.institute, "20240101000000Z", projects_only).expect("changes");
        assert_eq!(changes.projects, vec!["gpr_compute00012"]);
        let backend = RecordingBackend::new();
        let scratch = cfg.storage_named("VSC_SCRATCH_KYUKON").expect("scratch");

        let passes = sync_target(SyncContext::new(&cfg, &page, false), scratch, &backend, &changes, projects_only);
        assert_eq!(passes.len(), 1);
        let (kind, outcome) = &passes[0];
        assert_eq!(*kind, SyncKind::Projects);
        assert!(outcome.ok.contains_key("gpr_compute00012"));
        let fileset = backend
            .stat(Path::new("/kyukonscratch/projects/gpr_compute000/gpr_compute00012"))
            .expect("project fileset");
        assert_eq!((fileset.uid, fileset.gid), (2540002, 2900012));
    }
}
