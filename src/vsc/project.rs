//! Project scratch: one fileset per project on scratch storage, owned by the
//! project's submitter and its autogroup.

use crate::backend::StorageOps;
use crate::vsc::config::{StorageConfig, StorageType};
use crate::vsc::model::Project;
use crate::vsc::policy::{self, EntityKind, MountPoint};
use crate::vsc::provision::{SyncContext, apply_fileset_quota, ensure_fileset, warm_fileset_listing};
use crate::vsc::report::SyncOutcome;
use anyhow::{Context, Result, bail};

const PROJECT_FILESET_MODE: u32 = 0o770;

pub struct ProjectSync<'a> {
    ctx: SyncContext<'a>,
}

impl<'a> ProjectSync<'a> {
    pub fn new(ctx: SyncContext<'a>) -> Self {
        Self { ctx }
    }

    pub fn process_projects(
        &self,
        project_ids: &[String],
        storage: &StorageConfig,
        backend: &dyn StorageOps,
    ) -> SyncOutcome {
        let mut outcome = SyncOutcome::default();
        if storage.storage_type != StorageType::Scratch {
            tracing::debug!(storage = %storage.name, "projects only get scratch storage");
            return outcome;
        }

        let mut ids = project_ids.to_vec();
        ids.sort();
        ids.dedup();
        warm_fileset_listing(storage, backend);

        for project_id in &ids {
            let _span = tracing::info_span!("project", project = %project_id).entered();
            match self.process_project(project_id, storage, backend) {
                Ok(()) => outcome.ok.record(project_id, Vec::<String>::new()),
                Err(err) => {
                    tracing::error!(error = %format!("{err:#}"), "project sync failed");
                    outcome.failed.record(project_id, Vec::<String>::new());
                }
            }
        }
        outcome
    }

    fn process_project(&self, project_id: &str, storage: &StorageConfig, backend: &dyn StorageOps) -> Result<()> {
        let client = self.ctx.client;
        let project = client
            .project(project_id)
            .with_context(|| format!("failed to fetch project {project_id}"))?;
        let quota = client
            .project_quota(project_id)
            .with_context(|| format!("failed to fetch quota of project {project_id}"))?;
        let quota = self.ctx.host_quota(quota);

        let path = policy::path_for(storage, EntityKind::Project, project_id, self.ctx.host(), MountPoint::Backend)?;
        ensure_fileset(&self.ctx, storage, backend, project_id, &path)?;
        backend.chmod(PROJECT_FILESET_MODE, &path, self.ctx.dry_run)?;
        backend.chown(self.resolve_owner(&project), project.group.vsc_id_number, &path, self.ctx.dry_run)?;

        let declared: Vec<u64> = quota
            .iter()
            .filter(|q| q.on_storage(&storage.name))
            .map(|q| q.hard)
            .collect();
        let declared = match declared.as_slice() {
            [] => self.ctx.cfg.policy.default_project_scratch_quota_kib,
            [one] => *one,
            many => bail!("{} scratch quota records for {project_id} on {}", many.len(), storage.name),
        };
        apply_fileset_quota(&self.ctx, storage, backend, &path, project_id, declared)?;

        let login = policy::path_for(storage, EntityKind::Project, project_id, self.ctx.host(), MountPoint::Login)?;
        tracing::info!(path = %login.display(), "project scratch ready");
        Ok(())
    }

    /// Submitter, else first moderator, else the configured fallback. Never
    /// fails.
    fn resolve_owner(&self, project: &Project) -> u32 {
        let candidates = [
            ("submitter", project.submitter.as_deref()),
            ("moderator", project.moderators.first().map(String::as_str)),
        ];
        for (role, vsc_id) in candidates {
            let Some(vsc_id) = vsc_id else {
                continue;
            };
            match self.ctx.client.account(vsc_id) {
                Ok(account) => return account.vsc_id_number,
                Err(err) => tracing::warn!(role, account = %vsc_id, error = %err, "cannot resolve project owner"),
            }
        }
        let fallback = self.ctx.cfg.policy.fallback_uid;
        tracing::warn!(fallback, "project has no resolvable submitter or moderator");
        fallback
    }
}
