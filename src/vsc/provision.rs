//! Steps shared by the VO and account drivers.

use crate::accountpage::AccountPage;
use crate::backend::{FilesetSpec, StorageOps};
use crate::vsc::config::{StorageConfig, SyncConfig};
use crate::vsc::model::{QuotaRecord, ResolvedAccount};
use crate::vsc::policy::{self, AppliedQuota};
use anyhow::{Context, Result};
use std::path::Path;

/// Everything a driver pass shares: config, the account page client and the
/// dry-run flag, fixed for the whole run.
#[derive(Clone, Copy)]
pub struct SyncContext<'a> {
    pub cfg: &'a SyncConfig,
    pub client: &'a dyn AccountPage,
    pub dry_run: bool,
}

impl<'a> SyncContext<'a> {
    pub fn new(cfg: &'a SyncConfig, client: &'a dyn AccountPage, dry_run: bool) -> Self {
        Self {
            cfg,
            client,
            dry_run,
        }
    }

    pub fn host(&self) -> &str {
        &self.cfg.institute.host
    }

    pub fn host_quota(&self, records: Vec<QuotaRecord>) -> Vec<QuotaRecord> {
        records
            .into_iter()
            .filter(|q| q.storage.institute == self.cfg.institute.host)
            .collect()
    }

    pub fn applied_quota(&self, storage: &StorageConfig, declared_kib: u64) -> AppliedQuota {
        policy::quota_to_apply(storage, declared_kib, self.cfg.policy.quota_soft_fraction)
    }

    /// Account, usergroup and host-institute quota in one go.
    pub fn resolve_account(&self, vsc_id: &str) -> Result<ResolvedAccount> {
        let account = self
            .client
            .account(vsc_id)
            .with_context(|| format!("failed to fetch account {vsc_id}"))?;
        let usergroup = self
            .client
            .account_usergroup(vsc_id)
            .with_context(|| format!("failed to fetch usergroup of {vsc_id}"))?;
        let quota = self
            .client
            .account_quota(vsc_id)
            .with_context(|| format!("failed to fetch quota of {vsc_id}"))?;
        Ok(ResolvedAccount {
            account,
            usergroup,
            quota: self.host_quota(quota),
        })
    }
}

/// Asks the backend for its fileset list once per pass. Not every backend
/// can list, which is fine.
pub fn warm_fileset_listing(storage: &StorageConfig, backend: &dyn StorageOps) {
    match backend.list_filesets(&storage.filesystem) {
        Ok(filesets) => tracing::debug!(
            storage = %storage.name,
            count = filesets.len(),
            "listed filesets"
        ),
        Err(err) => tracing::debug!(
            storage = %storage.name,
            error = %err,
            "fileset listing unavailable"
        ),
    }
}

/// Creates the fileset `name` at `path` unless the backend already knows it.
pub fn ensure_fileset(
    ctx: &SyncContext<'_>,
    storage: &StorageConfig,
    backend: &dyn StorageOps,
    name: &str,
    path: &Path,
) -> Result<bool> {
    let spec = FilesetSpec {
        filesystem: storage.filesystem.clone(),
        name: name.to_string(),
        path: path.to_path_buf(),
        parent: policy::parent_fileset(storage, &ctx.cfg.policy.parent_fileset_min_version)
            .map(str::to_string),
    };
    if backend.get_fileset_info(&spec)?.is_some() {
        tracing::debug!(fileset = name, path = %path.display(), "fileset already present");
        return Ok(false);
    }

    if let Some(parent) = path.parent() {
        backend.make_dir(parent, ctx.dry_run)?;
    }
    backend.make_fileset(&spec, ctx.dry_run)?;
    tracing::info!(fileset = name, path = %path.display(), "created fileset");
    Ok(true)
}

/// Applies a fileset quota followed by its grace period.
pub fn apply_fileset_quota(
    ctx: &SyncContext<'_>,
    storage: &StorageConfig,
    backend: &dyn StorageOps,
    path: &Path,
    fileset: &str,
    declared_kib: u64,
) -> Result<AppliedQuota> {
    let quota = ctx.applied_quota(storage, declared_kib);
    backend.set_fileset_quota(quota, path, fileset, ctx.dry_run)?;
    backend.set_fileset_grace(path, ctx.cfg.policy.vo_grace_secs, ctx.dry_run)?;
    tracing::info!(
        fileset,
        soft = quota.soft,
        hard = quota.hard,
        "fileset quota applied"
    );
    Ok(quota)
}
