//! Account reconciliation: personal directories per storage and personal
//! quota changes.

use crate::backend::StorageOps;
use crate::error::StatusUpdateError;
use crate::vsc::config::{StorageConfig, StorageType};
use crate::vsc::model::{QuotaRecord, ResolvedAccount, Status};
use crate::vsc::policy::{self, EntityKind, MountPoint, user_grouping};
use crate::vsc::provision::{SyncContext, ensure_fileset, warm_fileset_listing};
use crate::vsc::report::SyncOutcome;
use anyhow::{Context, Result, anyhow};
use std::path::{Path, PathBuf};

const USER_DIR_MODE: u32 = 0o700;
const GROUPING_MODE: u32 = 0o755;

pub struct UserSync<'a> {
    ctx: SyncContext<'a>,
}

impl<'a> UserSync<'a> {
    pub fn new(ctx: SyncContext<'a>) -> Self {
        Self { ctx }
    }

    /// Creates the personal directory of each account on `storage`.
    pub fn process_users(
        &self,
        account_ids: &[String],
        storage: &StorageConfig,
        backend: &dyn StorageOps,
    ) -> SyncOutcome {
        let mut outcome = SyncOutcome::default();
        if storage.storage_type == StorageType::DataShared {
            tracing::debug!(storage = %storage.name, "accounts have no shared data storage");
            return outcome;
        }

        let mut ids = account_ids.to_vec();
        ids.sort();
        ids.dedup();
        warm_fileset_listing(storage, backend);

        for vsc_id in &ids {
            let _span = tracing::info_span!("account", account = %vsc_id).entered();
            match self.process_user(vsc_id, storage, backend) {
                Ok(()) => outcome.ok.record(vsc_id, [storage.name.as_str()]),
                Err(err) => {
                    tracing::error!(error = %format!("{err:#}"), "account sync failed");
                    outcome.failed.record(vsc_id, [storage.name.as_str()]);
                }
            }
        }
        outcome
    }

    fn process_user(&self, vsc_id: &str, storage: &StorageConfig, backend: &dyn StorageOps) -> Result<()> {
        let account = self.ctx.resolve_account(vsc_id)?;
        let institute = account.account.institute();

        if storage.user_grouping_fileset {
            let grouping = user_grouping(vsc_id);
            let path = policy::path_for(storage, EntityKind::UserGrouping, vsc_id, institute, MountPoint::Backend)?;
            ensure_fileset(&self.ctx, storage, backend, grouping, &path)?;
            backend.chmod(GROUPING_MODE, &path, self.ctx.dry_run)?;
        }

        let path = policy::path_for(storage, EntityKind::User, vsc_id, institute, MountPoint::Backend)?;
        match backend.stat_path(&path)? {
            Some(stat) if stat.is_symlink => {
                tracing::warn!(path = %path.display(), "user directory is a symlink; leaving it alone");
            }
            _ => {
                backend.create_stat_directory(
                    &path,
                    USER_DIR_MODE,
                    account.uid(),
                    account.gid(),
                    false,
                    self.ctx.dry_run,
                )?;
                if storage.storage_type == StorageType::Home {
                    self.place_pubkeys(&account, &path, backend)?;
                }
            }
        }

        if storage.storage_type == StorageType::Home {
            self.activate(&account)?;
        }
        Ok(())
    }

    fn place_pubkeys(&self, account: &ResolvedAccount, home: &Path, backend: &dyn StorageOps) -> Result<()> {
        let pubkeys: Vec<String> = self
            .ctx
            .client
            .account_pubkeys(account.vsc_id())
            .with_context(|| format!("failed to fetch public keys of {}", account.vsc_id()))?
            .into_iter()
            .filter(|key| !key.deleted)
            .map(|key| key.pubkey)
            .collect();
        backend.populate_home_dir(home, account.uid(), account.gid(), &pubkeys, self.ctx.dry_run)?;
        Ok(())
    }

    fn activate(&self, account: &ResolvedAccount) -> Result<()> {
        let status = account.account.status;
        if !status.is_pending() {
            return Ok(());
        }
        if self.ctx.dry_run {
            tracing::info!(status = ?status, dry_run = true, "would change account status to active");
            return Ok(());
        }
        let updated = self
            .ctx
            .client
            .patch_account_status(account.vsc_id(), Status::Active)?;
        if updated.status != Status::Active {
            let err = StatusUpdateError {
                kind: "account",
                id: account.vsc_id().to_string(),
                actual: updated.status,
            };
            tracing::error!(error = %err, "status update rejected");
            return Err(err.into());
        }
        tracing::info!("account status changed to active");
        Ok(())
    }

    /// Applies changed personal quota records that land on `storage`. VO
    /// shares of members are handled by the VO pass.
    pub fn process_users_quota(
        &self,
        records: &[QuotaRecord],
        storage: &StorageConfig,
        backend: &dyn StorageOps,
    ) -> SyncOutcome {
        let mut outcome = SyncOutcome::default();
        if storage.storage_type == StorageType::DataShared {
            return outcome;
        }
        let prefix = &self.ctx.cfg.policy.user_prefix;
        let mut personal: Vec<&QuotaRecord> = records
            .iter()
            .filter(|q| q.on_storage(&storage.name) && q.fileset.starts_with(prefix.as_str()))
            .collect();
        personal.sort_by(|a, b| a.owner.cmp(&b.owner));

        for record in personal {
            let Some(owner) = record.owner.as_deref() else {
                tracing::error!(fileset = %record.fileset, "quota record without owner; skipping");
                continue;
            };
            let _span = tracing::info_span!("account_quota", account = %owner).entered();
            match self.apply_user_quota(owner, record, storage, backend) {
                Ok(()) => outcome.ok.record(owner, [storage.name.as_str()]),
                Err(err) => {
                    tracing::error!(error = %format!("{err:#}"), "quota sync failed");
                    outcome.failed.record(owner, [storage.name.as_str()]);
                }
            }
        }
        outcome
    }

    fn apply_user_quota(
        &self,
        owner: &str,
        record: &QuotaRecord,
        storage: &StorageConfig,
        backend: &dyn StorageOps,
    ) -> Result<()> {
        let account = self
            .ctx
            .client
            .account(owner)
            .with_context(|| format!("failed to fetch account {owner}"))?;
        let path = self.quota_path(owner, account.institute(), storage)?;
        let quota = self.ctx.applied_quota(storage, record.hard);
        backend.set_user_quota(quota, account.vsc_id_number, &path, self.ctx.dry_run)?;
        backend.set_user_grace(&path, self.ctx.cfg.policy.user_grace_secs, self.ctx.dry_run)?;
        tracing::info!(soft = quota.soft, hard = quota.hard, path = %path.display(), "user quota applied");
        Ok(())
    }

    fn quota_path(&self, vsc_id: &str, institute: &str, storage: &StorageConfig) -> Result<PathBuf> {
        let path_of = |kind| policy::path_for(storage, kind, vsc_id, institute, MountPoint::Backend);
        match storage.storage_type {
            StorageType::Home => path_of(EntityKind::User),
            StorageType::Data => path_of(EntityKind::UserGrouping),
            StorageType::Scratch if storage.user_grouping_fileset => path_of(EntityKind::UserGrouping),
            StorageType::Scratch => {
                let user = path_of(EntityKind::User)?;
                user.parent()
                    .map(PathBuf::from)
                    .ok_or_else(|| anyhow!("user path {} has no parent", user.display()))
            }
            StorageType::DataShared => Err(anyhow!("no personal quota on shared data storage")),
        }
    }
}
