//! VO reconciliation: filesets, ownership, quota and status per VO, then the
//! per-member share and directory for members changed since the watermark.

use crate::backend::StorageOps;
use crate::error::StatusUpdateError;
use crate::vsc::config::{StorageConfig, StorageType};
use crate::vsc::model::{Account, ResolvedAccount, ResolvedVo, Status, Vo};
use crate::vsc::policy::{self, EntityKind, MountPoint};
use crate::vsc::provision::{SyncContext, apply_fileset_quota, ensure_fileset, warm_fileset_listing};
use crate::vsc::report::SyncOutcome;
use anyhow::{Context, Result, bail};
use std::path::{Path, PathBuf};

const VO_FILESET_MODE: u32 = 0o770;
const MEMBER_DIR_MODE: u32 = 0o700;

pub struct VoSync<'a> {
    ctx: SyncContext<'a>,
}

impl<'a> VoSync<'a> {
    pub fn new(ctx: SyncContext<'a>) -> Self {
        Self { ctx }
    }

    /// Reconciles `vo_ids` on one storage. A VO-level failure marks the VO
    /// and all its members failed; a member failure marks only that member.
    pub fn process_vos(
        &self,
        vo_ids: &[String],
        storage: &StorageConfig,
        backend: &dyn StorageOps,
        since: &str,
    ) -> SyncOutcome {
        let mut outcome = SyncOutcome::default();
        if storage.storage_type == StorageType::Home {
            tracing::debug!(storage = %storage.name, "VOs have no home storage");
            return outcome;
        }

        let mut ids = vo_ids.to_vec();
        ids.sort();
        ids.dedup();
        warm_fileset_listing(storage, backend);

        for vo_id in &ids {
            let _span = tracing::info_span!("vo", vo = %vo_id).entered();
            let resolved = match self.resolve(vo_id, storage) {
                Ok(resolved) => resolved,
                Err(err) => {
                    tracing::error!(error = %format!("{err:#}"), "cannot resolve VO");
                    outcome.failed.record(vo_id, Vec::<String>::new());
                    continue;
                }
            };

            let members = match self.provision_vo(&resolved, storage, backend, since) {
                Ok(members) => members,
                Err(err) => {
                    tracing::error!(error = %format!("{err:#}"), "VO sync failed");
                    outcome.failed.record(vo_id, resolved.members_sorted());
                    continue;
                }
            };
            outcome.ok.record(vo_id, Vec::<String>::new());

            for member in &members {
                let _member_span = tracing::info_span!("member", member = %member.vsc_id).entered();
                match self.process_member(&resolved, member, storage, backend) {
                    Ok(()) => outcome.ok.record(vo_id, [member.vsc_id.as_str()]),
                    Err(err) => {
                        tracing::error!(error = %format!("{err:#}"), "member sync failed");
                        outcome.failed.record(vo_id, [member.vsc_id.as_str()]);
                    }
                }
            }
        }
        outcome
    }

    fn resolve(&self, vo_id: &str, storage: &StorageConfig) -> Result<ResolvedVo> {
        let client = self.ctx.client;
        let vo = client
            .vo(vo_id)
            .with_context(|| format!("failed to fetch VO {vo_id}"))?;
        let quota = client
            .vo_quota(vo_id)
            .with_context(|| format!("failed to fetch quota of VO {vo_id}"))?;
        let quota = self.ctx.host_quota(quota);

        let shares_data = storage.storage_type == StorageType::DataShared
            && quota.iter().any(|q| q.on_storage(&storage.name));
        let sharing_group = if shares_data {
            let name = policy::sharing_group_name(vo_id, &self.ctx.cfg.institute);
            Some(
                client
                    .autogroup(&name)
                    .with_context(|| format!("failed to fetch sharing group {name}"))?,
            )
        } else {
            None
        };

        Ok(ResolvedVo {
            owner_uid: self.resolve_owner(&vo),
            is_default: self.ctx.cfg.institute.is_default_vo(vo_id),
            vo,
            quota,
            sharing_group,
        })
    }

    /// First moderator's uid, else the configured fallback. Never fails.
    fn resolve_owner(&self, vo: &Vo) -> u32 {
        let fallback = self.ctx.cfg.policy.fallback_uid;
        let Some(moderator) = vo.moderators.first() else {
            tracing::warn!(vo = %vo.vsc_id, fallback, "VO has no moderator");
            return fallback;
        };
        match self.ctx.client.account(moderator) {
            Ok(account) => account.vsc_id_number,
            Err(err) => {
                tracing::warn!(vo = %vo.vsc_id, moderator = %moderator, error = %err, fallback, "cannot resolve moderator");
                fallback
            }
        }
    }

    fn vo_path(&self, storage: &StorageConfig, id: &str) -> Result<PathBuf> {
        policy::path_for(storage, EntityKind::Vo, id, self.ctx.host(), MountPoint::Backend)
    }

    /// VO-level steps. Returns the members still to process.
    fn provision_vo(
        &self,
        vo: &ResolvedVo,
        storage: &StorageConfig,
        backend: &dyn StorageOps,
        since: &str,
    ) -> Result<Vec<Account>> {
        let vo_id = vo.vsc_id();
        match storage.storage_type {
            StorageType::Data if !vo.is_default => {
                let path = self.vo_path(storage, vo_id)?;
                self.create_fileset(storage, backend, vo_id, &path, vo.owner_uid, vo.gid())?;
                let declared = vo
                    .quota_on(&storage.name)
                    .first()
                    .map(|q| q.hard)
                    .or(storage.quota_vo_kib)
                    .unwrap_or(self.ctx.cfg.policy.default_vo_data_quota_kib);
                apply_fileset_quota(&self.ctx, storage, backend, &path, vo_id, declared)?;
                self.activate(&vo.vo)?;
            }
            StorageType::DataShared if !vo.is_default => match &vo.sharing_group {
                Some(group) => {
                    let path = self.vo_path(storage, &group.vsc_id)?;
                    self.create_fileset(
                        storage,
                        backend,
                        &group.vsc_id,
                        &path,
                        vo.owner_uid,
                        group.vsc_id_number,
                    )?;
                    if let Some(declared) = vo.quota_on(&storage.name).first().map(|q| q.hard) {
                        apply_fileset_quota(&self.ctx, storage, backend, &path, &group.vsc_id, declared)?;
                    }
                }
                None => tracing::debug!("VO has no data sharing quota"),
            },
            _ => {}
        }

        if self.ctx.cfg.institute.host_default_vo() == Some(vo_id) {
            tracing::info!("not deploying members of the host institute VO");
            return Ok(Vec::new());
        }

        if storage.storage_type == StorageType::Scratch {
            let path = self.vo_path(storage, vo_id)?;
            self.create_fileset(storage, backend, vo_id, &path, vo.owner_uid, vo.gid())?;
            match self.scratch_quota_kib(vo, storage)? {
                Some(declared) => {
                    apply_fileset_quota(&self.ctx, storage, backend, &path, vo_id, declared)?;
                }
                None => tracing::warn!(storage = %storage.name, "no scratch quota declared or defaulted"),
            }
        }

        let members_apply = match storage.storage_type {
            StorageType::Data => !vo.is_default,
            StorageType::Scratch => true,
            StorageType::Home | StorageType::DataShared => false,
        };
        if !members_apply {
            return Ok(Vec::new());
        }

        let mut members = self
            .ctx
            .client
            .vo_modified_members(vo_id, since)
            .with_context(|| format!("failed to fetch members of {vo_id} modified since {since}"))?;
        members.sort_by(|a, b| a.vsc_id.cmp(&b.vsc_id));
        members.dedup_by(|a, b| a.vsc_id == b.vsc_id);
        Ok(members)
    }

    fn scratch_quota_kib(&self, vo: &ResolvedVo, storage: &StorageConfig) -> Result<Option<u64>> {
        match vo.quota_on(&storage.name).as_slice() {
            [] => Ok(storage.quota_vo_kib),
            [one] => Ok(Some(one.hard)),
            many => bail!(
                "{} scratch quota records for {} on {}",
                many.len(),
                vo.vsc_id(),
                storage.name
            ),
        }
    }

    fn create_fileset(
        &self,
        storage: &StorageConfig,
        backend: &dyn StorageOps,
        name: &str,
        path: &Path,
        owner_uid: u32,
        gid: u32,
    ) -> Result<()> {
        ensure_fileset(&self.ctx, storage, backend, name, path)?;
        backend.chmod(VO_FILESET_MODE, path, self.ctx.dry_run)?;
        backend.chown(owner_uid, gid, path, self.ctx.dry_run)?;
        Ok(())
    }

    fn activate(&self, vo: &Vo) -> Result<()> {
        if !vo.status.is_pending() {
            return Ok(());
        }
        if self.ctx.dry_run {
            tracing::info!(status = ?vo.status, dry_run = true, "would change VO status to active");
            return Ok(());
        }
        let updated = self.ctx.client.patch_vo_status(&vo.vsc_id, Status::Active)?;
        if updated.status != Status::Active {
            let err = StatusUpdateError {
                kind: "vo",
                id: vo.vsc_id.clone(),
                actual: updated.status,
            };
            tracing::error!(error = %err, "status update rejected");
            return Err(err.into());
        }
        tracing::info!("VO status changed to active");
        Ok(())
    }

    fn process_member(
        &self,
        vo: &ResolvedVo,
        member: &Account,
        storage: &StorageConfig,
        backend: &dyn StorageOps,
    ) -> Result<()> {
        let member = self.ctx.resolve_account(&member.vsc_id)?;
        let vo_path = self.vo_path(storage, vo.vsc_id())?;

        if !vo.is_default {
            self.set_member_quota(vo, &member, storage, backend, &vo_path)?;
        }

        let target = vo_path.join(member.vsc_id());
        backend.create_stat_directory(
            &target,
            MEMBER_DIR_MODE,
            member.uid(),
            member.gid(),
            false,
            self.ctx.dry_run,
        )?;
        Ok(())
    }

    fn set_member_quota(
        &self,
        vo: &ResolvedVo,
        member: &ResolvedAccount,
        storage: &StorageConfig,
        backend: &dyn StorageOps,
        vo_path: &Path,
    ) -> Result<()> {
        let Some(record) = policy::member_share(&member.quota, vo.vsc_id(), storage)? else {
            tracing::error!(storage = %storage.name, "member has no quota record for this VO; skipping quota");
            return Ok(());
        };
        let quota = self.ctx.applied_quota(storage, record.hard);
        backend.set_user_quota(quota, member.uid(), vo_path, self.ctx.dry_run)?;
        Ok(())
    }
}
