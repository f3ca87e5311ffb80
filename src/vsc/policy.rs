//! Path and quota rules. Everything here is pure: no I/O, no logging.

use crate::vsc::config::{BackendKind, InstituteConfig, StorageConfig, StorageType};
use crate::vsc::model::QuotaRecord;
use anyhow::{Result, bail};
use serde::Serialize;
use std::path::PathBuf;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityKind {
    User,
    UserGrouping,
    Vo,
    Project,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MountPoint {
    Login,
    Backend,
}

/// Limits as handed to a backend, in bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct AppliedQuota {
    pub soft: u64,
    pub hard: u64,
}

/// `vsc40075` -> `vsc400`. Ids shorter than three chars group to themselves.
pub fn user_grouping(id: &str) -> &str {
    match id.char_indices().rev().nth(1) {
        Some((idx, _)) if idx > 0 => &id[..idx],
        _ => id,
    }
}

/// Numeric part of an id without its last two digits: `gvo00123` -> `001`.
fn number_grouping(id: &str) -> &str {
    let digits = id.trim_start_matches(|c: char| !c.is_ascii_digit());
    match digits.len() {
        n if n > 2 => &digits[..n - 2],
        _ => digits,
    }
}

fn render(template: &str, id: &str, institute: &str) -> String {
    template
        .replace("{institute}", institute)
        .replace("{number_grouping}", number_grouping(id))
        .replace("{grouping}", user_grouping(id))
        .replace("{id}", id)
}

pub fn path_for(
    storage: &StorageConfig,
    kind: EntityKind,
    id: &str,
    institute: &str,
    mount: MountPoint,
) -> Result<PathBuf> {
    let template = match kind {
        EntityKind::User => &storage.templates.user,
        EntityKind::UserGrouping => &storage.templates.user_grouping,
        EntityKind::Vo => &storage.templates.vo,
        EntityKind::Project => &storage.templates.project,
    };
    if template.trim().is_empty() {
        bail!("storage {} has no {kind:?} path template", storage.name);
    }
    if id.is_empty() {
        bail!("cannot derive a {kind:?} path for an empty id");
    }
    let root = match mount {
        MountPoint::Login => &storage.login_mount_point,
        MountPoint::Backend => &storage.backend_mount_point,
    };
    Ok(root.join(render(template, id, institute)))
}

pub fn quota_to_apply(storage: &StorageConfig, declared_kib: u64, soft_fraction: f64) -> AppliedQuota {
    let replication = match storage.backend {
        BackendKind::ClusterFilesystem => u64::from(storage.replication_factor.max(1)),
        BackendKind::Posix | BackendKind::EnterpriseStorage => 1,
    };
    let hard = declared_kib.saturating_mul(1024).saturating_mul(replication);
    let fraction = soft_fraction.clamp(0.0, 1.0);
    let soft = ((hard as f64) * fraction).floor() as u64;
    AppliedQuota {
        soft: soft.min(hard),
        hard,
    }
}

/// The member's own quota record for a VO on one storage. Missing is not an
/// error; ambiguity is.
pub fn member_share<'a>(
    member_quota: &'a [QuotaRecord],
    vo_id: &str,
    storage: &StorageConfig,
) -> Result<Option<&'a QuotaRecord>> {
    if storage.storage_type == StorageType::DataShared {
        return Ok(None);
    }
    let matches: Vec<&QuotaRecord> = member_quota
        .iter()
        .filter(|q| q.fileset == vo_id && q.on_storage(&storage.name))
        .collect();
    match matches.as_slice() {
        [] => Ok(None),
        [one] => Ok(Some(one)),
        many => bail!(
            "{} quota records for fileset {vo_id} on {}",
            many.len(),
            storage.name
        ),
    }
}

pub fn parse_version(raw: &str) -> Option<Vec<u32>> {
    let parts: Option<Vec<u32>> = raw.trim().split('.').map(|p| p.parse().ok()).collect();
    parts.filter(|p| !p.is_empty())
}

fn version_below(version: &[u32], threshold: &[u32]) -> bool {
    let len = version.len().max(threshold.len());
    let pad = |v: &[u32]| {
        let mut v = v.to_vec();
        v.resize(len, 0);
        v
    };
    pad(version) < pad(threshold)
}

/// Parent fileset to pass on creation, if the filesystem version needs one.
pub fn parent_fileset(storage: &StorageConfig, min_version: &str) -> Option<&'static str> {
    if storage.backend != BackendKind::ClusterFilesystem {
        return None;
    }
    let version = parse_version(storage.version.as_deref()?)?;
    let threshold = parse_version(min_version)?;
    version_below(&version, &threshold).then_some("root")
}

/// Name of the data-sharing autogroup of a VO: `gvo00001` -> `gvos00001`.
pub fn sharing_group_name(vo_id: &str, institute: &InstituteConfig) -> String {
    match vo_id.strip_prefix(&institute.vo_prefix) {
        Some(rest) => format!("{}{rest}", institute.shared_vo_prefix),
        None => vo_id.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::{
        EntityKind, MountPoint, member_share, parent_fileset, path_for, quota_to_apply,
        sharing_group_name, user_grouping,
    };
    use crate::vsc::config::{
        BackendKind, InstituteConfig, PathTemplates, StorageConfig, StorageType,
    };
    use crate::vsc::model::{QuotaRecord, StorageRef};
    use std::path::PathBuf;

    fn storage(backend: BackendKind, storage_type: StorageType) -> StorageConfig {
        StorageConfig {
            name: "VSC_DATA".to_string(),
            storage_type,
            backend,
            filesystem: "kyukondata".to_string(),
            login_mount_point: PathBuf::from("/user/data"),
            backend_mount_point: PathBuf::from("/kyukondata"),
            templates: PathTemplates::default(),
            replication_factor: 2,
            version: None,
            user_grouping_fileset: true,
            quota_vo_kib: None,
            helper_bin: None,
        }
    }

    fn record(storage_name: &str, fileset: &str, hard: u64) -> QuotaRecord {
        QuotaRecord {
            storage: StorageRef {
                name: storage_name.to_string(),
                storage_type: "data".to_string(),
                institute: "gent".to_string(),
            },
            fileset: fileset.to_string(),
            hard,
            owner: Some("vsc40001".to_string()),
        }
    }

    #[test]
    fn grouping_strips_last_two_chars() {
        assert_eq!(user_grouping("vsc40075"), "vsc400");
        assert_eq!(user_grouping("ab"), "ab");
    }

    #[test]
    fn paths_follow_templates_and_mount_point() {
        let s = storage(BackendKind::Posix, StorageType::Data);
        let vo = path_for(&s, EntityKind::Vo, "gvo00123", "gent", MountPoint::Backend)
            .expect("vo path");
        assert_eq!(vo, PathBuf::from("/kyukondata/gent/vo/001/gvo00123"));

        let user = path_for(&s, EntityKind::User, "vsc40075", "gent", MountPoint::Login)
            .expect("user path");
        assert_eq!(user, PathBuf::from("/user/data/gent/vsc400/vsc40075"));

        let grouping = path_for(
            &s,
            EntityKind::UserGrouping,
            "vsc40075",
            "gent",
            MountPoint::Backend,
        )
        .expect("grouping path");
        assert_eq!(grouping, PathBuf::from("/kyukondata/gent/vsc400"));

        let project = path_for(&s, EntityKind::Project, "gpr_compute00012", "gent", MountPoint::Login)
            .expect("project path");
        assert_eq!(project, PathBuf::from("/user/data/projects/gpr_compute000/gpr_compute00012"));
    }

    #[test]
    fn empty_template_is_an_error() {
        let mut s = storage(BackendKind::Posix, StorageType::Data);
        s.templates.vo = String::new();
        assert!(path_for(&s, EntityKind::Vo, "gvo00001", "gent", MountPoint::Backend).is_err());
    }

    #[test]
    fn replication_only_applies_to_cluster_filesystem() {
        let gpfs = storage(BackendKind::ClusterFilesystem, StorageType::Data);
        let q = quota_to_apply(&gpfs, 1000, 0.8);
        assert_eq!(q.hard, 1000 * 1024 * 2);
        assert_eq!(q.soft, 1638400);

        let oceanstor = storage(BackendKind::EnterpriseStorage, StorageType::Data);
        assert_eq!(quota_to_apply(&oceanstor, 1000, 0.95).hard, 1000 * 1024);
    }

    #[test]
    fn soft_never_exceeds_hard() {
        let s = storage(BackendKind::ClusterFilesystem, StorageType::Scratch);
        for kib in [0, 1, 7, 1023, 16 * 1024, 123_456_789] {
            for fraction in [0.0, 0.5, 0.8, 0.95, 1.0] {
                let q = quota_to_apply(&s, kib, fraction);
                assert!(q.soft <= q.hard, "kib={kib} fraction={fraction}");
                assert_eq!(q.hard, kib * 1024 * 2);
            }
        }
    }

    #[test]
    fn member_share_picks_own_record_and_rejects_ambiguity() {
        let s = storage(BackendKind::Posix, StorageType::Data);
        let quota = vec![
            record("VSC_DATA", "gvo00001", 10),
            record("VSC_DATA", "gvo00002", 20),
            record("VSC_SCRATCH", "gvo00001", 30),
        ];
        let found = member_share(&quota, "gvo00001", &s).expect("share");
        assert_eq!(found.map(|q| q.hard), Some(10));
        assert!(member_share(&quota, "gvo00009", &s).expect("share").is_none());

        let dup = vec![
            record("VSC_DATA", "gvo00001", 10),
            record("VSC_DATA", "gvo00001", 11),
        ];
        assert!(member_share(&dup, "gvo00001", &s).is_err());
    }

    #[test]
    fn old_cluster_filesystem_needs_root_parent() {
        let mut s = storage(BackendKind::ClusterFilesystem, StorageType::Scratch);
        s.version = Some("3.4.0.7".to_string());
        assert_eq!(parent_fileset(&s, "3.5.0.0"), Some("root"));
        s.version = Some("3.5".to_string());
        assert_eq!(parent_fileset(&s, "3.5.0.0"), None);
        s.version = Some("5.1.2".to_string());
        assert_eq!(parent_fileset(&s, "3.5.0.0"), None);

        let mut posix = storage(BackendKind::Posix, StorageType::Scratch);
        posix.version = Some("1.0".to_string());
        assert_eq!(parent_fileset(&posix, "3.5.0.0"), None);
    }

    #[test]
    fn sharing_group_swaps_prefix() {
        let institute = InstituteConfig::default();
        assert_eq!(sharing_group_name("gvo00001", &institute), "gvos00001");
        assert_eq!(sharing_group_name("bvo00001", &institute), "bvo00001");
    }
}
