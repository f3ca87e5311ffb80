//! Storage backend capabilities.
//!
//! Every mutating call takes `dry_run` explicitly. A dry-run call logs what it
//! would have done and reports success without touching anything, so callers
//! can continue with the steps that depend on it.

pub mod external;
pub mod posix;
#[cfg(test)]
pub mod recording;

use crate::vsc::config::{BackendKind, StorageConfig};
use crate::vsc::policy::AppliedQuota;
use anyhow::{Result, anyhow};
use serde::{Deserialize, Serialize};
use std::fmt::Display;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

pub use external::ExternalBackend;
pub use posix::PosixBackend;

const SSH_DIR_MODE: u32 = 0o700;
const AUTHORIZED_KEYS_MODE: u32 = 0o644;

#[derive(Debug, Error)]
pub enum BackendError {
    #[error("{op} {}: {source}", .target.display())]
    Io {
        op: &'static str,
        target: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to run `{command}`: {message}")]
    Spawn { command: String, message: String },
    #[error("`{command}` exited with {code:?}: {stderr}")]
    Command {
        command: String,
        code: Option<i32>,
        stderr: String,
    },
    #[error("cannot decode {op} output: {message}")]
    Decode { op: &'static str, message: String },
    #[error("{op} is not supported by the {kind} backend")]
    Unsupported { op: &'static str, kind: &'static str },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilesetInfo {
    pub name: String,
    #[serde(default)]
    pub path: Option<PathBuf>,
}

/// Fileset to look up or create.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilesetSpec {
    pub filesystem: String,
    pub name: String,
    pub path: PathBuf,
    pub parent: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PathStat {
    pub uid: u32,
    pub gid: u32,
    /// Permission bits only.
    pub mode: u32,
    #[serde(default)]
    pub is_symlink: bool,
}

pub trait StorageOps {
    fn kind(&self) -> BackendKind;

    fn list_filesets(&self, filesystem: &str) -> Result<Vec<FilesetInfo>, BackendError>;

    fn get_fileset_info(&self, spec: &FilesetSpec) -> Result<Option<FilesetInfo>, BackendError>;

    fn stat_path(&self, path: &Path) -> Result<Option<PathStat>, BackendError>;

    fn make_dir(&self, path: &Path, dry_run: bool) -> Result<(), BackendError>;

    fn make_fileset(&self, spec: &FilesetSpec, dry_run: bool) -> Result<(), BackendError>;

    fn chmod(&self, mode: u32, path: &Path, dry_run: bool) -> Result<(), BackendError>;

    fn chown(&self, uid: u32, gid: u32, path: &Path, dry_run: bool) -> Result<(), BackendError>;

    fn set_fileset_quota(
        &self,
        quota: AppliedQuota,
        path: &Path,
        fileset: &str,
        dry_run: bool,
    ) -> Result<(), BackendError>;

    fn set_fileset_grace(&self, path: &Path, grace_secs: u64, dry_run: bool)
    -> Result<(), BackendError>;

    fn set_user_quota(
        &self,
        quota: AppliedQuota,
        uid: u32,
        path: &Path,
        dry_run: bool,
    ) -> Result<(), BackendError>;

    fn set_user_grace(&self, path: &Path, grace_secs: u64, dry_run: bool)
    -> Result<(), BackendError>;

    /// Replaces the contents of the file at `path`.
    fn write_file(&self, path: &Path, contents: &str, dry_run: bool) -> Result<(), BackendError>;

    /// Creates `path` if missing. Permissions are set on creation, or when
    /// `override_permissions` is set and they differ; ownership is set on
    /// creation or whenever it differs. Returns whether the directory was
    /// created.
    fn create_stat_directory(
        &self,
        path: &Path,
        mode: u32,
        uid: u32,
        gid: u32,
        override_permissions: bool,
        dry_run: bool,
    ) -> Result<bool, BackendError> {
        let existing = self.stat_path(path)?;
        let created = existing.is_none();
        if created {
            self.make_dir(path, dry_run)?;
        }

        let mode_differs = existing.is_some_and(|s| s.mode & 0o7777 != mode);
        if created || (override_permissions && mode_differs) {
            self.chmod(mode, path, dry_run)?;
        }

        let owner_differs = existing.is_some_and(|s| s.uid != uid || s.gid != gid);
        if created || owner_differs {
            self.chown(uid, gid, path, dry_run)?;
        }
        Ok(created)
    }

    /// Writes `pubkeys` to `<home>/.ssh/authorized_keys`, replacing what was
    /// there, with `.ssh` at 0700 and the key file at 0644, both owned by the
    /// account.
    fn populate_home_dir(
        &self,
        home: &Path,
        uid: u32,
        gid: u32,
        pubkeys: &[String],
        dry_run: bool,
    ) -> Result<(), BackendError> {
        let ssh_dir = home.join(".ssh");
        let authorized_keys = ssh_dir.join("authorized_keys");
        let contents: String = pubkeys.iter().map(|key| format!("{}\n", key.trim())).collect();

        self.make_dir(&ssh_dir, dry_run)?;
        self.write_file(&authorized_keys, &contents, dry_run)?;
        self.chmod(SSH_DIR_MODE, &ssh_dir, dry_run)?;
        self.chown(uid, gid, &ssh_dir, dry_run)?;
        self.chmod(AUTHORIZED_KEYS_MODE, &authorized_keys, dry_run)?;
        self.chown(uid, gid, &authorized_keys, dry_run)?;
        tracing::info!(home = %home.display(), keys = pubkeys.len(), dry_run, "ssh keys placed");
        Ok(())
    }
}

/// Logs a mutation suppressed by dry-run. Returns true when the caller must
/// stop before mutating.
pub(crate) fn dry_run_skip(
    dry_run: bool,
    kind: BackendKind,
    op: &str,
    target: &Path,
    detail: impl Display,
) -> bool {
    if dry_run {
        tracing::info!(
            backend = kind.as_str(),
            op,
            target = %target.display(),
            dry_run = true,
            "would run {op}: {detail}"
        );
    }
    dry_run
}

/// Backend for one configured storage, picked once from its kind.
#[derive(Debug)]
pub enum Backend {
    Posix(PosixBackend),
    External(ExternalBackend),
}

impl Backend {
    pub fn from_config(storage: &StorageConfig, timeout_secs: Option<u64>) -> Result<Self> {
        match storage.backend {
            BackendKind::Posix => Ok(Self::Posix(PosixBackend)),
            kind @ (BackendKind::ClusterFilesystem | BackendKind::EnterpriseStorage) => {
                let helper = storage.helper_bin.clone().ok_or_else(|| {
                    anyhow!("storage {} has no helper_bin configured", storage.name)
                })?;
                Ok(Self::External(ExternalBackend::new(kind, helper, timeout_secs)))
            }
        }
    }

    fn ops(&self) -> &dyn StorageOps {
        match self {
            Self::Posix(b) => b,
            Self::External(b) => b,
        }
    }
}

impl StorageOps for Backend {
    fn kind(&self) -> BackendKind {
        self.ops().kind()
    }

    fn list_filesets(&self, filesystem: &str) -> Result<Vec<FilesetInfo>, BackendError> {
        self.ops().list_filesets(filesystem)
    }

    fn get_fileset_info(&self, spec: &FilesetSpec) -> Result<Option<FilesetInfo>, BackendError> {
        self.ops().get_fileset_info(spec)
    }

    fn stat_path(&self, path: &Path) -> Result<Option<PathStat>, BackendError> {
        self.ops().stat_path(path)
    }

    fn make_dir(&self, path: &Path, dry_run: bool) -> Result<(), BackendError> {
        self.ops().make_dir(path, dry_run)
    }

    fn make_fileset(&self, spec: &FilesetSpec, dry_run: bool) -> Result<(), BackendError> {
        self.ops().make_fileset(spec, dry_run)
    }

    fn chmod(&self, mode: u32, path: &Path, dry_run: bool) -> Result<(), BackendError> {
        self.ops().chmod(mode, path, dry_run)
    }

    fn chown(&self, uid: u32, gid: u32, path: &Path, dry_run: bool) -> Result<(), BackendError> {
        self.ops().chown(uid, gid, path, dry_run)
    }

    fn set_fileset_quota(
        &self,
        quota: AppliedQuota,
        path: &Path,
        fileset: &str,
        dry_run: bool,
    ) -> Result<(), BackendError> {
        self.ops().set_fileset_quota(quota, path, fileset, dry_run)
    }

    fn set_fileset_grace(
        &self,
        path: &Path,
        grace_secs: u64,
        dry_run: bool,
    ) -> Result<(), BackendError> {
        self.ops().set_fileset_grace(path, grace_secs, dry_run)
    }

    fn set_user_quota(
        &self,
        quota: AppliedQuota,
        uid: u32,
        path: &Path,
        dry_run: bool,
    ) -> Result<(), BackendError> {
        self.ops().set_user_quota(quota, uid, path, dry_run)
    }

    fn set_user_grace(
        &self,
        path: &Path,
        grace_secs: u64,
        dry_run: bool,
    ) -> Result<(), BackendError> {
        self.ops().set_user_grace(path, grace_secs, dry_run)
    }

    fn write_file(&self, path: &Path, contents: &str, dry_run: bool) -> Result<(), BackendError> {
        self.ops().write_file(path, contents, dry_run)
    }
}
