use super::{BackendError, FilesetInfo, FilesetSpec, PathStat, StorageOps, dry_run_skip};
use crate::vsc::config::BackendKind;
use crate::vsc::policy::AppliedQuota;
use std::fs;
use std::io;
use std::os::unix::fs::{MetadataExt, PermissionsExt};
use std::path::Path;

/// Plain POSIX filesystem. Filesets are ordinary directories and there is no
/// quota support, so quota calls only log.
#[derive(Debug, Default)]
pub struct PosixBackend;

fn io_err<'a>(op: &'static str, target: &'a Path) -> impl FnOnce(io::Error) -> BackendError + 'a {
    move |source| BackendError::Io {
        op,
        target: target.to_path_buf(),
        source,
    }
}

fn no_quota_support(op: &str, target: &Path) {
    tracing::warn!(
        op,
        target = %target.display(),
        "posix storage has no quota support; skipping"
    );
}

impl StorageOps for PosixBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Posix
    }

    fn list_filesets(&self, _filesystem: &str) -> Result<Vec<FilesetInfo>, BackendError> {
        Err(BackendError::Unsupported {
            op: "list_filesets",
            kind: BackendKind::Posix.as_str(),
        })
    }

    fn get_fileset_info(&self, spec: &FilesetSpec) -> Result<Option<FilesetInfo>, BackendError> {
        Ok(spec.path.is_dir().then(|| FilesetInfo {
            name: spec.name.clone(),
            path: Some(spec.path.clone()),
        }))
    }

    fn stat_path(&self, path: &Path) -> Result<Option<PathStat>, BackendError> {
        match fs::symlink_metadata(path) {
            Ok(meta) => Ok(Some(PathStat {
                uid: meta.uid(),
                gid: meta.gid(),
                mode: meta.mode() & 0o7777,
                is_symlink: meta.file_type().is_symlink(),
            })),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(io_err("stat", path)(err)),
        }
    }

    fn make_dir(&self, path: &Path, dry_run: bool) -> Result<(), BackendError> {
        if dry_run_skip(dry_run, self.kind(), "make_dir", path, "create directory") {
            return Ok(());
        }
        fs::create_dir_all(path).map_err(io_err("make_dir", path))
    }

    fn make_fileset(&self, spec: &FilesetSpec, dry_run: bool) -> Result<(), BackendError> {
        if dry_run_skip(
            dry_run,
            self.kind(),
            "make_fileset",
            &spec.path,
            format_args!("create fileset {}", spec.name),
        ) {
            return Ok(());
        }
        fs::create_dir_all(&spec.path).map_err(io_err("make_fileset", &spec.path))
    }

    fn chmod(&self, mode: u32, path: &Path, dry_run: bool) -> Result<(), BackendError> {
        if dry_run_skip(dry_run, self.kind(), "chmod", path, format_args!("{mode:o}")) {
            return Ok(());
        }
        fs::set_permissions(path, fs::Permissions::from_mode(mode)).map_err(io_err("chmod", path))
    }

    fn chown(&self, uid: u32, gid: u32, path: &Path, dry_run: bool) -> Result<(), BackendError> {
        if dry_run_skip(dry_run, self.kind(), "chown", path, format_args!("{uid}:{gid}")) {
            return Ok(());
        }
        std::os::unix::fs::chown(path, Some(uid), Some(gid)).map_err(io_err("chown", path))
    }

    fn set_fileset_quota(
        &self,
        quota: AppliedQuota,
        path: &Path,
        fileset: &str,
        dry_run: bool,
    ) -> Result<(), BackendError> {
        let detail = format!("{fileset} soft={} hard={}", quota.soft, quota.hard);
        if !dry_run_skip(dry_run, self.kind(), "set_fileset_quota", path, detail) {
            no_quota_support("set_fileset_quota", path);
        }
        Ok(())
    }

    fn set_fileset_grace(
        &self,
        path: &Path,
        grace_secs: u64,
        dry_run: bool,
    ) -> Result<(), BackendError> {
        let detail = format!("{grace_secs}s");
        if !dry_run_skip(dry_run, self.kind(), "set_fileset_grace", path, detail) {
            no_quota_support("set_fileset_grace", path);
        }
        Ok(())
    }

    fn set_user_quota(
        &self,
        quota: AppliedQuota,
        uid: u32,
        path: &Path,
        dry_run: bool,
    ) -> Result<(), BackendError> {
        let detail = format!("uid={uid} soft={} hard={}", quota.soft, quota.hard);
        if !dry_run_skip(dry_run, self.kind(), "set_user_quota", path, detail) {
            no_quota_support("set_user_quota", path);
        }
        Ok(())
    }

    fn set_user_grace(
        &self,
        path: &Path,
        grace_secs: u64,
        dry_run: bool,
    ) -> Result<(), BackendError> {
        let detail = format!("{grace_secs}s");
        if !dry_run_skip(dry_run, self.kind(), "set_user_grace", path, detail) {
            no_quota_support("set_user_grace", path);
        }
        Ok(())
    }

    fn write_file(&self, path: &Path, contents: &str, dry_run: bool) -> Result<(), BackendError> {
        let detail = format_args!("write {} bytes", contents.len());
        if dry_run_skip(dry_run, self.kind(), "write_file", path, detail) {
            return Ok(());
        }
        fs::write(path, contents).map_err(io_err("write_file", path))
    }
}
