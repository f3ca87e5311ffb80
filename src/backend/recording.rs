//! In-memory backend that records every call, for driver tests.

use super::{BackendError, FilesetInfo, FilesetSpec, PathStat, StorageOps};
use crate::vsc::config::BackendKind;
use crate::vsc::policy::AppliedQuota;
use std::cell::RefCell;
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Call {
    pub op: &'static str,
    pub target: PathBuf,
    pub detail: String,
    pub dry_run: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct State {
    pub filesets: BTreeSet<String>,
    /// Directories and files with their ownership and mode.
    pub entries: BTreeMap<PathBuf, PathStat>,
    pub files: BTreeMap<PathBuf, String>,
    pub fileset_quota: BTreeMap<PathBuf, AppliedQuota>,
    pub user_quota: BTreeMap<(PathBuf, u32), AppliedQuota>,
    pub grace: BTreeMap<PathBuf, u64>,
}

#[derive(Debug)]
pub struct RecordingBackend {
    kind: BackendKind,
    calls: RefCell<Vec<Call>>,
    state: RefCell<State>,
    failures: RefCell<Vec<(&'static str, PathBuf)>>,
}

impl Default for RecordingBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl RecordingBackend {
    pub fn new() -> Self {
        Self::with_kind(BackendKind::ClusterFilesystem)
    }

    pub fn with_kind(kind: BackendKind) -> Self {
        Self {
            kind,
            calls: RefCell::new(Vec::new()),
            state: RefCell::new(State::default()),
            failures: RefCell::new(Vec::new()),
        }
    }

    /// Makes `op` on `target` fail from now on.
    pub fn fail_on(&self, op: &'static str, target: impl Into<PathBuf>) {
        self.failures.borrow_mut().push((op, target.into()));
    }

    pub fn seed_dir(&self, path: &Path, uid: u32, gid: u32, mode: u32) {
        self.state.borrow_mut().entries.insert(
            path.to_path_buf(),
            PathStat {
                uid,
                gid,
                mode,
                is_symlink: false,
            },
        );
    }

    pub fn seed_symlink(&self, path: &Path) {
        self.state.borrow_mut().entries.insert(
            path.to_path_buf(),
            PathStat {
                uid: 0,
                gid: 0,
                mode: 0o777,
                is_symlink: true,
            },
        );
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.borrow().clone()
    }

    pub fn mutations(&self) -> Vec<Call> {
        self.calls().into_iter().filter(|c| !c.dry_run).collect()
    }

    pub fn count(&self, op: &str) -> usize {
        self.calls.borrow().iter().filter(|c| c.op == op).count()
    }

    pub fn ops_on(&self, target: &Path) -> Vec<&'static str> {
        self.calls
            .borrow()
            .iter()
            .filter(|c| c.target == target)
            .map(|c| c.op)
            .collect()
    }

    pub fn clear_calls(&self) {
        self.calls.borrow_mut().clear();
    }

    pub fn state(&self) -> State {
        self.state.borrow().clone()
    }

    pub fn stat(&self, path: &Path) -> Option<PathStat> {
        self.state.borrow().entries.get(path).copied()
    }

    fn record(
        &self,
        op: &'static str,
        target: &Path,
        detail: String,
        dry_run: bool,
    ) -> Result<bool, BackendError> {
        self.calls.borrow_mut().push(Call {
            op,
            target: target.to_path_buf(),
            detail: detail.clone(),
            dry_run,
        });
        let failing = self
            .failures
            .borrow()
            .iter()
            .any(|(fop, ftarget)| *fop == op && ftarget == target);
        if failing {
            return Err(BackendError::Command {
                command: format!("{op} {}", target.display()),
                code: Some(1),
                stderr: format!("injected failure: {detail}"),
            });
        }
        Ok(!dry_run)
    }
}

impl StorageOps for RecordingBackend {
    fn kind(&self) -> BackendKind {
        self.kind
    }

    fn list_filesets(&self, _filesystem: &str) -> Result<Vec<FilesetInfo>, BackendError> {
        Ok(self
            .state
            .borrow()
            .filesets
            .iter()
            .map(|name| FilesetInfo {
                name: name.clone(),
                path: None,
            })
            .collect())
    }

    fn get_fileset_info(&self, spec: &FilesetSpec) -> Result<Option<FilesetInfo>, BackendError> {
        let present = self.state.borrow().filesets.contains(&spec.name);
        Ok(present.then(|| FilesetInfo {
            name: spec.name.clone(),
            path: Some(spec.path.clone()),
        }))
    }

    fn stat_path(&self, path: &Path) -> Result<Option<PathStat>, BackendError> {
        Ok(self.stat(path))
    }

    fn make_dir(&self, path: &Path, dry_run: bool) -> Result<(), BackendError> {
        if self.record("make_dir", path, String::new(), dry_run)? {
            self.state
                .borrow_mut()
                .entries
                .entry(path.to_path_buf())
                .or_insert(PathStat {
                    uid: 0,
                    gid: 0,
                    mode: 0o755,
                    is_symlink: false,
                });
        }
        Ok(())
    }

    fn make_fileset(&self, spec: &FilesetSpec, dry_run: bool) -> Result<(), BackendError> {
        let detail = format!("{} parent={:?}", spec.name, spec.parent);
        if self.record("make_fileset", &spec.path, detail, dry_run)? {
            let mut state = self.state.borrow_mut();
            state.filesets.insert(spec.name.clone());
            state.entries.entry(spec.path.clone()).or_insert(PathStat {
                uid: 0,
                gid: 0,
                mode: 0o755,
                is_symlink: false,
            });
        }
        Ok(())
    }

    fn chmod(&self, mode: u32, path: &Path, dry_run: bool) -> Result<(), BackendError> {
        if self.record("chmod", path, format!("{mode:o}"), dry_run)? {
            if let Some(stat) = self.state.borrow_mut().entries.get_mut(path) {
                stat.mode = mode;
            }
        }
        Ok(())
    }

    fn chown(&self, uid: u32, gid: u32, path: &Path, dry_run: bool) -> Result<(), BackendError> {
        if self.record("chown", path, format!("{uid}:{gid}"), dry_run)? {
            if let Some(stat) = self.state.borrow_mut().entries.get_mut(path) {
                stat.uid = uid;
                stat.gid = gid;
            }
        }
        Ok(())
    }

    fn set_fileset_quota(
        &self,
        quota: AppliedQuota,
        path: &Path,
        fileset: &str,
        dry_run: bool,
    ) -> Result<(), BackendError> {
        let detail = format!("{fileset} soft={} hard={}", quota.soft, quota.hard);
        if self.record("set_fileset_quota", path, detail, dry_run)? {
            self.state
                .borrow_mut()
                .fileset_quota
                .insert(path.to_path_buf(), quota);
        }
        Ok(())
    }

    fn set_fileset_grace(
        &self,
        path: &Path,
        grace_secs: u64,
        dry_run: bool,
    ) -> Result<(), BackendError> {
        if self.record("set_fileset_grace", path, grace_secs.to_string(), dry_run)? {
            self.state
                .borrow_mut()
                .grace
                .insert(path.to_path_buf(), grace_secs);
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
        if self.record("set_user_quota", path, detail, dry_run)? {
            self.state
                .borrow_mut()
                .user_quota
                .insert((path.to_path_buf(), uid), quota);
        }
        Ok(())
    }

    fn set_user_grace(
        &self,
        path: &Path,
        grace_secs: u64,
        dry_run: bool,
    ) -> Result<(), BackendError> {
        if self.record("set_user_grace", path, grace_secs.to_string(), dry_run)? {
            self.state
                .borrow_mut()
                .grace
                .insert(path.to_path_buf(), grace_secs);
        }
        Ok(())
    }

    fn write_file(&self, path: &Path, contents: &str, dry_run: bool) -> Result<(), BackendError> {
        let detail = format!("{} bytes", contents.len());
        if self.record("write_file", path, detail, dry_run)? {
            let mut state = self.state.borrow_mut();
            state.files.insert(path.to_path_buf(), contents.to_string());
            state.entries.entry(path.to_path_buf()).or_insert(PathStat {
                uid: 0,
                gid: 0,
                mode: 0o600,
                is_symlink: false,
            });
        }
        Ok(())
    }
}
