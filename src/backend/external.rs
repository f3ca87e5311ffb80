use super::{BackendError, FilesetInfo, FilesetSpec, PathStat, StorageOps, dry_run_skip};
use crate::vsc::config::BackendKind;
use crate::vsc::policy::AppliedQuota;
use crate::vsc::util::{render_command, run_command_with_optional_timeout};
use serde::de::DeserializeOwned;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};

/// Cluster filesystem or enterprise storage array, driven through a site
/// helper executable: `<helper> <op> --flag value ...`. Exit status 0 means
/// success; queries print JSON on stdout, `null` or nothing when absent.
#[derive(Debug, Clone)]
pub struct ExternalBackend {
    kind: BackendKind,
    helper: PathBuf,
    timeout_secs: Option<u64>,
}

fn path_arg(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

impl ExternalBackend {
    pub fn new(kind: BackendKind, helper: PathBuf, timeout_secs: Option<u64>) -> Self {
        Self {
            kind,
            helper,
            timeout_secs,
        }
    }

    fn run(
        &self,
        op: &str,
        args: &[(&str, String)],
        stdin: Option<&str>,
    ) -> Result<Output, BackendError> {
        let mut cmd = Command::new(&self.helper);
        cmd.arg(op);
        for (flag, value) in args {
            cmd.arg(format!("--{flag}")).arg(value);
        }
        let rendered = render_command(&cmd);
        tracing::debug!(backend = self.kind.as_str(), command = %rendered, "running helper");

        let out = run_command_with_optional_timeout(&mut cmd, stdin, self.timeout_secs).map_err(
            |err| BackendError::Spawn {
                command: rendered.clone(),
                message: format!("{err:#}"),
            },
        )?;
        if !out.status.success() {
            return Err(BackendError::Command {
                command: rendered,
                code: out.status.code(),
                stderr: String::from_utf8_lossy(&out.stderr).trim().to_string(),
            });
        }
        Ok(out)
    }

    fn query<T: DeserializeOwned>(
        &self,
        op: &'static str,
        args: &[(&str, String)],
    ) -> Result<Option<T>, BackendError> {
        let out = self.run(op, args, None)?;
        let stdout = String::from_utf8_lossy(&out.stdout);
        let trimmed = stdout.trim();
        if trimmed.is_empty() || trimmed == "null" {
            return Ok(None);
        }
        serde_json::from_str(trimmed)
            .map(Some)
            .map_err(|err| BackendError::Decode {
                op,
                message: err.to_string(),
            })
    }

    fn mutate(
        &self,
        op: &'static str,
        target: &Path,
        args: &[(&str, String)],
        dry_run: bool,
    ) -> Result<(), BackendError> {
        let detail = args
            .iter()
            .map(|(flag, value)| format!("{flag}={value}"))
            .collect::<Vec<_>>()
            .join(" ");
        if dry_run_skip(dry_run, self.kind, op, target, detail) {
            return Ok(());
        }
        self.run(op, args, None).map(|_| ())
    }
}

impl StorageOps for ExternalBackend {
    fn kind(&self) -> BackendKind {
        self.kind
    }

    fn list_filesets(&self, filesystem: &str) -> Result<Vec<FilesetInfo>, BackendError> {
        Ok(self
            .query("list-filesets", &[("filesystem", filesystem.to_string())])?
            .unwrap_or_default())
    }

    fn get_fileset_info(&self, spec: &FilesetSpec) -> Result<Option<FilesetInfo>, BackendError> {
        self.query(
            "fileset-info",
            &[
                ("filesystem", spec.filesystem.clone()),
                ("fileset", spec.name.clone()),
            ],
        )
    }

    fn stat_path(&self, path: &Path) -> Result<Option<PathStat>, BackendError> {
        self.query("stat", &[("path", path_arg(path))])
    }

    fn make_dir(&self, path: &Path, dry_run: bool) -> Result<(), BackendError> {
        self.mutate("make-dir", path, &[("path", path_arg(path))], dry_run)
    }

    fn make_fileset(&self, spec: &FilesetSpec, dry_run: bool) -> Result<(), BackendError> {
        let mut args = vec![
            ("filesystem", spec.filesystem.clone()),
            ("fileset", spec.name.clone()),
            ("path", path_arg(&spec.path)),
        ];
        if let Some(parent) = &spec.parent {
            args.push(("parent", parent.clone()));
        }
        self.mutate("make-fileset", &spec.path, &args, dry_run)
    }

    fn chmod(&self, mode: u32, path: &Path, dry_run: bool) -> Result<(), BackendError> {
        self.mutate(
            "chmod",
            path,
            &[("mode", format!("{mode:o}")), ("path", path_arg(path))],
            dry_run,
        )
    }

    fn chown(&self, uid: u32, gid: u32, path: &Path, dry_run: bool) -> Result<(), BackendError> {
        self.mutate(
            "chown",
            path,
            &[
                ("uid", uid.to_string()),
                ("gid", gid.to_string()),
                ("path", path_arg(path)),
            ],
            dry_run,
        )
    }

    fn set_fileset_quota(
        &self,
        quota: AppliedQuota,
        path: &Path,
        fileset: &str,
        dry_run: bool,
    ) -> Result<(), BackendError> {
        self.mutate(
            "set-fileset-quota",
            path,
            &[
                ("path", path_arg(path)),
                ("fileset", fileset.to_string()),
                ("soft", quota.soft.to_string()),
                ("hard", quota.hard.to_string()),
            ],
            dry_run,
        )
    }

    fn set_fileset_grace(
        &self,
        path: &Path,
        grace_secs: u64,
        dry_run: bool,
    ) -> Result<(), BackendError> {
        self.mutate(
            "set-fileset-grace",
            path,
            &[("path", path_arg(path)), ("grace-secs", grace_secs.to_string())],
            dry_run,
        )
    }

    fn set_user_quota(
        &self,
        quota: AppliedQuota,
        uid: u32,
        path: &Path,
        dry_run: bool,
    ) -> Result<(), BackendError> {
        self.mutate(
            "set-user-quota",
            path,
            &[
                ("path", path_arg(path)),
                ("uid", uid.to_string()),
                ("soft", quota.soft.to_string()),
                ("hard", quota.hard.to_string()),
            ],
            dry_run,
        )
    }

    fn set_user_grace(
        &self,
        path: &Path,
        grace_secs: u64,
        dry_run: bool,
    ) -> Result<(), BackendError> {
        self.mutate(
            "set-user-grace",
            path,
            &[("path", path_arg(path)), ("grace-secs", grace_secs.to_string())],
            dry_run,
        )
    }

    /// The helper receives the contents on stdin.
    fn write_file(&self, path: &Path, contents: &str, dry_run: bool) -> Result<(), BackendError> {
        let detail = format!("path={} bytes={}", path.display(), contents.len());
        if dry_run_skip(dry_run, self.kind, "write-file", path, detail) {
            return Ok(());
        }
        self.run("write-file", &[("path", path_arg(path))], Some(contents))
            .map(|_| ())
    }
}
