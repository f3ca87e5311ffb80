//! `sacctmgr` listing and the command lines that change its state.

use super::dump::{DumpRecord, parse_dump};
use super::resolve_tool;
use crate::error::SyncError;
use crate::vsc::config::SlurmConfig;
use crate::vsc::util::{render_command, run_command_with_optional_timeout};
use anyhow::{Context, Result};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::{Path, PathBuf};
use std::process::Command;

/// Arguments of one `sacctmgr` invocation, binary excluded.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct SacctMgrCommand(Vec<String>);

impl SacctMgrCommand {
    fn new<I, S>(parts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(parts.into_iter().map(Into::into).collect())
    }

    pub fn args(&self) -> &[String] {
        &self.0
    }
}

impl fmt::Display for SacctMgrCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sacctmgr {}", self.0.join(" "))
    }
}

/// `-i` commits immediately.
pub fn add_account(
    account: &str,
    parent: Option<&str>,
    organisation: &str,
    cluster: &str,
    fairshare: Option<u32>,
    qos: Option<&str>,
) -> SacctMgrCommand {
    tracing::debug!(account, parent, organisation, cluster, qos, "add account");
    let mut parts = vec![
        "-i".to_string(),
        "add".to_string(),
        "account".to_string(),
        account.to_string(),
        format!("Parent={}", parent.unwrap_or("root")),
        format!("Organization={organisation}"),
        format!("Cluster={cluster}"),
    ];
    if let Some(fairshare) = fairshare {
        parts.push(format!("Fairshare={fairshare}"));
    }
    if let Some(qos) = qos {
        parts.push(format!("Qos={qos}"));
    }
    SacctMgrCommand(parts)
}

pub fn change_account_fairshare(account: &str, cluster: &str, fairshare: u32) -> SacctMgrCommand {
    tracing::debug!(account, cluster, fairshare, "change account fairshare");
    SacctMgrCommand::new([
        "-i".to_string(),
        "modify".to_string(),
        "account".to_string(),
        format!("name={account}"),
        format!("cluster={cluster}"),
        "set".to_string(),
        format!("fairshare={fairshare}"),
    ])
}

pub fn add_user(user: &str, account: &str, cluster: &str) -> SacctMgrCommand {
    tracing::debug!(user, account, cluster, "add user");
    SacctMgrCommand::new([
        "-i".to_string(),
        "add".to_string(),
        "user".to_string(),
        user.to_string(),
        format!("Account={account}"),
        format!("DefaultAccount={account}"),
        format!("Cluster={cluster}"),
    ])
}

/// Moving a user is adding the new association, then dropping the old one.
pub fn change_user(user: &str, current: &str, new: &str, cluster: &str) -> [SacctMgrCommand; 2] {
    tracing::debug!(user, current, new, cluster, "move user");
    [
        add_user(user, new, cluster),
        SacctMgrCommand::new([
            "-i".to_string(),
            "delete".to_string(),
            "user".to_string(),
            format!("name={user}"),
            format!("Account={current}"),
            "where".to_string(),
            format!("Cluster={cluster}"),
        ]),
    ]
}

pub fn remove_user(user: &str, cluster: &str) -> SacctMgrCommand {
    tracing::debug!(user, cluster, "remove user");
    SacctMgrCommand::new([
        "-i".to_string(),
        "delete".to_string(),
        "user".to_string(),
        format!("name={user}"),
        format!("Cluster={cluster}"),
    ])
}

/// Flags every managed QOS carries.
pub const QOS_FLAGS: &[&str] = &["NoDecay", "DenyOnLimit"];

pub fn add_qos(name: &str) -> SacctMgrCommand {
    tracing::debug!(qos = name, "add qos");
    SacctMgrCommand::new(["-i".to_string(), "add".to_string(), "qos".to_string(), format!("Name={name}")])
}

/// Sets the managed flags plus `settings` as `key=value` pairs.
pub fn modify_qos(name: &str, settings: &BTreeMap<String, String>) -> SacctMgrCommand {
    tracing::debug!(qos = name, settings = settings.len(), "modify qos");
    let mut parts = vec![
        "-i".to_string(),
        "modify".to_string(),
        "qos".to_string(),
        name.to_string(),
        "set".to_string(),
        format!("flags={}", QOS_FLAGS.join(",")),
    ];
    parts.extend(settings.iter().map(|(key, value)| format!("{key}={value}")));
    SacctMgrCommand(parts)
}

pub fn remove_qos(name: &str) -> SacctMgrCommand {
    tracing::debug!(qos = name, "remove qos");
    SacctMgrCommand::new([
        "-i".to_string(),
        "remove".to_string(),
        "qos".to_string(),
        "where".to_string(),
        format!("Name={name}"),
    ])
}

#[derive(Debug, Clone)]
pub struct SacctMgr {
    bin: PathBuf,
    timeout_secs: u64,
}

impl SacctMgr {
    pub fn new(bin: impl Into<PathBuf>, timeout_secs: u64) -> Self {
        Self {
            bin: bin.into(),
            timeout_secs,
        }
    }

    pub fn from_config(cfg: &SlurmConfig) -> Result<Self> {
        let bin = resolve_tool(cfg.sacctmgr_bin.as_deref(), "sacctmgr")?;
        Ok(Self::new(bin, cfg.command_timeout_secs))
    }

    pub fn bin(&self) -> &Path {
        &self.bin
    }

    pub fn timeout_secs(&self) -> u64 {
        self.timeout_secs
    }

    pub fn command(&self, command: &SacctMgrCommand) -> Command {
        let mut cmd = Command::new(&self.bin);
        cmd.args(command.args());
        cmd
    }

    /// Current accounting state of one record kind.
    pub fn list<R: DumpRecord>(&self) -> Result<BTreeSet<R>> {
        let mut cmd = Command::new(&self.bin);
        cmd.args(["-s", "-P", "list", R::KIND.as_str()]);
        let rendered = render_command(&cmd);
        tracing::debug!(command = %rendered, "listing accounting state");
        let output = run_command_with_optional_timeout(&mut cmd, None, Some(self.timeout_secs))
            .with_context(|| format!("failed to run {rendered}"))?;
        if !output.status.success() {
            return Err(SyncError::CommandFailed {
                command: rendered,
                code: output.status.code(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            }
            .into());
        }
        let stdout = String::from_utf8_lossy(&output.stdout);
        let lines: Vec<&str> = stdout.lines().collect();
        let records = parse_dump::<R, _>(&lines)
            .with_context(|| format!("failed to parse output of {rendered}"))?;
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::{
        SacctMgr, add_account, add_qos, add_user, change_account_fairshare, change_user, modify_qos,
        remove_qos, remove_user,
    };
    use crate::error::{SyncError, SyncErrorCode};
    use crate::slurm::dump::{SlurmAccount, SlurmQos, SlurmUser};
    use std::collections::BTreeMap;
    use std::fs;
    use std::os::unix::fs::PermissionsExt;
    use std::path::Path;

    fn write_script(dir: &Path, body: &str) -> std::path::PathBuf {
        let path = dir.join("sacctmgr");
        fs::write(&path, format!("#!/usr/bin/env bash\n{body}\n")).expect("write script");
        fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).expect("chmod");
        path
    }

    #[test]
    fn command_lines_match_sacctmgr_syntax() {
        assert_eq!(
            add_account("gvo00001", Some("gent"), "ugent", "mycluster", Some(10), None).to_string(),
            "sacctmgr -i add account gvo00001 Parent=gent Organization=ugent Cluster=mycluster Fairshare=10"
        );
        assert_eq!(
            add_account("gent", None, "ugent", "mycluster", None, None).to_string(),
            "sacctmgr -i add account gent Parent=root Organization=ugent Cluster=mycluster"
        );
        assert_eq!(
            add_account("gpr_compute00012", None, "ugent", "banette", None, Some("banette-gpr_compute00012"))
                .to_string(),
            "sacctmgr -i add account gpr_compute00012 Parent=root Organization=ugent Cluster=banette Qos=banette-gpr_compute00012"
        );
        assert_eq!(
            change_account_fairshare("gvo00001", "mycluster", 20).to_string(),
            "sacctmgr -i modify account name=gvo00001 cluster=mycluster set fairshare=20"
        );
        assert_eq!(
            add_user("vsc40001", "gvo00001", "banette").to_string(),
            "sacctmgr -i add user vsc40001 Account=gvo00001 DefaultAccount=gvo00001 Cluster=banette"
        );
        let [add, delete] = change_user("vsc40001", "gvo00001", "gvo00002", "banette");
        assert_eq!(add, add_user("vsc40001", "gvo00002", "banette"));
        assert_eq!(
            delete.to_string(),
            "sacctmgr -i delete user name=vsc40001 Account=gvo00001 where Cluster=banette"
        );
        assert_eq!(
            remove_user("vsc40001", "banette").to_string(),
            "sacctmgr -i delete user name=vsc40001 Cluster=banette"
        );
    }

    #[test]
    fn qos_command_lines() {
        assert_eq!(
            add_qos("banette-gpr_compute00012").to_string(),
            "sacctmgr -i add qos Name=banette-gpr_compute00012"
        );
        let settings = BTreeMap::from([
            ("GrpTRESMins".to_string(), "cpu=1000000".to_string()),
            ("Priority".to_string(), "10".to_string()),
        ]);
        assert_eq!(
            modify_qos("banette-gpr_compute00012", &settings).to_string(),
            "sacctmgr -i modify qos banette-gpr_compute00012 set flags=NoDecay,DenyOnLimit GrpTRESMins=cpu=1000000 Priority=10"
        );
        assert_eq!(
            modify_qos("banette-gpr_compute00012", &BTreeMap::new()).to_string(),
            "sacctmgr -i modify qos banette-gpr_compute00012 set flags=NoDecay,DenyOnLimit"
        );
        assert_eq!(
            remove_qos("banette-gpr_compute00001").to_string(),
            "sacctmgr -i remove qos where Name=banette-gpr_compute00001"
        );
    }

    #[test]
    fn qos_listing_uses_the_qos_selector() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let script = write_script(
            tmp.path(),
            r#"[ "$*" = "-s -P list qos" ] || exit 3
echo 'Name|Priority|Flags'
echo 'normal|0|'
echo 'banette-gpr_compute00012|0|NoDecay'"#,
        );
        let qos = SacctMgr::new(script, 5).list::<SlurmQos>().expect("qos");
        assert_eq!(qos.iter().map(|q| q.name.as_str()).collect::<Vec<_>>(), vec!["banette-gpr_compute00012"]);
    }

    #[test]
    fn list_parses_tool_output() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let script = write_script(
            tmp.path(),
            r#"[ "$*" = "-s -P list users" ] || exit 3
echo 'User|Def Acct|Admin|Cluster|Account'
echo 'root|root|Administrator|banette|root'
echo 'vsc40001|gvo00001|None|banette|gvo00001'"#,
        );
        let users = SacctMgr::new(script, 5).list::<SlurmUser>().expect("users");
        assert_eq!(users.len(), 1);
        assert_eq!(users.iter().next().map(|u| u.user.as_str()), Some("vsc40001"));
    }

    #[test]
    fn failing_listing_is_a_command_failure() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let script = write_script(tmp.path(), "echo 'connection refused' >&2\nexit 1");
        let err = SacctMgr::new(script, 5)
            .list::<SlurmAccount>()
            .expect_err("listing fails");
        assert_eq!(SyncErrorCode::of(&err), SyncErrorCode::E004CommandFailed);
        let Some(SyncError::CommandFailed { stderr, code, .. }) = err.downcast_ref::<SyncError>() else {
            panic!("unexpected error: {err:#}");
        };
        assert_eq!(stderr, "connection refused");
        assert_eq!(*code, Some(1));
    }

    #[test]
    fn malformed_listing_returns_no_records() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let script = write_script(tmp.path(), "echo 'Account|Cluster'\necho 'gent|banette|extra'");
        let err = SacctMgr::new(script, 5)
            .list::<SlurmAccount>()
            .expect_err("malformed dump");
        assert!(format!("{err:#}").contains("header has 2 columns"));
    }
}
