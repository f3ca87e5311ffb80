//! Pipe-delimited dumps produced by `sacctmgr -P` and `sacct --parsable2`.

use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DumpParseError {
    #[error("line {line}: header has {expected} columns but the line has {found}")]
    FieldCount {
        line: usize,
        expected: usize,
        found: usize,
    },
    #[error("unknown dump kind `{0}` (expected accounts, users, qos or jobs)")]
    UnknownKind(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DumpKind {
    Accounts,
    Users,
    Qos,
    Jobs,
}

impl DumpKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Accounts => "accounts",
            Self::Users => "users",
            Self::Qos => "qos",
            Self::Jobs => "jobs",
        }
    }
}

impl fmt::Display for DumpKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DumpKind {
    type Err = DumpParseError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "accounts" | "account" => Ok(Self::Accounts),
            "users" | "user" => Ok(Self::Users),
            "qos" => Ok(Self::Qos),
            "jobs" | "job" => Ok(Self::Jobs),
            _ => Err(DumpParseError::UnknownKind(raw.to_string())),
        }
    }
}

/// Columns of one dump line keyed by normalized header name.
pub type Fields = BTreeMap<String, String>;

/// A typed dump line. `from_fields` answers `None` for lines that belong to
/// another record kind or are ignored on purpose.
pub trait DumpRecord: Sized + Ord {
    const KIND: DumpKind;

    fn from_fields(fields: Fields) -> Option<Self>;
}

fn take(fields: &mut Fields, key: &str) -> String {
    fields.remove(key).unwrap_or_default()
}

const IGNORED_NAMES: &[&str] = &["root"];
const IGNORED_QOS: &[&str] = &["normal"];

/// Account line of `sacctmgr -s -P list accounts`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub struct SlurmAccount {
    pub account: String,
    pub descr: String,
    pub org: String,
    pub cluster: String,
    pub parent: String,
    pub user: String,
    pub share: String,
    pub qos: String,
    pub default_qos: String,
    pub other: Fields,
}

impl SlurmAccount {
    pub fn share_value(&self) -> Option<u32> {
        self.share.trim().parse().ok()
    }
}

impl DumpRecord for SlurmAccount {
    const KIND: DumpKind = DumpKind::Accounts;

    fn from_fields(mut fields: Fields) -> Option<Self> {
        // user associations are listed under their account; those are users
        if fields.get("User").is_some_and(|u| !u.is_empty()) {
            return None;
        }
        let account = take(&mut fields, "Account");
        if IGNORED_NAMES.contains(&account.as_str()) {
            return None;
        }
        Some(Self {
            account,
            descr: take(&mut fields, "Descr"),
            org: take(&mut fields, "Org"),
            cluster: take(&mut fields, "Cluster"),
            parent: take(&mut fields, "Par_Name"),
            user: take(&mut fields, "User"),
            share: take(&mut fields, "Share"),
            qos: take(&mut fields, "QOS"),
            default_qos: take(&mut fields, "Def_QOS"),
            other: fields,
        })
    }
}

/// User association line of `sacctmgr -s -P list users`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub struct SlurmUser {
    pub user: String,
    pub default_account: String,
    pub admin: String,
    pub cluster: String,
    pub account: String,
    pub partition: String,
    pub share: String,
    pub qos: String,
    pub default_qos: String,
    pub other: Fields,
}

impl DumpRecord for SlurmUser {
    const KIND: DumpKind = DumpKind::Users;

    fn from_fields(mut fields: Fields) -> Option<Self> {
        let user = take(&mut fields, "User");
        if IGNORED_NAMES.contains(&user.as_str()) {
            return None;
        }
        Some(Self {
            user,
            default_account: take(&mut fields, "Def_Acct"),
            admin: take(&mut fields, "Admin"),
            cluster: take(&mut fields, "Cluster"),
            account: take(&mut fields, "Account"),
            partition: take(&mut fields, "Partition"),
            share: take(&mut fields, "Share"),
            qos: take(&mut fields, "QOS"),
            default_qos: take(&mut fields, "Def_QOS"),
            other: fields,
        })
    }
}

/// Line of `sacctmgr -s -P list qos`. The site-wide `normal` QOS is never
/// managed and parses to nothing.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub struct SlurmQos {
    pub name: String,
    pub priority: String,
    pub flags: String,
    pub grp_tres: String,
    pub grp_tres_mins: String,
    pub max_wall: String,
    pub other: Fields,
}

impl SlurmQos {
    pub fn has_flag(&self, flag: &str) -> bool {
        self.flags.split(',').any(|f| f.trim().eq_ignore_ascii_case(flag))
    }
}

impl DumpRecord for SlurmQos {
    const KIND: DumpKind = DumpKind::Qos;

    fn from_fields(mut fields: Fields) -> Option<Self> {
        let name = take(&mut fields, "Name");
        if IGNORED_QOS.contains(&name.as_str()) {
            return None;
        }
        Some(Self {
            name,
            priority: take(&mut fields, "Priority"),
            flags: take(&mut fields, "Flags"),
            grp_tres: take(&mut fields, "GrpTRES"),
            grp_tres_mins: take(&mut fields, "GrpTRESMins"),
            max_wall: take(&mut fields, "MaxWall"),
            other: fields,
        })
    }
}

/// Job line of `sacct --parsable2`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub struct SlurmJob {
    pub job_id: String,
    pub job_name: String,
    pub partition: String,
    pub account: String,
    pub alloc_cpus: String,
    pub state: String,
    pub exit_code: String,
    pub other: Fields,
}

impl DumpRecord for SlurmJob {
    const KIND: DumpKind = DumpKind::Jobs;

    fn from_fields(mut fields: Fields) -> Option<Self> {
        Some(Self {
            job_id: take(&mut fields, "JobID"),
            job_name: take(&mut fields, "JobName"),
            partition: take(&mut fields, "Partition"),
            account: take(&mut fields, "Account"),
            alloc_cpus: take(&mut fields, "AllocCPUS"),
            state: take(&mut fields, "State"),
            exit_code: take(&mut fields, "ExitCode"),
            other: fields,
        })
    }
}

/// `Par Name` -> `Par_Name`, `%CPU` -> `PCT_CPU`.
pub fn normalize_header(line: &str) -> Vec<String> {
    line.trim_end()
        .split('|')
        .map(|column| column.replace(' ', "_").replace('%', "PCT_"))
        .collect()
}

/// Parses a whole dump. Any malformed line fails the dump; nothing partial is
/// returned.
pub fn parse_dump<R: DumpRecord, S: AsRef<str>>(lines: &[S]) -> Result<BTreeSet<R>, DumpParseError> {
    let kind = R::KIND;
    let mut records = BTreeSet::new();
    let Some((header, body)) = lines.split_first() else {
        return Ok(records);
    };
    let header = normalize_header(header.as_ref());

    for (idx, raw) in body.iter().enumerate() {
        let line = raw.as_ref().trim_end();
        if line.is_empty() {
            continue;
        }
        let values: Vec<&str> = line.split('|').collect();
        if values.len() != header.len() {
            tracing::error!(%kind, line, "cannot parse dump line");
            return Err(DumpParseError::FieldCount {
                line: idx + 2,
                expected: header.len(),
                found: values.len(),
            });
        }
        let fields: Fields = header
            .iter()
            .cloned()
            .zip(values.into_iter().map(str::to_string))
            .collect();
        if let Some(record) = R::from_fields(fields) {
            records.insert(record);
        }
    }
    tracing::debug!(%kind, count = records.len(), "parsed dump");
    Ok(records)
}
