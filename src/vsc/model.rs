//! Records served by the account page, and the per-pass snapshots the
//! drivers build from them.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    New,
    Modified,
    Modify,
    Active,
    Inactive,
    Expired,
    Notify,
    Grace,
    Deleted,
    #[serde(other)]
    Unknown,
}

impl Status {
    /// Pending statuses are moved to `active` once provisioning succeeded.
    pub fn is_pending(self) -> bool {
        matches!(self, Self::New | Self::Modified | Self::Modify)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstituteRef {
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Person {
    #[serde(default)]
    pub gecos: Option<String>,
    pub institute: InstituteRef,
    #[serde(default)]
    pub institute_login: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    pub vsc_id: String,
    pub vsc_id_number: u32,
    pub status: Status,
    #[serde(default = "default_true")]
    pub isactive: bool,
    pub person: Person,
}

impl Account {
    pub fn institute(&self) -> &str {
        &self.person.institute.name
    }
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pubkey {
    pub pubkey: String,
    #[serde(default)]
    pub deleted: bool,
}

/// User groups and autogroups share this shape.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Group {
    pub vsc_id: String,
    pub vsc_id_number: u32,
    #[serde(default)]
    pub members: Vec<String>,
    #[serde(default)]
    pub moderators: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Vo {
    pub vsc_id: String,
    pub vsc_id_number: u32,
    pub status: Status,
    pub institute: InstituteRef,
    #[serde(default)]
    pub fairshare: u32,
    #[serde(default)]
    pub members: Vec<String>,
    #[serde(default)]
    pub moderators: Vec<String>,
}

/// A compute project. Its members live in `group`, an autogroup named after
/// the project.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Project {
    pub vsc_id: String,
    pub status: Status,
    pub institute: InstituteRef,
    pub group: Group,
    #[serde(default)]
    pub submitter: Option<String>,
    #[serde(default)]
    pub moderators: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageRef {
    pub name: String,
    pub storage_type: String,
    pub institute: String,
}

/// Declared quota as stored upstream, in KiB and never replicated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuotaRecord {
    pub storage: StorageRef,
    pub fileset: String,
    pub hard: u64,
    #[serde(default, alias = "user", alias = "virtual_organisation")]
    pub owner: Option<String>,
}

impl QuotaRecord {
    pub fn on_storage(&self, storage_name: &str) -> bool {
        self.storage.name == storage_name
    }
}

/// An account with everything a pass needs about it, fetched once.
#[derive(Debug, Clone)]
pub struct ResolvedAccount {
    pub account: Account,
    pub usergroup: Group,
    /// Quota records on storage of the host institute only.
    pub quota: Vec<QuotaRecord>,
}

impl ResolvedAccount {
    pub fn vsc_id(&self) -> &str {
        &self.account.vsc_id
    }

    pub fn uid(&self) -> u32 {
        self.account.vsc_id_number
    }

    pub fn gid(&self) -> u32 {
        self.usergroup.vsc_id_number
    }
}

/// A VO together with its quota, resolved owner and sharing group.
#[derive(Debug, Clone)]
pub struct ResolvedVo {
    pub vo: Vo,
    /// Quota records on storage of the host institute only.
    pub quota: Vec<QuotaRecord>,
    pub owner_uid: u32,
    pub sharing_group: Option<Group>,
    pub is_default: bool,
}

impl ResolvedVo {
    pub fn vsc_id(&self) -> &str {
        &self.vo.vsc_id
    }

    pub fn gid(&self) -> u32 {
        self.vo.vsc_id_number
    }

    pub fn quota_on(&self, storage_name: &str) -> Vec<&QuotaRecord> {
        self.quota
            .iter()
            .filter(|q| q.on_storage(storage_name))
            .collect()
    }

    pub fn members_sorted(&self) -> Vec<String> {
        let mut members = self.vo.members.clone();
        members.sort();
        members.dedup();
        members
    }
}
