//! In-memory account page for driver tests.

use super::{AccountPage, AccountPageError, ApiResult};
use crate::vsc::model::{
    Account, Group, InstituteRef, Person, Project, Pubkey, QuotaRecord, Status, StorageRef, Vo,
};
use std::cell::RefCell;
use std::collections::{BTreeMap, BTreeSet};

#[derive(Debug, Default)]
pub struct FakeAccountPage {
    pub accounts: BTreeMap<String, Account>,
    pub usergroups: BTreeMap<String, Group>,
    pub account_quota: BTreeMap<String, Vec<QuotaRecord>>,
    pub pubkeys: BTreeMap<String, Vec<Pubkey>>,
    pub vos: BTreeMap<String, Vo>,
    pub vo_quota: BTreeMap<String, Vec<QuotaRecord>>,
    pub modified_members: BTreeMap<String, Vec<String>>,
    pub autogroups: BTreeMap<String, Group>,
    pub projects: BTreeMap<String, Project>,
    pub project_quota: BTreeMap<String, Vec<QuotaRecord>>,
    pub user_quota_changes: Vec<QuotaRecord>,
    /// Status the service answers with after a patch; `active` when unset.
    pub patch_result: Option<Status>,
    pub unreachable: bool,
    pub patched: RefCell<Vec<(String, Status)>>,
    /// Ids answered with 404; `<id>/pubkey` fails only the key listing.
    pub missing: BTreeSet<String>,
}

pub fn account(vsc_id: &str, uid: u32, status: Status) -> Account {
    Account {
        vsc_id: vsc_id.to_string(),
        vsc_id_number: uid,
        status,
        isactive: true,
        person: Person {
            gecos: None,
            institute: InstituteRef {
                name: "gent".to_string(),
            },
            institute_login: None,
        },
    }
}

pub fn group(vsc_id: &str, gid: u32) -> Group {
    Group {
        vsc_id: vsc_id.to_string(),
        vsc_id_number: gid,
        members: Vec::new(),
        moderators: Vec::new(),
    }
}

pub fn vo(vo_id: &str, gid: u32, status: Status, members: &[&str], moderators: &[&str]) -> Vo {
    Vo {
        vsc_id: vo_id.to_string(),
        vsc_id_number: gid,
        status,
        institute: InstituteRef {
            name: "gent".to_string(),
        },
        fairshare: 100,
        members: members.iter().map(|m| m.to_string()).collect(),
        moderators: moderators.iter().map(|m| m.to_string()).collect(),
    }
}

pub fn project(project_id: &str, gid: u32, submitter: Option<&str>, moderators: &[&str]) -> Project {
    Project {
        vsc_id: project_id.to_string(),
        status: Status::Active,
        institute: InstituteRef {
            name: "gent".to_string(),
        },
        group: group(project_id, gid),
        submitter: submitter.map(str::to_string),
        moderators: moderators.iter().map(|m| m.to_string()).collect(),
    }
}

pub fn quota(storage: &str, storage_type: &str, fileset: &str, hard: u64, owner: &str) -> QuotaRecord {
    QuotaRecord {
        storage: StorageRef {
            name: storage.to_string(),
            storage_type: storage_type.to_string(),
            institute: "gent".to_string(),
        },
        fileset: fileset.to_string(),
        hard,
        owner: Some(owner.to_string()),
    }
}

impl FakeAccountPage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an account with a personal usergroup of the same number.
    pub fn add_account(&mut self, vsc_id: &str, uid: u32, status: Status) {
        self.accounts
            .insert(vsc_id.to_string(), account(vsc_id, uid, status));
        self.usergroups
            .insert(vsc_id.to_string(), group(vsc_id, uid));
    }

    pub fn add_account_quota(&mut self, vsc_id: &str, record: QuotaRecord) {
        self.account_quota
            .entry(vsc_id.to_string())
            .or_default()
            .push(record);
    }

    pub fn add_pubkey(&mut self, vsc_id: &str, pubkey: &str, deleted: bool) {
        self.pubkeys.entry(vsc_id.to_string()).or_default().push(Pubkey {
            pubkey: pubkey.to_string(),
            deleted,
        });
    }

    pub fn add_vo(&mut self, vo: Vo) {
        self.vos.insert(vo.vsc_id.clone(), vo);
    }

    pub fn add_vo_quota(&mut self, vo_id: &str, record: QuotaRecord) {
        self.vo_quota.entry(vo_id.to_string()).or_default().push(record);
    }

    pub fn add_project(&mut self, project: Project) {
        self.projects.insert(project.vsc_id.clone(), project);
    }

    pub fn add_project_quota(&mut self, project_id: &str, record: QuotaRecord) {
        self.project_quota
            .entry(project_id.to_string())
            .or_default()
            .push(record);
    }

    pub fn set_modified_members(&mut self, vo_id: &str, members: &[&str]) {
        self.modified_members.insert(
            vo_id.to_string(),
            members.iter().map(|m| m.to_string()).collect(),
        );
    }

    pub fn patched(&self) -> Vec<(String, Status)> {
        self.patched.borrow().clone()
    }

    fn check(&self, kind: &'static str, id: &str) -> ApiResult<()> {
        if self.unreachable {
            return Err(AccountPageError::Http {
                method: "GET",
                url: format!("fake://{kind}/{id}"),
                status: 503,
                body: "unavailable".to_string(),
            });
        }
        if self.missing.contains(id) {
            return Err(AccountPageError::NotFound {
                kind,
                id: id.to_string(),
            });
        }
        Ok(())
    }

    fn lookup<T: Clone>(map: &BTreeMap<String, T>, kind: &'static str, id: &str) -> ApiResult<T> {
        map.get(id).cloned().ok_or_else(|| AccountPageError::NotFound {
            kind,
            id: id.to_string(),
        })
    }
}

impl AccountPage for FakeAccountPage {
    fn account(&self, vsc_id: &str) -> ApiResult<Account> {
        self.check("account", vsc_id)?;
        Self::lookup(&self.accounts, "account", vsc_id)
    }

    fn account_usergroup(&self, vsc_id: &str) -> ApiResult<Group> {
        self.check("usergroup", vsc_id)?;
        Self::lookup(&self.usergroups, "usergroup", vsc_id)
    }

    fn account_quota(&self, vsc_id: &str) -> ApiResult<Vec<QuotaRecord>> {
        self.check("account", vsc_id)?;
        Ok(self.account_quota.get(vsc_id).cloned().unwrap_or_default())
    }

    fn account_pubkeys(&self, vsc_id: &str) -> ApiResult<Vec<Pubkey>> {
        self.check("pubkey", &format!("{vsc_id}/pubkey"))?;
        Ok(self.pubkeys.get(vsc_id).cloned().unwrap_or_default())
    }

    fn accounts(&self) -> ApiResult<Vec<Account>> {
        self.check("account", "")?;
        Ok(self.accounts.values().cloned().collect())
    }

    fn modified_accounts(&self, _since: &str) -> ApiResult<Vec<Account>> {
        self.accounts()
    }

    fn patch_account_status(&self, vsc_id: &str, status: Status) -> ApiResult<Account> {
        let mut account = self.account(vsc_id)?;
        self.patched.borrow_mut().push((vsc_id.to_string(), status));
        account.status = self.patch_result.unwrap_or(status);
        Ok(account)
    }

    fn vo(&self, vo_id: &str) -> ApiResult<Vo> {
        self.check("vo", vo_id)?;
        Self::lookup(&self.vos, "vo", vo_id)
    }

    fn vos(&self) -> ApiResult<Vec<Vo>> {
        self.check("vo", "")?;
        Ok(self.vos.values().cloned().collect())
    }

    fn modified_vos(&self, _since: &str) -> ApiResult<Vec<Vo>> {
        self.vos()
    }

    fn vo_quota(&self, vo_id: &str) -> ApiResult<Vec<QuotaRecord>> {
        self.check("vo", vo_id)?;
        Ok(self.vo_quota.get(vo_id).cloned().unwrap_or_default())
    }

    fn vo_modified_members(&self, vo_id: &str, _since: &str) -> ApiResult<Vec<Account>> {
        self.check("vo", vo_id)?;
        self.modified_members
            .get(vo_id)
            .map(Vec::as_slice)
            .unwrap_or_default()
            .iter()
            .map(|member| Self::lookup(&self.accounts, "account", member))
            .collect()
    }

    fn patch_vo_status(&self, vo_id: &str, status: Status) -> ApiResult<Vo> {
        let mut vo = self.vo(vo_id)?;
        self.patched.borrow_mut().push((vo_id.to_string(), status));
        vo.status = self.patch_result.unwrap_or(status);
        Ok(vo)
    }

    fn autogroup(&self, name: &str) -> ApiResult<Group> {
        self.check("autogroup", name)?;
        Self::lookup(&self.autogroups, "autogroup", name)
    }

    fn project(&self, project_id: &str) -> ApiResult<Project> {
        self.check("project", project_id)?;
        Self::lookup(&self.projects, "project", project_id)
    }

    fn projects(&self) -> ApiResult<Vec<Project>> {
        self.check("project", "")?;
        Ok(self.projects.values().cloned().collect())
    }

    fn modified_projects(&self, _since: &str) -> ApiResult<Vec<Project>> {
        self.projects()
    }

    fn project_quota(&self, project_id: &str) -> ApiResult<Vec<QuotaRecord>> {
        self.check("project", project_id)?;
        Ok(self.project_quota.get(project_id).cloned().unwrap_or_default())
    }

    fn modified_user_quota(&self, _since: &str) -> ApiResult<Vec<QuotaRecord>> {
        self.check("quota", "")?;
        Ok(self.user_quota_changes.clone())
    }

    fn modified_vo_quota(&self, _since: &str) -> ApiResult<Vec<QuotaRecord>> {
        self.check("quota", "")?;
        Ok(self.vo_quota.values().flatten().cloned().collect())
    }
}
