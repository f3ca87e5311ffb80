//! Desired accounting state versus what `sacctmgr` reports, as a list of
//! commands. Nothing here runs a command.

use super::dump::{SlurmAccount, SlurmQos, SlurmUser};
use super::sacctmgr::{self, SacctMgrCommand};
use crate::vsc::config::{InstituteConfig, SlurmConfig};
use crate::vsc::model::{Project, Status, Vo};
use anyhow::{Result, anyhow};
use std::collections::{BTreeMap, BTreeSet};

/// What the account page says should exist.
#[derive(Debug, Default)]
pub struct DesiredAccounting {
    pub vos: Vec<Vo>,
    pub projects: Vec<Project>,
    pub active_accounts: BTreeSet<String>,
}

/// What `sacctmgr` reports.
#[derive(Debug, Default)]
pub struct CurrentAccounting {
    pub accounts: BTreeSet<SlurmAccount>,
    pub users: BTreeSet<SlurmUser>,
    pub qos: BTreeSet<SlurmQos>,
}

pub struct AccountingSync<'a> {
    clusters: &'a [String],
    institute: &'a InstituteConfig,
    slurm: &'a SlurmConfig,
}

impl<'a> AccountingSync<'a> {
    pub fn new(clusters: &'a [String], institute: &'a InstituteConfig, slurm: &'a SlurmConfig) -> Self {
        Self {
            clusters,
            institute,
            slurm,
        }
    }

    fn organisation(&self, institute: &str) -> Result<&'a str> {
        self.slurm
            .organisations
            .get(institute)
            .map(String::as_str)
            .ok_or_else(|| anyhow!("no slurm organisation configured for institute `{institute}`"))
    }

    fn institute_fairshare(&self, institute: &str) -> Result<u32> {
        self.slurm
            .institute_fairshare
            .get(institute)
            .copied()
            .ok_or_else(|| anyhow!("no fairshare configured for institute `{institute}`"))
    }

    fn is_institute_vo(&self, vo_id: &str) -> bool {
        self.institute.institute_vos.values().any(|v| v == vo_id)
    }

    fn qos_name(cluster: &str, project_id: &str) -> String {
        format!("{cluster}-{project_id}")
    }

    fn active_projects<'p>(projects: &'p [Project]) -> Vec<&'p Project> {
        let mut active: Vec<&Project> = projects.iter().filter(|p| p.status == Status::Active).collect();
        active.sort_by(|a, b| a.vsc_id.cmp(&b.vsc_id));
        active.dedup_by(|a, b| a.vsc_id == b.vsc_id);
        active
    }

    /// Every institute and its default VO must exist on every cluster.
    pub fn institute_accounts(
        &self,
        accounts: &BTreeSet<SlurmAccount>,
        vos: &BTreeMap<String, Vo>,
    ) -> Result<Vec<SacctMgrCommand>> {
        let mut commands = Vec::new();
        for cluster in self.clusters {
            let present: BTreeSet<&str> = accounts
                .iter()
                .filter(|a| &a.cluster == cluster)
                .map(|a| a.account.as_str())
                .collect();

            for (institute, vo_id) in &self.institute.institute_vos {
                let organisation = self.organisation(institute)?;
                if !present.contains(institute.as_str()) {
                    commands.push(sacctmgr::add_account(
                        institute,
                        None,
                        organisation,
                        cluster,
                        Some(self.institute_fairshare(institute)?),
                        None,
                    ));
                }
                if !present.contains(vo_id.as_str()) {
                    let vo = vos
                        .get(vo_id)
                        .ok_or_else(|| anyhow!("institute VO {vo_id} is unknown to the account page"))?;
                    commands.push(sacctmgr::add_account(
                        vo_id,
                        Some(institute.as_str()),
                        organisation,
                        cluster,
                        Some(vo.fairshare),
                        None,
                    ));
                }
            }
        }
        Ok(commands)
    }

    /// Creates missing VO accounts and realigns changed fairshares. The
    /// institute default VOs are handled by `institute_accounts`.
    pub fn vo_accounts(&self, vos: &[Vo], accounts: &BTreeSet<SlurmAccount>) -> Result<Vec<SacctMgrCommand>> {
        let mut sorted: Vec<&Vo> = vos.iter().filter(|vo| !self.is_institute_vo(&vo.vsc_id)).collect();
        sorted.sort_by(|a, b| a.vsc_id.cmp(&b.vsc_id));

        let mut commands = Vec::new();
        for cluster in self.clusters {
            let shares: BTreeMap<&str, Option<u32>> = accounts
                .iter()
                .filter(|a| &a.cluster == cluster)
                .map(|a| (a.account.as_str(), a.share_value()))
                .collect();

            for vo in &sorted {
                match shares.get(vo.vsc_id.as_str()) {
                    None => {
                        let institute = vo.institute.name.as_str();
                        commands.push(sacctmgr::add_account(
                            &vo.vsc_id,
                            Some(institute),
                            self.organisation(institute)?,
                            cluster,
                            Some(vo.fairshare),
                            None,
                        ));
                    }
                    Some(share) if *share != Some(vo.fairshare) => {
                        commands.push(sacctmgr::change_account_fairshare(&vo.vsc_id, cluster, vo.fairshare));
                    }
                    Some(_) => {}
                }
            }
        }
        Ok(commands)
    }

    /// Adds active VO members missing from a cluster, removes users that are
    /// no longer an active member of any VO and moves users whose default
    /// account is no longer their VO.
    pub fn user_accounts(
        &self,
        vos: &[Vo],
        active_accounts: &BTreeSet<String>,
        users: &BTreeSet<SlurmUser>,
    ) -> Vec<SacctMgrCommand> {
        let mut members_by_vo: BTreeMap<&str, BTreeSet<&str>> = BTreeMap::new();
        let mut current_vo: BTreeMap<&str, &str> = BTreeMap::new();
        for vo in vos {
            let members = members_by_vo.entry(vo.vsc_id.as_str()).or_default();
            for member in &vo.members {
                members.insert(member.as_str());
                current_vo.insert(member.as_str(), vo.vsc_id.as_str());
            }
        }
        let is_active = |user: &str| active_accounts.contains(user);
        let active_members: BTreeSet<&str> = members_by_vo
            .values()
            .flatten()
            .copied()
            .filter(|m| is_active(m))
            .collect();

        let mut commands = Vec::new();
        for cluster in self.clusters {
            let on_cluster: Vec<&SlurmUser> = users.iter().filter(|u| &u.cluster == cluster).collect();
            let cluster_users: BTreeSet<&str> = on_cluster.iter().map(|u| u.user.as_str()).collect();

            let mut new_users: BTreeSet<(&str, &str)> = BTreeSet::new();
            let mut moved_users: BTreeSet<(&str, &str, &str)> = BTreeSet::new();
            for (vo_id, members) in &members_by_vo {
                new_users.extend(
                    members
                        .iter()
                        .filter(|m| is_active(m) && !cluster_users.contains(*m))
                        .map(|m| (*m, *vo_id)),
                );

                let left: BTreeSet<&str> = on_cluster
                    .iter()
                    .filter(|u| u.default_account == *vo_id)
                    .map(|u| u.user.as_str())
                    .filter(|u| !members.contains(u) && is_active(u))
                    .collect();
                for user in left {
                    match current_vo.get(user) {
                        Some(new_vo) => {
                            moved_users.insert((user, *vo_id, *new_vo));
                        }
                        None => tracing::warn!(user, cluster = %cluster, "user left {vo_id} but belongs to no VO"),
                    }
                }
            }
            let removed: BTreeSet<&str> = cluster_users.difference(&active_members).copied().collect();

            tracing::debug!(
                cluster = %cluster,
                new = new_users.len(),
                removed = removed.len(),
                moved = moved_users.len(),
                "user associations"
            );
            commands.extend(new_users.iter().map(|(user, vo)| sacctmgr::add_user(user, vo, cluster)));
            commands.extend(removed.iter().map(|user| sacctmgr::remove_user(user, cluster)));
            for (user, from, to) in &moved_users {
                commands.extend(sacctmgr::change_user(user, from, to, cluster));
            }
        }
        commands
    }

    /// One QOS `<cluster>-<project>` per active project and cluster, carrying
    /// the managed flags and the configured settings. Managed QOS of projects
    /// that are no longer active are removed; other QOS are never touched.
    pub fn project_qos(&self, projects: &[Project], qos: &BTreeSet<SlurmQos>) -> Vec<SacctMgrCommand> {
        let active = Self::active_projects(projects);
        let existing: BTreeMap<&str, &SlurmQos> = qos.iter().map(|q| (q.name.as_str(), q)).collect();

        let mut commands = Vec::new();
        for cluster in self.clusters {
            let wanted: BTreeSet<String> = active.iter().map(|p| Self::qos_name(cluster, &p.vsc_id)).collect();
            for name in &wanted {
                match existing.get(name.as_str()) {
                    None => {
                        commands.push(sacctmgr::add_qos(name));
                        commands.push(sacctmgr::modify_qos(name, &self.slurm.project_qos));
                    }
                    Some(current) if !sacctmgr::QOS_FLAGS.iter().all(|f| current.has_flag(f)) => {
                        commands.push(sacctmgr::modify_qos(name, &self.slurm.project_qos));
                    }
                    Some(_) => {}
                }
            }

            let managed = Self::qos_name(cluster, &self.institute.project_prefix);
            let stale: Vec<&str> = existing
                .keys()
                .copied()
                .filter(|name| name.starts_with(&managed) && !wanted.contains(*name))
                .collect();
            tracing::debug!(cluster = %cluster, wanted = wanted.len(), stale = stale.len(), "project qos");
            commands.extend(stale.into_iter().map(sacctmgr::remove_qos));
        }
        commands
    }

    /// Every active project gets an account on every cluster, bound to its QOS.
    pub fn project_accounts(
        &self,
        projects: &[Project],
        accounts: &BTreeSet<SlurmAccount>,
    ) -> Result<Vec<SacctMgrCommand>> {
        let active = Self::active_projects(projects);
        let mut commands = Vec::new();
        for cluster in self.clusters {
            let present: BTreeSet<&str> = accounts
                .iter()
                .filter(|a| &a.cluster == cluster)
                .map(|a| a.account.as_str())
                .collect();
            for project in &active {
                if present.contains(project.vsc_id.as_str()) {
                    continue;
                }
                let qos = Self::qos_name(cluster, &project.vsc_id);
                commands.push(sacctmgr::add_account(
                    &project.vsc_id,
                    None,
                    self.organisation(&project.institute.name)?,
                    cluster,
                    None,
                    Some(&qos),
                ));
            }
        }
        Ok(commands)
    }

    /// Institute accounts, VO accounts, project QOS and accounts, then user
    /// associations.
    pub fn plan(&self, desired: &DesiredAccounting, current: &CurrentAccounting) -> Result<Vec<SacctMgrCommand>> {
        let vos = desired.vos.as_slice();
        let by_id: BTreeMap<String, Vo> = vos.iter().map(|vo| (vo.vsc_id.clone(), vo.clone())).collect();
        let mut commands = self.institute_accounts(&current.accounts, &by_id)?;
        commands.extend(self.vo_accounts(vos, &current.accounts)?);
        commands.extend(self.project_qos(&desired.projects, &current.qos));
        commands.extend(self.project_accounts(&desired.projects, &current.accounts)?);
        commands.extend(self.user_accounts(vos, &desired.active_accounts, &current.users));
        Ok(commands)
    }
}
