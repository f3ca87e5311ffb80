//! What changed upstream since the last watermark.

use crate::accountpage::AccountPage;
use crate::vsc::config::InstituteConfig;
use crate::vsc::model::QuotaRecord;
use anyhow::Result;
use serde::Serialize;
use std::collections::BTreeSet;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Changeset {
    pub since: String,
    pub accounts: Vec<String>,
    pub vos: Vec<String>,
    pub projects: Vec<String>,
    #[serde(skip)]
    pub user_quota: Vec<QuotaRecord>,
}

/// Which reconciliation passes a run makes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Passes {
    pub users: bool,
    pub vos: bool,
    pub projects: bool,
}

impl Passes {
    pub const ALL: Passes = Passes {
        users: true,
        vos: true,
        projects: true,
    };
}

/// Changes the caller asked for explicitly, bypassing the account page
/// deltas.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub accounts: Vec<String>,
    pub vos: Vec<String>,
    pub projects: Vec<String>,
}

impl Overrides {
    pub fn is_empty(&self) -> bool {
        self.accounts.is_empty() && self.vos.is_empty() && self.projects.is_empty()
    }
}

/// VO ids the storage pass manages: regular VOs, never the shared ones.
fn is_managed_vo(institute: &InstituteConfig, vo_id: &str) -> bool {
    vo_id.starts_with(&institute.vo_prefix) && !vo_id.starts_with(&institute.shared_vo_prefix)
}

pub fn collect(
    client: &dyn AccountPage,
    institute: &InstituteConfig,
    since: &str,
    passes: Passes,
) -> Result<Changeset> {
    let mut changes = Changeset {
        since: since.to_string(),
        ..Changeset::default()
    };

    if passes.users {
        let accounts = client
            .modified_accounts(since)
            .map_err(|err| err.into_listing_error("modified accounts"))?;
        let ids: BTreeSet<String> = accounts
            .into_iter()
            .filter(|a| a.isactive)
            .map(|a| a.vsc_id)
            .collect();
        changes.accounts = ids.into_iter().collect();
        changes.user_quota = client
            .modified_user_quota(since)
            .map_err(|err| err.into_listing_error("modified user quota"))?;
        tracing::info!(
            since,
            accounts = changes.accounts.len(),
            quota = changes.user_quota.len(),
            "accounts changed upstream"
        );
    }

    if passes.vos {
        let mut ids: BTreeSet<String> = client
            .modified_vos(since)
            .map_err(|err| err.into_listing_error("modified VOs"))?
            .into_iter()
            .map(|vo| vo.vsc_id)
            .filter(|id| is_managed_vo(institute, id))
            .collect();
        let quota_owners: Vec<String> = client
            .modified_vo_quota(since)
            .map_err(|err| err.into_listing_error("modified VO quota"))?
            .into_iter()
            .filter(|q| is_managed_vo(institute, &q.fileset))
            .filter_map(|q| q.owner)
            .collect();
        tracing::info!(
            since,
            vos = ids.len(),
            quota = quota_owners.len(),
            "VOs changed upstream"
        );
        ids.extend(quota_owners);
        changes.vos = ids.into_iter().collect();
    }

    if passes.projects {
        let ids: BTreeSet<String> = client
            .modified_projects(since)
            .map_err(|err| err.into_listing_error("modified projects"))?
            .into_iter()
            .map(|project| project.vsc_id)
            .collect();
        tracing::info!(since, projects = ids.len(), "projects changed upstream");
        changes.projects = ids.into_iter().collect();
    }

    Ok(changes)
}

/// Replaces the upstream deltas with explicit ids where given.
pub fn apply_overrides(mut changes: Changeset, overrides: &Overrides) -> Changeset {
    if !overrides.accounts.is_empty() {
        let ids: BTreeSet<String> = overrides.accounts.iter().cloned().collect();
        changes.accounts = ids.into_iter().collect();
        changes
            .user_quota
            .retain(|q| q.owner.as_deref().is_some_and(|o| changes.accounts.iter().any(|a| a == o)));
    }
    if !overrides.vos.is_empty() {
        let ids: BTreeSet<String> = overrides.vos.iter().cloned().collect();
        changes.vos = ids.into_iter().collect();
    }
    if !overrides.projects.is_empty() {
        let ids: BTreeSet<String> = overrides.projects.iter().cloned().collect();
        changes.projects = ids.into_iter().collect();
    }
    changes
}
