//! Client side of the account page, the system of record for accounts,
//! groups, VOs and their quota.

#[cfg(test)]
pub mod fake;
pub mod rest;

use crate::error::SyncError;
use crate::vsc::model::{Account, Group, Project, Pubkey, QuotaRecord, Status, Vo};
use thiserror::Error;

pub use rest::RestAccountPage;

#[derive(Debug, Error)]
pub enum AccountPageError {
    #[error("{method} {url} returned HTTP {status}: {body}")]
    Http {
        method: &'static str,
        url: String,
        status: u16,
        body: String,
    },
    #[error("{method} {url} failed: {source}")]
    Transport {
        method: &'static str,
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("cannot decode response of {url}: {message}")]
    Decode { url: String, message: String },
    #[error("{kind} {id} not found")]
    NotFound { kind: &'static str, id: String },
}

impl AccountPageError {
    /// True when the service itself could not be reached, as opposed to a
    /// single entity being missing or malformed.
    pub fn is_unavailable(&self) -> bool {
        match self {
            Self::Transport { .. } => true,
            Self::Http { status, .. } => *status >= 500,
            Self::Decode { .. } | Self::NotFound { .. } => false,
        }
    }

    /// A failed bulk listing has no entity to pin the failure on, so an
    /// unreachable service aborts the run.
    pub fn into_listing_error(self, what: &str) -> anyhow::Error {
        if self.is_unavailable() {
            SyncError::AccountPageUnavailable(format!("listing {what}: {self}")).into()
        } else {
            anyhow::Error::new(self).context(format!("failed to list {what}"))
        }
    }
}

pub type ApiResult<T> = Result<T, AccountPageError>;

/// Read and status-patch operations the sync drivers need. Timestamps are
/// watermarks in `YYYYMMDDHHMMSSZ` form.
pub trait AccountPage {
    fn account(&self, vsc_id: &str) -> ApiResult<Account>;
    fn account_usergroup(&self, vsc_id: &str) -> ApiResult<Group>;
    fn account_quota(&self, vsc_id: &str) -> ApiResult<Vec<QuotaRecord>>;
    /// All registered keys, including ones flagged deleted.
    fn account_pubkeys(&self, vsc_id: &str) -> ApiResult<Vec<Pubkey>>;
    fn accounts(&self) -> ApiResult<Vec<Account>>;
    fn modified_accounts(&self, since: &str) -> ApiResult<Vec<Account>>;
    fn patch_account_status(&self, vsc_id: &str, status: Status) -> ApiResult<Account>;

    fn vo(&self, vo_id: &str) -> ApiResult<Vo>;
    fn vos(&self) -> ApiResult<Vec<Vo>>;
    fn modified_vos(&self, since: &str) -> ApiResult<Vec<Vo>>;
    fn vo_quota(&self, vo_id: &str) -> ApiResult<Vec<QuotaRecord>>;
    fn vo_modified_members(&self, vo_id: &str, since: &str) -> ApiResult<Vec<Account>>;
    fn patch_vo_status(&self, vo_id: &str, status: Status) -> ApiResult<Vo>;

    fn autogroup(&self, name: &str) -> ApiResult<Group>;

    fn project(&self, project_id: &str) -> ApiResult<Project>;
    fn projects(&self) -> ApiResult<Vec<Project>>;
    fn modified_projects(&self, since: &str) -> ApiResult<Vec<Project>>;
    fn project_quota(&self, project_id: &str) -> ApiResult<Vec<QuotaRecord>>;

    fn modified_user_quota(&self, since: &str) -> ApiResult<Vec<QuotaRecord>>;
    fn modified_vo_quota(&self, since: &str) -> ApiResult<Vec<QuotaRecord>>;
}
