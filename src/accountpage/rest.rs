use super::{AccountPage, AccountPageError, ApiResult};
use crate::vsc::config::AccountPageConfig;
use crate::vsc::model::{Account, Group, Project, Pubkey, QuotaRecord, Status, Vo};
use anyhow::{Context, Result};
use reqwest::blocking::{Client, RequestBuilder};
use serde::de::DeserializeOwned;
use serde_json::json;
use std::time::Duration;

/// Blocking REST client for the account page API.
#[derive(Debug, Clone)]
pub struct RestAccountPage {
    client: Client,
    base_url: String,
    token: Option<String>,
}

fn normalize_base_url(raw: &str) -> String {
    let trimmed = raw.trim();
    if trimmed.ends_with('/') {
        trimmed.to_string()
    } else {
        format!("{trimmed}/")
    }
}

impl RestAccountPage {
    pub fn new(cfg: &AccountPageConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(cfg.timeout_secs.max(1)))
            .build()
            .context("failed to build account page http client")?;
        Ok(Self {
            client,
            base_url: normalize_base_url(&cfg.url),
            token: cfg.token.clone(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path.trim_start_matches('/'))
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    fn send<T: DeserializeOwned>(
        &self,
        method: &'static str,
        url: String,
        request: RequestBuilder,
    ) -> ApiResult<T> {
        tracing::debug!(method, url = %url, "account page request");
        let response =
            self.authorize(request)
                .send()
                .map_err(|source| AccountPageError::Transport {
                    method,
                    url: url.clone(),
                    source,
                })?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            return Err(AccountPageError::Http {
                method,
                url,
                status: status.as_u16(),
                body: body.trim().to_string(),
            });
        }
        response
            .json::<T>()
            .map_err(|err| AccountPageError::Decode {
                url,
                message: err.to_string(),
            })
    }

    fn get<T: DeserializeOwned>(&self, path: &str) -> ApiResult<T> {
        let url = self.url(path);
        let request = self.client.get(&url);
        self.send("GET", url, request)
    }

    fn patch_status<T: DeserializeOwned>(&self, path: &str, status: Status) -> ApiResult<T> {
        let url = self.url(path);
        let request = self.client.patch(&url).json(&json!({ "status": status }));
        self.send("PATCH", url, request)
    }

    fn get_one<T: DeserializeOwned>(&self, kind: &'static str, id: &str, path: &str) -> ApiResult<T> {
        match self.get(path) {
            Err(AccountPageError::Http { status: 404, .. }) => Err(AccountPageError::NotFound {
                kind,
                id: id.to_string(),
            }),
            other => other,
        }
    }
}

impl AccountPage for RestAccountPage {
    fn account(&self, vsc_id: &str) -> ApiResult<Account> {
        self.get_one("account", vsc_id, &format!("account/{vsc_id}"))
    }

    fn account_usergroup(&self, vsc_id: &str) -> ApiResult<Group> {
        self.get_one("usergroup", vsc_id, &format!("account/{vsc_id}/usergroup"))
    }

    fn account_quota(&self, vsc_id: &str) -> ApiResult<Vec<QuotaRecord>> {
        self.get(&format!("account/{vsc_id}/quota"))
    }

    fn account_pubkeys(&self, vsc_id: &str) -> ApiResult<Vec<Pubkey>> {
        self.get(&format!("account/{vsc_id}/pubkey"))
    }

    fn accounts(&self) -> ApiResult<Vec<Account>> {
        self.get("account/")
    }

    fn modified_accounts(&self, since: &str) -> ApiResult<Vec<Account>> {
        self.get(&format!("account/modified/{since}"))
    }

    fn patch_account_status(&self, vsc_id: &str, status: Status) -> ApiResult<Account> {
        self.patch_status(&format!("account/{vsc_id}"), status)
    }

    fn vo(&self, vo_id: &str) -> ApiResult<Vo> {
        self.get_one("vo", vo_id, &format!("vo/{vo_id}"))
    }

    fn vos(&self) -> ApiResult<Vec<Vo>> {
        self.get("vo/")
    }

    fn modified_vos(&self, since: &str) -> ApiResult<Vec<Vo>> {
        self.get(&format!("vo/modified/{since}"))
    }

    fn vo_quota(&self, vo_id: &str) -> ApiResult<Vec<QuotaRecord>> {
        self.get(&format!("vo/{vo_id}/quota"))
    }

    fn vo_modified_members(&self, vo_id: &str, since: &str) -> ApiResult<Vec<Account>> {
        self.get(&format!("vo/{vo_id}/member/modified/{since}"))
    }

    fn patch_vo_status(&self, vo_id: &str, status: Status) -> ApiResult<Vo> {
        self.patch_status(&format!("vo/{vo_id}"), status)
    }

    fn autogroup(&self, name: &str) -> ApiResult<Group> {
        self.get_one("autogroup", name, &format!("autogroup/{name}"))
    }

    fn project(&self, project_id: &str) -> ApiResult<Project> {
        self.get_one("project", project_id, &format!("project/{project_id}"))
    }

    fn projects(&self) -> ApiResult<Vec<Project>> {
        self.get("project/")
    }

    fn modified_projects(&self, since: &str) -> ApiResult<Vec<Project>> {
        self.get(&format!("project/modified/{since}"))
    }

    fn project_quota(&self, project_id: &str) -> ApiResult<Vec<QuotaRecord>> {
        self.get(&format!("project/{project_id}/quota"))
    }

    fn modified_user_quota(&self, since: &str) -> ApiResult<Vec<QuotaRecord>> {
        self.get(&format!("quota/user/modified/{since}"))
    }

    fn modified_vo_quota(&self, since: &str) -> ApiResult<Vec<QuotaRecord>> {
        self.get(&format!("quota/vo/modified/{since}"))
    }
}
