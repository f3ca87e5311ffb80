use crate::error::SyncError;
use crate::vsc::policy;
use anyhow::{Result, anyhow};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::env;
use std::fs;
use std::path::PathBuf;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PolicyConfig {
    pub quota_soft_fraction: f64,
    pub vo_grace_secs: u64,
    pub user_grace_secs: u64,
    /// Owner of VO filesets without a resolvable moderator (`nobody`).
    pub fallback_uid: u32,
    pub default_vo_data_quota_kib: u64,
    /// Scratch quota of a project without a declared one.
    pub default_project_scratch_quota_kib: u64,
    /// Cluster filesystems older than this need an explicit parent fileset.
    pub parent_fileset_min_version: String,
    pub user_prefix: String,
    /// Upper bound for one storage helper invocation.
    pub helper_timeout_secs: u64,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            quota_soft_fraction: 0.95,
            vo_grace_secs: 7 * 24 * 3600,
            user_grace_secs: 7 * 24 * 3600,
            fallback_uid: 65534,
            default_vo_data_quota_kib: 16 * 1024,
            default_project_scratch_quota_kib: 250 * 1024 * 1024,
            parent_fileset_min_version: "3.5.0.0".to_string(),
            user_prefix: "vsc".to_string(),
            helper_timeout_secs: 300,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AccountPageConfig {
    pub url: String,
    pub token: Option<String>,
    pub timeout_secs: u64,
}

impl Default for AccountPageConfig {
    fn default() -> Self {
        Self {
            url: "https://account.vscentrum.be/django/api/".to_string(),
            token: None,
            timeout_secs: 60,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct InstituteConfig {
    pub host: String,
    pub vo_prefix: String,
    pub shared_vo_prefix: String,
    pub project_prefix: String,
    /// Institute-wide VOs of every institute; these get no VO data fileset.
    pub default_vos: Vec<String>,
    /// Default VO per institute as seen from the host site.
    pub institute_vos: BTreeMap<String, String>,
}

impl Default for InstituteConfig {
    fn default() -> Self {
        let institute_vos = BTreeMap::from([
            ("antwerpen".to_string(), "gvo00017".to_string()),
            ("brussel".to_string(), "gvo00016".to_string()),
            ("gent".to_string(), "gvo00012".to_string()),
            ("leuven".to_string(), "gvo00018".to_string()),
        ]);
        Self {
            host: "gent".to_string(),
            vo_prefix: "gvo".to_string(),
            shared_vo_prefix: "gvos".to_string(),
            project_prefix: "gpr".to_string(),
            default_vos: institute_vos.values().cloned().collect(),
            institute_vos,
        }
    }
}

impl InstituteConfig {
    pub fn is_default_vo(&self, vo_id: &str) -> bool {
        self.default_vos.iter().any(|v| v == vo_id)
    }

    /// The institute-wide VO that holds the host's own users.
    pub fn host_default_vo(&self) -> Option<&str> {
        self.institute_vos.get(&self.host).map(String::as_str)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SlurmConfig {
    pub sacctmgr_bin: Option<PathBuf>,
    pub sacct_bin: Option<PathBuf>,
    pub clusters: Vec<String>,
    pub organisations: BTreeMap<String, String>,
    pub institute_fairshare: BTreeMap<String, u32>,
    /// Settings applied to every project QOS besides the managed flags.
    pub project_qos: BTreeMap<String, String>,
    pub command_timeout_secs: u64,
}

impl Default for SlurmConfig {
    fn default() -> Self {
        Self {
            sacctmgr_bin: None,
            sacct_bin: None,
            clusters: Vec::new(),
            organisations: BTreeMap::from([
                ("antwerpen".to_string(), "uantwerpen".to_string()),
                ("brussel".to_string(), "vub".to_string()),
                ("gent".to_string(), "ugent".to_string()),
                ("leuven".to_string(), "kuleuven".to_string()),
            ]),
            institute_fairshare: BTreeMap::from([
                ("antwerpen".to_string(), 500),
                ("brussel".to_string(), 500),
                ("gent".to_string(), 8500),
                ("leuven".to_string(), 500),
            ]),
            project_qos: BTreeMap::new(),
            command_timeout_secs: 120,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StorageType {
    Home,
    Data,
    DataShared,
    Scratch,
}

impl StorageType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Home => "home",
            Self::Data => "data",
            Self::DataShared => "data_shared",
            Self::Scratch => "scratch",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BackendKind {
    #[serde(rename = "posix")]
    Posix,
    #[serde(rename = "gpfs", alias = "cluster-filesystem")]
    ClusterFilesystem,
    #[serde(rename = "oceanstor", alias = "enterprise-storage")]
    EnterpriseStorage,
}

impl BackendKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Posix => "posix",
            Self::ClusterFilesystem => "gpfs",
            Self::EnterpriseStorage => "oceanstor",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathTemplates {
    #[serde(default = "default_user_template")]
    pub user: String,
    #[serde(default = "default_user_grouping_template")]
    pub user_grouping: String,
    #[serde(default = "default_vo_template")]
    pub vo: String,
    #[serde(default = "default_project_template")]
    pub project: String,
}

fn default_user_template() -> String {
    "{institute}/{grouping}/{id}".to_string()
}

fn default_user_grouping_template() -> String {
    "{institute}/{grouping}".to_string()
}

fn default_vo_template() -> String {
    "{institute}/vo/{number_grouping}/{id}".to_string()
}

fn default_project_template() -> String {
    "projects/{grouping}/{id}".to_string()
}

impl Default for PathTemplates {
    fn default() -> Self {
        Self {
            user: default_user_template(),
            user_grouping: default_user_grouping_template(),
            vo: default_vo_template(),
            project: default_project_template(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    pub name: String,
    pub storage_type: StorageType,
    pub backend: BackendKind,
    pub filesystem: String,
    pub login_mount_point: PathBuf,
    pub backend_mount_point: PathBuf,
    #[serde(default)]
    pub templates: PathTemplates,
    #[serde(default = "default_replication_factor")]
    pub replication_factor: u32,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default = "default_true")]
    pub user_grouping_fileset: bool,
    #[serde(default)]
    pub quota_vo_kib: Option<u64>,
    #[serde(default)]
    pub helper_bin: Option<PathBuf>,
}

fn default_replication_factor() -> u32 {
    1
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct SyncConfig {
    pub policy: PolicyConfig,
    pub accountpage: AccountPageConfig,
    pub institute: InstituteConfig,
    pub slurm: SlurmConfig,
    pub storage: Vec<StorageConfig>,
}

impl SyncConfig {
    pub fn storage_named(&self, name: &str) -> Result<&StorageConfig> {
        self.storage
            .iter()
            .find(|s| s.name == name)
            .ok_or_else(|| anyhow!("storage `{name}` is not configured"))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
struct PartialSyncConfig {
    policy: Option<PolicyConfig>,
    accountpage: Option<AccountPageConfig>,
    institute: Option<InstituteConfig>,
    slurm: Option<SlurmConfig>,
    storage: Option<Vec<StorageConfig>>,
}

/// Every environment variable vsc-sync reads, with what it sets.
pub const ENV_KEYS: &[(&str, &str)] = &[
    ("VSC_SYNC_ACCESS_TOKEN", "account page bearer token"),
    ("VSC_SYNC_ACCOUNTPAGE_TIMEOUT_SECS", "account page request timeout"),
    ("VSC_SYNC_ACCOUNTPAGE_URL", "account page base URL"),
    ("VSC_SYNC_CLUSTERS", "comma separated Slurm clusters"),
    ("VSC_SYNC_CONFIG_PATH", "config file location"),
    ("VSC_SYNC_FALLBACK_UID", "owner of filesets without a resolvable owner"),
    ("VSC_SYNC_HOME", "root of state, logs and the fallback .env"),
    ("VSC_SYNC_HOST_INSTITUTE", "institute this site belongs to"),
    ("VSC_SYNC_LOG", "tracing filter directives"),
    ("VSC_SYNC_LOGS_DIR", "lock and audit log directory"),
    ("VSC_SYNC_QUOTA_SOFT_FRACTION", "soft limit as a fraction of hard"),
    ("VSC_SYNC_SACCTMGR_BIN", "sacctmgr executable"),
    ("VSC_SYNC_SACCT_BIN", "sacct executable"),
    ("VSC_SYNC_STATE_DIR", "watermark and health directory"),
];

fn env_or_f64(var: &str, fallback: f64) -> f64 {
    match env::var(var) {
        Ok(v) => v.trim().parse::<f64>().ok().unwrap_or(fallback),
        Err(_) => fallback,
    }
}

fn env_or_u64(var: &str, fallback: u64) -> u64 {
    match env::var(var) {
        Ok(v) => v.trim().parse::<u64>().ok().unwrap_or(fallback),
        Err(_) => fallback,
    }
}

fn env_or_u32(var: &str, fallback: u32) -> u32 {
    match env::var(var) {
        Ok(v) => v.trim().parse::<u32>().ok().unwrap_or(fallback),
        Err(_) => fallback,
    }
}

fn env_or_string(var: &str, fallback: &str) -> String {
    match env::var(var) {
        Ok(v) if !v.trim().is_empty() => v.trim().to_string(),
        _ => fallback.to_string(),
    }
}

fn env_or_path(var: &str, fallback: Option<PathBuf>) -> Option<PathBuf> {
    match env::var(var) {
        Ok(v) if !v.trim().is_empty() => Some(PathBuf::from(v.trim())),
        _ => fallback,
    }
}

fn env_or_csv(var: &str, fallback: &[String]) -> Vec<String> {
    match env::var(var) {
        Ok(v) => {
            let out = v
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(ToOwned::to_owned)
                .collect::<Vec<_>>();
            if out.is_empty() {
                fallback.to_vec()
            } else {
                out
            }
        }
        Err(_) => fallback.to_vec(),
    }
}

fn validate(cfg: &SyncConfig) -> Result<()> {
    let f = cfg.policy.quota_soft_fraction;
    if !(f > 0.0 && f <= 1.0) {
        return Err(anyhow!(
            "invalid quota soft fraction: require 0 < fraction <= 1.0"
        ));
    }
    if policy::parse_version(&cfg.policy.parent_fileset_min_version).is_none() {
        return Err(anyhow!(
            "invalid parent fileset version `{}`",
            cfg.policy.parent_fileset_min_version
        ));
    }
    if cfg.institute.host.trim().is_empty() {
        return Err(anyhow!("invalid host institute: cannot be empty"));
    }
    if cfg.accountpage.url.trim().is_empty() {
        return Err(anyhow!("invalid account page url: cannot be empty"));
    }

    let mut seen = BTreeSet::new();
    for storage in &cfg.storage {
        if storage.name.trim().is_empty() {
            return Err(anyhow!("invalid storage: name cannot be empty"));
        }
        if !seen.insert(storage.name.as_str()) {
            return Err(anyhow!("storage `{}` is configured twice", storage.name));
        }
        if storage.replication_factor == 0 {
            return Err(anyhow!(
                "storage `{}`: replication factor must be >= 1",
                storage.name
            ));
        }
        if let Some(version) = &storage.version {
            if policy::parse_version(version).is_none() {
                return Err(anyhow!(
                    "storage `{}`: invalid version `{version}`",
                    storage.name
                ));
            }
        }
        if storage.backend != BackendKind::Posix && storage.helper_bin.is_none() {
            return Err(anyhow!(
                "storage `{}`: {} backend needs helper_bin",
                storage.name,
                storage.backend.as_str()
            ));
        }
    }
    Ok(())
}

pub fn resolve_config_path() -> Option<PathBuf> {
    if let Ok(custom) = env::var("VSC_SYNC_CONFIG_PATH") {
        let trimmed = custom.trim();
        if !trimmed.is_empty() {
            return Some(PathBuf::from(trimmed));
        }
    }

    let home = dirs::home_dir()?;
    Some(home.join(".vsc-sync").join("config.toml"))
}

fn merge_toml(base: &mut SyncConfig, raw: &str) -> Result<()> {
    let parsed: PartialSyncConfig = toml::from_str(raw)?;
    if let Some(policy) = parsed.policy {
        base.policy = policy;
    }
    if let Some(accountpage) = parsed.accountpage {
        base.accountpage = accountpage;
    }
    if let Some(institute) = parsed.institute {
        base.institute = institute;
    }
    if let Some(slurm) = parsed.slurm {
        base.slurm = slurm;
    }
    if let Some(storage) = parsed.storage {
        base.storage = storage;
    }
    Ok(())
}

fn merge_file_config(base: &mut SyncConfig) -> Result<()> {
    let Some(path) = resolve_config_path() else {
        return Ok(());
    };
    if !path.exists() {
        return Ok(());
    }

    let raw = fs::read_to_string(&path)
        .map_err(|err| SyncError::InvalidConfig(format!("{}: {err}", path.display())))?;
    merge_toml(base, &raw)
        .map_err(|err| SyncError::InvalidConfig(format!("{}: {err}", path.display())))?;
    Ok(())
}

fn apply_env_overrides(cfg: &mut SyncConfig) {
    cfg.institute.host = env_or_string("VSC_SYNC_HOST_INSTITUTE", &cfg.institute.host);
    cfg.accountpage.url = env_or_string("VSC_SYNC_ACCOUNTPAGE_URL", &cfg.accountpage.url);
    cfg.accountpage.timeout_secs = env_or_u64(
        "VSC_SYNC_ACCOUNTPAGE_TIMEOUT_SECS",
        cfg.accountpage.timeout_secs,
    );
    if let Ok(token) = env::var("VSC_SYNC_ACCESS_TOKEN") {
        if !token.trim().is_empty() {
            cfg.accountpage.token = Some(token.trim().to_string());
        }
    }
    cfg.policy.quota_soft_fraction = env_or_f64(
        "VSC_SYNC_QUOTA_SOFT_FRACTION",
        cfg.policy.quota_soft_fraction,
    );
    cfg.policy.fallback_uid = env_or_u32("VSC_SYNC_FALLBACK_UID", cfg.policy.fallback_uid);
    cfg.slurm.sacctmgr_bin = env_or_path("VSC_SYNC_SACCTMGR_BIN", cfg.slurm.sacctmgr_bin.take());
    cfg.slurm.sacct_bin = env_or_path("VSC_SYNC_SACCT_BIN", cfg.slurm.sacct_bin.take());
    cfg.slurm.clusters = env_or_csv("VSC_SYNC_CLUSTERS", &cfg.slurm.clusters);
}

pub fn load_config() -> Result<SyncConfig> {
    let mut cfg = SyncConfig::default();
    merge_file_config(&mut cfg)?;
    apply_env_overrides(&mut cfg);
    validate(&cfg).map_err(|err| SyncError::InvalidConfig(err.to_string()))?;
    Ok(cfg)
}

#[cfg(test)]
pub fn from_toml_str(raw: &str) -> Result<SyncConfig> {
    let mut cfg = SyncConfig::default();
    merge_toml(&mut cfg, raw)?;
    validate(&cfg)?;
    Ok(cfg)
}
