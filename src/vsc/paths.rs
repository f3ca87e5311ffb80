use anyhow::Result;
use std::env;
use std::path::PathBuf;

#[derive(Debug, Clone)]
pub struct SyncPaths {
    pub sync_home: PathBuf,
    pub state_dir: PathBuf,
    pub logs_dir: PathBuf,
}

fn required_home_dir() -> Result<PathBuf> {
    if let Some(home) = dirs::home_dir() {
        return Ok(home);
    }
    Err(anyhow::anyhow!("HOME directory could not be resolved"))
}

fn env_or_default_path(var: &str, fallback: PathBuf) -> PathBuf {
    match env::var(var) {
        Ok(v) if !v.trim().is_empty() => PathBuf::from(v.trim()),
        _ => fallback,
    }
}

impl SyncPaths {
    /// All runtime files below one root, for tests and custom layouts.
    pub fn under(root: impl Into<PathBuf>) -> Self {
        let sync_home = root.into();
        Self {
            state_dir: sync_home.join("state"),
            logs_dir: sync_home.join("logs"),
            sync_home,
        }
    }

    pub fn lock_file(&self, job: &str) -> PathBuf {
        self.logs_dir.join(format!("{job}.lock"))
    }

    pub fn timestamp_file(&self, job: &str) -> PathBuf {
        self.state_dir.join(format!("{job}.timestamp.json"))
    }

    pub fn health_file(&self, job: &str) -> PathBuf {
        self.state_dir.join(format!("{job}.health.json"))
    }

    pub fn audit_log(&self) -> PathBuf {
        self.logs_dir.join("audit.log")
    }
}

pub fn resolve_paths() -> Result<SyncPaths> {
    let home = required_home_dir()?;
    let sync_home = env_or_default_path("VSC_SYNC_HOME", home.join(".vsc-sync"));
    let state_dir = env_or_default_path("VSC_SYNC_STATE_DIR", sync_home.join("state"));
    let logs_dir = env_or_default_path("VSC_SYNC_LOGS_DIR", sync_home.join("logs"));

    Ok(SyncPaths {
        sync_home,
        state_dir,
        logs_dir,
    })
}

#[cfg(test)]
mod tests {
    use super::SyncPaths;
    use std::path::Path;

    #[test]
    fn job_files_live_in_state_and_logs() {
        let paths = SyncPaths::under("/srv/vsc-sync");
        assert_eq!(paths.lock_file("sync-storage"), Path::new("/srv/vsc-sync/logs/sync-storage.lock"));
        assert_eq!(
            paths.timestamp_file("sync-storage"),
            Path::new("/srv/vsc-sync/state/sync-storage.timestamp.json")
        );
        assert_eq!(
            paths.health_file("sync-slurm"),
            Path::new("/srv/vsc-sync/state/sync-slurm.health.json")
        );
        assert_eq!(paths.audit_log(), Path::new("/srv/vsc-sync/logs/audit.log"));
    }
}
