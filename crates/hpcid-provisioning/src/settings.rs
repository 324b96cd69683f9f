//! Configuration directory loading.
//!
//! Each capability reads one YAML file from the configuration directory.
//! Files are parsed and validated once, at startup; any problem surfaces as
//! [`ConnectorError::InvalidConfiguration`] naming the file.

use serde::de::DeserializeOwned;
use std::path::{Path, PathBuf};
use tracing::debug;

use hpcid_allocations::AllocationsConfig;
use hpcid_connector::error::{ConnectorError, ConnectorResult};
use hpcid_connector_ldap::LdapConfig;
use hpcid_connector_slurm::SlurmConfig;
use hpcid_connector_storage::{HomeDirConfig, StorageConfig};
use hpcid_notify::SlackConfig;

pub const ALLOCATIONS_FILE: &str = "allocations.yml";
pub const LDAP_FILE: &str = "ldap.yml";
pub const SLURM_FILE: &str = "slurm.yml";
pub const STORAGE_FILE: &str = "storage.yml";
pub const HOMEDIRS_FILE: &str = "homedirs.yml";
pub const SLACK_FILE: &str = "slack.yml";

/// Default configuration directory.
pub const DEFAULT_CONFIG_DIR: &str = "/etc/hpcid";

/// A directory of per-capability YAML files.
#[derive(Debug, Clone)]
pub struct ConfigDir {
    path: PathBuf,
}

impl ConfigDir {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn file(&self, name: &str) -> PathBuf {
        self.path.join(name)
    }

    pub fn has(&self, name: &str) -> bool {
        self.file(name).is_file()
    }

    /// Read and parse one file.
    pub fn load<T: DeserializeOwned>(&self, name: &str) -> ConnectorResult<T> {
        let path = self.file(name);
        let text = std::fs::read_to_string(&path).map_err(|e| {
            ConnectorError::invalid_config(format!("cannot read {}: {e}", path.display()))
        })?;
        let value = serde_yaml::from_str(&text).map_err(|e| {
            ConnectorError::invalid_config(format!("cannot parse {}: {e}", path.display()))
        })?;
        debug!(file = %path.display(), "Loaded configuration");
        Ok(value)
    }

    pub fn allocations(&self) -> ConnectorResult<AllocationsConfig> {
        let config: AllocationsConfig = self.load(ALLOCATIONS_FILE)?;
        config.validate()?;
        Ok(config)
    }

    pub fn ldap(&self) -> ConnectorResult<LdapConfig> {
        let config: LdapConfig = self.load(LDAP_FILE)?;
        config.validate()?;
        Ok(config)
    }

    pub fn slurm(&self) -> ConnectorResult<SlurmConfig> {
        let config: SlurmConfig = self.load(SLURM_FILE)?;
        config.validate()?;
        Ok(config)
    }

    pub fn storage(&self) -> ConnectorResult<StorageConfig> {
        let config: StorageConfig = self.load(STORAGE_FILE)?;
        config.validate()?;
        Ok(config)
    }

    pub fn homedirs(&self) -> ConnectorResult<HomeDirConfig> {
        let config: HomeDirConfig = self.load(HOMEDIRS_FILE)?;
        config.validate()?;
        Ok(config)
    }

    /// Slack settings, `None` when no `slack.yml` exists.
    pub fn slack(&self) -> ConnectorResult<Option<SlackConfig>> {
        if !self.has(SLACK_FILE) {
            return Ok(None);
        }
        let config: SlackConfig = self.load(SLACK_FILE)?;
        config.validate()?;
        Ok(Some(config))
    }
}

impl Default for ConfigDir {
    fn default() -> Self {
        Self::new(DEFAULT_CONFIG_DIR)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write(dir: &Path, name: &str, text: &str) {
        std::fs::write(dir.join(name), text).unwrap();
    }

    #[test]
    fn test_loads_and_validates() {
        let tmp = tempfile::tempdir().unwrap();
        write(tmp.path(), SLURM_FILE, "slurm_base: /opt/slurm/bin\nadd_user_delay_secs: 2\n");
        write(tmp.path(), STORAGE_FILE, "mount_points: [/projects, /scratch]\n");

        let dir = ConfigDir::new(tmp.path());
        assert_eq!(dir.slurm().unwrap().add_user_delay_secs, 2);
        assert_eq!(dir.storage().unwrap().mount_points.len(), 2);
    }

    #[test]
    fn test_missing_file_is_config_error() {
        let tmp = tempfile::tempdir().unwrap();
        let err = ConfigDir::new(tmp.path()).ldap().unwrap_err();
        assert_eq!(err.error_code(), "INVALID_CONFIG");
        assert!(err.to_string().contains("ldap.yml"));
    }

    #[test]
    fn test_invalid_values_are_config_errors() {
        let tmp = tempfile::tempdir().unwrap();
        write(tmp.path(), STORAGE_FILE, "mount_points: [projects]\n");
        write(tmp.path(), SLURM_FILE, "fairshare: many\n");

        let dir = ConfigDir::new(tmp.path());
        assert_eq!(dir.storage().unwrap_err().error_code(), "INVALID_CONFIG");
        assert_eq!(dir.slurm().unwrap_err().error_code(), "INVALID_CONFIG");
    }

    #[test]
    fn test_slack_is_optional() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = ConfigDir::new(tmp.path());
        assert!(dir.slack().unwrap().is_none());

        write(tmp.path(), SLACK_FILE, "webhook: https://hooks.slack.com/services/T0/B0/x\n");
        assert!(dir.slack().unwrap().is_some());
    }
}
