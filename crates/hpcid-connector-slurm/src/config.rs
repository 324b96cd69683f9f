//! Scheduler backend configuration.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use hpcid_connector::error::{ConnectorError, ConnectorResult};

/// Configuration for the Slurm accounting backend.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SlurmConfig {
    /// Directory holding `sacctmgr` and `scontrol`.
    #[serde(default = "default_slurm_base")]
    pub slurm_base: PathBuf,

    /// Organization recorded on new accounts.
    #[serde(default = "default_organization")]
    pub organization: String,

    /// Fairshare assigned to new accounts.
    #[serde(default = "default_fairshare")]
    pub fairshare: u32,

    /// Minimum pause between user additions, in seconds.
    #[serde(default = "default_add_user_delay")]
    pub add_user_delay_secs: u64,

    /// Capacity accounts never touched by membership corrections.
    #[serde(default = "default_excluded_accounts")]
    pub excluded_accounts: Vec<String>,

    /// Timeout for each command, in seconds.
    #[serde(default = "default_command_timeout")]
    pub command_timeout_secs: u64,
}

fn default_slurm_base() -> PathBuf {
    PathBuf::from("/usr/bin")
}

fn default_organization() -> String {
    "Monash".to_string()
}

fn default_fairshare() -> u32 {
    1
}

fn default_add_user_delay() -> u64 {
    5
}

fn default_excluded_accounts() -> Vec<String> {
    ["ny79", "sf32", "va91", "od25", "qc45", "be32"]
        .iter()
        .map(|s| (*s).to_string())
        .collect()
}

fn default_command_timeout() -> u64 {
    60
}

impl Default for SlurmConfig {
    fn default() -> Self {
        Self {
            slurm_base: default_slurm_base(),
            organization: default_organization(),
            fairshare: default_fairshare(),
            add_user_delay_secs: default_add_user_delay(),
            excluded_accounts: default_excluded_accounts(),
            command_timeout_secs: default_command_timeout(),
        }
    }
}

impl SlurmConfig {
    pub fn sacctmgr(&self) -> String {
        self.slurm_base.join("sacctmgr").to_string_lossy().into_owned()
    }

    pub fn scontrol(&self) -> String {
        self.slurm_base.join("scontrol").to_string_lossy().into_owned()
    }

    pub fn add_user_delay(&self) -> Duration {
        Duration::from_secs(self.add_user_delay_secs)
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_secs)
    }

    /// Set the pause between user additions.
    pub fn with_add_user_delay(mut self, secs: u64) -> Self {
        self.add_user_delay_secs = secs;
        self
    }

    pub fn validate(&self) -> ConnectorResult<()> {
        if self.organization.trim().is_empty() {
            return Err(ConnectorError::invalid_config("slurm organization is required"));
        }
        if self.command_timeout_secs == 0 {
            return Err(ConnectorError::invalid_config(
                "slurm command_timeout_secs must be greater than 0",
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config: SlurmConfig = serde_yaml::from_str("slurm_base: /opt/slurm/bin\n").unwrap();
        assert_eq!(config.sacctmgr(), "/opt/slurm/bin/sacctmgr");
        assert_eq!(config.scontrol(), "/opt/slurm/bin/scontrol");
        assert_eq!(config.add_user_delay(), Duration::from_secs(5));
        assert_eq!(config.fairshare, 1);
        assert!(config.excluded_accounts.contains(&"ny79".to_string()));
        assert_eq!(config.excluded_accounts.len(), 6);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate() {
        let mut config = SlurmConfig::default();
        config.organization = " ".to_string();
        assert!(config.validate().is_err());

        let mut config = SlurmConfig::default();
        config.command_timeout_secs = 0;
        assert!(config.validate().is_err());
    }
}
