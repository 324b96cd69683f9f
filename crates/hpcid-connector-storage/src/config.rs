//! Storage configuration.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use hpcid_connector::error::{ConnectorError, ConnectorResult};

/// How group quotas are applied to new project directories.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QuotaTool {
    /// Directories are created without a quota.
    #[default]
    None,
    /// `lfs setquota -g` on the mount point.
    Lustre,
}

/// Configuration for project storage and home-directory links.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StorageConfig {
    /// Mount points each project gets a directory on.
    pub mount_points: Vec<PathBuf>,

    /// Pause between mkdir, chgrp and chmod, in seconds.
    #[serde(default = "default_step_delay")]
    pub step_delay_secs: u64,

    /// Quota mechanism.
    #[serde(default)]
    pub quota: QuotaTool,

    /// Path to the `lfs` binary.
    #[serde(default = "default_lfs_path")]
    pub lfs_path: PathBuf,

    /// Root of user home directories, where project links are placed.
    #[serde(default = "default_home_root")]
    pub home_root: PathBuf,

    /// Files copied into a home directory that is being repaired.
    #[serde(default = "default_skeleton_dir")]
    pub skeleton_dir: PathBuf,

    /// Project groups that never get home links.
    #[serde(default = "default_link_excluded_accounts")]
    pub link_excluded_accounts: Vec<String>,

    /// Timeout for each command, in seconds.
    #[serde(default = "default_command_timeout")]
    pub command_timeout_secs: u64,
}

fn default_step_delay() -> u64 {
    1
}

fn default_lfs_path() -> PathBuf {
    PathBuf::from("/usr/bin/lfs")
}

fn default_home_root() -> PathBuf {
    PathBuf::from("/home")
}

fn default_skeleton_dir() -> PathBuf {
    PathBuf::from("/usr/local/hpcusr/latest/skel/skel")
}

fn default_link_excluded_accounts() -> Vec<String> {
    vec!["cy02".to_string()]
}

fn default_command_timeout() -> u64 {
    120
}

impl StorageConfig {
    pub fn new(mount_points: Vec<PathBuf>) -> Self {
        Self {
            mount_points,
            step_delay_secs: default_step_delay(),
            quota: QuotaTool::default(),
            lfs_path: default_lfs_path(),
            home_root: default_home_root(),
            skeleton_dir: default_skeleton_dir(),
            link_excluded_accounts: default_link_excluded_accounts(),
            command_timeout_secs: default_command_timeout(),
        }
    }

    pub fn with_home_root(mut self, home_root: impl Into<PathBuf>) -> Self {
        self.home_root = home_root.into();
        self
    }

    pub fn with_skeleton_dir(mut self, skeleton_dir: impl Into<PathBuf>) -> Self {
        self.skeleton_dir = skeleton_dir.into();
        self
    }

    pub fn with_quota(mut self, quota: QuotaTool) -> Self {
        self.quota = quota;
        self
    }

    pub fn step_delay(&self) -> Duration {
        Duration::from_secs(self.step_delay_secs)
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_secs)
    }

    pub fn validate(&self) -> ConnectorResult<()> {
        if self.mount_points.is_empty() {
            return Err(ConnectorError::invalid_config(
                "at least one storage mount point is required",
            ));
        }
        if let Some(relative) = self.mount_points.iter().find(|m| !m.is_absolute()) {
            return Err(ConnectorError::invalid_config(format!(
                "storage mount point must be absolute: {}",
                relative.display()
            )));
        }
        if !self.home_root.is_absolute() {
            return Err(ConnectorError::invalid_config("home_root must be absolute"));
        }
        if !self.skeleton_dir.is_absolute() {
            return Err(ConnectorError::invalid_config("skeleton_dir must be absolute"));
        }
        Ok(())
    }
}

/// Per-user block and inode limits for `setquota`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct UserQuota {
    pub bsoft: u64,
    pub bhard: u64,
    pub isoft: u64,
    pub ihard: u64,
}

/// Configuration for per-user home directories on the NFS server.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct HomeDirConfig {
    /// Hosts this pass may run on.
    pub allowed_hosts: Vec<String>,

    /// Cluster whose access group governs home directories here.
    pub cluster: String,

    /// Root the home directories are created under.
    pub root: PathBuf,

    /// File written into each new home directory.
    #[serde(default = "default_marker_file")]
    pub marker_file: String,

    /// Quota applied to each new home directory.
    #[serde(default)]
    pub quota: Option<UserQuota>,

    /// Path to `setquota`.
    #[serde(default = "default_setquota_path")]
    pub setquota_path: PathBuf,

    /// Timeout for each command, in seconds.
    #[serde(default = "default_command_timeout")]
    pub command_timeout_secs: u64,
}

fn default_marker_file() -> String {
    ".mgid".to_string()
}

fn default_setquota_path() -> PathBuf {
    PathBuf::from("/sbin/setquota")
}

impl HomeDirConfig {
    pub fn new(cluster: impl Into<String>, root: impl Into<PathBuf>) -> Self {
        Self {
            allowed_hosts: Vec::new(),
            cluster: cluster.into(),
            root: root.into(),
            marker_file: default_marker_file(),
            quota: None,
            setquota_path: default_setquota_path(),
            command_timeout_secs: default_command_timeout(),
        }
    }

    pub fn with_allowed_host(mut self, host: impl Into<String>) -> Self {
        self.allowed_hosts.push(host.into());
        self
    }

    pub fn with_quota(mut self, quota: UserQuota) -> Self {
        self.quota = Some(quota);
        self
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_secs)
    }

    pub fn validate(&self) -> ConnectorResult<()> {
        if !self.root.is_absolute() {
            return Err(ConnectorError::invalid_config(
                "home directory root must be absolute",
            ));
        }
        if self.cluster.trim().is_empty() {
            return Err(ConnectorError::invalid_config("home directory cluster is required"));
        }
        if self.marker_file.contains('/') || self.marker_file.is_empty() {
            return Err(ConnectorError::invalid_config(
                "marker_file must be a plain file name",
            ));
        }
        Ok(())
    }
}
