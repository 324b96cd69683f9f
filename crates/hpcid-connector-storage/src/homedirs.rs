//! Per-user home directories on the NFS server.

use std::path::PathBuf;
use tracing::{debug, info, instrument};

use hpcid_connector::command::{CommandExecutor, CommandSpec};
use hpcid_connector::error::{ConnectorError, ConnectorResult};

use crate::config::HomeDirConfig;
use crate::links::path_exists;

const HOSTNAME_PATH: &str = "/proc/sys/kernel/hostname";

/// Creates home directories under the configured root.
#[derive(Debug)]
pub struct HomeDirectories {
    config: HomeDirConfig,
    executor: CommandExecutor,
}

impl HomeDirectories {
    pub fn new(config: HomeDirConfig, executor: CommandExecutor) -> ConnectorResult<Self> {
        config.validate()?;
        let executor = executor.with_timeout(config.command_timeout());
        Ok(Self { config, executor })
    }

    pub fn config(&self) -> &HomeDirConfig {
        &self.config
    }

    /// Refuse to run anywhere but the configured hosts, for any cluster but
    /// the configured one.
    pub fn check_host(&self, hostname: &str, cluster: &str) -> ConnectorResult<()> {
        if !self.config.allowed_hosts.iter().any(|h| h == hostname) {
            return Err(ConnectorError::Rejected {
                backend: "homedirs".to_string(),
                target: hostname.to_string(),
                message: format!(
                    "home directories may only be managed on {}",
                    self.config.allowed_hosts.join(" or ")
                ),
            });
        }
        if !cluster.eq_ignore_ascii_case(&self.config.cluster) {
            return Err(ConnectorError::Rejected {
                backend: "homedirs".to_string(),
                target: cluster.to_string(),
                message: format!(
                    "home directories here belong to cluster `{}`",
                    self.config.cluster
                ),
            });
        }
        Ok(())
    }

    pub fn home_path(&self, user: &str) -> PathBuf {
        self.config.root.join(user)
    }

    /// A home that is a symlink counts as present.
    pub async fn exists(&self, user: &str) -> ConnectorResult<bool> {
        path_exists(&self.home_path(user)).await
    }

    /// Create the home directory, drop the marker file and apply the quota.
    #[instrument(skip(self))]
    pub async fn create(&self, user: &str) -> ConnectorResult<Vec<String>> {
        let home = self.home_path(user);
        let home_str = home.to_string_lossy().into_owned();
        let mut actions = Vec::new();

        if !self.exists(user).await? {
            self.executor
                .run(&CommandSpec::mutation("/bin/mkdir", [home_str.as_str()]))
                .await?;
            actions.push(format!("Created home directory `{home_str}`"));
        } else {
            debug!(user = %user, "Home directory already present");
        }

        let marker = home.join(&self.config.marker_file);
        self.executor
            .run(&CommandSpec::mutation(
                "/usr/bin/touch",
                [marker.to_string_lossy().into_owned()],
            ))
            .await?;

        if let Some(quota) = self.config.quota {
            let root = self.config.root.to_string_lossy().into_owned();
            self.executor
                .run(&CommandSpec::mutation(
                    self.config.setquota_path.to_string_lossy().into_owned(),
                    [
                        "-u".to_string(),
                        user.to_string(),
                        quota.bsoft.to_string(),
                        quota.bhard.to_string(),
                        quota.isoft.to_string(),
                        quota.ihard.to_string(),
                        root,
                    ],
                ))
                .await?;
            actions.push(format!("Set quota for `{user}`"));
        }

        info!(user = %user, home = %home_str, dry_run = self.executor.is_dry_run(), "Provisioned home directory");
        Ok(actions)
    }
}

/// Name of the host this process runs on.
pub fn current_hostname() -> ConnectorResult<String> {
    match std::fs::read_to_string(HOSTNAME_PATH) {
        Ok(name) => Ok(name.trim().to_string()),
        Err(e) => std::env::var("HOSTNAME")
            .map(|h| h.trim().to_string())
            .map_err(|_| ConnectorError::io("failed to determine hostname", e)),
    }
}
