//! Project storage backend
//!
//! Each project owns a directory named after its group on every configured
//! mount point, group-owned with mode `2770`. The three create steps are
//! spaced out so distributed filesystems see the directory before its
//! ownership and mode are changed.

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{debug, info, instrument};

use hpcid_connector::command::{CommandExecutor, CommandSpec};
use hpcid_connector::error::{ConnectorError, ConnectorResult};
use hpcid_connector::traits::BackendAdapter;
use hpcid_connector::types::{ApplyOutcome, BackendKind, BackendState, DesiredState};

use crate::config::{QuotaTool, StorageConfig};

const PROJECT_MODE: &str = "2770";

/// POSIX project storage.
#[derive(Debug)]
pub struct StorageBackend {
    config: StorageConfig,
    executor: CommandExecutor,
}

impl StorageBackend {
    pub fn new(config: StorageConfig, executor: CommandExecutor) -> ConnectorResult<Self> {
        config.validate()?;
        let executor = executor.with_timeout(config.command_timeout());
        Ok(Self { config, executor })
    }

    pub fn mount_points(&self) -> &[PathBuf] {
        &self.config.mount_points
    }

    pub fn project_path(mount_point: &Path, group: &str) -> PathBuf {
        mount_point.join(group)
    }

    /// Whether the project directory exists on a mount point.
    pub async fn exists(&self, mount_point: &Path, group: &str) -> ConnectorResult<bool> {
        dir_exists(&Self::project_path(mount_point, group)).await
    }

    /// Create the project directory on one mount point.
    #[instrument(skip(self), fields(mount_point = %mount_point.display()))]
    pub async fn create(
        &self,
        mount_point: &Path,
        group: &str,
        quota: Option<&str>,
    ) -> ConnectorResult<Vec<String>> {
        let path = Self::project_path(mount_point, group);
        let path_str = path.to_string_lossy().into_owned();

        self.executor
            .run(&CommandSpec::mutation("/bin/mkdir", [path_str.as_str()]))
            .await?;
        self.step_delay().await;
        self.executor
            .run(&CommandSpec::mutation("/bin/chgrp", [group, path_str.as_str()]))
            .await?;
        self.step_delay().await;
        self.executor
            .run(&CommandSpec::mutation("/bin/chmod", [PROJECT_MODE, path_str.as_str()]))
            .await?;

        let mut actions = vec![format!(
            "Created `{path_str}` for group `{group}` with mode {PROJECT_MODE}"
        )];

        if let (QuotaTool::Lustre, Some(size)) = (self.config.quota, quota) {
            let lfs = self.config.lfs_path.to_string_lossy().into_owned();
            let mount = mount_point.to_string_lossy().into_owned();
            self.executor
                .run(&CommandSpec::mutation(
                    lfs,
                    ["setquota", "-g", group, "-B", size, mount.as_str()],
                ))
                .await?;
            actions.push(format!("Set quota {size} for group `{group}` on `{mount}`"));
        }

        info!(group = %group, path = %path_str, dry_run = self.executor.is_dry_run(), "Created project directory");
        Ok(actions)
    }

    async fn step_delay(&self) {
        if !self.executor.is_dry_run() {
            tokio::time::sleep(self.config.step_delay()).await;
        }
    }
}

/// Directory existence check. A missing path is `false`; other failures are errors.
pub(crate) async fn dir_exists(path: &Path) -> ConnectorResult<bool> {
    match tokio::fs::metadata(path).await {
        Ok(meta) => Ok(meta.is_dir()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(ConnectorError::io(format!("stat {}", path.display()), e)),
    }
}

#[async_trait]
impl BackendAdapter for StorageBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Storage
    }

    fn list_targets(&self) -> Vec<String> {
        self.config
            .mount_points
            .iter()
            .map(|m| m.to_string_lossy().into_owned())
            .collect()
    }

    async fn current_assignment(&self, project: &str) -> ConnectorResult<BackendState> {
        let mut targets = BTreeMap::new();
        for mount_point in &self.config.mount_points {
            let present = self.exists(mount_point, project).await?;
            targets.insert(mount_point.to_string_lossy().into_owned(), present);
        }
        debug!(project = %project, ?targets, "Checked project storage");
        Ok(BackendState::Storage { targets })
    }

    async fn apply(&self, project: &str, desired: &DesiredState) -> ConnectorResult<ApplyOutcome> {
        let DesiredState::Storage { group, quotas } = desired else {
            return Err(ConnectorError::InvalidData {
                message: format!("storage backend cannot apply {} state", desired.kind()),
            });
        };

        let mut actions = Vec::new();
        for mount_point in &self.config.mount_points {
            if self.exists(mount_point, group).await? {
                continue;
            }
            let key = mount_point.to_string_lossy();
            let quota = quotas.get(key.as_ref()).map(String::as_str);
            actions.extend(self.create(mount_point, group, quota).await?);
        }

        if actions.is_empty() {
            debug!(project = %project, "Project storage already present");
            Ok(ApplyOutcome::Unchanged)
        } else {
            Ok(ApplyOutcome::Applied { actions })
        }
    }
}
