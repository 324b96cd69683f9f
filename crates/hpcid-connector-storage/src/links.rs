//! Project links in user home directories
//!
//! Every member of a project gets `<home_root>/<user>/<project>` pointing at
//! the project's directory on each storage location. Links on scratch
//! locations carry a `_scratch` suffix. Existing links are never replaced.

use std::os::unix::fs::MetadataExt;
use std::path::{Path, PathBuf};
use tracing::{debug, info, instrument, warn};

use hpcid_connector::command::{CommandExecutor, CommandSpec};
use hpcid_connector::error::{ConnectorError, ConnectorResult};

use crate::config::StorageConfig;

/// What happened to one user's links for one project.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LinkOutcome {
    /// Links created (or that would be created, in dry-run).
    pub created: Vec<PathBuf>,
    /// Existing paths left alone because they look wrong.
    pub warnings: Vec<String>,
    /// The user's home directory does not exist; nothing was attempted.
    pub home_missing: bool,
}

impl LinkOutcome {
    pub fn is_noop(&self) -> bool {
        self.created.is_empty() && self.warnings.is_empty() && !self.home_missing
    }
}

/// Maintains project links under the home root.
#[derive(Debug)]
pub struct HomeLinks {
    home_root: PathBuf,
    locations: Vec<PathBuf>,
    excluded: Vec<String>,
    expected_owner: (u32, u32),
    executor: CommandExecutor,
}

impl HomeLinks {
    pub fn new(config: &StorageConfig, executor: CommandExecutor) -> ConnectorResult<Self> {
        config.validate()?;
        Ok(Self {
            home_root: config.home_root.clone(),
            locations: config.mount_points.clone(),
            excluded: config.link_excluded_accounts.clone(),
            expected_owner: (0, 0),
            executor: executor.with_timeout(config.command_timeout()),
        })
    }

    /// Owner (uid, gid) an existing link must have. Defaults to `root:root`.
    pub fn with_expected_owner(mut self, uid: u32, gid: u32) -> Self {
        self.expected_owner = (uid, gid);
        self
    }

    pub fn is_excluded(&self, project: &str) -> bool {
        self.excluded.iter().any(|p| p == project)
    }

    pub fn home_dir(&self, user: &str) -> PathBuf {
        self.home_root.join(user)
    }

    /// Link path for one project location.
    pub fn link_path(&self, user: &str, project: &str, location: &Path) -> PathBuf {
        let name = if location.to_string_lossy().contains("/scratch") {
            format!("{project}_scratch")
        } else {
            project.to_string()
        };
        self.home_dir(user).join(name)
    }

    /// Create whichever of the user's links to `project` are missing.
    pub async fn ensure_links(&self, project: &str, user: &str) -> ConnectorResult<LinkOutcome> {
        let locations: Vec<&Path> = self.locations.iter().map(PathBuf::as_path).collect();
        self.ensure_links_in(project, user, &locations).await
    }

    /// Like [`HomeLinks::ensure_links`], for a subset of the locations.
    #[instrument(skip(self, locations))]
    pub async fn ensure_links_in(
        &self,
        project: &str,
        user: &str,
        locations: &[&Path],
    ) -> ConnectorResult<LinkOutcome> {
        let mut outcome = LinkOutcome::default();

        if !path_exists(&self.home_dir(user)).await? {
            warn!(user = %user, "Home directory missing, not creating links");
            outcome.home_missing = true;
            return Ok(outcome);
        }

        for location in locations.iter().copied() {
            let target = location.join(project);
            let link = self.link_path(user, project, location);

            match tokio::fs::symlink_metadata(&link).await {
                Ok(meta) if meta.file_type().is_symlink() => {
                    if (meta.uid(), meta.gid()) != self.expected_owner {
                        debug!(link = %link.display(), uid = meta.uid(), gid = meta.gid(), "Link has unexpected owner");
                        outcome.warnings.push(format!(
                            "Symlink not owned by `root:root` `{}`",
                            link.display()
                        ));
                    }
                }
                Ok(_) => {
                    outcome.warnings.push(format!(
                        "Path exists and is not a symlink `{}`",
                        link.display()
                    ));
                }
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                    let target_str = target.to_string_lossy().into_owned();
                    let link_str = link.to_string_lossy().into_owned();
                    self.executor
                        .run(&CommandSpec::mutation(
                            "/bin/ln",
                            ["-s", target_str.as_str(), link_str.as_str()],
                        ))
                        .await?;
                    info!(link = %link_str, target = %target_str, dry_run = self.executor.is_dry_run(), "Created project link");
                    outcome.created.push(link);
                }
                Err(e) => {
                    return Err(ConnectorError::io(format!("lstat {}", link.display()), e));
                }
            }
        }

        Ok(outcome)
    }
}

/// Whether anything, including a dangling symlink, exists at `path`.
pub(crate) async fn path_exists(path: &Path) -> ConnectorResult<bool> {
    match tokio::fs::symlink_metadata(path).await {
        Ok(_) => Ok(true),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(ConnectorError::io(format!("lstat {}", path.display()), e)),
    }
}
