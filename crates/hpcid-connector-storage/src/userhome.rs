//! Home directory repair.
//!
//! A healthy home is owned by its user and carries an SSH key pair whose
//! public half is listed in `~/.ssh/authorized_keys`, so the user can reach
//! compute nodes. Homes that are symlinks (to another filesystem) are left
//! alone.

use std::collections::BTreeSet;
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::{debug, info, instrument};

use hpcid_connector::command::{CommandExecutor, CommandSpec};
use hpcid_connector::error::{ConnectorError, ConnectorResult};

use crate::config::StorageConfig;
use crate::links::path_exists;

/// Numeric owner of a path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ownership {
    pub uid: u32,
    pub gid: u32,
}

impl Ownership {
    pub fn new(uid: u32, gid: u32) -> Self {
        Self { uid, gid }
    }

    pub fn is_root(&self) -> bool {
        self.uid == 0 && self.gid == 0
    }
}

impl fmt::Display for Ownership {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.uid, self.gid)
    }
}

/// What was found at a user's home path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HomeState {
    /// Nothing at the path. Creating homes is the NFS pass's job.
    Missing,
    /// The home is a symlink and is not inspected further.
    Linked,
    Present(HomeHealth),
}

/// Ownership and key state of an existing home directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HomeHealth {
    pub owner: Ownership,
    pub expected: Ownership,
    /// The user's public key is listed in `authorized_keys`.
    pub keys_authorized: bool,
}

impl HomeHealth {
    pub fn owner_ok(&self) -> bool {
        self.owner == self.expected
    }

    pub fn is_healthy(&self) -> bool {
        self.owner_ok() && self.keys_authorized
    }

    /// Human-readable list of what is wrong, empty when healthy.
    pub fn problems(&self) -> Vec<String> {
        let mut problems = Vec::new();
        if !self.owner_ok() {
            problems.push(format!("owned by {}, expected {}", self.owner, self.expected));
        }
        if !self.keys_authorized {
            problems.push("ssh key not in authorized_keys".to_string());
        }
        problems
    }
}

/// Inspects and repairs home directories under the home root.
#[derive(Debug)]
pub struct HomeRepair {
    home_root: PathBuf,
    skeleton_dir: PathBuf,
    executor: CommandExecutor,
}

impl HomeRepair {
    pub fn new(config: &StorageConfig, executor: CommandExecutor) -> ConnectorResult<Self> {
        config.validate()?;
        Ok(Self {
            home_root: config.home_root.clone(),
            skeleton_dir: config.skeleton_dir.clone(),
            executor: executor.with_timeout(config.command_timeout()),
        })
    }

    pub fn home_path(&self, user: &str) -> PathBuf {
        self.home_root.join(user)
    }

    fn ssh_dir(&self, user: &str) -> PathBuf {
        self.home_path(user).join(".ssh")
    }

    /// Look up the user's uid and primary gid.
    pub async fn expected_owner(&self, user: &str) -> ConnectorResult<Ownership> {
        let uid = self.id_number("-u", user).await?;
        let gid = self.id_number("-g", user).await?;
        Ok(Ownership::new(uid, gid))
    }

    async fn id_number(&self, flag: &str, user: &str) -> ConnectorResult<u32> {
        let spec = CommandSpec::query("/usr/bin/id", [flag, user]);
        let output = self.executor.run(&spec).await?;
        output
            .stdout
            .trim()
            .parse()
            .map_err(|_| ConnectorError::UnexpectedOutput {
                command: spec.to_string(),
                message: format!("expected a number, got `{}`", output.stdout.trim()),
            })
    }

    /// Current owner of `path`.
    pub async fn owner_of(&self, path: &Path) -> ConnectorResult<Ownership> {
        let path_str = path.to_string_lossy().into_owned();
        let spec = CommandSpec::query("/usr/bin/stat", ["-c", "%u:%g", path_str.as_str()]);
        let output = self.executor.run(&spec).await?;
        parse_ownership(output.stdout.trim()).ok_or_else(|| ConnectorError::UnexpectedOutput {
            command: spec.to_string(),
            message: format!("expected uid:gid, got `{}`", output.stdout.trim()),
        })
    }

    /// Whether a line of `id_rsa.pub` also appears in `authorized_keys`.
    pub async fn keys_authorized(&self, user: &str) -> ConnectorResult<bool> {
        let ssh = self.ssh_dir(user);
        let Some(public) = read_optional(&ssh.join("id_rsa.pub")).await? else {
            return Ok(false);
        };
        let Some(authorized) = read_optional(&ssh.join("authorized_keys")).await? else {
            return Ok(false);
        };
        let authorized: BTreeSet<&str> = authorized.lines().map(str::trim).collect();
        Ok(public
            .lines()
            .map(str::trim)
            .any(|key| !key.is_empty() && authorized.contains(key)))
    }

    #[instrument(skip(self))]
    pub async fn inspect(&self, user: &str) -> ConnectorResult<HomeState> {
        let home = self.home_path(user);
        match tokio::fs::symlink_metadata(&home).await {
            Ok(meta) if meta.file_type().is_symlink() => return Ok(HomeState::Linked),
            Ok(_) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(HomeState::Missing),
            Err(e) => return Err(ConnectorError::io(format!("lstat {}", home.display()), e)),
        }

        let health = HomeHealth {
            owner: self.owner_of(&home).await?,
            expected: self.expected_owner(user).await?,
            keys_authorized: self.keys_authorized(user).await?,
        };
        debug!(user = %user, owner = %health.owner, expected = %health.expected, keys = health.keys_authorized, "Inspected home directory");
        Ok(HomeState::Present(health))
    }

    /// Copy missing skeleton files, close the home to other users, set up
    /// the SSH key pair and hand everything to `owner`.
    #[instrument(skip(self, owner), fields(owner = %owner))]
    pub async fn repair(&self, user: &str, owner: Ownership) -> ConnectorResult<Vec<String>> {
        let home = self.home_path(user);
        let home_str = home.to_string_lossy().into_owned();
        let mut actions = Vec::new();

        // Trailing slash copies the skeleton's contents, not the directory.
        let skeleton = format!("{}/", self.skeleton_dir.display());
        self.mutate("/usr/bin/rsync", ["-a", "--ignore-existing", skeleton.as_str(), home_str.as_str()])
            .await?;
        self.mutate("/bin/chmod", ["700", home_str.as_str()]).await?;
        actions.push(format!("Copied skeleton into `{home_str}`"));

        actions.extend(self.ensure_keys(user).await?);

        let owner_str = owner.to_string();
        self.mutate("/bin/chown", ["-R", owner_str.as_str(), home_str.as_str()])
            .await?;
        actions.push(format!("Set owner of `{home_str}` to `{owner_str}`"));

        info!(user = %user, home = %home_str, dry_run = self.executor.is_dry_run(), "Repaired home directory");
        Ok(actions)
    }

    async fn ensure_keys(&self, user: &str) -> ConnectorResult<Vec<String>> {
        let ssh = self.ssh_dir(user);
        let private = ssh.join("id_rsa");
        let private_str = private.to_string_lossy().into_owned();
        let mut actions = Vec::new();

        if !path_exists(&ssh).await? {
            self.mutate("/bin/mkdir", [ssh.to_string_lossy().into_owned()]).await?;
        }

        if !path_exists(&private).await? {
            self.mutate(
                "/usr/bin/ssh-keygen",
                ["-q", "-t", "rsa", "-N", "", "-f", private_str.as_str()],
            )
            .await?;
            actions.push(format!("Generated ssh key `{private_str}`"));
        }

        if !self.keys_authorized(user).await? {
            let public = format!("{private_str}.pub");
            let authorized = ssh.join("authorized_keys").to_string_lossy().into_owned();
            self.mutate(
                "/bin/sh",
                ["-c", r#"cat "$1" >> "$2""#, "sh", public.as_str(), authorized.as_str()],
            )
            .await?;
            actions.push(format!("Authorized ssh key in `{authorized}`"));
        } else {
            debug!(user = %user, "Key already authorized");
        }

        Ok(actions)
    }

    async fn mutate<I, S>(&self, program: &str, args: I) -> ConnectorResult<()>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.executor.run(&CommandSpec::mutation(program, args)).await?;
        Ok(())
    }
}

fn parse_ownership(text: &str) -> Option<Ownership> {
    let (uid, gid) = text.split_once(':')?;
    Some(Ownership::new(uid.parse().ok()?, gid.parse().ok()?))
}

async fn read_optional(path: &Path) -> ConnectorResult<Option<String>> {
    match tokio::fs::read_to_string(path).await {
        Ok(contents) => Ok(Some(contents)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(ConnectorError::io(format!("reading {}", path.display()), e)),
    }
}
