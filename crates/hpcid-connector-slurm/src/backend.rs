//! Slurm accounting backend
//!
//! Implements [`BackendAdapter`] over `sacctmgr`. Observed state is read in
//! bulk (one query for every account) and corrective actions are additive:
//! accounts are created and users added, never removed.

use async_trait::async_trait;
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, info, instrument, warn};

use hpcid_connector::command::{CommandExecutor, CommandSpec};
use hpcid_connector::error::{ConnectorError, ConnectorResult};
use hpcid_connector::resilience::Pacer;
use hpcid_connector::traits::{BackendAdapter, Snapshot};
use hpcid_connector::types::{ApplyOutcome, BackendKind, BackendState, DesiredState};

use crate::config::SlurmConfig;
use crate::parse::{controller_is_up, parse_associations, parse_parent_map};

const PERSIST_CONN_FAILURE: &str = "slurm_persist_conn_open_without_init";

/// What `sacctmgr add` prints, exiting non-zero, when the entity exists.
const NOTHING_NEW_ADDED: &str = "Nothing new added";

/// Slurm accounting database backend.
pub struct SchedulerBackend {
    config: SlurmConfig,
    executor: CommandExecutor,
    cluster: Option<String>,
    pacer: Pacer,
}

impl SchedulerBackend {
    pub fn new(config: SlurmConfig, executor: CommandExecutor) -> ConnectorResult<Self> {
        config.validate()?;
        let executor = executor.with_timeout(config.command_timeout());
        let pacer = Pacer::new(config.add_user_delay());
        Ok(Self {
            config,
            executor,
            cluster: None,
            pacer,
        })
    }

    /// Scope association queries and user additions to one cluster.
    pub fn with_cluster(mut self, cluster: impl Into<String>) -> Self {
        self.cluster = Some(cluster.into());
        self
    }

    pub fn cluster(&self) -> Option<&str> {
        self.cluster.as_deref()
    }

    /// Whether an account is policy-excluded from membership corrections.
    pub fn is_excluded(&self, account: &str) -> bool {
        self.config.excluded_accounts.iter().any(|a| a == account)
    }

    fn sacctmgr_query(&self, args: &[&str]) -> CommandSpec {
        CommandSpec::query(self.config.sacctmgr(), args.iter().copied())
    }

    fn sacctmgr_mutation(&self, args: Vec<String>) -> CommandSpec {
        CommandSpec::mutation(self.config.sacctmgr(), args)
    }

    /// Run an `add` command. Returns `false` when sacctmgr reports the
    /// entity already exists.
    async fn run_add(&self, spec: &CommandSpec) -> ConnectorResult<bool> {
        let output = self.executor.run_unchecked(spec).await?;
        if output.success() {
            return Ok(true);
        }
        if output.stdout.contains(NOTHING_NEW_ADDED) || output.stderr.contains(NOTHING_NEW_ADDED) {
            debug!(command = %spec, "Nothing new added");
            return Ok(false);
        }
        Err(ConnectorError::BackendCommand {
            command: spec.to_string(),
            status: output.status,
            stderr: output.stderr.trim().to_string(),
        })
    }

    /// Check the controller and the accounting daemon both respond.
    #[instrument(skip(self))]
    pub async fn check_health(&self) -> ConnectorResult<()> {
        let ping = CommandSpec::query(self.config.scontrol(), ["ping"]);
        let output = self.executor.run_unchecked(&ping).await?;
        if !controller_is_up(&output.stdout) {
            return Err(ConnectorError::connection_failed(format!(
                "slurm controller is down: {}",
                output.stdout.trim()
            )));
        }

        let show = self.sacctmgr_query(&["show", "cluster", "--parsable2"]);
        let output = self.executor.run_unchecked(&show).await?;
        if !output.success()
            || output.stdout.contains(PERSIST_CONN_FAILURE)
            || output.stderr.contains(PERSIST_CONN_FAILURE)
        {
            return Err(ConnectorError::connection_failed(format!(
                "slurm accounting database unavailable: {}",
                output.stderr.trim()
            )));
        }

        debug!("Slurm controller and accounting daemon are up");
        Ok(())
    }

    /// Parent of every account, in one query.
    #[instrument(skip(self))]
    pub async fn parent_map(&self) -> ConnectorResult<BTreeMap<String, String>> {
        let spec = self.sacctmgr_query(&["show", "assoc", "format=parentname,account", "--parsable2"]);
        let output = self.executor.run(&spec).await?;
        let parents = parse_parent_map(&spec.to_string(), &output.stdout)?;
        debug!(accounts = parents.len(), "Fetched slurm account parents");
        Ok(parents)
    }

    /// Parent of one account, `None` when the account is absent.
    pub async fn account_parent(&self, account: &str) -> ConnectorResult<Option<String>> {
        let filter = format!("account={account}");
        let spec = self.sacctmgr_query(&[
            "show",
            "assoc",
            "where",
            &filter,
            "format=parentname,account",
            "--parsable2",
        ]);
        let output = self.executor.run(&spec).await?;
        let parents = parse_parent_map(&spec.to_string(), &output.stdout)?;
        Ok(parents.get(account).cloned())
    }

    /// Users associated with each account on the configured cluster, in one
    /// query.
    #[instrument(skip(self), fields(cluster = ?self.cluster))]
    pub async fn cluster_associations(&self) -> ConnectorResult<BTreeMap<String, BTreeSet<String>>> {
        let mut args: Vec<String> = vec!["show".into(), "associations".into()];
        if let Some(cluster) = &self.cluster {
            args.push("where".into());
            args.push(format!("cluster={cluster}"));
        }
        args.push("format=account,user".into());
        args.push("--parsable2".into());

        let spec = CommandSpec::query(self.config.sacctmgr(), args);
        let output = self.executor.run(&spec).await?;
        let associations = parse_associations(&spec.to_string(), &output.stdout)?;
        debug!(accounts = associations.len(), "Fetched slurm associations");
        Ok(associations)
    }

    /// Create an account under `parent`.
    ///
    /// An empty parent is a no-op. An account already under `parent` is
    /// unchanged; one under a different parent is rejected since the account
    /// would have to be moved.
    #[instrument(skip(self))]
    pub async fn create_account(&self, account: &str, parent: &str) -> ConnectorResult<ApplyOutcome> {
        if parent.trim().is_empty() {
            warn!(account = %account, "No parent for slurm account, not creating");
            return Ok(ApplyOutcome::Unchanged);
        }

        match self.account_parent(account).await? {
            Some(existing) if existing == parent => return Ok(ApplyOutcome::Unchanged),
            Some(existing) => {
                return Err(ConnectorError::Rejected {
                    backend: "slurm".to_string(),
                    target: account.to_string(),
                    message: format!("account exists under parent `{existing}`, not `{parent}`"),
                })
            }
            None => {}
        }

        let spec = self.sacctmgr_mutation(vec![
            "-i".into(),
            "add".into(),
            "account".into(),
            account.into(),
            format!("parent={parent}"),
            format!("Organization={}", self.config.organization),
            "set".into(),
            format!("fairshare={}", self.config.fairshare),
        ]);
        if !self.run_add(&spec).await? {
            info!(account = %account, "Slurm account created concurrently");
            return Ok(ApplyOutcome::Unchanged);
        }

        let action = format!("Created slurm account `{account}` with parent `{parent}`");
        info!(account = %account, parent = %parent, dry_run = self.executor.is_dry_run(), "{action}");
        Ok(ApplyOutcome::Applied {
            actions: vec![action],
        })
    }

    /// Associate a user with an account, pacing successive additions.
    #[instrument(skip(self))]
    pub async fn add_user(&self, account: &str, user: &str) -> ConnectorResult<String> {
        if self.is_excluded(account) {
            return Err(ConnectorError::Rejected {
                backend: "slurm".to_string(),
                target: account.to_string(),
                message: "account is excluded from membership changes".to_string(),
            });
        }

        if !self.executor.is_dry_run() {
            self.pacer.pace().await;
        }

        let mut args: Vec<String> = vec![
            "-i".into(),
            "add".into(),
            "user".into(),
            format!("name={user}"),
            format!("account={account}"),
        ];
        if let Some(cluster) = &self.cluster {
            args.push(format!("cluster={cluster}"));
        }
        if !self.run_add(&self.sacctmgr_mutation(args)).await? {
            let note = format!("User `{user}` already in slurm account `{account}`");
            info!(account = %account, user = %user, "{note}");
            return Ok(note);
        }

        let action = format!("Added user `{user}` to slurm account `{account}`");
        info!(account = %account, user = %user, dry_run = self.executor.is_dry_run(), "{action}");
        Ok(action)
    }
}

#[async_trait]
impl BackendAdapter for SchedulerBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Scheduler
    }

    fn list_targets(&self) -> Vec<String> {
        vec![match &self.cluster {
            Some(cluster) => format!("slurm:{cluster}"),
            None => "slurm".to_string(),
        }]
    }

    async fn current_assignment(&self, project: &str) -> ConnectorResult<BackendState> {
        Ok(BackendState::Scheduler {
            parent: self.account_parent(project).await?,
        })
    }

    /// One bulk query for every project. Failure here leaves the pass with
    /// no actual state, so it is reported as a connectivity failure.
    async fn snapshot(&self, projects: &[String]) -> ConnectorResult<Snapshot> {
        let parents = self.parent_map().await.map_err(|e| {
            if e.is_fatal() {
                e
            } else {
                ConnectorError::connection_failed_with_source("slurm bulk parent query failed", e)
            }
        })?;

        let mut snapshot = Snapshot::default();
        for project in projects {
            snapshot.states.insert(
                project.clone(),
                BackendState::Scheduler {
                    parent: parents.get(project).cloned(),
                },
            );
        }
        Ok(snapshot)
    }

    async fn apply(&self, project: &str, desired: &DesiredState) -> ConnectorResult<ApplyOutcome> {
        match desired {
            DesiredState::Scheduler { parent } => self.create_account(project, parent).await,
            other => Err(ConnectorError::InvalidData {
                message: format!("scheduler backend cannot apply {} state", other.kind()),
            }),
        }
    }
}

impl std::fmt::Debug for SchedulerBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SchedulerBackend")
            .field("cluster", &self.cluster)
            .field("executor", &self.executor)
            .finish()
    }
}
