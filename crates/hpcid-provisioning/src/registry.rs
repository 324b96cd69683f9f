//! Capability-based client registry
//!
//! A pass declares the capabilities it needs as a [`CapabilitySet`]. The
//! registry loads the matching configuration files and builds each client
//! exactly once before the pass starts, so a misconfigured backend stops the
//! run at startup instead of halfway through. The registry is owned by the
//! caller and passed to each pass by reference.

use std::collections::BTreeSet;
use std::fmt;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, instrument};

use hpcid_allocations::{AllocationSource, AllocationsConfig, SheetsAllocationSource};
use hpcid_connector::command::CommandExecutor;
use hpcid_connector::error::{ConnectorError, ConnectorResult};
use hpcid_connector_ldap::{DirectoryResolver, LdapConfig, LdapDirectory};
use hpcid_connector_slurm::SchedulerBackend;
use hpcid_connector_storage::{
    current_hostname, HomeDirectories, HomeLinks, HomeRepair, StorageBackend, StorageConfig,
};
use hpcid_notify::{LogReporter, OutcomeReporter, SlackReporter};

use crate::cluster::ClusterFamily;
use crate::settings::ConfigDir;

/// Default bound on an external command; each backend replaces it with its
/// configured timeout.
const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(60);

/// A client a pass can ask for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Capability {
    Allocations,
    Directory,
    Scheduler,
    ProjectStorage,
    HomeLinks,
    HomeDirectories,
    HomeRepair,
    Notifier,
}

impl Capability {
    pub fn as_str(&self) -> &'static str {
        match self {
            Capability::Allocations => "allocations",
            Capability::Directory => "directory",
            Capability::Scheduler => "scheduler",
            Capability::ProjectStorage => "project_storage",
            Capability::HomeLinks => "home_links",
            Capability::HomeDirectories => "home_directories",
            Capability::HomeRepair => "home_repair",
            Capability::Notifier => "notifier",
        }
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// The capabilities one pass requests.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CapabilitySet(BTreeSet<Capability>);

impl CapabilitySet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, capability: Capability) -> Self {
        self.0.insert(capability);
        self
    }

    pub fn insert(&mut self, capability: Capability) {
        self.0.insert(capability);
    }

    pub fn contains(&self, capability: Capability) -> bool {
        self.0.contains(&capability)
    }

    pub fn iter(&self) -> impl Iterator<Item = Capability> + '_ {
        self.0.iter().copied()
    }

    /// Union of two sets.
    pub fn union(mut self, other: &CapabilitySet) -> Self {
        self.0.extend(other.iter());
        self
    }
}

impl FromIterator<Capability> for CapabilitySet {
    fn from_iter<I: IntoIterator<Item = Capability>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// Whether corrective commands are executed or only logged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RunMode {
    Execute,
    #[default]
    DryRun,
}

impl RunMode {
    pub fn from_execute(execute: bool) -> Self {
        if execute {
            RunMode::Execute
        } else {
            RunMode::DryRun
        }
    }

    pub fn is_dry_run(&self) -> bool {
        matches!(self, RunMode::DryRun)
    }
}

/// Directory resolver plus the organizational units passes search in.
#[derive(Debug, Clone)]
pub struct DirectoryClient {
    pub resolver: DirectoryResolver,
    pub project_ou: String,
    pub acl_ou: String,
}

impl DirectoryClient {
    pub fn new(resolver: DirectoryResolver, project_ou: impl Into<String>, acl_ou: impl Into<String>) -> Self {
        Self {
            resolver,
            project_ou: project_ou.into(),
            acl_ou: acl_ou.into(),
        }
    }

    pub fn from_config(config: &LdapConfig) -> ConnectorResult<Self> {
        let directory = Arc::new(LdapDirectory::new(config.clone())?);
        Ok(Self::new(
            DirectoryResolver::from_config(directory, config),
            config.project_ou.clone(),
            config.acl_ou.clone(),
        ))
    }
}

/// Clients for one run, built up front from the configuration directory.
pub struct ClientRegistry {
    mode: RunMode,
    cluster: String,
    capabilities: CapabilitySet,
    allocations: Option<Arc<dyn AllocationSource>>,
    allocations_config: Option<AllocationsConfig>,
    directory: Option<DirectoryClient>,
    scheduler: Option<SchedulerBackend>,
    storage: Option<StorageBackend>,
    home_links: Option<HomeLinks>,
    home_directories: Option<HomeDirectories>,
    home_repair: Option<HomeRepair>,
    reporter: Option<Arc<dyn OutcomeReporter>>,
}

impl ClientRegistry {
    /// An empty registry. Clients are added with the `with_*` methods.
    pub fn new(mode: RunMode, cluster: impl Into<String>) -> Self {
        Self {
            mode,
            cluster: cluster.into(),
            capabilities: CapabilitySet::new(),
            allocations: None,
            allocations_config: None,
            directory: None,
            scheduler: None,
            storage: None,
            home_links: None,
            home_directories: None,
            home_repair: None,
            reporter: None,
        }
    }

    /// Load configuration for and construct every requested capability.
    #[instrument(skip(config_dir, capabilities), fields(config_dir = %config_dir.display()))]
    pub fn build(
        config_dir: &Path,
        capabilities: &CapabilitySet,
        mode: RunMode,
        cluster: &str,
    ) -> ConnectorResult<Self> {
        let dir = ConfigDir::new(config_dir);
        let executor = CommandExecutor::system(mode.is_dry_run(), DEFAULT_COMMAND_TIMEOUT);
        let mut registry = Self::new(mode, cluster);
        let mut storage_config: Option<StorageConfig> = None;

        for capability in capabilities.iter() {
            debug!(capability = %capability, "Building client");
            registry = match capability {
                Capability::Allocations => {
                    let config = dir.allocations()?;
                    let source = SheetsAllocationSource::from_config(&config)?;
                    registry.with_allocations(Arc::new(source), config)
                }
                Capability::Directory => {
                    registry.with_directory(DirectoryClient::from_config(&dir.ldap()?)?)
                }
                Capability::Scheduler => {
                    let backend = SchedulerBackend::new(dir.slurm()?, executor.clone())?
                        .with_cluster(cluster.to_ascii_lowercase());
                    registry.with_scheduler(backend)
                }
                Capability::ProjectStorage => {
                    let config = match storage_config.take() {
                        Some(config) => config,
                        None => dir.storage()?,
                    };
                    storage_config = Some(config.clone());
                    registry.with_storage(StorageBackend::new(config, executor.clone())?)
                }
                Capability::HomeLinks => {
                    let config = match storage_config.take() {
                        Some(config) => config,
                        None => dir.storage()?,
                    };
                    let links = HomeLinks::new(&config, executor.clone())?;
                    storage_config = Some(config);
                    registry.with_home_links(links)
                }
                Capability::HomeDirectories => {
                    registry.with_home_directories(HomeDirectories::new(dir.homedirs()?, executor.clone())?)
                }
                Capability::HomeRepair => {
                    let config = match storage_config.take() {
                        Some(config) => config,
                        None => dir.storage()?,
                    };
                    let repair = HomeRepair::new(&config, executor.clone())?;
                    storage_config = Some(config);
                    registry.with_home_repair(repair)
                }
                Capability::Notifier => {
                    let reporter: Arc<dyn OutcomeReporter> = match dir.slack()? {
                        Some(config) => {
                            let sender = current_hostname().unwrap_or_else(|_| "hpcid".to_string());
                            Arc::new(SlackReporter::new(&config, &sender)?)
                        }
                        None => {
                            info!("No slack.yml, reporting to the log only");
                            Arc::new(LogReporter)
                        }
                    };
                    registry.with_reporter(reporter)
                }
            };
        }

        Ok(registry)
    }

    pub fn with_allocations(mut self, source: Arc<dyn AllocationSource>, config: AllocationsConfig) -> Self {
        self.allocations = Some(source);
        self.allocations_config = Some(config);
        self.capabilities.insert(Capability::Allocations);
        self
    }

    pub fn with_directory(mut self, directory: DirectoryClient) -> Self {
        self.directory = Some(directory);
        self.capabilities.insert(Capability::Directory);
        self
    }

    pub fn with_scheduler(mut self, scheduler: SchedulerBackend) -> Self {
        self.scheduler = Some(scheduler);
        self.capabilities.insert(Capability::Scheduler);
        self
    }

    pub fn with_storage(mut self, storage: StorageBackend) -> Self {
        self.storage = Some(storage);
        self.capabilities.insert(Capability::ProjectStorage);
        self
    }

    pub fn with_home_links(mut self, links: HomeLinks) -> Self {
        self.home_links = Some(links);
        self.capabilities.insert(Capability::HomeLinks);
        self
    }

    pub fn with_home_directories(mut self, homes: HomeDirectories) -> Self {
        self.home_directories = Some(homes);
        self.capabilities.insert(Capability::HomeDirectories);
        self
    }

    pub fn with_home_repair(mut self, repair: HomeRepair) -> Self {
        self.home_repair = Some(repair);
        self.capabilities.insert(Capability::HomeRepair);
        self
    }

    pub fn with_reporter(mut self, reporter: Arc<dyn OutcomeReporter>) -> Self {
        self.reporter = Some(reporter);
        self.capabilities.insert(Capability::Notifier);
        self
    }

    pub fn mode(&self) -> RunMode {
        self.mode
    }

    pub fn is_dry_run(&self) -> bool {
        self.mode.is_dry_run()
    }

    pub fn cluster(&self) -> &str {
        &self.cluster
    }

    pub fn family(&self) -> ClusterFamily {
        ClusterFamily::from_cluster(&self.cluster)
    }

    pub fn capabilities(&self) -> &CapabilitySet {
        &self.capabilities
    }

    /// Fail unless every capability in `required` is present.
    pub fn require(&self, required: &CapabilitySet) -> ConnectorResult<()> {
        match required.iter().find(|c| !self.capabilities.contains(*c)) {
            Some(missing) => Err(not_requested(missing)),
            None => Ok(()),
        }
    }

    pub fn allocations(&self) -> ConnectorResult<&dyn AllocationSource> {
        self.allocations
            .as_deref()
            .ok_or_else(|| not_requested(Capability::Allocations))
    }

    pub fn allocations_config(&self) -> ConnectorResult<&AllocationsConfig> {
        self.allocations_config
            .as_ref()
            .ok_or_else(|| not_requested(Capability::Allocations))
    }

    pub fn directory(&self) -> ConnectorResult<&DirectoryClient> {
        self.directory
            .as_ref()
            .ok_or_else(|| not_requested(Capability::Directory))
    }

    pub fn scheduler(&self) -> ConnectorResult<&SchedulerBackend> {
        self.scheduler
            .as_ref()
            .ok_or_else(|| not_requested(Capability::Scheduler))
    }

    pub fn storage(&self) -> ConnectorResult<&StorageBackend> {
        self.storage
            .as_ref()
            .ok_or_else(|| not_requested(Capability::ProjectStorage))
    }

    pub fn home_links(&self) -> ConnectorResult<&HomeLinks> {
        self.home_links
            .as_ref()
            .ok_or_else(|| not_requested(Capability::HomeLinks))
    }

    pub fn home_directories(&self) -> ConnectorResult<&HomeDirectories> {
        self.home_directories
            .as_ref()
            .ok_or_else(|| not_requested(Capability::HomeDirectories))
    }

    pub fn home_repair(&self) -> ConnectorResult<&HomeRepair> {
        self.home_repair
            .as_ref()
            .ok_or_else(|| not_requested(Capability::HomeRepair))
    }

    pub fn reporter(&self) -> ConnectorResult<&dyn OutcomeReporter> {
        self.reporter
            .as_deref()
            .ok_or_else(|| not_requested(Capability::Notifier))
    }
}

fn not_requested(capability: Capability) -> ConnectorError {
    ConnectorError::invalid_config(format!(
        "capability `{capability}` was not requested for this pass"
    ))
}

impl fmt::Debug for ClientRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientRegistry")
            .field("mode", &self.mode)
            .field("cluster", &self.cluster)
            .field("capabilities", &self.capabilities)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::{SLURM_FILE, STORAGE_FILE};

    #[test]
    fn test_capability_set() {
        let set = CapabilitySet::new()
            .with(Capability::Scheduler)
            .with(Capability::Directory)
            .with(Capability::Scheduler);
        assert_eq!(set.iter().count(), 2);
        assert!(set.contains(Capability::Directory));
        assert!(!set.contains(Capability::Notifier));

        let both = set.union(&[Capability::Notifier].into_iter().collect());
        assert!(both.contains(Capability::Notifier));
    }

    #[test]
    fn test_unrequested_capability_is_config_error() {
        let registry = ClientRegistry::new(RunMode::DryRun, "m3").with_reporter(Arc::new(LogReporter));

        assert!(registry.reporter().is_ok());
        let err = registry.scheduler().unwrap_err();
        assert_eq!(err.error_code(), "INVALID_CONFIG");
        assert!(err.to_string().contains("scheduler"));

        let required = CapabilitySet::new().with(Capability::Notifier).with(Capability::HomeLinks);
        assert!(registry.require(&required).is_err());
    }

    #[test]
    fn test_build_from_config_dir() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(tmp.path().join(SLURM_FILE), "slurm_base: /opt/slurm/bin\n").unwrap();
        std::fs::write(tmp.path().join(STORAGE_FILE), "mount_points: [/projects]\n").unwrap();

        let capabilities = CapabilitySet::new()
            .with(Capability::Scheduler)
            .with(Capability::ProjectStorage)
            .with(Capability::HomeLinks)
            .with(Capability::HomeRepair)
            .with(Capability::Notifier);
        let registry = ClientRegistry::build(tmp.path(), &capabilities, RunMode::DryRun, "M3").unwrap();

        assert!(registry.is_dry_run());
        assert_eq!(registry.family(), ClusterFamily::Registry);
        assert_eq!(registry.scheduler().unwrap().cluster(), Some("m3"));
        assert_eq!(registry.storage().unwrap().mount_points().len(), 1);
        assert!(registry.home_links().is_ok());
        assert!(registry.home_repair().is_ok());
        assert!(registry.reporter().is_ok());
        assert!(registry.directory().is_err());
    }

    #[test]
    fn test_build_fails_on_missing_config() {
        let tmp = tempfile::tempdir().unwrap();
        let capabilities = CapabilitySet::new().with(Capability::HomeDirectories);
        let err = ClientRegistry::build(tmp.path(), &capabilities, RunMode::Execute, "monarch").unwrap_err();
        assert_eq!(err.error_code(), "INVALID_CONFIG");
    }
}
