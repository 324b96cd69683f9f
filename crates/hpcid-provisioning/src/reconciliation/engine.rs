//! Project provisioning engine.
//!
//! Walks `Scanning → Diffing → Converging → Verifying → Reporting` for the
//! eligible projects of one cluster. Dry-run goes through Converging as
//! well: every mutation is stopped at the command executor, so the planned
//! actions are produced by the same `apply` calls an execute run makes.
//! Verifying only runs in execute mode.

use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::{debug, error, info, info_span, warn, Instrument};

use hpcid_allocations::{AllocationSource, AllocationsConfig};
use hpcid_connector::error::ConnectorResult;
use hpcid_connector::traits::{BackendAdapter, Snapshot};
use hpcid_connector::types::{BackendState, DesiredState};

use crate::cluster::ClusterFamily;
use crate::registry::{Capability, CapabilitySet, ClientRegistry, DirectoryClient};

use super::report::{PassKind, PassReport};

/// Phases of a provisioning pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PassPhase {
    Scanning,
    Diffing,
    Converging,
    Verifying,
    Reporting,
}

impl PassPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            PassPhase::Scanning => "scanning",
            PassPhase::Diffing => "diffing",
            PassPhase::Converging => "converging",
            PassPhase::Verifying => "verifying",
            PassPhase::Reporting => "reporting",
        }
    }
}

impl fmt::Display for PassPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Configuration for a provisioning pass.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconciliationConfig {
    /// Cluster the pass runs for. Selects the cluster family.
    #[serde(default = "default_cluster")]
    pub cluster: String,
    /// Maximum number of mismatched items corrected per pass.
    #[serde(default = "default_batch_limit")]
    pub batch_limit: usize,
}

fn default_cluster() -> String {
    "m3".to_string()
}

fn default_batch_limit() -> usize {
    10
}

impl Default for ReconciliationConfig {
    fn default() -> Self {
        Self {
            cluster: default_cluster(),
            batch_limit: default_batch_limit(),
        }
    }
}

impl ReconciliationConfig {
    pub fn new(cluster: impl Into<String>, batch_limit: usize) -> Self {
        Self {
            cluster: cluster.into(),
            batch_limit,
        }
    }

    pub fn family(&self) -> ClusterFamily {
        ClusterFamily::from_cluster(&self.cluster)
    }
}

/// Desired state of one project on both backends.
#[derive(Debug, Clone)]
struct ProjectTarget {
    project: String,
    /// `None` when the project has no parent to create its account under.
    scheduler: Option<DesiredState>,
    storage: DesiredState,
}

/// Provisions scheduler accounts and project storage.
pub struct ReconciliationEngine<'a> {
    registry: &'a ClientRegistry,
    config: ReconciliationConfig,
}

impl<'a> ReconciliationEngine<'a> {
    pub fn new(registry: &'a ClientRegistry, config: ReconciliationConfig) -> Self {
        Self { registry, config }
    }

    /// Clients a provisioning pass needs.
    pub fn capabilities() -> CapabilitySet {
        CapabilitySet::new()
            .with(Capability::Allocations)
            .with(Capability::Directory)
            .with(Capability::Scheduler)
            .with(Capability::ProjectStorage)
            .with(Capability::Notifier)
    }

    pub fn config(&self) -> &ReconciliationConfig {
        &self.config
    }

    /// Run one pass.
    ///
    /// Connectivity and schema errors while scanning abort the pass. Any
    /// failure after that is recorded against its project.
    pub async fn run(&self) -> ConnectorResult<PassReport> {
        let report = PassReport::new(PassKind::ProvisionProject, self.registry.is_dry_run());
        let span = info_span!(
            "provision_project",
            pass_id = %report.pass_id,
            cluster = %self.config.cluster,
            dry_run = report.dry_run,
        );
        self.run_pass(report).instrument(span).await
    }

    async fn run_pass(&self, mut report: PassReport) -> ConnectorResult<PassReport> {
        let family = self.config.family();
        info!(family = %family, batch_limit = self.config.batch_limit, "Starting provisioning pass");

        debug!(phase = %PassPhase::Scanning, "Entering phase");
        let targets = self.scan(family, &mut report).await?;
        let codes: Vec<String> = targets.iter().map(|t| t.project.clone()).collect();
        let (scheduler_state, storage_state) = self.snapshot(&codes).await?;
        for (project, e) in &storage_state.errors {
            report.record_failure(project, format!("storage: {e}"));
        }

        debug!(phase = %PassPhase::Diffing, "Entering phase");
        let explore = self.diff(targets, &scheduler_state, &storage_state, &mut report);

        debug!(phase = %PassPhase::Converging, "Entering phase");
        let limit = self.config.batch_limit.min(explore.len());
        let batch = &explore[..limit];
        for target in batch {
            self.converge(target, &scheduler_state, &storage_state, &mut report)
                .await;
        }

        if !report.dry_run {
            debug!(phase = %PassPhase::Verifying, "Entering phase");
            self.verify(batch, &mut report).await;
        }

        debug!(phase = %PassPhase::Reporting, "Entering phase");
        report.explore = explore
            .iter()
            .map(|t| t.project.clone())
            .filter(|p| !report.succeeded.contains(p))
            .collect();
        report.finish();

        info!(
            scanned = report.statistics.scanned,
            ignored = report.statistics.ignored,
            explored = report.statistics.explored,
            converged = report.statistics.converged,
            succeeded = report.succeeded.len(),
            failed = report.failed.len(),
            warned = report.warned.len(),
            remaining = report.explore.len(),
            duration_ms = report.statistics.duration_ms,
            "Provisioning pass finished"
        );
        Ok(report)
    }

    /// Desired state for every eligible project, sorted by project code.
    async fn scan(
        &self,
        family: ClusterFamily,
        report: &mut PassReport,
    ) -> ConnectorResult<Vec<ProjectTarget>> {
        let allocations = self.registry.allocations()?;
        let quotas = self.registry.allocations_config()?;
        let directory = self.registry.directory()?;

        let mut projects = allocations
            .list_eligible_projects(family.parent_filter())
            .await?;
        projects.sort();
        debug!(projects = projects.len(), "Fetched eligible projects");

        let mut targets = Vec::with_capacity(projects.len());
        for project in projects {
            report.statistics.scanned += 1;
            match desired_state(&project, family, allocations, quotas, directory).await {
                Ok(target) => targets.push(target),
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    warn!(project = %project, error = %e, error_code = e.error_code(), "Failed to resolve desired state");
                    report.record_failure(&project, e.to_string());
                }
            }
        }
        Ok(targets)
    }

    /// Scheduler parents in one bulk query, then storage per project.
    async fn snapshot(&self, codes: &[String]) -> ConnectorResult<(Snapshot, Snapshot)> {
        let scheduler = self.registry.scheduler()?;
        let storage = self.registry.storage()?;
        for adapter in [scheduler as &dyn BackendAdapter, storage as &dyn BackendAdapter] {
            debug!(backend = %adapter.kind(), targets = ?adapter.list_targets(), "Fetching backend state");
        }
        Ok((scheduler.snapshot(codes).await?, storage.snapshot(codes).await?))
    }

    /// Split targets into ignored and explored. Returns the explore list.
    fn diff(
        &self,
        targets: Vec<ProjectTarget>,
        scheduler_state: &Snapshot,
        storage_state: &Snapshot,
        report: &mut PassReport,
    ) -> Vec<ProjectTarget> {
        let mut explore = Vec::new();

        for target in targets {
            if report.is_failed(&target.project) {
                continue;
            }
            let (Some(scheduler), Some(storage)) = (
                scheduler_state.get(&target.project),
                storage_state.get(&target.project),
            ) else {
                continue;
            };

            let scheduler_ok = match &target.scheduler {
                Some(desired) => scheduler.satisfies(desired),
                None => {
                    warn!(project = %target.project, "Project has no parent project, skipping slurm account");
                    report.record_warning(
                        &target.project,
                        format!("Project `{}` has no parent project", target.project),
                    );
                    true
                }
            };
            if !scheduler_ok {
                if let (
                    BackendState::Scheduler {
                        parent: Some(actual),
                    },
                    Some(DesiredState::Scheduler { parent: wanted }),
                ) = (scheduler, &target.scheduler)
                {
                    report.record_warning(
                        &target.project,
                        format!(
                            "Project `{}` has slurm parent `{actual}`, expected `{wanted}`",
                            target.project
                        ),
                    );
                }
            }
            let storage_ok = storage.satisfies(&target.storage);

            if scheduler_ok && storage_ok {
                debug!(project = %target.project, "Project provisioned");
                report.statistics.ignored += 1;
            } else {
                info!(
                    project = %target.project,
                    scheduler_ok,
                    missing = ?storage.missing_targets(),
                    "Project not provisioned"
                );
                report.statistics.explored += 1;
                explore.push(target);
            }
        }

        debug!(explore = explore.len(), ignore = report.statistics.ignored, "Diff complete");
        explore
    }

    /// Apply whichever backends are mismatched. Failures are recorded and
    /// stop further work on the project.
    async fn converge(
        &self,
        target: &ProjectTarget,
        scheduler_state: &Snapshot,
        storage_state: &Snapshot,
        report: &mut PassReport,
    ) {
        let project = target.project.as_str();
        let (scheduler, storage) = match (self.registry.scheduler(), self.registry.storage()) {
            (Ok(scheduler), Ok(storage)) => (scheduler, storage),
            (Err(e), _) | (_, Err(e)) => {
                report.record_failure(project, e.to_string());
                return;
            }
        };
        let steps: [(&dyn BackendAdapter, Option<&BackendState>, Option<&DesiredState>); 2] = [
            (scheduler, scheduler_state.get(project), target.scheduler.as_ref()),
            (storage, storage_state.get(project), Some(&target.storage)),
        ];

        for (backend, observed, desired) in steps {
            let Some(desired) = desired else {
                continue;
            };
            if observed.is_some_and(|state| state.satisfies(desired)) {
                continue;
            }
            match backend.apply(project, desired).await {
                Ok(outcome) => {
                    for action in outcome.actions() {
                        report.record_action(action.clone());
                    }
                }
                Err(e) => {
                    error!(
                        project = %project,
                        backend = %backend.kind(),
                        error = %e,
                        error_code = e.error_code(),
                        "Failed to provision project"
                    );
                    report.record_failure(project, format!("{}: {e}", backend.kind()));
                    return;
                }
            }
        }
        report.statistics.converged += 1;
    }

    /// Re-read the converged batch and classify each project.
    async fn verify(&self, batch: &[ProjectTarget], report: &mut PassReport) {
        let pending: Vec<&ProjectTarget> = batch
            .iter()
            .filter(|t| !report.is_failed(&t.project))
            .collect();
        if pending.is_empty() {
            return;
        }
        let codes: Vec<String> = pending.iter().map(|t| t.project.clone()).collect();

        let (scheduler_state, storage_state) = match self.snapshot(&codes).await {
            Ok(snapshots) => snapshots,
            Err(e) => {
                error!(error = %e, error_code = e.error_code(), "Verification failed");
                for code in &codes {
                    report.record_failure(code, format!("verification failed: {e}"));
                }
                return;
            }
        };

        for target in pending {
            let project = target.project.as_str();
            let scheduler = scheduler_state.get(project);
            let storage = storage_state.get(project);

            let scheduler_ok = match &target.scheduler {
                Some(desired) => scheduler.is_some_and(|s| s.satisfies(desired)),
                None => true,
            };
            if !scheduler_ok {
                report.record_failure(project, "scheduler: account missing or under another parent");
            } else if let Some(e) = storage_state.errors.get(project) {
                report.record_failure(project, format!("storage: {e}"));
            } else if let Some(state) = storage.filter(|s| !s.satisfies(&target.storage)) {
                report.record_failure(
                    project,
                    format!("storage: still missing on {}", state.missing_targets().join(", ")),
                );
            } else {
                info!(project = %project, "Project provisioned and verified");
                report.record_success(project);
            }
        }
    }
}

impl fmt::Debug for ReconciliationEngine<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReconciliationEngine")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

async fn desired_state(
    project: &str,
    family: ClusterFamily,
    allocations: &dyn AllocationSource,
    quotas: &AllocationsConfig,
    directory: &DirectoryClient,
) -> ConnectorResult<ProjectTarget> {
    let parent = allocations.get_parent(project).await?;
    let class = allocations.get_quota_class(project).await?;

    // The project group must exist before storage can be chgrp'd to it.
    let membership = directory
        .resolver
        .resolve(project, &directory.project_ou)
        .await?;
    debug!(
        project = %project,
        members = membership.users.len(),
        cycles = membership.cycles_detected,
        "Resolved project group"
    );

    let parent = family.effective_parent(&parent);
    Ok(ProjectTarget {
        project: project.to_string(),
        scheduler: (!parent.is_empty()).then_some(DesiredState::Scheduler { parent }),
        storage: DesiredState::Storage {
            group: project.to_string(),
            quotas: quotas.quota_for(class),
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_defaults() {
        let config: ReconciliationConfig = serde_yaml::from_str("{}").unwrap();
        assert_eq!(config.cluster, "m3");
        assert_eq!(config.batch_limit, 10);
        assert_eq!(config.family(), ClusterFamily::Registry);

        let config = ReconciliationConfig::new("cvl", 3);
        assert_eq!(config.family(), ClusterFamily::Cvl);
    }

    #[test]
    fn test_capabilities() {
        let caps = ReconciliationEngine::capabilities();
        assert!(caps.contains(Capability::Scheduler));
        assert!(caps.contains(Capability::ProjectStorage));
        assert!(!caps.contains(Capability::HomeLinks));
    }

    #[test]
    fn test_phase_names() {
        assert_eq!(PassPhase::Converging.to_string(), "converging");
        assert_eq!(PassPhase::Reporting.as_str(), "reporting");
    }
}
