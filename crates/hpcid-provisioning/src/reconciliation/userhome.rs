//! Home repair pass.
//!
//! Existing home directories of the cluster's ACL group members are checked
//! for ownership and an authorized SSH key. Up to the batch limit of the
//! unhealthy ones get the skeleton, a key pair and a recursive chown, and
//! in execute mode are checked again.

use tracing::{debug, error, info, info_span, warn, Instrument};

use hpcid_connector::error::ConnectorResult;
use hpcid_connector_storage::{HomeRepair, HomeState, Ownership};

use crate::registry::{Capability, CapabilitySet, ClientRegistry};

use super::engine::ReconciliationConfig;
use super::report::{PassKind, PassReport};

/// Repairs ownership and SSH keys of existing home directories.
#[derive(Debug)]
pub struct HomeRepairReconciler<'a> {
    registry: &'a ClientRegistry,
    config: ReconciliationConfig,
}

impl<'a> HomeRepairReconciler<'a> {
    pub fn new(registry: &'a ClientRegistry, config: ReconciliationConfig) -> Self {
        Self { registry, config }
    }

    pub fn capabilities() -> CapabilitySet {
        CapabilitySet::new()
            .with(Capability::Directory)
            .with(Capability::HomeRepair)
            .with(Capability::Notifier)
    }

    pub async fn run(&self) -> ConnectorResult<PassReport> {
        let report = PassReport::new(PassKind::HomeRepair, self.registry.is_dry_run());
        let span = info_span!(
            "home_repair",
            pass_id = %report.pass_id,
            cluster = %self.config.cluster,
            dry_run = report.dry_run,
        );
        self.run_pass(report).instrument(span).await
    }

    async fn run_pass(&self, mut report: PassReport) -> ConnectorResult<PassReport> {
        let repair = self.registry.home_repair()?;
        let directory = self.registry.directory()?;
        let acl_group = self.config.cluster.to_ascii_lowercase();
        let members = directory
            .resolver
            .resolve_members(&acl_group, &directory.acl_ou)
            .await?;
        debug!(group = %acl_group, members = members.len(), "Resolved cluster ACL group");

        let mut explore: Vec<(String, Ownership)> = Vec::new();
        for user in members {
            report.statistics.scanned += 1;
            match repair.inspect(&user).await {
                Ok(HomeState::Missing) => {
                    warn!(user = %user, "Home directory missing, run the nfs pass first");
                    report.statistics.ignored += 1;
                    let home = repair.home_path(&user);
                    report.record_warning(
                        &user,
                        format!("Home directory `{}` not found, skipped", home.display()),
                    );
                }
                Ok(HomeState::Linked) => {
                    debug!(user = %user, "Home directory is a symlink, skipped");
                    report.statistics.ignored += 1;
                }
                Ok(HomeState::Present(health)) if health.is_healthy() => {
                    report.statistics.ignored += 1;
                }
                Ok(HomeState::Present(health)) => {
                    if health.owner.is_root() {
                        debug!(user = %user, "Home belongs to root, likely never provisioned");
                    }
                    info!(user = %user, problems = ?health.problems(), "Home directory needs repair");
                    report.statistics.explored += 1;
                    explore.push((user, health.expected));
                }
                Err(e) => {
                    error!(user = %user, error = %e, error_code = e.error_code(), "Failed to inspect home directory");
                    report.record_failure(&user, e.to_string());
                }
            }
        }

        let limit = self.config.batch_limit.min(explore.len());
        let batch = &explore[..limit];
        for (user, owner) in batch {
            match repair.repair(user, *owner).await {
                Ok(actions) => {
                    report.statistics.converged += 1;
                    for action in actions {
                        report.record_action(action);
                    }
                }
                Err(e) => {
                    error!(user = %user, error = %e, error_code = e.error_code(), "Failed to repair home directory");
                    report.record_failure(user, e.to_string());
                }
            }
        }

        if !report.dry_run {
            let repaired: Vec<String> = batch
                .iter()
                .map(|(user, _)| user)
                .filter(|user| !report.is_failed(user.as_str()))
                .cloned()
                .collect();
            for user in repaired {
                self.verify(repair, &mut report, user).await;
            }
        }

        report.explore = explore
            .into_iter()
            .map(|(user, _)| user)
            .filter(|u| !report.succeeded.contains(u))
            .collect();
        report.finish();

        info!(
            scanned = report.statistics.scanned,
            repaired = report.statistics.converged,
            failed = report.failed.len(),
            remaining = report.explore.len(),
            "Home repair pass finished"
        );
        Ok(report)
    }

    async fn verify(&self, repair: &HomeRepair, report: &mut PassReport, user: String) {
        match repair.inspect(&user).await {
            Ok(HomeState::Present(health)) if health.is_healthy() => report.record_success(user),
            Ok(HomeState::Present(health)) => {
                let message = format!(
                    "Home `{}` still {}",
                    repair.home_path(&user).display(),
                    health.problems().join(", ")
                );
                report.record_failure(user, message);
            }
            Ok(_) => {
                let message = format!("Home `{}` disappeared during repair", repair.home_path(&user).display());
                report.record_failure(user, message);
            }
            Err(e) => report.record_failure(user, format!("verification failed: {e}")),
        }
    }
}
