//! User-to-account association pass.
//!
//! Desired state is the directory membership of each project; actual state
//! is one bulk association query for the cluster. Missing associations are
//! added, up to the batch limit. Associations are never removed, and
//! accounts on the exclusion list are never touched.

use std::collections::BTreeMap;
use tracing::{debug, error, info, info_span, Instrument};

use hpcid_connector::error::ConnectorResult;

use crate::registry::{Capability, CapabilitySet, ClientRegistry};

use super::engine::ReconciliationConfig;
use super::report::{PassKind, PassReport};
use super::selection::{resolve_membership, DesiredMembership, MembershipSelection};

/// Adds missing scheduler associations for project members.
#[derive(Debug)]
pub struct AssociationReconciler<'a> {
    registry: &'a ClientRegistry,
    config: ReconciliationConfig,
}

impl<'a> AssociationReconciler<'a> {
    pub fn new(registry: &'a ClientRegistry, config: ReconciliationConfig) -> Self {
        Self { registry, config }
    }

    pub fn capabilities() -> CapabilitySet {
        CapabilitySet::new()
            .with(Capability::Allocations)
            .with(Capability::Directory)
            .with(Capability::Scheduler)
            .with(Capability::Notifier)
    }

    /// Resolve the selection against the directory, then reconcile.
    pub async fn run(&self, selection: &MembershipSelection) -> ConnectorResult<PassReport> {
        let desired = resolve_membership(
            selection,
            self.registry.allocations()?,
            self.registry.directory()?,
            self.config.family(),
        )
        .await?;
        self.reconcile(&desired).await
    }

    /// Reconcile an already resolved membership.
    pub async fn reconcile(&self, desired: &DesiredMembership) -> ConnectorResult<PassReport> {
        let report = PassReport::new(PassKind::SlurmAssociations, self.registry.is_dry_run());
        let span = info_span!(
            "slurm_associations",
            pass_id = %report.pass_id,
            cluster = %self.config.cluster,
            dry_run = report.dry_run,
        );
        self.reconcile_inner(desired, report).instrument(span).await
    }

    async fn reconcile_inner(
        &self,
        desired: &DesiredMembership,
        mut report: PassReport,
    ) -> ConnectorResult<PassReport> {
        let scheduler = self.registry.scheduler()?;
        scheduler.check_health().await?;
        let actual = scheduler.cluster_associations().await?;

        for (project, e) in &desired.errors {
            report.record_failure(project, format!("Failed to resolve group `{project}`: {e}"));
        }

        // (account, user) pairs in account order, members in directory order.
        let mut missing: Vec<(String, String)> = Vec::new();
        for (account, members) in &desired.groups {
            report.statistics.scanned += 1;

            if scheduler.is_excluded(account) {
                debug!(account = %account, "Account excluded from association changes");
                report.statistics.ignored += 1;
                continue;
            }
            let Some(existing) = actual.get(account) else {
                error!(account = %account, "Slurm account missing");
                report.record_failure(
                    account,
                    format!("Slurm account `{account}` does not exist, has the project been provisioned?"),
                );
                continue;
            };
            if members.is_empty() {
                report.record_warning(account, format!("No group members in {account}"));
                continue;
            }

            let before = missing.len();
            missing.extend(
                members
                    .iter()
                    .filter(|user| !existing.contains(*user))
                    .map(|user| (account.clone(), user.clone())),
            );
            if missing.len() == before {
                report.statistics.ignored += 1;
            } else {
                info!(account = %account, missing = missing.len() - before, "Account has missing associations");
                report.statistics.explored += 1;
            }
        }

        let limit = self.config.batch_limit.min(missing.len());
        let (batch, rest) = missing.split_at(limit);

        // user -> accounts added, for one action line per user
        let mut added: BTreeMap<&str, Vec<&str>> = BTreeMap::new();
        for (account, user) in batch {
            match scheduler.add_user(account, user).await {
                Ok(_) => {
                    report.statistics.converged += 1;
                    added.entry(user.as_str()).or_default().push(account.as_str());
                    if !report.dry_run {
                        report.record_success(association_label(account, user));
                    }
                }
                Err(e) => {
                    error!(
                        account = %account,
                        user = %user,
                        error = %e,
                        error_code = e.error_code(),
                        "Failed to add slurm association"
                    );
                    report.record_failure(
                        association_label(account, user),
                        format!("Failed to add user `{user}` to slurm account `{account}`: {e}"),
                    );
                }
            }
        }

        for (user, accounts) in &added {
            report.record_action(format!(
                "Adding user `{user}` to slurm assoc(s) `{}`",
                accounts.join(", ")
            ));
        }
        report.explore = rest
            .iter()
            .map(|(account, user)| association_label(account, user))
            .collect();
        report.finish();

        info!(
            scanned = report.statistics.scanned,
            added = report.statistics.converged,
            failed = report.failed.len(),
            warned = report.warned.len(),
            remaining = report.explore.len(),
            "Association pass finished"
        );
        Ok(report)
    }
}

fn association_label(account: &str, user: &str) -> String {
    format!("{account}/{user}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_association_label() {
        assert_eq!(association_label("p1", "alice"), "p1/alice");
    }

    #[test]
    fn test_capabilities_exclude_storage() {
        let caps = AssociationReconciler::capabilities();
        assert!(caps.contains(Capability::Scheduler));
        assert!(!caps.contains(Capability::ProjectStorage));
    }
}
