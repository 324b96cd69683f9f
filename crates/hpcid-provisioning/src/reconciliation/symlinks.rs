//! Home-directory project link pass.

use std::path::Path;
use tracing::{debug, error, info, info_span, warn, Instrument};

use hpcid_connector::error::{ConnectorError, ConnectorResult};

use crate::registry::{Capability, CapabilitySet, ClientRegistry};

use super::engine::ReconciliationConfig;
use super::report::{PassKind, PassReport};
use super::selection::{resolve_membership, DesiredMembership, MembershipSelection};

/// Creates missing `<home>/<user>/<project>` links for project members.
#[derive(Debug)]
pub struct SymlinkReconciler<'a> {
    registry: &'a ClientRegistry,
    config: ReconciliationConfig,
}

impl<'a> SymlinkReconciler<'a> {
    pub fn new(registry: &'a ClientRegistry, config: ReconciliationConfig) -> Self {
        Self { registry, config }
    }

    pub fn capabilities() -> CapabilitySet {
        CapabilitySet::new()
            .with(Capability::Allocations)
            .with(Capability::Directory)
            .with(Capability::ProjectStorage)
            .with(Capability::HomeLinks)
            .with(Capability::Notifier)
    }

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

    pub async fn reconcile(&self, desired: &DesiredMembership) -> ConnectorResult<PassReport> {
        let report = PassReport::new(PassKind::Symlinks, self.registry.is_dry_run());
        let span = info_span!(
            "symlinks",
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
        let links = self.registry.home_links()?;
        let storage = self.registry.storage()?;

        let mut usable: Vec<&Path> = Vec::new();
        for location in storage.mount_points() {
            if tokio::fs::metadata(location).await.is_ok_and(|m| m.is_dir()) {
                usable.push(location.as_path());
            } else {
                warn!(location = %location.display(), "Link location is not a directory");
                let label = location.display().to_string();
                let message = format!("Link location `{label}` is not a directory, skipped");
                report.record_warning(label, message);
            }
        }
        if usable.is_empty() {
            return Err(ConnectorError::invalid_config(
                "none of the configured link locations is a directory",
            ));
        }

        for (project, e) in &desired.errors {
            report.record_failure(project, format!("Failed to resolve group `{project}`: {e}"));
        }

        'projects: for (project, members) in &desired.groups {
            report.statistics.scanned += 1;

            if links.is_excluded(project) {
                debug!(project = %project, "Project excluded from links");
                report.statistics.ignored += 1;
                continue;
            }

            for location in usable.iter().copied() {
                match storage.exists(location, project).await {
                    Ok(true) => {}
                    Ok(false) => {
                        warn!(
                            project = %project,
                            location = %location.display(),
                            "Project storage missing, skipping links"
                        );
                        report.statistics.ignored += 1;
                        continue 'projects;
                    }
                    Err(e) => {
                        report.record_failure(project, format!("Checking storage for `{project}` failed: {e}"));
                        continue 'projects;
                    }
                }
            }

            for user in members {
                match links.ensure_links_in(project, user, &usable).await {
                    Ok(outcome) => {
                        if outcome.home_missing {
                            report.record_failure(
                                user,
                                format!("Creating symlinks for `{user}` because homedir doesn't exist"),
                            );
                            continue;
                        }
                        for warning in &outcome.warnings {
                            report.record_warning(warning, warning);
                        }
                        if !outcome.created.is_empty() {
                            report.statistics.explored += 1;
                            report.statistics.converged += 1;
                        }
                        for link in &outcome.created {
                            let label = link.display().to_string();
                            report.record_action(format!("Creating `{label}`"));
                            if !report.dry_run {
                                report.record_success(label);
                            }
                        }
                    }
                    Err(e) => {
                        error!(
                            project = %project,
                            user = %user,
                            error = %e,
                            error_code = e.error_code(),
                            "Failed to create links"
                        );
                        report.record_failure(
                            format!("{project}/{user}"),
                            format!("Creating symlinks for `{user}` in `{project}` failed: {e}"),
                        );
                    }
                }
            }
        }
        report.finish();

        info!(
            scanned = report.statistics.scanned,
            created = report.actions.len(),
            failed = report.failed.len(),
            warned = report.warned.len(),
            "Symlink pass finished"
        );
        Ok(report)
    }
}
