//! Home-directory pass.
//!
//! Members of the cluster's ACL group (`cn=<cluster>` under the ACL
//! organizational unit) without a home directory are explored. Up to the
//! batch limit are created and, in execute mode, checked again.

use tracing::{debug, error, info, info_span, Instrument};

use hpcid_connector::error::ConnectorResult;
use hpcid_connector_storage::current_hostname;

use crate::registry::{Capability, CapabilitySet, ClientRegistry};

use super::engine::ReconciliationConfig;
use super::report::{PassKind, PassReport};

/// Creates missing home directories.
#[derive(Debug)]
pub struct HomeDirReconciler<'a> {
    registry: &'a ClientRegistry,
    config: ReconciliationConfig,
    hostname: Option<String>,
}

impl<'a> HomeDirReconciler<'a> {
    pub fn new(registry: &'a ClientRegistry, config: ReconciliationConfig) -> Self {
        Self {
            registry,
            config,
            hostname: None,
        }
    }

    /// Host name checked against the allowed hosts. Defaults to this host.
    pub fn with_hostname(mut self, hostname: impl Into<String>) -> Self {
        self.hostname = Some(hostname.into());
        self
    }

    pub fn capabilities() -> CapabilitySet {
        CapabilitySet::new()
            .with(Capability::Directory)
            .with(Capability::HomeDirectories)
            .with(Capability::Notifier)
    }

    pub async fn run(&self) -> ConnectorResult<PassReport> {
        let report = PassReport::new(PassKind::HomeDirectories, self.registry.is_dry_run());
        let span = info_span!(
            "home_directories",
            pass_id = %report.pass_id,
            cluster = %self.config.cluster,
            dry_run = report.dry_run,
        );
        self.run_pass(report).instrument(span).await
    }

    async fn run_pass(&self, mut report: PassReport) -> ConnectorResult<PassReport> {
        let homes = self.registry.home_directories()?;
        let hostname = match &self.hostname {
            Some(hostname) => hostname.clone(),
            None => current_hostname()?,
        };
        homes.check_host(&hostname, &self.config.cluster)?;

        let directory = self.registry.directory()?;
        let acl_group = homes.config().cluster.as_str();
        let members = directory
            .resolver
            .resolve_members(acl_group, &directory.acl_ou)
            .await?;
        debug!(group = %acl_group, members = members.len(), "Resolved cluster ACL group");

        let mut explore: Vec<String> = Vec::new();
        for user in members {
            report.statistics.scanned += 1;
            match homes.exists(&user).await {
                Ok(true) => report.statistics.ignored += 1,
                Ok(false) => {
                    info!(user = %user, "Home directory missing");
                    report.statistics.explored += 1;
                    explore.push(user);
                }
                Err(e) => {
                    error!(user = %user, error = %e, error_code = e.error_code(), "Failed to check home directory");
                    report.record_failure(&user, e.to_string());
                }
            }
        }

        let limit = self.config.batch_limit.min(explore.len());
        let batch = &explore[..limit];
        for user in batch {
            match homes.create(user).await {
                Ok(actions) => {
                    report.statistics.converged += 1;
                    for action in actions {
                        report.record_action(action);
                    }
                }
                Err(e) => {
                    error!(user = %user, error = %e, error_code = e.error_code(), "Failed to create home directory");
                    report.record_failure(user, e.to_string());
                }
            }
        }

        if !report.dry_run {
            let created: Vec<String> = batch
                .iter()
                .filter(|user| !report.is_failed(user.as_str()))
                .cloned()
                .collect();
            for user in created {
                match homes.exists(&user).await {
                    Ok(true) => report.record_success(user),
                    Ok(false) => {
                        let message = format!("Home directory for `{user}` is still missing");
                        report.record_failure(user, message);
                    }
                    Err(e) => report.record_failure(user, format!("verification failed: {e}")),
                }
            }
        }

        report.explore = explore
            .into_iter()
            .filter(|u| !report.succeeded.contains(u))
            .collect();
        report.finish();

        info!(
            scanned = report.statistics.scanned,
            created = report.statistics.converged,
            failed = report.failed.len(),
            remaining = report.explore.len(),
            "Home directory pass finished"
        );
        Ok(report)
    }
}
