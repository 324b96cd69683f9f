//! Pass reports.
//!
//! Every pass ends in a [`PassReport`]: labels that succeeded, failed or
//! were warned about, the corrective actions taken (or planned, in
//! dry-run), and what is still mismatched. The report renders itself into
//! the three-block [`Notification`] for the pass.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use uuid::Uuid;

use hpcid_notify::Notification;

/// Which pass produced a report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PassKind {
    ProvisionProject,
    SlurmAssociations,
    Symlinks,
    HomeDirectories,
    HomeRepair,
}

impl PassKind {
    pub fn job_name(&self) -> &'static str {
        match self {
            PassKind::ProvisionProject => "hpcid-provision-project",
            PassKind::SlurmAssociations => "hpcid-slurm",
            PassKind::Symlinks => "hpcid-symlink",
            PassKind::HomeDirectories => "hpcid-nfs",
            PassKind::HomeRepair => "hpcid-userhome",
        }
    }

    pub fn icon(&self) -> &'static str {
        match self {
            PassKind::ProvisionProject => "file_folder",
            PassKind::SlurmAssociations => "slurm",
            PassKind::Symlinks => "linked_paperclips",
            PassKind::HomeDirectories => "file_cabinet",
            PassKind::HomeRepair => "house_with_garden",
        }
    }
}

impl fmt::Display for PassKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.job_name())
    }
}

/// Counters for one pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PassStatistics {
    /// Items whose state was read.
    pub scanned: usize,
    /// Items already matching.
    pub ignored: usize,
    /// Items found mismatched.
    pub explored: usize,
    /// Items corrective actions were issued for.
    pub converged: usize,
    pub duration_ms: u64,
}

/// Outcome of one reconciliation pass.
#[derive(Debug, Clone, Serialize)]
pub struct PassReport {
    pub pass_id: Uuid,
    pub kind: PassKind,
    pub dry_run: bool,
    pub started_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
    pub statistics: PassStatistics,
    /// Labels verified as converged.
    pub succeeded: BTreeSet<String>,
    /// Label to failure message.
    pub failed: BTreeMap<String, String>,
    /// Label to warning message.
    pub warned: BTreeMap<String, String>,
    /// Corrective actions, in the order issued.
    pub actions: Vec<String>,
    /// Labels still mismatched when the pass ended.
    pub explore: Vec<String>,
}

impl PassReport {
    pub fn new(kind: PassKind, dry_run: bool) -> Self {
        Self::with_id(Uuid::new_v4(), kind, dry_run)
    }

    pub fn with_id(pass_id: Uuid, kind: PassKind, dry_run: bool) -> Self {
        Self {
            pass_id,
            kind,
            dry_run,
            started_at: Utc::now(),
            finished_at: None,
            statistics: PassStatistics::default(),
            succeeded: BTreeSet::new(),
            failed: BTreeMap::new(),
            warned: BTreeMap::new(),
            actions: Vec::new(),
            explore: Vec::new(),
        }
    }

    pub fn record_success(&mut self, label: impl Into<String>) {
        self.succeeded.insert(label.into());
    }

    /// Record a failure. The first message for a label is kept.
    pub fn record_failure(&mut self, label: impl Into<String>, message: impl Into<String>) {
        let label = label.into();
        self.succeeded.remove(&label);
        self.failed.entry(label).or_insert_with(|| message.into());
    }

    pub fn record_warning(&mut self, label: impl Into<String>, message: impl Into<String>) {
        self.warned.entry(label.into()).or_insert_with(|| message.into());
    }

    pub fn record_action(&mut self, action: impl Into<String>) {
        self.actions.push(action.into());
    }

    pub fn is_failed(&self, label: &str) -> bool {
        self.failed.contains_key(label)
    }

    pub fn has_failures(&self) -> bool {
        !self.failed.is_empty()
    }

    /// No action taken, nothing failed, nothing warned.
    pub fn is_noop(&self) -> bool {
        self.actions.is_empty()
            && self.failed.is_empty()
            && self.warned.is_empty()
            && self.succeeded.is_empty()
    }

    /// Stamp the end time and duration.
    pub fn finish(&mut self) {
        let now = Utc::now();
        self.statistics.duration_ms = (now - self.started_at).num_milliseconds().max(0) as u64;
        self.finished_at = Some(now);
    }

    /// Render the three-block notification for this pass.
    ///
    /// Project and home passes summarise labels in one line;
    /// association and link passes list one message per line. In dry-run
    /// the planned actions are delivered as warnings and nothing is
    /// reported as completed.
    pub fn to_notification(&self) -> Notification {
        let failed = match self.kind {
            PassKind::ProvisionProject => {
                summary("to provision project(s)", self.failed.keys())
            }
            PassKind::HomeDirectories => summary("Creating nfs dir(s) for", self.failed.keys()),
            PassKind::HomeRepair => {
                summary("To copy skeleton and set up keys for", self.failed.keys())
            }
            PassKind::SlurmAssociations | PassKind::Symlinks => lines(self.failed.values()),
        };

        let warnings = lines(self.warned.values());
        let notification = Notification::new(self.kind.job_name(), self.kind.icon(), self.dry_run)
            .with_failed(failed);

        if self.dry_run {
            let planned = lines(self.actions.iter());
            let warned = [planned, warnings]
                .into_iter()
                .filter(|block| !block.is_empty())
                .collect::<Vec<_>>()
                .join("\n");
            return notification.with_warned(warned).with_send_warnings(true);
        }

        let completed = match self.kind {
            PassKind::ProvisionProject => {
                summary("provisioning project(s)", self.succeeded.iter())
            }
            PassKind::HomeDirectories => summary("Creating nfs dir(s) for", self.succeeded.iter()),
            PassKind::HomeRepair => {
                summary("Copying skeleton and setting up keys for", self.succeeded.iter())
            }
            PassKind::SlurmAssociations | PassKind::Symlinks => lines(self.actions.iter()),
        };
        notification.with_completed(completed).with_warned(warnings)
    }
}

fn summary<'a>(prefix: &str, labels: impl Iterator<Item = &'a String>) -> String {
    let labels: Vec<&str> = labels.map(String::as_str).collect();
    if labels.is_empty() {
        return String::new();
    }
    format!("{prefix} `{}`", labels.join("`, `"))
}

fn lines<'a>(messages: impl Iterator<Item = &'a String>) -> String {
    messages.map(String::as_str).collect::<Vec<_>>().join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failure_overrides_success() {
        let mut report = PassReport::new(PassKind::ProvisionProject, false);
        report.record_success("p1");
        report.record_failure("p1", "scheduler: account missing");
        report.record_failure("p1", "storage: later message");

        assert!(report.succeeded.is_empty());
        assert_eq!(report.failed["p1"], "scheduler: account missing");
        assert!(report.has_failures());
    }

    #[test]
    fn test_project_notification_summarises_labels() {
        let mut report = PassReport::new(PassKind::ProvisionProject, false);
        report.record_success("p2");
        report.record_success("p1");
        report.record_failure("p9", "boom");
        report.record_warning("p5", "Project `p5` has slurm parent `p004`, expected `root`");

        let n = report.to_notification();
        assert_eq!(n.job_name, "hpcid-provision-project");
        assert_eq!(n.icon, "file_folder");
        assert_eq!(n.failed, "to provision project(s) `p9`");
        assert_eq!(n.completed, "provisioning project(s) `p1`, `p2`");
        assert!(!n.send_warnings);
    }

    #[test]
    fn test_dry_run_delivers_plan_as_warnings() {
        let mut report = PassReport::new(PassKind::SlurmAssociations, true);
        report.record_action("Adding user `alice` to slurm assoc(s) `p1, p2`");
        report.record_warning("p3", "No group members in p3");
        report.record_failure("p4", "Slurm account `p4` does not exist, has the project been provisioned?");

        let n = report.to_notification();
        assert_eq!(n.job_name, "hpcid-slurm-dryrun");
        assert!(n.completed.is_empty());
        assert_eq!(
            n.warned,
            "Adding user `alice` to slurm assoc(s) `p1, p2`\nNo group members in p3"
        );
        assert!(n.send_warnings);
        assert!(n.failed.starts_with("Slurm account `p4`"));
    }

    #[test]
    fn test_home_repair_notification() {
        let mut report = PassReport::new(PassKind::HomeRepair, false);
        report.record_success("bob");
        report.record_success("alice");
        report.record_failure("carol", "Home `/home/carol` still owned by 0:0, expected 1003:1003");

        let n = report.to_notification();
        assert_eq!(n.job_name, "hpcid-userhome");
        assert_eq!(n.icon, "house_with_garden");
        assert_eq!(n.completed, "Copying skeleton and setting up keys for `alice`, `bob`");
        assert_eq!(n.failed, "To copy skeleton and set up keys for `carol`");
    }

    #[test]
    fn test_empty_report_renders_empty_notification() {
        let mut report = PassReport::new(PassKind::HomeDirectories, false);
        report.finish();
        assert!(report.is_noop());
        assert!(report.finished_at.is_some());
        assert!(report.to_notification().is_empty());
    }
}
