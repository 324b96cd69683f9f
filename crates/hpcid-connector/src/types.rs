//! Backend state types
//!
//! Observed and desired state shared by every backend adapter.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Kind of backend holding a slice of the actual provisioning state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// Job-scheduler accounting database.
    Scheduler,
    /// POSIX project storage trees.
    Storage,
}

impl BackendKind {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            BackendKind::Scheduler => "scheduler",
            BackendKind::Storage => "storage",
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// What a backend currently reports for one project.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum BackendState {
    /// Recorded parent account, `None` when the account is absent.
    Scheduler { parent: Option<String> },
    /// Directory existence per mount point.
    Storage { targets: BTreeMap<String, bool> },
}

/// What a backend should hold for one project.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum DesiredState {
    /// Account must exist under this parent.
    Scheduler { parent: String },
    /// Group-owned directory on every mount point, with an optional size
    /// per mount point.
    Storage {
        group: String,
        quotas: BTreeMap<String, String>,
    },
}

impl DesiredState {
    pub fn kind(&self) -> BackendKind {
        match self {
            DesiredState::Scheduler { .. } => BackendKind::Scheduler,
            DesiredState::Storage { .. } => BackendKind::Storage,
        }
    }
}

impl BackendState {
    pub fn kind(&self) -> BackendKind {
        match self {
            BackendState::Scheduler { .. } => BackendKind::Scheduler,
            BackendState::Storage { .. } => BackendKind::Storage,
        }
    }

    /// Check whether the observed state already satisfies the desired one.
    ///
    /// A missing scheduler record, a different parent, or any mount point
    /// without the project directory is a mismatch. States of different
    /// backend kinds never match.
    pub fn satisfies(&self, desired: &DesiredState) -> bool {
        match (self, desired) {
            (BackendState::Scheduler { parent }, DesiredState::Scheduler { parent: want }) => {
                parent.as_deref() == Some(want.as_str())
            }
            (BackendState::Storage { targets }, DesiredState::Storage { .. }) => {
                !targets.is_empty() && targets.values().all(|present| *present)
            }
            _ => false,
        }
    }

    /// Mount points missing the project directory.
    pub fn missing_targets(&self) -> Vec<&str> {
        match self {
            BackendState::Storage { targets } => targets
                .iter()
                .filter(|(_, present)| !**present)
                .map(|(target, _)| target.as_str())
                .collect(),
            BackendState::Scheduler { .. } => Vec::new(),
        }
    }
}

/// Result of applying a desired state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApplyOutcome {
    /// Target already matched; nothing was done.
    Unchanged,
    /// Corrective actions were issued (or simulated in dry-run).
    Applied { actions: Vec<String> },
}

impl ApplyOutcome {
    pub fn actions(&self) -> &[String] {
        match self {
            ApplyOutcome::Unchanged => &[],
            ApplyOutcome::Applied { actions } => actions,
        }
    }

    pub fn is_unchanged(&self) -> bool {
        matches!(self, ApplyOutcome::Unchanged)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scheduler_parent_mismatch() {
        let desired = DesiredState::Scheduler {
            parent: "root".to_string(),
        };
        let absent = BackendState::Scheduler { parent: None };
        let wrong = BackendState::Scheduler {
            parent: Some("p004".to_string()),
        };
        let right = BackendState::Scheduler {
            parent: Some("root".to_string()),
        };

        assert!(!absent.satisfies(&desired));
        assert!(!wrong.satisfies(&desired));
        assert!(right.satisfies(&desired));
    }

    #[test]
    fn test_storage_requires_every_mount() {
        let desired = DesiredState::Storage {
            group: "p123".to_string(),
            quotas: BTreeMap::new(),
        };
        let mut targets = BTreeMap::new();
        targets.insert("/projects".to_string(), true);
        targets.insert("/scratch".to_string(), false);
        let state = BackendState::Storage { targets };

        assert!(!state.satisfies(&desired));
        assert_eq!(state.missing_targets(), vec!["/scratch"]);
    }

    #[test]
    fn test_storage_without_mounts_is_mismatch() {
        let desired = DesiredState::Storage {
            group: "p123".to_string(),
            quotas: BTreeMap::new(),
        };
        let state = BackendState::Storage {
            targets: BTreeMap::new(),
        };
        assert!(!state.satisfies(&desired));
    }

    #[test]
    fn test_kinds_never_cross_match() {
        let desired = DesiredState::Scheduler {
            parent: "root".to_string(),
        };
        let state = BackendState::Storage {
            targets: BTreeMap::new(),
        };
        assert!(!state.satisfies(&desired));
        assert_eq!(desired.kind(), BackendKind::Scheduler);
        assert_eq!(state.kind().to_string(), "storage");
    }
}
