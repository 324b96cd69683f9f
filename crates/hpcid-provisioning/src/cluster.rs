//! Cluster families.
//!
//! The cluster a pass runs for decides which projects are in scope and
//! which parent their scheduler accounts are created under.

use std::fmt;

use hpcid_allocations::CVL_PARENT;

/// Parent account for clusters outside the registry and CVL families.
pub const ROOT_ACCOUNT: &str = "root";

/// Parent-resolution rules for a cluster.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ClusterFamily {
    /// Accounts sit under the parent recorded in the allocation registry.
    Registry,
    /// Only projects under the CVL parent, created under it.
    Cvl,
    /// Every project, created under the root account.
    Other,
}

impl ClusterFamily {
    /// Family of a cluster name, case-insensitively.
    pub fn from_cluster(cluster: &str) -> Self {
        let cluster = cluster.to_ascii_lowercase();
        if cluster.contains("m3") || cluster.contains("monarch") {
            ClusterFamily::Registry
        } else if cluster.contains("cvl") {
            ClusterFamily::Cvl
        } else {
            ClusterFamily::Other
        }
    }

    /// Parent code eligible projects are restricted to.
    pub fn parent_filter(&self) -> Option<&'static str> {
        match self {
            ClusterFamily::Cvl => Some(CVL_PARENT),
            ClusterFamily::Registry | ClusterFamily::Other => None,
        }
    }

    /// Scheduler parent for a project whose registry parent is
    /// `registry_parent`.
    pub fn effective_parent(&self, registry_parent: &str) -> String {
        match self {
            ClusterFamily::Registry => registry_parent.to_string(),
            ClusterFamily::Cvl => CVL_PARENT.to_string(),
            ClusterFamily::Other => ROOT_ACCOUNT.to_string(),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ClusterFamily::Registry => "registry",
            ClusterFamily::Cvl => "cvl",
            ClusterFamily::Other => "other",
        }
    }
}

impl fmt::Display for ClusterFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
