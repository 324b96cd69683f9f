//! Desired project membership.
//!
//! Association and link passes work on a map of project to member
//! usernames. The map covers one user's projects, one group, or every
//! eligible project.

use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, info, instrument, warn};

use hpcid_allocations::AllocationSource;
use hpcid_connector::error::{ConnectorError, ConnectorResult};

use crate::cluster::ClusterFamily;
use crate::registry::DirectoryClient;

/// Which part of the directory a pass reconciles.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MembershipSelection {
    /// The eligible projects one user belongs to.
    User(String),
    /// One project group.
    Group(String),
    /// Every eligible project.
    AllProjects,
}

impl MembershipSelection {
    /// Selection from the optional `--username` / `--groupid` arguments.
    pub fn from_args(username: Option<String>, group: Option<String>) -> Self {
        match (username, group) {
            (Some(user), _) => MembershipSelection::User(user),
            (None, Some(group)) => MembershipSelection::Group(group),
            (None, None) => MembershipSelection::AllProjects,
        }
    }
}

/// Resolved members per project.
#[derive(Debug, Default)]
pub struct DesiredMembership {
    /// Project to member usernames, in directory order.
    pub groups: BTreeMap<String, Vec<String>>,
    /// Projects whose group could not be resolved.
    pub errors: BTreeMap<String, ConnectorError>,
}

impl DesiredMembership {
    pub fn is_empty(&self) -> bool {
        self.groups.is_empty() && self.errors.is_empty()
    }

    pub fn members(&self, project: &str) -> Option<&[String]> {
        self.groups.get(project).map(Vec::as_slice)
    }
}

/// Resolve the desired membership for a selection.
///
/// Connectivity and schema errors abort. A project group that is missing or
/// ambiguous is recorded in [`DesiredMembership::errors`] so the rest of the
/// pass can go ahead.
#[instrument(skip(allocations, directory))]
pub async fn resolve_membership(
    selection: &MembershipSelection,
    allocations: &dyn AllocationSource,
    directory: &DirectoryClient,
    family: ClusterFamily,
) -> ConnectorResult<DesiredMembership> {
    let mut desired = DesiredMembership::default();
    let ou = directory.project_ou.as_str();

    match selection {
        MembershipSelection::User(user) => {
            if directory.resolver.find_user(user).await?.is_none() {
                warn!(user = %user, "User not found in the directory");
                return Ok(desired);
            }
            let eligible: BTreeSet<String> = allocations
                .list_eligible_projects(family.parent_filter())
                .await?
                .into_iter()
                .collect();
            let groups = directory.resolver.groups_of_user(user, ou).await?;
            info!(user = %user, groups = ?groups, "User group memberships");
            for group in groups.into_iter().filter(|g| eligible.contains(g)) {
                desired.groups.insert(group, vec![user.clone()]);
            }
        }
        MembershipSelection::Group(group) => {
            let members = directory.resolver.resolve_members(group, ou).await?;
            info!(group = %group, members = ?members, "Group members");
            desired.groups.insert(group.clone(), members);
        }
        MembershipSelection::AllProjects => {
            let projects = allocations
                .list_eligible_projects(family.parent_filter())
                .await?;
            for project in projects {
                match directory.resolver.resolve_members(&project, ou).await {
                    Ok(members) => {
                        debug!(group = %project, members = members.len(), "Group members");
                        desired.groups.insert(project, members);
                    }
                    Err(e) if e.is_fatal() => return Err(e),
                    Err(e) => {
                        warn!(group = %project, error = %e, error_code = e.error_code(), "Failed to resolve group");
                        desired.errors.insert(project, e);
                    }
                }
            }
        }
    }

    Ok(desired)
}

#[cfg(test)]
mod tests {
    use super::*;
    use hpcid_allocations::StaticAllocations;
    use hpcid_connector_ldap::{DirectoryResolver, InMemoryDirectory};
    use std::sync::Arc;

    const BASE: &str = "dc=example,dc=org";

    fn directory(dir: InMemoryDirectory) -> DirectoryClient {
        DirectoryClient::new(
            DirectoryResolver::new(Arc::new(dir), 16),
            "collaborations",
            "aclgroups",
        )
    }

    fn seeded() -> InMemoryDirectory {
        let dir = InMemoryDirectory::new(BASE)
            .with_user("alice")
            .with_user("bob");
        let alice = dir.user_dn("alice");
        let bob = dir.user_dn("bob");
        dir.with_group("collaborations", "p1", &[alice.as_str(), bob.as_str()], &[])
            .with_group("collaborations", "p2", &[], &["alice"])
            .with_group("collaborations", "p9", &[alice.as_str()], &[])
    }

    fn allocations() -> StaticAllocations {
        StaticAllocations::new()
            .with_project("p1", "root")
            .with_project("p2", "p004")
            .with_project("p3", "root")
    }

    #[test]
    fn test_selection_from_args() {
        assert_eq!(
            MembershipSelection::from_args(Some("alice".into()), Some("p1".into())),
            MembershipSelection::User("alice".into())
        );
        assert_eq!(
            MembershipSelection::from_args(None, Some("p1".into())),
            MembershipSelection::Group("p1".into())
        );
        assert_eq!(MembershipSelection::from_args(None, None), MembershipSelection::AllProjects);
    }

    #[tokio::test]
    async fn test_all_projects_records_missing_groups() {
        let desired = resolve_membership(
            &MembershipSelection::AllProjects,
            &allocations(),
            &directory(seeded()),
            ClusterFamily::Registry,
        )
        .await
        .unwrap();

        assert_eq!(desired.members("p1").unwrap(), ["alice", "bob"]);
        assert_eq!(desired.members("p2").unwrap(), ["alice"]);
        assert!(desired.members("p9").is_none());
        assert_eq!(desired.errors["p3"].error_code(), "NOT_FOUND");
    }

    #[tokio::test]
    async fn test_user_selection_keeps_only_eligible_groups() {
        let desired = resolve_membership(
            &MembershipSelection::User("alice".into()),
            &allocations(),
            &directory(seeded()),
            ClusterFamily::Cvl,
        )
        .await
        .unwrap();

        // p1 is under root and p9 is not in the registry.
        assert_eq!(desired.groups.keys().collect::<Vec<_>>(), ["p2"]);
        assert_eq!(desired.members("p2").unwrap(), ["alice"]);
    }

    #[tokio::test]
    async fn test_unknown_user_selects_nothing() {
        let desired = resolve_membership(
            &MembershipSelection::User("mallory".into()),
            &allocations(),
            &directory(seeded()),
            ClusterFamily::Registry,
        )
        .await
        .unwrap();
        assert!(desired.is_empty());
    }

    #[tokio::test]
    async fn test_directory_outage_is_fatal() {
        let err = resolve_membership(
            &MembershipSelection::AllProjects,
            &allocations(),
            &directory(InMemoryDirectory::unreachable(BASE)),
            ClusterFamily::Registry,
        )
        .await
        .unwrap_err();
        assert!(err.is_fatal());
    }
}
