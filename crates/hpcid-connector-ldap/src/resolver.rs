//! Group membership resolution.
//!
//! Expands a group into usernames by walking both member encodings:
//! - `member` DNs, where `uid=` entries are users and anything else is a
//!   nested group expanded breadth-first
//! - `memberUid` usernames, each confirmed by an exact-match user search
//!
//! Nested groups are expanded at most once per resolution (cycle safety) and
//! no deeper than the configured bound.

use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use tracing::{debug, instrument, warn};

use hpcid_connector::error::{ConnectorError, ConnectorResult};

use crate::config::LdapConfig;
use crate::directory::{Directory, SearchScope};
use crate::entry::{escape_dn_value, normalize_dn, user_from_dn, DirectoryEntry, MemberEncoding};
use crate::filter::Filter;

const USER_OBJECT_CLASS: &str = "posixAccount";

/// Result of expanding one group.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Membership {
    /// Usernames in discovery order, without duplicates.
    pub users: Vec<String>,
    /// Nested group references skipped because the group was already expanded.
    pub cycles_detected: usize,
    /// Whether a nested group was skipped at the depth bound.
    pub depth_limited: bool,
    /// Deepest nesting level expanded (0 = the group itself).
    pub max_depth_traversed: u32,
    /// Member references that did not resolve to an entry.
    pub unresolved: Vec<String>,
}

/// Resolves group membership against a [`Directory`].
#[derive(Clone)]
pub struct DirectoryResolver {
    directory: Arc<dyn Directory>,
    max_depth: u32,
    group_classes: Vec<String>,
}

impl DirectoryResolver {
    pub fn new(directory: Arc<dyn Directory>, max_depth: u32) -> Self {
        Self {
            directory,
            max_depth,
            group_classes: vec![
                "groupOfNames".to_string(),
                "groupOfUniqueNames".to_string(),
                "posixGroup".to_string(),
                "auxPosixGroup".to_string(),
            ],
        }
    }

    /// Resolver using the nesting bound and group classes from `config`.
    pub fn from_config(directory: Arc<dyn Directory>, config: &LdapConfig) -> Self {
        Self::new(directory, config.max_nesting_depth)
            .with_group_classes(config.group_object_classes.clone())
    }

    pub fn with_group_classes(mut self, classes: Vec<String>) -> Self {
        self.group_classes = classes;
        self
    }

    /// Search base for an organizational unit.
    pub fn ou_base(&self, org_unit: &str) -> String {
        format!("ou={},{}", escape_dn_value(org_unit), self.directory.base_dn())
    }

    /// Resolve a group to its member usernames.
    pub async fn resolve_members(&self, group: &str, org_unit: &str) -> ConnectorResult<Vec<String>> {
        Ok(self.resolve(group, org_unit).await?.users)
    }

    /// Fetch exactly one group by `cn` within an organizational unit.
    pub async fn find_group(&self, group: &str, org_unit: &str) -> ConnectorResult<DirectoryEntry> {
        let filter = Filter::and(vec![
            Filter::eq("cn", group),
            Filter::any_object_class(&self.group_classes),
        ]);
        let mut entries = self
            .directory
            .search(&self.ou_base(org_unit), SearchScope::Subtree, &filter, &[])
            .await?;

        match entries.len() {
            0 => Err(ConnectorError::not_found("group", format!("{group} in ou={org_unit}"))),
            1 => Ok(entries.remove(0)),
            n => Err(ConnectorError::ambiguous("group", format!("{group} in ou={org_unit}"), n)),
        }
    }

    /// Look up a user by exact `uid`. `None` when absent; more than one
    /// match is an error.
    pub async fn find_user(&self, uid: &str) -> ConnectorResult<Option<DirectoryEntry>> {
        let filter = Filter::and(vec![
            Filter::eq("uid", uid),
            Filter::eq("objectClass", USER_OBJECT_CLASS),
        ]);
        let mut entries = self
            .directory
            .search(self.directory.base_dn(), SearchScope::Subtree, &filter, &[])
            .await?;

        match entries.len() {
            0 => Ok(None),
            1 => Ok(Some(entries.remove(0))),
            n => Err(ConnectorError::ambiguous("user", uid, n)),
        }
    }

    /// Names of the groups within an organizational unit that list the user
    /// under either encoding, sorted.
    pub async fn groups_of_user(&self, username: &str, org_unit: &str) -> ConnectorResult<Vec<String>> {
        let user = self
            .find_user(username)
            .await?
            .ok_or_else(|| ConnectorError::not_found("user", username))?;

        let filter = Filter::and(vec![
            Filter::any_object_class(&self.group_classes),
            Filter::or(vec![
                Filter::eq("member", user.dn()),
                Filter::eq("memberUid", username),
            ]),
        ]);
        let entries = self
            .directory
            .search(&self.ou_base(org_unit), SearchScope::Subtree, &filter, &["cn"])
            .await?;

        let mut groups: Vec<String> = entries
            .iter()
            .filter_map(|e| e.first("cn").map(str::to_string))
            .collect();
        groups.sort();
        groups.dedup();
        Ok(groups)
    }

    /// Expand a group with traversal details.
    #[instrument(skip(self), fields(max_depth = self.max_depth))]
    pub async fn resolve(&self, group: &str, org_unit: &str) -> ConnectorResult<Membership> {
        let root = self.find_group(group, org_unit).await?;

        let mut membership = Membership::default();
        let mut seen_users: HashSet<String> = HashSet::new();
        let mut visited_groups: HashSet<String> = HashSet::new();
        visited_groups.insert(normalize_dn(root.dn()));

        // BFS queue: (group entry, depth)
        let mut queue: VecDeque<(DirectoryEntry, u32)> = VecDeque::new();
        queue.push_back((root, 0));

        while let Some((entry, depth)) = queue.pop_front() {
            membership.max_depth_traversed = membership.max_depth_traversed.max(depth);

            for encoding in entry.member_encodings() {
                match encoding {
                    MemberEncoding::Modern(dns) => {
                        for dn in dns.iter().map(|d| d.trim()).filter(|d| !d.is_empty()) {
                            if let Some(user) = user_from_dn(dn) {
                                push_user(&mut membership, &mut seen_users, user);
                                continue;
                            }

                            let key = normalize_dn(dn);
                            if visited_groups.contains(&key) {
                                membership.cycles_detected += 1;
                                debug!(dn = %dn, "Group already expanded, skipping");
                                continue;
                            }
                            if depth + 1 > self.max_depth {
                                membership.depth_limited = true;
                                warn!(dn = %dn, depth = depth + 1, "Nesting depth bound reached");
                                continue;
                            }

                            match self.read_entry(dn).await? {
                                Some(nested) if nested.is_group(&self.group_classes) => {
                                    visited_groups.insert(key);
                                    queue.push_back((nested, depth + 1));
                                }
                                Some(nested) => match nested.username() {
                                    Some(user) => {
                                        push_user(&mut membership, &mut seen_users, user)
                                    }
                                    None => {
                                        warn!(dn = %dn, "Member is neither a user nor a group");
                                        membership.unresolved.push(dn.to_string());
                                    }
                                },
                                None => {
                                    warn!(dn = %dn, group = %entry.dn(), "Dangling member reference");
                                    membership.unresolved.push(dn.to_string());
                                }
                            }
                        }
                    }
                    MemberEncoding::Legacy(uids) => {
                        for uid in uids.iter().map(|u| u.trim()).filter(|u| !u.is_empty()) {
                            match self.find_user(uid).await? {
                                Some(user) => {
                                    let name = user.username().unwrap_or(uid).to_string();
                                    push_user(&mut membership, &mut seen_users, &name);
                                }
                                None => {
                                    warn!(uid = %uid, group = %entry.dn(), "memberUid has no user entry");
                                    membership.unresolved.push(uid.to_string());
                                }
                            }
                        }
                    }
                }
            }
        }

        debug!(
            group = %group,
            users = membership.users.len(),
            cycles = membership.cycles_detected,
            depth = membership.max_depth_traversed,
            "Resolved group membership"
        );

        Ok(membership)
    }

    async fn read_entry(&self, dn: &str) -> ConnectorResult<Option<DirectoryEntry>> {
        let mut entries = self
            .directory
            .search(dn, SearchScope::Base, &Filter::present("objectClass"), &[])
            .await?;
        Ok(if entries.is_empty() {
            None
        } else {
            Some(entries.remove(0))
        })
    }
}

fn push_user(membership: &mut Membership, seen: &mut HashSet<String>, user: &str) {
    if seen.insert(user.to_string()) {
        membership.users.push(user.to_string());
    }
}

impl std::fmt::Debug for DirectoryResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DirectoryResolver")
            .field("base_dn", &self.directory.base_dn())
            .field("max_depth", &self.max_depth)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InMemoryDirectory;

    const BASE: &str = "dc=example,dc=org";
    const OU: &str = "collaborations";

    fn resolver(directory: InMemoryDirectory) -> DirectoryResolver {
        DirectoryResolver::new(Arc::new(directory), 16)
    }

    #[tokio::test]
    async fn test_modern_members() {
        let dir = InMemoryDirectory::new(BASE).with_user("alice").with_user("bob");
        let members = [dir.user_dn("alice"), dir.user_dn("bob")];
        let dir = dir.with_group(OU, "p123", &[&members[0], &members[1]], &[]);

        let users = resolver(dir).resolve_members("p123", OU).await.unwrap();
        assert_eq!(users, vec!["alice", "bob"]);
    }

    #[tokio::test]
    async fn test_legacy_members_are_looked_up() {
        let dir = InMemoryDirectory::new(BASE)
            .with_user("carol")
            .with_group(OU, "p123", &[], &["carol", "ghost"]);

        let membership = resolver(dir).resolve("p123", OU).await.unwrap();
        assert_eq!(membership.users, vec!["carol"]);
        assert_eq!(membership.unresolved, vec!["ghost"]);
    }

    #[tokio::test]
    async fn test_both_encodings_drained() {
        let dir = InMemoryDirectory::new(BASE).with_user("alice").with_user("bob");
        let alice = dir.user_dn("alice");
        let dir = dir.with_group(OU, "p123", &[&alice], &["bob", "alice"]);

        let users = resolver(dir).resolve_members("p123", OU).await.unwrap();
        assert_eq!(users, vec!["alice", "bob"]);
    }

    #[tokio::test]
    async fn test_empty_member_values_skipped() {
        let dir = InMemoryDirectory::new(BASE).with_user("alice");
        let alice = dir.user_dn("alice");
        let dir = dir.with_group(OU, "p123", &["", "  ", &alice], &[""]);

        let membership = resolver(dir).resolve("p123", OU).await.unwrap();
        assert_eq!(membership.users, vec!["alice"]);
        assert!(membership.unresolved.is_empty());
    }

    #[tokio::test]
    async fn test_missing_group_is_not_found() {
        let dir = InMemoryDirectory::new(BASE);
        let err = resolver(dir).resolve_members("p999", OU).await.unwrap_err();
        assert!(matches!(err, ConnectorError::NotFound { .. }));
        assert!(!err.is_fatal());
    }

    #[tokio::test]
    async fn test_duplicate_group_is_ambiguous() {
        let dir = InMemoryDirectory::new(BASE).with_group(OU, "p123", &[], &[]);
        let duplicate = DirectoryEntry::builder(format!("cn=p123,ou=sub,ou={OU},{BASE}"))
            .attr("objectClass", "posixGroup")
            .attr("cn", "p123")
            .build();
        let dir = dir.with_entry(duplicate);

        let err = resolver(dir).resolve_members("p123", OU).await.unwrap_err();
        assert!(matches!(err, ConnectorError::AmbiguousResult { count: 2, .. }));
    }

    #[tokio::test]
    async fn test_group_outside_org_unit_not_found() {
        let dir = InMemoryDirectory::new(BASE).with_group("aclgroups", "p123", &[], &[]);
        let err = resolver(dir).find_group("p123", OU).await.unwrap_err();
        assert!(matches!(err, ConnectorError::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_depth_bound() {
        let dir = InMemoryDirectory::new(BASE).with_user("deep");
        let deep_user = dir.user_dn("deep");
        let g2 = dir.group_dn(OU, "g2");
        let g1 = dir.group_dn(OU, "g1");
        let dir = dir
            .with_group(OU, "g2", &[&deep_user], &[])
            .with_group(OU, "g1", &[&g2], &[])
            .with_group(OU, "g0", &[&g1], &[]);

        let membership = DirectoryResolver::new(Arc::new(dir), 1)
            .resolve("g0", OU)
            .await
            .unwrap();
        assert!(membership.users.is_empty());
        assert!(membership.depth_limited);
        assert_eq!(membership.max_depth_traversed, 1);
    }

    #[tokio::test]
    async fn test_non_uid_user_dn_resolved_by_entry() {
        let dir = InMemoryDirectory::new(BASE);
        let person_dn = format!("cn=Dana Smith,ou=people,{BASE}");
        let dir = dir.with_entry(
            DirectoryEntry::builder(person_dn.clone())
                .attr("objectClass", "posixAccount")
                .attr("uid", "dsmith")
                .build(),
        );
        let dir = dir.with_group(OU, "p123", &[&person_dn], &[]);

        let users = resolver(dir).resolve_members("p123", OU).await.unwrap();
        assert_eq!(users, vec!["dsmith"]);
    }

    #[tokio::test]
    async fn test_groups_of_user() {
        let dir = InMemoryDirectory::new(BASE).with_user("alice");
        let alice = dir.user_dn("alice");
        let dir = dir
            .with_group(OU, "p200", &[&alice], &[])
            .with_group(OU, "p100", &[], &["alice"])
            .with_group(OU, "p300", &[], &["bob"]);

        let groups = resolver(dir).groups_of_user("alice", OU).await.unwrap();
        assert_eq!(groups, vec!["p100", "p200"]);
    }

    #[tokio::test]
    async fn test_groups_of_unknown_user() {
        let dir = InMemoryDirectory::new(BASE);
        let err = resolver(dir).groups_of_user("nobody", OU).await.unwrap_err();
        assert!(matches!(err, ConnectorError::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_connection_failure_propagates() {
        let dir = InMemoryDirectory::unreachable(BASE);
        let err = resolver(dir).resolve_members("p123", OU).await.unwrap_err();
        assert!(err.is_fatal());
    }
}
