//! In-memory directory used by tests.

use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::RwLock;

use hpcid_connector::error::{ConnectorError, ConnectorResult};

use crate::directory::{Directory, SearchScope};
use crate::entry::{normalize_dn, DirectoryEntry};
use crate::filter::Filter;

/// Directory backed by a vector of entries.
pub struct InMemoryDirectory {
    base_dn: String,
    entries: RwLock<Vec<DirectoryEntry>>,
    searches: AtomicUsize,
    fail_searches: bool,
}

impl InMemoryDirectory {
    pub fn new(base_dn: impl Into<String>) -> Self {
        Self {
            base_dn: base_dn.into(),
            entries: RwLock::new(Vec::new()),
            searches: AtomicUsize::new(0),
            fail_searches: false,
        }
    }

    /// Every search fails with a connection error.
    pub fn unreachable(base_dn: impl Into<String>) -> Self {
        Self {
            fail_searches: true,
            ..Self::new(base_dn)
        }
    }

    pub fn with_entry(self, entry: DirectoryEntry) -> Self {
        self.insert(entry);
        self
    }

    pub fn insert(&self, entry: DirectoryEntry) {
        if let Ok(mut entries) = self.entries.write() {
            entries.push(entry);
        }
    }

    /// Add a user entry `uid=<name>,ou=people,<base>`.
    pub fn with_user(self, uid: &str) -> Self {
        let dn = format!("uid={},ou=people,{}", uid, self.base_dn);
        let entry = DirectoryEntry::builder(dn)
            .attrs("objectClass", ["posixAccount", "inetOrgPerson"])
            .attr("uid", uid)
            .build();
        self.with_entry(entry)
    }

    /// Add a group `cn=<name>,ou=<ou>,<base>` with the given member DNs
    /// and memberUid values.
    pub fn with_group(self, ou: &str, cn: &str, members: &[&str], member_uids: &[&str]) -> Self {
        let dn = self.group_dn(ou, cn);
        let mut builder = DirectoryEntry::builder(dn)
            .attrs("objectClass", ["groupOfNames", "posixGroup"])
            .attr("cn", cn);
        if !members.is_empty() {
            builder = builder.attrs("member", members.iter().copied());
        }
        if !member_uids.is_empty() {
            builder = builder.attrs("memberUid", member_uids.iter().copied());
        }
        self.with_entry(builder.build())
    }

    pub fn user_dn(&self, uid: &str) -> String {
        format!("uid={},ou=people,{}", uid, self.base_dn)
    }

    pub fn group_dn(&self, ou: &str, cn: &str) -> String {
        format!("cn={},ou={},{}", cn, ou, self.base_dn)
    }

    /// Number of searches served so far.
    pub fn search_count(&self) -> usize {
        self.searches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Directory for InMemoryDirectory {
    fn base_dn(&self) -> &str {
        &self.base_dn
    }

    async fn search(
        &self,
        base: &str,
        scope: SearchScope,
        filter: &Filter,
        _attributes: &[&str],
    ) -> ConnectorResult<Vec<DirectoryEntry>> {
        self.searches.fetch_add(1, Ordering::SeqCst);
        if self.fail_searches {
            return Err(ConnectorError::connection_failed("directory unreachable"));
        }

        let base = normalize_dn(base);
        let suffix = format!(",{base}");
        let entries = self
            .entries
            .read()
            .map_err(|_| ConnectorError::connection_failed("directory lock poisoned"))?;

        Ok(entries
            .iter()
            .filter(|entry| {
                let dn = normalize_dn(entry.dn());
                match scope {
                    SearchScope::Base => dn == base,
                    SearchScope::Subtree => dn == base || dn.ends_with(&suffix),
                }
            })
            .filter(|entry| filter.matches(entry))
            .cloned()
            .collect())
    }
}
