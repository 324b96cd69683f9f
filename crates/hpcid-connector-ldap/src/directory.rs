//! Directory access contract.

use async_trait::async_trait;
use hpcid_connector::error::ConnectorResult;

use crate::entry::DirectoryEntry;
use crate::filter::Filter;

/// Search scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchScope {
    /// The base entry only.
    Base,
    /// The base entry and everything beneath it.
    Subtree,
}

/// Read access to a directory service.
#[async_trait]
pub trait Directory: Send + Sync {
    /// Base DN all searches are rooted under.
    fn base_dn(&self) -> &str;

    /// Search for entries. An empty `attributes` slice requests all
    /// user attributes.
    async fn search(
        &self,
        base: &str,
        scope: SearchScope,
        filter: &Filter,
        attributes: &[&str],
    ) -> ConnectorResult<Vec<DirectoryEntry>>;
}
