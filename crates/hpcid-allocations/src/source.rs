//! Allocation source contract.

use async_trait::async_trait;

use hpcid_connector::error::ConnectorResult;

use crate::registry::{AllocationRegistry, QuotaClass};

/// Read-only view of the project allocation registry.
#[async_trait]
pub trait AllocationSource: Send + Sync {
    /// Approved, name-valid project codes in sorted order, optionally only
    /// the children of `parent`.
    async fn list_eligible_projects(&self, parent: Option<&str>) -> ConnectorResult<Vec<String>>;

    /// Declared parent of a project. Empty when the sheet has none.
    async fn get_parent(&self, code: &str) -> ConnectorResult<String>;

    async fn get_quota_class(&self, code: &str) -> ConnectorResult<QuotaClass>;
}

#[async_trait]
impl AllocationSource for AllocationRegistry {
    async fn list_eligible_projects(&self, parent: Option<&str>) -> ConnectorResult<Vec<String>> {
        Ok(self.eligible_projects(parent))
    }

    async fn get_parent(&self, code: &str) -> ConnectorResult<String> {
        self.parent(code)
    }

    async fn get_quota_class(&self, code: &str) -> ConnectorResult<QuotaClass> {
        self.quota_class(code)
    }
}
