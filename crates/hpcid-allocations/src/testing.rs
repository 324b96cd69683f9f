//! In-memory allocation source for tests.

use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use hpcid_connector::error::{ConnectorError, ConnectorResult};

use crate::registry::{AllocationRegistry, QuotaClass, CRYO_FLAG, MX_FLAG, PARENT_PROJECT, PROJECT_CODE, STATUS};
use crate::source::AllocationSource;
use crate::table::AllocationTable;

/// Allocation rows held in memory.
#[derive(Debug, Default)]
pub struct StaticAllocations {
    rows: Vec<[String; 5]>,
    allow_list: Vec<String>,
    unreachable: AtomicBool,
    calls: AtomicUsize,
}

impl StaticAllocations {
    pub fn new() -> Self {
        Self::default()
    }

    /// An approved project with no quota flags.
    pub fn with_project(self, code: &str, parent: &str) -> Self {
        self.with_row(code, parent, "Approved", false, false)
    }

    pub fn with_row(mut self, code: &str, parent: &str, status: &str, mx: bool, cryo: bool) -> Self {
        let flag = |b: bool| (if b { "Yes" } else { "No" }).to_string();
        self.rows.push([
            code.to_string(),
            parent.to_string(),
            status.to_string(),
            flag(mx),
            flag(cryo),
        ]);
        self
    }

    pub fn with_allowed_name(mut self, code: &str) -> Self {
        self.allow_list.push(code.to_string());
        self
    }

    /// Every call fails as if the sheet could not be reached.
    pub fn unreachable(self) -> Self {
        self.unreachable.store(true, Ordering::SeqCst);
        self
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn registry(&self) -> ConnectorResult<AllocationRegistry> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.unreachable.load(Ordering::SeqCst) {
            return Err(ConnectorError::connection_failed("allocation sheet unreachable"));
        }
        let mut values = vec![[PROJECT_CODE, PARENT_PROJECT, STATUS, MX_FLAG, CRYO_FLAG]
            .iter()
            .map(|h| (*h).to_string())
            .collect::<Vec<_>>()];
        values.extend(self.rows.iter().map(|r| r.to_vec()));
        let table = AllocationTable::from_values(values)?;
        AllocationRegistry::from_table(&table, self.allow_list.clone())
    }
}

#[async_trait]
impl AllocationSource for StaticAllocations {
    async fn list_eligible_projects(&self, parent: Option<&str>) -> ConnectorResult<Vec<String>> {
        Ok(self.registry()?.eligible_projects(parent))
    }

    async fn get_parent(&self, code: &str) -> ConnectorResult<String> {
        self.registry()?.parent(code)
    }

    async fn get_quota_class(&self, code: &str) -> ConnectorResult<QuotaClass> {
        self.registry()?.quota_class(code)
    }
}
