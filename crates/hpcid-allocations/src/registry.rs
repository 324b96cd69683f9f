//! Project eligibility, parents and quota classes
//!
//! A project is eligible when its `Status` is `Approved` or `Ongoing` and
//! its code either starts with letters followed by digits (`p123`,
//! `cvl01`) or appears on the allow-list of legacy names.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use hpcid_connector::error::{ConnectorError, ConnectorResult};

use crate::table::AllocationTable;

pub const PROJECT_CODE: &str = "Project Code";
pub const PARENT_PROJECT: &str = "Parent Project";
pub const STATUS: &str = "Status";
pub const MX_FLAG: &str = "5.2 Is this work related to MX Collaborative Access Program (CAP)?";
pub const CRYO_FLAG: &str = "5.1 Is this work related to CRYO-EM?";

/// Parent code of CVL projects.
pub const CVL_PARENT: &str = "p004";

const PROJECT_CODE_PATTERN: &str = r"^[a-zA-Z]+[0-9]+";
const APPROVED_STATUSES: [&str; 2] = ["Approved", "Ongoing"];

/// Storage quota classification of a project.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QuotaClass {
    #[default]
    Default,
    Mx,
    Cryo,
    Cvl,
}

impl QuotaClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            QuotaClass::Default => "default",
            QuotaClass::Mx => "mx",
            QuotaClass::Cryo => "cryo",
            QuotaClass::Cvl => "cvl",
        }
    }
}

impl fmt::Display for QuotaClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One row of the allocation sheet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Project {
    pub code: String,
    pub parent: String,
    pub status: String,
    pub mx: bool,
    pub cryo: bool,
}

impl Project {
    pub fn is_approved(&self) -> bool {
        APPROVED_STATUSES.contains(&self.status.as_str())
    }

    /// Later rules override earlier ones: default, mx, cryo, cvl.
    pub fn quota_class(&self) -> QuotaClass {
        let mut class = QuotaClass::Default;
        if self.mx {
            class = QuotaClass::Mx;
        }
        if self.cryo {
            class = QuotaClass::Cryo;
        }
        if self.parent == CVL_PARENT {
            class = QuotaClass::Cvl;
        }
        class
    }
}

/// Projects read from the allocation sheet, keyed by code.
#[derive(Debug, Clone)]
pub struct AllocationRegistry {
    projects: BTreeMap<String, Project>,
    allow_list: Vec<String>,
    pattern: Regex,
}

impl AllocationRegistry {
    /// Read every project row. All columns the registry relies on must be
    /// present in the header.
    pub fn from_table(table: &AllocationTable, allow_list: Vec<String>) -> ConnectorResult<Self> {
        let code_col = table.column(PROJECT_CODE)?;
        let parent_col = table.column(PARENT_PROJECT)?;
        let status_col = table.column(STATUS)?;
        let mx_col = table.column(MX_FLAG)?;
        let cryo_col = table.column(CRYO_FLAG)?;

        let mut projects = BTreeMap::new();
        for row in table.rows() {
            let code = row[code_col].trim();
            if code.is_empty() {
                continue;
            }
            // First row for a code wins.
            projects.entry(code.to_string()).or_insert_with(|| Project {
                code: code.to_string(),
                parent: row[parent_col].trim().to_string(),
                status: row[status_col].trim().to_string(),
                mx: row[mx_col].trim() == "Yes",
                cryo: row[cryo_col].trim() == "Yes",
            });
        }

        let pattern = Regex::new(PROJECT_CODE_PATTERN).map_err(|e| ConnectorError::InvalidConfiguration {
            message: format!("invalid project code pattern: {e}"),
        })?;

        Ok(Self {
            projects,
            allow_list,
            pattern,
        })
    }

    pub fn len(&self) -> usize {
        self.projects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.projects.is_empty()
    }

    pub fn project(&self, code: &str) -> ConnectorResult<&Project> {
        self.projects
            .get(code)
            .ok_or_else(|| ConnectorError::not_found("project", code))
    }

    pub fn is_valid_name(&self, code: &str) -> bool {
        self.pattern.is_match(code) || self.allow_list.iter().any(|a| a == code)
    }

    pub fn is_eligible(&self, project: &Project) -> bool {
        project.is_approved() && self.is_valid_name(&project.code)
    }

    /// Eligible project codes in sorted order, optionally limited to the
    /// children of one parent.
    pub fn eligible_projects(&self, parent: Option<&str>) -> Vec<String> {
        self.projects
            .values()
            .filter(|p| self.is_eligible(p))
            .filter(|p| parent.map_or(true, |parent| p.parent == parent))
            .map(|p| p.code.clone())
            .collect()
    }

    /// Approved projects rejected by the naming rules.
    pub fn invalid_projects(&self) -> Vec<String> {
        self.projects
            .values()
            .filter(|p| p.is_approved() && !self.is_valid_name(&p.code))
            .map(|p| p.code.clone())
            .collect()
    }

    pub fn parent(&self, code: &str) -> ConnectorResult<String> {
        Ok(self.project(code)?.parent.clone())
    }

    pub fn quota_class(&self, code: &str) -> ConnectorResult<QuotaClass> {
        Ok(self.project(code)?.quota_class())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table(rows: &[[&str; 5]]) -> AllocationTable {
        let mut values = vec![vec![
            PROJECT_CODE.to_string(),
            PARENT_PROJECT.to_string(),
            STATUS.to_string(),
            MX_FLAG.to_string(),
            CRYO_FLAG.to_string(),
        ]];
        values.extend(
            rows.iter()
                .map(|r| r.iter().map(|c| (*c).to_string()).collect()),
        );
        AllocationTable::from_values(values).unwrap()
    }

    fn registry(rows: &[[&str; 5]]) -> AllocationRegistry {
        AllocationRegistry::from_table(&table(rows), vec!["training".to_string()]).unwrap()
    }

    #[test]
    fn test_eligibility() {
        let reg = registry(&[
            ["p123", "root", "Approved", "", ""],
            ["p200", "root", "Ongoing", "", ""],
            ["p300", "root", "Pending", "", ""],
            ["training", "root", "Approved", "", ""],
            ["misc-stuff", "root", "Approved", "", ""],
            ["123abc", "root", "Approved", "", ""],
        ]);
        assert_eq!(
            reg.eligible_projects(None),
            vec!["p123".to_string(), "p200".to_string(), "training".to_string()]
        );
        assert_eq!(
            reg.invalid_projects(),
            vec!["123abc".to_string(), "misc-stuff".to_string()]
        );
    }

    #[test]
    fn test_parent_filter() {
        let reg = registry(&[
            ["p123", "root", "Approved", "", ""],
            ["cvl01", "p004", "Approved", "", ""],
            ["cvl02", "p100", "Approved", "", ""],
        ]);
        assert_eq!(reg.eligible_projects(Some("p004")), vec!["cvl01".to_string()]);
    }

    #[test]
    fn test_quota_class_precedence() {
        let reg = registry(&[
            ["p1", "root", "Approved", "", ""],
            ["p2", "root", "Approved", "Yes", ""],
            ["p3", "root", "Approved", "Yes", "Yes"],
            ["p4", "p004", "Approved", "Yes", "Yes"],
        ]);
        assert_eq!(reg.quota_class("p1").unwrap(), QuotaClass::Default);
        assert_eq!(reg.quota_class("p2").unwrap(), QuotaClass::Mx);
        assert_eq!(reg.quota_class("p3").unwrap(), QuotaClass::Cryo);
        assert_eq!(reg.quota_class("p4").unwrap(), QuotaClass::Cvl);
    }

    #[test]
    fn test_unknown_project_not_found() {
        let reg = registry(&[["p1", "root", "Approved", "", ""]]);
        assert_eq!(reg.parent("p1").unwrap(), "root");
        assert_eq!(reg.parent("p9").unwrap_err().error_code(), "NOT_FOUND");
    }

    #[test]
    fn test_missing_flag_column_fails_at_load() {
        let values = vec![
            vec![PROJECT_CODE.to_string(), PARENT_PROJECT.to_string(), STATUS.to_string()],
            vec!["p1".to_string(), "root".to_string(), "Approved".to_string()],
        ];
        let table = AllocationTable::from_values(values).unwrap();
        let err = AllocationRegistry::from_table(&table, Vec::new()).unwrap_err();
        assert!(matches!(err, ConnectorError::FieldNotFound { .. }));
        assert!(err.is_fatal());
    }
}
