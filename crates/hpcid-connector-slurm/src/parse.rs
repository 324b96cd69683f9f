//! Parsing of `sacctmgr --parsable` and `scontrol ping` output.
//!
//! Tables are pipe-delimited with a header row. Columns are looked up by
//! header name; missing trailing cells read as empty strings.

use std::collections::{BTreeMap, BTreeSet};

use hpcid_connector::error::{ConnectorError, ConnectorResult};

/// A parsed pipe-delimited table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipeTable {
    header: Vec<String>,
    rows: Vec<Vec<String>>,
}

impl PipeTable {
    /// Parse `--parsable` (trailing `|`) or `--parsable2` output.
    pub fn parse(command: &str, text: &str) -> ConnectorResult<Self> {
        let mut lines = text
            .lines()
            .map(|l| l.trim_end_matches('\r'))
            .filter(|l| !l.trim().is_empty());

        let header_line = lines.next().ok_or_else(|| ConnectorError::UnexpectedOutput {
            command: command.to_string(),
            message: "missing header row".to_string(),
        })?;
        let header: Vec<String> = split_row(header_line)
            .into_iter()
            .map(|h| h.trim().to_string())
            .collect();
        if header.iter().all(String::is_empty) {
            return Err(ConnectorError::UnexpectedOutput {
                command: command.to_string(),
                message: "empty header row".to_string(),
            });
        }

        let mut rows = Vec::new();
        for line in lines {
            let mut cells: Vec<String> = split_row(line)
                .into_iter()
                .map(|c| c.trim().to_string())
                .collect();
            if cells.len() > header.len() {
                return Err(ConnectorError::UnexpectedOutput {
                    command: command.to_string(),
                    message: format!(
                        "row has {} fields, header has {}: {line}",
                        cells.len(),
                        header.len()
                    ),
                });
            }
            cells.resize(header.len(), String::new());
            rows.push(cells);
        }

        Ok(Self { header, rows })
    }

    /// Index of a column, matched case-insensitively.
    pub fn column(&self, command: &str, name: &str) -> ConnectorResult<usize> {
        self.header
            .iter()
            .position(|h| h.eq_ignore_ascii_case(name))
            .ok_or_else(|| ConnectorError::UnexpectedOutput {
                command: command.to_string(),
                message: format!("missing column '{name}' in header {:?}", self.header),
            })
    }

    pub fn rows(&self) -> &[Vec<String>] {
        &self.rows
    }
}

/// Split a row, dropping the single trailing delimiter `--parsable` emits.
fn split_row(line: &str) -> Vec<&str> {
    let line = line.strip_suffix('|').unwrap_or(line);
    line.split('|').collect()
}

/// Account → parent account. Rows with a blank parent (user associations,
/// the root account) carry no parent and are skipped.
pub fn parse_parent_map(command: &str, text: &str) -> ConnectorResult<BTreeMap<String, String>> {
    let table = PipeTable::parse(command, text)?;
    let parent_col = table.column(command, "Par Name")?;
    let account_col = table.column(command, "Account")?;

    let mut parents = BTreeMap::new();
    for row in table.rows() {
        let account = &row[account_col];
        let parent = &row[parent_col];
        if account.is_empty() || parent.is_empty() {
            continue;
        }
        parents
            .entry(account.clone())
            .or_insert_with(|| parent.clone());
    }
    Ok(parents)
}

/// Account → users associated with it. An account row with a blank user
/// records the account with no members.
pub fn parse_associations(
    command: &str,
    text: &str,
) -> ConnectorResult<BTreeMap<String, BTreeSet<String>>> {
    let table = PipeTable::parse(command, text)?;
    let account_col = table.column(command, "Account")?;
    let user_col = table.column(command, "User")?;

    let mut associations: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
    for row in table.rows() {
        let account = &row[account_col];
        if account.is_empty() {
            continue;
        }
        let users = associations.entry(account.clone()).or_default();
        let user = &row[user_col];
        if !user.is_empty() {
            users.insert(user.clone());
        }
    }
    Ok(associations)
}

/// Whether `scontrol ping` reports a responding controller.
///
/// Recognizes both the per-controller form
/// (`Slurmctld(primary) at head1 is UP`) and the older combined
/// `Slurmctld(primary/backup) at head1/head2 are DOWN/DOWN` form.
pub fn controller_is_up(text: &str) -> bool {
    for line in text.lines().map(str::trim).filter(|l| !l.is_empty()) {
        if line.contains("DOWN/DOWN") {
            return false;
        }
        if let Some(state) = line.rsplit(' ').next() {
            if state.split('/').any(|s| s == "UP") {
                return true;
            }
        }
    }
    false
}
