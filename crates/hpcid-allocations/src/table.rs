//! Header-keyed view of the allocation sheet.
//!
//! The first row names the columns. Cells are always looked up by column
//! name so reordering the sheet is harmless, while a renamed or deleted
//! column fails with [`ConnectorError::FieldNotFound`].

use hpcid_connector::error::{ConnectorError, ConnectorResult};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AllocationTable {
    header: Vec<String>,
    rows: Vec<Vec<String>>,
}

impl AllocationTable {
    /// Build from raw sheet values, header first. Rows shorter than the
    /// header are padded with empty cells.
    pub fn from_values(values: Vec<Vec<String>>) -> ConnectorResult<Self> {
        let mut values = values.into_iter();
        let header = values.next().ok_or_else(|| ConnectorError::InvalidData {
            message: "allocation sheet has no header row".to_string(),
        })?;
        let rows = values
            .map(|mut row| {
                if row.len() < header.len() {
                    row.resize(header.len(), String::new());
                }
                row
            })
            .collect();
        Ok(Self { header, rows })
    }

    pub fn header(&self) -> &[String] {
        &self.header
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Index of a named column.
    pub fn column(&self, name: &str) -> ConnectorResult<usize> {
        self.header
            .iter()
            .position(|h| h == name)
            .ok_or_else(|| ConnectorError::FieldNotFound {
                field: name.to_string(),
                available: self.header.join(", "),
            })
    }

    /// Cell at `row` in the named column.
    pub fn field(&self, row: usize, name: &str) -> ConnectorResult<&str> {
        let col = self.column(name)?;
        Ok(self
            .rows
            .get(row)
            .and_then(|r| r.get(col))
            .map(String::as_str)
            .unwrap_or(""))
    }

    pub fn rows(&self) -> &[Vec<String>] {
        &self.rows
    }
}
