//! # Allocation Registry
//!
//! Project metadata for hpcid, read from the allocation spreadsheet.
//!
//! - [`AllocationSource`] - eligible projects, parents and quota classes
//! - [`AllocationRegistry`] - eligibility and quota rules over the sheet rows
//! - [`SheetsClient`] - Google Sheets v4 values client
//!
//! The registry is read-only. Nothing in a reconciliation pass writes back
//! to the sheet.

pub mod config;
pub mod registry;
pub mod sheets;
pub mod source;
pub mod table;
#[cfg(any(test, feature = "test-support"))]
pub mod testing;

pub use config::AllocationsConfig;
pub use registry::{AllocationRegistry, Project, QuotaClass, CVL_PARENT};
pub use sheets::{ServiceAccountKey, SheetsAllocationSource, SheetsClient};
pub use source::AllocationSource;
pub use table::AllocationTable;
#[cfg(any(test, feature = "test-support"))]
pub use testing::StaticAllocations;
