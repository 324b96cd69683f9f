//! # Backend Contract
//!
//! Core abstractions shared by every hpcid backend.
//!
//! A reconciliation pass compares desired state (directory membership and
//! allocation registry) with what each backend reports, then issues a
//! bounded set of corrective actions. This crate holds the pieces every
//! backend shares:
//!
//! - [`BackendAdapter`] - uniform observe/apply contract
//! - [`BackendState`] / [`DesiredState`] - per-project state on each backend
//! - [`CommandExecutor`] - external commands with a dry-run gate and timeout
//! - [`ConnectorError`] - error taxonomy with pass-level classification
//!
//! ## Crate Organization
//!
//! - [`types`] - Backend kinds and state
//! - [`error`] - Error types with fatal/per-item classification
//! - [`traits`] - Backend adapter trait
//! - [`command`] - Command runner and executor
//! - [`config`] - Connection settings
//! - [`resilience`] - Timeouts and pacing

pub mod command;
pub mod config;
pub mod error;
pub mod resilience;
pub mod traits;
pub mod types;

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::command::{
        CommandExecutor, CommandOutput, CommandRunner, CommandSpec, ProcessRunner,
    };
    pub use crate::config::ConnectionSettings;
    pub use crate::error::{ConnectorError, ConnectorResult};
    pub use crate::resilience::{with_timeout, Pacer};
    pub use crate::traits::{BackendAdapter, Snapshot};
    pub use crate::types::{ApplyOutcome, BackendKind, BackendState, DesiredState};
}

// Re-export async_trait for backend implementors
pub use async_trait::async_trait;

pub use prelude::*;
