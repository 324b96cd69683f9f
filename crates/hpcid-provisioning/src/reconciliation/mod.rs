//! # Reconciliation Passes
//!
//! Diff-and-converge passes between desired state (allocation registry and
//! directory) and the backends.
//!
//! ## Overview
//!
//! - [`ReconciliationEngine`] provisions projects: scheduler accounts and
//!   project storage
//! - [`AssociationReconciler`] adds missing user-to-account associations
//! - [`SymlinkReconciler`] maintains project links in home directories
//! - [`HomeDirReconciler`] creates missing home directories for a cluster's
//!   ACL group
//! - [`HomeRepairReconciler`] fixes ownership and SSH keys of existing homes
//!
//! Every pass is bounded by a batch limit, honors dry-run through the
//! command executor, and ends in a [`PassReport`].
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────┐
//! │                        ReconciliationEngine                         │
//! ├─────────────────────────────────────────────────────────────────────┤
//! │                                                                     │
//! │  ┌───────────┐    ┌───────────┐    ┌────────────┐    ┌───────────┐  │
//! │  │ Scanning  │───►│  Diffing  │───►│ Converging │───►│ Verifying │  │
//! │  └───────────┘    └───────────┘    └────────────┘    └───────────┘  │
//! │        │                │                 │                 │       │
//! │        ▼                ▼                 ▼                 ▼       │
//! │  ┌───────────────────────────────────────────────────────────────┐  │
//! │  │                 PassReport (Reporting)                        │  │
//! │  └───────────────────────────────────────────────────────────────┘  │
//! │                                                                     │
//! └─────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//!
//! ```ignore
//! use hpcid_provisioning::reconciliation::{ReconciliationConfig, ReconciliationEngine};
//!
//! let engine = ReconciliationEngine::new(&registry, ReconciliationConfig::new("m3", 10));
//! let report = engine.run().await?;
//! for project in &report.explore {
//!     println!("still pending: {project}");
//! }
//! ```

pub mod associations;
pub mod engine;
pub mod homedirs;
pub mod report;
pub mod selection;
pub mod symlinks;
pub mod userhome;

// Re-export main types
pub use associations::AssociationReconciler;
pub use engine::{PassPhase, ReconciliationConfig, ReconciliationEngine};
pub use homedirs::HomeDirReconciler;
pub use report::{PassKind, PassReport, PassStatistics};
pub use selection::{resolve_membership, DesiredMembership, MembershipSelection};
pub use symlinks::SymlinkReconciler;
pub use userhome::HomeRepairReconciler;
