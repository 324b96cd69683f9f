//! # Provisioning Passes
//!
//! Reconciliation passes that converge the scheduler accounting database,
//! project storage, home-directory links and home directories to the state
//! described by the allocation registry and the directory.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────┐   ┌──────────────────┐
//! │ AllocationSource │   │DirectoryResolver │       desired state
//! └────────┬─────────┘   └────────┬─────────┘
//!          └───────────┬──────────┘
//!                      ▼
//!          ┌───────────────────────┐    ┌──────────────────┐
//!          │  ReconciliationEngine │───►│  BackendAdapter  │  actual state,
//!          │  / pass reconcilers   │◄───│ (slurm, storage) │  bounded apply
//!          └───────────┬───────────┘    └──────────────────┘
//!                      ▼
//!          ┌───────────────────────┐
//!          │ PassReport ──► Notify │
//!          └───────────────────────┘
//! ```
//!
//! Every client a pass needs is built once, up front, by
//! [`ClientRegistry::build`] from the YAML files in the configuration
//! directory, and handed to the pass explicitly.
//!
//! ## Example
//!
//! ```ignore
//! use hpcid_provisioning::{Capability, CapabilitySet, ClientRegistry, RunMode};
//! use hpcid_provisioning::reconciliation::{ReconciliationConfig, ReconciliationEngine};
//!
//! let registry = ClientRegistry::build(
//!     Path::new("/etc/hpcid"),
//!     &ReconciliationEngine::capabilities(),
//!     RunMode::DryRun,
//!     "m3",
//! )?;
//! let report = ReconciliationEngine::new(&registry, ReconciliationConfig::new("m3", 10))
//!     .run()
//!     .await?;
//! registry.reporter()?.report(&report.to_notification()).await?;
//! ```

pub mod cluster;
pub mod reconciliation;
pub mod registry;
pub mod settings;

pub use cluster::ClusterFamily;
pub use registry::{Capability, CapabilitySet, ClientRegistry, DirectoryClient, RunMode};
pub use settings::ConfigDir;
