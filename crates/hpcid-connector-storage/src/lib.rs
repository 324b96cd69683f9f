//! # Storage Connector
//!
//! POSIX storage backends for hpcid.
//!
//! - [`StorageBackend`] - one group-owned project directory per mount point
//! - [`HomeLinks`] - project links inside user home directories
//! - [`HomeDirectories`] - per-user home directories on the NFS server
//! - [`HomeRepair`] - ownership and SSH keys of existing home directories
//!
//! All changes go through a [`CommandExecutor`](hpcid_connector::command::CommandExecutor),
//! so dry-run passes read the filesystem but never modify it.

pub mod config;
pub mod homedirs;
pub mod links;
pub mod project;
#[cfg(any(test, feature = "test-support"))]
pub mod simulator;
pub mod userhome;

pub use config::{HomeDirConfig, QuotaTool, StorageConfig, UserQuota};
pub use homedirs::{current_hostname, HomeDirectories};
pub use links::{HomeLinks, LinkOutcome};
pub use project::StorageBackend;
#[cfg(any(test, feature = "test-support"))]
pub use simulator::FilesystemSimulator;
pub use userhome::{HomeHealth, HomeRepair, HomeState, Ownership};
