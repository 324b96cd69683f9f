//! # Scheduler Connector
//!
//! Slurm accounting backend for hpcid, driven through `sacctmgr`.
//!
//! - [`SchedulerBackend`] - bulk state queries, account creation, paced
//!   user additions, health checks
//! - [`parse`] - `--parsable2` table parsing
//!
//! Membership changes are strictly additive. Removing associations from the
//! accounting database is not supported.

pub mod backend;
pub mod config;
pub mod parse;
#[cfg(any(test, feature = "test-support"))]
pub mod simulator;

pub use backend::SchedulerBackend;
pub use config::SlurmConfig;
#[cfg(any(test, feature = "test-support"))]
pub use simulator::SlurmSimulator;
