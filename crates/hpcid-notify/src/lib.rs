//! # Outcome Reporting
//!
//! Every pass ends with three blocks of text: failed, completed and
//! warned. [`OutcomeReporter`] delivers them; [`SlackReporter`] posts to an
//! incoming webhook and [`LogReporter`] writes them to the log.
//!
//! A notification with nothing in any delivered block is never sent.

pub mod notification;
pub mod reporter;
pub mod slack;
#[cfg(any(test, feature = "test-support"))]
pub mod testing;

pub use notification::{Notification, DRY_RUN_SUFFIX};
pub use reporter::{LogReporter, OutcomeReporter};
pub use slack::{SlackConfig, SlackReporter};
#[cfg(any(test, feature = "test-support"))]
pub use testing::RecordingReporter;
