//! Outcome reporter contract and the log-only reporter.

use async_trait::async_trait;
use tracing::{debug, error, info, warn};

use hpcid_connector::error::ConnectorResult;

use crate::notification::Notification;

/// Delivers pass outcomes.
#[async_trait]
pub trait OutcomeReporter: Send + Sync {
    /// Deliver a notification. Returns `false` when there was nothing to
    /// send.
    async fn report(&self, notification: &Notification) -> ConnectorResult<bool>;
}

/// Writes outcomes to the log only.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogReporter;

#[async_trait]
impl OutcomeReporter for LogReporter {
    async fn report(&self, notification: &Notification) -> ConnectorResult<bool> {
        if notification.is_empty() {
            debug!(job = %notification.job_name, "No messages to report");
            return Ok(false);
        }
        let job = &notification.job_name;
        if !notification.failed.is_empty() {
            error!(job = %job, "FAILED {}", notification.failed);
        }
        if !notification.completed.is_empty() {
            info!(job = %job, "COMPLETED {}", notification.completed);
        }
        if let Some(warned) = notification.included_warnings() {
            warn!(job = %job, "WARNING {warned}");
        }
        Ok(true)
    }
}
