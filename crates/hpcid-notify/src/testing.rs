//! Reporter that records what it is given.

use async_trait::async_trait;
use std::sync::Mutex;

use hpcid_connector::error::ConnectorResult;

use crate::notification::Notification;
use crate::reporter::OutcomeReporter;

#[derive(Debug, Default)]
pub struct RecordingReporter {
    received: Mutex<Vec<Notification>>,
}

impl RecordingReporter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every notification handed over, including empty ones.
    pub fn received(&self) -> Vec<Notification> {
        self.received.lock().map(|r| r.clone()).unwrap_or_default()
    }

    /// Notifications that would have been delivered.
    pub fn delivered(&self) -> Vec<Notification> {
        self.received()
            .into_iter()
            .filter(|n| !n.is_empty())
            .collect()
    }
}

#[async_trait]
impl OutcomeReporter for RecordingReporter {
    async fn report(&self, notification: &Notification) -> ConnectorResult<bool> {
        if let Ok(mut received) = self.received.lock() {
            received.push(notification.clone());
        }
        Ok(!notification.is_empty())
    }
}
