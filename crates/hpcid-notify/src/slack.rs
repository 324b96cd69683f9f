//! Slack incoming-webhook reporter.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::time::Duration;
use tracing::{debug, error, info, instrument};

use hpcid_connector::error::{ConnectorError, ConnectorResult};

use crate::notification::Notification;
use crate::reporter::OutcomeReporter;

/// Slack webhook settings.
#[derive(Clone, Serialize, Deserialize)]
pub struct SlackConfig {
    /// Incoming-webhook URL.
    pub webhook: String,

    /// Name appended to the job in the message username. Defaults to the
    /// host name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender: Option<String>,

    /// HTTP request timeout in seconds.
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

fn default_request_timeout() -> u64 {
    10
}

impl std::fmt::Debug for SlackConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SlackConfig")
            .field("webhook", &"***REDACTED***")
            .field("sender", &self.sender)
            .field("request_timeout_secs", &self.request_timeout_secs)
            .finish()
    }
}

impl SlackConfig {
    pub fn new(webhook: impl Into<String>) -> Self {
        Self {
            webhook: webhook.into(),
            sender: None,
            request_timeout_secs: default_request_timeout(),
        }
    }

    pub fn with_sender(mut self, sender: impl Into<String>) -> Self {
        self.sender = Some(sender.into());
        self
    }

    pub fn validate(&self) -> ConnectorResult<()> {
        if !(self.webhook.starts_with("https://") || self.webhook.starts_with("http://")) {
            return Err(ConnectorError::invalid_config("slack webhook must be an http(s) URL"));
        }
        Ok(())
    }
}

fn attachment(title: &str, color: &str, text: &str) -> Value {
    json!({
        "fallback": text.trim_matches('`'),
        "color": color,
        "title": title,
        "text": text,
        "mrkdwn_in": ["text"],
    })
}

/// Build the webhook payload. Empty blocks are left out.
pub fn payload(notification: &Notification, sender: &str) -> Value {
    let mut attachments = Vec::new();
    if !notification.failed.is_empty() {
        attachments.push(attachment("FAILED", "danger", &notification.failed));
    }
    if !notification.completed.is_empty() {
        attachments.push(attachment("COMPLETED", "good", &notification.completed));
    }
    if let Some(warned) = notification.included_warnings() {
        attachments.push(attachment("WARNING", "warning", warned));
    }

    json!({
        "attachments": attachments,
        "username": format!("{}-{}", notification.job_name, sender),
        "icon_emoji": format!(":{}:", notification.icon),
        "mrkdwn": true,
    })
}

/// Posts notifications to a Slack incoming webhook.
pub struct SlackReporter {
    http: Client,
    webhook: String,
    sender: String,
    timeout_secs: u64,
}

impl std::fmt::Debug for SlackReporter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SlackReporter")
            .field("sender", &self.sender)
            .finish()
    }
}

impl SlackReporter {
    pub fn new(config: &SlackConfig, default_sender: &str) -> ConnectorResult<Self> {
        config.validate()?;
        let http = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|e| ConnectorError::connection_failed_with_source("building HTTP client", e))?;
        Ok(Self {
            http,
            webhook: config.webhook.clone(),
            sender: config
                .sender
                .clone()
                .unwrap_or_else(|| default_sender.to_string()),
            timeout_secs: config.request_timeout_secs,
        })
    }
}

#[async_trait]
impl OutcomeReporter for SlackReporter {
    #[instrument(skip_all, fields(job = %notification.job_name))]
    async fn report(&self, notification: &Notification) -> ConnectorResult<bool> {
        if notification.is_empty() {
            if notification.send_warnings {
                info!("No messages to be sent to slack");
            } else {
                debug!("No messages to be sent to slack");
            }
            return Ok(false);
        }

        let body = payload(notification, &self.sender);
        debug!(payload = %body, "Slack payload");

        let response = self
            .http
            .post(&self.webhook)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    ConnectorError::ConnectionTimeout {
                        operation: "slack webhook".to_string(),
                        timeout_secs: self.timeout_secs,
                    }
                } else {
                    ConnectorError::connection_failed_with_source("slack webhook request failed", e)
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            error!(status = %status, response = %text, "Request to slack returned an error");
            return Err(ConnectorError::connection_failed(format!(
                "slack webhook returned {status}"
            )));
        }
        Ok(true)
    }
}
