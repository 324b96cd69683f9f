//! Bounded calls and pacing.
//!
//! Every external call is wrapped in [`with_timeout`] so an unresponsive
//! dependency cannot stall a pass. [`Pacer`] enforces a minimum gap between
//! successive calls against a shared backend.

use std::future::Future;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::error::{ConnectorError, ConnectorResult};

/// Await `fut`, failing with [`ConnectorError::ConnectionTimeout`] once
/// `timeout` elapses.
pub async fn with_timeout<F, T>(
    timeout: Duration,
    operation: impl Into<String>,
    fut: F,
) -> ConnectorResult<T>
where
    F: Future<Output = T>,
{
    match tokio::time::timeout(timeout, fut).await {
        Ok(value) => Ok(value),
        Err(_) => {
            let operation = operation.into();
            warn!(operation = %operation, timeout_secs = timeout.as_secs(), "Call timed out");
            Err(ConnectorError::ConnectionTimeout {
                operation,
                timeout_secs: timeout.as_secs(),
            })
        }
    }
}

/// Enforces a minimum interval between successive calls.
///
/// The first call proceeds immediately; later calls sleep until `interval`
/// has passed since the previous one was released.
#[derive(Debug)]
pub struct Pacer {
    interval: Duration,
    last: Mutex<Option<Instant>>,
}

impl Pacer {
    #[must_use]
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last: Mutex::new(None),
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Wait for the next slot.
    pub async fn pace(&self) {
        let mut last = self.last.lock().await;
        if let Some(previous) = *last {
            let ready_at = previous + self.interval;
            let now = Instant::now();
            if ready_at > now {
                debug!(wait_ms = (ready_at - now).as_millis() as u64, "Pacing backend call");
                tokio::time::sleep_until(ready_at).await;
            }
        }
        *last = Some(Instant::now());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_with_timeout_passes_value_through() {
        let value = with_timeout(Duration::from_secs(1), "noop", async { 42 })
            .await
            .unwrap();
        assert_eq!(value, 42);
    }

    #[tokio::test(start_paused = true)]
    async fn test_with_timeout_elapses() {
        let result = with_timeout(
            Duration::from_secs(5),
            "ldap search",
            tokio::time::sleep(Duration::from_secs(60)),
        )
        .await;
        match result {
            Err(ConnectorError::ConnectionTimeout {
                operation,
                timeout_secs,
            }) => {
                assert_eq!(operation, "ldap search");
                assert_eq!(timeout_secs, 5);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_pacer_spaces_calls() {
        let pacer = Pacer::new(Duration::from_secs(5));
        let start = Instant::now();

        pacer.pace().await;
        assert!(start.elapsed() < Duration::from_secs(1));

        pacer.pace().await;
        assert!(start.elapsed() >= Duration::from_secs(5));

        pacer.pace().await;
        assert!(start.elapsed() >= Duration::from_secs(10));
    }

    #[tokio::test(start_paused = true)]
    async fn test_pacer_does_not_wait_after_idle() {
        let pacer = Pacer::new(Duration::from_secs(5));
        pacer.pace().await;
        tokio::time::sleep(Duration::from_secs(10)).await;

        let before = Instant::now();
        pacer.pace().await;
        assert!(before.elapsed() < Duration::from_secs(1));
    }
}
