//! Alert dispatch.
//!
//! Components produce [`Alert`] values; the dispatcher fans them out to the
//! configured channels, each wrapped in its own circuit breaker so one
//! broken webhook cannot stall the others. Channel wire formats are out of
//! scope: the in-tree sink writes to the log, everything else implements
//! [`AlertSink`] out of tree.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{error, info, warn};
use warden_protection::ChannelCircuitBreaker;
use warden_types::{Alert, AlertSeverity, WardenError, WardenResult};
use warden_utils::Clock;

const DISPATCH_TIMEOUT: Duration = Duration::from_secs(30);

#[async_trait]
pub trait AlertSink: Send + Sync {
    async fn send(&self, alert: &Alert) -> WardenResult<()>;
}

/// Default sink: alerts land in the structured log.
#[derive(Debug, Default)]
pub struct LogAlertSink;

#[async_trait]
impl AlertSink for LogAlertSink {
    async fn send(&self, alert: &Alert) -> WardenResult<()> {
        match alert.severity {
            AlertSeverity::Critical => error!(
                tenant = %alert.tenant,
                component = %alert.component,
                "ALERT: {}",
                alert.message
            ),
            AlertSeverity::Warning => warn!(
                tenant = %alert.tenant,
                component = %alert.component,
                "alert: {}",
                alert.message
            ),
            AlertSeverity::Info => info!(
                tenant = %alert.tenant,
                component = %alert.component,
                "alert: {}",
                alert.message
            ),
        }
        Ok(())
    }
}

struct Channel {
    name: String,
    sink: Arc<dyn AlertSink>,
    breaker: Mutex<ChannelCircuitBreaker>,
}

/// Fans alerts out to every healthy channel.
pub struct AlertDispatcher {
    channels: Vec<Channel>,
}

impl AlertDispatcher {
    pub fn new() -> Self {
        Self {
            channels: Vec::new(),
        }
    }

    pub fn with_channel(
        mut self,
        name: impl Into<String>,
        sink: Arc<dyn AlertSink>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let name = name.into();
        self.channels.push(Channel {
            breaker: Mutex::new(ChannelCircuitBreaker::new(name.clone(), clock)),
            name,
            sink,
        });
        self
    }

    pub async fn dispatch(&self, alerts: &[Alert]) {
        for alert in alerts {
            for channel in &self.channels {
                if !channel.breaker.lock().await.allow_call() {
                    warn!(channel = %channel.name, "alert channel open, skipping dispatch");
                    continue;
                }
                let result = tokio::time::timeout(DISPATCH_TIMEOUT, channel.sink.send(alert))
                    .await
                    .map_err(|_| WardenError::Transport("alert dispatch timed out".to_string()))
                    .and_then(|r| r);

                let mut breaker = channel.breaker.lock().await;
                match result {
                    Ok(()) => breaker.record_success(),
                    Err(e) => {
                        warn!(channel = %channel.name, error = %e, "alert dispatch failed");
                        breaker.record_failure();
                    }
                }
            }
        }
    }
}

impl Default for AlertDispatcher {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use warden_utils::ManualClock;

    struct FlakySink {
        calls: AtomicU32,
        fail_first: u32,
    }

    #[async_trait]
    impl AlertSink for FlakySink {
        async fn send(&self, _alert: &Alert) -> WardenResult<()> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.fail_first {
                Err(WardenError::Transport("channel down".into()))
            } else {
                Ok(())
            }
        }
    }

    fn alert() -> Alert {
        Alert::new(AlertSeverity::Warning, "cost-controller", "over budget").tenant("t1")
    }

    #[tokio::test]
    async fn dispatches_to_log_sink() {
        let clock = ManualClock::new(0);
        let dispatcher =
            AlertDispatcher::new().with_channel("log", Arc::new(LogAlertSink), clock);
        dispatcher.dispatch(&[alert()]).await;
    }

    #[tokio::test]
    async fn failing_channel_opens_and_skips() {
        let clock = ManualClock::new(0);
        let sink = Arc::new(FlakySink {
            calls: AtomicU32::new(0),
            fail_first: u32::MAX,
        });
        let dispatcher =
            AlertDispatcher::new().with_channel("slack", sink.clone(), clock);

        // Three failures open the channel breaker…
        dispatcher.dispatch(&[alert(), alert(), alert()]).await;
        assert_eq!(sink.calls.load(Ordering::SeqCst), 3);

        // …after which dispatch attempts stop reaching the sink.
        dispatcher.dispatch(&[alert(), alert()]).await;
        assert_eq!(sink.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn recovered_channel_takes_traffic_again() {
        let clock = ManualClock::new(0);
        let sink = Arc::new(FlakySink {
            calls: AtomicU32::new(0),
            fail_first: 3,
        });
        let dispatcher =
            AlertDispatcher::new().with_channel("email", sink.clone(), clock.clone());

        dispatcher.dispatch(&[alert(), alert(), alert()]).await;
        // Breaker open; wait out the recovery timeout, the probe succeeds.
        clock.advance(60_000);
        dispatcher.dispatch(&[alert()]).await;
        assert_eq!(sink.calls.load(Ordering::SeqCst), 4);

        dispatcher.dispatch(&[alert()]).await;
        assert_eq!(sink.calls.load(Ordering::SeqCst), 5);
    }
}
