//! Per-channel circuit breakers for alert dispatch.
//!
//! Simpler than the process-wide machine: consecutive failures open the
//! channel, a recovery timeout lets a bounded number of probe calls through,
//! and one success closes it again. A broken Slack webhook must never block
//! the pipeline or the other channels.

use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, warn};
use warden_utils::Clock;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ChannelState {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug, Clone, Serialize)]
pub struct ChannelSnapshot {
    pub channel: String,
    pub state: ChannelState,
    pub failure_count: u32,
}

#[derive(Debug)]
pub struct ChannelCircuitBreaker {
    channel: String,
    clock: Arc<dyn Clock>,
    state: ChannelState,
    failure_count: u32,
    last_failure_ms: u64,
    half_open_calls: u32,
    /// Consecutive failures before the channel opens.
    threshold: u32,
    recovery_timeout_ms: u64,
    half_open_max_calls: u32,
}

impl ChannelCircuitBreaker {
    pub fn new(channel: impl Into<String>, clock: Arc<dyn Clock>) -> Self {
        Self {
            channel: channel.into(),
            clock,
            state: ChannelState::Closed,
            failure_count: 0,
            last_failure_ms: 0,
            half_open_calls: 0,
            threshold: 3,
            recovery_timeout_ms: 60_000,
            half_open_max_calls: 1,
        }
    }

    pub fn with_threshold(mut self, threshold: u32) -> Self {
        self.threshold = threshold;
        self
    }

    pub fn with_recovery_timeout_ms(mut self, ms: u64) -> Self {
        self.recovery_timeout_ms = ms;
        self
    }

    /// Whether a dispatch attempt may go out right now.
    pub fn allow_call(&mut self) -> bool {
        match self.state {
            ChannelState::Closed => true,
            ChannelState::Open => {
                let now = self.clock.now_ms();
                if now.saturating_sub(self.last_failure_ms) >= self.recovery_timeout_ms {
                    debug!(channel = %self.channel, "alert channel probing");
                    self.state = ChannelState::HalfOpen;
                    self.half_open_calls = 1;
                    true
                } else {
                    false
                }
            }
            ChannelState::HalfOpen => {
                if self.half_open_calls < self.half_open_max_calls {
                    self.half_open_calls += 1;
                    true
                } else {
                    false
                }
            }
        }
    }

    pub fn record_success(&mut self) {
        if self.state != ChannelState::Closed {
            debug!(channel = %self.channel, "alert channel recovered");
        }
        self.state = ChannelState::Closed;
        self.failure_count = 0;
        self.half_open_calls = 0;
    }

    pub fn record_failure(&mut self) {
        self.failure_count += 1;
        self.last_failure_ms = self.clock.now_ms();
        if self.state == ChannelState::HalfOpen || self.failure_count >= self.threshold {
            if self.state != ChannelState::Open {
                warn!(
                    channel = %self.channel,
                    failures = self.failure_count,
                    "alert channel circuit opened"
                );
            }
            self.state = ChannelState::Open;
            self.half_open_calls = 0;
        }
    }

    pub fn snapshot(&self) -> ChannelSnapshot {
        ChannelSnapshot {
            channel: self.channel.clone(),
            state: self.state,
            failure_count: self.failure_count,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use warden_utils::ManualClock;

    #[test]
    fn opens_after_consecutive_failures() {
        let clock = ManualClock::new(0);
        let mut cb = ChannelCircuitBreaker::new("slack", clock).with_threshold(3);

        assert!(cb.allow_call());
        cb.record_failure();
        cb.record_failure();
        assert!(cb.allow_call());
        cb.record_failure();

        assert_eq!(cb.snapshot().state, ChannelState::Open);
        assert!(!cb.allow_call());
    }

    #[test]
    fn probes_after_recovery_timeout() {
        let clock = ManualClock::new(0);
        let mut cb = ChannelCircuitBreaker::new("email", clock.clone())
            .with_threshold(1)
            .with_recovery_timeout_ms(10_000);

        cb.record_failure();
        assert!(!cb.allow_call());

        clock.advance(10_000);
        // One probe allowed, further calls held back.
        assert!(cb.allow_call());
        assert!(!cb.allow_call());

        cb.record_success();
        assert_eq!(cb.snapshot().state, ChannelState::Closed);
        assert!(cb.allow_call());
    }

    #[test]
    fn failed_probe_reopens() {
        let clock = ManualClock::new(0);
        let mut cb = ChannelCircuitBreaker::new("pagerduty", clock.clone())
            .with_threshold(1)
            .with_recovery_timeout_ms(5_000);

        cb.record_failure();
        clock.advance(5_000);
        assert!(cb.allow_call());
        cb.record_failure();

        assert_eq!(cb.snapshot().state, ChannelState::Open);
        assert!(!cb.allow_call());
    }
}
