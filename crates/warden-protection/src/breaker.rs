//! Process-wide circuit breaker.
//!
//! Transitions:
//! - `Closed → Open` once the request volume threshold is met and the
//!   failure rate reaches the configured percentage.
//! - `Open → HalfOpen` after the sleep window elapses.
//! - `HalfOpen → Closed` at the probe checkpoint with zero failures,
//!   `HalfOpen → Open` otherwise.
//!
//! Emergency and panic are orthogonal sticky modes entered by name-tagged
//! triggers; they dominate the limit-reduction factor as documented on
//! [`CircuitMachine::reduction_factor`].

use chrono::{DateTime, TimeZone, Utc};
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, warn};
use warden_config::CircuitConfig;
use warden_utils::Clock;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

/// Read-only view of the machine for APIs and audit records.
#[derive(Debug, Clone, Serialize)]
pub struct CircuitSnapshot {
    pub state: CircuitState,
    pub failures: u64,
    pub requests: u64,
    pub half_open_requests: u64,
    pub last_state_change: DateTime<Utc>,
    pub emergency_mode: bool,
    pub panic_mode: bool,
    pub emergency_trigger: Option<String>,
    pub panic_trigger: Option<String>,
}

#[derive(Debug)]
pub struct CircuitMachine {
    config: CircuitConfig,
    clock: Arc<dyn Clock>,
    state: CircuitState,
    failures: u64,
    requests: u64,
    half_open_requests: u64,
    last_state_change_ms: u64,
    emergency: Option<StickyMode>,
    panic: Option<StickyMode>,
}

#[derive(Debug, Clone)]
struct StickyMode {
    trigger: String,
    entered_ms: u64,
}

impl CircuitMachine {
    pub fn new(config: CircuitConfig, clock: Arc<dyn Clock>) -> Self {
        let now = clock.now_ms();
        Self {
            config,
            clock,
            state: CircuitState::Closed,
            failures: 0,
            requests: 0,
            half_open_requests: 0,
            last_state_change_ms: now,
            emergency: None,
            panic: None,
        }
    }

    pub fn state(&self) -> CircuitState {
        self.state
    }

    /// Record one protected operation outcome and run the transition rules.
    pub fn record(&mut self, success: bool) {
        self.requests += 1;
        if !success {
            self.failures += 1;
        }
        if self.state == CircuitState::HalfOpen {
            self.half_open_requests += 1;
        }
        self.evaluate();
    }

    /// Add synthetic failures (blast detections accelerate the trip).
    pub fn add_failures(&mut self, count: u64) {
        self.failures += count;
        self.requests += count;
        self.evaluate();
    }

    /// Run time-based transitions; called once per tick even without
    /// recorded requests so `Open → HalfOpen` happens on schedule.
    pub fn evaluate(&mut self) {
        let now = self.clock.now_ms();
        match self.state {
            CircuitState::Closed => {
                if self.requests >= self.config.volume_threshold && self.failure_rate() >= self.config.failure_threshold_pct
                {
                    warn!(
                        failures = self.failures,
                        requests = self.requests,
                        rate_pct = self.failure_rate(),
                        "circuit breaker tripped open"
                    );
                    self.transition(CircuitState::Open, now);
                }
            }
            CircuitState::Open => {
                if now.saturating_sub(self.last_state_change_ms)
                    >= self.config.sleep_window_secs * 1_000
                {
                    info!("circuit breaker entering half-open probe window");
                    self.transition(CircuitState::HalfOpen, now);
                }
            }
            CircuitState::HalfOpen => {
                if self.half_open_requests >= self.config.half_open_max_requests {
                    if self.failures == 0 {
                        info!("circuit breaker closed after clean probe window");
                        self.transition(CircuitState::Closed, now);
                    } else {
                        warn!(
                            failures = self.failures,
                            "circuit breaker reopened after failed probes"
                        );
                        self.transition(CircuitState::Open, now);
                    }
                }
            }
        }
    }

    fn transition(&mut self, next: CircuitState, now: u64) {
        self.state = next;
        // The timeline is monotonic even if the clock hiccups.
        self.last_state_change_ms = now.max(self.last_state_change_ms);
        self.failures = 0;
        self.requests = 0;
        self.half_open_requests = 0;
    }

    fn failure_rate(&self) -> f64 {
        if self.requests == 0 {
            0.0
        } else {
            self.failures as f64 / self.requests as f64 * 100.0
        }
    }

    pub fn enter_emergency(&mut self, trigger: &str) {
        if self.emergency.is_none() {
            warn!(trigger, "entering emergency mode");
        }
        self.emergency = Some(StickyMode {
            trigger: trigger.to_string(),
            entered_ms: self.clock.now_ms(),
        });
    }

    pub fn enter_panic(&mut self, trigger: &str) {
        if self.panic.is_none() {
            warn!(trigger, "entering panic mode");
        }
        self.panic = Some(StickyMode {
            trigger: trigger.to_string(),
            entered_ms: self.clock.now_ms(),
        });
    }

    /// Explicit operator recovery: clears both sticky modes.
    pub fn recover(&mut self) {
        if self.emergency.take().is_some() {
            info!("emergency mode cleared");
        }
        if self.panic.take().is_some() {
            info!("panic mode cleared");
        }
    }

    /// Clear sticky modes that have been quiet for `after_secs`. Driven by
    /// the protector when time-based recovery is configured; otherwise
    /// recovery stays an explicit operator action.
    pub fn auto_recover_after(&mut self, after_secs: u64) {
        let now = self.clock.now_ms();
        let expired = |mode: &Option<StickyMode>| {
            mode.as_ref()
                .map(|m| now.saturating_sub(m.entered_ms) >= after_secs * 1_000)
                .unwrap_or(false)
        };
        if expired(&self.emergency) {
            info!("emergency mode auto-recovered");
            self.emergency = None;
        }
        if expired(&self.panic) {
            info!("panic mode auto-recovered");
            self.panic = None;
        }
    }

    /// Limit-reduction factor. Panic dominates everything; emergency
    /// dominates a closed circuit; otherwise the state factor applies.
    pub fn reduction_factor(&self) -> f64 {
        if self.panic.is_some() {
            return 0.05;
        }
        match self.state {
            CircuitState::Closed => {
                if self.emergency.is_some() {
                    0.8
                } else {
                    1.0
                }
            }
            CircuitState::HalfOpen => 0.5,
            CircuitState::Open => 0.1,
        }
    }

    pub fn snapshot(&self) -> CircuitSnapshot {
        CircuitSnapshot {
            state: self.state,
            failures: self.failures,
            requests: self.requests,
            half_open_requests: self.half_open_requests,
            last_state_change: Utc
                .timestamp_millis_opt(self.last_state_change_ms as i64)
                .single()
                .unwrap_or_else(Utc::now),
            emergency_mode: self.emergency.is_some(),
            panic_mode: self.panic.is_some(),
            emergency_trigger: self.emergency.as_ref().map(|m| m.trigger.clone()),
            panic_trigger: self.panic.as_ref().map(|m| m.trigger.clone()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use warden_utils::ManualClock;

    fn config() -> CircuitConfig {
        CircuitConfig {
            failure_threshold_pct: 50.0,
            volume_threshold: 10,
            sleep_window_secs: 30,
            half_open_max_requests: 5,
        }
    }

    fn machine(clock: Arc<ManualClock>) -> CircuitMachine {
        CircuitMachine::new(config(), clock)
    }

    #[test]
    fn trips_only_past_volume_threshold() {
        let clock = ManualClock::new(1_000);
        let mut cb = machine(clock);

        // Nine straight failures: below the volume threshold, still closed.
        for _ in 0..9 {
            cb.record(false);
        }
        assert_eq!(cb.state(), CircuitState::Closed);

        // Tenth request reaches the volume threshold at 100 % failure rate.
        cb.record(false);
        assert_eq!(cb.state(), CircuitState::Open);
        assert_eq!(cb.reduction_factor(), 0.1);
    }

    #[test]
    fn failure_rate_below_threshold_stays_closed() {
        let clock = ManualClock::new(1_000);
        let mut cb = machine(clock);

        // 4 failures in 10 requests = 40 % < 50 %.
        for i in 0..10 {
            cb.record(i % 3 != 0);
        }
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[test]
    fn full_cycle_closed_open_halfopen_closed() {
        let clock = ManualClock::new(1_000);
        let mut cb = machine(clock.clone());

        for _ in 0..10 {
            cb.record(false);
        }
        assert_eq!(cb.state(), CircuitState::Open);
        let opened_at = cb.snapshot().last_state_change;

        // Sleep window passes; the next evaluation enters half-open.
        clock.advance(30_000);
        cb.evaluate();
        assert_eq!(cb.state(), CircuitState::HalfOpen);
        assert!(cb.snapshot().last_state_change >= opened_at);
        assert_eq!(cb.reduction_factor(), 0.5);

        // Five clean probes close the circuit.
        for _ in 0..5 {
            cb.record(true);
        }
        assert_eq!(cb.state(), CircuitState::Closed);
        assert_eq!(cb.reduction_factor(), 1.0);
    }

    #[test]
    fn dirty_probe_window_reopens() {
        let clock = ManualClock::new(1_000);
        let mut cb = machine(clock.clone());

        for _ in 0..10 {
            cb.record(false);
        }
        clock.advance(30_000);
        cb.evaluate();
        assert_eq!(cb.state(), CircuitState::HalfOpen);

        cb.record(false);
        for _ in 0..4 {
            cb.record(true);
        }
        assert_eq!(cb.state(), CircuitState::Open);
    }

    #[test]
    fn state_change_timeline_is_monotonic() {
        let clock = ManualClock::new(1_000);
        let mut cb = machine(clock.clone());
        let mut last = cb.snapshot().last_state_change;

        for _ in 0..10 {
            cb.record(false);
        }
        assert!(cb.snapshot().last_state_change >= last);
        last = cb.snapshot().last_state_change;

        clock.advance(30_000);
        cb.evaluate();
        assert!(cb.snapshot().last_state_change >= last);
    }

    #[test]
    fn blast_failures_accelerate_the_trip() {
        let clock = ManualClock::new(1_000);
        let mut cb = machine(clock);

        cb.add_failures(10);
        assert_eq!(cb.state(), CircuitState::Open);
    }

    #[test]
    fn sticky_mode_dominance() {
        let clock = ManualClock::new(1_000);
        let mut cb = machine(clock);

        cb.enter_emergency("cpu-threshold");
        assert_eq!(cb.reduction_factor(), 0.8);

        cb.enter_panic("blast-detected");
        assert_eq!(cb.reduction_factor(), 0.05);

        // Panic dominates even an open circuit.
        for _ in 0..10 {
            cb.record(false);
        }
        assert_eq!(cb.state(), CircuitState::Open);
        assert_eq!(cb.reduction_factor(), 0.05);

        cb.recover();
        assert_eq!(cb.reduction_factor(), 0.1);

        let snapshot = cb.snapshot();
        assert!(!snapshot.emergency_mode && !snapshot.panic_mode);
    }

    #[test]
    fn emergency_only_reduces_when_closed() {
        let clock = ManualClock::new(1_000);
        let mut cb = machine(clock.clone());

        cb.enter_emergency("error-threshold");
        for _ in 0..10 {
            cb.record(false);
        }
        // Open state factor (0.1) dominates the emergency factor.
        assert_eq!(cb.reduction_factor(), 0.1);
    }

    #[test]
    fn sticky_modes_auto_recover_on_schedule() {
        let clock = ManualClock::new(1_000);
        let mut cb = machine(clock.clone());

        cb.enter_emergency("blast-detected");
        cb.auto_recover_after(60);
        assert_eq!(cb.reduction_factor(), 0.8);

        clock.advance(61_000);
        cb.auto_recover_after(60);
        assert_eq!(cb.reduction_factor(), 1.0);
    }
}
