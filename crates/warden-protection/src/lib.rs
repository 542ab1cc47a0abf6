//! Runtime protection for the reconciliation pipeline.
//!
//! Three nested layers behind one facade: per-tenant token buckets drop
//! over-aggressive tenants from the tick, a process-wide circuit breaker
//! scales every written limit by a state-dependent factor, and a blast
//! detector with adaptive thresholds feeds the breaker (or emergency mode)
//! when a tenant's traffic explodes.
//!
//! The breaker and detector share one reader-writer lock at the component
//! boundary; the token buckets keep their own per-entry locking for the
//! refill arithmetic.

mod blast;
mod breaker;
mod channel;
mod ratelimit;

pub use blast::{BlastDetector, BlastEvent, Resource, TenantBlastSnapshot, RESOURCES};
pub use breaker::{CircuitMachine, CircuitSnapshot, CircuitState};
pub use channel::{ChannelCircuitBreaker, ChannelSnapshot, ChannelState};
pub use ratelimit::{BucketStats, TenantRateLimiter};

use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};
use tracing::{debug, info};
use warden_config::ProtectionConfig;
use warden_types::{TenantLimits, TenantMetrics};
use warden_utils::Clock;

/// Trigger names for the sticky modes.
pub mod triggers {
    pub const BLAST_DETECTED: &str = "blast-detected";
    pub const CPU_THRESHOLD: &str = "cpu-threshold";
    pub const MEMORY_THRESHOLD: &str = "memory-threshold";
    pub const ERROR_THRESHOLD: &str = "error-threshold";
    pub const OPERATOR: &str = "operator";
}

struct ProtectorState {
    breaker: CircuitMachine,
    detector: BlastDetector,
    /// Last applied limit set; seeds auto blast thresholds next tick.
    last_limits: BTreeMap<String, TenantLimits>,
}

pub struct BlastProtector {
    enabled: bool,
    config: ProtectionConfig,
    limiter: TenantRateLimiter,
    state: RwLock<ProtectorState>,
}

impl BlastProtector {
    pub fn new(config: ProtectionConfig, enabled: bool, clock: Arc<dyn Clock>) -> Self {
        let limiter = TenantRateLimiter::new(config.rate_limit.clone(), clock.clone());
        let breaker = CircuitMachine::new(config.circuit.clone(), clock);
        let detector = BlastDetector::new(config.blast.clone());
        Self {
            enabled,
            config,
            limiter,
            state: RwLock::new(ProtectorState {
                breaker,
                detector,
                last_limits: BTreeMap::new(),
            }),
        }
    }

    pub fn enabled(&self) -> bool {
        self.enabled
    }

    /// Preprocess the tick's metrics: rate-limit tenants, run blast
    /// detection on the survivors, and feed detections into the breaker.
    ///
    /// Rejected tenants are dropped from this tick's map only; their history
    /// elsewhere is untouched.
    pub fn process_metrics(
        &self,
        metrics: BTreeMap<String, TenantMetrics>,
        now_ms: u64,
    ) -> (BTreeMap<String, TenantMetrics>, Vec<BlastEvent>) {
        if !self.enabled {
            return (metrics, Vec::new());
        }

        let mut state = self.state.write().expect("protector lock");
        let mut filtered = BTreeMap::new();
        let mut events = Vec::new();

        for (tenant, tm) in metrics {
            if !self.limiter.check(&tenant) {
                info!(tenant = %tenant, "tenant dropped from tick by rate limiter");
                continue;
            }

            let ProtectorState {
                detector,
                breaker,
                last_limits,
            } = &mut *state;
            if let Some(event) = detector.observe(&tenant, &tm, last_limits.get(&tenant), now_ms)
            {
                if self.config.blast.auto_emergency_shutdown {
                    breaker.enter_emergency(triggers::BLAST_DETECTED);
                } else {
                    breaker.add_failures(self.config.blast.failure_increment);
                }
                events.push(event);
            }
            filtered.insert(tenant, tm);
        }

        state.breaker.evaluate();
        if let Some(after) = self.config.blast.recovery_after_secs {
            state.breaker.auto_recover_after(after);
        }
        (filtered, events)
    }

    /// Record a protected pipeline outcome into the breaker.
    pub fn record_outcome(&self, success: bool) {
        if !self.enabled {
            return;
        }
        self.state.write().expect("protector lock").breaker.record(success);
    }

    /// Scale the computed limits by the breaker's reduction factor and
    /// remember them as the detector's next auto-threshold base.
    pub fn apply_protection(&self, limits: &mut BTreeMap<String, TenantLimits>) -> f64 {
        let mut state = self.state.write().expect("protector lock");
        let factor = if self.enabled {
            state.breaker.evaluate();
            state.breaker.reduction_factor()
        } else {
            1.0
        };

        if factor < 1.0 {
            debug!(factor, "circuit protection scaling limits");
            for tenant_limits in limits.values_mut() {
                tenant_limits.scale_numeric(factor);
                tenant_limits.reason = format!(
                    "{}; protection factor {factor:.2}",
                    tenant_limits.reason
                );
            }
        }

        state.last_limits = limits.clone();
        factor
    }

    /// One adaptive-threshold pass; returns how many thresholds moved.
    pub fn adaptation_pass(&self, now_ms: u64) -> usize {
        if !self.enabled {
            return 0;
        }
        self.state
            .write()
            .expect("protector lock")
            .detector
            .adaptation_pass(now_ms)
    }

    pub fn enter_emergency(&self, trigger: &str) {
        self.state
            .write()
            .expect("protector lock")
            .breaker
            .enter_emergency(trigger);
    }

    pub fn enter_panic(&self, trigger: &str) {
        self.state
            .write()
            .expect("protector lock")
            .breaker
            .enter_panic(trigger);
    }

    pub fn recover(&self) {
        self.state.write().expect("protector lock").breaker.recover();
    }

    pub fn circuit_snapshot(&self) -> CircuitSnapshot {
        self.state.read().expect("protector lock").breaker.snapshot()
    }

    pub fn blast_snapshots(&self) -> Vec<TenantBlastSnapshot> {
        self.state.read().expect("protector lock").detector.snapshots()
    }

    pub fn bucket_stats(&self) -> Vec<BucketStats> {
        self.limiter.stats()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use warden_config::{BlastConfig, ManualThresholds, RateLimitConfig};
    use warden_types::{LimitValue, Sample};
    use warden_utils::ManualClock;

    fn metrics_of(tenant: &str, ingestion: f64) -> BTreeMap<String, TenantMetrics> {
        let mut tm = TenantMetrics::new(tenant);
        tm.push(Sample::new(
            tenant,
            "cortex_distributor_received_samples_total",
            ingestion,
        ));
        BTreeMap::from([(tenant.to_string(), tm)])
    }

    fn limits_of(tenant: &str, rate: f64) -> BTreeMap<String, TenantLimits> {
        let mut tl = TenantLimits::new(tenant);
        tl.set("ingestion_rate", LimitValue::Rate(rate));
        BTreeMap::from([(tenant.to_string(), tl)])
    }

    #[test]
    fn rate_limited_tenant_dropped_from_tick() {
        let clock = ManualClock::new(0);
        let config = ProtectionConfig {
            rate_limit: RateLimitConfig {
                rate_per_sec: 1.0,
                burst: 1.0,
            },
            ..Default::default()
        };
        let protector = BlastProtector::new(config, true, clock.clone());

        let (first, _) = protector.process_metrics(metrics_of("t1", 100.0), clock.now_ms());
        assert!(first.contains_key("t1"));

        // 100 ms later the bucket has only 0.1 tokens.
        clock.advance(100);
        let (second, _) = protector.process_metrics(metrics_of("t1", 100.0), clock.now_ms());
        assert!(second.is_empty());
    }

    #[test]
    fn disabled_protector_passes_through() {
        let clock = ManualClock::new(0);
        let protector = BlastProtector::new(ProtectionConfig::default(), false, clock.clone());

        for _ in 0..50 {
            let (out, events) =
                protector.process_metrics(metrics_of("t1", 100.0), clock.now_ms());
            assert_eq!(out.len(), 1);
            assert!(events.is_empty());
        }

        let mut limits = limits_of("t1", 1_000.0);
        assert_eq!(protector.apply_protection(&mut limits), 1.0);
        assert_eq!(
            limits["t1"].get("ingestion_rate"),
            Some(&LimitValue::Rate(1_000.0))
        );
    }

    #[test]
    fn blast_accelerates_breaker_and_scales_limits() {
        let clock = ManualClock::new(0);
        let config = ProtectionConfig {
            blast: BlastConfig {
                thresholds: ManualThresholds {
                    ingestion_rate: Some(1_000.0),
                    ..Default::default()
                },
                failure_increment: 10,
                ..Default::default()
            },
            ..Default::default()
        };
        let protector = BlastProtector::new(config, true, clock.clone());

        let (_, events) = protector.process_metrics(metrics_of("t1", 5_000.0), clock.now_ms());
        assert_eq!(events.len(), 1);

        // 10 synthetic failures meet the volume threshold: breaker opens.
        assert_eq!(protector.circuit_snapshot().state, CircuitState::Open);

        let mut limits = limits_of("t1", 1_000.0);
        let factor = protector.apply_protection(&mut limits);
        assert_eq!(factor, 0.1);
        let value = limits["t1"].get("ingestion_rate").unwrap().as_f64().unwrap();
        assert!((value - 100.0).abs() < 1e-9);
    }

    #[test]
    fn blast_can_enter_emergency_instead() {
        let clock = ManualClock::new(0);
        let config = ProtectionConfig {
            blast: BlastConfig {
                thresholds: ManualThresholds {
                    ingestion_rate: Some(1_000.0),
                    ..Default::default()
                },
                auto_emergency_shutdown: true,
                ..Default::default()
            },
            ..Default::default()
        };
        let protector = BlastProtector::new(config, true, clock.clone());

        protector.process_metrics(metrics_of("t1", 5_000.0), clock.now_ms());
        let snapshot = protector.circuit_snapshot();
        assert!(snapshot.emergency_mode);
        assert_eq!(
            snapshot.emergency_trigger.as_deref(),
            Some(triggers::BLAST_DETECTED)
        );
        // Emergency on a closed circuit: 0.8 factor.
        let mut limits = limits_of("t1", 1_000.0);
        assert_eq!(protector.apply_protection(&mut limits), 0.8);
    }

    #[test]
    fn last_limits_seed_auto_thresholds() {
        let clock = ManualClock::new(0);
        let protector = BlastProtector::new(ProtectionConfig::default(), true, clock.clone());

        // First tick applies limits of 1000, so the next tick's auto
        // threshold is 1000 × 2.0 × 1.2 = 2400.
        let mut limits = limits_of("t1", 1_000.0);
        protector.apply_protection(&mut limits);

        clock.advance(1_000);
        let (_, events) = protector.process_metrics(metrics_of("t1", 2_500.0), clock.now_ms());
        assert_eq!(events.len(), 1);
        assert!((events[0].threshold - 2_400.0).abs() < 1e-9);
    }

    #[test]
    fn tick_outcomes_drive_the_breaker() {
        let clock = ManualClock::new(0);
        let protector = BlastProtector::new(ProtectionConfig::default(), true, clock);

        for _ in 0..10 {
            protector.record_outcome(false);
        }
        assert_eq!(protector.circuit_snapshot().state, CircuitState::Open);
    }
}
