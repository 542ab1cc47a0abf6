//! Blast detection with adaptive thresholds.
//!
//! Tracks per-tenant ingestion/query/series rates, keeps a conservative
//! baseline refreshed on a daily cadence, and compares rates against manual
//! thresholds (global or per-tenant override) or auto thresholds derived
//! from the tenant's current limits. An adaptation loop periodically steers
//! the auto thresholds toward an observed percentile, with a learning rate
//! and a per-step change clip.
//!
//! Adaptive-threshold state lives here, inside the protector boundary, so
//! the detector and its thresholds never reference each other cyclically.

use serde::Serialize;
use std::collections::{HashMap, VecDeque};
use tracing::{debug, info};
use warden_config::BlastConfig;
use warden_types::{TenantLimits, TenantMetrics};

/// Bounded observation history per resource.
const OBSERVATION_CAP: usize = 4_096;
/// Minimum observations before a percentile is meaningful.
const MIN_OBSERVATIONS: usize = 10;

/// Resources the detector watches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Resource {
    Ingestion,
    Query,
    Series,
}

pub const RESOURCES: [Resource; 3] = [Resource::Ingestion, Resource::Query, Resource::Series];

impl Resource {
    fn index(self) -> usize {
        match self {
            Resource::Ingestion => 0,
            Resource::Query => 1,
            Resource::Series => 2,
        }
    }

    /// Growth factor applied to the observed percentile during adaptation.
    fn growth_factor(self) -> f64 {
        match self {
            Resource::Ingestion => 1.2,
            Resource::Query => 1.3,
            Resource::Series => 1.25,
        }
    }

    /// Limit whose current value seeds the auto threshold.
    fn limit_name(self) -> &'static str {
        match self {
            Resource::Ingestion => "ingestion_rate",
            Resource::Query => "request_rate",
            Resource::Series => "max_global_series_per_user",
        }
    }

    /// Metric families whose latest value defines the resource rate.
    fn metric_families(self) -> &'static [&'static str] {
        match self {
            Resource::Ingestion => &[
                "cortex_distributor_received_samples_total",
                "cortex_distributor_samples_in_total",
            ],
            Resource::Query => &["cortex_query_frontend_queries_total"],
            Resource::Series => &[
                "cortex_ingester_memory_series",
                "cortex_ingester_active_series",
            ],
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Resource::Ingestion => "ingestion",
            Resource::Query => "query",
            Resource::Series => "series",
        }
    }
}

/// A detected blast for one tenant resource.
#[derive(Debug, Clone, Serialize)]
pub struct BlastEvent {
    pub tenant: String,
    pub resource: &'static str,
    pub rate: f64,
    pub threshold: f64,
}

/// Per-tenant detector state, exposed read-only through the snapshot.
#[derive(Debug, Clone, Serialize)]
pub struct TenantBlastSnapshot {
    pub tenant: String,
    pub rates: [f64; 3],
    pub baselines: [f64; 3],
    pub thresholds: [Option<f64>; 3],
}

#[derive(Debug, Default)]
struct TenantState {
    rates: [f64; 3],
    baselines: [f64; 3],
    baseline_refreshed_ms: u64,
    /// Adapted thresholds; `None` until seeded by adaptation.
    adaptive: [Option<f64>; 3],
    observations: [VecDeque<f64>; 3],
    first_observed_ms: u64,
    last_adapted_ms: u64,
}

#[derive(Debug)]
pub struct BlastDetector {
    config: BlastConfig,
    tenants: HashMap<String, TenantState>,
}

impl BlastDetector {
    pub fn new(config: BlastConfig) -> Self {
        Self {
            config,
            tenants: HashMap::new(),
        }
    }

    /// Fold one tenant's pass into the detector and evaluate thresholds.
    ///
    /// `current_limits` is the last applied limit set, used to derive auto
    /// thresholds; detection is skipped entirely when the feature is off.
    pub fn observe(
        &mut self,
        tenant: &str,
        metrics: &TenantMetrics,
        current_limits: Option<&TenantLimits>,
        now_ms: u64,
    ) -> Option<BlastEvent> {
        if !self.config.enabled {
            return None;
        }

        let state = self.tenants.entry(tenant.to_string()).or_default();
        if state.first_observed_ms == 0 {
            state.first_observed_ms = now_ms;
        }

        for resource in RESOURCES {
            let idx = resource.index();
            let rate = resource
                .metric_families()
                .iter()
                .filter_map(|family| metrics.latest_value(family))
                .fold(0.0, f64::max);
            state.rates[idx] = rate;
            if rate > 0.0 {
                if state.observations[idx].len() == OBSERVATION_CAP {
                    state.observations[idx].pop_front();
                }
                state.observations[idx].push_back(rate);
            }
        }

        self.refresh_baselines(tenant, now_ms);

        let state = self.tenants.get(tenant).expect("state just inserted");
        for resource in RESOURCES {
            let idx = resource.index();
            let rate = state.rates[idx];
            if rate <= 0.0 {
                continue;
            }
            let Some(threshold) = self.threshold_for(tenant, resource, current_limits) else {
                continue;
            };
            if rate > threshold {
                info!(
                    tenant,
                    resource = resource.name(),
                    rate,
                    threshold,
                    "blast detected"
                );
                return Some(BlastEvent {
                    tenant: tenant.to_string(),
                    resource: resource.name(),
                    rate,
                    threshold,
                });
            }
        }
        None
    }

    /// The effective threshold for one tenant resource: per-tenant manual,
    /// then global manual, then the (possibly adapted) auto threshold.
    pub fn threshold_for(
        &self,
        tenant: &str,
        resource: Resource,
        current_limits: Option<&TenantLimits>,
    ) -> Option<f64> {
        let manual = |t: &warden_config::ManualThresholds| match resource {
            Resource::Ingestion => t.ingestion_rate,
            Resource::Query => t.query_rate,
            Resource::Series => t.series_rate,
        };

        if let Some(overrides) = self.config.tenant_thresholds.get(tenant) {
            if let Some(value) = manual(overrides) {
                return Some(value);
            }
        }
        if let Some(value) = manual(&self.config.thresholds) {
            return Some(value);
        }
        if !self.config.auto.enabled {
            return None;
        }

        if let Some(adapted) = self
            .tenants
            .get(tenant)
            .and_then(|s| s.adaptive[resource.index()])
        {
            return Some(adapted);
        }
        self.auto_threshold(resource, current_limits)
    }

    /// `current_limit × multiplier × (1 + safety_margin/100)`.
    fn auto_threshold(
        &self,
        resource: Resource,
        current_limits: Option<&TenantLimits>,
    ) -> Option<f64> {
        let limit = current_limits?
            .get(resource.limit_name())?
            .as_f64()
            .filter(|v| *v > 0.0)?;
        Some(limit * self.config.auto.multiplier * (1.0 + self.config.auto.safety_margin_pct / 100.0))
    }

    /// Refresh baselines to a conservative 80 % of observed, on the
    /// configured cadence.
    fn refresh_baselines(&mut self, tenant: &str, now_ms: u64) {
        let refresh_ms = self.config.baseline_refresh_secs * 1_000;
        let Some(state) = self.tenants.get_mut(tenant) else {
            return;
        };
        if state.baseline_refreshed_ms != 0
            && now_ms.saturating_sub(state.baseline_refreshed_ms) < refresh_ms
        {
            return;
        }
        for idx in 0..3 {
            let obs = &state.observations[idx];
            if !obs.is_empty() {
                let mean: f64 = obs.iter().sum::<f64>() / obs.len() as f64;
                state.baselines[idx] = mean * 0.8;
            }
        }
        state.baseline_refreshed_ms = now_ms;
    }

    /// One adaptation pass over every tenant. Returns how many thresholds
    /// were adjusted.
    pub fn adaptation_pass(&mut self, now_ms: u64) -> usize {
        let cfg = self.config.adaptation.clone();
        if !cfg.enabled {
            return 0;
        }

        let mut adjusted = 0;
        for (tenant, state) in self.tenants.iter_mut() {
            if now_ms.saturating_sub(state.first_observed_ms) < cfg.min_observation_secs * 1_000 {
                continue;
            }
            if state.last_adapted_ms != 0
                && now_ms.saturating_sub(state.last_adapted_ms) < cfg.interval_secs * 1_000
            {
                continue;
            }
            state.last_adapted_ms = now_ms;

            for resource in RESOURCES {
                let idx = resource.index();
                let obs = &state.observations[idx];
                if obs.len() < MIN_OBSERVATIONS {
                    continue;
                }
                let observed = percentile(obs, cfg.percentile);
                let target = observed * resource.growth_factor();

                let next = match state.adaptive[idx] {
                    None => target,
                    Some(current) => {
                        let mut delta = (target - current) * cfg.learning_rate;
                        let clip = current.abs() * cfg.max_change_pct / 100.0;
                        delta = delta.clamp(-clip, clip);
                        current + delta
                    }
                };
                debug!(
                    tenant = %tenant,
                    resource = resource.name(),
                    observed,
                    target,
                    threshold = next,
                    "adaptive threshold updated"
                );
                state.adaptive[idx] = Some(next);
                adjusted += 1;
            }
        }
        adjusted
    }

    pub fn snapshots(&self) -> Vec<TenantBlastSnapshot> {
        let mut snapshots: Vec<TenantBlastSnapshot> = self
            .tenants
            .iter()
            .map(|(tenant, state)| TenantBlastSnapshot {
                tenant: tenant.clone(),
                rates: state.rates,
                baselines: state.baselines,
                thresholds: state.adaptive,
            })
            .collect();
        snapshots.sort_by(|a, b| a.tenant.cmp(&b.tenant));
        snapshots
    }
}

fn percentile(values: &VecDeque<f64>, p: f64) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let mut sorted: Vec<f64> = values.iter().copied().collect();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let rank = (p.clamp(0.0, 100.0) / 100.0) * (sorted.len() - 1) as f64;
    let lower = rank.floor() as usize;
    let upper = rank.ceil() as usize;
    if lower == upper {
        sorted[lower]
    } else {
        let weight = rank - lower as f64;
        sorted[lower] * (1.0 - weight) + sorted[upper] * weight
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use warden_config::{AdaptationConfig, ManualThresholds};
    use warden_types::{LimitValue, Sample};

    fn metrics(tenant: &str, ingestion: f64) -> TenantMetrics {
        let mut tm = TenantMetrics::new(tenant);
        tm.push(Sample::new(
            tenant,
            "cortex_distributor_received_samples_total",
            ingestion,
        ));
        tm
    }

    fn limits_with_ingestion(rate: f64) -> TenantLimits {
        let mut tl = TenantLimits::new("t1");
        tl.set("ingestion_rate", LimitValue::Rate(rate));
        tl
    }

    #[test]
    fn manual_threshold_detects() {
        let config = BlastConfig {
            thresholds: ManualThresholds {
                ingestion_rate: Some(5_000.0),
                ..Default::default()
            },
            ..Default::default()
        };
        let mut detector = BlastDetector::new(config);

        assert!(detector
            .observe("t1", &metrics("t1", 4_000.0), None, 1_000)
            .is_none());
        let event = detector
            .observe("t1", &metrics("t1", 6_000.0), None, 2_000)
            .unwrap();
        assert_eq!(event.resource, "ingestion");
        assert_eq!(event.threshold, 5_000.0);
    }

    #[test]
    fn tenant_override_beats_global() {
        let mut config = BlastConfig {
            thresholds: ManualThresholds {
                ingestion_rate: Some(5_000.0),
                ..Default::default()
            },
            ..Default::default()
        };
        config.tenant_thresholds.insert(
            "t1".to_string(),
            ManualThresholds {
                ingestion_rate: Some(10_000.0),
                ..Default::default()
            },
        );
        let mut detector = BlastDetector::new(config);

        // 6000 exceeds the global 5000 but not the tenant override.
        assert!(detector
            .observe("t1", &metrics("t1", 6_000.0), None, 1_000)
            .is_none());
    }

    #[test]
    fn auto_threshold_uses_current_limit() {
        // 1000 × 2.0 × 1.2 = 2400.
        let mut detector = BlastDetector::new(BlastConfig::default());
        let limits = limits_with_ingestion(1_000.0);

        assert!(detector
            .observe("t1", &metrics("t1", 2_400.0), Some(&limits), 1_000)
            .is_none());
        let event = detector
            .observe("t1", &metrics("t1", 2_500.0), Some(&limits), 2_000)
            .unwrap();
        assert!((event.threshold - 2_400.0).abs() < 1e-9);
    }

    #[test]
    fn no_thresholds_no_detection() {
        let config = BlastConfig {
            auto: warden_config::AutoThresholdConfig {
                enabled: false,
                ..Default::default()
            },
            ..Default::default()
        };
        let mut detector = BlastDetector::new(config);
        assert!(detector
            .observe("t1", &metrics("t1", 1_000_000.0), None, 1_000)
            .is_none());
    }

    #[test]
    fn disabled_detector_is_silent() {
        let config = BlastConfig {
            enabled: false,
            thresholds: ManualThresholds {
                ingestion_rate: Some(1.0),
                ..Default::default()
            },
            ..Default::default()
        };
        let mut detector = BlastDetector::new(config);
        assert!(detector
            .observe("t1", &metrics("t1", 1_000.0), None, 1_000)
            .is_none());
    }

    #[test]
    fn adaptation_seeds_then_steps_with_clip() {
        let config = BlastConfig {
            adaptation: AdaptationConfig {
                enabled: true,
                interval_secs: 60,
                min_observation_secs: 0,
                learning_rate: 0.5,
                max_change_pct: 10.0,
                percentile: 100.0,
            },
            ..Default::default()
        };
        let mut detector = BlastDetector::new(config);

        // Ten observations at 1000.
        for i in 0..10 {
            detector.observe("t1", &metrics("t1", 1_000.0), None, 1_000 + i);
        }
        assert_eq!(detector.adaptation_pass(10_000), 1);
        // Seeded straight to observed p100 × 1.2 growth.
        let seeded = detector.snapshots()[0].thresholds[0].unwrap();
        assert!((seeded - 1_200.0).abs() < 1e-9);

        // Traffic jumps to 5000; the next step is clipped to 10 % of the
        // current threshold rather than jumping to the new target.
        for i in 0..10 {
            detector.observe("t1", &metrics("t1", 5_000.0), None, 20_000 + i);
        }
        assert_eq!(detector.adaptation_pass(10_000 + 61_000), 1);
        let stepped = detector.snapshots()[0].thresholds[0].unwrap();
        assert!((stepped - 1_320.0).abs() < 1e-9, "got {stepped}");
    }

    #[test]
    fn adaptation_respects_observation_period_and_interval() {
        let config = BlastConfig {
            adaptation: AdaptationConfig {
                enabled: true,
                interval_secs: 300,
                min_observation_secs: 3_600,
                ..Default::default()
            },
            ..Default::default()
        };
        let mut detector = BlastDetector::new(config);

        for i in 0..20 {
            detector.observe("t1", &metrics("t1", 1_000.0), None, 1_000 + i);
        }
        // Young tenant: nothing adapts yet.
        assert_eq!(detector.adaptation_pass(60_000), 0);
        // After the observation period it does.
        assert_eq!(detector.adaptation_pass(1_000 + 3_600_000), 1);
        // And not again inside the interval.
        assert_eq!(detector.adaptation_pass(1_000 + 3_600_000 + 1_000), 0);
    }

    #[test]
    fn baselines_refresh_conservatively() {
        let config = BlastConfig {
            baseline_refresh_secs: 10,
            ..Default::default()
        };
        let mut detector = BlastDetector::new(config);

        detector.observe("t1", &metrics("t1", 1_000.0), None, 1_000);
        // First observation seeds the baseline window immediately.
        let first = detector.snapshots()[0].baselines[0];
        assert!((first - 800.0).abs() < 1e-9);

        // Within the cadence nothing moves even as rates change.
        detector.observe("t1", &metrics("t1", 3_000.0), None, 2_000);
        assert!((detector.snapshots()[0].baselines[0] - 800.0).abs() < 1e-9);

        // Past the cadence the baseline becomes 80 % of the observed mean.
        detector.observe("t1", &metrics("t1", 3_000.0), None, 12_000);
        let refreshed = detector.snapshots()[0].baselines[0];
        // Observations: 1000, 3000, 3000 → mean ≈ 2333.3 → × 0.8.
        assert!((refreshed - 1_866.6666666666667).abs() < 1e-6);
    }
}
