//! Spike detection with cooldown-governed persistence.

use chrono::{DateTime, TimeZone, Utc};
use serde::Serialize;
use std::collections::HashMap;
use tracing::{debug, info};
use warden_config::SpikeConfig;

/// Spike state for one `(tenant, metric)` slot.
#[derive(Debug, Clone, Serialize)]
pub struct SpikeInfo {
    pub detected: bool,
    pub start_time: DateTime<Utc>,
    /// `latest / baseline` at first detection, capped at the configured
    /// maximum.
    pub multiplier: f64,
    pub base_value: f64,
    pub cooldown_until: DateTime<Utc>,
}

#[derive(Debug, Default)]
pub struct SpikeDetector {
    spikes: HashMap<(String, String), SpikeInfo>,
}

/// Minimum baseline sample count before detection is attempted.
pub const MIN_BASELINE_SAMPLES: usize = 5;

impl SpikeDetector {
    /// Evaluate one `(tenant, metric)` slot.
    ///
    /// Returns `true` when a spike is newly detected this pass. Existing
    /// spikes refresh their cooldown on a continued breach and clear only
    /// once the cooldown has expired without one.
    pub fn observe(
        &mut self,
        tenant: &str,
        metric: &str,
        baseline_values: &[f64],
        latest: Option<f64>,
        config: &SpikeConfig,
        now_ms: u64,
    ) -> bool {
        let key = (tenant.to_string(), metric.to_string());

        let breach = match latest {
            Some(latest) if baseline_values.len() >= MIN_BASELINE_SAMPLES => {
                let baseline =
                    baseline_values.iter().sum::<f64>() / baseline_values.len() as f64;
                if baseline > 0.0 && latest > baseline * config.threshold {
                    Some((latest, baseline))
                } else {
                    None
                }
            }
            _ => None,
        };

        let now = ms_to_datetime(now_ms);
        let already_detected = self.spikes.get(&key).map(|s| s.detected).unwrap_or(false);

        match breach {
            Some((latest, baseline)) if already_detected => {
                // Continued breach keeps the spike alive for another cooldown.
                if let Some(existing) = self.spikes.get_mut(&key) {
                    existing.cooldown_until =
                        ms_to_datetime(now_ms + config.cooldown_secs * 1_000);
                }
                debug!(
                    tenant,
                    metric,
                    latest,
                    baseline,
                    "spike cooldown refreshed"
                );
                false
            }
            Some((latest, baseline)) => {
                let multiplier = (latest / baseline).min(config.max_multiplier);
                info!(
                    tenant,
                    metric,
                    latest,
                    baseline,
                    multiplier,
                    "spike detected"
                );
                self.spikes.insert(
                    key,
                    SpikeInfo {
                        detected: true,
                        start_time: now,
                        multiplier,
                        base_value: baseline,
                        cooldown_until: ms_to_datetime(now_ms + config.cooldown_secs * 1_000),
                    },
                );
                true
            }
            None if already_detected => {
                let expired = self
                    .spikes
                    .get(&key)
                    .map(|s| s.cooldown_until <= now)
                    .unwrap_or(false);
                if expired {
                    debug!(tenant, metric, "spike cleared after cooldown");
                    self.spikes.remove(&key);
                }
                false
            }
            None => false,
        }
    }

    pub fn get(&self, tenant: &str, metric: &str) -> Option<&SpikeInfo> {
        self.spikes.get(&(tenant.to_string(), metric.to_string()))
    }

    /// Active multiplier for a slot, 1.0 when no spike is live.
    pub fn multiplier(&self, tenant: &str, metric: &str) -> f64 {
        self.get(tenant, metric)
            .filter(|s| s.detected)
            .map(|s| s.multiplier)
            .unwrap_or(1.0)
    }

    /// All currently detected spikes for one tenant.
    pub fn active_for_tenant(&self, tenant: &str) -> Vec<(String, SpikeInfo)> {
        self.spikes
            .iter()
            .filter(|((t, _), info)| t == tenant && info.detected)
            .map(|((_, m), info)| (m.clone(), info.clone()))
            .collect()
    }

    pub fn active_count(&self) -> usize {
        self.spikes.values().filter(|s| s.detected).count()
    }

    pub fn forget_tenant(&mut self, tenant: &str) {
        self.spikes.retain(|(t, _), _| t != tenant);
    }
}

fn ms_to_datetime(ms: u64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(ms as i64)
        .single()
        .unwrap_or_else(Utc::now)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> SpikeConfig {
        SpikeConfig {
            enabled: true,
            threshold: 2.0,
            detection_window_secs: 300,
            cooldown_secs: 1_800,
            max_multiplier: 5.0,
        }
    }

    const BASELINE: [f64; 5] = [1_000.0, 1_000.0, 1_000.0, 1_000.0, 1_000.0];

    #[test]
    fn detects_and_caps_multiplier() {
        let mut detector = SpikeDetector::default();
        let now = 10_000_000;

        // 5000 / 1000 = 5x ratio, within the cap; 10x would clip to 5.
        assert!(detector.observe("t1", "m", &BASELINE, Some(5_000.0), &config(), now));
        let info = detector.get("t1", "m").unwrap();
        assert!(info.detected);
        assert_eq!(info.multiplier, 5.0);
        assert_eq!(info.base_value, 1_000.0);

        let mut detector = SpikeDetector::default();
        assert!(detector.observe("t1", "m", &BASELINE, Some(10_000.0), &config(), now));
        assert_eq!(detector.get("t1", "m").unwrap().multiplier, 5.0);
    }

    #[test]
    fn below_threshold_is_not_a_spike() {
        let mut detector = SpikeDetector::default();
        assert!(!detector.observe("t1", "m", &BASELINE, Some(1_999.0), &config(), 0));
        assert!(detector.get("t1", "m").is_none());
        assert_eq!(detector.multiplier("t1", "m"), 1.0);
    }

    #[test]
    fn needs_five_baseline_samples() {
        let mut detector = SpikeDetector::default();
        let short = [1_000.0; 4];
        assert!(!detector.observe("t1", "m", &short, Some(9_000.0), &config(), 0));
    }

    #[test]
    fn persists_through_cooldown_then_clears() {
        let mut detector = SpikeDetector::default();
        let config = config();
        let start = 1_000_000;

        assert!(detector.observe("t1", "m", &BASELINE, Some(5_000.0), &config, start));

        // Back to normal before the cooldown: still detected.
        let mid = start + 60 * 1_000;
        assert!(!detector.observe("t1", "m", &BASELINE, Some(1_000.0), &config, mid));
        assert!(detector.get("t1", "m").unwrap().detected);

        // Past the cooldown without a breach: cleared.
        let after = start + (config.cooldown_secs + 1) * 1_000;
        assert!(!detector.observe("t1", "m", &BASELINE, Some(1_000.0), &config, after));
        assert!(detector.get("t1", "m").is_none());
    }

    #[test]
    fn continued_breach_refreshes_cooldown() {
        let mut detector = SpikeDetector::default();
        let config = config();
        let start = 1_000_000;

        detector.observe("t1", "m", &BASELINE, Some(5_000.0), &config, start);

        // Re-breach just before expiry pushes the cooldown out.
        let near_expiry = start + (config.cooldown_secs - 1) * 1_000;
        detector.observe("t1", "m", &BASELINE, Some(5_000.0), &config, near_expiry);

        let original_expiry = start + (config.cooldown_secs + 1) * 1_000;
        assert!(!detector.observe("t1", "m", &BASELINE, Some(1_000.0), &config, original_expiry));
        assert!(detector.get("t1", "m").unwrap().detected, "refresh must extend the spike");
    }

    #[test]
    fn zero_baseline_never_breaches() {
        let mut detector = SpikeDetector::default();
        let zeros = [0.0; 5];
        assert!(!detector.observe("t1", "m", &zeros, Some(100.0), &config(), 0));
    }
}
