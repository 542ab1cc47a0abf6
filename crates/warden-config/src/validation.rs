//! Startup validation. Configuration errors are fatal: the process refuses
//! to start rather than reconcile with a half-sane setup.

use crate::model::WardenConfig;
use warden_types::{WardenError, WardenResult};

impl WardenConfig {
    pub fn validate(&self) -> WardenResult<()> {
        let mut problems: Vec<String> = Vec::new();

        if self.update_interval_secs == 0 {
            problems.push("update_interval_secs must be positive".into());
        }
        if self.target.namespace.is_empty() {
            problems.push("target.namespace must not be empty".into());
        }
        if self.target.configmap_name.is_empty() {
            problems.push("target.configmap_name must not be empty".into());
        }
        if self.target.overrides_key.is_empty() {
            problems.push("target.overrides_key must not be empty".into());
        }

        if self.collector.timeout_secs == 0 {
            problems.push("collector.timeout_secs must be positive".into());
        }
        if self.collector.synthetic.enabled && self.collector.synthetic.tenant_count == 0 {
            problems.push("collector.synthetic.tenant_count must be positive".into());
        }

        if !(0.0..=100.0).contains(&self.analyzer.percentile) {
            problems.push(format!(
                "analyzer.percentile must be within [0, 100], got {}",
                self.analyzer.percentile
            ));
        }
        if self.analyzer.analysis_window_secs == 0 {
            problems.push("analyzer.analysis_window_secs must be positive".into());
        }
        if self.analyzer.spike.enabled {
            if self.analyzer.spike.threshold <= 1.0 {
                problems.push(format!(
                    "analyzer.spike.threshold must be > 1.0, got {}",
                    self.analyzer.spike.threshold
                ));
            }
            if self.analyzer.spike.detection_window_secs == 0 {
                problems.push("analyzer.spike.detection_window_secs must be positive".into());
            }
            if self.analyzer.spike.max_multiplier < 1.0 {
                problems.push("analyzer.spike.max_multiplier must be >= 1.0".into());
            }
        }

        for def in &self.limits.definitions {
            if def.name.is_empty() {
                problems.push("limit definition with empty name".into());
            }
            if !(0.0..=1000.0).contains(&def.buffer_pct) {
                problems.push(format!(
                    "limit {}: buffer_pct must be within [0, 1000], got {}",
                    def.name, def.buffer_pct
                ));
            }
            if let (Some(min), Some(max)) = (def.min, def.max) {
                if min > max {
                    problems.push(format!("limit {}: min {} exceeds max {}", def.name, min, max));
                }
            }
        }

        if self.cost.enabled {
            if self.cost.cost_per_unit < 0.0 {
                problems.push("cost.cost_per_unit must not be negative".into());
            }
            if self.cost.growth_factor < 1.0 {
                problems.push("cost.growth_factor must be >= 1.0".into());
            }
            let w = &self.cost.weights;
            if w.samples < 0.0 || w.series < 0.0 || w.queries < 0.0 {
                problems.push("cost.weights must not be negative".into());
            }
        }

        if self.protection.rate_limit.rate_per_sec <= 0.0 {
            problems.push("protection.rate_limit.rate_per_sec must be positive".into());
        }
        if self.protection.rate_limit.burst < 1.0 {
            problems.push("protection.rate_limit.burst must be >= 1".into());
        }
        if self.protection.circuit.sleep_window_secs == 0 {
            problems.push("protection.circuit.sleep_window_secs must be positive".into());
        }
        if !(0.0..=100.0).contains(&self.protection.circuit.failure_threshold_pct) {
            problems.push("protection.circuit.failure_threshold_pct must be within [0, 100]".into());
        }
        if self.protection.blast.adaptation.enabled {
            let a = &self.protection.blast.adaptation;
            if a.interval_secs == 0 {
                problems.push("protection.blast.adaptation.interval_secs must be positive".into());
            }
            if !(0.0..=1.0).contains(&a.learning_rate) {
                problems.push("protection.blast.adaptation.learning_rate must be within [0, 1]".into());
            }
            if !(0.0..=100.0).contains(&a.percentile) {
                problems.push("protection.blast.adaptation.percentile must be within [0, 100]".into());
            }
        }

        if self.audit.cleanup_interval_secs == 0 {
            problems.push("audit.cleanup_interval_secs must be positive".into());
        }
        if !(0.0..=100.0).contains(&self.audit.emergency_threshold_pct) {
            problems.push("audit.emergency_threshold_pct must be within [0, 100]".into());
        }

        if self.leader_election.enabled {
            let le = &self.leader_election;
            if le.lease_duration_secs == 0 || le.renew_interval_secs == 0 {
                problems.push("leader_election intervals must be positive".into());
            }
            if le.renew_interval_secs >= le.lease_duration_secs {
                problems.push("leader_election.renew_interval_secs must be below lease_duration_secs".into());
            }
        }

        if problems.is_empty() {
            Ok(())
        } else {
            Err(WardenError::Configuration(problems.join("; ")))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use warden_types::{LimitDefinition, LimitType};

    #[test]
    fn defaults_validate() {
        WardenConfig::default().validate().unwrap();
    }

    #[test]
    fn spike_threshold_must_exceed_one() {
        let mut config = WardenConfig::default();
        config.analyzer.spike.threshold = 1.0;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("spike.threshold"));
    }

    #[test]
    fn percentile_bounds_enforced() {
        let mut config = WardenConfig::default();
        config.analyzer.percentile = 101.0;
        assert!(config.validate().is_err());
        config.analyzer.percentile = -1.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn buffer_pct_bounds_enforced() {
        let mut config = WardenConfig::default();
        let mut def = LimitDefinition::new("custom", LimitType::Rate);
        def.buffer_pct = 1500.0;
        config.limits.definitions.push(def);
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("buffer_pct"));
    }

    #[test]
    fn empty_target_rejected() {
        let mut config = WardenConfig::default();
        config.target.namespace.clear();
        assert!(config.validate().is_err());
    }

    #[test]
    fn all_problems_reported_together() {
        let mut config = WardenConfig::default();
        config.update_interval_secs = 0;
        config.target.configmap_name.clear();
        let message = config.validate().unwrap_err().to_string();
        assert!(message.contains("update_interval_secs"));
        assert!(message.contains("configmap_name"));
    }
}
