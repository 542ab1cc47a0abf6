//! Controller self-metrics.

use prometheus::{
    Histogram, HistogramOpts, IntCounterVec, IntGauge, IntGaugeVec, Opts, Registry,
};
use std::collections::BTreeMap;
use warden_protection::CircuitState;
use warden_types::{TenantLimits, WardenError, WardenResult};

/// Typed handles over the Prometheus registry. One instance per process.
#[derive(Clone)]
pub struct ControllerMetrics {
    pub registry: Registry,
    pub reconciliations_total: IntCounterVec,
    pub reconcile_duration: Histogram,
    pub component_errors: IntCounterVec,
    pub tenant_limit: prometheus::GaugeVec,
    pub tenants_processed: IntGauge,
    pub tenants_filtered: IntGauge,
    pub circuit_state: IntGauge,
    pub active_spikes: IntGauge,
    pub audit_entries: IntGauge,
}

impl ControllerMetrics {
    pub fn new() -> WardenResult<Self> {
        let registry = Registry::new();
        let to_err = |e: prometheus::Error| WardenError::Configuration(e.to_string());

        let reconciliations_total = IntCounterVec::new(
            Opts::new(
                "warden_reconciliations_total",
                "Reconciliation passes by outcome",
            ),
            &["outcome"],
        )
        .map_err(to_err)?;
        let reconcile_duration = Histogram::with_opts(
            HistogramOpts::new(
                "warden_reconcile_duration_seconds",
                "Wall-clock duration of reconciliation passes",
            )
            .buckets(vec![0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0]),
        )
        .map_err(to_err)?;
        let component_errors = IntCounterVec::new(
            Opts::new("warden_component_errors_total", "Errors by component"),
            &["component"],
        )
        .map_err(to_err)?;
        let tenant_limit = prometheus::GaugeVec::new(
            Opts::new("warden_tenant_limit", "Computed limit values"),
            &["tenant", "limit"],
        )
        .map_err(to_err)?;
        let tenants_processed = IntGauge::new(
            "warden_tenants_processed",
            "Tenants processed in the last pass",
        )
        .map_err(to_err)?;
        let tenants_filtered = IntGauge::new(
            "warden_tenants_filtered",
            "Tenants rejected by the filter in the last pass",
        )
        .map_err(to_err)?;
        let circuit_state = IntGauge::new(
            "warden_circuit_state",
            "Circuit state: 0 closed, 1 half-open, 2 open",
        )
        .map_err(to_err)?;
        let active_spikes =
            IntGauge::new("warden_active_spikes", "Currently detected spikes").map_err(to_err)?;
        let audit_entries =
            IntGauge::new("warden_audit_entries", "Entries in the audit log").map_err(to_err)?;

        for collector in [
            Box::new(reconciliations_total.clone()) as Box<dyn prometheus::core::Collector>,
            Box::new(reconcile_duration.clone()),
            Box::new(component_errors.clone()),
            Box::new(tenant_limit.clone()),
            Box::new(tenants_processed.clone()),
            Box::new(tenants_filtered.clone()),
            Box::new(circuit_state.clone()),
            Box::new(active_spikes.clone()),
            Box::new(audit_entries.clone()),
        ] {
            registry.register(collector).map_err(to_err)?;
        }

        Ok(Self {
            registry,
            reconciliations_total,
            reconcile_duration,
            component_errors,
            tenant_limit,
            tenants_processed,
            tenants_filtered,
            circuit_state,
            active_spikes,
            audit_entries,
        })
    }

    /// Export every numeric limit value as a gauge sample.
    pub fn update_limits(&self, limits: &BTreeMap<String, TenantLimits>) {
        for (tenant, tenant_limits) in limits {
            for (name, value) in &tenant_limits.limits {
                if let Some(v) = value.as_f64() {
                    self.tenant_limit
                        .with_label_values(&[tenant.as_str(), name.as_str()])
                        .set(v);
                }
            }
        }
    }

    pub fn set_circuit_state(&self, state: CircuitState) {
        let value = match state {
            CircuitState::Closed => 0,
            CircuitState::HalfOpen => 1,
            CircuitState::Open => 2,
        };
        self.circuit_state.set(value);
    }

    pub fn record_component_error(&self, component: &str) {
        self.component_errors.with_label_values(&[component]).inc();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use warden_types::LimitValue;

    #[test]
    fn registers_and_updates() {
        let metrics = ControllerMetrics::new().unwrap();

        let mut tl = TenantLimits::new("t1");
        tl.set("ingestion_rate", LimitValue::Rate(1_000.0));
        tl.set("retention", LimitValue::Duration("30d".into()));
        let limits = BTreeMap::from([("t1".to_string(), tl)]);
        metrics.update_limits(&limits);
        metrics.set_circuit_state(CircuitState::Open);
        metrics.record_component_error("collector");
        metrics.reconciliations_total.with_label_values(&["success"]).inc();

        let families = metrics.registry.gather();
        let names: Vec<&str> = families.iter().map(|f| f.get_name()).collect();
        assert!(names.contains(&"warden_tenant_limit"));
        assert!(names.contains(&"warden_reconciliations_total"));
        assert!(names.contains(&"warden_circuit_state"));

        let limit_family = families
            .iter()
            .find(|f| f.get_name() == "warden_tenant_limit")
            .unwrap();
        // Only the numeric limit exports; the duration does not.
        assert_eq!(limit_family.get_metric().len(), 1);
    }
}
