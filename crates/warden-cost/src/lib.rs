//! Cost projection and budget enforcement.
//!
//! The cost model is a weighted sum over each tenant's last-observed sample,
//! series, and query magnitudes. Projections extrapolate the current rate to
//! daily/monthly/annual horizons, with a growth multiplier seeding the
//! "projected" variants. Budgets are looked up per tenant first, then fall
//! back to the global budget; violations alert (throttled per tenant) and,
//! with enforcement on, scale the tenant's numeric limits down.

use chrono::{TimeZone, Utc};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, RwLock};
use tracing::{info, warn};
use warden_config::{BudgetConfig, CostConfig};
use warden_types::{Alert, AlertSeverity, TenantLimits, TenantMetrics};
use warden_utils::Clock;

const DAYS_PER_MONTH: f64 = 30.0;
const DAYS_PER_YEAR: f64 = 365.0;

/// Utilization level driving the reduction ladder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BudgetLevel {
    Ok,
    /// Above 75 % of a cap: soft reduction.
    Soft,
    /// Above 95 % of a cap: hard reduction.
    Warning,
    /// Above a cap: violation.
    Violation,
}

/// Derived cost picture for one tenant.
#[derive(Debug, Clone, Serialize)]
pub struct TenantCostData {
    pub tenant: String,
    pub daily_cost: f64,
    pub monthly_cost: f64,
    pub annual_cost: f64,
    /// Growth-seeded variants.
    pub projected_daily: f64,
    pub projected_monthly: f64,
    pub projected_annual: f64,
    /// Highest utilization across the set budget periods, percent.
    pub utilization_pct: f64,
    pub level: BudgetLevel,
    /// Which budget applied: `tenant`, `global`, or `none`.
    pub budget_scope: &'static str,
}

pub struct CostController {
    config: CostConfig,
    clock: Arc<dyn Clock>,
    /// Last alert time per tenant, for throttling.
    alert_times: RwLock<HashMap<String, u64>>,
    /// Latest cost picture, for the API.
    snapshot: RwLock<BTreeMap<String, TenantCostData>>,
}

impl CostController {
    pub fn new(config: CostConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            config,
            clock,
            alert_times: RwLock::new(HashMap::new()),
            snapshot: RwLock::new(BTreeMap::new()),
        }
    }

    pub fn enabled(&self) -> bool {
        self.config.enabled
    }

    /// Compute the cost picture for every tenant in this pass.
    pub fn calculate_costs(
        &self,
        metrics: &BTreeMap<String, TenantMetrics>,
    ) -> BTreeMap<String, TenantCostData> {
        let mut costs = BTreeMap::new();
        for (tenant, tm) in metrics {
            let samples = latest_of(tm, &self.config.sample_metrics);
            let series = latest_of(tm, &self.config.series_metrics);
            let queries = latest_of(tm, &self.config.query_metrics);

            let w = &self.config.weights;
            let daily = self.config.cost_per_unit
                * (w.samples * samples + w.series * series + w.queries * queries);
            let monthly = daily * DAYS_PER_MONTH;
            let annual = daily * DAYS_PER_YEAR;
            let growth = self.config.growth_factor;

            let (scope, budget) = self.budget_for(tenant);
            let utilization = budget
                .map(|b| utilization_pct(daily, monthly, annual, b))
                .unwrap_or(0.0);

            costs.insert(
                tenant.clone(),
                TenantCostData {
                    tenant: tenant.clone(),
                    daily_cost: daily,
                    monthly_cost: monthly,
                    annual_cost: annual,
                    projected_daily: daily * growth,
                    projected_monthly: monthly * growth,
                    projected_annual: annual * growth,
                    utilization_pct: utilization,
                    level: level_of(utilization),
                    budget_scope: scope,
                },
            );
        }

        *self.snapshot.write().expect("cost snapshot lock") = costs.clone();
        costs
    }

    /// Apply budget enforcement to the computed limits.
    ///
    /// Returns the alerts produced this pass, already throttled to one per
    /// tenant per cooldown window.
    pub fn enforce_budgets(
        &self,
        limits: &mut BTreeMap<String, TenantLimits>,
        costs: &BTreeMap<String, TenantCostData>,
    ) -> Vec<Alert> {
        let mut alerts = Vec::new();
        for (tenant, cost) in costs {
            let (_, budget) = self.budget_for(tenant);
            let Some(budget) = budget else { continue };
            if cost.level == BudgetLevel::Ok {
                continue;
            }

            let reduce = budget.enforce && self.config.auto_limit_reduction;
            let factor = match cost.level {
                BudgetLevel::Warning | BudgetLevel::Violation => {
                    hard_reduction_factor(cost, budget)
                }
                BudgetLevel::Soft => 0.9,
                BudgetLevel::Ok => 1.0,
            };

            if reduce {
                if let Some(tenant_limits) = limits.get_mut(tenant) {
                    tenant_limits.scale_numeric(factor);
                    tenant_limits.reason = format!(
                        "budget {}: utilization {:.1}%, limits scaled by {:.2}",
                        match cost.level {
                            BudgetLevel::Violation => "violated",
                            BudgetLevel::Warning => "near cap",
                            _ => "pressure",
                        },
                        cost.utilization_pct,
                        factor
                    );
                    info!(
                        tenant = %tenant,
                        utilization_pct = cost.utilization_pct,
                        factor,
                        "budget enforcement reduced limits"
                    );
                }
            }

            if let Some(alert) = self.build_alert(tenant, cost, reduce, factor) {
                alerts.push(alert);
            }
        }
        alerts
    }

    /// Latest cost picture for the API.
    pub fn cost_snapshot(&self) -> BTreeMap<String, TenantCostData> {
        self.snapshot.read().expect("cost snapshot lock").clone()
    }

    fn budget_for(&self, tenant: &str) -> (&'static str, Option<&BudgetConfig>) {
        if let Some(budget) = self.config.budgets.per_tenant.get(tenant) {
            if !budget.is_unset() {
                return ("tenant", Some(budget));
            }
        }
        if !self.config.budgets.global.is_unset() {
            return ("global", Some(&self.config.budgets.global));
        }
        ("none", None)
    }

    /// One alert per tenant per cooldown window.
    fn build_alert(
        &self,
        tenant: &str,
        cost: &TenantCostData,
        reduced: bool,
        factor: f64,
    ) -> Option<Alert> {
        let now_ms = self.clock.now_ms();
        let cooldown_ms = self.config.alert_cooldown_secs * 1_000;
        {
            let times = self.alert_times.read().expect("alert times lock");
            if let Some(last) = times.get(tenant) {
                if now_ms.saturating_sub(*last) < cooldown_ms {
                    return None;
                }
            }
        }
        self.alert_times
            .write()
            .expect("alert times lock")
            .insert(tenant.to_string(), now_ms);

        let severity = match cost.level {
            BudgetLevel::Violation | BudgetLevel::Warning => AlertSeverity::Critical,
            _ => AlertSeverity::Warning,
        };
        let action = if reduced {
            format!("limits scaled by {factor:.2}")
        } else {
            "enforcement disabled, no action taken".to_string()
        };
        warn!(
            tenant = %tenant,
            utilization_pct = cost.utilization_pct,
            daily_cost = cost.daily_cost,
            "budget alert"
        );
        let mut alert = Alert::new(
            severity,
            "cost-controller",
            format!(
                "budget utilization {:.1}% (daily cost {:.2}); {action}",
                cost.utilization_pct, cost.daily_cost
            ),
        )
        .tenant(tenant);
        alert.timestamp = Utc
            .timestamp_millis_opt(now_ms as i64)
            .single()
            .unwrap_or_else(Utc::now);
        Some(alert)
    }
}

fn latest_of(metrics: &TenantMetrics, families: &[String]) -> f64 {
    families
        .iter()
        .filter_map(|family| metrics.latest_value(family))
        .fold(0.0, f64::max)
}

fn utilization_pct(daily: f64, monthly: f64, annual: f64, budget: &BudgetConfig) -> f64 {
    let mut utilization: f64 = 0.0;
    for (cost, cap) in [
        (daily, budget.daily),
        (monthly, budget.monthly),
        (annual, budget.annual),
    ] {
        if cap > 0.0 {
            utilization = utilization.max(cost / cap * 100.0);
        }
    }
    utilization
}

fn level_of(utilization_pct: f64) -> BudgetLevel {
    if utilization_pct > 100.0 {
        BudgetLevel::Violation
    } else if utilization_pct > 95.0 {
        BudgetLevel::Warning
    } else if utilization_pct > 75.0 {
        BudgetLevel::Soft
    } else {
        BudgetLevel::Ok
    }
}

/// Hard reduction: `min(0.8, cap/cost)` on the most-pressured period.
fn hard_reduction_factor(cost: &TenantCostData, budget: &BudgetConfig) -> f64 {
    let mut ratio = f64::INFINITY;
    for (c, cap) in [
        (cost.daily_cost, budget.daily),
        (cost.monthly_cost, budget.monthly),
        (cost.annual_cost, budget.annual),
    ] {
        if cap > 0.0 && c > 0.0 {
            ratio = ratio.min(cap / c);
        }
    }
    if ratio.is_finite() {
        ratio.min(0.8)
    } else {
        0.8
    }
}
