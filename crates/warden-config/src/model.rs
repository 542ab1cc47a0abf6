use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use warden_types::LimitDefinition;

use crate::defaults;

/// Operating mode. Controls whether downstream readers are expected to
/// consume the written overrides and the circuit-breaker default.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum Mode {
    #[default]
    #[serde(rename = "dry-run")]
    DryRun,
    #[serde(rename = "prod")]
    Prod,
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Mode::DryRun => f.write_str("dry-run"),
            Mode::Prod => f.write_str("prod"),
        }
    }
}

/// Root configuration document.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WardenConfig {
    pub mode: Mode,
    pub update_interval_secs: u64,
    pub target: TargetConfig,
    pub collector: CollectorConfig,
    pub tenant_filter: TenantFilterConfig,
    pub analyzer: AnalyzerConfig,
    pub limits: LimitsConfig,
    pub cost: CostConfig,
    pub protection: ProtectionConfig,
    pub audit: AuditConfig,
    pub api: ApiConfig,
    pub leader_election: LeaderElectionConfig,
    pub rollout: RolloutConfig,
}

impl Default for WardenConfig {
    fn default() -> Self {
        Self {
            mode: Mode::default(),
            update_interval_secs: 60,
            target: TargetConfig::default(),
            collector: CollectorConfig::default(),
            tenant_filter: TenantFilterConfig::default(),
            analyzer: AnalyzerConfig::default(),
            limits: LimitsConfig::default(),
            cost: CostConfig::default(),
            protection: ProtectionConfig::default(),
            audit: AuditConfig::default(),
            api: ApiConfig::default(),
            leader_election: LeaderElectionConfig::default(),
            rollout: RolloutConfig::default(),
        }
    }
}

impl WardenConfig {
    /// Whether runtime protection is active, honoring the mode default
    /// (on in prod, off in dry-run) when not set explicitly.
    pub fn protection_enabled(&self) -> bool {
        self.protection
            .enabled
            .unwrap_or(self.mode == Mode::Prod)
    }
}

/// Where the runtime-overrides document lives.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TargetConfig {
    pub namespace: String,
    pub configmap_name: String,
    /// Key inside the document holding the overrides YAML.
    pub overrides_key: String,
}

impl Default for TargetConfig {
    fn default() -> Self {
        Self {
            namespace: "mimir".to_string(),
            configmap_name: "mimir-runtime-overrides".to_string(),
            overrides_key: "overrides.yaml".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CollectorConfig {
    /// Explicit metrics endpoint; merged with discovery results.
    pub endpoint: Option<String>,
    pub discovery: DiscoveryConfig,
    /// Primary tenant-scope header sent with every scrape when a scope is
    /// configured.
    pub tenant_header: String,
    pub tenant_scope: Option<String>,
    pub extra_headers: BTreeMap<String, String>,
    pub timeout_secs: u64,
    /// Tenants emitted when scraping yields nothing and the backing document
    /// has no keys either.
    pub fallback_tenants: Vec<String>,
    pub synthetic: SyntheticConfig,
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            discovery: DiscoveryConfig::default(),
            tenant_header: "X-Scope-OrgID".to_string(),
            tenant_scope: None,
            extra_headers: BTreeMap::new(),
            timeout_secs: 30,
            fallback_tenants: Vec::new(),
            synthetic: SyntheticConfig::default(),
        }
    }
}

/// Automatic service discovery: enumerate services in a namespace matching a
/// label selector and known service names, yielding scrape URLs.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DiscoveryConfig {
    pub enabled: bool,
    pub namespace: String,
    pub label_selector: String,
    pub service_names: Vec<String>,
    pub scheme: String,
    pub port: u16,
    pub path: String,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            namespace: "mimir".to_string(),
            label_selector: "app.kubernetes.io/part-of=memberlist".to_string(),
            service_names: vec![
                "distributor".to_string(),
                "ingester".to_string(),
                "querier".to_string(),
                "query-frontend".to_string(),
                "ruler".to_string(),
                "compactor".to_string(),
            ],
            scheme: "http".to_string(),
            port: 8080,
            path: "/metrics".to_string(),
        }
    }
}

/// Deterministic sample generation for environments without live sources.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyntheticConfig {
    pub enabled: bool,
    pub tenant_count: usize,
}

impl Default for SyntheticConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            tenant_count: 3,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct TenantFilterConfig {
    /// Patterns rejected outright, checked first.
    pub skip: Vec<String>,
    /// If non-empty, a tenant must match to be processed.
    pub include: Vec<String>,
    /// Swap the glob matcher for full regular expressions.
    pub use_regex: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalyzerConfig {
    pub analysis_window_secs: u64,
    /// Percentile used for the recommendation, `[0, 100]`.
    pub percentile: f64,
    pub use_moving_average: bool,
    pub include_peaks: bool,
    /// Tenants with no new samples for this long are evicted from history.
    pub inactive_tenant_ttl_secs: u64,
    /// Additional metric-to-limit mappings on top of the definitions'
    /// `metric_source` entries. Lets several metric families drive one limit.
    pub extra_metric_mappings: BTreeMap<String, String>,
    pub spike: SpikeConfig,
}

impl Default for AnalyzerConfig {
    fn default() -> Self {
        Self {
            analysis_window_secs: 1_800,
            percentile: 95.0,
            use_moving_average: true,
            include_peaks: false,
            inactive_tenant_ttl_secs: 86_400,
            extra_metric_mappings: defaults::default_metric_mappings(),
            spike: SpikeConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SpikeConfig {
    pub enabled: bool,
    /// Breach when `latest > baseline × threshold`. Must be > 1.0.
    pub threshold: f64,
    pub detection_window_secs: u64,
    pub cooldown_secs: u64,
    pub max_multiplier: f64,
}

impl Default for SpikeConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            threshold: 2.0,
            detection_window_secs: 300,
            cooldown_secs: 1_800,
            max_multiplier: 5.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LimitsConfig {
    pub definitions: Vec<LimitDefinition>,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            definitions: defaults::default_limit_definitions(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CostConfig {
    pub enabled: bool,
    pub cost_per_unit: f64,
    pub weights: CostWeights,
    /// Growth multiplier seeding the "projected" cost variants.
    pub growth_factor: f64,
    pub budgets: BudgetsConfig,
    /// Scale limits down when a budget is violated and enforcement is on.
    pub auto_limit_reduction: bool,
    /// Minimum gap between budget alerts for one tenant.
    pub alert_cooldown_secs: u64,
    /// Metric families whose latest values feed each cost term.
    pub sample_metrics: Vec<String>,
    pub series_metrics: Vec<String>,
    pub query_metrics: Vec<String>,
}

impl Default for CostConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            cost_per_unit: 0.001,
            weights: CostWeights::default(),
            growth_factor: 1.1,
            budgets: BudgetsConfig::default(),
            auto_limit_reduction: true,
            alert_cooldown_secs: 3_600,
            sample_metrics: vec![
                "cortex_distributor_received_samples_total".to_string(),
                "cortex_distributor_samples_in_total".to_string(),
            ],
            series_metrics: vec!["cortex_ingester_memory_series".to_string()],
            query_metrics: vec!["cortex_query_frontend_queries_total".to_string()],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CostWeights {
    pub samples: f64,
    pub series: f64,
    pub queries: f64,
}

impl Default for CostWeights {
    fn default() -> Self {
        Self {
            samples: 0.4,
            series: 0.3,
            queries: 0.3,
        }
    }
}

/// Spend caps for one scope. `enforce` gates limit reduction; without it a
/// violation only alerts.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BudgetConfig {
    pub daily: f64,
    pub monthly: f64,
    pub annual: f64,
    pub currency: String,
    pub enforce: bool,
}

impl Default for BudgetConfig {
    fn default() -> Self {
        Self {
            daily: 0.0,
            monthly: 0.0,
            annual: 0.0,
            currency: "USD".to_string(),
            enforce: false,
        }
    }
}

impl BudgetConfig {
    /// A budget with no caps set is treated as absent.
    pub fn is_unset(&self) -> bool {
        self.daily <= 0.0 && self.monthly <= 0.0 && self.annual <= 0.0
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct BudgetsConfig {
    pub global: BudgetConfig,
    pub per_tenant: BTreeMap<String, BudgetConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct ProtectionConfig {
    /// Defaults by mode when unset: on in prod, off in dry-run.
    pub enabled: Option<bool>,
    pub rate_limit: RateLimitConfig,
    pub circuit: CircuitConfig,
    pub blast: BlastConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    pub rate_per_sec: f64,
    pub burst: f64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            rate_per_sec: 10.0,
            burst: 20.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CircuitConfig {
    /// Trip when `failures/requests × 100` reaches this percentage…
    pub failure_threshold_pct: f64,
    /// …and at least this many requests were observed.
    pub volume_threshold: u64,
    pub sleep_window_secs: u64,
    pub half_open_max_requests: u64,
}

impl Default for CircuitConfig {
    fn default() -> Self {
        Self {
            failure_threshold_pct: 50.0,
            volume_threshold: 10,
            sleep_window_secs: 30,
            half_open_max_requests: 5,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BlastConfig {
    pub enabled: bool,
    /// Global manual thresholds; absent values fall through to auto mode.
    pub thresholds: ManualThresholds,
    pub tenant_thresholds: BTreeMap<String, ManualThresholds>,
    pub auto: AutoThresholdConfig,
    pub adaptation: AdaptationConfig,
    pub baseline_refresh_secs: u64,
    /// Enter emergency mode on detection instead of accelerating the breaker.
    pub auto_emergency_shutdown: bool,
    /// Failure count added per detection when emergency shutdown is off.
    pub failure_increment: u64,
    /// Leave emergency/panic automatically after this long without a new
    /// trigger. Unset means recovery is an explicit operator action.
    pub recovery_after_secs: Option<u64>,
}

impl Default for BlastConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            thresholds: ManualThresholds::default(),
            tenant_thresholds: BTreeMap::new(),
            auto: AutoThresholdConfig::default(),
            adaptation: AdaptationConfig::default(),
            baseline_refresh_secs: 86_400,
            auto_emergency_shutdown: false,
            failure_increment: 10,
            recovery_after_secs: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct ManualThresholds {
    pub ingestion_rate: Option<f64>,
    pub query_rate: Option<f64>,
    pub series_rate: Option<f64>,
}

impl ManualThresholds {
    pub fn is_unset(&self) -> bool {
        self.ingestion_rate.is_none() && self.query_rate.is_none() && self.series_rate.is_none()
    }
}

/// Auto thresholds derive from the tenant's current limits:
/// `limit × multiplier × (1 + safety_margin_pct/100)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AutoThresholdConfig {
    pub enabled: bool,
    pub multiplier: f64,
    pub safety_margin_pct: f64,
}

impl Default for AutoThresholdConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            multiplier: 2.0,
            safety_margin_pct: 20.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AdaptationConfig {
    pub enabled: bool,
    pub interval_secs: u64,
    /// No adaptation before this much observation has accumulated.
    pub min_observation_secs: u64,
    pub learning_rate: f64,
    /// Per-step change clip, as a percentage of the current threshold.
    pub max_change_pct: f64,
    pub percentile: f64,
}

impl Default for AdaptationConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_secs: 300,
            min_observation_secs: 3_600,
            learning_rate: 0.1,
            max_change_pct: 20.0,
            percentile: 95.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum AuditBackend {
    None,
    #[default]
    Memory,
    /// Shared-document-backed log with optimistic-concurrency writes.
    Document,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuditConfig {
    pub backend: AuditBackend,
    pub max_entries: usize,
    /// Default stays under the orchestrator's 1 MB document cap.
    pub max_size_bytes: usize,
    pub retention_secs: u64,
    pub cleanup_interval_secs: u64,
    /// Size cleanup trims until `size ≤ max_size_bytes × this/100`.
    pub emergency_threshold_pct: f64,
    pub document_name: String,
    pub document_key: String,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            backend: AuditBackend::Memory,
            max_entries: 1_000,
            max_size_bytes: 800 * 1024,
            retention_secs: 7 * 86_400,
            cleanup_interval_secs: 300,
            emergency_threshold_pct: 90.0,
            document_name: "warden-audit".to_string(),
            document_key: "audit.json".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    pub bind: String,
    pub enable_cors: bool,
    pub request_timeout_secs: u64,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0:8080".to_string(),
            enable_cors: true,
            request_timeout_secs: 30,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LeaderElectionConfig {
    pub enabled: bool,
    pub lease_document: String,
    pub lease_duration_secs: u64,
    pub renew_interval_secs: u64,
    /// Instance identity written into the lease; a random one is generated
    /// when unset.
    pub identity: Option<String>,
}

impl Default for LeaderElectionConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            lease_document: "warden-leader".to_string(),
            lease_duration_secs: 30,
            renew_interval_secs: 10,
            identity: None,
        }
    }
}

/// Optional downstream rollout trigger. Limit propagation itself never
/// requires restarts; this annotates the named workloads as a separate lever.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct RolloutConfig {
    pub enabled: bool,
    pub workloads: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn protection_defaults_follow_mode() {
        let mut config = WardenConfig::default();
        assert_eq!(config.mode, Mode::DryRun);
        assert!(!config.protection_enabled());

        config.mode = Mode::Prod;
        assert!(config.protection_enabled());

        config.protection.enabled = Some(false);
        assert!(!config.protection_enabled());
    }

    #[test]
    fn default_definitions_present() {
        let config = WardenConfig::default();
        assert!(config.limits.definitions.len() >= 30);
        assert!(config
            .limits
            .definitions
            .iter()
            .any(|d| d.name == "ingestion_rate" && d.metric_source.is_some()));
    }

    #[test]
    fn unset_budget_detected() {
        assert!(BudgetConfig::default().is_unset());
        let set = BudgetConfig {
            daily: 100.0,
            ..Default::default()
        };
        assert!(!set.is_unset());
    }
}
