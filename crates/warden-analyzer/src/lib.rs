//! Sliding-window analysis: statistics, spike detection, and limit
//! synthesis.
//!
//! The analyzer owns the sample history (twice the analysis window per
//! `(tenant, metric)` slot) and derives per-tenant limit recommendations
//! from it each pass. All state lives behind one lock; the reconciler is the
//! only writer, API views read snapshots.

mod history;
mod spike;
mod stats;

pub use spike::{SpikeDetector, SpikeInfo, MIN_BASELINE_SAMPLES};
pub use stats::{compute, percentile_of, slope, MetricStatistics};

use chrono::{TimeZone, Utc};
use history::HistoryStore;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, RwLock};
use tracing::debug;
use warden_config::AnalyzerConfig;
use warden_types::{LimitDefinition, TenantLimits};
use warden_utils::Clock;

/// Trend analysis outcome for one metric of one tenant.
#[derive(Debug, Clone, Serialize)]
pub struct AnalysisResult {
    pub metric_name: String,
    pub stats: MetricStatistics,
    /// Active spike multiplier, 1.0 when none.
    pub spike_multiplier: f64,
    /// Final recommendation feeding limit synthesis.
    pub recommended: f64,
}

/// Read-only view of one tenant's analyzer state for the API.
#[derive(Debug, Clone, Serialize)]
pub struct TenantAnalysisSnapshot {
    pub tenant: String,
    pub tracked_metrics: usize,
    pub active_spikes: Vec<(String, SpikeInfo)>,
}

struct Inner {
    history: HistoryStore,
    spikes: SpikeDetector,
}

pub struct Analyzer {
    config: AnalyzerConfig,
    definitions: Vec<LimitDefinition>,
    /// metric family → limit names it drives.
    mappings: HashMap<String, Vec<String>>,
    clock: Arc<dyn Clock>,
    inner: RwLock<Inner>,
}

impl Analyzer {
    pub fn new(
        config: AnalyzerConfig,
        definitions: Vec<LimitDefinition>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let mut mappings: HashMap<String, Vec<String>> = HashMap::new();
        for def in &definitions {
            if let Some(source) = &def.metric_source {
                mappings
                    .entry(source.clone())
                    .or_default()
                    .push(def.name.clone());
            }
        }
        for (metric, limit) in &config.extra_metric_mappings {
            let targets = mappings.entry(metric.clone()).or_default();
            if !targets.contains(limit) {
                targets.push(limit.clone());
            }
        }

        Self {
            config,
            definitions,
            mappings,
            clock,
            inner: RwLock::new(Inner {
                history: HistoryStore::default(),
                spikes: SpikeDetector::default(),
            }),
        }
    }

    pub fn definitions(&self) -> &[LimitDefinition] {
        &self.definitions
    }

    /// Fold the pass into history and evaluate spike state.
    ///
    /// Returns the spikes *newly* detected this pass (`tenant → metrics`);
    /// continuing spikes refresh silently. Runs before trend analysis.
    pub fn detect_spikes(
        &self,
        metrics: &BTreeMap<String, warden_types::TenantMetrics>,
    ) -> BTreeMap<String, Vec<String>> {
        let now_ms = self.clock.now_ms();
        let retain_ms = 2 * self.config.analysis_window_secs * 1_000;
        let mut inner = self.inner.write().expect("analyzer lock");
        inner.history.ingest(metrics, now_ms, retain_ms);

        let mut detections: BTreeMap<String, Vec<String>> = BTreeMap::new();
        if !self.config.spike.enabled {
            return detections;
        }

        let baseline_age_ms = 2 * self.config.spike.detection_window_secs * 1_000;
        for tenant in metrics.keys() {
            for metric in inner.history.metric_names(tenant) {
                let baseline =
                    inner
                        .history
                        .values_older_than(tenant, &metric, now_ms, baseline_age_ms);
                let latest = inner.history.latest_value(tenant, &metric);
                let Inner { spikes, .. } = &mut *inner;
                if spikes.observe(
                    tenant,
                    &metric,
                    &baseline,
                    latest,
                    &self.config.spike,
                    now_ms,
                ) {
                    detections.entry(tenant.clone()).or_default().push(metric);
                }
            }
        }
        detections
    }

    /// Windowed statistics and recommendations for every tracked metric of
    /// the tenants present in this pass.
    pub fn analyze_trends(
        &self,
        metrics: &BTreeMap<String, warden_types::TenantMetrics>,
    ) -> BTreeMap<String, Vec<AnalysisResult>> {
        let now_ms = self.clock.now_ms();
        let retain_ms = 2 * self.config.analysis_window_secs * 1_000;
        let window_ms = self.config.analysis_window_secs * 1_000;

        let mut inner = self.inner.write().expect("analyzer lock");
        inner.history.ingest(metrics, now_ms, retain_ms);

        let mut analysis = BTreeMap::new();
        for tenant in metrics.keys() {
            let mut results = Vec::new();
            for metric in inner.history.metric_names(tenant) {
                let window = inner.history.window_values(tenant, &metric, now_ms, window_ms);
                if window.is_empty() {
                    continue;
                }
                let stats = stats::compute(&window, self.config.percentile);
                let spike_multiplier = inner.spikes.multiplier(tenant, &metric);

                let mut recommended = stats.percentile;
                if self.config.use_moving_average {
                    recommended = recommended.max(stats.moving_average);
                }
                if self.config.include_peaks {
                    recommended = recommended.max(stats.peak * 0.8);
                }
                recommended *= spike_multiplier;

                results.push(AnalysisResult {
                    metric_name: metric,
                    stats,
                    spike_multiplier,
                    recommended,
                });
            }
            // Tenants without samples still get an (empty) entry so limit
            // synthesis can carry their configured defaults.
            analysis.insert(tenant.clone(), results);
        }
        analysis
    }

    /// Synthesize per-tenant limit values from trend analysis.
    ///
    /// Every enabled definition with an observed source gets
    /// `max(candidates)` pushed through buffer and clamp; when several
    /// metrics drive the same limit the largest recommendation wins.
    /// Definitions without an observation keep their configured defaults.
    pub fn calculate_limits(
        &self,
        analysis: &BTreeMap<String, Vec<AnalysisResult>>,
    ) -> BTreeMap<String, TenantLimits> {
        let now = Utc
            .timestamp_millis_opt(self.clock.now_ms() as i64)
            .single()
            .unwrap_or_else(Utc::now);

        let mut all_limits = BTreeMap::new();
        for (tenant, results) in analysis {
            let mut recommendations: HashMap<&str, f64> = HashMap::new();
            for result in results {
                let Some(limit_names) = self.mappings.get(&result.metric_name) else {
                    continue;
                };
                for limit_name in limit_names {
                    recommendations
                        .entry(limit_name.as_str())
                        .and_modify(|current| *current = current.max(result.recommended))
                        .or_insert(result.recommended);
                }
            }

            let mut limits = TenantLimits::new(tenant.clone());
            limits.last_updated = now;
            limits.reason = format!("analysis of {} metric families", results.len());
            for def in &self.definitions {
                if !def.enabled {
                    continue;
                }
                match recommendations.get(def.name.as_str()) {
                    Some(recommended) => {
                        if let Some(value) = def.synthesize(*recommended) {
                            limits.set(def.name.clone(), value);
                        }
                    }
                    None => {
                        if let Some(default) = &def.default {
                            limits.set(def.name.clone(), default.clone());
                        }
                    }
                }
            }
            debug!(
                tenant = %tenant,
                limits = limits.limits.len(),
                "limits synthesized"
            );
            all_limits.insert(tenant.clone(), limits);
        }
        all_limits
    }

    /// Evict tenants with no samples for the configured TTL and drop their
    /// spike slots. Returns the evicted names.
    pub fn evict_inactive(&self) -> Vec<String> {
        let now_ms = self.clock.now_ms();
        let ttl_ms = self.config.inactive_tenant_ttl_secs * 1_000;
        let mut inner = self.inner.write().expect("analyzer lock");
        let evicted = inner.history.evict_inactive(now_ms, ttl_ms);
        for tenant in &evicted {
            inner.spikes.forget_tenant(tenant);
        }
        evicted
    }

    pub fn spike_info(&self, tenant: &str, metric: &str) -> Option<SpikeInfo> {
        self.inner
            .read()
            .expect("analyzer lock")
            .spikes
            .get(tenant, metric)
            .cloned()
    }

    pub fn active_spike_count(&self) -> usize {
        self.inner.read().expect("analyzer lock").spikes.active_count()
    }

    pub fn tenant_snapshots(&self) -> Vec<TenantAnalysisSnapshot> {
        let inner = self.inner.read().expect("analyzer lock");
        let mut tenants = inner.history.tenant_names();
        tenants.sort_unstable();
        tenants
            .into_iter()
            .map(|tenant| TenantAnalysisSnapshot {
                tracked_metrics: inner.history.metric_names(&tenant).len(),
                active_spikes: inner.spikes.active_for_tenant(&tenant),
                tenant,
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use warden_types::{LimitType, LimitValue, Sample, TenantMetrics};
    use warden_utils::ManualClock;

    const MINUTE_MS: u64 = 60_000;

    fn definitions() -> Vec<LimitDefinition> {
        vec![
            LimitDefinition {
                name: "ingestion_rate".into(),
                limit_type: LimitType::Rate,
                metric_source: Some("samples_in".into()),
                default: Some(LimitValue::Rate(10_000.0)),
                min: Some(1_000.0),
                max: Some(100_000.0),
                buffer_pct: 20.0,
                enabled: true,
            },
            LimitDefinition {
                name: "max_series".into(),
                limit_type: LimitType::Count,
                metric_source: Some("memory_series".into()),
                default: Some(LimitValue::Count(150_000)),
                min: Some(0.0),
                max: Some(1_000_000.0),
                buffer_pct: 0.0,
                enabled: true,
            },
            LimitDefinition {
                name: "disabled_limit".into(),
                limit_type: LimitType::Rate,
                metric_source: Some("samples_in".into()),
                default: None,
                min: None,
                max: None,
                buffer_pct: 0.0,
                enabled: false,
            },
        ]
    }

    fn analyzer_with(clock: Arc<ManualClock>, config: AnalyzerConfig) -> Analyzer {
        Analyzer::new(config, definitions(), clock)
    }

    fn pass_with_series(
        tenant: &str,
        metric: &str,
        values: &[(u64, f64)],
    ) -> BTreeMap<String, TenantMetrics> {
        let mut tm = TenantMetrics::new(tenant);
        for (ms, value) in values {
            tm.push(
                Sample::new(tenant, metric, *value).with_timestamp(
                    Utc.timestamp_millis_opt(*ms as i64).single().unwrap(),
                ),
            );
        }
        BTreeMap::from([(tenant.to_string(), tm)])
    }

    #[test]
    fn constant_series_has_flat_trend_and_clamps() {
        let now = 100 * MINUTE_MS;
        let clock = ManualClock::new(now);
        let analyzer = analyzer_with(clock, AnalyzerConfig::default());

        // Constant 200k samples over the window: p95 = avg = 200k, buffered
        // to 240k, clamped to the 100k maximum.
        let series: Vec<(u64, f64)> = (0..10)
            .map(|i| (now - (10 - i) * MINUTE_MS, 200_000.0))
            .collect();
        let metrics = pass_with_series("t1", "samples_in", &series);

        analyzer.detect_spikes(&metrics);
        let analysis = analyzer.analyze_trends(&metrics);
        let result = &analysis["t1"][0];
        assert_eq!(result.stats.trend, 0.0);
        assert_eq!(result.recommended, 200_000.0);

        let limits = analyzer.calculate_limits(&analysis);
        assert_eq!(
            limits["t1"].get("ingestion_rate"),
            Some(&LimitValue::Rate(100_000.0))
        );
        // No memory_series observations: the default carries through.
        assert_eq!(
            limits["t1"].get("max_series"),
            Some(&LimitValue::Count(150_000))
        );
        assert!(limits["t1"].get("disabled_limit").is_none());
    }

    #[test]
    fn low_usage_clamps_to_min() {
        let now = 100 * MINUTE_MS;
        let analyzer = analyzer_with(ManualClock::new(now), AnalyzerConfig::default());

        let series: Vec<(u64, f64)> = (0..6).map(|i| (now - (6 - i) * MINUTE_MS, 10.0)).collect();
        let metrics = pass_with_series("t1", "samples_in", &series);
        let analysis = analyzer.analyze_trends(&metrics);
        let limits = analyzer.calculate_limits(&analysis);

        assert_eq!(
            limits["t1"].get("ingestion_rate"),
            Some(&LimitValue::Rate(1_000.0))
        );
    }

    #[test]
    fn spike_multiplies_recommendation() {
        let now = 100 * MINUTE_MS;
        let clock = ManualClock::new(now);
        let config = AnalyzerConfig {
            spike: warden_config::SpikeConfig {
                detection_window_secs: 120,
                ..Default::default()
            },
            ..Default::default()
        };
        let analyzer = analyzer_with(clock, config);

        // Five old baseline samples at 1000, then a fresh 5000.
        let mut series: Vec<(u64, f64)> = (0..5)
            .map(|i| (now - (20 - i) * MINUTE_MS, 1_000.0))
            .collect();
        series.push((now, 5_000.0));
        let metrics = pass_with_series("t1", "samples_in", &series);

        let detections = analyzer.detect_spikes(&metrics);
        assert_eq!(detections["t1"], vec!["samples_in".to_string()]);
        let info = analyzer.spike_info("t1", "samples_in").unwrap();
        assert_eq!(info.multiplier, 5.0);

        let analysis = analyzer.analyze_trends(&metrics);
        let result = &analysis["t1"][0];
        assert_eq!(result.spike_multiplier, 5.0);
        // p95 over [1000×5, 5000] is 4000; × 5 spike, +20 % buffer → 24000.
        let limits = analyzer.calculate_limits(&analysis);
        let value = limits["t1"].get("ingestion_rate").unwrap().as_f64().unwrap();
        assert!((value - 24_000.0).abs() < 1e-6, "got {value}");
    }

    #[test]
    fn conflicting_metrics_take_the_max() {
        let now = 100 * MINUTE_MS;
        let mut config = AnalyzerConfig::default();
        config
            .extra_metric_mappings
            .insert("samples_received".into(), "ingestion_rate".into());
        let analyzer = Analyzer::new(config, definitions(), ManualClock::new(now));

        let mut tm = TenantMetrics::new("t1");
        for (metric, value) in [("samples_in", 2_000.0), ("samples_received", 4_000.0)] {
            tm.push(
                Sample::new("t1", metric, value)
                    .with_timestamp(Utc.timestamp_millis_opt(now as i64).single().unwrap()),
            );
        }
        let metrics = BTreeMap::from([("t1".to_string(), tm)]);

        let analysis = analyzer.analyze_trends(&metrics);
        let limits = analyzer.calculate_limits(&analysis);
        // max(2000, 4000) × 1.2 buffer.
        let value = limits["t1"].get("ingestion_rate").unwrap().as_f64().unwrap();
        assert!((value - 4_800.0).abs() < 1e-6, "got {value}");
    }

    #[test]
    fn empty_tenant_gets_defaults() {
        let analyzer = analyzer_with(ManualClock::new(0), AnalyzerConfig::default());
        let metrics = BTreeMap::from([("t1".to_string(), TenantMetrics::new("t1"))]);

        let analysis = analyzer.analyze_trends(&metrics);
        assert!(analysis["t1"].is_empty());

        let limits = analyzer.calculate_limits(&analysis);
        assert_eq!(
            limits["t1"].get("ingestion_rate"),
            Some(&LimitValue::Rate(10_000.0))
        );
    }

    #[test]
    fn eviction_clears_history_and_spikes() {
        let now = 1_000 * MINUTE_MS;
        let clock = ManualClock::new(now);
        let config = AnalyzerConfig {
            inactive_tenant_ttl_secs: 60,
            ..Default::default()
        };
        let analyzer = analyzer_with(clock.clone(), config);

        let metrics = pass_with_series("t1", "samples_in", &[(now, 100.0)]);
        analyzer.detect_spikes(&metrics);
        assert_eq!(analyzer.tenant_snapshots().len(), 1);

        clock.advance(2 * 60 * 1_000);
        let evicted = analyzer.evict_inactive();
        assert_eq!(evicted, vec!["t1".to_string()]);
        assert!(analyzer.tenant_snapshots().is_empty());
    }
}
