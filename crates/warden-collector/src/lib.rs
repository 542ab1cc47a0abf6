//! Metric collection for the reconciliation pipeline.
//!
//! Each pass unions the configured endpoint with discovered service targets,
//! scrapes them with tenant-scope headers, parses the exposition payloads,
//! and folds tenant-labelled samples into per-tenant metric sets. Per-source
//! failures are counted and reported but never fail the pass; only a total
//! absence of sources does.

mod discovery;
mod filter;
mod parser;
mod synthetic;

pub use discovery::{FixedDiscovery, ScrapeTarget, ServiceDiscovery, StaticDiscovery};
pub use filter::{metric_allowed, tenant_of, TENANT_LABELS};
pub use parser::{parse_exposition, ParseOutcome, RawSample};

use chrono::{DateTime, TimeZone, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};
use warden_config::{CollectorConfig, TargetConfig};
use warden_store::DocumentStore;
use warden_types::{Sample, TenantMetrics, WardenError, WardenResult};

/// Health record for one scraped source in the latest pass. Feeds the
/// infrastructure-scan API view.
#[derive(Debug, Clone, Serialize)]
pub struct SourceReport {
    pub url: String,
    pub source: String,
    pub healthy: bool,
    pub sample_count: usize,
    pub tenant_count: usize,
    pub malformed_lines: usize,
    pub error: Option<String>,
    pub elapsed_ms: u64,
    pub scraped_at: DateTime<Utc>,
}

pub struct Collector {
    config: CollectorConfig,
    target: TargetConfig,
    client: reqwest::Client,
    discovery: Arc<dyn ServiceDiscovery>,
    store: Arc<dyn DocumentStore>,
    last_reports: RwLock<Vec<SourceReport>>,
    source_errors: AtomicU64,
}

impl Collector {
    pub fn new(
        config: CollectorConfig,
        target: TargetConfig,
        discovery: Arc<dyn ServiceDiscovery>,
        store: Arc<dyn DocumentStore>,
    ) -> WardenResult<Self> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("warden/", env!("CARGO_PKG_VERSION")))
            .gzip(true)
            .connect_timeout(Duration::from_secs(3))
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| WardenError::Transport(format!("cannot build HTTP client: {e}")))?;

        Ok(Self {
            config,
            target,
            client,
            discovery,
            store,
            last_reports: RwLock::new(Vec::new()),
            source_errors: AtomicU64::new(0),
        })
    }

    /// One collection pass: `tenant → TenantMetrics`.
    ///
    /// Fails with [`WardenError::NoSources`] only when no endpoint is
    /// configured and discovery yields nothing.
    pub async fn collect_metrics(&self) -> WardenResult<BTreeMap<String, TenantMetrics>> {
        if self.config.synthetic.enabled {
            let tenants = synthetic::generate(self.config.synthetic.tenant_count);
            info!(tenants = tenants.len(), "synthetic mode: generated workload");
            self.store_reports(vec![SourceReport {
                url: "synthetic://".to_string(),
                source: "synthetic".to_string(),
                healthy: true,
                sample_count: tenants.values().map(TenantMetrics::sample_count).sum(),
                tenant_count: tenants.len(),
                malformed_lines: 0,
                error: None,
                elapsed_ms: 0,
                scraped_at: Utc::now(),
            }]);
            return Ok(tenants);
        }

        let targets = self.resolve_targets().await?;
        if targets.is_empty() {
            return Err(WardenError::NoSources);
        }

        let scrapes = futures::future::join_all(
            targets.iter().map(|target| self.scrape(target)),
        )
        .await;

        let mut tenants: BTreeMap<String, TenantMetrics> = BTreeMap::new();
        let mut reports = Vec::with_capacity(scrapes.len());
        for (samples, report) in scrapes {
            if !report.healthy {
                self.source_errors.fetch_add(1, Ordering::Relaxed);
            }
            for sample in samples {
                tenants
                    .entry(sample.tenant.clone())
                    .or_insert_with(|| TenantMetrics::new(&sample.tenant))
                    .push(sample);
            }
            reports.push(report);
        }
        self.store_reports(reports);

        if tenants.is_empty() {
            tenants = self.fallback_tenants().await;
            if !tenants.is_empty() {
                info!(tenants = tenants.len(), "scrape empty, using fallback tenant list");
            }
        }

        debug!(
            tenants = tenants.len(),
            samples = tenants.values().map(TenantMetrics::sample_count).sum::<usize>(),
            "collection pass finished"
        );
        Ok(tenants)
    }

    /// Latest per-source health reports.
    pub fn source_reports(&self) -> Vec<SourceReport> {
        self.last_reports.read().expect("reports lock").clone()
    }

    /// Total per-source scrape failures since startup.
    pub fn source_error_count(&self) -> u64 {
        self.source_errors.load(Ordering::Relaxed)
    }

    async fn resolve_targets(&self) -> WardenResult<Vec<ScrapeTarget>> {
        let mut targets = Vec::new();
        if let Some(endpoint) = &self.config.endpoint {
            if !endpoint.is_empty() {
                targets.push(ScrapeTarget::new(endpoint.clone(), "endpoint"));
            }
        }
        for discovered in self.discovery.discover().await? {
            if !targets.iter().any(|t| t.url == discovered.url) {
                targets.push(discovered);
            }
        }
        Ok(targets)
    }

    async fn scrape(&self, target: &ScrapeTarget) -> (Vec<Sample>, SourceReport) {
        let started = Instant::now();
        let scraped_at = Utc::now();

        let mut request = self.client.get(&target.url);
        if let Some(scope) = &self.config.tenant_scope {
            request = request.header(self.config.tenant_header.as_str(), scope.as_str());
        }
        for (name, value) in &self.config.extra_headers {
            request = request.header(name.as_str(), value.as_str());
        }

        let fail = |error: String, started: Instant| SourceReport {
            url: target.url.clone(),
            source: target.source.clone(),
            healthy: false,
            sample_count: 0,
            tenant_count: 0,
            malformed_lines: 0,
            error: Some(error),
            elapsed_ms: started.elapsed().as_millis() as u64,
            scraped_at,
        };

        let response = match request.send().await {
            Ok(r) => r,
            Err(e) => {
                warn!(url = %target.url, error = %e, "scrape failed");
                return (Vec::new(), fail(e.to_string(), started));
            }
        };
        if !response.status().is_success() {
            let status = response.status();
            warn!(url = %target.url, status = %status, "scrape returned non-success status");
            return (Vec::new(), fail(format!("status {status}"), started));
        }
        let body = match response.text().await {
            Ok(b) => b,
            Err(e) => {
                warn!(url = %target.url, error = %e, "scrape body read failed");
                return (Vec::new(), fail(e.to_string(), started));
            }
        };

        let outcome = parse_exposition(&body);
        if outcome.malformed_lines > 0 {
            warn!(
                url = %target.url,
                malformed = outcome.malformed_lines,
                "skipped malformed exposition lines"
            );
        }

        let mut samples = Vec::new();
        let mut seen_tenants = std::collections::BTreeSet::new();
        for raw in outcome.samples {
            if !metric_allowed(&raw.metric_name) {
                continue;
            }
            let Some(tenant) = tenant_of(&raw.labels) else {
                continue;
            };
            let timestamp = raw
                .timestamp_ms
                .and_then(|ms| Utc.timestamp_millis_opt(ms).single())
                .unwrap_or(scraped_at);
            seen_tenants.insert(tenant.to_string());
            samples.push(Sample {
                tenant: tenant.to_string(),
                metric_name: raw.metric_name,
                value: raw.value,
                timestamp,
                labels: raw.labels,
                source: target.source.clone(),
            });
        }

        let report = SourceReport {
            url: target.url.clone(),
            source: target.source.clone(),
            healthy: true,
            sample_count: samples.len(),
            tenant_count: seen_tenants.len(),
            malformed_lines: outcome.malformed_lines,
            error: None,
            elapsed_ms: started.elapsed().as_millis() as u64,
            scraped_at,
        };
        (samples, report)
    }

    /// Fallback tenant list when scraping yields nothing: backing-document
    /// keys first, then the configured fallback tenants. Entries carry no
    /// samples, so downstream synthesis keeps their configured defaults.
    async fn fallback_tenants(&self) -> BTreeMap<String, TenantMetrics> {
        let mut names = self.tenants_from_document().await;
        if names.is_empty() {
            names = self.config.fallback_tenants.clone();
        }

        let now = Utc::now();
        names
            .into_iter()
            .filter(|name| !name.is_empty())
            .map(|name| {
                let mut metrics = TenantMetrics::new(&name);
                metrics.last_update = Some(now);
                (name, metrics)
            })
            .collect()
    }

    async fn tenants_from_document(&self) -> Vec<String> {
        let doc = match self
            .store
            .get(&self.target.namespace, &self.target.configmap_name)
            .await
        {
            Ok(Some(doc)) => doc,
            Ok(None) => return Vec::new(),
            Err(e) => {
                warn!(error = %e, "fallback document read failed");
                return Vec::new();
            }
        };
        let Some(content) = doc.data.get(&self.target.overrides_key) else {
            return Vec::new();
        };
        let parsed: serde_yaml::Value = match serde_yaml::from_str(content) {
            Ok(v) => v,
            Err(e) => {
                warn!(error = %e, "fallback document is not valid YAML");
                return Vec::new();
            }
        };

        // The overrides document nests tenants under `overrides:`; a bare
        // tenant mapping is accepted too.
        let mapping = parsed
            .get("overrides")
            .and_then(serde_yaml::Value::as_mapping)
            .or_else(|| parsed.as_mapping());
        mapping
            .map(|m| {
                m.keys()
                    .filter_map(|k| k.as_str().map(str::to_string))
                    .collect()
            })
            .unwrap_or_default()
    }

    fn store_reports(&self, reports: Vec<SourceReport>) {
        *self.last_reports.write().expect("reports lock") = reports;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use warden_store::{Document, MemoryDocumentStore};
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn collector_for(
        endpoint: Option<String>,
        config: CollectorConfig,
        store: Arc<MemoryDocumentStore>,
    ) -> Collector {
        let config = CollectorConfig { endpoint, ..config };
        Collector::new(
            config,
            TargetConfig::default(),
            Arc::new(FixedDiscovery::default()),
            store,
        )
        .unwrap()
    }

    #[tokio::test]
    async fn scrapes_and_extracts_tenants() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/metrics"))
            .and(header("X-Scope-OrgID", "internal"))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                "cortex_distributor_received_samples_total{user=\"t1\"} 1000\n\
                 cortex_ingester_memory_series{tenant=\"t2\"} 5000\n\
                 go_goroutines{user=\"t1\"} 12\n\
                 cortex_querier_series_fetched 7\n",
            ))
            .mount(&server)
            .await;

        let config = CollectorConfig {
            tenant_scope: Some("internal".to_string()),
            ..Default::default()
        };
        let collector = collector_for(
            Some(format!("{}/metrics", server.uri())),
            config,
            Arc::new(MemoryDocumentStore::new()),
        );

        let tenants = collector.collect_metrics().await.unwrap();
        assert_eq!(tenants.len(), 2);
        assert_eq!(
            tenants["t1"].latest_value("cortex_distributor_received_samples_total"),
            Some(1000.0)
        );
        assert_eq!(
            tenants["t2"].latest_value("cortex_ingester_memory_series"),
            Some(5000.0)
        );
        // go_goroutines is filtered; the bare querier sample has no tenant.
        assert_eq!(tenants["t1"].sample_count(), 1);

        let reports = collector.source_reports();
        assert_eq!(reports.len(), 1);
        assert!(reports[0].healthy);
        assert_eq!(reports[0].tenant_count, 2);
    }

    #[tokio::test]
    async fn per_source_failures_do_not_fail_the_pass() {
        let good = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                "cortex_distributor_received_samples_total{user=\"t1\"} 10\n",
            ))
            .mount(&good)
            .await;
        let bad = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&bad)
            .await;

        let collector = Collector::new(
            CollectorConfig::default(),
            TargetConfig::default(),
            Arc::new(FixedDiscovery::new(vec![
                ScrapeTarget::new(good.uri(), "good"),
                ScrapeTarget::new(bad.uri(), "bad"),
            ])),
            Arc::new(MemoryDocumentStore::new()),
        )
        .unwrap();

        let tenants = collector.collect_metrics().await.unwrap();
        assert_eq!(tenants.len(), 1);
        assert_eq!(collector.source_error_count(), 1);

        let reports = collector.source_reports();
        assert_eq!(reports.len(), 2);
        assert_eq!(reports.iter().filter(|r| r.healthy).count(), 1);
    }

    #[tokio::test]
    async fn no_sources_is_an_error() {
        let collector = collector_for(
            None,
            CollectorConfig::default(),
            Arc::new(MemoryDocumentStore::new()),
        );
        let err = collector.collect_metrics().await.unwrap_err();
        assert!(matches!(err, WardenError::NoSources));
    }

    #[tokio::test]
    async fn empty_scrape_falls_back_to_document_keys() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string("# nothing here\n"))
            .mount(&server)
            .await;

        let store = Arc::new(MemoryDocumentStore::new());
        let mut doc = Document::new("mimir", "mimir-runtime-overrides");
        doc.data.insert(
            "overrides.yaml".to_string(),
            "overrides:\n  t1:\n    ingestion_rate: 5000\n  t2: {}\n".to_string(),
        );
        store.create(doc).await.unwrap();

        let collector = collector_for(Some(server.uri()), CollectorConfig::default(), store);
        let tenants = collector.collect_metrics().await.unwrap();
        assert_eq!(
            tenants.keys().cloned().collect::<Vec<_>>(),
            vec!["t1".to_string(), "t2".to_string()]
        );
        assert!(tenants["t1"].is_empty());
    }

    #[tokio::test]
    async fn empty_scrape_falls_back_to_configured_tenants() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string(""))
            .mount(&server)
            .await;

        let config = CollectorConfig {
            fallback_tenants: vec!["pinned-tenant".to_string()],
            ..Default::default()
        };
        let collector = collector_for(
            Some(server.uri()),
            config,
            Arc::new(MemoryDocumentStore::new()),
        );

        let tenants = collector.collect_metrics().await.unwrap();
        assert!(tenants.contains_key("pinned-tenant"));
    }

    #[tokio::test]
    async fn synthetic_mode_skips_scraping() {
        let config = CollectorConfig {
            synthetic: warden_config::SyntheticConfig {
                enabled: true,
                tenant_count: 2,
            },
            ..Default::default()
        };
        let collector = collector_for(None, config, Arc::new(MemoryDocumentStore::new()));

        let tenants = collector.collect_metrics().await.unwrap();
        assert_eq!(tenants.len(), 2);
        assert!(tenants.contains_key("synthetic-tenant-0"));
    }
}
