//! Metrics-endpoint discovery.
//!
//! Two mechanisms feed the scrape set, union-merged: an explicit endpoint
//! URL and automatic service discovery. Discovery itself is an interface
//! contract — the orchestrator-backed enumerator lives out of tree — and the
//! in-tree implementation derives targets statically from configuration.

use async_trait::async_trait;
use warden_config::DiscoveryConfig;
use warden_types::WardenResult;

/// One scrapeable endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScrapeTarget {
    pub url: String,
    /// Short label used in sample `source` fields and reports.
    pub source: String,
}

impl ScrapeTarget {
    pub fn new(url: impl Into<String>, source: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            source: source.into(),
        }
    }
}

/// Enumerates services in a namespace matching a label selector and known
/// service names, yielding `scheme://host:port/path` targets.
#[async_trait]
pub trait ServiceDiscovery: Send + Sync {
    async fn discover(&self) -> WardenResult<Vec<ScrapeTarget>>;
}

/// Configuration-driven discovery: every known service name becomes a
/// cluster-internal service URL. The label selector is carried for the
/// orchestrator-backed implementation; here it only narrates intent.
#[derive(Debug, Clone)]
pub struct StaticDiscovery {
    config: DiscoveryConfig,
}

impl StaticDiscovery {
    pub fn new(config: DiscoveryConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl ServiceDiscovery for StaticDiscovery {
    async fn discover(&self) -> WardenResult<Vec<ScrapeTarget>> {
        if !self.config.enabled {
            return Ok(Vec::new());
        }
        let targets = self
            .config
            .service_names
            .iter()
            .map(|service| {
                let path = self.config.path.trim_start_matches('/');
                ScrapeTarget::new(
                    format!(
                        "{}://{}.{}.svc:{}/{}",
                        self.config.scheme, service, self.config.namespace, self.config.port, path
                    ),
                    service.clone(),
                )
            })
            .collect();
        Ok(targets)
    }
}

/// A fixed target list, for tests and single-endpoint setups.
#[derive(Debug, Clone, Default)]
pub struct FixedDiscovery {
    targets: Vec<ScrapeTarget>,
}

impl FixedDiscovery {
    pub fn new(targets: Vec<ScrapeTarget>) -> Self {
        Self { targets }
    }
}

#[async_trait]
impl ServiceDiscovery for FixedDiscovery {
    async fn discover(&self) -> WardenResult<Vec<ScrapeTarget>> {
        Ok(self.targets.clone())
    }
}
