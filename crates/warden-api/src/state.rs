use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::{Arc, RwLock};
use tokio::sync::mpsc;
use warden_analyzer::Analyzer;
use warden_audit::AuditLogger;
use warden_collector::Collector;
use warden_cost::CostController;
use warden_patcher::Patcher;
use warden_protection::BlastProtector;

/// Rolling controller status, written by the reconciler after every tick
/// and read by the status/health endpoints.
#[derive(Debug, Clone, Serialize)]
pub struct StatusSnapshot {
    pub mode: String,
    pub started_at: DateTime<Utc>,
    pub last_reconcile: Option<DateTime<Utc>>,
    pub last_success: Option<DateTime<Utc>>,
    pub reconcile_count: u64,
    pub error_count: u64,
    pub tenants_processed: usize,
    pub tenants_filtered: usize,
    pub is_leader: bool,
    pub last_error: Option<String>,
}

impl StatusSnapshot {
    pub fn new(mode: String) -> Self {
        Self {
            mode,
            started_at: Utc::now(),
            last_reconcile: None,
            last_success: None,
            reconcile_count: 0,
            error_count: 0,
            tenants_processed: 0,
            tenants_filtered: 0,
            is_leader: true,
            last_error: None,
        }
    }
}

pub type SharedStatus = Arc<RwLock<StatusSnapshot>>;

/// Everything the handlers need. Cloned per request; all fields are shared
/// handles.
#[derive(Clone)]
pub struct AppState {
    pub status: SharedStatus,
    pub analyzer: Arc<Analyzer>,
    pub cost: Arc<CostController>,
    pub protector: Arc<BlastProtector>,
    pub audit: Arc<dyn AuditLogger>,
    pub patcher: Arc<Patcher>,
    pub collector: Arc<Collector>,
    pub registry: prometheus::Registry,
    /// Nudges the reconciler to run a tick outside its schedule.
    pub reconcile_tx: mpsc::Sender<()>,
}
