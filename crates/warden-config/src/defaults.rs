//! Built-in limit definitions and metric mappings.
//!
//! The definition set mirrors the per-tenant override surface of a
//! Cortex-lineage time-series database. Definitions with a `metric_source`
//! are synthesized from observations every pass; the rest are carried at
//! their defaults so operators can manage them from one place.

use std::collections::BTreeMap;
use warden_types::{LimitDefinition, LimitType, LimitValue};

fn driven(
    name: &str,
    limit_type: LimitType,
    source: &str,
    default: f64,
    min: f64,
    max: f64,
    buffer_pct: f64,
) -> LimitDefinition {
    LimitDefinition {
        name: name.to_string(),
        limit_type,
        metric_source: Some(source.to_string()),
        default: Some(LimitValue::from_f64(limit_type, default)),
        min: Some(min),
        max: Some(max),
        buffer_pct,
        enabled: true,
    }
}

fn fixed(name: &str, limit_type: LimitType, default: LimitValue) -> LimitDefinition {
    LimitDefinition {
        name: name.to_string(),
        limit_type,
        metric_source: None,
        default: Some(default),
        min: None,
        max: None,
        buffer_pct: 0.0,
        enabled: true,
    }
}

/// The default limit catalog.
pub fn default_limit_definitions() -> Vec<LimitDefinition> {
    vec![
        // Observation-driven limits.
        driven(
            "ingestion_rate",
            LimitType::Rate,
            "cortex_distributor_received_samples_total",
            10_000.0,
            1_000.0,
            10_000_000.0,
            20.0,
        ),
        driven(
            "ingestion_burst_size",
            LimitType::Count,
            "cortex_distributor_received_samples_total",
            200_000.0,
            10_000.0,
            100_000_000.0,
            100.0,
        ),
        driven(
            "max_global_series_per_user",
            LimitType::Count,
            "cortex_ingester_memory_series",
            150_000.0,
            10_000.0,
            50_000_000.0,
            25.0,
        ),
        driven(
            "max_global_exemplars_per_user",
            LimitType::Count,
            "cortex_ingester_ingested_exemplars_total",
            100_000.0,
            0.0,
            10_000_000.0,
            20.0,
        ),
        driven(
            "max_fetched_series_per_query",
            LimitType::Count,
            "cortex_querier_series_fetched",
            100_000.0,
            1_000.0,
            10_000_000.0,
            30.0,
        ),
        driven(
            "max_fetched_chunk_bytes_per_query",
            LimitType::Size,
            "cortex_querier_chunk_bytes_fetched",
            500_000_000.0,
            1_000_000.0,
            50_000_000_000.0,
            30.0,
        ),
        driven(
            "max_samples_per_query",
            LimitType::Count,
            "cortex_query_frontend_samples_processed_total",
            1_000_000.0,
            10_000.0,
            100_000_000.0,
            30.0,
        ),
        driven(
            "max_global_metadata_per_user",
            LimitType::Count,
            "cortex_ingester_memory_metadata",
            8_000.0,
            0.0,
            1_000_000.0,
            20.0,
        ),
        // Fixed count limits.
        fixed(
            "max_label_names_per_series",
            LimitType::Count,
            LimitValue::Count(30),
        ),
        fixed(
            "max_label_name_length",
            LimitType::Count,
            LimitValue::Count(1_024),
        ),
        fixed(
            "max_label_value_length",
            LimitType::Count,
            LimitValue::Count(2_048),
        ),
        fixed(
            "max_metadata_length",
            LimitType::Count,
            LimitValue::Count(1_024),
        ),
        fixed(
            "max_global_series_per_metric",
            LimitType::Count,
            LimitValue::Count(20_000),
        ),
        fixed(
            "max_global_metadata_per_metric",
            LimitType::Count,
            LimitValue::Count(10),
        ),
        fixed(
            "max_fetched_chunks_per_query",
            LimitType::Count,
            LimitValue::Count(2_000_000),
        ),
        fixed(
            "max_query_parallelism",
            LimitType::Count,
            LimitValue::Count(14),
        ),
        fixed(
            "max_queriers_per_tenant",
            LimitType::Count,
            LimitValue::Count(0),
        ),
        fixed(
            "max_outstanding_requests_per_tenant",
            LimitType::Count,
            LimitValue::Count(100),
        ),
        fixed(
            "ruler_max_rules_per_rule_group",
            LimitType::Count,
            LimitValue::Count(20),
        ),
        fixed(
            "ruler_max_rule_groups_per_tenant",
            LimitType::Count,
            LimitValue::Count(70),
        ),
        fixed(
            "alertmanager_max_dispatcher_aggregation_groups",
            LimitType::Count,
            LimitValue::Count(0),
        ),
        fixed(
            "alertmanager_max_alerts_count",
            LimitType::Count,
            LimitValue::Count(0),
        ),
        fixed(
            "ingestion_tenant_shard_size",
            LimitType::Count,
            LimitValue::Count(0),
        ),
        fixed(
            "store_gateway_tenant_shard_size",
            LimitType::Count,
            LimitValue::Count(0),
        ),
        // Rates and percentages.
        fixed(
            "alertmanager_notification_rate_limit",
            LimitType::Rate,
            LimitValue::Rate(0.0),
        ),
        fixed(
            "request_rate",
            LimitType::Rate,
            LimitValue::Rate(0.0),
        ),
        fixed(
            "query_sharding_max_sharded_queries",
            LimitType::Count,
            LimitValue::Count(128),
        ),
        // Sizes.
        fixed(
            "alertmanager_max_alerts_size_bytes",
            LimitType::Size,
            LimitValue::Size(0),
        ),
        fixed(
            "max_alerts_payload_size_bytes",
            LimitType::Size,
            LimitValue::Size(0),
        ),
        // Durations are opaque: never buffered, never clamped.
        fixed(
            "creation_grace_period",
            LimitType::Duration,
            LimitValue::Duration("10m".to_string()),
        ),
        fixed(
            "max_cache_freshness",
            LimitType::Duration,
            LimitValue::Duration("1m".to_string()),
        ),
        fixed(
            "max_query_lookback",
            LimitType::Duration,
            LimitValue::Duration("0s".to_string()),
        ),
        fixed(
            "max_partial_query_length",
            LimitType::Duration,
            LimitValue::Duration("0s".to_string()),
        ),
        fixed(
            "query_ingesters_within",
            LimitType::Duration,
            LimitValue::Duration("13h".to_string()),
        ),
        fixed(
            "compactor_blocks_retention_period",
            LimitType::Duration,
            LimitValue::Duration("0s".to_string()),
        ),
        fixed(
            "out_of_order_time_window",
            LimitType::Duration,
            LimitValue::Duration("0s".to_string()),
        ),
    ]
}

/// Extra metric-to-limit mappings beyond each definition's own source.
///
/// Several metric families can legitimately describe the same limit; when
/// they disagree the analyzer takes the larger recommendation.
pub fn default_metric_mappings() -> BTreeMap<String, String> {
    let mut mappings = BTreeMap::new();
    mappings.insert(
        "cortex_distributor_samples_in_total".to_string(),
        "ingestion_rate".to_string(),
    );
    mappings.insert(
        "cortex_ingester_active_series".to_string(),
        "max_global_series_per_user".to_string(),
    );
    mappings
}
