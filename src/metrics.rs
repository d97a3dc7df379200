/// Prometheus instrumentation for the ingestion pipeline: counters and
/// gauges for pipeline throughput, queue depth, and sync lag, plus
/// histograms for fetch/commit latency.
use lazy_static::lazy_static;
use prometheus::{
    Encoder, Histogram, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGauge,
    IntGaugeVec, Opts, Registry, TextEncoder,
};

const LATENCY_BUCKETS: &[f64] = &[0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0, 10.0, 30.0, 60.0];

lazy_static! {
    pub static ref REGISTRY: Registry = Registry::new();

    /// Blocks committed, by path (sequential, mini_batch, solo_fallback).
    pub static ref BLOCKS_PROCESSED: IntCounterVec = IntCounterVec::new(
        Opts::new("ergindex_blocks_processed_total", "Total blocks committed by path"),
        &["path"]
    ).unwrap();

    pub static ref TRANSACTIONS_PROCESSED: IntCounter = IntCounter::new(
        "ergindex_transactions_processed_total",
        "Total transactions persisted"
    ).unwrap();

    pub static ref OUTPUTS_CREATED: IntCounter = IntCounter::new(
        "ergindex_outputs_created_total",
        "Total outputs (boxes) created"
    ).unwrap();

    pub static ref OUTPUTS_SPENT: IntCounter = IntCounter::new(
        "ergindex_outputs_spent_total",
        "Total outputs marked spent"
    ).unwrap();

    pub static ref BULK_INSERT_FALLBACKS: IntCounterVec = IntCounterVec::new(
        Opts::new("ergindex_bulk_insert_fallbacks_total", "Constraint-violation fallbacks by entity"),
        &["entity"]
    ).unwrap();

    pub static ref REORGS_HANDLED: IntCounter = IntCounter::new(
        "ergindex_reorgs_handled_total",
        "Total reorganizations detected and resolved"
    ).unwrap();

    pub static ref CURRENT_HEIGHT: IntGauge = IntGauge::new(
        "ergindex_current_height",
        "SyncStatus.current_height, the durable cursor"
    ).unwrap();

    pub static ref TARGET_HEIGHT: IntGauge = IntGauge::new(
        "ergindex_target_height",
        "Node's reported chain tip height"
    ).unwrap();

    pub static ref QUEUE_DEPTH: IntGauge = IntGauge::new(
        "ergindex_queue_depth",
        "Current depth of the fetcher-to-processor queue"
    ).unwrap();

    pub static ref CONSECUTIVE_BATCH_FAILURES: IntGauge = IntGauge::new(
        "ergindex_consecutive_batch_failures",
        "Consecutive mini-batch failures in the current window"
    ).unwrap();

    pub static ref NODE_REQUEST_DURATION: HistogramVec = HistogramVec::new(
        HistogramOpts::new("ergindex_node_request_duration_seconds", "Node HTTP request latency")
            .buckets(LATENCY_BUCKETS.to_vec()),
        &["endpoint"]
    ).unwrap();

    pub static ref DB_COMMIT_DURATION: HistogramVec = HistogramVec::new(
        HistogramOpts::new("ergindex_db_commit_duration_seconds", "Commit latency by path")
            .buckets(LATENCY_BUCKETS.to_vec()),
        &["path"]
    ).unwrap();

    pub static ref BLOCK_TRANSFORM_DURATION: Histogram = Histogram::with_opts(
        HistogramOpts::new("ergindex_block_transform_duration_seconds", "Pure transform() latency")
            .buckets(LATENCY_BUCKETS.to_vec())
    ).unwrap();
}

pub fn register_all() {
    let collectors: Vec<Box<dyn prometheus::core::Collector>> = vec![
        Box::new(BLOCKS_PROCESSED.clone()),
        Box::new(TRANSACTIONS_PROCESSED.clone()),
        Box::new(OUTPUTS_CREATED.clone()),
        Box::new(OUTPUTS_SPENT.clone()),
        Box::new(BULK_INSERT_FALLBACKS.clone()),
        Box::new(REORGS_HANDLED.clone()),
        Box::new(CURRENT_HEIGHT.clone()),
        Box::new(TARGET_HEIGHT.clone()),
        Box::new(QUEUE_DEPTH.clone()),
        Box::new(CONSECUTIVE_BATCH_FAILURES.clone()),
        Box::new(NODE_REQUEST_DURATION.clone()),
        Box::new(DB_COMMIT_DURATION.clone()),
        Box::new(BLOCK_TRANSFORM_DURATION.clone()),
    ];
    for collector in collectors {
        // Re-registration on repeated calls (e.g. in tests) is harmless to ignore.
        let _ = REGISTRY.register(collector);
    }
}

/// Renders the registry in Prometheus text exposition format, served by
/// the API's `/metrics` endpoint.
pub fn gather_text() -> Result<String, Box<dyn std::error::Error>> {
    let metric_families = REGISTRY.gather();
    let encoder = TextEncoder::new();
    let mut buf = Vec::new();
    encoder.encode(&metric_families, &mut buf)?;
    Ok(String::from_utf8(buf)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_all_is_idempotent() {
        register_all();
        register_all();
        let text = gather_text().unwrap();
        assert!(text.contains("ergindex_current_height"));
    }
}
