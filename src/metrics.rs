//! Metrics Module - Prometheus Instrumentation
//!
//! Process-wide registry for the repair passes. Everything here mirrors a
//! field of the run report; the report stays the source of truth and the
//! registry exists so long runs can be scraped or dumped to a file.

use lazy_static::lazy_static;
use prometheus::{
    Encoder, Histogram, HistogramOpts, IntCounter, IntCounterVec, IntGauge, Opts, Registry,
    TextEncoder,
};
use std::time::Instant;

/// Standard latency buckets for histograms (seconds)
const LATENCY_BUCKETS: &[f64] = &[0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0, 10.0, 30.0, 60.0];

lazy_static! {
    /// Global Prometheus registry
    pub static ref REGISTRY: Registry = Registry::new();

    /// Source records classified by the stripper
    /// Labels: outcome (migrated, malformed, ambiguous, unresolved, out_of_scope)
    pub static ref RECORDS_CLASSIFIED: IntCounterVec = IntCounterVec::new(
        Opts::new("chainrepair_records_total", "Source records by stripper outcome"),
        &["outcome"]
    ).unwrap();

    /// Hash index entries loaded
    pub static ref HASH_INDEX_ENTRIES: IntGauge = IntGauge::new(
        "chainrepair_hash_index_entries",
        "Entries in the hash->height index"
    ).unwrap();

    /// Canonical keys written by the walker or the stripper
    pub static ref CANONICAL_KEYS_WRITTEN: IntCounter = IntCounter::new(
        "chainrepair_canonical_keys_written_total",
        "Canonical height->hash records written"
    ).unwrap();

    /// Headers visited by the canonical walker
    pub static ref WALK_STEPS: IntCounter = IntCounter::new(
        "chainrepair_walk_steps_total",
        "Header lookups performed by the canonical walker"
    ).unwrap();

    /// Highest canonical height found by the tip finder
    pub static ref MAX_HEIGHT: IntGauge = IntGauge::new(
        "chainrepair_max_height",
        "Highest canonical height in the destination"
    ).unwrap();

    /// Batch commit duration
    pub static ref COMMIT_DURATION: Histogram = Histogram::with_opts(
        HistogramOpts::new("chainrepair_commit_duration_seconds", "Durable batch commit latency")
            .buckets(LATENCY_BUCKETS.to_vec())
    ).unwrap();

    /// Operations committed
    pub static ref COMMITTED_OPS: IntCounter = IntCounter::new(
        "chainrepair_committed_ops_total",
        "Put/delete operations durably committed"
    ).unwrap();
}

/// Register all metrics with the registry. Safe to call more than once.
pub fn register_metrics() {
    // AlreadyReg errors on repeat calls are expected
    let _ = REGISTRY.register(Box::new(RECORDS_CLASSIFIED.clone()));
    let _ = REGISTRY.register(Box::new(HASH_INDEX_ENTRIES.clone()));
    let _ = REGISTRY.register(Box::new(CANONICAL_KEYS_WRITTEN.clone()));
    let _ = REGISTRY.register(Box::new(WALK_STEPS.clone()));
    let _ = REGISTRY.register(Box::new(MAX_HEIGHT.clone()));
    let _ = REGISTRY.register(Box::new(COMMIT_DURATION.clone()));
    let _ = REGISTRY.register(Box::new(COMMITTED_OPS.clone()));
}

/// Render the registry in Prometheus text exposition format
pub fn gather_text() -> String {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    if encoder.encode(&metric_families, &mut buffer).is_err() {
        return String::new();
    }
    String::from_utf8(buffer).unwrap_or_default()
}

pub fn record_outcome(outcome: &str) {
    RECORDS_CLASSIFIED.with_label_values(&[outcome]).inc();
}

/// Wall-clock timer for histogram observations
pub struct Timer {
    start: Instant,
}

impl Timer {
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    pub fn elapsed_secs(&self) -> f64 {
        self.start.elapsed().as_secs_f64()
    }
}

impl Default for Timer {
    fn default() -> Self {
        Self::new()
    }
}
