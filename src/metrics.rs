//! Observability metrics for the harvester
//!
//! Counters and histograms are emitted through the `metrics` facade. Without
//! an installed recorder they are no-ops, so library code records
//! unconditionally. The binary installs a Prometheus exporter when
//! `--metrics-addr` is given.

use metrics::{counter, describe_counter, describe_histogram, histogram, Unit};
use metrics_exporter_prometheus::PrometheusBuilder;
use once_cell::sync::Lazy;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, info};

/// Global metrics registry initialization flag
static METRICS_INITIALIZED: Lazy<Arc<RwLock<bool>>> = Lazy::new(|| Arc::new(RwLock::new(false)));

/// Initialize metrics system with Prometheus exporter
///
/// Idempotent: a second call is a no-op.
///
/// # Arguments
/// * `addr` - Socket address to bind the scrape endpoint (e.g. "0.0.0.0:9090")
pub async fn init_metrics(addr: SocketAddr) -> Result<(), Box<dyn std::error::Error>> {
    let mut initialized = METRICS_INITIALIZED.write().await;
    if *initialized {
        debug!("Metrics already initialized, skipping");
        return Ok(());
    }

    info!("Initializing metrics system on {}", addr);

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .map_err(|e| format!("Failed to install Prometheus exporter: {e}"))?;

    describe_counter!(
        "api_calls_total",
        Unit::Count,
        "Statistics API calls by outcome"
    );

    describe_counter!(
        "api_retries_total",
        Unit::Count,
        "Retries of the same credential by failure class"
    );

    describe_histogram!(
        "api_retry_wait_seconds",
        Unit::Seconds,
        "Sleep before a retry"
    );

    describe_counter!(
        "credential_rotations_total",
        Unit::Count,
        "Credentials abandoned after an authorization failure"
    );

    describe_counter!(
        "batches_enqueued_total",
        Unit::Count,
        "Work batches sent by the producer"
    );

    describe_histogram!("batch_size", Unit::Count, "Channel ids per work batch");

    describe_counter!(
        "batches_processed_total",
        Unit::Count,
        "Work batches fully processed and acknowledged"
    );

    describe_counter!(
        "channels_processed_total",
        Unit::Count,
        "Channel ids looked up by workers"
    );

    describe_counter!(
        "records_flushed_total",
        Unit::Count,
        "Statistics records uploaded"
    );

    describe_histogram!(
        "flush_size_bytes",
        Unit::Bytes,
        "Compressed size of uploaded objects"
    );

    *initialized = true;
    info!("Metrics system initialized successfully on {}", addr);
    Ok(())
}

/// Record the outcome of one API attempt (`success` or a failure class label)
pub fn record_api_call(outcome: &str) {
    counter!("api_calls_total", "outcome" => outcome.to_string()).increment(1);
}

/// Record a same-credential retry and its wait
pub fn record_retry(class: &str, wait: Duration) {
    counter!("api_retries_total", "class" => class.to_string()).increment(1);
    histogram!("api_retry_wait_seconds", "class" => class.to_string()).record(wait.as_secs_f64());

    debug!(
        class = class,
        wait_ms = wait.as_millis(),
        "Retry backoff recorded"
    );
}

/// Record a credential rotation
pub fn record_rotation() {
    counter!("credential_rotations_total").increment(1);
}

/// Record a batch sent to the work queue
pub fn record_batch_enqueued(size: usize) {
    counter!("batches_enqueued_total").increment(1);
    histogram!("batch_size").record(size as f64);
}

/// Record a batch fully processed by a worker
pub fn record_batch_processed(channels: usize) {
    counter!("batches_processed_total").increment(1);
    counter!("channels_processed_total").increment(channels as u64);
}

/// Record an uploaded object
pub fn record_flush(records: usize, compressed_bytes: usize) {
    counter!("records_flushed_total").increment(records as u64);
    histogram!("flush_size_bytes").record(compressed_bytes as f64);
}

/// Check if metrics system is initialized
pub async fn is_initialized() -> bool {
    *METRICS_INITIALIZED.read().await
}
