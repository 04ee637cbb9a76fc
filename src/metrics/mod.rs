//! Metrics module
//!
//! Prometheus counters and histograms for uploader activity.

#[cfg(feature = "metrics")]
pub mod server;

use lazy_static::lazy_static;
use prometheus::{
    register_counter, register_counter_vec, register_histogram_vec, register_int_gauge_vec,
    Counter, CounterVec, HistogramVec, IntGaugeVec,
};

lazy_static! {
    // Per-file outcomes
    pub static ref FILES_TOTAL: CounterVec = register_counter_vec!(
        "connector_gcs_files_total",
        "Files handled by uploaders, by outcome",
        &["uploader", "outcome"]
    ).unwrap();

    pub static ref UPLOAD_BYTES_TOTAL: Counter = register_counter!(
        "connector_gcs_upload_bytes_total",
        "Total bytes uploaded"
    ).unwrap();

    pub static ref UPLOAD_DURATION: HistogramVec = register_histogram_vec!(
        "connector_gcs_upload_duration_seconds",
        "Upload duration in seconds",
        &["bucket"],
        vec![0.01, 0.05, 0.1, 0.5, 1.0, 5.0, 10.0, 30.0, 60.0]
    ).unwrap();

    // Manifest publishing
    pub static ref MANIFEST_PUBLISHES: CounterVec = register_counter_vec!(
        "connector_gcs_manifest_publishes_total",
        "Manifest publish attempts",
        &["uploader", "status"]
    ).unwrap();

    // Files waiting in an uploader's pending list
    pub static ref PENDING_FILES: IntGaugeVec = register_int_gauge_vec!(
        "connector_gcs_pending_files",
        "Files known to an uploader but not yet uploaded",
        &["uploader"]
    ).unwrap();

    // Error metrics
    pub static ref ERRORS_TOTAL: CounterVec = register_counter_vec!(
        "connector_gcs_errors_total",
        "Total errors",
        &["type"]
    ).unwrap();
}

/// Record the outcome of handling one file
pub fn record_file_outcome(uploader: &str, outcome: &str) {
    FILES_TOTAL.with_label_values(&[uploader, outcome]).inc();
}

/// Record bytes written by a successful upload
pub fn record_upload_bytes(bytes: u64) {
    UPLOAD_BYTES_TOTAL.inc_by(bytes as f64);
}

/// Record upload duration
pub fn record_upload_duration(bucket: &str, duration_secs: f64) {
    UPLOAD_DURATION
        .with_label_values(&[bucket])
        .observe(duration_secs);
}

/// Record a manifest publish attempt
pub fn record_manifest_publish(uploader: &str, success: bool) {
    let status = if success { "success" } else { "failure" };
    MANIFEST_PUBLISHES
        .with_label_values(&[uploader, status])
        .inc();
}

/// Set the pending-list size of an uploader
pub fn set_pending_files(uploader: &str, count: usize) {
    PENDING_FILES
        .with_label_values(&[uploader])
        .set(count as i64);
}

/// Record an error
pub fn record_error(error_type: &str) {
    ERRORS_TOTAL.with_label_values(&[error_type]).inc();
}
