// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Metrics for observability.
//!
//! Records through the `metrics` facade; the embedding process decides on an
//! exporter. Covers:
//! - Envelope outcomes and settlements
//! - Bytes copied and copy duration
//! - Store errors by stage
//! - Broker connection attempts
//! - Worker state
//!
//! # Metric Naming Convention
//!
//! All metrics are prefixed with `backup_` and follow Prometheus conventions:
//! - Counters end in `_total`
//! - Gauges represent current state
//! - Histograms track distributions (duration, size)
//!
//! # Usage
//!
//! ```rust,no_run
//! use backup_replicator::metrics;
//! use std::time::Duration;
//!
//! metrics::record_copy(4096, Duration::from_millis(12));
//! metrics::record_envelope("acknowledged", "acked");
//! ```

use metrics::{counter, gauge, histogram};
use std::time::Duration;

/// Record one processed envelope by outcome and what happened to its handle.
pub fn record_envelope(outcome: &str, settlement: &str) {
    counter!(
        "backup_envelopes_total",
        "outcome" => outcome.to_string(),
        "settlement" => settlement.to_string()
    )
    .increment(1);
}

/// Record a request the decoder ignored, by reason.
pub fn record_ignored(reason: &str) {
    counter!("backup_ignored_requests_total", "reason" => reason.to_string()).increment(1);
}

/// Record a payload that could not be decoded at all.
pub fn record_malformed() {
    counter!("backup_malformed_payloads_total").increment(1);
}

/// Record a redelivered envelope.
pub fn record_redelivery() {
    counter!("backup_redeliveries_total").increment(1);
}

/// Record a successful copy.
///
/// Unlabelled: bucket names come from producers and are unbounded.
pub fn record_copy(bytes: usize, duration: Duration) {
    counter!("backup_objects_copied_total").increment(1);
    counter!("backup_bytes_copied_total").increment(bytes as u64);
    histogram!("backup_copy_duration_seconds").record(duration.as_secs_f64());
    histogram!("backup_object_size_bytes").record(bytes as f64);
}

/// Record a failed copy by stage (`download`, `upload`) and error kind.
pub fn record_copy_failure(stage: &str, kind: &str) {
    counter!(
        "backup_copy_failures_total",
        "stage" => stage.to_string(),
        "kind" => kind.to_string()
    )
    .increment(1);
}

/// Record a single store call latency.
pub fn record_store_latency(stage: &str, duration: Duration) {
    histogram!("backup_store_operation_duration_seconds", "stage" => stage.to_string())
        .record(duration.as_secs_f64());
}

/// Record a broker connection attempt.
pub fn record_broker_connection(success: bool) {
    let status = if success { "success" } else { "failure" };
    counter!("backup_broker_connections_total", "status" => status).increment(1);
}

/// Record a failed settlement call (ack or reject).
pub fn record_settlement_error(operation: &str) {
    counter!("backup_settlement_errors_total", "operation" => operation.to_string()).increment(1);
}

/// Gauge for worker state.
pub fn set_worker_state(state: &str) {
    // Numeric encoding for alerting
    let value = match state {
        "Created" => 0.0,
        "Connecting" => 1.0,
        "Running" => 2.0,
        "ShuttingDown" => 3.0,
        "Stopped" => 4.0,
        "Failed" => 5.0,
        _ => -1.0,
    };
    gauge!("backup_worker_state").set(value);
}

/// Gauge for envelopes currently being processed (0 or 1).
pub fn set_in_flight(count: usize) {
    gauge!("backup_envelopes_in_flight").set(count as f64);
}
