use std::net::SocketAddr;
use std::time::Instant;

use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};

use crate::engine::EngineError;

// ── RED metrics (operation-driven) ──────────────────────────────

/// Counter: engine operations. Labels: operation, status.
pub const OPERATIONS_TOTAL: &str = "esp_operations_total";

/// Histogram: engine operation latency in seconds. Labels: operation.
pub const OPERATION_DURATION_SECONDS: &str = "esp_operation_duration_seconds";

/// Counter: reservations created.
pub const RESERVATIONS_CREATED_TOTAL: &str = "esp_reservations_created_total";

/// Counter: status changes. Labels: status.
pub const RESERVATION_DECISIONS_TOTAL: &str = "esp_reservation_decisions_total";

/// Counter: requests refused because the slot was taken.
pub const RESERVATION_CONFLICTS_TOTAL: &str = "esp_reservation_conflicts_total";

// ── USE metrics (resource utilization) ──────────────────────────

/// Gauge: locations loaded in memory.
pub const LOCATIONS_ACTIVE: &str = "esp_locations_active";

/// Counter: e-mails handed to the mailer successfully.
pub const NOTIFICATIONS_SENT_TOTAL: &str = "esp_notifications_sent_total";

/// Counter: e-mails the mailer failed to deliver.
pub const NOTIFICATIONS_FAILED_TOTAL: &str = "esp_notifications_failed_total";

/// Counter: e-mails dropped because the outbox was full or closed.
pub const NOTIFICATIONS_DROPPED_TOTAL: &str = "esp_notifications_dropped_total";

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "esp_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (events per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "esp_wal_flush_batch_size";

/// Counter: completed WAL compactions.
pub const WAL_COMPACTIONS_TOTAL: &str = "esp_wal_compactions_total";

/// Install the Prometheus exporter on the given port. No-op if port is None.
pub fn init(port: Option<u16>) -> Result<(), BuildError> {
    let Some(port) = port else { return Ok(()) };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    PrometheusBuilder::new().with_http_listener(addr).install()?;
    tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics");
    Ok(())
}

/// Status label for an operation result.
pub fn status_label<T>(result: &Result<T, EngineError>) -> &'static str {
    match result {
        Ok(_) => "ok",
        Err(e) => e.kind(),
    }
}

/// Record count and latency of one engine operation.
pub fn record_operation<T>(operation: &'static str, started: Instant, result: &Result<T, EngineError>) {
    metrics::counter!(OPERATIONS_TOTAL, "operation" => operation, "status" => status_label(result))
        .increment(1);
    metrics::histogram!(OPERATION_DURATION_SECONDS, "operation" => operation)
        .record(started.elapsed().as_secs_f64());
}
