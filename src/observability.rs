use std::net::SocketAddr;

use crate::sql::Command;

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: total queries executed. Labels: command, status.
pub const QUERIES_TOTAL: &str = "slotguard_queries_total";

/// Histogram: query latency in seconds. Labels: command.
pub const QUERY_DURATION_SECONDS: &str = "slotguard_query_duration_seconds";

// ── USE metrics (resource utilization) ──────────────────────────

/// Gauge: active TCP connections.
pub const CONNECTIONS_ACTIVE: &str = "slotguard_connections_active";

/// Counter: total connections accepted.
pub const CONNECTIONS_TOTAL: &str = "slotguard_connections_total";

/// Counter: connections rejected due to limit.
pub const CONNECTIONS_REJECTED_TOTAL: &str = "slotguard_connections_rejected_total";

/// Counter: connections that ended with a protocol or startup error.
pub const CONNECTION_ERRORS_TOTAL: &str = "slotguard_connection_errors_total";

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "slotguard_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (commits per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "slotguard_wal_flush_batch_size";

// ── Concurrency control ─────────────────────────────────────────

/// Counter: row lock waits that hit the transaction deadline.
pub const LOCK_TIMEOUTS_TOTAL: &str = "slotguard_lock_timeouts_total";

/// Counter: commits rejected by read-set validation.
pub const SERIALIZATION_CONFLICTS_TOTAL: &str = "slotguard_serialization_conflicts_total";

/// Counter: transactions re-run after a retriable failure. Labels: op.
pub const RETRIES_TOTAL: &str = "slotguard_retries_total";

// ── Domain outcomes ─────────────────────────────────────────────

/// Counter: hold acquisitions. Labels: outcome.
pub const HOLDS_TOTAL: &str = "slotguard_holds_total";

/// Counter: booking attempts. Labels: outcome.
pub const BOOKINGS_TOTAL: &str = "slotguard_bookings_total";

/// Counter: cancellation requests. Labels: outcome.
pub const CANCELLATIONS_TOTAL: &str = "slotguard_cancellations_total";

/// Counter: stock reservations refused for lack of quantity.
pub const INVENTORY_REJECTIONS_TOTAL: &str = "slotguard_inventory_rejections_total";

/// Install Prometheus metrics exporter on the given port. No-op if port is None.
pub fn init(port: Option<u16>) {
    let Some(port) = port else { return };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    match metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
    {
        Ok(()) => tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics"),
        Err(e) => tracing::warn!("metrics exporter not installed: {e}"),
    }
}

/// Map a Command variant to a short label for metrics.
pub fn command_label(cmd: &Command) -> &'static str {
    match cmd {
        Command::UpsertResource { .. } => "upsert_resource",
        Command::UpsertService { .. } => "upsert_service",
        Command::SetPriceBands { .. } => "set_price_bands",
        Command::StockInventory { .. } => "stock_inventory",
        Command::InsertHold { .. } => "insert_hold",
        Command::DeleteHold { .. } => "delete_hold",
        Command::InsertBooking { .. } => "insert_booking",
        Command::CancelBooking { .. } => "cancel_booking",
        Command::ConfirmBooking { .. } => "confirm_booking",
        Command::RecordPayment { .. } => "record_payment",
        Command::RequestRefund { .. } => "request_refund",
        Command::InsertLineItem { .. } => "insert_line_item",
        Command::DeleteLineItem { .. } => "delete_line_item",
        Command::SelectAvailability { .. } => "select_availability",
        Command::SelectHold { .. } => "select_hold",
        Command::SelectBooking { .. } => "select_booking",
        Command::SelectSchedule { .. } => "select_schedule",
        Command::SelectInventory { .. } => "select_inventory",
    }
}
