use std::net::SocketAddr;
use std::time::Instant;

use metrics_exporter_prometheus::BuildError;

use crate::catalog::CatalogError;

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: total operations handled. Labels: operation, status.
pub const OPERATIONS_TOTAL: &str = "spotbook_operations_total";

/// Histogram: operation latency in seconds. Labels: operation.
pub const OPERATION_DURATION_SECONDS: &str = "spotbook_operation_duration_seconds";

// ── Domain counters ─────────────────────────────────────────────

/// Counter: tickets issued.
pub const TICKETS_ISSUED_TOTAL: &str = "spotbook_tickets_issued_total";

/// Counter: reservations that found no available slot.
pub const SOLD_OUT_TOTAL: &str = "spotbook_sold_out_total";

/// Counter: ticket presentments recorded.
pub const PRESENTMENTS_TOTAL: &str = "spotbook_presentments_total";

// ── USE metrics (resource utilization) ──────────────────────────

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "spotbook_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (commits per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "spotbook_wal_flush_batch_size";

/// Counter: WAL compactions completed.
pub const WAL_COMPACTIONS_TOTAL: &str = "spotbook_wal_compactions_total";

/// Install Prometheus metrics exporter on the given port. No-op if port is None.
pub fn init(port: Option<u16>) -> Result<(), BuildError> {
    let Some(port) = port else { return Ok(()) };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;
    tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics");
    Ok(())
}

/// Short status label for an operation outcome.
pub fn status_label<T>(result: &Result<T, CatalogError>) -> &'static str {
    match result {
        Ok(_) => "ok",
        Err(e) => e.kind(),
    }
}

/// Record count and latency of one finished operation.
pub fn record_operation<T>(operation: &'static str, started: Instant, result: &Result<T, CatalogError>) {
    metrics::counter!(OPERATIONS_TOTAL, "operation" => operation, "status" => status_label(result))
        .increment(1);
    metrics::histogram!(OPERATION_DURATION_SECONDS, "operation" => operation)
        .record(started.elapsed().as_secs_f64());
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_labels() {
        assert_eq!(status_label::<()>(&Ok(())), "ok");
        assert_eq!(status_label::<()>(&Err(CatalogError::NotFound("x".into()))), "not_found");
        assert_eq!(status_label::<()>(&Err(CatalogError::Invalid("bad"))), "invalid");
    }

    #[test]
    fn init_without_port_is_noop() {
        assert!(init(None).is_ok());
    }
}
