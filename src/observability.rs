use std::net::SocketAddr;

use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};

// ── Request-driven ───────────────────────────────────────────────

/// Counter: requests handled. Labels: op, status.
pub const REQUESTS_TOTAL: &str = "slotkeep_requests_total";

/// Histogram: request latency in seconds. Labels: op.
pub const REQUEST_DURATION_SECONDS: &str = "slotkeep_request_duration_seconds";

/// Counter: lock acquisitions. Labels: outcome
/// (granted, renewed, taken_over, held, conflict, not_found, unauthenticated, error).
pub const LOCK_ACQUIRE_TOTAL: &str = "slotkeep_lock_acquire_total";

/// Histogram: acquire transaction latency in seconds, retries included.
pub const LOCK_ACQUIRE_DURATION_SECONDS: &str = "slotkeep_lock_acquire_duration_seconds";

/// Counter: lock transactions re-run after losing a compare-and-set race.
pub const LOCK_TXN_RETRIES_TOTAL: &str = "slotkeep_lock_txn_retries_total";

/// Counter: lock releases. Labels: outcome (released, not_held, failed).
pub const LOCK_RELEASE_TOTAL: &str = "slotkeep_lock_release_total";

/// Counter: expired lock records cleared by the sweeper.
pub const LOCKS_SWEPT_TOTAL: &str = "slotkeep_locks_swept_total";

/// Counter: holds that lapsed while a session was waiting on them.
pub const HOLDS_EXPIRED_TOTAL: &str = "slotkeep_holds_expired_total";

// ── Resource utilization ─────────────────────────────────────────

/// Gauge: active TCP connections.
pub const CONNECTIONS_ACTIVE: &str = "slotkeep_connections_active";

/// Counter: total connections accepted.
pub const CONNECTIONS_TOTAL: &str = "slotkeep_connections_total";

/// Counter: connections rejected due to limit.
pub const CONNECTIONS_REJECTED_TOTAL: &str = "slotkeep_connections_rejected_total";

/// Gauge: live availability subscriptions.
pub const SUBSCRIPTIONS_ACTIVE: &str = "slotkeep_subscriptions_active";

/// Histogram: journal group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "slotkeep_wal_flush_duration_seconds";

/// Histogram: journal group-commit batch size (events per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "slotkeep_wal_flush_batch_size";

/// Counter: journal compactions completed.
pub const WAL_COMPACTIONS_TOTAL: &str = "slotkeep_wal_compactions_total";

/// Install the Prometheus exporter on `port`. No-op if port is None.
pub fn init(port: Option<u16>) -> Result<(), BuildError> {
    let Some(port) = port else { return Ok(()) };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    PrometheusBuilder::new().with_http_listener(addr).install()?;
    tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics");
    Ok(())
}
