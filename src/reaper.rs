use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::engine::{Engine, EngineError};
use crate::observability::{LOCKS_SWEPT_TOTAL, WAL_COMPACTIONS_TOTAL};

/// Clear every lock record that is no longer live. Each clear is a
/// compare-and-set against the version seen while collecting, so a lock
/// renewed in the meantime survives. Returns how many were cleared.
pub async fn sweep_expired_locks(engine: &Engine) -> usize {
    let now = engine.now_ms();
    let mut cleared = 0;
    for (slot_id, version) in engine.collect_expired_locks(now) {
        match engine.compare_and_set_lock(slot_id, version, None).await {
            Ok(_) => cleared += 1,
            Err(EngineError::VersionConflict { .. } | EngineError::NotFound(_)) => {
                debug!("sweep skip {slot_id}: lock changed since it was observed");
            }
            Err(e) => warn!("sweep of slot {slot_id} failed: {e}"),
        }
    }
    if cleared > 0 {
        metrics::counter!(LOCKS_SWEPT_TOTAL).increment(cleared as u64);
        info!("swept {cleared} expired locks");
    }
    cleared
}

/// Background task: periodic lock sweep. Locks lapse on their own; this only
/// keeps dead records from piling up.
pub async fn run_lock_sweep(engine: Arc<Engine>, every: Duration) {
    if every.is_zero() {
        return;
    }
    let mut interval = tokio::time::interval(every);
    loop {
        interval.tick().await;
        sweep_expired_locks(&engine).await;
    }
}

/// Compact the journal if enough has been appended since the last time.
pub async fn compact_if_needed(engine: &Engine, threshold: u64) -> Result<bool, EngineError> {
    let appends = engine.wal_appends_since_compact().await;
    if appends < threshold {
        return Ok(false);
    }
    engine.compact_wal().await?;
    metrics::counter!(WAL_COMPACTIONS_TOTAL).increment(1);
    info!("compacted journal after {appends} appends");
    Ok(true)
}

/// Background task that periodically compacts the journal.
pub async fn run_compactor(engine: Arc<Engine>, threshold: u64) {
    let mut interval = tokio::time::interval(Duration::from_secs(60));
    loop {
        interval.tick().await;
        if let Err(e) = compact_if_needed(&engine, threshold).await {
            tracing::error!("journal compaction failed: {e}");
        }
    }
}
