use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use crate::catalog::Catalog;

/// Compact the WAL once it has grown by at least `threshold` appends.
/// Returns whether a compaction ran.
pub async fn compact_if_needed(catalog: &Catalog, threshold: u64) -> bool {
    let appends = catalog.wal_appends_since_compact().await;
    if appends < threshold {
        return false;
    }
    match catalog.compact_wal().await {
        Ok(()) => {
            debug!(appends, "compaction threshold reached");
            true
        }
        Err(e) => {
            warn!("WAL compaction failed: {e}");
            false
        }
    }
}

/// Background task that periodically checks whether the WAL needs compacting.
pub async fn run_compactor(catalog: Arc<Catalog>, threshold: u64, every: Duration) {
    let mut interval = tokio::time::interval(every);
    loop {
        interval.tick().await;
        compact_if_needed(&catalog, threshold).await;
    }
}
