use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, info};

use crate::adaptive::AdaptiveEngine;

pub async fn evict_expired_pools(engine: Arc<AdaptiveEngine>) -> Result<(), super::WorkerError> {
    let start = Instant::now();
    debug!("Starting question pool eviction");

    let pool = engine.pool();
    let evicted = pool.evict_expired();
    let remaining = pool.stats();

    if evicted.pools > 0 || evicted.prefetched > 0 {
        info!(
            evicted_pools = evicted.pools,
            evicted_prefetched = evicted.prefetched,
            remaining_pools = remaining.pools,
            remaining_questions = remaining.pooled_questions,
            duration_secs = format!("{:.2}", start.elapsed().as_secs_f64()),
            "Question pool eviction completed"
        );
    }

    Ok(())
}
