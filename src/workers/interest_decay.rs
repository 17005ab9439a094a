use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, info};

use crate::adaptive::AdaptiveEngine;

pub async fn run_interest_decay(engine: Arc<AdaptiveEngine>) -> Result<(), super::WorkerError> {
    let start = Instant::now();
    debug!("Starting interest decay cycle");

    let decayed = engine.decay_interests(None).await?;

    info!(
        decayed_records = decayed,
        decay_rate = engine.config().interest.decay_rate,
        duration_secs = format!("{:.2}", start.elapsed().as_secs_f64()),
        "Interest decay completed"
    );

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adaptive::types::{InterestRecord, NewTopic};
    use crate::adaptive::AdaptiveConfig;
    use crate::db::{MemoryStore, Store};
    use crate::services::TemplateGenerator;

    #[tokio::test]
    async fn test_decay_scales_all_users() {
        let store = Arc::new(MemoryStore::new());
        let engine = Arc::new(AdaptiveEngine::new(
            store.clone(),
            Arc::new(TemplateGenerator),
            AdaptiveConfig::default(),
        ));
        let root = engine
            .bootstrap_root(NewTopic::root("Artificial Intelligence", ""))
            .await
            .unwrap();
        store
            .save_interest(&InterestRecord::new("a", root.id, 0.8))
            .await
            .unwrap();
        store
            .save_interest(&InterestRecord::new("b", root.id, 0.4))
            .await
            .unwrap();

        run_interest_decay(Arc::clone(&engine)).await.unwrap();

        let rate = engine.config().interest.decay_rate;
        let a = store.get_interest("a", root.id).await.unwrap().unwrap();
        let b = store.get_interest("b", root.id).await.unwrap().unwrap();
        assert!((a.interest_score - 0.8 * rate).abs() < 1e-9);
        assert!((b.interest_score - 0.4 * rate).abs() < 1e-9);
    }
}
