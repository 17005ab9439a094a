mod interest_decay;
mod pool_eviction;
pub mod supervisor;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::{broadcast, Mutex};
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{error, info, warn};

use crate::adaptive::{AdaptiveEngine, EngineError};

pub use supervisor::{SupervisorStats, TaskSupervisor};

static WORKER_LEADER: AtomicBool = AtomicBool::new(false);

pub fn is_worker_leader() -> bool {
    WORKER_LEADER.load(Ordering::Relaxed)
}

fn set_worker_leader(val: bool) {
    WORKER_LEADER.store(val, Ordering::Relaxed);
}

fn env_enabled(key: &str) -> bool {
    std::env::var(key)
        .map(|v| v != "false" && v != "0")
        .unwrap_or(true)
}

/// Periodic maintenance: interest decay and session pool eviction.
pub struct WorkerManager {
    scheduler: Mutex<JobScheduler>,
    shutdown_tx: broadcast::Sender<()>,
    engine: Arc<AdaptiveEngine>,
}

impl WorkerManager {
    pub async fn new(engine: Arc<AdaptiveEngine>) -> Result<Self, WorkerError> {
        let scheduler = JobScheduler::new().await?;
        let (shutdown_tx, _) = broadcast::channel(1);
        Ok(Self {
            scheduler: Mutex::new(scheduler),
            shutdown_tx,
            engine,
        })
    }

    pub async fn start(&self) -> Result<(), WorkerError> {
        // single-process deployments run the workers unless told otherwise
        if !env_enabled("WORKER_LEADER") {
            info!("WORKER_LEADER disabled, skipping worker startup");
            return Ok(());
        }

        set_worker_leader(true);
        info!("Starting workers (leader mode)");

        let scheduler = self.scheduler.lock().await;

        if env_enabled("ENABLE_INTEREST_DECAY_WORKER") {
            let schedule = std::env::var("INTEREST_DECAY_SCHEDULE")
                .unwrap_or_else(|_| "0 0 3 * * *".to_string());
            let engine = Arc::clone(&self.engine);
            let shutdown_rx = self.shutdown_tx.subscribe();
            let job = Job::new_async(&schedule, move |_uuid, _lock| {
                let engine = Arc::clone(&engine);
                let mut rx = shutdown_rx.resubscribe();
                Box::pin(async move {
                    tokio::select! {
                        _ = rx.recv() => {},
                        result = interest_decay::run_interest_decay(engine) => {
                            if let Err(e) = result {
                                error!(error = %e, "Interest decay worker error");
                            }
                        }
                    }
                })
            })?;
            scheduler.add(job).await?;
            info!(schedule = %schedule, "Interest decay worker scheduled");
        }

        // Pool eviction - runs every 5 minutes
        {
            let engine = Arc::clone(&self.engine);
            let shutdown_rx = self.shutdown_tx.subscribe();
            let job = Job::new_async("0 */5 * * * *", move |_uuid, _lock| {
                let engine = Arc::clone(&engine);
                let mut rx = shutdown_rx.resubscribe();
                Box::pin(async move {
                    tokio::select! {
                        _ = rx.recv() => {},
                        result = pool_eviction::evict_expired_pools(engine) => {
                            if let Err(e) = result {
                                error!(error = %e, "Pool eviction worker error");
                            }
                        }
                    }
                })
            })?;
            scheduler.add(job).await?;
            info!("Question pool eviction worker scheduled (every 5 minutes)");
        }

        scheduler.start().await?;
        info!("All workers started");

        Ok(())
    }

    pub async fn stop(&self) {
        if !is_worker_leader() {
            return;
        }

        info!("Stopping workers...");
        let _ = self.shutdown_tx.send(());

        let mut scheduler = self.scheduler.lock().await;
        if let Err(e) = scheduler.shutdown().await {
            warn!(error = %e, "Error shutting down scheduler");
        }

        self.engine.drain_background().await;
        set_worker_leader(false);
        info!("Workers stopped");
    }
}

#[derive(Debug, thiserror::Error)]
pub enum WorkerError {
    #[error("Scheduler error: {0}")]
    Scheduler(#[from] tokio_cron_scheduler::JobSchedulerError),
    #[error("Engine error: {0}")]
    Engine(#[from] EngineError),
}
