use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SupervisorStats {
    pub submitted: u64,
    pub succeeded: u64,
    pub failed: u64,
}

#[derive(Default)]
struct Counters {
    submitted: AtomicU64,
    succeeded: AtomicU64,
    failed: AtomicU64,
}

/// Bounded pool for fire-and-forget units.
///
/// Every unit owns whatever handles it needs. Failures and panics are
/// logged here instead of being dropped by the caller.
#[derive(Clone)]
pub struct TaskSupervisor {
    permits: Arc<Semaphore>,
    handles: Arc<Mutex<Vec<JoinHandle<()>>>>,
    counters: Arc<Counters>,
}

impl TaskSupervisor {
    pub fn new(max_concurrent: usize) -> Self {
        Self {
            permits: Arc::new(Semaphore::new(max_concurrent.max(1))),
            handles: Arc::new(Mutex::new(Vec::new())),
            counters: Arc::new(Counters::default()),
        }
    }

    pub fn submit<F, E>(&self, name: &'static str, unit: F)
    where
        F: Future<Output = Result<(), E>> + Send + 'static,
        E: std::fmt::Display + Send + 'static,
    {
        self.counters.submitted.fetch_add(1, Ordering::Relaxed);
        let permits = Arc::clone(&self.permits);
        let counters = Arc::clone(&self.counters);

        let handle = tokio::spawn(async move {
            let Ok(_permit) = permits.acquire_owned().await else {
                warn!(unit = name, "supervisor closed, dropping background unit");
                return;
            };
            let start = Instant::now();
            match unit.await {
                Ok(()) => {
                    counters.succeeded.fetch_add(1, Ordering::Relaxed);
                    debug!(unit = name, elapsed_ms = start.elapsed().as_millis() as u64, "background unit finished");
                }
                Err(e) => {
                    counters.failed.fetch_add(1, Ordering::Relaxed);
                    error!(unit = name, error = %e, "background unit failed");
                }
            }
        });

        let mut handles = self.handles.lock();
        handles.retain(|h| !h.is_finished());
        handles.push(handle);
    }

    /// Waits for every unit submitted so far.
    pub async fn drain(&self) {
        loop {
            let pending: Vec<JoinHandle<()>> = std::mem::take(&mut *self.handles.lock());
            if pending.is_empty() {
                return;
            }
            for handle in pending {
                if let Err(e) = handle.await {
                    self.counters.failed.fetch_add(1, Ordering::Relaxed);
                    error!(error = %e, "background unit panicked");
                }
            }
        }
    }

    pub fn stats(&self) -> SupervisorStats {
        SupervisorStats {
            submitted: self.counters.submitted.load(Ordering::Relaxed),
            succeeded: self.counters.succeeded.load(Ordering::Relaxed),
            failed: self.counters.failed.load(Ordering::Relaxed),
        }
    }
}
