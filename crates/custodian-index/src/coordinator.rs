//! Indexing coordinator (C7, §4.7): serializes heavy indexing operations
//! behind a fair binary semaphore, skips operations that ran too recently,
//! and gives callers a way to wait for "all pending indexing done" without
//! a polling race against the semaphore itself.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use tokio::sync::{Mutex, Semaphore};
use tracing::{info, warn};

use custodian_core::{COORDINATOR_POLL_INTERVAL_MS, COORDINATOR_SHUTDOWN_GRACE_SECS};

pub type IndexerFuture = Pin<Box<dyn Future<Output = Result<(), String>> + Send>>;
pub type IndexerFn = Arc<dyn Fn() -> IndexerFuture + Send + Sync>;

#[derive(Clone, Debug)]
pub struct CoordinateRequest {
    pub operation: String,
    pub force_rebuild: bool,
    pub force_execution: bool,
    pub can_wait: bool,
    pub min_interval_ms: u64,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CoordinateStatus {
    Completed,
    Failed(String),
    Cancelled(String),
    Skipped(String),
}

#[derive(Clone, Debug)]
pub struct CoordinateResult {
    pub status: CoordinateStatus,
    pub elapsed: Duration,
}

/// Decrements the active-task counter on drop, including on panic/early
/// return, mirroring the "finally" step of the reference description.
struct ActiveTaskGuard(Arc<AtomicI64>);

impl Drop for ActiveTaskGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

pub struct IndexCoordinator {
    registry: DashMap<String, IndexerFn>,
    /// Monotonic `Instant`, not wall-clock time: `min_interval_ms` must be
    /// measured against a clock that can't jump or stall across a
    /// wall-clock-second boundary (§4.7, P10).
    last_execution: DashMap<String, Instant>,
    semaphore: Arc<Semaphore>,
    master_lock: tokio::sync::RwLock<()>,
    shutdown_requested: AtomicBool,
    graceful_in_progress: AtomicBool,
    test_mode: AtomicBool,
    active_tasks: Arc<AtomicI64>,
    per_key_locks: DashMap<String, Arc<Mutex<()>>>,
}

impl Default for IndexCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

impl IndexCoordinator {
    pub fn new() -> Self {
        Self {
            registry: DashMap::new(),
            last_execution: DashMap::new(),
            semaphore: Arc::new(Semaphore::new(1)),
            master_lock: tokio::sync::RwLock::new(()),
            shutdown_requested: AtomicBool::new(false),
            graceful_in_progress: AtomicBool::new(false),
            test_mode: AtomicBool::new(false),
            active_tasks: Arc::new(AtomicI64::new(0)),
            per_key_locks: DashMap::new(),
        }
    }

    pub fn set_test_mode(&self, on: bool) {
        self.test_mode.store(on, Ordering::SeqCst);
    }

    pub async fn register(&self, operation: impl Into<String>, indexer: IndexerFn) {
        let _guard = self.master_lock.read().await;
        self.registry.insert(operation.into(), indexer);
    }

    fn is_shutting_down(&self) -> bool {
        self.shutdown_requested.load(Ordering::SeqCst) || self.graceful_in_progress.load(Ordering::SeqCst)
    }

    /// Run `request.operation`'s registered indexer under the coordinator's
    /// serialization policy (§4.7).
    pub async fn coordinate(self: &Arc<Self>, request: CoordinateRequest) -> CoordinateResult {
        let start = Instant::now();

        // Checkpoint 1: entry.
        if self.is_shutting_down() {
            return CoordinateResult { status: CoordinateStatus::Cancelled("shutdown".to_string()), elapsed: start.elapsed() };
        }
        if self.test_mode.load(Ordering::SeqCst) && !request.force_execution {
            return CoordinateResult { status: CoordinateStatus::Skipped("test mode".to_string()), elapsed: start.elapsed() };
        }

        self.active_tasks.fetch_add(1, Ordering::SeqCst);
        let this = Arc::clone(self);
        let handle = tokio::spawn(async move { this.run_one(request).await });

        let status = match handle.await {
            Ok(status) => status,
            Err(e) => CoordinateStatus::Failed(format!("indexing task panicked: {}", e)),
        };
        CoordinateResult { status, elapsed: start.elapsed() }
    }

    async fn run_one(self: Arc<Self>, request: CoordinateRequest) -> CoordinateStatus {
        let _active_guard = ActiveTaskGuard(Arc::clone(&self.active_tasks));

        let permit = if request.can_wait {
            self.semaphore.clone().acquire_owned().await.ok()
        } else {
            self.semaphore.clone().try_acquire_owned().ok()
        };
        let Some(permit) = permit else {
            return CoordinateStatus::Failed("busy".to_string());
        };

        // Checkpoint 2: after semaphore.
        if self.is_shutting_down() {
            drop(permit);
            return CoordinateStatus::Cancelled("shutdown".to_string());
        }

        let now = Instant::now();
        if !request.force_rebuild {
            if let Some(last) = self.last_execution.get(&request.operation) {
                let elapsed_ms = now.saturating_duration_since(*last).as_millis() as u64;
                if elapsed_ms < request.min_interval_ms {
                    drop(permit);
                    return CoordinateStatus::Skipped("ran recently".to_string());
                }
            }
        }

        let Some(indexer) = self.registry.get(&request.operation).map(|e| Arc::clone(e.value())) else {
            drop(permit);
            return CoordinateStatus::Failed(format!("no indexer registered for {}", request.operation));
        };

        // Checkpoint 3: after indexer (observed as "did shutdown land while we ran").
        let result = indexer().await;
        if self.is_shutting_down() {
            drop(permit);
            return CoordinateStatus::Cancelled("shutdown".to_string());
        }

        drop(permit);
        match result {
            Ok(()) => {
                self.last_execution.insert(request.operation.clone(), now);
                CoordinateStatus::Completed
            }
            Err(e) => CoordinateStatus::Failed(e),
        }
    }

    /// Busy-waits on the active-task counter, not the semaphore: the
    /// semaphore can be momentarily free between a caller observing it and
    /// the next task acquiring it, which would make a semaphore-based wait
    /// racy (§4.7).
    pub async fn wait_for_completion(&self, timeout_ms: u64) -> bool {
        let deadline = Instant::now() + Duration::from_millis(timeout_ms);
        loop {
            if self.active_tasks.load(Ordering::SeqCst) == 0 {
                return true;
            }
            if Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(Duration::from_millis(COORDINATOR_POLL_INTERVAL_MS)).await;
        }
    }

    /// Graceful shutdown: idempotent.
    pub async fn shutdown(&self) {
        if self.shutdown_requested.compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst).is_err() {
            return;
        }
        self.graceful_in_progress.store(true, Ordering::SeqCst);

        let waited = tokio::time::timeout(Duration::from_secs(COORDINATOR_SHUTDOWN_GRACE_SECS), self.semaphore.acquire()).await;
        match waited {
            Ok(Ok(permit)) => drop(permit),
            _ => warn!("shutdown proceeding without observing a free semaphore within the grace period"),
        }

        let _guard = self.master_lock.write().await;
        self.registry.clear();
        self.last_execution.clear();
        info!("indexing coordinator shut down");
    }

    /// Sets the shutdown flag without waiting for in-flight tasks; they will
    /// observe it at their next checkpoint and return `Cancelled`.
    pub fn force_shutdown(&self) {
        self.shutdown_requested.store(true, Ordering::SeqCst);
    }

    /// Test-only: resets `shutdown_requested` and the last-execution map.
    /// Does NOT toggle test mode.
    pub fn clear_shutdown_flag(&self) {
        self.shutdown_requested.store(false, Ordering::SeqCst);
        self.graceful_in_progress.store(false, Ordering::SeqCst);
        self.last_execution.clear();
    }

    /// Exclusive per-key lock for indexers that must not duplicate work on
    /// the same identifier under concurrent arrivals (§4.7). Callers should
    /// double-check whether the work is already done immediately after
    /// acquiring, before doing it.
    pub async fn with_key_lock<F, Fut, T>(&self, key: &str, f: F) -> T
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        let lock = self.per_key_locks.entry(key.to_string()).or_insert_with(|| Arc::new(Mutex::new(()))).clone();
        let _guard = lock.lock().await;
        f().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;

    fn counting_indexer(counter: Arc<AtomicU32>) -> IndexerFn {
        Arc::new(move || {
            let counter = Arc::clone(&counter);
            Box::pin(async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
        })
    }

    #[tokio::test]
    async fn coordinate_runs_registered_indexer() {
        let coordinator = Arc::new(IndexCoordinator::new());
        let counter = Arc::new(AtomicU32::new(0));
        coordinator.register("reindex", counting_indexer(Arc::clone(&counter))).await;

        let result = coordinator
            .coordinate(CoordinateRequest {
                operation: "reindex".to_string(),
                force_rebuild: false,
                force_execution: false,
                can_wait: true,
                min_interval_ms: 0,
            })
            .await;

        assert_eq!(result.status, CoordinateStatus::Completed);
        assert_eq!(counter.load(Ordering::SeqCst), 1);
        assert!(coordinator.wait_for_completion(1000).await);
    }

    #[tokio::test]
    async fn test_mode_skips_unless_forced() {
        let coordinator = Arc::new(IndexCoordinator::new());
        coordinator.set_test_mode(true);
        let counter = Arc::new(AtomicU32::new(0));
        coordinator.register("reindex", counting_indexer(Arc::clone(&counter))).await;

        let req = CoordinateRequest {
            operation: "reindex".to_string(),
            force_rebuild: false,
            force_execution: false,
            can_wait: true,
            min_interval_ms: 0,
        };
        let result = coordinator.coordinate(req).await;
        assert_eq!(result.status, CoordinateStatus::Skipped("test mode".to_string()));
        assert_eq!(counter.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn shutdown_then_coordinate_is_cancelled() {
        let coordinator = Arc::new(IndexCoordinator::new());
        coordinator.shutdown().await;
        let result = coordinator
            .coordinate(CoordinateRequest {
                operation: "reindex".to_string(),
                force_rebuild: false,
                force_execution: false,
                can_wait: true,
                min_interval_ms: 0,
            })
            .await;
        assert_eq!(result.status, CoordinateStatus::Cancelled("shutdown".to_string()));
    }

    /// P10: two `coordinate(op)` calls with `min_interval_ms = T` within T
    /// of each other — the second is `Skipped`.
    #[tokio::test]
    async fn second_coordinate_within_min_interval_is_skipped() {
        let coordinator = Arc::new(IndexCoordinator::new());
        let counter = Arc::new(AtomicU32::new(0));
        coordinator.register("reindex", counting_indexer(Arc::clone(&counter))).await;

        let req = || CoordinateRequest {
            operation: "reindex".to_string(),
            force_rebuild: false,
            force_execution: false,
            can_wait: true,
            min_interval_ms: 60_000,
        };

        let first = coordinator.coordinate(req()).await;
        assert_eq!(first.status, CoordinateStatus::Completed);

        let second = coordinator.coordinate(req()).await;
        assert_eq!(second.status, CoordinateStatus::Skipped("ran recently".to_string()));
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    /// S7: 10 concurrent `coordinate(X)` calls observe at most 1 running
    /// at any instant.
    #[tokio::test]
    async fn concurrent_coordinate_calls_serialize_through_the_semaphore() {
        let coordinator = Arc::new(IndexCoordinator::new());
        let concurrent = Arc::new(AtomicU32::new(0));
        let max_observed = Arc::new(AtomicU32::new(0));

        let indexer: IndexerFn = {
            let concurrent = Arc::clone(&concurrent);
            let max_observed = Arc::clone(&max_observed);
            Arc::new(move || {
                let concurrent = Arc::clone(&concurrent);
                let max_observed = Arc::clone(&max_observed);
                Box::pin(async move {
                    let now = concurrent.fetch_add(1, Ordering::SeqCst) + 1;
                    max_observed.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(10)).await;
                    concurrent.fetch_sub(1, Ordering::SeqCst);
                    Ok(())
                })
            })
        };
        coordinator.register("reindex", indexer).await;

        let handles: Vec<_> = (0..10)
            .map(|_| {
                let coordinator = Arc::clone(&coordinator);
                tokio::spawn(async move {
                    coordinator
                        .coordinate(CoordinateRequest {
                            operation: "reindex".to_string(),
                            force_rebuild: true,
                            force_execution: false,
                            can_wait: true,
                            min_interval_ms: 0,
                        })
                        .await
                })
            })
            .collect();

        for h in handles {
            assert_eq!(h.await.unwrap().status, CoordinateStatus::Completed);
        }
        assert_eq!(max_observed.load(Ordering::SeqCst), 1);
    }
}
