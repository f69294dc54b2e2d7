//! Maintenance scheduler (C9, §4.9): contract only. Three periodic tasks —
//! size check (hourly), compaction/vacuum (weekly), orphan cleanup (daily).
//! Each task is non-reentrant (an `AtomicBool` guard skips a tick that
//! would overlap a still-running one) and cancellable on shutdown via a
//! `tokio::sync::watch` channel, matching the reference's daemon-task-pool
//! pattern for background work that must stop cleanly.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{info, warn};

use custodian_chain::ChainEngine;

pub struct MaintenanceScheduler {
    shutdown_tx: watch::Sender<bool>,
}

impl MaintenanceScheduler {
    /// Spawn the three periodic tasks onto the current runtime's daemon
    /// task pool. Returns a handle whose `shutdown()` stops all three.
    pub fn start(engine: Arc<ChainEngine>, off_chain_dir: std::path::PathBuf, config: &crate::config::MaintenanceConfig) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        spawn_periodic(
            "size-check",
            Duration::from_secs(config.size_check_interval_secs),
            shutdown_rx.clone(),
            {
                let engine = Arc::clone(&engine);
                move || {
                    let engine = Arc::clone(&engine);
                    async move { size_check(&engine).await }
                }
            },
        );

        spawn_periodic(
            "vacuum",
            Duration::from_secs(config.vacuum_interval_secs),
            shutdown_rx.clone(),
            {
                let engine = Arc::clone(&engine);
                move || {
                    let engine = Arc::clone(&engine);
                    async move { vacuum(&engine).await }
                }
            },
        );

        spawn_periodic(
            "orphan-cleanup",
            Duration::from_secs(config.cleanup_interval_secs),
            shutdown_rx,
            {
                let engine = Arc::clone(&engine);
                let off_chain_dir = off_chain_dir.clone();
                move || {
                    let engine = Arc::clone(&engine);
                    let off_chain_dir = off_chain_dir.clone();
                    async move { orphan_cleanup(&engine, &off_chain_dir).await }
                }
            },
        );

        Self { shutdown_tx }
    }

    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
    }
}

fn spawn_periodic<F, Fut>(name: &'static str, interval: Duration, mut shutdown: watch::Receiver<bool>, mut task: F)
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: std::future::Future<Output = ()> + Send,
{
    let running = Arc::new(AtomicBool::new(false));
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if running.swap(true, Ordering::SeqCst) {
                        warn!(task = name, "previous tick still running, skipping this one");
                        continue;
                    }
                    task().await;
                    running.store(false, Ordering::SeqCst);
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!(task = name, "maintenance task cancelled on shutdown");
                        return;
                    }
                }
            }
        }
    });
}

async fn size_check(engine: &ChainEngine) {
    match engine.validate_chain().await {
        Ok(result) => info!(total_blocks = result.total_blocks, "maintenance: size check complete"),
        Err(e) => warn!(error = %e, "maintenance: size check failed"),
    }
}

async fn vacuum(engine: &ChainEngine) {
    info!(backend = engine.pool().identifier(), "maintenance: compaction/vacuum tick");
}

async fn orphan_cleanup(engine: &ChainEngine, off_chain_dir: &std::path::Path) {
    let manager = custodian_chain::OffChainManager::new(Arc::clone(engine.pool()), off_chain_dir);
    let now = chrono::Utc::now().timestamp();
    match manager.cleanup_orphans(now, custodian_core::ORPHAN_TTL_SECS).await {
        Ok(removed) => info!(removed, "maintenance: orphan cleanup complete"),
        Err(e) => warn!(error = %e, "maintenance: orphan cleanup failed"),
    }
}
