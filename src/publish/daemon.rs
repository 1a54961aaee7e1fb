//! Publish Daemon
//!
//! Two periodic background tasks per node:
//!
//! - **Expire**: sweeps the publisher registry and drops stale backpointers.
//! - **Local publish**: walks every locally stored object, removes the ones
//!   whose TTL ran out and releases each lock, which republishes the live
//!   copies and unpublishes the removed ones.
//!
//! Each task skips a cycle (with a warning) when its previous run is still
//! going. Both can also be triggered by hand.

use serde::Serialize;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

use crate::clock::now_secs;
use crate::node::service::PoolNode;

#[derive(Default)]
struct DaemonStats {
    publish_cycles: AtomicU64,
    expire_cycles: AtomicU64,
    skipped_cycles: AtomicU64,
    objects_examined: AtomicU64,
    objects_removed: AtomicU64,
    records_expired: AtomicU64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DaemonStatsSnapshot {
    pub publish_cycles: u64,
    pub expire_cycles: u64,
    pub skipped_cycles: u64,
    pub objects_examined: u64,
    pub objects_removed: u64,
    pub records_expired: u64,
}

/// Result of one local publish sweep.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct LocalSweep {
    pub examined: usize,
    pub removed: usize,
    /// Objects skipped because another task held their lock.
    pub busy: usize,
}

pub struct PublishDaemon {
    node: Arc<PoolNode>,
    publish_running: Mutex<()>,
    expire_running: Mutex<()>,
    stats: DaemonStats,
}

impl PublishDaemon {
    pub fn new(node: Arc<PoolNode>) -> Arc<Self> {
        Arc::new(Self {
            node,
            publish_running: Mutex::new(()),
            expire_running: Mutex::new(()),
            stats: DaemonStats::default(),
        })
    }

    /// Spawns the periodic tasks. A period below one second disables that
    /// task, leaving only the manual trigger.
    pub fn start(self: &Arc<Self>) -> Vec<JoinHandle<()>> {
        let config = self.node.config();
        let mut handles = Vec::new();

        if config.publish_period_seconds > 0 {
            let period = Duration::from_secs(config.publish_period_seconds as u64);
            let daemon = self.clone();
            handles.push(tokio::spawn(async move {
                let start = tokio::time::Instant::now() + period;
                let mut interval = tokio::time::interval_at(start, period);
                loop {
                    interval.tick().await;
                    daemon.publish_now().await;
                }
            }));
        }

        if config.expire_period_seconds > 0 {
            let period = Duration::from_secs(config.expire_period_seconds as u64);
            let daemon = self.clone();
            handles.push(tokio::spawn(async move {
                let start = tokio::time::Instant::now() + period;
                let mut interval = tokio::time::interval_at(start, period);
                loop {
                    interval.tick().await;
                    daemon.expire_now().await;
                }
            }));
        }

        tracing::info!(
            "Publish daemon started (publish every {}s, expire every {}s)",
            config.publish_period_seconds,
            config.expire_period_seconds
        );
        handles
    }

    /// Runs one expire sweep. `None` if a sweep is already running.
    pub async fn expire_now(&self) -> Option<usize> {
        let Ok(_running) = self.expire_running.try_lock() else {
            tracing::warn!("Expire task already busy, skipping cycle");
            self.stats.skipped_cycles.fetch_add(1, Ordering::Relaxed);
            return None;
        };

        let expired = self.node.publishers().expire().await;

        self.stats.expire_cycles.fetch_add(1, Ordering::Relaxed);
        self.stats
            .records_expired
            .fetch_add(expired as u64, Ordering::Relaxed);
        Some(expired)
    }

    /// Runs one local publish sweep. `None` if a sweep is already running.
    pub async fn publish_now(&self) -> Option<LocalSweep> {
        let Ok(_running) = self.publish_running.try_lock() else {
            tracing::warn!("Local publish task already busy, skipping cycle");
            self.stats.skipped_cycles.fetch_add(1, Ordering::Relaxed);
            return None;
        };

        let sweep = self.sweep_local_objects().await;

        self.stats.publish_cycles.fetch_add(1, Ordering::Relaxed);
        self.stats
            .objects_examined
            .fetch_add(sweep.examined as u64, Ordering::Relaxed);
        self.stats
            .objects_removed
            .fetch_add(sweep.removed as u64, Ordering::Relaxed);
        tracing::debug!(
            "Local publish sweep: {} examined, {} removed, {} busy",
            sweep.examined,
            sweep.removed,
            sweep.busy
        );
        Some(sweep)
    }

    async fn sweep_local_objects(&self) -> LocalSweep {
        let store = self.node.store();
        let pause =
            Duration::from_millis(self.node.config().publish_object_interstitial_sleep_millis);
        let mut sweep = LocalSweep::default();

        for object_id in store.ids() {
            let locked = match store.try_get_and_lock(object_id).await {
                Ok(Some(locked)) => locked,
                Ok(None) => {
                    sweep.busy += 1;
                    continue;
                }
                Err(e) => {
                    tracing::debug!("Skipping {}: {}", object_id.short(), e);
                    continue;
                }
            };
            let (guard, object) = locked;
            sweep.examined += 1;

            if object.remaining_ttl(now_secs()) < 1 {
                match store.remove(&guard) {
                    Ok(_) => {
                        tracing::info!("Object {} expired, removing", object_id.short());
                        sweep.removed += 1;
                    }
                    Err(e) => tracing::error!("Failed to remove {}: {}", object_id.short(), e),
                }
            }

            if let Err(e) = store.release(guard, &object).await {
                tracing::warn!("Republish of {} failed: {}", object_id.short(), e);
            }

            if !pause.is_zero() {
                tokio::time::sleep(pause).await;
            }
        }

        sweep
    }

    pub fn stats(&self) -> DaemonStatsSnapshot {
        DaemonStatsSnapshot {
            publish_cycles: self.stats.publish_cycles.load(Ordering::Relaxed),
            expire_cycles: self.stats.expire_cycles.load(Ordering::Relaxed),
            skipped_cycles: self.stats.skipped_cycles.load(Ordering::Relaxed),
            objects_examined: self.stats.objects_examined.load(Ordering::Relaxed),
            objects_removed: self.stats.objects_removed.load(Ordering::Relaxed),
            records_expired: self.stats.records_expired.load(Ordering::Relaxed),
        }
    }
}
