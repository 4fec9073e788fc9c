use blob_store::BlobStore;
use dedup_lib::{unix_timestamp, FsResult};
use fs_meta::MetaStore;
use log::{info, warn};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

pub const DEFAULT_RECLAIM_BATCH_SIZE: u32 = 1000;

/// Counters for one reclamation pass, or an aggregated multi-batch run.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ReclaimStats {
    /// Orphan hashes the metadata store returned.
    pub scanned: usize,
    /// Blobs removed from both stores.
    pub reclaimed: usize,
    /// Blob deletes that failed; those hashes stay orphaned for the next pass.
    pub failed: usize,
    /// Hashes that regained a reference between the scan and record removal.
    pub resurrected: usize,
}

impl ReclaimStats {
    fn merge(&mut self, other: &ReclaimStats) {
        self.scanned += other.scanned;
        self.reclaimed += other.reclaimed;
        self.failed += other.failed;
        self.resurrected += other.resurrected;
    }
}

/// Background sweep that removes blobs whose refcount reached zero.
///
/// Each pass takes a bounded, oldest-first batch of orphans, bulk-deletes
/// the bytes, then drops each blob record through a conditional delete that
/// only fires while the refcount is still zero. A hash that a concurrent
/// writer re-referenced keeps its record; the writer's own `exists?` check
/// re-creates the bytes on its next miss.
pub struct OrphanReclaimer {
    meta: Arc<dyn MetaStore>,
    blobs: Arc<dyn BlobStore>,
    batch_size: u32,
    grace: Duration,
}

impl OrphanReclaimer {
    pub fn new(meta: Arc<dyn MetaStore>, blobs: Arc<dyn BlobStore>) -> Self {
        Self {
            meta,
            blobs,
            batch_size: DEFAULT_RECLAIM_BATCH_SIZE,
            grace: Duration::ZERO,
        }
    }

    pub fn with_batch_size(mut self, batch_size: u32) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    /// Only reclaims orphans whose last access is at least `grace` old.
    pub fn with_grace(mut self, grace: Duration) -> Self {
        self.grace = grace;
        self
    }

    /// One bounded pass over the oldest orphans.
    pub async fn run_once(&self) -> FsResult<ReclaimStats> {
        let cutoff = unix_timestamp().saturating_sub(self.grace.as_secs());
        let orphans = self.meta.get_orphan_blobs(cutoff, self.batch_size).await?;
        let mut stats = ReclaimStats {
            scanned: orphans.len(),
            ..Default::default()
        };
        if orphans.is_empty() {
            return Ok(stats);
        }

        let failed = self.blobs.delete_many(&orphans).await?;
        stats.failed = failed.len();

        for hash in &orphans {
            if failed.contains(hash) {
                continue;
            }
            if self.meta.remove_blob_if_zero(hash).await? {
                stats.reclaimed += 1;
            } else {
                stats.resurrected += 1;
                info!("reclaimer: {} regained a reference, keeping record", hash);
            }
        }
        Ok(stats)
    }

    /// Runs passes until one returns fewer hashes than the batch size.
    pub async fn cleanup_in_batches(&self) -> FsResult<ReclaimStats> {
        let mut total = ReclaimStats::default();
        loop {
            let stats = self.run_once().await?;
            let drained = stats.scanned < self.batch_size as usize;
            total.merge(&stats);
            if drained {
                break;
            }
        }
        Ok(total)
    }

    /// Spawns a periodic sweep worker.
    pub fn spawn_worker(reclaimer: Arc<Self>, poll_interval: Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(poll_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                match reclaimer.cleanup_in_batches().await {
                    Ok(stats) if stats.scanned > 0 => {
                        info!(
                            "orphan sweep: scanned={}, reclaimed={}, failed={}, resurrected={}",
                            stats.scanned, stats.reclaimed, stats.failed, stats.resurrected
                        );
                    }
                    Ok(_) => {}
                    Err(e) => {
                        warn!("orphan sweep failed: {}", e);
                    }
                }
            }
        })
    }
}
