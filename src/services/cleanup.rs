use chrono::Utc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

use crate::services::jobs::{JobStore, JobStoreError};
use crate::services::storage::ObjectStorage;

/// Knobs for a single sweep.
#[derive(Debug, Clone, Copy, Default)]
pub struct SweepOptions {
    /// Ignore expiry: clean everything not yet attempted.
    pub force: bool,
    /// Report what would be deleted without deleting or marking anything.
    pub dry_run: bool,
}

/// What a sweep did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub scanned: usize,
    pub deleted: usize,
    pub failed: usize,
}

/// Background reclaimer for expired artifacts.
///
/// Each eligible record gets exactly one cleanup attempt, ever: after the
/// attempt it is marked `cleanup_attempted` regardless of whether the
/// object deletes succeeded. That trades a little storage leakage on a
/// permanently-broken delete for a sweep that can never loop on one
/// record. Per-item failures never abort the batch.
pub struct ExpiryScheduler {
    jobs: Arc<dyn JobStore>,
    storage: Arc<dyn ObjectStorage>,
    interval: Duration,
    running: AtomicBool,
}

impl ExpiryScheduler {
    pub fn new(
        jobs: Arc<dyn JobStore>,
        storage: Arc<dyn ObjectStorage>,
        interval: Duration,
    ) -> Self {
        Self {
            jobs,
            storage,
            interval,
            running: AtomicBool::new(false),
        }
    }

    /// Long-running sweep loop; spawn exactly once at process start. A
    /// second call while one loop is alive is a logged no-op so a
    /// supervisor restart of the caller cannot double-start the sweep.
    /// Stops when `shutdown` observes a change.
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        if self.running.swap(true, Ordering::SeqCst) {
            tracing::warn!("expiry scheduler already running, not starting a second loop");
            return;
        }
        tracing::info!(interval_secs = self.interval.as_secs(), "expiry scheduler started");

        loop {
            tokio::select! {
                _ = tokio::time::sleep(self.interval) => {
                    match self.sweep(SweepOptions::default()).await {
                        Ok(report) => tracing::info!(
                            scanned = report.scanned,
                            deleted = report.deleted,
                            failed = report.failed,
                            "expiry sweep completed"
                        ),
                        Err(e) => tracing::error!(error = %e, "expiry sweep failed"),
                    }
                }
                _ = shutdown.changed() => break,
            }
        }

        self.running.store(false, Ordering::SeqCst);
        tracing::info!("expiry scheduler stopped");
    }

    /// One pass over the expired, not-yet-attempted records. Errors only
    /// on query-level failure; storage trouble is counted per item.
    pub async fn sweep(&self, opts: SweepOptions) -> Result<SweepReport, JobStoreError> {
        let batch = self.jobs.cleanup_batch(Utc::now(), opts.force).await?;
        let mut report = SweepReport {
            scanned: batch.len(),
            ..Default::default()
        };

        for job in batch {
            if opts.dry_run {
                tracing::info!(
                    job_id = %job.id,
                    source_key = %job.source_key,
                    result_key = %job.result_key,
                    "dry run: would clean up"
                );
                continue;
            }

            let mut item_failed = false;
            for key in [job.source_key.as_str(), job.result_key.as_str()] {
                if key.is_empty() {
                    continue;
                }
                if let Err(e) = self.storage.delete(key).await {
                    item_failed = true;
                    tracing::warn!(job_id = %job.id, key, error = %e, "artifact delete failed");
                }
            }

            // Marked attempted even when deletes failed: one attempt per
            // record, never a retry on the next cycle.
            if let Err(e) = self.jobs.mark_cleanup_attempted(job.id).await {
                item_failed = true;
                tracing::warn!(job_id = %job.id, error = %e, "could not mark cleanup attempt");
            }

            if item_failed {
                report.failed += 1;
                metrics::counter!("cleanup_failed_total").increment(1);
            } else {
                report.deleted += 1;
                metrics::counter!("cleanup_deleted_total").increment(1);
                tracing::info!(job_id = %job.id, "expired artifacts cleaned up");
            }
        }

        Ok(report)
    }
}
