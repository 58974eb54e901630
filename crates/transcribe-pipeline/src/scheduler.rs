//! Batch formation: pulls admitted segments off the queue and groups them
//! into fixed-size (or timeout-bounded) batches for the executor.
//!
//! Shaped directly on a `tokio::select!`-driven scheduler loop that races
//! a cancellation token, a batch timeout, and new admissions rather than
//! polling on a fixed interval.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::mpsc;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::queue::{DualPriorityQueue, QueueEntry};
use crate::segment::Segment;
use crate::stats::SchedulerStats;
use crate::task_store::TaskStore;

#[derive(Debug, Clone)]
pub struct BatchSchedulerConfig {
    pub batch_size: usize,
    pub batch_timeout: Duration,
    /// Upper bound on how long a single formation round may idle while
    /// polling for cancellation; does not gate batch size or timeout.
    pub queue_check_interval: Duration,
}

impl Default for BatchSchedulerConfig {
    fn default() -> Self {
        Self {
            batch_size: 128,
            batch_timeout: Duration::from_millis(200),
            queue_check_interval: Duration::from_millis(50),
        }
    }
}

/// A group of segments released to the executor together.
#[derive(Debug, Clone)]
pub struct Batch {
    pub batch_id: u64,
    pub segments: Vec<Segment>,
    pub high_count: usize,
    pub normal_count: usize,
    pub created_at: Instant,
}

pub struct BatchScheduler {
    queue: Arc<DualPriorityQueue>,
    task_store: Arc<TaskStore>,
    stats: Arc<SchedulerStats>,
    config: BatchSchedulerConfig,
    out: mpsc::Sender<Batch>,
    cancel: CancellationToken,
}

impl BatchScheduler {
    pub fn new(
        queue: Arc<DualPriorityQueue>,
        task_store: Arc<TaskStore>,
        stats: Arc<SchedulerStats>,
        config: BatchSchedulerConfig,
        out: mpsc::Sender<Batch>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            queue,
            task_store,
            stats,
            config,
            out,
            cancel,
        }
    }

    /// Runs the batch-formation loop until cancelled. Any segments already
    /// admitted but not yet drained when cancellation fires are left
    /// `QUEUED` for a subsequent `start()` to pick back up.
    pub async fn run(self) {
        info!("batch scheduler started");
        loop {
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => {
                    debug!("batch scheduler cancelled, leaving any partial batch queued");
                    break;
                }
                formed = self.form_batch() => {
                    let Some(batch) = formed else {
                        // cancelled mid-formation
                        break;
                    };
                    if self.out.send(batch).await.is_err() {
                        debug!("batch receiver dropped, stopping scheduler");
                        break;
                    }
                }
            }
        }
        info!("batch scheduler stopped");
    }

    /// Waits for at least one segment, then accumulates until `batch_size`
    /// is reached or `batch_timeout` elapses since the first admission.
    /// Returns `None` only if cancelled before a batch could be formed.
    async fn form_batch(&self) -> Option<Batch> {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => return None,
            _ = self.queue.wait_non_empty() => {}
        }

        let formation_start = Instant::now();
        let deadline = sleep(self.config.batch_timeout);
        tokio::pin!(deadline);

        loop {
            if self.queue.size() >= self.config.batch_size {
                break;
            }
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return None,
                _ = &mut deadline => {
                    break;
                }
                _ = self.queue.changed() => {
                    continue;
                }
            }
        }

        let (entries, high_count, normal_count) = self.queue.drain_batch(self.config.batch_size);
        if entries.is_empty() {
            // woken by `changed()` with nothing actually admitted yet (a
            // concurrent drain beat us to it); let the outer loop retry.
            return self.form_batch_empty_retry().await;
        }

        let batch_id = self.task_store.next_batch_id();
        let now = Instant::now();
        let mut segments = Vec::with_capacity(entries.len());
        for QueueEntry { segment, queued_at } in entries {
            let _ = self.task_store.mark_queued(&segment.segment_id);
            let wait_ms = now.saturating_duration_since(queued_at).as_secs_f64() * 1000.0;
            self.stats.record_queue_wait_ms(wait_ms);
            segments.push(segment);
        }
        let creation_ms = formation_start.elapsed().as_secs_f64() * 1000.0;
        self.stats.record_batch(segments.len(), creation_ms);

        Some(Batch {
            batch_id,
            segments,
            high_count,
            normal_count,
            created_at: now,
        })
    }

    async fn form_batch_empty_retry(&self) -> Option<Batch> {
        Box::pin(self.form_batch()).await
    }
}
