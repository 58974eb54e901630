//! Runtime counters and the serializable status snapshots returned by
//! `Pipeline::status`. Field names on the `*Status` structs mirror the
//! externally observable status payload exactly, so a caller can treat
//! them as a stable wire contract.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Mutex;

use serde::Serialize;

/// Fixed-capacity ring buffer for a running average, replacing a
/// hard-coded constant with a real measurement over the last `CAPACITY`
/// samples.
#[derive(Debug)]
struct RingStat<const CAPACITY: usize> {
    samples: Mutex<(Vec<f64>, usize)>,
}

impl<const CAPACITY: usize> RingStat<CAPACITY> {
    fn new() -> Self {
        Self {
            samples: Mutex::new((Vec::with_capacity(CAPACITY), 0)),
        }
    }

    fn record(&self, value: f64) {
        let mut guard = self.samples.lock().unwrap();
        let (buf, next) = &mut *guard;
        if buf.len() < CAPACITY {
            buf.push(value);
        } else {
            buf[*next] = value;
        }
        *next = (*next + 1) % CAPACITY;
    }

    fn average(&self) -> f64 {
        let guard = self.samples.lock().unwrap();
        let (buf, _) = &*guard;
        if buf.is_empty() {
            return 0.0;
        }
        buf.iter().sum::<f64>() / buf.len() as f64
    }
}

impl<const CAPACITY: usize> Default for RingStat<CAPACITY> {
    fn default() -> Self {
        Self::new()
    }
}

/// Counters updated by the scheduler's batch-formation loop.
#[derive(Debug, Default)]
pub struct SchedulerStats {
    pub batches_created: AtomicU64,
    avg_batch_creation_ms: RingStat<256>,
    avg_queue_wait_ms: RingStat<256>,
    avg_batch_size: RingStat<256>,
}

impl SchedulerStats {
    /// Records one formed batch: its size and how long formation took,
    /// from the first segment becoming available to the batch draining.
    pub fn record_batch(&self, size: usize, creation_ms: f64) {
        self.batches_created.fetch_add(1, Ordering::Relaxed);
        self.avg_batch_size.record(size as f64);
        self.avg_batch_creation_ms.record(creation_ms);
    }

    /// Records how long one segment waited in the queue before being
    /// drained into a batch.
    pub fn record_queue_wait_ms(&self, wait_ms: f64) {
        self.avg_queue_wait_ms.record(wait_ms);
    }

    pub fn snapshot(&self) -> SchedulerStatus {
        SchedulerStatus {
            avg_batch_creation_ms: self.avg_batch_creation_ms.average(),
            avg_queue_wait_ms: self.avg_queue_wait_ms.average(),
            avg_batch_size: self.avg_batch_size.average(),
        }
    }
}

/// Counters updated by executor workers.
#[derive(Debug, Default)]
pub struct ExecutorStats {
    pub batches_succeeded: AtomicU64,
    pub batches_failed: AtomicU64,
    pub segments_completed: AtomicU64,
    pub segments_failed: AtomicU64,
    pub active_workers: AtomicUsize,
    avg_batch_ms: RingStat<256>,
}

impl ExecutorStats {
    pub fn success_rate(&self) -> f64 {
        let ok = self.segments_completed.load(Ordering::Relaxed) as f64;
        let failed = self.segments_failed.load(Ordering::Relaxed) as f64;
        let total = ok + failed;
        if total == 0.0 {
            1.0
        } else {
            ok / total
        }
    }

    pub fn total_batches(&self) -> u64 {
        self.batches_succeeded.load(Ordering::Relaxed) + self.batches_failed.load(Ordering::Relaxed)
    }

    pub fn total_segments(&self) -> u64 {
        self.segments_completed.load(Ordering::Relaxed) + self.segments_failed.load(Ordering::Relaxed)
    }

    /// Records the latency of one `model.transcribe_batch` call.
    pub fn record_batch_ms(&self, ms: f64) {
        self.avg_batch_ms.record(ms);
    }

    pub fn snapshot(&self) -> ExecutorStatus {
        ExecutorStatus {
            total_batches: self.total_batches(),
            total_segments: self.total_segments(),
            avg_batch_ms: self.avg_batch_ms.average(),
            success_rate: self.success_rate(),
        }
    }
}

/// Counters updated by the dispatcher.
#[derive(Debug, Default)]
pub struct DispatcherStats {
    pub total_dispatched: AtomicU64,
    pub first_dispatched: AtomicU64,
    pub normal_dispatched: AtomicU64,
    pub pending_firsts: AtomicU64,
    pub total_completed: AtomicU64,
    pub observer_panics: AtomicU64,
}

impl DispatcherStats {
    /// Marks a first segment as admitted and awaiting dispatch.
    pub fn record_pending_first(&self) {
        self.pending_firsts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_first_dispatch(&self) {
        self.first_dispatched.fetch_add(1, Ordering::Relaxed);
        self.total_dispatched.fetch_add(1, Ordering::Relaxed);
        let _ = self.pending_firsts.fetch_update(Ordering::Relaxed, Ordering::Relaxed, |v| {
            Some(v.saturating_sub(1))
        });
    }

    pub fn record_normal_dispatch(&self) {
        self.normal_dispatched.fetch_add(1, Ordering::Relaxed);
        self.total_dispatched.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_completed(&self) {
        self.total_completed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> DispatcherStatus {
        DispatcherStatus {
            total_dispatched: self.total_dispatched.load(Ordering::Relaxed),
            first_dispatched: self.first_dispatched.load(Ordering::Relaxed),
            normal_dispatched: self.normal_dispatched.load(Ordering::Relaxed),
            pending_firsts: self.pending_firsts.load(Ordering::Relaxed),
            total_completed: self.total_completed.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct QueueStatus {
    pub high: usize,
    pub normal: usize,
    pub total: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct SchedulerStatus {
    pub avg_batch_creation_ms: f64,
    pub avg_queue_wait_ms: f64,
    pub avg_batch_size: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ExecutorStatus {
    pub total_batches: u64,
    pub total_segments: u64,
    pub avg_batch_ms: f64,
    pub success_rate: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct DispatcherStatus {
    pub total_dispatched: u64,
    pub first_dispatched: u64,
    pub normal_dispatched: u64,
    pub pending_firsts: u64,
    pub total_completed: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct PipelineStatus {
    pub is_running: bool,
    pub uptime_s: f64,
    pub total_batches_created: u64,
    pub total_batches_completed: u64,
    pub active_workers: usize,
    pub queue: QueueStatus,
    pub scheduler: SchedulerStatus,
    pub executor: ExecutorStatus,
    pub dispatcher: DispatcherStatus,
}
