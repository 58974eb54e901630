//! Dual-priority queue: two FIFO lanes (high / normal) behind a shared
//! capacity cap, signalled with a `tokio::sync::Notify` rather than a
//! channel so that both the "wait until non-empty" and "wait for a change"
//! waits can be expressed without consuming an item.

use std::collections::VecDeque;
use std::time::Instant;

use parking_lot::Mutex;
use tokio::sync::Notify;

use crate::segment::Segment;
use crate::stats::QueueStatus;

/// A segment paired with its admission time, used by the scheduler to
/// record queue-wait time.
#[derive(Debug, Clone)]
pub struct QueueEntry {
    pub segment: Segment,
    pub queued_at: Instant,
}

#[derive(Debug)]
pub enum AdmitOutcome {
    Admitted,
    RejectedFull,
}

#[derive(Debug, Default)]
struct QueueInner {
    high: VecDeque<QueueEntry>,
    normal: VecDeque<QueueEntry>,
}

pub struct DualPriorityQueue {
    inner: Mutex<QueueInner>,
    notify: Notify,
    max_queue_size: usize,
}

impl DualPriorityQueue {
    pub fn new(max_queue_size: usize) -> Self {
        Self {
            inner: Mutex::new(QueueInner::default()),
            notify: Notify::new(),
            max_queue_size,
        }
    }

    /// Non-blocking admission. Rejects once the combined queue size would
    /// exceed `max_queue_size` — the sole backpressure signal to callers.
    pub fn admit(&self, segment: Segment) -> AdmitOutcome {
        let mut inner = self.inner.lock();
        if inner.high.len() + inner.normal.len() >= self.max_queue_size {
            return AdmitOutcome::RejectedFull;
        }
        let entry = QueueEntry {
            segment: segment.clone(),
            queued_at: Instant::now(),
        };
        if segment.is_first {
            inner.high.push_back(entry);
        } else {
            inner.normal.push_back(entry);
        }
        drop(inner);
        self.notify.notify_waiters();
        AdmitOutcome::Admitted
    }

    /// Pops up to `max` items under the queue mutex, preferring the high
    /// lane first, then filling the remainder from the normal lane.
    /// Synchronous by design — this never suspends.
    pub fn drain_batch(&self, max: usize) -> (Vec<QueueEntry>, usize, usize) {
        let mut inner = self.inner.lock();
        let capacity = max.min(inner.high.len() + inner.normal.len());
        let mut items = Vec::with_capacity(capacity);

        let mut high_count = 0;
        while items.len() < max {
            let Some(entry) = inner.high.pop_front() else {
                break;
            };
            items.push(entry);
            high_count += 1;
        }
        let mut normal_count = 0;
        while items.len() < max {
            let Some(entry) = inner.normal.pop_front() else {
                break;
            };
            items.push(entry);
            normal_count += 1;
        }
        (items, high_count, normal_count)
    }

    pub fn size(&self) -> usize {
        let inner = self.inner.lock();
        inner.high.len() + inner.normal.len()
    }

    pub fn size_high(&self) -> usize {
        self.inner.lock().high.len()
    }

    pub fn size_normal(&self) -> usize {
        self.inner.lock().normal.len()
    }

    /// Snapshot of both lane sizes plus their total, taken under a single
    /// lock acquisition so the three numbers are mutually consistent.
    pub fn status(&self) -> QueueStatus {
        let inner = self.inner.lock();
        QueueStatus {
            high: inner.high.len(),
            normal: inner.normal.len(),
            total: inner.high.len() + inner.normal.len(),
        }
    }

    /// Resolves once the queue holds at least one item.
    pub async fn wait_non_empty(&self) {
        loop {
            if self.size() > 0 {
                return;
            }
            let notified = self.notify.notified();
            if self.size() > 0 {
                return;
            }
            notified.await;
        }
    }

    /// Resolves on the next admission, regardless of current size. Used by
    /// the scheduler to re-check its batch-formation condition without
    /// busy-polling.
    pub async fn changed(&self) {
        self.notify.notified().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seg(id: &str, index: u32) -> Segment {
        Segment::new(id, "a1", index, 0.0, 1.0, "/tmp/x.wav").unwrap()
    }

    #[test]
    fn admits_until_capacity_then_rejects() {
        let q = DualPriorityQueue::new(2);
        assert!(matches!(q.admit(seg("s0", 1)), AdmitOutcome::Admitted));
        assert!(matches!(q.admit(seg("s1", 2)), AdmitOutcome::Admitted));
        assert!(matches!(q.admit(seg("s2", 3)), AdmitOutcome::RejectedFull));
        assert_eq!(q.size(), 2);
    }

    #[test]
    fn drain_prefers_high_lane() {
        let q = DualPriorityQueue::new(8);
        q.admit(seg("n0", 1));
        q.admit(seg("n1", 2));
        q.admit(seg("first", 0));

        let (items, high, normal) = q.drain_batch(2);
        assert_eq!(high, 1);
        assert_eq!(normal, 1);
        assert_eq!(items[0].segment.segment_id, "first");
        assert_eq!(items[1].segment.segment_id, "n0");
        assert_eq!(q.size(), 1);
    }

    #[tokio::test]
    async fn wait_non_empty_resolves_after_admission() {
        let q = std::sync::Arc::new(DualPriorityQueue::new(8));
        let q2 = q.clone();
        let handle = tokio::spawn(async move {
            q2.wait_non_empty().await;
        });
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        q.admit(seg("s0", 0));
        tokio::time::timeout(std::time::Duration::from_secs(1), handle)
            .await
            .expect("wait_non_empty should resolve")
            .unwrap();
    }
}
