//! Routes finished batch results back to per-audio state and to any
//! registered observers, firing "first segment" callbacks ahead of
//! everything else in the batch.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use dashmap::DashMap;
use parking_lot::Mutex;
use tracing::error;

use crate::result::{BatchResult, SegmentResult};
use crate::stats::DispatcherStats;
use crate::task_store::TaskStore;

/// Event handed to observers, one per completed segment.
#[derive(Debug, Clone)]
pub struct DispatchEvent {
    pub audio_id: String,
    pub segment_id: String,
    pub is_first: bool,
    pub result: SegmentResult,
}

/// Caller-supplied callback. Panics inside an observer are isolated and
/// logged rather than propagated — one misbehaving observer must not
/// take down dispatch for the rest of the batch.
pub trait Observer: Send + Sync {
    fn on_event(&self, event: &DispatchEvent);
}

impl<F> Observer for F
where
    F: Fn(&DispatchEvent) + Send + Sync,
{
    fn on_event(&self, event: &DispatchEvent) {
        self(event)
    }
}

/// Routes `BatchResult`s into per-segment storage and observer callbacks.
pub struct ResultDispatcher {
    results: DashMap<String, SegmentResult>,
    first_by_audio: DashMap<String, SegmentResult>,
    on_first: Mutex<Vec<Arc<dyn Observer>>>,
    on_any: Mutex<Vec<Arc<dyn Observer>>>,
    stats: Arc<DispatcherStats>,
}

impl ResultDispatcher {
    pub fn new(stats: Arc<DispatcherStats>) -> Self {
        Self {
            results: DashMap::new(),
            first_by_audio: DashMap::new(),
            on_first: Mutex::new(Vec::new()),
            on_any: Mutex::new(Vec::new()),
            stats,
        }
    }

    pub fn subscribe_first(&self, observer: Arc<dyn Observer>) {
        self.on_first.lock().push(observer);
    }

    pub fn subscribe_any(&self, observer: Arc<dyn Observer>) {
        self.on_any.lock().push(observer);
    }

    /// Applies a batch's results to the task store, then dispatches events
    /// in a fixed order: every first-segment result in the batch, then the
    /// rest.
    pub fn dispatch(&self, task_store: &TaskStore, batch_result: &BatchResult) {
        let mut firsts = Vec::new();
        let mut rest = Vec::new();
        for segment_result in &batch_result.segment_results {
            match &segment_result.outcome {
                crate::result::ResultOutcome::Completed {
                    text,
                    confidence,
                    processing_time_s,
                } => {
                    let _ = task_store.complete_segment(
                        &segment_result.segment_id,
                        text.clone(),
                        *confidence,
                        *processing_time_s,
                    );
                }
                crate::result::ResultOutcome::Failed { error } => {
                    let _ = task_store.fail_segment(&segment_result.segment_id, error.clone());
                }
            }
            self.results
                .insert(segment_result.segment_id.clone(), segment_result.clone());
            if segment_result.is_first {
                self.first_by_audio
                    .insert(segment_result.audio_id.clone(), segment_result.clone());
                firsts.push(segment_result);
            } else {
                rest.push(segment_result);
            }
        }

        for segment_result in firsts {
            self.emit(&self.on_first.lock(), segment_result);
            self.emit(&self.on_any.lock(), segment_result);
            self.stats.record_first_dispatch();
            if matches!(segment_result.outcome, crate::result::ResultOutcome::Completed { .. }) {
                self.stats.record_completed();
            }
        }
        for segment_result in rest {
            self.emit(&self.on_any.lock(), segment_result);
            self.stats.record_normal_dispatch();
            if matches!(segment_result.outcome, crate::result::ResultOutcome::Completed { .. }) {
                self.stats.record_completed();
            }
        }
    }

    fn emit(&self, observers: &[Arc<dyn Observer>], segment_result: &SegmentResult) {
        let event = DispatchEvent {
            audio_id: segment_result.audio_id.clone(),
            segment_id: segment_result.segment_id.clone(),
            is_first: segment_result.is_first,
            result: segment_result.clone(),
        };
        for observer in observers {
            let observer = observer.clone();
            let event_ref = &event;
            let outcome = catch_unwind(AssertUnwindSafe(|| observer.on_event(event_ref)));
            if outcome.is_err() {
                self.stats.observer_panics.fetch_add(1, Ordering::Relaxed);
                error!(segment_id = %event.segment_id, "observer panicked during dispatch");
            }
        }
    }

    pub fn get_first(&self, audio_id: &str) -> Option<SegmentResult> {
        self.first_by_audio.get(audio_id).map(|r| r.clone())
    }

    pub fn get(&self, segment_id: &str) -> Option<SegmentResult> {
        self.results.get(segment_id).map(|r| r.clone())
    }

    pub fn list_by_audio(&self, task_store: &TaskStore, audio_id: &str) -> Vec<SegmentResult> {
        let Some(audio) = task_store.get_audio(audio_id) else {
            return Vec::new();
        };
        audio
            .segment_ids
            .iter()
            .filter_map(|id| self.results.get(id).map(|r| r.clone()))
            .collect()
    }

    /// Drops results whose `finished_at_wall` is older than `max_age`,
    /// bounding memory for long-running pipelines.
    pub fn evict_older_than(&self, max_age: Duration) -> usize {
        let now = SystemTime::now();
        let mut removed = 0;
        self.results.retain(|_, result| {
            let keep = result
                .finished_at_wall
                .and_then(|t| now.duration_since(t).ok())
                .is_none_or(|age| age <= max_age);
            if !keep {
                removed += 1;
            }
            keep
        });
        self.first_by_audio.retain(|_, result| {
            result
                .finished_at_wall
                .and_then(|t| now.duration_since(t).ok())
                .is_none_or(|age| age <= max_age)
        });
        removed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::result::{BatchStatus, ResultOutcome};
    use std::sync::atomic::AtomicUsize;

    fn result(segment_id: &str, audio_id: &str, is_first: bool) -> SegmentResult {
        SegmentResult {
            segment_id: segment_id.to_string(),
            audio_id: audio_id.to_string(),
            index: 0,
            is_first,
            outcome: ResultOutcome::Completed {
                text: "hi".into(),
                confidence: 0.9,
                processing_time_s: 0.01,
            },
            finished_at_wall: Some(SystemTime::now()),
        }
    }

    #[test]
    fn first_segment_observer_fires_ahead_of_generic_ones() {
        let store = TaskStore::new();
        store.register_segment(crate::segment::Segment::new("s0", "a1", 0, 0.0, 1.0, "/tmp/a").unwrap());
        store.mark_queued("s0").unwrap();
        store.mark_processing("s0", 1).unwrap();

        let dispatcher = ResultDispatcher::new(Arc::new(DispatcherStats::default()));
        let order = Arc::new(Mutex::new(Vec::new()));
        let order_first = order.clone();
        let order_any = order.clone();
        dispatcher.subscribe_first(Arc::new(move |_: &DispatchEvent| {
            order_first.lock().push("first");
        }));
        dispatcher.subscribe_any(Arc::new(move |_: &DispatchEvent| {
            order_any.lock().push("any");
        }));

        let batch_result = BatchResult {
            batch_id: 1,
            status: BatchStatus::Completed,
            segment_results: vec![result("s0", "a1", true)],
            error: None,
        };
        dispatcher.dispatch(&store, &batch_result);

        assert_eq!(*order.lock(), vec!["first", "any"]);
        assert!(dispatcher.get_first("a1").is_some());
    }

    #[test]
    fn panicking_observer_does_not_stop_dispatch() {
        let store = TaskStore::new();
        store.register_segment(crate::segment::Segment::new("s0", "a1", 0, 0.0, 1.0, "/tmp/a").unwrap());
        store.mark_queued("s0").unwrap();
        store.mark_processing("s0", 1).unwrap();

        let dispatcher = ResultDispatcher::new(Arc::new(DispatcherStats::default()));
        let calls = Arc::new(AtomicUsize::new(0));
        let calls2 = calls.clone();
        dispatcher.subscribe_any(Arc::new(|_: &DispatchEvent| panic!("boom")));
        dispatcher.subscribe_any(Arc::new(move |_: &DispatchEvent| {
            calls2.fetch_add(1, Ordering::Relaxed);
        }));

        let batch_result = BatchResult {
            batch_id: 1,
            status: BatchStatus::Completed,
            segment_results: vec![result("s0", "a1", false)],
            error: None,
        };
        dispatcher.dispatch(&store, &batch_result);

        assert_eq!(calls.load(Ordering::Relaxed), 1);
        assert_eq!(dispatcher.stats.observer_panics.load(Ordering::Relaxed), 1);
    }
}
