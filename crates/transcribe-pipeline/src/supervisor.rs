//! The single long-lived orchestrator. Owns every shared piece of state
//! and is the only component callers interact with directly.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::config::PipelineConfig;
use crate::dispatcher::{Observer, ResultDispatcher};
use crate::error::SubmitError;
use crate::executor::ExecutorPool;
use crate::model::ModelAdapter;
use crate::queue::{AdmitOutcome, DualPriorityQueue};
use crate::result::SegmentResult;
use crate::scheduler::BatchScheduler;
use crate::segment::Segment;
use crate::stats::{DispatcherStats, ExecutorStats, PipelineStatus, SchedulerStats};
use crate::task_store::TaskStore;

/// Handles to the background tasks spawned by a running pipeline,
/// dropped and rebuilt on every `start`/`stop` cycle.
struct RunningState {
    cancel: CancellationToken,
    scheduler_handle: JoinHandle<()>,
    executor_pool: ExecutorPool,
}

/// Central orchestrator: owns the queue, task store, dispatcher, and
/// stats, and supervises the scheduler/executor background tasks across
/// `start`/`stop` cycles. Held behind an `Arc` by callers.
pub struct Pipeline {
    config: PipelineConfig,
    queue: Arc<DualPriorityQueue>,
    task_store: Arc<TaskStore>,
    dispatcher: Arc<ResultDispatcher>,
    model: Arc<dyn ModelAdapter>,
    worker_count: usize,

    scheduler_stats: Arc<SchedulerStats>,
    executor_stats: Arc<ExecutorStats>,
    dispatcher_stats: Arc<DispatcherStats>,
    started_at: std::sync::Mutex<Option<Instant>>,

    running: AtomicBool,
    state: tokio::sync::Mutex<Option<RunningState>>,
}

impl Pipeline {
    /// Worker count is derived from `config.max_concurrent_batches`
    /// rather than taken as a separate argument, so the same knob that
    /// sizes the scheduler-to-executor channel also sizes the pool.
    pub fn new(config: PipelineConfig, model: Arc<dyn ModelAdapter>) -> Arc<Self> {
        let queue = Arc::new(DualPriorityQueue::new(config.max_queue_size));
        let dispatcher_stats = Arc::new(DispatcherStats::default());
        let worker_count = config.max_concurrent_batches.max(1);
        Arc::new(Self {
            queue,
            task_store: Arc::new(TaskStore::new()),
            dispatcher: Arc::new(ResultDispatcher::new(dispatcher_stats.clone())),
            model,
            worker_count,
            scheduler_stats: Arc::new(SchedulerStats::default()),
            executor_stats: Arc::new(ExecutorStats::default()),
            dispatcher_stats,
            started_at: std::sync::Mutex::new(None),
            running: AtomicBool::new(false),
            state: tokio::sync::Mutex::new(None),
            config,
        })
    }

    pub fn register_audio(&self, audio_id: impl Into<String>, duration_s: Option<f64>) {
        self.task_store.register_audio(audio_id, duration_s);
    }

    /// Applies the configured priority scheme, registers the segment, and
    /// admits it into the queue. Returns `RejectedFull` if the queue is at
    /// capacity, or `NotRunning` if the pipeline hasn't been started.
    pub fn submit_segment(&self, mut segment: Segment) -> Result<(), SubmitError> {
        if !self.running.load(Ordering::Acquire) {
            return Err(SubmitError::NotRunning);
        }
        segment.priority = if segment.is_first {
            self.config.first_segment_priority
        } else {
            self.config.normal_segment_priority
        };
        let is_first = segment.is_first;
        self.task_store.register_segment(segment.clone());
        match self.queue.admit(segment) {
            AdmitOutcome::Admitted => {
                if is_first {
                    self.dispatcher_stats.record_pending_first();
                }
                Ok(())
            }
            AdmitOutcome::RejectedFull => Err(SubmitError::RejectedFull),
        }
    }

    /// Starts the scheduler and executor workers. Idempotent: calling
    /// `start` on an already-running pipeline is a no-op.
    pub async fn start(self: &Arc<Self>) {
        let mut state = self.state.lock().await;
        if state.is_some() {
            return;
        }
        let cancel = CancellationToken::new();
        let (tx, rx) = mpsc::channel(self.config.max_concurrent_batches.max(1));

        let scheduler = BatchScheduler::new(
            self.queue.clone(),
            self.task_store.clone(),
            self.scheduler_stats.clone(),
            self.config.batch_scheduler_config(),
            tx,
            cancel.clone(),
        );
        let scheduler_handle = tokio::spawn(scheduler.run());

        let executor_pool = ExecutorPool::spawn(
            self.worker_count,
            rx,
            self.model.clone(),
            self.task_store.clone(),
            self.dispatcher.clone(),
            self.executor_stats.clone(),
        );

        *state = Some(RunningState {
            cancel,
            scheduler_handle,
            executor_pool,
        });
        *self.started_at.lock().unwrap() = Some(Instant::now());
        self.running.store(true, Ordering::Release);
        info!("pipeline started");
    }

    /// Stops the pipeline gracefully: cancels the scheduler (any segments
    /// accumulated but not yet drained stay `QUEUED`), then lets in-flight
    /// batches already handed to workers finish before returning.
    /// Idempotent.
    pub async fn stop(self: &Arc<Self>) {
        let running_state = {
            let mut state = self.state.lock().await;
            state.take()
        };
        let Some(running_state) = running_state else {
            return;
        };
        self.running.store(false, Ordering::Release);
        running_state.cancel.cancel();
        let _ = running_state.scheduler_handle.await;
        running_state.executor_pool.join().await;
        *self.started_at.lock().unwrap() = None;
        info!("pipeline stopped");
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    pub fn status(&self) -> PipelineStatus {
        let uptime_s = self
            .started_at
            .lock()
            .unwrap()
            .map(|t| t.elapsed().as_secs_f64())
            .unwrap_or(0.0);
        PipelineStatus {
            is_running: self.is_running(),
            uptime_s,
            total_batches_created: self.scheduler_stats.batches_created.load(Ordering::Relaxed),
            total_batches_completed: self.executor_stats.total_batches(),
            active_workers: self.executor_stats.active_workers.load(Ordering::Relaxed),
            queue: self.queue.status(),
            scheduler: self.scheduler_stats.snapshot(),
            executor: self.executor_stats.snapshot(),
            dispatcher: self.dispatcher_stats.snapshot(),
        }
    }

    pub fn subscribe_first(&self, observer: Arc<dyn Observer>) {
        self.dispatcher.subscribe_first(observer);
    }

    pub fn subscribe_any(&self, observer: Arc<dyn Observer>) {
        self.dispatcher.subscribe_any(observer);
    }

    pub fn get_first(&self, audio_id: &str) -> Option<SegmentResult> {
        self.dispatcher.get_first(audio_id)
    }

    pub fn get(&self, segment_id: &str) -> Option<SegmentResult> {
        self.dispatcher.get(segment_id)
    }

    pub fn list_by_audio(&self, audio_id: &str) -> Vec<SegmentResult> {
        self.dispatcher.list_by_audio(&self.task_store, audio_id)
    }

    pub fn evict_older_than(&self, max_age: Duration) -> usize {
        self.dispatcher.evict_older_than(max_age)
    }

    pub fn progress_percent(&self, audio_id: &str) -> Option<f64> {
        self.task_store.progress_percent(audio_id)
    }

    pub fn audio_status(&self, audio_id: &str) -> Option<crate::task_store::AudioStatus> {
        self.task_store.get_audio(audio_id).map(|a| a.status)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::MockModelAdapter;
    use std::time::Duration;
    use tokio::time::timeout;

    fn pipeline() -> Arc<Pipeline> {
        let config = PipelineConfig {
            batch_size: 4,
            batch_timeout_ms: 50,
            queue_check_interval_ms: 10,
            max_queue_size: 8,
            max_concurrent_batches: 2,
            ..PipelineConfig::default()
        };
        Pipeline::new(config, Arc::new(MockModelAdapter::default()))
    }

    #[tokio::test]
    async fn submit_before_start_is_rejected() {
        let pipeline = pipeline();
        let segment = Segment::new("s0", "a1", 0, 0.0, 1.0, "/dev/null").unwrap();
        assert_eq!(pipeline.submit_segment(segment), Err(SubmitError::NotRunning));
    }

    #[tokio::test]
    async fn start_stop_is_idempotent_and_drains_a_segment() {
        let pipeline = pipeline();
        pipeline.start().await;
        pipeline.start().await; // no-op, must not panic or double-spawn

        let segment = Segment::new("s0", "a1", 0, 0.0, 1.0, "/dev/null").unwrap();
        pipeline.submit_segment(segment).unwrap();

        timeout(Duration::from_secs(2), async {
            loop {
                if pipeline.get("s0").is_some() {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("segment should complete");

        pipeline.stop().await;
        pipeline.stop().await; // no-op
        assert!(!pipeline.is_running());
    }

    #[tokio::test]
    async fn segments_queued_but_undrained_survive_a_stop() {
        let pipeline = pipeline();
        pipeline.start().await;
        pipeline.stop().await;

        // queue persists independent of the running flag
        pipeline.running.store(true, Ordering::Release);
        let segment = Segment::new("s0", "a1", 0, 0.0, 1.0, "/dev/null").unwrap();
        pipeline.submit_segment(segment).unwrap();
        pipeline.running.store(false, Ordering::Release);

        assert_eq!(pipeline.queue.size(), 1);
    }
}
