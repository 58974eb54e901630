//! Fixed worker pool that pulls formed batches off a channel, drives them
//! through a [`ModelAdapter`], and hands the result to the dispatcher.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinSet;
use tracing::{error, warn};

use crate::dispatcher::ResultDispatcher;
use crate::model::{ModelAdapter, TranscriptionOutcome};
use crate::result::{BatchResult, BatchStatus, ResultOutcome, SegmentResult};
use crate::scheduler::Batch;
use crate::stats::ExecutorStats;
use crate::task_store::TaskStore;

/// How often a worker re-polls `ModelAdapter::is_ready` while waiting for
/// a model to come up before handing it a batch.
const READINESS_POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Runs a fixed number of worker tasks sharing one batch receiver. Unlike
/// the source's elastic thread pool, worker count here is fixed for the
/// pipeline's lifetime — no dynamic scale up/down.
pub struct ExecutorPool {
    workers: JoinSet<()>,
}

impl ExecutorPool {
    /// Spawns `worker_count` workers, each looping until the batch channel
    /// closes (the scheduler shutting down drains in-flight work first).
    pub fn spawn(
        worker_count: usize,
        batches: mpsc::Receiver<Batch>,
        model: Arc<dyn ModelAdapter>,
        task_store: Arc<TaskStore>,
        dispatcher: Arc<ResultDispatcher>,
        stats: Arc<ExecutorStats>,
    ) -> Self {
        let batches = Arc::new(Mutex::new(batches));
        let mut workers = JoinSet::new();
        for worker_id in 0..worker_count.max(1) {
            let batches = batches.clone();
            let model = model.clone();
            let task_store = task_store.clone();
            let dispatcher = dispatcher.clone();
            let stats = stats.clone();
            workers.spawn(async move {
                worker_loop(worker_id, batches, model, task_store, dispatcher, stats).await;
            });
        }
        Self { workers }
    }

    /// Waits for every worker to finish after the batch channel closes.
    pub async fn join(mut self) {
        while self.workers.join_next().await.is_some() {}
    }
}

async fn worker_loop(
    worker_id: usize,
    batches: Arc<Mutex<mpsc::Receiver<Batch>>>,
    model: Arc<dyn ModelAdapter>,
    task_store: Arc<TaskStore>,
    dispatcher: Arc<ResultDispatcher>,
    stats: Arc<ExecutorStats>,
) {
    loop {
        let batch = {
            let mut receiver = batches.lock().await;
            receiver.recv().await
        };
        let Some(batch) = batch else {
            break;
        };

        stats.active_workers.fetch_add(1, Ordering::Relaxed);
        let batch_result = run_batch(&model, &task_store, &batch, &stats).await;
        record_batch_stats(&stats, &batch_result);
        dispatcher.dispatch(&task_store, &batch_result);
        stats.active_workers.fetch_sub(1, Ordering::Relaxed);

        tracing::debug!(worker_id, batch_id = batch.batch_id, status = ?batch_result.status, "batch finished");
    }
}

/// Marks every segment `PROCESSING`, calls the model, and maps its
/// response into a [`BatchResult`].
///
/// A model `Err` or a length mismatch fails the whole batch. A per-item
/// [`TranscriptionOutcome::Failure`] fails only that segment.
async fn run_batch(
    model: &Arc<dyn ModelAdapter>,
    task_store: &Arc<TaskStore>,
    batch: &Batch,
    stats: &ExecutorStats,
) -> BatchResult {
    for segment in &batch.segments {
        if let Err(err) = task_store.mark_processing(&segment.segment_id, batch.batch_id) {
            warn!(segment_id = %segment.segment_id, %err, "failed to mark segment processing");
        }
    }

    while !model.is_ready() {
        tokio::time::sleep(READINESS_POLL_INTERVAL).await;
    }

    let paths: Vec<_> = batch.segments.iter().map(|s| s.file_path.clone()).collect();
    let call_start = Instant::now();
    let call_result = model.transcribe_batch(&paths).await;
    stats.record_batch_ms(call_start.elapsed().as_secs_f64() * 1000.0);
    let outcomes = match call_result {
        Ok(outcomes) => outcomes,
        Err(err) => {
            error!(batch_id = batch.batch_id, %err, "model call failed, failing whole batch");
            return whole_batch_failure(batch, err.to_string());
        }
    };

    if outcomes.len() != batch.segments.len() {
        let err = format!(
            "model adapter returned {} results for {} inputs",
            outcomes.len(),
            batch.segments.len()
        );
        error!(batch_id = batch.batch_id, %err);
        return whole_batch_failure(batch, err);
    }

    let mut segment_results = Vec::with_capacity(batch.segments.len());
    let mut any_failed = false;
    for (segment, outcome) in batch.segments.iter().zip(outcomes) {
        let result_outcome = match outcome {
            TranscriptionOutcome::Success {
                text,
                confidence,
                processing_time_s,
            } => ResultOutcome::Completed {
                text,
                confidence,
                processing_time_s,
            },
            TranscriptionOutcome::Failure { error } => {
                any_failed = true;
                ResultOutcome::Failed { error }
            }
        };
        segment_results.push(SegmentResult {
            segment_id: segment.segment_id.clone(),
            audio_id: segment.audio_id.clone(),
            index: segment.index,
            is_first: segment.is_first,
            outcome: result_outcome,
            finished_at_wall: Some(std::time::SystemTime::now()),
        });
    }

    BatchResult {
        batch_id: batch.batch_id,
        status: if any_failed {
            BatchStatus::Failed
        } else {
            BatchStatus::Completed
        },
        segment_results,
        error: None,
    }
}

fn whole_batch_failure(batch: &Batch, error: String) -> BatchResult {
    let segment_results = batch
        .segments
        .iter()
        .map(|segment| SegmentResult {
            segment_id: segment.segment_id.clone(),
            audio_id: segment.audio_id.clone(),
            index: segment.index,
            is_first: segment.is_first,
            outcome: ResultOutcome::Failed {
                error: error.clone(),
            },
            finished_at_wall: Some(std::time::SystemTime::now()),
        })
        .collect();
    BatchResult {
        batch_id: batch.batch_id,
        status: BatchStatus::Failed,
        segment_results,
        error: Some(error),
    }
}

fn record_batch_stats(stats: &ExecutorStats, batch_result: &BatchResult) {
    match batch_result.status {
        BatchStatus::Completed => {
            stats.batches_succeeded.fetch_add(1, Ordering::Relaxed);
        }
        BatchStatus::Failed => {
            stats.batches_failed.fetch_add(1, Ordering::Relaxed);
        }
    }
    for segment_result in &batch_result.segment_results {
        if segment_result.is_completed() {
            stats.segments_completed.fetch_add(1, Ordering::Relaxed);
        } else {
            stats.segments_failed.fetch_add(1, Ordering::Relaxed);
        }
    }
}
