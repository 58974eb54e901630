use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::timeout;

use transcribe_pipeline::config::PipelineConfig;
use transcribe_pipeline::error::SubmitError;
use transcribe_pipeline::model::{ModelAdapter, MockModelAdapter, TranscriptionOutcome};
use transcribe_pipeline::segment::Segment;
use transcribe_pipeline::task_store::AudioStatus;
use transcribe_pipeline::PipelineError;
use transcribe_pipeline::Pipeline;

const BATCH_SIZE: usize = 4;
const BATCH_TIMEOUT_MS: u64 = 200;
const MAX_QUEUE_SIZE: usize = 8;

fn scenario_config() -> PipelineConfig {
    PipelineConfig {
        batch_size: BATCH_SIZE,
        batch_timeout_ms: BATCH_TIMEOUT_MS,
        queue_check_interval_ms: 10,
        max_queue_size: MAX_QUEUE_SIZE,
        max_concurrent_batches: 1,
        ..PipelineConfig::default()
    }
}

fn seg(id: &str, audio: &str, index: u32) -> Segment {
    Segment::new(id, audio, index, index as f64 * 6.0, index as f64 * 6.0 + 6.0, "/dev/null").unwrap()
}

async fn wait_until(mut predicate: impl FnMut() -> bool) {
    timeout(Duration::from_secs(2), async {
        while !predicate() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition did not become true in time");
}

#[tokio::test]
async fn single_short_audio_completes() {
    let pipeline = Pipeline::new(scenario_config(), Arc::new(MockModelAdapter::default()));
    pipeline.start().await;

    for i in 0..3u32 {
        pipeline
            .submit_segment(seg(&format!("s{i}"), "a1", i))
            .unwrap();
    }

    wait_until(|| pipeline.list_by_audio("a1").len() == 3).await;
    assert_eq!(pipeline.get_first("a1").unwrap().text(), Some("mock transcript"));

    pipeline.stop().await;
}

#[tokio::test]
async fn priority_preemption_favors_first_segment() {
    let pipeline = Pipeline::new(scenario_config(), Arc::new(MockModelAdapter::default()));
    pipeline.start().await;

    for i in 0..4u32 {
        pipeline
            .submit_segment(seg(&format!("n{i}"), "a1", i + 1))
            .unwrap();
    }
    pipeline.submit_segment(seg("first", "a2", 0)).unwrap();

    let status = pipeline.status();
    assert_eq!(status.queue.high, 1);
    assert_eq!(status.queue.normal, 4);

    pipeline.stop().await;
}

#[tokio::test]
async fn backpressure_rejects_beyond_capacity() {
    let pipeline = Pipeline::new(scenario_config(), Arc::new(MockModelAdapter::default()));
    pipeline.start().await;

    for i in 0..8u32 {
        pipeline
            .submit_segment(seg(&format!("n{i}"), "a1", i + 1))
            .unwrap();
    }
    let outcome = pipeline.submit_segment(seg("overflow", "a1", 100));
    assert_eq!(outcome, Err(SubmitError::RejectedFull));

    let status = pipeline.status();
    assert_eq!(status.queue.normal, 8);
    assert_eq!(status.queue.high, 0);

    pipeline.stop().await;
}

struct PartialFailureAdapter;

#[async_trait]
impl ModelAdapter for PartialFailureAdapter {
    async fn transcribe_batch(
        &self,
        paths: &[PathBuf],
    ) -> Result<Vec<TranscriptionOutcome>, PipelineError> {
        Ok(paths
            .iter()
            .enumerate()
            .map(|(i, _)| {
                if i == 2 {
                    TranscriptionOutcome::Failure {
                        error: "success=false".to_string(),
                    }
                } else {
                    TranscriptionOutcome::Success {
                        text: "ok".to_string(),
                        confidence: 0.9,
                        processing_time_s: 0.01,
                    }
                }
            })
            .collect())
    }

    fn is_ready(&self) -> bool {
        true
    }
}

#[tokio::test]
async fn partial_batch_failure_marks_one_segment_failed() {
    let pipeline = Pipeline::new(scenario_config(), Arc::new(PartialFailureAdapter));
    pipeline.start().await;

    for i in 0..4u32 {
        pipeline
            .submit_segment(seg(&format!("s{i}"), "a1", i))
            .unwrap();
    }

    wait_until(|| pipeline.list_by_audio("a1").len() == 4).await;

    assert!(pipeline.get("s0").unwrap().is_completed());
    assert!(pipeline.get("s1").unwrap().is_completed());
    assert!(!pipeline.get("s2").unwrap().is_completed());
    assert!(pipeline.get("s3").unwrap().is_completed());
    assert_eq!(pipeline.progress_percent("a1"), Some(75.0));

    pipeline.stop().await;
}

struct RaisingAdapter;

#[async_trait]
impl ModelAdapter for RaisingAdapter {
    async fn transcribe_batch(
        &self,
        _paths: &[PathBuf],
    ) -> Result<Vec<TranscriptionOutcome>, PipelineError> {
        Err(PipelineError::ModelFailure("gpu oom".to_string()))
    }

    fn is_ready(&self) -> bool {
        true
    }
}

#[tokio::test]
async fn total_batch_failure_fails_every_segment_with_same_error() {
    let pipeline = Pipeline::new(scenario_config(), Arc::new(RaisingAdapter));
    pipeline.start().await;

    for i in 0..4u32 {
        pipeline
            .submit_segment(seg(&format!("s{i}"), "a1", i))
            .unwrap();
    }

    wait_until(|| pipeline.list_by_audio("a1").len() == 4).await;

    for i in 0..4u32 {
        assert!(!pipeline.get(&format!("s{i}")).unwrap().is_completed());
    }
    assert_eq!(pipeline.audio_status("a1"), Some(AudioStatus::Failed));
    assert_eq!(pipeline.status().total_batches_completed, 1);
    assert_eq!(pipeline.status().executor.success_rate, 0.0);

    pipeline.stop().await;
}

#[tokio::test]
async fn shutdown_mid_flight_drains_in_flight_batch_and_leaves_rest_queued() {
    let pipeline = Pipeline::new(scenario_config(), Arc::new(SlowAdapter));
    pipeline.start().await;

    for i in 0..6u32 {
        pipeline
            .submit_segment(seg(&format!("s{i}"), "a1", i))
            .unwrap();
    }

    // give the scheduler a moment to form the first batch and hand it to
    // the single worker, which then blocks inside SlowAdapter well past
    // this point.
    tokio::time::sleep(Duration::from_millis(20)).await;
    pipeline.stop().await;

    assert!(!pipeline.is_running());
    wait_until(|| pipeline.list_by_audio("a1").len() == 4).await;

    pipeline.start().await;
    wait_until(|| pipeline.list_by_audio("a1").len() == 6).await;
    pipeline.stop().await;
}

struct SlowAdapter;

#[async_trait]
impl ModelAdapter for SlowAdapter {
    async fn transcribe_batch(
        &self,
        paths: &[PathBuf],
    ) -> Result<Vec<TranscriptionOutcome>, PipelineError> {
        tokio::time::sleep(Duration::from_millis(150)).await;
        Ok(paths
            .iter()
            .map(|_| TranscriptionOutcome::Success {
                text: "ok".to_string(),
                confidence: 0.9,
                processing_time_s: 0.03,
            })
            .collect())
    }

    fn is_ready(&self) -> bool {
        true
    }
}
