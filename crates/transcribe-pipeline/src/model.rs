//! Thin capability wrapper around the model runtime. The model itself
//! (loading, warmup, GPU placement) is an external collaborator; this
//! crate only ever calls `transcribe_batch` and `is_ready`.

use std::path::{Path, PathBuf};

use async_trait::async_trait;

use crate::error::PipelineError;

/// Per-item outcome of a batch call, same length and order as the input
/// paths. A file missing on disk is a `Failure`, not an error — only a
/// raised exception (an `Err` return from `transcribe_batch`) or a
/// length mismatch fails the whole batch.
#[derive(Debug, Clone, PartialEq)]
pub enum TranscriptionOutcome {
    Success {
        text: String,
        confidence: f64,
        processing_time_s: f64,
    },
    Failure {
        error: String,
    },
}

/// Capability exposed by the model runtime. Implementations may batch
/// truly or loop sequentially internally — callers must not depend on
/// which.
#[async_trait]
pub trait ModelAdapter: Send + Sync {
    /// Transcribes every path, returning a same-length, same-order result
    /// list. Returning `Err` is the "model raised" case: the whole batch
    /// is treated as failed by the executor.
    async fn transcribe_batch(
        &self,
        paths: &[PathBuf],
    ) -> Result<Vec<TranscriptionOutcome>, PipelineError>;

    /// The scheduler may refuse to form batches before this returns true;
    /// executors must treat it as a precondition regardless.
    fn is_ready(&self) -> bool;
}

/// A test/reference adapter that reports missing files as failures,
/// mirroring the file-existence check in the model service this crate's
/// pipeline was distilled from, and otherwise returns a fixed transcript.
#[derive(Debug, Clone)]
pub struct MockModelAdapter {
    pub fixed_text: String,
    pub fixed_confidence: f64,
    pub processing_time_s: f64,
    pub ready: bool,
}

impl Default for MockModelAdapter {
    fn default() -> Self {
        Self {
            fixed_text: "mock transcript".to_string(),
            fixed_confidence: 0.95,
            processing_time_s: 0.01,
            ready: true,
        }
    }
}

#[async_trait]
impl ModelAdapter for MockModelAdapter {
    async fn transcribe_batch(
        &self,
        paths: &[PathBuf],
    ) -> Result<Vec<TranscriptionOutcome>, PipelineError> {
        Ok(paths
            .iter()
            .map(|p| {
                if Path::new(p).exists() {
                    TranscriptionOutcome::Success {
                        text: self.fixed_text.clone(),
                        confidence: self.fixed_confidence,
                        processing_time_s: self.processing_time_s,
                    }
                } else {
                    TranscriptionOutcome::Failure {
                        error: "file missing".to_string(),
                    }
                }
            })
            .collect())
    }

    fn is_ready(&self) -> bool {
        self.ready
    }
}
