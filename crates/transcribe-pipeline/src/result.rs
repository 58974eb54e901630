//! Result types shared between the executor and the dispatcher.
//!
//! Redesigned from the source's loosely-typed result dictionaries into a
//! tagged variant, per the "dynamic typing of results" note: a segment
//! either succeeded with text/confidence/timing, or failed with a reason.

use std::time::SystemTime;

#[derive(Debug, Clone, PartialEq)]
pub enum ResultOutcome {
    Completed {
        text: String,
        confidence: f64,
        processing_time_s: f64,
    },
    Failed {
        error: String,
    },
}

/// Per-segment outcome of a batch, as routed by the dispatcher.
#[derive(Debug, Clone, PartialEq)]
pub struct SegmentResult {
    pub segment_id: String,
    pub audio_id: String,
    pub index: u32,
    pub is_first: bool,
    pub outcome: ResultOutcome,
    pub finished_at_wall: Option<SystemTime>,
}

impl SegmentResult {
    pub fn text(&self) -> Option<&str> {
        match &self.outcome {
            ResultOutcome::Completed { text, .. } => Some(text.as_str()),
            ResultOutcome::Failed { .. } => None,
        }
    }

    pub fn is_completed(&self) -> bool {
        matches!(self.outcome, ResultOutcome::Completed { .. })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchStatus {
    Completed,
    Failed,
}

/// Outcome of one batch executed by a worker, handed to the dispatcher.
#[derive(Debug, Clone)]
pub struct BatchResult {
    pub batch_id: u64,
    pub status: BatchStatus,
    pub segment_results: Vec<SegmentResult>,
    pub error: Option<String>,
}
