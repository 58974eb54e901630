//! Error types for the pipeline core.
//!
//! Mirrors `pipeline-common`'s error shape: named variants, `#[from]` where
//! the conversion is unambiguous, no string-typed catch-all.

use thiserror::Error;

use crate::task_store::SegmentStatus;

/// Errors raised while constructing or mutating pipeline state.
///
/// This does not cover admission backpressure (`AdmissionRejected` in the
/// spec) or the not-running case — those are plain return codes
/// ([`SubmitError`]), not exceptional errors.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("invalid segment: {reason}")]
    InvalidSegment { reason: String },

    #[error("illegal segment status transition from {from:?} to {to:?}")]
    IllegalTransition {
        from: SegmentStatus,
        to: SegmentStatus,
    },

    #[error("unknown segment id: {0}")]
    UnknownSegment(String),

    #[error("unknown audio id: {0}")]
    UnknownAudio(String),

    #[error("model adapter returned {got} results for {expected} inputs")]
    BatchLengthMismatch { expected: usize, got: usize },

    #[error("model call failed: {0}")]
    ModelFailure(String),
}

/// Return code for [`crate::supervisor::Pipeline::submit_segment`].
///
/// Kept separate from [`PipelineError`] because the spec treats admission
/// rejection and "not running" as ordinary submission outcomes, not faults.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum SubmitError {
    #[error("queue is at capacity")]
    RejectedFull,
    #[error("pipeline is not running")]
    NotRunning,
}
