//! # Transcribe Pipeline
//!
//! A priority-ordered micro-batch streaming inference pipeline for segmented
//! audio transcription. Audio is decomposed elsewhere (the slicer is an
//! external collaborator) into [`Segment`]s that are admitted into a
//! [`DualPriorityQueue`], grouped into [`scheduler::Batch`]es by a
//! [`scheduler::BatchScheduler`], driven through an opaque [`ModelAdapter`]
//! by a fixed [`executor::ExecutorPool`], and routed back to per-audio state
//! by a [`ResultDispatcher`].
//!
//! The crate never touches HTTP, file upload, audio decoding, or the
//! slicing algorithm itself — those are external collaborators. Callers
//! construct a single [`Pipeline`] and hold it behind an `Arc`.
//!
//! ## Authors
//!
//! - transcribe-pipeline contributors

pub mod config;
pub mod dispatcher;
pub mod error;
pub mod executor;
pub mod model;
pub mod queue;
pub mod result;
pub mod scheduler;
pub mod segment;
pub mod stats;
pub mod supervisor;
pub mod task_store;

pub use config::PipelineConfig;
pub use dispatcher::{DispatchEvent, Observer, ResultDispatcher};
pub use error::{PipelineError, SubmitError};
pub use model::{ModelAdapter, TranscriptionOutcome};
pub use queue::{AdmitOutcome, DualPriorityQueue};
pub use result::{BatchResult, BatchStatus, ResultOutcome, SegmentResult};
pub use scheduler::{Batch, BatchSchedulerConfig};
pub use segment::Segment;
pub use stats::PipelineStatus;
pub use supervisor::Pipeline;
pub use task_store::{AudioStatus, AudioTaskState, SegmentState, SegmentStatus, TaskStore};
