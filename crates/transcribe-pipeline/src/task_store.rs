//! In-memory mapping from audio id -> audio task and segment id -> segment
//! task, with per-audio progress roll-up.
//!
//! Backed by `dashmap`, the same sharded-map primitive `rust-srec` uses for
//! its in-memory job indices.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Instant, SystemTime};

use dashmap::DashMap;
use tracing::debug;

use crate::error::PipelineError;
use crate::segment::Segment;

/// Mutable state owned by the task store, monotonically advancing
/// `CREATED -> QUEUED -> PROCESSING -> (COMPLETED | FAILED)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SegmentStatus {
    Created,
    Queued,
    Processing,
    Completed,
    Failed,
}

impl SegmentStatus {
    fn allows(self, next: SegmentStatus) -> bool {
        use SegmentStatus::*;
        matches!(
            (self, next),
            (Created, Queued)
                | (Queued, Processing)
                | (Processing, Completed)
                | (Processing, Failed)
        )
    }
}

#[derive(Debug, Clone)]
pub struct SegmentState {
    pub segment: Segment,
    pub status: SegmentStatus,
    pub queued_at: Option<Instant>,
    pub started_at: Option<Instant>,
    pub finished_at: Option<Instant>,
    /// Wall-clock completion time, used by `evict_older_than` (age is a
    /// human duration, not meaningfully expressed with `Instant` alone).
    pub finished_at_wall: Option<SystemTime>,
    pub batch_id: Option<u64>,
    pub text: Option<String>,
    pub confidence: Option<f64>,
    pub processing_time_s: Option<f64>,
    pub error: Option<String>,
}

impl SegmentState {
    fn new(segment: Segment) -> Self {
        Self {
            segment,
            status: SegmentStatus::Created,
            queued_at: None,
            started_at: None,
            finished_at: None,
            finished_at_wall: None,
            batch_id: None,
            text: None,
            confidence: None,
            processing_time_s: None,
            error: None,
        }
    }

    fn advance_to(&mut self, next: SegmentStatus) -> Result<(), PipelineError> {
        if !self.status.allows(next) {
            return Err(PipelineError::IllegalTransition {
                from: self.status,
                to: next,
            });
        }
        self.status = next;
        Ok(())
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self.status, SegmentStatus::Completed | SegmentStatus::Failed)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AudioStatus {
    Uploaded,
    Slicing,
    Ready,
    Processing,
    Completed,
    Failed,
}

#[derive(Debug, Clone)]
pub struct AudioTaskState {
    pub audio_id: String,
    pub status: AudioStatus,
    /// Ordered by `index` as segments register.
    pub segment_ids: Vec<String>,
    pub duration_s: Option<f64>,
    pub created_at: Instant,
    pub updated_at: Instant,
}

impl AudioTaskState {
    fn new(audio_id: String, duration_s: Option<f64>) -> Self {
        let now = Instant::now();
        Self {
            audio_id,
            status: AudioStatus::Uploaded,
            segment_ids: Vec::new(),
            duration_s,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn progress_percent(&self, store: &TaskStore) -> f64 {
        if self.segment_ids.is_empty() {
            return 0.0;
        }
        let completed = self
            .segment_ids
            .iter()
            .filter(|id| {
                store
                    .segments
                    .get(id.as_str())
                    .is_some_and(|s| s.status == SegmentStatus::Completed)
            })
            .count();
        100.0 * completed as f64 / self.segment_ids.len() as f64
    }
}

/// Thread-safe task store. The dispatcher is the only writer of terminal
/// segment transitions; the supervisor writes `Created`/`Queued`.
#[derive(Debug, Default)]
pub struct TaskStore {
    audios: DashMap<String, AudioTaskState>,
    segments: DashMap<String, SegmentState>,
    next_batch_id: AtomicU64,
}

impl TaskStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an audio task. Idempotent: re-registering an existing id
    /// leaves its current state untouched.
    pub fn register_audio(&self, audio_id: impl Into<String>, duration_s: Option<f64>) {
        let audio_id = audio_id.into();
        self.audios
            .entry(audio_id.clone())
            .or_insert_with(|| AudioTaskState::new(audio_id, duration_s));
    }

    /// Registers a segment at `CREATED`. Auto-vivifies the parent audio
    /// task if the slicer races ahead of an explicit `register_audio` call.
    pub fn register_segment(&self, segment: Segment) {
        let audio_id = segment.audio_id.clone();
        let segment_id = segment.segment_id.clone();
        let index = segment.index;

        self.segments
            .entry(segment_id.clone())
            .or_insert_with(|| SegmentState::new(segment));

        let mut audio = self
            .audios
            .entry(audio_id.clone())
            .or_insert_with(|| AudioTaskState::new(audio_id, None));
        if !audio.segment_ids.contains(&segment_id) {
            let pos = audio
                .segment_ids
                .iter()
                .position(|id| {
                    self.segments
                        .get(id.as_str())
                        .is_some_and(|s| s.segment.index > index)
                })
                .unwrap_or(audio.segment_ids.len());
            audio.segment_ids.insert(pos, segment_id);
        }
        audio.updated_at = Instant::now();
    }

    /// Marks a segment QUEUED and, if this is the audio's first active
    /// segment, advances the audio to PROCESSING (spec invariant: any audio
    /// in PROCESSING has at least one non-terminal-or-terminal sibling
    /// queued/processing/completed/failed).
    pub fn mark_queued(&self, segment_id: &str) -> Result<(), PipelineError> {
        let audio_id = {
            let mut state = self
                .segments
                .get_mut(segment_id)
                .ok_or_else(|| PipelineError::UnknownSegment(segment_id.to_string()))?;
            state.advance_to(SegmentStatus::Queued)?;
            state.queued_at = Some(Instant::now());
            state.segment.audio_id.clone()
        };
        if let Some(mut audio) = self.audios.get_mut(&audio_id) {
            if matches!(
                audio.status,
                AudioStatus::Uploaded | AudioStatus::Slicing | AudioStatus::Ready
            ) {
                audio.status = AudioStatus::Processing;
                audio.updated_at = Instant::now();
            }
        }
        Ok(())
    }

    pub fn mark_processing(&self, segment_id: &str, batch_id: u64) -> Result<(), PipelineError> {
        let mut state = self
            .segments
            .get_mut(segment_id)
            .ok_or_else(|| PipelineError::UnknownSegment(segment_id.to_string()))?;
        state.advance_to(SegmentStatus::Processing)?;
        state.started_at = Some(Instant::now());
        state.batch_id = Some(batch_id);
        Ok(())
    }

    pub fn complete_segment(
        &self,
        segment_id: &str,
        text: String,
        confidence: f64,
        processing_time_s: f64,
    ) -> Result<(), PipelineError> {
        let audio_id = {
            let mut state = self
                .segments
                .get_mut(segment_id)
                .ok_or_else(|| PipelineError::UnknownSegment(segment_id.to_string()))?;
            state.advance_to(SegmentStatus::Completed)?;
            state.finished_at = Some(Instant::now());
            state.finished_at_wall = Some(SystemTime::now());
            state.text = Some(text);
            state.confidence = Some(confidence);
            state.processing_time_s = Some(processing_time_s);
            state.segment.audio_id.clone()
        };
        self.roll_up_audio(&audio_id);
        Ok(())
    }

    pub fn fail_segment(&self, segment_id: &str, error: String) -> Result<(), PipelineError> {
        let audio_id = {
            let mut state = self
                .segments
                .get_mut(segment_id)
                .ok_or_else(|| PipelineError::UnknownSegment(segment_id.to_string()))?;
            state.advance_to(SegmentStatus::Failed)?;
            state.finished_at = Some(Instant::now());
            state.finished_at_wall = Some(SystemTime::now());
            state.error = Some(error);
            state.segment.audio_id.clone()
        };
        self.roll_up_audio(&audio_id);
        Ok(())
    }

    /// If every sibling segment is terminal, advances the audio to
    /// COMPLETED (or FAILED only when *every* sibling failed).
    fn roll_up_audio(&self, audio_id: &str) {
        let Some(mut audio) = self.audios.get_mut(audio_id) else {
            return;
        };
        if audio.segment_ids.is_empty() {
            return;
        }
        let mut all_terminal = true;
        let mut all_failed = true;
        for id in &audio.segment_ids {
            match self.segments.get(id.as_str()) {
                Some(s) if s.is_terminal() => {
                    if s.status != SegmentStatus::Failed {
                        all_failed = false;
                    }
                }
                _ => {
                    all_terminal = false;
                    all_failed = false;
                }
            }
        }
        if all_terminal {
            audio.status = if all_failed {
                AudioStatus::Failed
            } else {
                AudioStatus::Completed
            };
            audio.updated_at = Instant::now();
            debug!(audio_id, status = ?audio.status, "audio task reached terminal state");
        }
    }

    pub fn next_batch_id(&self) -> u64 {
        self.next_batch_id.fetch_add(1, Ordering::Relaxed)
    }

    pub fn get_segment(&self, segment_id: &str) -> Option<SegmentState> {
        self.segments.get(segment_id).map(|s| s.clone())
    }

    pub fn get_audio(&self, audio_id: &str) -> Option<AudioTaskState> {
        self.audios.get(audio_id).map(|a| a.clone())
    }

    pub fn progress_percent(&self, audio_id: &str) -> Option<f64> {
        self.audios.get(audio_id).map(|a| a.progress_percent(self))
    }
}
