//! Immutable descriptor of one audio slice.

use std::path::{Path, PathBuf};

use crate::error::PipelineError;

/// Priority assigned to the segment at `index == 0` of its audio.
pub const FIRST_SEGMENT_PRIORITY: u8 = 10;
/// Priority assigned to every other segment.
pub const NORMAL_SEGMENT_PRIORITY: u8 = 1;

/// One overlapping time slice of an audio file, produced by the slicer
/// (an external collaborator — this crate never reads or writes the file
/// itself, only carries its path).
#[derive(Debug, Clone, PartialEq)]
pub struct Segment {
    pub segment_id: String,
    pub audio_id: String,
    /// 0-based index, unique within the parent audio.
    pub index: u32,
    pub start_s: f64,
    pub end_s: f64,
    pub file_path: PathBuf,
    /// `FIRST_SEGMENT_PRIORITY` iff `index == 0`, else `NORMAL_SEGMENT_PRIORITY`.
    ///
    /// Mutable so callers can apply a configured priority scheme (see
    /// [`crate::config::PipelineConfig`]) without rebuilding the segment.
    pub priority: u8,
    pub is_first: bool,
}

impl Segment {
    /// Builds a segment, validating `end_s > start_s`.
    pub fn new(
        segment_id: impl Into<String>,
        audio_id: impl Into<String>,
        index: u32,
        start_s: f64,
        end_s: f64,
        file_path: impl AsRef<Path>,
    ) -> Result<Self, PipelineError> {
        if !(end_s > start_s) {
            return Err(PipelineError::InvalidSegment {
                reason: format!("end_s ({end_s}) must be greater than start_s ({start_s})"),
            });
        }
        let is_first = index == 0;
        Ok(Self {
            segment_id: segment_id.into(),
            audio_id: audio_id.into(),
            index,
            start_s,
            end_s,
            file_path: file_path.as_ref().to_path_buf(),
            priority: if is_first {
                FIRST_SEGMENT_PRIORITY
            } else {
                NORMAL_SEGMENT_PRIORITY
            },
            is_first,
        })
    }

    pub fn duration_s(&self) -> f64 {
        self.end_s - self.start_s
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_segment_gets_high_priority() {
        let seg = Segment::new("s0", "a1", 0, 0.0, 6.0, "/tmp/s0.wav").unwrap();
        assert!(seg.is_first);
        assert_eq!(seg.priority, FIRST_SEGMENT_PRIORITY);
        assert_eq!(seg.duration_s(), 6.0);
    }

    #[test]
    fn later_segment_gets_normal_priority() {
        let seg = Segment::new("s1", "a1", 1, 6.0, 12.0, "/tmp/s1.wav").unwrap();
        assert!(!seg.is_first);
        assert_eq!(seg.priority, NORMAL_SEGMENT_PRIORITY);
    }

    #[test]
    fn rejects_non_positive_duration() {
        let err = Segment::new("s0", "a1", 0, 6.0, 6.0, "/tmp/s0.wav").unwrap_err();
        assert!(matches!(err, PipelineError::InvalidSegment { .. }));
    }
}
