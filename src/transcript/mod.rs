//! # Transcripts
//!
//! The editable artifact produced by a transcription request: an ordered
//! sequence of timed text segments. Transcripts live in memory for the
//! duration of a session and are addressed by UUID.
//!
//! ## Ordering Invariant:
//! Segments are sorted by start time at construction and edits replace
//! segment text only, so the order can never change afterwards. Segment
//! indices handed out by the API are positions in this order and stay
//! stable across edits.

pub mod store;

pub use store::{StoreError, TranscriptStore};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::transcription::language::Language;
use crate::transcription::model::ModelSize;

/// One contiguous span of recognized speech.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranscriptSegment {
    /// Start of the span, milliseconds from the beginning of the audio.
    pub start_ms: i64,
    /// End of the span, always `>= start_ms`.
    pub end_ms: i64,
    pub text: String,
}

/// A stored transcript with its source metadata.
#[derive(Debug, Clone)]
pub struct Transcript {
    pub id: Uuid,
    pub source_filename: String,
    pub model: ModelSize,
    pub language: Language,
    /// True when the language came from detection rather than a hint.
    pub language_detected: bool,
    pub audio_duration_seconds: f64,
    pub processing_time_ms: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    segments: Vec<TranscriptSegment>,
}

impl Transcript {
    pub fn new(
        source_filename: String,
        model: ModelSize,
        language: Language,
        language_detected: bool,
        audio_duration_seconds: f64,
        processing_time_ms: u64,
        mut segments: Vec<TranscriptSegment>,
    ) -> Self {
        for segment in &mut segments {
            segment.end_ms = segment.end_ms.max(segment.start_ms);
        }
        segments.sort_by_key(|s| (s.start_ms, s.end_ms));
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            source_filename,
            model,
            language,
            language_detected,
            audio_duration_seconds,
            processing_time_ms,
            created_at: now,
            updated_at: now,
            segments,
        }
    }

    pub fn segments(&self) -> &[TranscriptSegment] {
        &self.segments
    }

    pub fn segment_count(&self) -> usize {
        self.segments.len()
    }

    /// Number of pages at the given page size, never less than one.
    pub fn page_count(&self, page_size: usize) -> usize {
        if self.segments.is_empty() {
            1
        } else {
            (self.segments.len() + page_size - 1) / page_size
        }
    }

    /// Segments of a 1-based page, `None` when the page is out of range.
    pub fn page(&self, page: usize, page_size: usize) -> Option<&[TranscriptSegment]> {
        if page == 0 || page > self.page_count(page_size) {
            return None;
        }
        let start = (page - 1) * page_size;
        let end = (start + page_size).min(self.segments.len());
        Some(&self.segments[start..end])
    }

    /// Replace the text of one segment. Timestamps are untouched, so the
    /// ordering invariant holds by construction.
    pub fn edit_segment(&mut self, index: usize, text: String) -> Option<&TranscriptSegment> {
        let segment = self.segments.get_mut(index)?;
        segment.text = text;
        self.updated_at = Utc::now();
        Some(&self.segments[index])
    }

    /// The whole transcript as plain text, segments joined by single spaces.
    pub fn full_text(&self) -> String {
        self.segments
            .iter()
            .map(|s| s.text.as_str())
            .collect::<Vec<_>>()
            .join(" ")
    }
}
