//! Positional segment labeling
//!
//! Interview recordings open with two scripted reference spans: first the
//! candidate speaks freely, then reads a passage aloud. Everything after is
//! the interview proper. This positional convention is policy, and it lives
//! entirely in this module so an alternative labeling strategy (explicit
//! markers, operator input) can replace it without touching the pipeline.

use crate::silence::VoicedSpan;
use proctor_common::types::{REFERENCE_NATURAL_FILE, REFERENCE_READING_FILE, SEGMENT_FILE_PREFIX};

/// Role of a labeled span
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SegmentLabel {
    ReferenceNatural,
    ReferenceReading,
    /// Numbered interview segment, 1-based and chronological
    Interview(u32),
}

/// A span with its destination file name
#[derive(Debug, Clone, PartialEq)]
pub struct PlannedSegment {
    pub label: SegmentLabel,
    pub file_name: String,
    pub start_seconds: f32,
    pub end_seconds: f32,
}

/// Label voiced spans positionally, discarding spans shorter than
/// `min_segment_sec`.
///
/// The first qualifying span becomes the natural reference, the second the
/// reading reference, and the rest are numbered `segment_1.wav ...` in
/// chronological order with no gaps.
pub fn label_spans(spans: &[VoicedSpan], min_segment_sec: f32) -> Vec<PlannedSegment> {
    let mut planned = Vec::new();
    let mut index = 0u32;

    for span in spans {
        if span.duration() < min_segment_sec {
            tracing::debug!(
                start = span.start_seconds,
                end = span.end_seconds,
                duration = span.duration(),
                "Discarding short span"
            );
            continue;
        }

        let (label, file_name) = match index {
            0 => (SegmentLabel::ReferenceNatural, REFERENCE_NATURAL_FILE.to_string()),
            1 => (SegmentLabel::ReferenceReading, REFERENCE_READING_FILE.to_string()),
            n => (
                SegmentLabel::Interview(n - 1),
                format!("{}{}.wav", SEGMENT_FILE_PREFIX, n - 1),
            ),
        };

        planned.push(PlannedSegment {
            label,
            file_name,
            start_seconds: span.start_seconds,
            end_seconds: span.end_seconds,
        });
        index += 1;
    }

    planned
}
