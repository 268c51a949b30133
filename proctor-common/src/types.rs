//! Shared message and result types for the proctor pipeline
//!
//! Queue envelopes, the interview status enum, and the scoring payload
//! persisted by the inference stage. All wire payloads are UTF-8 JSON.

use serde::{Deserialize, Serialize};

/// First span of an interview recording: the candidate speaking freely.
pub const REFERENCE_NATURAL_FILE: &str = "reference_natural.wav";

/// Second span: the candidate reading a provided passage aloud.
pub const REFERENCE_READING_FILE: &str = "reference_reading.wav";

/// Numbered interview segments: `segment_1.wav`, `segment_2.wav`, ...
pub const SEGMENT_FILE_PREFIX: &str = "segment_";

/// Stage name recorded in history entries by the segmentation service
pub const STAGE_VIDEO_CONVERSION: &str = "video_conversion";

/// Stage name recorded in history entries by the inference service
pub const STAGE_ML_INFERENCE: &str = "ml_inference";

/// Interview processing status
///
/// Stored as TEXT in the ledger. Monotonic under normal operation;
/// `PROCESSING`/`FAILED` may regress to `PROCESSING` on retry. `COMPLETED`
/// is absorbing. `NOT_FOUND` is only ever a query result, never persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProcessingStatus {
    Queued,
    VideoDownloaded,
    AudioExtractedQueued,
    Processing,
    Completed,
    Failed,
    NotFound,
}

impl ProcessingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProcessingStatus::Queued => "QUEUED",
            ProcessingStatus::VideoDownloaded => "VIDEO_DOWNLOADED",
            ProcessingStatus::AudioExtractedQueued => "AUDIO_EXTRACTED_QUEUED",
            ProcessingStatus::Processing => "PROCESSING",
            ProcessingStatus::Completed => "COMPLETED",
            ProcessingStatus::Failed => "FAILED",
            ProcessingStatus::NotFound => "NOT_FOUND",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "QUEUED" => Some(ProcessingStatus::Queued),
            "VIDEO_DOWNLOADED" => Some(ProcessingStatus::VideoDownloaded),
            "AUDIO_EXTRACTED_QUEUED" => Some(ProcessingStatus::AudioExtractedQueued),
            "PROCESSING" => Some(ProcessingStatus::Processing),
            "COMPLETED" => Some(ProcessingStatus::Completed),
            "FAILED" => Some(ProcessingStatus::Failed),
            "NOT_FOUND" => Some(ProcessingStatus::NotFound),
            _ => None,
        }
    }

    /// Counted toward `processing_attempts` by the ledger upsert
    pub fn counts_as_attempt(&self) -> bool {
        matches!(self, ProcessingStatus::Processing | ProcessingStatus::Failed)
    }
}

impl std::fmt::Display for ProcessingStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Event published by the upload front door, consumed by the segmentation stage
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VideoReadyMessage {
    pub interview_id: String,
    /// Bucket key of the raw interview recording
    pub source_path: String,
}

/// Event published by the segmentation stage, consumed by the inference stage
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AudioReadyMessage {
    pub interview_id: String,
    /// Bucket prefix holding the labeled audio segments for this interview
    pub extracted_prefix: String,
}

/// Per-segment verdict: which reference the segment most resembles
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SegmentVerdict {
    Natural,
    Reading,
}

/// Aggregate verdict for the whole interview
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FinalVerdict {
    #[serde(rename = "Cheating Detected")]
    CheatingDetected,
    #[serde(rename = "No Cheating Detected")]
    NoCheatingDetected,
}

/// Scoring detail for one numbered interview segment
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SegmentScore {
    pub segment_no: u32,
    pub natural_cosine: f64,
    pub reading_cosine: f64,
    pub verdict: SegmentVerdict,
    /// RFC 3339 timestamp of when this segment was scored
    pub processed_at: String,
}

/// Final scoring payload persisted via `StatusLedger::store_result`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InterviewResult {
    pub interview_id: String,
    pub final_verdict: FinalVerdict,
    pub cheating_segments: u32,
    pub total_segments: u32,
    pub processed_at: String,
    pub processing_time_seconds: f64,
    pub segments_details: Vec<SegmentScore>,
}
