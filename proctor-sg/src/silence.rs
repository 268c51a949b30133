//! Silence-based span detection
//!
//! Windowed-RMS detection: windows below the dB threshold are silence, and
//! silence gaps shorter than the minimum duration do not split speech. The
//! output is the list of voiced spans between qualifying silences.

use thiserror::Error;

/// Silence detection errors
#[derive(Debug, Error)]
pub enum SilenceError {
    /// Invalid silence threshold value
    #[error("Invalid threshold: {0}")]
    InvalidThreshold(String),

    /// Invalid detection parameters
    #[error("Invalid parameters: {0}")]
    InvalidParameters(String),
}

/// A contiguous non-silent region
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VoicedSpan {
    /// Start time in seconds
    pub start_seconds: f32,
    /// End time in seconds
    pub end_seconds: f32,
}

impl VoicedSpan {
    pub fn new(start_seconds: f32, end_seconds: f32) -> Self {
        Self {
            start_seconds,
            end_seconds,
        }
    }

    pub fn duration(&self) -> f32 {
        self.end_seconds - self.start_seconds
    }
}

/// Silence detector
pub struct SilenceDetector {
    /// RMS level below which a window is silent (negative dBFS)
    threshold_db: f32,

    /// Silence shorter than this does not split spans (seconds)
    min_silence_sec: f32,

    /// RMS window length in milliseconds
    window_ms: f32,
}

impl SilenceDetector {
    pub fn new() -> Self {
        Self {
            threshold_db: -40.0,
            min_silence_sec: 2.0,
            window_ms: 100.0,
        }
    }

    /// Set silence threshold in dBFS (must be negative)
    pub fn with_threshold_db(mut self, threshold_db: f32) -> Result<Self, SilenceError> {
        if threshold_db >= 0.0 {
            return Err(SilenceError::InvalidThreshold(
                "Threshold must be negative dB".to_string(),
            ));
        }
        self.threshold_db = threshold_db;
        Ok(self)
    }

    /// Set minimum silence gap in seconds
    pub fn with_min_silence(mut self, min_silence_sec: f32) -> Result<Self, SilenceError> {
        if min_silence_sec <= 0.0 {
            return Err(SilenceError::InvalidParameters(
                "Min silence must be > 0".to_string(),
            ));
        }
        self.min_silence_sec = min_silence_sec;
        Ok(self)
    }

    /// Detect voiced spans in mono audio.
    ///
    /// Spans are the complement of qualifying silence regions over the whole
    /// signal; leading and trailing silence produces no span. Length
    /// filtering is the caller's policy, not done here.
    pub fn detect_voiced(
        &self,
        samples: &[f32],
        sample_rate: usize,
    ) -> Result<Vec<VoicedSpan>, SilenceError> {
        if sample_rate == 0 {
            return Err(SilenceError::InvalidParameters(
                "Sample rate must be > 0".to_string(),
            ));
        }
        if samples.is_empty() {
            return Ok(Vec::new());
        }

        let silences = self.detect_silence(samples, sample_rate);
        let total_seconds = samples.len() as f32 / sample_rate as f32;

        // Complement of silence over [0, total]
        let mut spans = Vec::new();
        let mut cursor = 0.0f32;
        for silence in &silences {
            if silence.0 > cursor {
                spans.push(VoicedSpan::new(cursor, silence.0));
            }
            cursor = silence.1;
        }
        if cursor < total_seconds {
            spans.push(VoicedSpan::new(cursor, total_seconds));
        }

        Ok(spans)
    }

    /// Silence regions (start_sec, end_sec), min-duration filtered.
    fn detect_silence(&self, samples: &[f32], sample_rate: usize) -> Vec<(f32, f32)> {
        let threshold_linear = db_to_linear(self.threshold_db);
        let window_size = ((self.window_ms / 1000.0) * sample_rate as f32).max(1.0) as usize;
        let min_silence_samples = (self.min_silence_sec * sample_rate as f32) as usize;

        let mut regions = Vec::new();
        let mut in_silence = false;
        let mut silence_start = 0usize;

        for (window_idx, chunk) in samples.chunks(window_size).enumerate() {
            let position = window_idx * window_size;
            if rms(chunk) < threshold_linear {
                if !in_silence {
                    in_silence = true;
                    silence_start = position;
                }
            } else if in_silence {
                if position - silence_start >= min_silence_samples {
                    regions.push((
                        silence_start as f32 / sample_rate as f32,
                        position as f32 / sample_rate as f32,
                    ));
                }
                in_silence = false;
            }
        }

        // Silence running to end of signal
        if in_silence && samples.len() - silence_start >= min_silence_samples {
            regions.push((
                silence_start as f32 / sample_rate as f32,
                samples.len() as f32 / sample_rate as f32,
            ));
        }

        regions
    }
}

impl Default for SilenceDetector {
    fn default() -> Self {
        Self::new()
    }
}

fn rms(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum_squares: f32 = samples.iter().map(|&s| s * s).sum();
    (sum_squares / samples.len() as f32).sqrt()
}

fn db_to_linear(db: f32) -> f32 {
    10.0_f32.powf(db / 20.0)
}
