//! Verdict computation
//!
//! A segment's verdict is whichever reference it is more similar to. The
//! aggregate policy is a named configuration value, not an implicit
//! threshold buried in the loop.

use proctor_common::config::{InferenceSettings, VerdictPolicyKind};
use proctor_common::types::{FinalVerdict, SegmentVerdict};

/// Aggregate flagging policy
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum VerdictPolicy {
    /// Any Reading segment flags the interview
    AnyReading,
    /// Strictly more than this fraction of Reading segments flags it
    ReadingFraction(f64),
}

impl VerdictPolicy {
    pub fn from_settings(settings: &InferenceSettings) -> Self {
        match settings.verdict_policy {
            VerdictPolicyKind::AnyReading => VerdictPolicy::AnyReading,
            VerdictPolicyKind::ReadingFraction => {
                VerdictPolicy::ReadingFraction(settings.reading_fraction)
            }
        }
    }

    /// Aggregate per-segment verdicts. An empty interview is not flagged.
    pub fn final_verdict(&self, reading_segments: u32, total_segments: u32) -> FinalVerdict {
        if total_segments == 0 {
            return FinalVerdict::NoCheatingDetected;
        }
        let flagged = match *self {
            VerdictPolicy::AnyReading => reading_segments > 0,
            VerdictPolicy::ReadingFraction(fraction) => {
                reading_segments as f64 > total_segments as f64 * fraction
            }
        };
        if flagged {
            FinalVerdict::CheatingDetected
        } else {
            FinalVerdict::NoCheatingDetected
        }
    }
}

/// Which reference does this segment match?
///
/// Ties resolve to Reading: a borderline match to the read-aloud reference
/// is the conservative fraud signal.
pub fn segment_verdict(natural_cosine: f64, reading_cosine: f64) -> SegmentVerdict {
    if reading_cosine >= natural_cosine {
        SegmentVerdict::Reading
    } else {
        SegmentVerdict::Natural
    }
}
