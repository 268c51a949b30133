//! Synthetic interview audio for integration tests
//!
//! Builds 16 kHz mono WAV files out of alternating voiced (sine tone) and
//! silent stretches, mimicking an interview recording's structure.

use std::path::Path;

pub const SAMPLE_RATE: u32 = 16_000;

/// One stretch of the generated recording
#[derive(Debug, Clone, Copy)]
pub enum Stretch {
    /// Voiced tone of the given duration in seconds
    Voiced(f32),
    /// Silence of the given duration in seconds
    Silence(f32),
}

/// Generate samples for the given pattern.
pub fn pattern_samples(pattern: &[Stretch]) -> Vec<f32> {
    let mut samples = Vec::new();
    for stretch in pattern {
        match *stretch {
            Stretch::Voiced(seconds) => {
                let count = (seconds * SAMPLE_RATE as f32) as usize;
                let offset = samples.len();
                samples.extend((0..count).map(|i| {
                    let t = (offset + i) as f32 / SAMPLE_RATE as f32;
                    (2.0 * std::f32::consts::PI * 220.0 * t).sin() * 0.5
                }));
            }
            Stretch::Silence(seconds) => {
                let count = (seconds * SAMPLE_RATE as f32) as usize;
                samples.extend(std::iter::repeat(0.0f32).take(count));
            }
        }
    }
    samples
}

/// Write the pattern to a 16-bit mono WAV file.
pub fn write_interview_wav(path: &Path, pattern: &[Stretch]) {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate: SAMPLE_RATE,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut writer = hound::WavWriter::create(path, spec).unwrap();
    for sample in pattern_samples(pattern) {
        writer
            .write_sample((sample.clamp(-1.0, 1.0) * i16::MAX as f32) as i16)
            .unwrap();
    }
    writer.finalize().unwrap();
}
