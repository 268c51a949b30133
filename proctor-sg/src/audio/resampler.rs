//! Sinc resampling of mono PCM
//!
//! Normalizes decoded audio to the 16 kHz rate the embedding model and the
//! persisted WAV segments use.

use proctor_common::{Error, Result};
use rubato::{
    Resampler, SincFixedIn, SincInterpolationParameters, SincInterpolationType, WindowFunction,
};

/// Sample rate of every persisted audio segment
pub const TARGET_SAMPLE_RATE: u32 = 16_000;

/// Resample mono samples from `source_rate` to `target_rate`.
///
/// Single-pass sinc interpolation: 256-tap filter, 0.95 cutoff,
/// BlackmanHarris2 window. A matching source rate returns the input
/// unchanged.
pub fn resample_mono(samples: Vec<f32>, source_rate: u32, target_rate: u32) -> Result<Vec<f32>> {
    if source_rate == target_rate || samples.is_empty() {
        return Ok(samples);
    }

    let num_frames = samples.len();
    let params = SincInterpolationParameters {
        sinc_len: 256,
        f_cutoff: 0.95,
        interpolation: SincInterpolationType::Linear,
        oversampling_factor: 256,
        window: WindowFunction::BlackmanHarris2,
    };

    let resample_ratio = target_rate as f64 / source_rate as f64;

    let mut resampler = SincFixedIn::<f32>::new(
        resample_ratio,
        2.0,
        params,
        num_frames, // chunk size = input length, single pass
        1,
    )
    .map_err(|e| Error::Audio(format!("resampler init failed: {}", e)))?;

    let input_channels = vec![samples];
    let mut output_channels = resampler
        .process(&input_channels, None)
        .map_err(|e| Error::Audio(format!("resampling failed: {}", e)))?;

    let output = output_channels.remove(0);

    tracing::debug!(
        input_frames = num_frames,
        output_frames = output.len(),
        source_rate,
        target_rate,
        "Resampled mono audio"
    );

    Ok(output)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_same_rate_is_identity() {
        let samples = vec![0.1, 0.2, 0.3];
        let out = resample_mono(samples.clone(), 16_000, 16_000).unwrap();
        assert_eq!(out, samples);
    }

    #[test]
    fn test_empty_input() {
        let out = resample_mono(Vec::new(), 44_100, 16_000).unwrap();
        assert!(out.is_empty());
    }

    #[test]
    fn test_downsample_44100_to_16000_length() {
        // one second of a 440 Hz tone
        let source_rate = 44_100u32;
        let samples: Vec<f32> = (0..source_rate)
            .map(|i| {
                let t = i as f32 / source_rate as f32;
                (2.0 * std::f32::consts::PI * 440.0 * t).sin() * 0.5
            })
            .collect();

        let out = resample_mono(samples, source_rate, TARGET_SAMPLE_RATE).unwrap();

        let expected = TARGET_SAMPLE_RATE as usize;
        let tolerance = expected / 100;
        assert!(
            out.len() >= expected - tolerance && out.len() <= expected + tolerance,
            "expected ~{} frames, got {}",
            expected,
            out.len()
        );
        // sinc ringing may overshoot slightly
        for &sample in &out {
            assert!(sample.abs() <= 1.01);
        }
    }
}
