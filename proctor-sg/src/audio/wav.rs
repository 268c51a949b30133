//! WAV persistence for extracted segments
//!
//! Segments are stored as 16-bit PCM mono. Samples outside [-1, 1] are
//! clamped rather than wrapped.

use proctor_common::{Error, Result};
use std::path::Path;

/// Write mono f32 samples as a 16-bit PCM WAV file.
pub fn write_wav_mono16(path: &Path, samples: &[f32], sample_rate: u32) -> Result<()> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };

    let mut writer = hound::WavWriter::create(path, spec)
        .map_err(|e| Error::Audio(format!("create {} failed: {}", path.display(), e)))?;

    for &sample in samples {
        let clamped = sample.clamp(-1.0, 1.0);
        let value = (clamped * i16::MAX as f32) as i16;
        writer
            .write_sample(value)
            .map_err(|e| Error::Audio(format!("write {} failed: {}", path.display(), e)))?;
    }

    writer
        .finalize()
        .map_err(|e| Error::Audio(format!("finalize {} failed: {}", path.display(), e)))?;
    Ok(())
}
