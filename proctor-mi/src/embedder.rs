//! Speech embeddings and similarity
//!
//! The model sits behind the `Embedder` trait: mono waveform in, fixed-length
//! vector out, pure and stateless. Batching is the stage's responsibility.
//! The production implementation computes a deterministic spectral profile
//! (framed log-energy, zero-crossing rate and Goertzel band energies) whose
//! cosine geometry separates speaking styles well enough for the
//! which-reference-is-closer comparison; tests inject fixed-vector doubles.

use proctor_common::{Error, Result};
use std::path::Path;

/// Analysis frame length: 25 ms at 16 kHz
const FRAME_LEN: usize = 400;
/// Frame hop: 10 ms at 16 kHz
const FRAME_HOP: usize = 160;

/// Goertzel filter bank center frequencies (Hz), log-spaced over the band
/// where speech carries its energy
const BAND_FREQS: [f32; 14] = [
    100.0, 150.0, 225.0, 340.0, 510.0, 765.0, 1150.0, 1720.0, 2580.0, 3070.0, 3870.0, 4640.0,
    5220.0, 6000.0,
];

/// Embedding dimension: mean and std of (energy, zcr, 14 bands)
pub const EMBEDDING_DIM: usize = 32;

/// Pure embedding model interface
pub trait Embedder: Send + Sync {
    /// Embed a mono 16 kHz waveform into a fixed-length vector.
    fn embed(&self, samples: &[f32]) -> Result<Vec<f32>>;
}

/// Deterministic spectral-profile embedder
#[derive(Debug, Default)]
pub struct SpectralEmbedder;

impl Embedder for SpectralEmbedder {
    fn embed(&self, samples: &[f32]) -> Result<Vec<f32>> {
        if samples.len() < FRAME_LEN {
            return Err(Error::Audio(format!(
                "waveform too short to embed: {} samples",
                samples.len()
            )));
        }

        let feature_count = 2 + BAND_FREQS.len();
        let mut sums = vec![0.0f64; feature_count];
        let mut sq_sums = vec![0.0f64; feature_count];
        let mut frames = 0usize;

        let mut start = 0;
        while start + FRAME_LEN <= samples.len() {
            let frame = &samples[start..start + FRAME_LEN];

            let mut features = Vec::with_capacity(feature_count);
            features.push(log_energy(frame));
            features.push(zero_crossing_rate(frame));
            for &freq in &BAND_FREQS {
                features.push((1.0 + goertzel_power(frame, freq)).ln());
            }

            for (i, &f) in features.iter().enumerate() {
                sums[i] += f as f64;
                sq_sums[i] += (f as f64) * (f as f64);
            }
            frames += 1;
            start += FRAME_HOP;
        }

        let n = frames as f64;
        let mut embedding = Vec::with_capacity(EMBEDDING_DIM);
        for i in 0..feature_count {
            let mean = sums[i] / n;
            let variance = (sq_sums[i] / n - mean * mean).max(0.0);
            embedding.push(mean as f32);
            embedding.push(variance.sqrt() as f32);
        }

        Ok(embedding)
    }
}

fn log_energy(frame: &[f32]) -> f32 {
    let energy: f32 = frame.iter().map(|&s| s * s).sum::<f32>() / frame.len() as f32;
    (1e-10 + energy).ln()
}

fn zero_crossing_rate(frame: &[f32]) -> f32 {
    let crossings = frame
        .windows(2)
        .filter(|w| (w[0] >= 0.0) != (w[1] >= 0.0))
        .count();
    crossings as f32 / (frame.len() - 1) as f32
}

/// Power of one frequency bin via the Goertzel recurrence, normalized by
/// frame length.
fn goertzel_power(frame: &[f32], freq_hz: f32) -> f32 {
    let omega = 2.0 * std::f32::consts::PI * freq_hz / 16_000.0;
    let coeff = 2.0 * omega.cos();
    let mut s_prev = 0.0f32;
    let mut s_prev2 = 0.0f32;
    for &x in frame {
        let s = x + coeff * s_prev - s_prev2;
        s_prev2 = s_prev;
        s_prev = s;
    }
    let power = s_prev * s_prev + s_prev2 * s_prev2 - coeff * s_prev * s_prev2;
    power / frame.len() as f32
}

/// Cosine similarity of two vectors; zero-norm inputs score 0.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f64 {
    let dot: f64 = a.iter().zip(b).map(|(&x, &y)| x as f64 * y as f64).sum();
    let norm_a: f64 = a.iter().map(|&x| (x as f64) * (x as f64)).sum::<f64>().sqrt();
    let norm_b: f64 = b.iter().map(|&y| (y as f64) * (y as f64)).sum::<f64>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}

/// Read a WAV file to mono f32, averaging channels if needed.
pub fn read_wav_mono(path: &Path) -> Result<Vec<f32>> {
    let mut reader = hound::WavReader::open(path)
        .map_err(|e| Error::Audio(format!("open {} failed: {}", path.display(), e)))?;
    let spec = reader.spec();

    let interleaved: Vec<f32> = match spec.sample_format {
        hound::SampleFormat::Int => {
            if spec.bits_per_sample != 16 {
                return Err(Error::Audio(format!(
                    "unsupported bit depth {} in {}",
                    spec.bits_per_sample,
                    path.display()
                )));
            }
            reader
                .samples::<i16>()
                .map(|s| s.map(|v| v as f32 / 32_768.0))
                .collect::<std::result::Result<_, _>>()
                .map_err(|e| Error::Audio(format!("read {} failed: {}", path.display(), e)))?
        }
        hound::SampleFormat::Float => reader
            .samples::<f32>()
            .collect::<std::result::Result<_, _>>()
            .map_err(|e| Error::Audio(format!("read {} failed: {}", path.display(), e)))?,
    };

    let channels = spec.channels as usize;
    if channels <= 1 {
        return Ok(interleaved);
    }
    Ok(interleaved
        .chunks_exact(channels)
        .map(|frame| frame.iter().sum::<f32>() / channels as f32)
        .collect())
}
