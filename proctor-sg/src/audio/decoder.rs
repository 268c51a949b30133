//! Audio track decoding
//!
//! Extracts the audio track of the source media (MP4/AAC, MP3, WAV, ...) to
//! mono f32 PCM via symphonia. Multi-channel input is averaged down to mono.

use proctor_common::{Error, Result};
use std::path::Path;
use symphonia::core::audio::{AudioBuffer, AudioBufferRef, Signal};
use symphonia::core::codecs::{DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::conv::FromSample;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use symphonia::core::sample::Sample;

/// Decoded audio result
#[derive(Debug)]
pub struct DecodedAudio {
    /// Mono samples, f32 in [-1.0, 1.0]
    pub samples: Vec<f32>,
    /// Native sample rate in Hz
    pub sample_rate: u32,
    /// Original channel count
    pub channels: usize,
}

impl DecodedAudio {
    pub fn duration_seconds(&self) -> f64 {
        self.samples.len() as f64 / self.sample_rate as f64
    }
}

/// Decode the default audio track of `file_path` to mono f32 PCM.
pub fn decode_audio_track(file_path: &Path) -> Result<DecodedAudio> {
    tracing::debug!(path = %file_path.display(), "Decoding audio track");

    let file = std::fs::File::open(file_path)?;
    let mss = MediaSourceStream::new(Box::new(file), Default::default());

    let mut hint = Hint::new();
    if let Some(extension) = file_path.extension().and_then(|e| e.to_str()) {
        hint.with_extension(extension);
    }

    let probed = symphonia::default::get_probe()
        .format(&hint, mss, &FormatOptions::default(), &MetadataOptions::default())
        .map_err(|e| Error::Audio(format!("probe failed for {}: {}", file_path.display(), e)))?;

    let mut format = probed.format;

    let track = format
        .tracks()
        .iter()
        .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
        .ok_or_else(|| Error::Audio(format!("no audio track in {}", file_path.display())))?;

    let track_id = track.id;
    let sample_rate = track
        .codec_params
        .sample_rate
        .ok_or_else(|| Error::Audio("sample rate unknown".to_string()))?;
    let channels = track
        .codec_params
        .channels
        .ok_or_else(|| Error::Audio("channel layout unknown".to_string()))?
        .count();

    let mut decoder = symphonia::default::get_codecs()
        .make(&track.codec_params, &DecoderOptions::default())
        .map_err(|e| Error::Audio(format!("decoder init failed: {}", e)))?;

    let mut samples: Vec<f32> = Vec::new();

    loop {
        let packet = match format.next_packet() {
            Ok(packet) => packet,
            Err(symphonia::core::errors::Error::IoError(e))
                if e.kind() == std::io::ErrorKind::UnexpectedEof =>
            {
                break;
            }
            Err(e) => return Err(Error::Audio(format!("packet read failed: {}", e))),
        };

        if packet.track_id() != track_id {
            continue;
        }

        let decoded = decoder
            .decode(&packet)
            .map_err(|e| Error::Audio(format!("decode failed: {}", e)))?;
        append_mono(&decoded, &mut samples);
    }

    tracing::debug!(
        path = %file_path.display(),
        sample_rate,
        channels,
        total_samples = samples.len(),
        "Audio decoding complete"
    );

    Ok(DecodedAudio {
        samples,
        sample_rate,
        channels,
    })
}

/// Mix one decoded buffer down to mono and append to `out`.
fn append_mono(decoded: &AudioBufferRef, out: &mut Vec<f32>) {
    match decoded {
        AudioBufferRef::U8(buf) => mix_buffer(buf, out),
        AudioBufferRef::U16(buf) => mix_buffer(buf, out),
        AudioBufferRef::U24(buf) => mix_buffer(buf, out),
        AudioBufferRef::U32(buf) => mix_buffer(buf, out),
        AudioBufferRef::S8(buf) => mix_buffer(buf, out),
        AudioBufferRef::S16(buf) => mix_buffer(buf, out),
        AudioBufferRef::S24(buf) => mix_buffer(buf, out),
        AudioBufferRef::S32(buf) => mix_buffer(buf, out),
        AudioBufferRef::F32(buf) => mix_buffer(buf, out),
        AudioBufferRef::F64(buf) => mix_buffer(buf, out),
    }
}

/// Average all channels of a typed buffer into mono f32.
fn mix_buffer<S>(buf: &AudioBuffer<S>, out: &mut Vec<f32>)
where
    S: Sample,
    f32: FromSample<S>,
{
    let channels = buf.spec().channels.count();
    let frames = buf.frames();
    out.reserve(frames);

    for frame in 0..frames {
        let mut sum = 0.0f32;
        for ch in 0..channels {
            sum += f32::from_sample(buf.chan(ch)[frame]);
        }
        out.push(sum / channels as f32);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_file_is_an_error() {
        let result = decode_audio_track(Path::new("/nonexistent/interview.mp4"));
        assert!(result.is_err());
    }

    #[test]
    fn test_decodes_wav_to_mono() {
        // stereo 16-bit WAV with left=0.5, right=-0.5 averages to ~0
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stereo.wav");
        let spec = hound::WavSpec {
            channels: 2,
            sample_rate: 16_000,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::create(&path, spec).unwrap();
        for _ in 0..1600 {
            writer.write_sample((0.5f32 * i16::MAX as f32) as i16).unwrap();
            writer.write_sample((-0.5f32 * i16::MAX as f32) as i16).unwrap();
        }
        writer.finalize().unwrap();

        let decoded = decode_audio_track(&path).unwrap();
        assert_eq!(decoded.sample_rate, 16_000);
        assert_eq!(decoded.channels, 2);
        assert_eq!(decoded.samples.len(), 1600);
        for &sample in &decoded.samples {
            assert!(sample.abs() < 0.01, "expected near-zero mono mix, got {}", sample);
        }
    }
}
