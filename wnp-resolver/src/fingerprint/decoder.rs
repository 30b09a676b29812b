//! Audio decoding for fingerprinting
//!
//! Uses symphonia for format-agnostic decoding (MP3, FLAC, AAC, WAV, OGG...)
//! and downmixes to mono f32. Decoding stops once `max_seconds` of audio
//! has been collected.

use crate::error::ResolveError;
use std::path::Path;
use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use tracing::debug;

/// Decoded mono audio
#[derive(Debug, Clone)]
pub struct AudioSamples {
    /// Mono samples in [-1.0, 1.0]
    pub samples: Vec<f32>,
    pub sample_rate: u32,
}

impl AudioSamples {
    pub fn duration_seconds(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.samples.len() as f64 / self.sample_rate as f64
    }
}

fn unreadable(path: &Path, what: &str, e: impl std::fmt::Display) -> ResolveError {
    ResolveError::UnreadableMedia(format!("{} {}: {}", what, path.display(), e))
}

/// Decode up to `max_seconds` of a file to mono f32 samples (blocking)
pub fn decode_file(path: &Path, max_seconds: u32) -> Result<AudioSamples, ResolveError> {
    debug!(path = %path.display(), "Decoding audio for fingerprint");

    let file = std::fs::File::open(path).map_err(|e| unreadable(path, "Failed to open", e))?;
    let mss = MediaSourceStream::new(Box::new(file), Default::default());

    let mut hint = Hint::new();
    if let Some(extension) = path.extension().and_then(|e| e.to_str()) {
        hint.with_extension(extension);
    }

    let probed = symphonia::default::get_probe()
        .format(&hint, mss, &FormatOptions::default(), &MetadataOptions::default())
        .map_err(|e| unreadable(path, "Failed to probe", e))?;
    let mut format = probed.format;

    let track = format
        .tracks()
        .iter()
        .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
        .ok_or_else(|| ResolveError::UnreadableMedia(format!("No audio track in {}", path.display())))?;
    let track_id = track.id;
    let sample_rate = track
        .codec_params
        .sample_rate
        .ok_or_else(|| ResolveError::UnreadableMedia(format!("Unknown sample rate in {}", path.display())))?;

    let mut decoder = symphonia::default::get_codecs()
        .make(&track.codec_params, &DecoderOptions::default())
        .map_err(|e| unreadable(path, "No decoder for", e))?;

    let limit = sample_rate as usize * max_seconds as usize;
    let mut samples: Vec<f32> = Vec::with_capacity(limit.min(sample_rate as usize * 30));
    let mut buffer: Option<SampleBuffer<f32>> = None;

    while samples.len() < limit {
        let packet = match format.next_packet() {
            Ok(packet) => packet,
            Err(SymphoniaError::IoError(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => break,
            Err(e) => return Err(unreadable(path, "Error reading packet in", e)),
        };
        if packet.track_id() != track_id {
            continue;
        }

        let decoded = match decoder.decode(&packet) {
            Ok(decoded) => decoded,
            // Recoverable corruption: skip the packet
            Err(SymphoniaError::DecodeError(e)) => {
                debug!(path = %path.display(), "Skipping undecodable packet: {}", e);
                continue;
            }
            Err(e) => return Err(unreadable(path, "Failed to decode", e)),
        };

        let spec = *decoded.spec();
        let channels = spec.channels.count().max(1);
        let needed = decoded.capacity() * channels;
        if buffer.as_ref().map_or(true, |b| b.capacity() < needed) {
            buffer = Some(SampleBuffer::<f32>::new(decoded.capacity() as u64, spec));
        }
        if let Some(buf) = buffer.as_mut() {
            buf.copy_interleaved_ref(decoded);
            downmix_into(buf.samples(), channels, &mut samples);
        }
    }

    samples.truncate(limit);
    debug!(
        path = %path.display(),
        sample_rate,
        seconds = samples.len() as f64 / sample_rate as f64,
        "Decoded audio"
    );

    Ok(AudioSamples {
        samples,
        sample_rate,
    })
}

/// Average interleaved frames to mono
pub fn downmix_into(interleaved: &[f32], channels: usize, out: &mut Vec<f32>) {
    if channels <= 1 {
        out.extend_from_slice(interleaved);
        return;
    }
    out.extend(
        interleaved
            .chunks_exact(channels)
            .map(|frame| frame.iter().sum::<f32>() / channels as f32),
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_downmix_stereo() {
        let mut out = Vec::new();
        downmix_into(&[1.0, 0.0, 0.5, 0.5, -1.0, 1.0], 2, &mut out);
        assert_eq!(out, vec![0.5, 0.5, 0.0]);
    }

    #[test]
    fn test_downmix_mono_passthrough() {
        let mut out = vec![0.25];
        downmix_into(&[0.1, 0.2], 1, &mut out);
        assert_eq!(out, vec![0.25, 0.1, 0.2]);
    }

    #[test]
    fn test_decode_wav_is_capped() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tone.wav");
        let spec = hound::WavSpec {
            channels: 2,
            sample_rate: 8000,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::create(&path, spec).unwrap();
        for i in 0..(8000 * 3) {
            let v = ((i as f32 * 0.05).sin() * 10_000.0) as i16;
            writer.write_sample(v).unwrap();
            writer.write_sample(v).unwrap();
        }
        writer.finalize().unwrap();

        let audio = decode_file(&path, 2).unwrap();
        assert_eq!(audio.sample_rate, 8000);
        assert_eq!(audio.samples.len(), 16_000);
        assert!((audio.duration_seconds() - 2.0).abs() < 1e-9);
    }

    #[test]
    fn test_decode_garbage_is_unreadable() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("junk.flac");
        std::fs::write(&path, b"not a flac file").unwrap();
        assert!(matches!(decode_file(&path, 10), Err(ResolveError::UnreadableMedia(_))));
    }
}
