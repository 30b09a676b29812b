//! Chromaprint fingerprint computation and AcoustID wire encoding
//!
//! Samples are resampled to 11025 Hz mono (linear interpolation) and fed to
//! `rusty-chromaprint` with the default (TEST2) configuration. The raw
//! sub-fingerprints are compressed the way libchromaprint does and encoded as
//! unpadded URL-safe base64, which is what the AcoustID lookup API expects.

use super::decoder::AudioSamples;
use crate::error::ResolveError;
use crate::types::Fingerprint;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use rusty_chromaprint::{Configuration, Fingerprinter};
use sha2::{Digest, Sha256};
use std::time::Duration;

/// Sample rate chromaprint works at
pub const FINGERPRINT_SAMPLE_RATE: u32 = 11025;

/// Algorithm id written in the compressed header (TEST2)
pub const ALGORITHM_TEST2: u8 = 1;

const NORMAL_BITS: u32 = 3;
const EXCEPTION_BITS: u32 = 5;
const MAX_NORMAL_VALUE: u8 = (1 << NORMAL_BITS) - 1;

/// Compute the fingerprint of decoded audio (CPU bound; run on the blocking pool)
pub fn fingerprint_samples(audio: &AudioSamples) -> Result<Fingerprint, ResolveError> {
    let resampled = resample_linear(&audio.samples, audio.sample_rate, FINGERPRINT_SAMPLE_RATE);
    let pcm: Vec<i16> = resampled
        .iter()
        .map(|&s| (s.clamp(-1.0, 1.0) * 32767.0) as i16)
        .collect();

    let config = Configuration::preset_test2();
    let mut printer = Fingerprinter::new(&config);
    printer
        .start(FINGERPRINT_SAMPLE_RATE, 1)
        .map_err(|e| ResolveError::IdentificationUnavailable(format!("fingerprinter start failed: {:?}", e)))?;
    printer.consume(&pcm);
    printer.finish();

    let raw = printer.fingerprint();
    if raw.is_empty() {
        return Err(ResolveError::IdentificationUnavailable(
            "audio too short to fingerprint".to_string(),
        ));
    }

    Ok(Fingerprint {
        hash_digest: hash_digest(raw),
        duration: Duration::from_secs_f64(audio.duration_seconds()),
        encoded: encode_fingerprint(raw, ALGORITHM_TEST2),
    })
}

/// SHA-256 hex digest of the raw sub-fingerprints (little-endian words)
pub fn hash_digest(raw: &[u32]) -> String {
    let mut hasher = Sha256::new();
    for word in raw {
        hasher.update(word.to_le_bytes());
    }
    format!("{:x}", hasher.finalize())
}

/// Compressed, base64url-encoded fingerprint
pub fn encode_fingerprint(raw: &[u32], algorithm: u8) -> String {
    URL_SAFE_NO_PAD.encode(compress_fingerprint(raw, algorithm))
}

/// libchromaprint fingerprint compression
///
/// Each sub-fingerprint is XORed with its predecessor; the positions of its
/// set bits are written as deltas terminated by 0. Deltas are packed as 3-bit
/// values (capped at 7), followed by 5-bit overflow values for every delta ≥ 7.
pub fn compress_fingerprint(raw: &[u32], algorithm: u8) -> Vec<u8> {
    let size = raw.len();
    let mut deltas: Vec<u8> = Vec::with_capacity(size * 8);

    let mut previous = 0u32;
    for &word in raw {
        let mut x = word ^ previous;
        previous = word;

        let (mut bit, mut last_bit) = (1u8, 0u8);
        while x != 0 {
            if x & 1 != 0 {
                deltas.push(bit - last_bit);
                last_bit = bit;
            }
            x >>= 1;
            bit += 1;
        }
        deltas.push(0);
    }

    let mut out = vec![
        algorithm,
        ((size >> 16) & 0xff) as u8,
        ((size >> 8) & 0xff) as u8,
        (size & 0xff) as u8,
    ];

    let mut normal = BitWriter::default();
    for &d in &deltas {
        normal.write(d.min(MAX_NORMAL_VALUE) as u32, NORMAL_BITS);
    }
    out.extend(normal.finish());

    let mut exceptional = BitWriter::default();
    for &d in deltas.iter().filter(|&&d| d >= MAX_NORMAL_VALUE) {
        exceptional.write((d - MAX_NORMAL_VALUE) as u32, EXCEPTION_BITS);
    }
    out.extend(exceptional.finish());

    out
}

/// LSB-first bit packer
#[derive(Default)]
struct BitWriter {
    bytes: Vec<u8>,
    acc: u32,
    filled: u32,
}

impl BitWriter {
    fn write(&mut self, value: u32, bits: u32) {
        self.acc |= (value & ((1 << bits) - 1)) << self.filled;
        self.filled += bits;
        while self.filled >= 8 {
            self.bytes.push((self.acc & 0xff) as u8);
            self.acc >>= 8;
            self.filled -= 8;
        }
    }

    fn finish(mut self) -> Vec<u8> {
        if self.filled > 0 {
            self.bytes.push((self.acc & 0xff) as u8);
        }
        self.bytes
    }
}

/// Linear-interpolation resampler
pub fn resample_linear(samples: &[f32], from_rate: u32, to_rate: u32) -> Vec<f32> {
    if from_rate == to_rate || samples.is_empty() || from_rate == 0 {
        return samples.to_vec();
    }

    let ratio = to_rate as f64 / from_rate as f64;
    let output_len = (samples.len() as f64 * ratio).floor() as usize;
    let mut output = Vec::with_capacity(output_len);

    for i in 0..output_len {
        let src_pos = i as f64 / ratio;
        let src_idx = src_pos.floor() as usize;
        let frac = (src_pos - src_idx as f64) as f32;

        let sample = match (samples.get(src_idx), samples.get(src_idx + 1)) {
            (Some(a), Some(b)) => a * (1.0 - frac) + b * frac,
            (Some(a), None) => *a,
            _ => 0.0,
        };
        output.push(sample);
    }
    output
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compress_one_item_one_bit() {
        assert_eq!(compress_fingerprint(&[1], 0), vec![0, 0, 0, 1, 1]);
    }

    #[test]
    fn test_compress_one_item_three_bits() {
        assert_eq!(compress_fingerprint(&[7], 0), vec![0, 0, 0, 1, 73, 0]);
    }

    #[test]
    fn test_compress_exceptional_bits() {
        assert_eq!(compress_fingerprint(&[1 << 6], 0), vec![0, 0, 0, 1, 7, 0]);
        assert_eq!(compress_fingerprint(&[1 << 8], 0), vec![0, 0, 0, 1, 7, 2]);
    }

    #[test]
    fn test_compress_two_items() {
        assert_eq!(compress_fingerprint(&[1, 0], 0), vec![0, 0, 0, 2, 65, 0]);
        assert_eq!(compress_fingerprint(&[1, 1], 0), vec![0, 0, 0, 2, 1, 0]);
    }

    #[test]
    fn test_header_carries_algorithm_and_size() {
        let raw = vec![0u32; 300];
        let compressed = compress_fingerprint(&raw, ALGORITHM_TEST2);
        assert_eq!(&compressed[..4], &[1, 0, 1, 44]);
    }

    #[test]
    fn test_encoding_is_url_safe_unpadded() {
        let encoded = encode_fingerprint(&[0xdead_beef, 0x1234_5678, u32::MAX], ALGORITHM_TEST2);
        assert!(!encoded.contains('='));
        assert!(!encoded.contains('+'));
        assert!(!encoded.contains('/'));
    }

    #[test]
    fn test_hash_digest_is_stable_hex() {
        let a = hash_digest(&[1, 2, 3]);
        assert_eq!(a.len(), 64);
        assert_eq!(a, hash_digest(&[1, 2, 3]));
        assert_ne!(a, hash_digest(&[3, 2, 1]));
    }

    #[test]
    fn test_resample_halves_length() {
        let samples: Vec<f32> = (0..100).map(|i| i as f32).collect();
        let out = resample_linear(&samples, 22050, 11025);
        assert_eq!(out.len(), 50);
        assert_eq!(out[1], 2.0);
    }

    #[test]
    fn test_fingerprint_is_deterministic() {
        let sample_rate = 22050;
        let samples: Vec<f32> = (0..sample_rate * 10)
            .map(|i| {
                let t = i as f32 / sample_rate as f32;
                (t * 440.0 * std::f32::consts::TAU * (1.0 + t / 10.0)).sin() * 0.5
            })
            .collect();
        let audio = AudioSamples {
            samples,
            sample_rate: sample_rate as u32,
        };

        let first = fingerprint_samples(&audio).unwrap();
        let second = fingerprint_samples(&audio).unwrap();
        assert_eq!(first, second);
        assert_eq!(first.duration.as_secs(), 10);
        assert!(!first.encoded.is_empty());
    }

    #[test]
    fn test_silence_too_short() {
        let audio = AudioSamples {
            samples: vec![0.0; 100],
            sample_rate: 11025,
        };
        assert!(matches!(
            fingerprint_samples(&audio),
            Err(ResolveError::IdentificationUnavailable(_))
        ));
    }
}
