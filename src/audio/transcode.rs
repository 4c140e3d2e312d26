//! # Audio Transcoding
//!
//! Turns whatever the client sends into canonical PCM (mono, 16 kHz, 16-bit)
//! and back into a WAV container for the engines that want files.
//!
//! ## Accepted input:
//! - **Raw PCM**: little-endian 16-bit mono at 16 kHz, passed through
//! - **WAV**: any `RIFF` container with 8/16/24-bit integer or 32-bit float samples,
//!   down-mixed to mono and linearly resampled to 16 kHz

use std::io::Cursor;

use crate::audio::buffer::{decode_pcm16le, CANONICAL_SAMPLE_RATE};
use crate::error::AudioFormatError;

/// Converts an inbound payload into canonical samples.
pub trait Transcoder: Send + Sync {
    fn to_canonical(&self, raw: &[u8]) -> Result<Vec<i16>, AudioFormatError>;
}

/// Default transcoder: sniffs a `RIFF` header, otherwise treats bytes as raw PCM.
#[derive(Debug, Default, Clone, Copy)]
pub struct PcmTranscoder;

impl Transcoder for PcmTranscoder {
    fn to_canonical(&self, raw: &[u8]) -> Result<Vec<i16>, AudioFormatError> {
        if is_wav(raw) {
            decode_wav(raw)
        } else {
            decode_pcm16le(raw)
        }
    }
}

pub fn is_wav(raw: &[u8]) -> bool {
    raw.len() >= 12 && &raw[0..4] == b"RIFF" && &raw[8..12] == b"WAVE"
}

/// Decode a WAV container into canonical samples.
pub fn decode_wav(raw: &[u8]) -> Result<Vec<i16>, AudioFormatError> {
    let mut cursor = Cursor::new(raw);
    let (header, data) = wav::read(&mut cursor)?;

    let interleaved: Vec<i16> = match data {
        wav::BitDepth::Eight(samples) => samples
            .into_iter()
            .map(|s| ((s as i16) - 128) << 8)
            .collect(),
        wav::BitDepth::Sixteen(samples) => samples,
        wav::BitDepth::TwentyFour(samples) => {
            samples.into_iter().map(|s| (s >> 8) as i16).collect()
        }
        wav::BitDepth::ThirtyTwoFloat(samples) => samples
            .into_iter()
            .map(|s| (s.clamp(-1.0, 1.0) * i16::MAX as f32) as i16)
            .collect(),
        wav::BitDepth::Empty => {
            return Err(AudioFormatError::UnsupportedEncoding(format!(
                "format tag {} with {} bits per sample",
                header.audio_format, header.bits_per_sample
            )))
        }
    };

    if interleaved.is_empty() {
        return Err(AudioFormatError::Empty);
    }

    let mono = downmix(&interleaved, header.channel_count);
    Ok(resample(&mono, header.sampling_rate, CANONICAL_SAMPLE_RATE))
}

/// Wrap canonical samples in a 16 kHz mono 16-bit WAV container.
pub fn encode_wav(samples: &[i16]) -> Result<Vec<u8>, AudioFormatError> {
    let header = wav::Header::new(wav::WAV_FORMAT_PCM, 1, CANONICAL_SAMPLE_RATE, 16);
    let mut cursor = Cursor::new(Vec::new());
    wav::write(
        header,
        &wav::BitDepth::Sixteen(samples.to_vec()),
        &mut cursor,
    )?;
    Ok(cursor.into_inner())
}

fn downmix(interleaved: &[i16], channels: u16) -> Vec<i16> {
    if channels <= 1 {
        return interleaved.to_vec();
    }
    interleaved
        .chunks_exact(channels as usize)
        .map(|frame| {
            let sum: i32 = frame.iter().map(|&s| s as i32).sum();
            (sum / channels as i32) as i16
        })
        .collect()
}

/// Linear interpolation resampling.
fn resample(samples: &[i16], from_rate: u32, to_rate: u32) -> Vec<i16> {
    if from_rate == to_rate || samples.is_empty() || from_rate == 0 {
        return samples.to_vec();
    }

    let ratio = from_rate as f64 / to_rate as f64;
    let output_len = (samples.len() as f64 / ratio).ceil() as usize;

    (0..output_len)
        .map(|i| {
            let position = i as f64 * ratio;
            let index = (position.floor() as usize).min(samples.len() - 1);
            let fraction = position - index as f64;

            match samples.get(index + 1) {
                Some(&next) => {
                    let current = samples[index] as f64;
                    (current + (next as f64 - current) * fraction) as i16
                }
                None => samples[index],
            }
        })
        .collect()
}
