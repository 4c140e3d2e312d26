//! # Audio Buffer
//!
//! Bounded, append-only store of canonical PCM (mono, 16 kHz, 16-bit) for one
//! participant. The buffer is owned by the participant's voice-activity detector
//! and mutated only from that participant's actor, so it needs no locking.
//!
//! ## Key Features:
//! - **Bounded**: never holds more than `max_samples`; callers split input at `remaining()`
//! - **PCM decoding**: little-endian 16-bit bytes to `i16` samples
//! - **Take semantics**: a flush moves the samples out and leaves the buffer empty

use byteorder::{LittleEndian, ReadBytesExt};
use std::io::Cursor;

use crate::error::AudioFormatError;

/// Canonical sample rate used everywhere past the transcoder.
pub const CANONICAL_SAMPLE_RATE: u32 = 16_000;

/// Decode raw little-endian 16-bit PCM bytes into samples.
///
/// ## Returns:
/// - **Err(Empty)** for an empty payload
/// - **Err(OddLength)** when the byte count is not a whole number of samples
pub fn decode_pcm16le(data: &[u8]) -> Result<Vec<i16>, AudioFormatError> {
    if data.is_empty() {
        return Err(AudioFormatError::Empty);
    }
    if data.len() % 2 != 0 {
        return Err(AudioFormatError::OddLength(data.len()));
    }

    let mut cursor = Cursor::new(data);
    let mut samples = Vec::with_capacity(data.len() / 2);
    while let Ok(sample) = cursor.read_i16::<LittleEndian>() {
        samples.push(sample);
    }
    Ok(samples)
}

#[derive(Debug)]
pub struct AudioBuffer {
    samples: Vec<i16>,
    max_samples: usize,
}

impl AudioBuffer {
    pub fn new(max_samples: usize) -> Self {
        Self {
            samples: Vec::new(),
            max_samples,
        }
    }

    /// Append as many samples as fit and return how many were accepted.
    ///
    /// The buffer never grows past its bound; the caller decides what to do
    /// with the rejected tail (the detector flushes and re-ingests it).
    pub fn append(&mut self, samples: &[i16]) -> usize {
        let accepted = samples.len().min(self.remaining());
        self.samples.extend_from_slice(&samples[..accepted]);
        accepted
    }

    /// Move the first `len` samples out and clear the buffer.
    pub fn take_prefix(&mut self, len: usize) -> Vec<i16> {
        let len = len.min(self.samples.len());
        let mut taken = std::mem::take(&mut self.samples);
        taken.truncate(len);
        taken
    }

    pub fn remaining(&self) -> usize {
        self.max_samples.saturating_sub(self.samples.len())
    }

    pub fn is_full(&self) -> bool {
        self.samples.len() >= self.max_samples
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn clear(&mut self) {
        self.samples.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_pcm16le() {
        let bytes = [0x01, 0x00, 0xff, 0xff, 0x00, 0x80];
        assert_eq!(decode_pcm16le(&bytes).unwrap(), vec![1, -1, i16::MIN]);
    }

    #[test]
    fn test_decode_rejects_bad_lengths() {
        assert!(matches!(decode_pcm16le(&[]), Err(AudioFormatError::Empty)));
        assert!(matches!(
            decode_pcm16le(&[0, 1, 2]),
            Err(AudioFormatError::OddLength(3))
        ));
    }

    #[test]
    fn test_append_respects_bound() {
        let mut buffer = AudioBuffer::new(5);
        assert_eq!(buffer.append(&[1, 2, 3]), 3);
        assert_eq!(buffer.append(&[4, 5, 6, 7]), 2);
        assert!(buffer.is_full());
        assert_eq!(buffer.len(), 5);
        assert_eq!(buffer.append(&[8]), 0);
    }

    #[test]
    fn test_take_prefix_clears() {
        let mut buffer = AudioBuffer::new(10);
        buffer.append(&[1, 2, 3, 4]);
        assert_eq!(buffer.take_prefix(2), vec![1, 2]);
        assert!(buffer.is_empty());
        assert_eq!(buffer.remaining(), 10);
    }
}
