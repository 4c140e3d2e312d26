//! # Audio Processing
//!
//! Everything between the raw bytes a client sends and the samples a pipeline
//! run consumes.
//!
//! ## Components:
//! - **transcode**: raw PCM / WAV → canonical mono 16 kHz 16-bit samples
//! - **buffer**: bounded per-participant sample store
//! - **vad**: energy-based utterance segmentation with push-to-talk
//!
//! ## Canonical Format:
//! - **Sample Rate**: 16kHz (16,000 Hz)
//! - **Bit Depth**: 16-bit PCM
//! - **Channels**: Mono (1 channel)
//! - **Encoding**: Little-endian signed integers

pub mod buffer;
pub mod transcode;
pub mod vad;
