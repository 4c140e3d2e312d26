//! # Voice Activity Detection
//!
//! Segments one participant's continuous audio stream into utterances.
//!
//! ## Segmentation rules:
//! - Frames are classified by RMS energy against `energy_threshold`
//! - Leading silence is never buffered; capture starts at the first voiced frame
//! - **Silence flush**: trailing silence reaches `silence_samples` and at least
//!   `min_speech_samples` of voiced audio were captured. The utterance spans the
//!   first voiced frame to the last voiced frame.
//! - Shorter bursts followed by the same silence are discarded
//! - **Forced flush**: the buffer reaches `max_samples`; oversized frames are split
//!   so the buffer never exceeds the bound. Speech running on past a forced flush
//!   is flushed at the next silence boundary however short it is.
//! - **Manual flush**: push-to-talk buffers everything between `start_manual` and
//!   `stop_manual`, regardless of energy
//!
//! All timing is measured in samples, never wall clock, so the same input always
//! produces the same segments.

use serde::Serialize;

use crate::audio::buffer::{AudioBuffer, CANONICAL_SAMPLE_RATE};

#[derive(Debug, Clone, PartialEq)]
pub struct VadConfig {
    pub energy_threshold: f64,
    pub silence_samples: usize,
    pub min_speech_samples: usize,
    pub max_samples: usize,
}

impl Default for VadConfig {
    fn default() -> Self {
        let rate = CANONICAL_SAMPLE_RATE as usize;
        Self {
            energy_threshold: 200.0,
            silence_samples: rate * 12 / 10,
            min_speech_samples: rate / 2,
            max_samples: rate * 20,
        }
    }
}

/// What closed an utterance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FlushTrigger {
    Silence,
    Forced,
    Manual,
}

/// Samples of one closed utterance, ready to become a pipeline input.
#[derive(Debug, Clone, PartialEq)]
pub struct Segment {
    pub samples: Vec<i16>,
    pub trigger: FlushTrigger,
}

impl Segment {
    pub fn duration_seconds(&self) -> f64 {
        self.samples.len() as f64 / CANONICAL_SAMPLE_RATE as f64
    }
}

/// Root-mean-square energy of a frame.
pub fn rms(samples: &[i16]) -> f64 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum: f64 = samples.iter().map(|&s| (s as f64) * (s as f64)).sum();
    (sum / samples.len() as f64).sqrt()
}

#[derive(Debug)]
pub struct VoiceActivityDetector {
    config: VadConfig,
    buffer: AudioBuffer,
    in_speech: bool,
    manual: bool,
    /// Buffer length right after the last voiced frame
    speech_end: usize,
    voiced_samples: usize,
    trailing_silence: usize,
    /// Set by a forced flush until the speech it cut off ends
    continuation: bool,
}

impl VoiceActivityDetector {
    pub fn new(config: VadConfig) -> Self {
        let buffer = AudioBuffer::new(config.max_samples.max(1));
        Self {
            config,
            buffer,
            in_speech: false,
            manual: false,
            speech_end: 0,
            voiced_samples: 0,
            trailing_silence: 0,
            continuation: false,
        }
    }

    /// Feed one frame of canonical samples; returns every utterance it closed.
    pub fn ingest(&mut self, frame: &[i16]) -> Vec<Segment> {
        let mut segments = Vec::new();
        let mut rest = frame;

        while !rest.is_empty() {
            let room = self.buffer.remaining().max(1);
            let (chunk, tail) = rest.split_at(rest.len().min(room));
            if let Some(segment) = self.ingest_chunk(chunk) {
                segments.push(segment);
            }
            rest = tail;
        }

        segments
    }

    fn ingest_chunk(&mut self, chunk: &[i16]) -> Option<Segment> {
        if self.manual {
            self.buffer.append(chunk);
            self.speech_end = self.buffer.len();
            if self.buffer.is_full() {
                return Some(self.flush(FlushTrigger::Forced));
            }
            return None;
        }

        let voiced = rms(chunk) >= self.config.energy_threshold;
        if !self.in_speech {
            if !voiced {
                if self.continuation {
                    self.trailing_silence += chunk.len();
                    if self.trailing_silence >= self.config.silence_samples {
                        self.continuation = false;
                        self.trailing_silence = 0;
                    }
                }
                return None;
            }
            self.trailing_silence = 0;
            self.in_speech = true;
        }

        self.buffer.append(chunk);

        if voiced {
            self.speech_end = self.buffer.len();
            self.voiced_samples += chunk.len();
            self.trailing_silence = 0;
        } else {
            self.trailing_silence += chunk.len();
            if self.trailing_silence >= self.config.silence_samples {
                if self.continuation || self.voiced_samples >= self.config.min_speech_samples {
                    return Some(self.flush(FlushTrigger::Silence));
                }
                tracing::trace!(
                    voiced_samples = self.voiced_samples,
                    "Discarding speech burst shorter than minimum"
                );
                self.reset_capture();
                return None;
            }
        }

        if self.buffer.is_full() {
            return Some(self.flush(FlushTrigger::Forced));
        }

        None
    }

    /// Begin push-to-talk capture. Audio already captured is kept.
    pub fn start_manual(&mut self) {
        self.manual = true;
        self.in_speech = true;
        self.trailing_silence = 0;
    }

    /// End push-to-talk capture and flush whatever was buffered.
    pub fn stop_manual(&mut self) -> Option<Segment> {
        if !self.manual {
            return None;
        }
        self.manual = false;
        if self.buffer.is_empty() {
            self.reset_capture();
            return None;
        }
        self.speech_end = self.buffer.len();
        Some(self.flush(FlushTrigger::Manual))
    }

    fn flush(&mut self, trigger: FlushTrigger) -> Segment {
        let samples = self.buffer.take_prefix(self.speech_end);
        self.reset_capture();
        self.continuation = trigger == FlushTrigger::Forced && !self.manual;
        Segment { samples, trigger }
    }

    fn reset_capture(&mut self) {
        self.buffer.clear();
        self.in_speech = self.manual;
        self.speech_end = 0;
        self.voiced_samples = 0;
        self.trailing_silence = 0;
        self.continuation = false;
    }

    /// Drop all buffered audio and leave push-to-talk mode.
    pub fn reset(&mut self) {
        self.manual = false;
        self.reset_capture();
    }

    pub fn is_manual(&self) -> bool {
        self.manual
    }

    pub fn buffered_samples(&self) -> usize {
        self.buffer.len()
    }
}
