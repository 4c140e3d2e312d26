//! # Pipeline Orchestrator
//!
//! Runs one utterance through recognition → translation → synthesis.
//!
//! ## Failure isolation:
//! - **Recognition failure or empty text**: `Ok` with empty text and no audio
//! - **Translation / synthesis failure**: `Err(PipelineError)`, for the speaker only
//! - **Timeout**: the whole run is bounded; engine processes are killed on expiry
//!
//! The orchestrator holds no per-session state. Callers enforce one run per
//! session; independent sessions call `process` concurrently.

use chrono::{DateTime, Utc};
use std::time::{Duration, Instant};
use tracing::Instrument;
use uuid::Uuid;

use crate::audio::vad::{FlushTrigger, Segment};
use crate::engines::{Engines, Recognition};
use crate::error::{PipelineError, TranslationError};
use crate::pipeline::chunking::chunk_text;

/// An immutable snapshot of one flushed segment, consumed once by the pipeline.
#[derive(Debug, Clone)]
pub struct Utterance {
    pub id: Uuid,
    pub samples: Vec<i16>,
    pub source_lang: String,
    pub target_lang: String,
    pub trigger: FlushTrigger,
    pub captured_at: DateTime<Utc>,
}

impl Utterance {
    pub fn new(segment: Segment, source_lang: &str, target_lang: &str) -> Self {
        Self {
            id: Uuid::new_v4(),
            samples: segment.samples,
            source_lang: source_lang.to_string(),
            target_lang: target_lang.to_string(),
            trigger: segment.trigger,
            captured_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PipelineResult {
    pub source_text: String,
    pub translated_text: String,
    /// Absent when nothing was synthesized
    pub audio_bytes: Option<Vec<u8>>,
    pub target_lang: String,
}

impl PipelineResult {
    fn empty(target_lang: &str) -> Self {
        Self {
            source_text: String::new(),
            translated_text: String::new(),
            audio_bytes: None,
            target_lang: target_lang.to_string(),
        }
    }

    /// Nothing to deliver: recognition produced no usable text.
    pub fn is_empty(&self) -> bool {
        self.audio_bytes.is_none() && self.translated_text.is_empty()
    }
}

pub struct PipelineOrchestrator {
    engines: Engines,
    chunk_threshold: usize,
}

impl PipelineOrchestrator {
    pub fn new(engines: Engines, chunk_threshold: usize) -> Self {
        Self {
            engines,
            chunk_threshold: chunk_threshold.max(1),
        }
    }

    pub fn engines(&self) -> &Engines {
        &self.engines
    }

    /// `process` bounded by `timeout`.
    pub async fn process_within(
        &self,
        utterance: &Utterance,
        timeout: Duration,
    ) -> Result<PipelineResult, PipelineError> {
        tokio::time::timeout(timeout, self.process(utterance))
            .await
            .map_err(|_| PipelineError::Timeout(timeout))?
    }

    pub async fn process(&self, utterance: &Utterance) -> Result<PipelineResult, PipelineError> {
        let span = tracing::debug_span!(
            "pipeline",
            utterance_id = %utterance.id,
            from = %utterance.source_lang,
            to = %utterance.target_lang,
        );
        self.run(utterance).instrument(span).await
    }

    async fn run(&self, utterance: &Utterance) -> Result<PipelineResult, PipelineError> {
        let started = Instant::now();
        let recognition = self
            .engines
            .recognizer
            .transcribe(&utterance.samples, &utterance.source_lang)
            .await;

        let source_text = match &recognition {
            Recognition::Failed(failure) => {
                tracing::info!(
                    samples = utterance.samples.len(),
                    reason = %failure,
                    "Recognition produced no text"
                );
                return Ok(PipelineResult::empty(&utterance.target_lang));
            }
            Recognition::Text(_) => match recognition.text() {
                Some(text) => text.to_string(),
                None => {
                    tracing::info!("Recognition returned empty text");
                    return Ok(PipelineResult::empty(&utterance.target_lang));
                }
            },
        };
        let asr_ms = started.elapsed().as_millis() as u64;

        let translated_text = self
            .translate_text(&source_text, &utterance.source_lang, &utterance.target_lang)
            .await?;
        let mt_ms = started.elapsed().as_millis() as u64 - asr_ms;

        let audio = self
            .engines
            .synthesizer
            .synthesize(&translated_text, &utterance.target_lang)
            .await?;

        tracing::info!(
            source = %source_text,
            translated = %translated_text,
            asr_ms,
            mt_ms,
            total_ms = started.elapsed().as_millis() as u64,
            "Pipeline run complete"
        );

        Ok(PipelineResult {
            source_text,
            translated_text,
            audio_bytes: Some(audio),
            target_lang: utterance.target_lang.clone(),
        })
    }

    /// Translate text, in sentence chunks when it exceeds the chunk threshold.
    pub async fn translate_text(
        &self,
        text: &str,
        from: &str,
        to: &str,
    ) -> Result<String, TranslationError> {
        if from == to {
            return Ok(text.to_string());
        }

        let chunks = chunk_text(text, self.chunk_threshold);
        if chunks.len() > 1 {
            tracing::debug!(chunks = chunks.len(), "Translating in sentence chunks");
        }

        let mut translated = String::with_capacity(text.len());
        for chunk in &chunks {
            let piece = self.engines.translator.translate(&chunk.text, from, to).await?;
            translated.push_str(piece.trim());
            translated.push_str(&chunk.separator);
        }
        Ok(translated)
    }

    /// Make sure the configured translation pairs are installed and loaded.
    ///
    /// Missing pairs are installed when `install_missing` is set, otherwise
    /// only reported. Returns how many pairs are ready.
    pub async fn warm_up(&self, pairs: &[(String, String)], install_missing: bool) -> usize {
        let translator = &self.engines.translator;
        let mut ready = 0;

        for (from, to) in pairs {
            match translator.is_pair_installed(from, to).await {
                Ok(true) => {}
                Ok(false) if install_missing => {
                    tracing::info!(from = %from, to = %to, "Installing translation pair");
                    if let Err(e) = translator.install_pair(from, to).await {
                        tracing::warn!(from = %from, to = %to, error = %e, "Could not install pair");
                        continue;
                    }
                }
                Ok(false) => {
                    tracing::warn!(from = %from, to = %to, "Translation pair not installed");
                    continue;
                }
                Err(e) => {
                    tracing::warn!(from = %from, to = %to, error = %e, "Could not query pair");
                    continue;
                }
            }

            match translator.translate("1", from, to).await {
                Ok(_) => {
                    tracing::debug!(from = %from, to = %to, "Warmed up translation pair");
                    ready += 1;
                }
                Err(e) => {
                    tracing::warn!(from = %from, to = %to, error = %e, "Warm-up failed")
                }
            }
        }

        ready
    }
}
