//! # Speech Recognition
//!
//! Recognition never fails the pipeline: an engine crash, a missing binary and
//! "no speech in this audio" all come back as `Recognition::Failed`, which the
//! orchestrator turns into an empty result.

use async_trait::async_trait;
use serde::Deserialize;
use std::fmt;
use std::path::PathBuf;
use tokio::process::Command;
use tokio::sync::Semaphore;

use crate::audio::transcode::encode_wav;
use crate::engines::{run_command, stderr_summary};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecognitionFailure {
    /// The engine ran but heard nothing (silence, `[BLANK_AUDIO]`, ...)
    NoSpeech,
    /// The engine could not run or produced unusable output
    Engine(String),
}

impl fmt::Display for RecognitionFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecognitionFailure::NoSpeech => write!(f, "no speech recognised"),
            RecognitionFailure::Engine(msg) => write!(f, "recognition engine failed: {}", msg),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Recognition {
    Text(String),
    Failed(RecognitionFailure),
}

impl Recognition {
    /// Usable transcript, if any. Whitespace-only text counts as none.
    pub fn text(&self) -> Option<&str> {
        match self {
            Recognition::Text(text) if !text.trim().is_empty() => Some(text.trim()),
            _ => None,
        }
    }
}

#[async_trait]
pub trait Recognizer: Send + Sync {
    /// Transcribe canonical mono 16 kHz PCM. `lang` is a hint for the engine.
    async fn transcribe(&self, pcm: &[i16], lang: &str) -> Recognition;
}

/// whisper.cpp `whisper-cli` driven through a scratch WAV file.
pub struct WhisperCliRecognizer {
    binary: PathBuf,
    model: PathBuf,
    permits: Semaphore,
}

impl WhisperCliRecognizer {
    pub fn new(binary: PathBuf, model: PathBuf, max_concurrent: usize) -> Self {
        Self {
            binary,
            model,
            permits: Semaphore::new(max_concurrent.max(1)),
        }
    }

    async fn run(&self, pcm: &[i16], lang: &str) -> Result<Recognition, String> {
        let scratch = tempfile::Builder::new()
            .prefix("voice-bridge-asr-")
            .tempdir()
            .map_err(|e| e.to_string())?;
        let audio_path = scratch.path().join("utterance.wav");
        let json_path = scratch.path().join("utterance.wav.json");

        let wav = encode_wav(pcm).map_err(|e| e.to_string())?;
        tokio::fs::write(&audio_path, wav)
            .await
            .map_err(|e| e.to_string())?;

        let mut command = Command::new(&self.binary);
        command
            .arg("-m")
            .arg(&self.model)
            .arg("-f")
            .arg(&audio_path)
            .args(["-l", lang, "-nt", "-oj"]);

        let output = run_command(command, None)
            .await
            .map_err(|e| format!("failed to run {}: {}", self.binary.display(), e))?;
        if !output.status.success() {
            return Err(stderr_summary(&output));
        }

        let json = tokio::fs::read_to_string(&json_path)
            .await
            .map_err(|e| format!("whisper output missing: {}", e))?;
        Ok(parse_whisper_json(&json))
    }
}

#[async_trait]
impl Recognizer for WhisperCliRecognizer {
    async fn transcribe(&self, pcm: &[i16], lang: &str) -> Recognition {
        let _permit = match self.permits.acquire().await {
            Ok(permit) => permit,
            Err(_) => {
                return Recognition::Failed(RecognitionFailure::Engine(
                    "recognizer shut down".to_string(),
                ))
            }
        };

        match self.run(pcm, lang).await {
            Ok(recognition) => recognition,
            Err(message) => {
                tracing::warn!(error = %message, "whisper-cli failed");
                Recognition::Failed(RecognitionFailure::Engine(message))
            }
        }
    }
}

#[derive(Debug, Deserialize)]
struct WhisperOutput {
    #[serde(default)]
    transcription: Vec<WhisperSegment>,
}

#[derive(Debug, Deserialize)]
struct WhisperSegment {
    text: String,
}

/// Parse whisper-cli `-oj` output.
///
/// Bracketed whisper annotations such as `[BLANK_AUDIO]` or `[Music]` are
/// treated as "no speech".
pub fn parse_whisper_json(json: &str) -> Recognition {
    let output: WhisperOutput = match serde_json::from_str(json) {
        Ok(output) => output,
        Err(e) => {
            return Recognition::Failed(RecognitionFailure::Engine(format!(
                "unreadable whisper output: {}",
                e
            )))
        }
    };

    let text = output
        .transcription
        .iter()
        .map(|segment| segment.text.trim())
        .filter(|text| !text.is_empty())
        .collect::<Vec<_>>()
        .join(" ");

    if text.is_empty() || text.starts_with('[') {
        Recognition::Failed(RecognitionFailure::NoSpeech)
    } else {
        Recognition::Text(text)
    }
}
