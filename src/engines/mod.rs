//! # External Engines
//!
//! Narrow contracts for the three engines a pipeline run needs, plus adapters
//! that drive the usual local command-line tools.
//!
//! ## Contracts:
//! - **Recognizer**: canonical PCM → `Recognition` (never an error)
//! - **Translator**: text between two language codes, plus pair provisioning
//! - **Synthesizer**: text → WAV bytes in the voice bound to a language
//!
//! ## Adapters:
//! - `WhisperCliRecognizer` runs whisper.cpp's `whisper-cli` with JSON output
//! - `ArgosTranslator` runs `argos-translate` / `argospm`
//! - `PiperSynthesizer` runs `piper` with the text on stdin
//!
//! Each adapter is built once at startup, shared behind an `Arc`, and bounds its
//! own concurrent processes with a semaphore.

pub mod recognition;
pub mod synthesis;
pub mod translation;

#[cfg(test)]
pub mod testing;

pub use recognition::{Recognition, RecognitionFailure, Recognizer, WhisperCliRecognizer};
pub use synthesis::{PiperSynthesizer, Synthesizer, VoiceCatalog};
pub use translation::{ArgosTranslator, Translator};

use std::process::{Output, Stdio};
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

use crate::config::EnginesConfig;

/// The engine set shared by every pipeline run.
#[derive(Clone)]
pub struct Engines {
    pub recognizer: Arc<dyn Recognizer>,
    pub translator: Arc<dyn Translator>,
    pub synthesizer: Arc<dyn Synthesizer>,
}

impl Engines {
    /// Build the command-line adapters described by the configuration.
    pub fn from_config(config: &EnginesConfig) -> Self {
        let jobs = config.max_concurrent_jobs;
        let catalog = VoiceCatalog::new(config.voices_dir.clone(), config.voices.clone());

        for (lang, path) in catalog.missing_models() {
            tracing::warn!(lang = %lang, path = %path.display(), "Voice model not found");
        }

        if !config.whisper_bin.exists() {
            tracing::warn!(
                path = %config.whisper_bin.display(),
                "whisper-cli binary not found; every utterance will fail recognition"
            );
        }

        Self {
            recognizer: Arc::new(WhisperCliRecognizer::new(
                config.whisper_bin.clone(),
                config.whisper_model.clone(),
                jobs,
            )),
            translator: Arc::new(ArgosTranslator::new(
                config.argos_translate_bin.clone(),
                config.argospm_bin.clone(),
                jobs,
            )),
            synthesizer: Arc::new(PiperSynthesizer::new(config.piper_bin.clone(), catalog, jobs)),
        }
    }
}

/// Run a command to completion, optionally writing `stdin` first.
///
/// The child is killed if the returned future is dropped, so a pipeline
/// timeout never leaves an engine process behind.
pub(crate) async fn run_command(
    mut command: Command,
    stdin: Option<&str>,
) -> std::io::Result<Output> {
    command
        .stdin(if stdin.is_some() {
            Stdio::piped()
        } else {
            Stdio::null()
        })
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let mut child = command.spawn()?;

    if let (Some(input), Some(mut pipe)) = (stdin, child.stdin.take()) {
        pipe.write_all(input.as_bytes()).await?;
        pipe.shutdown().await?;
    }

    child.wait_with_output().await
}

/// First line of a process's stderr, for log-sized error messages.
pub(crate) fn stderr_summary(output: &Output) -> String {
    let stderr = String::from_utf8_lossy(&output.stderr);
    let summary: String = stderr.trim().chars().take(200).collect();
    if summary.is_empty() {
        format!("exited with {}", output.status)
    } else {
        summary
    }
}
