//! # Speech Synthesis
//!
//! Piper adapter plus the voice catalog that binds each language to a model.
//! A language without a catalog entry is `UnsupportedVoice`; there is no
//! fallback voice.

use async_trait::async_trait;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio::process::Command;
use tokio::sync::Semaphore;

use crate::engines::{run_command, stderr_summary};
use crate::error::SynthesisError;

#[async_trait]
pub trait Synthesizer: Send + Sync {
    /// Render `text` as WAV bytes with the voice bound to `lang`.
    async fn synthesize(&self, text: &str, lang: &str) -> Result<Vec<u8>, SynthesisError>;

    fn has_voice(&self, lang: &str) -> bool;
}

/// Language code → voice model file.
#[derive(Debug, Clone)]
pub struct VoiceCatalog {
    dir: PathBuf,
    voices: HashMap<String, String>,
}

impl VoiceCatalog {
    pub fn new(dir: PathBuf, voices: HashMap<String, String>) -> Self {
        Self { dir, voices }
    }

    pub fn model_path(&self, lang: &str) -> Option<PathBuf> {
        self.voices.get(lang).map(|file| self.dir.join(file))
    }

    pub fn languages(&self) -> Vec<String> {
        let mut languages: Vec<String> = self.voices.keys().cloned().collect();
        languages.sort();
        languages
    }

    /// Catalog entries whose model file is not on disk.
    pub fn missing_models(&self) -> Vec<(String, PathBuf)> {
        self.languages()
            .into_iter()
            .filter_map(|lang| {
                let path = self.model_path(&lang)?;
                (!path.exists()).then_some((lang, path))
            })
            .collect()
    }
}

pub struct PiperSynthesizer {
    binary: PathBuf,
    catalog: VoiceCatalog,
    permits: Semaphore,
}

impl PiperSynthesizer {
    pub fn new(binary: PathBuf, catalog: VoiceCatalog, max_concurrent: usize) -> Self {
        Self {
            binary,
            catalog,
            permits: Semaphore::new(max_concurrent.max(1)),
        }
    }

    async fn render(&self, text: &str, model: &Path) -> Result<Vec<u8>, SynthesisError> {
        let scratch = tempfile::Builder::new()
            .prefix("voice-bridge-tts-")
            .tempdir()?;
        let output_path = scratch.path().join("speech.wav");

        let mut command = Command::new(&self.binary);
        command
            .arg("--model")
            .arg(model)
            .arg("--output_file")
            .arg(&output_path);

        // Text goes through stdin so quotes and apostrophes need no escaping.
        let output = run_command(command, Some(text)).await?;
        if !output.status.success() {
            return Err(SynthesisError::Engine(stderr_summary(&output)));
        }

        let audio = tokio::fs::read(&output_path).await?;
        if audio.is_empty() {
            return Err(SynthesisError::Engine("piper produced no audio".to_string()));
        }
        Ok(audio)
    }
}

#[async_trait]
impl Synthesizer for PiperSynthesizer {
    async fn synthesize(&self, text: &str, lang: &str) -> Result<Vec<u8>, SynthesisError> {
        let model = self
            .catalog
            .model_path(lang)
            .ok_or_else(|| SynthesisError::UnsupportedVoice(lang.to_string()))?;

        let _permit = self
            .permits
            .acquire()
            .await
            .map_err(|_| SynthesisError::Engine("synthesizer shut down".to_string()))?;

        let started = std::time::Instant::now();
        let audio = self.render(text, &model).await?;
        tracing::debug!(
            lang = %lang,
            chars = text.chars().count(),
            bytes = audio.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Synthesized speech"
        );
        Ok(audio)
    }

    fn has_voice(&self, lang: &str) -> bool {
        self.catalog.model_path(lang).is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn catalog() -> VoiceCatalog {
        VoiceCatalog::new(
            PathBuf::from("/voices"),
            HashMap::from([("fr".to_string(), "fr_FR-siwis-medium.onnx".to_string())]),
        )
    }

    #[test]
    fn test_catalog_paths() {
        let catalog = catalog();
        assert_eq!(
            catalog.model_path("fr"),
            Some(PathBuf::from("/voices/fr_FR-siwis-medium.onnx"))
        );
        assert_eq!(catalog.model_path("ja"), None);
        assert_eq!(catalog.missing_models().len(), 1);
    }

    #[tokio::test]
    async fn test_unknown_language_is_unsupported_voice() {
        let synthesizer = PiperSynthesizer::new(PathBuf::from("piper"), catalog(), 1);
        assert!(!synthesizer.has_voice("ja"));
        let result = synthesizer.synthesize("konnichiwa", "ja").await;
        assert!(matches!(result, Err(SynthesisError::UnsupportedVoice(lang)) if lang == "ja"));
    }
}
