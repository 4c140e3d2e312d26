//! # Configuration Management
//!
//! Loads the bridge configuration from, in priority order (highest first):
//! 1. `HOST` / `PORT` environment variables (deployment platforms)
//! 2. Environment variables with the `APP_` prefix, `__` between nesting levels
//!    (`APP_AUDIO__SILENCE_THRESHOLD_MS=1500`)
//! 3. `config.toml` in the working directory (optional)
//! 4. Built-in defaults
//!
//! ## Sections:
//! - **server**: bind address
//! - **audio**: canonical format and voice-activity thresholds
//! - **pipeline**: chunking, timeout and delivery behaviour
//! - **session**: handshake and heartbeat timing
//! - **engines**: external recognition / translation / synthesis tools

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::env;
use std::path::PathBuf;
use std::time::Duration;

use crate::audio::buffer::CANONICAL_SAMPLE_RATE;
use crate::audio::vad::VadConfig;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub audio: AudioConfig,
    pub pipeline: PipelineConfig,
    pub session: SessionConfig,
    pub engines: EnginesConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

/// Canonical audio format plus voice-activity detection thresholds.
///
/// All durations are converted to sample counts before use, so segmentation
/// depends only on the audio itself.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AudioConfig {
    /// Canonical sample rate of buffered PCM (mono, 16-bit); only 16000 is accepted
    pub sample_rate: u32,
    /// RMS level (16-bit scale) at or above which a frame counts as speech
    pub energy_threshold: f64,
    /// Trailing silence that ends an utterance
    pub silence_threshold_ms: u32,
    /// Voiced audio required before a silence boundary may flush
    pub min_speech_ms: u32,
    /// Buffer bound; reaching it forces a flush
    pub max_utterance_ms: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Texts longer than this many characters are translated in sentence chunks
    pub chunk_threshold_chars: usize,
    /// Upper bound for one recognition → translation → synthesis run
    pub timeout_secs: u64,
    /// Send the speaker an `{info}` note after a successful delivery
    pub acknowledge_sender: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Time allowed for the `{native_lang}` message after connect
    pub handshake_timeout_secs: u64,
    /// WebSocket ping interval
    pub heartbeat_interval_secs: u64,
    /// Connection is dropped after this long without any client traffic
    pub client_timeout_secs: u64,
}

/// Command-line engines driven by the bridge.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnginesConfig {
    /// whisper.cpp CLI binary
    pub whisper_bin: PathBuf,
    /// ggml model file passed to whisper-cli
    pub whisper_model: PathBuf,
    /// Argos Translate CLI
    pub argos_translate_bin: PathBuf,
    /// Argos package manager, used to list and install language pairs
    pub argospm_bin: PathBuf,
    /// Piper TTS binary
    pub piper_bin: PathBuf,
    /// Directory holding the piper `.onnx` voices
    pub voices_dir: PathBuf,
    /// Language code → voice model file name inside `voices_dir`
    pub voices: HashMap<String, String>,
    /// Concurrent external processes allowed per engine
    pub max_concurrent_jobs: usize,
    /// Language pairs translated once at startup (`"en-fr"`)
    pub warmup_pairs: Vec<String>,
    /// Install warm-up pairs that are missing instead of only warning
    pub install_missing_pairs: bool,
}

impl Default for AppConfig {
    fn default() -> Self {
        let voices = [
            ("en", "en_US-bryce-medium.onnx"),
            ("fr", "fr_FR-siwis-medium.onnx"),
            ("de", "de_DE-thorsten-medium.onnx"),
            ("es", "es_ES-mls_10246-low.onnx"),
        ]
        .into_iter()
        .map(|(lang, file)| (lang.to_string(), file.to_string()))
        .collect();

        Self {
            server: ServerConfig {
                host: "127.0.0.1".to_string(),
                port: 8000,
            },
            audio: AudioConfig {
                sample_rate: 16000,
                energy_threshold: 200.0,
                silence_threshold_ms: 1200,
                min_speech_ms: 500,
                max_utterance_ms: 20_000,
            },
            pipeline: PipelineConfig {
                chunk_threshold_chars: 512,
                timeout_secs: 30,
                acknowledge_sender: false,
            },
            session: SessionConfig {
                handshake_timeout_secs: 10,
                heartbeat_interval_secs: 30,
                client_timeout_secs: 60,
            },
            engines: EnginesConfig {
                whisper_bin: PathBuf::from("models/asr/whisper.cpp/build/bin/whisper-cli"),
                whisper_model: PathBuf::from("models/asr/whisper.cpp/models/ggml-tiny.bin"),
                argos_translate_bin: PathBuf::from("argos-translate"),
                argospm_bin: PathBuf::from("argospm"),
                piper_bin: PathBuf::from("piper"),
                voices_dir: PathBuf::from("models/tts"),
                voices,
                max_concurrent_jobs: 2,
                warmup_pairs: ["en-fr", "fr-en", "en-es", "es-en", "en-de", "de-en"]
                    .into_iter()
                    .map(String::from)
                    .collect(),
                install_missing_pairs: false,
            },
        }
    }
}

impl AppConfig {
    /// Load configuration from defaults, `config.toml` and the environment.
    ///
    /// ## Environment Variable Examples:
    /// - `APP_SERVER__PORT=9000`
    /// - `APP_PIPELINE__CHUNK_THRESHOLD_CHARS=400`
    /// - `APP_ENGINES__PIPER_BIN=/opt/piper/piper`
    /// - `HOST=0.0.0.0`, `PORT=3000`
    pub fn load() -> Result<Self> {
        let mut settings = config::Config::builder()
            .add_source(config::Config::try_from(&AppConfig::default())?)
            .add_source(config::File::with_name("config").required(false))
            .add_source(
                config::Environment::with_prefix("APP")
                    .prefix_separator("_")
                    .separator("__"),
            );

        if let Ok(host) = env::var("HOST") {
            settings = settings.set_override("server.host", host)?;
        }

        if let Ok(port) = env::var("PORT") {
            settings = settings.set_override("server.port", port)?;
        }

        let config = settings.build()?.try_deserialize()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.server.port == 0 {
            return Err(anyhow::anyhow!("Server port cannot be 0"));
        }

        if self.audio.sample_rate != CANONICAL_SAMPLE_RATE {
            return Err(anyhow::anyhow!(
                "Audio sample rate must be {} Hz; inbound audio is resampled to it",
                CANONICAL_SAMPLE_RATE
            ));
        }

        if self.audio.silence_threshold_ms == 0 {
            return Err(anyhow::anyhow!("Silence threshold must be greater than 0"));
        }

        if self.audio.max_utterance_ms <= self.audio.min_speech_ms {
            return Err(anyhow::anyhow!(
                "max_utterance_ms ({}) must exceed min_speech_ms ({})",
                self.audio.max_utterance_ms,
                self.audio.min_speech_ms
            ));
        }

        if self.pipeline.chunk_threshold_chars == 0 {
            return Err(anyhow::anyhow!("Chunk threshold must be greater than 0"));
        }

        if self.pipeline.timeout_secs == 0 {
            return Err(anyhow::anyhow!("Pipeline timeout must be greater than 0"));
        }

        if self.engines.max_concurrent_jobs == 0 {
            return Err(anyhow::anyhow!("Engines need at least one concurrent job"));
        }

        if self.engines.voices.is_empty() {
            return Err(anyhow::anyhow!("At least one synthesis voice must be configured"));
        }

        for pair in &self.engines.warmup_pairs {
            parse_language_pair(pair)?;
        }

        Ok(())
    }

    /// Voice-activity settings expressed in sample counts.
    pub fn vad_config(&self) -> VadConfig {
        let samples = |ms: u32| (CANONICAL_SAMPLE_RATE as usize * ms as usize) / 1000;
        VadConfig {
            energy_threshold: self.audio.energy_threshold,
            silence_samples: samples(self.audio.silence_threshold_ms),
            min_speech_samples: samples(self.audio.min_speech_ms),
            max_samples: samples(self.audio.max_utterance_ms),
        }
    }

    pub fn pipeline_timeout(&self) -> Duration {
        Duration::from_secs(self.pipeline.timeout_secs)
    }

    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_secs(self.session.handshake_timeout_secs)
    }

    /// Languages a participant may declare: every language with a voice.
    pub fn supported_languages(&self) -> Vec<String> {
        let mut languages: Vec<String> = self.engines.voices.keys().cloned().collect();
        languages.sort();
        languages
    }

    pub fn warmup_pairs(&self) -> Vec<(String, String)> {
        self.engines
            .warmup_pairs
            .iter()
            .filter_map(|pair| parse_language_pair(pair).ok())
            .collect()
    }
}

/// Parse `"en-fr"` into `("en", "fr")`.
pub fn parse_language_pair(pair: &str) -> Result<(String, String)> {
    match pair.split_once('-') {
        Some((from, to)) if !from.trim().is_empty() && !to.trim().is_empty() => {
            Ok((from.trim().to_lowercase(), to.trim().to_lowercase()))
        }
        _ => Err(anyhow::anyhow!(
            "Invalid language pair '{}', expected form 'en-fr'",
            pair
        )),
    }
}
