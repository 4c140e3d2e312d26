//! In-process engine doubles for tests.

use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use super::{Engines, Recognition, RecognitionFailure, Recognizer, Synthesizer, Translator};
use crate::audio::transcode::encode_wav;
use crate::error::{SynthesisError, TranslationError};

/// Returns queued recognitions in order, then repeats `fallback`.
pub struct ScriptedRecognizer {
    queue: Mutex<VecDeque<Recognition>>,
    fallback: Recognition,
    delay: Duration,
    calls: Mutex<Vec<(usize, String)>>,
}

impl ScriptedRecognizer {
    pub fn always(text: &str) -> Self {
        Self {
            queue: Mutex::new(VecDeque::new()),
            fallback: Recognition::Text(text.to_string()),
            delay: Duration::ZERO,
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn failing() -> Self {
        Self {
            fallback: Recognition::Failed(RecognitionFailure::NoSpeech),
            ..Self::always("")
        }
    }

    pub fn then(self, text: &str) -> Self {
        self.queue
            .lock()
            .unwrap()
            .push_back(Recognition::Text(text.to_string()));
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// `(sample count, language hint)` of every call.
    pub fn calls(&self) -> Vec<(usize, String)> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl Recognizer for ScriptedRecognizer {
    async fn transcribe(&self, pcm: &[i16], lang: &str) -> Recognition {
        self.calls
            .lock()
            .unwrap()
            .push((pcm.len(), lang.to_string()));
        let next = self.queue.lock().unwrap().pop_front();
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        next.unwrap_or_else(|| self.fallback.clone())
    }
}

/// Word-by-word lookup translator; unknown words pass through unchanged.
#[derive(Default)]
pub struct DictionaryTranslator {
    words: HashMap<String, String>,
    fail: bool,
    calls: Mutex<Vec<String>>,
}

impl DictionaryTranslator {
    pub fn new(pairs: &[(&str, &str)]) -> Self {
        Self {
            words: pairs
                .iter()
                .map(|(from, to)| (from.to_string(), to.to_string()))
                .collect(),
            ..Self::default()
        }
    }

    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    /// Every text passed to `translate`, in call order.
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl Translator for DictionaryTranslator {
    async fn translate(
        &self,
        text: &str,
        _from: &str,
        _to: &str,
    ) -> Result<String, TranslationError> {
        self.calls.lock().unwrap().push(text.to_string());
        if self.fail {
            return Err(TranslationError::Engine("scripted failure".to_string()));
        }
        Ok(text
            .split(' ')
            .map(|word| self.words.get(word).cloned().unwrap_or_else(|| word.to_string()))
            .collect::<Vec<_>>()
            .join(" "))
    }

    async fn is_pair_installed(&self, _from: &str, _to: &str) -> Result<bool, TranslationError> {
        Ok(!self.fail)
    }

    async fn install_pair(&self, from: &str, to: &str) -> Result<(), TranslationError> {
        if self.fail {
            return Err(TranslationError::PairUnavailable {
                from: from.to_string(),
                to: to.to_string(),
            });
        }
        Ok(())
    }
}

/// Produces a short WAV whose length follows the text; one voice per language.
pub struct ToneSynthesizer {
    languages: Vec<String>,
    fail: bool,
}

impl ToneSynthesizer {
    pub fn new(languages: &[&str]) -> Self {
        Self {
            languages: languages.iter().map(|l| l.to_string()).collect(),
            fail: false,
        }
    }

    pub fn failing(languages: &[&str]) -> Self {
        Self {
            fail: true,
            ..Self::new(languages)
        }
    }
}

#[async_trait]
impl Synthesizer for ToneSynthesizer {
    async fn synthesize(&self, text: &str, lang: &str) -> Result<Vec<u8>, SynthesisError> {
        if !self.has_voice(lang) {
            return Err(SynthesisError::UnsupportedVoice(lang.to_string()));
        }
        if self.fail {
            return Err(SynthesisError::Engine("scripted failure".to_string()));
        }
        let samples = vec![1000i16; text.chars().count().max(1) * 16];
        encode_wav(&samples).map_err(|e| SynthesisError::Engine(e.to_string()))
    }

    fn has_voice(&self, lang: &str) -> bool {
        self.languages.iter().any(|l| l == lang)
    }
}

/// en/fr engines where "hello" translates to "bonjour".
pub fn hello_bonjour() -> (Arc<ScriptedRecognizer>, Arc<DictionaryTranslator>, Engines) {
    let recognizer = Arc::new(ScriptedRecognizer::always("hello"));
    let translator = Arc::new(DictionaryTranslator::new(&[
        ("hello", "bonjour"),
        ("bonjour", "hello"),
    ]));
    let engines = Engines {
        recognizer: recognizer.clone(),
        translator: translator.clone(),
        synthesizer: Arc::new(ToneSynthesizer::new(&["en", "fr"])),
    };
    (recognizer, translator, engines)
}
