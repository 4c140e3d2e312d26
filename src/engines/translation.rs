//! # Text Translation
//!
//! Argos Translate adapter. Pair provisioning (`is_pair_installed`,
//! `install_pair`) goes through `argospm` and is independent of runtime calls,
//! so startup can warm up or install pairs before any participant connects.

use async_trait::async_trait;
use std::path::PathBuf;
use tokio::process::Command;
use tokio::sync::Semaphore;

use crate::engines::{run_command, stderr_summary};
use crate::error::TranslationError;

#[async_trait]
pub trait Translator: Send + Sync {
    async fn translate(&self, text: &str, from: &str, to: &str)
        -> Result<String, TranslationError>;

    async fn is_pair_installed(&self, from: &str, to: &str) -> Result<bool, TranslationError>;

    async fn install_pair(&self, from: &str, to: &str) -> Result<(), TranslationError>;
}

pub struct ArgosTranslator {
    translate_bin: PathBuf,
    package_bin: PathBuf,
    permits: Semaphore,
}

impl ArgosTranslator {
    pub fn new(translate_bin: PathBuf, package_bin: PathBuf, max_concurrent: usize) -> Self {
        Self {
            translate_bin,
            package_bin,
            permits: Semaphore::new(max_concurrent.max(1)),
        }
    }

    async fn argospm(&self, args: &[&str]) -> Result<String, TranslationError> {
        let mut command = Command::new(&self.package_bin);
        command.args(args);
        let output = run_command(command, None).await?;
        if !output.status.success() {
            return Err(TranslationError::Engine(stderr_summary(&output)));
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

#[async_trait]
impl Translator for ArgosTranslator {
    async fn translate(
        &self,
        text: &str,
        from: &str,
        to: &str,
    ) -> Result<String, TranslationError> {
        let _permit = self
            .permits
            .acquire()
            .await
            .map_err(|_| TranslationError::Engine("translator shut down".to_string()))?;

        let mut command = Command::new(&self.translate_bin);
        command.args(["--from-lang", from, "--to-lang", to]);

        let output = run_command(command, Some(text)).await?;
        if !output.status.success() {
            let message = stderr_summary(&output);
            if message.contains("No translation") || message.contains("not installed") {
                return Err(TranslationError::PairUnavailable {
                    from: from.to_string(),
                    to: to.to_string(),
                });
            }
            return Err(TranslationError::Engine(message));
        }

        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }

    async fn is_pair_installed(&self, from: &str, to: &str) -> Result<bool, TranslationError> {
        let listing = self.argospm(&["list"]).await?;
        Ok(parse_installed_pairs(&listing)
            .iter()
            .any(|(f, t)| f == from && t == to))
    }

    async fn install_pair(&self, from: &str, to: &str) -> Result<(), TranslationError> {
        self.argospm(&["update"]).await?;
        let package = package_name(from, to);
        match self.argospm(&["install", &package]).await {
            Ok(_) => {
                tracing::info!(from = %from, to = %to, "Installed translation package");
                Ok(())
            }
            Err(TranslationError::Engine(message)) if message.contains("not found") => {
                Err(TranslationError::PairUnavailable {
                    from: from.to_string(),
                    to: to.to_string(),
                })
            }
            Err(e) => Err(e),
        }
    }
}

fn package_name(from: &str, to: &str) -> String {
    format!("translate-{}_{}", from, to)
}

/// Extract `(from, to)` pairs from `argospm list` output (`translate-en_fr` per line).
pub fn parse_installed_pairs(listing: &str) -> Vec<(String, String)> {
    listing
        .lines()
        .filter_map(|line| line.trim().strip_prefix("translate-"))
        .filter_map(|pair| {
            let (from, to) = pair.split_once('_')?;
            Some((from.to_string(), to.to_string()))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_installed_pairs() {
        let listing = "translate-en_fr\ntranslate-fr_en\n\nsomething-else\n";
        assert_eq!(
            parse_installed_pairs(listing),
            vec![
                ("en".to_string(), "fr".to_string()),
                ("fr".to_string(), "en".to_string())
            ]
        );
    }

    #[test]
    fn test_package_name() {
        assert_eq!(package_name("en", "de"), "translate-en_de");
    }

    #[tokio::test]
    async fn test_missing_binary_is_io_error() {
        let translator = ArgosTranslator::new(
            PathBuf::from("/nonexistent/argos-translate"),
            PathBuf::from("/nonexistent/argospm"),
            1,
        );
        let result = translator.translate("hello", "en", "fr").await;
        assert!(matches!(result, Err(TranslationError::Io(_))));
    }
}
