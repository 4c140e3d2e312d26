//! # Application State
//!
//! Everything shared between request handlers and participant actors. All
//! members are created once at startup and shared through `Arc`; the only
//! mutable cross-session structure is the `RoomRegistry`.
//!
//! ## Members:
//! - **config**: effective configuration (read-only after startup)
//! - **registry**: rooms and membership
//! - **orchestrator**: engines plus the recognition → translation → synthesis sequence
//! - **router**: peer-only delivery of results
//! - **transcoder**: inbound audio → canonical PCM
//! - **metrics**: lock-free counters for the health endpoints

use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::audio::transcode::{PcmTranscoder, Transcoder};
use crate::config::AppConfig;
use crate::delivery::DeliveryRouter;
use crate::engines::Engines;
use crate::metrics::BridgeMetrics;
use crate::pipeline::PipelineOrchestrator;
use crate::room::RoomRegistry;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub registry: Arc<RoomRegistry>,
    pub orchestrator: Arc<PipelineOrchestrator>,
    pub router: Arc<DeliveryRouter>,
    pub transcoder: Arc<dyn Transcoder>,
    pub metrics: Arc<BridgeMetrics>,
    pub start_time: Instant,
}

impl AppState {
    pub fn new(config: AppConfig, engines: Engines) -> Self {
        let registry = Arc::new(RoomRegistry::new());
        let orchestrator = Arc::new(PipelineOrchestrator::new(
            engines,
            config.pipeline.chunk_threshold_chars,
        ));
        let router = Arc::new(DeliveryRouter::new(
            registry.clone(),
            config.pipeline.acknowledge_sender,
        ));

        Self {
            config: Arc::new(config),
            registry,
            orchestrator,
            router,
            transcoder: Arc::new(PcmTranscoder),
            metrics: Arc::new(BridgeMetrics::default()),
            start_time: Instant::now(),
        }
    }

    pub fn uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }

    pub fn pipeline_timeout(&self) -> Duration {
        self.config.pipeline_timeout()
    }

    /// Whether a participant may declare `lang` as their native language.
    pub fn supports_language(&self, lang: &str) -> bool {
        self.orchestrator.engines().synthesizer.has_voice(lang)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engines::testing::hello_bonjour;

    #[test]
    fn test_state_wires_config() {
        let (_, _, engines) = hello_bonjour();
        let state = AppState::new(AppConfig::default(), engines);

        assert!(state.supports_language("fr"));
        assert!(!state.supports_language("ja"));
        assert_eq!(state.pipeline_timeout(), Duration::from_secs(30));
        assert_eq!(state.registry.room_count(), 0);
    }
}
