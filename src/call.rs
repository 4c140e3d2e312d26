//! # Call Session Controller
//!
//! Transport-independent logic for one connected participant. The WebSocket
//! actor owns a `CallSession` and forwards every inbound frame to it; tests
//! drive it directly with recording connections.
//!
//! ## Responsibilities:
//! - **Handshake**: parse `{"native_lang"}`, validate the language, join the room
//! - **Audio**: transcode, run voice-activity detection, dispatch closed utterances
//! - **Control**: ping/pong and push-to-talk
//! - **Dispatch**: one pipeline run at a time per participant, on its own task
//! - **Teardown**: leave the room, discard buffered audio, tell the peer
//!
//! A run that is in flight when the participant disconnects is not cancelled;
//! its result is still delivered if the peer is there.

use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::Instrument;

use crate::audio::vad::{Segment, VoiceActivityDetector};
use crate::error::{HandshakeError, PipelineError, TransportError};
use crate::pipeline::Utterance;
use crate::protocol::{ControlMessage, HandshakeMessage, OutboundMessage, ServerEvent};
use crate::room::{ParticipantSession, SessionState};
use crate::state::AppState;
use crate::transport::Connection;

pub struct CallSession {
    room_id: String,
    user_id: String,
    state: SessionState,
    participant: Option<Arc<ParticipantSession>>,
    vad: VoiceActivityDetector,
    connection: Arc<dyn Connection>,
    app: AppState,
}

impl CallSession {
    pub fn new(room_id: &str, user_id: &str, connection: Arc<dyn Connection>, app: AppState) -> Self {
        Self {
            room_id: room_id.to_string(),
            user_id: user_id.to_string(),
            state: SessionState::Connecting,
            participant: None,
            vad: VoiceActivityDetector::new(app.config.vad_config()),
            connection,
            app,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn participant(&self) -> Option<&Arc<ParticipantSession>> {
        self.participant.as_ref()
    }

    /// The socket is up; the next text frame must carry the language.
    pub fn open(&mut self) {
        if let Err(e) = self.state.transition(SessionState::Handshaking) {
            tracing::debug!(error = %e, "Ignoring open");
        }
    }

    /// Handle a text frame. `Err` means the connection must be closed.
    pub fn on_text(&mut self, text: &str) -> Result<Option<JoinHandle<()>>, TransportError> {
        match self.state {
            SessionState::Connecting | SessionState::Handshaking => match self.handshake(text) {
                Ok(()) => Ok(None),
                Err(e) => Err(self.reject(e)),
            },
            SessionState::Ready | SessionState::Flushing => Ok(self.on_control(text)),
            SessionState::Disconnected => Err(TransportError::Disconnected),
        }
    }

    /// Handle a binary audio frame; returns the pipeline runs it started.
    pub fn on_audio(&mut self, bytes: &[u8]) -> Result<Vec<JoinHandle<()>>, TransportError> {
        match self.state {
            SessionState::Ready | SessionState::Flushing => {}
            SessionState::Disconnected => return Err(TransportError::Disconnected),
            SessionState::Connecting | SessionState::Handshaking => {
                let error = HandshakeError::Malformed(
                    "audio received before language configuration".to_string(),
                );
                return Err(self.reject(error));
            }
        }
        self.touch();

        let samples = match self.app.transcoder.to_canonical(bytes) {
            Ok(samples) => samples,
            Err(e) => {
                tracing::debug!(user_id = %self.user_id, error = %e, "Dropping unreadable frame");
                self.notify(OutboundMessage::info(format!("Unreadable audio frame: {}", e)));
                return Ok(Vec::new());
            }
        };

        let segments = self.vad.ingest(&samples);
        Ok(segments
            .into_iter()
            .filter_map(|segment| self.dispatch(segment))
            .collect())
    }

    /// The run started by `dispatch` has finished.
    pub fn pipeline_finished(&mut self) {
        if self.state == SessionState::Flushing {
            self.state = SessionState::Ready;
        }
    }

    /// Tear the session down. Safe to call more than once.
    pub fn disconnect(&mut self) {
        if self.state == SessionState::Disconnected {
            return;
        }
        let previous = self.state;
        self.state = SessionState::Disconnected;
        self.vad.reset();

        let Some(participant) = self.participant.take() else {
            tracing::debug!(
                room_id = %self.room_id,
                user_id = %self.user_id,
                state = previous.as_str(),
                "Connection closed before joining"
            );
            return;
        };

        let peer = self.app.registry.peer_of(&participant);
        self.app.registry.leave(&participant);
        self.app.metrics.session_closed();

        if let Some(peer) = peer {
            let notice = OutboundMessage::info(format!("{} left the call", self.user_id));
            if let Err(e) = peer.connection.send_message(&notice) {
                tracing::debug!(peer = %peer.user_id, error = %e, "Could not notify peer");
            }
        }

        tracing::info!(
            room_id = %self.room_id,
            user_id = %self.user_id,
            session_id = %participant.id,
            "Participant disconnected"
        );
    }

    fn handshake(&mut self, text: &str) -> Result<(), HandshakeError> {
        if self.state == SessionState::Connecting {
            self.open();
        }

        let message: HandshakeMessage =
            serde_json::from_str(text).map_err(|e| HandshakeError::Malformed(e.to_string()))?;
        let lang = message.native_lang.trim().to_lowercase();
        if lang.is_empty() || !self.app.supports_language(&lang) {
            return Err(HandshakeError::UnsupportedLanguage(lang));
        }

        let participant =
            self.app
                .registry
                .join(&self.room_id, &self.user_id, &lang, self.connection.clone())?;
        self.app.metrics.session_opened();

        if let Err(e) = self.state.transition(SessionState::Ready) {
            tracing::warn!(error = %e, "Unexpected state after join");
            self.state = SessionState::Ready;
        }

        tracing::info!(
            room_id = %self.room_id,
            user_id = %self.user_id,
            session_id = %participant.id,
            lang = %lang,
            "Handshake complete"
        );
        self.participant = Some(participant);

        self.notify(
            ServerEvent::Connected {
                user_id: self.user_id.clone(),
                room_id: self.room_id.clone(),
            }
            .into(),
        );
        Ok(())
    }

    /// Tell the client why it is being turned away.
    fn reject(&mut self, error: HandshakeError) -> TransportError {
        if matches!(error, HandshakeError::Registry(_)) {
            self.app.metrics.join_rejected();
        }
        tracing::warn!(
            room_id = %self.room_id,
            user_id = %self.user_id,
            error = %error,
            "Handshake rejected"
        );
        self.notify(OutboundMessage::info(error.to_string()));
        TransportError::Protocol(error.to_string())
    }

    fn on_control(&mut self, text: &str) -> Option<JoinHandle<()>> {
        self.touch();
        match serde_json::from_str::<ControlMessage>(text) {
            Ok(ControlMessage::Ping) => {
                self.notify(ServerEvent::Pong.into());
                None
            }
            Ok(ControlMessage::PttStart) => {
                tracing::debug!(user_id = %self.user_id, "Push-to-talk started");
                self.vad.start_manual();
                None
            }
            Ok(ControlMessage::PttStop) => {
                tracing::debug!(user_id = %self.user_id, "Push-to-talk stopped");
                let segment = self.vad.stop_manual()?;
                self.dispatch(segment)
            }
            Err(_) => {
                let reply = if serde_json::from_str::<HandshakeMessage>(text).is_ok() {
                    HandshakeError::AlreadyConfigured.to_string()
                } else {
                    "Unrecognised message".to_string()
                };
                self.notify(OutboundMessage::info(reply));
                None
            }
        }
    }

    /// Start a pipeline run for a closed segment, unless one is already running.
    fn dispatch(&mut self, segment: Segment) -> Option<JoinHandle<()>> {
        let participant = self.participant.clone()?;
        self.app.metrics.utterance_flushed();

        let Some(peer) = self.app.registry.peer_of(&participant) else {
            tracing::debug!(user_id = %self.user_id, "Utterance flushed with nobody to hear it");
            self.notify(OutboundMessage::info("Waiting for the other participant to join"));
            return None;
        };

        let Some(guard) = participant.try_begin_pipeline() else {
            self.app.metrics.busy_drop();
            tracing::warn!(
                user_id = %self.user_id,
                seconds = segment.duration_seconds(),
                "Previous utterance still processing; dropping new one"
            );
            self.notify(OutboundMessage::info(
                "Still translating your previous sentence; the last one was skipped",
            ));
            return None;
        };

        if let Err(e) = self.state.transition(SessionState::Flushing) {
            tracing::debug!(error = %e, "Dispatching outside Ready");
        }

        let utterance = Utterance::new(segment, &participant.lang, &peer.lang);
        let span = tracing::info_span!(
            "utterance",
            id = %utterance.id,
            room_id = %participant.room_id,
            user_id = %participant.user_id,
            trigger = ?utterance.trigger,
        );
        tracing::debug!(
            parent: &span,
            samples = utterance.samples.len(),
            from = %utterance.source_lang,
            to = %utterance.target_lang,
            "Dispatching utterance"
        );

        let orchestrator = self.app.orchestrator.clone();
        let router = self.app.router.clone();
        let metrics = self.app.metrics.clone();
        let timeout = self.app.pipeline_timeout();

        let run = async move {
            let sender = guard.session();
            metrics.pipeline_started();

            match orchestrator.process_within(&utterance, timeout).await {
                Ok(result) if result.is_empty() => metrics.recognition_failed(),
                Ok(result) => metrics.record_delivery(router.deliver(sender, &result)),
                Err(e) => {
                    match e {
                        PipelineError::Timeout(_) => metrics.pipeline_timed_out(),
                        _ => metrics.pipeline_failed(),
                    }
                    tracing::warn!(error = %e, "Pipeline run failed");
                    let notice = OutboundMessage::info(format!("Could not translate that: {}", e));
                    if let Err(send_error) = sender.connection.send_message(&notice) {
                        tracing::debug!(error = %send_error, "Speaker already gone");
                    }
                }
            }
        };

        Some(tokio::spawn(run.instrument(span)))
    }

    fn notify(&self, message: OutboundMessage) {
        if let Err(e) = self.connection.send_message(&message) {
            tracing::debug!(user_id = %self.user_id, error = %e, "Could not send message");
        }
    }

    fn touch(&self) {
        if let Some(participant) = &self.participant {
            participant.touch();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;
    use crate::engines::testing::{
        hello_bonjour, DictionaryTranslator, ScriptedRecognizer, ToneSynthesizer,
    };
    use crate::engines::Engines;
    use crate::transport::testing::RecordingConnection;
    use std::time::Duration;

    fn pcm_bytes(samples: &[i16]) -> Vec<u8> {
        samples.iter().flat_map(|s| s.to_le_bytes()).collect()
    }

    /// One second of speech followed by 1.3 s of silence, in 20 ms frames.
    fn utterance_frames() -> Vec<Vec<u8>> {
        let mut audio: Vec<i16> = (0..16_000)
            .map(|i| if i % 2 == 0 { 1000 } else { -1000 })
            .collect();
        audio.extend(vec![0i16; 20_800]);
        audio.chunks(320).map(pcm_bytes).collect()
    }

    fn speak(call: &mut CallSession) -> Vec<JoinHandle<()>> {
        utterance_frames()
            .iter()
            .flat_map(|frame| call.on_audio(frame).unwrap())
            .collect()
    }

    fn connect(app: &AppState, user: &str, lang: &str) -> (CallSession, Arc<RecordingConnection>) {
        let conn = Arc::new(RecordingConnection::new());
        let mut call = CallSession::new("r1", user, conn.clone(), app.clone());
        call.open();
        call.on_text(&format!(r#"{{"native_lang":"{}"}}"#, lang))
            .unwrap();
        (call, conn)
    }

    fn captions(conn: &RecordingConnection) -> Vec<OutboundMessage> {
        conn.messages()
            .into_iter()
            .filter(|m| matches!(m, OutboundMessage::Event(ServerEvent::Caption { .. })))
            .collect()
    }

    fn infos(conn: &RecordingConnection) -> Vec<String> {
        conn.messages()
            .into_iter()
            .filter_map(|m| match m {
                OutboundMessage::Info(info) => Some(info.info),
                _ => None,
            })
            .collect()
    }

    fn app_with(engines: Engines) -> AppState {
        AppState::new(AppConfig::default(), engines)
    }

    #[tokio::test]
    async fn test_hello_reaches_peer_as_bonjour() {
        let (recognizer, _, engines) = hello_bonjour();
        let app = app_with(engines);
        let (mut u1, conn1) = connect(&app, "u1", "en");
        let (_u2, conn2) = connect(&app, "u2", "fr");

        assert_eq!(
            conn1.messages()[0],
            OutboundMessage::Event(ServerEvent::Connected {
                user_id: "u1".into(),
                room_id: "r1".into()
            })
        );

        let handles = speak(&mut u1);
        assert_eq!(handles.len(), 1);
        assert_eq!(u1.state(), SessionState::Flushing);
        for handle in handles {
            handle.await.unwrap();
        }
        u1.pipeline_finished();
        assert_eq!(u1.state(), SessionState::Ready);

        assert_eq!(recognizer.calls(), vec![(16_000, "en".to_string())]);
        assert_eq!(conn2.binaries().len(), 1);
        assert_eq!(
            captions(&conn2),
            vec![OutboundMessage::caption("bonjour", "hello")]
        );
        assert!(conn1.binaries().is_empty());
        assert!(captions(&conn1).is_empty());
        assert_eq!(app.metrics.snapshot().deliveries, 1);
    }

    #[tokio::test]
    async fn test_recognition_failure_delivers_nothing() {
        let engines = Engines {
            recognizer: Arc::new(ScriptedRecognizer::failing()),
            translator: Arc::new(DictionaryTranslator::new(&[])),
            synthesizer: Arc::new(ToneSynthesizer::new(&["en", "fr"])),
        };
        let app = app_with(engines);
        let (mut u1, conn1) = connect(&app, "u1", "en");
        let (_u2, conn2) = connect(&app, "u2", "fr");

        for handle in speak(&mut u1) {
            handle.await.unwrap();
        }
        u1.pipeline_finished();

        assert!(conn2.binaries().is_empty());
        assert!(captions(&conn2).is_empty());
        assert!(!conn1.is_closed());
        assert_eq!(u1.state(), SessionState::Ready);
        assert_eq!(app.metrics.snapshot().recognition_failures, 1);
    }

    #[tokio::test]
    async fn test_translation_failure_is_reported_to_speaker_only() {
        let engines = Engines {
            recognizer: Arc::new(ScriptedRecognizer::always("hello")),
            translator: Arc::new(DictionaryTranslator::failing()),
            synthesizer: Arc::new(ToneSynthesizer::new(&["en", "fr"])),
        };
        let app = app_with(engines);
        let (mut u1, conn1) = connect(&app, "u1", "en");
        let (_u2, conn2) = connect(&app, "u2", "fr");

        for handle in speak(&mut u1) {
            handle.await.unwrap();
        }

        assert!(infos(&conn1)
            .iter()
            .any(|info| info.starts_with("Could not translate that")));
        assert!(conn2.binaries().is_empty());
        assert!(!conn1.is_closed());
    }

    #[tokio::test]
    async fn test_synthesis_failure_is_reported_to_speaker_only() {
        let engines = Engines {
            recognizer: Arc::new(ScriptedRecognizer::always("hello")),
            translator: Arc::new(DictionaryTranslator::new(&[("hello", "bonjour")])),
            synthesizer: Arc::new(ToneSynthesizer::failing(&["en", "fr"])),
        };
        let app = app_with(engines);
        let (mut u1, conn1) = connect(&app, "u1", "en");
        let (_u2, conn2) = connect(&app, "u2", "fr");

        for handle in speak(&mut u1) {
            handle.await.unwrap();
        }
        u1.pipeline_finished();

        assert!(infos(&conn1)
            .iter()
            .any(|info| info.starts_with("Could not translate that: synthesis failed")));
        assert!(conn2.binaries().is_empty());
        assert!(captions(&conn2).is_empty());
        assert!(!conn1.is_closed());
        assert_eq!(u1.state(), SessionState::Ready);
        assert_eq!(app.metrics.snapshot().pipeline_failures, 1);
    }

    #[tokio::test]
    async fn test_utterances_arrive_in_flush_order() {
        let engines = Engines {
            recognizer: Arc::new(ScriptedRecognizer::always("").then("first").then("second")),
            translator: Arc::new(DictionaryTranslator::new(&[])),
            synthesizer: Arc::new(ToneSynthesizer::new(&["en", "fr"])),
        };
        let app = app_with(engines);
        let (mut u1, _) = connect(&app, "u1", "en");
        let (_u2, conn2) = connect(&app, "u2", "fr");

        for _ in 0..2 {
            for handle in speak(&mut u1) {
                handle.await.unwrap();
            }
            u1.pipeline_finished();
        }

        assert_eq!(
            captions(&conn2),
            vec![
                OutboundMessage::caption("first", "first"),
                OutboundMessage::caption("second", "second"),
            ]
        );
    }

    #[tokio::test]
    async fn test_second_utterance_is_dropped_while_busy() {
        let (_, _, mut engines) = hello_bonjour();
        engines.recognizer =
            Arc::new(ScriptedRecognizer::always("hello").with_delay(Duration::from_millis(100)));
        let app = app_with(engines);
        let (mut u1, conn1) = connect(&app, "u1", "en");
        let (_u2, conn2) = connect(&app, "u2", "fr");

        let first = speak(&mut u1);
        let second = speak(&mut u1);
        assert_eq!(first.len(), 1);
        assert!(second.is_empty());
        assert!(infos(&conn1).iter().any(|info| info.contains("skipped")));

        for handle in first {
            handle.await.unwrap();
        }
        assert_eq!(conn2.binaries().len(), 1);
        assert_eq!(app.metrics.snapshot().busy_drops, 1);
    }

    #[tokio::test]
    async fn test_disconnect_mid_run_still_delivers() {
        let (_, _, mut engines) = hello_bonjour();
        engines.recognizer =
            Arc::new(ScriptedRecognizer::always("hello").with_delay(Duration::from_millis(50)));
        let app = app_with(engines);
        let (mut u1, _) = connect(&app, "u1", "en");
        let (_u2, conn2) = connect(&app, "u2", "fr");

        let handles = speak(&mut u1);
        u1.disconnect();
        assert_eq!(u1.state(), SessionState::Disconnected);
        assert_eq!(app.registry.session_count(), 1);

        for handle in handles {
            handle.await.unwrap();
        }
        assert_eq!(conn2.binaries().len(), 1);
        assert!(infos(&conn2).iter().any(|info| info == "u1 left the call"));

        u1.disconnect();
        assert_eq!(app.metrics.snapshot().sessions_closed, 1);
    }

    #[tokio::test]
    async fn test_lone_speaker_is_told_to_wait() {
        let (recognizer, _, engines) = hello_bonjour();
        let app = app_with(engines);
        let (mut u1, conn1) = connect(&app, "u1", "en");

        assert!(speak(&mut u1).is_empty());
        assert!(recognizer.calls().is_empty());
        assert!(infos(&conn1).iter().any(|info| info.contains("Waiting")));
    }

    #[tokio::test]
    async fn test_third_participant_is_rejected() {
        let (_, _, engines) = hello_bonjour();
        let app = app_with(engines);
        let (_u1, _) = connect(&app, "u1", "en");
        let (_u2, _) = connect(&app, "u2", "fr");

        let conn3 = Arc::new(RecordingConnection::new());
        let mut u3 = CallSession::new("r1", "u3", conn3.clone(), app.clone());
        u3.open();
        assert!(u3.on_text(r#"{"native_lang":"en"}"#).is_err());
        assert!(u3.participant().is_none());
        assert!(infos(&conn3)[0].contains("already has 2 participants"));
        assert_eq!(app.registry.session_count(), 2);
        assert_eq!(app.metrics.snapshot().rejected_joins, 1);
    }

    #[tokio::test]
    async fn test_handshake_rejections() {
        let (_, _, engines) = hello_bonjour();
        let app = app_with(engines);

        let conn = Arc::new(RecordingConnection::new());
        let mut call = CallSession::new("r2", "u1", conn.clone(), app.clone());
        call.open();
        assert!(call.on_text(r#"{"native_lang":"ja"}"#).is_err());
        assert!(infos(&conn)[0].contains("not supported"));

        let mut call = CallSession::new("r2", "u1", conn.clone(), app.clone());
        call.open();
        assert!(call.on_text("hello").is_err());

        let mut call = CallSession::new("r2", "u1", conn.clone(), app.clone());
        call.open();
        assert!(call.on_audio(&[0, 0]).is_err());
        assert_eq!(app.registry.room_count(), 0);
    }

    #[tokio::test]
    async fn test_control_messages() {
        let (_, _, engines) = hello_bonjour();
        let app = app_with(engines);
        let (mut u1, conn1) = connect(&app, "u1", "en");

        assert!(u1.on_text(r#"{"type":"ping"}"#).unwrap().is_none());
        assert!(conn1
            .messages()
            .contains(&OutboundMessage::Event(ServerEvent::Pong)));

        u1.on_text(r#"{"native_lang":"fr"}"#).unwrap();
        assert!(infos(&conn1).contains(&"session already configured".to_string()));

        u1.on_text(r#"{"type":"dance"}"#).unwrap();
        assert!(infos(&conn1).contains(&"Unrecognised message".to_string()));
    }

    #[tokio::test]
    async fn test_push_to_talk_dispatches_on_stop() {
        let (recognizer, _, engines) = hello_bonjour();
        let app = app_with(engines);
        let (mut u1, _) = connect(&app, "u1", "en");
        let (_u2, conn2) = connect(&app, "u2", "fr");

        u1.on_text(r#"{"type":"ptt_start"}"#).unwrap();
        let quiet = pcm_bytes(&[0i16; 320]);
        for _ in 0..100 {
            assert!(u1.on_audio(&quiet).unwrap().is_empty());
        }
        let handle = u1.on_text(r#"{"type":"ptt_stop"}"#).unwrap().unwrap();
        handle.await.unwrap();

        assert_eq!(recognizer.calls(), vec![(32_000, "en".to_string())]);
        assert_eq!(conn2.binaries().len(), 1);
    }

    #[tokio::test]
    async fn test_unreadable_frame_is_not_fatal() {
        let (_, _, engines) = hello_bonjour();
        let app = app_with(engines);
        let (mut u1, conn1) = connect(&app, "u1", "en");

        assert!(u1.on_audio(&[1, 2, 3]).unwrap().is_empty());
        assert!(infos(&conn1)[0].starts_with("Unreadable audio frame"));
        assert_eq!(u1.state(), SessionState::Ready);
    }
}
