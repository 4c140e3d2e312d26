//! # Delivery Router
//!
//! Sends a finished pipeline result to the speaker's peer, and only the peer:
//! synthesized audio first as a binary frame, then the caption.
//!
//! ## Outcomes:
//! - **Delivered**: both frames queued on the peer's connection
//! - **NothingToDeliver**: the run produced no audio
//! - **NoPeer**: the room has no other participant (dropped, not retried)
//! - **LanguageMismatch**: the peer present now is not the one the result was made for
//! - **PeerGone**: the write failed; the peer's session was torn down

use serde::Serialize;
use std::sync::Arc;

use crate::pipeline::PipelineResult;
use crate::protocol::OutboundMessage;
use crate::room::{ParticipantSession, RoomRegistry};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryOutcome {
    Delivered,
    NothingToDeliver,
    NoPeer,
    LanguageMismatch,
    PeerGone,
}

pub struct DeliveryRouter {
    registry: Arc<RoomRegistry>,
    acknowledge_sender: bool,
}

impl DeliveryRouter {
    pub fn new(registry: Arc<RoomRegistry>, acknowledge_sender: bool) -> Self {
        Self {
            registry,
            acknowledge_sender,
        }
    }

    /// Route `result` from `sender` to the sender's current peer.
    ///
    /// A failed write to the peer ends the peer's session; it is not a failure
    /// of the sender's run.
    pub fn deliver(&self, sender: &ParticipantSession, result: &PipelineResult) -> DeliveryOutcome {
        let Some(audio) = &result.audio_bytes else {
            return DeliveryOutcome::NothingToDeliver;
        };

        let Some(peer) = self.registry.peer_of(sender) else {
            tracing::debug!(
                room_id = %sender.room_id,
                user_id = %sender.user_id,
                "No peer to deliver to; dropping result"
            );
            return DeliveryOutcome::NoPeer;
        };

        if peer.lang != result.target_lang {
            tracing::debug!(
                room_id = %sender.room_id,
                peer = %peer.user_id,
                peer_lang = %peer.lang,
                target_lang = %result.target_lang,
                "Peer changed during the run; dropping result"
            );
            return DeliveryOutcome::LanguageMismatch;
        }

        let sent = peer.connection.send_binary(audio.clone()).and_then(|_| {
            peer.connection.send_message(&OutboundMessage::caption(
                &result.translated_text,
                &result.source_text,
            ))
        });

        if let Err(e) = sent {
            tracing::warn!(
                room_id = %peer.room_id,
                peer = %peer.user_id,
                error = %e,
                "Delivery to peer failed; closing peer session"
            );
            self.registry.leave(&peer);
            peer.connection.close("delivery failed");
            return DeliveryOutcome::PeerGone;
        }

        tracing::debug!(
            room_id = %sender.room_id,
            from = %sender.user_id,
            to = %peer.user_id,
            bytes = audio.len(),
            "Delivered translation"
        );

        if self.acknowledge_sender {
            let ack = OutboundMessage::info(format!("Delivered: {}", result.translated_text));
            if let Err(e) = sender.connection.send_message(&ack) {
                tracing::debug!(error = %e, "Could not acknowledge sender");
            }
        }

        DeliveryOutcome::Delivered
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::testing::RecordingConnection;
    use crate::transport::Connection;

    fn result(target: &str) -> PipelineResult {
        PipelineResult {
            source_text: "hello".into(),
            translated_text: "bonjour".into(),
            audio_bytes: Some(vec![1, 2, 3]),
            target_lang: target.into(),
        }
    }

    struct Pair {
        registry: Arc<RoomRegistry>,
        a_conn: Arc<RecordingConnection>,
        b_conn: Arc<RecordingConnection>,
        a: Arc<ParticipantSession>,
        b: Arc<ParticipantSession>,
    }

    fn pair() -> Pair {
        let registry = Arc::new(RoomRegistry::new());
        let a_conn = Arc::new(RecordingConnection::new());
        let b_conn = Arc::new(RecordingConnection::new());
        let a = registry
            .join("r1", "a", "en", a_conn.clone() as Arc<dyn Connection>)
            .unwrap();
        let b = registry
            .join("r1", "b", "fr", b_conn.clone() as Arc<dyn Connection>)
            .unwrap();
        Pair {
            registry,
            a_conn,
            b_conn,
            a,
            b,
        }
    }

    #[test]
    fn test_result_goes_to_peer_only() {
        let p = pair();
        let router = DeliveryRouter::new(p.registry.clone(), false);

        assert_eq!(router.deliver(&p.a, &result("fr")), DeliveryOutcome::Delivered);
        assert_eq!(p.b_conn.binaries(), vec![vec![1, 2, 3]]);
        assert_eq!(
            p.b_conn.messages(),
            vec![OutboundMessage::caption("bonjour", "hello")]
        );
        assert!(p.a_conn.frames().is_empty());
    }

    #[test]
    fn test_audio_precedes_caption() {
        use crate::transport::testing::Frame;
        let p = pair();
        DeliveryRouter::new(p.registry.clone(), false).deliver(&p.a, &result("fr"));
        let frames = p.b_conn.frames();
        assert!(matches!(frames[0], Frame::Binary(_)));
        assert!(matches!(frames[1], Frame::Text(_)));
    }

    #[test]
    fn test_acknowledgement_is_optional() {
        let p = pair();
        DeliveryRouter::new(p.registry.clone(), true).deliver(&p.a, &result("fr"));
        assert_eq!(
            p.a_conn.messages(),
            vec![OutboundMessage::info("Delivered: bonjour")]
        );
        assert!(p.a_conn.binaries().is_empty());
    }

    #[test]
    fn test_no_peer_drops() {
        let registry = Arc::new(RoomRegistry::new());
        let conn = Arc::new(RecordingConnection::new());
        let alone = registry.join("r9", "solo", "en", conn.clone()).unwrap();
        let router = DeliveryRouter::new(registry, false);

        assert_eq!(router.deliver(&alone, &result("fr")), DeliveryOutcome::NoPeer);
        assert!(conn.frames().is_empty());
    }

    #[test]
    fn test_empty_result_is_not_delivered() {
        let p = pair();
        let router = DeliveryRouter::new(p.registry.clone(), false);
        let empty = PipelineResult {
            audio_bytes: None,
            ..result("fr")
        };
        assert_eq!(router.deliver(&p.a, &empty), DeliveryOutcome::NothingToDeliver);
        assert!(p.b_conn.frames().is_empty());
    }

    #[test]
    fn test_replaced_peer_with_other_language_gets_nothing() {
        let p = pair();
        p.registry.leave(&p.b);
        let c_conn = Arc::new(RecordingConnection::new());
        let _c = p.registry.join("r1", "c", "de", c_conn.clone()).unwrap();

        let router = DeliveryRouter::new(p.registry.clone(), false);
        assert_eq!(
            router.deliver(&p.a, &result("fr")),
            DeliveryOutcome::LanguageMismatch
        );
        assert!(c_conn.frames().is_empty());
    }

    #[test]
    fn test_failed_write_tears_down_peer() {
        let p = pair();
        p.b_conn.break_writes();
        let router = DeliveryRouter::new(p.registry.clone(), false);

        assert_eq!(router.deliver(&p.a, &result("fr")), DeliveryOutcome::PeerGone);
        assert!(p.b_conn.is_closed());
        assert!(p.registry.peer_of(&p.a).is_none());
        assert_eq!(p.registry.session_count(), 1);
    }
}
