//! # Call Protocol Messages
//!
//! JSON text frames exchanged on `/ws/call/{room_id}/{user_id}`. Audio travels
//! as binary frames in both directions and has no envelope.
//!
//! ## Client → Server:
//! - `{"native_lang": "en"}`: first message, exactly once
//! - `{"type": "ping"}`, `{"type": "ptt_start"}`, `{"type": "ptt_stop"}`
//!
//! ## Server → Client:
//! - `{"type": "connected", "user_id": "...", "room_id": "..."}`
//! - `{"type": "caption", "text": "<translated>", "original": "<source>"}`
//! - `{"type": "pong"}`
//! - `{"info": "..."}`: human-readable notices and non-fatal errors

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct HandshakeMessage {
    pub native_lang: String,
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ControlMessage {
    Ping,
    PttStart,
    PttStop,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerEvent {
    Connected { user_id: String, room_id: String },
    Caption { text: String, original: String },
    Pong,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct InfoMessage {
    pub info: String,
}

/// Any JSON text frame the server sends.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum OutboundMessage {
    Event(ServerEvent),
    Info(InfoMessage),
}

impl OutboundMessage {
    pub fn info(message: impl Into<String>) -> Self {
        OutboundMessage::Info(InfoMessage {
            info: message.into(),
        })
    }

    pub fn caption(text: &str, original: &str) -> Self {
        OutboundMessage::Event(ServerEvent::Caption {
            text: text.to_string(),
            original: original.to_string(),
        })
    }

    pub fn to_json(&self) -> String {
        // Plain structs of strings always serialize
        serde_json::to_string(self).unwrap_or_else(|_| String::from("{}"))
    }
}

impl From<ServerEvent> for OutboundMessage {
    fn from(event: ServerEvent) -> Self {
        OutboundMessage::Event(event)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_handshake_parses() {
        let msg: HandshakeMessage = serde_json::from_str(r#"{"native_lang":"fr"}"#).unwrap();
        assert_eq!(msg.native_lang, "fr");
        assert!(serde_json::from_str::<HandshakeMessage>(r#"{"lang":"fr"}"#).is_err());
    }

    #[test]
    fn test_control_messages_parse() {
        let parse = |s: &str| serde_json::from_str::<ControlMessage>(s).unwrap();
        assert_eq!(parse(r#"{"type":"ping"}"#), ControlMessage::Ping);
        assert_eq!(parse(r#"{"type":"ptt_start"}"#), ControlMessage::PttStart);
        assert_eq!(parse(r#"{"type":"ptt_stop"}"#), ControlMessage::PttStop);
    }

    #[test]
    fn test_outbound_shapes() {
        let caption: serde_json::Value =
            serde_json::from_str(&OutboundMessage::caption("bonjour", "hello").to_json()).unwrap();
        assert_eq!(
            caption,
            json!({"type": "caption", "text": "bonjour", "original": "hello"})
        );

        let info: serde_json::Value =
            serde_json::from_str(&OutboundMessage::info("waiting").to_json()).unwrap();
        assert_eq!(info, json!({"info": "waiting"}));

        let pong: serde_json::Value =
            serde_json::from_str(&OutboundMessage::from(ServerEvent::Pong).to_json()).unwrap();
        assert_eq!(pong, json!({"type": "pong"}));
    }
}
