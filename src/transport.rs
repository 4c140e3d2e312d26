//! # Connection Handles
//!
//! The bridge core talks to participants through `Connection`, never through a
//! socket type directly. The WebSocket actor provides the real implementation;
//! tests use `testing::RecordingConnection`.

use crate::error::TransportError;
use crate::protocol::OutboundMessage;

pub trait Connection: Send + Sync {
    /// Queue a binary frame (synthesized audio).
    fn send_binary(&self, bytes: Vec<u8>) -> Result<(), TransportError>;

    /// Queue a JSON text frame.
    fn send_message(&self, message: &OutboundMessage) -> Result<(), TransportError>;

    /// Close the connection. Closing twice is harmless.
    fn close(&self, reason: &str);
}
