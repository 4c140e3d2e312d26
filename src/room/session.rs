//! # Participant Sessions
//!
//! A `ParticipantSession` is the registry-visible half of one connected
//! participant: identity, language, connection handle and the one-shot
//! "pipeline busy" flag. The per-connection controller (`call::CallSession`)
//! owns the strong reference; rooms only hold weak ones.
//!
//! ## Session Lifecycle:
//! 1. **Connecting**: socket accepted
//! 2. **Handshaking**: waiting for `{"native_lang": ...}`
//! 3. **Ready**: joined a room, streaming audio
//! 4. **Flushing**: an utterance is in the pipeline
//! 5. **Disconnected**: terminal, reachable from every state

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use uuid::Uuid;

use crate::transport::Connection;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Connecting,
    Handshaking,
    Ready,
    Flushing,
    Disconnected,
}

impl SessionState {
    pub fn can_transition_to(self, next: SessionState) -> bool {
        use SessionState::*;
        matches!(
            (self, next),
            (Connecting, Handshaking)
                | (Handshaking, Ready)
                | (Ready, Flushing)
                | (Flushing, Ready)
                | (Connecting | Handshaking | Ready | Flushing, Disconnected)
        )
    }

    /// Move to `next`, or report the illegal transition and stay put.
    pub fn transition(&mut self, next: SessionState) -> Result<(), InvalidTransition> {
        if !self.can_transition_to(next) {
            return Err(InvalidTransition {
                from: *self,
                to: next,
            });
        }
        *self = next;
        Ok(())
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SessionState::Connecting => "connecting",
            SessionState::Handshaking => "handshaking",
            SessionState::Ready => "ready",
            SessionState::Flushing => "flushing",
            SessionState::Disconnected => "disconnected",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InvalidTransition {
    pub from: SessionState,
    pub to: SessionState,
}

impl fmt::Display for InvalidTransition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "invalid session transition {} -> {}",
            self.from.as_str(),
            self.to.as_str()
        )
    }
}

pub struct ParticipantSession {
    pub id: Uuid,
    pub user_id: String,
    pub room_id: String,
    pub lang: String,
    pub connection: Arc<dyn Connection>,
    busy: AtomicBool,
    last_activity: Mutex<DateTime<Utc>>,
}

impl fmt::Debug for ParticipantSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ParticipantSession")
            .field("id", &self.id)
            .field("user_id", &self.user_id)
            .field("room_id", &self.room_id)
            .field("lang", &self.lang)
            .field("busy", &self.is_busy())
            .finish()
    }
}

impl ParticipantSession {
    pub fn new(
        room_id: &str,
        user_id: &str,
        lang: &str,
        connection: Arc<dyn Connection>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id: user_id.to_string(),
            room_id: room_id.to_string(),
            lang: lang.to_string(),
            connection,
            busy: AtomicBool::new(false),
            last_activity: Mutex::new(Utc::now()),
        }
    }

    /// Claim the session's single pipeline slot.
    ///
    /// Returns `None` while a previous run holds it. The slot is released when
    /// the returned guard is dropped, including on panic or timeout.
    pub fn try_begin_pipeline(self: &Arc<Self>) -> Option<PipelineGuard> {
        self.busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| PipelineGuard {
                session: Arc::clone(self),
            })
    }

    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }

    pub fn touch(&self) {
        *self
            .last_activity
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Utc::now();
    }

    pub fn last_activity(&self) -> DateTime<Utc> {
        *self
            .last_activity
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

/// Holds a session's pipeline slot for the duration of one run.
pub struct PipelineGuard {
    session: Arc<ParticipantSession>,
}

impl PipelineGuard {
    pub fn session(&self) -> &Arc<ParticipantSession> {
        &self.session
    }
}

impl Drop for PipelineGuard {
    fn drop(&mut self) {
        self.session.busy.store(false, Ordering::Release);
    }
}
