//! # Room Registry
//!
//! The only state shared between participants. Rooms are created on first join
//! and removed as soon as their last session leaves. Rooms hold sessions weakly,
//! so a participant whose controller is gone never stays "in" a room.
//!
//! Every operation takes the single registry lock, does plain map work and
//! releases it; the lock is never held across an `.await`.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use crate::error::RegistryError;
use crate::room::session::ParticipantSession;
use crate::transport::Connection;

/// Participants allowed per room.
pub const ROOM_CAPACITY: usize = 2;

#[derive(Default)]
struct Room {
    members: Vec<Weak<ParticipantSession>>,
}

impl Room {
    fn prune(&mut self) {
        self.members.retain(|member| member.strong_count() > 0);
    }

    fn live(&self) -> impl Iterator<Item = Arc<ParticipantSession>> + '_ {
        self.members.iter().filter_map(Weak::upgrade)
    }
}

#[derive(Default)]
pub struct RoomRegistry {
    rooms: Mutex<HashMap<String, Room>>,
}

impl RoomRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn rooms(&self) -> MutexGuard<'_, HashMap<String, Room>> {
        self.rooms.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Attach a new session to `room_id`, creating the room if needed.
    ///
    /// ## Returns:
    /// - **Ok(session)**: the caller owns the only strong reference
    /// - **Err(RoomFull)**: the room already has two live sessions; nothing was created
    /// - **Err(DuplicateUser)**: `user_id` already has a live session in the room
    pub fn join(
        &self,
        room_id: &str,
        user_id: &str,
        lang: &str,
        connection: Arc<dyn Connection>,
    ) -> Result<Arc<ParticipantSession>, RegistryError> {
        let mut rooms = self.rooms();
        let room = rooms.entry(room_id.to_string()).or_default();
        room.prune();

        if room.live().any(|member| member.user_id == user_id) {
            return Err(RegistryError::DuplicateUser {
                room_id: room_id.to_string(),
                user_id: user_id.to_string(),
            });
        }

        if room.members.len() >= ROOM_CAPACITY {
            return Err(RegistryError::RoomFull {
                room_id: room_id.to_string(),
                capacity: ROOM_CAPACITY,
            });
        }

        let session = Arc::new(ParticipantSession::new(room_id, user_id, lang, connection));
        room.members.push(Arc::downgrade(&session));

        tracing::info!(
            room_id = %room_id,
            user_id = %user_id,
            lang = %lang,
            members = room.members.len(),
            "Participant joined room"
        );
        Ok(session)
    }

    /// Detach a session; removes the room when it becomes empty. Idempotent.
    pub fn leave(&self, session: &ParticipantSession) {
        let mut rooms = self.rooms();
        let Some(room) = rooms.get_mut(&session.room_id) else {
            return;
        };

        let before = room.members.len();
        room.members.retain(|member| {
            member.strong_count() > 0 && !std::ptr::eq(member.as_ptr(), session)
        });

        if room.members.len() < before {
            tracing::info!(
                room_id = %session.room_id,
                user_id = %session.user_id,
                "Participant left room"
            );
        }

        if room.members.is_empty() {
            rooms.remove(&session.room_id);
            tracing::debug!(room_id = %session.room_id, "Room closed");
        }
    }

    /// The other live participant in the session's room.
    pub fn peer_of(&self, session: &ParticipantSession) -> Option<Arc<ParticipantSession>> {
        let rooms = self.rooms();
        let room = rooms.get(&session.room_id)?;
        let peer = room.live().find(|member| member.id != session.id);
        peer
    }

    pub fn room_count(&self) -> usize {
        self.rooms().len()
    }

    /// Live sessions across all rooms.
    pub fn session_count(&self) -> usize {
        self.rooms().values().map(|room| room.live().count()).sum()
    }

    pub fn members_of(&self, room_id: &str) -> Vec<Arc<ParticipantSession>> {
        self.rooms()
            .get(room_id)
            .map(|room| room.live().collect())
            .unwrap_or_default()
    }
}
