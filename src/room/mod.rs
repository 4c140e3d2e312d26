//! # Rooms
//!
//! - **registry**: room membership (two participants at most) and peer lookup
//! - **session**: per-participant identity, busy flag and lifecycle states

pub mod registry;
pub mod session;

pub use registry::RoomRegistry;
pub use session::{ParticipantSession, SessionState};
