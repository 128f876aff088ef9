//! Tenure Lobby - Replicated sign-up roster
//!
//! A roster is a replicated, fixed-capacity set of participants that the
//! owner can lock and hand off to an activity:
//! - `ParticipantSet`: first-empty-slot insert, duplicate-free
//! - `Roster`: owner-gated add/remove/lock, compacted start hand-off

pub mod roster;
pub mod set;

pub use roster::*;
pub use set::*;
