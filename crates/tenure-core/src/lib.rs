//! Tenure Core - Fundamental types and primitives
//!
//! This crate defines the types shared by every Tenure crate:
//! - Identifiers (ParticipantId, ObjectId, SlotId)
//! - The per-object replication clock (SyncClock)
//! - The replication wire frame and payload helpers
//! - Error taxonomy and configuration

pub mod id;
pub mod clock;
pub mod wire;
pub mod error;
pub mod config;

pub use id::*;
pub use clock::*;
pub use wire::*;
pub use error::*;
pub use config::*;
