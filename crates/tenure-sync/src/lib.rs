//! Tenure Sync - Ownership arbitration and manual replication
//!
//! This crate implements the replicated object primitive:
//! - Owner-gated broadcast requests with a per-object clock
//! - Rollback of the clock when a broadcast fails
//! - Clock-gated receive path that drops stale, duplicate and reordered updates
//! - Ownership transfer checks (global flags, then a pluggable policy)
//! - Collaborator traits for the hosting environment

pub mod policy;
pub mod replica;
pub mod session;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use policy::*;
pub use replica::*;
pub use session::*;
