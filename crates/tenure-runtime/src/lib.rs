//! Tenure Runtime - Hosting replicated objects
//!
//! This crate supplies what the replication crates expect from their host:
//! 1. A shared participant directory and process-ownership table
//! 2. A frame/time scheduler for deferred actions
//! 3. A per-participant session that routes inbound events to objects
//! 4. A tokio loop that ticks the session and moves encoded frames
//! 5. Logging setup

pub mod directory;
pub mod driver;
pub mod logging;
pub mod peer;
pub mod scheduler;

pub use directory::*;
pub use driver::*;
pub use logging::*;
pub use peer::*;
pub use scheduler::*;
