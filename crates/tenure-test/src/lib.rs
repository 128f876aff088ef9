//! Tenure Test Harness - Multi-peer simulation under hostile networks
//!
//! This crate provides:
//! - Seeded lossy/duplicating/reordering links
//! - A session simulator hosting one pool and one roster per participant
//! - A counter payload and a recording activity manager
//! - End-to-end scenarios

pub mod chaos;
pub mod counter;
pub mod simulator;

#[cfg(test)]
mod scenarios;

pub use chaos::*;
pub use counter::*;
pub use simulator::*;
