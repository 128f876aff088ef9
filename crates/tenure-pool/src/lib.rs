//! Tenure Pool - One replicated object per participant
//!
//! This crate builds a bounded allocation pool on top of `tenure-sync`:
//! - Fixed slots, each permanently bound to one pooled object
//! - Assignment on join and reclaim on departure, run by the pool owner
//! - Self-claim on every replica that sees its own id in a slot
//! - First-registration-wins binding of the local participant's object

pub mod allocator;
pub mod handle;
pub mod object;
pub mod pool;

pub use allocator::*;
pub use handle::*;
pub use object::*;
pub use pool::*;
