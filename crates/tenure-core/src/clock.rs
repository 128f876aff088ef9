//! Per-object replication clock
//!
//! Every replicated object carries a `u32` counter that the owner bumps on
//! each broadcast. The counter wraps, so ordering uses serial-number
//! arithmetic: `a` is newer than `b` when the wrapping distance from `b` to
//! `a` lies in the lower half of the `u32` range.

use std::fmt;

const HALF_RANGE: u32 = 1 << 31;

/// Monotonic (modulo wrap) replication clock
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct SyncClock(pub u32);

impl SyncClock {
    pub const ZERO: SyncClock = SyncClock(0);

    #[inline]
    pub fn new(value: u32) -> Self {
        SyncClock(value)
    }

    #[inline]
    pub fn value(self) -> u32 {
        self.0
    }

    /// The next clock value, wrapping on overflow
    #[inline]
    pub fn next(self) -> Self {
        SyncClock(self.0.wrapping_add(1))
    }

    /// Strictly newer than `other` under serial-number ordering
    #[inline]
    pub fn is_newer_than(self, other: SyncClock) -> bool {
        let distance = self.0.wrapping_sub(other.0);
        distance != 0 && distance < HALF_RANGE
    }

    /// The newer of two clocks
    #[inline]
    pub fn latest(self, other: SyncClock) -> SyncClock {
        if other.is_newer_than(self) {
            other
        } else {
            self
        }
    }
}

impl fmt::Debug for SyncClock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Clock({})", self.0)
    }
}

impl fmt::Display for SyncClock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
