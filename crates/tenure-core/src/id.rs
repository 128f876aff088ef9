//! Identity types for Tenure
//!
//! Participants are supplied by the hosting environment and identified by a
//! positive integer. Zero and negative values are the "no participant"
//! sentinel, matching what the environment hands out for departed players.

use std::fmt;

/// Participant identity as assigned by the hosting environment
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct ParticipantId(pub i32);

impl ParticipantId {
    /// The reserved "no participant" sentinel
    pub const NONE: ParticipantId = ParticipantId(0);

    #[inline]
    pub fn new(id: i32) -> Self {
        ParticipantId(id)
    }

    /// True for any real participant (strictly positive id)
    #[inline]
    pub fn is_some(self) -> bool {
        self.0 > 0
    }

    #[inline]
    pub fn is_none(self) -> bool {
        !self.is_some()
    }

    #[inline]
    pub fn to_bytes(self) -> [u8; 4] {
        self.0.to_le_bytes()
    }

    #[inline]
    pub fn from_bytes(bytes: [u8; 4]) -> Self {
        ParticipantId(i32::from_le_bytes(bytes))
    }
}

impl fmt::Debug for ParticipantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_some() {
            write!(f, "Participant({})", self.0)
        } else {
            write!(f, "Participant(none)")
        }
    }
}

impl fmt::Display for ParticipantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Replicated object identity - unique within a session
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct ObjectId(pub u64);

impl ObjectId {
    #[inline]
    pub fn new(id: u64) -> Self {
        ObjectId(id)
    }

    /// The object bound to `slot` of the pool identified by `self`.
    ///
    /// Pooled objects are numbered directly after their pool, wrapping past
    /// `u64::MAX`.
    #[inline]
    pub fn pooled(self, slot: SlotId) -> Self {
        ObjectId(self.0.wrapping_add(1).wrapping_add(slot.0 as u64))
    }

    #[inline]
    pub fn to_bytes(self) -> [u8; 8] {
        self.0.to_le_bytes()
    }

    #[inline]
    pub fn from_bytes(bytes: [u8; 8]) -> Self {
        ObjectId(u64::from_le_bytes(bytes))
    }
}

impl fmt::Debug for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Object({:#x})", self.0)
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

/// Index of one fixed slot in an object pool
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Debug)]
pub struct SlotId(pub usize);

impl SlotId {
    #[inline]
    pub fn new(index: usize) -> Self {
        SlotId(index)
    }

    #[inline]
    pub fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for SlotId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "slot#{}", self.0)
    }
}
