//! Fixed-capacity participant set
//!
//! Backed by an array where `ParticipantId::NONE` marks an empty slot.
//! Inserts take the first empty slot from the left, removes empty the slot in
//! place, so the positions of the remaining members never shift.

use tenure_core::{ParticipantId, TenureError, TenureResult};

/// Result of [`ParticipantSet::insert`]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InsertOutcome {
    Inserted(usize),
    AlreadyPresent,
    Full,
    Invalid,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ParticipantSet {
    slots: Vec<ParticipantId>,
}

impl ParticipantSet {
    pub fn new(capacity: usize) -> Self {
        ParticipantSet {
            slots: vec![ParticipantId::NONE; capacity],
        }
    }

    /// Build from raw slots. Non-positive ids become empty slots; a repeated
    /// id is rejected.
    pub fn from_slots(slots: Vec<ParticipantId>) -> TenureResult<Self> {
        let mut set = ParticipantSet::new(slots.len());
        for (index, id) in slots.into_iter().enumerate() {
            if id.is_none() {
                continue;
            }
            if set.contains(id) {
                return Err(TenureError::MalformedPayload(format!(
                    "participant {} listed twice",
                    id
                )));
            }
            set.slots[index] = id;
        }
        Ok(set)
    }

    pub fn insert(&mut self, id: ParticipantId) -> InsertOutcome {
        if id.is_none() {
            return InsertOutcome::Invalid;
        }
        if self.contains(id) {
            return InsertOutcome::AlreadyPresent;
        }
        match self.slots.iter().position(|slot| slot.is_none()) {
            Some(index) => {
                self.slots[index] = id;
                InsertOutcome::Inserted(index)
            }
            None => InsertOutcome::Full,
        }
    }

    /// Empty the slot holding `id`; false if absent
    pub fn remove(&mut self, id: ParticipantId) -> bool {
        if id.is_none() {
            return false;
        }
        match self.slots.iter().position(|slot| *slot == id) {
            Some(index) => {
                self.slots[index] = ParticipantId::NONE;
                true
            }
            None => false,
        }
    }

    pub fn contains(&self, id: ParticipantId) -> bool {
        id.is_some() && self.slots.contains(&id)
    }

    /// Number of occupied slots
    pub fn len(&self) -> usize {
        self.slots.iter().filter(|slot| slot.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_full(&self) -> bool {
        self.len() == self.capacity()
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Raw slots, empties included
    pub fn slots(&self) -> &[ParticipantId] {
        &self.slots
    }

    pub fn iter(&self) -> impl Iterator<Item = ParticipantId> + '_ {
        self.slots.iter().copied().filter(|slot| slot.is_some())
    }

    /// Members in slot order with the gaps removed
    pub fn compact(&self) -> Vec<ParticipantId> {
        self.iter().collect()
    }
}
