//! Participant directory
//!
//! One table shared by every participant in a process: who is present, and
//! who process-owns each object. An object without an explicit owner belongs
//! to the master, the present participant with the lowest id. When a
//! participant leaves, its objects fall back to the master.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{debug, info};

use tenure_core::{ObjectId, ParticipantId};

#[derive(Debug, Default)]
struct DirectoryState {
    participants: BTreeMap<ParticipantId, String>,
    owners: HashMap<ObjectId, ParticipantId>,
}

impl DirectoryState {
    fn master(&self) -> ParticipantId {
        self.participants
            .keys()
            .next()
            .copied()
            .unwrap_or(ParticipantId::NONE)
    }
}

#[derive(Clone, Debug, Default)]
pub struct SharedDirectory {
    inner: Arc<RwLock<DirectoryState>>,
}

impl SharedDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a participant as present. Returns false if already present
    /// or the id is not a real participant.
    pub fn join(&self, participant: ParticipantId, name: impl Into<String>) -> bool {
        if participant.is_none() {
            return false;
        }
        let mut state = self.inner.write();
        if state.participants.contains_key(&participant) {
            return false;
        }
        let name = name.into();
        info!(%participant, %name, "participant joined");
        state.participants.insert(participant, name);
        true
    }

    /// Remove a participant and drop its ownerships. Returns the objects
    /// that fell back to the master.
    pub fn leave(&self, participant: ParticipantId) -> Vec<ObjectId> {
        let mut state = self.inner.write();
        if state.participants.remove(&participant).is_none() {
            return Vec::new();
        }

        let mut released: Vec<ObjectId> = state
            .owners
            .iter()
            .filter(|(_, owner)| **owner == participant)
            .map(|(object, _)| *object)
            .collect();
        released.sort();
        for object in &released {
            state.owners.remove(object);
        }

        info!(%participant, released = released.len(), master = %state.master(), "participant left");
        released
    }

    pub fn is_present(&self, participant: ParticipantId) -> bool {
        self.inner.read().participants.contains_key(&participant)
    }

    /// Present participants in id order
    pub fn participants(&self) -> Vec<ParticipantId> {
        self.inner.read().participants.keys().copied().collect()
    }

    pub fn master(&self) -> ParticipantId {
        self.inner.read().master()
    }

    pub fn owner_of(&self, object: ObjectId) -> ParticipantId {
        let state = self.inner.read();
        match state.owners.get(&object) {
            Some(owner) if state.participants.contains_key(owner) => *owner,
            _ => state.master(),
        }
    }

    pub fn transfer(&self, object: ObjectId, participant: ParticipantId) {
        let mut state = self.inner.write();
        let previous = state.owners.insert(object, participant);
        debug!(%object, from = ?previous, to = %participant, "ownership transferred");
    }

    pub fn display_name(&self, participant: ParticipantId) -> String {
        match self.inner.read().participants.get(&participant) {
            Some(name) => name.clone(),
            None if participant.is_some() => format!("participant {}", participant),
            None => "nobody".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn p(id: i32) -> ParticipantId {
        ParticipantId::new(id)
    }

    #[test]
    fn test_master_is_lowest_present() {
        let dir = SharedDirectory::new();
        assert_eq!(dir.master(), ParticipantId::NONE);

        dir.join(p(3), "carol");
        dir.join(p(2), "bob");
        assert_eq!(dir.master(), p(2));
        assert_eq!(dir.owner_of(ObjectId::new(1)), p(2));

        dir.leave(p(2));
        assert_eq!(dir.master(), p(3));
    }

    #[test]
    fn test_leave_returns_objects_to_master() {
        let dir = SharedDirectory::new();
        dir.join(p(1), "alice");
        dir.join(p(2), "bob");
        dir.transfer(ObjectId::new(5), p(2));
        dir.transfer(ObjectId::new(6), p(2));
        assert_eq!(dir.owner_of(ObjectId::new(5)), p(2));

        let released = dir.leave(p(2));
        assert_eq!(released, vec![ObjectId::new(5), ObjectId::new(6)]);
        assert_eq!(dir.owner_of(ObjectId::new(5)), p(1));
    }

    #[test]
    fn test_join_rules() {
        let dir = SharedDirectory::new();
        assert!(!dir.join(ParticipantId::NONE, "ghost"));
        assert!(dir.join(p(1), "alice"));
        assert!(!dir.join(p(1), "alice again"));
        assert_eq!(dir.display_name(p(1)), "alice");
        assert_eq!(dir.display_name(p(9)), "participant 9");
        assert_eq!(dir.display_name(ParticipantId::NONE), "nobody");
    }

    #[test]
    fn test_clones_share_state() {
        let dir = SharedDirectory::new();
        let other = dir.clone();
        dir.join(p(1), "alice");
        assert!(other.is_present(p(1)));
    }
}
