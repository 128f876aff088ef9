//! In-memory session for unit tests
//!
//! Records broadcasts and scheduled actions instead of acting on them, so a
//! test can step the protocol by hand.

use std::collections::HashMap;

use bytes::Bytes;
use tenure_core::{ObjectId, ParticipantId, SyncClock, SyncFrame};

use crate::{Deferred, Delay, Directory, Scheduler, Transport};

#[derive(Debug, Default)]
pub struct MockSession {
    local: ParticipantId,
    owners: HashMap<ObjectId, ParticipantId>,
    /// Owner of any object not listed in `owners`
    default_owner: ParticipantId,
    participants: Vec<ParticipantId>,
    broadcasts: Vec<SyncFrame>,
    scheduled: Vec<(Delay, Deferred)>,
    transfers: Vec<(ObjectId, ParticipantId)>,
}

impl MockSession {
    pub fn new(local: ParticipantId) -> Self {
        MockSession {
            local,
            participants: vec![local],
            ..Default::default()
        }
    }

    /// Every unlisted object is owned by `owner`
    pub fn with_default_owner(mut self, owner: ParticipantId) -> Self {
        self.default_owner = owner;
        self
    }

    pub fn add_participant(&mut self, participant: ParticipantId) {
        if !self.participants.contains(&participant) {
            self.participants.push(participant);
        }
    }

    pub fn set_owner(&mut self, object: ObjectId, owner: ParticipantId) {
        self.owners.insert(object, owner);
    }

    pub fn take_broadcasts(&mut self) -> Vec<SyncFrame> {
        std::mem::take(&mut self.broadcasts)
    }

    pub fn take_scheduled(&mut self) -> Vec<(Delay, Deferred)> {
        std::mem::take(&mut self.scheduled)
    }

    /// Ownership transfers performed through the directory, in order
    pub fn transfers(&self) -> &[(ObjectId, ParticipantId)] {
        &self.transfers
    }
}

impl Transport for MockSession {
    fn broadcast(&mut self, object: ObjectId, payload: Bytes, clock: SyncClock) {
        self.broadcasts.push(SyncFrame::new(object, clock, payload));
    }
}

impl Directory for MockSession {
    fn local_participant(&self) -> ParticipantId {
        self.local
    }

    fn owner_of(&self, object: ObjectId) -> ParticipantId {
        self.owners.get(&object).copied().unwrap_or(self.default_owner)
    }

    fn transfer_ownership(&mut self, object: ObjectId, participant: ParticipantId) {
        self.owners.insert(object, participant);
        self.transfers.push((object, participant));
    }

    fn is_valid_participant(&self, participant: ParticipantId) -> bool {
        participant.is_some() && self.participants.contains(&participant)
    }
}

impl Scheduler for MockSession {
    fn schedule_deferred(&mut self, delay: Delay, deferred: Deferred) {
        self.scheduled.push((delay, deferred));
    }
}
