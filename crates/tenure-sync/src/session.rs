//! Collaborators supplied by the hosting environment
//!
//! The environment owns the network, the participant list and the frame
//! loop. Objects only ever see it through these traits, passed in per call.

use std::time::Duration;

use bytes::Bytes;
use tenure_core::{ObjectId, ParticipantId, SyncClock, SyncFrame, TenureResult};

/// Outbound half of the unreliable transport
pub trait Transport {
    /// Queue `payload` for every other participant. The outcome is reported
    /// later through [`SessionObject::on_broadcast_result`].
    fn broadcast(&mut self, object: ObjectId, payload: Bytes, clock: SyncClock);
}

/// Participant directory and process-ownership table
pub trait Directory {
    fn local_participant(&self) -> ParticipantId;

    /// Current process owner of `object`
    fn owner_of(&self, object: ObjectId) -> ParticipantId;

    fn is_local_owner_of(&self, object: ObjectId) -> bool {
        self.owner_of(object) == self.local_participant()
    }

    /// Make `participant` the process owner of `object`
    fn transfer_ownership(&mut self, object: ObjectId, participant: ParticipantId);

    fn is_valid_participant(&self, participant: ParticipantId) -> bool {
        participant.is_some()
    }

    /// Human-readable name, used for logging only
    fn resolve_display_name(&self, participant: ParticipantId) -> String {
        if participant.is_some() {
            format!("participant {}", participant)
        } else {
            "nobody".to_string()
        }
    }
}

/// One-shot deferred callbacks, frame or time based
pub trait Scheduler {
    fn schedule_deferred(&mut self, delay: Delay, deferred: Deferred);
}

/// Everything an object needs from its host
pub trait Session: Transport + Directory + Scheduler {}

impl<T: Transport + Directory + Scheduler> Session for T {}

/// When a deferred action should run
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Delay {
    /// After this many frames (at least one)
    Frames(u32),
    /// After this much session time
    After(Duration),
}

/// Named actions an object may schedule against itself.
///
/// Scheduled actions cannot be withdrawn; each handler re-checks its
/// preconditions when it fires.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DeferredAction {
    /// Confirm that the broadcast at `clock` reached the local apply path
    ConfirmReplication { clock: SyncClock, attempt: u32 },
    /// Pool owner takes over a freshly assigned or returned slot. Stale once
    /// a later owner id write has bumped the object's assignment counter.
    EnforceOwnership { assignment: u32 },
}

/// A deferred action bound to its target object
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Deferred {
    pub object: ObjectId,
    pub action: DeferredAction,
}

impl Deferred {
    pub fn new(object: ObjectId, action: DeferredAction) -> Self {
        Deferred { object, action }
    }
}

/// Transport's verdict on one broadcast
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BroadcastResult {
    pub object: ObjectId,
    pub clock: SyncClock,
    pub success: bool,
    pub byte_count: usize,
}

impl BroadcastResult {
    pub fn succeeded(object: ObjectId, clock: SyncClock, byte_count: usize) -> Self {
        BroadcastResult {
            object,
            clock,
            success: true,
            byte_count,
        }
    }

    pub fn failed(object: ObjectId, clock: SyncClock, byte_count: usize) -> Self {
        BroadcastResult {
            object,
            clock,
            success: false,
            byte_count,
        }
    }
}

/// A host-facing bundle of replicated objects (a pool, a roster, ...).
///
/// The host routes every inbound event for an object to the bundle that
/// [`handles`](SessionObject::handles) it.
pub trait SessionObject {
    fn handles(&self, object: ObjectId) -> bool;

    /// Inbound update from another participant
    fn receive(&mut self, frame: SyncFrame, session: &mut dyn Session) -> TenureResult<()>;

    fn on_broadcast_result(
        &mut self,
        result: BroadcastResult,
        session: &mut dyn Session,
    ) -> TenureResult<()>;

    fn run_deferred(&mut self, deferred: Deferred, session: &mut dyn Session);

    /// Ownership-request check for `object`, as seen by this replica
    fn authorize_transfer(
        &self,
        object: ObjectId,
        requesting: ParticipantId,
        requested_owner: ParticipantId,
        session: &dyn Session,
    ) -> bool;

    /// Committed state of every object this replica owns, for late joiners
    fn snapshots(&self, session: &dyn Session) -> Vec<SyncFrame>;

    fn on_participant_joined(&mut self, _participant: ParticipantId, _session: &mut dyn Session) {}

    fn on_participant_left(&mut self, _participant: ParticipantId, _session: &mut dyn Session) {}
}
