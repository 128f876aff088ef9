//! Per-participant session host
//!
//! `PeerEnv` is the [`Session`](tenure_sync::Session) handed to objects: it
//! collects outgoing broadcasts, schedules deferred actions and answers
//! directory questions from the shared directory. `Peer` wraps it and routes
//! inbound events to whichever object claims them.

use std::time::Duration;

use bytes::Bytes;
use tracing::{debug, trace, warn};

use tenure_core::{ObjectId, ParticipantId, SyncClock, SyncFrame, TenureError, TenureResult};
use tenure_sync::{
    BroadcastResult, Deferred, Delay, Directory, Scheduler, SessionObject, Transport,
};

use crate::{DeferredQueue, SharedDirectory};

#[derive(Debug)]
pub struct PeerEnv {
    local: ParticipantId,
    directory: SharedDirectory,
    queue: DeferredQueue,
    outbox: Vec<SyncFrame>,
}

impl PeerEnv {
    pub fn new(local: ParticipantId, directory: SharedDirectory) -> Self {
        PeerEnv {
            local,
            directory,
            queue: DeferredQueue::new(),
            outbox: Vec::new(),
        }
    }

    pub fn directory(&self) -> &SharedDirectory {
        &self.directory
    }

    pub fn queue(&self) -> &DeferredQueue {
        &self.queue
    }
}

impl Transport for PeerEnv {
    fn broadcast(&mut self, object: ObjectId, payload: Bytes, clock: SyncClock) {
        self.outbox.push(SyncFrame::new(object, clock, payload));
    }
}

impl Directory for PeerEnv {
    fn local_participant(&self) -> ParticipantId {
        self.local
    }

    fn owner_of(&self, object: ObjectId) -> ParticipantId {
        self.directory.owner_of(object)
    }

    fn transfer_ownership(&mut self, object: ObjectId, participant: ParticipantId) {
        self.directory.transfer(object, participant);
    }

    fn is_valid_participant(&self, participant: ParticipantId) -> bool {
        participant.is_some() && self.directory.is_present(participant)
    }

    fn resolve_display_name(&self, participant: ParticipantId) -> String {
        self.directory.display_name(participant)
    }
}

impl Scheduler for PeerEnv {
    fn schedule_deferred(&mut self, delay: Delay, deferred: Deferred) {
        self.queue.schedule(delay, deferred);
    }
}

/// Counters kept by a [`Peer`]
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PeerStats {
    pub ticks: u64,
    pub frames_in: u64,
    pub frames_rejected: u64,
    pub frames_out: u64,
    pub broadcasts_failed: u64,
    pub deferred_run: u64,
    pub unrouted: u64,
}

#[derive(Debug)]
pub struct Peer {
    env: PeerEnv,
    stats: PeerStats,
}

impl Peer {
    pub fn new(local: ParticipantId, directory: SharedDirectory) -> Self {
        Peer {
            env: PeerEnv::new(local, directory),
            stats: PeerStats::default(),
        }
    }

    pub fn local(&self) -> ParticipantId {
        self.env.local
    }

    pub fn env(&self) -> &PeerEnv {
        &self.env
    }

    /// Session for direct calls such as `roster.add(id, peer.env_mut())`
    pub fn env_mut(&mut self) -> &mut PeerEnv {
        &mut self.env
    }

    pub fn stats(&self) -> &PeerStats {
        &self.stats
    }

    /// Broadcasts queued since the last call
    pub fn take_outbox(&mut self) -> Vec<SyncFrame> {
        let out = std::mem::take(&mut self.env.outbox);
        self.stats.frames_out += out.len() as u64;
        out
    }

    pub fn deliver(
        &mut self,
        frame: SyncFrame,
        objects: &mut [&mut dyn SessionObject],
    ) -> TenureResult<()> {
        self.stats.frames_in += 1;
        let object = frame.object;
        let Some(target) = objects.iter_mut().find(|o| o.handles(object)) else {
            self.stats.unrouted += 1;
            debug!(participant = %self.env.local, %object, "no object for inbound frame");
            return Err(TenureError::UnknownObject(object));
        };

        let outcome = target.receive(frame, &mut self.env);
        if outcome.is_err() {
            self.stats.frames_rejected += 1;
        }
        outcome
    }

    /// Decode a datagram and deliver it
    pub fn deliver_bytes(
        &mut self,
        datagram: Bytes,
        objects: &mut [&mut dyn SessionObject],
    ) -> TenureResult<()> {
        match SyncFrame::decode(datagram) {
            Ok(frame) => self.deliver(frame, objects),
            Err(err) => {
                self.stats.frames_rejected += 1;
                warn!(participant = %self.env.local, error = %err, "dropping undecodable datagram");
                Err(err)
            }
        }
    }

    /// Report a transport result back to the broadcasting object
    pub fn report(
        &mut self,
        result: BroadcastResult,
        objects: &mut [&mut dyn SessionObject],
    ) -> TenureResult<()> {
        if !result.success {
            self.stats.broadcasts_failed += 1;
        }
        let object = result.object;
        match objects.iter_mut().find(|o| o.handles(object)) {
            Some(target) => target.on_broadcast_result(result, &mut self.env),
            None => {
                self.stats.unrouted += 1;
                Err(TenureError::UnknownObject(object))
            }
        }
    }

    /// Advance one frame and run every deferred action that fell due
    pub fn tick(&mut self, dt: Duration, objects: &mut [&mut dyn SessionObject]) {
        self.stats.ticks += 1;
        for deferred in self.env.queue.advance(dt) {
            match objects.iter_mut().find(|o| o.handles(deferred.object)) {
                Some(target) => {
                    self.stats.deferred_run += 1;
                    target.run_deferred(deferred, &mut self.env);
                }
                None => {
                    self.stats.unrouted += 1;
                    trace!(object = %deferred.object, "deferred action has no target");
                }
            }
        }
    }

    pub fn participant_joined(
        &mut self,
        participant: ParticipantId,
        objects: &mut [&mut dyn SessionObject],
    ) {
        for target in objects.iter_mut() {
            target.on_participant_joined(participant, &mut self.env);
        }
    }

    pub fn participant_left(
        &mut self,
        participant: ParticipantId,
        objects: &mut [&mut dyn SessionObject],
    ) {
        for target in objects.iter_mut() {
            target.on_participant_left(participant, &mut self.env);
        }
    }

    /// Ask the replica holding `object` whether `requesting` may move it to
    /// `requested_owner`, and move it if so
    pub fn request_transfer(
        &mut self,
        object: ObjectId,
        requesting: ParticipantId,
        requested_owner: ParticipantId,
        objects: &mut [&mut dyn SessionObject],
    ) -> TenureResult<()> {
        let Some(target) = objects.iter().find(|o| o.handles(object)) else {
            return Err(TenureError::UnknownObject(object));
        };
        if !target.authorize_transfer(object, requesting, requested_owner, &self.env) {
            return Err(TenureError::TransferDenied { object, requesting });
        }
        self.env.transfer_ownership(object, requested_owner);
        Ok(())
    }

    /// Committed state of every locally owned object, for a late joiner
    pub fn snapshots(&self, objects: &[&mut dyn SessionObject]) -> Vec<SyncFrame> {
        objects
            .iter()
            .flat_map(|o| o.snapshots(&self.env))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tenure_core::{RosterConfig, SyncConfig};
    use tenure_lobby::{ActivityManager, Roster};

    const ROSTER: ObjectId = ObjectId(100);

    #[derive(Debug, Default)]
    struct NoActivity;

    impl ActivityManager for NoActivity {
        fn try_start_with(&mut self, _participants: &[ParticipantId]) {}
    }

    fn roster() -> Roster<NoActivity> {
        Roster::new(ROSTER, &RosterConfig::default(), &SyncConfig::default(), NoActivity)
    }

    fn p(id: i32) -> ParticipantId {
        ParticipantId::new(id)
    }

    fn directory() -> SharedDirectory {
        let dir = SharedDirectory::new();
        dir.join(p(1), "alice");
        dir.join(p(2), "bob");
        dir
    }

    #[test]
    fn test_master_broadcast_reaches_replica() {
        let dir = directory();
        let mut alice = Peer::new(p(1), dir.clone());
        let mut bob = Peer::new(p(2), dir);
        let mut alice_roster = roster();
        let mut bob_roster = roster();

        alice_roster.add(p(2), alice.env_mut()).unwrap();
        let frames = alice.take_outbox();
        assert_eq!(frames.len(), 1);

        for frame in frames {
            let result = BroadcastResult::succeeded(frame.object, frame.clock, frame.encoded_len());
            bob.deliver_bytes(frame.encode().unwrap(), &mut [&mut bob_roster]).unwrap();
            alice.report(result, &mut [&mut alice_roster]).unwrap();
        }

        assert!(bob_roster.participants().contains(p(2)));
        assert_eq!(alice_roster.signed_up(), 1);
        assert_eq!(bob_roster.signed_up(), 1);
        assert_eq!(bob.stats().frames_in, 1);
    }

    #[test]
    fn test_confirmation_runs_on_tick() {
        let dir = directory();
        let mut alice = Peer::new(p(1), dir);
        let mut alice_roster = roster();

        alice_roster.add(p(1), alice.env_mut()).unwrap();
        assert_eq!(alice.env().queue().len(), 1);

        alice.tick(Duration::from_millis(16), &mut [&mut alice_roster]);
        assert_eq!(alice.stats().deferred_run, 1);
        // Still waiting for a transport result, so it re-armed
        assert_eq!(alice.env().queue().len(), 1);
    }

    #[test]
    fn test_unrouted_frame() {
        let mut bob = Peer::new(p(2), directory());
        let frame = SyncFrame::new(ObjectId::new(5), SyncClock::new(1), Bytes::new());
        assert!(bob.deliver(frame, &mut []).is_err());
        assert_eq!(bob.stats().unrouted, 1);
    }

    #[test]
    fn test_garbage_datagram() {
        let mut bob = Peer::new(p(2), directory());
        let mut bob_roster = roster();
        assert!(bob
            .deliver_bytes(Bytes::from_static(&[1, 2, 3]), &mut [&mut bob_roster])
            .is_err());
        assert_eq!(bob.stats().frames_rejected, 1);
    }

    #[test]
    fn test_transfer_request_is_authorized_by_replica() {
        let dir = directory();
        let mut alice = Peer::new(p(1), dir.clone());
        let mut alice_roster = roster();

        alice
            .request_transfer(ROSTER, p(2), p(2), &mut [&mut alice_roster])
            .unwrap();
        assert_eq!(dir.owner_of(ROSTER), p(2));
    }

    #[test]
    fn test_snapshots_only_for_owned_objects() {
        let dir = directory();
        let mut alice = Peer::new(p(1), dir.clone());
        let bob = Peer::new(p(2), dir);
        let mut alice_roster = roster();
        let mut bob_roster = roster();

        alice_roster.add(p(2), alice.env_mut()).unwrap();
        for frame in alice.take_outbox() {
            let result = BroadcastResult::succeeded(frame.object, frame.clock, frame.encoded_len());
            alice.report(result, &mut [&mut alice_roster]).unwrap();
        }

        assert_eq!(alice.snapshots(&[&mut alice_roster]).len(), 1);
        assert!(bob.snapshots(&[&mut bob_roster]).is_empty());
    }
}
