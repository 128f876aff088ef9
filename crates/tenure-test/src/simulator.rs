//! Multi-participant session simulator
//!
//! Every simulated participant hosts the same two objects, a counter pool
//! and a roster, behind its own `Peer`. Broadcasts travel over one chaos
//! link per ordered pair of participants; a broadcast is reported as
//! successful once it has been handed to the links, unless a failure has
//! been injected for that participant.

use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

use tracing::{debug, info};

use tenure_core::{
    ObjectId, ParticipantId, SlotId, SyncClock, SyncFrame, TenureConfig, TenureError, TenureResult,
};
use tenure_lobby::Roster;
use tenure_pool::ObjectPool;
use tenure_runtime::{Peer, PeerStats, SharedDirectory};
use tenure_sync::{BroadcastResult, Replicated, SessionObject};

use crate::{ChaosLink, Counter, LinkConditions, RecordingActivity};

pub const POOL_ID: ObjectId = ObjectId(1);
pub const ROSTER_ID: ObjectId = ObjectId(100);

#[derive(Clone, Debug)]
pub struct SimConfig {
    pub pool_capacity: usize,
    pub tenure: TenureConfig,
    pub conditions: LinkConditions,
    /// Frame length
    pub frame: Duration,
    pub seed: u64,
}

impl Default for SimConfig {
    fn default() -> Self {
        SimConfig {
            pool_capacity: 4,
            tenure: TenureConfig::default(),
            conditions: LinkConditions::perfect(),
            frame: Duration::from_millis(100),
            seed: 0,
        }
    }
}

/// One participant's process
#[derive(Debug)]
pub struct SimPeer {
    peer: Peer,
    pool: ObjectPool<Counter>,
    roster: Roster<RecordingActivity>,
}

impl SimPeer {
    fn new(local: ParticipantId, directory: SharedDirectory, config: &SimConfig) -> Self {
        let tenure = &config.tenure;
        SimPeer {
            peer: Peer::new(local, directory),
            pool: ObjectPool::new(
                POOL_ID,
                config.pool_capacity,
                |_| Counter::default(),
                &tenure.sync,
                &tenure.pool,
            ),
            roster: Roster::new(ROSTER_ID, &tenure.roster, &tenure.sync, RecordingActivity::default()),
        }
    }

    pub fn local(&self) -> ParticipantId {
        self.peer.local()
    }

    pub fn pool(&self) -> &ObjectPool<Counter> {
        &self.pool
    }

    pub fn roster(&self) -> &Roster<RecordingActivity> {
        &self.roster
    }

    pub fn stats(&self) -> &PeerStats {
        self.peer.stats()
    }

    /// Increment the counter in the slot assigned to this participant
    pub fn increment(&mut self) -> TenureResult<SyncClock> {
        let local = self.peer.local();
        let object = self
            .pool
            .local_object_mut()
            .ok_or(TenureError::InvalidParticipant(local))?;
        object.mutate(self.peer.env_mut(), Counter::increment)
    }

    pub fn roster_add(&mut self, participant: ParticipantId) -> TenureResult<()> {
        self.roster.add(participant, self.peer.env_mut())
    }

    pub fn roster_remove(&mut self, participant: ParticipantId) -> TenureResult<()> {
        self.roster.remove(participant, self.peer.env_mut())
    }

    pub fn roster_lock(&mut self) -> TenureResult<()> {
        self.roster.lock(self.peer.env_mut())
    }

    pub fn roster_unlock(&mut self) -> TenureResult<()> {
        self.roster.unlock(self.peer.env_mut())
    }

    pub fn try_to_start(&mut self) -> TenureResult<Vec<ParticipantId>> {
        self.roster.try_to_start(self.peer.env_mut())
    }

    fn tick(&mut self, dt: Duration) {
        self.peer.tick(dt, &mut [&mut self.pool, &mut self.roster]);
    }

    fn deliver(&mut self, frame: SyncFrame) -> TenureResult<()> {
        self.peer.deliver(frame, &mut [&mut self.pool, &mut self.roster])
    }

    fn deliver_bytes(&mut self, datagram: bytes::Bytes) -> TenureResult<()> {
        self.peer
            .deliver_bytes(datagram, &mut [&mut self.pool, &mut self.roster])
    }

    fn report(&mut self, result: BroadcastResult) -> TenureResult<()> {
        self.peer.report(result, &mut [&mut self.pool, &mut self.roster])
    }

    fn joined(&mut self, participant: ParticipantId) {
        self.peer
            .participant_joined(participant, &mut [&mut self.pool, &mut self.roster]);
    }

    fn left(&mut self, participant: ParticipantId) {
        self.peer
            .participant_left(participant, &mut [&mut self.pool, &mut self.roster]);
    }

    fn snapshots(&mut self) -> Vec<SyncFrame> {
        self.peer.snapshots(&[&mut self.pool, &mut self.roster])
    }
}

pub struct SessionSimulator {
    config: SimConfig,
    directory: SharedDirectory,
    peers: BTreeMap<ParticipantId, SimPeer>,
    links: HashMap<(ParticipantId, ParticipantId), ChaosLink>,
    /// Remaining injected broadcast failures per participant
    failures: HashMap<ParticipantId, usize>,
    seed_counter: u64,
    now: Duration,
}

impl SessionSimulator {
    pub fn new(config: SimConfig) -> TenureResult<Self> {
        config.tenure.validate()?;
        if config.pool_capacity == 0 || POOL_ID.0 + config.pool_capacity as u64 >= ROSTER_ID.0 {
            return Err(TenureError::InvalidConfig(format!(
                "pool capacity {} does not fit between pool and roster ids",
                config.pool_capacity
            )));
        }
        if config.frame.is_zero() {
            return Err(TenureError::InvalidConfig("frame must be non-zero".into()));
        }

        let seed_counter = config.seed;
        Ok(SessionSimulator {
            config,
            directory: SharedDirectory::new(),
            peers: BTreeMap::new(),
            links: HashMap::new(),
            failures: HashMap::new(),
            seed_counter,
            now: Duration::ZERO,
        })
    }

    pub fn directory(&self) -> &SharedDirectory {
        &self.directory
    }

    pub fn now(&self) -> Duration {
        self.now
    }

    pub fn frame(&self) -> Duration {
        self.config.frame
    }

    pub fn participants(&self) -> Vec<ParticipantId> {
        self.peers.keys().copied().collect()
    }

    pub fn peer(&self, participant: ParticipantId) -> Option<&SimPeer> {
        self.peers.get(&participant)
    }

    pub fn peer_mut(&mut self, participant: ParticipantId) -> Option<&mut SimPeer> {
        self.peers.get_mut(&participant)
    }

    pub fn peers(&self) -> impl Iterator<Item = &SimPeer> {
        self.peers.values()
    }

    /// Add a participant: late-join sync from everyone already present, then
    /// a join notification on every replica
    pub fn join(&mut self, participant: ParticipantId, name: &str) -> TenureResult<()> {
        if !self.directory.join(participant, name) {
            return Err(TenureError::InvalidParticipant(participant));
        }

        let mut newcomer = SimPeer::new(participant, self.directory.clone(), &self.config);
        for existing in self.peers.values_mut() {
            for frame in existing.snapshots() {
                debug!(to = %participant, object = %frame.object, clock = %frame.clock, "late-join sync");
                let _ = newcomer.deliver(frame);
            }
        }

        let others: Vec<ParticipantId> = self.peers.keys().copied().collect();
        self.peers.insert(participant, newcomer);
        for other in others {
            self.add_link(other, participant);
            self.add_link(participant, other);
        }

        for peer in self.peers.values_mut() {
            peer.joined(participant);
        }
        info!(%participant, present = self.peers.len(), "simulated join");
        Ok(())
    }

    /// Remove a participant: its ownerships fall back to the master, then
    /// every remaining replica gets a leave notification
    pub fn leave(&mut self, participant: ParticipantId) -> TenureResult<()> {
        if self.peers.remove(&participant).is_none() {
            return Err(TenureError::InvalidParticipant(participant));
        }
        self.directory.leave(participant);
        self.links
            .retain(|(from, to), _| *from != participant && *to != participant);
        self.failures.remove(&participant);

        for peer in self.peers.values_mut() {
            peer.left(participant);
        }
        info!(%participant, present = self.peers.len(), "simulated leave");
        Ok(())
    }

    /// Report the next `count` broadcasts by `participant` as failed
    pub fn fail_broadcasts(&mut self, participant: ParticipantId, count: usize) {
        *self.failures.entry(participant).or_insert(0) += count;
    }

    fn add_link(&mut self, from: ParticipantId, to: ParticipantId) {
        let seed = self.seed_counter;
        self.seed_counter += 1;
        self.links
            .insert((from, to), ChaosLink::new(self.config.conditions.clone(), seed));
    }

    /// One frame: tick every peer, push its broadcasts onto the links, then
    /// deliver whatever the links release
    pub fn step(&mut self) {
        let frame = self.config.frame;
        self.now += frame;

        let ids: Vec<ParticipantId> = self.peers.keys().copied().collect();
        for id in &ids {
            if let Some(peer) = self.peers.get_mut(id) {
                peer.tick(frame);
            }
            self.flush(*id);
        }

        let mut arrivals = Vec::new();
        for ((_, to), link) in self.links.iter_mut() {
            for datagram in link.tick(frame) {
                arrivals.push((*to, datagram));
            }
        }
        // Link iteration order is arbitrary; keep delivery order stable
        arrivals.sort_by_key(|(to, _)| *to);
        for (to, datagram) in arrivals {
            if let Some(peer) = self.peers.get_mut(&to) {
                // Stale and duplicate frames are rejected and logged by the objects
                let _ = peer.deliver_bytes(datagram);
            }
        }
    }

    pub fn run_for(&mut self, duration: Duration) {
        let frames = duration.as_nanos() / self.config.frame.as_nanos().max(1);
        for _ in 0..frames {
            self.step();
        }
    }

    /// Run long enough for assignments to settle and propagate
    pub fn settle(&mut self) {
        let settle = self.config.tenure.pool.settle_delay() + Duration::from_secs(2);
        self.run_for(settle);
    }

    fn flush(&mut self, from: ParticipantId) {
        loop {
            let frames = match self.peers.get_mut(&from) {
                Some(peer) => peer.peer.take_outbox(),
                None => return,
            };
            if frames.is_empty() {
                return;
            }

            for frame in frames {
                let result = self.transmit(from, &frame);
                if let Some(peer) = self.peers.get_mut(&from) {
                    let _ = peer.report(result);
                }
            }
        }
    }

    fn transmit(&mut self, from: ParticipantId, frame: &SyncFrame) -> BroadcastResult {
        if let Some(remaining) = self.failures.get_mut(&from) {
            if *remaining > 0 {
                *remaining -= 1;
                return BroadcastResult::failed(frame.object, frame.clock, frame.encoded_len());
            }
        }

        let datagram = match frame.encode() {
            Ok(datagram) => datagram,
            Err(_) => {
                return BroadcastResult::failed(frame.object, frame.clock, frame.encoded_len())
            }
        };
        for ((link_from, _), link) in self.links.iter_mut() {
            if *link_from == from {
                link.send(datagram.clone());
            }
        }
        BroadcastResult::succeeded(frame.object, frame.clock, datagram.len())
    }

    /// Hand `frame` straight to `to`, bypassing the links
    pub fn inject(&mut self, to: ParticipantId, frame: SyncFrame) -> TenureResult<()> {
        match self.peers.get_mut(&to) {
            Some(peer) => peer.deliver(frame),
            None => Err(TenureError::InvalidParticipant(to)),
        }
    }

    /// Committed state of everything `from` owns
    pub fn snapshots_of(&mut self, from: ParticipantId) -> Vec<SyncFrame> {
        self.peers
            .get_mut(&from)
            .map(|peer| peer.snapshots())
            .unwrap_or_default()
    }

    /// Committed clock of every object on `observer`'s replica
    pub fn committed_clocks(&self, observer: ParticipantId) -> Vec<(ObjectId, SyncClock)> {
        let Some(peer) = self.peers.get(&observer) else {
            return Vec::new();
        };
        let mut clocks: Vec<(ObjectId, SyncClock)> = peer
            .pool
            .objects()
            .map(|object| (object.id(), object.core().committed()))
            .collect();
        clocks.push((ROSTER_ID, peer.roster.core().committed()));
        clocks
    }

    /// Owner of `slot` as seen by `observer`'s replica
    pub fn slot_owner(&self, observer: ParticipantId, slot: SlotId) -> Option<ParticipantId> {
        self.peers
            .get(&observer)?
            .pool
            .object(slot)
            .map(|object| object.owner_id())
    }

    /// Counter value of `participant`'s own object as seen by `observer`
    pub fn counter_seen_by(
        &self,
        observer: ParticipantId,
        participant: ParticipantId,
    ) -> Option<u32> {
        self.peers
            .get(&observer)?
            .pool
            .objects()
            .find(|object| object.owner_id() == participant)
            .map(|object| object.data().value)
    }

    /// Whether `observer`'s replica would let `requesting` take `object`
    pub fn authorize(
        &self,
        observer: ParticipantId,
        object: ObjectId,
        requesting: ParticipantId,
    ) -> bool {
        match self.peers.get(&observer) {
            Some(peer) => {
                let session = peer.peer.env();
                peer.pool.authorize_transfer(object, requesting, requesting, session)
                    || (object == ROSTER_ID
                        && peer.roster.authorize_transfer(object, requesting, requesting, session))
            }
            None => false,
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
    fn test_rejects_bad_config() {
        let config = SimConfig {
            pool_capacity: 200,
            ..SimConfig::default()
        };
        assert!(SessionSimulator::new(config).is_err());
    }

    #[test]
    fn test_join_twice_is_rejected() {
        let mut sim = SessionSimulator::new(SimConfig::default()).unwrap();
        sim.join(p(1), "alice").unwrap();
        assert!(sim.join(p(1), "alice").is_err());
        assert!(sim.leave(p(9)).is_err());
    }

    #[test]
    fn test_links_follow_membership() {
        let mut sim = SessionSimulator::new(SimConfig::default()).unwrap();
        sim.join(p(1), "alice").unwrap();
        sim.join(p(2), "bob").unwrap();
        sim.join(p(3), "carol").unwrap();
        assert_eq!(sim.links.len(), 6);

        sim.leave(p(2)).unwrap();
        assert_eq!(sim.links.len(), 2);
    }

    #[test]
    fn test_first_participant_gets_a_slot() {
        let mut sim = SessionSimulator::new(SimConfig::default()).unwrap();
        sim.join(p(1), "alice").unwrap();
        sim.settle();

        let alice = sim.peer(p(1)).unwrap();
        assert_eq!(alice.pool().local_object().map(|o| o.slot()), Some(SlotId::new(0)));
        assert_eq!(sim.slot_owner(p(1), SlotId::new(0)), Some(p(1)));
    }
}
