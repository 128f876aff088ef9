//! Replicated sign-up roster
//!
//! Payload layout:
//!
//! ```text
//! locked: u8 | capacity: u16 LE | capacity x participant: i32 LE
//! ```
//!
//! Mutations are owner-only. A locked roster, a full roster and a duplicate
//! add all succeed without changing anything.

use bytes::{BufMut, Bytes, BytesMut};
use tracing::{debug, info, warn};

use tenure_core::{
    get_bool, get_participant, get_u16, put_participant, ObjectId, ParticipantId, RosterConfig,
    SyncConfig, SyncFrame, TenureError, TenureResult, MAX_LOBBY_SIZE,
};
use tenure_sync::{
    BroadcastResult, Deferred, Replicated, Replication, Session, SessionObject, SyncCore,
};

use crate::{InsertOutcome, ParticipantSet};

/// Downstream consumer of a started roster
pub trait ActivityManager {
    /// Start with the compacted member list, in roster order
    fn try_start_with(&mut self, participants: &[ParticipantId]);
}

/// Presentation hook run after every committed roster update
pub trait RosterView {
    fn update_players_view(&mut self, roster: &ParticipantSet, session: &dyn Session);
}

/// Logs every member's display name
#[derive(Clone, Copy, Debug, Default)]
pub struct LogView;

impl RosterView for LogView {
    fn update_players_view(&mut self, roster: &ParticipantSet, session: &dyn Session) {
        for id in roster.iter() {
            debug!(member = %session.resolve_display_name(id), "lobby member");
        }
    }
}

#[derive(Debug)]
pub struct Roster<M, V = LogView> {
    core: SyncCore,
    /// Configured size; every replica keeps exactly this many slots
    capacity: usize,
    set: ParticipantSet,
    locked: bool,
    signed_up: usize,
    manager: M,
    view: V,
}

impl<M: ActivityManager> Roster<M, LogView> {
    pub fn new(id: ObjectId, config: &RosterConfig, sync: &SyncConfig, manager: M) -> Self {
        Roster::with_view(id, config, sync, manager, LogView)
    }
}

impl<M: ActivityManager, V: RosterView> Roster<M, V> {
    pub fn with_view(
        id: ObjectId,
        config: &RosterConfig,
        sync: &SyncConfig,
        manager: M,
        view: V,
    ) -> Self {
        let capacity = config.max_lobby_size.clamp(1, MAX_LOBBY_SIZE);
        Roster {
            core: SyncCore::new(id, "roster", sync),
            capacity,
            set: ParticipantSet::new(capacity),
            locked: false,
            signed_up: 0,
            manager,
            view,
        }
    }

    pub fn id(&self) -> ObjectId {
        self.core.id()
    }

    pub fn participants(&self) -> &ParticipantSet {
        &self.set
    }

    pub fn is_locked(&self) -> bool {
        self.locked
    }

    /// Members counted at the last committed update
    pub fn signed_up(&self) -> usize {
        self.signed_up
    }

    pub fn manager(&self) -> &M {
        &self.manager
    }

    pub fn manager_mut(&mut self) -> &mut M {
        &mut self.manager
    }

    pub fn view(&self) -> &V {
        &self.view
    }

    fn ensure_owner(&self, session: &dyn Session) -> TenureResult<()> {
        let id = self.core.id();
        if session.is_local_owner_of(id) {
            Ok(())
        } else {
            debug!(object = %self.core.name(), "roster mutation refused: not owner");
            Err(TenureError::NotOwner {
                object: id,
                owner: session.owner_of(id),
            })
        }
    }

    fn replicate(&mut self, session: &mut dyn Session) -> TenureResult<()> {
        self.request_replication(session).map(|_| ())
    }

    pub fn add(&mut self, participant: ParticipantId, session: &mut dyn Session) -> TenureResult<()> {
        self.ensure_owner(&*session)?;
        if self.locked {
            debug!(%participant, "roster locked, add ignored");
            return Ok(());
        }

        match self.set.insert(participant) {
            InsertOutcome::Inserted(index) => {
                debug!(%participant, index, "added to roster");
                self.replicate(session)
            }
            InsertOutcome::AlreadyPresent => Ok(()),
            InsertOutcome::Full => {
                warn!(%participant, capacity = self.set.capacity(), "roster full, add dropped");
                Ok(())
            }
            InsertOutcome::Invalid => Err(TenureError::InvalidParticipant(participant)),
        }
    }

    pub fn remove(&mut self, participant: ParticipantId, session: &mut dyn Session) -> TenureResult<()> {
        self.ensure_owner(&*session)?;
        if self.locked {
            debug!(%participant, "roster locked, remove ignored");
            return Ok(());
        }

        if self.set.remove(participant) {
            debug!(%participant, "removed from roster");
            self.replicate(session)
        } else {
            Ok(())
        }
    }

    pub fn lock(&mut self, session: &mut dyn Session) -> TenureResult<()> {
        self.set_locked(true, session)
    }

    pub fn unlock(&mut self, session: &mut dyn Session) -> TenureResult<()> {
        self.set_locked(false, session)
    }

    fn set_locked(&mut self, locked: bool, session: &mut dyn Session) -> TenureResult<()> {
        self.ensure_owner(&*session)?;
        if self.locked == locked {
            return Ok(());
        }
        self.locked = locked;
        self.replicate(session)
    }

    /// Empty every slot. Replicated only when called by the owner.
    pub fn reset(&mut self, session: &mut dyn Session) -> TenureResult<()> {
        self.set = ParticipantSet::new(self.capacity);
        if session.is_local_owner_of(self.core.id()) {
            self.replicate(session)
        } else {
            Ok(())
        }
    }

    /// Hand the compacted member list to the activity manager
    pub fn try_to_start(&mut self, session: &mut dyn Session) -> TenureResult<Vec<ParticipantId>> {
        self.ensure_owner(&*session)?;

        let players = self.set.compact();
        for id in &players {
            debug!(member = %session.resolve_display_name(*id), "joining activity");
        }
        info!(count = players.len(), "trying to start activity");
        self.manager.try_start_with(&players);
        Ok(players)
    }

    /// Replace the roster with everyone present, start, then replicate
    pub fn start_with_everyone(
        &mut self,
        present: &[ParticipantId],
        session: &mut dyn Session,
    ) -> TenureResult<Vec<ParticipantId>> {
        self.ensure_owner(&*session)?;

        let mut set = ParticipantSet::new(self.capacity);
        for id in present {
            if set.insert(*id) == InsertOutcome::Full {
                warn!(participant = %id, capacity = set.capacity(), "roster full, participant left out");
            }
        }
        self.set = set;

        let players = self.try_to_start(session)?;
        self.replicate(session)?;
        Ok(players)
    }
}

impl<M: ActivityManager, V: RosterView> Replicated for Roster<M, V> {
    fn core(&self) -> &SyncCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut SyncCore {
        &mut self.core
    }

    fn encode_state(&self, buf: &mut BytesMut) {
        buf.put_u8(self.locked as u8);
        buf.put_u16_le(self.set.capacity() as u16);
        for id in self.set.slots() {
            put_participant(buf, *id);
        }
    }

    fn decode_state(&mut self, buf: &mut Bytes) -> TenureResult<()> {
        let locked = get_bool(buf)?;
        let capacity = get_u16(buf)? as usize;
        if capacity != self.capacity {
            return Err(TenureError::MalformedPayload(format!(
                "roster capacity {} does not match configured {}",
                capacity, self.capacity
            )));
        }

        let mut slots = Vec::with_capacity(capacity);
        for _ in 0..capacity {
            slots.push(get_participant(buf)?);
        }
        let set = ParticipantSet::from_slots(slots)?;

        self.locked = locked;
        self.set = set;
        Ok(())
    }

    fn on_update_applied(&mut self, session: &mut dyn Session) {
        self.signed_up = self.set.len();
        info!(signed_up = self.signed_up, locked = self.locked, "roster updated");
        self.view.update_players_view(&self.set, &*session);
    }
}

impl<M: ActivityManager, V: RosterView> SessionObject for Roster<M, V> {
    fn handles(&self, object: ObjectId) -> bool {
        object == self.core.id()
    }

    fn receive(&mut self, frame: SyncFrame, session: &mut dyn Session) -> TenureResult<()> {
        Replication::receive(self, frame.clock, frame.payload, session)
    }

    fn on_broadcast_result(
        &mut self,
        result: BroadcastResult,
        session: &mut dyn Session,
    ) -> TenureResult<()> {
        Replication::on_broadcast_result(self, result, session)
    }

    fn run_deferred(&mut self, deferred: Deferred, session: &mut dyn Session) {
        self.run_replication_deferred(deferred.action, session);
    }

    fn authorize_transfer(
        &self,
        _object: ObjectId,
        requesting: ParticipantId,
        requested_owner: ParticipantId,
        session: &dyn Session,
    ) -> bool {
        self.on_ownership_request(requesting, requested_owner, session)
    }

    fn snapshots(&self, session: &dyn Session) -> Vec<SyncFrame> {
        if !session.is_local_owner_of(self.core.id()) {
            return Vec::new();
        }
        self.snapshot().into_iter().collect()
    }

    fn on_participant_left(&mut self, participant: ParticipantId, session: &mut dyn Session) {
        if !session.is_local_owner_of(self.core.id()) {
            return;
        }
        if let Err(err) = self.remove(participant, session) {
            warn!(%participant, error = %err, "could not drop departed participant from roster");
        }
    }
}
