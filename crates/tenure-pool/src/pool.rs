//! Object pool
//!
//! Assignment and reclaim run only on the replica that owns the pool. Every
//! other replica learns about assignments through the pooled objects' own
//! replication and keeps its allocator view in step, so it can take over
//! when pool ownership moves.

use tracing::{debug, error, info, warn};

use tenure_core::{
    ObjectId, ParticipantId, PoolConfig, SlotId, SyncConfig, SyncFrame, TenureError, TenureResult,
};
use tenure_sync::{BroadcastResult, Deferred, Replication, Session, SessionObject};

use crate::{FixedSlotAllocator, PoolHandle, PooledObject, PooledState, SlotAllocator};

#[derive(Debug)]
pub struct ObjectPool<T, A = FixedSlotAllocator> {
    handle: PoolHandle,
    objects: Vec<PooledObject<T>>,
    allocator: A,
}

impl<T: PooledState> ObjectPool<T, FixedSlotAllocator> {
    /// Pool of `capacity` slots, each payload built by `make`
    pub fn new<F>(
        id: ObjectId,
        capacity: usize,
        make: F,
        sync: &SyncConfig,
        config: &PoolConfig,
    ) -> Self
    where
        F: FnMut(SlotId) -> T,
    {
        Self::with_allocator(id, FixedSlotAllocator::new(capacity), make, sync, config)
    }
}

impl<T: PooledState, A: SlotAllocator> ObjectPool<T, A> {
    pub fn with_allocator<F>(
        id: ObjectId,
        allocator: A,
        mut make: F,
        sync: &SyncConfig,
        config: &PoolConfig,
    ) -> Self
    where
        F: FnMut(SlotId) -> T,
    {
        let handle = PoolHandle::new(id);
        let objects = allocator
            .enumerate_slots()
            .into_iter()
            .map(|slot| {
                PooledObject::new(handle.clone(), slot, make(slot), sync, config.settle_delay())
            })
            .collect();

        ObjectPool {
            handle,
            objects,
            allocator,
        }
    }

    pub fn id(&self) -> ObjectId {
        self.handle.pool()
    }

    pub fn handle(&self) -> &PoolHandle {
        &self.handle
    }

    pub fn capacity(&self) -> usize {
        self.objects.len()
    }

    pub fn allocator(&self) -> &A {
        &self.allocator
    }

    pub fn objects(&self) -> impl Iterator<Item = &PooledObject<T>> {
        self.objects.iter()
    }

    pub fn object(&self, slot: SlotId) -> Option<&PooledObject<T>> {
        self.objects.get(slot.index())
    }

    pub fn object_mut(&mut self, slot: SlotId) -> Option<&mut PooledObject<T>> {
        self.objects.get_mut(slot.index())
    }

    /// The object registered for the local participant
    pub fn local_object(&self) -> Option<&PooledObject<T>> {
        let id = self.handle.registered()?;
        self.objects.iter().find(|o| o.id() == id)
    }

    pub fn local_object_mut(&mut self) -> Option<&mut PooledObject<T>> {
        let id = self.handle.registered()?;
        self.objects.iter_mut().find(|o| o.id() == id)
    }

    /// Slot currently assigned to `participant`
    pub fn slot_of(&self, participant: ParticipantId) -> Option<SlotId> {
        if participant.is_none() {
            return None;
        }
        self.objects
            .iter()
            .find(|o| o.owner_id() == participant)
            .map(|o| o.slot())
    }

    /// Slots currently counted against capacity
    pub fn held_slots(&self) -> usize {
        self.objects.iter().filter(|o| o.state().is_held()).count()
    }

    /// Assign a slot to a joining participant.
    ///
    /// Returns `Ok(None)` on replicas that do not own the pool. Exhaustion is
    /// not retried; the participant gets nothing until a later join.
    pub fn assign(
        &mut self,
        participant: ParticipantId,
        session: &mut dyn Session,
    ) -> TenureResult<Option<SlotId>> {
        if !session.is_local_owner_of(self.id()) {
            debug!(pool = %self.id(), %participant, "ignoring join: not pool owner");
            return Ok(None);
        }

        if !session.is_valid_participant(participant) {
            warn!(pool = %self.id(), %participant, "ignoring join: participant invalid");
            return Err(TenureError::InvalidParticipant(participant));
        }

        if let Some(slot) = self.slot_of(participant) {
            warn!(pool = %self.id(), %participant, %slot, "ignoring join: participant already holds a slot");
            return Err(TenureError::AlreadyAssigned { participant, slot });
        }

        let slot = match self.allocator.try_allocate() {
            Some(slot) => slot,
            None => {
                error!(
                    pool = %self.id(),
                    participant = %session.resolve_display_name(participant),
                    "cannot allocate object: pool full"
                );
                return Err(TenureError::PoolExhausted { pool: self.id() });
            }
        };

        let pool = self.id();
        let assigned = match self.objects.get_mut(slot.index()) {
            Some(object) => object.set_owner_id(participant, session),
            None => Err(TenureError::PoolExhausted { pool }),
        };
        if let Err(err) = assigned {
            self.allocator.release(slot);
            return Err(err);
        }

        info!(
            pool = %self.id(),
            %slot,
            participant = %session.resolve_display_name(participant),
            "slot assigned"
        );
        Ok(Some(slot))
    }

    /// Reclaim the first slot assigned to a departing participant
    pub fn reclaim(
        &mut self,
        participant: ParticipantId,
        session: &mut dyn Session,
    ) -> TenureResult<Option<SlotId>> {
        if !session.is_local_owner_of(self.id()) {
            return Ok(None);
        }

        if participant.is_none() {
            return Err(TenureError::InvalidParticipant(participant));
        }

        let Some(slot) = self.slot_of(participant) else {
            debug!(pool = %self.id(), %participant, "departing participant held no slot");
            return Ok(None);
        };

        if let Some(object) = self.objects.get_mut(slot.index()) {
            object.set_owner_id(ParticipantId::NONE, session)?;
        }
        self.allocator.release(slot);

        info!(pool = %self.id(), %slot, %participant, "slot returned to pool");
        Ok(Some(slot))
    }

    fn slot_for(&self, object: ObjectId) -> Option<SlotId> {
        // Inverse of `ObjectId::pooled`, wrapping the same way
        let offset = object.0.wrapping_sub(self.id().0).wrapping_sub(1);
        let index = usize::try_from(offset).ok()?;
        (index < self.objects.len()).then_some(SlotId::new(index))
    }

    fn routed(&mut self, object: ObjectId) -> TenureResult<&mut PooledObject<T>> {
        let slot = self.slot_for(object).ok_or(TenureError::UnknownObject(object))?;
        self.objects
            .get_mut(slot.index())
            .ok_or(TenureError::UnknownObject(object))
    }

    /// Keep the allocator in line with a slot's committed assignment
    fn reconcile(&mut self, slot: SlotId) {
        if let Some(object) = self.objects.get(slot.index()) {
            self.allocator.observe(slot, object.owner_id().is_some());
        }
    }
}

impl<T: PooledState, A: SlotAllocator> SessionObject for ObjectPool<T, A> {
    fn handles(&self, object: ObjectId) -> bool {
        object == self.id() || self.slot_for(object).is_some()
    }

    fn receive(&mut self, frame: SyncFrame, session: &mut dyn Session) -> TenureResult<()> {
        let object = self.routed(frame.object)?;
        object.receive(frame.clock, frame.payload, session)?;
        let slot = object.slot();
        self.reconcile(slot);
        Ok(())
    }

    fn on_broadcast_result(
        &mut self,
        result: BroadcastResult,
        session: &mut dyn Session,
    ) -> TenureResult<()> {
        let object = self.routed(result.object)?;
        let slot = object.slot();
        let outcome = object.on_broadcast_result(result, session);
        self.reconcile(slot);
        outcome
    }

    fn run_deferred(&mut self, deferred: Deferred, session: &mut dyn Session) {
        match self.routed(deferred.object) {
            Ok(object) => {
                let slot = object.slot();
                object.run_deferred(deferred.action, session);
                self.reconcile(slot);
            }
            Err(err) => warn!(pool = %self.id(), error = %err, "dropping deferred action"),
        }
    }

    fn authorize_transfer(
        &self,
        object: ObjectId,
        requesting: ParticipantId,
        requested_owner: ParticipantId,
        session: &dyn Session,
    ) -> bool {
        if object == self.id() {
            return true;
        }
        self.slot_for(object)
            .and_then(|slot| self.objects.get(slot.index()))
            .map(|o| o.on_ownership_request(requesting, requested_owner, session))
            .unwrap_or(false)
    }

    fn snapshots(&self, session: &dyn Session) -> Vec<SyncFrame> {
        self.objects
            .iter()
            .filter(|o| session.is_local_owner_of(o.id()))
            .filter_map(|o| o.snapshot())
            .collect()
    }

    fn on_participant_joined(&mut self, participant: ParticipantId, session: &mut dyn Session) {
        // Failures are logged where they are detected
        let _ = self.assign(participant, session);
    }

    fn on_participant_left(&mut self, participant: ParticipantId, session: &mut dyn Session) {
        if let Err(err) = self.reclaim(participant, session) {
            warn!(pool = %self.id(), %participant, error = %err, "reclaim failed");
        }
    }
}
