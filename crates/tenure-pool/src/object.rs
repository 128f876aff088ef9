//! Pooled objects
//!
//! A pooled object is a replicated object with one extra synced field, the
//! assigned participant (`owner_id`), and a payload supplied by the user
//! through [`PooledState`]. The assigned participant is written only by the
//! pool owner and does not follow process ownership around.
//!
//! Slot lifecycle:
//!
//! ```text
//! Unassigned ─set_owner_id(P)─► PendingClaim ─enforce─► Claimed ─P claims─► Active
//!      ▲                                                                      │
//!      └──────────── enforce ◄─── Returning ◄─── set_owner_id(none) ◄─────────┘
//! ```

use std::fmt;
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use tracing::{debug, error, info, trace, warn};

use tenure_core::{
    get_participant, put_participant, ObjectId, ParticipantId, SlotId, SyncClock, SyncConfig,
    TenureError, TenureResult,
};
use tenure_sync::{
    Delay, Deferred, DeferredAction, OwnershipPolicy, Replicated, Replication, Session, SyncCore,
    TransferRequest,
};

use crate::PoolHandle;

/// User payload carried by a pooled object
pub trait PooledState: fmt::Debug {
    fn encode(&self, buf: &mut BytesMut);

    fn decode(&mut self, buf: &mut Bytes) -> TenureResult<()>;

    /// Return every synced field to its default
    fn clear_synced_data(&mut self);

    /// Called after every committed update, even when `owner_id` is unchanged
    fn handle_new_synced_data(&mut self, view: &SlotView);
}

/// Where a slot is in its assignment lifecycle
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SlotState {
    Unassigned,
    PendingClaim,
    Claimed,
    Active,
    Returning,
}

impl SlotState {
    /// Counts against pool capacity
    pub fn is_held(self) -> bool {
        matches!(self, SlotState::Claimed | SlotState::Active)
    }
}

/// Read-only facts handed to [`PooledState::handle_new_synced_data`]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SlotView {
    pub slot: SlotId,
    pub object: ObjectId,
    pub owner_id: ParticipantId,
    pub state: SlotState,
    pub local: ParticipantId,
    pub clock: SyncClock,
}

impl SlotView {
    /// Assigned to the local participant
    pub fn is_mine(&self) -> bool {
        self.owner_id.is_some() && self.owner_id == self.local
    }
}

/// Slot-bound ownership policy: only the assigned participant or the pool
/// owner may take the object
#[derive(Clone, Debug)]
pub struct SlotBinding {
    pool: PoolHandle,
    owner_id: ParticipantId,
}

impl SlotBinding {
    pub fn new(pool: PoolHandle) -> Self {
        SlotBinding {
            pool,
            owner_id: ParticipantId::NONE,
        }
    }

    pub fn owner_id(&self) -> ParticipantId {
        self.owner_id
    }

    pub fn pool(&self) -> &PoolHandle {
        &self.pool
    }
}

impl OwnershipPolicy for SlotBinding {
    fn is_transfer_authorized(&self, _request: &TransferRequest, session: &dyn Session) -> bool {
        session.local_participant() == self.owner_id || session.is_local_owner_of(self.pool.pool())
    }
}

/// One slot's replicated object
#[derive(Debug)]
pub struct PooledObject<T> {
    core: SyncCore,
    slot: SlotId,
    binding: SlotBinding,
    state: SlotState,
    /// Bumped on every owner id write
    assignment: u32,
    settle_delay: Duration,
    data: T,
}

impl<T: PooledState> PooledObject<T> {
    pub fn new(
        pool: PoolHandle,
        slot: SlotId,
        data: T,
        sync: &SyncConfig,
        settle_delay: Duration,
    ) -> Self {
        let id = pool.pool().pooled(slot);
        PooledObject {
            core: SyncCore::new(id, format!("pooled-{}", slot.index()), sync),
            slot,
            binding: SlotBinding::new(pool),
            state: SlotState::Unassigned,
            assignment: 0,
            settle_delay,
            data,
        }
    }

    pub fn id(&self) -> ObjectId {
        self.core.id()
    }

    pub fn slot(&self) -> SlotId {
        self.slot
    }

    /// Participant this slot is assigned to
    pub fn owner_id(&self) -> ParticipantId {
        self.binding.owner_id
    }

    pub fn state(&self) -> SlotState {
        self.state
    }

    pub fn data(&self) -> &T {
        &self.data
    }

    pub fn view(&self, local: ParticipantId) -> SlotView {
        SlotView {
            slot: self.slot,
            object: self.core.id(),
            owner_id: self.binding.owner_id,
            state: self.state,
            local,
            clock: self.core.committed(),
        }
    }

    /// Assign the slot to `participant`, or return it with
    /// `ParticipantId::NONE`. Only the pool owner may do this; the change is
    /// broadcast when the enforcement action fires after the settle delay.
    pub fn set_owner_id(
        &mut self,
        participant: ParticipantId,
        session: &mut dyn Session,
    ) -> TenureResult<()> {
        let pool = self.binding.pool.pool();
        if !session.is_local_owner_of(pool) {
            error!(object = %self.core.name(), "cannot set owner of object: not owner of pool");
            return Err(TenureError::NotPoolOwner { pool });
        }

        self.binding.owner_id = participant;
        self.assignment = self.assignment.wrapping_add(1);
        self.state = if participant.is_some() {
            SlotState::PendingClaim
        } else {
            SlotState::Returning
        };
        info!(
            object = %self.core.name(),
            slot = %self.slot,
            participant = %participant,
            "owner id set"
        );

        session.schedule_deferred(
            Delay::After(self.settle_delay),
            Deferred::new(
                self.core.id(),
                DeferredAction::EnforceOwnership {
                    assignment: self.assignment,
                },
            ),
        );
        Ok(())
    }

    /// Pool owner takes the object, clears it and broadcasts the assignment.
    /// Does nothing if the owner id was written again after `assignment`.
    pub fn enforce_ownership(&mut self, assignment: u32, session: &mut dyn Session) {
        if assignment != self.assignment {
            trace!(
                object = %self.core.name(),
                scheduled = assignment,
                current = self.assignment,
                "enforcement superseded by a later assignment"
            );
            return;
        }

        let owner_id = self.binding.owner_id;
        debug!(
            object = %self.core.name(),
            owner = %session.resolve_display_name(owner_id),
            "pooled object enabled"
        );

        if !session.is_local_owner_of(self.binding.pool.pool()) {
            trace!(object = %self.core.name(), "enforcement skipped: not pool owner");
            return;
        }

        if let Err(err) = self.claim_ownership(session) {
            warn!(object = %self.core.name(), error = %err, "enforcement could not claim object");
            return;
        }

        self.data.clear_synced_data();
        self.state = if owner_id.is_some() {
            SlotState::Claimed
        } else {
            SlotState::Unassigned
        };

        if let Err(err) = self.request_replication(session) {
            warn!(object = %self.core.name(), error = %err, "enforcement broadcast refused");
        }
    }

    /// Apply `f` to the payload and replicate it. Only the assigned
    /// participant, holding process ownership, may do this.
    pub fn mutate<F>(&mut self, session: &mut dyn Session, f: F) -> TenureResult<SyncClock>
    where
        F: FnOnce(&mut T),
    {
        let id = self.core.id();
        let local = session.local_participant();
        if self.binding.owner_id != local || !session.is_local_owner_of(id) {
            warn!(
                object = %self.core.name(),
                assigned = %self.binding.owner_id,
                %local,
                "mutation refused: object not assigned to us"
            );
            return Err(TenureError::NotOwner {
                object: id,
                owner: session.owner_of(id),
            });
        }

        f(&mut self.data);
        self.request_replication(session)
    }

    pub(crate) fn run_deferred(&mut self, action: DeferredAction, session: &mut dyn Session) {
        match action {
            DeferredAction::EnforceOwnership { assignment } => {
                self.enforce_ownership(assignment, session)
            }
            other => self.run_replication_deferred(other, session),
        }
    }

    fn claim_and_log(&mut self, session: &mut dyn Session, reason: &str) -> bool {
        match self.claim_ownership(session) {
            Ok(()) => {
                debug!(object = %self.core.name(), reason, "claimed pooled object");
                true
            }
            Err(err) => {
                warn!(object = %self.core.name(), error = %err, "could not claim pooled object");
                false
            }
        }
    }
}

impl<T: PooledState> Replicated for PooledObject<T> {
    fn core(&self) -> &SyncCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut SyncCore {
        &mut self.core
    }

    fn encode_state(&self, buf: &mut BytesMut) {
        put_participant(buf, self.binding.owner_id);
        self.data.encode(buf);
    }

    fn decode_state(&mut self, buf: &mut Bytes) -> TenureResult<()> {
        let owner_id = get_participant(buf)?;
        self.data.decode(buf)?;
        self.binding.owner_id = owner_id;
        Ok(())
    }

    fn on_update_applied(&mut self, session: &mut dyn Session) {
        let local = session.local_participant();
        let owner_id = self.binding.owner_id;
        let pool = self.binding.pool.pool();

        if owner_id.is_some() && owner_id == local {
            if self.claim_and_log(session, "assigned to us") {
                // Duplicate registration is logged by the handle
                let _ = self.binding.pool.register(self.core.id(), &*session);
                self.state = SlotState::Active;
            } else {
                self.state = SlotState::Claimed;
            }
        } else if owner_id.is_none() && session.is_local_owner_of(pool) {
            self.claim_and_log(session, "unassigned and we own the pool");
            self.state = SlotState::Unassigned;
        } else if owner_id.is_none() {
            self.state = SlotState::Unassigned;
        } else if session.owner_of(self.core.id()) == owner_id {
            self.state = SlotState::Active;
        } else {
            self.state = SlotState::Claimed;
        }

        let view = self.view(local);
        self.data.handle_new_synced_data(&view);
    }

    fn ownership_policy(&self) -> &dyn OwnershipPolicy {
        &self.binding
    }
}
