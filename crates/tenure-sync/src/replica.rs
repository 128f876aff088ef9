//! Replicated object protocol
//!
//! A replicated object is any type that exposes a [`SyncCore`] and the
//! [`Replicated`] hooks. The protocol itself lives in [`Replication`], which
//! is implemented for every `Replicated` type by a blanket impl and therefore
//! cannot be overridden:
//!
//! ```text
//! owner:   request_replication ─► clock+1 ─► before_broadcast ─► broadcast
//!                                     │                              │
//!                                     │            on_broadcast_result(ok)  ─► commit + on_update_applied
//!                                     │            on_broadcast_result(err) ─► clock = committed
//!                                     └─► (1 frame) confirm_replication ─► commit if still pending
//!
//! replica: receive(clock) ─► clock newer than committed? ─► decode ─► on_update_applied ─► committed = clock
//! ```

use bytes::{Bytes, BytesMut};
use tracing::{debug, trace, warn};

use tenure_core::{ObjectId, ParticipantId, SyncClock, SyncConfig, SyncFrame, TenureError, TenureResult};

use crate::{
    BroadcastResult, Deferred, DeferredAction, Delay, OpenPolicy, OwnershipPolicy, Session,
    TransferFlags, TransferRequest,
};

/// Clock and transfer state shared by every replicated object
#[derive(Clone, Debug)]
pub struct SyncCore {
    id: ObjectId,
    name: String,
    /// Clock of the latest local broadcast request or applied update
    clock: SyncClock,
    /// Last known-good clock
    committed: SyncClock,
    /// Newest broadcast still waiting for a transport result
    pending: Option<SyncClock>,
    flags: TransferFlags,
    confirm_attempts: u32,
}

impl SyncCore {
    pub fn new(id: ObjectId, name: impl Into<String>, config: &SyncConfig) -> Self {
        SyncCore {
            id,
            name: name.into(),
            clock: SyncClock::ZERO,
            committed: SyncClock::ZERO,
            pending: None,
            flags: TransferFlags::from(config),
            confirm_attempts: config.confirm_attempts.max(1),
        }
    }

    pub fn id(&self) -> ObjectId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn clock(&self) -> SyncClock {
        self.clock
    }

    pub fn committed(&self) -> SyncClock {
        self.committed
    }

    pub fn pending(&self) -> Option<SyncClock> {
        self.pending
    }

    pub fn flags(&self) -> TransferFlags {
        self.flags
    }

    pub fn set_flags(&mut self, flags: TransferFlags) {
        self.flags = flags;
    }
}

/// Object-specific hooks around the fixed replication protocol
pub trait Replicated {
    fn core(&self) -> &SyncCore;

    fn core_mut(&mut self) -> &mut SyncCore;

    /// Serialize every synced field
    fn encode_state(&self, buf: &mut BytesMut);

    /// Overwrite every synced field from `buf`. Called only for updates that
    /// already passed the clock gate.
    fn decode_state(&mut self, buf: &mut Bytes) -> TenureResult<()>;

    /// React to newly committed state, local or remote
    fn on_update_applied(&mut self, session: &mut dyn Session);

    fn before_broadcast(&mut self, _session: &mut dyn Session) {}

    fn after_broadcast_succeeded(&mut self, _session: &mut dyn Session) {}

    fn ownership_policy(&self) -> &dyn OwnershipPolicy {
        &OpenPolicy
    }
}

/// The replication protocol, available on every [`Replicated`] type
pub trait Replication: Replicated {
    /// Broadcast the current state. Only the process owner may call this.
    fn request_replication(&mut self, session: &mut dyn Session) -> TenureResult<SyncClock> {
        let id = self.core().id();
        if !session.is_local_owner_of(id) {
            let owner = session.owner_of(id);
            warn!(
                object = %self.core().name(),
                owner = %session.resolve_display_name(owner),
                "cannot request replication: do not own object"
            );
            return Err(TenureError::NotOwner { object: id, owner });
        }

        let clock = {
            let core = self.core_mut();
            core.clock = core.clock.next();
            core.pending = Some(core.clock);
            core.clock
        };
        debug!(object = %self.core().name(), %clock, "replication requested");

        self.before_broadcast(session);

        let mut buf = BytesMut::new();
        self.encode_state(&mut buf);
        session.broadcast(id, buf.freeze(), clock);
        session.schedule_deferred(
            Delay::Frames(1),
            Deferred::new(id, DeferredAction::ConfirmReplication { clock, attempt: 1 }),
        );

        Ok(clock)
    }

    /// Transport callback for a broadcast issued by this replica
    fn on_broadcast_result(
        &mut self,
        result: BroadcastResult,
        session: &mut dyn Session,
    ) -> TenureResult<()> {
        let committed = self.core().committed;
        if !result.clock.is_newer_than(committed) {
            trace!(
                object = %self.core().name(),
                clock = %result.clock,
                %committed,
                "ignoring result for committed clock"
            );
            return Ok(());
        }

        if self.core().pending == Some(result.clock) {
            self.core_mut().pending = None;
        }

        if !result.success {
            let core = self.core_mut();
            let rolled_back = core.clock;
            core.clock = core.committed;
            core.pending = None;
            warn!(
                object = %core.name,
                bytes = result.byte_count,
                from = %rolled_back,
                to = %core.committed,
                "broadcast failed, clock rolled back"
            );
            return Err(TenureError::TransmissionFailed {
                object: core.id,
                clock: result.clock,
                bytes: result.byte_count,
            });
        }

        self.after_broadcast_succeeded(session);
        commit_through(self, result.clock, session);
        Ok(())
    }

    /// Deferred self-check scheduled one frame after each broadcast
    fn confirm_replication(&mut self, clock: SyncClock, attempt: u32, session: &mut dyn Session) {
        let core = self.core();
        if core.clock != clock || !clock.is_newer_than(core.committed) {
            trace!(object = %core.name, %clock, "confirmation superseded");
            return;
        }
        if !session.is_local_owner_of(core.id) {
            trace!(object = %core.name, %clock, "confirmation dropped: ownership moved");
            return;
        }

        if core.pending == Some(clock) {
            if attempt >= core.confirm_attempts {
                warn!(
                    object = %core.name,
                    %clock,
                    attempt,
                    "no broadcast result reported, leaving clock uncommitted"
                );
                return;
            }
            let id = core.id;
            session.schedule_deferred(
                Delay::Frames(1),
                Deferred::new(
                    id,
                    DeferredAction::ConfirmReplication {
                        clock,
                        attempt: attempt + 1,
                    },
                ),
            );
            return;
        }

        commit_through(self, clock, session);
    }

    /// Inbound update from another participant.
    ///
    /// Applied only when `clock` is newer than the committed clock under
    /// serial-number ordering, so "newer" means less than half the `u32`
    /// range ahead. This differs from a plain integer comparison only near
    /// wrap-around: with committed 5, an incoming `2^31 + 10` counts as older
    /// and is rejected.
    fn receive(
        &mut self,
        clock: SyncClock,
        mut payload: Bytes,
        session: &mut dyn Session,
    ) -> TenureResult<()> {
        let committed = self.core().committed;
        if !clock.is_newer_than(committed) {
            warn!(
                object = %self.core().name(),
                incoming = %clock,
                %committed,
                "rejecting network update: clock not newer than committed"
            );
            return Err(TenureError::StaleUpdate {
                object: self.core().id(),
                incoming: clock,
                committed,
            });
        }

        if let Err(err) = self.decode_state(&mut payload) {
            warn!(object = %self.core().name(), %clock, error = %err, "discarding undecodable update");
            return Err(err);
        }

        {
            let core = self.core_mut();
            core.clock = core.clock.latest(clock);
            core.pending = None;
        }

        self.on_update_applied(session);
        self.core_mut().committed = clock;
        Ok(())
    }

    /// Ownership-request check: global flags first, then the policy
    fn on_ownership_request(
        &self,
        requesting: ParticipantId,
        requested_owner: ParticipantId,
        session: &dyn Session,
    ) -> bool {
        let request = TransferRequest {
            object: self.core().id(),
            requesting,
            requested_owner,
        };

        if let Some(verdict) = self.core().flags().check(&request, session.local_participant()) {
            debug!(object = %self.core().name(), %requesting, "transfer refused by global flags");
            return verdict;
        }

        let granted = self.ownership_policy().is_transfer_authorized(&request, session);
        if !granted {
            debug!(
                object = %self.core().name(),
                requesting = %session.resolve_display_name(requesting),
                "transfer refused by policy"
            );
        }
        granted
    }

    /// Take process ownership for the local participant
    fn claim_ownership(&mut self, session: &mut dyn Session) -> TenureResult<()> {
        let id = self.core().id();
        if session.is_local_owner_of(id) {
            return Ok(());
        }

        let local = session.local_participant();
        if !self.on_ownership_request(local, local, &*session) {
            warn!(object = %self.core().name(), "cannot claim ownership: transfer denied");
            return Err(TenureError::TransferDenied {
                object: id,
                requesting: local,
            });
        }

        session.transfer_ownership(id, local);
        debug!(object = %self.core().name(), participant = %local, "claimed ownership");
        Ok(())
    }

    /// Committed state as a frame, for late joiners
    fn snapshot(&self) -> Option<SyncFrame> {
        let core = self.core();
        if core.committed == SyncClock::ZERO {
            return None;
        }
        let mut buf = BytesMut::new();
        self.encode_state(&mut buf);
        Some(SyncFrame::new(core.id, core.committed, buf.freeze()))
    }

    /// Dispatch a deferred action owned by the replication protocol
    fn run_replication_deferred(&mut self, action: DeferredAction, session: &mut dyn Session) {
        match action {
            DeferredAction::ConfirmReplication { clock, attempt } => {
                self.confirm_replication(clock, attempt, session)
            }
            other => trace!(object = %self.core().name(), action = ?other, "no handler for deferred action"),
        }
    }
}

impl<R: Replicated + ?Sized> Replication for R {}

/// Commit a successful local broadcast and show it to the local hooks
fn commit_through<R: Replicated + ?Sized>(object: &mut R, clock: SyncClock, session: &mut dyn Session) {
    if !clock.is_newer_than(object.core().committed) {
        return;
    }
    {
        let core = object.core_mut();
        core.clock = core.clock.latest(clock);
    }
    object.on_update_applied(session);
    object.core_mut().committed = clock;
}
