//! Example payloads for the simulator

use bytes::{BufMut, Bytes, BytesMut};
use tracing::debug;

use tenure_core::{get_u32, ParticipantId, TenureResult};
use tenure_lobby::ActivityManager;
use tenure_pool::{PooledState, SlotView};

/// Per-participant counter carried by a pooled object
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Counter {
    pub value: u32,
    /// Times the pool reset this payload
    pub cleared: u32,
    /// Committed updates observed
    pub updates: u32,
    pub last_view: Option<SlotView>,
}

impl Counter {
    pub fn increment(&mut self) {
        self.value = self.value.wrapping_add(1);
    }
}

impl PooledState for Counter {
    fn encode(&self, buf: &mut BytesMut) {
        buf.put_u32_le(self.value);
    }

    fn decode(&mut self, buf: &mut Bytes) -> TenureResult<()> {
        self.value = get_u32(buf)?;
        Ok(())
    }

    fn clear_synced_data(&mut self) {
        self.value = 0;
        self.cleared += 1;
    }

    fn handle_new_synced_data(&mut self, view: &SlotView) {
        self.updates += 1;
        self.last_view = Some(*view);
        debug!(
            slot = %view.slot,
            owner = %view.owner_id,
            mine = view.is_mine(),
            counter = self.value,
            "counter got new synced data"
        );
    }
}

/// Activity manager that records every start request
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RecordingActivity {
    pub starts: Vec<Vec<ParticipantId>>,
}

impl ActivityManager for RecordingActivity {
    fn try_start_with(&mut self, participants: &[ParticipantId]) {
        self.starts.push(participants.to_vec());
    }
}
