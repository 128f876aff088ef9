//! Replication wire format
//!
//! Frame = object id (u64 LE) + clock (u32 LE) + payload length (u32 LE) + payload
//!
//! The payload is whatever the object's encoder produced. The helpers at the
//! bottom of this module are shared by every payload codec so that short
//! buffers surface as errors instead of panics inside `bytes`.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::{ObjectId, ParticipantId, SyncClock, TenureError, TenureResult};

/// Size of the frame header (object + clock + length)
pub const FRAME_HEADER_SIZE: usize = 8 + 4 + 4;

/// Maximum payload carried by one frame
pub const MAX_PAYLOAD_SIZE: usize = 16 * 1024;

/// One replication update for one object
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SyncFrame {
    pub object: ObjectId,
    pub clock: SyncClock,
    pub payload: Bytes,
}

impl SyncFrame {
    pub fn new(object: ObjectId, clock: SyncClock, payload: Bytes) -> Self {
        SyncFrame {
            object,
            clock,
            payload,
        }
    }

    /// Total encoded size in bytes
    pub fn encoded_len(&self) -> usize {
        FRAME_HEADER_SIZE + self.payload.len()
    }

    /// Serialize to bytes
    pub fn encode(&self) -> TenureResult<Bytes> {
        if self.payload.len() > MAX_PAYLOAD_SIZE {
            return Err(TenureError::MalformedPayload(format!(
                "payload too large: {} > {}",
                self.payload.len(),
                MAX_PAYLOAD_SIZE
            )));
        }

        let mut buf = BytesMut::with_capacity(self.encoded_len());
        buf.put_u64_le(self.object.0);
        buf.put_u32_le(self.clock.value());
        buf.put_u32_le(self.payload.len() as u32);
        buf.put_slice(&self.payload);
        Ok(buf.freeze())
    }

    /// Parse from bytes
    pub fn decode(mut buf: Bytes) -> TenureResult<Self> {
        ensure_remaining(&buf, FRAME_HEADER_SIZE)?;

        let object = ObjectId(buf.get_u64_le());
        let clock = SyncClock::new(buf.get_u32_le());
        let len = buf.get_u32_le() as usize;

        if len > MAX_PAYLOAD_SIZE {
            return Err(TenureError::MalformedPayload(format!(
                "declared payload too large: {}",
                len
            )));
        }
        ensure_remaining(&buf, len)?;

        let payload = buf.split_to(len);
        if buf.has_remaining() {
            return Err(TenureError::MalformedPayload(format!(
                "{} trailing bytes after frame",
                buf.remaining()
            )));
        }

        Ok(SyncFrame {
            object,
            clock,
            payload,
        })
    }
}

/// Fail with `BufferTooShort` unless `needed` bytes remain
#[inline]
pub fn ensure_remaining(buf: &impl Buf, needed: usize) -> TenureResult<()> {
    if buf.remaining() < needed {
        return Err(TenureError::BufferTooShort {
            expected: needed,
            actual: buf.remaining(),
        });
    }
    Ok(())
}

#[inline]
pub fn put_participant(buf: &mut BytesMut, participant: ParticipantId) {
    buf.put_i32_le(participant.0);
}

pub fn get_participant(buf: &mut Bytes) -> TenureResult<ParticipantId> {
    ensure_remaining(buf, 4)?;
    Ok(ParticipantId(buf.get_i32_le()))
}

pub fn get_u32(buf: &mut Bytes) -> TenureResult<u32> {
    ensure_remaining(buf, 4)?;
    Ok(buf.get_u32_le())
}

pub fn get_u16(buf: &mut Bytes) -> TenureResult<u16> {
    ensure_remaining(buf, 2)?;
    Ok(buf.get_u16_le())
}

pub fn get_bool(buf: &mut Bytes) -> TenureResult<bool> {
    ensure_remaining(buf, 1)?;
    match buf.get_u8() {
        0 => Ok(false),
        1 => Ok(true),
        other => Err(TenureError::MalformedPayload(format!(
            "invalid bool byte {}",
            other
        ))),
    }
}
