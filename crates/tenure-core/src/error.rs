//! Error types for Tenure
//!
//! Nothing here is fatal. Every failure is logged where it is detected and
//! leaves the replica at its last committed values.

use thiserror::Error;

use crate::{ObjectId, ParticipantId, SlotId, SyncClock};

/// Core Tenure errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TenureError {
    // Authorization errors
    #[error("object {object} is owned by participant {owner}, not by the local participant")]
    NotOwner { object: ObjectId, owner: ParticipantId },

    #[error("participant {requesting} may not take ownership of object {object}")]
    TransferDenied {
        object: ObjectId,
        requesting: ParticipantId,
    },

    #[error("local participant does not own pool {pool}")]
    NotPoolOwner { pool: ObjectId },

    // Replication errors
    #[error("stale update for {object}: clock {incoming} not newer than {committed}")]
    StaleUpdate {
        object: ObjectId,
        incoming: SyncClock,
        committed: SyncClock,
    },

    #[error("broadcast of {object} at clock {clock} failed for {bytes} bytes")]
    TransmissionFailed {
        object: ObjectId,
        clock: SyncClock,
        bytes: usize,
    },

    // Pool errors
    #[error("pool {pool} has no free slot")]
    PoolExhausted { pool: ObjectId },

    #[error("pool {pool} already holds {registered}; refusing {rejected}")]
    DuplicateRegistration {
        pool: ObjectId,
        registered: ObjectId,
        rejected: ObjectId,
    },

    #[error("participant {participant} already holds {slot}")]
    AlreadyAssigned {
        participant: ParticipantId,
        slot: SlotId,
    },

    // Participant errors
    #[error("invalid participant: {0}")]
    InvalidParticipant(ParticipantId),

    // Wire errors
    #[error("buffer too short: expected {expected}, got {actual}")]
    BufferTooShort { expected: usize, actual: usize },

    #[error("malformed payload: {0}")]
    MalformedPayload(String),

    #[error("unknown object: {0}")]
    UnknownObject(ObjectId),

    // Configuration errors
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

/// Failure classes every error maps onto
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    AuthorizationDenied,
    StaleUpdateRejected,
    TransmissionFailure,
    AllocationExhausted,
    DuplicateRegistration,
    InvalidParticipant,
    MalformedPayload,
    UnknownObject,
    Configuration,
}

impl TenureError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            TenureError::NotOwner { .. }
            | TenureError::TransferDenied { .. }
            | TenureError::NotPoolOwner { .. } => ErrorKind::AuthorizationDenied,
            TenureError::StaleUpdate { .. } => ErrorKind::StaleUpdateRejected,
            TenureError::TransmissionFailed { .. } => ErrorKind::TransmissionFailure,
            TenureError::PoolExhausted { .. } => ErrorKind::AllocationExhausted,
            TenureError::DuplicateRegistration { .. } => ErrorKind::DuplicateRegistration,
            TenureError::AlreadyAssigned { .. } | TenureError::InvalidParticipant(_) => {
                ErrorKind::InvalidParticipant
            }
            TenureError::BufferTooShort { .. } | TenureError::MalformedPayload(_) => {
                ErrorKind::MalformedPayload
            }
            TenureError::UnknownObject(_) => ErrorKind::UnknownObject,
            TenureError::InvalidConfig(_) => ErrorKind::Configuration,
        }
    }
}

/// Result type for Tenure operations
pub type TenureResult<T> = Result<T, TenureError>;
