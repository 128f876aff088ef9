//! Ownership transfer authorization
//!
//! A transfer request first passes two global flags and only then reaches
//! the object's policy. Policies are small values the object hands out, so a
//! pooled object can decide from its own synced fields.

use std::fmt;

use tenure_core::{ObjectId, ParticipantId, SyncConfig};

use crate::Session;

/// A request to move process ownership of `object`
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TransferRequest {
    pub object: ObjectId,
    pub requesting: ParticipantId,
    pub requested_owner: ParticipantId,
}

/// Global gates evaluated before any policy
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TransferFlags {
    pub allow_unforced_transfer: bool,
    pub allow_non_owner_request: bool,
}

impl TransferFlags {
    pub fn permissive() -> Self {
        TransferFlags {
            allow_unforced_transfer: true,
            allow_non_owner_request: true,
        }
    }

    /// Check the flags alone; `None` means "defer to the policy"
    pub fn check(&self, request: &TransferRequest, local: ParticipantId) -> Option<bool> {
        if !self.allow_unforced_transfer {
            return Some(false);
        }
        if !self.allow_non_owner_request && request.requesting != local {
            return Some(false);
        }
        None
    }
}

impl Default for TransferFlags {
    fn default() -> Self {
        Self::permissive()
    }
}

impl From<&SyncConfig> for TransferFlags {
    fn from(config: &SyncConfig) -> Self {
        TransferFlags {
            allow_unforced_transfer: config.allow_unforced_transfer,
            allow_non_owner_request: config.allow_non_owner_request,
        }
    }
}

/// Decision point consulted after the global flags pass
pub trait OwnershipPolicy: fmt::Debug {
    fn is_transfer_authorized(&self, request: &TransferRequest, session: &dyn Session) -> bool;
}

/// Grants every request
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct OpenPolicy;

impl OwnershipPolicy for OpenPolicy {
    fn is_transfer_authorized(&self, _request: &TransferRequest, _session: &dyn Session) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockSession;

    fn request(requesting: i32) -> TransferRequest {
        TransferRequest {
            object: ObjectId::new(1),
            requesting: ParticipantId::new(requesting),
            requested_owner: ParticipantId::new(requesting),
        }
    }

    #[test]
    fn test_permissive_flags_defer_to_policy() {
        let flags = TransferFlags::permissive();
        assert_eq!(flags.check(&request(2), ParticipantId::new(1)), None);
    }

    #[test]
    fn test_unforced_transfer_disabled_denies_everyone() {
        let flags = TransferFlags {
            allow_unforced_transfer: false,
            allow_non_owner_request: true,
        };
        assert_eq!(flags.check(&request(1), ParticipantId::new(1)), Some(false));
    }

    #[test]
    fn test_non_owner_requests_disabled() {
        let flags = TransferFlags {
            allow_unforced_transfer: true,
            allow_non_owner_request: false,
        };
        let local = ParticipantId::new(1);
        assert_eq!(flags.check(&request(2), local), Some(false));
        assert_eq!(flags.check(&request(1), local), None);
    }

    #[test]
    fn test_open_policy_grants() {
        let session = MockSession::new(ParticipantId::new(1));
        assert!(OpenPolicy.is_transfer_authorized(&request(7), &session));
    }
}
