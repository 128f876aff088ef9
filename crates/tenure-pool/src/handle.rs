//! Pool registration handle
//!
//! Each pooled object is built with a clone of its pool's handle, through
//! which it registers itself as the local participant's object. The first
//! registration is permanent for the session.

use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{error, info};

use tenure_core::{ObjectId, TenureError, TenureResult};
use tenure_sync::Session;

#[derive(Clone, Debug)]
pub struct PoolHandle {
    pool: ObjectId,
    local: Arc<Mutex<Option<ObjectId>>>,
}

impl PoolHandle {
    pub fn new(pool: ObjectId) -> Self {
        PoolHandle {
            pool,
            local: Arc::new(Mutex::new(None)),
        }
    }

    pub fn pool(&self) -> ObjectId {
        self.pool
    }

    /// Object registered for the local participant, if any
    pub fn registered(&self) -> Option<ObjectId> {
        *self.local.lock()
    }

    /// Record `object` as the local participant's object.
    ///
    /// Re-registering the same object succeeds; any other object is rejected
    /// and the existing registration stays.
    pub fn register(&self, object: ObjectId, session: &dyn Session) -> TenureResult<()> {
        let mut local = self.local.lock();
        match *local {
            Some(existing) if existing == object => Ok(()),
            Some(existing) => {
                error!(
                    pool = %self.pool,
                    registered = %existing,
                    rejected = %object,
                    "cannot register object: pool already has a local object"
                );
                Err(TenureError::DuplicateRegistration {
                    pool: self.pool,
                    registered: existing,
                    rejected: object,
                })
            }
            None => {
                if !session.is_local_owner_of(object) {
                    let owner = session.owner_of(object);
                    error!(pool = %self.pool, %object, "cannot register object: not owned by us");
                    return Err(TenureError::NotOwner { object, owner });
                }
                *local = Some(object);
                info!(pool = %self.pool, %object, "registered local pooled object");
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tenure_core::ParticipantId;
    use tenure_sync::testing::MockSession;

    #[test]
    fn test_first_registration_wins() {
        let handle = PoolHandle::new(ObjectId::new(1));
        let session = MockSession::new(ParticipantId::new(1)).with_default_owner(ParticipantId::new(1));

        handle.register(ObjectId::new(2), &session).unwrap();
        handle.register(ObjectId::new(2), &session).unwrap();

        let err = handle.register(ObjectId::new(3), &session).unwrap_err();
        assert!(matches!(err, TenureError::DuplicateRegistration { .. }));
        assert_eq!(handle.registered(), Some(ObjectId::new(2)));
    }

    #[test]
    fn test_requires_process_ownership() {
        let handle = PoolHandle::new(ObjectId::new(1));
        let session = MockSession::new(ParticipantId::new(1)).with_default_owner(ParticipantId::new(2));

        assert!(handle.register(ObjectId::new(2), &session).is_err());
        assert_eq!(handle.registered(), None);
    }

    #[test]
    fn test_clones_share_registration() {
        let handle = PoolHandle::new(ObjectId::new(1));
        let clone = handle.clone();
        let session = MockSession::new(ParticipantId::new(1)).with_default_owner(ParticipantId::new(1));

        clone.register(ObjectId::new(4), &session).unwrap();
        assert_eq!(handle.registered(), Some(ObjectId::new(4)));
    }
}
