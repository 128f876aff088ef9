//! End-to-end session scenarios

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use bytes::{BufMut, BytesMut};
use proptest::prelude::*;

use tenure_core::{
    ObjectId, ParticipantId, SlotId, SyncClock, SyncFrame, TenureConfig, TenureError,
};
use tenure_pool::SlotState;

use crate::{LinkConditions, SessionSimulator, SimConfig, ROSTER_ID};

fn p(id: i32) -> ParticipantId {
    ParticipantId::new(id)
}

fn sim_with(pool_capacity: usize, max_lobby_size: usize) -> SessionSimulator {
    let mut tenure = TenureConfig::default();
    tenure.roster.max_lobby_size = max_lobby_size;
    SessionSimulator::new(SimConfig {
        pool_capacity,
        tenure,
        ..SimConfig::default()
    })
    .unwrap()
}

fn roster_frame(clock: u32, locked: bool, ids: &[i32]) -> SyncFrame {
    let mut buf = BytesMut::new();
    buf.put_u8(locked as u8);
    buf.put_u16_le(ids.len() as u16);
    for id in ids {
        buf.put_i32_le(*id);
    }
    SyncFrame::new(ROSTER_ID, SyncClock::new(clock), buf.freeze())
}

#[test]
fn test_pool_exhaustion_leaves_third_participant_without_slot() {
    let mut sim = sim_with(2, 8);
    sim.join(p(1), "alice").unwrap();
    sim.join(p(2), "bob").unwrap();
    sim.join(p(3), "carol").unwrap();
    sim.settle();

    let alice_slot = sim.peer(p(1)).unwrap().pool().slot_of(p(1));
    let bob_slot = sim.peer(p(1)).unwrap().pool().slot_of(p(2));
    assert!(alice_slot.is_some());
    assert!(bob_slot.is_some());
    assert_ne!(alice_slot, bob_slot);
    assert_eq!(sim.peer(p(1)).unwrap().pool().slot_of(p(3)), None);

    // Every replica converged on the same two assignments
    for observer in [p(1), p(2), p(3)] {
        assert_eq!(sim.slot_owner(observer, SlotId::new(0)), Some(p(1)));
        assert_eq!(sim.slot_owner(observer, SlotId::new(1)), Some(p(2)));
    }
    assert!(sim.peer(p(3)).unwrap().pool().local_object().is_none());
    assert!(sim.peer(p(2)).unwrap().pool().local_object().is_some());
}

#[test]
fn test_counters_replicate_to_every_participant() {
    let mut sim = sim_with(4, 8);
    sim.join(p(1), "alice").unwrap();
    sim.join(p(2), "bob").unwrap();
    sim.settle();

    for _ in 0..3 {
        sim.peer_mut(p(2)).unwrap().increment().unwrap();
    }
    sim.step();

    assert_eq!(sim.counter_seen_by(p(1), p(2)), Some(3));
    assert_eq!(sim.counter_seen_by(p(2), p(2)), Some(3));

    // Bob's updates arrive while bob holds process ownership
    let alice = sim.peer(p(1)).unwrap();
    let bob_slot = alice.pool().slot_of(p(2)).unwrap();
    assert_eq!(
        alice.pool().object(bob_slot).map(|o| o.state()),
        Some(SlotState::Active)
    );
}

#[test]
fn test_stale_and_equal_clocks_are_rejected() {
    let mut sim = sim_with(2, 3);
    sim.join(p(1), "alice").unwrap();
    sim.join(p(2), "bob").unwrap();

    let err = sim.inject(p(2), roster_frame(0, false, &[1])).unwrap_err();
    assert!(matches!(err, TenureError::StaleUpdate { .. }));

    sim.inject(p(2), roster_frame(5, false, &[1, 0, 0])).unwrap();
    let err = sim.inject(p(2), roster_frame(5, false, &[1, 2, 0])).unwrap_err();
    assert!(matches!(err, TenureError::StaleUpdate { .. }));
    let err = sim.inject(p(2), roster_frame(4, false, &[1, 2, 0])).unwrap_err();
    assert!(matches!(err, TenureError::StaleUpdate { .. }));

    sim.inject(p(2), roster_frame(6, false, &[1, 2, 0])).unwrap();
    let roster = sim.peer(p(2)).unwrap().roster();
    assert_eq!(roster.signed_up(), 2);
    assert!(roster.participants().contains(p(2)));
}

#[test]
fn test_roster_ignores_duplicates_and_drops_when_full() {
    let mut sim = sim_with(4, 3);
    sim.join(p(1), "alice").unwrap();
    sim.join(p(2), "bob").unwrap();

    let alice = sim.peer_mut(p(1)).unwrap();
    alice.roster_add(p(10)).unwrap();
    alice.roster_add(p(20)).unwrap();
    alice.roster_add(p(10)).unwrap();
    sim.step();

    let seen = sim.peer(p(2)).unwrap().roster();
    assert_eq!(seen.participants().slots(), &[p(10), p(20), ParticipantId::NONE]);
    assert_eq!(seen.signed_up(), 2);

    let alice = sim.peer_mut(p(1)).unwrap();
    alice.roster_add(p(30)).unwrap();
    alice.roster_add(p(40)).unwrap();
    sim.step();

    let seen = sim.peer(p(2)).unwrap().roster();
    assert!(!seen.participants().contains(p(40)));
    assert_eq!(seen.signed_up(), 3);
}

#[test]
fn test_locked_roster_ignores_changes() {
    let mut sim = sim_with(4, 8);
    sim.join(p(1), "alice").unwrap();
    sim.join(p(2), "bob").unwrap();

    let alice = sim.peer_mut(p(1)).unwrap();
    alice.roster_add(p(1)).unwrap();
    alice.roster_lock().unwrap();
    alice.roster_add(p(30)).unwrap();
    sim.step();

    let seen = sim.peer(p(2)).unwrap().roster();
    assert!(seen.is_locked());
    assert!(!seen.participants().contains(p(30)));

    // Only the owner may edit the roster at all
    let err = sim.peer_mut(p(2)).unwrap().roster_add(p(2)).unwrap_err();
    assert!(matches!(err, TenureError::NotOwner { .. }));

    sim.peer_mut(p(1)).unwrap().roster_unlock().unwrap();
    sim.peer_mut(p(1)).unwrap().roster_add(p(30)).unwrap();
    sim.step();
    assert!(sim.peer(p(2)).unwrap().roster().participants().contains(p(30)));
}

#[test]
fn test_start_hands_compacted_roster_to_activity() {
    let mut sim = sim_with(4, 4);
    sim.join(p(1), "alice").unwrap();

    let alice = sim.peer_mut(p(1)).unwrap();
    alice.roster_add(p(1)).unwrap();
    alice.roster_add(p(2)).unwrap();
    alice.roster_add(p(3)).unwrap();
    alice.roster_remove(p(2)).unwrap();

    let players = alice.try_to_start().unwrap();
    assert_eq!(players, vec![p(1), p(3)]);
    assert_eq!(alice.roster().manager().starts, vec![vec![p(1), p(3)]]);
}

#[test]
fn test_departure_returns_slot_for_reuse() {
    let mut sim = sim_with(2, 8);
    sim.join(p(1), "alice").unwrap();
    sim.join(p(2), "bob").unwrap();
    sim.settle();
    assert_eq!(sim.slot_owner(p(1), SlotId::new(1)), Some(p(2)));

    sim.leave(p(2)).unwrap();
    sim.settle();

    let alice = sim.peer(p(1)).unwrap();
    let slot = alice.pool().object(SlotId::new(1)).unwrap();
    assert_eq!(slot.owner_id(), ParticipantId::NONE);
    assert_eq!(slot.state(), SlotState::Unassigned);
    assert_eq!(slot.data().value, 0);

    sim.join(p(4), "dave").unwrap();
    sim.settle();
    assert_eq!(sim.slot_owner(p(1), SlotId::new(1)), Some(p(4)));
    assert_eq!(
        sim.peer(p(4)).unwrap().pool().local_object().map(|o| o.slot()),
        Some(SlotId::new(1))
    );
}

#[test]
fn test_new_master_takes_over_pool() {
    let mut sim = sim_with(3, 8);
    sim.join(p(1), "alice").unwrap();
    sim.join(p(2), "bob").unwrap();
    sim.join(p(3), "carol").unwrap();
    sim.settle();

    sim.leave(p(1)).unwrap();
    assert_eq!(sim.directory().master(), p(2));
    sim.settle();

    // Bob now runs the pool and returned alice's slot
    for observer in [p(2), p(3)] {
        assert_eq!(sim.slot_owner(observer, SlotId::new(0)), Some(ParticipantId::NONE));
    }

    sim.join(p(5), "eve").unwrap();
    sim.settle();
    assert_eq!(sim.slot_owner(p(3), SlotId::new(0)), Some(p(5)));
    assert!(sim.peer(p(5)).unwrap().pool().local_object().is_some());
}

#[test]
fn test_failed_broadcast_rolls_back_then_retries() {
    let mut sim = sim_with(2, 8);
    sim.join(p(1), "alice").unwrap();
    sim.join(p(2), "bob").unwrap();
    sim.settle();

    let before = sim.committed_clocks(p(2));
    sim.fail_broadcasts(p(2), 1);
    let clock = sim.peer_mut(p(2)).unwrap().increment().unwrap();
    sim.step();
    assert_eq!(sim.counter_seen_by(p(1), p(2)), Some(0));
    assert_eq!(sim.committed_clocks(p(2)), before);
    assert_eq!(sim.peer(p(2)).unwrap().stats().broadcasts_failed, 1);

    // The retry reuses the rolled-back clock and carries the local change
    let retry = sim.peer_mut(p(2)).unwrap().increment().unwrap();
    assert_eq!(retry, clock);
    sim.step();
    assert_eq!(sim.counter_seen_by(p(1), p(2)), Some(2));
}

#[test]
fn test_late_joiner_receives_committed_state() {
    let mut sim = sim_with(3, 8);
    sim.join(p(1), "alice").unwrap();
    sim.peer_mut(p(1)).unwrap().roster_add(p(1)).unwrap();
    sim.settle();
    sim.peer_mut(p(1)).unwrap().increment().unwrap();
    sim.step();

    sim.join(p(2), "bob").unwrap();

    let bob = sim.peer(p(2)).unwrap();
    assert!(bob.roster().participants().contains(p(1)));
    assert_eq!(sim.counter_seen_by(p(2), p(1)), Some(1));
    assert_eq!(
        bob.pool().object(SlotId::new(0)).map(|o| o.state()),
        Some(SlotState::Active)
    );
}

#[test]
fn test_transfers_follow_slot_assignment() {
    let mut sim = sim_with(2, 8);
    sim.join(p(1), "alice").unwrap();
    sim.join(p(2), "bob").unwrap();
    sim.join(p(3), "carol").unwrap();
    sim.settle();

    let bob_object = crate::POOL_ID.pooled(SlotId::new(1));
    // Granted on the pool owner and on the assigned participant only
    assert!(sim.authorize(p(1), bob_object, p(3)));
    assert!(sim.authorize(p(2), bob_object, p(2)));
    assert!(!sim.authorize(p(3), bob_object, p(3)));
    assert!(sim.authorize(p(3), ROSTER_ID, p(3)));
}

#[derive(Clone, Debug)]
enum Action {
    Join,
    Leave(usize),
    Increment(usize),
    Wait(u8),
}

fn action() -> impl Strategy<Value = Action> {
    prop_oneof![
        2 => Just(Action::Join),
        1 => (0usize..8).prop_map(Action::Leave),
        4 => (0usize..8).prop_map(Action::Increment),
        3 => (1u8..20).prop_map(Action::Wait),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    #[test]
    fn committed_clocks_never_regress_under_chaos(
        seed in any::<u64>(),
        actions in prop::collection::vec(action(), 1..40),
    ) {
        let mut sim = SessionSimulator::new(SimConfig {
            pool_capacity: 3,
            conditions: LinkConditions::lossy(),
            frame: Duration::from_millis(50),
            seed,
            ..SimConfig::default()
        })
        .unwrap();

        let mut next_id = 1;
        let mut seen: HashMap<(ParticipantId, ObjectId), SyncClock> = HashMap::new();

        for action in actions {
            match action {
                Action::Join => {
                    sim.join(p(next_id), "peer").unwrap();
                    next_id += 1;
                }
                Action::Leave(i) => {
                    let present = sim.participants();
                    if !present.is_empty() {
                        sim.leave(present[i % present.len()]).unwrap();
                    }
                }
                Action::Increment(i) => {
                    let present = sim.participants();
                    if !present.is_empty() {
                        // Unassigned participants are refused
                        let _ = sim.peer_mut(present[i % present.len()]).unwrap().increment();
                    }
                }
                Action::Wait(frames) => {
                    for _ in 0..frames {
                        sim.step();
                    }
                }
            }
            sim.step();

            for observer in sim.participants() {
                for (object, clock) in sim.committed_clocks(observer) {
                    if let Some(previous) = seen.insert((observer, object), clock) {
                        prop_assert!(!previous.is_newer_than(clock));
                    }
                }
            }

            let master = sim.directory().master();
            if let Some(peer) = sim.peer(master) {
                let owners: Vec<ParticipantId> = peer
                    .pool()
                    .objects()
                    .map(|o| o.owner_id())
                    .filter(|id| id.is_some())
                    .collect();
                let unique: HashSet<_> = owners.iter().collect();
                prop_assert_eq!(unique.len(), owners.len());
            }
        }
    }
}
