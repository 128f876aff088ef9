//! Deferred action queue
//!
//! Actions are one-shot and cannot be withdrawn. Each `advance` counts one
//! frame and adds the frame's duration to session time; due actions come out
//! in the order they were scheduled.

use std::time::Duration;

use tenure_sync::{Deferred, Delay};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Due {
    Frame(u64),
    Time(Duration),
}

#[derive(Clone, Debug)]
struct Entry {
    due: Due,
    seq: u64,
    deferred: Deferred,
}

#[derive(Clone, Debug, Default)]
pub struct DeferredQueue {
    frame: u64,
    elapsed: Duration,
    next_seq: u64,
    pending: Vec<Entry>,
}

impl DeferredQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn schedule(&mut self, delay: Delay, deferred: Deferred) {
        let due = match delay {
            Delay::Frames(frames) => Due::Frame(self.frame + u64::from(frames.max(1))),
            Delay::After(after) => Due::Time(self.elapsed + after),
        };
        self.pending.push(Entry {
            due,
            seq: self.next_seq,
            deferred,
        });
        self.next_seq += 1;
    }

    /// Advance one frame of length `dt` and return everything now due
    pub fn advance(&mut self, dt: Duration) -> Vec<Deferred> {
        self.frame += 1;
        self.elapsed += dt;

        let (frame, elapsed) = (self.frame, self.elapsed);
        let mut due: Vec<Entry> = Vec::new();
        self.pending.retain(|entry| {
            let ready = match entry.due {
                Due::Frame(at) => at <= frame,
                Due::Time(at) => at <= elapsed,
            };
            if ready {
                due.push(entry.clone());
            }
            !ready
        });

        due.sort_by_key(|entry| entry.seq);
        due.into_iter().map(|entry| entry.deferred).collect()
    }

    pub fn frame(&self) -> u64 {
        self.frame
    }

    pub fn elapsed(&self) -> Duration {
        self.elapsed
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use tenure_core::{ObjectId, SyncClock};
    use tenure_sync::DeferredAction;

    fn confirm(object: u64) -> Deferred {
        Deferred::new(
            ObjectId::new(object),
            DeferredAction::ConfirmReplication {
                clock: SyncClock::new(1),
                attempt: 1,
            },
        )
    }

    #[test]
    fn test_frame_delay() {
        let mut queue = DeferredQueue::new();
        queue.schedule(Delay::Frames(2), confirm(1));

        let dt = Duration::from_millis(16);
        assert!(queue.advance(dt).is_empty());
        assert_eq!(queue.advance(dt), vec![confirm(1)]);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_zero_frames_still_waits_one() {
        let mut queue = DeferredQueue::new();
        queue.schedule(Delay::Frames(0), confirm(1));
        assert_eq!(queue.advance(Duration::ZERO).len(), 1);
    }

    #[test]
    fn test_time_delay() {
        let mut queue = DeferredQueue::new();
        let enforce = Deferred::new(ObjectId::new(2), DeferredAction::EnforceOwnership { assignment: 1 });
        queue.schedule(Delay::After(Duration::from_secs(3)), enforce);

        for _ in 0..2 {
            assert!(queue.advance(Duration::from_secs(1)).is_empty());
        }
        assert_eq!(queue.advance(Duration::from_secs(1)), vec![enforce]);
        assert_eq!(queue.elapsed(), Duration::from_secs(3));
    }

    #[test]
    fn test_due_actions_keep_schedule_order() {
        let mut queue = DeferredQueue::new();
        queue.schedule(Delay::After(Duration::from_millis(5)), confirm(3));
        queue.schedule(Delay::Frames(1), confirm(1));
        queue.schedule(Delay::Frames(1), confirm(2));

        assert_eq!(
            queue.advance(Duration::from_millis(10)),
            vec![confirm(3), confirm(1), confirm(2)]
        );
    }

    fn delay() -> impl Strategy<Value = Delay> {
        prop_oneof![
            (0u32..5).prop_map(Delay::Frames),
            (0u64..200).prop_map(|ms| Delay::After(Duration::from_millis(ms))),
        ]
    }

    proptest! {
        #[test]
        fn every_action_fires_once_in_schedule_order(
            delays in prop::collection::vec(delay(), 1..40),
            frame_ms in 1u64..50,
        ) {
            let mut queue = DeferredQueue::new();
            for (i, delay) in delays.iter().enumerate() {
                queue.schedule(*delay, confirm(i as u64));
            }

            let dt = Duration::from_millis(frame_ms);
            let mut fired = vec![None; delays.len()];
            for frame in 1..=250u64 {
                let batch: Vec<u64> = queue.advance(dt).iter().map(|d| d.object.0).collect();
                prop_assert!(batch.windows(2).all(|w| w[0] < w[1]));
                for index in batch {
                    prop_assert!(fired[index as usize].is_none());
                    fired[index as usize] = Some(frame);
                }
            }
            prop_assert!(queue.is_empty());

            for (delay, frame) in delays.iter().zip(fired) {
                let frame = frame.unwrap_or(0);
                match *delay {
                    Delay::Frames(n) => prop_assert_eq!(frame, u64::from(n.max(1))),
                    Delay::After(after) => {
                        // First frame whose end time reaches the delay
                        prop_assert!(Duration::from_millis(frame * frame_ms) >= after);
                        prop_assert!(Duration::from_millis((frame - 1) * frame_ms) < after || frame == 1);
                    }
                }
            }
        }
    }
}
