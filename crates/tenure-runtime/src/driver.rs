//! Async event loop for one peer
//!
//! The loop owns nothing but channels: inbound datagrams and membership
//! events arrive on an mpsc receiver, encoded broadcasts leave on an mpsc
//! sender. A broadcast counts as successful once the outbound channel
//! accepts it, and that verdict is reported straight back to the object.

use std::time::Duration;

use bytes::Bytes;
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use tenure_core::{ParticipantId, TenureError, TenureResult};
use tenure_sync::{BroadcastResult, SessionObject};

use crate::{Peer, PeerStats};

/// Events fed into a running peer
#[derive(Clone, Debug)]
pub enum Inbound {
    /// Encoded `SyncFrame` from another participant
    Datagram(Bytes),
    Joined(ParticipantId),
    Left(ParticipantId),
    Shutdown,
}

pub type InboundSender = mpsc::Sender<Inbound>;
pub type InboundReceiver = mpsc::Receiver<Inbound>;
pub type OutboundSender = mpsc::Sender<Bytes>;
pub type OutboundReceiver = mpsc::Receiver<Bytes>;

#[derive(Clone, Debug)]
pub struct DriverConfig {
    /// Frame length
    pub tick_interval: Duration,
    /// Capacity of the inbound and outbound channels
    pub channel_capacity: usize,
}

impl Default for DriverConfig {
    fn default() -> Self {
        DriverConfig {
            tick_interval: Duration::from_millis(16),
            channel_capacity: 256,
        }
    }
}

impl DriverConfig {
    pub fn channels(&self) -> (InboundSender, InboundReceiver, OutboundSender, OutboundReceiver) {
        let (in_tx, in_rx) = mpsc::channel(self.channel_capacity);
        let (out_tx, out_rx) = mpsc::channel(self.channel_capacity);
        (in_tx, in_rx, out_tx, out_rx)
    }
}

/// Run `peer` until shutdown or until the inbound channel closes
pub async fn run_peer(
    peer: &mut Peer,
    objects: &mut [&mut dyn SessionObject],
    mut inbound: InboundReceiver,
    outbound: OutboundSender,
    config: &DriverConfig,
) -> TenureResult<PeerStats> {
    if config.tick_interval.is_zero() {
        return Err(TenureError::InvalidConfig("tick_interval must be non-zero".into()));
    }

    let mut ticker = tokio::time::interval(config.tick_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    info!(participant = %peer.local(), "peer loop started");

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                peer.tick(config.tick_interval, objects);
            }
            event = inbound.recv() => {
                match event {
                    Some(Inbound::Datagram(datagram)) => {
                        // Rejections are logged by the objects themselves
                        let _ = peer.deliver_bytes(datagram, objects);
                    }
                    Some(Inbound::Joined(participant)) => peer.participant_joined(participant, objects),
                    Some(Inbound::Left(participant)) => peer.participant_left(participant, objects),
                    Some(Inbound::Shutdown) | None => break,
                }
            }
        }

        flush(peer, objects, &outbound).await;
    }

    flush(peer, objects, &outbound).await;
    info!(participant = %peer.local(), stats = ?peer.stats(), "peer loop stopped");
    Ok(peer.stats().clone())
}

async fn flush(peer: &mut Peer, objects: &mut [&mut dyn SessionObject], outbound: &OutboundSender) {
    loop {
        let frames = peer.take_outbox();
        if frames.is_empty() {
            return;
        }

        for frame in frames {
            let result = match frame.encode() {
                Ok(bytes) => {
                    let len = bytes.len();
                    if outbound.send(bytes).await.is_ok() {
                        BroadcastResult::succeeded(frame.object, frame.clock, len)
                    } else {
                        BroadcastResult::failed(frame.object, frame.clock, len)
                    }
                }
                Err(err) => {
                    warn!(object = %frame.object, error = %err, "cannot encode broadcast");
                    BroadcastResult::failed(frame.object, frame.clock, frame.encoded_len())
                }
            };
            if let Err(err) = peer.report(result, objects) {
                debug!(object = %frame.object, error = %err, "broadcast result reported an error");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::SharedDirectory;
    use tenure_core::{ObjectId, RosterConfig, SyncConfig, SyncFrame};
    use tenure_lobby::{ActivityManager, Roster};

    #[derive(Debug, Default)]
    struct NoActivity;

    impl ActivityManager for NoActivity {
        fn try_start_with(&mut self, _participants: &[ParticipantId]) {}
    }

    fn roster() -> Roster<NoActivity> {
        Roster::new(
            ObjectId::new(100),
            &RosterConfig::default(),
            &SyncConfig::default(),
            NoActivity,
        )
    }

    #[tokio::test]
    async fn test_loop_applies_datagrams_and_stops() {
        let dir = SharedDirectory::new();
        dir.join(ParticipantId::new(1), "alice");
        dir.join(ParticipantId::new(2), "bob");

        // Build an update on alice's side
        let mut alice = Peer::new(ParticipantId::new(1), dir.clone());
        let mut alice_roster = roster();
        alice_roster.add(ParticipantId::new(2), alice.env_mut()).unwrap();
        let frame = alice.take_outbox().remove(0);

        let mut bob = Peer::new(ParticipantId::new(2), dir);
        let mut bob_roster = roster();
        let config = DriverConfig::default();
        let (in_tx, in_rx, out_tx, _out_rx) = config.channels();

        in_tx.send(Inbound::Datagram(frame.encode().unwrap())).await.unwrap();
        in_tx.send(Inbound::Shutdown).await.unwrap();

        let stats = run_peer(&mut bob, &mut [&mut bob_roster], in_rx, out_tx, &config)
            .await
            .unwrap();

        assert_eq!(stats.frames_in, 1);
        assert!(bob_roster.participants().contains(ParticipantId::new(2)));
    }

    #[tokio::test]
    async fn test_loop_reports_broadcasts() {
        let dir = SharedDirectory::new();
        dir.join(ParticipantId::new(1), "alice");

        let mut alice = Peer::new(ParticipantId::new(1), dir);
        let mut alice_roster = roster();
        alice_roster.add(ParticipantId::new(1), alice.env_mut()).unwrap();

        let config = DriverConfig::default();
        let (in_tx, in_rx, out_tx, mut out_rx) = config.channels();
        in_tx.send(Inbound::Shutdown).await.unwrap();

        // The queued broadcast is flushed before the loop exits
        let stats = run_peer(&mut alice, &mut [&mut alice_roster], in_rx, out_tx, &config)
            .await
            .unwrap();

        let sent = out_rx.recv().await.unwrap();
        let frame = SyncFrame::decode(sent).unwrap();
        assert_eq!(frame.object, ObjectId::new(100));
        assert_eq!(stats.frames_out, 1);
        assert_eq!(alice_roster.signed_up(), 1);
    }

    #[tokio::test]
    async fn test_rejects_zero_tick() {
        let dir = SharedDirectory::new();
        let mut peer = Peer::new(ParticipantId::new(1), dir);
        let config = DriverConfig {
            tick_interval: Duration::ZERO,
            channel_capacity: 1,
        };
        let (_in_tx, in_rx, out_tx, _out_rx) = config.channels();
        assert!(run_peer(&mut peer, &mut [], in_rx, out_tx, &config).await.is_err());
    }
}
