//! Chaos links
//!
//! One-directional datagram link with:
//! - Latency and jitter
//! - Loss, including bursts
//! - Reordering
//! - Duplication

use std::time::Duration;

use bytes::Bytes;
use rand::distributions::{Distribution, Uniform};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Jitter distribution
#[derive(Clone, Debug)]
pub enum Jitter {
    None,
    Uniform { min_ms: u32, max_ms: u32 },
    /// Heavy tail, capped at one second
    Pareto { scale_ms: f64, shape: f64 },
}

impl Jitter {
    pub fn sample(&self, rng: &mut StdRng) -> Duration {
        match self {
            Jitter::None => Duration::ZERO,
            Jitter::Uniform { min_ms, max_ms } => {
                if max_ms <= min_ms {
                    return Duration::from_millis(u64::from(*min_ms));
                }
                let dist = Uniform::new(*min_ms, *max_ms);
                Duration::from_millis(u64::from(dist.sample(rng)))
            }
            Jitter::Pareto { scale_ms, shape } => {
                let u: f64 = rng.gen_range(f64::EPSILON..1.0);
                let value = scale_ms / u.powf(1.0 / shape);
                Duration::from_millis(value.min(1000.0) as u64)
            }
        }
    }
}

#[derive(Clone, Debug)]
pub struct LinkConditions {
    pub base_latency: Duration,
    pub jitter: Jitter,
    /// Independent loss rate (0.0 - 1.0)
    pub loss_rate: f64,
    pub burst_loss_prob: f64,
    pub burst_length: (u32, u32),
    pub reorder_prob: f64,
    /// Maximum number of queued datagrams a reordered one may jump
    pub reorder_depth: u32,
    pub duplicate_prob: f64,
}

impl LinkConditions {
    /// Lossless, in-order, fixed latency
    pub fn perfect() -> Self {
        LinkConditions {
            base_latency: Duration::from_millis(20),
            jitter: Jitter::None,
            loss_rate: 0.0,
            burst_loss_prob: 0.0,
            burst_length: (0, 0),
            reorder_prob: 0.0,
            reorder_depth: 0,
            duplicate_prob: 0.0,
        }
    }

    pub fn lossy() -> Self {
        LinkConditions {
            base_latency: Duration::from_millis(50),
            jitter: Jitter::Uniform {
                min_ms: 0,
                max_ms: 80,
            },
            loss_rate: 0.05,
            burst_loss_prob: 0.05,
            burst_length: (2, 4),
            reorder_prob: 0.1,
            reorder_depth: 3,
            duplicate_prob: 0.05,
        }
    }

    pub fn hostile() -> Self {
        LinkConditions {
            base_latency: Duration::from_millis(150),
            jitter: Jitter::Pareto {
                scale_ms: 60.0,
                shape: 1.3,
            },
            loss_rate: 0.15,
            burst_loss_prob: 0.2,
            burst_length: (3, 8),
            reorder_prob: 0.25,
            reorder_depth: 8,
            duplicate_prob: 0.2,
        }
    }
}

impl Default for LinkConditions {
    fn default() -> Self {
        Self::lossy()
    }
}

#[derive(Clone, Debug)]
struct InFlight {
    datagram: Bytes,
    deliver_at: Duration,
    sent_at: Duration,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct LinkStats {
    pub sent: u64,
    pub delivered: u64,
    pub lost: u64,
    pub reordered: u64,
    pub duplicated: u64,
    pub max_latency_ms: u64,
}

impl LinkStats {
    pub fn loss_rate(&self) -> f64 {
        if self.sent == 0 {
            0.0
        } else {
            self.lost as f64 / self.sent as f64
        }
    }
}

#[derive(Debug)]
pub struct ChaosLink {
    conditions: LinkConditions,
    rng: StdRng,
    in_flight: Vec<InFlight>,
    now: Duration,
    burst_remaining: u32,
    stats: LinkStats,
}

impl ChaosLink {
    pub fn new(conditions: LinkConditions, seed: u64) -> Self {
        ChaosLink {
            conditions,
            rng: StdRng::seed_from_u64(seed),
            in_flight: Vec::new(),
            now: Duration::ZERO,
            burst_remaining: 0,
            stats: LinkStats::default(),
        }
    }

    pub fn send(&mut self, datagram: Bytes) {
        self.stats.sent += 1;

        if self.should_drop() {
            self.stats.lost += 1;
            return;
        }

        let deliver_at =
            self.now + self.conditions.base_latency + self.conditions.jitter.sample(&mut self.rng);
        let packet = InFlight {
            datagram: datagram.clone(),
            deliver_at,
            sent_at: self.now,
        };

        if !self.in_flight.is_empty() && self.rng.gen::<f64>() < self.conditions.reorder_prob {
            let depth = self.conditions.reorder_depth.min(self.in_flight.len() as u32);
            let jump = self.rng.gen_range(0..=depth) as usize;
            let at = self.in_flight.len() - jump;
            // Jump ahead in both queue position and delivery time
            let deliver_at = self.in_flight.get(at).map_or(deliver_at, |p| p.deliver_at.min(deliver_at));
            self.in_flight.insert(at, InFlight { deliver_at, ..packet });
            self.stats.reordered += 1;
        } else {
            self.in_flight.push(packet);
        }

        if self.rng.gen::<f64>() < self.conditions.duplicate_prob {
            let extra = self.conditions.jitter.sample(&mut self.rng);
            self.in_flight.push(InFlight {
                datagram,
                deliver_at: deliver_at + extra,
                sent_at: self.now,
            });
            self.stats.duplicated += 1;
        }
    }

    fn should_drop(&mut self) -> bool {
        if self.burst_remaining > 0 {
            self.burst_remaining -= 1;
            return true;
        }

        if self.conditions.burst_loss_prob > 0.0
            && self.rng.gen::<f64>() < self.conditions.burst_loss_prob
        {
            let (min, max) = self.conditions.burst_length;
            self.burst_remaining = self.rng.gen_range(min..=max.max(min));
            return true;
        }

        self.conditions.loss_rate > 0.0 && self.rng.gen::<f64>() < self.conditions.loss_rate
    }

    /// Advance link time and collect everything that arrived, in queue order
    pub fn tick(&mut self, dt: Duration) -> Vec<Bytes> {
        self.now += dt;

        let now = self.now;
        let mut arrived = Vec::new();
        let mut max_latency = self.stats.max_latency_ms;
        self.in_flight.retain(|packet| {
            if packet.deliver_at <= now {
                let latency = packet.deliver_at.saturating_sub(packet.sent_at).as_millis() as u64;
                max_latency = max_latency.max(latency);
                arrived.push(packet.datagram.clone());
                false
            } else {
                true
            }
        });

        self.stats.delivered += arrived.len() as u64;
        self.stats.max_latency_ms = max_latency;
        arrived
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }

    pub fn stats(&self) -> &LinkStats {
        &self.stats
    }
}
