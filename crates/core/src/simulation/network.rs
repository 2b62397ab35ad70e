//! Simulated bottleneck path for exercising a controller deterministically.
//!
//! The model is a single FIFO bottleneck: every datagram is serialized at the
//! link rate behind whatever is already queued, then takes the propagation
//! delay (plus optional jitter on the return path) before its ack reaches the
//! sender. Datagrams are dropped when the queue is full or at random with the
//! configured loss rate.
//!
//! The sender loop advances a [`VirtualTime`] one millisecond per step and
//! does what a real sender would: acks are handed to the controller, datagrams
//! that have clearly gone missing are declared lost and retransmitted, and new
//! datagrams go out whenever [`BbrController::can_send_at`] allows.

use std::cmp::Reverse;
use std::collections::{BTreeMap, BinaryHeap};
use std::time::Duration;

use crate::congestion::{AckEvent, BbrConfig, BbrController, BbrStats};

use super::rng::SimulationRng;
use super::time::{TimeSource, VirtualTime};

/// Upper bound on datagrams sent in one millisecond.
const MAX_SENDS_PER_STEP: usize = 10_000;

/// Characteristics of a network path.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PathProfile {
    /// Round-trip propagation delay.
    pub rtt: Duration,
    /// Bottleneck bandwidth in bytes/sec.
    pub bandwidth: u64,
    /// Random loss probability per datagram (0.0 - 1.0).
    pub loss_rate: f64,
    /// Extra return-path delay, as a fraction of the RTT, drawn uniformly.
    pub jitter: f64,
    /// Bottleneck queue capacity in datagrams; arrivals beyond it are dropped.
    pub queue_limit: usize,
}

impl PathProfile {
    /// LAN: 1ms RTT, 100 MB/s, no loss.
    pub const LAN: Self = Self {
        rtt: Duration::from_millis(1),
        bandwidth: 100_000_000,
        loss_rate: 0.0,
        jitter: 0.05,
        queue_limit: 1_000,
    };

    /// Datacenter: 10ms RTT, 10 MB/s, minimal loss.
    pub const DATACENTER: Self = Self {
        rtt: Duration::from_millis(10),
        bandwidth: 10_000_000,
        loss_rate: 0.001,
        jitter: 0.1,
        queue_limit: 500,
    };

    /// Continental: 50ms RTT, 5 MB/s, some loss.
    pub const CONTINENTAL: Self = Self {
        rtt: Duration::from_millis(50),
        bandwidth: 5_000_000,
        loss_rate: 0.005,
        jitter: 0.15,
        queue_limit: 400,
    };

    /// Intercontinental: 135ms RTT, 2 MB/s, moderate loss.
    pub const INTERCONTINENTAL: Self = Self {
        rtt: Duration::from_millis(135),
        bandwidth: 2_000_000,
        loss_rate: 0.01,
        jitter: 0.2,
        queue_limit: 300,
    };

    /// High latency: 250ms RTT, 1 MB/s, higher loss.
    pub const HIGH_LATENCY: Self = Self {
        rtt: Duration::from_millis(250),
        bandwidth: 1_000_000,
        loss_rate: 0.02,
        jitter: 0.25,
        queue_limit: 200,
    };

    /// Look up a preset by name.
    pub fn preset(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "lan" => Some(Self::LAN),
            "datacenter" => Some(Self::DATACENTER),
            "continental" => Some(Self::CONTINENTAL),
            "intercontinental" => Some(Self::INTERCONTINENTAL),
            "high-latency" | "high_latency" => Some(Self::HIGH_LATENCY),
            _ => None,
        }
    }

    /// Same path without random loss or jitter.
    pub fn ideal(self) -> Self {
        Self {
            loss_rate: 0.0,
            jitter: 0.0,
            ..self
        }
    }

    /// Link rate in bytes/ms.
    pub fn bytes_per_ms(&self) -> f64 {
        self.bandwidth.max(1) as f64 / 1000.0
    }

    pub fn rtt_ms(&self) -> f64 {
        self.rtt.as_secs_f64() * 1000.0
    }

    /// Bandwidth-delay product in bytes.
    pub fn bdp_bytes(&self) -> f64 {
        self.bytes_per_ms() * self.rtt_ms()
    }
}

/// Controller state captured when a round trip completes.
#[derive(Debug, Clone, PartialEq)]
pub struct RoundSnapshot {
    pub round: u64,
    pub at_ms: u64,
    pub stats: BbrStats,
}

/// Counters kept by the path itself, independent of the controller.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PathStats {
    pub sent: u64,
    pub retransmitted: u64,
    pub acked: u64,
    pub delivered_bytes: u64,
    pub random_drops: u64,
    pub queue_drops: u64,
    pub declared_lost: u64,
}

/// Summary of a finished run.
#[derive(Debug, Clone, PartialEq)]
pub struct SimulationReport {
    pub elapsed_ms: u64,
    pub rounds: u64,
    pub path: PathStats,
    /// Delivered bytes per millisecond over the whole run.
    pub goodput: f64,
    /// Goodput as a fraction of the link rate.
    pub utilization: f64,
    pub controller: BbrStats,
}

impl std::fmt::Display for SimulationReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}ms, {} rounds: goodput={:.1}KB/s utilization={:.1}% sent={} rtx={} \
             drops(queue={}, random={}) lost={}",
            self.elapsed_ms,
            self.rounds,
            self.goodput,
            self.utilization * 100.0,
            self.path.sent,
            self.path.retransmitted,
            self.path.queue_drops,
            self.path.random_drops,
            self.path.declared_lost,
        )
    }
}

/// A datagram on its way through the bottleneck, ordered by ack arrival.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
struct InFlight {
    ack_at: u64,
    seq: u64,
    send_time: u64,
    recv_at: u64,
}

/// One sender, one bottleneck, one controller.
pub struct SimulatedPath {
    profile: PathProfile,
    payload_len: usize,
    time: VirtualTime,
    rng: SimulationRng,
    controller: BbrController<VirtualTime>,

    pipe: BinaryHeap<Reverse<InFlight>>,
    /// Unacknowledged datagrams by sequence number, with their send time.
    outstanding: BTreeMap<u64, u64>,
    /// Time (ms, fractional) the bottleneck finishes serializing its queue.
    link_free_at: f64,
    next_seq: u64,
    highest_acked: Option<u64>,
    /// Last ack arrival or loss declaration.
    last_progress: u64,
    pending_retransmits: usize,

    last_round: u64,
    rounds: Vec<RoundSnapshot>,
    stats: PathStats,
}

impl SimulatedPath {
    /// A path driven by a fresh controller. `seed` drives both the path's
    /// randomness and, unless the config sets one, the controller's.
    pub fn new(profile: PathProfile, mut config: BbrConfig, seed: u64) -> Self {
        let time = VirtualTime::new();
        config.rng_seed.get_or_insert(seed);
        let payload_len = config.mss.max(1);
        let controller = BbrController::new_with_time_source(config, time.clone());
        Self {
            profile,
            payload_len,
            time,
            rng: SimulationRng::new(seed),
            controller,
            pipe: BinaryHeap::new(),
            outstanding: BTreeMap::new(),
            link_free_at: 0.0,
            next_seq: 0,
            highest_acked: None,
            last_progress: 0,
            pending_retransmits: 0,
            last_round: 0,
            rounds: Vec::new(),
            stats: PathStats::default(),
        }
    }

    /// Bytes per datagram; defaults to the controller's MSS.
    pub fn with_payload_len(mut self, payload_len: usize) -> Self {
        self.payload_len = payload_len.max(1);
        self
    }

    pub fn profile(&self) -> &PathProfile {
        &self.profile
    }

    pub fn controller(&self) -> &BbrController<VirtualTime> {
        &self.controller
    }

    pub fn rounds(&self) -> &[RoundSnapshot] {
        &self.rounds
    }

    pub fn stats(&self) -> &PathStats {
        &self.stats
    }

    pub fn now_millis(&self) -> u64 {
        self.time.now_millis()
    }

    /// Datagrams the sender still considers unacknowledged.
    pub fn outstanding(&self) -> usize {
        self.outstanding.len()
    }

    /// Advance the simulation by one millisecond.
    pub fn step(&mut self) {
        let now = self.time.now_millis();
        self.deliver_acks(now);
        self.detect_losses(now);
        self.send(now);
        self.record_round(now);
        self.time.advance_millis(1);
    }

    /// Run until `rounds` round trips have completed, or until the run has
    /// taken far longer than that many RTTs should.
    pub fn run_rounds(&mut self, rounds: usize) -> &[RoundSnapshot] {
        let per_round = (self.profile.rtt_ms().ceil() as u64).max(1) * 20 + 1_000;
        let deadline = self.now_millis() + per_round * rounds as u64;
        while self.rounds.len() < rounds && self.now_millis() < deadline {
            self.step();
        }
        &self.rounds
    }

    pub fn run_for(&mut self, duration: Duration) {
        let deadline = self.now_millis() + duration.as_millis() as u64;
        while self.now_millis() < deadline {
            self.step();
        }
    }

    pub fn report(&self) -> SimulationReport {
        let elapsed_ms = self.now_millis();
        let goodput = if elapsed_ms == 0 {
            0.0
        } else {
            self.stats.delivered_bytes as f64 / elapsed_ms as f64
        };
        SimulationReport {
            elapsed_ms,
            rounds: self.controller.round_count(),
            path: self.stats.clone(),
            goodput,
            utilization: goodput / self.profile.bytes_per_ms(),
            controller: self.controller.stats(),
        }
    }

    fn deliver_acks(&mut self, now: u64) {
        while let Some(Reverse(next)) = self.pipe.peek().copied() {
            if next.ack_at > now {
                break;
            }
            self.pipe.pop();

            // already given up on and retransmitted
            if self.outstanding.remove(&next.seq).is_none() {
                continue;
            }

            self.controller.on_ack_received(AckEvent {
                seq: next.seq,
                send_time: next.send_time,
                recv_time: next.recv_at,
                ack_recv_time: next.ack_at,
                payload_len: self.payload_len,
                delivery: None,
            });
            self.stats.acked += 1;
            self.stats.delivered_bytes += self.payload_len as u64;
            self.highest_acked = Some(self.highest_acked.map_or(next.seq, |h| h.max(next.seq)));
            self.last_progress = now;
        }
    }

    /// A datagram is lost once something sent after it has been acked and it
    /// has been outstanding for a full timeout, or when acks stop altogether
    /// for a timeout (then the oldest one goes).
    fn detect_losses(&mut self, now: u64) {
        let timeout = self.controller.timeout_ms();

        while let Some((&seq, &sent_at)) = self.outstanding.first_key_value() {
            let overtaken = self.highest_acked.is_some_and(|h| h > seq);
            if !(overtaken && now.saturating_sub(sent_at) >= timeout) {
                break;
            }
            self.declare_lost(seq, now);
        }

        if now.saturating_sub(self.last_progress) >= timeout {
            if let Some((&seq, _)) = self.outstanding.first_key_value() {
                self.declare_lost(seq, now);
            }
        }
    }

    fn declare_lost(&mut self, seq: u64, now: u64) {
        self.outstanding.remove(&seq);
        self.controller.on_datagram_lost(seq);
        self.stats.declared_lost += 1;
        self.pending_retransmits += 1;
        self.last_progress = now;
        tracing::trace!(seq, now, "Datagram declared lost");
    }

    fn send(&mut self, now: u64) {
        let mut sent = 0;
        while sent < MAX_SENDS_PER_STEP && self.controller.can_send_at(now) {
            let is_retransmit = self.pending_retransmits > 0;
            if is_retransmit {
                self.pending_retransmits -= 1;
                self.stats.retransmitted += 1;
            }

            let seq = self.next_seq;
            self.next_seq += 1;
            self.controller
                .on_datagram_sent(seq, now, self.payload_len, is_retransmit);
            self.outstanding.insert(seq, now);
            self.stats.sent += 1;
            self.enqueue(seq, now);
            sent += 1;
        }
    }

    fn enqueue(&mut self, seq: u64, now: u64) {
        let rate = self.profile.bytes_per_ms();
        let now_f = now as f64;
        let payload = self.payload_len as f64;

        let backlog = ((self.link_free_at - now_f).max(0.0) * rate / payload).ceil() as usize;
        if backlog >= self.profile.queue_limit {
            self.stats.queue_drops += 1;
            return;
        }
        if self.profile.loss_rate > 0.0 && self.rng.gen_bool(self.profile.loss_rate) {
            self.stats.random_drops += 1;
            return;
        }

        let departure = self.link_free_at.max(now_f) + payload / rate;
        self.link_free_at = departure;

        let rtt = self.profile.rtt_ms();
        let jitter = if self.profile.jitter > 0.0 {
            rtt * self.profile.jitter * self.rng.gen_f64()
        } else {
            0.0
        };
        self.pipe.push(Reverse(InFlight {
            ack_at: (departure + rtt + jitter).ceil() as u64,
            seq,
            send_time: now,
            recv_at: (departure + rtt / 2.0).ceil() as u64,
        }));
    }

    fn record_round(&mut self, now: u64) {
        let round = self.controller.round_count();
        if round <= self.last_round {
            return;
        }
        self.last_round = round;
        let stats = self.controller.stats();
        tracing::debug!(round, at_ms = now, "{stats}");
        self.rounds.push(RoundSnapshot {
            round,
            at_ms: now,
            stats,
        });
    }
}

impl std::fmt::Debug for SimulatedPath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SimulatedPath")
            .field("profile", &self.profile)
            .field("now_ms", &self.now_millis())
            .field("outstanding", &self.outstanding.len())
            .field("controller", &self.controller)
            .finish()
    }
}
