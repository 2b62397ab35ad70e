//! The controller facade.
//!
//! [`BbrController`] takes send, ack and loss events from a single sender loop,
//! feeds the estimators and the phase machine, and answers the sender's three
//! questions: how many datagrams may be in flight ([`window_size`]), how long
//! to wait before assuming loss ([`timeout_ms`]) and whether a datagram may go
//! out right now ([`can_send_now`]).
//!
//! All event timestamps are whole milliseconds on the same clock as the
//! controller's [`TimeSource`]. Hosts using [`RealTime`] should stamp events
//! with [`BbrController::now_millis`].
//!
//! [`window_size`]: BbrController::window_size
//! [`timeout_ms`]: BbrController::timeout_ms
//! [`can_send_now`]: BbrController::can_send_now

use std::time::Duration;

use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};

use crate::errors::SampleError;
use crate::simulation::{RealTime, TimeSource};

use super::bandwidth::BandwidthEstimator;
use super::config::BbrConfig;
use super::delivery_rate::{
    DeliveryLedger, DeliverySnapshot, DeliveryTracker, SentPacketLedger, SentRecord,
};
use super::rtt::RttEstimator;
use super::state::{BbrState, PhaseInput, PhaseMachine, ProbeBwPhase};
use super::stats::BbrStats;

/// An acknowledgment as reported by the sender's transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AckEvent {
    /// Sequence number of the acknowledged datagram.
    pub seq: u64,
    /// When the datagram was sent (sender's clock).
    pub send_time: u64,
    /// When the receiver got it (receiver's clock, informational only).
    pub recv_time: u64,
    /// When the ack reached the sender (sender's clock).
    pub ack_recv_time: u64,
    pub payload_len: usize,
    /// Delivery snapshot the sender stamped on the datagram itself. When
    /// `None` the controller uses the one it recorded at send time.
    pub delivery: Option<DeliverySnapshot>,
}

/// BBR-style congestion controller.
///
/// The controller is a single-writer state machine: every event takes
/// `&mut self` and every query takes `&self`. Wrap it in
/// [`SharedController`](super::SharedController) when events arrive from more
/// than one thread.
///
/// ```
/// use pathmodel::congestion::{AckEvent, BbrConfig, BbrController};
/// use pathmodel::simulation::VirtualTime;
///
/// let time = VirtualTime::new();
/// let mut controller = BbrController::new_with_time_source(BbrConfig::default(), time.clone());
///
/// controller.on_datagram_sent(0, 0, 1200, false);
/// time.advance_millis(40);
/// controller.on_ack_received(AckEvent {
///     seq: 0,
///     send_time: 0,
///     recv_time: 20,
///     ack_recv_time: 40,
///     payload_len: 1200,
///     delivery: None,
/// });
///
/// assert_eq!(controller.rtprop(), Some(40.0));
/// assert!(controller.can_send_now());
/// ```
pub struct BbrController<T: TimeSource = RealTime, L: DeliveryLedger = SentPacketLedger> {
    config: BbrConfig,

    // === Model ===
    rtt: RttEstimator,
    bandwidth: BandwidthEstimator,
    delivery: DeliveryTracker,
    phases: PhaseMachine,

    // === Window and pacing ===
    /// Congestion window in packets, always at least 1.
    cwnd: usize,
    /// Outstanding datagrams.
    inflight: usize,
    /// Window ceiling left by the last retransmit, and the round it was set in.
    loss_cap: Option<(usize, u64)>,
    /// Pacing rate in bytes/ms; `None` until BtlBw is known.
    pacing_rate: Option<f64>,
    /// Earliest time (ms, fractional) the next datagram may leave.
    next_send_at: f64,
    /// Newest ack time processed, for rejecting events that go back in time.
    last_ack_time: Option<u64>,

    ledger: L,
    rng: SmallRng,
    time_source: T,

    // === Statistics ===
    retransmits: u64,
    losses: u64,
    discarded_samples: u64,
    unknown_acks: u64,
    probe_rtt_entries: u64,
}

impl BbrController<RealTime> {
    /// Create a controller on the wall clock with the default ledger.
    pub fn new(config: BbrConfig) -> Self {
        Self::new_with_time_source(config, RealTime::new())
    }
}

impl<T: TimeSource> BbrController<T> {
    pub fn new_with_time_source(config: BbrConfig, time_source: T) -> Self {
        Self::with_ledger(config, time_source, SentPacketLedger::new())
    }
}

impl<T: TimeSource, L: DeliveryLedger> BbrController<T, L> {
    /// Create a controller that keeps its send records in `ledger`.
    pub fn with_ledger(config: BbrConfig, time_source: T, ledger: L) -> Self {
        let rng = match config.rng_seed {
            Some(seed) => SmallRng::seed_from_u64(seed),
            None => SmallRng::from_os_rng(),
        };
        Self {
            rtt: RttEstimator::new(&config),
            bandwidth: BandwidthEstimator::new(&config),
            delivery: DeliveryTracker::new(),
            phases: PhaseMachine::new(),
            cwnd: config.initial_cwnd.max(1),
            inflight: 0,
            loss_cap: None,
            pacing_rate: None,
            next_send_at: 0.0,
            last_ack_time: None,
            ledger,
            rng,
            time_source,
            retransmits: 0,
            losses: 0,
            discarded_samples: 0,
            unknown_acks: 0,
            probe_rtt_entries: 0,
            config,
        }
    }

    /// Current time on the controller's clock, in milliseconds.
    pub fn now_millis(&self) -> u64 {
        self.time_source.now_millis()
    }

    // =========================================================================
    // Events
    // =========================================================================

    /// A datagram left the sender.
    ///
    /// A retransmission shrinks the window immediately and keeps it capped at
    /// the reduced size until a full round trip completes without another one.
    /// Re-sending a sequence number that is still outstanding replaces its
    /// record and does not count twice towards inflight.
    pub fn on_datagram_sent(
        &mut self,
        seq: u64,
        send_time: u64,
        payload_len: usize,
        is_retransmit: bool,
    ) {
        let record = SentRecord {
            send_time,
            payload_len,
            delivery: self.delivery.snapshot(send_time),
            is_retransmit,
        };
        if self.ledger.record(seq, record).is_none() {
            self.inflight += 1;
        }

        if is_retransmit {
            self.retransmits += 1;
            let cut = ((self.cwnd as f64 * self.config.retransmit_cutback).floor() as usize).max(1);
            tracing::debug!(seq, from = self.cwnd, to = cut, "Retransmit, cutting window");
            self.cwnd = cut;
            self.loss_cap = Some((cut, self.delivery.round_count()));
        }

        let base = self.next_send_at.max(send_time as f64);
        self.next_send_at = base + self.pacing_interval(payload_len);
    }

    /// An acknowledgment arrived.
    ///
    /// Acks for sequence numbers that are not outstanding are ignored. Acks
    /// whose timestamps are inconsistent still release their datagram but
    /// contribute no samples.
    pub fn on_ack_received(&mut self, ack: AckEvent) {
        let Some(record) = self.ledger.take(ack.seq) else {
            self.unknown_acks += 1;
            tracing::warn!(
                error = %SampleError::UnknownSequence(ack.seq),
                "Ignoring ack"
            );
            return;
        };
        self.inflight = self.inflight.saturating_sub(1);

        let now = ack.ack_recv_time;
        if let Some(previous) = self.last_ack_time.filter(|&previous| now < previous) {
            self.delivery.on_discarded_ack(ack.payload_len);
            self.discard(SampleError::TimeWentBackwards { previous, now });
            return;
        }
        self.last_ack_time = Some(now);

        let snapshot = ack.delivery.unwrap_or(record.delivery);
        let outcome = self.delivery.on_ack(ack.payload_len, now, &snapshot);

        match self.rtt.update(ack.send_time, now) {
            Ok(update) => {
                if self.rtt.next_probe_rtt().is_none() {
                    let jitter = self.probe_rtt_jitter();
                    self.rtt.schedule_probe_rtt(now, jitter);
                }
                tracing::trace!(
                    seq = ack.seq,
                    rtt = update.rtt,
                    refreshed = update.refreshed,
                    "RTT sample"
                );
            }
            Err(err) => self.discard(err),
        }

        let rtprop = self.rtt.rtprop();
        let rate_sample = match outcome.rate {
            Ok(rate) => self.bandwidth.update(rate, now, rtprop, outcome.is_app_limited),
            Err(err) => {
                self.bandwidth.expire(now, rtprop);
                Err(err)
            }
        };
        if let Err(err) = rate_sample {
            self.discard(err);
        }

        self.update_phase(now, outcome.round_start, outcome.is_app_limited);

        if outcome.round_start {
            let round = self.delivery.round_count();
            if self
                .loss_cap
                .is_some_and(|(_, set_in)| round >= set_in.saturating_add(2))
            {
                tracing::debug!(round, "Clean round trip, lifting retransmit cap");
                self.loss_cap = None;
            }
        }

        self.update_model(now, ack.payload_len);

        tracing::trace!(
            seq = ack.seq,
            state = %self.phases.state(),
            cwnd = self.cwnd,
            inflight = self.inflight,
            rtprop = ?self.rtt.rtprop(),
            btlbw = ?self.bandwidth.btlbw(),
            "Ack processed"
        );
    }

    /// The sender's loss detector gave up on `seq`.
    ///
    /// Releases the datagram's inflight slot without feeding any estimator.
    pub fn on_datagram_lost(&mut self, seq: u64) {
        if self.ledger.take(seq).is_some() {
            self.inflight = self.inflight.saturating_sub(1);
            self.losses += 1;
            tracing::debug!(seq, inflight = self.inflight, "Datagram declared lost");
        }
    }

    /// Mark subsequent sends as application-limited (or not).
    ///
    /// Call with `true` when the sender has run out of data while the window
    /// would allow more. Samples from those datagrams can raise BtlBw but never
    /// lower it.
    pub fn set_app_limited(&mut self, app_limited: bool) {
        self.delivery.set_app_limited(app_limited);
    }

    // =========================================================================
    // Queries
    // =========================================================================

    /// Congestion window in packets.
    pub fn window_size(&self) -> usize {
        tracing::trace!(cwnd = self.cwnd, inflight = self.inflight, "Window size");
        self.cwnd
    }

    /// How long to wait for an ack before assuming loss, in milliseconds.
    pub fn timeout_ms(&self) -> u64 {
        let min = self.config.min_timeout.as_millis() as u64;
        let max = self.config.max_timeout.as_millis() as u64;
        match self.rtt.rtprop() {
            Some(rtprop) => {
                let timeout = (rtprop * self.config.timeout_rtprop_multiplier).round();
                if timeout.is_finite() {
                    (timeout as u64).clamp(min, max.max(min))
                } else {
                    max.max(min)
                }
            }
            None => self.config.default_timeout.as_millis() as u64,
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms())
    }

    /// Whether the window and the pacer both allow a datagram right now.
    pub fn can_send_now(&self) -> bool {
        self.can_send_at(self.now_millis())
    }

    pub fn can_send_at(&self, now: u64) -> bool {
        self.inflight < self.cwnd && now >= self.next_send_at.floor() as u64
    }

    /// Earliest time the pacer lets the next datagram out.
    pub fn next_send_time(&self) -> u64 {
        self.next_send_at.floor() as u64
    }

    /// Delivery state to stamp on a datagram sent now, for senders that keep
    /// their own ledger and pass it back in [`AckEvent::delivery`].
    pub fn delivery_snapshot(&self) -> DeliverySnapshot {
        self.delivery.snapshot(self.now_millis())
    }

    /// Pacing rate in bytes/ms, `None` while unpaced.
    pub fn pacing_rate(&self) -> Option<f64> {
        self.pacing_rate
    }

    /// RTprop in milliseconds.
    pub fn rtprop(&self) -> Option<f64> {
        self.rtt.rtprop()
    }

    /// BtlBw in bytes/ms.
    pub fn btlbw(&self) -> Option<f64> {
        self.bandwidth.btlbw()
    }

    /// Bandwidth-delay product in bytes.
    pub fn bdp(&self) -> Option<f64> {
        match (self.rtt.rtprop(), self.bandwidth.btlbw()) {
            (Some(rtprop), Some(btlbw)) if rtprop > 0.0 && btlbw > 0.0 => Some(rtprop * btlbw),
            _ => None,
        }
    }

    /// Bandwidth-delay product in packets of [`BbrConfig::mss`] bytes.
    pub fn bdp_packets(&self) -> Option<f64> {
        self.bdp().map(|bdp| bdp / self.config.mss.max(1) as f64)
    }

    pub fn state(&self) -> BbrState {
        self.phases.state()
    }

    pub fn probe_bw_phase(&self) -> ProbeBwPhase {
        self.phases.probe_bw_phase()
    }

    pub fn inflight(&self) -> usize {
        self.inflight
    }

    pub fn round_count(&self) -> u64 {
        self.delivery.round_count()
    }

    pub fn config(&self) -> &BbrConfig {
        &self.config
    }

    pub fn ledger(&self) -> &L {
        &self.ledger
    }

    pub fn stats(&self) -> BbrStats {
        BbrStats {
            state: self.phases.state(),
            probe_bw_phase: self.phases.probe_bw_phase(),
            cwnd: self.cwnd,
            inflight: self.inflight,
            rtprop: self.rtt.rtprop(),
            btlbw: self.bandwidth.btlbw(),
            bdp: self.bdp(),
            pacing_rate: self.pacing_rate,
            pacing_gain: self.phases.pacing_gain(&self.config),
            cwnd_gain: self.phases.cwnd_gain(&self.config),
            delivered: self.delivery.delivered(),
            round_count: self.delivery.round_count(),
            retransmits: self.retransmits,
            losses: self.losses,
            discarded_samples: self.discarded_samples,
            unknown_acks: self.unknown_acks,
            probe_rtt_entries: self.probe_rtt_entries,
            is_app_limited: self.delivery.is_app_limited(),
            loss_cap: self.loss_cap.map(|(cap, _)| cap),
        }
    }

    // =========================================================================
    // Model updates
    // =========================================================================

    fn update_phase(&mut self, now: u64, round_start: bool, sample_app_limited: bool) {
        let input = PhaseInput {
            now,
            round_start,
            round_count: self.delivery.round_count(),
            btlbw: self.bandwidth.btlbw(),
            sample_app_limited,
            inflight: self.inflight,
            bdp_packets: self.bdp_packets(),
            probe_rtt_due: self.rtt.probe_rtt_due(now),
            probe_rtt_cap: self.probe_rtt_cap(),
        };

        for change in self.phases.update(&input, &self.config) {
            tracing::debug!(
                from = %change.from,
                to = %change.to,
                round = input.round_count,
                rtprop = ?self.rtt.rtprop(),
                btlbw = ?input.btlbw,
                "Phase transition"
            );
            if change.to == BbrState::ProbeRTT {
                self.probe_rtt_entries += 1;
            }
            if change.from == BbrState::ProbeRTT {
                let jitter = self.probe_rtt_jitter();
                self.rtt.on_probe_rtt_done(now, jitter);
            }
        }
    }

    /// Recompute the window and the pacing rate from the current estimates.
    fn update_model(&mut self, now: u64, payload_len: usize) {
        let state = self.phases.state();
        let gain = self.phases.cwnd_gain(&self.config);

        let mut cwnd = match self.bdp_packets() {
            Some(bdp) => {
                let target = (bdp * gain).round();
                if target.is_finite() {
                    target as usize
                } else {
                    self.cwnd
                }
            }
            None => self.cwnd,
        };
        if state == BbrState::Startup {
            cwnd = cwnd.max(self.config.initial_cwnd);
        }
        cwnd = cwnd.clamp(self.config.min_cwnd, self.config.max_cwnd.max(self.config.min_cwnd));
        if state == BbrState::ProbeRTT {
            cwnd = cwnd.min(self.probe_rtt_cap());
        }
        if let Some((cap, _)) = self.loss_cap {
            cwnd = cwnd.min(cap);
        }
        self.cwnd = cwnd.max(1);

        self.pacing_rate = self
            .bandwidth
            .btlbw()
            .map(|btlbw| btlbw * self.phases.pacing_gain(&self.config))
            .filter(|rate| rate.is_finite() && *rate > 0.0);

        // A faster rate takes effect now instead of after the old deadline.
        let horizon = now as f64 + self.pacing_interval(payload_len);
        if self.next_send_at > horizon {
            self.next_send_at = horizon;
        }
    }

    /// Milliseconds one datagram of `payload_len` bytes occupies at the
    /// pacing rate; zero while unpaced.
    fn pacing_interval(&self, payload_len: usize) -> f64 {
        match self.pacing_rate {
            Some(rate) => {
                let interval = payload_len as f64 / rate;
                if interval.is_finite() {
                    interval
                } else {
                    0.0
                }
            }
            None => 0.0,
        }
    }

    /// Ceiling on the window while in ProbeRTT.
    fn probe_rtt_cap(&self) -> usize {
        let floor = self.config.probe_rtt_min_cwnd.max(1);
        let cap = match self.bdp_packets() {
            Some(bdp) => {
                let target = (bdp * self.config.probe_rtt_cwnd_gain).ceil();
                if target.is_finite() {
                    (target as usize).max(floor)
                } else {
                    floor
                }
            }
            None => floor,
        };
        cap.min(self.config.max_cwnd.max(1))
    }

    fn probe_rtt_jitter(&mut self) -> i64 {
        let jitter = self.config.probe_rtt_jitter.as_millis() as i64;
        if jitter == 0 {
            0
        } else {
            self.rng.random_range(-jitter..=jitter)
        }
    }

    fn discard(&mut self, err: SampleError) {
        self.discarded_samples += 1;
        tracing::debug!(error = %err, "Discarding sample");
    }
}

impl<T: TimeSource, L: DeliveryLedger> std::fmt::Debug for BbrController<T, L> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BbrController")
            .field("state", &self.phases.state())
            .field("filled_pipe", &self.phases.filled_pipe())
            .field("cwnd", &self.cwnd)
            .field("inflight", &self.inflight)
            .field("rtt", &self.rtt)
            .field("bandwidth", &self.bandwidth)
            .field("pacing_rate", &self.pacing_rate)
            .field("delivered_time", &self.delivery.delivered_time())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::simulation::VirtualTime;

    fn controller() -> (BbrController<VirtualTime>, VirtualTime) {
        let time = VirtualTime::new();
        let config = BbrConfig {
            rng_seed: Some(1),
            ..Default::default()
        };
        (BbrController::new_with_time_source(config, time.clone()), time)
    }

    fn ack(seq: u64, send_time: u64, ack_recv_time: u64, payload_len: usize) -> AckEvent {
        AckEvent {
            seq,
            send_time,
            recv_time: send_time + (ack_recv_time - send_time) / 2,
            ack_recv_time,
            payload_len,
            delivery: None,
        }
    }

    #[test]
    fn test_controller_creation() {
        let (controller, _) = controller();
        assert_eq!(controller.state(), BbrState::Startup);
        assert_eq!(controller.window_size(), 10);
        assert_eq!(controller.inflight(), 0);
        assert_eq!(controller.timeout_ms(), 1000);
        assert!(controller.pacing_rate().is_none());
        assert!(controller.can_send_now());
    }

    #[test]
    fn test_send_and_ack_track_inflight() {
        let (mut controller, _) = controller();
        controller.on_datagram_sent(1, 0, 1000, false);
        controller.on_datagram_sent(2, 0, 1000, false);
        assert_eq!(controller.inflight(), 2);

        controller.on_ack_received(ack(1, 0, 50, 1000));
        assert_eq!(controller.inflight(), 1);
        assert_eq!(controller.rtprop(), Some(50.0));
        assert_eq!(controller.btlbw(), Some(20.0));
    }

    #[test]
    fn test_resending_outstanding_seq_does_not_double_count() {
        let (mut controller, _) = controller();
        controller.on_datagram_sent(1, 0, 1000, false);
        controller.on_datagram_sent(1, 30, 1000, false);
        assert_eq!(controller.inflight(), 1);
        assert_eq!(controller.ledger().outstanding(), 1);
    }

    #[test]
    fn test_unknown_ack_is_ignored() {
        let (mut controller, _) = controller();
        controller.on_datagram_sent(1, 0, 1000, false);
        controller.on_ack_received(ack(99, 0, 50, 1000));

        assert_eq!(controller.inflight(), 1);
        assert!(controller.rtprop().is_none());
        assert_eq!(controller.stats().unknown_acks, 1);

        // a duplicate ack is unknown the second time around
        controller.on_ack_received(ack(1, 0, 50, 1000));
        controller.on_ack_received(ack(1, 0, 60, 1000));
        assert_eq!(controller.inflight(), 0);
        assert_eq!(controller.stats().unknown_acks, 2);
    }

    #[test]
    fn test_negative_rtt_is_discarded() {
        let (mut controller, _) = controller();
        controller.on_datagram_sent(1, 100, 1000, false);
        controller.on_ack_received(ack(1, 100, 100, 1000));
        controller.on_datagram_sent(2, 100, 1000, false);
        controller.on_ack_received(AckEvent {
            seq: 2,
            send_time: 200,
            recv_time: 150,
            ack_recv_time: 150,
            payload_len: 1000,
            delivery: None,
        });

        assert_eq!(controller.inflight(), 0);
        assert!(controller.stats().discarded_samples >= 1);
        assert!(controller.window_size() >= 1);
    }

    #[test]
    fn test_ack_going_back_in_time_is_discarded() {
        let (mut controller, _) = controller();
        controller.on_datagram_sent(1, 0, 1000, false);
        controller.on_datagram_sent(2, 0, 1000, false);
        controller.on_ack_received(ack(1, 0, 80, 1000));
        let before = controller.stats();

        controller.on_ack_received(ack(2, 0, 40, 1000));
        let after = controller.stats();

        assert_eq!(after.rtprop, Some(80.0));
        assert_eq!(after.discarded_samples, before.discarded_samples + 1);
        assert_eq!(after.inflight, 0);
    }

    #[test]
    fn test_backwards_ack_does_not_start_a_round() {
        let (mut controller, _) = controller();
        controller.on_datagram_sent(0, 0, 1000, false);
        controller.on_ack_received(ack(0, 0, 80, 1000));
        assert_eq!(controller.round_count(), 1);

        // both sent after the first round ended
        controller.on_datagram_sent(1, 80, 1000, false);
        controller.on_datagram_sent(2, 80, 1000, false);
        controller.on_ack_received(AckEvent {
            seq: 1,
            send_time: 80,
            recv_time: 70,
            ack_recv_time: 70,
            payload_len: 1000,
            delivery: None,
        });
        let stats = controller.stats();
        assert_eq!(stats.round_count, 1);
        assert_eq!(stats.delivered, 2000);
        assert_eq!(stats.discarded_samples, 1);

        controller.on_ack_received(ack(2, 80, 130, 1000));
        assert_eq!(controller.round_count(), 2);
    }

    #[test]
    fn test_unsampled_ack_still_ages_out_btlbw() {
        let (mut controller, _) = controller();
        controller.on_datagram_sent(0, 0, 1000, false);
        controller.on_ack_received(ack(0, 0, 50, 1000));
        assert_eq!(controller.btlbw(), Some(20.0));

        // the 20 bytes/ms peak is far outside the 400 ms window by now
        controller.set_app_limited(true);
        controller.on_datagram_sent(1, 5_000, 1000, false);
        controller.on_ack_received(ack(1, 5_000, 5_050, 1000));
        let btlbw = controller.btlbw().unwrap();
        assert!((btlbw - 0.2).abs() < 1e-9, "BtlBw {btlbw}");
    }

    #[test]
    fn test_timeout_with_inverted_bounds_does_not_panic() {
        let config = BbrConfig {
            min_timeout: Duration::from_secs(5),
            rng_seed: Some(1),
            ..Default::default()
        };
        let mut controller = BbrController::new_with_time_source(config, VirtualTime::new());
        controller.on_datagram_sent(0, 0, 1000, false);
        controller.on_ack_received(ack(0, 0, 50, 1000));
        assert_eq!(controller.timeout_ms(), 5_000);
    }

    #[test]
    fn test_retransmit_cuts_window() {
        let (mut controller, _) = controller();
        assert_eq!(controller.window_size(), 10);

        controller.on_datagram_sent(1, 0, 1000, true);
        assert_eq!(controller.window_size(), 6);
        controller.on_datagram_sent(2, 0, 1000, true);
        assert_eq!(controller.window_size(), 3);
        controller.on_datagram_sent(3, 0, 1000, true);
        assert_eq!(controller.window_size(), 1);
        controller.on_datagram_sent(4, 0, 1000, true);
        assert_eq!(controller.window_size(), 1);
        assert_eq!(controller.stats().retransmits, 4);
    }

    #[test]
    fn test_retransmit_cap_holds_until_clean_round() {
        let (mut controller, _) = controller();

        controller.on_datagram_sent(0, 0, 1000, false);
        controller.on_ack_received(ack(0, 0, 50, 1000));
        assert_eq!(controller.window_size(), 10);

        controller.on_datagram_sent(1, 50, 1000, true);
        let capped = controller.window_size();
        assert_eq!(capped, 6);
        assert_eq!(controller.stats().loss_cap, Some(capped));

        // closes the round the retransmit went out in; the cap still holds
        controller.on_ack_received(ack(1, 50, 100, 1000));
        assert_eq!(controller.window_size(), capped);

        // a whole round without retransmits lifts it
        controller.on_datagram_sent(2, 100, 1000, false);
        controller.on_ack_received(ack(2, 100, 150, 1000));
        assert_eq!(controller.stats().loss_cap, None);
        assert_eq!(controller.window_size(), 10);
    }

    #[test]
    fn test_loss_releases_inflight() {
        let (mut controller, _) = controller();
        controller.on_datagram_sent(1, 0, 1000, false);
        controller.on_datagram_sent(2, 0, 1000, false);

        controller.on_datagram_lost(1);
        controller.on_datagram_lost(1);
        controller.on_datagram_lost(42);

        assert_eq!(controller.inflight(), 1);
        assert_eq!(controller.stats().losses, 1);
        assert!(controller.rtprop().is_none());
    }

    #[test]
    fn test_timeout_tracks_rtprop() {
        let (mut controller, _) = controller();
        controller.on_datagram_sent(1, 0, 1000, false);
        controller.on_ack_received(ack(1, 0, 100, 1000));
        assert_eq!(controller.timeout_ms(), 120);
        assert_eq!(controller.timeout(), Duration::from_millis(120));

        controller.on_datagram_sent(2, 100, 1000, false);
        controller.on_ack_received(ack(2, 100, 110, 1000));
        // 1.2 * 10 is below the floor
        assert_eq!(controller.timeout_ms(), 50);
    }

    #[test]
    fn test_timeout_ceiling() {
        let (mut controller, _) = controller();
        controller.on_datagram_sent(1, 0, 1000, false);
        controller.on_ack_received(ack(1, 0, 5_000, 1000));
        assert_eq!(controller.timeout_ms(), 1000);
    }

    #[test]
    fn test_pacing_spaces_sends() {
        let (mut controller, _) = controller();
        controller.on_datagram_sent(0, 0, 1000, false);
        controller.on_ack_received(ack(0, 0, 50, 1000));

        // 20 bytes/ms * 2.77 startup gain
        let rate = controller.pacing_rate().unwrap();
        assert!((rate - 55.4).abs() < 1e-9);

        controller.on_datagram_sent(1, 50, 1000, false);
        controller.on_datagram_sent(2, 50, 1000, false);
        // two datagrams at ~18ms each
        assert_eq!(controller.next_send_time(), 86);
        assert!(!controller.can_send_at(85));
        assert!(controller.can_send_at(86));
    }

    #[test]
    fn test_window_limits_sending() {
        let (mut controller, _) = controller();
        for seq in 0..10 {
            assert!(controller.can_send_at(0));
            controller.on_datagram_sent(seq, 0, 1000, false);
        }
        assert!(!controller.can_send_at(0));
        assert!(!controller.can_send_at(10_000));
    }

    #[test]
    fn test_app_limited_sample_does_not_lower_btlbw() {
        let (mut controller, _) = controller();
        controller.on_datagram_sent(0, 0, 1000, false);
        controller.on_ack_received(ack(0, 0, 50, 1000));
        assert_eq!(controller.btlbw(), Some(20.0));

        controller.set_app_limited(true);
        controller.on_datagram_sent(1, 50, 100, false);
        controller.on_ack_received(ack(1, 50, 100, 100));
        assert_eq!(controller.btlbw(), Some(20.0));
        assert!(controller.stats().is_app_limited);
    }

    #[test]
    fn test_caller_supplied_snapshot_is_used() {
        let (mut controller, _) = controller();
        controller.on_datagram_sent(0, 0, 1000, false);
        controller.on_ack_received(AckEvent {
            delivery: Some(DeliverySnapshot {
                delivered: 0,
                delivered_time: 0,
                is_app_limited: false,
            }),
            ..ack(0, 0, 100, 1000)
        });
        assert_eq!(controller.btlbw(), Some(10.0));
    }

    #[test]
    fn test_delivery_snapshot_reflects_acks() {
        let (mut controller, time) = controller();
        assert_eq!(controller.delivery_snapshot().delivered, 0);

        controller.on_datagram_sent(0, 0, 1000, false);
        time.advance_millis(50);
        controller.on_ack_received(ack(0, 0, 50, 1000));
        time.advance_millis(10);

        let snap = controller.delivery_snapshot();
        assert_eq!(snap.delivered, 1000);
        assert_eq!(snap.delivered_time, 50);
    }

    #[test]
    fn test_queries_are_idempotent() {
        let (mut controller, _) = controller();
        controller.on_datagram_sent(0, 0, 1000, false);
        controller.on_ack_received(ack(0, 0, 70, 1000));

        let window = controller.window_size();
        let timeout = controller.timeout_ms();
        for _ in 0..5 {
            assert_eq!(controller.window_size(), window);
            assert_eq!(controller.timeout_ms(), timeout);
        }
    }
}
