//! Per-datagram delivery accounting.
//!
//! Every datagram is stamped at send time with a [`DeliverySnapshot`]: the
//! total bytes delivered so far and when the most recent delivery happened.
//! When its ack arrives the delivery rate over the datagram's flight is
//!
//! ```text
//! rate = (delivered_now - snapshot.delivered) / (ack_time - snapshot.delivered_time)
//! ```
//!
//! which measures progress across the whole interval rather than dividing one
//! payload by one RTT, and therefore tolerates ack compression.
//!
//! The send records live behind the [`DeliveryLedger`] trait so a host that
//! already tracks outstanding datagrams can hand its own store to the
//! controller instead of keeping two copies.

use std::collections::HashMap;

use crate::errors::SampleError;

/// Delivery state stamped on a datagram when it is sent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DeliverySnapshot {
    /// Total bytes acknowledged when the datagram was sent.
    pub delivered: u64,
    /// Time (ms) of the most recent delivery at send time, or the send time
    /// itself if nothing had been delivered yet.
    pub delivered_time: u64,
    /// The sender had nothing more to send when this datagram left.
    pub is_app_limited: bool,
}

/// What the ledger remembers about one outstanding datagram.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SentRecord {
    pub send_time: u64,
    pub payload_len: usize,
    pub delivery: DeliverySnapshot,
    pub is_retransmit: bool,
}

/// Storage for outstanding datagrams keyed by sequence number.
pub trait DeliveryLedger {
    /// Remember `record` for `seq`, returning the record it replaces, if any.
    fn record(&mut self, seq: u64, record: SentRecord) -> Option<SentRecord>;

    /// Remove and return the record for `seq`.
    fn take(&mut self, seq: u64) -> Option<SentRecord>;

    fn contains(&self, seq: u64) -> bool;

    /// Number of outstanding datagrams.
    fn outstanding(&self) -> usize;
}

/// The default [`DeliveryLedger`], a plain map from sequence number to record.
#[derive(Debug, Default)]
pub struct SentPacketLedger {
    records: HashMap<u64, SentRecord>,
}

impl SentPacketLedger {
    pub fn new() -> Self {
        Self::default()
    }
}

impl DeliveryLedger for SentPacketLedger {
    fn record(&mut self, seq: u64, record: SentRecord) -> Option<SentRecord> {
        self.records.insert(seq, record)
    }

    fn take(&mut self, seq: u64) -> Option<SentRecord> {
        self.records.remove(&seq)
    }

    fn contains(&self, seq: u64) -> bool {
        self.records.contains_key(&seq)
    }

    fn outstanding(&self) -> usize {
        self.records.len()
    }
}

/// Result of accounting for one acknowledged datagram.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct DeliveryOutcome {
    /// This ack closed a round trip.
    pub round_start: bool,
    /// Delivery rate in bytes/ms over the datagram's flight.
    pub rate: Result<f64, SampleError>,
    pub is_app_limited: bool,
}

/// Cumulative delivery counters and round-trip detection.
///
/// A round trip ends when a datagram that was sent after the previous round
/// ended gets acknowledged, i.e. when its snapshot shows at least as many
/// delivered bytes as were delivered at the end of that round.
#[derive(Debug, Default)]
pub(crate) struct DeliveryTracker {
    delivered: u64,
    delivered_time: Option<u64>,
    next_round_delivered: u64,
    round_count: u64,
    app_limited: bool,
}

impl DeliveryTracker {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Snapshot to stamp on a datagram sent at `now`.
    pub(crate) fn snapshot(&self, now: u64) -> DeliverySnapshot {
        DeliverySnapshot {
            delivered: self.delivered,
            delivered_time: self.delivered_time.unwrap_or(now),
            is_app_limited: self.app_limited,
        }
    }

    pub(crate) fn set_app_limited(&mut self, app_limited: bool) {
        self.app_limited = app_limited;
    }

    pub(crate) fn is_app_limited(&self) -> bool {
        self.app_limited
    }

    pub(crate) fn delivered(&self) -> u64 {
        self.delivered
    }

    pub(crate) fn delivered_time(&self) -> Option<u64> {
        self.delivered_time
    }

    pub(crate) fn round_count(&self) -> u64 {
        self.round_count
    }

    /// Count bytes from an ack that yields no sample. Rounds are left alone.
    pub(crate) fn on_discarded_ack(&mut self, payload_len: usize) {
        self.delivered = self.delivered.saturating_add(payload_len as u64);
    }

    /// Account for `payload_len` bytes acknowledged at `ack_time` and compute
    /// the delivery rate against the datagram's send snapshot.
    pub(crate) fn on_ack(
        &mut self,
        payload_len: usize,
        ack_time: u64,
        snapshot: &DeliverySnapshot,
    ) -> DeliveryOutcome {
        self.on_discarded_ack(payload_len);
        self.delivered_time = Some(self.delivered_time.map_or(ack_time, |t| t.max(ack_time)));

        let round_start = snapshot.delivered >= self.next_round_delivered;
        if round_start {
            self.next_round_delivered = self.delivered;
            self.round_count += 1;
        }

        let rate = match ack_time.checked_sub(snapshot.delivered_time) {
            Some(interval) if interval > 0 => {
                let bytes = self.delivered.saturating_sub(snapshot.delivered);
                Ok(bytes as f64 / interval as f64)
            }
            _ => Err(SampleError::ZeroInterval),
        };

        DeliveryOutcome {
            round_start,
            rate,
            is_app_limited: snapshot.is_app_limited,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(send_time: u64, delivery: DeliverySnapshot) -> SentRecord {
        SentRecord {
            send_time,
            payload_len: 1000,
            delivery,
            is_retransmit: false,
        }
    }

    #[test]
    fn test_ledger_record_and_take() {
        let mut ledger = SentPacketLedger::new();
        assert!(ledger.record(1, record(0, DeliverySnapshot::default())).is_none());
        assert!(ledger.record(2, record(5, DeliverySnapshot::default())).is_none());
        assert_eq!(ledger.outstanding(), 2);
        assert!(ledger.contains(1));

        let taken = ledger.take(1).unwrap();
        assert_eq!(taken.send_time, 0);
        assert!(ledger.take(1).is_none());
        assert_eq!(ledger.outstanding(), 1);
    }

    #[test]
    fn test_ledger_replaces_existing_record() {
        let mut ledger = SentPacketLedger::new();
        ledger.record(7, record(0, DeliverySnapshot::default()));
        let previous = ledger.record(7, record(40, DeliverySnapshot::default()));

        assert_eq!(previous.map(|r| r.send_time), Some(0));
        assert_eq!(ledger.outstanding(), 1);
        assert_eq!(ledger.take(7).map(|r| r.send_time), Some(40));
    }

    #[test]
    fn test_first_snapshot_uses_send_time() {
        let tracker = DeliveryTracker::new();
        let snap = tracker.snapshot(123);
        assert_eq!(snap.delivered, 0);
        assert_eq!(snap.delivered_time, 123);
        assert!(!snap.is_app_limited);
    }

    #[test]
    fn test_rate_over_flight_interval() {
        let mut tracker = DeliveryTracker::new();
        let snap = tracker.snapshot(0);
        let outcome = tracker.on_ack(1000, 50, &snap);

        assert_eq!(outcome.rate, Ok(20.0));
        assert_eq!(tracker.delivered(), 1000);
        assert_eq!(tracker.delivered_time(), Some(50));
    }

    #[test]
    fn test_rate_counts_everything_delivered_in_flight() {
        let mut tracker = DeliveryTracker::new();
        let first = tracker.snapshot(0);
        let second = tracker.snapshot(0);

        tracker.on_ack(1000, 40, &first);
        let outcome = tracker.on_ack(1000, 50, &second);
        // 2000 bytes since the snapshot over 50ms
        assert_eq!(outcome.rate, Ok(40.0));
    }

    #[test]
    fn test_zero_interval_is_rejected() {
        let mut tracker = DeliveryTracker::new();
        let snap = tracker.snapshot(10);
        let outcome = tracker.on_ack(1000, 10, &snap);
        assert_eq!(outcome.rate, Err(SampleError::ZeroInterval));
        // bytes are still counted
        assert_eq!(tracker.delivered(), 1000);
    }

    #[test]
    fn test_round_counting() {
        let mut tracker = DeliveryTracker::new();
        // three datagrams in the first flight
        let snaps: Vec<_> = (0..3).map(|_| tracker.snapshot(0)).collect();

        assert!(tracker.on_ack(1000, 50, &snaps[0]).round_start);
        assert!(!tracker.on_ack(1000, 51, &snaps[1]).round_start);
        assert!(!tracker.on_ack(1000, 52, &snaps[2]).round_start);
        assert_eq!(tracker.round_count(), 1);

        // sent after the first round ended
        let next = tracker.snapshot(60);
        assert!(tracker.on_ack(1000, 110, &next).round_start);
        assert_eq!(tracker.round_count(), 2);
    }

    #[test]
    fn test_app_limited_marking() {
        let mut tracker = DeliveryTracker::new();
        tracker.set_app_limited(true);
        let snap = tracker.snapshot(0);
        assert!(snap.is_app_limited);
        assert!(tracker.on_ack(500, 20, &snap).is_app_limited);

        tracker.set_app_limited(false);
        assert!(!tracker.snapshot(30).is_app_limited);
    }

    #[test]
    fn test_delivered_time_never_moves_backwards() {
        let mut tracker = DeliveryTracker::new();
        let snap = tracker.snapshot(0);
        tracker.on_ack(100, 80, &snap);
        tracker.on_ack(100, 60, &snap);
        assert_eq!(tracker.delivered_time(), Some(80));
    }

    #[test]
    fn test_discarded_ack_counts_bytes_but_not_rounds() {
        let mut tracker = DeliveryTracker::new();
        let first = tracker.snapshot(0);
        tracker.on_ack(1000, 50, &first);

        tracker.on_discarded_ack(1000);
        assert_eq!(tracker.delivered(), 2000);
        assert_eq!(tracker.round_count(), 1);
        assert_eq!(tracker.delivered_time(), Some(50));
    }
}
