//! RTprop estimation and ProbeRTT scheduling.
//!
//! RTprop is the minimum RTT observed over a trailing window. When the sample
//! that set the minimum ages out, the next-smallest sample in the window takes
//! over, so the estimate can rise. That is how a route change to a longer path
//! is eventually picked up.

use crate::errors::SampleError;

use super::config::BbrConfig;
use super::filter::{MinFilter, Sample};

/// Outcome of feeding one acknowledgment to the estimator.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct RttUpdate {
    /// The RTT sample itself (ms).
    pub rtt: f64,
    /// Whether the sample tied or beat RTprop, refreshing its timestamp.
    pub refreshed: bool,
}

pub(crate) struct RttEstimator {
    filter: MinFilter,
    rtprop: Option<f64>,
    /// When RTprop was last confirmed by a sample at or below it.
    last_updated: Option<u64>,
    stale_after_ms: u64,
    /// Deadline of the next periodic ProbeRTT; `None` until the first sample.
    next_probe_rtt: Option<u64>,
    probe_interval_ms: u64,
}

impl RttEstimator {
    pub(crate) fn new(config: &BbrConfig) -> Self {
        Self {
            filter: MinFilter::new(config.rt_sample_window.as_millis() as u64),
            rtprop: None,
            last_updated: None,
            stale_after_ms: config.rtprop_stale_after.as_millis() as u64,
            next_probe_rtt: None,
            probe_interval_ms: config.probe_rtt_interval.as_millis() as u64,
        }
    }

    /// Take an RTT sample from a datagram sent at `send_time` whose ack
    /// arrived at `ack_time`.
    ///
    /// Samples older than the window are dropped as of `ack_time` even when
    /// the new sample itself is rejected.
    pub(crate) fn update(
        &mut self,
        send_time: u64,
        ack_time: u64,
    ) -> Result<RttUpdate, SampleError> {
        self.expire(ack_time);
        let Some(elapsed) = ack_time.checked_sub(send_time) else {
            return Err(SampleError::NegativeRtt {
                send_time,
                ack_time,
            });
        };
        let rtt = elapsed as f64;

        self.filter.insert(Sample::new(rtt, ack_time), ack_time)?;

        let beat_previous = self.rtprop.map_or(true, |current| rtt <= current);
        let is_new_minimum = self
            .filter
            .extremum()
            .is_some_and(|min| min.observed_at == ack_time && min.value == rtt);
        let refreshed = beat_previous || is_new_minimum;
        if refreshed {
            self.last_updated = Some(ack_time);
        }

        self.rtprop = self.filter.extremum().map(|min| min.value);
        Ok(RttUpdate { rtt, refreshed })
    }

    /// Age out samples as of `now`. RTprop goes back to `None` once the
    /// window is empty.
    pub(crate) fn expire(&mut self, now: u64) {
        self.filter.expire(now);
        self.rtprop = self.filter.extremum().map(|min| min.value);
    }

    /// Current RTprop in milliseconds, `None` before the first sample.
    pub(crate) fn rtprop(&self) -> Option<f64> {
        self.rtprop
    }

    pub(crate) fn last_updated(&self) -> Option<u64> {
        self.last_updated
    }

    /// RTprop has not been confirmed for longer than the staleness threshold.
    pub(crate) fn is_stale(&self, now: u64) -> bool {
        self.last_updated
            .is_some_and(|stamp| now.saturating_sub(stamp) > self.stale_after_ms)
    }

    /// ProbeRTT is due when RTprop is stale or the periodic deadline passed.
    pub(crate) fn probe_rtt_due(&self, now: u64) -> bool {
        self.is_stale(now) || self.next_probe_rtt.is_some_and(|deadline| now >= deadline)
    }

    pub(crate) fn next_probe_rtt(&self) -> Option<u64> {
        self.next_probe_rtt
    }

    /// Schedule the next periodic ProbeRTT `interval + jitter_ms` after `now`.
    pub(crate) fn schedule_probe_rtt(&mut self, now: u64, jitter_ms: i64) {
        let next = now
            .saturating_add(self.probe_interval_ms)
            .saturating_add_signed(jitter_ms);
        self.next_probe_rtt = Some(next);
    }

    /// Leaving ProbeRTT counts as confirming RTprop: the window was drained, so
    /// whatever minimum the filter holds is as good as this path offers right now.
    pub(crate) fn on_probe_rtt_done(&mut self, now: u64, jitter_ms: i64) {
        self.last_updated = Some(now);
        self.schedule_probe_rtt(now, jitter_ms);
    }
}

impl std::fmt::Debug for RttEstimator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RttEstimator")
            .field("rtprop", &self.rtprop)
            .field("last_updated", &self.last_updated())
            .field("next_probe_rtt", &self.next_probe_rtt)
            .finish()
    }
}
