//! BtlBw estimation using a windowed maximum filter.
//!
//! The window is measured in round trips rather than wall time: a fixed
//! number of RTprops (8 by default) is long enough to span a full ProbeBW gain
//! cycle, so the up-probe that discovered the current BtlBw stays in the window
//! until the next one.

use crate::errors::SampleError;

use super::config::BbrConfig;
use super::filter::{MaxFilter, Sample};

pub(crate) struct BandwidthEstimator {
    filter: MaxFilter,
    window_rtts: f64,
    default_window_ms: u64,
    btlbw: Option<f64>,
}

impl BandwidthEstimator {
    pub(crate) fn new(config: &BbrConfig) -> Self {
        let default_window_ms = (config.default_bw_window.as_millis() as u64).max(1);
        Self {
            filter: MaxFilter::new(default_window_ms),
            window_rtts: config.bw_window_rtts,
            default_window_ms,
            btlbw: None,
        }
    }

    /// Window length for the given RTprop, falling back to the default while
    /// RTprop is unknown or degenerate.
    pub(crate) fn window_for(&self, rtprop: Option<f64>) -> u64 {
        match rtprop {
            Some(rtprop) if rtprop > 0.0 => {
                let window = (rtprop * self.window_rtts).ceil();
                if window.is_finite() && window >= 1.0 {
                    window as u64
                } else {
                    self.default_window_ms
                }
            }
            _ => self.default_window_ms,
        }
    }

    /// Feed a delivery-rate sample (bytes/ms) observed at `now`.
    ///
    /// Application-limited samples only count when they beat the current
    /// estimate; a sender with nothing to send says nothing about the path.
    ///
    /// Returns whether the sample entered the filter.
    pub(crate) fn update(
        &mut self,
        rate: f64,
        now: u64,
        rtprop: Option<f64>,
        app_limited: bool,
    ) -> Result<bool, SampleError> {
        self.expire(now, rtprop);
        if app_limited && self.btlbw.is_some_and(|current| rate <= current) {
            return Ok(false);
        }

        self.filter.insert(Sample::new(rate, now), now)?;
        self.btlbw = self.filter.extremum().map(|max| max.value);
        Ok(true)
    }

    /// Age out samples as of `now` without adding one. BtlBw goes back to
    /// `None` once the window is empty.
    pub(crate) fn expire(&mut self, now: u64, rtprop: Option<f64>) {
        self.filter.set_window(self.window_for(rtprop));
        self.filter.expire(now);
        self.btlbw = self.filter.extremum().map(|max| max.value);
    }

    /// Current BtlBw in bytes/ms, `None` before the first sample.
    pub(crate) fn btlbw(&self) -> Option<f64> {
        self.btlbw
    }

    pub(crate) fn window_ms(&self) -> u64 {
        self.filter.window_ms()
    }
}

impl std::fmt::Debug for BandwidthEstimator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BandwidthEstimator")
            .field("btlbw", &self.btlbw)
            .field("window_ms", &self.window_ms())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn estimator() -> BandwidthEstimator {
        BandwidthEstimator::new(&BbrConfig::default())
    }

    #[test]
    fn test_no_estimate_before_samples() {
        assert!(estimator().btlbw().is_none());
    }

    #[test]
    fn test_window_tracks_rtprop() {
        let bw = estimator();
        assert_eq!(bw.window_for(Some(50.0)), 400);
        assert_eq!(bw.window_for(Some(0.4)), 4);
        assert_eq!(bw.window_for(None), 1000);
        assert_eq!(bw.window_for(Some(0.0)), 1000);
        assert_eq!(bw.window_for(Some(f64::NAN)), 1000);
    }

    #[test]
    fn test_reports_window_maximum() {
        let mut bw = estimator();
        bw.update(10.0, 100, Some(50.0), false).unwrap();
        bw.update(20.0, 150, Some(50.0), false).unwrap();
        bw.update(15.0, 200, Some(50.0), false).unwrap();
        assert_eq!(bw.btlbw(), Some(20.0));
    }

    #[test]
    fn test_old_peak_expires_after_eight_rtprops() {
        let mut bw = estimator();
        bw.update(40.0, 0, Some(10.0), false).unwrap();
        bw.update(25.0, 80, Some(10.0), false).unwrap();
        assert_eq!(bw.btlbw(), Some(40.0));

        bw.update(20.0, 81, Some(10.0), false).unwrap();
        assert_eq!(bw.btlbw(), Some(25.0));
        assert_eq!(bw.window_ms(), 80);
    }

    #[test]
    fn test_app_limited_samples_cannot_lower_estimate() {
        let mut bw = estimator();
        bw.update(30.0, 0, Some(50.0), false).unwrap();

        assert!(!bw.update(5.0, 10, Some(50.0), true).unwrap());
        assert!(bw.update(45.0, 20, Some(50.0), true).unwrap());
        assert_eq!(bw.btlbw(), Some(45.0));
    }

    #[test]
    fn test_rejected_sample_still_ages_out_old_peak() {
        let mut bw = estimator();
        bw.update(100.0, 0, Some(50.0), false).unwrap();

        // app-limited and below the estimate, but the 100 is 5 s old
        assert!(bw.update(5.0, 5_000, Some(50.0), true).unwrap());
        assert_eq!(bw.btlbw(), Some(5.0));
    }

    #[test]
    fn test_expire_without_sample() {
        let mut bw = estimator();
        bw.update(100.0, 0, Some(50.0), false).unwrap();
        bw.expire(400, Some(50.0));
        assert_eq!(bw.btlbw(), Some(100.0));

        bw.expire(401, Some(50.0));
        assert_eq!(bw.btlbw(), None);
    }

    #[test]
    fn test_first_app_limited_sample_is_accepted() {
        let mut bw = estimator();
        assert!(bw.update(5.0, 10, None, true).unwrap());
        assert_eq!(bw.btlbw(), Some(5.0));
    }
}
