//! Controller configuration and tuning constants.
//!
//! None of the gains below are protocol requirements. They follow the usual
//! BBR shape (aggressive Startup, Drain below 1, a ProbeBW gain cycle around 1,
//! a small ProbeRTT window) and every one of them can be overridden through
//! [`BbrConfig`], either in code or from a TOML file.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_with::{serde_as, DurationMilliSeconds};

use crate::errors::ConfigError;

/// Bytes carried by one full datagram; converts a byte BDP into packets.
pub(crate) const DEFAULT_MSS: usize = 1424;

// =============================================================================
// Gains
// =============================================================================

/// Startup gain: 2/ln(2) ≈ 2.885, rounded down as most deployments do.
pub(crate) const STARTUP_GAIN: f64 = 2.77;

/// Drain gain: the inverse of the Startup gain, so the queue built during
/// Startup empties in about one round trip.
pub(crate) const DRAIN_GAIN: f64 = 0.36;

/// Window gain for every ProbeBW sub-phase except Up.
pub(crate) const PROBE_BW_CWND_GAIN: f64 = 1.0;

/// ProbeBW Down: pace slightly below BtlBw to drain whatever Up queued.
pub(crate) const PROBE_BW_DOWN_PACING_GAIN: f64 = 0.9;

/// ProbeBW Cruise and Refill.
pub(crate) const PROBE_BW_CRUISE_PACING_GAIN: f64 = 1.0;

/// ProbeBW Up: the brief up-probe for more capacity.
pub(crate) const PROBE_BW_UP_PACING_GAIN: f64 = 1.25;

/// ProbeRTT window as a fraction of BDP.
pub(crate) const PROBE_RTT_CWND_GAIN: f64 = 0.5;

// =============================================================================
// Windows and timing
// =============================================================================

/// How long an RTT sample stays eligible to be RTprop.
pub(crate) const RT_SAMPLE_WINDOW: Duration = Duration::from_secs(10);

/// Bandwidth samples live for this many RTprops.
pub(crate) const BW_WINDOW_RTTS: f64 = 8.0;

/// Bandwidth window used while RTprop is unknown (or zero).
pub(crate) const DEFAULT_BW_WINDOW: Duration = Duration::from_millis(1000);

pub(crate) const PROBE_RTT_INTERVAL: Duration = Duration::from_secs(5);

/// Long enough to drain the bottleneck queue and see an unqueued RTT.
pub(crate) const PROBE_RTT_DURATION: Duration = Duration::from_millis(200);

/// RTprop that has not been refreshed for this long forces a ProbeRTT.
pub(crate) const RTPROP_STALE_AFTER: Duration = Duration::from_secs(10);

/// Floor of the ProbeRTT ceiling, in packets. A smaller window is left alone.
pub(crate) const PROBE_RTT_MIN_CWND: usize = 4;

// =============================================================================
// Startup exit
// =============================================================================

/// BtlBw must grow by 25% per round to count as still growing.
pub(crate) const STARTUP_FULL_BW_THRESHOLD: f64 = 1.25;

/// Rounds without growth before the pipe is considered full.
pub(crate) const STARTUP_FULL_BW_ROUNDS: u32 = 3;

/// Rounds spent cruising before the next up-probe.
pub(crate) const PROBE_BW_CRUISE_ROUNDS: u32 = 6;

// =============================================================================
// Loss response and timeouts
// =============================================================================

/// Multiplicative window cut applied when a datagram has to be retransmitted.
pub(crate) const RETRANSMIT_CUTBACK: f64 = 0.6;

pub(crate) const TIMEOUT_RTPROP_MULTIPLIER: f64 = 1.2;
pub(crate) const MIN_TIMEOUT: Duration = Duration::from_millis(50);
pub(crate) const MAX_TIMEOUT: Duration = Duration::from_millis(1000);

/// Reported while no RTT sample exists yet.
pub(crate) const DEFAULT_TIMEOUT: Duration = Duration::from_millis(1000);

/// Configuration for the BBR-style controller.
///
/// Window sizes are in packets; byte quantities are converted with [`mss`](Self::mss).
#[serde_as]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BbrConfig {
    /// Bytes per packet used to turn the byte BDP into a packet window.
    pub mss: usize,

    /// Window before any estimate exists, and the Startup floor.
    pub initial_cwnd: usize,
    /// Must be at least 1.
    pub min_cwnd: usize,
    pub max_cwnd: usize,

    /// Trailing window of the RTprop min-filter.
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub rt_sample_window: Duration,
    /// The BtlBw max-filter keeps `bw_window_rtts * RTprop` worth of samples.
    pub bw_window_rtts: f64,
    /// BtlBw window while RTprop is unknown.
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub default_bw_window: Duration,

    pub startup_pacing_gain: f64,
    pub startup_cwnd_gain: f64,
    pub drain_pacing_gain: f64,
    pub drain_cwnd_gain: f64,
    pub probe_bw_cwnd_gain: f64,
    pub probe_bw_down_pacing_gain: f64,
    pub probe_bw_cruise_pacing_gain: f64,
    pub probe_bw_up_pacing_gain: f64,
    pub probe_bw_cruise_rounds: u32,

    /// Growth factor BtlBw must reach in a round to keep Startup going.
    pub startup_full_bw_threshold: f64,
    pub startup_full_bw_rounds: u32,

    /// Disabling this lets RTprop go stale on paths whose queue never drains.
    pub enable_probe_rtt: bool,
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub probe_rtt_interval: Duration,
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub probe_rtt_duration: Duration,
    /// ProbeRTT interval randomization (±), keeps competing flows from
    /// probing in lockstep.
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub probe_rtt_jitter: Duration,
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub rtprop_stale_after: Duration,
    pub probe_rtt_cwnd_gain: f64,
    pub probe_rtt_min_cwnd: usize,

    /// Window multiplier applied on retransmission, in (0, 1).
    pub retransmit_cutback: f64,

    pub timeout_rtprop_multiplier: f64,
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub min_timeout: Duration,
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub max_timeout: Duration,
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub default_timeout: Duration,

    /// Seed for the ProbeRTT jitter; `None` seeds from the OS.
    pub rng_seed: Option<u64>,
}

impl Default for BbrConfig {
    fn default() -> Self {
        Self {
            mss: DEFAULT_MSS,
            // IW10 (RFC 6928)
            initial_cwnd: 10,
            min_cwnd: 1,
            max_cwnd: 100_000,
            rt_sample_window: RT_SAMPLE_WINDOW,
            bw_window_rtts: BW_WINDOW_RTTS,
            default_bw_window: DEFAULT_BW_WINDOW,
            startup_pacing_gain: STARTUP_GAIN,
            startup_cwnd_gain: STARTUP_GAIN,
            drain_pacing_gain: DRAIN_GAIN,
            drain_cwnd_gain: DRAIN_GAIN,
            probe_bw_cwnd_gain: PROBE_BW_CWND_GAIN,
            probe_bw_down_pacing_gain: PROBE_BW_DOWN_PACING_GAIN,
            probe_bw_cruise_pacing_gain: PROBE_BW_CRUISE_PACING_GAIN,
            probe_bw_up_pacing_gain: PROBE_BW_UP_PACING_GAIN,
            probe_bw_cruise_rounds: PROBE_BW_CRUISE_ROUNDS,
            startup_full_bw_threshold: STARTUP_FULL_BW_THRESHOLD,
            startup_full_bw_rounds: STARTUP_FULL_BW_ROUNDS,
            enable_probe_rtt: true,
            probe_rtt_interval: PROBE_RTT_INTERVAL,
            probe_rtt_duration: PROBE_RTT_DURATION,
            probe_rtt_jitter: Duration::ZERO,
            rtprop_stale_after: RTPROP_STALE_AFTER,
            probe_rtt_cwnd_gain: PROBE_RTT_CWND_GAIN,
            probe_rtt_min_cwnd: PROBE_RTT_MIN_CWND,
            retransmit_cutback: RETRANSMIT_CUTBACK,
            timeout_rtprop_multiplier: TIMEOUT_RTPROP_MULTIPLIER,
            min_timeout: MIN_TIMEOUT,
            max_timeout: MAX_TIMEOUT,
            default_timeout: DEFAULT_TIMEOUT,
            rng_seed: None,
        }
    }
}

impl BbrConfig {
    /// Parse a TOML document. Missing keys take their default value.
    pub fn from_toml_str(source: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(source)?;
        config.validate()?;
        Ok(config)
    }

    /// Read and parse a TOML config file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let source = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&source)
    }

    /// Reject configurations that would break the controller's invariants.
    pub fn validate(&self) -> Result<(), ConfigError> {
        fn invalid(field: &'static str, reason: impl Into<String>) -> ConfigError {
            ConfigError::Invalid {
                field,
                reason: reason.into(),
            }
        }

        if self.mss == 0 {
            return Err(invalid("mss", "must be positive"));
        }
        if self.min_cwnd == 0 {
            return Err(invalid("min_cwnd", "must be at least 1"));
        }
        if self.max_cwnd < self.min_cwnd {
            return Err(invalid("max_cwnd", "must not be below min_cwnd"));
        }
        if !(self.min_cwnd..=self.max_cwnd).contains(&self.initial_cwnd) {
            return Err(invalid(
                "initial_cwnd",
                format!("must lie within [{}, {}]", self.min_cwnd, self.max_cwnd),
            ));
        }
        if self.rt_sample_window.is_zero() {
            return Err(invalid("rt_sample_window", "must be positive"));
        }
        if self.default_bw_window.is_zero() {
            return Err(invalid("default_bw_window", "must be positive"));
        }

        let gains = [
            ("bw_window_rtts", self.bw_window_rtts),
            ("startup_pacing_gain", self.startup_pacing_gain),
            ("startup_cwnd_gain", self.startup_cwnd_gain),
            ("drain_pacing_gain", self.drain_pacing_gain),
            ("drain_cwnd_gain", self.drain_cwnd_gain),
            ("probe_bw_cwnd_gain", self.probe_bw_cwnd_gain),
            ("probe_bw_down_pacing_gain", self.probe_bw_down_pacing_gain),
            ("probe_bw_cruise_pacing_gain", self.probe_bw_cruise_pacing_gain),
            ("probe_bw_up_pacing_gain", self.probe_bw_up_pacing_gain),
            ("startup_full_bw_threshold", self.startup_full_bw_threshold),
            ("probe_rtt_cwnd_gain", self.probe_rtt_cwnd_gain),
            ("timeout_rtprop_multiplier", self.timeout_rtprop_multiplier),
        ];
        for (field, gain) in gains {
            if !gain.is_finite() || gain <= 0.0 {
                return Err(invalid(field, format!("must be a positive number, got {gain}")));
            }
        }

        if !(self.retransmit_cutback > 0.0 && self.retransmit_cutback < 1.0) {
            return Err(invalid(
                "retransmit_cutback",
                format!("must lie in (0, 1), got {}", self.retransmit_cutback),
            ));
        }
        if self.startup_full_bw_rounds == 0 {
            return Err(invalid("startup_full_bw_rounds", "must be at least 1"));
        }
        if self.min_timeout > self.max_timeout {
            return Err(invalid("min_timeout", "must not exceed max_timeout"));
        }
        if self.probe_rtt_jitter >= self.probe_rtt_interval {
            return Err(invalid(
                "probe_rtt_jitter",
                "must be shorter than probe_rtt_interval",
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = BbrConfig::default();
        config.validate().unwrap();
        assert_eq!(config.initial_cwnd, 10);
        assert_eq!(config.min_cwnd, 1);
        assert!(config.enable_probe_rtt);
    }

    #[test]
    fn test_startup_and_drain_gains_are_inverse() {
        assert!((STARTUP_GAIN * DRAIN_GAIN - 1.0).abs() < 0.01);
        // 2/ln(2) ≈ 2.885
        assert!(STARTUP_GAIN < 2.0 / std::f64::consts::LN_2);
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config = BbrConfig::from_toml_str(
            r#"
            mss = 1000
            initial_cwnd = 4
            rt_sample_window = 2500
            rng_seed = 7
            "#,
        )
        .unwrap();

        assert_eq!(config.mss, 1000);
        assert_eq!(config.initial_cwnd, 4);
        assert_eq!(config.rt_sample_window, Duration::from_millis(2500));
        assert_eq!(config.rng_seed, Some(7));
        assert_eq!(config.probe_rtt_interval, PROBE_RTT_INTERVAL);
    }

    #[test]
    fn test_toml_round_trip() {
        let config = BbrConfig {
            rng_seed: Some(42),
            ..Default::default()
        };
        let text = toml::to_string(&config).unwrap();
        assert_eq!(BbrConfig::from_toml_str(&text).unwrap(), config);
    }

    #[test]
    fn test_unknown_field_is_rejected() {
        let err = BbrConfig::from_toml_str("cwnd_gain_typo = 2.0").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn test_invalid_values_are_rejected() {
        let cases = [
            BbrConfig {
                min_cwnd: 0,
                initial_cwnd: 0,
                ..Default::default()
            },
            BbrConfig {
                retransmit_cutback: 1.0,
                ..Default::default()
            },
            BbrConfig {
                startup_cwnd_gain: f64::NAN,
                ..Default::default()
            },
            BbrConfig {
                initial_cwnd: 200_000,
                ..Default::default()
            },
            BbrConfig {
                min_timeout: Duration::from_secs(5),
                ..Default::default()
            },
        ];
        for config in cases {
            assert!(
                matches!(config.validate(), Err(ConfigError::Invalid { .. })),
                "{config:?} should be rejected"
            );
        }
    }

    #[test]
    fn test_load_missing_file() {
        let err = BbrConfig::load("/nonexistent/pathmodel.toml").unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }
}
