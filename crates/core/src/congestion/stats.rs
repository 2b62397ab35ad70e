//! Point-in-time view of the controller for logging and debugging.

use super::state::{BbrState, ProbeBwPhase};

/// Snapshot of controller state.
#[derive(Debug, Clone, PartialEq)]
pub struct BbrStats {
    pub state: BbrState,

    /// Only meaningful in ProbeBW.
    pub probe_bw_phase: ProbeBwPhase,

    /// Congestion window (packets).
    pub cwnd: usize,

    /// Outstanding datagrams.
    pub inflight: usize,

    /// RTprop (ms).
    pub rtprop: Option<f64>,

    /// BtlBw (bytes/ms).
    pub btlbw: Option<f64>,

    /// Bandwidth-delay product (bytes).
    pub bdp: Option<f64>,

    /// Pacing rate (bytes/ms), `None` while unpaced.
    pub pacing_rate: Option<f64>,

    pub pacing_gain: f64,
    pub cwnd_gain: f64,

    /// Total bytes acknowledged.
    pub delivered: u64,

    pub round_count: u64,

    pub retransmits: u64,

    /// Datagrams declared lost by the sender.
    pub losses: u64,

    /// RTT or delivery-rate samples thrown away as malformed.
    pub discarded_samples: u64,

    /// Acks for sequence numbers that were not outstanding.
    pub unknown_acks: u64,

    pub probe_rtt_entries: u64,

    pub is_app_limited: bool,

    /// Window ceiling left by a recent retransmit.
    pub loss_cap: Option<usize>,
}

impl Default for BbrStats {
    fn default() -> Self {
        Self {
            state: BbrState::Startup,
            probe_bw_phase: ProbeBwPhase::Cruise,
            cwnd: 0,
            inflight: 0,
            rtprop: None,
            btlbw: None,
            bdp: None,
            pacing_rate: None,
            pacing_gain: 1.0,
            cwnd_gain: 1.0,
            delivered: 0,
            round_count: 0,
            retransmits: 0,
            losses: 0,
            discarded_samples: 0,
            unknown_acks: 0,
            probe_rtt_entries: 0,
            is_app_limited: false,
            loss_cap: None,
        }
    }
}

impl std::fmt::Display for BbrStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.state == BbrState::ProbeBW {
            write!(f, "BBR[{}/{}]", self.state, self.probe_bw_phase)?;
        } else {
            write!(f, "BBR[{}]", self.state)?;
        }
        write!(
            f,
            " round={} cwnd={} inflight={} rtprop={} btlbw={} bdp={} pacing={}",
            self.round_count,
            self.cwnd,
            self.inflight,
            format_millis(self.rtprop),
            format_rate(self.btlbw),
            self.bdp.map_or_else(|| "-".to_string(), format_bytes),
            format_rate(self.pacing_rate),
        )?;
        if self.retransmits > 0 || self.losses > 0 {
            write!(f, " rtx={} lost={}", self.retransmits, self.losses)?;
        }
        Ok(())
    }
}

fn format_millis(ms: Option<f64>) -> String {
    match ms {
        Some(ms) => format!("{ms:.1}ms"),
        None => "-".to_string(),
    }
}

/// Bytes/ms rendered per second.
fn format_rate(bytes_per_ms: Option<f64>) -> String {
    match bytes_per_ms {
        Some(rate) => format!("{}/s", format_bytes(rate * 1000.0)),
        None => "-".to_string(),
    }
}

/// Format bytes in human-readable form.
fn format_bytes(bytes: f64) -> String {
    if bytes >= 1_000_000.0 {
        format!("{:.1}MB", bytes / 1_000_000.0)
    } else if bytes >= 1_000.0 {
        format!("{:.1}KB", bytes / 1_000.0)
    } else {
        format!("{}B", bytes.round())
    }
}
