//! Phase state machine.
//!
//! The machine only decides *which* phase the controller is in and therefore
//! which gains apply. It never touches RTprop or BtlBw; those come from the
//! estimators and are handed in through [`PhaseInput`].

use std::fmt;

use super::config::BbrConfig;

/// Primary controller phases.
///
/// ```text
/// ┌────────────────┐
/// │    Startup     │  gains ≈ 2.77, grow until BtlBw plateaus
/// └───────┬────────┘
///         │ (BtlBw grew < 25% for 3 rounds)
///         ▼
/// ┌────────────────┐
/// │     Drain      │  gains ≈ 0.36, empty the Startup queue
/// └───────┬────────┘
///         │ (inflight <= BDP)
///         ▼
/// ┌────────────────┐
/// │    ProbeBW     │  Down → Cruise → Refill → Up
/// └───────┬────────┘
///         │ (ProbeRTT deadline passed OR RTprop stale)
///         ▼
/// ┌────────────────┐
/// │   ProbeRTT     │  window capped near half a BDP
/// └───────┬────────┘
///         │ (drained to cap AND duration elapsed)
///         └──────────────────────────► ProbeBW
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BbrState {
    Startup,
    Drain,
    ProbeBW,
    ProbeRTT,
}

impl fmt::Display for BbrState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Startup => "Startup",
            Self::Drain => "Drain",
            Self::ProbeBW => "ProbeBW",
            Self::ProbeRTT => "ProbeRTT",
        };
        f.write_str(name)
    }
}

/// ProbeBW sub-phases.
///
/// - **Down**: pace below BtlBw to drain what Up queued
/// - **Cruise**: pace at BtlBw for several rounds
/// - **Refill**: one round at BtlBw to refill the pipe
/// - **Up**: one round above BtlBw to look for more capacity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProbeBwPhase {
    Down,
    Cruise,
    Refill,
    Up,
}

impl ProbeBwPhase {
    pub(crate) fn next(self) -> Self {
        match self {
            Self::Down => Self::Cruise,
            Self::Cruise => Self::Refill,
            Self::Refill => Self::Up,
            Self::Up => Self::Down,
        }
    }

    pub(crate) fn pacing_gain(self, config: &BbrConfig) -> f64 {
        match self {
            Self::Down => config.probe_bw_down_pacing_gain,
            Self::Cruise | Self::Refill => config.probe_bw_cruise_pacing_gain,
            Self::Up => config.probe_bw_up_pacing_gain,
        }
    }

    /// Up lets the window grow with the pacing rate so the probe can
    /// actually put more data in flight.
    pub(crate) fn cwnd_gain(self, config: &BbrConfig) -> f64 {
        match self {
            Self::Up => config.probe_bw_up_pacing_gain.max(config.probe_bw_cwnd_gain),
            _ => config.probe_bw_cwnd_gain,
        }
    }

    /// Rounds spent in this sub-phase before moving to the next.
    pub(crate) fn rounds(self, config: &BbrConfig) -> u64 {
        match self {
            Self::Cruise => u64::from(config.probe_bw_cruise_rounds.max(1)),
            _ => 1,
        }
    }
}

impl fmt::Display for ProbeBwPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Everything a transition decision depends on, sampled after the estimators
/// have taken the current ack.
#[derive(Debug, Clone, Copy)]
pub(crate) struct PhaseInput {
    pub now: u64,
    pub round_start: bool,
    pub round_count: u64,
    pub btlbw: Option<f64>,
    /// The delivery-rate sample of this ack was taken while app-limited.
    pub sample_app_limited: bool,
    pub inflight: usize,
    pub bdp_packets: Option<f64>,
    pub probe_rtt_due: bool,
    pub probe_rtt_cap: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct PhaseChange {
    pub from: BbrState,
    pub to: BbrState,
}

#[derive(Debug)]
pub(crate) struct PhaseMachine {
    state: BbrState,
    probe_bw_phase: ProbeBwPhase,
    phase_start_round: u64,
    /// BtlBw plateau Startup is measuring growth against.
    full_bw: f64,
    full_bw_count: u32,
    filled_pipe: bool,
    probe_rtt_entered_at: Option<u64>,
    probe_rtt_drained: bool,
}

impl PhaseMachine {
    pub(crate) fn new() -> Self {
        Self {
            state: BbrState::Startup,
            probe_bw_phase: ProbeBwPhase::Cruise,
            phase_start_round: 0,
            full_bw: 0.0,
            full_bw_count: 0,
            filled_pipe: false,
            probe_rtt_entered_at: None,
            probe_rtt_drained: false,
        }
    }

    pub(crate) fn state(&self) -> BbrState {
        self.state
    }

    pub(crate) fn probe_bw_phase(&self) -> ProbeBwPhase {
        self.probe_bw_phase
    }

    pub(crate) fn filled_pipe(&self) -> bool {
        self.filled_pipe
    }

    pub(crate) fn pacing_gain(&self, config: &BbrConfig) -> f64 {
        match self.state {
            BbrState::Startup => config.startup_pacing_gain,
            BbrState::Drain => config.drain_pacing_gain,
            BbrState::ProbeBW => self.probe_bw_phase.pacing_gain(config),
            BbrState::ProbeRTT => 1.0,
        }
    }

    pub(crate) fn cwnd_gain(&self, config: &BbrConfig) -> f64 {
        match self.state {
            BbrState::Startup => config.startup_cwnd_gain,
            BbrState::Drain => config.drain_cwnd_gain,
            BbrState::ProbeBW => self.probe_bw_phase.cwnd_gain(config),
            BbrState::ProbeRTT => config.probe_rtt_cwnd_gain,
        }
    }

    /// Evaluate transitions for one ack.
    ///
    /// Startup may fall straight through Drain into ProbeBW within a single
    /// call, so more than one change can be reported. A machine that is in
    /// ProbeBW when the call starts takes at most one step.
    pub(crate) fn update(&mut self, input: &PhaseInput, config: &BbrConfig) -> Vec<PhaseChange> {
        let mut changes = Vec::new();

        if self.state == BbrState::Startup {
            self.check_full_pipe(input, config);
            if self.filled_pipe {
                changes.push(self.transition(BbrState::Drain));
            }
        }

        if self.state == BbrState::Drain
            && input
                .bdp_packets
                .is_some_and(|bdp| input.inflight as f64 <= bdp)
        {
            changes.push(self.enter_probe_bw(input.round_count));
        }

        if !changes.is_empty() {
            return changes;
        }

        match self.state {
            BbrState::ProbeBW if config.enable_probe_rtt && input.probe_rtt_due => {
                self.probe_rtt_entered_at = Some(input.now);
                self.probe_rtt_drained = false;
                changes.push(self.transition(BbrState::ProbeRTT));
            }
            BbrState::ProbeBW => self.advance_probe_bw(input, config),
            BbrState::ProbeRTT => {
                if input.inflight <= input.probe_rtt_cap {
                    self.probe_rtt_drained = true;
                }
                let elapsed = self
                    .probe_rtt_entered_at
                    .map_or(0, |entered| input.now.saturating_sub(entered));
                if self.probe_rtt_drained
                    && elapsed >= config.probe_rtt_duration.as_millis() as u64
                {
                    self.probe_rtt_entered_at = None;
                    changes.push(self.enter_probe_bw(input.round_count));
                }
            }
            BbrState::Startup | BbrState::Drain => {}
        }

        changes
    }

    /// The pipe is full once BtlBw has failed to grow by the threshold for
    /// enough consecutive rounds. Only round boundaries with a non app-limited
    /// sample count.
    fn check_full_pipe(&mut self, input: &PhaseInput, config: &BbrConfig) {
        if self.filled_pipe || !input.round_start || input.sample_app_limited {
            return;
        }
        let Some(btlbw) = input.btlbw else {
            return;
        };

        if btlbw >= self.full_bw * config.startup_full_bw_threshold {
            self.full_bw = btlbw;
            self.full_bw_count = 0;
            return;
        }

        self.full_bw_count += 1;
        tracing::trace!(
            btlbw,
            plateau = self.full_bw,
            rounds = self.full_bw_count,
            "Startup bandwidth did not grow"
        );
        if self.full_bw_count >= config.startup_full_bw_rounds {
            self.filled_pipe = true;
        }
    }

    fn advance_probe_bw(&mut self, input: &PhaseInput, config: &BbrConfig) {
        if !input.round_start {
            return;
        }
        let rounds_in_phase = input.round_count.saturating_sub(self.phase_start_round);
        if rounds_in_phase >= self.probe_bw_phase.rounds(config) {
            let next = self.probe_bw_phase.next();
            tracing::trace!(from = ?self.probe_bw_phase, to = ?next, "ProbeBW phase advanced");
            self.probe_bw_phase = next;
            self.phase_start_round = input.round_count;
        }
    }

    fn enter_probe_bw(&mut self, round_count: u64) -> PhaseChange {
        self.probe_bw_phase = ProbeBwPhase::Cruise;
        self.phase_start_round = round_count;
        self.transition(BbrState::ProbeBW)
    }

    fn transition(&mut self, to: BbrState) -> PhaseChange {
        let from = self.state;
        self.state = to;
        PhaseChange { from, to }
    }
}
