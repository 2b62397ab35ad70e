//! BBR-style congestion control driven by per-datagram send and ack events.
//!
//! The controller models the path with two estimates:
//!
//! - **RTprop**: round-trip propagation delay, the minimum RTT over a trailing
//!   window
//! - **BtlBw**: bottleneck bandwidth, the maximum delivery rate over a window
//!   of a few RTprops
//!
//! Their product is the bandwidth-delay product (BDP), the amount of data that
//! fills the pipe without building a queue. The congestion window is the BDP
//! scaled by a phase-dependent gain, and datagrams are paced at BtlBw scaled by
//! another.
//!
//! ## Phases
//!
//! | Phase | Purpose | Pacing gain | Window gain |
//! |-------|---------|-------------|-------------|
//! | Startup | Find BtlBw | 2.77 | 2.77 |
//! | Drain | Empty the Startup queue | 0.36 | 0.36 |
//! | ProbeBW | Steady state | 0.9 to 1.25 | 1.0 (1.25 in Up) |
//! | ProbeRTT | Re-measure RTprop | 1.0 | 0.5 |
//!
//! ## Units
//!
//! Times are milliseconds, the window and inflight are counted in datagrams,
//! BtlBw and pacing rates are bytes per millisecond. The byte BDP is turned
//! into datagrams with [`BbrConfig::mss`].

mod bandwidth;
mod config;
mod controller;
mod delivery_rate;
mod filter;
mod rtt;
mod shared;
mod state;
mod stats;


pub use config::BbrConfig;
pub use controller::{AckEvent, BbrController};
pub use delivery_rate::{DeliveryLedger, DeliverySnapshot, SentPacketLedger, SentRecord};
pub use filter::{Extremum, Max, MaxFilter, Min, MinFilter, Sample, WindowedFilter};
pub use shared::SharedController;
pub use state::{BbrState, ProbeBwPhase};
pub use stats::BbrStats;
