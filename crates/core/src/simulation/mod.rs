//! Deterministic simulation support.
//!
//! - [`TimeSource`]: clock abstraction the controller reads, with [`RealTime`]
//!   for production and [`VirtualTime`] that only moves when stepped
//! - [`SimulationRng`]: seeded randomness for every simulated decision
//! - [`SimulatedPath`]: a single-bottleneck path that drives a controller
//!
//! A run is reproducible from its seed: same [`PathProfile`], config and seed
//! give the same [`SimulationReport`].

pub mod network;
mod rng;
mod time;

pub use network::{PathProfile, PathStats, RoundSnapshot, SimulatedPath, SimulationReport};
pub use rng::SimulationRng;
pub use time::{RealTime, TimeSource, VirtualTime};
