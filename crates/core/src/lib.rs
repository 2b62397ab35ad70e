//! Path modelling and congestion control for datagram transports.
//!
//! [`congestion::BbrController`] turns per-datagram send and ack events into a
//! congestion window, a retransmission timeout and a pacing schedule. The
//! [`simulation`] module drives it against a modelled bottleneck without real
//! sockets or wall-clock time.

/// BBR-style congestion controller and its estimators.
pub mod congestion;

/// Error types for sample validation and configuration loading.
pub mod errors;

/// Virtual time, seeded randomness and a simulated bottleneck path.
pub mod simulation;

/// Subscriber setup for binaries.
pub mod tracing;
