//! Clock abstraction.
//!
//! The controller asks a [`TimeSource`] for "now" when deciding whether the
//! pacing deadline has passed. Production code uses [`RealTime`]; tests and the
//! path simulator use [`VirtualTime`], which only moves when told to.

use std::{
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::{Duration, Instant},
};

/// A monotonic clock measured from an arbitrary epoch.
pub trait TimeSource: Send + Sync + Clone + 'static {
    /// Nanoseconds since the epoch.
    fn now_nanos(&self) -> u64;

    fn now(&self) -> Duration {
        Duration::from_nanos(self.now_nanos())
    }

    /// Whole milliseconds since the epoch, the resolution event timestamps use.
    fn now_millis(&self) -> u64 {
        self.now_nanos() / 1_000_000
    }
}

/// Wall-clock time backed by [`Instant`].
#[derive(Debug, Clone)]
pub struct RealTime {
    epoch: Instant,
}

impl Default for RealTime {
    fn default() -> Self {
        Self::new()
    }
}

impl RealTime {
    pub fn new() -> Self {
        Self {
            epoch: Instant::now(),
        }
    }
}

impl TimeSource for RealTime {
    fn now_nanos(&self) -> u64 {
        self.epoch.elapsed().as_nanos() as u64
    }
}

/// Deterministic time shared across clones.
///
/// Every clone observes the same clock, so a test can hand one clone to the
/// controller and advance another.
#[derive(Debug, Clone, Default)]
pub struct VirtualTime {
    current_nanos: Arc<AtomicU64>,
}

impl VirtualTime {
    /// Creates a new virtual time starting at 0.
    pub fn new() -> Self {
        Self::with_initial_time(0)
    }

    pub fn with_initial_time(initial_nanos: u64) -> Self {
        Self {
            current_nanos: Arc::new(AtomicU64::new(initial_nanos)),
        }
    }

    /// Moves the clock forward by `duration`.
    pub fn advance(&self, duration: Duration) {
        self.current_nanos
            .fetch_add(duration.as_nanos() as u64, Ordering::AcqRel);
    }

    pub fn advance_millis(&self, millis: u64) {
        self.advance(Duration::from_millis(millis));
    }

    /// Moves the clock to `target_nanos`. Never moves it backwards.
    pub fn advance_to(&self, target_nanos: u64) {
        self.current_nanos.fetch_max(target_nanos, Ordering::AcqRel);
    }
}

impl TimeSource for VirtualTime {
    fn now_nanos(&self) -> u64 {
        self.current_nanos.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_virtual_time_starts_at_zero() {
        let time = VirtualTime::new();
        assert_eq!(time.now_nanos(), 0);
        assert_eq!(time.now_millis(), 0);
    }

    #[test]
    fn test_virtual_time_advance() {
        let time = VirtualTime::new();
        time.advance(Duration::from_millis(100));
        assert_eq!(time.now_millis(), 100);
        time.advance_millis(50);
        assert_eq!(time.now(), Duration::from_millis(150));
    }

    #[test]
    fn test_virtual_time_clones_share_clock() {
        let time = VirtualTime::new();
        let observer = time.clone();
        time.advance_millis(7);
        assert_eq!(observer.now_millis(), 7);
    }

    #[test]
    fn test_advance_to_never_goes_backwards() {
        let time = VirtualTime::with_initial_time(5_000_000);
        time.advance_to(1_000_000);
        assert_eq!(time.now_millis(), 5);
        time.advance_to(9_000_000);
        assert_eq!(time.now_millis(), 9);
    }

    #[test]
    fn test_real_time_is_monotonic() {
        let time = RealTime::new();
        let t1 = time.now_nanos();
        let t2 = time.now_nanos();
        assert!(t2 >= t1);
    }
}
