//! Windowed extremum filters.
//!
//! Both estimators need "the best sample seen in the last W milliseconds".
//! Rather than rescanning every retained sample on each ack, the filter keeps a
//! monotonic deque of *candidates*: a sample that is strictly beaten by a newer
//! one can never become the extremum again, because the newer sample outlives
//! it, so it is dropped on insert. The front of the deque is always the current
//! extremum, which makes queries O(1) and inserts O(1) amortized.

use std::collections::VecDeque;
use std::marker::PhantomData;

use crate::errors::SampleError;

/// A timestamped observation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Sample {
    pub value: f64,
    /// Milliseconds on the caller's clock.
    pub observed_at: u64,
}

impl Sample {
    pub fn new(value: f64, observed_at: u64) -> Self {
        Self { value, observed_at }
    }
}

/// Which end of the value range a filter tracks.
pub trait Extremum {
    /// Whether `candidate` strictly beats `incumbent`.
    fn beats(candidate: f64, incumbent: f64) -> bool;
}

#[derive(Debug, Clone, Copy)]
pub enum Min {}

#[derive(Debug, Clone, Copy)]
pub enum Max {}

impl Extremum for Min {
    fn beats(candidate: f64, incumbent: f64) -> bool {
        candidate < incumbent
    }
}

impl Extremum for Max {
    fn beats(candidate: f64, incumbent: f64) -> bool {
        candidate > incumbent
    }
}

pub type MinFilter = WindowedFilter<Min>;
pub type MaxFilter = WindowedFilter<Max>;

/// Retains samples observed within a trailing time window and reports the
/// minimum or maximum among them.
///
/// Samples must arrive in non-decreasing `observed_at` order. On ties the
/// earliest sample is reported.
#[derive(Clone)]
pub struct WindowedFilter<K: Extremum> {
    /// Candidate extrema; `observed_at` increases and values never get worse
    /// from back to front.
    candidates: VecDeque<Sample>,
    window_ms: u64,
    /// Newest `observed_at` ever inserted, kept after eviction so ordering is
    /// still enforced once the deque drains.
    newest: Option<u64>,
    _kind: PhantomData<K>,
}

impl<K: Extremum> WindowedFilter<K> {
    pub fn new(window_ms: u64) -> Self {
        Self {
            candidates: VecDeque::new(),
            window_ms,
            newest: None,
            _kind: PhantomData,
        }
    }

    pub fn window_ms(&self) -> u64 {
        self.window_ms
    }

    /// Change the window length. Takes effect at the next mutation.
    pub fn set_window(&mut self, window_ms: u64) {
        self.window_ms = window_ms;
    }

    /// Add a sample and evict everything older than the window as of `now`.
    ///
    /// Non-finite values and samples older than the newest accepted one are
    /// rejected and leave the filter untouched.
    pub fn insert(&mut self, sample: Sample, now: u64) -> Result<(), SampleError> {
        if !sample.value.is_finite() {
            return Err(SampleError::NonFinite);
        }
        if let Some(newest) = self.newest {
            if sample.observed_at < newest {
                return Err(SampleError::OutOfOrder {
                    observed_at: sample.observed_at,
                    newest,
                });
            }
        }
        self.newest = Some(sample.observed_at);

        while let Some(back) = self.candidates.back() {
            if K::beats(sample.value, back.value) {
                self.candidates.pop_back();
            } else {
                break;
            }
        }
        self.candidates.push_back(sample);
        self.expire(now);
        Ok(())
    }

    /// Drop every sample with `now - observed_at > window`.
    pub fn expire(&mut self, now: u64) {
        while let Some(front) = self.candidates.front() {
            if now.saturating_sub(front.observed_at) > self.window_ms {
                self.candidates.pop_front();
            } else {
                break;
            }
        }
    }

    /// The current extremum, or `None` while the filter holds no samples.
    pub fn extremum(&self) -> Option<Sample> {
        self.candidates.front().copied()
    }

    pub fn is_empty(&self) -> bool {
        self.candidates.is_empty()
    }

    /// Number of retained candidates (not every sample ever inserted).
    pub fn len(&self) -> usize {
        self.candidates.len()
    }

    pub fn reset(&mut self) {
        self.candidates.clear();
        self.newest = None;
    }
}

impl<K: Extremum> std::fmt::Debug for WindowedFilter<K> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WindowedFilter")
            .field("window_ms", &self.window_ms)
            .field("candidates", &self.candidates.len())
            .field("extremum", &self.extremum())
            .finish()
    }
}
