//! Thread-safe handle for hosts that deliver events from several threads.
//!
//! All controller state is read-modify-written together on every event, so a
//! single mutex around the whole controller is the right granularity. Each
//! method holds the lock for exactly one event or query.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::simulation::{RealTime, TimeSource};

use super::config::BbrConfig;
use super::controller::{AckEvent, BbrController};
use super::delivery_rate::{DeliveryLedger, DeliverySnapshot, SentPacketLedger};
use super::state::BbrState;
use super::stats::BbrStats;

/// Cloneable handle to one [`BbrController`].
pub struct SharedController<T: TimeSource = RealTime, L: DeliveryLedger = SentPacketLedger> {
    inner: Arc<Mutex<BbrController<T, L>>>,
}

impl<T: TimeSource, L: DeliveryLedger> Clone for SharedController<T, L> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl SharedController<RealTime> {
    pub fn new(config: BbrConfig) -> Self {
        Self::from_controller(BbrController::new(config))
    }
}

impl<T: TimeSource, L: DeliveryLedger> SharedController<T, L> {
    pub fn from_controller(controller: BbrController<T, L>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(controller)),
        }
    }

    pub fn on_datagram_sent(
        &self,
        seq: u64,
        send_time: u64,
        payload_len: usize,
        is_retransmit: bool,
    ) {
        self.inner
            .lock()
            .on_datagram_sent(seq, send_time, payload_len, is_retransmit);
    }

    pub fn on_ack_received(&self, ack: AckEvent) {
        self.inner.lock().on_ack_received(ack);
    }

    pub fn on_datagram_lost(&self, seq: u64) {
        self.inner.lock().on_datagram_lost(seq);
    }

    pub fn set_app_limited(&self, app_limited: bool) {
        self.inner.lock().set_app_limited(app_limited);
    }

    pub fn window_size(&self) -> usize {
        self.inner.lock().window_size()
    }

    pub fn timeout_ms(&self) -> u64 {
        self.inner.lock().timeout_ms()
    }

    pub fn can_send_now(&self) -> bool {
        self.inner.lock().can_send_now()
    }

    pub fn now_millis(&self) -> u64 {
        self.inner.lock().now_millis()
    }

    pub fn delivery_snapshot(&self) -> DeliverySnapshot {
        self.inner.lock().delivery_snapshot()
    }

    pub fn state(&self) -> BbrState {
        self.inner.lock().state()
    }

    pub fn stats(&self) -> BbrStats {
        self.inner.lock().stats()
    }

    /// Run `f` with exclusive access, for sequences that must not interleave
    /// with other threads' events.
    pub fn with<R>(&self, f: impl FnOnce(&mut BbrController<T, L>) -> R) -> R {
        f(&mut self.inner.lock())
    }
}

impl<T: TimeSource, L: DeliveryLedger> std::fmt::Debug for SharedController<T, L> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("SharedController").field(&*self.inner.lock()).finish()
    }
}
