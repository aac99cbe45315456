//! Refresh loop for one bus.
//!
//! Each [`poll`](RefreshRunner::poll) runs at most one scheduler tick,
//! spaced by the configured inter-packet interval, and hands the selected
//! packets to the transmission layer.
//!
//! # Usage
//!
//! ```rust
//! use std::sync::Arc;
//! use rs_ddl::config::BusConfig;
//! use rs_ddl::hal::{MockClock, MockSink};
//! use rs_ddl::packet::DccPacket;
//! use rs_ddl::services::{RefreshRunner, SharedBus};
//!
//! let clock = MockClock::new();
//! let bus = Arc::new(SharedBus::new(0, BusConfig::default()).with_clock(clock.clone()));
//! bus.update_dcc(3, DccPacket::with_checksum(&[3, 0x76]).unwrap()).unwrap();
//!
//! let mut runner = RefreshRunner::new(Arc::clone(&bus), MockSink::new());
//! assert!(runner.poll().unwrap());
//! assert_eq!(runner.sink().sent.len(), 1);
//! ```

use std::sync::Arc;

use crate::refresh::{RefreshBatch, RefreshInfo, RefreshScheduler};
use crate::traits::PacketSink;

use super::shared::SharedBus;

/// Periodically re-sends the pooled packets of one bus.
pub struct RefreshRunner<T: PacketSink> {
    bus: Arc<SharedBus>,
    sink: T,
    scheduler: RefreshScheduler,
    last_tick_ms: Option<u64>,
}

impl<T: PacketSink> RefreshRunner<T> {
    /// Create a runner sending through `sink`.
    pub fn new(bus: Arc<SharedBus>, sink: T) -> Self {
        Self {
            bus,
            sink,
            scheduler: RefreshScheduler::new(),
            last_tick_ms: None,
        }
    }

    /// Run one tick if the refresh spacing has elapsed and track power is on.
    ///
    /// Call this frequently in your main loop.
    /// Returns `true` if packets were sent.
    pub fn poll(&mut self) -> Result<bool, T::Error> {
        if self.bus.power_is_off() {
            return Ok(false);
        }
        let now_ms = self.bus.now_ms();
        let spacing = self.bus.config().refresh_spacing_ms;
        if let Some(last) = self.last_tick_ms {
            if now_ms < last.saturating_add(spacing) {
                return Ok(false);
            }
        }
        Ok(self.tick(now_ms)?.is_some())
    }

    /// Run one tick now, regardless of spacing.
    pub fn tick(&mut self, now_ms: u64) -> Result<Option<RefreshBatch>, T::Error> {
        self.last_tick_ms = Some(now_ms);
        let Some(batch) = self
            .scheduler
            .tick(self.bus.pools(), self.bus.config(), now_ms)
        else {
            return Ok(None);
        };
        for packet in &batch.packets {
            self.sink
                .send_packet(self.bus.id(), &packet.bytes, packet.kind, packet.retransmits)?;
        }
        Ok(Some(batch))
    }

    /// Scheduler cursor state.
    pub fn info(&self) -> &RefreshInfo {
        self.scheduler.info()
    }

    /// Get a reference to the sink.
    pub fn sink(&self) -> &T {
        &self.sink
    }

    /// Get a mutable reference to the sink.
    pub fn sink_mut(&mut self) -> &mut T {
        &mut self.sink
    }
}
