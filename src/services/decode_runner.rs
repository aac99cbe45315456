//! Decode loop for one bus.
//!
//! Pulls pulses from a [`PulseSource`], runs them through the bus's own
//! [`PulseDecoder`] and stores decoded locomotive packets in the shared
//! pools so the refresh runner keeps them alive.
//!
//! # Usage
//!
//! ```rust
//! use std::sync::Arc;
//! use rs_ddl::config::BusConfig;
//! use rs_ddl::hal::MockPulseSource;
//! use rs_ddl::packet::MotorolaPacket;
//! use rs_ddl::services::{DecodeRunner, SharedBus};
//!
//! let bus = Arc::new(SharedBus::new(0, BusConfig::default()));
//! let mut source = MockPulseSource::new();
//! source.push_motorola(&MotorolaPacket::mm1(24, false, 5));
//! source.finish();
//!
//! let mut runner = DecodeRunner::new(Arc::clone(&bus), source);
//! let stats = runner.run(|event| println!("{}", event)).unwrap();
//!
//! assert_eq!(stats.events, 1);
//! assert!(bus.pools().motorola.contains(24));
//! ```

use std::sync::Arc;

use crate::decoder::{DecodeEvent, DecodeEvents, PulseDecoder};
use crate::traits::PulseSource;

use super::shared::SharedBus;

/// Counters of a decode run.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DecodeStats {
    /// Pulses consumed.
    pub pulses: u64,
    /// Events reported.
    pub events: u64,
    /// Packets stored in a pool.
    pub stored: u64,
    /// Packets the pools rejected.
    pub rejected: u64,
}

/// Runs the decoder of one bus against a pulse source.
pub struct DecodeRunner<S: PulseSource> {
    bus: Arc<SharedBus>,
    source: S,
    decoder: PulseDecoder,
    store_packets: bool,
    finished: bool,
    stats: DecodeStats,
}

impl<S: PulseSource> DecodeRunner<S> {
    /// Create a runner; the decoder uses the bus's accessory offset.
    pub fn new(bus: Arc<SharedBus>, source: S) -> Self {
        let decoder = PulseDecoder::new().with_accessory_offset(bus.config().nmra_ga_offset);
        Self {
            bus,
            source,
            decoder,
            store_packets: true,
            finished: false,
            stats: DecodeStats::default(),
        }
    }

    /// Enable or disable storing decoded packets in the pools.
    ///
    /// Analysis runs turn this off and only look at the events.
    pub fn with_store_packets(mut self, store: bool) -> Self {
        self.store_packets = store;
        self
    }

    /// Process the next pulse.
    ///
    /// Returns `Ok(None)` once the source has ended and the last segment has
    /// been reported.
    pub fn poll(&mut self) -> Result<Option<DecodeEvents>, S::Error> {
        if self.finished {
            return Ok(None);
        }
        let events = match self.source.next_pulse()? {
            Some(pulse) => {
                self.stats.pulses += 1;
                self.decoder.feed(pulse)
            }
            None => {
                self.finished = true;
                self.decoder.finish()
            }
        };
        for event in &events {
            self.handle(event);
        }
        Ok(Some(events))
    }

    /// Run until the source ends, passing every event to `on_event`.
    pub fn run(&mut self, mut on_event: impl FnMut(&DecodeEvent)) -> Result<DecodeStats, S::Error> {
        while let Some(events) = self.poll()? {
            events.iter().for_each(&mut on_event);
        }
        Ok(self.stats)
    }

    fn handle(&mut self, event: &DecodeEvent) {
        self.stats.events += 1;
        if !self.store_packets {
            return;
        }
        match self.bus.store_event(event) {
            Ok(true) => self.stats.stored += 1,
            Ok(false) => {}
            Err(err) => {
                self.stats.rejected += 1;
                log::debug!("bus {}: decoded packet not stored: {}", self.bus.id(), err);
            }
        }
    }

    /// Counters so far.
    pub fn stats(&self) -> DecodeStats {
        self.stats
    }

    /// Get a reference to the pulse source.
    pub fn source(&self) -> &S {
        &self.source
    }

    /// Get a mutable reference to the pulse source.
    pub fn source_mut(&mut self) -> &mut S {
        &mut self.source
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BusConfig;
    use crate::hal::MockPulseSource;
    use crate::packet::{DccPacket, MotorolaPacket};
    use crate::pool::FrameSelector;

    fn bus() -> Arc<SharedBus> {
        Arc::new(SharedBus::new(0, BusConfig::default()))
    }

    #[test]
    fn repeated_motorola_frame_stored_once() {
        let bus = bus();
        let mut source = MockPulseSource::new();
        let packet = MotorolaPacket::mm1(24, false, 5);
        source.push_motorola(&packet).push_motorola(&packet).finish();

        let mut runner = DecodeRunner::new(Arc::clone(&bus), source);
        let stats = runner.run(|_| {}).unwrap();
        assert_eq!(stats.events, 2);
        assert_eq!(stats.stored, 1);
        assert_eq!(
            bus.pools().motorola.get(24, FrameSelector::Command).unwrap(),
            packet
        );
    }

    #[test]
    fn dcc_loco_and_function_packets() {
        let bus = bus();
        let mut source = MockPulseSource::new();
        let speed = DccPacket::with_checksum(&[3, 0x76]).unwrap();
        let fg1 = DccPacket::with_checksum(&[3, 0x90]).unwrap();
        source.push_dcc(speed.bytes(), 14).push_dcc(fg1.bytes(), 14);

        let mut runner = DecodeRunner::new(Arc::clone(&bus), source);
        let stats = runner.run(|_| {}).unwrap();
        assert_eq!(stats.stored, 2);
        let entry = bus.pools().dcc.entry(3).unwrap();
        assert_eq!(entry.packet, speed);
        assert_eq!(entry.functions[0], Some(fg1));
    }

    #[test]
    fn function_before_loco_is_rejected_not_fatal() {
        let bus = bus();
        let mut source = MockPulseSource::new();
        let fg1 = DccPacket::with_checksum(&[5, 0x90]).unwrap();
        let speed = DccPacket::with_checksum(&[5, 0x76]).unwrap();
        source.push_dcc(fg1.bytes(), 14).push_dcc(speed.bytes(), 14);

        let mut runner = DecodeRunner::new(Arc::clone(&bus), source);
        let stats = runner.run(|_| {}).unwrap();
        assert_eq!(stats.rejected, 1);
        assert_eq!(stats.stored, 1);
    }

    #[test]
    fn analysis_mode_leaves_pools_empty() {
        let bus = bus();
        let mut source = MockPulseSource::new();
        source.push_motorola(&MotorolaPacket::mm1(24, false, 5)).finish();

        let mut runner = DecodeRunner::new(Arc::clone(&bus), source).with_store_packets(false);
        let mut seen = Vec::new();
        runner.run(|e| seen.push(e.clone())).unwrap();
        assert_eq!(seen.len(), 1);
        assert!(bus.pools().motorola.is_empty());
    }

    #[test]
    fn poll_ends_after_source() {
        let mut runner = DecodeRunner::new(bus(), MockPulseSource::new());
        assert!(runner.poll().unwrap().unwrap().is_empty());
        assert!(runner.poll().unwrap().is_none());
        assert_eq!(runner.stats().pulses, 0);
    }
}
