//! Shared state of one DDL bus.
//!
//! `SharedBus` owns everything the decode path and the refresh path have in
//! common: configuration, the three packet pools, the feedback channel and
//! the time base. Wrap it in an `Arc` and hand clones to a
//! [`DecodeRunner`](super::DecodeRunner) and a
//! [`RefreshRunner`](super::RefreshRunner).
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//! use rs_ddl::config::BusConfig;
//! use rs_ddl::packet::DccPacket;
//! use rs_ddl::services::SharedBus;
//!
//! let bus = Arc::new(SharedBus::new(0, BusConfig::default()));
//!
//! // A command layer stores a packet; the refresh runner picks it up.
//! let packet = DccPacket::with_checksum(&[3, 0x76]).unwrap();
//! bus.update_dcc(3, packet).unwrap();
//! assert_eq!(bus.pools().dcc.known_addresses(), vec![3]);
//! ```

use std::sync::atomic::{AtomicU64, Ordering};

use crate::config::BusConfig;
use crate::decoder::motorola::{Mm2Detail, MotorolaCommand};
use crate::decoder::DecodeEvent;
use crate::decoder::dcc::DccOutcome;
use crate::error::PoolError;
use crate::feedback::FeedbackChannel;
use crate::hal::SystemClock;
use crate::packet::{DccPacket, MfxPacket, MotorolaPacket};
use crate::pool::BusPools;
use crate::traits::Clock;

/// State shared by all services of one bus.
///
/// # Thread Safety
///
/// - Each pool has its own `Mutex`; decode and refresh only contend on the
///   pool they both touch.
/// - Feedback uses the lock-free slots of [`FeedbackChannel`].
/// - All timestamps come from the same clock.
pub struct SharedBus {
    id: u8,
    config: BusConfig,
    pools: BusPools,
    feedback: FeedbackChannel,
    /// First detection of the current short circuit, [`NO_SHORT`] if none.
    short_since_ms: AtomicU64,
    clock: Box<dyn Clock + Send + Sync>,
}

const NO_SHORT: u64 = u64::MAX;

impl SharedBus {
    /// Creates bus state with empty pools and a [`SystemClock`].
    pub fn new(id: u8, config: BusConfig) -> Self {
        Self {
            id,
            pools: BusPools::new(&config),
            config,
            feedback: FeedbackChannel::new(),
            short_since_ms: AtomicU64::new(NO_SHORT),
            clock: Box::new(SystemClock::new()),
        }
    }

    /// Replaces the time source.
    pub fn with_clock(mut self, clock: impl Clock + Send + Sync + 'static) -> Self {
        self.clock = Box::new(clock);
        self
    }

    /// Bus id passed to the transmission layer.
    pub fn id(&self) -> u8 {
        self.id
    }

    /// Bus configuration.
    pub fn config(&self) -> &BusConfig {
        &self.config
    }

    /// Packet pools.
    pub fn pools(&self) -> &BusPools {
        &self.pools
    }

    /// Feedback channel.
    pub fn feedback(&self) -> &FeedbackChannel {
        &self.feedback
    }

    /// Get current timestamp in milliseconds.
    #[inline]
    pub fn now_ms(&self) -> u64 {
        self.clock.now_ms()
    }

    // ========================================================================
    // Short circuit
    // ========================================================================

    /// Reports the booster's short circuit line.
    ///
    /// Ignored while `check_short` is off. A short that stays active keeps
    /// its first detection time.
    pub fn signal_short(&self, active: bool) {
        if !active {
            if self.short_since_ms.swap(NO_SHORT, Ordering::AcqRel) != NO_SHORT {
                log::info!("bus {}: short circuit cleared", self.id);
            }
            return;
        }
        if !self.config.check_short {
            return;
        }
        let now = self.now_ms();
        if self
            .short_since_ms
            .compare_exchange(NO_SHORT, now, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            log::warn!("bus {}: short circuit detected", self.id);
        }
    }

    /// True once a short circuit has lasted `shortcut_delay_us`.
    pub fn power_is_off(&self) -> bool {
        let since = self.short_since_ms.load(Ordering::Acquire);
        if since == NO_SHORT {
            return false;
        }
        let elapsed_us = self.now_ms().saturating_sub(since).saturating_mul(1_000);
        elapsed_us >= u64::from(self.config.shortcut_delay_us)
    }

    // ========================================================================
    // Pool updates
    // ========================================================================

    /// Stores a Motorola locomotive packet.
    pub fn update_motorola(&self, address: u32, packet: MotorolaPacket) -> Result<(), PoolError> {
        self.pools.motorola.update(address, packet, self.now_ms())
    }

    /// Stores a Motorola F1-F4 function packet (`function` 1..=4).
    pub fn update_motorola_function(
        &self,
        address: u32,
        function: u8,
        packet: MotorolaPacket,
    ) -> Result<(), PoolError> {
        let slot = (function as usize).saturating_sub(1);
        self.pools
            .motorola
            .update_function(address, slot, packet, self.now_ms())
    }

    /// Stores a DCC locomotive packet under its pool index.
    pub fn update_dcc(&self, address: u32, packet: DccPacket) -> Result<(), PoolError> {
        self.pools.dcc.update(address, packet, self.now_ms())
    }

    /// Stores the DCC function packet of a known address.
    pub fn update_dcc_function(&self, address: u32, packet: DccPacket) -> Result<(), PoolError> {
        self.pools.dcc.update_function(address, 0, packet, self.now_ms())
    }

    /// Stores an MFX locomotive packet.
    pub fn update_mfx(&self, address: u32, packet: MfxPacket) -> Result<(), PoolError> {
        self.pools.mfx.update(address, packet, self.now_ms())
    }

    /// Stores the packet carried by a decode event, if it has one.
    ///
    /// Repeated Motorola frames and diagnostic events are skipped. Returns
    /// whether a pool was updated.
    pub fn store_event(&self, event: &DecodeEvent) -> Result<bool, PoolError> {
        match event {
            DecodeEvent::Motorola(frame) if !frame.repeat => {
                let Some(packet) = frame.command.packet(&frame.raw) else {
                    return Ok(false);
                };
                let address = packet.address as u32;
                match frame.command {
                    MotorolaCommand::Mm2 {
                        detail: Some(Mm2Detail::Function { number, .. }),
                        ..
                    } => self.update_motorola_function(address, number, packet)?,
                    _ => self.update_motorola(address, packet)?,
                }
                Ok(true)
            }
            DecodeEvent::Dcc(frame) => {
                let DccOutcome::Locomotive {
                    address,
                    instructions,
                } = &frame.outcome
                else {
                    return Ok(false);
                };
                let Some(packet) = frame.packet() else {
                    return Ok(false);
                };
                let index = address.pool_index() as u32;
                let functions_only = !instructions.is_empty()
                    && instructions.iter().all(|i| i.is_function_group());
                if functions_only {
                    self.update_dcc_function(index, packet)?;
                } else {
                    self.update_dcc(index, packet)?;
                }
                Ok(true)
            }
            DecodeEvent::Mfx(frame) => match frame.packet() {
                Some((address, packet)) => {
                    self.update_mfx(address as u32, packet)?;
                    Ok(true)
                }
                None => Ok(false),
            },
            _ => Ok(false),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hal::MockClock;
    use crate::pool::FrameSelector;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn updates_use_bus_clock() {
        let clock = MockClock::new();
        let bus = SharedBus::new(1, BusConfig::default()).with_clock(clock.clone());
        clock.set(42_000);
        bus.update_motorola(24, MotorolaPacket::mm1(24, false, 5))
            .unwrap();
        assert_eq!(
            bus.pools().motorola.entry(24).unwrap().last_update_ms,
            42_000
        );
    }

    #[test]
    fn motorola_function_needs_entry() {
        let bus = SharedBus::new(0, BusConfig::default());
        let f2 = MotorolaPacket::mm2(24, 0, 5, 12);
        assert!(bus.update_motorola_function(24, 2, f2).is_err());
        bus.update_motorola(24, MotorolaPacket::mm2(24, 0, 5, 10))
            .unwrap();
        bus.update_motorola_function(24, 2, f2).unwrap();
        assert_eq!(
            bus.pools()
                .motorola
                .get(24, FrameSelector::Function(1))
                .unwrap(),
            f2
        );
    }

    #[test]
    fn short_circuit_cuts_power_after_delay() {
        let clock = MockClock::new();
        let config = BusConfig::default().with_shortcut_delay_us(20_000);
        let bus = SharedBus::new(0, config).with_clock(clock.clone());

        assert!(!bus.power_is_off());
        bus.signal_short(true);
        clock.advance(10);
        bus.signal_short(true);
        assert!(!bus.power_is_off());
        clock.advance(10);
        assert!(bus.power_is_off());

        bus.signal_short(false);
        assert!(!bus.power_is_off());
    }

    #[test]
    fn short_ignored_without_check() {
        let config = BusConfig::default().with_check_short(false);
        let bus = SharedBus::new(0, config).with_clock(MockClock::new());
        bus.signal_short(true);
        assert!(!bus.power_is_off());
    }

    #[test]
    fn concurrent_updates_from_threads() {
        let bus = Arc::new(SharedBus::new(0, BusConfig::default()));
        let handles: Vec<_> = (1..=4u8)
            .map(|t| {
                let bus = Arc::clone(&bus);
                thread::spawn(move || {
                    for i in 0..10u8 {
                        let address = t * 10 + i;
                        let packet = DccPacket::with_checksum(&[address, 0x60]).unwrap();
                        bus.update_dcc(address as u32, packet).unwrap();
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(bus.pools().dcc.len(), 40);
        assert!(bus.pools().dcc.is_consistent());
    }
}
