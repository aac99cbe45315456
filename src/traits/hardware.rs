//! Hardware abstraction traits for signal capture and packet transmission.
//!
//! The decoder, pools and scheduler never touch hardware directly. A bus is
//! wired to its environment through three seams:
//!
//! | Trait | Purpose |
//! |-------|---------|
//! | [`PulseSource`] | Timed signal transitions captured from the track |
//! | [`PacketSink`] | Transmission layer (SPI/UART/CAN driver) |
//! | [`Clock`] | Time source for refresh timing |
//!
//! # Implementation
//!
//! For testing and desktop development, use the mock implementations
//! from [`crate::hal::mock`].
//!
//! # Example
//!
//! ```rust
//! use rs_ddl::traits::PulseSource;
//! use rs_ddl::hal::MockPulseSource;
//!
//! let mut source = MockPulseSource::new();
//! source.push_pulse(58);
//!
//! let pulse = source.next_pulse().unwrap().unwrap();
//! assert_eq!(pulse.duration_us(), 58);
//! assert!(source.next_pulse().unwrap().is_none());
//! ```

use crate::decoder::Pulse;
use crate::packet::PacketKind;

/// Source of captured pulse records.
///
/// Implementations block until the next pulse is available; this is the only
/// point where a decode loop suspends.
pub trait PulseSource {
    /// Error type for capture failures.
    type Error: core::fmt::Debug;

    /// Waits for the next pulse.
    ///
    /// Returns `Ok(None)` once the capture has ended.
    fn next_pulse(&mut self) -> Result<Option<Pulse>, Self::Error>;
}

/// Transmission layer for refreshed packets.
pub trait PacketSink {
    /// Error type for transmission failures.
    type Error: core::fmt::Debug;

    /// Hands one packet to the transmitter.
    ///
    /// `retransmits` is the protocol-mandated repeat count; the transmitter
    /// sends the packet that many times.
    fn send_packet(
        &mut self,
        bus: u8,
        bytes: &[u8],
        kind: PacketKind,
        retransmits: u8,
    ) -> Result<(), Self::Error>;
}

/// Time source trait for `no_std` compatibility.
///
/// Provides monotonic time in milliseconds for fast refresh windows.
/// On desktop, this can wrap `std::time::Instant`.
///
/// # Example
///
/// ```rust
/// use rs_ddl::traits::Clock;
/// use rs_ddl::hal::MockClock;
///
/// let clock = MockClock::new();
/// assert_eq!(clock.now_ms(), 0);
///
/// clock.advance(100);
/// assert_eq!(clock.now_ms(), 100);
/// ```
pub trait Clock {
    /// Returns current time in milliseconds since an arbitrary epoch.
    ///
    /// Must be monotonically increasing.
    fn now_ms(&self) -> u64;
}
