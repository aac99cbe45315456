//! Mock implementations for testing without hardware.
//!
//! This module provides test doubles for the hardware traits, enabling
//! development and testing on desktop without a track interface.
//!
//! # Available Mocks
//!
//! | Mock | Trait | Purpose |
//! |------|-------|---------|
//! | [`MockPulseSource`] | [`PulseSource`] | Synthesises Motorola/DCC/MFX pulse trains |
//! | [`MockSink`] | [`PacketSink`] | Records transmitted packets |
//! | [`MockClock`] | [`Clock`] | Controllable time source |
//!
//! # Example
//!
//! ```rust
//! use rs_ddl::decoder::{DecodeEvent, PulseDecoder};
//! use rs_ddl::hal::MockPulseSource;
//! use rs_ddl::packet::MotorolaPacket;
//!
//! let mut source = MockPulseSource::new();
//! source.push_motorola(&MotorolaPacket::mm1(24, false, 5));
//! source.finish();
//!
//! let mut decoder = PulseDecoder::new();
//! let events: Vec<DecodeEvent> = source.pulses().flat_map(|p| decoder.feed(p)).collect();
//! assert_eq!(events.len(), 1);
//! assert_eq!(events[0].to_string(), "     0 ms: MM1 A= 24, F=0, D= 5");
//! ```
//!
//! [`PulseSource`]: crate::traits::PulseSource
//! [`PacketSink`]: crate::traits::PacketSink
//! [`Clock`]: crate::traits::Clock

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::decoder::Pulse;
use crate::packet::{MfxPacket, MotorolaPacket, PacketKind};
use crate::traits::{Clock, PacketSink, PulseSource};

/// Gap written between frames.
pub const GAP_PULSE_US: i64 = 1_500;

/// Long half of a Motorola bit at the base rate.
pub const MOTOROLA_LONG_US: i64 = 182;

/// Short half of a Motorola bit at the base rate.
pub const MOTOROLA_SHORT_US: i64 = 26;

/// DCC "1" half-bit.
pub const DCC_ONE_US: i64 = 58;

/// DCC "0" half-bit.
pub const DCC_ZERO_US: i64 = 100;

/// MFX "0" pulse.
pub const MFX_ZERO_US: i64 = 100;

/// MFX half of a "1".
pub const MFX_HALF_US: i64 = 50;

/// Pulses after a gap that make a segment look like a Motorola frame.
const MOTOROLA_SEGMENT_PULSES: usize = 35;

// ============================================================================
// Pulse Source
// ============================================================================

/// Mock pulse source with signal synthesis.
///
/// Frames are appended as they would appear on the track; start times follow
/// from the accumulated durations. Motorola and MFX frames open with a gap
/// and are closed by the next gap, which [`finish`](Self::finish) or the
/// next frame supplies.
///
/// # Example
///
/// ```rust
/// use rs_ddl::hal::MockPulseSource;
/// use rs_ddl::traits::PulseSource;
///
/// let mut source = MockPulseSource::new();
/// source.push_dcc(&[0xFF, 0x00, 0xFF], 14);
///
/// // 14 preamble bits, start bit, 3 bytes with separators
/// assert_eq!(source.len(), 2 * (14 + 1 + 3 * 9));
/// assert!(source.next_pulse().unwrap().is_some());
/// ```
#[derive(Clone, Debug, Default)]
pub struct MockPulseSource {
    pulses: VecDeque<Pulse>,
    elapsed_us: i64,
    segment_open: bool,
}

impl MockPulseSource {
    /// Creates an empty source starting at time 0.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends one pulse; non-positive durations are ignored.
    pub fn push_pulse(&mut self, duration_us: i64) -> &mut Self {
        if let Ok(pulse) = Pulse::new(self.elapsed_us / 1000, duration_us) {
            self.pulses.push_back(pulse);
            self.elapsed_us += duration_us;
        }
        self
    }

    /// Appends a gap, closing the open segment.
    pub fn push_gap(&mut self) -> &mut Self {
        self.segment_open = false;
        self.push_pulse(GAP_PULSE_US)
    }

    /// Closes the last frame.
    pub fn finish(&mut self) -> &mut Self {
        if self.segment_open {
            self.push_gap();
        }
        self
    }

    /// Appends a Motorola frame.
    ///
    /// Addresses without a trit encoding add nothing.
    pub fn push_motorola(&mut self, packet: &MotorolaPacket) -> &mut Self {
        let Some(bits) = packet.line_bits() else {
            return self;
        };
        let (long, short) = if packet.frequency2 {
            (MOTOROLA_LONG_US / 2, MOTOROLA_SHORT_US / 2)
        } else {
            (MOTOROLA_LONG_US, MOTOROLA_SHORT_US)
        };
        self.push_gap();
        let mut halves = Vec::with_capacity(2 * bits.len());
        for bit in bits {
            if bit {
                halves.extend([long, short]);
            } else {
                halves.extend([short, long]);
            }
        }
        // the low half of the last bit runs into the next gap
        halves.pop();
        for d in halves {
            self.push_pulse(d);
        }
        self.segment_open = true;
        self
    }

    /// Appends a DCC packet; `bytes` must already carry the checksum.
    pub fn push_dcc(&mut self, bytes: &[u8], preamble_bits: u16) -> &mut Self {
        if self.segment_open {
            self.push_gap();
        }
        for _ in 0..preamble_bits {
            self.push_dcc_bit(true);
        }
        self.push_dcc_bit(false);
        for (i, byte) in bytes.iter().enumerate() {
            for k in (0..8).rev() {
                self.push_dcc_bit((byte >> k) & 1 == 1);
            }
            self.push_dcc_bit(i + 1 == bytes.len());
        }
        self
    }

    fn push_dcc_bit(&mut self, one: bool) {
        let half = if one { DCC_ONE_US } else { DCC_ZERO_US };
        self.push_pulse(half);
        self.push_pulse(half);
    }

    /// Appends an MFX packet as one frame.
    pub fn push_mfx(&mut self, packet: &MfxPacket) -> &mut Self {
        self.push_mfx_bits(packet.bits())
    }

    /// Appends raw MFX frame bits (CRC included) with flags and bit stuffing.
    pub fn push_mfx_bits(&mut self, bits: impl IntoIterator<Item = bool>) -> &mut Self {
        self.push_gap();
        let mut halves = Vec::new();
        push_mfx_flag(&mut halves);
        let mut ones = 0;
        for bit in bits {
            if bit {
                halves.extend([MFX_HALF_US, MFX_HALF_US]);
                ones += 1;
                if ones == 8 {
                    halves.push(MFX_ZERO_US);
                    ones = 0;
                }
            } else {
                halves.push(MFX_ZERO_US);
                ones = 0;
            }
        }
        push_mfx_flag(&mut halves);
        if halves.len() == MOTOROLA_SEGMENT_PULSES {
            push_mfx_flag(&mut halves);
        }
        for d in halves {
            self.push_pulse(d);
        }
        self.segment_open = true;
        self
    }

    /// Queued pulses in order.
    pub fn pulses(&self) -> impl Iterator<Item = Pulse> + '_ {
        self.pulses.iter().copied()
    }

    /// Number of queued pulses.
    pub fn len(&self) -> usize {
        self.pulses.len()
    }

    /// Returns true if no pulse is queued.
    pub fn is_empty(&self) -> bool {
        self.pulses.is_empty()
    }
}

fn push_mfx_flag(halves: &mut Vec<i64>) {
    halves.extend([MFX_ZERO_US, MFX_HALF_US, MFX_ZERO_US]);
}

impl PulseSource for MockPulseSource {
    type Error = ();

    fn next_pulse(&mut self) -> Result<Option<Pulse>, ()> {
        Ok(self.pulses.pop_front())
    }
}

// ============================================================================
// Packet Sink
// ============================================================================

/// One packet recorded by [`MockSink`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SentPacket {
    /// Bus id.
    pub bus: u8,
    /// Wire bytes.
    pub bytes: Vec<u8>,
    /// Transmission class.
    pub kind: PacketKind,
    /// Retransmit count.
    pub retransmits: u8,
}

/// Mock transmission layer.
///
/// # Example
///
/// ```rust
/// use rs_ddl::hal::MockSink;
/// use rs_ddl::packet::PacketKind;
/// use rs_ddl::traits::PacketSink;
///
/// let mut sink = MockSink::new();
/// sink.send_packet(0, &[0xFF, 0x00, 0xFF], PacketKind::NmraLoco, 1).unwrap();
/// assert_eq!(sink.sent.len(), 1);
///
/// sink.fail = true;
/// assert!(sink.send_packet(0, &[], PacketKind::NmraLoco, 1).is_err());
/// ```
#[derive(Debug, Default)]
pub struct MockSink {
    /// Packets sent so far.
    pub sent: Vec<SentPacket>,
    /// Fail every send while set.
    pub fail: bool,
}

impl MockSink {
    /// Creates a sink that accepts everything.
    pub fn new() -> Self {
        Self::default()
    }
}

impl PacketSink for MockSink {
    type Error = ();

    fn send_packet(
        &mut self,
        bus: u8,
        bytes: &[u8],
        kind: PacketKind,
        retransmits: u8,
    ) -> Result<(), ()> {
        if self.fail {
            return Err(());
        }
        self.sent.push(SentPacket {
            bus,
            bytes: bytes.to_vec(),
            kind,
            retransmits,
        });
        Ok(())
    }
}

// ============================================================================
// Clock
// ============================================================================

/// Mock clock for testing.
///
/// Clones share the same time, so a test can keep one handle while the bus
/// owns another.
///
/// # Example
///
/// ```rust
/// use rs_ddl::hal::MockClock;
/// use rs_ddl::traits::Clock;
///
/// let clock = MockClock::new();
/// let handle = clock.clone();
/// assert_eq!(clock.now_ms(), 0);
///
/// handle.set(1000);
/// assert_eq!(clock.now_ms(), 1000);
///
/// handle.advance(500);
/// assert_eq!(clock.now_ms(), 1500);
/// ```
#[derive(Clone, Debug, Default)]
pub struct MockClock {
    current_ms: Arc<AtomicU64>,
}

impl MockClock {
    /// Creates a new mock clock starting at 0ms.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the current time in milliseconds.
    pub fn set(&self, ms: u64) {
        self.current_ms.store(ms, Ordering::Relaxed);
    }

    /// Advances the clock by the given duration.
    pub fn advance(&self, ms: u64) {
        self.current_ms.fetch_add(ms, Ordering::Relaxed);
    }
}

impl Clock for MockClock {
    fn now_ms(&self) -> u64 {
        self.current_ms.load(Ordering::Relaxed)
    }
}
