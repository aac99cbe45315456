//! Pulse-driven track signal decoder.
//!
//! [`PulseDecoder`] consumes `(start, duration)` pulse records from a capture
//! of the track signal and runs three sub-decoders side by side:
//!
//! | Sub-decoder | Frames start at | Bit decision |
//! |-------------|-----------------|--------------|
//! | [`motorola`] | gap (> 510 µs) | high half-bit > 56 µs |
//! | [`dcc`] | long half-bit after > 20 preamble half-bits | half-bit pair < 160 µs |
//! | [`mfx`] | gap, frames split by `0k0` flags | pulse > 68 µs is `0` |
//!
//! Every pulse updates all sub-decoders; a finished frame is reported as a
//! [`DecodeEvent`]. Checksum, CRC and format problems are events too, never
//! errors: the decoder always continues with the next pulse.
//!
//! # Example
//!
//! ```rust
//! use rs_ddl::decoder::{DecodeEvent, PulseDecoder};
//! use rs_ddl::decoder::dcc::DccOutcome;
//! use rs_ddl::hal::MockPulseSource;
//!
//! let mut source = MockPulseSource::new();
//! source.push_dcc(&[0xFF, 0x00, 0xFF], 14);
//!
//! let mut decoder = PulseDecoder::new();
//! let mut events = Vec::new();
//! for pulse in source.pulses() {
//!     events.extend(decoder.feed(pulse));
//! }
//!
//! assert!(matches!(
//!     &events[..],
//!     [DecodeEvent::Dcc(frame)] if frame.outcome == DccOutcome::Idle
//! ));
//! ```

pub mod dcc;
pub mod mfx;
pub mod motorola;

use core::fmt;

use heapless::Vec;

use crate::error::PulseError;
use dcc::{DccFrame, DccState, DEFAULT_ACCESSORY_OFFSET, PREAMBLE_MIN_HALF_BITS};
use mfx::{MfxFrame, MfxState};
use motorola::{MotorolaFrame, MotorolaState, FRAME_COMPLETE};

/// Pulses longer than this separate segments.
pub const GAP_US: i64 = 510;

/// Pulses shorter than this are short half-bits.
pub const SHORT_US: i64 = 90;

/// Short half-bits longer than this count as DCC preamble.
pub const PREAMBLE_MIN_US: i64 = 34;

/// Maximum events reported for one pulse.
pub const MAX_EVENTS: usize = 8;

/// Events produced by one pulse.
pub type DecodeEvents = Vec<DecodeEvent, MAX_EVENTS>;

/// Direction of travel.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum Direction {
    /// Forward.
    Forward,
    /// Reverse.
    Reverse,
}

impl Direction {
    /// Direction from a protocol direction bit (1 = forward).
    pub const fn from_bit(forward: bool) -> Self {
        if forward {
            Direction::Forward
        } else {
            Direction::Reverse
        }
    }

    /// Lowercase name.
    pub const fn as_str(&self) -> &'static str {
        match self {
            Direction::Forward => "forward",
            Direction::Reverse => "reverse",
        }
    }

    /// Single letter for transcripts.
    pub const fn letter(&self) -> char {
        match self {
            Direction::Forward => 'F',
            Direction::Reverse => 'R',
        }
    }
}

/// One validated pulse measurement.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Pulse {
    start_ms: i64,
    duration_us: i64,
}

impl Pulse {
    /// Validates a pulse record.
    ///
    /// ```rust
    /// use rs_ddl::decoder::Pulse;
    /// use rs_ddl::PulseError;
    ///
    /// assert!(Pulse::new(10, 58).is_ok());
    /// assert_eq!(Pulse::new(10, 0), Err(PulseError::NonPositiveDuration(0)));
    /// assert_eq!(Pulse::new(-1, 58), Err(PulseError::NegativeStart(-1)));
    /// ```
    pub fn new(start_ms: i64, duration_us: i64) -> Result<Self, PulseError> {
        if duration_us <= 0 {
            return Err(PulseError::NonPositiveDuration(duration_us));
        }
        if start_ms < 0 {
            return Err(PulseError::NegativeStart(start_ms));
        }
        Ok(Self {
            start_ms,
            duration_us,
        })
    }

    /// Start time in milliseconds.
    pub fn start_ms(&self) -> i64 {
        self.start_ms
    }

    /// Duration in microseconds.
    pub fn duration_us(&self) -> i64 {
        self.duration_us
    }

    /// Timing bucket of this pulse.
    pub fn class(&self) -> PulseClass {
        PulseClass::of(self.duration_us)
    }
}

/// Timing bucket of a pulse.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PulseClass {
    /// Segment separator.
    Gap,
    /// Short half-bit (DCC "1", MFX clock).
    Short,
    /// Long half-bit.
    Long,
}

impl PulseClass {
    /// Classifies a duration.
    pub const fn of(duration_us: i64) -> Self {
        if duration_us > GAP_US {
            PulseClass::Gap
        } else if duration_us < SHORT_US {
            PulseClass::Short
        } else {
            PulseClass::Long
        }
    }
}

/// Something the decoder recognised (or failed to).
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(tag = "protocol", rename_all = "lowercase"))]
pub enum DecodeEvent {
    /// Motorola frame.
    Motorola(MotorolaFrame),
    /// DCC packet.
    Dcc(DccFrame),
    /// MFX frame.
    Mfx(MfxFrame),
    /// Segment between two gaps that matches no protocol.
    Unrecognized {
        /// Start of the segment in milliseconds.
        start_ms: i64,
        /// Signal transitions in the segment.
        transitions: u32,
    },
}

impl DecodeEvent {
    /// Start time of the frame or segment.
    pub fn start_ms(&self) -> i64 {
        match self {
            DecodeEvent::Motorola(frame) => frame.start_ms,
            DecodeEvent::Dcc(frame) => frame.start_ms,
            DecodeEvent::Mfx(frame) => frame.start_ms,
            DecodeEvent::Unrecognized { start_ms, .. } => *start_ms,
        }
    }
}

impl fmt::Display for DecodeEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DecodeEvent::Motorola(frame) => frame.fmt(f),
            DecodeEvent::Dcc(frame) => frame.fmt(f),
            DecodeEvent::Mfx(frame) => frame.fmt(f),
            DecodeEvent::Unrecognized {
                start_ms,
                transitions,
            } => write!(f, "{:6} ms: ??? with {:3} transitions", start_ms, transitions),
        }
    }
}

/// Decoder state for one bus.
///
/// Owns all sub-decoder state; feed it pulses in capture order.
#[derive(Clone, Debug)]
pub struct PulseDecoder {
    accessory_offset: u16,
    previous_us: i64,
    preamble: u16,
    motorola: MotorolaState,
    dcc: DccState,
    mfx: MfxState,
}

impl Default for PulseDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl PulseDecoder {
    /// Creates a decoder waiting for the first gap or DCC preamble.
    pub fn new() -> Self {
        Self {
            accessory_offset: DEFAULT_ACCESSORY_OFFSET,
            previous_us: 0,
            preamble: 0,
            motorola: MotorolaState::default(),
            dcc: DccState::default(),
            mfx: MfxState::default(),
        }
    }

    /// Sets the offset added to decoded DCC accessory addresses.
    pub fn with_accessory_offset(mut self, offset: u16) -> Self {
        self.accessory_offset = offset;
        self
    }

    /// Validates and processes one pulse record.
    pub fn process_pulse(
        &mut self,
        start_ms: i64,
        duration_us: i64,
    ) -> Result<DecodeEvents, PulseError> {
        Pulse::new(start_ms, duration_us).map(|pulse| self.feed(pulse))
    }

    /// Processes one pulse.
    pub fn feed(&mut self, pulse: Pulse) -> DecodeEvents {
        let mut events = DecodeEvents::new();
        let duration = pulse.duration_us;

        match pulse.class() {
            PulseClass::Gap => {
                self.flush_segment(&mut events);
                self.motorola.begin(pulse.start_ms);
                self.dcc.cancel();
                self.mfx.begin(pulse.start_ms);
                self.preamble = 0;
            }
            PulseClass::Short => {
                if duration > PREAMBLE_MIN_US {
                    self.preamble = self.preamble.saturating_add(1);
                }
            }
            PulseClass::Long => {
                if self.preamble > PREAMBLE_MIN_HALF_BITS {
                    self.dcc.begin(pulse.start_ms, self.preamble);
                }
                self.preamble = 0;
            }
        }

        let pair = self.previous_us.saturating_add(duration);
        if let Some(frame) = self.dcc.sample(pair, self.accessory_offset) {
            self.motorola.halt();
            self.motorola.forget_previous();
            push(&mut events, DecodeEvent::Dcc(frame));
        }
        self.mfx.sample(duration);
        self.previous_us = duration;
        self.motorola.sample(duration, pair);
        events
    }

    /// Reports the segment still open at the end of a capture.
    ///
    /// A segment holding nothing but its opening gap is not reported.
    pub fn finish(&mut self) -> DecodeEvents {
        let mut events = DecodeEvents::new();
        if self.motorola.counter() > 2 {
            self.flush_segment(&mut events);
        }
        self.motorola.halt();
        self.dcc.cancel();
        events
    }

    fn flush_segment(&mut self, events: &mut DecodeEvents) {
        let counter = self.motorola.counter();
        if counter == FRAME_COMPLETE {
            push(events, DecodeEvent::Motorola(self.motorola.finish_frame()));
        } else if counter != 0 {
            match self.mfx.flush() {
                Some(frames) => {
                    for frame in frames {
                        push(events, DecodeEvent::Mfx(frame));
                    }
                }
                None => {
                    log::debug!("unrecognized segment with {} transitions", counter - 1);
                    push(
                        events,
                        DecodeEvent::Unrecognized {
                            start_ms: self.motorola.start_ms(),
                            transitions: counter - 1,
                        },
                    );
                }
            }
            self.motorola.forget_previous();
        }
    }
}

fn push(events: &mut DecodeEvents, event: DecodeEvent) {
    if let Err(event) = events.push(event) {
        log::warn!("decode event dropped: {}", event);
    }
}
