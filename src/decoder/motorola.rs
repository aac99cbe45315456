//! Maerklin-Motorola sub-decoder.
//!
//! A frame is 18 bits sent as 36 half-bit pulses between two gaps. Only the
//! first (high) half of each bit is sampled: longer than [`BIT_THRESHOLD_US`]
//! is a 1. The last low half merges into the following gap, so a complete
//! frame is 35 pulses after the opening gap.
//!
//! Bit layout (transmission order): 8 address bits, 2 function bits, then
//! data and extended data bits interleaved (`d0 x0 d1 x1 d2 x2 d3 x3`).

use core::fmt;

use super::Direction;
use crate::address::{motorola_address, MOTOROLA_MAX_LOCO};
use crate::packet::MotorolaPacket;

/// High half-bit longer than this is a 1.
pub const BIT_THRESHOLD_US: i64 = 56;

/// First two half-bits shorter than this mark a frequency-2 frame.
pub const FREQUENCY2_PAIR_US: i64 = 170;

/// Slot counter value after the last sampled bit of a complete frame.
pub(crate) const FRAME_COMPLETE: u32 = 37;

/// Raw content of one Motorola frame as sampled from the line.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct MotorolaRaw {
    /// Raw 8-bit address pattern, first line bit in bit 0.
    pub address_bits: u8,
    /// Function bits (0..=3).
    pub function: u8,
    /// Data nibble.
    pub data: u8,
    /// Extended data nibble.
    pub extended: u8,
    /// Double bit rate (function and solenoid decoders).
    pub frequency2: bool,
}

/// MM2 extended nibble meaning.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum Mm2Detail {
    /// Absolute direction.
    Direction(Direction),
    /// F1..=F4 switched.
    Function {
        /// Function number 1..=4.
        number: u8,
        /// New state.
        on: bool,
    },
}

/// Meaning of a Motorola frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum MotorolaCommand {
    /// Address pattern with an invalid trit.
    UnknownAddress,
    /// MM1 locomotive frame.
    Mm1 {
        /// Locomotive address 1..=80.
        address: u8,
        /// Function bits (0 or 3 for F0 off/on).
        function: u8,
        /// Speed step or direction change (1).
        data: u8,
    },
    /// MM2 locomotive frame.
    Mm2 {
        /// Locomotive address 1..=80.
        address: u8,
        /// Function bits.
        function: u8,
        /// Speed step.
        data: u8,
        /// Extended nibble as received.
        extended: u8,
        /// Half speed step (function bits 1 or 2).
        half_step: bool,
        /// Decoded extended nibble, if it has a meaning.
        detail: Option<Mm2Detail>,
    },
    /// Frequency-2 solenoid frame.
    Accessory {
        /// Decoder base address (80 is reported as 0).
        base: u8,
        /// Accessory number: base * 4 + pair + 1.
        number: u16,
        /// Port (0 red, 1 green).
        port: u8,
        /// Coil powered.
        on: bool,
    },
    /// Frequency-2 function decoder frame.
    FunctionDecoder {
        /// Decoder address.
        address: u8,
        /// Function bits.
        function: u8,
        /// Function data nibble.
        data: u8,
    },
}

impl MotorolaCommand {
    /// Interprets a raw frame.
    pub fn from_raw(raw: &MotorolaRaw) -> Self {
        let Some(address) = motorola_address(raw.address_bits) else {
            return MotorolaCommand::UnknownAddress;
        };
        if raw.frequency2 {
            if raw.function == 0 {
                let base = if address == MOTOROLA_MAX_LOCO { 0 } else { address };
                MotorolaCommand::Accessory {
                    base,
                    number: base as u16 * 4 + ((raw.data >> 1) & 3) as u16 + 1,
                    port: raw.data & 1,
                    on: raw.data >> 3 == 1,
                }
            } else {
                MotorolaCommand::FunctionDecoder {
                    address,
                    function: raw.function,
                    data: raw.data,
                }
            }
        } else if raw.data == raw.extended {
            MotorolaCommand::Mm1 {
                address,
                function: raw.function,
                data: raw.data,
            }
        } else {
            MotorolaCommand::Mm2 {
                address,
                function: raw.function,
                data: raw.data,
                extended: raw.extended,
                half_step: matches!(raw.function, 1 | 2),
                detail: mm2_detail(raw.data, raw.extended),
            }
        }
    }

    /// Locomotive packet to keep refreshing, if this is a locomotive frame.
    pub fn packet(&self, raw: &MotorolaRaw) -> Option<MotorolaPacket> {
        match *self {
            MotorolaCommand::Mm1 { address, .. } | MotorolaCommand::Mm2 { address, .. } => {
                Some(MotorolaPacket {
                    address,
                    function: raw.function,
                    data: raw.data,
                    extended: raw.extended,
                    frequency2: false,
                })
            }
            _ => None,
        }
    }
}

fn mm2_detail(data: u8, extended: u8) -> Option<Mm2Detail> {
    // Direction frames reuse the speed nibble where it would be ambiguous.
    let x = if (extended == 5 && data < 8) || (extended == 10 && data > 7) {
        data
    } else {
        extended
    };
    let function = |number, on| Some(Mm2Detail::Function { number, on });
    match x {
        2 | 10 => Some(Mm2Detail::Direction(Direction::Forward)),
        5 | 13 => Some(Mm2Detail::Direction(Direction::Reverse)),
        3 => function(1, false),
        4 => function(2, false),
        6 => function(3, false),
        7 => function(4, false),
        11 => function(1, true),
        12 => function(2, true),
        14 => function(3, true),
        15 => function(4, true),
        _ => None,
    }
}

/// A decoded Motorola frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct MotorolaFrame {
    /// Start of the opening gap in milliseconds.
    pub start_ms: i64,
    /// Sampled frame content.
    pub raw: MotorolaRaw,
    /// Same content as the previous frame.
    pub repeat: bool,
    /// Interpretation of `raw`.
    pub command: MotorolaCommand,
}

impl fmt::Display for MotorolaFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:6} ms: ", self.start_ms)?;
        if self.repeat {
            return f.write_str("MM <REP>");
        }
        match self.command {
            MotorolaCommand::UnknownAddress => {
                write!(f, "MM A=?? ({:#04x})", self.raw.address_bits)
            }
            MotorolaCommand::Mm1 {
                address,
                function,
                data,
            } => write!(f, "MM1 A={:3}, F={}, D={:2}", address, function, data),
            MotorolaCommand::Mm2 {
                address,
                function,
                data,
                extended,
                half_step,
                detail,
            } => {
                let half = if half_step { '+' } else { ',' };
                write!(
                    f,
                    "MM2 A={:3}, F={}, D={:2}{} X={:2}",
                    address, function, data, half, extended
                )?;
                match detail {
                    Some(Mm2Detail::Direction(d)) => write!(f, " {}", d.as_str()),
                    Some(Mm2Detail::Function { number, on }) => {
                        write!(f, " F{} {}", number, if on { "on" } else { "off" })
                    }
                    None => Ok(()),
                }
            }
            MotorolaCommand::Accessory {
                base,
                number,
                port,
                on,
            } => write!(
                f,
                "MMD A={:3} => ACC {:3}, P{} = {}",
                base, number, port, on as u8
            ),
            MotorolaCommand::FunctionDecoder {
                address,
                function,
                data,
            } => write!(f, "MMD A={:3} => FKT F={}, D={:2}", address, function, data),
        }
    }
}

/// Slot counter and repeat memory of the Motorola sub-decoder.
#[derive(Clone, Debug, Default)]
pub(crate) struct MotorolaState {
    /// Half-bit slot counter, 0 while no frame is being sampled.
    counter: u32,
    start_ms: i64,
    raw: MotorolaRaw,
    previous: Option<MotorolaRaw>,
}

impl MotorolaState {
    /// Starts sampling a new frame at a gap.
    pub(crate) fn begin(&mut self, start_ms: i64) {
        self.counter = 1;
        self.start_ms = start_ms;
        self.raw = MotorolaRaw::default();
    }

    /// Stops sampling until the next gap.
    pub(crate) fn halt(&mut self) {
        self.counter = 0;
    }

    pub(crate) fn forget_previous(&mut self) {
        self.previous = None;
    }

    pub(crate) fn counter(&self) -> u32 {
        self.counter
    }

    pub(crate) fn start_ms(&self) -> i64 {
        self.start_ms
    }

    /// Accounts for one pulse; `pair` is the sum with the previous pulse.
    pub(crate) fn sample(&mut self, duration_us: i64, pair_us: i64) {
        if self.counter == 0 {
            return;
        }
        if self.counter == 3 {
            self.raw.frequency2 = pair_us < FREQUENCY2_PAIR_US;
        }
        self.counter = self.counter.saturating_add(1);
        if self.counter & 1 == 0 {
            return;
        }
        let bit = (duration_us > BIT_THRESHOLD_US) as u8;
        let c = self.counter;
        match c {
            3..=17 => self.raw.address_bits |= bit << ((c - 3) / 2),
            19 | 21 => self.raw.function |= bit << ((c - 19) / 2),
            23 | 27 | 31 | 35 => self.raw.data |= bit << ((c - 23) / 4),
            25 | 29 | 33 | 37 => self.raw.extended |= bit << ((c - 25) / 4),
            _ => {}
        }
    }

    /// Completes the frame sampled since the last gap.
    pub(crate) fn finish_frame(&mut self) -> MotorolaFrame {
        let raw = self.raw;
        let repeat = self.previous == Some(raw);
        if !repeat {
            self.previous = Some(raw);
        }
        let command = MotorolaCommand::from_raw(&raw);
        if !repeat {
            log::debug!("motorola frame {:?}", command);
        }
        MotorolaFrame {
            start_ms: self.start_ms,
            raw,
            repeat,
            command,
        }
    }
}
