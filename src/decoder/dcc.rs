//! NMRA-DCC sub-decoder.
//!
//! Capture starts on the first long half-bit after a run of more than
//! [`PREAMBLE_MIN_HALF_BITS`] short half-bits. Each bit is decided on its
//! second half from the sum of both halves: NMRA "1" halves are 52-64 µs,
//! "0" halves at least 90 µs, so a pair shorter than [`ONE_PAIR_US`] is a 1.
//! Every ninth bit is a separator; a separator 1 ends the packet.

use core::fmt;

use heapless::Vec;

use super::Direction;
use crate::address::DccAddress;
use crate::packet::{dcc_checksum, DccPacket, DCC_MAX_BYTES};

/// A half-bit pair shorter than this is a 1.
pub const ONE_PAIR_US: i64 = 160;

/// A capture starts after more than this many preamble half-bits.
pub const PREAMBLE_MIN_HALF_BITS: u16 = 20;

/// Minimum preamble half-bits of a service mode packet.
pub const SERVICE_PREAMBLE_HALF_BITS: u16 = 40;

/// Default offset added to decoded accessory addresses.
pub const DEFAULT_ACCESSORY_OFFSET: u16 = 1;

/// Accessory addresses above this are broadcasts.
pub const ACCESSORY_BROADCAST_ABOVE: u16 = 2044;

/// Maximum instructions decoded from one packet.
pub const MAX_INSTRUCTIONS: usize = DCC_MAX_BYTES;

/// Decoded instruction list.
pub type Instructions = Vec<DccInstruction, MAX_INSTRUCTIONS>;

/// Long-form CV access operation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum CvOperation {
    /// Read four bytes starting at the CV.
    Read,
    /// Verify the CV holds `value`.
    Verify(u8),
    /// Verify a single bit.
    VerifyBit {
        /// Bit position 0..=7.
        bit: u8,
        /// Expected value.
        value: bool,
    },
    /// Write a single bit.
    WriteBit {
        /// Bit position 0..=7.
        bit: u8,
        /// New value.
        value: bool,
    },
    /// Write `value` into the CV.
    Write(u8),
}

/// Configuration variable access.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum CvAccess {
    /// Short form, writes CV 23 or CV 24 (`None` for other codes).
    Short {
        /// Target CV.
        cv: Option<u16>,
        /// Value written.
        value: u8,
    },
    /// Long form with a 10-bit CV number (1-based).
    Long {
        /// CV number 1..=1024.
        cv: u16,
        /// Operation.
        operation: CvOperation,
    },
}

impl CvAccess {
    /// Decodes a CV access starting at `bytes[0]`; returns the access and
    /// the number of bytes consumed.
    fn decode(bytes: &[u8]) -> Option<(Self, usize)> {
        let b0 = *bytes.first()?;
        let b1 = *bytes.get(1)?;
        if b0 & 0xF0 == 0xF0 {
            let cv = match b0 & 0x0F {
                2 => Some(23),
                3 => Some(24),
                _ => None,
            };
            return Some((CvAccess::Short { cv, value: b1 }, 2));
        }
        let cv = (b0 & 3) as u16 * 256 + b1 as u16 + 1;
        let operation = match b0 & 0x0C {
            0 => CvOperation::Read,
            4 => CvOperation::Verify(*bytes.get(2)?),
            8 => {
                let b2 = *bytes.get(2)?;
                let (bit, value) = (b2 & 7, (b2 >> 3) & 1 == 1);
                if b2 & 0x10 != 0 {
                    CvOperation::WriteBit { bit, value }
                } else {
                    CvOperation::VerifyBit { bit, value }
                }
            }
            _ => CvOperation::Write(*bytes.get(2)?),
        };
        Some((CvAccess::Long { cv, operation }, 3))
    }
}

impl fmt::Display for CvAccess {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            CvAccess::Short { cv, value } => {
                write!(f, "short form CV {} = {:02x}", cv.unwrap_or(0), value)
            }
            CvAccess::Long { cv, operation } => {
                write!(f, "CV {}, ", cv)?;
                match operation {
                    CvOperation::Read => f.write_str("READ 4B"),
                    CvOperation::Verify(v) => write!(f, "VER {:02x}", v),
                    CvOperation::VerifyBit { bit, value } => {
                        write!(f, "BIT {} VER {}", bit, value as u8)
                    }
                    CvOperation::WriteBit { bit, value } => {
                        write!(f, "BIT {} WRI {}", bit, value as u8)
                    }
                    CvOperation::Write(v) => write!(f, "WRI {:02x}", v),
                }
            }
        }
    }
}

/// One locomotive instruction, selected by the top three bits.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum DccInstruction {
    /// Decoder reset.
    Reset,
    /// Decoder hard reset.
    HardReset,
    /// Other decoder/consist control code.
    ConsistControl(u8),
    /// Advanced operation (128 speed steps); ends the instruction list.
    AdvancedOperation {
        /// Sub-instruction code.
        code: u8,
        /// Direction bit.
        direction: Direction,
        /// 7-bit value.
        value: u8,
    },
    /// Speed and direction.
    Speed {
        /// Direction of travel.
        direction: Direction,
        /// 4-bit speed value.
        step: u8,
        /// C bit (intermediate step or F0).
        c_bit: bool,
    },
    /// F0-F4.
    FunctionGroup1(u8),
    /// F5-F8 or F9-F12.
    FunctionGroup2 {
        /// F5-F8 when set, F9-F12 otherwise.
        first_half: bool,
        /// Function bits.
        bits: u8,
    },
    /// F13-F20.
    FunctionGroup3(u8),
    /// F21-F28.
    FunctionGroup4(u8),
    /// Unknown feature expansion code.
    FeatureExpansion(u8),
    /// Operations mode CV access.
    CvAccess(CvAccess),
    /// Instruction needs bytes the packet does not have.
    Truncated(u8),
}

impl DccInstruction {
    /// Returns true for function group instructions.
    pub fn is_function_group(&self) -> bool {
        matches!(
            self,
            DccInstruction::FunctionGroup1(_)
                | DccInstruction::FunctionGroup2 { .. }
                | DccInstruction::FunctionGroup3(_)
                | DccInstruction::FunctionGroup4(_)
        )
    }
}

impl fmt::Display for DccInstruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            DccInstruction::Reset => f.write_str("RESET"),
            DccInstruction::HardReset => f.write_str("HARD RESET"),
            DccInstruction::ConsistControl(b) => write!(f, "CC ?? ({:02x})", b),
            DccInstruction::AdvancedOperation {
                direction, value, ..
            } => write!(f, "ADV:{}{}", direction.letter(), value),
            DccInstruction::Speed {
                direction,
                step,
                c_bit,
            } => write!(
                f,
                "S+D:{} {}{}",
                direction.letter(),
                step,
                if c_bit { "+" } else { "" }
            ),
            DccInstruction::FunctionGroup1(b) => write!(f, "FG1:{:x}", b),
            DccInstruction::FunctionGroup2 { first_half, bits } => {
                write!(f, "FG2{}:{:x}", if first_half { 'A' } else { 'B' }, bits)
            }
            DccInstruction::FunctionGroup3(b) => write!(f, "FG3:{:x}", b),
            DccInstruction::FunctionGroup4(b) => write!(f, "FG4:{:x}", b),
            DccInstruction::FeatureExpansion(b) => write!(f, "FE ?? ({:02x})", b),
            DccInstruction::CvAccess(cv) => write!(f, "POM {}", cv),
            DccInstruction::Truncated(b) => write!(f, "TRUNCATED ({:02x})", b),
        }
    }
}

/// Decodes the instruction bytes of a locomotive or broadcast packet.
pub fn decode_instructions(bytes: &[u8]) -> Instructions {
    let mut out = Instructions::new();
    let mut i = 0;
    while i < bytes.len() {
        let b = bytes[i];
        let (instruction, used, last) = match b >> 5 {
            0 => {
                let ins = match b {
                    0 => DccInstruction::Reset,
                    1 => DccInstruction::HardReset,
                    _ => DccInstruction::ConsistControl(b),
                };
                (ins, 1, false)
            }
            1 => match bytes.get(i + 1) {
                Some(&next) => (
                    DccInstruction::AdvancedOperation {
                        code: b & 0x1F,
                        direction: Direction::from_bit(next & 0x80 != 0),
                        value: next & 0x7F,
                    },
                    2,
                    true,
                ),
                None => (DccInstruction::Truncated(b), 1, true),
            },
            2 | 3 => (
                DccInstruction::Speed {
                    direction: Direction::from_bit(b & 0x20 != 0),
                    step: b & 0x0F,
                    c_bit: b & 0x10 != 0,
                },
                1,
                false,
            ),
            4 => (DccInstruction::FunctionGroup1(b & 0x1F), 1, false),
            5 => (
                DccInstruction::FunctionGroup2 {
                    first_half: b & 0x10 != 0,
                    bits: b & 0x0F,
                },
                1,
                false,
            ),
            6 => match (b & 0x1F, bytes.get(i + 1)) {
                (30, Some(&next)) => (DccInstruction::FunctionGroup3(next), 2, false),
                (31, Some(&next)) => (DccInstruction::FunctionGroup4(next), 2, false),
                (30 | 31, None) => (DccInstruction::Truncated(b), 1, true),
                _ => (DccInstruction::FeatureExpansion(b), 1, false),
            },
            _ => match CvAccess::decode(&bytes[i..]) {
                Some((cv, used)) => (DccInstruction::CvAccess(cv), used, false),
                None => (DccInstruction::Truncated(b), 1, true),
            },
        };
        if out.push(instruction).is_err() {
            break;
        }
        if last {
            break;
        }
        i += used;
    }
    out
}

/// Accessory decoder packet.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum DccAccessory {
    /// Basic accessory: one output pair.
    Basic {
        /// Accessory address (offset applied).
        address: u16,
        /// Output of the pair.
        port: u8,
        /// Output activated.
        active: bool,
    },
    /// Extended accessory: signal aspect.
    Extended {
        /// Accessory address (offset applied).
        address: u16,
        /// Aspect 0..=31.
        aspect: u8,
    },
}

impl DccAccessory {
    /// Decodes an accessory packet from its payload (checksum excluded).
    ///
    /// ```rust
    /// use rs_ddl::decoder::dcc::DccAccessory;
    ///
    /// let acc = DccAccessory::decode(&[0x81, 0xF9], 1).unwrap();
    /// assert_eq!(acc, DccAccessory::Basic { address: 5, port: 1, active: true });
    /// ```
    pub fn decode(payload: &[u8], offset: u16) -> Option<Self> {
        let b0 = *payload.first()? as u16;
        let b1 = *payload.get(1)? as u16;
        let address =
            ((!b1 << 4) & 0x700) + ((b0 << 2) & 0xFC) + ((b1 >> 1) & 3) + offset;
        if b1 & 0x80 != 0 {
            Some(DccAccessory::Basic {
                address,
                port: (b1 & 1) as u8,
                active: (b1 >> 3) & 1 == 1,
            })
        } else {
            Some(DccAccessory::Extended {
                address,
                aspect: *payload.get(2)? & 0x1F,
            })
        }
    }

    /// Accessory address.
    pub fn address(&self) -> u16 {
        match *self {
            DccAccessory::Basic { address, .. } | DccAccessory::Extended { address, .. } => {
                address
            }
        }
    }

    /// Returns true for the broadcast address range.
    pub fn is_broadcast(&self) -> bool {
        self.address() > ACCESSORY_BROADCAST_ABOVE
    }
}

/// Service mode (programming track) packet.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum ServiceCommand {
    /// Direct mode CV access.
    Direct(CvAccess),
    /// Physical register mode.
    Register {
        /// Register 0..=7.
        register: u8,
        /// Write (otherwise verify).
        write: bool,
        /// Data byte.
        value: u8,
    },
}

/// Result of decoding one DCC packet.
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum DccOutcome {
    /// Last byte is not the XOR of the others.
    ChecksumError {
        /// XOR of all bytes but the last.
        computed: u8,
        /// Last byte.
        received: u8,
    },
    /// Idle packet.
    Idle,
    /// Broadcast to all locomotive decoders.
    Broadcast(Instructions),
    /// Locomotive decoder packet.
    Locomotive {
        /// Decoder address.
        address: DccAddress,
        /// Decoded instructions.
        instructions: Instructions,
    },
    /// Accessory decoder packet.
    Accessory(DccAccessory),
    /// Service mode packet.
    Service(ServiceCommand),
    /// Address byte 232..=254.
    Reserved(u8),
    /// Packet too short for its address format.
    Truncated,
    /// More bytes than a packet may hold; capture abandoned.
    Malformed,
}

/// A captured DCC packet.
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct DccFrame {
    /// Start of the first long half-bit in milliseconds.
    pub start_ms: i64,
    /// Preamble length in bits.
    pub preamble_bits: u16,
    /// Received bytes including the checksum.
    pub bytes: Vec<u8, DCC_MAX_BYTES>,
    /// Decoded content.
    pub outcome: DccOutcome,
}

impl DccFrame {
    /// Packet to keep refreshing, for locomotive packets.
    pub fn packet(&self) -> Option<DccPacket> {
        match self.outcome {
            DccOutcome::Locomotive { .. } => DccPacket::from_wire(&self.bytes).ok(),
            _ => None,
        }
    }
}

impl fmt::Display for DccFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:6} ms: DCC Pr.{:2}, Data:",
            self.start_ms, self.preamble_bits
        )?;
        for b in &self.bytes {
            write!(f, " {:02x}", b)?;
        }
        match &self.outcome {
            DccOutcome::ChecksumError { computed, .. } => {
                write!(f, " (CHECKSUM {:02x})", computed)
            }
            DccOutcome::Malformed => f.write_str(" (MALFORMED)"),
            outcome => {
                f.write_str("(OK)")?;
                match outcome {
                    DccOutcome::Idle => f.write_str(" *IDLE*"),
                    DccOutcome::Broadcast(ins) => {
                        f.write_str(" *BC*")?;
                        write_instructions(f, ins)
                    }
                    DccOutcome::Locomotive {
                        address,
                        instructions,
                    } => {
                        write!(f, "  {}", address)?;
                        write_instructions(f, instructions)
                    }
                    DccOutcome::Accessory(acc) => {
                        if acc.is_broadcast() {
                            f.write_str(" *BC*")?;
                        }
                        match *acc {
                            DccAccessory::Basic {
                                address,
                                port,
                                active,
                            } => write!(f, " BASACC {:3}, P{} = {}", address, port, active as u8),
                            DccAccessory::Extended { address, aspect } => {
                                write!(f, " EXTACC {:3}, => {}", address, aspect)
                            }
                        }
                    }
                    DccOutcome::Service(ServiceCommand::Direct(cv)) => {
                        write!(f, " *SM DIR* {}", cv)
                    }
                    DccOutcome::Service(ServiceCommand::Register {
                        register,
                        write,
                        value,
                    }) => write!(
                        f,
                        " *SM PHY* REG = {} {} {:x}",
                        register,
                        if *write { "WRI" } else { "VER" },
                        value
                    ),
                    DccOutcome::Reserved(b) => write!(f, " reserved address {}", b),
                    DccOutcome::Truncated => f.write_str(" TRUNCATED"),
                    _ => Ok(()),
                }
            }
        }
    }
}

fn write_instructions(f: &mut fmt::Formatter<'_>, instructions: &[DccInstruction]) -> fmt::Result {
    for ins in instructions {
        write!(f, " {}", ins)?;
    }
    Ok(())
}

/// Classifies a packet whose checksum has been verified.
pub fn classify(bytes: &[u8], preamble_half_bits: u16, accessory_offset: u16) -> DccOutcome {
    let payload = &bytes[..bytes.len().saturating_sub(1)];
    let Some(&b0) = bytes.first() else {
        return DccOutcome::Truncated;
    };
    let rest = |from: usize| payload.get(from..).unwrap_or(&[]);

    if (112..=127).contains(&b0) && preamble_half_bits >= SERVICE_PREAMBLE_HALF_BITS {
        return service(payload).unwrap_or(DccOutcome::Truncated);
    }
    match b0 {
        0 => DccOutcome::Broadcast(decode_instructions(rest(1))),
        255 => DccOutcome::Idle,
        1..=127 => DccOutcome::Locomotive {
            address: DccAddress::Short(b0),
            instructions: decode_instructions(rest(1)),
        },
        128..=191 => match DccAccessory::decode(payload, accessory_offset) {
            Some(acc) => DccOutcome::Accessory(acc),
            None => DccOutcome::Truncated,
        },
        192..=231 => match payload.get(1) {
            Some(&b1) => DccOutcome::Locomotive {
                address: DccAddress::Long((b0 as u16 - 192) * 256 + b1 as u16),
                instructions: decode_instructions(rest(2)),
            },
            None => DccOutcome::Truncated,
        },
        _ => DccOutcome::Reserved(b0),
    }
}

fn service(payload: &[u8]) -> Option<DccOutcome> {
    let command = if payload.len() >= 3 {
        ServiceCommand::Direct(CvAccess::decode(payload)?.0)
    } else {
        let b0 = *payload.first()?;
        ServiceCommand::Register {
            register: b0 & 7,
            write: b0 & 8 != 0,
            value: *payload.get(1)?,
        }
    };
    Some(DccOutcome::Service(command))
}

/// Bit capture state of the DCC sub-decoder.
#[derive(Clone, Debug, Default)]
pub(crate) struct DccState {
    /// Half-bit counter, 0 while no packet is being captured.
    counter: u32,
    preamble: u16,
    start_ms: i64,
    bytes: Vec<u8, DCC_MAX_BYTES>,
}

impl DccState {
    pub(crate) fn begin(&mut self, start_ms: i64, preamble: u16) {
        self.counter = 2;
        self.preamble = preamble;
        self.start_ms = start_ms;
        self.bytes.clear();
    }

    pub(crate) fn cancel(&mut self) {
        self.counter = 0;
        self.preamble = 0;
        self.bytes.clear();
    }

    /// Accounts for one half-bit; returns a frame when the packet ends or
    /// overflows.
    pub(crate) fn sample(&mut self, pair_us: i64, accessory_offset: u16) -> Option<DccFrame> {
        if self.counter == 0 {
            return None;
        }
        self.counter += 1;
        // Decide on the second half; the first pair is the start bit.
        if self.counter & 1 == 1 || self.counter < 6 {
            return None;
        }
        let bit = pair_us < ONE_PAIR_US;
        let position = ((self.counter - 6) / 2) as usize;
        let index = position / 9;
        if position % 9 == 8 {
            return if bit {
                Some(self.finish(accessory_offset))
            } else {
                None
            };
        }
        if index >= DCC_MAX_BYTES {
            log::warn!("DCC packet exceeds {} bytes, dropped", DCC_MAX_BYTES);
            return Some(self.frame(DccOutcome::Malformed));
        }
        if index == self.bytes.len() && self.bytes.push(0).is_err() {
            return Some(self.frame(DccOutcome::Malformed));
        }
        if bit {
            if let Some(byte) = self.bytes.get_mut(index) {
                *byte |= 0x80 >> (position % 9);
            }
        }
        None
    }

    fn finish(&mut self, accessory_offset: u16) -> DccFrame {
        let outcome = match self.bytes.split_last() {
            Some((&received, data)) if dcc_checksum(data) != received => {
                let computed = dcc_checksum(data);
                log::warn!(
                    "DCC checksum error: computed {:02x}, received {:02x}",
                    computed,
                    received
                );
                DccOutcome::ChecksumError { computed, received }
            }
            _ => classify(&self.bytes, self.preamble, accessory_offset),
        };
        if let DccOutcome::Reserved(b) = outcome {
            log::debug!("DCC reserved address byte {}", b);
        }
        self.frame(outcome)
    }

    fn frame(&mut self, outcome: DccOutcome) -> DccFrame {
        let frame = DccFrame {
            start_ms: self.start_ms,
            preamble_bits: self.preamble / 2,
            bytes: self.bytes.clone(),
            outcome,
        };
        self.cancel();
        frame
    }
}
