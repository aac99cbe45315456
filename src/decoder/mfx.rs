//! MFX sub-decoder, CRC and field codec.
//!
//! Between two gaps every pulse becomes a line symbol: a pulse longer than
//! [`CLOCK_MAX_US`] is `0`, a short pulse a clock `k`, and two clocks in a
//! row merge into `1`. The pattern `0 k 0` is a flag; flags separate frames.
//! Inside a frame a `0` following eight `1`s is stuffing and removed.
//!
//! A frame is a sequence of fields followed by 8 CRC bits. The first field
//! is the decoder address; every further field starts with a 4-bit type tag.

use core::fmt;

use heapless::Vec;

use crate::bits::BitString;
use crate::error::PacketError;
use crate::packet::{push_checked, MfxPacket, MFX_MAX_ADDRESS};

/// Pulses longer than this are `0` symbols; shorter ones are clocks.
pub const CLOCK_MAX_US: i64 = 68;

/// Symbols kept per segment.
pub const LINE_CAPACITY: usize = 2048;

/// Maximum bits of one frame after destuffing.
pub const FRAME_CAPACITY: usize = 128;

/// Maximum fields decoded from one frame.
pub const MAX_FIELDS: usize = 16;

/// Maximum frames reported per segment.
pub const MAX_FRAMES: usize = 8;

/// Ones after which a stuffed zero follows.
pub const STUFF_AFTER_ONES: u8 = 8;

/// CRC register start value.
pub const CRC_INIT: u16 = 0x7F;

/// CRC generator x^8 + x^2 + x + 1.
pub const CRC_POLY: u16 = 0x107;

/// Destuffed frame bits including the CRC.
pub type FrameBits = BitString<FRAME_CAPACITY>;

/// Fields decoded from one frame.
pub type MfxFields = Vec<MfxField, MAX_FIELDS>;

/// Runs the MFX CRC over `bits`.
///
/// Appending the CRC of a payload followed by eight zero bits yields a
/// sequence whose CRC is 0.
pub fn mfx_crc(bits: impl IntoIterator<Item = bool>) -> u8 {
    let mut r = CRC_INIT;
    for bit in bits {
        r = (r << 1) | bit as u16;
        if r & 0x100 != 0 {
            r ^= CRC_POLY;
        }
    }
    r as u8
}

/// Returns true if `bits` (payload and CRC) check out.
pub fn crc_ok(bits: impl IntoIterator<Item = bool>) -> bool {
    mfx_crc(bits) == 0
}

// ============================================================================
// Fields
// ============================================================================

/// Address encodings of the first field.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum MfxAddressFormat {
    /// `10` + 7 bits.
    A7,
    /// `110` + 9 bits.
    A9,
    /// `1110` + 11 bits.
    A11,
    /// `1111` + 14 bits.
    A14,
}

impl MfxAddressFormat {
    /// Smallest format that holds `address`.
    pub fn for_address(address: u16) -> Self {
        match address {
            0..=0x7F => MfxAddressFormat::A7,
            0x80..=0x1FF => MfxAddressFormat::A9,
            0x200..=0x7FF => MfxAddressFormat::A11,
            _ => MfxAddressFormat::A14,
        }
    }

    /// Prefix value and width.
    const fn prefix(self) -> (u64, u8) {
        match self {
            MfxAddressFormat::A7 => (0b10, 2),
            MfxAddressFormat::A9 => (0b110, 3),
            MfxAddressFormat::A11 => (0b1110, 4),
            MfxAddressFormat::A14 => (0b1111, 4),
        }
    }

    /// Address width in bits.
    pub const fn width(self) -> u8 {
        match self {
            MfxAddressFormat::A7 => 7,
            MfxAddressFormat::A9 => 9,
            MfxAddressFormat::A11 => 11,
            MfxAddressFormat::A14 => 14,
        }
    }
}

/// One field of an MFX frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum MfxField {
    /// Decoder address (first field only).
    Address {
        /// Encoding used.
        format: MfxAddressFormat,
        /// Address value.
        address: u16,
    },
    /// Direction and speed.
    Speed {
        /// Forward direction.
        forward: bool,
        /// 7-bit (true) or 3-bit speed.
        fine: bool,
        /// Speed value.
        value: u8,
    },
    /// F0-F3.
    Functions4(u8),
    /// F0-F7.
    Functions8(u8),
    /// F0-F15.
    Functions16(u16),
    /// Single function switch.
    SingleFunction {
        /// Function number 0..=127.
        number: u8,
        /// New state.
        on: bool,
    },
    /// Read CV elements (decoder answers in the reply window).
    ReadCv {
        /// CV number 0..=1023.
        cv: u16,
        /// First element 0..=63.
        index: u8,
        /// Bytes to read: 1, 2, 4 or 8.
        count: u8,
    },
    /// Write one CV element.
    WriteCv {
        /// CV number 0..=1023.
        cv: u16,
        /// Element 0..=63.
        index: u8,
        /// New value.
        value: u8,
    },
    /// Decoder search by UID prefix.
    Search {
        /// Number of significant mask bits.
        bits: u8,
        /// UID mask.
        mask: u32,
    },
    /// Assign a track address to the decoder with `uid`.
    AssignAddress {
        /// New address.
        address: u16,
        /// Decoder UID.
        uid: u32,
    },
    /// Ping a decoder by UID.
    Ping {
        /// Decoder UID.
        uid: u32,
    },
    /// Central station beacon.
    Beacon {
        /// Central station UID.
        uid: u32,
        /// Registration counter / options.
        option: u16,
    },
}

/// Field decoding failure; earlier fields of the frame remain valid.
#[derive(Clone, Copy, Debug, PartialEq, Eq, thiserror::Error)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum MfxFieldError {
    /// First field is not an address.
    #[error("unknown address format {0:X}")]
    UnknownAddressFormat(u8),
    /// Unknown command type.
    #[error("unknown type {0:X}")]
    UnknownType(u8),
    /// Unknown sub-type of type 15.
    #[error("unknown subtype {0} of type 15")]
    UnknownSubtype(u8),
    /// Field reaches past the end of the frame.
    #[error("field at bit {at} reaches past the frame end")]
    Truncated {
        /// Start bit of the field.
        at: usize,
    },
    /// Fields do not end where the CRC starts.
    #[error("length error: fields end at bit {end}, frame has {bits} bits")]
    Length {
        /// Bit after the last field.
        end: usize,
        /// Frame length including CRC.
        bits: usize,
    },
    /// More fields than can be reported.
    #[error("more than {} fields", MAX_FIELDS)]
    TooManyFields,
}

impl MfxField {
    /// Address field in the smallest fitting format.
    pub fn address(address: u16) -> Self {
        MfxField::Address {
            format: MfxAddressFormat::for_address(address),
            address,
        }
    }

    /// Appends the field bits.
    pub fn encode_into<const N: usize>(&self, bits: &mut BitString<N>) -> Result<(), PacketError> {
        let mut put = |value: u64, width: u8| push_checked(bits, value, width);
        match *self {
            MfxField::Address { format, address } => {
                let (prefix, width) = format.prefix();
                put(prefix, width)?;
                put(address as u64, format.width())
            }
            MfxField::Speed {
                forward,
                fine,
                value,
            } => {
                let tag = (fine as u64) << 1 | (!forward) as u64;
                put(tag, 4)?;
                put(value as u64, if fine { 7 } else { 3 })
            }
            MfxField::Functions4(v) => {
                put(0b010, 3)?;
                put(v as u64, 4)
            }
            MfxField::Functions8(v) => {
                put(6, 4)?;
                put(v as u64, 8)
            }
            MfxField::Functions16(v) => {
                put(7, 4)?;
                put(v as u64, 16)
            }
            MfxField::SingleFunction { number, on } => {
                put(0b100, 3)?;
                put(number as u64, 7)?;
                put(0, 1)?;
                put(on as u64, 1)
            }
            MfxField::ReadCv { cv, index, count } => {
                if !count.is_power_of_two() || count > 8 {
                    return Err(PacketError::FieldOverflow {
                        value: count as u64,
                        width: 2,
                    });
                }
                put(14, 4)?;
                put(0, 2)?;
                put(cv as u64, 10)?;
                put(index as u64, 6)?;
                put(count.trailing_zeros() as u64, 2)
            }
            MfxField::WriteCv { cv, index, value } => {
                put(14, 4)?;
                put(1, 2)?;
                put(cv as u64, 10)?;
                put(index as u64, 6)?;
                put(value as u64, 8)
            }
            MfxField::Search { bits: n, mask } => {
                put(14, 4)?;
                put(2, 2)?;
                put(n as u64, 6)?;
                put(mask as u64, 32)
            }
            MfxField::AssignAddress { address, uid } => {
                put(14, 4)?;
                put(3, 2)?;
                put(address as u64, 14)?;
                put(uid as u64, 32)
            }
            MfxField::Ping { uid } => {
                put(15, 4)?;
                put(0, 2)?;
                put(uid as u64, 32)
            }
            MfxField::Beacon { uid, option } => {
                put(15, 4)?;
                put(1, 2)?;
                put(uid as u64, 32)?;
                put(option as u64, 16)
            }
        }
    }

    /// Decodes the address field at bit 0; returns the field and its length.
    fn decode_address(bits: &FrameBits) -> Result<(Self, usize), MfxFieldError> {
        let read = |offset: usize, width: usize| {
            bits.field(offset, width)
                .ok_or(MfxFieldError::Truncated { at: 0 })
        };
        let tag = read(0, 4)? as u8;
        let (format, offset, used) = match tag {
            8..=11 => (MfxAddressFormat::A7, 2, 9),
            12 | 13 => (MfxAddressFormat::A9, 3, 12),
            14 => (MfxAddressFormat::A11, 4, 15),
            15 => (MfxAddressFormat::A14, 4, 18),
            _ => return Err(MfxFieldError::UnknownAddressFormat(tag)),
        };
        let address = read(offset, format.width() as usize)? as u16;
        Ok((MfxField::Address { format, address }, used))
    }

    /// Decodes a command field at `start`; returns the field and its length.
    fn decode_command(bits: &FrameBits, start: usize) -> Result<(Self, usize), MfxFieldError> {
        let read = |offset: usize, width: usize| {
            bits.field(start + offset, width)
                .ok_or(MfxFieldError::Truncated { at: start })
        };
        let tag = read(0, 4)? as u8;
        let decoded = match tag {
            0..=3 => {
                let fine = tag & 2 != 0;
                let width = if fine { 7 } else { 3 };
                let field = MfxField::Speed {
                    forward: tag & 1 == 0,
                    fine,
                    value: read(4, width)? as u8,
                };
                (field, 4 + width)
            }
            4 | 5 => (MfxField::Functions4(read(3, 4)? as u8), 7),
            6 => (MfxField::Functions8(read(4, 8)? as u8), 12),
            7 => (MfxField::Functions16(read(4, 16)? as u16), 20),
            8 | 9 => {
                let field = MfxField::SingleFunction {
                    number: read(3, 7)? as u8,
                    on: read(11, 1)? == 1,
                };
                (field, 12)
            }
            14 => match read(4, 2)? {
                0 => {
                    let field = MfxField::ReadCv {
                        cv: read(6, 10)? as u16,
                        index: read(16, 6)? as u8,
                        count: 1 << read(22, 2)?,
                    };
                    (field, 24)
                }
                1 => {
                    let field = MfxField::WriteCv {
                        cv: read(6, 10)? as u16,
                        index: read(16, 6)? as u8,
                        value: read(24, 8)? as u8,
                    };
                    (field, 32)
                }
                2 => {
                    let field = MfxField::Search {
                        bits: read(6, 6)? as u8,
                        mask: read(12, 32)? as u32,
                    };
                    (field, 44)
                }
                _ => {
                    let field = MfxField::AssignAddress {
                        address: read(6, 14)? as u16,
                        uid: read(20, 32)? as u32,
                    };
                    (field, 52)
                }
            },
            15 => match read(4, 2)? {
                0 => (
                    MfxField::Ping {
                        uid: read(6, 32)? as u32,
                    },
                    38,
                ),
                1 => {
                    let field = MfxField::Beacon {
                        uid: read(6, 32)? as u32,
                        option: read(38, 16)? as u16,
                    };
                    (field, 54)
                }
                sub => return Err(MfxFieldError::UnknownSubtype(sub as u8)),
            },
            _ => return Err(MfxFieldError::UnknownType(tag)),
        };
        Ok(decoded)
    }
}

/// Decodes all fields of a CRC-checked frame.
///
/// Decoding stops at the first error; fields decoded before it are kept.
/// Fields must end exactly where the 8 CRC bits start.
pub fn decode_fields(bits: &FrameBits) -> (MfxFields, Option<MfxFieldError>) {
    let mut fields = MfxFields::new();
    let len = bits.len();
    let mut start = 0;
    while start + 14 <= len {
        let decoded = if start == 0 {
            MfxField::decode_address(bits)
        } else {
            MfxField::decode_command(bits, start)
        };
        match decoded {
            Ok((field, used)) => {
                if fields.push(field).is_err() {
                    return (fields, Some(MfxFieldError::TooManyFields));
                }
                start += used;
            }
            Err(err) => return (fields, Some(err)),
        }
    }
    if start != 0 && start + 8 != len {
        return (fields, Some(MfxFieldError::Length { end: start, bits: len }));
    }
    (fields, None)
}

impl fmt::Display for MfxField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            MfxField::Address { format, address } => {
                write!(f, "A{:02}:{}", format.width(), address)
            }
            MfxField::Speed {
                forward,
                fine,
                value,
            } => write!(
                f,
                "{}{}:{}",
                if forward { "FWD" } else { "REV" },
                if fine { 7 } else { 3 },
                value
            ),
            MfxField::Functions4(v) => write!(f, "F04:{:X}", v),
            MfxField::Functions8(v) => write!(f, "F08:{:X}", v),
            MfxField::Functions16(v) => write!(f, "F16:{:X}", v),
            MfxField::SingleFunction { number, on } => {
                write!(f, "Func {} = {}", number, on as u8)
            }
            MfxField::ReadCv { cv, index, count } => write!(
                f,
                "READ CV 0x{:03X} from element 0x{:02X} {} byte(s)",
                cv, index, count
            ),
            MfxField::WriteCv { cv, index, value } => write!(
                f,
                "PROG CV 0x{:03X}, element 0x{:02X} = 0x{:02X}",
                cv, index, value
            ),
            MfxField::Search { bits, mask } => {
                write!(f, "SEARCH {} bits of UID mask 0x{:X}", bits, mask)
            }
            MfxField::AssignAddress { address, uid } => {
                write!(f, "ASSIGN address {} to UID 0x{:X}", address, uid)
            }
            MfxField::Ping { uid } => write!(f, "PING 0x{:X}", uid),
            MfxField::Beacon { uid, option } => {
                write!(f, "BEACON 0x{:X}, opt 0x{:X}", uid, option)
            }
        }
    }
}

// ============================================================================
// Frames
// ============================================================================

/// Result of one MFX frame.
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum MfxOutcome {
    /// CRC remainder not zero; fields not decoded.
    CrcError {
        /// CRC over all frame bits.
        remainder: u8,
    },
    /// Decoded fields, with the error that stopped decoding if any.
    Decoded {
        /// Fields in frame order.
        fields: MfxFields,
        /// Decoding error.
        error: Option<MfxFieldError>,
    },
    /// Short pulses in the reply window after a CV read.
    ReplyWindow,
    /// Frame too long or with a clock inside the data.
    Malformed,
}

/// One MFX frame.
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct MfxFrame {
    /// Start of the segment in milliseconds.
    pub start_ms: i64,
    /// Destuffed frame bits including CRC.
    pub bits: FrameBits,
    /// Decoded content.
    pub outcome: MfxOutcome,
}

impl MfxFrame {
    /// Fields of a frame that decoded without error.
    pub fn fields(&self) -> Option<&[MfxField]> {
        match &self.outcome {
            MfxOutcome::Decoded {
                fields,
                error: None,
            } => Some(fields),
            _ => None,
        }
    }

    /// Locomotive address and packet to keep refreshing: an error-free frame
    /// addressed to a pool address with at least one command.
    pub fn packet(&self) -> Option<(u16, MfxPacket)> {
        let fields = self.fields()?;
        let address = match fields.first()? {
            MfxField::Address { address, .. } if *address <= MFX_MAX_ADDRESS => *address,
            _ => return None,
        };
        if fields.len() < 2 {
            return None;
        }
        let packet = MfxPacket::from_bits(self.bits.iter()).ok()?;
        Some((address, packet))
    }
}

impl fmt::Display for MfxFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:6} ms: MFX", self.start_ms)?;
        match &self.outcome {
            MfxOutcome::CrcError { remainder } => write!(f, " CRC error ({:02x})", remainder),
            MfxOutcome::Decoded { fields, error } => {
                for field in fields {
                    write!(f, " {}", field)?;
                }
                match error {
                    Some(err) => write!(f, " ({}) {}", err, self.bits),
                    None => Ok(()),
                }
            }
            MfxOutcome::ReplyWindow => f.write_str(" reply window"),
            MfxOutcome::Malformed => write!(f, " malformed ({} bits)", self.bits.len()),
        }
    }
}

// ============================================================================
// Line state
// ============================================================================

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Symbol {
    Zero,
    One,
    Clock,
    Flag,
}

/// Frames of one segment.
pub(crate) type SegmentFrames = Vec<MfxFrame, MAX_FRAMES>;

/// Symbol line of the MFX sub-decoder.
#[derive(Clone, Debug, Default)]
pub(crate) struct MfxState {
    active: bool,
    start_ms: i64,
    line: Vec<Symbol, LINE_CAPACITY>,
    /// Symbols were lost because the line was full.
    overflow: bool,
    awaiting_reply: bool,
}

/// Frame assembly while scanning a line.
#[derive(Default)]
struct FrameBuffer {
    symbols: Vec<Symbol, FRAME_CAPACITY>,
    overflow: bool,
    ones: u8,
}

impl MfxState {
    /// Starts a new segment at a gap.
    pub(crate) fn begin(&mut self, start_ms: i64) {
        self.active = true;
        self.start_ms = start_ms;
        self.line.clear();
        self.overflow = false;
    }

    /// Appends one pulse to the line.
    pub(crate) fn sample(&mut self, duration_us: i64) {
        if !self.active {
            return;
        }
        let symbol = if duration_us > CLOCK_MAX_US {
            Symbol::Zero
        } else {
            Symbol::Clock
        };
        if symbol == Symbol::Clock {
            if let Some(last) = self.line.last_mut() {
                if *last == Symbol::Clock {
                    *last = Symbol::One;
                    return;
                }
            }
        }
        if self.line.push(symbol).is_err() {
            self.overflow = true;
        }
    }

    /// Splits the finished segment into frames.
    ///
    /// Returns `None` when the segment is not MFX.
    pub(crate) fn flush(&mut self) -> Option<SegmentFrames> {
        if !self.active || self.line.is_empty() {
            return None;
        }
        let mut frames = SegmentFrames::new();
        let len = self.line.len();
        if self.line.get(2) != Some(&Symbol::Clock) {
            if !self.awaiting_reply {
                return None;
            }
            if len < 3 {
                push_frame(&mut frames, self.frame(FrameBits::new(), MfxOutcome::ReplyWindow));
                return Some(frames);
            }
        }

        for i in 1..len {
            let line = &self.line;
            if line[i] == Symbol::Clock
                && line[i - 1] == Symbol::Zero
                && (i + 1 == len || line[i + 1] == Symbol::Zero)
            {
                let end = (i + 2).min(len);
                for symbol in &mut self.line[i - 1..end] {
                    *symbol = Symbol::Flag;
                }
            }
        }

        let mut buffer = FrameBuffer::default();
        let mut closed = false;
        for i in 1..len {
            let symbol = self.line[i];
            if symbol != Symbol::Flag {
                if symbol == Symbol::One {
                    buffer.ones = buffer.ones.saturating_add(1);
                }
                if !(buffer.ones == STUFF_AFTER_ONES && symbol == Symbol::Zero)
                    && buffer.symbols.push(symbol).is_err()
                {
                    buffer.overflow = true;
                }
                if symbol == Symbol::Zero {
                    buffer.ones = 0;
                }
                closed = symbol == Symbol::Clock;
            } else if !closed {
                if let Some(frame) = self.close(&buffer) {
                    push_frame(&mut frames, frame);
                }
                buffer = FrameBuffer::default();
                closed = true;
            }
        }

        if self.overflow {
            // the closing flag was lost with the tail of the line
            log::warn!("MFX segment longer than {} symbols", LINE_CAPACITY);
            buffer.overflow = true;
            let frame = if closed { None } else { self.close(&buffer) };
            push_frame(
                &mut frames,
                frame.unwrap_or_else(|| self.frame(FrameBits::new(), MfxOutcome::Malformed)),
            );
        }
        Some(frames)
    }

    fn close(&mut self, buffer: &FrameBuffer) -> Option<MfxFrame> {
        self.awaiting_reply = false;
        let first = *buffer.symbols.first()?;
        if first == Symbol::Clock {
            return None;
        }
        let mut bits = FrameBits::new();
        for symbol in &buffer.symbols {
            if *symbol == Symbol::Clock {
                return Some(self.frame(bits, MfxOutcome::Malformed));
            }
            let pushed = bits.push(*symbol == Symbol::One).is_ok();
            debug_assert!(pushed, "bit capacity equals the symbol buffer");
        }
        if buffer.overflow {
            log::warn!("MFX frame longer than {} bits", FRAME_CAPACITY);
            return Some(self.frame(bits, MfxOutcome::Malformed));
        }
        let remainder = mfx_crc(bits.iter());
        if remainder != 0 {
            log::warn!("MFX CRC error, remainder {:02x}", remainder);
            return Some(self.frame(bits, MfxOutcome::CrcError { remainder }));
        }
        let (fields, error) = decode_fields(&bits);
        match error {
            Some(MfxFieldError::Length { .. }) | Some(MfxFieldError::Truncated { .. }) => {
                log::warn!("MFX {:?}", error)
            }
            Some(err) => log::debug!("MFX {}", err),
            None => {}
        }
        self.awaiting_reply = fields
            .iter()
            .any(|field| matches!(field, MfxField::ReadCv { .. }));
        Some(self.frame(bits, MfxOutcome::Decoded { fields, error }))
    }

    fn frame(&self, bits: FrameBits, outcome: MfxOutcome) -> MfxFrame {
        MfxFrame {
            start_ms: self.start_ms,
            bits,
            outcome,
        }
    }
}

fn push_frame(frames: &mut SegmentFrames, frame: MfxFrame) {
    if frames.push(frame).is_err() {
        log::warn!("more than {} MFX frames in one segment", MAX_FRAMES);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::MfxPacketBuilder;

    fn frame_bits(fields: &[MfxField]) -> FrameBits {
        let mut builder = MfxPacketBuilder::new();
        for field in fields {
            builder = builder.field(field).unwrap();
        }
        let packet = builder.finish().unwrap();
        let mut bits = FrameBits::new();
        for bit in packet.bits() {
            bits.push(bit).unwrap();
        }
        bits
    }

    #[test]
    fn crc_of_appended_remainder_is_zero() {
        let payload = [true, false, true, true, false, false, true, true, true];
        let crc = mfx_crc(payload.iter().copied().chain([false; 8]));
        let crc_bits = (0..8).rev().map(|k| (crc >> k) & 1 == 1);
        assert!(crc_ok(payload.iter().copied().chain(crc_bits)));
    }

    #[test]
    fn crc_detects_every_single_bit_flip() {
        let bits = frame_bits(&[MfxField::address(5), MfxField::Functions8(0xA5)]);
        for i in 0..bits.len() {
            let flipped = bits.iter().enumerate().map(|(j, b)| if i == j { !b } else { b });
            assert!(!crc_ok(flipped), "flip at {}", i);
        }
    }

    #[test]
    fn fields_round_trip() {
        let fields = [
            MfxField::address(300),
            MfxField::Speed {
                forward: false,
                fine: true,
                value: 77,
            },
            MfxField::Functions4(0b1010),
            MfxField::SingleFunction { number: 20, on: true },
        ];
        let bits = frame_bits(&fields);
        let (decoded, error) = decode_fields(&bits);
        assert_eq!(error, None);
        assert_eq!(decoded.as_slice(), &fields);
    }

    #[test]
    fn identification_commands_round_trip() {
        for command in [
            MfxField::ReadCv {
                cv: 0x123,
                index: 5,
                count: 4,
            },
            MfxField::WriteCv {
                cv: 7,
                index: 63,
                value: 0xAB,
            },
            MfxField::Search {
                bits: 12,
                mask: 0xDEAD_BEEF,
            },
            MfxField::AssignAddress {
                address: 9,
                uid: 0x7654_3210,
            },
            MfxField::Ping { uid: 0x0102_0304 },
            MfxField::Beacon {
                uid: 0xCAFE_F00D,
                option: 0x1234,
            },
        ] {
            let bits = frame_bits(&[MfxField::address(0), command]);
            let (decoded, error) = decode_fields(&bits);
            assert_eq!(error, None, "{:?}", command);
            assert_eq!(decoded.as_slice(), &[MfxField::address(0), command]);
        }
    }

    #[test]
    fn address_formats_by_size() {
        assert_eq!(MfxAddressFormat::for_address(127), MfxAddressFormat::A7);
        assert_eq!(MfxAddressFormat::for_address(128), MfxAddressFormat::A9);
        assert_eq!(MfxAddressFormat::for_address(2047), MfxAddressFormat::A11);
        assert_eq!(MfxAddressFormat::for_address(2048), MfxAddressFormat::A14);
    }

    #[test]
    fn unknown_type_keeps_earlier_fields() {
        let mut bits = FrameBits::new();
        // A7 address 3, then type 10 (unassigned), padding, 8 CRC bits
        bits.push_field(0b10, 2).unwrap();
        bits.push_field(3, 7).unwrap();
        bits.push_field(10, 4).unwrap();
        bits.push_field(0, 18).unwrap();
        let (fields, error) = decode_fields(&bits);
        assert_eq!(fields.as_slice(), &[MfxField::address(3)]);
        assert_eq!(error, Some(MfxFieldError::UnknownType(10)));
    }

    #[test]
    fn unknown_address_format() {
        let mut bits = FrameBits::new();
        bits.push_field(0, 20).unwrap();
        let (fields, error) = decode_fields(&bits);
        assert!(fields.is_empty());
        assert_eq!(error, Some(MfxFieldError::UnknownAddressFormat(0)));
    }

    #[test]
    fn length_error_when_fields_miss_crc_position() {
        let mut bits = FrameBits::new();
        // A7 address + F04 + 9 trailing bits
        bits.push_field(0b10, 2).unwrap();
        bits.push_field(1, 7).unwrap();
        bits.push_field(0b010, 3).unwrap();
        bits.push_field(0xF, 4).unwrap();
        bits.push_field(0, 9).unwrap();
        let (fields, error) = decode_fields(&bits);
        assert_eq!(fields.len(), 2);
        assert_eq!(error, Some(MfxFieldError::Length { end: 16, bits: 25 }));
    }

    #[test]
    fn beacon_past_frame_end_is_truncated() {
        let mut bits = FrameBits::new();
        bits.push_field(0b10, 2).unwrap();
        bits.push_field(1, 7).unwrap();
        bits.push_field(15, 4).unwrap();
        bits.push_field(1, 2).unwrap();
        bits.push_field(0, 20).unwrap();
        let (_, error) = decode_fields(&bits);
        assert_eq!(error, Some(MfxFieldError::Truncated { at: 9 }));
    }

    #[test]
    fn read_cv_rejects_odd_count() {
        let mut bits: BitString<64> = BitString::new();
        let field = MfxField::ReadCv {
            cv: 1,
            index: 0,
            count: 3,
        };
        assert!(field.encode_into(&mut bits).is_err());
    }

    #[test]
    fn packet_only_for_pool_addresses_with_commands() {
        let frame = |fields: &[MfxField]| {
            let bits = frame_bits(fields);
            let (fields, error) = decode_fields(&bits);
            MfxFrame {
                start_ms: 0,
                bits,
                outcome: MfxOutcome::Decoded { fields, error },
            }
        };
        let drive = frame(&[
            MfxField::address(12),
            MfxField::Speed {
                forward: true,
                fine: true,
                value: 3,
            },
        ]);
        assert_eq!(drive.packet().map(|(a, _)| a), Some(12));
        assert!(frame(&[MfxField::address(12)]).packet().is_none());
        let far = frame(&[MfxField::address(1000), MfxField::Functions8(1)]);
        assert!(far.packet().is_none());
    }
}
