//! Address translation tables.
//!
//! # Motorola trits
//!
//! A Motorola address is sent as four trits, each as two line bits. The
//! first transmitted bit of the frame is the least significant bit of the
//! raw address byte:
//!
//! | Trit | Line bits | Value |
//! |------|-----------|-------|
//! | 0    | `0 0`     | 0     |
//! | 1    | `1 1`     | 1     |
//! | open | `1 0`     | 2     |
//!
//! The first trit is the least significant ternary digit and a ternary value
//! of 0 means address 80. The pair `0 1` is not a valid trit.
//!
//! ```rust
//! use rs_ddl::address::{motorola_address, motorola_raw};
//!
//! assert_eq!(motorola_raw(24), Some(0x14));
//! assert_eq!(motorola_address(0x14), Some(24));
//! assert_eq!(motorola_address(0x00), Some(80));
//! assert_eq!(motorola_address(0x02), None); // `0 1` pair
//! ```

/// Highest Motorola locomotive address.
pub const MOTOROLA_MAX_LOCO: u8 = 80;

/// Marker for raw patterns containing an invalid trit.
const INVALID: u8 = 0xFF;

/// Raw address byte -> Motorola address (or [`INVALID`]).
static MOTOROLA_DECODE: [u8; 256] = build_decode_table();

/// Motorola address (0..=80) -> raw address byte.
static MOTOROLA_ENCODE: [u8; 81] = build_encode_table();

const fn trit_value(pair: u8) -> Option<u8> {
    match pair {
        0b00 => Some(0),
        0b11 => Some(1),
        0b01 => Some(2),
        _ => None,
    }
}

const fn build_decode_table() -> [u8; 256] {
    let mut table = [INVALID; 256];
    let mut raw = 0usize;
    while raw < 256 {
        let mut value = 0u8;
        let mut weight = 1u8;
        let mut k = 0;
        let mut valid = true;
        while k < 4 {
            match trit_value(((raw >> (2 * k)) & 0b11) as u8) {
                Some(t) => value += t * weight,
                None => valid = false,
            }
            if k < 3 {
                weight *= 3;
            }
            k += 1;
        }
        if valid {
            table[raw] = if value == 0 { MOTOROLA_MAX_LOCO } else { value };
        }
        raw += 1;
    }
    table
}

const fn build_encode_table() -> [u8; 81] {
    let mut table = [0u8; 81];
    let mut address = 1usize;
    // Address 0 and 80 share the all-zero pattern.
    while address < 80 {
        let mut rest = address;
        let mut raw = 0u8;
        let mut k = 0;
        while k < 4 {
            let pair = match rest % 3 {
                0 => 0b00,
                1 => 0b11,
                _ => 0b01,
            };
            raw |= pair << (2 * k);
            rest /= 3;
            k += 1;
        }
        table[address] = raw;
        address += 1;
    }
    table
}

/// Translates a raw 8-bit address pattern into a Motorola address (1..=80).
///
/// Returns `None` when the pattern contains an invalid trit.
pub fn motorola_address(raw: u8) -> Option<u8> {
    match MOTOROLA_DECODE[raw as usize] {
        INVALID => None,
        address => Some(address),
    }
}

/// Translates a Motorola address (0..=80) into its raw 8-bit pattern.
///
/// Address 0 (accessory base address) and 80 both use the all-zero pattern.
pub fn motorola_raw(address: u8) -> Option<u8> {
    MOTOROLA_ENCODE.get(address as usize).copied()
}

/// Highest DCC short (basic) locomotive address.
pub const DCC_MAX_SHORT: u16 = 127;

/// Highest DCC long (extended) locomotive address.
pub const DCC_MAX_LONG: u16 = 10239;

/// Offset of long addresses in the DCC pool index space.
///
/// Index 0 is broadcast/idle, 1..=127 are short addresses and long address
/// `n` lives at `n + 128`.
pub const DCC_LONG_INDEX_OFFSET: u16 = 128;

/// DCC locomotive address as carried in the address byte(s).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum DccAddress {
    /// One-byte address (1..=127).
    Short(u8),
    /// Two-byte address (0..=10239).
    Long(u16),
}

impl DccAddress {
    /// Index into the DCC packet pool.
    ///
    /// ```rust
    /// use rs_ddl::address::DccAddress;
    ///
    /// assert_eq!(DccAddress::Short(3).pool_index(), 3);
    /// assert_eq!(DccAddress::Long(3).pool_index(), 131);
    /// ```
    pub const fn pool_index(self) -> u16 {
        match self {
            DccAddress::Short(a) => a as u16,
            DccAddress::Long(a) => a + DCC_LONG_INDEX_OFFSET,
        }
    }

    /// Address bytes as sent on the rails.
    pub fn to_bytes(self) -> heapless::Vec<u8, 2> {
        let mut bytes = heapless::Vec::new();
        let fits = match self {
            DccAddress::Short(a) => bytes.push(a & 0x7F).is_ok(),
            DccAddress::Long(a) => {
                bytes.push(0xC0 | ((a >> 8) as u8 & 0x3F)).is_ok()
                    && bytes.push((a & 0xFF) as u8).is_ok()
            }
        };
        debug_assert!(fits, "a DCC address has at most two bytes");
        bytes
    }
}

impl core::fmt::Display for DccAddress {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            DccAddress::Short(a) => write!(f, "K{:3}", a),
            DccAddress::Long(a) => write!(f, "L{:3}", a),
        }
    }
}
