//! Bounded bit string used by the MFX decoder and packet builder.
//!
//! Every write is checked against the fixed capacity `N`; a write past the
//! end returns [`BitOverflow`] instead of truncating silently.

use heapless::Vec;

/// Returned when a [`BitString`] is full.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BitOverflow;

/// A sequence of at most `N` bits, most significant bit first.
///
/// ```rust
/// use rs_ddl::bits::BitString;
///
/// let mut bits: BitString<16> = BitString::new();
/// bits.push_field(0b1011, 4).unwrap();
/// assert_eq!(bits.len(), 4);
/// assert_eq!(bits.field(1, 3), Some(0b011));
/// assert_eq!(bits.field(2, 3), None); // reads past the end
/// ```
#[derive(Clone, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct BitString<const N: usize> {
    bits: Vec<bool, N>,
}

impl<const N: usize> BitString<N> {
    /// Creates an empty bit string.
    pub const fn new() -> Self {
        Self { bits: Vec::new() }
    }

    /// Appends one bit.
    pub fn push(&mut self, bit: bool) -> Result<(), BitOverflow> {
        self.bits.push(bit).map_err(|_| BitOverflow)
    }

    /// Appends the low `width` bits of `value`, most significant first.
    ///
    /// Nothing is written when the field does not fit.
    pub fn push_field(&mut self, value: u64, width: u8) -> Result<(), BitOverflow> {
        if width > 64 || self.bits.len() + width as usize > N {
            return Err(BitOverflow);
        }
        for shift in (0..width).rev() {
            self.push((value >> shift) & 1 == 1)?;
        }
        Ok(())
    }

    /// Reads `width` bits starting at `start` as an unsigned value.
    ///
    /// Returns `None` when the range reaches past the end or `width > 64`.
    pub fn field(&self, start: usize, width: usize) -> Option<u64> {
        if width > 64 || start.checked_add(width)? > self.bits.len() {
            return None;
        }
        Some(
            self.bits[start..start + width]
                .iter()
                .fold(0u64, |acc, &bit| (acc << 1) | bit as u64),
        )
    }

    /// Bit at `index`.
    pub fn get(&self, index: usize) -> Option<bool> {
        self.bits.get(index).copied()
    }

    /// Number of bits stored.
    pub fn len(&self) -> usize {
        self.bits.len()
    }

    /// Returns true if no bits are stored.
    pub fn is_empty(&self) -> bool {
        self.bits.is_empty()
    }

    /// Capacity in bits.
    pub const fn capacity(&self) -> usize {
        N
    }

    /// Removes all bits.
    pub fn clear(&mut self) {
        self.bits.clear();
    }

    /// Iterates over the bits in order.
    pub fn iter(&self) -> impl Iterator<Item = bool> + '_ {
        self.bits.iter().copied()
    }

    /// Bits as a slice.
    pub fn as_slice(&self) -> &[bool] {
        &self.bits
    }
}

impl<const N: usize> core::fmt::Display for BitString<N> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        for bit in self.iter() {
            f.write_str(if bit { "1" } else { "0" })?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn push_past_capacity_fails() {
        let mut bits: BitString<2> = BitString::new();
        assert!(bits.push(true).is_ok());
        assert!(bits.push(false).is_ok());
        assert_eq!(bits.push(true), Err(BitOverflow));
        assert_eq!(bits.len(), 2);
    }

    #[test]
    fn push_field_is_all_or_nothing() {
        let mut bits: BitString<8> = BitString::new();
        bits.push_field(0b111, 3).unwrap();
        assert_eq!(bits.push_field(0b111111, 6), Err(BitOverflow));
        assert_eq!(bits.len(), 3);
    }

    #[test]
    fn field_reads_msb_first() {
        let mut bits: BitString<32> = BitString::new();
        bits.push_field(0xA5, 8).unwrap();
        assert_eq!(bits.field(0, 8), Some(0xA5));
        assert_eq!(bits.field(0, 4), Some(0xA));
        assert_eq!(bits.field(4, 4), Some(0x5));
        assert_eq!(bits.field(7, 2), None);
    }

    #[test]
    fn display_renders_ones_and_zeros() {
        let mut bits: BitString<8> = BitString::new();
        bits.push_field(0b1001, 4).unwrap();
        assert_eq!(format!("{}", bits), "1001");
    }
}
