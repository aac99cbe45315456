//! Error types for the recoverable failure paths of the crate.
//!
//! Decode-time problems (checksum mismatch, unknown instruction, length
//! errors) are not errors in this sense: they are reported as diagnostic
//! variants of [`DecodeEvent`](crate::decoder::DecodeEvent) and never stop
//! the decode loop. The types here cover invalid caller input and rejected
//! mutations of shared state.

use crate::packet::Protocol;

/// Invalid pulse record handed to the decoder.
#[derive(Clone, Copy, Debug, PartialEq, Eq, thiserror::Error)]
pub enum PulseError {
    /// Duration was zero or negative.
    #[error("pulse duration must be positive, got {0}us")]
    NonPositiveDuration(i64),
    /// Start time was negative.
    #[error("pulse start time must not be negative, got {0}ms")]
    NegativeStart(i64),
}

/// Rejected packet pool operation. The pool is left unchanged.
#[derive(Clone, Copy, Debug, PartialEq, Eq, thiserror::Error)]
pub enum PoolError {
    /// Address outside the protocol's address range.
    #[error("{protocol} address {address} outside 0..={max}")]
    AddressOutOfRange {
        /// Protocol of the pool.
        protocol: Protocol,
        /// Rejected address.
        address: u32,
        /// Highest valid address.
        max: u16,
    },

    /// The set of known addresses is already at capacity.
    #[error("{protocol} pool full ({capacity} known addresses)")]
    CapacityExceeded {
        /// Protocol of the pool.
        protocol: Protocol,
        /// Configured maximum number of known addresses.
        capacity: usize,
    },

    /// No packet stored for this address (or selector).
    #[error("no {protocol} packet for address {address}")]
    NotFound {
        /// Protocol of the pool.
        protocol: Protocol,
        /// Requested address.
        address: u16,
    },

    /// More function packets than the protocol stores per address.
    #[error("{protocol} stores at most {max} function packets, got {given}")]
    TooManyFunctionPackets {
        /// Protocol of the pool.
        protocol: Protocol,
        /// Maximum function packets per entry.
        max: usize,
        /// Number supplied by the caller.
        given: usize,
    },
}

/// Packet construction failure.
#[derive(Clone, Copy, Debug, PartialEq, Eq, thiserror::Error)]
pub enum PacketError {
    /// Packet would exceed its bounded buffer.
    #[error("{protocol} packet too long: {len} > {max}")]
    TooLong {
        /// Protocol of the packet.
        protocol: Protocol,
        /// Requested length (bytes for DCC, bits for MFX).
        len: usize,
        /// Capacity of the packet buffer.
        max: usize,
    },

    /// Packet has no content.
    #[error("empty {0} packet")]
    Empty(Protocol),

    /// DCC wire bytes whose last byte is not the XOR of the others.
    #[error("DCC checksum mismatch: computed {computed:#04x}, received {received:#04x}")]
    Checksum {
        /// XOR of all bytes but the last.
        computed: u8,
        /// Last byte of the packet.
        received: u8,
    },

    /// Field value does not fit into its bit width.
    #[error("value {value:#x} does not fit into {width} bits")]
    FieldOverflow {
        /// Supplied value.
        value: u64,
        /// Bit width of the field.
        width: u8,
    },
}

/// Feedback hand-off failure.
#[derive(Clone, Copy, Debug, PartialEq, Eq, thiserror::Error)]
pub enum FeedbackError {
    /// The consumer has not yet taken the previous report from this slot.
    #[error("{0} feedback slot still holds an unconsumed report")]
    Busy(FeedbackSource),
    /// Payload larger than the slot.
    #[error("feedback payload of {len} bytes exceeds {max}")]
    PayloadTooLong {
        /// Supplied payload length.
        len: usize,
        /// Slot capacity.
        max: usize,
    },
}

/// Producer side of the feedback channel.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum FeedbackSource {
    /// External feedback bus (boosters).
    Bus,
    /// Internal feedback receiver line.
    Local,
}

impl core::fmt::Display for FeedbackSource {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(match self {
            FeedbackSource::Bus => "bus",
            FeedbackSource::Local => "local",
        })
    }
}
