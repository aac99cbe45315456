//! # rs-ddl
//!
//! Decoder, packet pool and refresh scheduler for the digital command
//! protocols of model railways: Maerklin-Motorola (MM1/MM2), NMRA-DCC and
//! Maerklin MFX.
//!
//! ## Features
//!
//! - **Pulse decoder**: reconstructs Motorola, DCC and MFX frames from timed
//!   signal transitions in a single pass, checksums and CRCs included
//! - **Packet pool**: last command per protocol and address, shared between
//!   the decode path and the refresh path
//! - **Refresh scheduler**: fair fast/normal rotation over all known
//!   addresses of the enabled protocols
//! - **Feedback channel**: lock-free handoff of booster and local sensor
//!   reports
//!
//! ## Architecture
//!
//! The crate is structured to allow testing on desktop without hardware:
//!
//! - `decoder` - Pulse classification and the three protocol sub-decoders
//! - `packet` - Transmit-ready packet types and the [`Packet`] trait
//! - `pool` - Per-protocol packet pools (requires `std`)
//! - `refresh` - Refresh scheduling (requires `std`)
//! - `feedback` - Sensor feedback slots
//! - `traits` - Hardware seams (pulse source, packet sink, clock)
//! - `hal` - Mock and host implementations of the traits (requires `std`)
//! - `services` - Shared bus state with decode and refresh runners (requires `std`)
//!
//! ## Example
//!
//! ```rust
//! use rs_ddl::decoder::{DecodeEvent, PulseDecoder};
//! use rs_ddl::decoder::motorola::MotorolaCommand;
//! use rs_ddl::hal::MockPulseSource;
//! use rs_ddl::packet::MotorolaPacket;
//!
//! // Synthesise the track signal of one MM1 frame
//! let mut source = MockPulseSource::new();
//! source.push_motorola(&MotorolaPacket::mm1(24, false, 5)).finish();
//!
//! // Decode it again
//! let mut decoder = PulseDecoder::new();
//! let mut frames = Vec::new();
//! for pulse in source.pulses() {
//!     frames.extend(decoder.feed(pulse));
//! }
//!
//! match &frames[..] {
//!     [DecodeEvent::Motorola(frame)] => assert_eq!(
//!         frame.command,
//!         MotorolaCommand::Mm1 { address: 24, function: 0, data: 5 }
//!     ),
//!     other => panic!("unexpected {:?}", other),
//! }
//! ```

#![cfg_attr(not(feature = "std"), no_std)]
#![warn(missing_docs)]

/// Motorola trit table and DCC address forms.
pub mod address;
/// Bounded bit strings.
pub mod bits;
/// Per-bus configuration.
pub mod config;
/// Pulse-driven track signal decoder.
pub mod decoder;
/// Error types.
pub mod error;
/// Sensor feedback handoff.
pub mod feedback;
/// Transmit-ready packets.
pub mod packet;
/// Hardware abstraction traits.
pub mod traits;

/// Hardware Abstraction Layer with mock implementations for testing.
#[cfg(feature = "std")]
pub mod hal;
/// Packet pools.
#[cfg(feature = "std")]
pub mod pool;
/// Refresh scheduling.
#[cfg(feature = "std")]
pub mod refresh;
/// Bus services.
#[cfg(feature = "std")]
pub mod services;

pub use config::BusConfig;
pub use decoder::{DecodeEvent, Direction, Pulse, PulseDecoder};
pub use error::{FeedbackError, FeedbackSource, PacketError, PoolError, PulseError};
pub use feedback::{FeedbackChannel, FeedbackReport};
pub use packet::{
    DccPacket, EnabledProtocols, MfxPacket, MotorolaPacket, Packet, PacketKind, Protocol,
    ProtocolPacket,
};

#[cfg(feature = "std")]
pub use pool::{BusPools, FrameSelector, PacketPool};
#[cfg(feature = "std")]
pub use refresh::{RefreshBatch, RefreshScheduler};
#[cfg(feature = "std")]
pub use services::{DecodeRunner, RefreshRunner, SharedBus};
