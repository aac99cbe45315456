//! Trait definitions for hardware abstraction.
//!
//! This module defines the seams that let a bus run against real capture
//! and transmit hardware or against the mocks in [`crate::hal`].
//!
//! - [`PulseSource`]: captured track signal
//! - [`PacketSink`]: packet transmission
//! - [`Clock`]: time source for `no_std` environments

pub mod hardware;

pub use hardware::*;
