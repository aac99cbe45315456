//! Hardware Abstraction Layer implementations.
//!
//! This module contains concrete implementations of the traits
//! defined in [`crate::traits`].
//!
//! # Available Implementations
//!
//! - `mock`: Test doubles and signal synthesis for desktop development
//! - `system`: Host clock backed by `std::time::Instant`

pub mod mock;
pub mod system;

pub use mock::*;
pub use system::*;
