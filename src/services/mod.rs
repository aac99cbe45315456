//! Bus services: shared bus state plus the decode and refresh loops.
//!
//! Each bus owns one [`SharedBus`] wrapped in an `Arc`. The decode path and
//! the refresh path run in their own execution contexts and meet only in
//! the packet pools:
//!
//! ```rust
//! use std::sync::Arc;
//! use rs_ddl::config::BusConfig;
//! use rs_ddl::hal::{MockPulseSource, MockSink};
//! use rs_ddl::packet::MotorolaPacket;
//! use rs_ddl::services::{DecodeRunner, RefreshRunner, SharedBus};
//!
//! let bus = Arc::new(SharedBus::new(0, BusConfig::default()));
//!
//! let mut source = MockPulseSource::new();
//! source.push_motorola(&MotorolaPacket::mm1(24, false, 5)).finish();
//! DecodeRunner::new(Arc::clone(&bus), source).run(|_| {}).unwrap();
//!
//! let mut refresh = RefreshRunner::new(Arc::clone(&bus), MockSink::new());
//! refresh.poll().unwrap();
//! assert_eq!(refresh.sink().sent.len(), 1);
//! ```

pub mod decode_runner;
pub mod refresh_runner;
pub mod shared;

pub use decode_runner::*;
pub use refresh_runner::*;
pub use shared::*;
