//! Sensor feedback handoff.
//!
//! Two producers (the external feedback bus and the local feedback line)
//! hand reports to one consumer. Each source owns a single slot guarded by a
//! ready flag:
//!
//! - the producer fills the slot and raises the flag with `Release`
//! - the consumer observes the flag with `Acquire`, copies the payload and
//!   clears the flag
//!
//! Producers never block; publishing into a slot that still holds an
//! unconsumed report fails with [`FeedbackError::Busy`]. No ordering is
//! guaranteed between the two sources.
//!
//! ```rust
//! use rs_ddl::feedback::{FeedbackChannel, FeedbackReport};
//!
//! let channel = FeedbackChannel::new();
//! channel.publish_local([1, 2, 3, 4, 5, 6]).unwrap();
//!
//! match channel.poll() {
//!     Some(FeedbackReport::Local(report)) => assert_eq!(report.payload, [1, 2, 3, 4, 5, 6]),
//!     other => panic!("unexpected {:?}", other),
//! }
//! assert!(channel.poll().is_none());
//! ```

use core::sync::atomic::{AtomicBool, AtomicU32, AtomicU8, Ordering};

use heapless::Vec;

use crate::error::{FeedbackError, FeedbackSource};

/// Largest payload of one bus report.
pub const BUS_PAYLOAD_MAX: usize = 6;

/// Payload length of a local report.
pub const LOCAL_PAYLOAD_LEN: usize = 6;

/// Report from the external feedback bus.
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct BusFeedback {
    /// UID of the reporting booster.
    pub booster: u32,
    /// Report payload.
    pub payload: Vec<u8, BUS_PAYLOAD_MAX>,
    /// More parts of a multi-part report follow.
    pub collecting: bool,
}

/// Report from the local feedback line.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct LocalFeedback {
    /// Report payload.
    pub payload: [u8; LOCAL_PAYLOAD_LEN],
}

/// A report from either source.
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum FeedbackReport {
    /// From the feedback bus.
    Bus(BusFeedback),
    /// From the local line.
    Local(LocalFeedback),
}

impl FeedbackReport {
    /// Source of this report.
    pub fn source(&self) -> FeedbackSource {
        match self {
            FeedbackReport::Bus(_) => FeedbackSource::Bus,
            FeedbackReport::Local(_) => FeedbackSource::Local,
        }
    }
}

/// One single-producer/single-consumer payload slot.
#[derive(Debug)]
struct Slot<const N: usize> {
    ready: AtomicBool,
    len: AtomicU8,
    bytes: [AtomicU8; N],
}

impl<const N: usize> Slot<N> {
    fn new() -> Self {
        Self {
            ready: AtomicBool::new(false),
            len: AtomicU8::new(0),
            bytes: core::array::from_fn(|_| AtomicU8::new(0)),
        }
    }

    /// Stores `data` unless the previous report is still pending.
    ///
    /// `extra` runs after the payload is written and before the flag is
    /// raised, for producer-specific header fields.
    fn publish(&self, data: &[u8], extra: impl FnOnce()) -> bool {
        if self.ready.load(Ordering::Acquire) {
            return false;
        }
        for (cell, byte) in self.bytes.iter().zip(data) {
            cell.store(*byte, Ordering::Relaxed);
        }
        self.len.store(data.len() as u8, Ordering::Relaxed);
        extra();
        self.ready.store(true, Ordering::Release);
        true
    }

    /// Copies out the pending payload and clears the flag.
    ///
    /// `extra` runs before the flag is cleared.
    fn take<R>(&self, extra: impl FnOnce(&[AtomicU8; N], usize) -> R) -> Option<R> {
        if !self.ready.load(Ordering::Acquire) {
            return None;
        }
        let len = (self.len.load(Ordering::Relaxed) as usize).min(N);
        let report = extra(&self.bytes, len);
        self.ready.store(false, Ordering::Release);
        Some(report)
    }

    fn is_pending(&self) -> bool {
        self.ready.load(Ordering::Acquire)
    }
}

/// Feedback handoff shared by both producers and the consumer.
#[derive(Debug)]
pub struct FeedbackChannel {
    bus: Slot<BUS_PAYLOAD_MAX>,
    bus_booster: AtomicU32,
    bus_collecting: AtomicBool,
    local: Slot<LOCAL_PAYLOAD_LEN>,
}

impl Default for FeedbackChannel {
    fn default() -> Self {
        Self::new()
    }
}

impl FeedbackChannel {
    /// Creates a channel with both slots empty.
    pub fn new() -> Self {
        Self {
            bus: Slot::new(),
            bus_booster: AtomicU32::new(0),
            bus_collecting: AtomicBool::new(false),
            local: Slot::new(),
        }
    }

    /// Publishes a feedback bus report.
    pub fn publish_bus(
        &self,
        booster: u32,
        payload: &[u8],
        collecting: bool,
    ) -> Result<(), FeedbackError> {
        if payload.len() > BUS_PAYLOAD_MAX {
            return Err(FeedbackError::PayloadTooLong {
                len: payload.len(),
                max: BUS_PAYLOAD_MAX,
            });
        }
        let published = self.bus.publish(payload, || {
            self.bus_booster.store(booster, Ordering::Relaxed);
            self.bus_collecting.store(collecting, Ordering::Relaxed);
        });
        if published {
            Ok(())
        } else {
            Err(FeedbackError::Busy(FeedbackSource::Bus))
        }
    }

    /// Publishes a local line report.
    pub fn publish_local(&self, payload: [u8; LOCAL_PAYLOAD_LEN]) -> Result<(), FeedbackError> {
        if self.local.publish(&payload, || {}) {
            Ok(())
        } else {
            Err(FeedbackError::Busy(FeedbackSource::Local))
        }
    }

    /// Takes the pending bus report, if any.
    pub fn poll_bus(&self) -> Option<BusFeedback> {
        self.bus.take(|bytes, len| {
            let mut payload = Vec::new();
            for cell in &bytes[..len] {
                let pushed = payload.push(cell.load(Ordering::Relaxed)).is_ok();
                debug_assert!(pushed, "len is clamped to the slot size");
            }
            BusFeedback {
                booster: self.bus_booster.load(Ordering::Relaxed),
                payload,
                collecting: self.bus_collecting.load(Ordering::Relaxed),
            }
        })
    }

    /// Takes the pending local report, if any.
    pub fn poll_local(&self) -> Option<LocalFeedback> {
        self.local.take(|bytes, _| LocalFeedback {
            payload: core::array::from_fn(|i| bytes[i].load(Ordering::Relaxed)),
        })
    }

    /// Takes one pending report, bus first.
    pub fn poll(&self) -> Option<FeedbackReport> {
        self.poll_bus()
            .map(FeedbackReport::Bus)
            .or_else(|| self.poll_local().map(FeedbackReport::Local))
    }

    /// Whether a report from `source` awaits the consumer.
    pub fn is_pending(&self, source: FeedbackSource) -> bool {
        match source {
            FeedbackSource::Bus => self.bus.is_pending(),
            FeedbackSource::Local => self.local.is_pending(),
        }
    }
}
