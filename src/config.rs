//! Per-bus configuration.
//!
//! Values are produced by an external loader once at bus initialisation;
//! this crate only reads them.
//!
//! # Example
//!
//! ```rust
//! use rs_ddl::config::BusConfig;
//! use rs_ddl::packet::{EnabledProtocols, Protocol};
//!
//! let config = BusConfig::default()
//!     .with_enabled_protocols(EnabledProtocols::NONE.with(Protocol::Dcc))
//!     .with_shortcut_delay_us(200_000);
//!
//! assert!(config.enabled_protocols.contains(Protocol::Dcc));
//! assert!(!config.enabled_protocols.contains(Protocol::Mfx));
//! assert!(config.check_short);
//! ```

use crate::packet::{EnabledProtocols, Protocol};

/// Default fast refresh window: addresses commanded within the last minute.
pub const DEFAULT_FAST_REFRESH_WINDOW_MS: u64 = 60_000;

/// Default spacing between two refresh packets.
pub const DEFAULT_REFRESH_SPACING_MS: u64 = 5;

// ============================================================================
// Bus Config
// ============================================================================

/// Configuration of one DDL bus
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct BusConfig {
    /// Protocols that take part in refresh
    pub enabled_protocols: EnabledProtocols,
    /// Offset added to decoded DCC accessory addresses (0 or 1)
    pub nmra_ga_offset: u16,
    /// Cut track power on a reported short circuit
    pub check_short: bool,
    /// Short circuit must persist this long before track power is cut
    pub shortcut_delay_us: u32,
    /// Addresses updated within this window get fast refresh
    pub fast_refresh_window_ms: u64,
    /// Spacing between refresh packets
    pub refresh_spacing_ms: u64,
    /// Retransmit count for Motorola packets
    pub motorola_repeats: u8,
    /// Retransmit count for DCC packets
    pub dcc_repeats: u8,
    /// Retransmit count for MFX packets
    pub mfx_repeats: u8,
    /// Maximum known Motorola addresses
    pub motorola_capacity: usize,
    /// Maximum known DCC addresses
    pub dcc_capacity: usize,
    /// Maximum known MFX addresses
    pub mfx_capacity: usize,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            enabled_protocols: EnabledProtocols::ALL,
            nmra_ga_offset: 1,
            check_short: true,
            shortcut_delay_us: 0,
            fast_refresh_window_ms: DEFAULT_FAST_REFRESH_WINDOW_MS,
            refresh_spacing_ms: DEFAULT_REFRESH_SPACING_MS,
            motorola_repeats: 2,
            dcc_repeats: 1,
            mfx_repeats: 1,
            motorola_capacity: full_range(Protocol::Motorola),
            dcc_capacity: full_range(Protocol::Dcc),
            mfx_capacity: full_range(Protocol::Mfx),
        }
    }
}

fn full_range(protocol: Protocol) -> usize {
    protocol.max_address() as usize + 1
}

impl BusConfig {
    /// Set the enabled protocol set
    pub fn with_enabled_protocols(mut self, protocols: EnabledProtocols) -> Self {
        self.enabled_protocols = protocols;
        self
    }

    /// Set the DCC accessory address offset
    pub fn with_nmra_ga_offset(mut self, offset: u16) -> Self {
        self.nmra_ga_offset = offset;
        self
    }

    /// Enable or disable short circuit detection
    pub fn with_check_short(mut self, check: bool) -> Self {
        self.check_short = check;
        self
    }

    /// Set short circuit delay
    pub fn with_shortcut_delay_us(mut self, delay_us: u32) -> Self {
        self.shortcut_delay_us = delay_us;
        self
    }

    /// Set the fast refresh window
    pub fn with_fast_refresh_window_ms(mut self, window_ms: u64) -> Self {
        self.fast_refresh_window_ms = window_ms;
        self
    }

    /// Set refresh packet spacing
    pub fn with_refresh_spacing_ms(mut self, spacing_ms: u64) -> Self {
        self.refresh_spacing_ms = spacing_ms;
        self
    }

    /// Set the retransmit count for one protocol
    pub fn with_repeats(mut self, protocol: Protocol, repeats: u8) -> Self {
        match protocol {
            Protocol::Motorola => self.motorola_repeats = repeats,
            Protocol::Dcc => self.dcc_repeats = repeats,
            Protocol::Mfx => self.mfx_repeats = repeats,
        }
        self
    }

    /// Set the pool capacity for one protocol
    pub fn with_capacity(mut self, protocol: Protocol, capacity: usize) -> Self {
        match protocol {
            Protocol::Motorola => self.motorola_capacity = capacity,
            Protocol::Dcc => self.dcc_capacity = capacity,
            Protocol::Mfx => self.mfx_capacity = capacity,
        }
        self
    }

    /// Retransmit count for `protocol`
    pub fn repeats(&self, protocol: Protocol) -> u8 {
        match protocol {
            Protocol::Motorola => self.motorola_repeats,
            Protocol::Dcc => self.dcc_repeats,
            Protocol::Mfx => self.mfx_repeats,
        }
    }

    /// Pool capacity for `protocol`
    pub fn capacity(&self, protocol: Protocol) -> usize {
        match protocol {
            Protocol::Motorola => self.motorola_capacity,
            Protocol::Dcc => self.dcc_capacity,
            Protocol::Mfx => self.mfx_capacity,
        }
    }
}
