//! Refresh scheduling.
//!
//! Track decoders forget their last command unless it is repeated, so every
//! known address is re-sent in a fair rotation. Each [`RefreshScheduler::tick`]
//! walks four stages:
//!
//! 1. select protocol: round-robin over the enabled protocols, skipping those
//!    without known addresses
//! 2. select rotation: alternate between fast and normal; fast falls back to
//!    normal when no address of the protocol was updated recently
//! 3. select address: next known address after the rotation's cursor,
//!    ascending, wrapping to the smallest
//! 4. emit: fetch the packets and return them as a [`RefreshBatch`]
//!
//! A protocol hands over to the next enabled protocol once its normal cursor
//! has passed its largest known address.

use heapless::Vec;

use crate::config::BusConfig;
use crate::packet::{Packet, PacketKind, Protocol, WireBytes};
use crate::pool::{BusPools, PacketPool};

/// Packets per batch: one command packet plus up to four function packets.
pub const MAX_BATCH_PACKETS: usize = 5;

/// Refresh rotation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum Rotation {
    /// Addresses updated within the fast refresh window.
    Fast,
    /// All known addresses.
    Normal,
}

impl Rotation {
    const fn index(self) -> usize {
        match self {
            Rotation::Fast => 0,
            Rotation::Normal => 1,
        }
    }
}

/// One packet ready for the transmission layer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RefreshPacket {
    /// Transmission class.
    pub kind: PacketKind,
    /// Wire bytes.
    pub bytes: WireBytes,
    /// Protocol-mandated retransmit count.
    pub retransmits: u8,
}

/// Output of one scheduler tick.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RefreshBatch {
    /// Protocol served.
    pub protocol: Protocol,
    /// Address served.
    pub address: u16,
    /// Rotation that selected the address.
    pub rotation: Rotation,
    /// Command packet first, then function packets.
    pub packets: Vec<RefreshPacket, MAX_BATCH_PACKETS>,
}

/// Cursor state of the scheduler.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RefreshInfo {
    /// Protocol currently being served.
    pub active_protocol: Protocol,
    /// Whether the previous tick used the fast rotation.
    pub last_refresh_was_fast: bool,
    /// Last address sent, per protocol and rotation.
    last_sent: [[Option<u16>; 2]; 3],
    /// Completed normal passes per protocol.
    passes: [usize; 3],
}

impl Default for RefreshInfo {
    fn default() -> Self {
        Self {
            active_protocol: Protocol::Motorola,
            last_refresh_was_fast: false,
            last_sent: [[None; 2]; 3],
            passes: [0; 3],
        }
    }
}

impl RefreshInfo {
    /// Last address sent by `rotation` for `protocol`.
    pub fn last_address_sent(&self, protocol: Protocol, rotation: Rotation) -> Option<u16> {
        self.last_sent[protocol_index(protocol)][rotation.index()]
    }

    /// Completed normal passes of `protocol`.
    pub fn passes(&self, protocol: Protocol) -> usize {
        self.passes[protocol_index(protocol)]
    }
}

fn protocol_index(protocol: Protocol) -> usize {
    match protocol {
        Protocol::Motorola => 0,
        Protocol::Dcc => 1,
        Protocol::Mfx => 2,
    }
}

/// Fair refresh rotation over the pools of one bus.
#[derive(Clone, Debug, Default)]
pub struct RefreshScheduler {
    info: RefreshInfo,
}

impl RefreshScheduler {
    /// Creates a scheduler starting with the first enabled protocol.
    pub fn new() -> Self {
        Self::default()
    }

    /// Current cursor state.
    pub fn info(&self) -> &RefreshInfo {
        &self.info
    }

    /// Selects and fetches the next packets to refresh.
    ///
    /// Addresses whose packets have no wire encoding are passed over. Returns
    /// `None` when no enabled protocol has a sendable packet.
    pub fn tick(&mut self, pools: &BusPools, config: &BusConfig, now_ms: u64) -> Option<RefreshBatch> {
        let enabled = config.enabled_protocols;
        if !enabled.contains(self.info.active_protocol) {
            self.info.active_protocol = enabled.iter().next()?;
        }
        let fast_since = now_ms.saturating_sub(config.fast_refresh_window_ms);

        // every attempt moves a cursor or the protocol; this bounds a full
        // fast and normal pass over every enabled protocol
        let known: usize = enabled.iter().map(|p| pools.len(p)).sum();
        let attempts = enabled.count() + 2 * known;
        for _ in 0..attempts {
            let protocol = self.info.active_protocol;
            if pools.len(protocol) == 0 {
                self.advance_protocol(config);
                continue;
            }

            let rotation = self.select_rotation(pools, protocol, fast_since);
            let Some(address) = self.select_address(pools, protocol, rotation, fast_since) else {
                self.advance_protocol(config);
                continue;
            };

            let batch = self.emit(pools, config, protocol, address, rotation);
            if rotation == Rotation::Normal && pass_complete(pools, protocol, address) {
                self.info.passes[protocol_index(protocol)] += 1;
                self.advance_protocol(config);
            }
            match batch {
                Some(batch) => return Some(batch),
                None => continue,
            }
        }
        None
    }

    fn advance_protocol(&mut self, config: &BusConfig) {
        if let Some(next) = config
            .enabled_protocols
            .next_after(self.info.active_protocol)
        {
            self.info.active_protocol = next;
        }
    }

    fn select_rotation(&mut self, pools: &BusPools, protocol: Protocol, fast_since: u64) -> Rotation {
        let want_fast = !self.info.last_refresh_was_fast;
        let rotation = if want_fast && pools.next_after(protocol, None, Some(fast_since)).is_some() {
            Rotation::Fast
        } else {
            Rotation::Normal
        };
        self.info.last_refresh_was_fast = rotation == Rotation::Fast;
        rotation
    }

    fn select_address(
        &mut self,
        pools: &BusPools,
        protocol: Protocol,
        rotation: Rotation,
        fast_since: u64,
    ) -> Option<u16> {
        let cursor = &mut self.info.last_sent[protocol_index(protocol)][rotation.index()];
        let filter = match rotation {
            Rotation::Fast => Some(fast_since),
            Rotation::Normal => None,
        };
        let address = pools.next_after(protocol, *cursor, filter)?;
        *cursor = Some(address);
        Some(address)
    }

    fn emit(
        &self,
        pools: &BusPools,
        config: &BusConfig,
        protocol: Protocol,
        address: u16,
        rotation: Rotation,
    ) -> Option<RefreshBatch> {
        let turn = self.info.passes[protocol_index(protocol)];
        let repeats = config.repeats(protocol);
        let packets = match protocol {
            Protocol::Motorola => fetch(&pools.motorola, address, turn, repeats),
            Protocol::Dcc => fetch(&pools.dcc, address, turn, repeats),
            Protocol::Mfx => fetch(&pools.mfx, address, turn, repeats),
        }?;
        log::trace!(
            "refresh {} address {} ({:?}, {} packets)",
            protocol,
            address,
            rotation,
            packets.len()
        );
        Some(RefreshBatch {
            protocol,
            address,
            rotation,
            packets,
        })
    }
}

/// Whether `address` is the largest known address of `protocol`.
fn pass_complete(pools: &BusPools, protocol: Protocol, address: u16) -> bool {
    pools
        .next_after(protocol, Some(address), None)
        .map_or(true, |next| next <= address)
}

fn fetch<P: Packet>(
    pool: &PacketPool<P>,
    address: u16,
    turn: usize,
    retransmits: u8,
) -> Option<Vec<RefreshPacket, MAX_BATCH_PACKETS>> {
    let (packet, functions) = pool.refresh_packets(address, turn)?;
    let mut packets = Vec::new();
    let command = (packet.kind(), packet.wire_bytes());
    let functions = functions.iter().map(|f| (f.function_kind(), f.wire_bytes()));
    for (kind, bytes) in core::iter::once(command).chain(functions) {
        if bytes.is_empty() {
            log::warn!("{} address {} has no wire encoding", P::PROTOCOL, address);
            continue;
        }
        let pushed = packets
            .push(RefreshPacket {
                kind,
                bytes,
                retransmits,
            })
            .is_ok();
        debug_assert!(pushed, "one command and at most four function packets");
    }
    if packets.is_empty() {
        None
    } else {
        Some(packets)
    }
}
