//! Last-known packet per protocol and address.
//!
//! A [`PacketPool`] is shared between the path that stores new commands (the
//! decode runner or a command layer) and the refresh scheduler that keeps
//! re-sending them. The entry map and the set of known addresses live behind
//! one `Mutex`, so a reader never sees an address without its entry or the
//! other way round. Every lock is held for a single lookup or insert.
//!
//! # Example
//!
//! ```rust
//! use rs_ddl::pool::{FrameSelector, PacketPool};
//! use rs_ddl::packet::DccPacket;
//!
//! let pool: PacketPool<DccPacket> = PacketPool::new(16);
//! let packet = DccPacket::with_checksum(&[3, 0x76]).unwrap();
//! pool.update(3, packet.clone(), 1_000).unwrap();
//!
//! assert_eq!(pool.get(3, FrameSelector::Command).unwrap(), packet);
//! assert_eq!(pool.known_addresses(), vec![3]);
//! ```

use std::collections::{BTreeMap, BTreeSet};
use std::ops::Bound;
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::config::BusConfig;
use crate::error::PoolError;
use crate::packet::{DccPacket, MfxPacket, MotorolaPacket, Packet, Protocol};

/// Which packet of an entry to fetch.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FrameSelector {
    /// The speed/direction packet.
    Command,
    /// Function packet in slot `n`.
    Function(usize),
}

/// Stored state of one address.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PoolEntry<P> {
    /// Speed/direction packet.
    pub packet: P,
    /// Function packets, `P::MAX_FUNCTION_PACKETS` slots.
    pub functions: Vec<Option<P>>,
    /// Time of the last update in milliseconds.
    pub last_update_ms: u64,
}

impl<P: Packet> PoolEntry<P> {
    fn new(packet: P, now_ms: u64) -> Self {
        Self {
            packet,
            functions: vec![None; P::MAX_FUNCTION_PACKETS],
            last_update_ms: now_ms,
        }
    }

    /// Function packets sent on refresh visit number `turn`.
    ///
    /// Rotating protocols send one filled slot per visit in turn; the others
    /// send every filled slot.
    pub fn functions_for_turn(&self, turn: usize) -> Vec<&P> {
        let mut filled: Vec<&P> = self.functions.iter().flatten().collect();
        if P::ROTATE_FUNCTION_PACKETS && !filled.is_empty() {
            let pick = turn % filled.len();
            filled = vec![filled[pick]];
        }
        filled
    }
}

struct Inner<P> {
    entries: BTreeMap<u16, PoolEntry<P>>,
    known: BTreeSet<u16>,
}

/// Packet pool of one protocol on one bus.
pub struct PacketPool<P> {
    capacity: usize,
    inner: Mutex<Inner<P>>,
}

impl<P: Packet> PacketPool<P> {
    /// Creates an empty pool holding at most `capacity` addresses.
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            inner: Mutex::new(Inner {
                entries: BTreeMap::new(),
                known: BTreeSet::new(),
            }),
        }
    }

    /// Protocol served by this pool.
    pub fn protocol(&self) -> Protocol {
        P::PROTOCOL
    }

    /// Maximum number of known addresses.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    // Pool state is consistent after every statement, so a poisoned lock is
    // still usable.
    fn lock(&self) -> MutexGuard<'_, Inner<P>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn check_address(address: u32) -> Result<u16, PoolError> {
        let max = P::PROTOCOL.max_address();
        match u16::try_from(address) {
            Ok(a) if a <= max => Ok(a),
            _ => Err(PoolError::AddressOutOfRange {
                protocol: P::PROTOCOL,
                address,
                max,
            }),
        }
    }

    fn upsert<'a>(
        &self,
        inner: &'a mut Inner<P>,
        address: u16,
        packet: P,
        now_ms: u64,
    ) -> Result<&'a mut PoolEntry<P>, PoolError> {
        if !inner.known.contains(&address) {
            if inner.known.len() >= self.capacity {
                log::warn!("{} pool full, address {} rejected", P::PROTOCOL, address);
                return Err(PoolError::CapacityExceeded {
                    protocol: P::PROTOCOL,
                    capacity: self.capacity,
                });
            }
            inner.known.insert(address);
            log::info!("{} address {} added to pool", P::PROTOCOL, address);
        }
        let entry = inner
            .entries
            .entry(address)
            .or_insert_with(|| PoolEntry::new(packet.clone(), now_ms));
        entry.packet = packet;
        entry.last_update_ms = now_ms;
        Ok(entry)
    }

    /// Stores the command packet for `address`.
    ///
    /// Function slots of an existing entry are kept. A new address fails with
    /// [`PoolError::CapacityExceeded`] once the pool is full; the pool is then
    /// unchanged.
    pub fn update(&self, address: u32, packet: P, now_ms: u64) -> Result<(), PoolError> {
        let address = Self::check_address(address)?;
        let mut inner = self.lock();
        self.upsert(&mut inner, address, packet, now_ms).map(|_| ())
    }

    /// Stores the command packet together with all function packets.
    pub fn update_with_functions(
        &self,
        address: u32,
        packet: P,
        functions: &[P],
        now_ms: u64,
    ) -> Result<(), PoolError> {
        if functions.len() > P::MAX_FUNCTION_PACKETS {
            return Err(PoolError::TooManyFunctionPackets {
                protocol: P::PROTOCOL,
                max: P::MAX_FUNCTION_PACKETS,
                given: functions.len(),
            });
        }
        let address = Self::check_address(address)?;
        let mut inner = self.lock();
        let entry = self.upsert(&mut inner, address, packet, now_ms)?;
        for (slot, function) in entry.functions.iter_mut().zip(functions) {
            *slot = Some(function.clone());
        }
        Ok(())
    }

    /// Stores one function packet of a known address.
    pub fn update_function(
        &self,
        address: u32,
        slot: usize,
        packet: P,
        now_ms: u64,
    ) -> Result<(), PoolError> {
        if slot >= P::MAX_FUNCTION_PACKETS {
            return Err(PoolError::TooManyFunctionPackets {
                protocol: P::PROTOCOL,
                max: P::MAX_FUNCTION_PACKETS,
                given: slot + 1,
            });
        }
        let address = Self::check_address(address)?;
        let mut inner = self.lock();
        let entry = inner
            .entries
            .get_mut(&address)
            .ok_or(PoolError::NotFound {
                protocol: P::PROTOCOL,
                address,
            })?;
        entry.functions[slot] = Some(packet);
        entry.last_update_ms = now_ms;
        Ok(())
    }

    /// Fetches a stored packet.
    pub fn get(&self, address: u16, selector: FrameSelector) -> Result<P, PoolError> {
        let inner = self.lock();
        let not_found = PoolError::NotFound {
            protocol: P::PROTOCOL,
            address,
        };
        let entry = inner.entries.get(&address).ok_or(not_found)?;
        match selector {
            FrameSelector::Command => Ok(entry.packet.clone()),
            FrameSelector::Function(slot) => entry
                .functions
                .get(slot)
                .and_then(Option::clone)
                .ok_or(not_found),
        }
    }

    /// Copy of the whole entry of `address`.
    pub fn entry(&self, address: u16) -> Option<PoolEntry<P>> {
        self.lock().entries.get(&address).cloned()
    }

    /// Command packet and the function packets for visit `turn`, read in one
    /// critical section.
    pub fn refresh_packets(&self, address: u16, turn: usize) -> Option<(P, Vec<P>)> {
        let inner = self.lock();
        let entry = inner.entries.get(&address)?;
        let functions = entry
            .functions_for_turn(turn)
            .into_iter()
            .cloned()
            .collect();
        Some((entry.packet.clone(), functions))
    }

    /// Known addresses in ascending order.
    pub fn known_addresses(&self) -> Vec<u16> {
        self.lock().known.iter().copied().collect()
    }

    /// Whether `address` has an entry.
    pub fn contains(&self, address: u16) -> bool {
        self.lock().known.contains(&address)
    }

    /// Number of known addresses.
    pub fn len(&self) -> usize {
        self.lock().known.len()
    }

    /// Whether no address is known.
    pub fn is_empty(&self) -> bool {
        self.lock().known.is_empty()
    }

    /// Next known address after `last` in ascending order, wrapping around.
    ///
    /// With `fast_since` only addresses updated at or after that time count.
    /// `None` when no address qualifies.
    ///
    /// Without a filter this is a single range lookup in the known set; the
    /// fast filter walks the set until an entry is recent enough.
    pub fn next_after(&self, last: Option<u16>, fast_since: Option<u64>) -> Option<u16> {
        let inner = self.lock();
        let lower = match last {
            Some(last) => Bound::Excluded(last),
            None => Bound::Unbounded,
        };
        let Some(since) = fast_since else {
            return inner
                .known
                .range((lower, Bound::Unbounded))
                .next()
                .or_else(|| inner.known.first())
                .copied();
        };
        let recent = |address: &&u16| {
            inner
                .entries
                .get(address)
                .is_some_and(|entry| entry.last_update_ms >= since)
        };
        inner
            .known
            .range((lower, Bound::Unbounded))
            .find(recent)
            .or_else(|| inner.known.iter().find(recent))
            .copied()
    }

    /// Whether the map and the known set hold the same addresses.
    pub fn is_consistent(&self) -> bool {
        let inner = self.lock();
        inner.known.len() == inner.entries.len()
            && inner.known.iter().all(|a| inner.entries.contains_key(a))
    }
}

// ============================================================================
// Bus Pools
// ============================================================================

/// The three pools of one bus.
pub struct BusPools {
    /// Motorola pool.
    pub motorola: PacketPool<MotorolaPacket>,
    /// DCC pool.
    pub dcc: PacketPool<DccPacket>,
    /// MFX pool.
    pub mfx: PacketPool<MfxPacket>,
}

impl BusPools {
    /// Creates empty pools sized from the bus configuration.
    pub fn new(config: &BusConfig) -> Self {
        Self {
            motorola: PacketPool::new(config.capacity(Protocol::Motorola)),
            dcc: PacketPool::new(config.capacity(Protocol::Dcc)),
            mfx: PacketPool::new(config.capacity(Protocol::Mfx)),
        }
    }

    /// Number of known addresses of `protocol`.
    pub fn len(&self, protocol: Protocol) -> usize {
        match protocol {
            Protocol::Motorola => self.motorola.len(),
            Protocol::Dcc => self.dcc.len(),
            Protocol::Mfx => self.mfx.len(),
        }
    }

    /// Next known address of `protocol`, see [`PacketPool::next_after`].
    pub fn next_after(
        &self,
        protocol: Protocol,
        last: Option<u16>,
        fast_since: Option<u64>,
    ) -> Option<u16> {
        match protocol {
            Protocol::Motorola => self.motorola.next_after(last, fast_since),
            Protocol::Dcc => self.dcc.next_after(last, fast_since),
            Protocol::Mfx => self.mfx.next_after(last, fast_since),
        }
    }
}

impl Default for BusPools {
    fn default() -> Self {
        Self::new(&BusConfig::default())
    }
}
