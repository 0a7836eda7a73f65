//! Private first-level caches and their controller.
//!
//! The L1 controller runs on the application role. It serves hits directly, retries a miss
//! against the tile's L2 and, when the L2 cannot help either, hands the request to the
//! protocol role and blocks on the tile's rendezvous until the reply is installed.
//!
//! A `Lock` operation keeps its L1 locked after returning. The guard is parked in a slot
//! until the matching `Unlock` operation, so no invalidation or eviction of that cache can
//! run in between.

use std::sync::Arc;

use parking_lot::lock_api::ArcMutexGuard;
use parking_lot::{Mutex, RawMutex};

use super::l2::L2CacheCntlr;
use super::msg::{MsgType, ShmemMsg};
use crate::cache::GenericCache;
use crate::common::{
    AccessType, LockSignal, MemComponent, MemOp, ProtocolError, ProtocolResult, TileId,
};
use crate::config::CacheConfig;
use crate::net::{Rendezvous, Transport};
use crate::perf::{Role, ShmemPerfModel};

/// Owned lock on one L1 cache, held across calls.
pub type L1Guard = ArcMutexGuard<RawMutex, GenericCache>;

/// The two private caches of a tile.
#[derive(Debug)]
pub struct L1Caches {
    icache: Arc<Mutex<GenericCache>>,
    dcache: Arc<Mutex<GenericCache>>,
}

impl L1Caches {
    /// Builds both caches.
    pub fn new(icache: &CacheConfig, dcache: &CacheConfig) -> Self {
        Self {
            icache: Arc::new(Mutex::new(GenericCache::new("L1-I", icache))),
            dcache: Arc::new(Mutex::new(GenericCache::new("L1-D", dcache))),
        }
    }

    /// The cache behind `component`.
    pub fn cache(&self, component: MemComponent) -> ProtocolResult<&Arc<Mutex<GenericCache>>> {
        match component {
            MemComponent::L1ICache => Ok(&self.icache),
            MemComponent::L1DCache => Ok(&self.dcache),
            other => Err(ProtocolError::Misrouted {
                kind: "core access",
                sender: "core",
                receiver: other.name(),
            }),
        }
    }
}

#[derive(Clone, Copy, Debug)]
struct Timing {
    data: u64,
    tags: u64,
}

impl From<&CacheConfig> for Timing {
    fn from(config: &CacheConfig) -> Self {
        Self {
            data: config.data_access_time,
            tags: config.tags_access_time,
        }
    }
}

/// Controller of a tile's private caches.
pub struct L1CacheCntlr {
    tile: TileId,
    caches: Arc<L1Caches>,
    l2: Arc<L2CacheCntlr>,
    transport: Arc<dyn Transport>,
    rendezvous: Arc<Rendezvous>,
    perf: Arc<ShmemPerfModel>,
    held: [Mutex<Option<L1Guard>>; 2],
    timing: [Timing; 2],
}

impl std::fmt::Debug for L1CacheCntlr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let locked: Vec<bool> = self.held.iter().map(|slot| slot.lock().is_some()).collect();
        f.debug_struct("L1CacheCntlr")
            .field("tile", &self.tile)
            .field("locked", &locked)
            .finish_non_exhaustive()
    }
}

const fn slot_of(component: MemComponent) -> Option<usize> {
    match component {
        MemComponent::L1ICache => Some(0),
        MemComponent::L1DCache => Some(1),
        MemComponent::L2Cache | MemComponent::DramDirectory => None,
    }
}

impl L1CacheCntlr {
    /// Creates the L1 controller of `tile`.
    ///
    /// # Arguments
    ///
    /// * `tile` - Owning tile.
    /// * `caches` - The tile's private caches, shared with its L2 controller.
    /// * `timing` - Instruction and data cache configurations, for access times.
    /// * `l2` - The tile's L2 controller.
    /// * `transport` - Network used to reach the tile's own L2 on a miss.
    /// * `rendezvous` - Hand-off with the tile's protocol role.
    /// * `perf` - The tile's clocks.
    pub fn new(
        tile: TileId,
        caches: Arc<L1Caches>,
        timing: (&CacheConfig, &CacheConfig),
        l2: Arc<L2CacheCntlr>,
        transport: Arc<dyn Transport>,
        rendezvous: Arc<Rendezvous>,
        perf: Arc<ShmemPerfModel>,
    ) -> Self {
        Self {
            tile,
            caches,
            l2,
            transport,
            rendezvous,
            perf,
            held: [Mutex::new(None), Mutex::new(None)],
            timing: [Timing::from(timing.0), Timing::from(timing.1)],
        }
    }

    /// Returns `true` while a locked sequence holds `component`.
    pub fn is_locked(&self, component: MemComponent) -> bool {
        slot_of(component).is_some_and(|slot| self.held[slot].lock().is_some())
    }

    /// Returns `true` if the locked sequence open on `component` holds `ca_address` with
    /// enough permission for `op`.
    pub fn sequence_holds(&self, component: MemComponent, op: MemOp, ca_address: u64) -> bool {
        slot_of(component).is_some_and(|slot| {
            self.held[slot].lock().as_ref().is_some_and(|guard| {
                let state = guard.state_of(ca_address);
                if op.needs_exclusive() {
                    state.writable()
                } else {
                    state.readable()
                }
            })
        })
    }

    /// Closes the locked sequence open on `component` without a final access.
    pub fn abandon_sequence(&self, component: MemComponent) {
        if let Some(slot) = slot_of(component) {
            let _ = self.held[slot].lock().take();
        }
    }

    /// Performs one core access within a single line.
    ///
    /// # Arguments
    ///
    /// * `component` - L1 instruction or data cache.
    /// * `lock` - Lock signal of the access.
    /// * `op` - Read, exclusive read or write.
    /// * `ca_address` - Line-aligned address.
    /// * `offset` - Byte offset within the line.
    /// * `buf` - Destination of loads, source of stores; must not cross the line.
    /// * `modeled` - Count the access in statistics.
    ///
    /// # Returns
    ///
    /// `true` if the access hit in the L1 on the first attempt.
    pub fn process_mem_op(
        &self,
        component: MemComponent,
        lock: LockSignal,
        op: MemOp,
        ca_address: u64,
        offset: usize,
        buf: &mut [u8],
        modeled: bool,
    ) -> ProtocolResult<bool> {
        let slot = slot_of(component).ok_or_else(|| ProtocolError::Misrouted {
            kind: "core access",
            sender: "core",
            receiver: component.name(),
        })?;
        let address = ca_address + offset as u64;
        // A locked sequence on the other cache would invert the L1 lock order.
        if self
            .held
            .iter()
            .enumerate()
            .any(|(other, held)| other != slot && held.lock().is_some())
        {
            return Err(ProtocolError::NestedLockedAccess { address });
        }
        let timing = self.timing[slot];

        for access_num in 1..=2 {
            let parked = self.held[slot].lock().take();
            let in_sequence = parked.is_some();
            let mut guard = match parked {
                Some(guard) => guard,
                None if lock == LockSignal::Unlock => {
                    return Err(ProtocolError::UnlockMiss { address });
                }
                None => self.caches.cache(component)?.lock_arc(),
            };
            if access_num == 2 {
                self.rendezvous.wake_sim()?;
            }

            self.perf.incr_time(Role::App, timing.tags);
            let state = guard.state_of(ca_address);
            let permissible = if op.needs_exclusive() {
                state.writable()
            } else {
                state.readable()
            };
            if access_num == 1 && modeled {
                let _ = guard.record_access(ca_address, op.needs_exclusive(), permissible);
            }

            if permissible {
                self.perf.incr_time(Role::App, timing.data);
                self.access(&mut guard, op, address, buf)?;
                self.finish(slot, guard, lock, in_sequence);
                return Ok(access_num == 1);
            }
            if lock == LockSignal::Unlock {
                return Err(ProtocolError::UnlockMiss { address });
            }
            if in_sequence {
                return Err(ProtocolError::NestedLockedAccess { address });
            }
            if access_num == 2 {
                return Err(ProtocolError::violation(
                    ca_address,
                    "line installed by reply",
                    state,
                ));
            }

            let _ = guard.discard_line(ca_address);
            if self
                .l2
                .handle_request_from_core(component, &mut guard, op, ca_address, modeled)?
            {
                self.perf.incr_time(Role::App, timing.data);
                self.access(&mut guard, op, address, buf)?;
                self.finish(slot, guard, lock, false);
                return Ok(false);
            }
            drop(guard);

            let kind = if op.needs_exclusive() {
                MsgType::ExReq
            } else {
                MsgType::ShReq
            };
            let request = ShmemMsg::new(
                kind,
                component,
                MemComponent::L2Cache,
                self.tile,
                ca_address,
                modeled,
            );
            tracing::trace!(tile = %self.tile, address = ca_address, %kind, "l1 miss");
            self.transport
                .send(self.tile, self.tile, self.perf.time(Role::App), &request)?;
            self.rendezvous.wait_for_sim()?;
        }
        Err(ProtocolError::violation(ca_address, "at most two attempts", "a third"))
    }

    fn access(
        &self,
        cache: &mut GenericCache,
        op: MemOp,
        address: u64,
        buf: &mut [u8],
    ) -> ProtocolResult<()> {
        let access = match op {
            MemOp::Read | MemOp::ReadEx => AccessType::Load,
            MemOp::Write => AccessType::Store,
        };
        if !cache.access_line(address, access, buf) {
            return Err(ProtocolError::violation(address, "resident line", "miss"));
        }
        if access == AccessType::Store {
            self.l2.write_through(address, buf)?;
        }
        Ok(())
    }

    fn finish(&self, slot: usize, guard: L1Guard, lock: LockSignal, in_sequence: bool) {
        match lock {
            LockSignal::Lock => *self.held[slot].lock() = Some(guard),
            LockSignal::Unlock => drop(guard),
            LockSignal::None if in_sequence => *self.held[slot].lock() = Some(guard),
            LockSignal::None => drop(guard),
        }
    }
}
