//! Shared per-tile cache controller.
//!
//! The L2 sits between the tile's private L1 caches and the directory. It is inclusive
//! of both L1s and records, per line, which of them holds a copy; a line lives in at most
//! one L1 at a time, so write-through stores never leave a stale copy in the other. It is
//! the tile's single point of contact with the directory and keeps at most one request in
//! flight. An OWNED line is readable but answers for its data: it is flushed on eviction
//! and supplies the line to new readers on WB_REQ.
//!
//! Locking: an L1 lock is always taken before the L2 lock, instruction cache before data
//! cache. Directory-initiated requests do not know in advance which L1s hold the line, so
//! they peek at the holders, lock them, lock the L2 and retry if the holders changed in
//! between.

use std::sync::Arc;

use parking_lot::{Mutex, MutexGuard};

use super::home::HomeLookup;
use super::l1::L1Caches;
use super::msg::{MsgType, Replies, ShmemMsg};
use super::protocol::CoherenceProtocol;
use crate::cache::{CacheLineInfo, CacheState, CachedLoc, Eviction, GenericCache};
use crate::common::{AccessType, MemComponent, MemOp, ProtocolError, ProtocolResult, TileId};
use crate::config::CacheConfig;
use crate::net::{Rendezvous, Transport};
use crate::perf::{Role, ShmemPerfModel};
use crate::stats::CacheCounters;

/// The request the L2 is waiting on the directory for.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Outstanding {
    /// Line address.
    pub address: u64,
    /// L1 cache that missed.
    pub source: MemComponent,
}

#[derive(Debug)]
struct L2State {
    cache: GenericCache,
    outstanding: Option<Outstanding>,
}

/// L1 guards held while the L2 works on a line, in lock order.
struct L1Locks<'a> {
    icache: Option<MutexGuard<'a, GenericCache>>,
    dcache: Option<MutexGuard<'a, GenericCache>>,
}

impl L1Locks<'_> {
    fn get(&mut self, component: MemComponent) -> Option<&mut GenericCache> {
        match component {
            MemComponent::L1ICache => self.icache.as_deref_mut(),
            MemComponent::L1DCache => self.dcache.as_deref_mut(),
            MemComponent::L2Cache | MemComponent::DramDirectory => None,
        }
    }

    fn invalidate(&mut self, holders: CachedLoc, address: u64) {
        for component in holders.iter() {
            if let Some(cache) = self.get(component) {
                let _ = cache.invalidate_line(address);
            }
        }
    }
}

/// Controller of one tile's shared cache.
#[derive(Debug)]
pub struct L2CacheCntlr {
    tile: TileId,
    state: Mutex<L2State>,
    l1: Arc<L1Caches>,
    home: HomeLookup,
    transport: Arc<dyn Transport>,
    rendezvous: Arc<Rendezvous>,
    perf: Arc<ShmemPerfModel>,
    protocol: Arc<dyn CoherenceProtocol>,
    data_access_time: u64,
    tags_access_time: u64,
}

impl L2CacheCntlr {
    /// Creates the L2 controller of `tile`.
    ///
    /// # Arguments
    ///
    /// * `tile` - Owning tile.
    /// * `config` - L2 geometry and timing.
    /// * `l1` - The tile's private caches.
    /// * `home` - Address-to-directory lookup.
    /// * `transport` - Network used to reach directories.
    /// * `rendezvous` - Hand-off with the tile's application role.
    /// * `perf` - The tile's clocks.
    /// * `protocol` - Protocol variant shared with the directories.
    pub fn new(
        tile: TileId,
        config: &CacheConfig,
        l1: Arc<L1Caches>,
        home: HomeLookup,
        transport: Arc<dyn Transport>,
        rendezvous: Arc<Rendezvous>,
        perf: Arc<ShmemPerfModel>,
        protocol: Arc<dyn CoherenceProtocol>,
    ) -> Self {
        Self {
            tile,
            state: Mutex::new(L2State {
                cache: GenericCache::new("L2", config),
                outstanding: None,
            }),
            l1,
            home,
            transport,
            rendezvous,
            perf,
            protocol,
            data_access_time: config.data_access_time,
            tags_access_time: config.tags_access_time,
        }
    }

    /// Metadata of a line, if the L2 holds it.
    pub fn line_info(&self, address: u64) -> Option<CacheLineInfo> {
        self.state.lock().cache.line_info(address)
    }

    /// The request currently waiting on the directory.
    pub fn outstanding(&self) -> Option<Outstanding> {
        self.state.lock().outstanding
    }

    /// Access counters of the L2 array.
    pub fn counters(&self) -> CacheCounters {
        self.state.lock().cache.counters().clone()
    }

    fn line_buffer(cache: &GenericCache) -> Vec<u8> {
        vec![0; cache.line_size()]
    }

    /// Serves an L1 miss from the L2 if it holds the line with enough permission.
    ///
    /// Called by the application role with the missing L1 already locked (and its copy of
    /// the line already dropped).
    ///
    /// # Arguments
    ///
    /// * `component` - The L1 that missed.
    /// * `l1` - That L1, locked by the caller.
    /// * `op` - Core operation.
    /// * `address` - Line address.
    /// * `modeled` - Count the access and charge its latency.
    ///
    /// # Returns
    ///
    /// `true` if the line was installed in `l1`.
    pub fn handle_request_from_core(
        &self,
        component: MemComponent,
        l1: &mut GenericCache,
        op: MemOp,
        address: u64,
        modeled: bool,
    ) -> ProtocolResult<bool> {
        let mut l2 = self.state.lock();
        let mut others = CachedLoc::EMPTY;
        if let Some(mut info) = l2.cache.line_info(address) {
            info.cached_loc.remove(component);
            others = info.cached_loc;
            let _ = l2.cache.set_line_info(address, info);
        }

        let state = l2.cache.state_of(address);
        let hit = if op.needs_exclusive() {
            state.writable()
        } else {
            state.readable()
        };
        if modeled {
            let _ = l2.cache.record_access(address, op.needs_exclusive(), hit);
        }
        self.perf.incr_time(Role::App, self.tags_access_time);
        // Taking the line from the other L1 needs both L1 locks, which only the protocol
        // role may take.
        if !hit || !others.is_empty() {
            return Ok(false);
        }

        self.perf.incr_time(Role::App, self.data_access_time);
        let mut data = Self::line_buffer(&l2.cache);
        let _ = l2.cache.read_line(address, &mut data);
        Self::insert_in_l1(&mut l2.cache, component, l1, address, state, &data)?;
        Ok(true)
    }

    /// Writes store data through to the L2 copy of a modified line.
    ///
    /// # Arguments
    ///
    /// * `address` - Byte address of the store.
    /// * `data` - Stored bytes (within one line).
    pub fn write_through(&self, address: u64, data: &[u8]) -> ProtocolResult<()> {
        let mut l2 = self.state.lock();
        let state = l2.cache.state_of(address);
        if state != CacheState::Modified {
            return Err(ProtocolError::violation(address, "MODIFIED in L2", state));
        }
        let mut bytes = data.to_vec();
        let _ = l2.cache.access_line(address, AccessType::Store, &mut bytes);
        Ok(())
    }

    /// Installs a line in an L1 and records the L1 as a holder.
    fn insert_in_l1(
        l2: &mut GenericCache,
        component: MemComponent,
        l1: &mut GenericCache,
        address: u64,
        state: CacheState,
        data: &[u8],
    ) -> ProtocolResult<()> {
        let evicted = l1.insert_line(address, CacheLineInfo::new(0, state), data)?;
        if let Some(mut info) = l2.line_info(address) {
            info.cached_loc.insert(component);
            let _ = l2.set_line_info(address, info);
        }
        // L1s are write-through: a displaced L1 line only needs its holder bit cleared.
        if let Some(victim) = evicted
            && let Some(mut info) = l2.line_info(victim.address)
        {
            info.cached_loc.remove(component);
            let _ = l2.set_line_info(victim.address, info);
        }
        Ok(())
    }

    /// Handles an SH_REQ or EX_REQ sent by one of the tile's L1 caches.
    pub fn handle_msg_from_l1(&self, msg: &ShmemMsg) -> ProtocolResult<()> {
        let source = msg.sender_component;
        if !source.is_l1() {
            return Err(misrouted(msg, MemComponent::L2Cache));
        }
        let address = msg.address;
        let wants_exclusive = match msg.kind {
            MsgType::ExReq => true,
            MsgType::ShReq => false,
            _ => return Err(misrouted(msg, MemComponent::L2Cache)),
        };

        let mut l2 = self.state.lock();
        if let Some(pending) = l2.outstanding {
            return Err(ProtocolError::OutstandingRequestBusy {
                tile: self.tile,
                pending: pending.address,
            });
        }
        self.perf.incr_time(Role::Sim, self.tags_access_time);

        let state = l2.cache.state_of(address);
        let satisfied = if wants_exclusive {
            state.writable()
        } else {
            state.readable()
        };
        if satisfied {
            // The line arrived after the L1 looked it up; hand it over like a reply.
            drop(l2);
            self.install_from_l2(source, address)?;
            return self.release_app();
        }

        // EX_REQ on a SHARED or OWNED line keeps the copy and asks for an upgrade.
        l2.outstanding = Some(Outstanding { address, source });
        drop(l2);

        let request = ShmemMsg::new(
            msg.kind,
            MemComponent::L2Cache,
            MemComponent::DramDirectory,
            self.tile,
            address,
            msg.modeled,
        );
        self.transport.send(
            self.tile,
            self.home.home(address),
            self.perf.time(Role::Sim),
            &request,
        )
    }

    /// Moves a resident L2 line into `source`, taking it away from the other L1.
    fn install_from_l2(&self, source: MemComponent, address: u64) -> ProtocolResult<()> {
        let mut l1 = L1Locks {
            icache: Some(self.l1.cache(MemComponent::L1ICache)?.lock()),
            dcache: Some(self.l1.cache(MemComponent::L1DCache)?.lock()),
        };
        let mut l2 = self.state.lock();
        let info = l2.cache.line_info(address).ok_or_else(|| {
            ProtocolError::violation(address, "line resident in L2", CacheState::Invalid)
        })?;
        l1.invalidate(info.cached_loc, address);
        let _ = l2.cache.set_line_info(
            address,
            CacheLineInfo {
                cached_loc: CachedLoc::EMPTY,
                ..info
            },
        );
        let mut data = Self::line_buffer(&l2.cache);
        let _ = l2.cache.read_line(address, &mut data);
        let cache = l1.get(source).ok_or_else(|| misrouted_component(address, source))?;
        Self::insert_in_l1(&mut l2.cache, source, cache, address, info.state, &data)?;
        self.perf.set_time(Role::App, self.perf.time(Role::Sim));
        Ok(())
    }

    /// Wakes the application role and waits until it holds its L1 lock again.
    fn release_app(&self) -> ProtocolResult<()> {
        self.rendezvous.wake_app()?;
        self.rendezvous.wait_for_app()
    }

    /// Handles a reply or a request sent by a directory.
    ///
    /// # Arguments
    ///
    /// * `sender` - Home tile of the line.
    /// * `msg` - EX_REP, SH_REP, UPGRADE_REP, INV_REQ, FLUSH_REQ, WB_REQ or
    ///   INV_FLUSH_COMBINED_REQ.
    pub fn handle_msg_from_directory(&self, sender: TileId, msg: &ShmemMsg) -> ProtocolResult<()> {
        match msg.kind {
            MsgType::ExRep | MsgType::ShRep | MsgType::UpgradeRep => self.handle_reply(sender, msg),
            MsgType::InvReq
            | MsgType::FlushReq
            | MsgType::WbReq
            | MsgType::InvFlushCombinedReq => self.handle_directory_request(sender, msg),
            _ => Err(misrouted(msg, MemComponent::L2Cache)),
        }
    }

    fn handle_reply(&self, sender: TileId, msg: &ShmemMsg) -> ProtocolResult<()> {
        let address = msg.address;
        {
            let mut l1 = L1Locks {
                icache: Some(self.l1.cache(MemComponent::L1ICache)?.lock()),
                dcache: Some(self.l1.cache(MemComponent::L1DCache)?.lock()),
            };
            let mut l2 = self.state.lock();
            let Some(pending) = l2.outstanding.filter(|o| o.address == address) else {
                return Err(ProtocolError::UnexpectedReply {
                    address,
                    kind: msg.kind.name(),
                    sender,
                });
            };
            self.perf
                .incr_time(Role::Sim, self.tags_access_time + self.data_access_time);

            let (state, data) = match msg.kind {
                MsgType::UpgradeRep => {
                    let info = l2
                        .cache
                        .line_info(address)
                        .filter(|info| {
                            matches!(info.state, CacheState::Shared | CacheState::Owned)
                        })
                        .ok_or_else(|| {
                            ProtocolError::violation(
                                address,
                                "SHARED or OWNED line awaiting upgrade",
                                l2.cache.state_of(address),
                            )
                        })?;
                    l1.invalidate(info.cached_loc, address);
                    let _ = l2.cache.set_line_info(
                        address,
                        CacheLineInfo::new(info.tag, CacheState::Modified),
                    );
                    let mut data = Self::line_buffer(&l2.cache);
                    let _ = l2.cache.read_line(address, &mut data);
                    (CacheState::Modified, data)
                }
                _ => {
                    let state = if msg.kind == MsgType::ShRep {
                        CacheState::Shared
                    } else {
                        CacheState::Modified
                    };
                    let data = msg
                        .data()
                        .ok_or_else(|| {
                            ProtocolError::MalformedPacket(format!(
                                "{} for {address:#x} without data",
                                msg.kind
                            ))
                        })?
                        .to_vec();
                    if let Some(prior) = l2.cache.line_info(address) {
                        l1.invalidate(prior.cached_loc, address);
                    }
                    let evicted = l2.cache.insert_line_filtered(
                        address,
                        CacheLineInfo::new(0, state),
                        &data,
                        |victim, _| victim != pending.address,
                    )?;
                    if let Some(eviction) = evicted {
                        self.evict(&mut l1, eviction)?;
                    }
                    (state, data)
                }
            };

            let l1_cache = l1
                .get(pending.source)
                .ok_or_else(|| misrouted_component(address, pending.source))?;
            Self::insert_in_l1(&mut l2.cache, pending.source, l1_cache, address, state, &data)?;
            l2.outstanding = None;
            self.perf.set_time(Role::App, self.perf.time(Role::Sim));
            tracing::debug!(
                tile = %self.tile,
                address,
                kind = %msg.kind,
                ?state,
                "reply installed"
            );
        }
        self.release_app()
    }

    /// Invalidates an evicted line in the L1s and notifies its home.
    fn evict(&self, l1: &mut L1Locks<'_>, eviction: Eviction) -> ProtocolResult<()> {
        l1.invalidate(eviction.info.cached_loc, eviction.address);
        let kind = match eviction.info.state {
            CacheState::Modified | CacheState::Owned => MsgType::FlushRep,
            CacheState::Shared => MsgType::InvRep,
            CacheState::Invalid => {
                return Err(ProtocolError::violation(
                    eviction.address,
                    "valid evicted line",
                    eviction.info.state,
                ));
            }
        };
        let mut notice = ShmemMsg::new(
            kind,
            MemComponent::L2Cache,
            MemComponent::DramDirectory,
            self.tile,
            eviction.address,
            true,
        );
        if kind == MsgType::FlushRep {
            notice = notice.with_payload(&eviction.data);
        }
        self.transport.send(
            self.tile,
            self.home.home(eviction.address),
            self.perf.time(Role::Sim),
            &notice,
        )
    }

    fn handle_directory_request(&self, sender: TileId, msg: &ShmemMsg) -> ProtocolResult<()> {
        let address = msg.address;
        loop {
            let holders = self
                .state
                .lock()
                .cache
                .line_info(address)
                .map_or(CachedLoc::EMPTY, |info| info.cached_loc);
            let mut l1 = L1Locks {
                icache: if holders.contains(MemComponent::L1ICache) {
                    Some(self.l1.cache(MemComponent::L1ICache)?.lock())
                } else {
                    None
                },
                dcache: if holders.contains(MemComponent::L1DCache) {
                    Some(self.l1.cache(MemComponent::L1DCache)?.lock())
                } else {
                    None
                },
            };
            let mut l2 = self.state.lock();
            let info = l2.cache.line_info(address);
            if info.map_or(CachedLoc::EMPTY, |i| i.cached_loc) != holders {
                continue;
            }
            self.perf.incr_time(Role::Sim, self.tags_access_time);
            let reply = self.apply_directory_request(&mut l1, &mut l2.cache, info, msg)?;
            drop(l2);
            drop(l1);
            if let Some(reply) = reply {
                self.transport
                    .send(self.tile, sender, self.perf.time(Role::Sim), &reply)?;
            }
            return Ok(());
        }
    }

    fn apply_directory_request(
        &self,
        l1: &mut L1Locks<'_>,
        l2: &mut GenericCache,
        info: Option<CacheLineInfo>,
        msg: &ShmemMsg,
    ) -> ProtocolResult<Option<ShmemMsg>> {
        let address = msg.address;
        let reply = |kind| {
            ShmemMsg::new(
                kind,
                MemComponent::L2Cache,
                MemComponent::DramDirectory,
                msg.requester,
                address,
                msg.modeled,
            )
        };
        let Some(info) = info else {
            // Stale request for a line already evicted; only broadcasts every tile answers
            // need a reply.
            return Ok(msg
                .reply_expected()
                .then(|| reply(MsgType::InvRep).with_receivers(None, Replies::Everyone)));
        };

        let kind = match msg.kind {
            MsgType::InvFlushCombinedReq if msg.single_receiver == Some(self.tile) => {
                MsgType::FlushReq
            }
            MsgType::InvFlushCombinedReq => MsgType::InvReq,
            kind => kind,
        };
        match kind {
            MsgType::InvReq => {
                if info.state != CacheState::Shared {
                    return Err(ProtocolError::violation(address, "SHARED", info.state));
                }
                l1.invalidate(info.cached_loc, address);
                let _ = l2.invalidate_line(address);
                Ok((msg.replies != Replies::Nobody)
                    .then(|| reply(MsgType::InvRep).with_receivers(None, msg.replies)))
            }
            MsgType::FlushReq => {
                if !info.state.dirty() {
                    return Err(ProtocolError::violation(address, "MODIFIED or OWNED", info.state));
                }
                self.perf.incr_time(Role::Sim, self.data_access_time);
                l1.invalidate(info.cached_loc, address);
                let mut data = Self::line_buffer(l2);
                let _ = l2.read_line(address, &mut data);
                let _ = l2.invalidate_line(address);
                Ok(Some(
                    reply(MsgType::FlushRep)
                        .with_payload(&data)
                        .with_receivers(None, msg.replies),
                ))
            }
            MsgType::WbReq => {
                let state = match info.state {
                    CacheState::Modified => self.protocol.written_back_line(),
                    CacheState::Owned => CacheState::Owned,
                    other => {
                        return Err(ProtocolError::violation(address, "MODIFIED or OWNED", other));
                    }
                };
                self.perf.incr_time(Role::Sim, self.data_access_time);
                for component in info.cached_loc.iter() {
                    if let Some(cache) = l1.get(component)
                        && let Some(line) = cache.line_info(address)
                    {
                        let _ = cache.set_line_info(
                            address,
                            CacheLineInfo {
                                state: CacheState::Shared,
                                ..line
                            },
                        );
                    }
                }
                let _ = l2.set_line_info(address, CacheLineInfo { state, ..info });
                let mut data = Self::line_buffer(l2);
                let _ = l2.read_line(address, &mut data);
                Ok(Some(reply(MsgType::WbRep).with_payload(&data)))
            }
            _ => Err(misrouted(msg, MemComponent::L2Cache)),
        }
    }
}

/// Error for a message delivered to a component that cannot handle it.
pub(crate) fn misrouted(msg: &ShmemMsg, receiver: MemComponent) -> ProtocolError {
    ProtocolError::Misrouted {
        kind: msg.kind.name(),
        sender: msg.sender_component.name(),
        receiver: receiver.name(),
    }
}

fn misrouted_component(address: u64, component: MemComponent) -> ProtocolError {
    ProtocolError::violation(address, "L1 source component", component)
}
