//! Directory controller of one memory-controller tile.
//!
//! Requests for a line are serialized through a per-address FIFO queue: only the head
//! transaction is active and the rest wait. The head is restarted whenever a reply moves
//! its line to a state it can complete from. When the directory set of a new address is
//! full, a NULLIFY transaction is queued on a victim entry and the new request waits until
//! the victim has been invalidated everywhere.
//!
//! DRAM accesses complete synchronously and their latency is charged to the protocol
//! clock of this tile. Memory is current for every line that is not MODIFIED or OWNED:
//! flushed data is always stored, written-back data only when the protocol says so.

use std::sync::Arc;

use super::directory::{Allocation, DirectoryCache, DirectoryEntry, DirectoryState};
use super::l2::misrouted;
use super::msg::{MsgType, Replies, ShmemMsg};
use super::protocol::CoherenceProtocol;
use super::req::ShmemReq;
use super::req_queue::ReqQueueList;
use crate::common::{MemComponent, ProtocolError, ProtocolResult, TileId};
use crate::config::{Config, DirectoryType};
use crate::dram::DramCntlr;
use crate::net::Transport;
use crate::perf::{Role, ShmemPerfModel};
use crate::stats::DirectoryCounters;

/// Directory slice plus DRAM of one memory-controller tile.
#[derive(Debug)]
pub struct DramDirectoryCntlr {
    tile: TileId,
    cache: DirectoryCache,
    queue: ReqQueueList,
    dram: DramCntlr,
    transport: Arc<dyn Transport>,
    perf: Arc<ShmemPerfModel>,
    protocol: Arc<dyn CoherenceProtocol>,
    line_size: usize,
    counters: DirectoryCounters,
}

impl DramDirectoryCntlr {
    /// Creates the directory controller of `tile`.
    ///
    /// # Arguments
    ///
    /// * `tile` - Memory-controller tile hosting this slice.
    /// * `config` - System configuration.
    /// * `dram` - The tile's DRAM controller.
    /// * `transport` - Network used to reach L2 caches.
    /// * `perf` - The tile's clocks.
    /// * `protocol` - Protocol variant shared with the L2 controllers.
    pub fn new(
        tile: TileId,
        config: &Config,
        dram: DramCntlr,
        transport: Arc<dyn Transport>,
        perf: Arc<ShmemPerfModel>,
        protocol: Arc<dyn CoherenceProtocol>,
    ) -> Self {
        let line_size = config.line_size();
        Self {
            tile,
            cache: DirectoryCache::new(
                &config.dram_directory,
                config.directory_total_entries(),
                line_size,
                config.general.total_tiles,
                config.memory_controller_tiles().len(),
            ),
            queue: ReqQueueList::new(),
            dram,
            transport,
            perf,
            protocol,
            line_size,
            counters: DirectoryCounters::default(),
        }
    }

    /// Directory entries of this slice.
    pub const fn directory(&self) -> &DirectoryCache {
        &self.cache
    }

    /// Pending transactions of this slice.
    pub const fn queue(&self) -> &ReqQueueList {
        &self.queue
    }

    /// The slice's DRAM controller.
    pub const fn dram(&self) -> &DramCntlr {
        &self.dram
    }

    /// Transaction counters.
    pub const fn counters(&self) -> &DirectoryCounters {
        &self.counters
    }

    fn now(&self) -> u64 {
        self.perf.time(Role::Sim)
    }

    fn send(&self, receiver: TileId, msg: &ShmemMsg) -> ProtocolResult<()> {
        self.transport.send(self.tile, receiver, self.now(), msg)
    }

    /// Sends a data-less message of the head transaction to `receiver`.
    fn notify(
        &self,
        receiver: TileId,
        kind: MsgType,
        requester: TileId,
        address: u64,
        modeled: bool,
    ) -> ProtocolResult<()> {
        self.send(receiver, &Self::to_l2(kind, requester, address, modeled))
    }

    fn to_l2(kind: MsgType, requester: TileId, address: u64, modeled: bool) -> ShmemMsg {
        ShmemMsg::new(
            kind,
            MemComponent::DramDirectory,
            MemComponent::L2Cache,
            requester,
            address,
            modeled,
        )
    }

    fn head(&self, address: u64) -> ProtocolResult<&ShmemReq> {
        self.queue
            .front(address)
            .ok_or_else(|| ProtocolError::violation(address, "queued request", "empty queue"))
    }

    fn head_mut(&mut self, address: u64) -> ProtocolResult<&mut ShmemReq> {
        self.queue
            .front_mut(address)
            .ok_or_else(|| ProtocolError::violation(address, "queued request", "empty queue"))
    }

    /// Handles an SH_REQ or EX_REQ from an L2 cache.
    ///
    /// The request is queued behind earlier transactions for the same line and processed
    /// immediately if it is the only one.
    pub fn handle_request_from_l2(&mut self, sender: TileId, msg: ShmemMsg) -> ProtocolResult<()> {
        let address = msg.address;
        match msg.kind {
            MsgType::ExReq => self.counters.ex_reqs += 1,
            MsgType::ShReq => self.counters.sh_reqs += 1,
            _ => return Err(misrouted(&msg, MemComponent::DramDirectory)),
        }
        if msg.requester != sender {
            return Err(ProtocolError::UnexpectedReply {
                address,
                kind: msg.kind.name(),
                sender,
            });
        }
        self.perf
            .incr_time(Role::Sim, self.cache.access_latency(address));
        let req = ShmemReq::new(msg, self.now());
        if self.queue.enqueue(address, req) == 1 {
            self.process_head(address)?;
        }
        Ok(())
    }

    /// Handles an INV_REP, FLUSH_REP or WB_REP from an L2 cache.
    ///
    /// Replies nobody waits for are eviction notices.
    pub fn handle_reply_from_l2(&mut self, sender: TileId, msg: &ShmemMsg) -> ProtocolResult<()> {
        self.perf
            .incr_time(Role::Sim, self.cache.access_latency(msg.address));
        match msg.kind {
            MsgType::InvRep => self.process_inv_rep(sender, msg),
            MsgType::FlushRep => self.process_flush_rep(sender, msg),
            MsgType::WbRep => self.process_wb_rep(sender, msg),
            _ => Err(misrouted(msg, MemComponent::DramDirectory)),
        }
    }

    fn process_head(&mut self, address: u64) -> ProtocolResult<()> {
        match self.head(address)?.kind() {
            MsgType::ExReq => self.process_ex_req(address),
            MsgType::ShReq => self.process_sh_req(address),
            MsgType::NullifyReq => self.process_nullify_req(address),
            other => Err(ProtocolError::violation(address, "SH_REQ, EX_REQ or NULLIFY", other)),
        }
    }

    /// Restarts the head transaction of `address` at the current time.
    fn restart_head(&mut self, address: u64) -> ProtocolResult<()> {
        let now = self.now();
        let req = self.head_mut(address)?;
        req.update_time(now);
        let time = req.time();
        self.perf.update_time(Role::Sim, time);
        self.process_head(address)
    }

    /// Restarts the head transaction once the replies it waits for have arrived.
    ///
    /// # Arguments
    ///
    /// * `address` - Line address.
    /// * `sender` - Tile whose reply was just applied, if any.
    fn restart_if_ready(&mut self, address: u64, sender: Option<TileId>) -> ProtocolResult<()> {
        let Some(head) = self.queue.front(address) else {
            return Ok(());
        };
        let entry = self
            .cache
            .get(address)
            .ok_or(ProtocolError::MissingDirectoryEntry { address })?;
        let ready = match head.kind() {
            MsgType::ExReq => entry.only_sharer_left(head.requester()),
            MsgType::ShReq => sender.is_some() && head.expected_responder() == sender,
            MsgType::NullifyReq => entry.state() == DirectoryState::Uncached,
            _ => false,
        };
        if ready {
            self.restart_head(address)?;
        }
        Ok(())
    }

    /// Makes sure `address` has a directory entry.
    ///
    /// # Returns
    ///
    /// `false` if the head transaction must wait for a victim to be nullified.
    fn ensure_entry(&mut self, address: u64) -> ProtocolResult<bool> {
        let set = match self.cache.allocate(address) {
            Allocation::Ready(_) => return Ok(true),
            Allocation::SetFull(set) => set,
        };
        let victim = self
            .cache
            .entries_in_set(set)
            .filter(|entry| self.queue.is_empty(entry.address()))
            .min_by_key(|entry| entry.num_sharers())
            .map(DirectoryEntry::address)
            .ok_or(ProtocolError::DirectorySetExhausted { set, address })?;

        let head = self.head(address)?;
        let nullify = ShmemMsg::new(
            MsgType::NullifyReq,
            MemComponent::DramDirectory,
            MemComponent::DramDirectory,
            head.requester(),
            victim,
            head.msg().modeled,
        );
        let time = head.time();
        tracing::debug!(tile = %self.tile, victim, waiting = address, "nullify");
        self.counters.nullifies += 1;
        self.cache.reserve_for(victim, address);
        let _ = self.queue.enqueue(victim, ShmemReq::new(nullify, time));
        self.process_nullify_req(victim)?;
        Ok(false)
    }

    /// Sends INV_REQ to every sharer except `keep`, broadcasting when the list is
    /// incomplete.
    ///
    /// With a `flusher`, the request is INV_FLUSH_COMBINED_REQ and that tile (the owner)
    /// flushes its dirty copy instead of dropping it.
    fn invalidate_sharers(
        &mut self,
        address: u64,
        keep: Option<TileId>,
        flusher: Option<TileId>,
    ) -> ProtocolResult<()> {
        let head = self.head(address)?;
        let (requester, modeled) = (head.requester(), head.msg().modeled);
        let list = self.cache.entry_mut(address)?.sharers_list();
        let kind = if flusher.is_some() {
            self.counters.flushes_sent += 1;
            MsgType::InvFlushCombinedReq
        } else {
            MsgType::InvReq
        };
        let inv = Self::to_l2(kind, requester, address, modeled);
        if list.broadcast {
            self.counters.broadcasts += 1;
            self.counters.invalidations_sent += 1;
            self.transport.broadcast(
                self.tile,
                self.now(),
                &inv.with_receivers(flusher, list.replies),
            )?;
            if list.replies == Replies::Nobody {
                return self.forget_sharers(address);
            }
            return Ok(());
        }
        let inv = inv.with_receivers(flusher, Replies::Holders);
        for tile in list.tiles.into_iter().filter(|t| Some(*t) != keep) {
            self.counters.invalidations_sent += 1;
            self.send(tile, &inv)?;
        }
        Ok(())
    }

    /// Drops every sharer but the owner once an unacknowledged broadcast is out.
    fn forget_sharers(&mut self, address: u64) -> ProtocolResult<()> {
        let entry = self.cache.entry_mut(address)?;
        entry.clear_sharers();
        if entry.owner().is_none() {
            entry.set_state(DirectoryState::Uncached);
        }
        self.restart_if_ready(address, None)
    }

    fn process_ex_req(&mut self, address: u64) -> ProtocolResult<()> {
        if !self.ensure_entry(address)? {
            return Ok(());
        }
        let head = self.head(address)?;
        let (requester, modeled) = (head.requester(), head.msg().modeled);
        let entry = self.cache.entry_mut(address)?;

        match entry.state() {
            DirectoryState::Modified => {
                let owner = owner_of(entry)?;
                if owner == requester {
                    self.counters.upgrades += 1;
                    self.notify(requester, MsgType::UpgradeRep, requester, address, modeled)?;
                    return self.process_next_req(address);
                }
                self.counters.flushes_sent += 1;
                self.head_mut(address)?.set_expected_responder(Some(owner));
                self.notify(owner, MsgType::FlushReq, requester, address, modeled)
            }
            DirectoryState::Owned => {
                let owner = owner_of(entry)?;
                if entry.sole_sharer_is(requester) {
                    entry.set_state(DirectoryState::Modified);
                    self.counters.upgrades += 1;
                    self.notify(requester, MsgType::UpgradeRep, requester, address, modeled)?;
                    return self.process_next_req(address);
                }
                self.invalidate_sharers(address, Some(requester), Some(owner))
            }
            DirectoryState::Shared => {
                if entry.sole_sharer_is(requester) {
                    entry.set_state(DirectoryState::Modified);
                    entry.set_owner(Some(requester));
                    self.counters.upgrades += 1;
                    self.notify(requester, MsgType::UpgradeRep, requester, address, modeled)?;
                    return self.process_next_req(address);
                }
                self.invalidate_sharers(address, Some(requester), None)
            }
            DirectoryState::Uncached => {
                if !entry.add_sharer(requester) {
                    return Err(ProtocolError::violation(
                        address,
                        "room for one sharer",
                        "full list",
                    ));
                }
                entry.set_owner(Some(requester));
                entry.set_state(DirectoryState::Modified);
                self.handle_reply_from_store(address, MsgType::ExRep)?;
                self.process_next_req(address)
            }
        }
    }

    fn process_sh_req(&mut self, address: u64) -> ProtocolResult<()> {
        if !self.ensure_entry(address)? {
            return Ok(());
        }
        let head = self.head(address)?;
        let (requester, modeled) = (head.requester(), head.msg().modeled);
        let has_data = head.buffered_data().is_some();
        let entry = self.cache.entry_mut(address)?;

        match entry.state() {
            DirectoryState::Modified => {
                let owner = owner_of(entry)?;
                self.counters.writebacks_sent += 1;
                self.head_mut(address)?.set_expected_responder(Some(owner));
                self.notify(owner, MsgType::WbReq, requester, address, modeled)
            }
            DirectoryState::Owned => {
                let owner = owner_of(entry)?;
                if !has_data {
                    // Memory is stale; the owner supplies the line and stays owner.
                    self.counters.writebacks_sent += 1;
                    self.head_mut(address)?.set_expected_responder(Some(owner));
                    return self.notify(owner, MsgType::WbReq, requester, address, modeled);
                }
                if entry.add_sharer(requester) {
                    self.handle_reply_from_store(address, MsgType::ShRep)?;
                    return self.process_next_req(address);
                }
                // Full list without broadcast: the owner gives up its copy.
                self.counters.flushes_sent += 1;
                self.head_mut(address)?.set_expected_responder(Some(owner));
                self.notify(owner, MsgType::FlushReq, requester, address, modeled)
            }
            DirectoryState::Shared => {
                if entry.add_sharer(requester) {
                    self.handle_reply_from_store(address, MsgType::ShRep)?;
                    return self.process_next_req(address);
                }
                // Full list without broadcast: make room by invalidating one sharer.
                let victim = entry
                    .one_sharer()
                    .ok_or_else(|| ProtocolError::violation(address, "a sharer", "none"))?;
                self.counters.invalidations_sent += 1;
                self.head_mut(address)?.set_expected_responder(Some(victim));
                self.notify(victim, MsgType::InvReq, requester, address, modeled)
            }
            DirectoryState::Uncached => {
                if !entry.add_sharer(requester) {
                    return Err(ProtocolError::violation(
                        address,
                        "room for one sharer",
                        "full list",
                    ));
                }
                entry.set_state(DirectoryState::Shared);
                self.handle_reply_from_store(address, MsgType::ShRep)?;
                self.process_next_req(address)
            }
        }
    }

    fn process_nullify_req(&mut self, address: u64) -> ProtocolResult<()> {
        let head = self.head(address)?;
        let (requester, modeled) = (head.requester(), head.msg().modeled);
        let entry = self.cache.entry_mut(address)?;

        match entry.state() {
            DirectoryState::Modified => {
                let owner = owner_of(entry)?;
                self.counters.flushes_sent += 1;
                self.head_mut(address)?.set_expected_responder(Some(owner));
                self.notify(owner, MsgType::FlushReq, requester, address, modeled)
            }
            DirectoryState::Owned => {
                let owner = owner_of(entry)?;
                self.invalidate_sharers(address, None, Some(owner))
            }
            DirectoryState::Shared => self.invalidate_sharers(address, None, None),
            DirectoryState::Uncached => self.finish_nullify(address),
        }
    }

    /// Frees the nullified entry, resumes the transaction waiting for its way and then the
    /// victim's own queue.
    fn finish_nullify(&mut self, victim: u64) -> ProtocolResult<()> {
        let _ = self.queue.dequeue(victim);
        let waiting = self.cache.complete_nullify(victim);
        tracing::debug!(tile = %self.tile, victim, ?waiting, "nullify complete");
        if let Some(waiting) = waiting
            && !self.queue.is_empty(waiting)
        {
            self.restart_head(waiting)?;
        }
        if !self.queue.is_empty(victim) {
            self.restart_head(victim)?;
        }
        Ok(())
    }

    /// Retires the head transaction of `address` and starts the next one.
    fn process_next_req(&mut self, address: u64) -> ProtocolResult<()> {
        let _ = self.queue.dequeue(address);
        if self.queue.is_empty(address) {
            self.release_if_uncached(address);
            return Ok(());
        }
        self.restart_head(address)
    }

    /// Drops the entry of an idle, uncached line.
    fn release_if_uncached(&mut self, address: u64) {
        if self.queue.is_empty(address)
            && !self.cache.is_nullifying(address)
            && self
                .cache
                .get(address)
                .is_some_and(|entry| entry.state() == DirectoryState::Uncached)
        {
            let _ = self.cache.invalidate(address);
        }
    }

    /// Sends the data reply of the head transaction once its line data is available.
    ///
    /// Data flushed back during the transaction is used if present; otherwise the line is
    /// fetched from DRAM and the fetch latency is charged to the protocol clock.
    pub fn handle_reply_from_store(&mut self, address: u64, kind: MsgType) -> ProtocolResult<()> {
        let now = self.now();
        let head = self
            .queue
            .front(address)
            .ok_or_else(|| ProtocolError::violation(address, "queued request", "empty queue"))?;
        let (requester, modeled) = (head.requester(), head.msg().modeled);
        let data = match head.buffered_data() {
            Some(data) => data.to_vec(),
            None => {
                let mut data = vec![0; self.line_size];
                let latency = self.dram.get_data(address, &mut data, now, modeled);
                self.perf.incr_time(Role::Sim, latency);
                data
            }
        };
        tracing::trace!(tile = %self.tile, address, %kind, %requester, "data reply");
        self.send(
            requester,
            &Self::to_l2(kind, requester, address, modeled).with_payload(&data),
        )
    }

    /// Returns `true` for an eviction notice from a tile the directory already forgot.
    ///
    /// After an unacknowledged broadcast, a sharer's notice can still be in flight.
    fn forgotten_sharer(&self, sender: TileId, address: u64) -> bool {
        self.cache.directory_type() == DirectoryType::BroadcastNoAck
            && self
                .cache
                .get(address)
                .is_none_or(|entry| !entry.overflowed() && !entry.has_sharer(sender))
    }

    fn process_inv_rep(&mut self, sender: TileId, msg: &ShmemMsg) -> ProtocolResult<()> {
        let address = msg.address;
        if self.forgotten_sharer(sender, address) {
            tracing::debug!(tile = %self.tile, address, %sender, "notice from forgotten sharer");
            return Ok(());
        }
        let entry = self.cache.entry_mut(address)?;
        match entry.state() {
            DirectoryState::Shared | DirectoryState::Owned => {}
            other => return Err(ProtocolError::violation(address, "SHARED or OWNED", other)),
        }
        // The owner answers with its data, never with a bare acknowledgement.
        if entry.owner() == Some(sender) {
            return Err(ProtocolError::UnexpectedReply {
                address,
                kind: msg.kind.name(),
                sender,
            });
        }
        entry.remove_sharer(sender, msg.reply_expected());
        if entry.state() == DirectoryState::Shared
            && entry.num_sharers() == 0
            && !entry.overflowed()
        {
            entry.set_state(DirectoryState::Uncached);
        }

        if self.queue.is_empty(address) {
            self.counters.evictions_received += 1;
            self.release_if_uncached(address);
            return Ok(());
        }
        self.restart_if_ready(address, Some(sender))
    }

    fn process_flush_rep(&mut self, sender: TileId, msg: &ShmemMsg) -> ProtocolResult<()> {
        let address = msg.address;
        let data = reply_data(msg)?;
        let entry = self.cache.entry_mut(address)?;
        let dirty = matches!(
            entry.state(),
            DirectoryState::Modified | DirectoryState::Owned
        );
        if !dirty || entry.owner() != Some(sender) {
            return Err(ProtocolError::UnexpectedReply {
                address,
                kind: msg.kind.name(),
                sender,
            });
        }
        entry.remove_sharer(sender, msg.reply_expected());
        entry.set_owner(None);
        if entry.num_sharers() > 0 || entry.overflowed() {
            entry.set_state(DirectoryState::Shared);
        } else {
            entry.set_state(DirectoryState::Uncached);
        }

        let now = self.now();
        let latency = self.dram.put_data(address, data, now, msg.modeled);
        self.perf.incr_time(Role::Sim, latency);

        match self.queue.front_mut(address) {
            Some(head) => {
                head.buffer_data(data);
                self.restart_if_ready(address, Some(sender))
            }
            None => {
                self.counters.evictions_received += 1;
                self.release_if_uncached(address);
                Ok(())
            }
        }
    }

    fn process_wb_rep(&mut self, sender: TileId, msg: &ShmemMsg) -> ProtocolResult<()> {
        let address = msg.address;
        let data = reply_data(msg)?;
        let entry = self.cache.entry_mut(address)?;
        if entry.owner() != Some(sender) {
            return Err(ProtocolError::UnexpectedReply {
                address,
                kind: msg.kind.name(),
                sender,
            });
        }
        match entry.state() {
            DirectoryState::Modified => {
                let state = self.protocol.written_back_entry();
                entry.set_state(state);
                if state != DirectoryState::Owned {
                    entry.set_owner(None);
                }
                if self.protocol.write_back_updates_memory() {
                    let now = self.now();
                    let latency = self.dram.put_data(address, data, now, msg.modeled);
                    self.perf.incr_time(Role::Sim, latency);
                }
            }
            // The owner supplied its dirty line for another reader.
            DirectoryState::Owned => {}
            other => return Err(ProtocolError::violation(address, "MODIFIED or OWNED", other)),
        }

        let head = self.head_mut(address)?;
        if head.kind() != MsgType::ShReq {
            return Err(ProtocolError::violation(
                address,
                "SH_REQ awaiting write-back",
                head.kind(),
            ));
        }
        head.buffer_data(data);
        self.restart_if_ready(address, Some(sender))
    }
}

fn owner_of(entry: &DirectoryEntry) -> ProtocolResult<TileId> {
    entry
        .owner()
        .ok_or_else(|| ProtocolError::violation(entry.address(), "owner", "none"))
}

fn reply_data(msg: &ShmemMsg) -> ProtocolResult<&[u8]> {
    msg.data().ok_or_else(|| {
        ProtocolError::MalformedPacket(format!(
            "{} for {:#x} without data",
            msg.kind, msg.address
        ))
    })
}
