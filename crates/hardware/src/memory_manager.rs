//! Per-tile memory manager.
//!
//! The memory manager wires one tile's controllers together and is the tile's only entry
//! point. It provides:
//! 1. **Core Interface:** `process_mem_op` for one line and `core_access` for arbitrary
//!    byte ranges, called by the application role.
//! 2. **Network Interface:** `handle_msg_from_network`, called by the protocol role for
//!    every packet in the tile's inbox and dispatched by receiving component.
//! 3. **Statistics:** A snapshot of the tile's counters and clocks.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::coherence::{
    DramDirectoryCntlr, HomeLookup, L1CacheCntlr, L1Caches, L2CacheCntlr, MsgType, ShmemMsg,
    protocol,
};
use crate::common::{
    LockSignal, MemComponent, MemOp, ProtocolError, ProtocolResult, TileId, line_address,
    line_offset,
};
use crate::config::Config;
use crate::dram::DramCntlr;
use crate::net::{NetPacket, Rendezvous, Transport};
use crate::perf::{Role, ShmemPerfModel};
use crate::stats::TileStats;

/// Tries a multi-line locked access makes before giving up.
pub const LOCKED_ACCESS_ATTEMPTS: usize = 16;

/// Controllers and clocks of one tile.
#[derive(Debug)]
pub struct MemoryManager {
    tile: TileId,
    line_size: usize,
    l1_caches: Arc<L1Caches>,
    l1: L1CacheCntlr,
    l2: Arc<L2CacheCntlr>,
    directory: Option<Mutex<DramDirectoryCntlr>>,
    rendezvous: Arc<Rendezvous>,
    perf: Arc<ShmemPerfModel>,
}

impl MemoryManager {
    /// Builds the controllers of `tile`.
    ///
    /// Tiles listed as memory controllers also get a directory slice and a DRAM controller.
    pub fn new(tile: TileId, config: &Config, transport: Arc<dyn Transport>) -> Self {
        Self::with_dram(tile, config, transport, |config| {
            DramCntlr::new(&config.dram, config.line_size())
        })
    }

    /// Builds the controllers of `tile` with a caller-provided DRAM controller.
    ///
    /// # Arguments
    ///
    /// * `tile` - Tile to build.
    /// * `config` - Validated system configuration.
    /// * `transport` - Network shared by every tile.
    /// * `dram` - Called once if `tile` hosts a memory controller.
    pub fn with_dram(
        tile: TileId,
        config: &Config,
        transport: Arc<dyn Transport>,
        dram: impl FnOnce(&Config) -> DramCntlr,
    ) -> Self {
        let controllers = config.memory_controller_tiles();
        let line_size = config.line_size();
        let perf = Arc::new(ShmemPerfModel::new());
        let rendezvous = Arc::new(Rendezvous::new(tile));
        let l1_caches = Arc::new(L1Caches::new(&config.l1_icache, &config.l1_dcache));
        let home = HomeLookup::new(controllers.clone(), line_size);
        let protocol = protocol::create(config.general.caching_protocol);

        let l2 = Arc::new(L2CacheCntlr::new(
            tile,
            &config.l2_cache,
            Arc::clone(&l1_caches),
            home,
            Arc::clone(&transport),
            Arc::clone(&rendezvous),
            Arc::clone(&perf),
            Arc::clone(&protocol),
        ));
        let l1 = L1CacheCntlr::new(
            tile,
            Arc::clone(&l1_caches),
            (&config.l1_icache, &config.l1_dcache),
            Arc::clone(&l2),
            Arc::clone(&transport),
            Arc::clone(&rendezvous),
            Arc::clone(&perf),
        );
        let directory = controllers.contains(&tile).then(|| {
            Mutex::new(DramDirectoryCntlr::new(
                tile,
                config,
                dram(config),
                Arc::clone(&transport),
                Arc::clone(&perf),
                protocol,
            ))
        });

        Self {
            tile,
            line_size,
            l1_caches,
            l1,
            l2,
            directory,
            rendezvous,
            perf,
        }
    }

    /// Tile this manager belongs to.
    pub const fn tile(&self) -> TileId {
        self.tile
    }

    /// The tile's clocks.
    pub fn perf(&self) -> &ShmemPerfModel {
        &self.perf
    }

    /// The tile's L2 controller.
    pub fn l2(&self) -> &L2CacheCntlr {
        &self.l2
    }

    /// The tile's L1 controller.
    pub const fn l1(&self) -> &L1CacheCntlr {
        &self.l1
    }

    /// The tile's directory slice, on memory-controller tiles.
    pub const fn directory(&self) -> Option<&Mutex<DramDirectoryCntlr>> {
        self.directory.as_ref()
    }

    /// Hand-off between the tile's two roles.
    pub fn rendezvous(&self) -> &Rendezvous {
        &self.rendezvous
    }

    /// Performs one core access within a single line.
    ///
    /// Unmodeled accesses leave the application clock where it was.
    ///
    /// # Arguments
    ///
    /// * `component` - L1 instruction or data cache.
    /// * `lock` - Lock signal of the access.
    /// * `op` - Read, exclusive read or write.
    /// * `ca_address` - Line-aligned address.
    /// * `offset` - Byte offset within the line.
    /// * `buf` - Destination of loads, source of stores.
    /// * `modeled` - Charge latency and count the access.
    ///
    /// # Returns
    ///
    /// `true` on a first-attempt L1 hit.
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
        let start = self.perf.time(Role::App);
        let result = self
            .l1
            .process_mem_op(component, lock, op, ca_address, offset, buf, modeled);
        if !modeled {
            self.perf.set_time(Role::App, start);
        }
        result
    }

    /// Performs a core access of any length, split at line boundaries.
    ///
    /// A `Lock` applies to the first line touched and an `Unlock` to the last; the lines in
    /// between are accessed inside the open locked sequence. A locked sequence cannot miss,
    /// so a `Lock` spanning several lines first fetches the later lines, then locks the
    /// first one and checks that the rest are still held. It retries if one was taken away
    /// in between.
    ///
    /// # Returns
    ///
    /// `true` if every line hit in the L1 on the first attempt.
    ///
    /// # Errors
    ///
    /// [`ProtocolError::LockedAccessStarved`] if a multi-line `Lock` cannot hold all of its
    /// lines after [`LOCKED_ACCESS_ATTEMPTS`] tries.
    pub fn core_access(
        &self,
        component: MemComponent,
        lock: LockSignal,
        op: MemOp,
        address: u64,
        buf: &mut [u8],
        modeled: bool,
    ) -> ProtocolResult<bool> {
        let lines = self.lines_of(address, buf.len());
        if lock != LockSignal::Lock || lines.len() < 2 {
            return self.access_lines(component, lock, op, address, buf, modeled);
        }

        let prefetch_op = if op.needs_exclusive() {
            MemOp::ReadEx
        } else {
            MemOp::Read
        };
        let mut scratch = [0u8; 1];
        for _ in 0..LOCKED_ACCESS_ATTEMPTS {
            for &line in &lines[1..] {
                let _ = self.process_mem_op(
                    component,
                    LockSignal::None,
                    prefetch_op,
                    line,
                    0,
                    &mut scratch,
                    modeled,
                )?;
            }
            let first = lines[0];
            let offset = line_offset(address, self.line_size);
            let len = (self.line_size - offset).min(buf.len());
            let hit = self.process_mem_op(
                component,
                LockSignal::Lock,
                op,
                first,
                offset,
                &mut buf[..len],
                modeled,
            )?;
            if lines[1..]
                .iter()
                .all(|&line| self.l1.sequence_holds(component, op, line))
            {
                let rest = self.access_lines(
                    component,
                    LockSignal::None,
                    op,
                    address + len as u64,
                    &mut buf[len..],
                    modeled,
                )?;
                return Ok(hit && rest);
            }
            tracing::debug!(tile = %self.tile, address, "locked access lost a line, retrying");
            self.l1.abandon_sequence(component);
        }
        Err(ProtocolError::LockedAccessStarved { address })
    }

    fn lines_of(&self, address: u64, len: usize) -> Vec<u64> {
        if len == 0 {
            return Vec::new();
        }
        let first = line_address(address, self.line_size);
        let last = line_address(address + len as u64 - 1, self.line_size);
        (first..=last).step_by(self.line_size).collect()
    }

    fn access_lines(
        &self,
        component: MemComponent,
        lock: LockSignal,
        op: MemOp,
        address: u64,
        buf: &mut [u8],
        modeled: bool,
    ) -> ProtocolResult<bool> {
        let mut all_hit = true;
        let mut done = 0;
        while done < buf.len() {
            let current = address + done as u64;
            let offset = line_offset(current, self.line_size);
            let len = (self.line_size - offset).min(buf.len() - done);
            let first = done == 0;
            let last = done + len == buf.len();
            let signal = match lock {
                LockSignal::Lock if !first => LockSignal::None,
                LockSignal::Unlock if !last => LockSignal::None,
                other => other,
            };
            all_hit &= self.process_mem_op(
                component,
                signal,
                op,
                line_address(current, self.line_size),
                offset,
                &mut buf[done..done + len],
                modeled,
            )?;
            done += len;
        }
        Ok(all_hit)
    }

    /// Handles one packet from the tile's inbox.
    ///
    /// The protocol clock jumps to the packet's arrival time before the message is
    /// dispatched to the receiving component.
    pub fn handle_msg_from_network(&self, packet: &NetPacket) -> ProtocolResult<()> {
        let msg = ShmemMsg::decode(&packet.data)?;
        self.perf.set_time(Role::Sim, packet.time);
        tracing::debug!(
            tile = %self.tile,
            sender = %packet.sender,
            time = packet.time,
            kind = %msg.kind,
            address = msg.address,
            "receive"
        );

        match (msg.receiver_component, msg.sender_component) {
            (MemComponent::L2Cache, sender) if sender.is_l1() => self.l2.handle_msg_from_l1(&msg),
            (MemComponent::L2Cache, MemComponent::DramDirectory) => {
                self.l2.handle_msg_from_directory(packet.sender, &msg)
            }
            (MemComponent::DramDirectory, MemComponent::L2Cache) => {
                let mut directory = self
                    .directory
                    .as_ref()
                    .ok_or(ProtocolError::NoMemoryController(self.tile))?
                    .lock();
                match msg.kind {
                    MsgType::ExReq | MsgType::ShReq => {
                        directory.handle_request_from_l2(packet.sender, msg)
                    }
                    _ => directory.handle_reply_from_l2(packet.sender, &msg),
                }
            }
            (receiver, sender) => Err(ProtocolError::Misrouted {
                kind: msg.kind.name(),
                sender: sender.name(),
                receiver: receiver.name(),
            }),
        }
    }

    /// Snapshot of the tile's counters and clocks.
    pub fn stats(&self) -> TileStats {
        let (l1_icache, l1_dcache) = {
            let counters = |component| {
                self.l1_caches
                    .cache(component)
                    .map(|cache| cache.lock().counters().clone())
                    .unwrap_or_default()
            };
            (
                counters(MemComponent::L1ICache),
                counters(MemComponent::L1DCache),
            )
        };
        let (directory, dram) = self.directory.as_ref().map_or((None, None), |dir| {
            let dir = dir.lock();
            (Some(dir.counters().clone()), Some(dir.dram().counters().clone()))
        });
        TileStats {
            tile: self.tile,
            l1_icache,
            l1_dcache,
            l2_cache: self.l2.counters(),
            directory,
            dram,
            app_cycles: self.perf.time(Role::App),
            sim_cycles: self.perf.time(Role::Sim),
        }
    }
}
