//! Directory entries and the directory cache.
//!
//! Entries live in an arena indexed by `(set, way)`. An address has an entry only while
//! some tile caches it or a transaction is queued for it. When a set is full, the
//! directory nullifies a victim entry first; the pending-nullify table remembers which
//! address is waiting for the victim's way.

/// Sharer-tracking schemes.
pub mod sharers;

use std::collections::HashMap;

use self::sharers::{SharerList, SharerSet};
use crate::common::{ProtocolError, ProtocolResult, TileId, floor_log2};
use crate::config::{DirectoryConfig, DirectoryType};

/// Directory-side coherence state of a line.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum DirectoryState {
    /// No tile caches the line.
    #[default]
    Uncached,
    /// One or more tiles hold read-only copies.
    Shared,
    /// The owner holds a dirty copy that other sharers read; memory is stale. Only the
    /// MOSI protocol enters it.
    Owned,
    /// One tile holds the only, writable copy.
    Modified,
}

/// Directory entry of one line.
#[derive(Debug)]
pub struct DirectoryEntry {
    address: u64,
    state: DirectoryState,
    owner: Option<TileId>,
    sharers: Box<dyn SharerSet>,
}

impl DirectoryEntry {
    /// Creates an uncached entry.
    pub fn new(address: u64, sharers: Box<dyn SharerSet>) -> Self {
        Self {
            address,
            state: DirectoryState::Uncached,
            owner: None,
            sharers,
        }
    }

    /// Line address.
    pub const fn address(&self) -> u64 {
        self.address
    }

    /// Directory state.
    pub const fn state(&self) -> DirectoryState {
        self.state
    }

    /// Sets the directory state.
    pub const fn set_state(&mut self, state: DirectoryState) {
        self.state = state;
    }

    /// Owner of a modified or owned line.
    pub const fn owner(&self) -> Option<TileId> {
        self.owner
    }

    /// Sets or clears the owner.
    pub const fn set_owner(&mut self, owner: Option<TileId>) {
        self.owner = owner;
    }

    /// Returns `true` if `tile` is a known sharer.
    pub fn has_sharer(&self, tile: TileId) -> bool {
        self.sharers.has_sharer(tile)
    }

    /// Adds a sharer; `false` if the scheme refuses.
    pub fn add_sharer(&mut self, tile: TileId) -> bool {
        self.sharers.add_sharer(tile)
    }

    /// Removes a sharer.
    pub fn remove_sharer(&mut self, tile: TileId, reply_expected: bool) {
        self.sharers.remove_sharer(tile, reply_expected);
    }

    /// Number of sharers (or acknowledgements owed while broadcasting).
    pub fn num_sharers(&self) -> usize {
        self.sharers.num_sharers()
    }

    /// Tiles to contact for an invalidation.
    pub fn sharers_list(&self) -> SharerList {
        self.sharers.sharers_list()
    }

    /// Forgets every sharer except the owner, after an invalidation nobody acknowledges.
    pub fn clear_sharers(&mut self) {
        self.sharers.clear();
        if let Some(owner) = self.owner {
            let _ = self.sharers.add_sharer(owner);
        }
    }

    /// Some tracked sharer.
    pub fn one_sharer(&self) -> Option<TileId> {
        self.sharers.one_sharer()
    }

    /// Returns `true` while the sharer list is incomplete.
    pub fn overflowed(&self) -> bool {
        self.sharers.overflowed()
    }

    /// Returns `true` if the exact sharer set is `{tile}`.
    pub fn sole_sharer_is(&self, tile: TileId) -> bool {
        !self.overflowed() && self.num_sharers() == 1 && self.has_sharer(tile)
    }

    /// Returns `true` if nobody but `tile` may still hold the line.
    pub fn only_sharer_left(&self, tile: TileId) -> bool {
        !self.overflowed()
            && match self.num_sharers() {
                0 => true,
                1 => self.has_sharer(tile),
                _ => false,
            }
    }

    /// Extra lookup latency of the sharer representation.
    pub fn latency(&self) -> u64 {
        self.sharers.latency()
    }

    /// Checks the state/owner/sharer invariants of an idle entry.
    pub fn check_invariants(&self) -> ProtocolResult<()> {
        let ok = match self.state {
            DirectoryState::Modified => {
                self.num_sharers() == 1 && self.owner.is_some_and(|o| self.has_sharer(o))
            }
            DirectoryState::Owned => {
                self.owner.is_some_and(|o| self.has_sharer(o)) && self.num_sharers() >= 1
            }
            DirectoryState::Shared => {
                self.owner.is_none() && (self.num_sharers() >= 1 || self.overflowed())
            }
            DirectoryState::Uncached => self.owner.is_none() && self.num_sharers() == 0,
        };
        if ok {
            Ok(())
        } else {
            Err(ProtocolError::violation(
                self.address,
                format!("consistent {:?} entry", self.state),
                (self.owner, self.sharers_list()),
            ))
        }
    }
}

/// Slot of an entry in the arena.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Slot {
    /// Set index.
    pub set: usize,
    /// Way within the set.
    pub way: usize,
}

/// Result of trying to give an address a directory entry.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Allocation {
    /// The entry exists (it was present or a free way was found).
    Ready(Slot),
    /// The set is full; the caller must nullify a victim.
    SetFull(usize),
}

/// Set-associative store of directory entries for one slice.
#[derive(Debug)]
pub struct DirectoryCache {
    entries: Vec<Option<DirectoryEntry>>,
    index: HashMap<u64, Slot>,
    num_sets: usize,
    associativity: usize,
    log_line_size: u32,
    num_slices: u64,
    directory_type: DirectoryType,
    max_hw_sharers: usize,
    total_tiles: usize,
    trap_penalty: u64,
    access_time: u64,
    pending_nullify: HashMap<u64, u64>,
}

impl DirectoryCache {
    /// Creates an empty directory cache.
    ///
    /// # Arguments
    ///
    /// * `config` - Directory configuration.
    /// * `total_entries` - Resolved entry count of this slice.
    /// * `line_size` - Cache line size in bytes.
    /// * `total_tiles` - Tiles in the system.
    /// * `num_slices` - Memory controllers (homes are interleaved across them).
    pub fn new(
        config: &DirectoryConfig,
        total_entries: usize,
        line_size: usize,
        total_tiles: usize,
        num_slices: usize,
    ) -> Self {
        let associativity = config.associativity.max(1);
        let num_sets = (total_entries / associativity).max(1);
        let mut entries = Vec::with_capacity(num_sets * associativity);
        entries.resize_with(num_sets * associativity, || None);
        Self {
            entries,
            index: HashMap::new(),
            num_sets,
            associativity,
            log_line_size: floor_log2(line_size),
            num_slices: num_slices.max(1) as u64,
            directory_type: config.directory_type,
            max_hw_sharers: config.max_hw_sharers,
            total_tiles,
            trap_penalty: config.limitless_trap_penalty,
            access_time: config.access_time,
            pending_nullify: HashMap::new(),
        }
    }

    /// Number of sets.
    pub const fn num_sets(&self) -> usize {
        self.num_sets
    }

    /// Ways per set.
    pub const fn associativity(&self) -> usize {
        self.associativity
    }

    /// Sharer-tracking scheme of every entry.
    pub const fn directory_type(&self) -> DirectoryType {
        self.directory_type
    }

    /// Set that `address` maps to.
    ///
    /// Homes interleave lines across slices, so the slice-local line number is used.
    pub const fn set_index(&self, address: u64) -> usize {
        (((address >> self.log_line_size) / self.num_slices) % self.num_sets as u64) as usize
    }

    const fn slot_index(&self, slot: Slot) -> usize {
        slot.set * self.associativity + slot.way
    }

    fn fresh_entry(&self, address: u64) -> DirectoryEntry {
        DirectoryEntry::new(
            address,
            sharers::create(
                self.directory_type,
                self.max_hw_sharers,
                self.total_tiles,
                self.trap_penalty,
            ),
        )
    }

    /// Entry of `address`, if it has one.
    pub fn get(&self, address: u64) -> Option<&DirectoryEntry> {
        let slot = *self.index.get(&address)?;
        self.entries[self.slot_index(slot)].as_ref()
    }

    /// Mutable entry of `address`, if it has one.
    pub fn get_mut(&mut self, address: u64) -> Option<&mut DirectoryEntry> {
        let slot = *self.index.get(&address)?;
        let idx = self.slot_index(slot);
        self.entries[idx].as_mut()
    }

    /// Mutable entry of `address`, or `MissingDirectoryEntry`.
    pub fn entry_mut(&mut self, address: u64) -> ProtocolResult<&mut DirectoryEntry> {
        self.get_mut(address)
            .ok_or(ProtocolError::MissingDirectoryEntry { address })
    }

    /// Lookup latency for `address`: access time plus the sharer representation's penalty.
    pub fn access_latency(&self, address: u64) -> u64 {
        self.access_time + self.get(address).map_or(0, DirectoryEntry::latency)
    }

    /// Gives `address` an entry in a free way, unless its set is full.
    pub fn allocate(&mut self, address: u64) -> Allocation {
        if let Some(&slot) = self.index.get(&address) {
            return Allocation::Ready(slot);
        }
        let set = self.set_index(address);
        let base = set * self.associativity;
        match (0..self.associativity).find(|w| self.entries[base + w].is_none()) {
            Some(way) => {
                let slot = Slot { set, way };
                self.entries[base + way] = Some(self.fresh_entry(address));
                let _ = self.index.insert(address, slot);
                Allocation::Ready(slot)
            }
            None => Allocation::SetFull(set),
        }
    }

    /// Entries of `set`.
    pub fn entries_in_set(&self, set: usize) -> impl Iterator<Item = &DirectoryEntry> {
        let base = set * self.associativity;
        self.entries[base..base + self.associativity]
            .iter()
            .filter_map(Option::as_ref)
    }

    /// Drops the entry of `address`.
    pub fn invalidate(&mut self, address: u64) -> Option<DirectoryEntry> {
        let slot = self.index.remove(&address)?;
        let idx = self.slot_index(slot);
        self.entries[idx].take()
    }

    /// Records that `waiting` takes over the way of `victim` once it is nullified.
    pub fn reserve_for(&mut self, victim: u64, waiting: u64) {
        let _ = self.pending_nullify.insert(victim, waiting);
    }

    /// Returns `true` if `victim` is being nullified.
    pub fn is_nullifying(&self, victim: u64) -> bool {
        self.pending_nullify.contains_key(&victim)
    }

    /// Replaces the nullified `victim` with a fresh entry for the address waiting on it.
    ///
    /// # Returns
    ///
    /// The waiting address, or `None` if `victim` had no reservation (its entry is simply
    /// dropped).
    pub fn complete_nullify(&mut self, victim: u64) -> Option<u64> {
        let slot = self.index.remove(&victim);
        let waiting = self.pending_nullify.remove(&victim);
        if let Some(slot) = slot {
            let idx = self.slot_index(slot);
            self.entries[idx] = match waiting {
                Some(address) => {
                    let _ = self.index.insert(address, slot);
                    Some(self.fresh_entry(address))
                }
                None => None,
            };
        }
        waiting
    }

    /// Number of live entries.
    pub fn occupancy(&self) -> usize {
        self.index.len()
    }

    /// Iterates every live entry.
    pub fn iter(&self) -> impl Iterator<Item = &DirectoryEntry> {
        self.entries.iter().filter_map(Option::as_ref)
    }
}
