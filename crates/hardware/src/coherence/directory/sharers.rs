//! Sharer-tracking schemes.
//!
//! Every scheme tracks up to `max_hw_sharers` tiles exactly. They differ once one more
//! tile has to be added:
//! - `FullMap`: a bit per tile, never overflows.
//! - `LimitedBroadcast`: gives up on the list; the next invalidation is broadcast to every
//!   tile and every tile must acknowledge it.
//! - `BroadcastNoAck`: gives up on the list; the next invalidation is broadcast and nobody
//!   acknowledges it, so the directory forgets every sharer once it is sent.
//! - `LimitedNoBroadcast`: refuses the add; the directory invalidates an existing sharer
//!   and retries.
//! - `Ackwise`: keeps counting sharers exactly but stops recording who they are; the next
//!   invalidation is broadcast and only the counted holders acknowledge it.
//! - `Limitless`: migrates the list to an unbounded software set and charges a trap
//!   penalty on every later lookup.

use std::collections::BTreeSet;
use std::fmt::Debug;

use crate::coherence::msg::Replies;
use crate::common::TileId;
use crate::config::DirectoryType;

/// Sharers to contact for an invalidation.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SharerList {
    /// The list is incomplete; every tile must be contacted.
    pub broadcast: bool,
    /// Tracked sharers, ascending.
    pub tiles: Vec<TileId>,
    /// Who answers a broadcast invalidation.
    pub replies: Replies,
}

/// Behaviour common to every sharer-tracking scheme.
pub trait SharerSet: Send + Debug {
    /// Returns `true` if `tile` is known to share the line.
    fn has_sharer(&self, tile: TileId) -> bool;

    /// Adds a sharer. Adding a tracked sharer again is a no-op.
    ///
    /// # Returns
    ///
    /// `false` if the scheme cannot track another sharer and one must be evicted first.
    fn add_sharer(&mut self, tile: TileId) -> bool;

    /// Removes a sharer.
    ///
    /// # Arguments
    ///
    /// * `tile` - Tile that dropped its copy.
    /// * `reply_expected` - The removal acknowledges a broadcast that every tile answers.
    fn remove_sharer(&mut self, tile: TileId, reply_expected: bool);

    /// Number of sharers, or of acknowledgements still owed while broadcasting.
    fn num_sharers(&self) -> usize;

    /// Tiles to contact for an invalidation.
    fn sharers_list(&self) -> SharerList;

    /// Some tracked sharer, used when one must be evicted to make room.
    fn one_sharer(&self) -> Option<TileId>;

    /// Returns `true` while the tracked list is incomplete.
    fn overflowed(&self) -> bool {
        false
    }

    /// Extra lookup latency of the current representation, in cycles.
    fn latency(&self) -> u64 {
        0
    }

    /// Forgets every sharer.
    fn clear(&mut self);
}

/// Builds the sharer set selected by configuration.
///
/// # Arguments
///
/// * `kind` - Directory type.
/// * `max_hw_sharers` - Sharers tracked exactly in hardware.
/// * `total_tiles` - Tiles in the system.
/// * `trap_penalty` - Cycles charged per lookup of an overflowed limitless entry.
pub fn create(
    kind: DirectoryType,
    max_hw_sharers: usize,
    total_tiles: usize,
    trap_penalty: u64,
) -> Box<dyn SharerSet> {
    match kind {
        DirectoryType::FullMap => Box::new(FullMap::new(total_tiles)),
        DirectoryType::LimitedBroadcast => {
            Box::new(LimitedBroadcast::new(max_hw_sharers, total_tiles))
        }
        DirectoryType::BroadcastNoAck => Box::new(BroadcastNoAck::new(max_hw_sharers)),
        DirectoryType::LimitedNoBroadcast => Box::new(LimitedNoBroadcast::new(max_hw_sharers)),
        DirectoryType::Ackwise => Box::new(Ackwise::new(max_hw_sharers)),
        DirectoryType::Limitless => Box::new(Limitless::new(max_hw_sharers, trap_penalty)),
    }
}

/// One bit per tile.
#[derive(Clone, Debug)]
pub struct FullMap {
    words: Vec<u64>,
    count: usize,
}

impl FullMap {
    /// Creates an empty map over `total_tiles` tiles.
    pub fn new(total_tiles: usize) -> Self {
        Self {
            words: vec![0; total_tiles.div_ceil(64).max(1)],
            count: 0,
        }
    }

    fn locate(tile: TileId) -> (usize, u64) {
        (tile.index() / 64, 1u64 << (tile.index() % 64))
    }
}

impl SharerSet for FullMap {
    fn has_sharer(&self, tile: TileId) -> bool {
        let (word, bit) = Self::locate(tile);
        self.words.get(word).is_some_and(|w| w & bit != 0)
    }

    fn add_sharer(&mut self, tile: TileId) -> bool {
        let (word, bit) = Self::locate(tile);
        if word >= self.words.len() {
            self.words.resize(word + 1, 0);
        }
        if self.words[word] & bit == 0 {
            self.words[word] |= bit;
            self.count += 1;
        }
        true
    }

    fn remove_sharer(&mut self, tile: TileId, _reply_expected: bool) {
        let (word, bit) = Self::locate(tile);
        if let Some(w) = self.words.get_mut(word)
            && *w & bit != 0
        {
            *w &= !bit;
            self.count -= 1;
        }
    }

    fn num_sharers(&self) -> usize {
        self.count
    }

    fn sharers_list(&self) -> SharerList {
        let tiles = self
            .words
            .iter()
            .enumerate()
            .flat_map(|(i, &w)| {
                (0..64)
                    .filter(move |b| w & (1u64 << b) != 0)
                    .map(move |b| TileId::from(i * 64 + b))
            })
            .collect();
        SharerList {
            tiles,
            ..SharerList::default()
        }
    }

    fn one_sharer(&self) -> Option<TileId> {
        self.sharers_list().tiles.first().copied()
    }

    fn clear(&mut self) {
        self.words.fill(0);
        self.count = 0;
    }
}

/// Bounded pointer list shared by the limited schemes.
#[derive(Clone, Debug)]
struct Pointers {
    tiles: Vec<TileId>,
    capacity: usize,
}

impl Pointers {
    fn new(capacity: usize) -> Self {
        Self {
            tiles: Vec::with_capacity(capacity),
            capacity,
        }
    }

    fn contains(&self, tile: TileId) -> bool {
        self.tiles.contains(&tile)
    }

    fn is_full(&self) -> bool {
        self.tiles.len() >= self.capacity
    }

    fn insert(&mut self, tile: TileId) {
        if let Err(at) = self.tiles.binary_search(&tile) {
            self.tiles.insert(at, tile);
        }
    }

    fn remove(&mut self, tile: TileId) -> bool {
        let before = self.tiles.len();
        self.tiles.retain(|t| *t != tile);
        self.tiles.len() != before
    }

    fn first(&self) -> Option<TileId> {
        self.tiles.first().copied()
    }
}

/// Limited pointers; broadcast with acknowledgements from every tile on overflow.
#[derive(Clone, Debug)]
pub struct LimitedBroadcast {
    pointers: Pointers,
    total_tiles: usize,
    global: bool,
    owed_acks: usize,
}

impl LimitedBroadcast {
    /// Creates an empty set with `max_hw_sharers` pointers.
    pub fn new(max_hw_sharers: usize, total_tiles: usize) -> Self {
        Self {
            pointers: Pointers::new(max_hw_sharers),
            total_tiles,
            global: false,
            owed_acks: 0,
        }
    }
}

impl SharerSet for LimitedBroadcast {
    fn has_sharer(&self, tile: TileId) -> bool {
        self.pointers.contains(tile)
    }

    fn add_sharer(&mut self, tile: TileId) -> bool {
        if self.global || self.pointers.contains(tile) {
            return true;
        }
        if self.pointers.is_full() {
            self.global = true;
            self.owed_acks = self.total_tiles;
        } else {
            self.pointers.insert(tile);
        }
        true
    }

    fn remove_sharer(&mut self, tile: TileId, reply_expected: bool) {
        let _ = self.pointers.remove(tile);
        if reply_expected && self.global {
            self.owed_acks = self.owed_acks.saturating_sub(1);
            if self.owed_acks == 0 {
                self.global = false;
                self.pointers.tiles.clear();
            }
        }
    }

    fn num_sharers(&self) -> usize {
        if self.global {
            self.owed_acks
        } else {
            self.pointers.tiles.len()
        }
    }

    fn sharers_list(&self) -> SharerList {
        SharerList {
            broadcast: self.global,
            tiles: self.pointers.tiles.clone(),
            replies: Replies::Everyone,
        }
    }

    fn one_sharer(&self) -> Option<TileId> {
        self.pointers.first()
    }

    fn overflowed(&self) -> bool {
        self.global
    }

    fn clear(&mut self) {
        self.pointers.tiles.clear();
        self.global = false;
        self.owed_acks = 0;
    }
}

/// Limited pointers; broadcast without acknowledgements on overflow.
#[derive(Clone, Debug)]
pub struct BroadcastNoAck {
    pointers: Pointers,
    global: bool,
}

impl BroadcastNoAck {
    /// Creates an empty set with `max_hw_sharers` pointers.
    pub fn new(max_hw_sharers: usize) -> Self {
        Self {
            pointers: Pointers::new(max_hw_sharers),
            global: false,
        }
    }
}

impl SharerSet for BroadcastNoAck {
    fn has_sharer(&self, tile: TileId) -> bool {
        self.pointers.contains(tile)
    }

    fn add_sharer(&mut self, tile: TileId) -> bool {
        if self.global || self.pointers.contains(tile) {
            return true;
        }
        if self.pointers.is_full() {
            self.global = true;
        } else {
            self.pointers.insert(tile);
        }
        true
    }

    fn remove_sharer(&mut self, tile: TileId, _reply_expected: bool) {
        let _ = self.pointers.remove(tile);
    }

    /// Tracked sharers only; untracked ones are never acknowledged.
    fn num_sharers(&self) -> usize {
        self.pointers.tiles.len()
    }

    fn sharers_list(&self) -> SharerList {
        SharerList {
            broadcast: self.global,
            tiles: self.pointers.tiles.clone(),
            replies: Replies::Nobody,
        }
    }

    fn one_sharer(&self) -> Option<TileId> {
        self.pointers.first()
    }

    fn overflowed(&self) -> bool {
        self.global
    }

    fn clear(&mut self) {
        self.pointers.tiles.clear();
        self.global = false;
    }
}

/// Limited pointers; a full list refuses new sharers.
#[derive(Clone, Debug)]
pub struct LimitedNoBroadcast {
    pointers: Pointers,
}

impl LimitedNoBroadcast {
    /// Creates an empty set with `max_hw_sharers` pointers.
    pub fn new(max_hw_sharers: usize) -> Self {
        Self {
            pointers: Pointers::new(max_hw_sharers),
        }
    }
}

impl SharerSet for LimitedNoBroadcast {
    fn has_sharer(&self, tile: TileId) -> bool {
        self.pointers.contains(tile)
    }

    fn add_sharer(&mut self, tile: TileId) -> bool {
        if self.pointers.contains(tile) {
            return true;
        }
        if self.pointers.is_full() {
            return false;
        }
        self.pointers.insert(tile);
        true
    }

    fn remove_sharer(&mut self, tile: TileId, _reply_expected: bool) {
        let _ = self.pointers.remove(tile);
    }

    fn num_sharers(&self) -> usize {
        self.pointers.tiles.len()
    }

    fn sharers_list(&self) -> SharerList {
        SharerList {
            tiles: self.pointers.tiles.clone(),
            ..SharerList::default()
        }
    }

    fn one_sharer(&self) -> Option<TileId> {
        self.pointers.first()
    }

    fn clear(&mut self) {
        self.pointers.tiles.clear();
    }
}

/// Exact sharer count, identities only up to the pointer limit.
#[derive(Clone, Debug)]
pub struct Ackwise {
    pointers: Pointers,
    count: usize,
}

impl Ackwise {
    /// Creates an empty set with `max_hw_sharers` pointers.
    pub fn new(max_hw_sharers: usize) -> Self {
        Self {
            pointers: Pointers::new(max_hw_sharers),
            count: 0,
        }
    }
}

impl SharerSet for Ackwise {
    fn has_sharer(&self, tile: TileId) -> bool {
        self.pointers.contains(tile)
    }

    /// A sharer that is not identified is counted again; the L2 never re-requests a line
    /// it still holds, so this only matters for tiles already tracked.
    fn add_sharer(&mut self, tile: TileId) -> bool {
        if self.pointers.contains(tile) {
            return true;
        }
        if !self.overflowed() && !self.pointers.is_full() {
            self.pointers.insert(tile);
        }
        self.count += 1;
        true
    }

    fn remove_sharer(&mut self, tile: TileId, _reply_expected: bool) {
        if self.pointers.remove(tile) || self.overflowed() {
            self.count = self.count.saturating_sub(1);
        }
    }

    fn num_sharers(&self) -> usize {
        self.count
    }

    fn sharers_list(&self) -> SharerList {
        SharerList {
            broadcast: self.overflowed(),
            tiles: self.pointers.tiles.clone(),
            replies: Replies::Holders,
        }
    }

    fn one_sharer(&self) -> Option<TileId> {
        self.pointers.first()
    }

    fn overflowed(&self) -> bool {
        self.count > self.pointers.tiles.len()
    }

    fn clear(&mut self) {
        self.pointers.tiles.clear();
        self.count = 0;
    }
}

/// Limited pointers backed by an unbounded software set once they overflow.
#[derive(Clone, Debug)]
pub struct Limitless {
    pointers: Pointers,
    software: Option<BTreeSet<TileId>>,
    trap_penalty: u64,
}

impl Limitless {
    /// Creates an empty set with `max_hw_sharers` pointers.
    pub fn new(max_hw_sharers: usize, trap_penalty: u64) -> Self {
        Self {
            pointers: Pointers::new(max_hw_sharers),
            software: None,
            trap_penalty,
        }
    }
}

impl SharerSet for Limitless {
    fn has_sharer(&self, tile: TileId) -> bool {
        match &self.software {
            Some(set) => set.contains(&tile),
            None => self.pointers.contains(tile),
        }
    }

    fn add_sharer(&mut self, tile: TileId) -> bool {
        if let Some(set) = self.software.as_mut() {
            let _ = set.insert(tile);
        } else if self.pointers.contains(tile) {
            return true;
        } else if self.pointers.is_full() {
            let mut set: BTreeSet<TileId> = self.pointers.tiles.drain(..).collect();
            let _ = set.insert(tile);
            self.software = Some(set);
        } else {
            self.pointers.insert(tile);
        }
        true
    }

    fn remove_sharer(&mut self, tile: TileId, _reply_expected: bool) {
        match self.software.as_mut() {
            Some(set) => {
                let _ = set.remove(&tile);
            }
            None => {
                let _ = self.pointers.remove(tile);
            }
        }
    }

    fn num_sharers(&self) -> usize {
        self.software
            .as_ref()
            .map_or(self.pointers.tiles.len(), BTreeSet::len)
    }

    fn sharers_list(&self) -> SharerList {
        let tiles = match &self.software {
            Some(set) => set.iter().copied().collect(),
            None => self.pointers.tiles.clone(),
        };
        SharerList {
            tiles,
            ..SharerList::default()
        }
    }

    fn one_sharer(&self) -> Option<TileId> {
        match &self.software {
            Some(set) => set.first().copied(),
            None => self.pointers.first(),
        }
    }

    fn clear(&mut self) {
        self.pointers.tiles.clear();
        self.software = None;
    }

    fn latency(&self) -> u64 {
        if self.software.is_some() {
            self.trap_penalty
        } else {
            0
        }
    }
}
