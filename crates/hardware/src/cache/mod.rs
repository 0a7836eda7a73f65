//! Set-Associative Cache Storage.
//!
//! This module implements the generic associative storage shared by every cache level.
//! It owns line data and per-line metadata but has no coherence knowledge: controllers
//! decide states, this module only stores them. It provides:
//! 1. **Lookup:** Hit-path data access with replacement-state update.
//! 2. **Fill:** Line insertion with victim selection and eviction reporting.
//! 3. **Metadata:** Direct read/modify of line info without data transfer.
//! 4. **Miss Typing:** Optional cold/capacity/sharing/upgrade classification.

/// Address-to-set hash functions.
pub mod hash;

/// Cache replacement policy implementations (round-robin, LRU).
pub mod policies;

/// Per-line coherence metadata.
pub mod state;

use std::collections::HashSet;

use self::hash::AddressHash;
use self::policies::ReplacementPolicy;
pub use self::state::{CacheLineInfo, CacheState, CachedLoc};
use crate::common::{AccessType, ProtocolError, ProtocolResult, floor_log2};
use crate::config::{CacheConfig, HashFunction, ReplacementPolicy as PolicyType};
use crate::stats::CacheCounters;

/// Classification of a cache miss.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MissType {
    /// First reference to the line.
    Cold,
    /// The line was evicted by a fill.
    Capacity,
    /// The line was invalidated by the coherence protocol.
    Sharing,
    /// The line is present but not writable.
    Upgrade,
}

/// A line displaced by [`GenericCache::insert_line`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Eviction {
    /// Line-aligned address of the evicted line.
    pub address: u64,
    /// Metadata the line held at eviction time.
    pub info: CacheLineInfo,
    /// Line contents at eviction time.
    pub data: Vec<u8>,
}

/// Addresses seen by a cache, used to classify misses.
#[derive(Debug, Default)]
struct MissTracker {
    fetched: HashSet<u64>,
    evicted: HashSet<u64>,
    invalidated: HashSet<u64>,
}

impl MissTracker {
    fn classify(&self, address: u64) -> MissType {
        if self.invalidated.contains(&address) {
            MissType::Sharing
        } else if self.evicted.contains(&address) {
            MissType::Capacity
        } else if self.fetched.contains(&address) {
            // Dropped by a controller without a coherence or capacity event.
            MissType::Sharing
        } else {
            MissType::Cold
        }
    }

    fn on_fill(&mut self, address: u64) {
        let _ = self.fetched.insert(address);
        let _ = self.evicted.remove(&address);
        let _ = self.invalidated.remove(&address);
    }
}

/// Set-associative cache with a pluggable replacement policy.
///
/// Lines are stored flat, `set * associativity + way`. Data arrays start zero-filled so
/// the first fill of any address from a zeroed backing store is all zeroes.
#[derive(Debug)]
pub struct GenericCache {
    name: String,
    line_size: usize,
    log_line_size: u32,
    num_sets: usize,
    associativity: usize,
    hash: AddressHash,
    lines: Vec<CacheLineInfo>,
    data: Vec<u8>,
    policy: Box<dyn ReplacementPolicy>,
    miss_tracker: Option<MissTracker>,
    counters: CacheCounters,
}

impl GenericCache {
    /// Creates a cache with the geometry and policy of `config`.
    ///
    /// # Arguments
    ///
    /// * `name` - Label used in logs and statistics (e.g. `"L1-D"`).
    /// * `config` - Validated cache configuration.
    ///
    /// # Returns
    ///
    /// A new `GenericCache` with every line invalid.
    pub fn new(name: impl Into<String>, config: &CacheConfig) -> Self {
        let mut cache = Self::with_geometry(
            name,
            config.num_sets(),
            config.associativity,
            config.line_size,
            config.replacement_policy,
            config.hash,
        );
        if config.track_miss_types {
            cache.miss_tracker = Some(MissTracker::default());
        }
        cache
    }

    /// Creates a cache from explicit geometry.
    ///
    /// # Arguments
    ///
    /// * `name` - Label used in logs and statistics.
    /// * `num_sets` - Number of sets (power of two).
    /// * `associativity` - Ways per set.
    /// * `line_size` - Line size in bytes (power of two).
    /// * `policy` - Replacement policy selector.
    /// * `hash` - Set-index hash selector.
    pub fn with_geometry(
        name: impl Into<String>,
        num_sets: usize,
        associativity: usize,
        line_size: usize,
        policy: PolicyType,
        hash: HashFunction,
    ) -> Self {
        let num_sets = num_sets.max(1);
        let associativity = associativity.max(1);
        Self {
            name: name.into(),
            line_size,
            log_line_size: floor_log2(line_size),
            num_sets,
            associativity,
            hash: AddressHash::new(hash, line_size, num_sets),
            lines: vec![CacheLineInfo::default(); num_sets * associativity],
            data: vec![0; num_sets * associativity * line_size],
            policy: policies::create(policy, num_sets, associativity),
            miss_tracker: None,
            counters: CacheCounters::default(),
        }
    }

    /// Label given at construction.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Line size in bytes.
    pub const fn line_size(&self) -> usize {
        self.line_size
    }

    /// Number of sets.
    pub const fn num_sets(&self) -> usize {
        self.num_sets
    }

    /// Ways per set.
    pub const fn associativity(&self) -> usize {
        self.associativity
    }

    /// Tag stored for `address`: its block number.
    #[inline(always)]
    pub const fn tag_of(&self, address: u64) -> u64 {
        address >> self.log_line_size
    }

    /// Set that `address` maps to.
    #[inline(always)]
    pub const fn set_index(&self, address: u64) -> usize {
        self.hash.set_index(address)
    }

    const fn line_aligned(&self, address: u64) -> u64 {
        address & !((self.line_size as u64) - 1)
    }

    fn find(&self, address: u64) -> Option<usize> {
        let tag = self.tag_of(address);
        let base = self.set_index(address) * self.associativity;
        (base..base + self.associativity)
            .find(|&idx| self.lines[idx].is_valid() && self.lines[idx].tag == tag)
    }

    fn data_range(&self, idx: usize) -> std::ops::Range<usize> {
        let start = idx * self.line_size;
        start..start + self.line_size
    }

    /// Reads or writes bytes of a resident line (hit path).
    ///
    /// # Arguments
    ///
    /// * `address` - Byte address; `address + buf.len()` must not cross the line.
    /// * `access` - `Load` copies line bytes into `buf`, `Store` copies `buf` into the line.
    /// * `buf` - Source or destination bytes.
    ///
    /// # Returns
    ///
    /// `true` on a hit. On a miss nothing is transferred.
    pub fn access_line(&mut self, address: u64, access: AccessType, buf: &mut [u8]) -> bool {
        let Some(idx) = self.find(address) else {
            return false;
        };
        let offset = (address - self.line_aligned(address)) as usize;
        let len = buf.len().min(self.line_size - offset);
        let start = idx * self.line_size + offset;
        match access {
            AccessType::Load => buf[..len].copy_from_slice(&self.data[start..start + len]),
            AccessType::Store => self.data[start..start + len].copy_from_slice(&buf[..len]),
        }
        let set = idx / self.associativity;
        self.policy.update(set, idx % self.associativity);
        true
    }

    /// Copies a whole resident line into `buf`.
    ///
    /// # Returns
    ///
    /// `true` if the line is present.
    pub fn read_line(&self, address: u64, buf: &mut [u8]) -> bool {
        match self.find(address) {
            Some(idx) => {
                let range = self.data_range(idx);
                let len = buf.len().min(self.line_size);
                buf[..len].copy_from_slice(&self.data[range][..len]);
                true
            }
            None => false,
        }
    }

    /// Inserts a line, evicting a victim if the set is full.
    ///
    /// # Arguments
    ///
    /// * `address` - Any address within the line.
    /// * `info` - Metadata to install; its tag is overwritten with `tag_of(address)`.
    /// * `fill` - Exactly one line of data.
    ///
    /// # Returns
    ///
    /// The displaced line, if a valid line was evicted.
    pub fn insert_line(
        &mut self,
        address: u64,
        info: CacheLineInfo,
        fill: &[u8],
    ) -> ProtocolResult<Option<Eviction>> {
        self.insert_line_filtered(address, info, fill, |_, _| true)
    }

    /// Inserts a line, skipping victims rejected by `evictable`.
    ///
    /// # Arguments
    ///
    /// * `address` - Any address within the line.
    /// * `info` - Metadata to install.
    /// * `fill` - Exactly one line of data.
    /// * `evictable` - Called with the address and info of each valid candidate; `false`
    ///   pins the line.
    ///
    /// # Returns
    ///
    /// The displaced line, or `AllWaysLocked` if every way is valid and pinned.
    pub fn insert_line_filtered(
        &mut self,
        address: u64,
        mut info: CacheLineInfo,
        fill: &[u8],
        evictable: impl Fn(u64, &CacheLineInfo) -> bool,
    ) -> ProtocolResult<Option<Eviction>> {
        let address = self.line_aligned(address);
        let set = self.set_index(address);
        let base = set * self.associativity;
        info.tag = self.tag_of(address);

        let way = if let Some(idx) = self.find(address) {
            idx - base
        } else if let Some(free) =
            (0..self.associativity).find(|w| !self.lines[base + w].is_valid())
        {
            free
        } else {
            let lines = &self.lines[base..base + self.associativity];
            let log_line = self.log_line_size;
            let pinned = |way: usize| evictable(lines[way].tag << log_line, &lines[way]);
            self.policy
                .get_victim(set, &pinned)
                .ok_or(ProtocolError::AllWaysLocked { set, address })?
        };

        let idx = base + way;
        let range = self.data_range(idx);
        let victim = self.lines[idx];
        let eviction = if victim.is_valid() && victim.tag != info.tag {
            let evicted_address = victim.tag << self.log_line_size;
            self.counters.evictions += 1;
            if let Some(tracker) = self.miss_tracker.as_mut() {
                let _ = tracker.evicted.insert(evicted_address);
            }
            tracing::trace!(cache = %self.name, address = evicted_address, "evict");
            Some(Eviction {
                address: evicted_address,
                info: victim,
                data: self.data[range.clone()].to_vec(),
            })
        } else {
            None
        };

        let len = fill.len().min(self.line_size);
        self.data[range][..len].copy_from_slice(&fill[..len]);
        self.lines[idx] = info;
        self.policy.update(set, way);
        if let Some(tracker) = self.miss_tracker.as_mut() {
            tracker.on_fill(address);
        }
        tracing::trace!(cache = %self.name, address, state = ?info.state, "fill");
        Ok(eviction)
    }

    /// Returns the metadata of a resident line.
    pub fn line_info(&self, address: u64) -> Option<CacheLineInfo> {
        self.find(address).map(|idx| self.lines[idx])
    }

    /// Returns the coherence state of `address` (`Invalid` when absent).
    pub fn state_of(&self, address: u64) -> CacheState {
        self.line_info(address).map_or(CacheState::Invalid, |info| info.state)
    }

    /// Overwrites the metadata of a resident line, keeping its tag.
    ///
    /// # Returns
    ///
    /// `true` if the line was present.
    pub fn set_line_info(&mut self, address: u64, info: CacheLineInfo) -> bool {
        let Some(idx) = self.find(address) else {
            return false;
        };
        let tag = self.lines[idx].tag;
        self.lines[idx] = CacheLineInfo { tag, ..info };
        if !info.is_valid() {
            self.note_invalidation(address);
        }
        true
    }

    /// Invalidates a resident line because of a coherence action.
    ///
    /// # Returns
    ///
    /// The metadata the line held, if it was present.
    pub fn invalidate_line(&mut self, address: u64) -> Option<CacheLineInfo> {
        let idx = self.find(address)?;
        let old = self.lines[idx];
        self.lines[idx].state = CacheState::Invalid;
        self.lines[idx].cached_loc = CachedLoc::EMPTY;
        self.note_invalidation(address);
        Some(old)
    }

    /// Drops a resident line without counting it as a coherence invalidation.
    ///
    /// Used when a private cache gives up its copy before refetching it with more
    /// permission.
    pub fn discard_line(&mut self, address: u64) -> Option<CacheLineInfo> {
        let idx = self.find(address)?;
        let old = self.lines[idx];
        self.lines[idx] = CacheLineInfo::default();
        Some(old)
    }

    fn note_invalidation(&mut self, address: u64) {
        self.counters.invalidations += 1;
        let line = self.line_aligned(address);
        if let Some(tracker) = self.miss_tracker.as_mut() {
            let _ = tracker.invalidated.insert(line);
        }
    }

    /// Records one core-visible access for statistics.
    ///
    /// # Arguments
    ///
    /// * `address` - Accessed address.
    /// * `exclusive` - The access needed write permission.
    /// * `hit` - Whether the access was served without a miss.
    ///
    /// # Returns
    ///
    /// The miss classification when `hit` is false and miss typing is enabled.
    pub fn record_access(&mut self, address: u64, exclusive: bool, hit: bool) -> Option<MissType> {
        self.counters.accesses += 1;
        if hit {
            self.counters.hits += 1;
            return None;
        }
        self.counters.misses += 1;
        let line = self.line_aligned(address);
        let present = self.find(line).is_some();
        let miss_type = self.miss_tracker.as_ref().map(|tracker| {
            if exclusive && present {
                MissType::Upgrade
            } else {
                tracker.classify(line)
            }
        })?;
        match miss_type {
            MissType::Cold => self.counters.cold_misses += 1,
            MissType::Capacity => self.counters.capacity_misses += 1,
            MissType::Sharing => self.counters.sharing_misses += 1,
            MissType::Upgrade => self.counters.upgrade_misses += 1,
        }
        Some(miss_type)
    }

    /// Access and miss counters.
    pub const fn counters(&self) -> &CacheCounters {
        &self.counters
    }

    /// Iterates the addresses and metadata of every valid line.
    pub fn valid_lines(&self) -> impl Iterator<Item = (u64, CacheLineInfo)> + '_ {
        self.lines
            .iter()
            .filter(|info| info.is_valid())
            .map(move |info| (info.tag << self.log_line_size, *info))
    }
}
