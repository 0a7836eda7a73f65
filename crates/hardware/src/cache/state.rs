//! Per-line coherence metadata.
//!
//! Every cache level stores the same tagged metadata value: the coherence state, the tag,
//! and for the shared cache the set of private caches currently holding the line.

use std::fmt;

use serde::Serialize;

use crate::common::MemComponent;

/// Coherence state of a cached line.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default, Serialize)]
pub enum CacheState {
    /// Not present.
    #[default]
    Invalid,
    /// Read-only copy; other tiles may hold copies too.
    Shared,
    /// Dirty read-only copy whose holder answers for the line; others may share it.
    Owned,
    /// Sole writable copy.
    Modified,
}

impl CacheState {
    /// Returns `true` if loads can be served from this state.
    #[inline(always)]
    pub const fn readable(self) -> bool {
        matches!(self, Self::Shared | Self::Owned | Self::Modified)
    }

    /// Returns `true` if stores can be served from this state.
    #[inline(always)]
    pub const fn writable(self) -> bool {
        matches!(self, Self::Modified)
    }

    /// Returns `true` if memory may be stale and the holder must return the data.
    #[inline(always)]
    pub const fn dirty(self) -> bool {
        matches!(self, Self::Owned | Self::Modified)
    }
}

/// Set of private L1 caches holding a copy of a shared-cache line.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
pub struct CachedLoc(u8);

impl CachedLoc {
    /// No private cache holds the line.
    pub const EMPTY: Self = Self(0);

    const fn bit(component: MemComponent) -> u8 {
        match component {
            MemComponent::L1ICache => 0b01,
            MemComponent::L1DCache => 0b10,
            MemComponent::L2Cache | MemComponent::DramDirectory => 0,
        }
    }

    /// Set containing only `component`.
    pub const fn only(component: MemComponent) -> Self {
        Self(Self::bit(component))
    }

    /// Adds a private cache to the set.
    pub const fn insert(&mut self, component: MemComponent) {
        self.0 |= Self::bit(component);
    }

    /// Removes a private cache from the set.
    pub const fn remove(&mut self, component: MemComponent) {
        self.0 &= !Self::bit(component);
    }

    /// Returns `true` if `component` holds the line.
    pub const fn contains(self, component: MemComponent) -> bool {
        self.0 & Self::bit(component) != 0
    }

    /// Returns `true` if no private cache holds the line.
    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// Iterates the holders in lock-acquisition order.
    pub fn iter(self) -> impl Iterator<Item = MemComponent> {
        MemComponent::L1_COMPONENTS
            .into_iter()
            .filter(move |c| self.contains(*c))
    }
}

impl fmt::Debug for CachedLoc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.iter().map(MemComponent::name)).finish()
    }
}

/// Metadata of one cache line.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default, Serialize)]
pub struct CacheLineInfo {
    /// Block number of the cached address (`address >> log2(line_size)`).
    pub tag: u64,
    /// Coherence state; `Invalid` means the way is free.
    pub state: CacheState,
    /// Private caches holding the line (shared cache only).
    pub cached_loc: CachedLoc,
}

impl CacheLineInfo {
    /// Creates metadata for a freshly filled line.
    pub const fn new(tag: u64, state: CacheState) -> Self {
        Self {
            tag,
            state,
            cached_loc: CachedLoc::EMPTY,
        }
    }

    /// Returns `true` if the line holds data.
    #[inline(always)]
    pub const fn is_valid(&self) -> bool {
        !matches!(self.state, CacheState::Invalid)
    }
}
