//! Memory Operation Types.
//!
//! This module defines how the simulated core describes a memory access. These types are
//! used for the following:
//! 1. **Permission Checks:** Deciding whether a cache state can serve an operation.
//! 2. **Request Selection:** Mapping a core operation to the coherence request it needs.
//! 3. **Atomic Sequences:** Holding a private cache across a locked read-modify-write.

use serde::{Deserialize, Serialize};

/// Kind of memory operation issued by the core.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MemOp {
    /// Plain load; needs a readable copy.
    Read,

    /// Load with intent to write; needs a writable copy.
    ///
    /// Issued as the first half of an atomic read-modify-write.
    ReadEx,

    /// Store; needs a writable copy. Written through to the shared cache.
    Write,
}

impl MemOp {
    /// Returns `true` if the operation needs exclusive (writable) permission.
    #[inline(always)]
    pub const fn needs_exclusive(self) -> bool {
        matches!(self, Self::ReadEx | Self::Write)
    }
}

/// Lock signal attached to a core memory operation.
///
/// `Lock` keeps the private cache locked after the operation returns so that no
/// invalidation or eviction can intervene before the matching `Unlock` operation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum LockSignal {
    /// Ordinary access.
    #[default]
    None,
    /// Acquire and keep the private cache lock.
    Lock,
    /// Complete a locked sequence and release the private cache lock.
    Unlock,
}

/// Direction of a data transfer against cache storage.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AccessType {
    /// Copy bytes out of the line.
    Load,
    /// Copy bytes into the line.
    Store,
}

/// Logical memory components that send and receive coherence messages.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum MemComponent {
    /// Private L1 instruction cache.
    L1ICache,
    /// Private L1 data cache.
    L1DCache,
    /// Per-tile L2 cache.
    L2Cache,
    /// Directory slice on a memory-controller tile.
    DramDirectory,
}

impl MemComponent {
    /// The private caches, in lock-acquisition order.
    pub const L1_COMPONENTS: [Self; 2] = [Self::L1ICache, Self::L1DCache];

    /// Returns `true` for the private L1 caches.
    #[inline(always)]
    pub const fn is_l1(self) -> bool {
        matches!(self, Self::L1ICache | Self::L1DCache)
    }

    /// Short name used in diagnostics and statistics.
    pub const fn name(self) -> &'static str {
        match self {
            Self::L1ICache => "L1-I",
            Self::L1DCache => "L1-D",
            Self::L2Cache => "L2",
            Self::DramDirectory => "DRAM-DIR",
        }
    }

    /// Wire encoding of the component.
    pub const fn to_byte(self) -> u8 {
        match self {
            Self::L1ICache => 0,
            Self::L1DCache => 1,
            Self::L2Cache => 2,
            Self::DramDirectory => 3,
        }
    }

    /// Decodes a component byte; `None` for unknown values.
    pub const fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0 => Some(Self::L1ICache),
            1 => Some(Self::L1DCache),
            2 => Some(Self::L2Cache),
            3 => Some(Self::DramDirectory),
            _ => None,
        }
    }
}
