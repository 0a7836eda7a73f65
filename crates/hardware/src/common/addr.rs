//! Tile identifiers and cache-line address helpers.
//!
//! This module defines the identity and address types shared by every controller. It provides:
//! 1. **Tile Identity:** A strong `TileId` type used for message addressing and sharer sets.
//! 2. **Line Arithmetic:** Helpers for aligning addresses to cache-line boundaries.
//! 3. **Geometry Helpers:** Integer log2 used by hashing and home lookup.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Identifier of one tile (core plus its private cache hierarchy) in the simulated chip.
///
/// Tiles are the unit of message addressing: every coherence message is sent from one
/// tile to another, and directory sharer sets are sets of tile identifiers.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct TileId(pub u32);

impl TileId {
    /// Creates a tile identifier from a raw index.
    ///
    /// # Arguments
    ///
    /// * `id` - Zero-based tile index.
    #[inline(always)]
    pub const fn new(id: u32) -> Self {
        Self(id)
    }

    /// Returns the identifier as a `usize` for indexing per-tile tables.
    #[inline(always)]
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

impl From<usize> for TileId {
    fn from(id: usize) -> Self {
        Self(id as u32)
    }
}

impl fmt::Display for TileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "tile{}", self.0)
    }
}

/// Aligns `address` down to the start of its cache line.
///
/// # Arguments
///
/// * `address` - Any byte address.
/// * `line_size` - Cache line size in bytes (power of two).
#[inline(always)]
pub const fn line_address(address: u64, line_size: usize) -> u64 {
    address & !((line_size as u64) - 1)
}

/// Returns the byte offset of `address` within its cache line.
#[inline(always)]
pub const fn line_offset(address: u64, line_size: usize) -> usize {
    (address & ((line_size as u64) - 1)) as usize
}

/// Returns `ceil(log2(value))`; `0` for values `<= 1`.
pub const fn ceil_log2(value: usize) -> u32 {
    if value <= 1 {
        0
    } else {
        usize::BITS - (value - 1).leading_zeros()
    }
}

/// Returns `floor(log2(value))`; `0` for `value == 0`.
pub const fn floor_log2(value: usize) -> u32 {
    if value == 0 {
        0
    } else {
        usize::BITS - 1 - value.leading_zeros()
    }
}
