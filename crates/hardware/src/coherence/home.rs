//! Address-to-home lookup.
//!
//! Lines are interleaved across the memory-controller tiles at line granularity.

use crate::common::{TileId, floor_log2};

/// Maps a line address to the tile hosting its directory entry and DRAM.
#[derive(Clone, Debug)]
pub struct HomeLookup {
    controllers: Vec<TileId>,
    log_line_size: u32,
}

impl HomeLookup {
    /// Creates a lookup over `controllers`.
    ///
    /// # Arguments
    ///
    /// * `controllers` - Memory-controller tiles, non-empty.
    /// * `line_size` - Cache line size in bytes.
    pub fn new(controllers: Vec<TileId>, line_size: usize) -> Self {
        Self {
            controllers,
            log_line_size: floor_log2(line_size),
        }
    }

    /// Home tile of `address`.
    pub fn home(&self, address: u64) -> TileId {
        let n = self.controllers.len().max(1) as u64;
        let slot = ((address >> self.log_line_size) % n) as usize;
        self.controllers.get(slot).copied().unwrap_or_default()
    }

    /// Memory-controller tiles, in interleaving order.
    pub fn controllers(&self) -> &[TileId] {
        &self.controllers
    }
}
